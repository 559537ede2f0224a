//! `vigil serve` — full daemon wiring and shutdown ordering.
//!
//! Every input source (channel adapters, scheduler firings, worker
//! completions) funnels into one per-channel message queue, so agent
//! activity is strictly sequential per channel.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use tracing::{error, info, warn};

use vigil_agent::reflection::ReflectionPass;
use vigil_agent::tools::archival::{ArchivalInsertTool, ArchivalSearchTool};
use vigil_agent::tools::core_memory::{CoreMemoryAppendTool, CoreMemoryReplaceTool};
use vigil_agent::tools::projection::{
    ProjectionAddTool, ProjectionLinkTool, ProjectionListTool, ProjectionResolveTool,
};
use vigil_agent::tools::worker::{
    WorkerDispatchTool, WorkerInterruptTool, WorkerStatusTool, WorkerSteerTool,
};
use vigil_agent::tools::Tool;
use vigil_agent::worker_runner::LlmWorkerRunner;
use vigil_agent::{ProviderRouter, SessionOrchestrator};
use vigil_channels::queue::{ProcessFn, RejectFn};
use vigil_channels::{ChannelAdapter, MessageQueue, QueueConfig};
use vigil_core::config::VigilConfig;
use vigil_core::datadir::DataDir;
use vigil_core::hours::ActiveHoursGate;
use vigil_core::journal::Journal;
use vigil_core::types::{ChannelId, InboundMessage, Platform, UserId};
use vigil_memory::types::FactSource;
use vigil_memory::{ArchivalStore, CoreMemory, Embedder};
use vigil_projections::triggers::{check_triggers, DEFAULT_TRIGGER_THRESHOLD};
use vigil_projections::ProjectionStore;
use vigil_scheduler::{Scheduler, SchedulerEvent};
use vigil_trust::{TrustGate, TrustStore};
use vigil_workers::WorkerRegistry;

type ServeResult = Result<(), Box<dyn std::error::Error>>;

/// The platform + channel the principal was last seen on. Synthetic
/// messages (scheduler, worker bridge) are delivered there.
type LastRoute = Arc<RwLock<Option<(Platform, ChannelId)>>>;

type AdapterMap = Arc<HashMap<Platform, Arc<dyn ChannelAdapter>>>;

pub async fn run(data_dir: DataDir, user_id: &str) -> ServeResult {
    let config = VigilConfig::load(&data_dir.config_file())?;
    config.apply_integrations();
    data_dir.ensure(user_id)?;
    let principal = UserId::from(user_id);

    // Stores. Each exclusively owns its backing file.
    let archival = Arc::new(ArchivalStore::open(&data_dir.memory_db(user_id))?);
    let projections = Arc::new(ProjectionStore::open(&data_dir.projections_db(user_id))?);
    let core = Arc::new(CoreMemory::new(data_dir.core_memory_file()));
    let trust = Arc::new(TrustGate::new(Arc::new(TrustStore::load(
        data_dir.trust_approvals_file(),
        [],
    ))));

    #[cfg(feature = "embeddings")]
    let embedder: Arc<dyn Embedder> = Arc::new(vigil_memory::embed::FastEmbedder::new());
    #[cfg(not(feature = "embeddings"))]
    let embedder: Arc<dyn Embedder> = {
        info!("embeddings feature off; archival memory runs keyword-only");
        Arc::new(vigil_memory::NullEmbedder)
    };

    let router = Arc::new(ProviderRouter::from_config(&config)?);

    // Workers: registry + LLM runner + completion bridge.
    let (worker_tx, mut worker_rx) = tokio::sync::mpsc::channel(32);
    let registry = WorkerRegistry::new(
        data_dir.workers_dir(),
        config.tools.workers.max_concurrent,
        worker_tx,
    );
    let worker_runner = Arc::new(LlmWorkerRunner::new(
        Arc::clone(&router),
        config.tools.fetch_url.timeout_ms,
    ));
    let worker_model = config
        .agent
        .reflection_model
        .clone()
        .unwrap_or_else(|| config.agent.model.clone());

    let tools: Vec<Box<dyn Tool>> = vec![
        Box::new(ArchivalInsertTool {
            archival: Arc::clone(&archival),
            projections: Arc::clone(&projections),
            embedder: Arc::clone(&embedder),
        }),
        Box::new(ArchivalSearchTool {
            archival: Arc::clone(&archival),
            embedder: Arc::clone(&embedder),
        }),
        Box::new(CoreMemoryAppendTool {
            core: Arc::clone(&core),
        }),
        Box::new(CoreMemoryReplaceTool {
            core: Arc::clone(&core),
        }),
        Box::new(ProjectionAddTool {
            projections: Arc::clone(&projections),
        }),
        Box::new(ProjectionListTool {
            projections: Arc::clone(&projections),
        }),
        Box::new(ProjectionResolveTool {
            projections: Arc::clone(&projections),
        }),
        Box::new(ProjectionLinkTool {
            projections: Arc::clone(&projections),
        }),
        Box::new(WorkerDispatchTool {
            registry: Arc::clone(&registry),
            runner: worker_runner,
            default_model: worker_model,
        }),
        Box::new(WorkerStatusTool {
            registry: Arc::clone(&registry),
        }),
        Box::new(WorkerSteerTool {
            registry: Arc::clone(&registry),
        }),
        Box::new(WorkerInterruptTool {
            registry: Arc::clone(&registry),
        }),
    ];

    let orchestrator = Arc::new(SessionOrchestrator::new(
        config.agent.clone(),
        Arc::clone(&router),
        Arc::clone(&core),
        Arc::clone(&projections),
        Arc::clone(&trust),
        tools,
        Journal::new(data_dir.history_dir()),
        Journal::new(data_dir.usage_dir()),
    ));

    // Channel adapters.
    let mut adapter_map: HashMap<Platform, Arc<dyn ChannelAdapter>> = HashMap::new();
    if let Some(tg) = &config.telegram {
        adapter_map.insert(
            Platform::Telegram,
            Arc::new(vigil_telegram::TelegramAdapter::new(tg)),
        );
    }
    if let Some(wa) = &config.whatsapp {
        if wa.enabled {
            adapter_map.insert(
                Platform::Whatsapp,
                Arc::new(vigil_whatsapp::WhatsappAdapter::new(wa)),
            );
        }
    }
    if adapter_map.is_empty() {
        warn!("no channel adapters configured; only scheduled jobs will run");
    }
    let adapters: AdapterMap = Arc::new(adapter_map);
    let last_route: LastRoute = Arc::new(RwLock::new(None));

    // The per-channel queue: at most one in-flight turn per channel.
    let queue = {
        let orchestrator = Arc::clone(&orchestrator);
        let adapters_r = Arc::clone(&adapters);
        let last_route_r = Arc::clone(&last_route);
        let adapters = Arc::clone(&adapters);
        let last_route = Arc::clone(&last_route);
        let process: ProcessFn = Arc::new(move |msg: InboundMessage| {
            let orchestrator = Arc::clone(&orchestrator);
            let adapters = Arc::clone(&adapters);
            let last_route = Arc::clone(&last_route);
            Box::pin(async move {
                let adapter = delivery_adapter(&adapters, &last_route, msg.platform);
                if let Some(adapter) = &adapter {
                    let _ = adapter.send_typing(&msg.channel_id).await;
                }
                let output = orchestrator.handle_message(&msg).await;
                let Some(reply) = output.reply else { return };
                match &adapter {
                    Some(adapter) => {
                        if let Err(e) = adapter.send_message(&msg.channel_id, &reply).await {
                            error!(error = %e, channel = %msg.channel_id, "reply delivery failed");
                        }
                    }
                    None => warn!(channel = %msg.channel_id, "no adapter for reply; dropped"),
                }
            })
        });
        let on_reject: RejectFn = Arc::new(move |msg: InboundMessage| {
            let adapters = Arc::clone(&adapters_r);
            let last_route = Arc::clone(&last_route_r);
            tokio::spawn(async move {
                if let Some(adapter) = delivery_adapter(&adapters, &last_route, msg.platform) {
                    let _ = adapter
                        .send_message(
                            &msg.channel_id,
                            "I'm overloaded right now — that message was dropped, \
                             please resend it in a moment.",
                        )
                        .await;
                }
            });
        });
        MessageQueue::new(QueueConfig::default(), process, on_reject)
    };

    // Inbound handler shared by every adapter: remember the route, map the
    // platform identity onto the principal, enqueue.
    {
        let queue = Arc::clone(&queue);
        let last_route = Arc::clone(&last_route);
        let principal = principal.clone();
        let handler: vigil_channels::InboundHandler = Arc::new(move |mut msg: InboundMessage| {
            *last_route.write().unwrap() = Some((msg.platform, msg.channel_id.clone()));
            msg.user_id = principal.clone();
            queue.enqueue(msg);
        });
        for adapter in adapters.values() {
            adapter.on_message(Arc::clone(&handler));
        }
    }
    for adapter in adapters.values() {
        adapter.start().await?;
        info!(adapter = adapter.name(), "channel adapter started");
    }

    // Scheduler: firings become synthetic messages on the last-seen channel.
    let gate = ActiveHoursGate::from_config(config.active_hours.as_ref())?;
    let (sched_tx, mut sched_rx) = tokio::sync::mpsc::channel(16);
    let scheduler = Scheduler::new(Arc::clone(&projections), gate, &config.cron, sched_tx)?;
    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let scheduler_task = tokio::spawn(scheduler.run(shutdown_rx.clone()));

    let reflection = Arc::new(ReflectionPass::new(
        Arc::clone(&router),
        Arc::clone(&projections),
        Journal::new(data_dir.history_dir()),
        config
            .agent
            .reflection_model
            .clone()
            .unwrap_or_else(|| config.agent.model.clone()),
    ));

    {
        let queue = Arc::clone(&queue);
        let last_route = Arc::clone(&last_route);
        let principal = principal.clone();
        let reflection = Arc::clone(&reflection);
        tokio::spawn(async move {
            while let Some(event) = sched_rx.recv().await {
                match event {
                    SchedulerEvent::Synthetic(text) => {
                        let route = last_route.read().unwrap().clone();
                        match route {
                            Some((_, channel)) => queue.enqueue(InboundMessage::synthetic(
                                channel,
                                principal.clone(),
                                text,
                            )),
                            None => {
                                warn!("scheduled prompt dropped: no channel seen yet")
                            }
                        }
                    }
                    SchedulerEvent::ReflectionDue => {
                        let reflection = Arc::clone(&reflection);
                        tokio::spawn(async move {
                            let inserted =
                                reflection.run(vigil_agent::reflection::DEFAULT_WINDOW_MINUTES).await;
                            if inserted > 0 {
                                info!(inserted, "reflection pass added projections");
                            }
                        });
                    }
                }
            }
        });
    }

    // Worker completion bridge: fact first, then (only if a trigger fired)
    // a synthetic message — the agent is guaranteed to see the fact.
    {
        let archival = Arc::clone(&archival);
        let projections = Arc::clone(&projections);
        let embedder = Arc::clone(&embedder);
        let queue = Arc::clone(&queue);
        let last_route = Arc::clone(&last_route);
        let principal = principal.clone();
        tokio::spawn(async move {
            while let Some(completion) = worker_rx.recv().await {
                let embedding = embedder.embed(&completion.fact_text).await;
                if let Err(e) =
                    archival.add(&completion.fact_text, FactSource::Worker, embedding.as_deref())
                {
                    error!(error = %e, worker = %completion.worker_id, "completion fact insert failed");
                    continue;
                }
                let activated = match check_triggers(
                    &projections,
                    &completion.fact_text,
                    embedder.as_ref(),
                    DEFAULT_TRIGGER_THRESHOLD,
                )
                .await
                {
                    Ok(a) => a,
                    Err(e) => {
                        error!(error = %e, "trigger check on worker completion failed");
                        continue;
                    }
                };
                if activated.is_empty() {
                    continue;
                }
                let route = last_route.read().unwrap().clone();
                let Some((_, channel)) = route else {
                    warn!("worker trigger fired but no channel seen yet");
                    continue;
                };
                let mut text = format!("[worker update] {}\n", completion.fact_text);
                text.push_str("This activated the following commitments:\n");
                for p in &activated {
                    text.push_str(&format!("- {}\n", p.summary));
                }
                text.push_str("Follow up with the user as appropriate.");
                queue.enqueue(InboundMessage::synthetic(channel, principal.clone(), text));
            }
        });
    }

    info!(user = %principal, data_dir = %data_dir.root().display(), "vigil is running");
    tokio::signal::ctrl_c().await?;
    info!("shutting down");

    // Ordered disposal: scheduler first, then adapters; stores and the
    // embedder fall out of scope last.
    let _ = shutdown_tx.send(true);
    let _ = scheduler_task.await;
    for adapter in adapters.values() {
        let _ = adapter.stop().await;
    }
    Ok(())
}

/// Adapter that should carry traffic for `platform`; synthetic traffic
/// goes to wherever the principal was last seen.
fn delivery_adapter(
    adapters: &AdapterMap,
    last_route: &LastRoute,
    platform: Platform,
) -> Option<Arc<dyn ChannelAdapter>> {
    let platform = match platform {
        Platform::Synthetic => last_route.read().unwrap().as_ref().map(|(p, _)| *p)?,
        other => other,
    };
    adapters.get(&platform).cloned()
}
