//! One-shot CLI commands that act on the stores directly, without
//! starting the daemon.

use std::sync::Arc;

use vigil_core::config::VigilConfig;
use vigil_core::datadir::DataDir;
use vigil_core::journal::Journal;
use vigil_memory::types::FactSource;
use vigil_memory::{ArchivalStore, CoreMemory, Embedder, NullEmbedder};
use vigil_projections::triggers::{check_triggers, DEFAULT_TRIGGER_THRESHOLD};
use vigil_projections::ProjectionStore;

type CliResult = Result<(), Box<dyn std::error::Error>>;

pub fn memory(
    data_dir: &DataDir,
    user_id: &str,
    area: &str,
    query: Option<&str>,
    limit: usize,
    include_settled: bool,
) -> CliResult {
    data_dir.ensure(user_id)?;
    match area {
        "core" => print_core(data_dir)?,
        "projections" => print_projections(data_dir, user_id, include_settled)?,
        "archival" => print_archival(data_dir, user_id, query, limit)?,
        "all" => {
            print_core(data_dir)?;
            println!();
            print_projections(data_dir, user_id, include_settled)?;
            println!();
            print_archival(data_dir, user_id, query, limit)?;
        }
        other => return Err(format!("unknown memory area: {other} (core|projections|archival|all)").into()),
    }
    Ok(())
}

fn print_core(data_dir: &DataDir) -> CliResult {
    let core = CoreMemory::new(data_dir.core_memory_file());
    let text = core.read()?;
    println!("=== core memory ===");
    println!("{}", if text.trim().is_empty() { "(empty)" } else { text.trim() });
    Ok(())
}

fn print_projections(data_dir: &DataDir, user_id: &str, include_settled: bool) -> CliResult {
    let store = ProjectionStore::open(&data_dir.projections_db(user_id))?;
    let all = store.list_all()?;
    println!("=== projections ===");
    let mut shown = 0;
    for p in &all {
        if !include_settled && p.status.is_terminal() {
            continue;
        }
        let when = p
            .resolved_when
            .clone()
            .or_else(|| p.trigger_on_fact.clone().map(|t| format!("on: {t}")))
            .unwrap_or_else(|| p.resolution.to_string());
        println!("[{}] {:9} {} ({})", p.id, p.status.to_string(), p.summary, when);
        shown += 1;
    }
    if shown == 0 {
        println!("(none)");
    }
    Ok(())
}

fn print_archival(
    data_dir: &DataDir,
    user_id: &str,
    query: Option<&str>,
    limit: usize,
) -> CliResult {
    let store = ArchivalStore::open(&data_dir.memory_db(user_id))?;
    println!("=== archival memory ({} facts) ===", store.count()?);
    match query {
        Some(q) => {
            for result in store.hybrid_search(q, None, limit)? {
                println!("[{:.3}] {}", result.combined_score, result.content);
            }
        }
        None => {
            for fact in store.recent(limit)? {
                println!("[{}] {}", fact.source, fact.content);
            }
        }
    }
    Ok(())
}

pub async fn reflect(data_dir: &DataDir, user_id: &str, window: i64) -> CliResult {
    data_dir.ensure(user_id)?;
    let config = VigilConfig::load(&data_dir.config_file())?;
    config.apply_integrations();
    let router = Arc::new(vigil_agent::ProviderRouter::from_config(&config)?);
    let projections = Arc::new(ProjectionStore::open(&data_dir.projections_db(user_id))?);
    let model = config
        .agent
        .reflection_model
        .clone()
        .unwrap_or_else(|| config.agent.model.clone());

    let pass = vigil_agent::reflection::ReflectionPass::new(
        router,
        projections,
        Journal::new(data_dir.history_dir()),
        model,
    );
    let inserted = pass.run(window).await;
    println!("reflection inserted {inserted} projection(s)");
    Ok(())
}

pub async fn archive_fact(data_dir: &DataDir, user_id: &str, content: &str) -> CliResult {
    data_dir.ensure(user_id)?;
    let archival = ArchivalStore::open(&data_dir.memory_db(user_id))?;
    let projections = ProjectionStore::open(&data_dir.projections_db(user_id))?;
    let embedder: Arc<dyn Embedder> = Arc::new(NullEmbedder);

    let embedding = embedder.embed(content).await;
    let id = archival.add(content, FactSource::Cli, embedding.as_deref())?;
    let triggered = check_triggers(
        &projections,
        content,
        embedder.as_ref(),
        DEFAULT_TRIGGER_THRESHOLD,
    )
    .await?;

    println!("stored fact {id}");
    for p in triggered {
        println!("triggered projection: {}", p.summary);
    }
    Ok(())
}
