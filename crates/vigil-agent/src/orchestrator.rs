//! The session orchestrator: owns per-user conversational state and runs
//! the full turn for every inbound message — real or synthetic.

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use dashmap::DashMap;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use vigil_core::config::{AgentConfig, REVIEW_HORIZON_DAYS};
use vigil_core::journal::{HistoryEntry, Journal, UsageEntry};
use vigil_core::types::InboundMessage;
use vigil_memory::CoreMemory;
use vigil_projections::ProjectionStore;
use vigil_trust::{ApprovalReply, HandshakeOutcome, TrustGate};

use crate::postprocess::{is_silent, strip_reasoning_tags};
use crate::prompt::build_system_prompt;
use crate::provider::{ChatMessage, ChatRequest, ContentBlock, Role};
use crate::repair::repair_transcript;
use crate::router::ProviderRouter;
use crate::tool_loop::{run_tool_loop, GuardrailOpts};
use crate::tools::{to_definitions, Tool};

/// What the turn produced. `reply: None` means nothing is sent (silent
/// token, or a synthetic prompt the agent chose to ignore).
#[derive(Debug, Clone)]
pub struct TurnOutput {
    pub reply: Option<String>,
}

impl TurnOutput {
    fn say(text: impl Into<String>) -> Self {
        Self {
            reply: Some(text.into()),
        }
    }

    fn silent() -> Self {
        Self { reply: None }
    }
}

struct Session {
    messages: Vec<ChatMessage>,
}

/// One logical session per user, created lazily, disposed by `/clear`.
pub struct SessionOrchestrator {
    agent: AgentConfig,
    router: Arc<ProviderRouter>,
    core: Arc<CoreMemory>,
    projections: Arc<ProjectionStore>,
    trust: Arc<TrustGate>,
    tools: Vec<Box<dyn Tool>>,
    sessions: DashMap<String, Arc<Mutex<Session>>>,
    history: Journal,
    usage: Journal,
    max_tokens: u32,
}

impl SessionOrchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        agent: AgentConfig,
        router: Arc<ProviderRouter>,
        core: Arc<CoreMemory>,
        projections: Arc<ProjectionStore>,
        trust: Arc<TrustGate>,
        tools: Vec<Box<dyn Tool>>,
        history: Journal,
        usage: Journal,
    ) -> Self {
        Self {
            agent,
            router,
            core,
            projections,
            trust,
            tools,
            sessions: DashMap::new(),
            history,
            usage,
            max_tokens: 4096,
        }
    }

    /// Run one turn. Serialisation per channel is the queue's job; this
    /// method assumes it is never called concurrently for the same user.
    pub async fn handle_message(&self, msg: &InboundMessage) -> TurnOutput {
        let user_id = msg.user_id.as_str();
        let text = msg.text.trim();

        // 1. Slash commands never reach the LLM.
        if let Some(output) = self.handle_slash_command(user_id, text) {
            return output;
        }

        // 2. Open approval handshake: an unambiguous yes/no resolves it
        // directly. Anything else clears it and flows on.
        if self.trust.has_pending(user_id) {
            match self.trust.try_resolve(user_id, text) {
                Ok(HandshakeOutcome::Resolved { tool, reply }) => {
                    return TurnOutput::say(approval_ack(&tool, reply));
                }
                Ok(HandshakeOutcome::NotAReply) => {}
                Err(e) => {
                    error!(error = %e, "approval handshake failed");
                    return TurnOutput::say(
                        "I couldn't record that approval — the trust store is unwritable.",
                    );
                }
            }
        }

        // Journal the inbound text before anything can fail.
        let _ = self.history.append(&HistoryEntry {
            role: "user".into(),
            content: msg.text.clone(),
            channel: msg.platform.to_string(),
            timestamp: Utc::now(),
        });

        let session = self
            .sessions
            .entry(user_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(Session { messages: Vec::new() })))
            .clone();
        let mut session = session.lock().await;

        // 3. Repair the transcript before prompting.
        let transcript = std::mem::take(&mut session.messages);
        let (repaired, report) = repair_transcript(transcript, &self.agent.name);
        if !report.is_clean() {
            warn!(?report, user = %user_id, "transcript repaired — persistence bug upstream");
        }
        session.messages = repaired;

        // 4. Rebuild the system prompt from live state.
        let core_text = self.core.read().unwrap_or_default();
        let upcoming = self
            .projections
            .get_upcoming(REVIEW_HORIZON_DAYS)
            .unwrap_or_default();
        let tool_defs = to_definitions(&self.tools);
        let system = build_system_prompt(&self.agent, &core_text, &upcoming, &tool_defs, Utc::now());

        // Append the user turn (text plus any images).
        let mut blocks = vec![ContentBlock::Text {
            text: msg.text.clone(),
        }];
        for img in &msg.images {
            blocks.push(ContentBlock::Image {
                media_type: img.media_type.clone(),
                data: img.data.clone(),
            });
        }
        session.messages.push(ChatMessage {
            role: Role::User,
            content: blocks,
        });

        let request = ChatRequest {
            model: String::new(), // the router picks from its chain
            system,
            messages: session.messages.clone(),
            max_tokens: self.max_tokens,
            tools: tool_defs,
        };

        // 5 & 6. LLM with fallback chain, tool loop behind the trust gate
        // (plus the per-call guardrail when configured).
        let started = Instant::now();
        let guardrail = self
            .agent
            .guardrail_model
            .as_deref()
            .map(|model| GuardrailOpts {
                router: &self.router,
                model,
                last_user_message: &msg.text,
            });
        let outcome = run_tool_loop(
            &self.router,
            request,
            &self.tools,
            Some((self.trust.as_ref(), user_id)),
            guardrail,
        )
        .await;

        let outcome = match outcome {
            Ok(o) => o,
            Err(e) => {
                error!(error = %e, user = %user_id, "turn failed after fallback chain");
                return TurnOutput::say(
                    "I'm having trouble reaching my language models right now — \
                     I'll keep your message and you can try again in a bit.",
                );
            }
        };

        let latency_ms = started.elapsed().as_millis() as u64;
        let _ = self.usage.append(&UsageEntry {
            timestamp: Utc::now(),
            user_id: user_id.to_string(),
            model: outcome.routed.model_used.clone(),
            input_tokens: outcome.total_tokens_in,
            output_tokens: outcome.total_tokens_out,
            cost_usd: outcome.total_cost_usd,
            latency_ms,
        });
        info!(
            user = %user_id,
            model = %outcome.routed.model_used,
            fallbacks = outcome.routed.fallbacks_used,
            tools = outcome.called.len(),
            latency_ms,
            "turn complete"
        );

        // 7 & 8. Post-process and commit the assistant turn.
        session.messages = outcome.messages;
        let cleaned = strip_reasoning_tags(&outcome.routed.response.content);
        if !cleaned.is_empty() {
            session.messages.push(ChatMessage::assistant_text(&cleaned));
            let _ = self.history.append(&HistoryEntry {
                role: "assistant".into(),
                content: cleaned.clone(),
                channel: msg.platform.to_string(),
                timestamp: Utc::now(),
            });
        }

        if cleaned.is_empty() || is_silent(&cleaned) {
            return TurnOutput::silent();
        }
        TurnOutput::say(cleaned)
    }

    fn handle_slash_command(&self, user_id: &str, text: &str) -> Option<TurnOutput> {
        match text {
            "/clear" => {
                self.sessions.remove(user_id);
                Some(TurnOutput::say("Session cleared."))
            }
            "/restart" => {
                self.sessions.remove(user_id);
                Some(TurnOutput::say(
                    "Session cleared; the system prompt is rebuilt on your next message.",
                ))
            }
            "/memory" => {
                let core = self.core.read().unwrap_or_default();
                let upcoming = self
                    .projections
                    .get_upcoming(REVIEW_HORIZON_DAYS)
                    .unwrap_or_default();
                let mut out = String::from("**Core memory**\n");
                if core.trim().is_empty() {
                    out.push_str("(empty)\n");
                } else {
                    out.push_str(core.trim());
                    out.push('\n');
                }
                out.push_str("\n**Upcoming commitments**\n");
                if upcoming.is_empty() {
                    out.push_str("(none)");
                } else {
                    for p in &upcoming {
                        let when = p
                            .resolved_when
                            .clone()
                            .unwrap_or_else(|| p.resolution.to_string());
                        out.push_str(&format!("- {} ({when})\n", p.summary));
                    }
                }
                Some(TurnOutput::say(out))
            }
            "/log" => {
                let lines = self.history.tail_today(20).unwrap_or_default();
                Some(TurnOutput::say(if lines.is_empty() {
                    "No history recorded today.".to_string()
                } else {
                    lines.join("\n")
                }))
            }
            _ => None,
        }
    }
}

fn approval_ack(tool: &str, reply: ApprovalReply) -> String {
    match reply {
        ApprovalReply::Approve => {
            format!("Approved `{tool}` for one use — I'll retry it on my next turn.")
        }
        ApprovalReply::ApproveAlways => {
            format!("Permanently approved `{tool}`. You can revoke this in trust-approvals.json.")
        }
        ApprovalReply::Deny => format!("Understood — `{tool}` stays blocked."),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use vigil_core::types::Platform;
    use crate::provider::{ChatResponse, LlmProvider, ProviderError};
    use vigil_trust::TrustStore;

    struct CannedProvider {
        replies: Vec<String>,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl LlmProvider for CannedProvider {
        fn name(&self) -> &str {
            "canned"
        }
        async fn send(&self, req: &ChatRequest) -> Result<ChatResponse, ProviderError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            let content = self
                .replies
                .get(n.min(self.replies.len().saturating_sub(1)))
                .cloned()
                .unwrap_or_default();
            Ok(ChatResponse {
                content,
                model: req.model.clone(),
                tokens_in: 10,
                tokens_out: 10,
                stop_reason: "end_turn".into(),
                tool_calls: vec![],
            })
        }
    }

    struct FailingProvider;

    #[async_trait]
    impl LlmProvider for FailingProvider {
        fn name(&self) -> &str {
            "failing"
        }
        async fn send(&self, _req: &ChatRequest) -> Result<ChatResponse, ProviderError> {
            Err(ProviderError::Api {
                status: 500,
                message: "down".into(),
            })
        }
    }

    struct Fixture {
        _dir: tempfile::TempDir,
        orchestrator: SessionOrchestrator,
    }

    fn fixture(replies: Vec<&str>) -> Fixture {
        let provider = Arc::new(CannedProvider {
            replies: replies.into_iter().map(String::from).collect(),
            calls: AtomicUsize::new(0),
        });
        fixture_with_provider(provider)
    }

    fn fixture_with_provider(provider: Arc<dyn LlmProvider>) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let router = Arc::new(ProviderRouter::for_tests(
            vec![("m1".into(), provider)],
            vec!["m1".into()],
        ));
        let core = Arc::new(CoreMemory::new(dir.path().join("core-memory.md")));
        let projections = Arc::new(ProjectionStore::open_in_memory().unwrap());
        let trust = Arc::new(TrustGate::new(Arc::new(TrustStore::load(
            dir.path().join("trust-approvals.json"),
            [],
        ))));
        let orchestrator = SessionOrchestrator::new(
            AgentConfig::default(),
            router,
            core,
            projections,
            trust,
            Vec::new(),
            Journal::new(dir.path().join("history")),
            Journal::new(dir.path().join("usage")),
        );
        Fixture {
            _dir: dir,
            orchestrator,
        }
    }

    fn msg(text: &str) -> InboundMessage {
        InboundMessage::new("c1".into(), "u1".into(), text, Platform::Telegram)
    }

    #[tokio::test]
    async fn normal_turn_replies() {
        let f = fixture(vec!["hello there"]);
        let out = f.orchestrator.handle_message(&msg("hi")).await;
        assert_eq!(out.reply.as_deref(), Some("hello there"));
    }

    #[tokio::test]
    async fn noop_is_suppressed() {
        let f = fixture(vec!["NOOP"]);
        let out = f.orchestrator.handle_message(&msg("[scheduled] anything?")).await;
        assert!(out.reply.is_none());
    }

    #[tokio::test]
    async fn think_tags_are_stripped() {
        let f = fixture(vec!["<think>hmm</think>the answer"]);
        let out = f.orchestrator.handle_message(&msg("q")).await;
        assert_eq!(out.reply.as_deref(), Some("the answer"));
    }

    #[tokio::test]
    async fn slash_clear_never_hits_the_llm() {
        let f = fixture(vec!["should not appear"]);
        let out = f.orchestrator.handle_message(&msg("/clear")).await;
        assert_eq!(out.reply.as_deref(), Some("Session cleared."));
    }

    #[tokio::test]
    async fn slash_memory_renders_state() {
        let f = fixture(vec!["unused"]);
        f.orchestrator.core.append("People", "- Sam").unwrap();
        let out = f.orchestrator.handle_message(&msg("/memory")).await;
        let reply = out.reply.unwrap();
        assert!(reply.contains("- Sam"));
        assert!(reply.contains("Upcoming commitments"));
    }

    #[tokio::test]
    async fn exhausted_chain_yields_apology() {
        let f = fixture_with_provider(Arc::new(FailingProvider));
        let out = f.orchestrator.handle_message(&msg("hi")).await;
        assert!(out.reply.unwrap().contains("trouble reaching"));
    }

    #[tokio::test]
    async fn approval_handshake_short_circuits() {
        let f = fixture(vec!["turn 1", "turn 2"]);
        // Open a handshake by hand, as the gate would during a tool loop.
        f.orchestrator.trust.check(
            "u1",
            "shell_exec",
            vigil_trust::ToolLevel::Elevated,
            &[vigil_trust::Capability::Shell],
        );
        let out = f.orchestrator.handle_message(&msg("yes")).await;
        assert!(out.reply.unwrap().contains("Approved `shell_exec`"));
        // The reply was produced without an LLM round-trip: next turn
        // still gets the first canned reply.
        let out = f.orchestrator.handle_message(&msg("hi")).await;
        assert_eq!(out.reply.as_deref(), Some("turn 1"));
    }

    #[tokio::test]
    async fn non_reply_clears_pending_and_flows_to_llm() {
        let f = fixture(vec!["llm answer"]);
        f.orchestrator.trust.check(
            "u1",
            "shell_exec",
            vigil_trust::ToolLevel::Elevated,
            &[vigil_trust::Capability::Shell],
        );
        let out = f.orchestrator.handle_message(&msg("tell me a joke")).await;
        assert_eq!(out.reply.as_deref(), Some("llm answer"));
        assert!(!f.orchestrator.trust.has_pending("u1"));
    }

    #[tokio::test]
    async fn session_accumulates_and_clear_wipes() {
        let f = fixture(vec!["r1", "r2", "r3"]);
        f.orchestrator.handle_message(&msg("one")).await;
        f.orchestrator.handle_message(&msg("two")).await;
        {
            let session = f.orchestrator.sessions.get("u1").unwrap().clone();
            let session = session.lock().await;
            // user, assistant, user, assistant
            assert_eq!(session.messages.len(), 4);
        }
        f.orchestrator.handle_message(&msg("/clear")).await;
        assert!(f.orchestrator.sessions.get("u1").is_none());
    }
}
