//! The agentic tool loop: LLM → tool calls → trust gate → execution →
//! results → LLM, until the model stops asking for tools.

use tracing::{debug, info, warn};

use vigil_trust::{GateDecision, ToolLevel, TrustGate};

use crate::guardrail::{self, Verdict};
use crate::provider::{ChatMessage, ChatRequest, ContentBlock, ProviderError, Role, ToolCall};
use crate::router::{ProviderRouter, RoutedResponse};
use crate::tools::{Tool, ToolResult};

/// Upper bound on loop iterations to stop runaway agents.
const MAX_ITERATIONS: usize = 25;

/// Per-call LLM guardrail settings for elevated tools. ASK and BLOCK
/// verdicts override static approvals; BLOCK always wins.
#[derive(Clone, Copy)]
pub struct GuardrailOpts<'a> {
    pub router: &'a ProviderRouter,
    pub model: &'a str,
    pub last_user_message: &'a str,
}

/// Everything a finished loop hands back to the orchestrator.
pub struct ToolLoopOutcome {
    /// The final routed response (the one that stopped asking for tools).
    pub routed: RoutedResponse,
    /// The transcript including every tool_use/tool_result appended.
    pub messages: Vec<ChatMessage>,
    /// Names of tools that actually executed.
    pub called: Vec<String>,
    /// Sum of cost across every LLM call in the loop.
    pub total_cost_usd: f64,
    /// Token totals across the loop.
    pub total_tokens_in: u32,
    pub total_tokens_out: u32,
}

/// Run the loop. `gate` is `Some((gate, user_id))` for the main agent;
/// worker sessions pass `None` (their tool set is already scoped).
/// `guardrail` adds the optional per-call LLM classification on top.
pub async fn run_tool_loop(
    router: &ProviderRouter,
    mut request: ChatRequest,
    tools: &[Box<dyn Tool>],
    gate: Option<(&TrustGate, &str)>,
    guardrail: Option<GuardrailOpts<'_>>,
) -> Result<ToolLoopOutcome, ProviderError> {
    let mut called = Vec::new();
    let mut total_cost = 0.0;
    let mut total_in = 0u32;
    let mut total_out = 0u32;

    for iteration in 0..MAX_ITERATIONS {
        debug!(iteration, "tool loop iteration");
        let routed = router.send_with_fallback(request.clone()).await?;
        total_cost += routed.cost_usd;
        total_in += routed.response.tokens_in;
        total_out += routed.response.tokens_out;

        if routed.response.tool_calls.is_empty() || routed.response.stop_reason != "tool_use" {
            info!(iteration, model = %routed.model_used, "tool loop complete");
            return Ok(ToolLoopOutcome {
                routed,
                messages: request.messages,
                called,
                total_cost_usd: total_cost,
                total_tokens_in: total_in,
                total_tokens_out: total_out,
            });
        }

        // Record the assistant turn: any text plus its tool_use blocks.
        let mut assistant_blocks = Vec::new();
        if !routed.response.content.is_empty() {
            assistant_blocks.push(ContentBlock::Text {
                text: routed.response.content.clone(),
            });
        }
        for call in &routed.response.tool_calls {
            assistant_blocks.push(ContentBlock::ToolUse {
                id: call.id.clone(),
                name: call.name.clone(),
                input: call.input.clone(),
            });
        }
        request.messages.push(ChatMessage {
            role: Role::Assistant,
            content: assistant_blocks,
        });

        // Execute (or gate) each call; collect results in call order.
        let mut result_blocks = Vec::new();
        for call in &routed.response.tool_calls {
            let result = gated_execute(tools, call, gate, guardrail, &mut called).await;
            result_blocks.push(ContentBlock::ToolResult {
                tool_use_id: call.id.clone(),
                content: result.content,
                is_error: result.is_error,
            });
        }
        request.messages.push(ChatMessage {
            role: Role::User,
            content: result_blocks,
        });
    }

    warn!(max = MAX_ITERATIONS, "tool loop hit iteration cap");
    Err(ProviderError::Unavailable(format!(
        "tool loop exceeded {MAX_ITERATIONS} iterations"
    )))
}

async fn gated_execute(
    tools: &[Box<dyn Tool>],
    call: &ToolCall,
    gate: Option<(&TrustGate, &str)>,
    guardrail: Option<GuardrailOpts<'_>>,
    called: &mut Vec<String>,
) -> ToolResult {
    let Some(tool) = tools.iter().find(|t| t.name() == call.name) else {
        return ToolResult::error(format!("unknown tool: {}", call.name));
    };

    if let Some((gate, user_id)) = gate {
        // Guardrail verdicts override the stored approvals.
        let verdict = match (tool.level(), guardrail) {
            (ToolLevel::Elevated, Some(opts)) => {
                guardrail::classify(
                    opts.router,
                    opts.model,
                    tool.name(),
                    &call.input,
                    opts.last_user_message,
                )
                .await
            }
            _ => Verdict::Allow,
        };

        let decision = match verdict {
            Verdict::Block => {
                warn!(tool = %call.name, "guardrail blocked elevated tool call");
                return ToolResult::error(format!(
                    "`{}` was blocked by the safety guardrail for this request.",
                    call.name
                ));
            }
            Verdict::Ask => gate.request_approval(user_id, tool.name(), &tool.capabilities()),
            Verdict::Allow => gate.check(user_id, tool.name(), tool.level(), &tool.capabilities()),
        };

        if let GateDecision::PermissionRequired { tool, capabilities } = decision {
            let caps = capabilities
                .iter()
                .map(|c| c.to_string())
                .collect::<Vec<_>>()
                .join(", ");
            return ToolResult::error(format!(
                "Permission required: `{tool}` needs [{caps}]. Ask the user to reply \
                 yes (once), always, or no — then retry on the next turn."
            ));
        }
    }

    debug!(tool = %call.name, "executing tool");
    called.push(call.name.to_string());
    tool.execute(call.input.clone()).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use crate::provider::{ChatResponse, LlmProvider};
    use vigil_trust::{Capability, ToolLevel, TrustStore};

    /// Provider that asks for one tool call on the first turn, then stops.
    struct OneToolProvider {
        turns: AtomicUsize,
        tool_name: String,
    }

    #[async_trait]
    impl LlmProvider for OneToolProvider {
        fn name(&self) -> &str {
            "scripted"
        }
        async fn send(&self, req: &ChatRequest) -> Result<ChatResponse, ProviderError> {
            let turn = self.turns.fetch_add(1, Ordering::SeqCst);
            if turn == 0 {
                Ok(ChatResponse {
                    content: String::new(),
                    model: req.model.clone(),
                    tokens_in: 10,
                    tokens_out: 5,
                    stop_reason: "tool_use".into(),
                    tool_calls: vec![ToolCall {
                        id: "c1".into(),
                        name: self.tool_name.clone(),
                        input: serde_json::json!({}),
                    }],
                })
            } else {
                // Echo the last tool result so assertions can inspect it.
                let last = req
                    .messages
                    .last()
                    .map(|m| {
                        m.content
                            .iter()
                            .filter_map(|b| match b {
                                ContentBlock::ToolResult { content, .. } => Some(content.clone()),
                                _ => None,
                            })
                            .collect::<Vec<_>>()
                            .join("|")
                    })
                    .unwrap_or_default();
                Ok(ChatResponse {
                    content: format!("saw: {last}"),
                    model: req.model.clone(),
                    tokens_in: 10,
                    tokens_out: 5,
                    stop_reason: "end_turn".into(),
                    tool_calls: vec![],
                })
            }
        }
    }

    struct EchoTool;

    #[async_trait]
    impl Tool for EchoTool {
        fn name(&self) -> &str {
            "echo"
        }
        fn description(&self) -> &str {
            "echoes"
        }
        fn input_schema(&self) -> serde_json::Value {
            serde_json::json!({})
        }
        async fn execute(&self, _input: serde_json::Value) -> ToolResult {
            ToolResult::success("echoed!")
        }
    }

    struct ElevatedTool;

    #[async_trait]
    impl Tool for ElevatedTool {
        fn name(&self) -> &str {
            "shell_exec"
        }
        fn description(&self) -> &str {
            "dangerous"
        }
        fn input_schema(&self) -> serde_json::Value {
            serde_json::json!({})
        }
        fn level(&self) -> ToolLevel {
            ToolLevel::Elevated
        }
        fn capabilities(&self) -> Vec<Capability> {
            vec![Capability::Shell]
        }
        async fn execute(&self, _input: serde_json::Value) -> ToolResult {
            ToolResult::success("ran")
        }
    }

    fn router(tool_name: &str) -> ProviderRouter {
        let provider = Arc::new(OneToolProvider {
            turns: AtomicUsize::new(0),
            tool_name: tool_name.into(),
        });
        ProviderRouter::for_tests(
            vec![("m1".into(), provider as Arc<dyn LlmProvider>)],
            vec!["m1".into()],
        )
    }

    fn request() -> ChatRequest {
        ChatRequest {
            model: "m1".into(),
            system: "sys".into(),
            messages: vec![ChatMessage::user_text("go")],
            max_tokens: 1024,
            tools: vec![],
        }
    }

    #[tokio::test]
    async fn executes_tools_and_threads_results() {
        let router = router("echo");
        let tools: Vec<Box<dyn Tool>> = vec![Box::new(EchoTool)];
        let outcome = run_tool_loop(&router, request(), &tools, None, None).await.unwrap();
        assert_eq!(outcome.called, vec!["echo"]);
        assert_eq!(outcome.routed.response.content, "saw: echoed!");
        // Transcript now holds: user, assistant(tool_use), user(tool_result).
        assert_eq!(outcome.messages.len(), 3);
        assert_eq!(outcome.total_tokens_in, 20);
    }

    #[tokio::test]
    async fn blocked_elevated_tool_returns_permission_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(TrustStore::load(dir.path().join("trust.json"), []));
        let gate = TrustGate::new(store);

        let router = router("shell_exec");
        let tools: Vec<Box<dyn Tool>> = vec![Box::new(ElevatedTool)];
        let outcome = run_tool_loop(&router, request(), &tools, Some((&gate, "u1")), None)
            .await
            .unwrap();
        // The tool never executed; the model saw the permission error.
        assert!(outcome.called.is_empty());
        assert!(outcome.routed.response.content.contains("Permission required"));
        assert!(gate.has_pending("u1"));
    }

    #[tokio::test]
    async fn unknown_tool_is_an_error_result_not_a_crash() {
        let router = router("nonexistent");
        let tools: Vec<Box<dyn Tool>> = vec![Box::new(EchoTool)];
        let outcome = run_tool_loop(&router, request(), &tools, None, None).await.unwrap();
        assert!(outcome.routed.response.content.contains("unknown tool"));
    }

    /// Guardrail model that always answers with a fixed verdict.
    struct VerdictProvider(&'static str);

    #[async_trait]
    impl LlmProvider for VerdictProvider {
        fn name(&self) -> &str {
            "verdict"
        }
        async fn send(&self, req: &ChatRequest) -> Result<ChatResponse, ProviderError> {
            Ok(ChatResponse {
                content: self.0.to_string(),
                model: req.model.clone(),
                tokens_in: 1,
                tokens_out: 1,
                stop_reason: "end_turn".into(),
                tool_calls: vec![],
            })
        }
    }

    #[tokio::test]
    async fn guardrail_block_wins_over_static_approval() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(TrustStore::load(
            dir.path().join("trust.json"),
            ["shell_exec".to_string()], // statically pre-approved
        ));
        let gate = TrustGate::new(store);

        let chat_router = router("shell_exec");
        let guard_router = ProviderRouter::for_tests(
            vec![("gm".into(), Arc::new(VerdictProvider("BLOCK")) as Arc<dyn LlmProvider>)],
            vec!["gm".into()],
        );
        let tools: Vec<Box<dyn Tool>> = vec![Box::new(ElevatedTool)];

        let outcome = run_tool_loop(
            &chat_router,
            request(),
            &tools,
            Some((&gate, "u1")),
            Some(GuardrailOpts {
                router: &guard_router,
                model: "gm",
                last_user_message: "run it",
            }),
        )
        .await
        .unwrap();

        assert!(outcome.called.is_empty(), "blocked call must not execute");
        assert!(outcome.routed.response.content.contains("blocked by the safety guardrail"));
        // BLOCK does not open a handshake.
        assert!(!gate.has_pending("u1"));
    }
}
