//! Worker session runner: an isolated tool loop with file tools scoped to
//! the worker's directory plus web fetch. No memory, projections, or
//! messaging — the worker's only way out is `result.md`.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, warn};

use vigil_workers::{WorkerContext, WorkerRunner};

use crate::provider::{ChatMessage, ChatRequest};
use crate::router::ProviderRouter;
use crate::tool_loop::run_tool_loop;
use crate::tools::fetch::FetchUrlTool;
use crate::tools::files::{ScopedListFilesTool, ScopedReadFileTool, ScopedWriteFileTool};
use crate::tools::{to_definitions, Tool};

pub struct LlmWorkerRunner {
    router: Arc<ProviderRouter>,
    fetch_timeout_ms: u64,
}

impl LlmWorkerRunner {
    pub fn new(router: Arc<ProviderRouter>, fetch_timeout_ms: u64) -> Self {
        Self {
            router,
            fetch_timeout_ms,
        }
    }

    fn worker_tools(&self, ctx: &WorkerContext) -> Vec<Box<dyn Tool>> {
        vec![
            Box::new(ScopedReadFileTool {
                root: ctx.working_dir.clone(),
            }),
            Box::new(ScopedWriteFileTool {
                root: ctx.working_dir.clone(),
            }),
            Box::new(ScopedListFilesTool {
                root: ctx.working_dir.clone(),
            }),
            Box::new(FetchUrlTool::new(self.fetch_timeout_ms)),
        ]
    }
}

fn worker_system_prompt(ctx: &WorkerContext) -> String {
    format!(
        "You are background worker {} running an isolated research task.\n\
         Work only inside your working directory. Write your findings to result.md \
         (write_file with path \"result.md\") before you finish — that file is the \
         only output anyone will read.\n\
         The user may leave updated instructions in steering.md at any time; check it \
         every few tool calls with read_file and follow the newest note.\n\
         You have no access to the assistant's memory or messaging.",
        ctx.worker_id
    )
}

#[async_trait]
impl WorkerRunner for LlmWorkerRunner {
    async fn run(&self, ctx: WorkerContext) -> Result<(), String> {
        let tools = self.worker_tools(&ctx);
        let tool_defs = to_definitions(&tools);

        let mut user_text = format!("Task: {}", ctx.task);
        if let Some(note) = ctx.read_steering() {
            user_text.push_str(&format!("\n\nSteering note already present: {note}"));
        }

        let request = ChatRequest {
            model: ctx.model.clone(),
            system: worker_system_prompt(&ctx),
            messages: vec![ChatMessage::user_text(user_text)],
            max_tokens: 4096,
            tools: tool_defs,
        };

        // Workers bypass the trust gate: their tool set is already scoped.
        let outcome = run_tool_loop(&self.router, request, &tools, None, None)
            .await
            .map_err(|e| e.to_string())?;

        info!(
            worker = %ctx.worker_id,
            tools_called = outcome.called.len(),
            cost_usd = outcome.total_cost_usd,
            "worker session finished"
        );

        // A worker that never wrote result.md still produced text; keep it.
        if !ctx.result_path().exists() {
            let final_text = outcome.routed.response.content;
            if final_text.trim().is_empty() {
                return Err("worker produced no result.md and no final text".into());
            }
            warn!(worker = %ctx.worker_id, "worker skipped result.md; writing final text");
            std::fs::write(ctx.result_path(), final_text).map_err(|e| e.to_string())?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::{ChatResponse, LlmProvider, ProviderError, ToolCall};
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// First turn: write result.md. Second turn: finish.
    struct WriterProvider {
        turns: AtomicUsize,
    }

    #[async_trait]
    impl LlmProvider for WriterProvider {
        fn name(&self) -> &str {
            "writer"
        }
        async fn send(&self, req: &ChatRequest) -> Result<ChatResponse, ProviderError> {
            let turn = self.turns.fetch_add(1, Ordering::SeqCst);
            if turn == 0 {
                Ok(ChatResponse {
                    content: String::new(),
                    model: req.model.clone(),
                    tokens_in: 5,
                    tokens_out: 5,
                    stop_reason: "tool_use".into(),
                    tool_calls: vec![ToolCall {
                        id: "w1".into(),
                        name: "write_file".into(),
                        input: serde_json::json!({
                            "path": "result.md",
                            "content": "# Findings\nAll good.",
                        }),
                    }],
                })
            } else {
                Ok(ChatResponse {
                    content: "done".into(),
                    model: req.model.clone(),
                    tokens_in: 5,
                    tokens_out: 5,
                    stop_reason: "end_turn".into(),
                    tool_calls: vec![],
                })
            }
        }
    }

    #[tokio::test]
    async fn worker_writes_result_via_tools() {
        let dir = tempfile::tempdir().unwrap();
        let router = Arc::new(ProviderRouter::for_tests(
            vec![(
                "m1".into(),
                Arc::new(WriterProvider {
                    turns: AtomicUsize::new(0),
                }) as Arc<dyn LlmProvider>,
            )],
            vec!["m1".into()],
        ));
        let runner = LlmWorkerRunner::new(router, 5000);
        let ctx = WorkerContext {
            worker_id: "w-test".into(),
            task: "write a report".into(),
            model: "m1".into(),
            working_dir: dir.path().to_path_buf(),
            cancel: tokio_util::sync::CancellationToken::new(),
        };
        runner.run(ctx.clone()).await.unwrap();
        let result = std::fs::read_to_string(ctx.result_path()).unwrap();
        assert!(result.contains("All good."));
    }

    /// Provider that finishes immediately without writing result.md.
    struct LazyProvider;

    #[async_trait]
    impl LlmProvider for LazyProvider {
        fn name(&self) -> &str {
            "lazy"
        }
        async fn send(&self, req: &ChatRequest) -> Result<ChatResponse, ProviderError> {
            Ok(ChatResponse {
                content: "summary text only".into(),
                model: req.model.clone(),
                tokens_in: 1,
                tokens_out: 1,
                stop_reason: "end_turn".into(),
                tool_calls: vec![],
            })
        }
    }

    #[tokio::test]
    async fn missing_result_md_falls_back_to_final_text() {
        let dir = tempfile::tempdir().unwrap();
        let router = Arc::new(ProviderRouter::for_tests(
            vec![("m1".into(), Arc::new(LazyProvider) as Arc<dyn LlmProvider>)],
            vec!["m1".into()],
        ));
        let runner = LlmWorkerRunner::new(router, 5000);
        let ctx = WorkerContext {
            worker_id: "w-lazy".into(),
            task: "quick one".into(),
            model: "m1".into(),
            working_dir: dir.path().to_path_buf(),
            cancel: tokio_util::sync::CancellationToken::new(),
        };
        runner.run(ctx.clone()).await.unwrap();
        assert_eq!(
            std::fs::read_to_string(ctx.result_path()).unwrap(),
            "summary text only"
        );
    }
}
