//! The conversational core: LLM provider clients with a fallback router,
//! the per-user session orchestrator, the trust-gated tool loop, transcript
//! repair, the reflection pass, and the worker session runner.

pub mod anthropic;
pub mod guardrail;
pub mod openai;
pub mod orchestrator;
pub mod postprocess;
pub mod prompt;
pub mod provider;
pub mod reflection;
pub mod repair;
pub mod router;
pub mod tool_loop;
pub mod tools;
pub mod worker_runner;

pub use orchestrator::{SessionOrchestrator, TurnOutput};
pub use provider::{
    ChatMessage, ChatRequest, ChatResponse, ContentBlock, LlmProvider, ProviderError, Role,
    ToolCall, ToolDefinition,
};
pub use router::{ProviderRouter, RoutedResponse};
