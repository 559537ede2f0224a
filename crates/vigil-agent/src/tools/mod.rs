//! Agent tool system: the `Tool` trait with declared trust levels, the
//! concrete memory/projection/worker tools, and the scoped tool set given
//! to workers.

pub mod archival;
pub mod core_memory;
pub mod fetch;
pub mod files;
pub mod projection;
pub mod worker;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use vigil_trust::{Capability, ToolLevel};

use crate::provider::ToolDefinition;

/// Result of executing a tool. Tool bodies never raise; errors are data
/// the LLM decides how to handle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    pub content: String,
    pub is_error: bool,
}

impl ToolResult {
    pub fn success(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            is_error: false,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            content: message.into(),
            is_error: true,
        }
    }

    /// Successful result carrying a JSON payload.
    pub fn json(value: &serde_json::Value) -> Self {
        Self {
            content: value.to_string(),
            is_error: false,
        }
    }
}

/// Trait all tools implement. Every invocation passes the trust gate with
/// the declared level and capability set.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    fn input_schema(&self) -> serde_json::Value;

    /// Trust level; elevated tools additionally declare capabilities.
    fn level(&self) -> ToolLevel {
        ToolLevel::Safe
    }

    fn capabilities(&self) -> Vec<Capability> {
        Vec::new()
    }

    async fn execute(&self, input: serde_json::Value) -> ToolResult;
}

/// Convert a tool slice to API-level definitions.
pub fn to_definitions(tools: &[Box<dyn Tool>]) -> Vec<ToolDefinition> {
    tools
        .iter()
        .map(|t| ToolDefinition {
            name: t.name().to_string(),
            description: t.description().to_string(),
            input_schema: t.input_schema(),
        })
        .collect()
}

/// Pull a required string argument out of a tool input object.
pub(crate) fn str_arg<'a>(input: &'a serde_json::Value, key: &str) -> Result<&'a str, ToolResult> {
    input
        .get(key)
        .and_then(|v| v.as_str())
        .filter(|s| !s.trim().is_empty())
        .ok_or_else(|| ToolResult::error(format!("missing required argument: {key}")))
}

/// Optional string argument, `None` when absent or empty.
pub(crate) fn opt_str_arg(input: &serde_json::Value, key: &str) -> Option<String> {
    input
        .get(key)
        .and_then(|v| v.as_str())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
}
