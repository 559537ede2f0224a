//! Core memory tools. Guarded level: they rewrite the always-visible
//! prompt block, so they run freely but are named in the audit trail.

use std::sync::Arc;

use async_trait::async_trait;

use vigil_memory::CoreMemory;
use vigil_trust::ToolLevel;

use super::{str_arg, Tool, ToolResult};

pub struct CoreMemoryAppendTool {
    pub core: Arc<CoreMemory>,
}

#[async_trait]
impl Tool for CoreMemoryAppendTool {
    fn name(&self) -> &str {
        "core_memory_append"
    }

    fn description(&self) -> &str {
        "Append a line under a `## Section` heading of core memory (the always-visible block)."
    }

    fn input_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "section": { "type": "string" },
                "content": { "type": "string" }
            },
            "required": ["section", "content"]
        })
    }

    fn level(&self) -> ToolLevel {
        ToolLevel::Guarded
    }

    async fn execute(&self, input: serde_json::Value) -> ToolResult {
        let section = match str_arg(&input, "section") {
            Ok(s) => s,
            Err(e) => return e,
        };
        let content = match str_arg(&input, "content") {
            Ok(c) => c,
            Err(e) => return e,
        };
        match self.core.append(section, content) {
            Ok(()) => ToolResult::success(format!("appended under ## {section}")),
            Err(e) => ToolResult::error(e.to_string()),
        }
    }
}

pub struct CoreMemoryReplaceTool {
    pub core: Arc<CoreMemory>,
}

#[async_trait]
impl Tool for CoreMemoryReplaceTool {
    fn name(&self) -> &str {
        "core_memory_replace"
    }

    fn description(&self) -> &str {
        "Replace the first occurrence of a text inside one core memory section."
    }

    fn input_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "section": { "type": "string" },
                "old": { "type": "string" },
                "new": { "type": "string" }
            },
            "required": ["section", "old", "new"]
        })
    }

    fn level(&self) -> ToolLevel {
        ToolLevel::Guarded
    }

    async fn execute(&self, input: serde_json::Value) -> ToolResult {
        let section = match str_arg(&input, "section") {
            Ok(s) => s,
            Err(e) => return e,
        };
        let old = match str_arg(&input, "old") {
            Ok(o) => o,
            Err(e) => return e,
        };
        let new = input.get("new").and_then(|v| v.as_str()).unwrap_or("");
        match self.core.replace(section, old, new) {
            Ok(()) => ToolResult::success(format!("replaced in ## {section}")),
            Err(e) => ToolResult::error(e.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn append_and_replace_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let core = Arc::new(CoreMemory::new(dir.path().join("core-memory.md")));
        let append = CoreMemoryAppendTool { core: Arc::clone(&core) };
        let replace = CoreMemoryReplaceTool { core: Arc::clone(&core) };

        let r = append
            .execute(serde_json::json!({ "section": "People", "content": "- Sam: sister" }))
            .await;
        assert!(!r.is_error);

        let r = replace
            .execute(serde_json::json!({
                "section": "People", "old": "sister", "new": "sister, in Oslo"
            }))
            .await;
        assert!(!r.is_error);
        assert!(core.read().unwrap().contains("sister, in Oslo"));
    }

    #[tokio::test]
    async fn structured_errors_come_back_as_error_results() {
        let dir = tempfile::tempdir().unwrap();
        let core = Arc::new(CoreMemory::new(dir.path().join("core-memory.md")));
        let replace = CoreMemoryReplaceTool { core };
        let r = replace
            .execute(serde_json::json!({ "section": "Nope", "old": "x", "new": "y" }))
            .await;
        assert!(r.is_error);
        assert!(r.content.contains("section not found"));
    }
}
