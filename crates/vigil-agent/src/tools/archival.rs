//! Archival memory tools. Every insert runs the trigger matcher and
//! reports any projections it activated, so the agent learns about the
//! activation in the same tool result that confirmed the insert.

use std::sync::Arc;

use async_trait::async_trait;

use vigil_memory::types::FactSource;
use vigil_memory::{ArchivalStore, Embedder};
use vigil_projections::triggers::{check_triggers, DEFAULT_TRIGGER_THRESHOLD};
use vigil_projections::ProjectionStore;

use super::{str_arg, Tool, ToolResult};

pub struct ArchivalInsertTool {
    pub archival: Arc<ArchivalStore>,
    pub projections: Arc<ProjectionStore>,
    pub embedder: Arc<dyn Embedder>,
}

#[async_trait]
impl Tool for ArchivalInsertTool {
    fn name(&self) -> &str {
        "archival_insert"
    }

    fn description(&self) -> &str {
        "Store a fact in long-term archival memory. Duplicate content is deduplicated. \
         Returns any projections the new fact triggered."
    }

    fn input_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "content": { "type": "string", "description": "The fact to remember" }
            },
            "required": ["content"]
        })
    }

    async fn execute(&self, input: serde_json::Value) -> ToolResult {
        let content = match str_arg(&input, "content") {
            Ok(c) => c,
            Err(e) => return e,
        };

        let embedding = self.embedder.embed(content).await;
        let id = match self
            .archival
            .add(content, FactSource::Archival, embedding.as_deref())
        {
            Ok(id) => id,
            Err(e) => return ToolResult::error(format!("archival insert failed: {e}")),
        };

        let triggered = match check_triggers(
            &self.projections,
            content,
            self.embedder.as_ref(),
            DEFAULT_TRIGGER_THRESHOLD,
        )
        .await
        {
            Ok(activated) => activated,
            Err(e) => return ToolResult::error(format!("fact stored as {id}, but trigger check failed: {e}")),
        };

        ToolResult::json(&serde_json::json!({
            "fact_id": id,
            "triggered": triggered.iter().map(|p| p.summary.clone()).collect::<Vec<_>>(),
        }))
    }
}

pub struct ArchivalSearchTool {
    pub archival: Arc<ArchivalStore>,
    pub embedder: Arc<dyn Embedder>,
}

#[async_trait]
impl Tool for ArchivalSearchTool {
    fn name(&self) -> &str {
        "archival_search"
    }

    fn description(&self) -> &str {
        "Hybrid search (keyword + semantic) over archival memory."
    }

    fn input_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "query": { "type": "string" },
                "limit": { "type": "integer", "default": 10 }
            },
            "required": ["query"]
        })
    }

    async fn execute(&self, input: serde_json::Value) -> ToolResult {
        let query = match str_arg(&input, "query") {
            Ok(q) => q,
            Err(e) => return e,
        };
        let limit = input.get("limit").and_then(|v| v.as_u64()).unwrap_or(10) as usize;

        let query_embedding = self.embedder.embed(query).await;
        match self
            .archival
            .hybrid_search(query, query_embedding.as_deref(), limit)
        {
            Ok(results) if results.is_empty() => ToolResult::success("no matching facts"),
            Ok(results) => {
                let rendered: Vec<serde_json::Value> = results
                    .iter()
                    .map(|r| {
                        serde_json::json!({
                            "id": r.id,
                            "content": r.content,
                            "source": r.source,
                            "score": (r.combined_score * 1000.0).round() / 1000.0,
                            "matched_by": {
                                "keyword": r.matched_by.keyword,
                                "vector": r.matched_by.vector,
                            },
                        })
                    })
                    .collect();
                ToolResult::json(&serde_json::Value::Array(rendered))
            }
            Err(e) => ToolResult::error(format!("search failed: {e}")),
        }
    }
}
