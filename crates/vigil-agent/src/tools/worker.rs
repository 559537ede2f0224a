//! Worker lifecycle tools. Dispatch is elevated (a worker gets network and
//! scoped filesystem access); the rest are observability and control.

use std::sync::Arc;

use async_trait::async_trait;

use vigil_trust::{Capability, ToolLevel};
use vigil_workers::{WorkerRegistry, WorkerRunner};

use super::{opt_str_arg, str_arg, Tool, ToolResult};

pub struct WorkerDispatchTool {
    pub registry: Arc<WorkerRegistry>,
    pub runner: Arc<dyn WorkerRunner>,
    pub default_model: String,
}

#[async_trait]
impl Tool for WorkerDispatchTool {
    fn name(&self) -> &str {
        "worker_dispatch"
    }

    fn description(&self) -> &str {
        "Start an isolated background research worker. It gets file tools scoped to its own \
         directory plus web fetch, writes its findings to result.md, and its completion enters \
         archival memory as a fact (usable as a projection trigger: 'worker <id> complete')."
    }

    fn input_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "task": { "type": "string" },
                "model": { "type": "string", "description": "override the worker model" }
            },
            "required": ["task"]
        })
    }

    fn level(&self) -> ToolLevel {
        ToolLevel::Elevated
    }

    fn capabilities(&self) -> Vec<Capability> {
        vec![Capability::Network, Capability::Filesystem]
    }

    async fn execute(&self, input: serde_json::Value) -> ToolResult {
        let task = match str_arg(&input, "task") {
            Ok(t) => t,
            Err(e) => return e,
        };
        let model = opt_str_arg(&input, "model").unwrap_or_else(|| self.default_model.clone());
        match self.registry.dispatch(task, &model, Arc::clone(&self.runner)) {
            Ok(id) => ToolResult::json(&serde_json::json!({ "worker_id": id })),
            Err(e) => ToolResult::error(format!("dispatch failed: {e}")),
        }
    }
}

pub struct WorkerStatusTool {
    pub registry: Arc<WorkerRegistry>,
}

#[async_trait]
impl Tool for WorkerStatusTool {
    fn name(&self) -> &str {
        "worker_status"
    }

    fn description(&self) -> &str {
        "Check one worker (by id) or list all known workers."
    }

    fn input_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": { "worker_id": { "type": "string" } }
        })
    }

    async fn execute(&self, input: serde_json::Value) -> ToolResult {
        self.registry.purge_expired();
        match opt_str_arg(&input, "worker_id") {
            Some(id) => match self.registry.status(&id) {
                Ok(info) => ToolResult::json(&serde_json::to_value(&info).unwrap_or_default()),
                Err(e) => ToolResult::error(e.to_string()),
            },
            None => {
                let all = self.registry.list();
                if all.is_empty() {
                    return ToolResult::success("no workers");
                }
                ToolResult::json(&serde_json::to_value(&all).unwrap_or_default())
            }
        }
    }
}

pub struct WorkerSteerTool {
    pub registry: Arc<WorkerRegistry>,
}

#[async_trait]
impl Tool for WorkerSteerTool {
    fn name(&self) -> &str {
        "worker_steer"
    }

    fn description(&self) -> &str {
        "Leave a steering note for a running worker. Each note replaces the previous one."
    }

    fn input_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "worker_id": { "type": "string" },
                "note": { "type": "string" }
            },
            "required": ["worker_id", "note"]
        })
    }

    async fn execute(&self, input: serde_json::Value) -> ToolResult {
        let id = match str_arg(&input, "worker_id") {
            Ok(i) => i,
            Err(e) => return e,
        };
        let note = match str_arg(&input, "note") {
            Ok(n) => n,
            Err(e) => return e,
        };
        match self.registry.steer(id, note) {
            Ok(()) => ToolResult::success(format!("steering note left for {id}")),
            Err(e) => ToolResult::error(e.to_string()),
        }
    }
}

pub struct WorkerInterruptTool {
    pub registry: Arc<WorkerRegistry>,
}

#[async_trait]
impl Tool for WorkerInterruptTool {
    fn name(&self) -> &str {
        "worker_interrupt"
    }

    fn description(&self) -> &str {
        "Abort a running worker. Its status becomes cancelled; files persist."
    }

    fn input_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": { "worker_id": { "type": "string" } },
            "required": ["worker_id"]
        })
    }

    fn level(&self) -> ToolLevel {
        ToolLevel::Guarded
    }

    async fn execute(&self, input: serde_json::Value) -> ToolResult {
        let id = match str_arg(&input, "worker_id") {
            Ok(i) => i,
            Err(e) => return e,
        };
        match self.registry.interrupt(id) {
            Ok(()) => ToolResult::success(format!("worker {id} interrupted")),
            Err(e) => ToolResult::error(e.to_string()),
        }
    }
}
