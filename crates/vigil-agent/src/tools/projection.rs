//! Projection tools: the agent's interface to forward-looking memory.

use std::sync::Arc;

use async_trait::async_trait;

use vigil_projections::{
    DependencyCondition, NewProjection, ProjectionStatus, ProjectionStore, Resolution,
};

use super::{opt_str_arg, str_arg, Tool, ToolResult};

pub struct ProjectionAddTool {
    pub projections: Arc<ProjectionStore>,
}

#[async_trait]
impl Tool for ProjectionAddTool {
    fn name(&self) -> &str {
        "projection_add"
    }

    fn description(&self) -> &str {
        "Record a future commitment. Give exactly one of: `when` (UTC 'YYYY-MM-DD HH:MM' or \
         'YYYY-MM-DD'), `trigger_on_fact` (keyword phrase matched against new facts), or \
         resolution 'someday'. Optional cron `recurrence` for repeating commitments."
    }

    fn input_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "summary": { "type": "string" },
                "when": { "type": "string" },
                "raw_when": { "type": "string", "description": "the user's original time phrase" },
                "resolution": { "type": "string", "enum": ["exact", "day", "week", "month", "someday"] },
                "recurrence": { "type": "string", "description": "cron expression" },
                "trigger_on_fact": { "type": "string" },
                "context": { "type": "string" },
                "depends_on": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "properties": {
                            "id": { "type": "string" },
                            "condition": { "type": "string", "enum": ["done", "cancelled", "passed", "any-terminal"] }
                        },
                        "required": ["id"]
                    }
                }
            },
            "required": ["summary"]
        })
    }

    async fn execute(&self, input: serde_json::Value) -> ToolResult {
        let summary = match str_arg(&input, "summary") {
            Ok(s) => s.to_string(),
            Err(e) => return e,
        };
        let resolution = match opt_str_arg(&input, "resolution") {
            Some(raw) => match raw.parse::<Resolution>() {
                Ok(r) => Some(r),
                Err(e) => return ToolResult::error(e),
            },
            None => None,
        };
        let depends_on = match parse_depends_on(&input) {
            Ok(d) => d,
            Err(e) => return e,
        };

        let new = NewProjection {
            summary,
            raw_when: opt_str_arg(&input, "raw_when"),
            resolved_when: opt_str_arg(&input, "when"),
            resolution,
            recurrence: opt_str_arg(&input, "recurrence"),
            trigger_on_fact: opt_str_arg(&input, "trigger_on_fact"),
            context: opt_str_arg(&input, "context"),
            linked_ids: Vec::new(),
            depends_on,
        };
        match self.projections.add(new) {
            Ok(p) => ToolResult::json(&serde_json::json!({
                "id": p.id,
                "resolution": p.resolution,
                "resolved_when": p.resolved_when,
            })),
            Err(e) => ToolResult::error(format!("projection add failed: {e}")),
        }
    }
}

fn parse_depends_on(
    input: &serde_json::Value,
) -> Result<Vec<(String, DependencyCondition)>, ToolResult> {
    let Some(list) = input.get("depends_on").and_then(|v| v.as_array()) else {
        return Ok(Vec::new());
    };
    let mut out = Vec::new();
    for item in list {
        let id = item
            .get("id")
            .and_then(|v| v.as_str())
            .ok_or_else(|| ToolResult::error("depends_on entries need an id"))?;
        let condition = item
            .get("condition")
            .and_then(|v| v.as_str())
            .unwrap_or("any-terminal")
            .parse::<DependencyCondition>()
            .map_err(ToolResult::error)?;
        out.push((id.to_string(), condition));
    }
    Ok(out)
}

pub struct ProjectionListTool {
    pub projections: Arc<ProjectionStore>,
}

#[async_trait]
impl Tool for ProjectionListTool {
    fn name(&self) -> &str {
        "projection_list"
    }

    fn description(&self) -> &str {
        "List pending commitments within a horizon (default 7 days), plus someday and \
         trigger-waiting ones."
    }

    fn input_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "horizon_days": { "type": "integer", "default": 7 }
            }
        })
    }

    async fn execute(&self, input: serde_json::Value) -> ToolResult {
        let horizon = input
            .get("horizon_days")
            .and_then(|v| v.as_i64())
            .unwrap_or(7);
        match self.projections.get_upcoming(horizon) {
            Ok(list) if list.is_empty() => ToolResult::success("no upcoming commitments"),
            Ok(list) => {
                let rendered: Vec<serde_json::Value> = list
                    .iter()
                    .map(|p| {
                        serde_json::json!({
                            "id": p.id,
                            "summary": p.summary,
                            "resolved_when": p.resolved_when,
                            "resolution": p.resolution,
                            "recurrence": p.recurrence,
                            "trigger_on_fact": p.trigger_on_fact,
                            "status": p.status,
                        })
                    })
                    .collect();
                ToolResult::json(&serde_json::Value::Array(rendered))
            }
            Err(e) => ToolResult::error(format!("projection list failed: {e}")),
        }
    }
}

pub struct ProjectionResolveTool {
    pub projections: Arc<ProjectionStore>,
}

#[async_trait]
impl Tool for ProjectionResolveTool {
    fn name(&self) -> &str {
        "projection_resolve"
    }

    fn description(&self) -> &str {
        "Settle a commitment: done, cancelled, or passed. Refuses to change an already-settled one."
    }

    fn input_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "id": { "type": "string" },
                "outcome": { "type": "string", "enum": ["done", "cancelled", "passed"] }
            },
            "required": ["id", "outcome"]
        })
    }

    async fn execute(&self, input: serde_json::Value) -> ToolResult {
        let id = match str_arg(&input, "id") {
            Ok(i) => i,
            Err(e) => return e,
        };
        let outcome = match str_arg(&input, "outcome") {
            Ok(o) => match o.parse::<ProjectionStatus>() {
                Ok(s) if s.is_terminal() => s,
                Ok(_) => return ToolResult::error("outcome must be terminal: done, cancelled, or passed"),
                Err(e) => return ToolResult::error(e),
            },
            Err(e) => return e,
        };
        match self.projections.resolve(id, outcome) {
            Ok(true) => ToolResult::success(format!("projection {id} -> {outcome}")),
            Ok(false) => ToolResult::error(format!("projection {id} is already settled (or unknown)")),
            Err(e) => ToolResult::error(format!("resolve failed: {e}")),
        }
    }
}

pub struct ProjectionLinkTool {
    pub projections: Arc<ProjectionStore>,
}

#[async_trait]
impl Tool for ProjectionLinkTool {
    fn name(&self) -> &str {
        "projection_link"
    }

    fn description(&self) -> &str {
        "Make one commitment wait on another: the observer activates when the subject reaches \
         the condition. Cycles and chains deeper than 5 are rejected."
    }

    fn input_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "observer_id": { "type": "string" },
                "subject_id": { "type": "string" },
                "condition": { "type": "string", "enum": ["done", "cancelled", "passed", "any-terminal"] }
            },
            "required": ["observer_id", "subject_id"]
        })
    }

    async fn execute(&self, input: serde_json::Value) -> ToolResult {
        let observer = match str_arg(&input, "observer_id") {
            Ok(o) => o,
            Err(e) => return e,
        };
        let subject = match str_arg(&input, "subject_id") {
            Ok(s) => s,
            Err(e) => return e,
        };
        let condition = input
            .get("condition")
            .and_then(|v| v.as_str())
            .unwrap_or("any-terminal")
            .parse::<DependencyCondition>();
        let condition = match condition {
            Ok(c) => c,
            Err(e) => return ToolResult::error(e),
        };
        match self.projections.link_dependency(observer, subject, condition) {
            Ok(()) => ToolResult::success(format!("{observer} now waits on {subject} ({condition})")),
            Err(e) => ToolResult::error(e.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> Arc<ProjectionStore> {
        Arc::new(ProjectionStore::open_in_memory().unwrap())
    }

    #[tokio::test]
    async fn add_list_resolve_flow() {
        let projections = store();
        let add = ProjectionAddTool { projections: Arc::clone(&projections) };
        let list = ProjectionListTool { projections: Arc::clone(&projections) };
        let resolve = ProjectionResolveTool { projections: Arc::clone(&projections) };

        let r = add
            .execute(serde_json::json!({
                "summary": "Call doctor",
                "when": "2030-01-15 10:00",
            }))
            .await;
        assert!(!r.is_error, "{}", r.content);
        let id = serde_json::from_str::<serde_json::Value>(&r.content).unwrap()["id"]
            .as_str()
            .unwrap()
            .to_string();

        let r = list.execute(serde_json::json!({ "horizon_days": 36500 })).await;
        assert!(r.content.contains("Call doctor"));

        let r = resolve
            .execute(serde_json::json!({ "id": id, "outcome": "done" }))
            .await;
        assert!(!r.is_error);

        // Second resolve reports the terminal state instead of clobbering.
        let r = resolve
            .execute(serde_json::json!({ "id": id, "outcome": "cancelled" }))
            .await;
        assert!(r.is_error);
    }

    #[tokio::test]
    async fn bad_datetime_is_an_error_result() {
        let add = ProjectionAddTool { projections: store() };
        let r = add
            .execute(serde_json::json!({ "summary": "x", "when": "next tuesday-ish" }))
            .await;
        assert!(r.is_error);
    }

    #[tokio::test]
    async fn link_rejects_cycles_via_tool() {
        let projections = store();
        let add = ProjectionAddTool { projections: Arc::clone(&projections) };
        let link = ProjectionLinkTool { projections: Arc::clone(&projections) };

        let a = add.execute(serde_json::json!({ "summary": "a", "resolution": "someday" })).await;
        let b = add.execute(serde_json::json!({ "summary": "b", "resolution": "someday" })).await;
        let id = |r: &ToolResult| {
            serde_json::from_str::<serde_json::Value>(&r.content).unwrap()["id"]
                .as_str()
                .unwrap()
                .to_string()
        };
        let (a, b) = (id(&a), id(&b));

        let r = link
            .execute(serde_json::json!({ "observer_id": a, "subject_id": b }))
            .await;
        assert!(!r.is_error);
        let r = link
            .execute(serde_json::json!({ "observer_id": b, "subject_id": a }))
            .await;
        assert!(r.is_error);
        assert!(r.content.contains("cycle"));
    }
}
