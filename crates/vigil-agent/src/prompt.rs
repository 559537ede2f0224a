//! System prompt assembly. Rebuilt from live state before every turn, so
//! the agent always sees current core memory and the current commitment
//! horizon.

use chrono::{DateTime, Utc};

use vigil_core::config::AgentConfig;
use vigil_projections::Projection;

use crate::provider::ToolDefinition;

pub fn build_system_prompt(
    agent: &AgentConfig,
    core_memory: &str,
    upcoming: &[Projection],
    tools: &[ToolDefinition],
    now: DateTime<Utc>,
) -> String {
    let mut out = String::with_capacity(4096);

    out.push_str(&format!(
        "You are {}, a persistent personal assistant reachable over chat.\n",
        agent.name
    ));
    if !agent.system_prompt.trim().is_empty() {
        out.push('\n');
        out.push_str(agent.system_prompt.trim());
        out.push('\n');
    }

    out.push_str(&format!(
        "\nCurrent time: {} UTC (user timezone: {}).\n",
        now.format("%Y-%m-%d %H:%M"),
        agent.timezone
    ));

    if !core_memory.trim().is_empty() {
        out.push_str("\n# Core memory\n");
        out.push_str(core_memory.trim());
        out.push('\n');
    }

    if !upcoming.is_empty() {
        out.push_str("\n# Upcoming commitments\n");
        for p in upcoming {
            let when = p
                .resolved_when
                .clone()
                .unwrap_or_else(|| p.resolution.to_string());
            out.push_str(&format!("- [{}] {} ({})\n", p.id, p.summary, when));
        }
    }

    if !tools.is_empty() {
        out.push_str("\n# Tools\n");
        for t in tools {
            out.push_str(&format!("- {}: {}\n", t.name, t.description));
        }
    }

    out.push_str(
        "\nWhen a scheduled prompt arrives and nothing is worth surfacing, reply with exactly \
         NOOP and nothing else. Record future commitments with projection_add instead of \
         promising silently. Store durable facts with archival_insert.\n",
    );
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn prompt_contains_all_sections() {
        let agent = AgentConfig {
            name: "Vigil".into(),
            system_prompt: "Be concise.".into(),
            ..Default::default()
        };
        let store = vigil_projections::ProjectionStore::open_in_memory().unwrap();
        let p = store
            .add(vigil_projections::NewProjection {
                summary: "Call doctor".into(),
                resolved_when: Some("2030-01-15 10:00".into()),
                resolution: Some(vigil_projections::Resolution::Exact),
                ..Default::default()
            })
            .unwrap();
        let tools = vec![ToolDefinition {
            name: "projection_add".into(),
            description: "record a commitment".into(),
            input_schema: serde_json::json!({}),
        }];
        let now = Utc.with_ymd_and_hms(2026, 5, 1, 9, 30, 0).unwrap();

        let prompt = build_system_prompt(&agent, "## People\n- Sam", &[p], &tools, now);
        assert!(prompt.contains("You are Vigil"));
        assert!(prompt.contains("Be concise."));
        assert!(prompt.contains("2026-05-01 09:30"));
        assert!(prompt.contains("## People"));
        assert!(prompt.contains("Call doctor"));
        assert!(prompt.contains("projection_add"));
        assert!(prompt.contains("NOOP"));
    }
}
