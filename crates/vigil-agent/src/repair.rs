//! Transcript repair: before every prompt, enforce that each assistant
//! message with tool_use blocks is immediately followed by matching
//! tool_result blocks in call order. Persisted sessions that survived a
//! crash mid-tool-loop violate this in a handful of ways, all repaired
//! here. Non-zero repair counts indicate persistence bugs upstream and
//! are logged by the caller.

use std::collections::HashMap;

use serde::Serialize;

use crate::provider::{ChatMessage, ContentBlock, Role};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RepairReport {
    /// Calls with no result anywhere: a synthetic error result was added.
    pub missing_results: usize,
    /// Second and later results with an already-seen id: dropped.
    pub duplicates_dropped: usize,
    /// Results with no matching call anywhere: dropped.
    pub orphans_dropped: usize,
    /// Results that existed but had to be moved to follow their call.
    pub reordered: usize,
}

impl RepairReport {
    pub fn is_clean(&self) -> bool {
        *self == Self::default()
    }

    pub fn total(&self) -> usize {
        self.missing_results + self.duplicates_dropped + self.orphans_dropped + self.reordered
    }
}

struct FoundResult {
    content: String,
    is_error: bool,
    /// Where the result block sat in the input (message index, block index).
    location: (usize, usize),
}

/// Repair the transcript. When no repair is needed the original vector is
/// returned untouched; repairing an already-repaired transcript is the
/// identity.
pub fn repair_transcript(
    messages: Vec<ChatMessage>,
    agent_name: &str,
) -> (Vec<ChatMessage>, RepairReport) {
    let mut report = RepairReport::default();

    // Pass 1: index every call and the first result per id.
    let mut call_ids: Vec<String> = Vec::new();
    for msg in &messages {
        for id in msg.tool_use_ids() {
            call_ids.push(id.to_string());
        }
    }
    let known: std::collections::HashSet<&str> = call_ids.iter().map(|s| s.as_str()).collect();

    let mut results: HashMap<String, FoundResult> = HashMap::new();
    for (mi, msg) in messages.iter().enumerate() {
        for (bi, block) in msg.content.iter().enumerate() {
            if let ContentBlock::ToolResult {
                tool_use_id,
                content,
                is_error,
            } = block
            {
                if !known.contains(tool_use_id.as_str()) {
                    report.orphans_dropped += 1;
                } else if results.contains_key(tool_use_id) {
                    report.duplicates_dropped += 1;
                } else {
                    results.insert(
                        tool_use_id.clone(),
                        FoundResult {
                            content: content.clone(),
                            is_error: *is_error,
                            location: (mi, bi),
                        },
                    );
                }
            }
        }
    }

    // Pass 2: rebuild in canonical order.
    let mut out: Vec<ChatMessage> = Vec::with_capacity(messages.len());
    for (mi, msg) in messages.iter().enumerate() {
        match msg.role {
            Role::Assistant => {
                out.push(msg.clone());
                let ids = msg.tool_use_ids();
                if ids.is_empty() {
                    continue;
                }
                let mut blocks: Vec<ContentBlock> = Vec::with_capacity(ids.len());
                for (expected_bi, id) in ids.iter().enumerate() {
                    match results.get(*id) {
                        Some(found) => {
                            if found.location != (mi + 1, expected_bi) {
                                report.reordered += 1;
                            }
                            blocks.push(ContentBlock::ToolResult {
                                tool_use_id: (*id).to_string(),
                                content: found.content.clone(),
                                is_error: found.is_error,
                            });
                        }
                        None => {
                            report.missing_results += 1;
                            blocks.push(ContentBlock::ToolResult {
                                tool_use_id: (*id).to_string(),
                                content: format!(
                                    "[{agent_name}] tool result was lost before persistence; \
                                     treat this call as failed"
                                ),
                                is_error: true,
                            });
                        }
                    }
                }
                out.push(ChatMessage {
                    role: Role::User,
                    content: blocks,
                });
            }
            Role::User => {
                // Results are re-emitted canonically above; keep the rest.
                let rest: Vec<ContentBlock> = msg
                    .content
                    .iter()
                    .filter(|b| !matches!(b, ContentBlock::ToolResult { .. }))
                    .cloned()
                    .collect();
                if !rest.is_empty() {
                    out.push(ChatMessage {
                        role: Role::User,
                        content: rest,
                    });
                }
            }
        }
    }

    if out == messages {
        // Clean transcript: hand the original back, report all-zero.
        return (messages, RepairReport::default());
    }
    (out, report)
}
