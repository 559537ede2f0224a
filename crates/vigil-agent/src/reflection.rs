//! Reflection pass: mine the recent conversation for commitments the
//! agent did not record in the moment.
//!
//! Runs out-of-band — it never enters the message queue and never takes
//! the orchestrator's session locks. A single no-tools LLM call extracts
//! candidates; each valid one is inserted into the projection store.
//! Failures are logged and swallowed: a malformed model response yields
//! zero insertions, never a crash.

use std::sync::Mutex;

use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use vigil_core::journal::Journal;
use vigil_core::timefmt::is_valid_when;
use vigil_projections::{NewProjection, ProjectionStore, Resolution};

use crate::provider::{ChatMessage, ChatRequest};
use crate::router::ProviderRouter;

/// Default look-back window, matching the scheduler's reflection cadence.
pub const DEFAULT_WINDOW_MINUTES: i64 = 30;
/// Trigger phrases longer than this are rejected as malformed.
const MAX_TRIGGER_LEN: usize = 100;

const EXTRACTION_PROMPT: &str = "\
You extract future commitments from a conversation transcript. Reply with a \
JSON array (possibly empty) of objects with fields: summary (string, required), \
when (string 'YYYY-MM-DD HH:MM' UTC or 'YYYY-MM-DD', optional), \
trigger_on_fact (short keyword phrase, optional), context (string, optional). \
Only include commitments that are clearly stated and not yet recorded. \
Reply with the JSON array and nothing else.";

pub struct ReflectionPass {
    router: std::sync::Arc<ProviderRouter>,
    projections: std::sync::Arc<ProjectionStore>,
    history: Journal,
    model: String,
    last_hash: Mutex<Option<String>>,
}

impl ReflectionPass {
    pub fn new(
        router: std::sync::Arc<ProviderRouter>,
        projections: std::sync::Arc<ProjectionStore>,
        history: Journal,
        model: String,
    ) -> Self {
        Self {
            router,
            projections,
            history,
            model,
            last_hash: Mutex::new(None),
        }
    }

    /// Run one pass. Returns how many projections were inserted.
    pub async fn run(&self, window_minutes: i64) -> usize {
        let entries = match self.history.read_since(window_minutes) {
            Ok(entries) => entries,
            Err(e) => {
                warn!(error = %e, "reflection: cannot read history");
                return 0;
            }
        };
        if entries.is_empty() {
            debug!("reflection: no conversation in window");
            return 0;
        }

        let transcript: String = entries
            .iter()
            .map(|e| format!("{}: {}\n", e.role, e.content))
            .collect();
        let hash = hex::encode(Sha256::digest(transcript.as_bytes()));
        {
            let mut last = self.last_hash.lock().unwrap();
            if last.as_deref() == Some(hash.as_str()) {
                debug!("reflection: window unchanged since last run");
                return 0;
            }
            *last = Some(hash);
        }

        let request = ChatRequest {
            model: self.model.clone(),
            system: EXTRACTION_PROMPT.to_string(),
            messages: vec![ChatMessage::user_text(transcript)],
            max_tokens: 1024,
            tools: Vec::new(),
        };
        let response = match self.router.send_model(&self.model, request).await {
            Ok(r) => r.response.content,
            Err(e) => {
                warn!(error = %e, "reflection: extraction call failed");
                return 0;
            }
        };

        let mut inserted = 0;
        for candidate in parse_candidates(&response) {
            match self.projections.add(candidate) {
                Ok(p) => {
                    info!(projection = %p.id, summary = %p.summary, "reflection: projection added");
                    inserted += 1;
                }
                Err(e) => warn!(error = %e, "reflection: insert failed"),
            }
        }
        inserted
    }
}

/// Parse and validate the model's JSON output. Anything malformed yields
/// an empty list; individually invalid candidates are skipped.
pub fn parse_candidates(response: &str) -> Vec<NewProjection> {
    let Some(json) = extract_json_array(response) else {
        warn!("reflection: response contained no JSON array");
        return Vec::new();
    };
    let Ok(items) = serde_json::from_str::<Vec<serde_json::Value>>(&json) else {
        warn!("reflection: JSON array did not parse");
        return Vec::new();
    };

    items
        .into_iter()
        .filter_map(|item| {
            let summary = item.get("summary")?.as_str()?.trim().to_string();
            if summary.is_empty() {
                return None;
            }
            let when = item
                .get("when")
                .and_then(|v| v.as_str())
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from);
            if let Some(w) = &when {
                if !is_valid_when(w) {
                    debug!(when = %w, "reflection: candidate dropped, unparseable time");
                    return None;
                }
            }
            let trigger = item
                .get("trigger_on_fact")
                .and_then(|v| v.as_str())
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from);
            if let Some(t) = &trigger {
                if t.len() > MAX_TRIGGER_LEN {
                    debug!("reflection: candidate dropped, trigger too long");
                    return None;
                }
            }
            let resolution = if when.is_none() && trigger.is_none() {
                Some(Resolution::Someday)
            } else {
                None
            };
            Some(NewProjection {
                summary,
                resolved_when: when,
                trigger_on_fact: trigger,
                resolution,
                context: item
                    .get("context")
                    .and_then(|v| v.as_str())
                    .map(String::from),
                ..Default::default()
            })
        })
        .collect()
}

/// Models love to wrap JSON in prose or fences; take the outermost array.
fn extract_json_array(text: &str) -> Option<String> {
    let start = text.find('[')?;
    let end = text.rfind(']')?;
    if end <= start {
        return None;
    }
    Some(text[start..=end].to_string())
}
