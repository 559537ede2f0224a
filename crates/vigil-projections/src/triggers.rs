//! Trigger matcher: activates pending projections when an incoming fact
//! matches their `trigger_on_fact` phrase.
//!
//! Called on every archival insert and on every worker completion. A
//! worker completion writes `Worker <id> complete, results at <path>`, so a
//! projection with `trigger_on_fact: "worker <id> complete"` fires an agent
//! turn the moment the worker finishes.

use tracing::{debug, info};

use vigil_memory::archival::cosine;
use vigil_memory::Embedder;

use crate::error::Result;
use crate::store::ProjectionStore;
use crate::types::Projection;

/// Default cosine similarity threshold for embedding activation.
pub const DEFAULT_TRIGGER_THRESHOLD: f64 = 0.5;

/// Keyword match: every whitespace token of the trigger phrase must appear
/// as a substring of the fact, case-insensitively. No stemming — a
/// single-token trigger behaves as plain substring match.
pub fn keyword_matches(trigger: &str, fact_content: &str) -> bool {
    let haystack = fact_content.to_lowercase();
    let mut tokens = trigger.to_lowercase();
    tokens.retain(|c| !c.is_control());
    let mut any = false;
    for token in tokens.split_whitespace() {
        any = true;
        if !haystack.contains(token) {
            return false;
        }
    }
    any
}

/// Run the matcher over every pending trigger. Keyword match wins first;
/// otherwise, when an embedder is available and both texts embed, cosine
/// similarity at or above `threshold` activates.
///
/// Returns the projections activated by this fact so the caller (usually
/// the archival-insert tool) can report them immediately.
pub async fn check_triggers(
    store: &ProjectionStore,
    fact_content: &str,
    embedder: &dyn Embedder,
    threshold: f64,
) -> Result<Vec<Projection>> {
    let candidates = store.trigger_candidates()?;
    if candidates.is_empty() {
        return Ok(Vec::new());
    }

    // Embed the fact once, lazily: only if some candidate needs it.
    let mut fact_embedding: Option<Option<Vec<f32>>> = None;
    let mut activated = Vec::new();

    for candidate in candidates {
        let Some(trigger) = candidate.trigger_on_fact.clone() else {
            continue;
        };

        let mut fired = keyword_matches(&trigger, fact_content);
        if !fired {
            if fact_embedding.is_none() {
                fact_embedding = Some(embedder.embed(fact_content).await);
            }
            if let Some(Some(fact_emb)) = &fact_embedding {
                if let Some(trigger_emb) = embedder.embed(&trigger).await {
                    let score = cosine(fact_emb, &trigger_emb);
                    debug!(projection = %candidate.id, score, "trigger embedding similarity");
                    fired = score >= threshold;
                }
            }
        }

        if fired && store.activate_trigger(&candidate.id)? {
            info!(
                projection = %candidate.id,
                summary = %candidate.summary,
                "projection activated by fact trigger"
            );
            activated.push(store.get(&candidate.id)?);
        }
    }
    Ok(activated)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{NewProjection, ProjectionStatus, Resolution};
    /// Test embedder returning a fixed vector per known phrase.
    struct StaticEmbedder(Vec<(String, Vec<f32>)>);

    #[async_trait::async_trait]
    impl Embedder for StaticEmbedder {
        async fn embed(&self, text: &str) -> Option<Vec<f32>> {
            self.0
                .iter()
                .find(|(k, _)| k == text)
                .map(|(_, v)| v.clone())
        }
    }

    fn trigger_projection(store: &ProjectionStore, trigger: &str) -> Projection {
        store
            .add(NewProjection {
                summary: format!("on: {trigger}"),
                trigger_on_fact: Some(trigger.into()),
                ..Default::default()
            })
            .unwrap()
    }

    #[test]
    fn keyword_match_requires_every_token() {
        assert!(keyword_matches("dentist confirmed", "Dentist confirmed for Thursday 11am"));
        assert!(keyword_matches("worker w-42 complete", "Worker w-42 complete, results at /tmp"));
        assert!(!keyword_matches("dentist cancelled", "dentist confirmed"));
        assert!(!keyword_matches("", "anything"));
    }

    #[test]
    fn single_token_behaves_as_substring() {
        assert!(keyword_matches("dent", "the dentist called"));
    }

    #[tokio::test]
    async fn keyword_trigger_activates_and_is_idempotent() {
        let store = ProjectionStore::open_in_memory().unwrap();
        let p = trigger_projection(&store, "dentist confirmed");

        let fact = "Dentist confirmed for Thursday 11am";
        let first = check_triggers(&store, fact, &vigil_memory::NullEmbedder, 0.5)
            .await
            .unwrap();
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].id, p.id);
        assert_eq!(first[0].resolution, Resolution::Exact);
        assert!(first[0].trigger_on_fact.is_none());
        assert_eq!(first[0].status, ProjectionStatus::Pending);

        // Same fact again: no-op.
        let second = check_triggers(&store, fact, &vigil_memory::NullEmbedder, 0.5)
            .await
            .unwrap();
        assert!(second.is_empty());
    }

    #[tokio::test]
    async fn embedding_similarity_activates_above_threshold() {
        let store = ProjectionStore::open_in_memory().unwrap();
        let near = trigger_projection(&store, "tooth doctor appointment");
        let far = trigger_projection(&store, "tax return filed");

        let fact = "The dentist confirmed the visit";
        let embedder = StaticEmbedder(vec![
            (fact.to_string(), vec![1.0, 0.0]),
            ("tooth doctor appointment".to_string(), vec![0.95, 0.05]),
            ("tax return filed".to_string(), vec![0.0, 1.0]),
        ]);

        let activated = check_triggers(&store, fact, &embedder, 0.5).await.unwrap();
        assert_eq!(activated.len(), 1);
        assert_eq!(activated[0].id, near.id);
        assert!(store.get(&far.id).unwrap().trigger_on_fact.is_some());
    }

    #[tokio::test]
    async fn no_embedder_means_keyword_only() {
        let store = ProjectionStore::open_in_memory().unwrap();
        trigger_projection(&store, "completely unrelated phrase");
        let activated = check_triggers(&store, "some fact", &vigil_memory::NullEmbedder, 0.5)
            .await
            .unwrap();
        assert!(activated.is_empty());
    }
}
