//! Embedding model seam. The model itself is an external collaborator;
//! everything here is the interface plus the degraded no-op implementation.
//!
//! The real model is a process-wide singleton, lazily initialised so that
//! concurrent first calls await the same initialisation, and dropped on
//! shutdown to release native resources.

use async_trait::async_trait;
use tracing::warn;

/// Produces fixed-dimension embeddings. Returning `None` signals the
/// embedder is unavailable; callers degrade to keyword-only search.
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> Option<Vec<f32>>;
}

/// Embedder used when no model is configured or the feature is off.
/// Always unavailable; archival memory runs in keyword-only mode.
pub struct NullEmbedder;

#[async_trait]
impl Embedder for NullEmbedder {
    async fn embed(&self, _text: &str) -> Option<Vec<f32>> {
        None
    }
}

/// L2-normalise in place so cosine reduces to a dot product downstream.
pub fn l2_normalise(v: &mut [f32]) {
    let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for x in v.iter_mut() {
            *x /= norm;
        }
    }
}

#[cfg(feature = "fastembed")]
pub use fastembed_impl::FastEmbedder;

#[cfg(feature = "fastembed")]
mod fastembed_impl {
    use super::*;
    use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};
    use std::sync::Arc;
    use tokio::sync::OnceCell;

    /// Local ONNX embedder. Model load is expensive (native init, possible
    /// download), so it happens once behind a `OnceCell`; embedding calls
    /// run on the blocking pool.
    pub struct FastEmbedder {
        model: Arc<OnceCell<Option<Arc<std::sync::Mutex<TextEmbedding>>>>>,
    }

    impl FastEmbedder {
        pub fn new() -> Self {
            Self {
                model: Arc::new(OnceCell::new()),
            }
        }

        async fn model(&self) -> Option<Arc<std::sync::Mutex<TextEmbedding>>> {
            self.model
                .get_or_init(|| async {
                    let loaded = tokio::task::spawn_blocking(|| {
                        TextEmbedding::try_new(
                            InitOptions::new(EmbeddingModel::AllMiniLML6V2)
                                .with_show_download_progress(false),
                        )
                    })
                    .await;
                    match loaded {
                        Ok(Ok(m)) => Some(Arc::new(std::sync::Mutex::new(m))),
                        Ok(Err(e)) => {
                            warn!(error = %e, "embedder init failed; continuing keyword-only");
                            None
                        }
                        Err(e) => {
                            warn!(error = %e, "embedder init task panicked; continuing keyword-only");
                            None
                        }
                    }
                })
                .await
                .clone()
        }
    }

    impl Default for FastEmbedder {
        fn default() -> Self {
            Self::new()
        }
    }

    #[async_trait]
    impl Embedder for FastEmbedder {
        async fn embed(&self, text: &str) -> Option<Vec<f32>> {
            let model = self.model().await?;
            let text = text.to_string();
            let result = tokio::task::spawn_blocking(move || {
                let mut guard = model.lock().unwrap();
                guard.embed(vec![text], None)
            })
            .await;
            match result {
                Ok(Ok(mut vecs)) if !vecs.is_empty() => {
                    let mut v = vecs.remove(0);
                    l2_normalise(&mut v);
                    Some(v)
                }
                Ok(Err(e)) => {
                    warn!(error = %e, "embedding call failed");
                    None
                }
                _ => None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn null_embedder_is_unavailable() {
        assert!(NullEmbedder.embed("anything").await.is_none());
    }

    #[test]
    fn l2_normalise_produces_unit_vector() {
        let mut v = vec![3.0f32, 4.0];
        l2_normalise(&mut v);
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-6);
    }

    #[test]
    fn l2_normalise_handles_zero_vector() {
        let mut v = vec![0.0f32, 0.0];
        l2_normalise(&mut v);
        assert_eq!(v, vec![0.0, 0.0]);
    }
}
