//! Embedding provider trait and vector utilities.
//!
//! Defines the [`Embedder`] trait that all embedding backends implement,
//! plus [`probe_dimension`] for sizing a vector index without hardcoding the
//! model's output width.
//!
//! Concrete providers (fastembed, OpenAI-compatible HTTP) live in the
//! `support-copilot` app crate.

use anyhow::{bail, Result};
use async_trait::async_trait;

/// Text embedded to discover a model's output dimension.
pub const DIMENSION_PROBE: &str = "dimension-probe";

/// Trait for embedding providers.
///
/// Implementations own whatever model or client they need and are shared
/// across requests behind an `Arc`.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Returns the model identifier (e.g. `"all-minilm-l6-v2"`).
    fn model_name(&self) -> &str;

    /// Embed a batch of texts. The output has one vector per input, in
    /// input order. An empty batch yields an empty result.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    /// Embed a single text.
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut vectors = self.embed_batch(&[text.to_string()]).await?;
        if vectors.len() != 1 {
            bail!(
                "Embedding provider returned {} vectors for a single input",
                vectors.len()
            );
        }
        Ok(vectors.remove(0))
    }
}

/// Infer the embedding dimension by embedding [`DIMENSION_PROBE`].
pub async fn probe_dimension(embedder: &dyn Embedder) -> Result<usize> {
    let vector = embedder.embed(DIMENSION_PROBE).await?;
    if vector.is_empty() {
        bail!(
            "Embedding model '{}' returned an empty vector",
            embedder.model_name()
        );
    }
    Ok(vector.len())
}

/// Compute cosine similarity between two embedding vectors.
///
/// Returns a value in `[-1.0, 1.0]`, or `0.0` for empty vectors, vectors of
/// different lengths, or zero-magnitude vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        return 0.0;
    }

    dot / denom
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedWidth(usize);

    #[async_trait]
    impl Embedder for FixedWidth {
        fn model_name(&self) -> &str {
            "fixed"
        }

        async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            Ok(texts.iter().map(|_| vec![0.5; self.0]).collect())
        }
    }

    struct Broken;

    #[async_trait]
    impl Embedder for Broken {
        fn model_name(&self) -> &str {
            "broken"
        }

        async fn embed_batch(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>> {
            Ok(Vec::new())
        }
    }

    #[tokio::test]
    async fn test_probe_dimension() {
        assert_eq!(probe_dimension(&FixedWidth(384)).await.unwrap(), 384);
    }

    #[tokio::test]
    async fn test_probe_dimension_rejects_empty_vector() {
        assert!(probe_dimension(&FixedWidth(0)).await.is_err());
    }

    #[tokio::test]
    async fn test_embed_requires_one_vector() {
        assert!(Broken.embed("hello").await.is_err());
    }

    #[test]
    fn test_cosine_identical() {
        let v = vec![1.0, 2.0, 3.0];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_orthogonal() {
        let sim = cosine_similarity(&[1.0, 0.0, 0.0], &[0.0, 1.0, 0.0]);
        assert!(sim.abs() < 1e-6);
    }

    #[test]
    fn test_cosine_mismatched_or_empty() {
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
        assert_eq!(cosine_similarity(&[1.0, 2.0], &[1.0]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 1.0]), 0.0);
    }
}
