// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Embedding providers for semantic tool search.
//!
//! The provider seam is a trait so the model can be swapped without touching
//! the index; the shipped implementation is a deterministic local
//! feature-hashing model with no network dependency, loaded once at startup.

use async_trait::async_trait;
use sha2::{Digest, Sha256};

use crate::error::IndexError;

/// A fixed-dimension embedding vector.
pub type EmbeddingVector = Vec<f32>;

/// Trait for embedding providers.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Provider name.
    fn name(&self) -> &str;

    /// Model identifier.
    fn model(&self) -> &str;

    /// Embedding dimensions. Fixed for the lifetime of an index.
    fn dimensions(&self) -> usize;

    /// Generate embeddings for multiple texts.
    async fn embed(&self, texts: &[String]) -> Result<Vec<EmbeddingVector>, IndexError>;

    /// Generate an embedding for a single text.
    async fn embed_one(&self, text: &str) -> Result<EmbeddingVector, IndexError> {
        let results = self.embed(&[text.to_string()]).await?;
        results
            .into_iter()
            .next()
            .ok_or_else(|| IndexError::EmbeddingFailed("no embedding returned".to_string()))
    }
}

/// Deterministic local embedding via token feature hashing.
///
/// Lower-cased word unigrams and bigrams are hashed into a fixed bucket
/// space and the resulting count vector is L2-normalized. All components
/// are non-negative, so cosine similarity lands in `[0, 1]` naturally.
pub struct HashedEmbeddingProvider {
    dimensions: usize,
}

impl HashedEmbeddingProvider {
    /// Default embedding dimensions.
    pub const DEFAULT_DIMENSIONS: usize = 256;

    /// Create a provider with the default dimensions.
    pub fn new() -> Self {
        Self {
            dimensions: Self::DEFAULT_DIMENSIONS,
        }
    }

    /// Create a provider with custom dimensions (useful in tests).
    pub fn with_dimensions(dimensions: usize) -> Self {
        Self { dimensions }
    }

    fn tokenize(text: &str) -> Vec<String> {
        text.to_lowercase()
            .split(|c: char| !c.is_ascii_alphanumeric())
            .filter(|t| !t.is_empty())
            .map(String::from)
            .collect()
    }

    fn bucket(&self, feature: &str) -> usize {
        let mut hasher = Sha256::new();
        hasher.update(feature.as_bytes());
        let digest = hasher.finalize();
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(&digest[..8]);
        (u64::from_le_bytes(bytes) % self.dimensions as u64) as usize
    }

    fn embed_text(&self, text: &str) -> EmbeddingVector {
        let tokens = Self::tokenize(text);
        let mut vector = vec![0.0f32; self.dimensions];

        for token in &tokens {
            vector[self.bucket(token)] += 1.0;
        }
        for pair in tokens.windows(2) {
            vector[self.bucket(&format!("{} {}", pair[0], pair[1]))] += 1.0;
        }

        let norm: f32 = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for x in &mut vector {
                *x /= norm;
            }
        }

        vector
    }
}

impl Default for HashedEmbeddingProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EmbeddingProvider for HashedEmbeddingProvider {
    fn name(&self) -> &str {
        "hashed"
    }

    fn model(&self) -> &str {
        "feature-hash-v1"
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<EmbeddingVector>, IndexError> {
        Ok(texts.iter().map(|t| self.embed_text(t)).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_deterministic() {
        let provider = HashedEmbeddingProvider::new();
        let a = provider.embed_one("weather predictions").await.unwrap();
        let b = provider.embed_one("weather predictions").await.unwrap();
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn test_dimensions_fixed() {
        let provider = HashedEmbeddingProvider::with_dimensions(64);
        let v = provider.embed_one("anything at all").await.unwrap();
        assert_eq!(v.len(), 64);
        assert_eq!(provider.dimensions(), 64);
    }

    #[tokio::test]
    async fn test_normalized() {
        let provider = HashedEmbeddingProvider::new();
        let v = provider.embed_one("current time in utc").await.unwrap();
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[tokio::test]
    async fn test_empty_text_is_zero_vector() {
        let provider = HashedEmbeddingProvider::new();
        let v = provider.embed_one("").await.unwrap();
        assert!(v.iter().all(|x| *x == 0.0));
    }

    #[tokio::test]
    async fn test_shared_vocabulary_scores_higher() {
        let provider = HashedEmbeddingProvider::new();
        let query = provider.embed_one("weather forecast for tomorrow").await.unwrap();
        let weather = provider
            .embed_one("get weather forecast predictions")
            .await
            .unwrap();
        let time = provider.embed_one("current wall clock time").await.unwrap();

        let dot = |a: &[f32], b: &[f32]| -> f32 { a.iter().zip(b).map(|(x, y)| x * y).sum() };
        assert!(dot(&query, &weather) > dot(&query, &time));
    }

    #[tokio::test]
    async fn test_batch_embed() {
        let provider = HashedEmbeddingProvider::new();
        let texts = vec!["one".to_string(), "two".to_string()];
        let vectors = provider.embed(&texts).await.unwrap();
        assert_eq!(vectors.len(), 2);
        assert_ne!(vectors[0], vectors[1]);
    }
}
