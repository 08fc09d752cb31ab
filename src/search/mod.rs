// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Semantic tool search: local embeddings plus a restart-stable vector index.

pub mod embeddings;
pub mod index;

pub use embeddings::{EmbeddingProvider, EmbeddingVector, HashedEmbeddingProvider};
pub use index::{SearchResult, VectorIndex, VectorRecord};
