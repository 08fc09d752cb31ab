// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Restart-stable vector index over tool descriptions.
//!
//! Records live in a SQLite file at `.vector-index/index.db`, embeddings
//! stored as little-endian f32 BLOBs. `rebuild` writes a staging file and
//! swaps it in with a rename, so a crash mid-rebuild leaves the previous
//! index intact; the next startup re-runs rebuild from scratch anyway.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use rusqlite::{params, Connection};

use crate::error::IndexError;

use super::embeddings::EmbeddingProvider;

/// Index directory, relative to the working directory.
pub const INDEX_DIR: &str = ".vector-index";

/// Index file name.
pub const INDEX_FILE: &str = "index.db";

/// One record to index: id is `serverName/toolName`.
#[derive(Debug, Clone)]
pub struct VectorRecord {
    pub id: String,
    pub server_name: String,
    pub tool_name: String,
    pub description: String,
}

impl VectorRecord {
    /// Build a record from its payload parts.
    pub fn new(
        server_name: impl Into<String>,
        tool_name: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        let server_name = server_name.into();
        let tool_name = tool_name.into();
        Self {
            id: format!("{}/{}", server_name, tool_name),
            server_name,
            tool_name,
            description: description.into(),
        }
    }
}

/// One search hit, score clamped to `[0, 1]`.
#[derive(Debug, Clone)]
pub struct SearchResult {
    pub server_name: String,
    pub tool_name: String,
    pub description: String,
    pub score: f32,
}

/// Nearest-neighbor index over tool descriptions.
pub struct VectorIndex {
    provider: Arc<dyn EmbeddingProvider>,
    index_dir: PathBuf,
    db_path: PathBuf,
    conn: Mutex<Option<Connection>>,
}

impl VectorIndex {
    /// Open the index under the given working directory. If a previous
    /// index file exists it is usable immediately; otherwise `rebuild`
    /// must run before `search`.
    pub fn open(
        working_dir: impl AsRef<Path>,
        provider: Arc<dyn EmbeddingProvider>,
    ) -> Result<Self, IndexError> {
        let index_dir = working_dir.as_ref().join(INDEX_DIR);
        std::fs::create_dir_all(&index_dir).map_err(|e| {
            IndexError::OpenFailed(format!("failed to create {}: {}", index_dir.display(), e))
        })?;

        let db_path = index_dir.join(INDEX_FILE);
        let conn = if db_path.exists() {
            Some(Connection::open(&db_path).map_err(|e| IndexError::OpenFailed(e.to_string()))?)
        } else {
            None
        };

        Ok(Self {
            provider,
            index_dir,
            db_path,
            conn: Mutex::new(conn),
        })
    }

    /// Path of the live index file.
    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    /// Replace the index atomically from the given records.
    pub async fn rebuild(&self, records: &[VectorRecord]) -> Result<(), IndexError> {
        let texts: Vec<String> = records.iter().map(|r| r.description.clone()).collect();
        let embeddings = self.provider.embed(&texts).await?;

        if embeddings.len() != records.len() {
            return Err(IndexError::RebuildFailed(format!(
                "expected {} embeddings, got {}",
                records.len(),
                embeddings.len()
            )));
        }

        let staging_path = self.index_dir.join(format!("{}.staging", INDEX_FILE));
        if staging_path.exists() {
            std::fs::remove_file(&staging_path)
                .map_err(|e| IndexError::RebuildFailed(e.to_string()))?;
        }

        {
            let mut staging = Connection::open(&staging_path)
                .map_err(|e| IndexError::RebuildFailed(e.to_string()))?;

            staging
                .execute_batch(
                    "CREATE TABLE vectors (
                        id TEXT PRIMARY KEY,
                        serverName TEXT NOT NULL,
                        toolName TEXT NOT NULL,
                        description TEXT NOT NULL,
                        embedding BLOB NOT NULL
                    );
                    CREATE TABLE metadata (key TEXT PRIMARY KEY, value TEXT NOT NULL);",
                )
                .map_err(|e| IndexError::RebuildFailed(e.to_string()))?;

            let tx = staging
                .transaction()
                .map_err(|e| IndexError::RebuildFailed(e.to_string()))?;
            {
                let mut stmt = tx
                    .prepare(
                        "INSERT INTO vectors (id, serverName, toolName, description, embedding)
                         VALUES (?1, ?2, ?3, ?4, ?5)",
                    )
                    .map_err(|e| IndexError::RebuildFailed(e.to_string()))?;

                for (record, embedding) in records.iter().zip(embeddings.iter()) {
                    stmt.execute(params![
                        record.id,
                        record.server_name,
                        record.tool_name,
                        record.description,
                        serialize_embedding(embedding),
                    ])
                    .map_err(|e| IndexError::RebuildFailed(e.to_string()))?;
                }

                tx.execute(
                    "INSERT INTO metadata (key, value) VALUES ('model', ?1), ('dimensions', ?2)",
                    params![
                        self.provider.model(),
                        self.provider.dimensions().to_string()
                    ],
                )
                .map_err(|e| IndexError::RebuildFailed(e.to_string()))?;
            }
            tx.commit()
                .map_err(|e| IndexError::RebuildFailed(e.to_string()))?;
        }

        // Swap staging in under the lock so no search sees a half-replaced file.
        let mut conn = self.conn.lock().expect("vector index mutex poisoned");
        *conn = None;
        std::fs::rename(&staging_path, &self.db_path)
            .map_err(|e| IndexError::RebuildFailed(e.to_string()))?;
        *conn = Some(
            Connection::open(&self.db_path).map_err(|e| IndexError::OpenFailed(e.to_string()))?,
        );

        tracing::info!(records = records.len(), "vector index rebuilt");
        Ok(())
    }

    /// Top-k search by cosine similarity, descending, ties broken by
    /// lexicographic record id. `k = 0` yields an empty result.
    pub async fn search(&self, query: &str, k: usize) -> Result<Vec<SearchResult>, IndexError> {
        if k == 0 {
            return Ok(Vec::new());
        }

        let query_embedding = self.provider.embed_one(query).await?;

        let conn = self.conn.lock().expect("vector index mutex poisoned");
        let conn = conn
            .as_ref()
            .ok_or_else(|| IndexError::SearchFailed("index has not been built".to_string()))?;

        let mut stmt =
            conn.prepare("SELECT id, serverName, toolName, description, embedding FROM vectors")?;

        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, Vec<u8>>(4)?,
            ))
        })?;

        let mut scored: Vec<(String, SearchResult)> = Vec::new();
        for row in rows {
            let (id, server_name, tool_name, description, blob) = row?;
            let embedding = deserialize_embedding(&blob);
            let score = cosine_similarity(&query_embedding, &embedding).clamp(0.0, 1.0);
            scored.push((
                id,
                SearchResult {
                    server_name,
                    tool_name,
                    description,
                    score,
                },
            ));
        }

        scored.sort_by(|a, b| {
            b.1.score
                .partial_cmp(&a.1.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });
        scored.truncate(k);

        Ok(scored.into_iter().map(|(_, r)| r).collect())
    }

    /// Ids currently present in the index, sorted.
    pub fn indexed_ids(&self) -> Result<Vec<String>, IndexError> {
        let conn = self.conn.lock().expect("vector index mutex poisoned");
        let conn = conn
            .as_ref()
            .ok_or_else(|| IndexError::SearchFailed("index has not been built".to_string()))?;

        let mut stmt = conn.prepare("SELECT id FROM vectors ORDER BY id")?;
        let ids = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(ids)
    }
}

fn serialize_embedding(embedding: &[f32]) -> Vec<u8> {
    embedding.iter().flat_map(|f| f.to_le_bytes()).collect()
}

fn deserialize_embedding(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|chunk| {
            let arr: [u8; 4] = chunk.try_into().unwrap_or([0; 4]);
            f32::from_le_bytes(arr)
        })
        .collect()
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    dot / (norm_a * norm_b)
}
