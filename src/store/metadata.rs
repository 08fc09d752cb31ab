// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Persistent tool metadata store.
//!
//! Backed by an embedded SQLite database at `.database/mcps.db` under the
//! working directory. This is the only state apart from the vector index
//! that survives restarts; its job is to preserve output schemas, in
//! particular schemas a downstream server supplied once but stopped
//! advertising.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use rusqlite::{params, Connection, OptionalExtension};
use serde_json::Value;

use crate::error::PersistenceError;

/// Database directory, relative to the working directory.
pub const STORE_DIR: &str = ".database";

/// Database file name.
pub const STORE_FILE: &str = "mcps.db";

/// One persisted `(server, tool)` row.
#[derive(Debug, Clone, PartialEq)]
pub struct PersistedTool {
    pub server_name: String,
    pub tool_name: String,
    pub output_schema: Option<Value>,
    /// True iff the schema came from the downstream server itself.
    pub original_output_schema: bool,
    /// Milliseconds since the Unix epoch at last write.
    pub last_updated: i64,
}

impl PersistedTool {
    /// Row carrying a server-supplied schema.
    pub fn original(
        server: impl Into<String>,
        tool: impl Into<String>,
        schema: Option<Value>,
    ) -> Self {
        Self {
            server_name: server.into(),
            tool_name: tool.into(),
            output_schema: schema,
            original_output_schema: true,
            last_updated: chrono::Utc::now().timestamp_millis(),
        }
    }

    /// Row carrying a schema inferred from an observed response.
    pub fn inferred(
        server: impl Into<String>,
        tool: impl Into<String>,
        schema: Option<Value>,
    ) -> Self {
        Self {
            original_output_schema: false,
            ..Self::original(server, tool, schema)
        }
    }
}

/// Outcome of a `save_or_update` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    /// A new row was created.
    Inserted,
    /// An existing row was overwritten.
    Updated,
    /// The write was rejected by the provenance policy.
    Unchanged,
}

/// Store statistics.
#[derive(Debug, Clone)]
pub struct StoreStats {
    pub tool_rows: u64,
    pub servers: u64,
    pub db_size_bytes: u64,
}

/// Persistent key/value store over `(server, tool)` rows.
///
/// Opened once at startup and threaded by handle; all writes arrive from
/// the single dispatcher fiber, so a plain mutex around the connection is
/// sufficient.
pub struct ToolMetadataStore {
    conn: Mutex<Connection>,
    db_path: PathBuf,
}

impl ToolMetadataStore {
    /// Open or create the store under the given working directory.
    pub fn open(working_dir: impl AsRef<Path>) -> Result<Self, PersistenceError> {
        let dir = working_dir.as_ref().join(STORE_DIR);
        std::fs::create_dir_all(&dir).map_err(|e| {
            PersistenceError::OpenFailed(format!("failed to create {}: {}", dir.display(), e))
        })?;

        let db_path = dir.join(STORE_FILE);
        let conn = Connection::open(&db_path)
            .map_err(|e| PersistenceError::OpenFailed(e.to_string()))?;

        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;",
        )
        .map_err(|e| PersistenceError::OpenFailed(format!("failed to set pragmas: {}", e)))?;

        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS tools (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                serverName TEXT NOT NULL,
                toolName TEXT NOT NULL,
                outputSchema TEXT,
                originalOutputSchema INTEGER NOT NULL,
                lastUpdated INTEGER NOT NULL,
                UNIQUE(serverName, toolName)
            );
            CREATE INDEX IF NOT EXISTS idx_tools_server ON tools(serverName);",
        )
        .map_err(|e| PersistenceError::OpenFailed(format!("failed to create schema: {}", e)))?;

        Ok(Self {
            conn: Mutex::new(conn),
            db_path,
        })
    }

    /// Path of the backing database file.
    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    /// Insert or update one row, subject to the provenance policy:
    /// an inferred schema never overwrites an existing original one, while
    /// an original-from-server write always wins. A write that would leave
    /// the row byte-identical is a no-op, so replaying the same observation
    /// does not touch `lastUpdated`.
    pub fn save_or_update(&self, row: &PersistedTool) -> Result<WriteOutcome, PersistenceError> {
        let conn = self.conn.lock().expect("metadata store mutex poisoned");

        let existing: Option<(Option<String>, bool)> = conn
            .query_row(
                "SELECT outputSchema, originalOutputSchema FROM tools
                 WHERE serverName = ?1 AND toolName = ?2",
                params![row.server_name, row.tool_name],
                |r| Ok((r.get::<_, Option<String>>(0)?, r.get::<_, i64>(1)? != 0)),
            )
            .optional()?;

        let schema_text = match &row.output_schema {
            Some(schema) => Some(
                serde_json::to_string(schema)
                    .map_err(|e| PersistenceError::WriteFailed(e.to_string()))?,
            ),
            None => None,
        };

        match existing {
            None => {
                conn.execute(
                    "INSERT INTO tools (serverName, toolName, outputSchema, originalOutputSchema, lastUpdated)
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                    params![
                        row.server_name,
                        row.tool_name,
                        schema_text,
                        row.original_output_schema as i64,
                        row.last_updated,
                    ],
                )
                .map_err(|e| PersistenceError::WriteFailed(e.to_string()))?;
                Ok(WriteOutcome::Inserted)
            }
            Some((_, true)) if !row.original_output_schema => Ok(WriteOutcome::Unchanged),
            Some((ref stored_schema, stored_original))
                if *stored_schema == schema_text
                    && stored_original == row.original_output_schema =>
            {
                Ok(WriteOutcome::Unchanged)
            }
            Some(_) => {
                conn.execute(
                    "UPDATE tools
                     SET outputSchema = ?3, originalOutputSchema = ?4, lastUpdated = ?5
                     WHERE serverName = ?1 AND toolName = ?2",
                    params![
                        row.server_name,
                        row.tool_name,
                        schema_text,
                        row.original_output_schema as i64,
                        row.last_updated,
                    ],
                )
                .map_err(|e| PersistenceError::WriteFailed(e.to_string()))?;
                Ok(WriteOutcome::Updated)
            }
        }
    }

    /// Fetch one row.
    pub fn get_tool(
        &self,
        server: &str,
        tool: &str,
    ) -> Result<Option<PersistedTool>, PersistenceError> {
        let conn = self.conn.lock().expect("metadata store mutex poisoned");

        conn.query_row(
            "SELECT serverName, toolName, outputSchema, originalOutputSchema, lastUpdated
             FROM tools WHERE serverName = ?1 AND toolName = ?2",
            params![server, tool],
            Self::row_to_tool,
        )
        .optional()
        .map_err(PersistenceError::from)?
        .map(|r| r.map_err(|message| PersistenceError::Corrupted {
            server: server.to_string(),
            tool: tool.to_string(),
            message,
        }))
        .transpose()
    }

    /// Fetch all rows for one server, ordered by tool name.
    pub fn get_server_tools(&self, server: &str) -> Result<Vec<PersistedTool>, PersistenceError> {
        let conn = self.conn.lock().expect("metadata store mutex poisoned");

        let mut stmt = conn.prepare(
            "SELECT serverName, toolName, outputSchema, originalOutputSchema, lastUpdated
             FROM tools WHERE serverName = ?1 ORDER BY toolName",
        )?;

        let rows = stmt.query_map(params![server], Self::row_to_tool)?;

        let mut tools = Vec::new();
        for row in rows {
            let parsed = row?.map_err(|message| PersistenceError::Corrupted {
                server: server.to_string(),
                tool: String::new(),
                message,
            })?;
            tools.push(parsed);
        }
        Ok(tools)
    }

    /// Delete every row belonging to one server. Returns the rows removed.
    pub fn delete_server_tools(&self, server: &str) -> Result<u64, PersistenceError> {
        let conn = self.conn.lock().expect("metadata store mutex poisoned");

        let deleted = conn
            .execute("DELETE FROM tools WHERE serverName = ?1", params![server])
            .map_err(|e| PersistenceError::WriteFailed(e.to_string()))?;

        Ok(deleted as u64)
    }

    /// Distinct server names present in the store, sorted.
    pub fn list_all_servers(&self) -> Result<Vec<String>, PersistenceError> {
        let conn = self.conn.lock().expect("metadata store mutex poisoned");

        let mut stmt =
            conn.prepare("SELECT DISTINCT serverName FROM tools ORDER BY serverName")?;
        let names = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(names)
    }

    /// Store statistics.
    pub fn stats(&self) -> Result<StoreStats, PersistenceError> {
        let conn = self.conn.lock().expect("metadata store mutex poisoned");

        let tool_rows: u64 =
            conn.query_row("SELECT COUNT(*) FROM tools", [], |r| r.get::<_, i64>(0))? as u64;
        let servers: u64 = conn.query_row(
            "SELECT COUNT(DISTINCT serverName) FROM tools",
            [],
            |r| r.get::<_, i64>(0),
        )? as u64;

        let db_size_bytes = std::fs::metadata(&self.db_path).map(|m| m.len()).unwrap_or(0);

        Ok(StoreStats {
            tool_rows,
            servers,
            db_size_bytes,
        })
    }

    fn row_to_tool(
        row: &rusqlite::Row<'_>,
    ) -> rusqlite::Result<Result<PersistedTool, String>> {
        let schema_text: Option<String> = row.get(2)?;
        let schema = match schema_text {
            Some(text) => match serde_json::from_str(&text) {
                Ok(value) => Some(value),
                Err(e) => return Ok(Err(format!("unparseable outputSchema: {}", e))),
            },
            None => None,
        };

        Ok(Ok(PersistedTool {
            server_name: row.get(0)?,
            tool_name: row.get(1)?,
            output_schema: schema,
            original_output_schema: row.get::<_, i64>(3)? != 0,
            last_updated: row.get(4)?,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    fn open_store() -> (tempfile::TempDir, ToolMetadataStore) {
        let temp = tempdir().unwrap();
        let store = ToolMetadataStore::open(temp.path()).unwrap();
        (temp, store)
    }

    #[test]
    fn test_open_creates_database() {
        let (_temp, store) = open_store();
        assert!(store.db_path().exists());
        assert!(store.db_path().ends_with(".database/mcps.db"));
    }

    #[test]
    fn test_insert_and_get() {
        let (_temp, store) = open_store();

        let row = PersistedTool::original("weather", "get_forecast", Some(json!({"type": "object"})));
        assert_eq!(store.save_or_update(&row).unwrap(), WriteOutcome::Inserted);

        let fetched = store.get_tool("weather", "get_forecast").unwrap().unwrap();
        assert_eq!(fetched.output_schema, Some(json!({"type": "object"})));
        assert!(fetched.original_output_schema);

        assert!(store.get_tool("weather", "missing").unwrap().is_none());
    }

    #[test]
    fn test_inferred_never_overwrites_original() {
        let (_temp, store) = open_store();

        let original =
            PersistedTool::original("weather", "get_forecast", Some(json!({"type": "object"})));
        store.save_or_update(&original).unwrap();

        let inferred =
            PersistedTool::inferred("weather", "get_forecast", Some(json!({"type": "string"})));
        assert_eq!(
            store.save_or_update(&inferred).unwrap(),
            WriteOutcome::Unchanged
        );

        let fetched = store.get_tool("weather", "get_forecast").unwrap().unwrap();
        assert!(fetched.original_output_schema);
        assert_eq!(fetched.output_schema, Some(json!({"type": "object"})));
    }

    #[test]
    fn test_original_overwrites_inferred() {
        let (_temp, store) = open_store();

        let inferred =
            PersistedTool::inferred("weather", "get_forecast", Some(json!({"type": "string"})));
        store.save_or_update(&inferred).unwrap();

        let original =
            PersistedTool::original("weather", "get_forecast", Some(json!({"type": "object"})));
        assert_eq!(
            store.save_or_update(&original).unwrap(),
            WriteOutcome::Updated
        );

        let fetched = store.get_tool("weather", "get_forecast").unwrap().unwrap();
        assert!(fetched.original_output_schema);
        assert_eq!(fetched.output_schema, Some(json!({"type": "object"})));
    }

    #[test]
    fn test_inferred_updates_inferred() {
        let (_temp, store) = open_store();

        store
            .save_or_update(&PersistedTool::inferred("s", "t", Some(json!({"type": "string"}))))
            .unwrap();
        let outcome = store
            .save_or_update(&PersistedTool::inferred("s", "t", Some(json!({"type": "number"}))))
            .unwrap();
        assert_eq!(outcome, WriteOutcome::Updated);

        let fetched = store.get_tool("s", "t").unwrap().unwrap();
        assert_eq!(fetched.output_schema, Some(json!({"type": "number"})));
    }

    #[test]
    fn test_identical_write_is_unchanged() {
        let (_temp, store) = open_store();
        let schema = json!({"type": "object", "properties": {"a": {"type": "string"}}});

        store
            .save_or_update(&PersistedTool::inferred("s", "t", Some(schema.clone())))
            .unwrap();
        let first = store.get_tool("s", "t").unwrap().unwrap();

        // Replaying the same observation rewrites nothing.
        let outcome = store
            .save_or_update(&PersistedTool::inferred("s", "t", Some(schema.clone())))
            .unwrap();
        assert_eq!(outcome, WriteOutcome::Unchanged);

        let second = store.get_tool("s", "t").unwrap().unwrap();
        assert_eq!(second.last_updated, first.last_updated);
        assert_eq!(second.output_schema, first.output_schema);

        // Same for an original row re-advertised identically at a later boot.
        store
            .save_or_update(&PersistedTool::original("s", "orig", Some(schema.clone())))
            .unwrap();
        let outcome = store
            .save_or_update(&PersistedTool::original("s", "orig", Some(schema)))
            .unwrap();
        assert_eq!(outcome, WriteOutcome::Unchanged);
    }

    #[test]
    fn test_delete_server_tools_and_list_servers() {
        let (_temp, store) = open_store();

        store
            .save_or_update(&PersistedTool::original("a", "t1", None))
            .unwrap();
        store
            .save_or_update(&PersistedTool::original("a", "t2", None))
            .unwrap();
        store
            .save_or_update(&PersistedTool::original("b", "t1", None))
            .unwrap();

        assert_eq!(store.list_all_servers().unwrap(), vec!["a", "b"]);

        assert_eq!(store.delete_server_tools("a").unwrap(), 2);
        assert_eq!(store.list_all_servers().unwrap(), vec!["b"]);
        assert!(store.get_tool("a", "t1").unwrap().is_none());
    }

    #[test]
    fn test_get_server_tools_sorted() {
        let (_temp, store) = open_store();

        store
            .save_or_update(&PersistedTool::original("s", "zebra", None))
            .unwrap();
        store
            .save_or_update(&PersistedTool::original("s", "apple", None))
            .unwrap();

        let tools = store.get_server_tools("s").unwrap();
        let names: Vec<_> = tools.iter().map(|t| t.tool_name.as_str()).collect();
        assert_eq!(names, vec!["apple", "zebra"]);
    }

    #[test]
    fn test_stats() {
        let (_temp, store) = open_store();

        store
            .save_or_update(&PersistedTool::original("a", "t1", None))
            .unwrap();
        store
            .save_or_update(&PersistedTool::original("b", "t1", None))
            .unwrap();

        let stats = store.stats().unwrap();
        assert_eq!(stats.tool_rows, 2);
        assert_eq!(stats.servers, 2);
        assert!(stats.db_size_bytes > 0);
    }

    #[test]
    fn test_survives_reopen() {
        let temp = tempdir().unwrap();
        {
            let store = ToolMetadataStore::open(temp.path()).unwrap();
            store
                .save_or_update(&PersistedTool::original(
                    "weather",
                    "get_forecast",
                    Some(json!({"type": "object"})),
                ))
                .unwrap();
        }

        let store = ToolMetadataStore::open(temp.path()).unwrap();
        let fetched = store.get_tool("weather", "get_forecast").unwrap().unwrap();
        assert!(fetched.original_output_schema);
        assert_eq!(fetched.output_schema, Some(json!({"type": "object"})));
    }
}
