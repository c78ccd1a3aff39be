//! SQLite store implementation.
//!
//! Owns the connection, its concurrency configuration, and the read-side
//! lookups the sync engine and collaborators need. All multi-statement
//! writes go through the sync engine's single transaction; this module
//! never writes outside one.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use rusqlite::{Connection, OptionalExtension};

use crate::error::Result;
use crate::storage::schema::apply_schema;

/// Optional features resolved once at open and threaded through the
/// engine, instead of re-queried ad hoc.
#[derive(Debug, Clone, Default)]
pub struct Capabilities {
    /// A `node_embeddings` table owned by the (out-of-process) vector
    /// pipeline exists; node deletes cascade into it.
    pub has_embeddings_table: bool,
}

/// SQLite-backed mirror store.
#[derive(Debug)]
pub struct Store {
    conn: Connection,
    caps: Capabilities,
    path: Option<PathBuf>,
}

/// A node row as persisted.
#[derive(Debug, Clone)]
pub struct NodeRow {
    pub id: String,
    pub name: Option<String>,
    pub created_at: i64,
    pub updated_at: Option<i64>,
    pub done_at: Option<i64>,
    pub parent_id: Option<String>,
}

/// The singleton sync bookkeeping row.
#[derive(Debug, Clone)]
pub struct SyncMetadata {
    pub last_export_file: Option<String>,
    pub last_sync_timestamp: Option<i64>,
    pub total_nodes: Option<i64>,
}

/// One full-text hit over field values.
#[derive(Debug, Clone)]
pub struct FieldValueHit {
    pub parent_id: String,
    pub field_name: String,
    pub value_text: Option<String>,
}

impl Store {
    /// Open a store at the given path, creating and migrating as needed.
    ///
    /// Configures the connection for multi-reader/single-writer access:
    /// WAL journaling (readers never block on a writer), a bounded busy
    /// timeout, and `synchronous NORMAL`.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection cannot be established or the
    /// schema fails to apply.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;

        conn.busy_timeout(Duration::from_secs(5))?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;

        apply_schema(&conn)?;
        let caps = resolve_capabilities(&conn)?;

        Ok(Self {
            conn,
            caps,
            path: Some(path.to_path_buf()),
        })
    }

    /// Open an in-memory store.
    ///
    /// In-memory stores have exactly one connection, so the concurrency
    /// configuration (WAL, busy timeout) is skipped entirely.
    ///
    /// # Errors
    ///
    /// Returns an error if the schema fails to apply.
    pub fn open_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        apply_schema(&conn)?;
        let caps = resolve_capabilities(&conn)?;
        Ok(Self {
            conn,
            caps,
            path: None,
        })
    }

    #[must_use]
    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    pub fn conn_mut(&mut self) -> &mut Connection {
        &mut self.conn
    }

    #[must_use]
    pub fn capabilities(&self) -> &Capabilities {
        &self.caps
    }

    /// On-disk path, `None` for in-memory stores.
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn node_count(&self) -> Result<i64> {
        Ok(self
            .conn
            .query_row("SELECT COUNT(*) FROM nodes", [], |row| row.get(0))?)
    }

    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn checksum_count(&self) -> Result<i64> {
        Ok(self
            .conn
            .query_row("SELECT COUNT(*) FROM node_checksums", [], |row| row.get(0))?)
    }

    /// Load the prior checksum snapshot for change detection.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn load_checksums(&self) -> Result<HashMap<String, String>> {
        let mut stmt = self
            .conn
            .prepare("SELECT node_id, checksum FROM node_checksums")?;
        let rows = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?;
        Ok(rows.collect::<std::result::Result<_, _>>()?)
    }

    /// Get a node by id.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn get_node(&self, id: &str) -> Result<Option<NodeRow>> {
        let node = self
            .conn
            .prepare(
                "SELECT id, name, created_at, updated_at, done_at, parent_id
                 FROM nodes WHERE id = ?1",
            )?
            .query_row([id], |row| {
                Ok(NodeRow {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    created_at: row.get(2)?,
                    updated_at: row.get(3)?,
                    done_at: row.get(4)?,
                    parent_id: row.get(5)?,
                })
            })
            .optional()?;
        Ok(node)
    }

    /// Read the singleton sync metadata row, if a sync has completed.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn sync_metadata(&self) -> Result<Option<SyncMetadata>> {
        let meta = self
            .conn
            .prepare(
                "SELECT last_export_file, last_sync_timestamp, total_nodes
                 FROM sync_metadata WHERE id = 1",
            )?
            .query_row([], |row| {
                Ok(SyncMetadata {
                    last_export_file: row.get(0)?,
                    last_sync_timestamp: row.get(1)?,
                    total_nodes: row.get(2)?,
                })
            })
            .optional()?;
        Ok(meta)
    }

    /// Full-text search over field values.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails (including malformed MATCH
    /// syntax in `query`).
    pub fn search_field_values(&self, query: &str, limit: u32) -> Result<Vec<FieldValueHit>> {
        let mut stmt = self.conn.prepare(
            "SELECT fv.parent_id, fv.field_name, fv.value_text
             FROM field_values_fts f
             JOIN field_values fv ON fv.rowid = f.rowid
             WHERE field_values_fts MATCH ?1
             ORDER BY rank
             LIMIT ?2",
        )?;
        let rows = stmt.query_map(rusqlite::params![query, limit], |row| {
            Ok(FieldValueHit {
                parent_id: row.get(0)?,
                field_name: row.get(1)?,
                value_text: row.get(2)?,
            })
        })?;
        Ok(rows.collect::<std::result::Result<_, _>>()?)
    }

    /// Walk structural parents from `node_id` upward and return the first
    /// ancestor (or the node itself) carrying at least one tag, with its
    /// tag names.
    ///
    /// # Errors
    ///
    /// Returns an error if a query fails.
    pub fn nearest_tagged_ancestor(&self, node_id: &str) -> Result<Option<(String, Vec<String>)>> {
        let mut stmt = self
            .conn
            .prepare("SELECT tag_name FROM tag_applications WHERE data_node_id = ?1")?;

        // Depth cap guards against parent cycles in malformed data
        let mut current = Some(node_id.to_string());
        for _ in 0..64 {
            let Some(id) = current else { break };

            let tags: Vec<String> = stmt
                .query_map([&id], |row| row.get(0))?
                .collect::<std::result::Result<_, _>>()?;
            if !tags.is_empty() {
                return Ok(Some((id, tags)));
            }

            current = self
                .conn
                .query_row("SELECT parent_id FROM nodes WHERE id = ?1", [&id], |row| {
                    row.get::<_, Option<String>>(0)
                })
                .optional()?
                .flatten();
        }
        Ok(None)
    }
}

fn resolve_capabilities(conn: &Connection) -> Result<Capabilities> {
    Ok(Capabilities {
        has_embeddings_table: table_exists(conn, "node_embeddings")?,
    })
}

fn table_exists(conn: &Connection, name: &str) -> Result<bool> {
    Ok(conn
        .prepare("SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1")?
        .exists([name])?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_memory_skips_concurrency_config() {
        let store = Store::open_memory().unwrap();
        assert!(store.path().is_none());
        // Memory stores keep the default journal mode
        let mode: String = store
            .conn()
            .query_row("PRAGMA journal_mode", [], |row| row.get(0))
            .unwrap();
        assert_ne!(mode.to_lowercase(), "wal");
    }

    #[test]
    fn test_open_on_disk_configures_wal() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(&dir.path().join("mirror.db")).unwrap();
        let mode: String = store
            .conn()
            .query_row("PRAGMA journal_mode", [], |row| row.get(0))
            .unwrap();
        assert_eq!(mode.to_lowercase(), "wal");
    }

    #[test]
    fn test_capabilities_without_embeddings_table() {
        let store = Store::open_memory().unwrap();
        assert!(!store.capabilities().has_embeddings_table);
    }

    #[test]
    fn test_capabilities_with_embeddings_table() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mirror.db");
        {
            let conn = Connection::open(&path).unwrap();
            conn.execute(
                "CREATE TABLE node_embeddings (node_id TEXT PRIMARY KEY, embedding BLOB)",
                [],
            )
            .unwrap();
        }
        let store = Store::open(&path).unwrap();
        assert!(store.capabilities().has_embeddings_table);
    }

    #[test]
    fn test_get_missing_node() {
        let store = Store::open_memory().unwrap();
        assert!(store.get_node("nope").unwrap().is_none());
    }

    #[test]
    fn test_sync_metadata_empty_before_first_sync() {
        let store = Store::open_memory().unwrap();
        assert!(store.sync_metadata().unwrap().is_none());
    }
}
