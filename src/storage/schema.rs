//! Database schema definitions.
//!
//! The complete DDL for the mirror store. Every statement uses
//! `IF NOT EXISTS`, so applying the schema is idempotent and safe on every
//! open; upgrades of existing stores run through
//! [`super::migrations::run_migrations`] afterwards.

use rusqlite::Connection;

use crate::error::Result;

/// Current schema version for migration tracking.
pub const CURRENT_SCHEMA_VERSION: i32 = 4;

/// The complete SQL schema for the mirror store.
///
/// Timestamps are stored as INTEGER Unix milliseconds throughout.
/// `references` is quoted everywhere because it is an SQL keyword.
pub const SCHEMA_SQL: &str = r#"
-- ====================
-- Schema Version Tracking
-- ====================

CREATE TABLE IF NOT EXISTS schema_migrations (
    version TEXT PRIMARY KEY,
    applied_at INTEGER NOT NULL
);

-- ====================
-- Primary Data
-- ====================

-- Nodes: one row per exported document
CREATE TABLE IF NOT EXISTS nodes (
    id TEXT PRIMARY KEY,
    name TEXT,
    created_at INTEGER NOT NULL,
    updated_at INTEGER,
    done_at INTEGER,
    parent_id TEXT,
    raw_payload BLOB
);

CREATE INDEX IF NOT EXISTS idx_nodes_parent ON nodes(parent_id);
CREATE INDEX IF NOT EXISTS idx_nodes_name ON nodes(name);
CREATE INDEX IF NOT EXISTS idx_nodes_done ON nodes(done_at);

-- Supertags: type definitions detected in the export
CREATE TABLE IF NOT EXISTS supertags (
    tag_id TEXT PRIMARY KEY,
    tag_name TEXT NOT NULL,
    color TEXT
);

CREATE INDEX IF NOT EXISTS idx_supertags_name ON supertags(tag_name);

-- Tag applications: which data node carries which tag
CREATE TABLE IF NOT EXISTS tag_applications (
    tuple_node_id TEXT NOT NULL,
    data_node_id TEXT NOT NULL,
    tag_id TEXT NOT NULL,
    tag_name TEXT NOT NULL,
    PRIMARY KEY (tuple_node_id, tag_id)
);

CREATE INDEX IF NOT EXISTS idx_tag_applications_data ON tag_applications(data_node_id);
CREATE INDEX IF NOT EXISTS idx_tag_applications_tag ON tag_applications(tag_id);

-- Inline cross-references extracted from node text
CREATE TABLE IF NOT EXISTS "references" (
    from_node TEXT NOT NULL,
    to_node TEXT NOT NULL,
    reference_type TEXT NOT NULL,
    UNIQUE(from_node, to_node, reference_type)
);

CREATE INDEX IF NOT EXISTS idx_references_from ON "references"(from_node);
CREATE INDEX IF NOT EXISTS idx_references_to ON "references"(to_node);

-- ====================
-- Field Data
-- ====================

-- Flat per-tuple field rows (first value only; normalized rows below)
CREATE TABLE IF NOT EXISTS fields (
    tuple_id TEXT PRIMARY KEY,
    parent_id TEXT NOT NULL,
    field_name TEXT NOT NULL,
    field_label_id TEXT,
    value_text TEXT,
    created_at INTEGER
);

CREATE INDEX IF NOT EXISTS idx_fields_parent ON fields(parent_id);
CREATE INDEX IF NOT EXISTS idx_fields_name ON fields(field_name);

-- Field registry: one row per field label with its resolved data type
CREATE TABLE IF NOT EXISTS field_names (
    field_label_id TEXT PRIMARY KEY,
    field_name TEXT NOT NULL,
    normalized_name TEXT NOT NULL,
    data_type TEXT NOT NULL,
    target_type_id TEXT,
    target_type_name TEXT
);

CREATE INDEX IF NOT EXISTS idx_field_names_name ON field_names(field_name);

-- Normalized field values: one row per value, order-preserving
CREATE TABLE IF NOT EXISTS field_values (
    tuple_id TEXT NOT NULL,
    parent_id TEXT NOT NULL,
    field_def_id TEXT,
    field_name TEXT NOT NULL,
    value_node_id TEXT,
    value_text TEXT,
    value_order INTEGER NOT NULL,
    created_at INTEGER,
    PRIMARY KEY (tuple_id, value_order)
);

CREATE INDEX IF NOT EXISTS idx_field_values_parent ON field_values(parent_id);
CREATE INDEX IF NOT EXISTS idx_field_values_name ON field_values(field_name);

-- ====================
-- Supertag Metadata
-- ====================

-- Field definitions declared on a type
CREATE TABLE IF NOT EXISTS supertag_fields (
    tag_id TEXT NOT NULL,
    tag_name TEXT NOT NULL,
    field_name TEXT NOT NULL,
    field_label_id TEXT,
    field_order INTEGER NOT NULL DEFAULT 0,
    normalized_name TEXT NOT NULL,
    data_type TEXT NOT NULL,
    target_type_id TEXT,
    target_type_name TEXT,
    default_value_id TEXT,
    default_value_text TEXT,
    UNIQUE(tag_id, field_name)
);

CREATE INDEX IF NOT EXISTS idx_supertag_fields_tag ON supertag_fields(tag_id);

-- Type inheritance edges; a child may declare multiple parents
CREATE TABLE IF NOT EXISTS supertag_parents (
    child_tag_id TEXT NOT NULL,
    parent_tag_id TEXT NOT NULL,
    UNIQUE(child_tag_id, parent_tag_id)
);

CREATE INDEX IF NOT EXISTS idx_supertag_parents_child ON supertag_parents(child_tag_id);

-- ====================
-- Sync Bookkeeping
-- ====================

CREATE TABLE IF NOT EXISTS node_checksums (
    node_id TEXT PRIMARY KEY,
    checksum TEXT NOT NULL,
    last_seen_at INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS sync_metadata (
    id INTEGER PRIMARY KEY CHECK (id = 1),
    last_export_file TEXT,
    last_sync_timestamp INTEGER,
    total_nodes INTEGER
);

-- ====================
-- Full-Text Search
-- ====================

-- External-content FTS5 index over field values, synchronized by
-- insert/delete triggers only (updates are modeled as delete+insert).
CREATE VIRTUAL TABLE IF NOT EXISTS field_values_fts USING fts5(
    value_text,
    field_name,
    content='field_values',
    content_rowid='rowid'
);

CREATE TRIGGER IF NOT EXISTS field_values_fts_insert
AFTER INSERT ON field_values
BEGIN
    INSERT INTO field_values_fts(rowid, value_text, field_name)
    VALUES (new.rowid, new.value_text, new.field_name);
END;

CREATE TRIGGER IF NOT EXISTS field_values_fts_delete
AFTER DELETE ON field_values
BEGIN
    INSERT INTO field_values_fts(field_values_fts, rowid, value_text, field_name)
    VALUES ('delete', old.rowid, old.value_text, old.field_name);
END;
"#;

/// Apply the schema to the database.
///
/// Idempotent: all statements use `IF NOT EXISTS`, and pending migrations
/// for pre-existing stores run afterwards. Never drops or truncates data.
///
/// # Errors
///
/// Returns an error if the SQL execution fails or pragmas cannot be set.
pub fn apply_schema(conn: &Connection) -> Result<()> {
    conn.pragma_update(None, "foreign_keys", "ON")?;

    conn.execute_batch(SCHEMA_SQL)?;

    super::migrations::run_migrations(conn)?;

    conn.execute(
        "INSERT OR IGNORE INTO schema_migrations (version, applied_at) VALUES (?1, ?2)",
        rusqlite::params![
            format!("v{CURRENT_SCHEMA_VERSION}"),
            chrono::Utc::now().timestamp_millis()
        ],
    )?;

    Ok(())
}
