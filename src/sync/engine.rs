//! Sync engine: applies an export graph to the store as one transaction.
//!
//! State flow: parse (fatal before any transaction) → ensure schema (done
//! at store open) → choose full reindex vs incremental → apply inside a
//! single IMMEDIATE transaction → commit or roll back. Partial writes are
//! never observable to other connections; the whole transaction is wrapped
//! by the lock-contention retry helper.
//!
//! Field and supertag-metadata tables are fully recomputed on every run,
//! on both paths. They are cheap to rebuild from the graph and must never
//! drift from it. Node, checksum, supertag, tag-application, and reference
//! rows are diff-maintained on the incremental path.

use std::collections::HashSet;
use std::path::Path;
use std::time::Instant;

use rusqlite::{Transaction, TransactionBehavior};
use tracing::{debug, info};

use crate::checksum::{compute_checksums, detect_changes, ChangeSet};
use crate::error::Result;
use crate::export::load_export;
use crate::graph::{NodeGraph, Reference, TagApplication, TypeTuple};
use crate::storage::{with_retry, Capabilities, RetryPolicy, Store};
use crate::sync::fields::extract_fields;
use crate::sync::supertags::extract_supertag_metadata;
use crate::sync::types::{SyncMode, SyncOptions, SyncStats};

/// Orchestrates sync runs against a store.
#[derive(Debug, Default)]
pub struct SyncEngine {
    policy: RetryPolicy,
}

impl SyncEngine {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_policy(policy: RetryPolicy) -> Self {
        Self { policy }
    }

    /// Parse the export at `export_path` and mirror it into `store`.
    ///
    /// # Errors
    ///
    /// Returns a parse error before any transaction opens for a missing or
    /// malformed export; a busy error after retry exhaustion; and any
    /// database error (constraint violations included) after the active
    /// transaction has been rolled back.
    pub fn sync(
        &self,
        store: &mut Store,
        export_path: &Path,
        options: SyncOptions,
    ) -> Result<SyncStats> {
        let started = Instant::now();

        let export = load_export(export_path)?;
        let graph = NodeGraph::build(&export);
        let checksums = compute_checksums(&graph);
        let caps = store.capabilities().clone();
        let export_name = export_path.to_string_lossy().into_owned();

        info!(nodes = graph.len(), export = %export_name, "Starting sync");

        let mut stats = with_retry("sync", &self.policy, || {
            let tx = store
                .conn_mut()
                .transaction_with_behavior(TransactionBehavior::Immediate)?;

            let mode = choose_mode(&tx, options.force_full)?;
            debug!(mode = mode.as_str(), "Sync strategy chosen");

            let mut stats = match mode {
                SyncMode::FullReindex => apply_full(&tx, &graph, &checksums, &caps)?,
                SyncMode::Incremental => apply_incremental(&tx, &graph, &checksums, &caps)?,
            };

            rebuild_field_and_metadata(&tx, &graph, &mut stats)?;
            fill_table_counts(&tx, &mut stats)?;
            write_sync_metadata(&tx, &export_name, graph.len())?;

            tx.commit()?;
            Ok(stats)
        })?;

        stats.duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        info!(
            added = stats.nodes_added,
            modified = stats.nodes_modified,
            deleted = stats.nodes_deleted,
            duration_ms = stats.duration_ms,
            "Sync committed"
        );
        Ok(stats)
    }
}

/// Full reindex when the store has nodes but no checksum baseline (e.g.
/// upgraded from a pre-checksum version), or when explicitly forced.
fn choose_mode(tx: &Transaction, force_full: bool) -> Result<SyncMode> {
    if force_full {
        return Ok(SyncMode::FullReindex);
    }
    let nodes: i64 = tx.query_row("SELECT COUNT(*) FROM nodes", [], |row| row.get(0))?;
    let checksums: i64 =
        tx.query_row("SELECT COUNT(*) FROM node_checksums", [], |row| row.get(0))?;
    if nodes > 0 && checksums == 0 {
        Ok(SyncMode::FullReindex)
    } else {
        Ok(SyncMode::Incremental)
    }
}

fn apply_full(
    tx: &Transaction,
    graph: &NodeGraph,
    checksums: &std::collections::HashMap<String, String>,
    caps: &Capabilities,
) -> Result<SyncStats> {
    let prior_ids: HashSet<String> = tx
        .prepare("SELECT id FROM nodes")?
        .query_map([], |row| row.get(0))?
        .collect::<std::result::Result<_, _>>()?;

    // Derived tables first, nodes last. field_values goes through its
    // delete trigger so the full-text index empties with it.
    for table in [
        "field_values",
        "fields",
        "field_names",
        "supertag_fields",
        "supertag_parents",
        "tag_applications",
        "\"references\"",
        "supertags",
        "node_checksums",
        "nodes",
    ] {
        tx.execute(&format!("DELETE FROM {table}"), [])?;
    }

    insert_nodes(tx, graph, graph.iter().map(|n| n.id.as_str()))?;
    insert_checksums(tx, checksums.iter())?;
    insert_supertags(tx, graph.type_tuples.iter())?;
    insert_tag_applications(tx, graph.tag_applications.iter())?;
    insert_references(tx, graph.references.iter())?;

    if caps.has_embeddings_table {
        let cleaned = tx.execute(
            "DELETE FROM node_embeddings WHERE node_id NOT IN (SELECT id FROM nodes)",
            [],
        )?;
        debug!(cleaned, "Pruned orphaned embedding rows");
    }

    let current_ids: HashSet<&str> = graph.iter().map(|n| n.id.as_str()).collect();
    Ok(SyncStats {
        nodes_indexed: graph.len(),
        nodes_added: current_ids
            .iter()
            .filter(|id| !prior_ids.contains(**id))
            .count(),
        nodes_deleted: prior_ids
            .iter()
            .filter(|id| !current_ids.contains(id.as_str()))
            .count(),
        ..SyncStats::default()
    })
}

fn apply_incremental(
    tx: &Transaction,
    graph: &NodeGraph,
    checksums: &std::collections::HashMap<String, String>,
    caps: &Capabilities,
) -> Result<SyncStats> {
    let prior: std::collections::HashMap<String, String> = tx
        .prepare("SELECT node_id, checksum FROM node_checksums")?
        .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
        .collect::<std::result::Result<_, _>>()?;

    let diff = detect_changes(checksums, &prior);
    debug!(
        added = diff.added.len(),
        modified = diff.modified.len(),
        deleted = diff.deleted.len(),
        "Incremental diff computed"
    );

    delete_removed(tx, &diff, caps)?;

    insert_nodes(tx, graph, diff.added.iter().map(String::as_str))?;

    {
        let mut update = tx.prepare(
            "UPDATE nodes SET name = ?2, updated_at = ?3, done_at = ?4,
                    parent_id = ?5, raw_payload = ?6
             WHERE id = ?1",
        )?;
        for id in &diff.modified {
            if let Some(node) = graph.node(id) {
                update.execute(rusqlite::params![
                    node.id,
                    node.name,
                    node.modified,
                    node.done,
                    node.parent_id,
                    node.raw_payload,
                ])?;
            }
        }
    }

    let changed: Vec<(&String, &String)> = diff
        .added
        .iter()
        .chain(diff.modified.iter())
        .filter_map(|id| checksums.get_key_value(id))
        .collect();
    upsert_checksums(tx, changed.into_iter())?;

    // Dependent rows of every changed id: delete, then reinsert from the
    // graph. Rows are collected into sets first so an id pair touched via
    // two scopes (e.g. a renamed tag and its retagged node) inserts once.
    let affected: HashSet<&str> = diff
        .added
        .iter()
        .chain(diff.modified.iter())
        .map(String::as_str)
        .collect();

    {
        let mut del_tags = tx.prepare("DELETE FROM supertags WHERE tag_id = ?1")?;
        let mut del_apps = tx.prepare(
            "DELETE FROM tag_applications WHERE data_node_id = ?1 OR tag_id = ?1",
        )?;
        let mut del_refs = tx.prepare("DELETE FROM \"references\" WHERE from_node = ?1")?;
        for id in &diff.modified {
            del_tags.execute([id])?;
            del_apps.execute([id])?;
            del_refs.execute([id])?;
        }
    }

    insert_supertags(
        tx,
        graph
            .type_tuples
            .iter()
            .filter(|t| affected.contains(t.tag_id.as_str())),
    )?;
    insert_tag_applications(
        tx,
        graph.tag_applications.iter().filter(|a| {
            affected.contains(a.data_node_id.as_str()) || affected.contains(a.tag_id.as_str())
        }),
    )?;
    insert_references(
        tx,
        graph
            .references
            .iter()
            .filter(|r| affected.contains(r.from_node.as_str())),
    )?;

    Ok(SyncStats {
        nodes_indexed: graph.len(),
        nodes_added: diff.added.len(),
        nodes_modified: diff.modified.len(),
        nodes_deleted: diff.deleted.len(),
        ..SyncStats::default()
    })
}

/// Remove every row keyed by a deleted node id, across every table. No
/// orphans survive an incremental delete.
fn delete_removed(tx: &Transaction, diff: &ChangeSet, caps: &Capabilities) -> Result<()> {
    if diff.deleted.is_empty() {
        return Ok(());
    }

    let mut node = tx.prepare("DELETE FROM nodes WHERE id = ?1")?;
    let mut checksum = tx.prepare("DELETE FROM node_checksums WHERE node_id = ?1")?;
    let mut tag = tx.prepare("DELETE FROM supertags WHERE tag_id = ?1")?;
    let mut apps = tx.prepare(
        "DELETE FROM tag_applications
         WHERE data_node_id = ?1 OR tuple_node_id = ?1 OR tag_id = ?1",
    )?;
    let mut refs = tx.prepare("DELETE FROM \"references\" WHERE from_node = ?1")?;
    let mut embeddings = if caps.has_embeddings_table {
        Some(tx.prepare("DELETE FROM node_embeddings WHERE node_id = ?1")?)
    } else {
        None
    };

    let mut cleaned = 0;
    for id in &diff.deleted {
        node.execute([id])?;
        checksum.execute([id])?;
        tag.execute([id])?;
        apps.execute([id])?;
        refs.execute([id])?;
        if let Some(stmt) = embeddings.as_mut() {
            cleaned += stmt.execute([id])?;
        }
    }
    debug!(cleaned, "Embedding rows removed with deleted nodes");
    Ok(())
}

fn insert_nodes<'a>(
    tx: &Transaction,
    graph: &NodeGraph,
    ids: impl Iterator<Item = &'a str>,
) -> Result<()> {
    let mut stmt = tx.prepare(
        "INSERT INTO nodes (id, name, created_at, updated_at, done_at, parent_id, raw_payload)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
    )?;
    for id in ids {
        if let Some(node) = graph.node(id) {
            stmt.execute(rusqlite::params![
                node.id,
                node.name,
                node.created,
                node.modified,
                node.done,
                node.parent_id,
                node.raw_payload,
            ])?;
        }
    }
    Ok(())
}

fn insert_checksums<'a>(
    tx: &Transaction,
    entries: impl Iterator<Item = (&'a String, &'a String)>,
) -> Result<()> {
    let now = chrono::Utc::now().timestamp_millis();
    let mut stmt = tx.prepare(
        "INSERT INTO node_checksums (node_id, checksum, last_seen_at) VALUES (?1, ?2, ?3)",
    )?;
    for (id, checksum) in entries {
        stmt.execute(rusqlite::params![id, checksum, now])?;
    }
    Ok(())
}

fn upsert_checksums<'a>(
    tx: &Transaction,
    entries: impl Iterator<Item = (&'a String, &'a String)>,
) -> Result<()> {
    let now = chrono::Utc::now().timestamp_millis();
    let mut stmt = tx.prepare(
        "INSERT INTO node_checksums (node_id, checksum, last_seen_at) VALUES (?1, ?2, ?3)
         ON CONFLICT(node_id) DO UPDATE SET checksum = excluded.checksum,
                                            last_seen_at = excluded.last_seen_at",
    )?;
    for (id, checksum) in entries {
        stmt.execute(rusqlite::params![id, checksum, now])?;
    }
    Ok(())
}

fn insert_supertags<'a>(
    tx: &Transaction,
    tags: impl Iterator<Item = &'a TypeTuple>,
) -> Result<()> {
    let mut stmt =
        tx.prepare("INSERT INTO supertags (tag_id, tag_name, color) VALUES (?1, ?2, ?3)")?;
    for tag in tags {
        stmt.execute(rusqlite::params![tag.tag_id, tag.tag_name, tag.color])?;
    }
    Ok(())
}

fn insert_tag_applications<'a>(
    tx: &Transaction,
    apps: impl Iterator<Item = &'a TagApplication>,
) -> Result<()> {
    let mut stmt = tx.prepare(
        "INSERT INTO tag_applications (tuple_node_id, data_node_id, tag_id, tag_name)
         VALUES (?1, ?2, ?3, ?4)",
    )?;
    for app in apps {
        stmt.execute(rusqlite::params![
            app.tuple_node_id,
            app.data_node_id,
            app.tag_id,
            app.tag_name,
        ])?;
    }
    Ok(())
}

fn insert_references<'a>(
    tx: &Transaction,
    refs: impl Iterator<Item = &'a Reference>,
) -> Result<()> {
    let mut stmt = tx.prepare(
        "INSERT INTO \"references\" (from_node, to_node, reference_type) VALUES (?1, ?2, ?3)",
    )?;
    for reference in refs {
        stmt.execute(rusqlite::params![
            reference.from_node,
            reference.to_node,
            reference.reference_type.as_str(),
        ])?;
    }
    Ok(())
}

/// Rebuild the field and supertag-metadata tables from the graph, both
/// sync paths. Deleting `field_values` row-by-row fires the FTS delete
/// trigger, so the index follows exactly.
fn rebuild_field_and_metadata(
    tx: &Transaction,
    graph: &NodeGraph,
    stats: &mut SyncStats,
) -> Result<()> {
    for table in [
        "field_values",
        "fields",
        "field_names",
        "supertag_fields",
        "supertag_parents",
    ] {
        tx.execute(&format!("DELETE FROM {table}"), [])?;
    }

    let extraction = extract_fields(graph);
    let (tag_fields, tag_parents) =
        extract_supertag_metadata(graph, &extraction.names_by_label());

    {
        let mut stmt = tx.prepare(
            "INSERT INTO fields (tuple_id, parent_id, field_name, field_label_id, value_text, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        )?;
        for row in &extraction.fields {
            stmt.execute(rusqlite::params![
                row.tuple_id,
                row.parent_id,
                row.field_name,
                row.field_label_id,
                row.value_text,
                row.created_at,
            ])?;
        }
    }

    {
        let mut stmt = tx.prepare(
            "INSERT INTO field_names (field_label_id, field_name, normalized_name, data_type,
                                      target_type_id, target_type_name)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        )?;
        for row in &extraction.names {
            stmt.execute(rusqlite::params![
                row.field_label_id,
                row.field_name,
                row.normalized_name,
                row.data_type.as_str(),
                row.target_type_id,
                row.target_type_name,
            ])?;
        }
    }

    {
        let mut stmt = tx.prepare(
            "INSERT INTO field_values (tuple_id, parent_id, field_def_id, field_name,
                                       value_node_id, value_text, value_order, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        )?;
        for row in &extraction.values {
            stmt.execute(rusqlite::params![
                row.tuple_id,
                row.parent_id,
                row.field_def_id,
                row.field_name,
                row.value_node_id,
                row.value_text,
                row.value_order,
                row.created_at,
            ])?;
        }
    }

    {
        let mut stmt = tx.prepare(
            "INSERT INTO supertag_fields (tag_id, tag_name, field_name, field_label_id,
                                          field_order, normalized_name, data_type,
                                          target_type_id, target_type_name,
                                          default_value_id, default_value_text)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
        )?;
        for row in &tag_fields {
            stmt.execute(rusqlite::params![
                row.tag_id,
                row.tag_name,
                row.field_name,
                row.field_label_id,
                row.field_order,
                row.normalized_name,
                row.data_type.as_str(),
                row.target_type_id,
                row.target_type_name,
                row.default_value_id,
                row.default_value_text,
            ])?;
        }
    }

    {
        let mut stmt = tx.prepare(
            "INSERT INTO supertag_parents (child_tag_id, parent_tag_id) VALUES (?1, ?2)",
        )?;
        for row in &tag_parents {
            stmt.execute(rusqlite::params![row.child_tag_id, row.parent_tag_id])?;
        }
    }

    stats.fields_indexed = extraction.fields.len();
    stats.field_names_indexed = extraction.names.len();
    stats.field_values_indexed = extraction.values.len();
    stats.supertag_fields_extracted = tag_fields.len();
    stats.supertag_parents_extracted = tag_parents.len();
    Ok(())
}

fn fill_table_counts(tx: &Transaction, stats: &mut SyncStats) -> Result<()> {
    let count = |sql: &str| -> Result<usize> {
        let n: i64 = tx.query_row(sql, [], |row| row.get(0))?;
        Ok(usize::try_from(n).unwrap_or(0))
    };
    stats.supertags_indexed = count("SELECT COUNT(*) FROM supertags")?;
    stats.tag_applications_indexed = count("SELECT COUNT(*) FROM tag_applications")?;
    stats.references_indexed = count("SELECT COUNT(*) FROM \"references\"")?;
    Ok(())
}

/// Bookkeeping is the last statement of the transaction, so a reader
/// either sees the old metadata with the old data or the new with the new.
fn write_sync_metadata(tx: &Transaction, export_name: &str, total_nodes: usize) -> Result<()> {
    tx.execute(
        "INSERT INTO sync_metadata (id, last_export_file, last_sync_timestamp, total_nodes)
         VALUES (1, ?1, ?2, ?3)
         ON CONFLICT(id) DO UPDATE SET last_export_file = excluded.last_export_file,
                                       last_sync_timestamp = excluded.last_sync_timestamp,
                                       total_nodes = excluded.total_nodes",
        rusqlite::params![
            export_name,
            chrono::Utc::now().timestamp_millis(),
            i64::try_from(total_nodes).unwrap_or(i64::MAX)
        ],
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::path::PathBuf;

    fn write_export(dir: &Path, name: &str, body: &serde_json::Value) -> PathBuf {
        let path = dir.join(name);
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(body.to_string().as_bytes()).unwrap();
        path
    }

    fn small_export() -> serde_json::Value {
        serde_json::json!({
            "formatVersion": 1,
            "docs": [
                {"id": "root", "props": {"name": "Root", "created": 100}, "children": ["child"]},
                {"id": "child", "props": {"name": "Child", "created": 200}}
            ]
        })
    }

    #[test]
    fn test_first_sync_is_incremental_all_added() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_export(dir.path(), "export.json", &small_export());
        let mut store = Store::open_memory().unwrap();

        let stats = SyncEngine::new()
            .sync(&mut store, &path, SyncOptions::default())
            .unwrap();

        assert_eq!(stats.nodes_indexed, 2);
        assert_eq!(stats.nodes_added, 2);
        assert_eq!(stats.nodes_modified, 0);
        assert_eq!(stats.nodes_deleted, 0);
        assert_eq!(store.node_count().unwrap(), 2);
        assert_eq!(store.checksum_count().unwrap(), 2);

        let child = store.get_node("child").unwrap().unwrap();
        assert_eq!(child.parent_id.as_deref(), Some("root"));
    }

    #[test]
    fn test_parse_error_before_any_write() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.json");
        std::fs::write(&path, "{oops").unwrap();

        let mut store = Store::open_memory().unwrap();
        let err = SyncEngine::new()
            .sync(&mut store, &path, SyncOptions::default())
            .unwrap_err();
        assert!(matches!(err, crate::error::Error::Parse(_)));
        assert!(store.sync_metadata().unwrap().is_none());
    }

    #[test]
    fn test_sync_metadata_written_on_commit() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_export(dir.path(), "export.json", &small_export());
        let mut store = Store::open_memory().unwrap();

        SyncEngine::new()
            .sync(&mut store, &path, SyncOptions::default())
            .unwrap();

        let meta = store.sync_metadata().unwrap().unwrap();
        assert!(meta.last_export_file.unwrap().ends_with("export.json"));
        assert_eq!(meta.total_nodes, Some(2));
        assert!(meta.last_sync_timestamp.is_some());
    }

    #[test]
    fn test_forced_full_reindex_counts() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_export(dir.path(), "export.json", &small_export());
        let mut store = Store::open_memory().unwrap();
        let engine = SyncEngine::new();

        engine.sync(&mut store, &path, SyncOptions::default()).unwrap();
        let stats = engine
            .sync(&mut store, &path, SyncOptions { force_full: true })
            .unwrap();

        // Same ids on both sides of a forced rebuild
        assert_eq!(stats.nodes_indexed, 2);
        assert_eq!(stats.nodes_added, 0);
        assert_eq!(stats.nodes_deleted, 0);
        assert_eq!(store.node_count().unwrap(), 2);
    }

    #[test]
    fn test_modified_tag_rename_refreshes_applications() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = Store::open_memory().unwrap();
        let engine = SyncEngine::new();

        let v1 = serde_json::json!({"docs": [
            {"id": "tag1", "props": {"name": "project", "created": 1}, "children": ["metaT"]},
            {"id": "metaT", "props": {"created": 1}, "children": ["SYS_A13", "SYS_T01"]},
            {"id": "data1", "props": {"name": "Thing", "created": 2}, "children": ["app1"]},
            {"id": "app1", "props": {"created": 2}, "children": ["SYS_A13", "tag1"]}
        ]});
        let p1 = write_export(dir.path(), "v1.json", &v1);
        engine.sync(&mut store, &p1, SyncOptions::default()).unwrap();

        let mut v2 = v1.clone();
        v2["docs"][0]["props"]["name"] = "venture".into();
        let p2 = write_export(dir.path(), "v2.json", &v2);
        let stats = engine.sync(&mut store, &p2, SyncOptions::default()).unwrap();

        assert_eq!(stats.nodes_modified, 1);
        let tag_name: String = store
            .conn()
            .query_row(
                "SELECT tag_name FROM tag_applications WHERE data_node_id = 'data1'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(tag_name, "venture");
    }
}
