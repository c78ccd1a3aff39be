//! Node content checksums and change detection.
//!
//! A checksum is a SHA-256 fingerprint over the exact subset of a node's
//! content that matters for change detection: name, creation timestamp,
//! first modification timestamp, completion timestamp, sorted child-id
//! list, and the sorted set of applied tag ids. Nothing else participates;
//! widening or narrowing the subset changes false-positive/negative
//! behavior for every store in the field.
//!
//! The detector is a pure function of (new graph, prior snapshot) — prior
//! checksums are passed in explicitly, never read from process state.

use std::collections::HashMap;

use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::graph::{GraphNode, NodeGraph};

/// The checksum contract: exactly these fields, in this order.
#[derive(Serialize)]
struct ChecksumInput<'a> {
    name: Option<&'a str>,
    created: i64,
    modified: Option<i64>,
    done: Option<i64>,
    children: Vec<&'a str>,
    tags: Vec<&'a str>,
}

/// Compute the content checksum of one node.
///
/// # Panics
///
/// Panics if the checksum input cannot be serialized to JSON, which
/// cannot happen for these field types.
#[must_use]
pub fn node_checksum(graph: &NodeGraph, node: &GraphNode) -> String {
    let mut children: Vec<&str> = node.children.iter().map(String::as_str).collect();
    children.sort_unstable();

    let mut tags: Vec<&str> = graph.applied_tags(&node.id).iter().map(String::as_str).collect();
    tags.sort_unstable();
    tags.dedup();

    let input = ChecksumInput {
        name: node.name.as_deref(),
        created: node.created,
        modified: node.modified,
        done: node.done,
        children,
        tags,
    };

    let json = serde_json::to_string(&input).expect("serialization should not fail");
    let mut hasher = Sha256::new();
    hasher.update(json.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Compute checksums for every node in the graph.
#[must_use]
pub fn compute_checksums(graph: &NodeGraph) -> HashMap<String, String> {
    graph
        .iter()
        .map(|node| (node.id.clone(), node_checksum(graph, node)))
        .collect()
}

/// The add/modify/delete diff between two checksum snapshots.
#[derive(Debug, Default, Clone)]
pub struct ChangeSet {
    pub added: Vec<String>,
    pub modified: Vec<String>,
    pub deleted: Vec<String>,
}

impl ChangeSet {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.modified.is_empty() && self.deleted.is_empty()
    }
}

/// Diff the fresh checksum map against the prior snapshot.
///
/// Unchanged ids are excluded entirely. Output vectors are sorted for
/// deterministic apply order.
#[must_use]
pub fn detect_changes(
    current: &HashMap<String, String>,
    prior: &HashMap<String, String>,
) -> ChangeSet {
    let mut changes = ChangeSet::default();

    for (id, checksum) in current {
        match prior.get(id) {
            None => changes.added.push(id.clone()),
            Some(old) if old != checksum => changes.modified.push(id.clone()),
            Some(_) => {}
        }
    }

    for id in prior.keys() {
        if !current.contains_key(id) {
            changes.deleted.push(id.clone());
        }
    }

    changes.added.sort_unstable();
    changes.modified.sort_unstable();
    changes.deleted.sort_unstable();
    changes
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::export::ExportDocument;

    fn graph(json: &str) -> NodeGraph {
        let export: ExportDocument = serde_json::from_str(json).unwrap();
        NodeGraph::build(&export)
    }

    const BASE: &str = r#"{"docs":[
        {"id":"a","props":{"name":"alpha","created":100},"children":["b"]},
        {"id":"b","props":{"name":"beta","created":200}}
    ]}"#;

    #[test]
    fn test_checksums_stable_across_rebuilds() {
        let g1 = graph(BASE);
        let g2 = graph(BASE);
        assert_eq!(compute_checksums(&g1), compute_checksums(&g2));
    }

    #[test]
    fn test_checksum_ignores_child_order() {
        let g1 = graph(r#"{"docs":[{"id":"a","props":{},"children":["x","y"]}]}"#);
        let g2 = graph(r#"{"docs":[{"id":"a","props":{},"children":["y","x"]}]}"#);
        assert_eq!(
            compute_checksums(&g1).get("a"),
            compute_checksums(&g2).get("a")
        );
    }

    #[test]
    fn test_checksum_changes_on_rename() {
        let g1 = graph(BASE);
        let g2 = graph(
            r#"{"docs":[
                {"id":"a","props":{"name":"alpha","created":100},"children":["b"]},
                {"id":"b","props":{"name":"renamed","created":200}}
            ]}"#,
        );
        let c1 = compute_checksums(&g1);
        let c2 = compute_checksums(&g2);
        assert_eq!(c1.get("a"), c2.get("a"));
        assert_ne!(c1.get("b"), c2.get("b"));
    }

    #[test]
    fn test_checksum_changes_on_child_list_change() {
        let g1 = graph(r#"{"docs":[{"id":"a","props":{},"children":["b"]},{"id":"b"}]}"#);
        let g2 = graph(
            r#"{"docs":[{"id":"a","props":{},"children":["b","c"]},{"id":"b"},{"id":"c"}]}"#,
        );
        assert_ne!(
            compute_checksums(&g1).get("a"),
            compute_checksums(&g2).get("a")
        );
    }

    #[test]
    fn test_checksum_changes_on_tag_change() {
        let g1 = graph(r#"{"docs":[{"id":"a","props":{},"children":["t"]},{"id":"t","props":{},"children":["SYS_A13","tagX"]}]}"#);
        let g2 = graph(r#"{"docs":[{"id":"a","props":{},"children":["t"]},{"id":"t","props":{},"children":["SYS_A13","tagY"]}]}"#);
        assert_ne!(
            compute_checksums(&g1).get("a"),
            compute_checksums(&g2).get("a")
        );
    }

    #[test]
    fn test_detect_changes_classification() {
        let mut prior = HashMap::new();
        prior.insert("kept".to_string(), "h1".to_string());
        prior.insert("changed".to_string(), "h2".to_string());
        prior.insert("removed".to_string(), "h3".to_string());

        let mut current = HashMap::new();
        current.insert("kept".to_string(), "h1".to_string());
        current.insert("changed".to_string(), "h2-new".to_string());
        current.insert("fresh".to_string(), "h4".to_string());

        let diff = detect_changes(&current, &prior);
        assert_eq!(diff.added, ["fresh"]);
        assert_eq!(diff.modified, ["changed"]);
        assert_eq!(diff.deleted, ["removed"]);
    }

    #[test]
    fn test_identical_snapshots_yield_empty_diff() {
        let g = graph(BASE);
        let checksums = compute_checksums(&g);
        assert!(detect_changes(&checksums, &checksums).is_empty());
    }
}
