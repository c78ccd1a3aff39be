//! In-memory graph built from an export snapshot.
//!
//! The export reuses one generic node+children shape for type definitions,
//! field definitions, tag applications, and plain content. The builder
//! recovers the actual variant of every tuple by structural pattern
//! matching over system marker ids, so downstream extractors work on a
//! typed graph instead of raw trees.

mod refs;

pub use refs::{extract_references, Reference, ReferenceType};

use std::collections::{HashMap, HashSet};

use crate::export::{ExportDocument, RawNode};

/// Tuple associates a node with its applied type tags.
pub const TAG_NAME_MARKER: &str = "SYS_A13";
/// The tuple's parent is a type (supertag) definition.
pub const TYPE_MARKER: &str = "SYS_T01";
/// The tuple's parent is a field label definition.
pub const FIELD_MARKER: &str = "SYS_T02";
/// Tuple declares the parent types a supertag extends.
pub const EXTENDS_MARKER: &str = "SYS_A12";
/// Tuple declares a field label's data type.
pub const DATA_TYPE_MARKER: &str = "SYS_A61";

/// Variant of a node once classified by structural pattern matching.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NodeKind {
    /// Plain content (the default for anything unclassified).
    #[default]
    Content,
    /// Marks its parent as a supertag definition.
    TypeDefinitionTuple,
    /// Marks its parent as a field label.
    FieldDefinitionTuple,
    /// Applies one or more tags to its parent.
    TagApplicationTuple,
}

/// One node of the primary graph.
#[derive(Debug, Clone)]
pub struct GraphNode {
    pub id: String,
    pub name: Option<String>,
    /// Creation timestamp, Unix milliseconds.
    pub created: i64,
    /// First modification timestamp, if any.
    pub modified: Option<i64>,
    /// Completion timestamp, if any.
    pub done: Option<i64>,
    /// First structural parent; later edges never reassign it.
    pub parent_id: Option<String>,
    /// Structural children, trashed ids filtered out.
    pub children: Vec<String>,
    pub kind: NodeKind,
    /// The exported record, serialized back to JSON bytes.
    pub raw_payload: Vec<u8>,
}

/// A detected type-definition (supertag) tuple.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeTuple {
    pub tag_id: String,
    pub tag_name: String,
    pub color: Option<String>,
}

/// A detected field-label definition tuple.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldLabelTuple {
    pub field_label_id: String,
    pub field_name: String,
}

/// A tag applied to a data node through a tuple child.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagApplication {
    pub tuple_node_id: String,
    pub data_node_id: String,
    pub tag_id: String,
    pub tag_name: String,
}

/// The primary graph plus every derived collection the sync engine needs.
#[derive(Debug, Default)]
pub struct NodeGraph {
    nodes: HashMap<String, GraphNode>,
    /// Node ids in export order, for deterministic iteration.
    order: Vec<String>,
    pub type_tuples: Vec<TypeTuple>,
    pub field_label_tuples: Vec<FieldLabelTuple>,
    pub tag_applications: Vec<TagApplication>,
    pub references: Vec<Reference>,
    /// Ids of trashed nodes, excluded from everything above.
    pub trash: HashSet<String>,
    /// Applied tag ids per data node, for checksum computation.
    tags_by_node: HashMap<String, Vec<String>>,
    type_ids: HashSet<String>,
    field_label_ids: HashSet<String>,
}

impl NodeGraph {
    /// Build the graph from a parsed export.
    ///
    /// Runs in four passes: trash collection, node construction, parent
    /// assignment, and tuple classification + reference extraction.
    #[must_use]
    pub fn build(export: &ExportDocument) -> Self {
        let mut graph = Self::default();

        for doc in &export.docs {
            if doc.is_trashed() {
                graph.trash.insert(doc.id.clone());
            }
        }

        for doc in &export.docs {
            if graph.trash.contains(&doc.id) || graph.nodes.contains_key(&doc.id) {
                continue;
            }
            let node = graph.make_node(doc);
            graph.order.push(doc.id.clone());
            graph.nodes.insert(doc.id.clone(), node);
        }

        graph.assign_parents();
        graph.classify_tuples();
        graph.collect_references();
        graph
    }

    fn make_node(&self, doc: &RawNode) -> GraphNode {
        let children = doc
            .children
            .clone()
            .unwrap_or_default()
            .into_iter()
            .filter(|c| !self.trash.contains(c))
            .collect();

        GraphNode {
            id: doc.id.clone(),
            name: doc.props.name.clone(),
            created: doc.props.created,
            modified: doc.first_modified(),
            done: doc.props.done,
            parent_id: None,
            children,
            kind: NodeKind::Content,
            raw_payload: serde_json::to_vec(doc).unwrap_or_default(),
        }
    }

    /// First structural edge wins; a node keeps the parent of the first
    /// place it appears as a child, even if the source multi-parents it.
    fn assign_parents(&mut self) {
        let mut parents: HashMap<String, String> = HashMap::new();
        for id in &self.order {
            let node = &self.nodes[id];
            for child in &node.children {
                parents.entry(child.clone()).or_insert_with(|| id.clone());
            }
        }
        for (child, parent) in parents {
            if let Some(node) = self.nodes.get_mut(&child) {
                node.parent_id = Some(parent);
            }
        }
    }

    /// Detect type-definition, field-definition, and tag-application
    /// tuples among every node's structural children.
    fn classify_tuples(&mut self) {
        let mut kinds: Vec<(String, NodeKind)> = Vec::new();
        let mut seen_apps: HashSet<(String, String)> = HashSet::new();

        for parent_id in &self.order {
            let parent = &self.nodes[parent_id];
            for child_id in &parent.children {
                let Some(child) = self.nodes.get(child_id) else {
                    continue;
                };
                if !child.children.iter().any(|g| g == TAG_NAME_MARKER) {
                    continue;
                }

                if child.children.iter().any(|g| g == TYPE_MARKER) {
                    kinds.push((child_id.clone(), NodeKind::TypeDefinitionTuple));
                    if self.type_ids.insert(parent_id.clone()) {
                        self.type_tuples.push(TypeTuple {
                            tag_id: parent_id.clone(),
                            tag_name: display_name(parent),
                            color: color_of(parent),
                        });
                    }
                } else if child.children.iter().any(|g| g == FIELD_MARKER) {
                    kinds.push((child_id.clone(), NodeKind::FieldDefinitionTuple));
                    if self.field_label_ids.insert(parent_id.clone()) {
                        self.field_label_tuples.push(FieldLabelTuple {
                            field_label_id: parent_id.clone(),
                            field_name: display_name(parent),
                        });
                    }
                } else {
                    kinds.push((child_id.clone(), NodeKind::TagApplicationTuple));
                    for grandchild in &child.children {
                        if grandchild == TAG_NAME_MARKER
                            || !seen_apps.insert((child_id.clone(), grandchild.clone()))
                        {
                            continue;
                        }
                        let tag_name = self
                            .nodes
                            .get(grandchild)
                            .map_or_else(|| grandchild.clone(), display_name);
                        self.tag_applications.push(TagApplication {
                            tuple_node_id: child_id.clone(),
                            data_node_id: parent_id.clone(),
                            tag_id: grandchild.clone(),
                            tag_name,
                        });
                        self.tags_by_node
                            .entry(parent_id.clone())
                            .or_default()
                            .push(grandchild.clone());
                    }
                }
            }
        }

        for (id, kind) in kinds {
            if let Some(node) = self.nodes.get_mut(&id) {
                node.kind = kind;
            }
        }
    }

    fn collect_references(&mut self) {
        let mut seen: HashSet<(String, String, ReferenceType)> = HashSet::new();
        for id in &self.order {
            let node = &self.nodes[id];
            let Some(name) = node.name.as_deref() else {
                continue;
            };
            for reference in extract_references(id, name, &self.nodes) {
                let key = (
                    reference.from_node.clone(),
                    reference.to_node.clone(),
                    reference.reference_type,
                );
                if seen.insert(key) {
                    self.references.push(reference);
                }
            }
        }
    }

    /// Node lookup by id. Trashed nodes are never present.
    #[must_use]
    pub fn node(&self, id: &str) -> Option<&GraphNode> {
        self.nodes.get(id)
    }

    /// Iterate nodes in export order.
    pub fn iter(&self) -> impl Iterator<Item = &GraphNode> {
        self.order.iter().map(|id| &self.nodes[id])
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.order.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Tag ids applied to a data node, in application order.
    #[must_use]
    pub fn applied_tags(&self, node_id: &str) -> &[String] {
        self.tags_by_node.get(node_id).map_or(&[], Vec::as_slice)
    }

    #[must_use]
    pub fn is_type_definition(&self, id: &str) -> bool {
        self.type_ids.contains(id)
    }

    #[must_use]
    pub fn is_field_label(&self, id: &str) -> bool {
        self.field_label_ids.contains(id)
    }

    /// Display name of a node, falling back to its id.
    #[must_use]
    pub fn name_of(&self, id: &str) -> String {
        self.nodes.get(id).map_or_else(|| id.to_string(), display_name)
    }
}

fn display_name(node: &GraphNode) -> String {
    node.name.clone().unwrap_or_else(|| node.id.clone())
}

fn color_of(node: &GraphNode) -> Option<String> {
    serde_json::from_slice::<crate::export::RawNode>(&node.raw_payload)
        .ok()
        .and_then(|raw| raw.props.color)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::export::ExportDocument;

    fn build(json: &str) -> NodeGraph {
        let export: ExportDocument = serde_json::from_str(json).unwrap();
        NodeGraph::build(&export)
    }

    #[test]
    fn test_type_definition_detection() {
        let graph = build(
            r##"{"docs":[
                {"id":"tag1","props":{"name":"project","_color":"#f00"},"children":["meta1"]},
                {"id":"meta1","props":{"_docType":"tuple"},"children":["SYS_A13","SYS_T01"]}
            ]}"##,
        );
        assert_eq!(graph.type_tuples.len(), 1);
        let t = &graph.type_tuples[0];
        assert_eq!(t.tag_id, "tag1");
        assert_eq!(t.tag_name, "project");
        assert_eq!(t.color.as_deref(), Some("#f00"));
        assert!(graph.is_type_definition("tag1"));
        assert_eq!(graph.node("meta1").unwrap().kind, NodeKind::TypeDefinitionTuple);
    }

    #[test]
    fn test_field_label_detection() {
        let graph = build(
            r#"{"docs":[
                {"id":"lbl1","props":{"name":"Due date"},"children":["meta1"]},
                {"id":"meta1","props":{},"children":["SYS_A13","SYS_T02"]}
            ]}"#,
        );
        assert_eq!(graph.field_label_tuples.len(), 1);
        assert_eq!(graph.field_label_tuples[0].field_name, "Due date");
        assert!(graph.is_field_label("lbl1"));
    }

    #[test]
    fn test_tag_application_detection() {
        let graph = build(
            r#"{"docs":[
                {"id":"tag1","props":{"name":"project"},"children":["meta1"]},
                {"id":"meta1","props":{},"children":["SYS_A13","SYS_T01"]},
                {"id":"data1","props":{"name":"Build the thing"},"children":["tuple1"]},
                {"id":"tuple1","props":{},"children":["SYS_A13","tag1"]}
            ]}"#,
        );
        assert_eq!(graph.tag_applications.len(), 1);
        let app = &graph.tag_applications[0];
        assert_eq!(app.data_node_id, "data1");
        assert_eq!(app.tag_id, "tag1");
        assert_eq!(app.tag_name, "project");
        assert_eq!(graph.applied_tags("data1"), ["tag1"]);
        assert_eq!(graph.node("tuple1").unwrap().kind, NodeKind::TagApplicationTuple);
    }

    #[test]
    fn test_multi_tag_tuple() {
        let graph = build(
            r#"{"docs":[
                {"id":"data1","props":{},"children":["tuple1"]},
                {"id":"tuple1","props":{},"children":["SYS_A13","tagA","tagB"]}
            ]}"#,
        );
        assert_eq!(graph.tag_applications.len(), 2);
        assert_eq!(graph.applied_tags("data1"), ["tagA", "tagB"]);
        // Unknown tag targets fall back to the raw id as name
        assert_eq!(graph.tag_applications[0].tag_name, "tagA");
    }

    #[test]
    fn test_first_parent_wins() {
        let graph = build(
            r#"{"docs":[
                {"id":"p1","props":{},"children":["c"]},
                {"id":"p2","props":{},"children":["c"]},
                {"id":"c","props":{}}
            ]}"#,
        );
        assert_eq!(graph.node("c").unwrap().parent_id.as_deref(), Some("p1"));
    }

    #[test]
    fn test_trashed_nodes_excluded() {
        let graph = build(
            r#"{"docs":[
                {"id":"a","props":{},"children":["gone","kept"]},
                {"id":"gone","props":{"_trash":true},"children":["tuple1"]},
                {"id":"tuple1","props":{},"children":["SYS_A13","tagX"]},
                {"id":"kept","props":{}}
            ]}"#,
        );
        assert!(graph.node("gone").is_none());
        assert!(graph.trash.contains("gone"));
        // The trashed node's tuple never produced a tag application
        assert!(graph.tag_applications.is_empty());
        // And it is filtered from its parent's child list
        assert_eq!(graph.node("a").unwrap().children, ["kept"]);
    }

    #[test]
    fn test_export_order_preserved() {
        let graph = build(
            r#"{"docs":[{"id":"z"},{"id":"a"},{"id":"m"}]}"#,
        );
        let ids: Vec<&str> = graph.iter().map(|n| n.id.as_str()).collect();
        assert_eq!(ids, ["z", "a", "m"]);
    }
}
