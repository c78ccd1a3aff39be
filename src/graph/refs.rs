//! Inline cross-reference extraction.
//!
//! Node text can embed reference spans of the form
//! `<span data-inlineref-node="TARGET_ID">…</span>`. A target that resolves
//! to a lookup node (`_docType == "reference"`) is followed one hop to the
//! lookup node's first child and recorded as an indirect reference.
//! Targets absent from the export are recorded as-is; dangling references
//! are not validated.

use std::collections::HashMap;

use once_cell::sync::Lazy;
use regex::Regex;

use super::GraphNode;

static INLINE_REF: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"data-inlineref-node="([^"]+)""#).expect("static pattern"));

/// How a reference target was reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReferenceType {
    /// Marker named the target directly.
    InlineRef,
    /// Marker named an intermediate lookup node.
    InlineRefIndirect,
}

impl ReferenceType {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::InlineRef => "inline_ref",
            Self::InlineRefIndirect => "inline_ref_indirect",
        }
    }
}

/// A directed inline cross-reference between two nodes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reference {
    pub from_node: String,
    pub to_node: String,
    pub reference_type: ReferenceType,
}

/// Extract every inline reference from one node's text.
#[must_use]
pub fn extract_references(
    from_node: &str,
    text: &str,
    nodes: &HashMap<String, GraphNode>,
) -> Vec<Reference> {
    INLINE_REF
        .captures_iter(text)
        .map(|cap| {
            let target = &cap[1];
            match nodes.get(target) {
                Some(node) if is_lookup_node(node) => {
                    let resolved = node
                        .children
                        .first()
                        .map_or_else(|| target.to_string(), Clone::clone);
                    Reference {
                        from_node: from_node.to_string(),
                        to_node: resolved,
                        reference_type: ReferenceType::InlineRefIndirect,
                    }
                }
                _ => Reference {
                    from_node: from_node.to_string(),
                    to_node: target.to_string(),
                    reference_type: ReferenceType::InlineRef,
                },
            }
        })
        .collect()
}

fn is_lookup_node(node: &GraphNode) -> bool {
    serde_json::from_slice::<crate::export::RawNode>(&node.raw_payload)
        .ok()
        .and_then(|raw| raw.props.doc_type)
        .is_some_and(|t| t == "reference")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::export::ExportDocument;
    use crate::graph::NodeGraph;

    fn graph_from(json: &str) -> NodeGraph {
        let export: ExportDocument = serde_json::from_str(json).unwrap();
        NodeGraph::build(&export)
    }

    #[test]
    fn test_direct_reference() {
        let graph = graph_from(
            r#"{"docs":[
                {"id":"a","props":{"name":"see <span data-inlineref-node=\"b\">target</span>"}},
                {"id":"b","props":{"name":"target"}}
            ]}"#,
        );
        assert_eq!(graph.references.len(), 1);
        let r = &graph.references[0];
        assert_eq!((r.from_node.as_str(), r.to_node.as_str()), ("a", "b"));
        assert_eq!(r.reference_type, ReferenceType::InlineRef);
    }

    #[test]
    fn test_indirect_reference_through_lookup_node() {
        let graph = graph_from(
            r#"{"docs":[
                {"id":"a","props":{"name":"see <span data-inlineref-node=\"lookup\">x</span>"}},
                {"id":"lookup","props":{"_docType":"reference"},"children":["real"]},
                {"id":"real","props":{"name":"the real target"}}
            ]}"#,
        );
        assert_eq!(graph.references.len(), 1);
        let r = &graph.references[0];
        assert_eq!(r.to_node, "real");
        assert_eq!(r.reference_type, ReferenceType::InlineRefIndirect);
    }

    #[test]
    fn test_dangling_reference_recorded() {
        let graph = graph_from(
            r#"{"docs":[
                {"id":"a","props":{"name":"<span data-inlineref-node=\"missing\">?</span>"}}
            ]}"#,
        );
        assert_eq!(graph.references.len(), 1);
        assert_eq!(graph.references[0].to_node, "missing");
        assert_eq!(graph.references[0].reference_type, ReferenceType::InlineRef);
    }

    #[test]
    fn test_multiple_and_duplicate_markers() {
        let graph = graph_from(
            r#"{"docs":[
                {"id":"a","props":{"name":"<span data-inlineref-node=\"b\">1</span> and <span data-inlineref-node=\"c\">2</span> and <span data-inlineref-node=\"b\">again</span>"}},
                {"id":"b","props":{}},
                {"id":"c","props":{}}
            ]}"#,
        );
        // Duplicates collapse to one row per (from, to, type)
        assert_eq!(graph.references.len(), 2);
    }

    #[test]
    fn test_plain_text_yields_nothing() {
        let graph = graph_from(r#"{"docs":[{"id":"a","props":{"name":"no markers here"}}]}"#);
        assert!(graph.references.is_empty());
    }
}
