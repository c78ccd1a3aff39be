//! Raw export document types.
//!
//! An export is a single JSON snapshot of the source application's node
//! graph: a flat `docs` list of nodes with a loose property bag and an
//! optional child-id list. Everything structural (tags, fields, inheritance)
//! is encoded through generic node+children shapes and recovered later by
//! the graph builder.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// A full export snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportDocument {
    /// Format version stamped by the exporter. Absent in old exports.
    #[serde(rename = "formatVersion", default)]
    pub format_version: u32,
    /// Every node in the snapshot, in export order.
    pub docs: Vec<RawNode>,
}

/// One exported node record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawNode {
    pub id: String,
    #[serde(default)]
    pub props: NodeProps,
    /// Structural child ids, in declaration order.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub children: Option<Vec<String>>,
}

/// The property bag of an exported node.
///
/// Only the fields the engine interprets are named; everything else is
/// preserved opaquely in `extra` so the raw payload round-trips byte-stable
/// into the `nodes` table.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NodeProps {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Creation timestamp, Unix milliseconds. Defaults to 0 when absent.
    #[serde(default)]
    pub created: i64,
    /// Modification timestamps, oldest first.
    #[serde(rename = "modifiedTs", default, skip_serializing_if = "Option::is_none")]
    pub modified_ts: Option<Vec<i64>>,
    /// Completion timestamp for done-able nodes.
    #[serde(rename = "_done", default, skip_serializing_if = "Option::is_none")]
    pub done: Option<i64>,
    #[serde(rename = "_docType", default, skip_serializing_if = "Option::is_none")]
    pub doc_type: Option<String>,
    #[serde(rename = "_trash", default, skip_serializing_if = "Option::is_none")]
    pub trash: Option<bool>,
    #[serde(rename = "_color", default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    /// Uninterpreted properties, kept for the raw payload.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl RawNode {
    /// Whether this node is flagged as trashed and must be excluded from
    /// the primary graph.
    #[must_use]
    pub fn is_trashed(&self) -> bool {
        self.props.trash == Some(true) || self.props.doc_type.as_deref() == Some("trash")
    }

    /// First modification timestamp, if any.
    #[must_use]
    pub fn first_modified(&self) -> Option<i64> {
        self.props.modified_ts.as_ref().and_then(|ts| ts.first().copied())
    }
}

/// Load and parse an export file.
///
/// A missing file or malformed JSON is a parse error: fatal, surfaced to
/// the caller before any transaction opens.
///
/// # Errors
///
/// Returns [`Error::ExportNotFound`] if the file does not exist and
/// [`Error::Parse`] if it is not a valid export document.
pub fn load_export(path: &Path) -> Result<ExportDocument> {
    if !path.exists() {
        return Err(Error::ExportNotFound {
            path: path.to_path_buf(),
        });
    }

    let file = File::open(path)?;
    let reader = BufReader::new(file);
    serde_json::from_reader(reader).map_err(|e| Error::Parse(e.to_string()))
}
