//! Sync result and option types.

use serde::Serialize;

/// Options controlling a sync run.
#[derive(Debug, Clone, Copy, Default)]
pub struct SyncOptions {
    /// Rebuild every derived table from scratch even when an incremental
    /// diff would be possible.
    pub force_full: bool,
}

/// Which strategy a sync run chose.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncMode {
    FullReindex,
    Incremental,
}

impl SyncMode {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::FullReindex => "full_reindex",
            Self::Incremental => "incremental",
        }
    }
}

/// Structured result of one sync run, returned to the caller for
/// reporting.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncStats {
    pub nodes_indexed: usize,
    pub nodes_added: usize,
    pub nodes_modified: usize,
    pub nodes_deleted: usize,
    pub supertags_indexed: usize,
    pub fields_indexed: usize,
    pub references_indexed: usize,
    pub tag_applications_indexed: usize,
    pub field_names_indexed: usize,
    pub field_values_indexed: usize,
    pub supertag_fields_extracted: usize,
    pub supertag_parents_extracted: usize,
    pub duration_ms: u64,
}

impl SyncStats {
    /// True when the run changed no node rows.
    #[must_use]
    pub fn is_noop(&self) -> bool {
        self.nodes_added == 0 && self.nodes_modified == 0 && self.nodes_deleted == 0
    }
}
