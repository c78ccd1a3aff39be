//! nodemirror - mirror hierarchical graph exports into a queryable SQLite index
//!
//! This crate is the synchronization/indexing engine: it parses a full
//! export snapshot of a document graph, diffs it against the previously
//! synced state, and applies the delta to a normalized SQLite store with
//! full-text search and derived type/field metadata, as one transaction.
//!
//! # Architecture
//!
//! - [`export`] - Raw export document types and file loading
//! - [`graph`] - In-memory graph with structural tuple classification
//! - [`checksum`] - Content checksums and change detection
//! - [`storage`] - SQLite store, schema, migrations, retry wrapper
//! - [`sync`] - The sync engine plus field and supertag extractors
//! - [`config`] - Store path resolution
//! - [`error`] - Error types and handling
//!
//! Command-line handling, the mutation API client, the embedding
//! pipeline, and export-file watching are separate collaborators built on
//! top of this library.

#![forbid(unsafe_code)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod checksum;
pub mod config;
pub mod error;
pub mod export;
pub mod graph;
pub mod storage;
pub mod sync;

pub use error::{Error, Result};
pub use storage::Store;
pub use sync::{SyncEngine, SyncOptions, SyncStats};
