//! Export synchronization.
//!
//! Turns a freshly parsed export graph into an up-to-date relational
//! mirror:
//!
//! - **Engine**: full-reindex vs incremental decision, single-transaction
//!   apply, sync bookkeeping
//! - **Fields**: field-value extraction and data-type inference
//! - **Supertags**: field definitions, inheritance edges, ancestor queries
//!
//! # Example
//!
//! ```ignore
//! use nodemirror::storage::Store;
//! use nodemirror::sync::{SyncEngine, SyncOptions};
//!
//! let mut store = Store::open(&db_path)?;
//! let stats = SyncEngine::new().sync(&mut store, &export_path, SyncOptions::default())?;
//! println!("{} nodes ({} added)", stats.nodes_indexed, stats.nodes_added);
//! ```

mod engine;
pub mod fields;
pub mod supertags;
mod types;

pub use engine::SyncEngine;
pub use types::{SyncMode, SyncOptions, SyncStats};
