//! SQLite storage layer for the mirror store.
//!
//! This module provides the persistence layer using SQLite with:
//! - WAL mode for concurrent reads
//! - Idempotent schema application and additive migrations
//! - A retry wrapper for lock-contended writes
//!
//! # Submodules
//!
//! - [`schema`] - Database schema definitions
//! - [`migrations`] - Embedded additive migrations
//! - [`retry`] - Lock-contention retry with exponential backoff
//! - [`sqlite`] - Store implementation and read-side lookups

pub mod migrations;
pub mod retry;
pub mod schema;
pub mod sqlite;

pub use retry::{with_retry, RetryPolicy};
pub use sqlite::{Capabilities, FieldValueHit, NodeRow, Store, SyncMetadata};
