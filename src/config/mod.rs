//! Configuration management.
//!
//! Resolves where the mirror store lives. The host process (CLI, MCP
//! server) owns user-facing configuration; this module only provides the
//! shared path-resolution ladder so every consumer lands on the same
//! database file.

use std::path::{Path, PathBuf};

/// Check if test mode is enabled.
///
/// Test mode is enabled by setting `NODEMIRROR_TEST_DB=1` (or any other
/// truthy value). This redirects all database operations to an isolated
/// test database.
#[must_use]
pub fn is_test_mode() -> bool {
    std::env::var("NODEMIRROR_TEST_DB")
        .map(|v| !v.is_empty() && v != "0" && v.to_lowercase() != "false")
        .unwrap_or(false)
}

/// Get the global nodemirror data directory.
#[must_use]
pub fn global_data_dir() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|b| b.home_dir().join(".nodemirror"))
}

/// Get the test database path, `~/.nodemirror/test/mirror.db`.
#[must_use]
pub fn test_db_path() -> Option<PathBuf> {
    global_data_dir().map(|dir| dir.join("test").join("mirror.db"))
}

/// Resolve the database path.
///
/// Priority:
/// 1. `explicit_path`, when the caller provides one
/// 2. `NODEMIRROR_TEST_DB` set → isolated test database
/// 3. `NODEMIRROR_DB` environment variable
/// 4. Global location: `~/.nodemirror/data/mirror.db`
#[must_use]
pub fn resolve_db_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return Some(path.to_path_buf());
    }

    if is_test_mode() {
        return test_db_path();
    }

    if let Ok(db_path) = std::env::var("NODEMIRROR_DB") {
        if !db_path.trim().is_empty() {
            return Some(PathBuf::from(db_path));
        }
    }

    global_data_dir().map(|dir| dir.join("data").join("mirror.db"))
}
