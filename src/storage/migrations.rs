//! Database migrations embedded at compile time.
//!
//! Migrations are sourced from `/migrations/` at the repo root and
//! embedded into the binary using `include_str!`. Every migration is
//! additive: new nullable columns, new tables, new indexes. Nothing here
//! ever drops or truncates existing rows.

use rusqlite::Connection;
use tracing::{info, warn};

use crate::error::{Error, Result};

/// A single migration with version identifier and SQL content.
struct Migration {
    version: &'static str,
    sql: &'static str,
}

/// All migrations in order, embedded at compile time.
///
/// Version names match the SQL filenames (without .sql extension).
/// The `schema_migrations` table tracks which have been applied.
const MIGRATIONS: &[Migration] = &[
    Migration {
        version: "001_add_done_state",
        sql: include_str!("../../migrations/001_add_done_state.sql"),
    },
    Migration {
        version: "002_add_field_target_types",
        sql: include_str!("../../migrations/002_add_field_target_types.sql"),
    },
    Migration {
        version: "003_add_node_checksums",
        sql: include_str!("../../migrations/003_add_node_checksums.sql"),
    },
    Migration {
        version: "004_field_values_fts",
        sql: include_str!("../../migrations/004_field_values_fts.sql"),
    },
];

/// Run all pending migrations on the database.
///
/// Migrations are applied in order. Already-applied migrations (tracked in
/// the `schema_migrations` table) are skipped. Idempotent and safe to call
/// on every open.
///
/// # Errors
///
/// Returns an error if a migration fails to apply. ALTER TABLE failures
/// for duplicate columns are logged and marked complete, since a fresh
/// database already has those columns from the base DDL.
pub fn run_migrations(conn: &Connection) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version TEXT PRIMARY KEY,
            applied_at INTEGER NOT NULL
        )",
        [],
    )?;

    let applied: std::collections::HashSet<String> = conn
        .prepare("SELECT version FROM schema_migrations")?
        .query_map([], |row| row.get(0))?
        .collect::<rusqlite::Result<_>>()?;

    for migration in MIGRATIONS {
        if applied.contains(migration.version) {
            continue;
        }

        info!(version = migration.version, "Applying migration");

        if let Err(e) = conn.execute_batch(migration.sql) {
            if e.to_string().contains("duplicate column name") {
                warn!(
                    version = migration.version,
                    "Migration partially applied (columns exist), marking complete"
                );
            } else {
                return Err(Error::Migration {
                    version: migration.version.to_string(),
                    source: e,
                });
            }
        }

        conn.execute(
            "INSERT INTO schema_migrations (version, applied_at) VALUES (?1, ?2)",
            rusqlite::params![migration.version, chrono::Utc::now().timestamp_millis()],
        )?;

        info!(version = migration.version, "Migration complete");
    }

    Ok(())
}
