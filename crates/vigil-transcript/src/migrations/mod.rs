//! Schema migration runner for the transcript database.
//!
//! Migrations are embedded at compile time via [`include_str!`] and executed
//! in version order. Each migration runs inside a transaction; a failure
//! rolls back cleanly with no partial schema state. The `schema_version`
//! table tracks which migrations have been applied, so running the migrator
//! is idempotent (§6: "runs `PRAGMA user_version` style bookkeeping").

use rusqlite::Connection;
use tracing::{debug, info};

use crate::errors::{Result, TranscriptError};

struct Migration {
    version: u32,
    description: &'static str,
    sql: &'static str,
}

const MIGRATIONS: &[Migration] = &[Migration {
    version: 1,
    description: "Core schema — projects, sessions, items, links",
    sql: include_str!("v001_schema.sql"),
}];

/// Run all pending migrations on the given connection, returning the count applied.
///
/// # Errors
///
/// Returns [`TranscriptError::Migration`] if any migration SQL fails.
pub fn run_migrations(conn: &Connection) -> Result<u32> {
    ensure_version_table(conn)?;
    let current = current_version(conn)?;
    let mut applied = 0;

    for migration in MIGRATIONS {
        if migration.version <= current {
            debug!(version = migration.version, "migration already applied, skipping");
            continue;
        }
        info!(version = migration.version, description = migration.description, "applying migration");
        apply_migration(conn, migration)?;
        applied += 1;
    }

    if applied > 0 {
        info!(applied, "migrations complete");
    }
    Ok(applied)
}

/// Return the highest applied migration version, or 0 if none.
pub fn current_version(conn: &Connection) -> Result<u32> {
    let version: u32 = conn
        .query_row("SELECT COALESCE(MAX(version), 0) FROM schema_version", [], |row| row.get(0))
        .map_err(|e| TranscriptError::Migration {
            message: format!("failed to read schema_version: {e}"),
        })?;
    Ok(version)
}

fn ensure_version_table(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (
           version     INTEGER PRIMARY KEY,
           applied_at  TEXT    NOT NULL,
           description TEXT
         );",
    )
    .map_err(|e| TranscriptError::Migration {
        message: format!("failed to create schema_version table: {e}"),
    })?;
    Ok(())
}

fn apply_migration(conn: &Connection, migration: &Migration) -> Result<()> {
    let tx = conn.unchecked_transaction().map_err(|e| TranscriptError::Migration {
        message: format!("failed to open transaction for v{}: {e}", migration.version),
    })?;
    tx.execute_batch(migration.sql).map_err(|e| TranscriptError::Migration {
        message: format!("migration v{} failed: {e}", migration.version),
    })?;
    tx.execute(
        "INSERT INTO schema_version (version, applied_at, description) VALUES (?1, datetime('now'), ?2)",
        rusqlite::params![migration.version, migration.description],
    )
    .map_err(|e| TranscriptError::Migration {
        message: format!("failed to record v{}: {e}", migration.version),
    })?;
    tx.commit().map_err(|e| TranscriptError::Migration {
        message: format!("failed to commit v{}: {e}", migration.version),
    })?;
    Ok(())
}
