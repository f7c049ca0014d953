//! Versioned schema
//!
//! The version lives in `PRAGMA user_version`. Each migration runs inside one
//! transaction together with the version bump, so a crash mid-migration leaves
//! the previous version intact.

use rusqlite::Connection;
use tracing::{debug, info};

use crate::error::{Result, SentinelError};

/// Ordered migrations. Index `i` upgrades version `i` to `i + 1`.
const MIGRATIONS: &[&str] = &[
    // v1: patterns, category stats, rollback log, watch state, file registry
    r#"
    CREATE TABLE IF NOT EXISTS patterns (
        signal_key TEXT NOT NULL,
        category TEXT NOT NULL,
        occurrence_count INTEGER NOT NULL DEFAULT 0,
        confidence_contribution REAL NOT NULL DEFAULT 0,
        updated_at INTEGER NOT NULL,
        PRIMARY KEY (signal_key, category)
    );
    CREATE INDEX IF NOT EXISTS idx_patterns_category ON patterns(category);

    CREATE TABLE IF NOT EXISTS category_stats (
        category TEXT PRIMARY KEY,
        classifications INTEGER NOT NULL DEFAULT 0,
        corrections_in INTEGER NOT NULL DEFAULT 0,
        corrections_out INTEGER NOT NULL DEFAULT 0,
        verified_examples INTEGER NOT NULL DEFAULT 0,
        last_seen_at INTEGER NOT NULL
    );

    CREATE TABLE IF NOT EXISTS operations (
        operation_id INTEGER PRIMARY KEY AUTOINCREMENT,
        op_type TEXT NOT NULL,
        original_path TEXT NOT NULL,
        new_path TEXT NOT NULL,
        fingerprint TEXT NOT NULL,
        size INTEGER NOT NULL,
        timestamp INTEGER NOT NULL,
        confidence REAL NOT NULL,
        status TEXT NOT NULL,
        reverses INTEGER REFERENCES operations(operation_id),
        undone_at INTEGER
    );
    CREATE INDEX IF NOT EXISTS idx_operations_timestamp ON operations(timestamp);
    CREATE INDEX IF NOT EXISTS idx_operations_status ON operations(status);

    CREATE TABLE IF NOT EXISTS watch_entries (
        path TEXT PRIMARY KEY,
        watch_root TEXT NOT NULL,
        first_seen_at INTEGER NOT NULL,
        cooldown_expires_at INTEGER NOT NULL,
        modified_at INTEGER NOT NULL,
        size INTEGER NOT NULL,
        fingerprint TEXT,
        state TEXT NOT NULL,
        last_evaluated_at INTEGER
    );
    CREATE INDEX IF NOT EXISTS idx_watch_entries_root ON watch_entries(watch_root);

    CREATE TABLE IF NOT EXISTS files (
        path TEXT PRIMARY KEY,
        fingerprint TEXT NOT NULL,
        size INTEGER NOT NULL,
        modified_at INTEGER NOT NULL,
        status TEXT NOT NULL,
        updated_at INTEGER NOT NULL
    );
    CREATE INDEX IF NOT EXISTS idx_files_fingerprint ON files(fingerprint);
    "#,
    // v2: contents whose unconfirmed classification already counted once
    r#"
    CREATE TABLE IF NOT EXISTS reinforced_contents (
        fingerprint TEXT PRIMARY KEY,
        category TEXT NOT NULL,
        reinforced_at INTEGER NOT NULL
    );
    "#,
];

/// Schema version this build writes
pub const SCHEMA_VERSION: u32 = MIGRATIONS.len() as u32;

pub fn current_version(conn: &Connection) -> Result<u32> {
    let version: i64 = conn.query_row("PRAGMA user_version", [], |row| row.get(0))?;
    Ok(version as u32)
}

/// Bring the database up to [`SCHEMA_VERSION`]
///
/// Refuses databases written by a newer build rather than guessing at their
/// layout.
pub fn migrate(conn: &mut Connection) -> Result<()> {
    let version = current_version(conn)?;

    if version > SCHEMA_VERSION {
        return Err(SentinelError::Storage(format!(
            "Database schema version {} is newer than supported version {}",
            version, SCHEMA_VERSION
        )));
    }

    for (index, sql) in MIGRATIONS.iter().enumerate().skip(version as usize) {
        let target = index as u32 + 1;
        let tx = conn.transaction()?;
        tx.execute_batch(sql)?;
        tx.pragma_update(None, "user_version", target)?;
        tx.commit()?;
        info!(version = target, "Applied schema migration");
    }

    debug!(version = SCHEMA_VERSION, "Schema up to date");
    Ok(())
}
