//! Row mapping and statements, one group per table
//!
//! Functions take a `&Connection` so they run equally on a plain connection
//! or inside a transaction.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::{Path, PathBuf};

use crate::error::{Result, SentinelError};
use crate::models::{
    CategoryStats, FileDescriptor, FileStatus, Operation, OperationStatus, OperationType,
    Pattern, WatchEntry, WatchState,
};

pub(crate) fn to_millis(at: DateTime<Utc>) -> i64 {
    at.timestamp_millis()
}

pub(crate) fn from_millis(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or_default()
}

fn path_text(path: &Path) -> String {
    path.to_string_lossy().to_string()
}

fn corrupt(what: &str, value: &str) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        0,
        rusqlite::types::Type::Text,
        format!("unknown {}: {}", what, value).into(),
    )
}

// ============ Patterns ============

fn pattern_from_row(row: &Row<'_>) -> rusqlite::Result<Pattern> {
    Ok(Pattern {
        signal_key: row.get(0)?,
        category: row.get(1)?,
        occurrence_count: row.get::<_, i64>(2)?.max(0) as u64,
        confidence_contribution: row.get(3)?,
        updated_at: from_millis(row.get(4)?),
    })
}

pub fn load_patterns(conn: &Connection) -> Result<Vec<Pattern>> {
    let mut stmt = conn.prepare(
        "SELECT signal_key, category, occurrence_count, confidence_contribution, updated_at
         FROM patterns ORDER BY signal_key, category",
    )?;
    let rows = stmt.query_map([], pattern_from_row)?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

pub fn upsert_pattern(conn: &Connection, pattern: &Pattern) -> Result<()> {
    conn.execute(
        r#"
        INSERT INTO patterns (signal_key, category, occurrence_count, confidence_contribution, updated_at)
        VALUES (?1, ?2, ?3, ?4, ?5)
        ON CONFLICT(signal_key, category) DO UPDATE SET
            occurrence_count = excluded.occurrence_count,
            confidence_contribution = excluded.confidence_contribution,
            updated_at = excluded.updated_at
        "#,
        params![
            pattern.signal_key,
            pattern.category,
            pattern.occurrence_count as i64,
            pattern.confidence_contribution,
            to_millis(pattern.updated_at),
        ],
    )?;
    Ok(())
}

pub fn load_reinforced(conn: &Connection) -> Result<Vec<String>> {
    let mut stmt = conn.prepare("SELECT fingerprint FROM reinforced_contents")?;
    let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

pub fn insert_reinforced(
    conn: &Connection,
    fingerprint: &str,
    category: &str,
    at: DateTime<Utc>,
) -> Result<()> {
    conn.execute(
        "INSERT OR IGNORE INTO reinforced_contents (fingerprint, category, reinforced_at)
         VALUES (?1, ?2, ?3)",
        params![fingerprint, category, to_millis(at)],
    )?;
    Ok(())
}

fn stats_from_row(row: &Row<'_>) -> rusqlite::Result<CategoryStats> {
    Ok(CategoryStats {
        category: row.get(0)?,
        classifications: row.get::<_, i64>(1)?.max(0) as u64,
        corrections_in: row.get::<_, i64>(2)?.max(0) as u64,
        corrections_out: row.get::<_, i64>(3)?.max(0) as u64,
        verified_examples: row.get::<_, i64>(4)?.max(0) as u64,
        last_seen_at: from_millis(row.get(5)?),
    })
}

pub fn load_category_stats(conn: &Connection) -> Result<Vec<CategoryStats>> {
    let mut stmt = conn.prepare(
        "SELECT category, classifications, corrections_in, corrections_out, verified_examples, last_seen_at
         FROM category_stats ORDER BY category",
    )?;
    let rows = stmt.query_map([], stats_from_row)?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

pub fn upsert_category_stats(conn: &Connection, stats: &CategoryStats) -> Result<()> {
    conn.execute(
        r#"
        INSERT INTO category_stats
            (category, classifications, corrections_in, corrections_out, verified_examples, last_seen_at)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6)
        ON CONFLICT(category) DO UPDATE SET
            classifications = excluded.classifications,
            corrections_in = excluded.corrections_in,
            corrections_out = excluded.corrections_out,
            verified_examples = excluded.verified_examples,
            last_seen_at = excluded.last_seen_at
        "#,
        params![
            stats.category,
            stats.classifications as i64,
            stats.corrections_in as i64,
            stats.corrections_out as i64,
            stats.verified_examples as i64,
            to_millis(stats.last_seen_at),
        ],
    )?;
    Ok(())
}

// ============ Operations ============

const OPERATION_COLUMNS: &str = "operation_id, op_type, original_path, new_path, fingerprint, size, \
     timestamp, confidence, status, reverses, undone_at";

fn operation_from_row(row: &Row<'_>) -> rusqlite::Result<Operation> {
    let op_type: String = row.get(1)?;
    let status: String = row.get(8)?;
    Ok(Operation {
        operation_id: row.get::<_, i64>(0)? as u64,
        op_type: OperationType::parse(&op_type).ok_or_else(|| corrupt("op_type", &op_type))?,
        original_path: PathBuf::from(row.get::<_, String>(2)?),
        new_path: PathBuf::from(row.get::<_, String>(3)?),
        fingerprint: row.get(4)?,
        size: row.get::<_, i64>(5)?.max(0) as u64,
        timestamp: from_millis(row.get(6)?),
        confidence: row.get(7)?,
        status: OperationStatus::parse(&status).ok_or_else(|| corrupt("status", &status))?,
        reverses: row.get::<_, Option<i64>>(9)?.map(|id| id as u64),
        undone_at: row.get::<_, Option<i64>>(10)?.map(from_millis),
    })
}

/// Append an entry and return the assigned id. `operation_id` on the input is
/// ignored.
pub fn insert_operation(conn: &Connection, op: &Operation) -> Result<u64> {
    conn.execute(
        r#"
        INSERT INTO operations
            (op_type, original_path, new_path, fingerprint, size, timestamp, confidence, status, reverses, undone_at)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
        "#,
        params![
            op.op_type.as_str(),
            path_text(&op.original_path),
            path_text(&op.new_path),
            op.fingerprint,
            op.size as i64,
            to_millis(op.timestamp),
            op.confidence,
            op.status.as_str(),
            op.reverses.map(|id| id as i64),
            op.undone_at.map(to_millis),
        ],
    )?;
    Ok(conn.last_insert_rowid() as u64)
}

/// Flip an active entry to undone. Returns false if it was not active.
pub fn mark_operation_undone(conn: &Connection, id: u64, at: DateTime<Utc>) -> Result<bool> {
    let changed = conn.execute(
        "UPDATE operations SET status = 'undone', undone_at = ?2 WHERE operation_id = ?1 AND status = 'active'",
        params![id as i64, to_millis(at)],
    )?;
    Ok(changed == 1)
}

pub fn get_operation(conn: &Connection, id: u64) -> Result<Option<Operation>> {
    let sql = format!("SELECT {} FROM operations WHERE operation_id = ?1", OPERATION_COLUMNS);
    Ok(conn
        .query_row(&sql, [id as i64], operation_from_row)
        .optional()?)
}

pub fn load_operations(conn: &Connection) -> Result<Vec<Operation>> {
    let sql = format!("SELECT {} FROM operations ORDER BY operation_id", OPERATION_COLUMNS);
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map([], operation_from_row)?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

// ============ Watch entries ============

fn watch_entry_from_row(row: &Row<'_>) -> rusqlite::Result<WatchEntry> {
    let state: String = row.get(7)?;
    Ok(WatchEntry {
        path: PathBuf::from(row.get::<_, String>(0)?),
        watch_root: PathBuf::from(row.get::<_, String>(1)?),
        first_seen_at: from_millis(row.get(2)?),
        cooldown_expires_at: from_millis(row.get(3)?),
        modified_at: from_millis(row.get(4)?),
        size: row.get::<_, i64>(5)?.max(0) as u64,
        fingerprint: row.get(6)?,
        state: WatchState::parse(&state).ok_or_else(|| corrupt("watch state", &state))?,
        last_evaluated_at: row.get::<_, Option<i64>>(8)?.map(from_millis),
    })
}

pub fn load_watch_entries(conn: &Connection, watch_root: &Path) -> Result<Vec<WatchEntry>> {
    let mut stmt = conn.prepare(
        "SELECT path, watch_root, first_seen_at, cooldown_expires_at, modified_at, size,
                fingerprint, state, last_evaluated_at
         FROM watch_entries WHERE watch_root = ?1 ORDER BY path",
    )?;
    let rows = stmt.query_map([path_text(watch_root)], watch_entry_from_row)?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

/// Replace every persisted entry of `watch_root` with `entries`
pub fn replace_watch_entries(
    conn: &Connection,
    watch_root: &Path,
    entries: &[WatchEntry],
) -> Result<()> {
    conn.execute(
        "DELETE FROM watch_entries WHERE watch_root = ?1",
        [path_text(watch_root)],
    )?;

    let mut stmt = conn.prepare(
        r#"
        INSERT OR REPLACE INTO watch_entries
            (path, watch_root, first_seen_at, cooldown_expires_at, modified_at, size,
             fingerprint, state, last_evaluated_at)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
        "#,
    )?;
    for entry in entries.iter().filter(|e| !e.state.is_terminal()) {
        stmt.execute(params![
            path_text(&entry.path),
            path_text(watch_root),
            to_millis(entry.first_seen_at),
            to_millis(entry.cooldown_expires_at),
            to_millis(entry.modified_at),
            entry.size as i64,
            entry.fingerprint,
            entry.state.as_str(),
            entry.last_evaluated_at.map(to_millis),
        ])?;
    }
    Ok(())
}

// ============ File registry ============

fn file_from_row(row: &Row<'_>) -> rusqlite::Result<FileDescriptor> {
    let status: String = row.get(4)?;
    Ok(FileDescriptor {
        path: PathBuf::from(row.get::<_, String>(0)?),
        fingerprint: row.get(1)?,
        size: row.get::<_, i64>(2)?.max(0) as u64,
        modified_at: from_millis(row.get(3)?),
        status: FileStatus::parse(&status).ok_or_else(|| corrupt("file status", &status))?,
    })
}

pub fn upsert_file(conn: &Connection, file: &FileDescriptor) -> Result<()> {
    conn.execute(
        r#"
        INSERT INTO files (path, fingerprint, size, modified_at, status, updated_at)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6)
        ON CONFLICT(path) DO UPDATE SET
            fingerprint = excluded.fingerprint,
            size = excluded.size,
            modified_at = excluded.modified_at,
            status = excluded.status,
            updated_at = excluded.updated_at
        "#,
        params![
            path_text(&file.path),
            file.fingerprint,
            file.size as i64,
            to_millis(file.modified_at),
            file.status.as_str(),
            to_millis(Utc::now()),
        ],
    )?;
    Ok(())
}

/// Register a file seen on disk without touching its lifecycle status
pub fn register_file(conn: &Connection, file: &FileDescriptor) -> Result<()> {
    conn.execute(
        r#"
        INSERT INTO files (path, fingerprint, size, modified_at, status, updated_at)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6)
        ON CONFLICT(path) DO UPDATE SET
            fingerprint = excluded.fingerprint,
            size = excluded.size,
            modified_at = excluded.modified_at,
            updated_at = excluded.updated_at
        "#,
        params![
            path_text(&file.path),
            file.fingerprint,
            file.size as i64,
            to_millis(file.modified_at),
            file.status.as_str(),
            to_millis(Utc::now()),
        ],
    )?;
    Ok(())
}

pub fn get_file(conn: &Connection, path: &Path) -> Result<Option<FileDescriptor>> {
    Ok(conn
        .query_row(
            "SELECT path, fingerprint, size, modified_at, status FROM files WHERE path = ?1",
            [path_text(path)],
            file_from_row,
        )
        .optional()?)
}

pub fn files_by_status(conn: &Connection, status: FileStatus) -> Result<Vec<FileDescriptor>> {
    let mut stmt = conn.prepare(
        "SELECT path, fingerprint, size, modified_at, status FROM files WHERE status = ?1 ORDER BY path",
    )?;
    let rows = stmt.query_map([status.as_str()], file_from_row)?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

/// Record that a file moved from `from` to `to` with a new status
///
/// The old row is kept as a tombstone (status `duplicate_removed` for dedup,
/// otherwise the row is re-keyed to the new location).
pub fn move_file_record(
    conn: &Connection,
    from: &Path,
    to: &Path,
    fingerprint: &str,
    size: u64,
    status: FileStatus,
) -> Result<()> {
    let existing = get_file(conn, from)?;
    let modified_at = existing
        .as_ref()
        .map(|f| f.modified_at)
        .unwrap_or_else(Utc::now);

    if status == FileStatus::DuplicateRemoved {
        upsert_file(
            conn,
            &FileDescriptor {
                path: from.to_path_buf(),
                fingerprint: fingerprint.to_string(),
                size,
                modified_at,
                status,
            },
        )?;
        return Ok(());
    }

    conn.execute("DELETE FROM files WHERE path = ?1", [path_text(from)])?;
    upsert_file(
        conn,
        &FileDescriptor {
            path: to.to_path_buf(),
            fingerprint: fingerprint.to_string(),
            size,
            modified_at,
            status,
        },
    )
}

pub(crate) fn not_found(what: &str, id: impl std::fmt::Display) -> SentinelError {
    SentinelError::NotFound(format!("{} {}", what, id))
}
