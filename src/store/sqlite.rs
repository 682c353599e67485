use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{Connection, Transaction};

use super::Store;
use super::schema::SCHEMA;
use crate::error::Result;

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        if let Some(parent) = db_path.as_ref().parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(db_path)?;

        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.busy_timeout(BUSY_TIMEOUT)?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub(super) fn conn(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Returns a guard to the underlying database connection.
    /// This allows consuming applications to execute custom SQL.
    pub fn connection(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.conn()
    }
}

impl Store for SqliteStore {
    fn initialize(&self) -> Result<()> {
        self.conn().execute_batch(SCHEMA)?;
        Ok(())
    }
}

pub(super) fn parse_datetime(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .or_else(|_| {
            // Handle SQLite's default datetime format: "YYYY-MM-DD HH:MM:SS"
            chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S").map(|ndt| ndt.and_utc())
        })
        .unwrap_or_else(|e| {
            tracing::error!("Invalid datetime in database: '{}' - {}", s, e);
            Utc::now()
        })
}

pub(super) fn parse_optional_datetime(s: Option<String>) -> Option<DateTime<Utc>> {
    s.as_deref().map(parse_datetime)
}

/// Fixed-width RFC 3339 so stored timestamps compare correctly as text.
pub(super) fn format_datetime(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(super) fn now() -> String {
    format_datetime(&Utc::now())
}

/// Deletes manifests that no tag reaches, directly or through a tagged list.
/// Layers and list links go with them by cascade.
pub(super) fn delete_orphan_manifests(tx: &Transaction<'_>) -> Result<usize> {
    let deleted = tx.execute(
        "DELETE FROM manifests
         WHERE digest NOT IN (SELECT digest FROM tags)
           AND digest NOT IN (SELECT e.child_digest FROM manifest_list_entries e
                              JOIN tags t ON t.digest = e.list_digest)",
        [],
    )?;
    if deleted > 0 {
        repoint_list_digests(tx)?;
    }
    Ok(deleted)
}

/// Points `manifest_list_digest` at a list that still contains the manifest,
/// or clears it when none does.
pub(super) fn repoint_list_digests(tx: &Transaction<'_>) -> Result<()> {
    tx.execute(
        "UPDATE manifests SET manifest_list_digest =
            (SELECT e.list_digest FROM manifest_list_entries e
             WHERE e.child_digest = manifests.digest
             ORDER BY e.list_digest LIMIT 1)
         WHERE (manifest_list_digest IS NULL
                AND digest IN (SELECT child_digest FROM manifest_list_entries))
            OR (manifest_list_digest IS NOT NULL
                AND NOT EXISTS (SELECT 1 FROM manifest_list_entries e
                                WHERE e.child_digest = manifests.digest
                                  AND e.list_digest = manifests.manifest_list_digest))",
        [],
    )?;
    Ok(())
}
