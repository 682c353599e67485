use std::time::Duration;

use chrono::Utc;
use rusqlite::types::Type;
use rusqlite::{OptionalExtension, Row, TransactionBehavior, params};

use super::JobQueue;
use super::sqlite::{SqliteStore, format_datetime, now, parse_datetime, parse_optional_datetime};
use crate::error::{Error, Result};
use crate::types::*;

const MAX_BACKOFF_SECS: i64 = 3600;

const JOB_COLUMNS: &str = "id, job_type, registry_name, repository, tag_ref, status, priority,
    attempts, max_attempts, next_retry_at, backoff_seconds, error_message,
    created_at, updated_at, started_at, completed_at";

/// Retry delay after the given number of attempts: 1, 2, 4, ... seconds,
/// capped at one hour.
pub fn backoff_seconds(attempts: i64) -> i64 {
    let exp = (attempts - 1).clamp(0, 12) as u32;
    (1i64 << exp).min(MAX_BACKOFF_SECS)
}

fn unknown_value(idx: usize, value: &str) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, format!("unknown value '{value}'").into())
}

fn non_empty(s: String) -> Option<String> {
    if s.is_empty() { None } else { Some(s) }
}

fn job_from_row(row: &Row<'_>) -> rusqlite::Result<SyncJob> {
    let job_type: String = row.get(1)?;
    let status: String = row.get(5)?;
    Ok(SyncJob {
        id: row.get(0)?,
        job_type: JobType::parse(&job_type).ok_or_else(|| unknown_value(1, &job_type))?,
        registry_name: row.get(2)?,
        repository: non_empty(row.get(3)?),
        tag_ref: non_empty(row.get(4)?),
        status: JobStatus::parse(&status).ok_or_else(|| unknown_value(5, &status))?,
        priority: row.get(6)?,
        attempts: row.get(7)?,
        max_attempts: row.get(8)?,
        next_retry_at: parse_optional_datetime(row.get(9)?),
        backoff_seconds: row.get(10)?,
        error_message: row.get(11)?,
        created_at: parse_datetime(&row.get::<_, String>(12)?),
        updated_at: parse_datetime(&row.get::<_, String>(13)?),
        started_at: parse_optional_datetime(row.get(14)?),
        completed_at: parse_optional_datetime(row.get(15)?),
    })
}

impl JobQueue for SqliteStore {
    fn enqueue_job(&self, job: &NewJob) -> Result<bool> {
        let now = now();
        // A settled row (completed, or out of attempts) is revived; anything
        // still in flight wins and the call is a no-op.
        let changed = self.conn().execute(
            "INSERT INTO sync_jobs (job_type, registry_name, repository, tag_ref, status,
                priority, max_attempts, next_retry_at, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, 'pending', ?5, ?6, ?7, ?7, ?7)
             ON CONFLICT(job_type, registry_name, repository, tag_ref) DO UPDATE SET
                status = 'pending',
                priority = excluded.priority,
                attempts = 0,
                max_attempts = excluded.max_attempts,
                next_retry_at = excluded.next_retry_at,
                backoff_seconds = 0,
                error_message = NULL,
                started_at = NULL,
                completed_at = NULL,
                updated_at = excluded.updated_at
             WHERE sync_jobs.status = 'completed'
                OR (sync_jobs.status = 'failed' AND sync_jobs.next_retry_at IS NULL)",
            params![
                job.job_type.as_str(),
                job.registry_name,
                job.repository.as_deref().unwrap_or(""),
                job.tag_ref.as_deref().unwrap_or(""),
                job.priority,
                job.max_attempts.max(1),
                now,
            ],
        )?;
        Ok(changed > 0)
    }

    fn dequeue_job(&self) -> Result<Option<SyncJob>> {
        let conn = self.conn();
        conn.query_row(
            &format!(
                "UPDATE sync_jobs
                 SET status = 'running', attempts = attempts + 1, started_at = ?1, updated_at = ?1
                 WHERE id = (
                    SELECT id FROM sync_jobs
                    WHERE status = 'pending'
                       OR (status = 'failed' AND next_retry_at IS NOT NULL AND next_retry_at <= ?1)
                    ORDER BY priority DESC, next_retry_at ASC, created_at ASC, id ASC
                    LIMIT 1
                 )
                 RETURNING {JOB_COLUMNS}"
            ),
            params![now()],
            job_from_row,
        )
        .optional()
        .map_err(Error::from)
    }

    fn complete_job(&self, id: i64) -> Result<()> {
        let now = now();
        let updated = self.conn().execute(
            "UPDATE sync_jobs
             SET status = 'completed', next_retry_at = NULL, completed_at = ?2, updated_at = ?2
             WHERE id = ?1",
            params![id, now],
        )?;
        if updated == 0 {
            return Err(Error::NotFound);
        }
        Ok(())
    }

    fn fail_job(&self, id: i64, message: &str) -> Result<()> {
        let mut conn = self.conn();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let (attempts, max_attempts): (i64, i64) = tx
            .query_row(
                "SELECT attempts, max_attempts FROM sync_jobs WHERE id = ?1",
                params![id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?
            .ok_or(Error::NotFound)?;

        let now = Utc::now();
        if attempts >= max_attempts {
            tx.execute(
                "UPDATE sync_jobs
                 SET status = 'failed', next_retry_at = NULL, error_message = ?2, updated_at = ?3
                 WHERE id = ?1",
                params![id, message, format_datetime(&now)],
            )?;
        } else {
            let backoff = backoff_seconds(attempts);
            let next_retry_at = now + chrono::Duration::seconds(backoff);
            tx.execute(
                "UPDATE sync_jobs
                 SET status = 'failed', next_retry_at = ?2, backoff_seconds = ?3,
                     error_message = ?4, updated_at = ?5
                 WHERE id = ?1",
                params![
                    id,
                    format_datetime(&next_retry_at),
                    backoff,
                    message,
                    format_datetime(&now)
                ],
            )?;
        }

        tx.commit()?;
        Ok(())
    }

    fn delete_completed_jobs(&self, older_than: Duration) -> Result<usize> {
        let age = chrono::Duration::from_std(older_than).unwrap_or(chrono::Duration::MAX);
        let cutoff = Utc::now()
            .checked_sub_signed(age)
            .unwrap_or(chrono::DateTime::<Utc>::MIN_UTC);
        let deleted = self.conn().execute(
            "DELETE FROM sync_jobs WHERE status = 'completed' AND completed_at < ?1",
            params![format_datetime(&cutoff)],
        )?;
        Ok(deleted)
    }

    fn get_job(&self, id: i64) -> Result<Option<SyncJob>> {
        let conn = self.conn();
        conn.query_row(
            &format!("SELECT {JOB_COLUMNS} FROM sync_jobs WHERE id = ?1"),
            params![id],
            job_from_row,
        )
        .optional()
        .map_err(Error::from)
    }

    fn count_jobs_by_status(&self, status: JobStatus) -> Result<i64> {
        let count = self.conn().query_row(
            "SELECT COUNT(*) FROM sync_jobs WHERE status = ?1",
            params![status.as_str()],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    fn list_dead_jobs(&self) -> Result<Vec<SyncJob>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {JOB_COLUMNS} FROM sync_jobs
             WHERE status = 'failed' AND next_retry_at IS NULL
             ORDER BY updated_at DESC, id DESC"
        ))?;
        let rows = stmt.query_map([], job_from_row)?;

        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Error::from)
    }
}
