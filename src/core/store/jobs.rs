use rusqlite::types::Type;
use rusqlite::{Connection, OptionalExtension, Row, params};
use tracing::debug;

use super::types::{DateRange, JobRecord, JobStatus, LedgerError};
use super::logs::insert_log;
use super::{Store, format_timestamp, now_timestamp, parse_timestamp};

pub const DEFAULT_JOB_DETAILS: &str = "No details provided";

const JOB_COLUMNS: &str = "id, operation_type, status, created_at, completed_at, details";

fn job_from_row(row: &Row<'_>) -> rusqlite::Result<JobRecord> {
    let status: String = row.get(2)?;
    let status = JobStatus::from_status(&status).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            2,
            Type::Text,
            format!("unknown job status '{}'", status).into(),
        )
    })?;
    let created_at: String = row.get(3)?;
    let completed_at: Option<String> = row.get(4)?;
    Ok(JobRecord {
        id: row.get(0)?,
        operation_type: row.get(1)?,
        status,
        created_at: parse_timestamp(3, &created_at)?,
        completed_at: completed_at
            .as_deref()
            .map(|raw| parse_timestamp(4, raw))
            .transpose()?,
        details: row.get(5)?,
    })
}

fn transition(db: &Connection, job_id: i64, status: JobStatus) -> Result<(), LedgerError> {
    let current: Option<String> = db
        .query_row(
            "SELECT status FROM jobs WHERE id = ?1",
            params![job_id],
            |row| row.get(0),
        )
        .optional()?;
    let Some(current) = current else {
        return Err(LedgerError::JobNotFound(job_id));
    };
    let current = JobStatus::from_status(&current).ok_or_else(|| {
        LedgerError::Storage(rusqlite::Error::FromSqlConversionFailure(
            0,
            Type::Text,
            format!("unknown job status '{}'", current).into(),
        ))
    })?;
    if !current.can_transition(status) {
        return Err(LedgerError::InvalidTransition {
            id: job_id,
            from: current,
            to: status,
        });
    }

    // MAX keeps completed_at >= created_at even if the clock stepped back.
    db.execute(
        "UPDATE jobs SET status = ?1, completed_at = MAX(?2, created_at) WHERE id = ?3",
        params![status.as_str(), now_timestamp(), job_id],
    )?;
    debug!("Job {} moved {} -> {}", job_id, current, status);
    Ok(())
}

impl Store {
    /// Insert a job and return its id, assigned by the same statement.
    pub async fn create_job(
        &self,
        operation_type: &str,
        status: JobStatus,
        details: &str,
    ) -> Result<i64, LedgerError> {
        if operation_type.trim().is_empty() {
            return Err(LedgerError::EmptyOperation);
        }
        let details = if details.is_empty() {
            DEFAULT_JOB_DETAILS
        } else {
            details
        };
        let created_at = now_timestamp();
        let completed_at = status.is_terminal().then(|| created_at.clone());

        let db = self.db.lock().await;
        let id: i64 = db.query_row(
            "INSERT INTO jobs (operation_type, status, created_at, completed_at, details)
             VALUES (?1, ?2, ?3, ?4, ?5) RETURNING id",
            params![operation_type, status.as_str(), created_at, completed_at, details],
            |row| row.get(0),
        )?;
        debug!("Created job {} ({}) as {}", id, operation_type, status);
        Ok(id)
    }

    /// Move a job to a terminal status and stamp `completed_at`.
    pub async fn update_job_status(&self, job_id: i64, status: JobStatus) -> Result<(), LedgerError> {
        let db = self.db.lock().await;
        transition(&db, job_id, status)
    }

    /// Mark a job Failed and record its error log row in one transaction.
    pub async fn fail_job(
        &self,
        job_id: i64,
        operation_type: &str,
        error_message: &str,
    ) -> Result<i64, LedgerError> {
        let mut db = self.db.lock().await;
        let tx = db.transaction()?;
        transition(&tx, job_id, JobStatus::Failed)?;
        let log_id = insert_log(&tx, operation_type, error_message, Some(job_id))?;
        tx.commit()?;
        Ok(log_id)
    }

    pub async fn update_job_details(&self, job_id: i64, details: &str) -> Result<(), LedgerError> {
        let db = self.db.lock().await;
        let rows = db.execute(
            "UPDATE jobs SET details = ?1 WHERE id = ?2",
            params![details, job_id],
        )?;
        if rows == 0 {
            return Err(LedgerError::JobNotFound(job_id));
        }
        Ok(())
    }

    pub async fn get_job(&self, job_id: i64) -> Result<Option<JobRecord>, LedgerError> {
        let db = self.db.lock().await;
        let job = db
            .query_row(
                &format!("SELECT {} FROM jobs WHERE id = ?1", JOB_COLUMNS),
                params![job_id],
                job_from_row,
            )
            .optional()?;
        Ok(job)
    }

    /// Newest first; ties on `created_at` fall back to the higher id.
    pub async fn list_jobs(&self, range: Option<&DateRange>) -> Result<Vec<JobRecord>, LedgerError> {
        let db = self.db.lock().await;
        let mut out = Vec::new();
        match range {
            Some(range) => {
                let mut stmt = db.prepare(&format!(
                    "SELECT {} FROM jobs WHERE created_at BETWEEN ?1 AND ?2
                     ORDER BY created_at DESC, id DESC",
                    JOB_COLUMNS
                ))?;
                let rows = stmt.query_map(
                    params![format_timestamp(&range.start), format_timestamp(&range.end)],
                    job_from_row,
                )?;
                for row in rows {
                    out.push(row?);
                }
            }
            None => {
                let mut stmt = db.prepare(&format!(
                    "SELECT {} FROM jobs ORDER BY created_at DESC, id DESC",
                    JOB_COLUMNS
                ))?;
                let rows = stmt.query_map([], job_from_row)?;
                for row in rows {
                    out.push(row?);
                }
            }
        }
        Ok(out)
    }
}
