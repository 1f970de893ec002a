use rusqlite::{Connection, Row, params};

use super::types::{DateRange, LedgerError, LogRecord};
use super::{Store, format_timestamp, now_timestamp, parse_timestamp};

pub const DEFAULT_ERROR_MESSAGE: &str = "No error message provided";

const LOG_COLUMNS: &str = "id, job_id, operation_type, error_message, created_at";

fn log_from_row(row: &Row<'_>) -> rusqlite::Result<LogRecord> {
    let created_at: String = row.get(4)?;
    Ok(LogRecord {
        id: row.get(0)?,
        job_id: row.get(1)?,
        operation_type: row.get(2)?,
        error_message: row.get(3)?,
        created_at: parse_timestamp(4, &created_at)?,
    })
}

pub(super) fn insert_log(
    db: &Connection,
    operation_type: &str,
    error_message: &str,
    job_id: Option<i64>,
) -> Result<i64, LedgerError> {
    let message = if error_message.is_empty() {
        DEFAULT_ERROR_MESSAGE
    } else {
        error_message
    };
    let id = db.query_row(
        "INSERT INTO logs (job_id, operation_type, error_message, created_at)
         VALUES (?1, ?2, ?3, ?4) RETURNING id",
        params![job_id, operation_type, message, now_timestamp()],
        |row| row.get(0),
    )?;
    Ok(id)
}

impl Store {
    /// Append an error log row. Values are bound, never spliced into SQL text.
    pub async fn append_log(
        &self,
        operation_type: &str,
        error_message: &str,
        job_id: Option<i64>,
    ) -> Result<i64, LedgerError> {
        let db = self.db.lock().await;
        insert_log(&db, operation_type, error_message, job_id)
    }

    pub async fn list_logs(&self, range: Option<&DateRange>) -> Result<Vec<LogRecord>, LedgerError> {
        let db = self.db.lock().await;
        let mut out = Vec::new();
        if let Some(range) = range {
            let mut stmt = db.prepare(&format!(
                "SELECT {} FROM logs WHERE created_at BETWEEN ?1 AND ?2
                 ORDER BY created_at DESC, id DESC",
                LOG_COLUMNS
            ))?;
            let rows = stmt.query_map(
                params![format_timestamp(&range.start), format_timestamp(&range.end)],
                log_from_row,
            )?;
            for row in rows {
                out.push(row?);
            }
        } else {
            let mut stmt = db.prepare(&format!(
                "SELECT {} FROM logs ORDER BY created_at DESC, id DESC",
                LOG_COLUMNS
            ))?;
            let rows = stmt.query_map([], log_from_row)?;
            for row in rows {
                out.push(row?);
            }
        }
        Ok(out)
    }

    pub async fn logs_for_job(&self, job_id: i64) -> Result<Vec<LogRecord>, LedgerError> {
        let db = self.db.lock().await;
        let mut stmt = db.prepare(&format!(
            "SELECT {} FROM logs WHERE job_id = ?1 ORDER BY created_at DESC, id DESC",
            LOG_COLUMNS
        ))?;
        let rows = stmt.query_map(params![job_id], log_from_row)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }
}
