use chrono::{DateTime, Duration, NaiveDate, NaiveTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle state of a tracked job, persisted as the exact strings
/// `In-Progress`, `Success` and `Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobStatus {
    #[serde(rename = "In-Progress")]
    InProgress,
    Success,
    Failed,
}

impl JobStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::InProgress => "In-Progress",
            JobStatus::Success => "Success",
            JobStatus::Failed => "Failed",
        }
    }

    pub fn from_status(value: &str) -> Option<Self> {
        match value {
            "In-Progress" => Some(JobStatus::InProgress),
            "Success" => Some(JobStatus::Success),
            "Failed" => Some(JobStatus::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Success | JobStatus::Failed)
    }

    /// A job leaves In-Progress exactly once.
    pub fn can_transition(self, to: JobStatus) -> bool {
        self == JobStatus::InProgress && to.is_terminal()
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct JobRecord {
    pub id: i64,
    pub operation_type: String,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub details: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct LogRecord {
    pub id: i64,
    pub job_id: Option<i64>,
    pub operation_type: String,
    pub error_message: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct AgentRow {
    pub name: String,
    pub settings_json: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Inclusive `created_at` window used by the list queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl DateRange {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self { start, end }
    }

    /// Whole calendar days: `from` at midnight through the last microsecond of `to`.
    pub fn from_days(from: NaiveDate, to: NaiveDate) -> Self {
        let start = Utc.from_utc_datetime(&from.and_time(NaiveTime::MIN));
        let end = Utc.from_utc_datetime(&to.and_time(NaiveTime::MIN)) + Duration::days(1)
            - Duration::microseconds(1);
        Self { start, end }
    }

    /// The status screen default: `days` days back from midnight tomorrow.
    pub fn last_days(days: u32) -> Self {
        let tomorrow = Utc::now().date_naive() + Duration::days(1);
        let end = Utc.from_utc_datetime(&tomorrow.and_time(NaiveTime::MIN));
        let start = end - Duration::days(i64::from(days));
        Self { start, end }
    }

    pub fn contains(&self, ts: &DateTime<Utc>) -> bool {
        self.start <= *ts && *ts <= self.end
    }

    /// Window from optional `YYYY-MM-DD` bounds or a day count. Explicit
    /// bounds win over `days`; a lone `from` runs through today.
    pub fn from_bounds(
        from: Option<&str>,
        to: Option<&str>,
        days: Option<&str>,
    ) -> Result<Option<Self>, LedgerError> {
        match (from, to) {
            (Some(from), to) => {
                let from = parse_day(from)?;
                let to = match to {
                    Some(to) => parse_day(to)?,
                    None => Utc::now().date_naive(),
                };
                if to < from {
                    return Err(LedgerError::InvalidRange(
                        "end date is before start date".to_string(),
                    ));
                }
                Ok(Some(Self::from_days(from, to)))
            }
            (None, Some(_)) => Err(LedgerError::InvalidRange(
                "end date given without a start date".to_string(),
            )),
            (None, None) => match days {
                Some(raw) => {
                    let days: u32 = raw
                        .trim()
                        .parse()
                        .map_err(|_| LedgerError::InvalidRange(format!("invalid day count '{}'", raw)))?;
                    Ok(Some(Self::last_days(days)))
                }
                None => Ok(None),
            },
        }
    }
}

fn parse_day(raw: &str) -> Result<NaiveDate, LedgerError> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d")
        .map_err(|_| LedgerError::InvalidRange(format!("invalid date '{}', expected YYYY-MM-DD", raw)))
}

#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("operation type must not be empty")]
    EmptyOperation,
    #[error("job {0} not found")]
    JobNotFound(i64),
    #[error("job {id} cannot move from {from} to {to}")]
    InvalidTransition {
        id: i64,
        from: JobStatus,
        to: JobStatus,
    },
    #[error("invalid date range: {0}")]
    InvalidRange(String),
    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),
}
