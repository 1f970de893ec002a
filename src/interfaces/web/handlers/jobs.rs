use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
};
use serde::Deserialize;
use serde_json::json;

use super::super::AppState;
use super::{ApiResponse, error_response};
use crate::core::operations::trigger_statement;
use crate::core::store::{DateRange, LedgerError};

#[derive(Debug, Default, Deserialize)]
pub struct RangeQuery {
    from: Option<String>,
    to: Option<String>,
    days: Option<String>,
}

impl RangeQuery {
    fn range(&self) -> Result<Option<DateRange>, LedgerError> {
        DateRange::from_bounds(self.from.as_deref(), self.to.as_deref(), self.days.as_deref())
    }
}

fn ledger_error(e: LedgerError) -> ApiResponse {
    let status = match e {
        LedgerError::EmptyOperation | LedgerError::InvalidRange(_) => StatusCode::BAD_REQUEST,
        LedgerError::JobNotFound(_) => StatusCode::NOT_FOUND,
        LedgerError::InvalidTransition { .. } => StatusCode::CONFLICT,
        LedgerError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    error_response(status, e)
}

pub async fn list_jobs_endpoint(
    State(state): State<AppState>,
    Query(query): Query<RangeQuery>,
) -> ApiResponse {
    let range = match query.range() {
        Ok(range) => range,
        Err(e) => return ledger_error(e),
    };
    match state.ctx.store.list_jobs(range.as_ref()).await {
        Ok(jobs) => (StatusCode::OK, Json(json!({ "success": true, "jobs": jobs }))),
        Err(e) => ledger_error(e),
    }
}

pub async fn get_job_endpoint(State(state): State<AppState>, Path(id): Path<i64>) -> ApiResponse {
    let job = match state.ctx.store.get_job(id).await {
        Ok(Some(job)) => job,
        Ok(None) => return ledger_error(LedgerError::JobNotFound(id)),
        Err(e) => return ledger_error(e),
    };
    match state.ctx.store.logs_for_job(id).await {
        Ok(logs) => (
            StatusCode::OK,
            Json(json!({ "success": true, "job": job, "logs": logs })),
        ),
        Err(e) => ledger_error(e),
    }
}

#[derive(Debug, Deserialize)]
pub struct TriggerJobRequest {
    operation_type: String,
    #[serde(default)]
    details: Option<String>,
    statement: String,
}

/// Starts the job and answers as soon as its row exists.
pub async fn trigger_job_endpoint(
    State(state): State<AppState>,
    Json(payload): Json<TriggerJobRequest>,
) -> ApiResponse {
    if payload.statement.trim().is_empty() {
        return error_response(StatusCode::BAD_REQUEST, "statement must not be empty");
    }
    let executor = match state.ctx.executor().await {
        Ok(executor) => executor,
        Err(e) => return error_response(StatusCode::BAD_REQUEST, format!("{:#}", e)),
    };
    let details = payload.details.unwrap_or_default();
    match trigger_statement(
        &state.ctx.runner,
        executor,
        &payload.operation_type,
        &details,
        &payload.statement,
    )
    .await
    {
        Ok(handle) => (
            StatusCode::ACCEPTED,
            Json(json!({ "success": true, "job_id": handle.job_id })),
        ),
        Err(e) => ledger_error(e),
    }
}

pub async fn list_logs_endpoint(
    State(state): State<AppState>,
    Query(query): Query<RangeQuery>,
) -> ApiResponse {
    let range = match query.range() {
        Ok(range) => range,
        Err(e) => return ledger_error(e),
    };
    match state.ctx.store.list_logs(range.as_ref()).await {
        Ok(logs) => (StatusCode::OK, Json(json!({ "success": true, "logs": logs }))),
        Err(e) => ledger_error(e),
    }
}
