pub mod agents;
pub mod chat;
pub mod jobs;

use axum::Json;
use axum::http::StatusCode;
use serde_json::{Value, json};

pub(crate) type ApiResponse = (StatusCode, Json<Value>);

pub(crate) fn error_response(status: StatusCode, message: impl std::fmt::Display) -> ApiResponse {
    (
        status,
        Json(json!({ "success": false, "error": message.to_string() })),
    )
}
