use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use serde::Deserialize;
use serde_json::json;

use super::super::AppState;
use super::{ApiResponse, error_response};
use crate::core::agent::AgentSettings;

pub async fn get_agents(State(state): State<AppState>) -> ApiResponse {
    match state.ctx.profiles.list().await {
        Ok(agents) => (
            StatusCode::OK,
            Json(json!({ "success": true, "agents": agents })),
        ),
        Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, e),
    }
}

#[derive(Debug, Deserialize)]
pub struct CreateAgentRequest {
    name: String,
    #[serde(default)]
    settings: Option<AgentSettings>,
}

pub async fn create_agent_endpoint(
    State(state): State<AppState>,
    Json(payload): Json<CreateAgentRequest>,
) -> ApiResponse {
    let settings = payload.settings.unwrap_or_default();
    match state.ctx.profiles.create(&payload.name, settings).await {
        Ok(agent) => (
            StatusCode::CREATED,
            Json(json!({ "success": true, "agent": agent })),
        ),
        Err(e) => error_response(StatusCode::BAD_REQUEST, e),
    }
}

pub async fn get_agent_endpoint(
    State(state): State<AppState>,
    Path(agent): Path<String>,
) -> ApiResponse {
    match state.ctx.profiles.get(&agent).await {
        Ok(Some(agent)) => (
            StatusCode::OK,
            Json(json!({ "success": true, "agent": agent })),
        ),
        Ok(None) => error_response(StatusCode::NOT_FOUND, format!("Agent '{}' not found", agent)),
        Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, e),
    }
}

pub async fn delete_agent_endpoint(
    State(state): State<AppState>,
    Path(agent): Path<String>,
) -> ApiResponse {
    match state.ctx.profiles.delete(&agent).await {
        Ok(true) => {
            state.sessions.lock().await.remove(&agent);
            (StatusCode::OK, Json(json!({ "success": true })))
        }
        Ok(false) => error_response(StatusCode::NOT_FOUND, format!("Agent '{}' not found", agent)),
        Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, e),
    }
}
