use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use serde::Deserialize;
use serde_json::json;

use super::super::AppState;
use super::{ApiResponse, error_response};
use crate::core::agent::session::display_text;
use crate::core::agent::AgentError;

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    message: String,
}

fn agent_error_status(e: &AgentError) -> StatusCode {
    match e {
        AgentError::MissingConfig(_)
        | AgentError::MissingCredential(_)
        | AgentError::EmptyMessage
        | AgentError::InvalidSettings(_) => StatusCode::BAD_REQUEST,
        AgentError::Token(_) => StatusCode::INTERNAL_SERVER_ERROR,
        AgentError::Transport(_) | AgentError::Status { .. } | AgentError::InvalidPayload(_) => {
            StatusCode::BAD_GATEWAY
        }
    }
}

/// One turn of the agent's running conversation.
pub async fn chat_endpoint(
    State(state): State<AppState>,
    Path(agent): Path<String>,
    Json(payload): Json<ChatRequest>,
) -> ApiResponse {
    let profile = match state.ctx.profiles.get(&agent).await {
        Ok(Some(profile)) => profile,
        Ok(None) => {
            return error_response(StatusCode::NOT_FOUND, format!("Agent '{}' not found", agent));
        }
        Err(e) => return error_response(StatusCode::INTERNAL_SERVER_ERROR, e),
    };
    let client = match state.ctx.agent_client().await {
        Ok(client) => client,
        Err(e) => return error_response(StatusCode::BAD_REQUEST, format!("{:#}", e)),
    };

    // Turns on one agent queue behind its session; other agents are not blocked.
    let shared = state.session(&agent).await;
    let mut session = shared.lock().await;

    match session.ask(&client, &profile.settings, &payload.message).await {
        Ok(response) => (
            StatusCode::OK,
            Json(json!({
                "success": true,
                "text": display_text(&response.text),
                "query": response.query,
                "session_id": session.id,
                "turns": session.turns().len(),
            })),
        ),
        Err(e) => error_response(agent_error_status(&e), e),
    }
}

pub async fn reset_chat_endpoint(
    State(state): State<AppState>,
    Path(agent): Path<String>,
) -> ApiResponse {
    let cleared = state.sessions.lock().await.remove(&agent).is_some();
    (
        StatusCode::OK,
        Json(json!({ "success": true, "cleared": cleared })),
    )
}
