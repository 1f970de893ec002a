use axum::{
    Router,
    body::Body,
    http::{HeaderValue, Method, Request, header},
    middleware,
    middleware::Next,
    routing::{get, post},
};
use tower_http::cors::CorsLayer;

use super::AppState;
use super::handlers::{agents, chat, jobs};

fn build_localhost_cors(api_port: u16) -> CorsLayer {
    let origins: Vec<HeaderValue> = [
        format!("http://127.0.0.1:{}", api_port),
        format!("http://localhost:{}", api_port),
    ]
    .iter()
    .filter_map(|o| o.parse().ok())
    .collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers(tower_http::cors::Any)
}

pub fn build_api_router(state: AppState) -> Router {
    Router::new()
        .route(
            "/api/jobs",
            get(jobs::list_jobs_endpoint).post(jobs::trigger_job_endpoint),
        )
        .route("/api/jobs/{id}", get(jobs::get_job_endpoint))
        .route("/api/logs", get(jobs::list_logs_endpoint))
        .route(
            "/api/agents",
            get(agents::get_agents).post(agents::create_agent_endpoint),
        )
        .route(
            "/api/agents/{agent}",
            get(agents::get_agent_endpoint).delete(agents::delete_agent_endpoint),
        )
        .route("/api/agents/{agent}/chat", post(chat::chat_endpoint))
        .route(
            "/api/agents/{agent}/chat/reset",
            post(chat::reset_chat_endpoint),
        )
        .layer(middleware::from_fn(security_headers))
        .layer(build_localhost_cors(state.api_port))
        .with_state(state)
}

async fn security_headers(req: Request<Body>, next: Next) -> axum::response::Response {
    let mut response = next.run(req).await;
    let headers = response.headers_mut();
    headers.insert(
        header::X_CONTENT_TYPE_OPTIONS,
        HeaderValue::from_static("nosniff"),
    );
    headers.insert(header::X_FRAME_OPTIONS, HeaderValue::from_static("DENY"));
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::AppContext;
    use crate::core::agent::profile::{TEXT_TO_SQL_TOOL, Tool, ToolResource};
    use crate::core::agent::token::TEST_PRIVATE_KEY;
    use crate::core::agent::AgentSettings;
    use crate::core::config::AppConfig;
    use crate::core::store::{JobStatus, Store};
    use crate::core::vault::RSA_PRIVATE_KEY;
    use crate::core::warehouse::{StatementExecutor, StatementResult};
    use anyhow::bail;
    use async_trait::async_trait;
    use axum::http::StatusCode;
    use serde_json::{Value, json};
    use std::sync::Arc;
    use tokio_util::sync::CancellationToken;
    use tower::util::ServiceExt;

    struct FakeExecutor;

    #[async_trait]
    impl StatementExecutor for FakeExecutor {
        async fn execute(
            &self,
            statement: &str,
            _cancel: &CancellationToken,
        ) -> anyhow::Result<StatementResult> {
            if statement.contains("missing_table") {
                bail!("SQL API error 422: Object 'MISSING_TABLE' does not exist");
            }
            Ok(StatementResult {
                handle: "h-42".to_string(),
                ..Default::default()
            })
        }
    }

    fn state_with(config: AppConfig) -> AppState {
        let ctx = AppContext::from_parts(".".into(), config, Store::open_in_memory().unwrap())
            .unwrap()
            .with_executor(Arc::new(FakeExecutor));
        AppState::new(ctx, 17890)
    }

    fn test_state() -> AppState {
        state_with(AppConfig::default())
    }

    async fn json_request(
        app: Router,
        method: Method,
        path: &str,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let body = match body {
            Some(json) => Body::from(serde_json::to_string(&json).unwrap()),
            None => Body::empty(),
        };

        let req = Request::builder()
            .method(method)
            .uri(path)
            .header("content-type", "application/json")
            .body(body)
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        let status = resp.status();
        let body_bytes = axum::body::to_bytes(resp.into_body(), 1024 * 1024)
            .await
            .unwrap();
        let json: Value = serde_json::from_slice(&body_bytes).unwrap_or(json!({}));
        (status, json)
    }

    async fn wait_terminal(state: &AppState, id: i64) -> JobStatus {
        for _ in 0..100 {
            let job = state.ctx.store.get_job(id).await.unwrap().unwrap();
            if job.status.is_terminal() {
                return job.status;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        panic!("job {} never finished", id);
    }

    #[tokio::test]
    async fn security_headers_present_on_responses() {
        let app = build_api_router(test_state());
        let req = Request::builder()
            .method(Method::GET)
            .uri("/api/jobs")
            .body(Body::empty())
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(
            resp.headers().get(header::X_CONTENT_TYPE_OPTIONS).unwrap(),
            "nosniff"
        );
        assert_eq!(resp.headers().get(header::X_FRAME_OPTIONS).unwrap(), "DENY");
    }

    #[tokio::test]
    async fn jobs_are_listed_newest_first() {
        let state = test_state();
        for op in ["first", "second", "third"] {
            state
                .ctx
                .store
                .create_job(op, JobStatus::InProgress, "")
                .await
                .unwrap();
        }
        let (status, body) =
            json_request(build_api_router(state), Method::GET, "/api/jobs", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);
        let ops: Vec<&str> = body["jobs"]
            .as_array()
            .unwrap()
            .iter()
            .map(|j| j["operation_type"].as_str().unwrap())
            .collect();
        assert_eq!(ops, vec!["third", "second", "first"]);
        assert_eq!(body["jobs"][0]["status"], "In-Progress");
    }

    #[tokio::test]
    async fn bad_date_range_is_rejected() {
        let (status, body) = json_request(
            build_api_router(test_state()),
            Method::GET,
            "/api/jobs?from=2024-03-02&to=2024-03-01",
            None,
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["success"], false);
    }

    #[tokio::test]
    async fn trigger_runs_statement_and_records_handle() {
        let state = test_state();
        let (status, body) = json_request(
            build_api_router(state.clone()),
            Method::POST,
            "/api/jobs",
            Some(json!({
                "operation_type": "refresh_sales",
                "details": "manual",
                "statement": "CALL refresh_sales();"
            })),
        )
        .await;
        assert_eq!(status, StatusCode::ACCEPTED);
        let id = body["job_id"].as_i64().unwrap();

        assert_eq!(wait_terminal(&state, id).await, JobStatus::Success);
        let (status, body) = json_request(
            build_api_router(state),
            Method::GET,
            &format!("/api/jobs/{}", id),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["job"]["details"], "manual (statement handle: h-42)");
        assert!(body["job"]["completed_at"].is_string());
    }

    #[tokio::test]
    async fn failed_statement_shows_up_in_logs() {
        let state = test_state();
        let (_, body) = json_request(
            build_api_router(state.clone()),
            Method::POST,
            "/api/jobs",
            Some(json!({
                "operation_type": "load_orders",
                "statement": "SELECT * FROM missing_table"
            })),
        )
        .await;
        let id = body["job_id"].as_i64().unwrap();
        assert_eq!(wait_terminal(&state, id).await, JobStatus::Failed);

        let (status, body) =
            json_request(build_api_router(state), Method::GET, "/api/logs", None).await;
        assert_eq!(status, StatusCode::OK);
        let log = &body["logs"][0];
        assert_eq!(log["job_id"], id);
        assert_eq!(log["operation_type"], "load_orders");
        assert!(
            log["error_message"]
                .as_str()
                .unwrap()
                .contains("MISSING_TABLE")
        );
    }

    #[tokio::test]
    async fn trigger_rejects_empty_operation() {
        let (status, body) = json_request(
            build_api_router(test_state()),
            Method::POST,
            "/api/jobs",
            Some(json!({ "operation_type": "", "statement": "SELECT 1" })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["success"], false);
    }

    #[tokio::test]
    async fn unknown_job_is_404() {
        let (status, body) = json_request(
            build_api_router(test_state()),
            Method::GET,
            "/api/jobs/999",
            None,
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "job 999 not found");
    }

    #[tokio::test]
    async fn agent_crud() {
        let state = test_state();
        let mut settings = AgentSettings::default();
        settings.tools.push(Tool::new(TEXT_TO_SQL_TOOL, "analyst1"));
        settings.tool_resources.insert(
            "analyst1".to_string(),
            ToolResource {
                semantic_model_file: Some("@DB.S.STAGE/sales.yaml".to_string()),
                ..Default::default()
            },
        );

        let (status, body) = json_request(
            build_api_router(state.clone()),
            Method::POST,
            "/api/agents",
            Some(json!({ "name": "sales", "settings": settings })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert!(
            body["agent"]["settings"]["response_instruction"]
                .as_str()
                .unwrap()
                .contains("{{.Question}}")
        );

        let (status, _) = json_request(
            build_api_router(state.clone()),
            Method::POST,
            "/api/agents",
            Some(json!({ "name": "sales" })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (_, body) =
            json_request(build_api_router(state.clone()), Method::GET, "/api/agents", None).await;
        assert_eq!(body["agents"].as_array().unwrap().len(), 1);

        let (status, _) = json_request(
            build_api_router(state.clone()),
            Method::DELETE,
            "/api/agents/sales",
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let (status, _) = json_request(
            build_api_router(state),
            Method::GET,
            "/api/agents/sales",
            None,
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn chat_with_unknown_agent_is_404() {
        let (status, _) = json_request(
            build_api_router(test_state()),
            Method::POST,
            "/api/agents/ghost/chat",
            Some(json!({ "message": "hi" })),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn chat_streams_from_agent_service() {
        async fn agent_run() -> impl axum::response::IntoResponse {
            (
                [(header::CONTENT_TYPE, "text/event-stream")],
                concat!(
                    "data: {\"object\":\"message.delta\",\"delta\":{\"content\":[{\"type\":\"text\",\"text\":\"Sales rose【†1†】\"}]}}\n\n",
                    "data: {\"object\":\"message.delta\",\"delta\":{\"content\":[{\"type\":\"tool_results\",\"tool_results\":{\"content\":[{\"type\":\"json\",\"json\":{\"sql\":\"SELECT 1\"}}]}}]}}\n\n",
                    "data: [DONE]\n\n"
                ),
            )
        }
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let mock = Router::new().route("/api/v2/cortex/agent:run", post(agent_run));
        tokio::spawn(async move {
            axum::serve(listener, mock).await.ok();
        });

        let mut config = AppConfig::default();
        config.account.account = "ORG-ACCT".into();
        config.account.user = "etl".into();
        config.account.public_key_fingerprint = "SHA256:fp=".into();
        config.service.base_url = Some(format!("http://{}", addr));
        let state = state_with(config);
        state
            .ctx
            .vault
            .set_secret(RSA_PRIVATE_KEY, TEST_PRIVATE_KEY)
            .await
            .unwrap();
        state
            .ctx
            .profiles
            .create("sales", AgentSettings::default())
            .await
            .unwrap();

        let (status, body) = json_request(
            build_api_router(state.clone()),
            Method::POST,
            "/api/agents/sales/chat",
            Some(json!({ "message": "How did sales do?" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["text"], "Sales rose[1]");
        assert_eq!(body["query"], "SELECT 1");
        assert_eq!(body["turns"], 2);

        // Concurrent turns on the same agent both land in its history.
        let ask = || {
            json_request(
                build_api_router(state.clone()),
                Method::POST,
                "/api/agents/sales/chat",
                Some(json!({ "message": "And returns?" })),
            )
        };
        let ((first, _), (second, _)) = tokio::join!(ask(), ask());
        assert_eq!(first, StatusCode::OK);
        assert_eq!(second, StatusCode::OK);
        let session = state.session("sales").await;
        assert_eq!(session.lock().await.turns().len(), 6);

        let (_, body) = json_request(
            build_api_router(state),
            Method::POST,
            "/api/agents/sales/chat/reset",
            None,
        )
        .await;
        assert_eq!(body["cleared"], true);
    }
}
