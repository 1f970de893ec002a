#![allow(dead_code)]

use axum::{
    Json, Router,
    extract::{Path as UrlPath, State},
    http::{StatusCode, header},
    response::IntoResponse,
    routing::{get, post},
};
use serde_json::{Value, json};
use std::net::TcpListener;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Output, Stdio};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::oneshot;

pub type TestResult<T> = Result<T, Box<dyn std::error::Error + Send + Sync>>;

pub fn cortexkit_binary_path() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_cortexkit"))
}

pub fn test_private_key_path() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("src")
        .join("core")
        .join("agent")
        .join("testdata")
        .join("test_rsa_key.p8")
}

/// A throwaway data directory plus helpers to run CLI commands against it.
pub struct Workspace {
    dir: tempfile::TempDir,
}

impl Workspace {
    pub fn new() -> TestResult<Self> {
        Ok(Self {
            dir: tempfile::TempDir::new()?,
        })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn command(&self) -> Command {
        let mut cmd = Command::new(cortexkit_binary_path());
        cmd.env("CORTEXKIT_DATA_DIR", self.dir.path());
        cmd
    }

    pub fn run(&self, args: &[&str]) -> TestResult<Output> {
        Ok(self.command().args(args).output()?)
    }

    pub fn run_ok(&self, args: &[&str]) -> TestResult<String> {
        let out = self.run(args)?;
        if !out.status.success() {
            return Err(format!(
                "cortexkit {:?} failed: {}",
                args,
                String::from_utf8_lossy(&out.stderr)
            )
            .into());
        }
        Ok(String::from_utf8_lossy(&out.stdout).to_string())
    }

    /// Point the account and service sections at `base_url` and store the test key.
    pub fn configure_service(&self, base_url: &str) -> TestResult<()> {
        let config = format!(
            r#"[account]
account = "ORG-ACCT"
user = "etl"
public_key_fingerprint = "SHA256:fp="

[service]
base_url = "{}"

[warehouse]
warehouse = "COMPUTE_WH"
database = "ANALYTICS"
poll_interval_ms = 20
"#,
            base_url
        );
        std::fs::write(self.dir.path().join("config.toml"), config)?;
        let key = test_private_key_path();
        self.run_ok(&["secret", "set", "rsa_private_key", "--file", &key.display().to_string()])?;
        Ok(())
    }
}

/// `cortexkit serve` running against a workspace.
pub struct ServerHarness {
    child: Child,
    pub api_base: String,
}

impl ServerHarness {
    pub async fn spawn(workspace: &Workspace) -> TestResult<Self> {
        let port = find_free_port()?;
        let child = workspace
            .command()
            .arg("serve")
            .arg("--host")
            .arg("127.0.0.1")
            .arg("--port")
            .arg(port.to_string())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()?;

        let mut harness = Self {
            child,
            api_base: format!("http://127.0.0.1:{}", port),
        };
        harness.wait_until_ready().await?;
        Ok(harness)
    }

    async fn wait_until_ready(&mut self) -> TestResult<()> {
        for _ in 0..80 {
            if let Some(status) = self.child.try_wait()? {
                return Err(format!("cortexkit serve exited early with status: {}", status).into());
            }
            let res = reqwest::Client::new()
                .get(format!("{}/api/jobs", self.api_base))
                .timeout(Duration::from_millis(700))
                .send()
                .await;
            if let Ok(resp) = res
                && resp.status().is_success()
            {
                return Ok(());
            }
            tokio::time::sleep(Duration::from_millis(250)).await;
        }
        Err("Timed out waiting for cortexkit API readiness".into())
    }

    pub async fn request_json(
        &self,
        method: reqwest::Method,
        path: &str,
        body: Option<Value>,
    ) -> TestResult<(u16, Value)> {
        let mut req = reqwest::Client::new()
            .request(method, format!("{}{}", self.api_base, path))
            .timeout(Duration::from_secs(30));
        if let Some(payload) = body {
            req = req.json(&payload);
        }
        let resp = req.send().await?;
        let status = resp.status().as_u16();
        let text = resp.text().await?;
        let parsed = serde_json::from_str::<Value>(&text)
            .unwrap_or_else(|_| json!({ "success": false, "raw": text }));
        Ok((status, parsed))
    }

    /// Poll a job until it leaves In-Progress.
    pub async fn wait_for_job(&self, id: i64) -> TestResult<Value> {
        for _ in 0..100 {
            let (_, body) = self
                .request_json(reqwest::Method::GET, &format!("/api/jobs/{}", id), None)
                .await?;
            if body["job"]["status"] != "In-Progress" {
                return Ok(body);
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        Err(format!("job {} never finished", id).into())
    }
}

impl Drop for ServerHarness {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

#[derive(Clone, Default)]
struct MockState {
    statements: Arc<Mutex<Vec<Value>>>,
    agent_requests: Arc<Mutex<Vec<Value>>>,
}

async fn submit_statement(
    State(state): State<MockState>,
    Json(body): Json<Value>,
) -> (StatusCode, Json<Value>) {
    let statement = body["statement"].as_str().unwrap_or_default().to_string();
    state
        .statements
        .lock()
        .unwrap_or_else(|e| e.into_inner())
        .push(body);
    if statement.contains("missing_table") {
        return (
            StatusCode::UNPROCESSABLE_ENTITY,
            Json(json!({ "message": "Object 'MISSING_TABLE' does not exist" })),
        );
    }
    if statement.starts_with("CALL") {
        return (
            StatusCode::ACCEPTED,
            Json(json!({ "statementHandle": "call-handle" })),
        );
    }
    (
        StatusCode::OK,
        Json(json!({
            "statementHandle": "sync-handle",
            "resultSetMetaData": { "rowType": [{ "name": "N" }] },
            "data": [["1"]]
        })),
    )
}

async fn poll_statement(UrlPath(handle): UrlPath<String>) -> Json<Value> {
    Json(json!({ "statementHandle": handle, "data": [] }))
}

async fn agent_run(State(state): State<MockState>, Json(body): Json<Value>) -> impl IntoResponse {
    state
        .agent_requests
        .lock()
        .unwrap_or_else(|e| e.into_inner())
        .push(body);
    (
        [(header::CONTENT_TYPE, "text/event-stream")],
        concat!(
            "event: message.delta\n",
            "data: {\"delta\":{\"content\":[{\"type\":\"text\",\"text\":\"Orders grew 12%【†1†】\"}]}}\n\n",
            "data: not json\n\n",
            "data: {\"delta\":{\"content\":[{\"type\":\"tool_results\",\"tool_results\":{\"content\":[{\"type\":\"json\",\"json\":{\"sql\":\"SELECT COUNT(*) FROM orders\"}}]}}]}}\n\n",
            "data: [DONE]\n\n"
        ),
    )
}

/// Stands in for both the SQL statements API and the agent endpoint.
pub struct MockService {
    pub port: u16,
    state: MockState,
    shutdown_tx: Option<oneshot::Sender<()>>,
    handle: Option<tokio::task::JoinHandle<()>>,
}

impl MockService {
    pub async fn start() -> TestResult<Self> {
        let state = MockState::default();
        let app = Router::new()
            .route("/api/v2/statements", post(submit_statement))
            .route("/api/v2/statements/{handle}", get(poll_statement))
            .route("/api/v2/cortex/agent:run", post(agent_run))
            .with_state(state.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
        let port = listener.local_addr()?.port();
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let handle = tokio::spawn(async move {
            let _ = axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    let _ = shutdown_rx.await;
                })
                .await;
        });

        Ok(Self {
            port,
            state,
            shutdown_tx: Some(shutdown_tx),
            handle: Some(handle),
        })
    }

    pub fn base_url(&self) -> String {
        format!("http://127.0.0.1:{}", self.port)
    }

    pub fn statements(&self) -> Vec<Value> {
        self.state
            .statements
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn agent_requests(&self) -> Vec<Value> {
        self.state
            .agent_requests
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }
}

pub fn find_free_port() -> TestResult<u16> {
    let listener = TcpListener::bind("127.0.0.1:0")?;
    let port = listener.local_addr()?.port();
    drop(listener);
    Ok(port)
}
