mod handlers;
mod router;

use anyhow::Result;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{error, info};

use crate::core::AppContext;
use crate::core::agent::ChatSession;

pub(crate) use router::build_api_router;

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) ctx: AppContext,
    /// One running conversation per agent name.
    pub(crate) sessions: Arc<Mutex<HashMap<String, Arc<Mutex<ChatSession>>>>>,
    pub(crate) api_port: u16,
}

impl AppState {
    pub(crate) fn new(ctx: AppContext, api_port: u16) -> Self {
        Self {
            ctx,
            sessions: Arc::new(Mutex::new(HashMap::new())),
            api_port,
        }
    }

    /// The agent's session, created on first use.
    pub(crate) async fn session(&self, agent: &str) -> Arc<Mutex<ChatSession>> {
        self.sessions
            .lock()
            .await
            .entry(agent.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(ChatSession::new(agent))))
            .clone()
    }
}

/// Serve the API until Ctrl-C, then stop accepting work and cancel running jobs.
pub async fn serve(ctx: AppContext, host: &str, port: u16) -> Result<()> {
    let runner = ctx.runner.clone();
    let app = build_api_router(AppState::new(ctx, port));

    let addr = format!("{}:{}", host, port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("API Server running at http://{addr}");

    let shutdown = async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for shutdown signal: {}", e);
            std::future::pending::<()>().await;
        }
        info!("API Server shutting down...");
        runner.shutdown();
    };
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(())
}
