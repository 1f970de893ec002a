use anyhow::{Result, anyhow, bail};
use async_trait::async_trait;
use reqwest::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::core::agent::TokenSource;
use crate::core::agent::client::{KEYPAIR_JWT, TOKEN_TYPE_HEADER};
use crate::core::config::{ServiceConfig, WarehouseConfig};

pub const STATEMENTS_PATH: &str = "/api/v2/statements";

/// Rows of a finished statement, with the handle the service assigned to it.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StatementResult {
    pub handle: String,
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
}

/// Runs one SQL statement against the warehouse.
#[async_trait]
pub trait StatementExecutor: Send + Sync {
    async fn execute(&self, statement: &str, cancel: &CancellationToken) -> Result<StatementResult>;
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StatementResponse {
    #[serde(default)]
    statement_handle: Option<String>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    data: Option<Vec<Vec<Value>>>,
    #[serde(default)]
    result_set_meta_data: Option<ResultSetMetaData>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ResultSetMetaData {
    #[serde(default)]
    row_type: Vec<ColumnMeta>,
}

#[derive(Debug, Deserialize)]
struct ColumnMeta {
    name: String,
}

/// Strip whitespace and trailing semicolons; the SQL API takes one bare statement.
pub fn normalize_statement(statement: &str) -> Result<String> {
    let trimmed = statement.trim().trim_end_matches(|c: char| c == ';' || c.is_whitespace());
    if trimmed.is_empty() {
        bail!("Statement must not be empty");
    }
    Ok(trimmed.to_string())
}

/// Statement executor backed by the service's SQL REST endpoint.
pub struct SqlApiExecutor {
    http: Client,
    base_url: String,
    tokens: Arc<dyn TokenSource>,
    warehouse: WarehouseConfig,
}

impl SqlApiExecutor {
    pub fn new(
        service: &ServiceConfig,
        warehouse: &WarehouseConfig,
        tokens: Arc<dyn TokenSource>,
    ) -> Result<Self> {
        let base_url = service
            .base_url
            .as_deref()
            .map(str::trim)
            .filter(|u| !u.is_empty())
            .ok_or_else(|| anyhow!("service.base_url is not configured"))?;
        let http = Client::builder()
            .timeout(Duration::from_secs(service.request_timeout_secs.max(1)))
            .build()?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            tokens,
            warehouse: warehouse.clone(),
        })
    }

    fn request_body(&self, statement: &str) -> Value {
        let mut body = Map::new();
        body.insert("statement".into(), json!(statement));
        body.insert("timeout".into(), json!(self.warehouse.statement_timeout_secs));
        for (key, value) in [
            ("database", &self.warehouse.database),
            ("schema", &self.warehouse.schema),
            ("warehouse", &self.warehouse.warehouse),
        ] {
            if let Some(value) = value.as_deref().filter(|v| !v.is_empty()) {
                body.insert(key.into(), json!(value));
            }
        }
        Value::Object(body)
    }

    fn authorized(&self, req: RequestBuilder) -> Result<RequestBuilder> {
        let token = self.tokens.issue()?;
        Ok(req
            .header(AUTHORIZATION, format!("Bearer {}", token))
            .header(CONTENT_TYPE, "application/json")
            .header(ACCEPT, "application/json")
            .header(TOKEN_TYPE_HEADER, KEYPAIR_JWT))
    }
}

async fn cancellable<F, T>(cancel: &CancellationToken, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    tokio::select! {
        _ = cancel.cancelled() => Err(anyhow!("statement cancelled")),
        res = fut => res,
    }
}

async fn read_response(res: Response) -> Result<(StatusCode, StatementResponse)> {
    let status = res.status();
    let text = res.text().await?;
    if status != StatusCode::OK && status != StatusCode::ACCEPTED {
        let message = serde_json::from_str::<StatementResponse>(&text)
            .ok()
            .and_then(|r| r.message)
            .unwrap_or(text);
        bail!("SQL API error {}: {}", status.as_u16(), message);
    }
    let parsed = serde_json::from_str(&text)
        .map_err(|e| anyhow!("Invalid SQL API response: {}", e))?;
    Ok((status, parsed))
}

#[async_trait]
impl StatementExecutor for SqlApiExecutor {
    async fn execute(&self, statement: &str, cancel: &CancellationToken) -> Result<StatementResult> {
        let statement = normalize_statement(statement)?;
        let url = format!("{}{}", self.base_url, STATEMENTS_PATH);
        let req = self.authorized(self.http.post(&url))?.json(&self.request_body(&statement));

        let (mut status, mut body) = cancellable(cancel, async move {
            read_response(req.send().await?).await
        })
        .await?;

        while status == StatusCode::ACCEPTED {
            let handle = body
                .statement_handle
                .clone()
                .ok_or_else(|| anyhow!("SQL API accepted the statement without a handle"))?;
            debug!("Statement {} still running", handle);
            cancellable(cancel, async {
                tokio::time::sleep(Duration::from_millis(self.warehouse.poll_interval_ms)).await;
                Ok(())
            })
            .await?;

            let poll_url = format!("{}/{}", url, handle);
            let req = self.authorized(self.http.get(&poll_url))?;
            (status, body) = cancellable(cancel, async move {
                read_response(req.send().await?).await
            })
            .await?;
        }

        let handle = body.statement_handle.unwrap_or_default();
        let columns = body
            .result_set_meta_data
            .map(|meta| meta.row_type.into_iter().map(|c| c.name).collect())
            .unwrap_or_default();
        let rows = body.data.unwrap_or_default();
        info!("Statement {} returned {} rows", handle, rows.len());
        Ok(StatementResult {
            handle,
            columns,
            rows,
        })
    }
}
