use reqwest::Client;
use reqwest::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio_stream::StreamExt;
use tracing::{debug, warn};

use super::AgentError;
use super::assembler::{AssembledResponse, BufferedResponse, assemble_buffered, assemble_stream};
use super::profile::AgentSettings;
use super::token::TokenSource;
use crate::core::config::{ServiceConfig, Transport};

pub const AGENT_RUN_PATH: &str = "/api/v2/cortex/agent:run";
pub const TOKEN_TYPE_HEADER: &str = "X-Snowflake-Authorization-Token-Type";
pub const KEYPAIR_JWT: &str = "KEYPAIR_JWT";
pub const EVENT_STREAM: &str = "text/event-stream";

/// Raw reply of one invocation, before assembly.
pub enum AgentReply {
    Stream(reqwest::Response),
    Buffered(BufferedResponse),
}

impl AgentReply {
    pub async fn assemble(self) -> Result<AssembledResponse, AgentError> {
        match self {
            AgentReply::Stream(res) => {
                let stream = res.bytes_stream();
                let reader = tokio_util::io::StreamReader::new(
                    stream.map(|r| r.map_err(std::io::Error::other)),
                );
                assemble_stream(tokio::io::BufReader::new(reader))
                    .await
                    .map_err(|e| AgentError::Transport(format!("stream interrupted: {}", e)))
            }
            AgentReply::Buffered(body) => assemble_buffered(&body),
        }
    }
}

/// Request ready to send: preconditions checked and a fresh token minted.
#[derive(Debug, Clone)]
pub struct PreparedRequest {
    pub url: String,
    pub token: String,
    pub body: Value,
}

#[derive(Clone)]
pub struct AgentClient {
    http: Client,
    base_url: Option<String>,
    transport: Transport,
    host_proxy_url: Option<String>,
    tokens: Option<Arc<dyn TokenSource>>,
}

impl AgentClient {
    pub fn new(
        service: &ServiceConfig,
        tokens: Option<Arc<dyn TokenSource>>,
    ) -> Result<Self, AgentError> {
        let http = Client::builder()
            .timeout(Duration::from_secs(service.request_timeout_secs.max(1)))
            .build()?;
        Ok(Self {
            http,
            base_url: service.base_url.clone(),
            transport: service.transport,
            host_proxy_url: service.host_proxy_url.clone(),
            tokens,
        })
    }

    pub fn transport(&self) -> Transport {
        self.transport
    }

    /// Check preconditions in order (base URL, token issuer, message) without any I/O.
    pub fn prepare(&self, settings: &AgentSettings, message: &str) -> Result<PreparedRequest, AgentError> {
        let base_url = self
            .base_url
            .as_deref()
            .filter(|u| !u.trim().is_empty())
            .ok_or(AgentError::MissingConfig("base_url"))?;
        let tokens = self
            .tokens
            .as_ref()
            .ok_or(AgentError::MissingCredential("rsa_private_key"))?;
        if message.trim().is_empty() {
            return Err(AgentError::EmptyMessage);
        }

        let root = match self.transport {
            Transport::Stream => base_url,
            Transport::Buffered => self
                .host_proxy_url
                .as_deref()
                .filter(|u| !u.trim().is_empty())
                .ok_or(AgentError::MissingConfig("host_proxy_url"))?,
        };

        Ok(PreparedRequest {
            url: format!("{}{}", root.trim_end_matches('/'), AGENT_RUN_PATH),
            token: tokens.issue()?,
            body: settings.build_payload(message),
        })
    }

    pub async fn invoke(&self, settings: &AgentSettings, message: &str) -> Result<AgentReply, AgentError> {
        let req = self.prepare(settings, message)?;
        debug!("Invoking agent via {:?} transport at {}", self.transport, req.url);

        let res = self
            .http
            .post(&req.url)
            .header(AUTHORIZATION, format!("Bearer {}", req.token))
            .header(CONTENT_TYPE, "application/json")
            .header(ACCEPT, EVENT_STREAM)
            .header(TOKEN_TYPE_HEADER, KEYPAIR_JWT)
            .json(&req.body)
            .send()
            .await?;

        let status = res.status();
        if !status.is_success() {
            let mut reason = status.canonical_reason().unwrap_or("Unknown reason").to_string();
            let body = res.text().await.unwrap_or_default();
            if !body.trim().is_empty() {
                reason = format!("{}: {}", reason, body.trim());
            }
            return Err(AgentError::Status {
                status: status.as_u16(),
                reason,
            });
        }

        match self.transport {
            Transport::Stream => Ok(AgentReply::Stream(res)),
            Transport::Buffered => {
                let body: BufferedResponse = res
                    .json()
                    .await
                    .map_err(|e| AgentError::InvalidPayload(e.to_string()))?;
                Ok(AgentReply::Buffered(body))
            }
        }
    }

    pub async fn invoke_and_assemble(
        &self,
        settings: &AgentSettings,
        message: &str,
    ) -> Result<AssembledResponse, AgentError> {
        let result = match self.invoke(settings, message).await {
            Ok(reply) => reply.assemble().await,
            Err(e) => Err(e),
        };
        if let Err(e) = &result {
            warn!("Agent invocation failed: {}", e);
        }
        result
    }
}
