pub mod assembler;
pub mod client;
pub mod frames;
pub mod profile;
pub mod session;
pub mod token;

pub use assembler::AssembledResponse;
pub use client::AgentClient;
pub use profile::{AgentProfile, AgentProfiles, AgentSettings};
pub use session::ChatSession;
pub use token::{KeypairTokenIssuer, TokenSource};

/// Failures of an agent invocation. Callers render all of these the same way;
/// the variants exist so tests and logs can tell them apart.
#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    #[error("missing configuration: {0}")]
    MissingConfig(&'static str),
    #[error("missing credential: {0}")]
    MissingCredential(&'static str),
    #[error("message must not be empty")]
    EmptyMessage,
    #[error("invalid agent settings: {0}")]
    InvalidSettings(String),
    #[error("could not issue token: {0}")]
    Token(String),
    #[error("request failed: {0}")]
    Transport(String),
    #[error("HTTP error {status}: {reason}")]
    Status { status: u16, reason: String },
    #[error("invalid response payload: {0}")]
    InvalidPayload(String),
}

impl From<reqwest::Error> for AgentError {
    fn from(e: reqwest::Error) -> Self {
        AgentError::Transport(e.to_string())
    }
}
