use chrono::{DateTime, Utc};
use serde::Serialize;

use super::AgentError;
use super::assembler::AssembledResponse;
use super::client::AgentClient;
use super::profile::AgentSettings;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatTurn {
    pub role: Role,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub query: Option<String>,
}

/// Conversation with one agent. History lives here, not in globals, and is
/// dropped by `reset`.
#[derive(Debug, Clone, Serialize)]
pub struct ChatSession {
    pub id: String,
    pub agent: String,
    pub created_at: DateTime<Utc>,
    turns: Vec<ChatTurn>,
}

impl ChatSession {
    pub fn new(agent: &str) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            agent: agent.to_string(),
            created_at: Utc::now(),
            turns: Vec::new(),
        }
    }

    /// Send one message. The user turn is only recorded when the call succeeds.
    pub async fn ask(
        &mut self,
        client: &AgentClient,
        settings: &AgentSettings,
        message: &str,
    ) -> Result<AssembledResponse, AgentError> {
        let response = client.invoke_and_assemble(settings, message).await?;
        self.record(message, &response);
        Ok(response)
    }

    pub fn record(&mut self, message: &str, response: &AssembledResponse) {
        self.turns.push(ChatTurn {
            role: Role::User,
            content: message.to_string(),
            query: None,
        });
        self.turns.push(ChatTurn {
            role: Role::Assistant,
            content: display_text(&response.text),
            query: response.has_query().then(|| response.query.clone()),
        });
    }

    pub fn turns(&self) -> &[ChatTurn] {
        &self.turns
    }

    pub fn reset(&mut self) {
        self.turns.clear();
    }
}

/// Citation markers `【†…†】` become `[…]` and each bullet starts a paragraph.
pub fn display_text(text: &str) -> String {
    text.replace("【†", "[")
        .replace("†】", "]")
        .replace('•', "\n\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::{ServiceConfig, Transport};

    #[test]
    fn display_text_rewrites_citations_and_bullets() {
        assert_eq!(
            display_text("Revenue grew【†1†】.• Q1 up• Q2 flat"),
            "Revenue grew[1].\n\n Q1 up\n\n Q2 flat"
        );
        assert_eq!(display_text("plain"), "plain");
    }

    #[test]
    fn record_and_reset() {
        let mut session = ChatSession::new("sales");
        session.record(
            "How many?",
            &AssembledResponse {
                text: "42【†2†】".to_string(),
                query: "SELECT 42".to_string(),
            },
        );
        session.record("Thanks", &AssembledResponse::default());

        let turns = session.turns();
        assert_eq!(turns.len(), 4);
        assert_eq!(turns[0].role, Role::User);
        assert_eq!(turns[1].content, "42[2]");
        assert_eq!(turns[1].query.as_deref(), Some("SELECT 42"));
        assert_eq!(turns[3].query, None);

        session.reset();
        assert!(session.turns().is_empty());
        assert_eq!(session.agent, "sales");
    }

    #[tokio::test]
    async fn failed_ask_leaves_history_untouched() {
        let client = AgentClient::new(
            &ServiceConfig {
                base_url: None,
                transport: Transport::Stream,
                host_proxy_url: None,
                request_timeout_secs: 5,
            },
            None,
        )
        .unwrap();
        let mut session = ChatSession::new("sales");
        let err = session
            .ask(&client, &AgentSettings::default(), "hi")
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::MissingConfig("base_url")));
        assert!(session.turns().is_empty());
    }
}
