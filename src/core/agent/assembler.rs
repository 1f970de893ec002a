use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tracing::debug;

use super::AgentError;
use super::frames::{ContentItem, StreamFrame, ToolResultItem, decode_line, delta_frame};

const DELTA_EVENT: &str = "message.delta";

/// Final answer of one invocation. Empty strings stand for "absent".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssembledResponse {
    pub text: String,
    pub query: String,
}

impl AssembledResponse {
    pub fn has_query(&self) -> bool {
        !self.query.trim().is_empty()
    }
}

/// Body returned by the host proxy for buffered invocations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BufferedResponse {
    pub status: u16,
    #[serde(default)]
    pub reason: Option<String>,
    /// JSON text encoding an array of `{event, data}` objects.
    #[serde(default)]
    pub content: String,
}

/// Folds stream frames into text and the last generated query.
#[derive(Debug, Default)]
pub struct StreamAssembler {
    text: String,
    query: String,
    malformed: usize,
}

impl StreamAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_line(&mut self, line: &[u8]) {
        self.apply(decode_line(line));
    }

    pub fn apply(&mut self, frame: StreamFrame) {
        match frame {
            StreamFrame::Delta(items) => self.fold_items(items),
            StreamFrame::Malformed(raw) => {
                self.malformed += 1;
                debug!("Malformed stream frame kept as text ({} bytes)", raw.len());
                self.text.push_str(&raw);
            }
            StreamFrame::Done | StreamFrame::Ignored => {}
        }
    }

    fn fold_items(&mut self, items: Vec<ContentItem>) {
        for item in items {
            match item {
                ContentItem::Text { text } => {
                    if let Some(text) = text {
                        self.text.push_str(&text);
                    }
                }
                ContentItem::ToolResults { tool_results } => {
                    for result in tool_results.content {
                        if let ToolResultItem::Json { json } = result {
                            if let Some(text) = &json.text {
                                self.text.push_str(text);
                            }
                            // Every json result replaces the query, even with nothing.
                            self.query = json.generated_query().unwrap_or_default().to_string();
                        }
                    }
                }
                ContentItem::Unknown => {}
            }
        }
    }

    pub fn malformed_frames(&self) -> usize {
        self.malformed
    }

    pub fn finish(self) -> AssembledResponse {
        AssembledResponse {
            text: self.text,
            query: self.query,
        }
    }
}

pub fn assemble_lines<I, L>(lines: I) -> AssembledResponse
where
    I: IntoIterator<Item = L>,
    L: AsRef<[u8]>,
{
    let mut assembler = StreamAssembler::new();
    for line in lines {
        assembler.push_line(line.as_ref());
    }
    assembler.finish()
}

/// Read newline-delimited frames until EOF.
pub async fn assemble_stream<R>(reader: R) -> std::io::Result<AssembledResponse>
where
    R: AsyncBufRead + Unpin,
{
    let mut reader = reader;
    let mut assembler = StreamAssembler::new();
    let mut line_buf = Vec::new();
    loop {
        line_buf.clear();
        if reader.read_until(b'\n', &mut line_buf).await? == 0 {
            break;
        }
        assembler.push_line(&line_buf);
    }
    if assembler.malformed_frames() > 0 {
        debug!("Stream ended with {} malformed frame(s)", assembler.malformed_frames());
    }
    Ok(assembler.finish())
}

/// Only `message.delta` events contribute; a non-200 status yields no partial result.
pub fn assemble_buffered(response: &BufferedResponse) -> Result<AssembledResponse, AgentError> {
    if response.status != 200 {
        return Err(AgentError::Status {
            status: response.status,
            reason: response
                .reason
                .clone()
                .unwrap_or_else(|| "Unknown reason".to_string()),
        });
    }

    let events: Vec<Value> = serde_json::from_str(&response.content).map_err(|e| {
        let preview: String = response.content.chars().take(200).collect();
        AgentError::InvalidPayload(format!("{} (content: {})", e, preview))
    })?;

    let mut assembler = StreamAssembler::new();
    for event in &events {
        if event.get("event").and_then(Value::as_str) != Some(DELTA_EVENT) {
            continue;
        }
        if let Some(data) = event.get("data") {
            assembler.apply(delta_frame(data));
        }
    }
    Ok(assembler.finish())
}
