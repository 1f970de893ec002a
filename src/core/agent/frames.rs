use serde::{Deserialize, Deserializer};
use serde_json::Value;

const DATA_MARKER: &str = "data:";
const DONE_SENTINEL: &str = "[DONE]";

/// One decoded line of an agent event stream.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamFrame {
    Delta(Vec<ContentItem>),
    Done,
    /// Payload after the marker that is not valid JSON.
    Malformed(String),
    /// Blank line, non-data line, or JSON without `delta.content`.
    Ignored,
}

#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentItem {
    Text {
        #[serde(default)]
        text: Option<String>,
    },
    ToolResults {
        #[serde(default)]
        tool_results: ToolResults,
    },
    #[default]
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
pub struct ToolResults {
    #[serde(default, deserialize_with = "lenient_items")]
    pub content: Vec<ToolResultItem>,
}

#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ToolResultItem {
    Json {
        #[serde(default)]
        json: ToolJson,
    },
    #[default]
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
pub struct ToolJson {
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub sql: Option<String>,
    #[serde(default)]
    pub query: Option<String>,
}

impl ToolJson {
    /// Generated query, preferring `sql` over `query`.
    pub fn generated_query(&self) -> Option<&str> {
        self.sql.as_deref().or(self.query.as_deref())
    }
}

/// Decode every element on its own so one odd item does not hide the rest.
fn lenient_items<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: serde::de::DeserializeOwned + Default,
{
    let raw = Option::<Vec<Value>>::deserialize(deserializer).unwrap_or_default();
    Ok(raw
        .unwrap_or_default()
        .into_iter()
        .map(|v| serde_json::from_value(v).unwrap_or_default())
        .collect())
}

fn content_items(values: &[Value]) -> Vec<ContentItem> {
    values
        .iter()
        .map(|v| ContentItem::deserialize(v).unwrap_or_default())
        .collect()
}

/// Frame for an already-parsed event body holding `delta.content`.
pub fn delta_frame(payload: &Value) -> StreamFrame {
    match payload.get("delta").and_then(|d| d.get("content")) {
        Some(Value::Array(items)) => StreamFrame::Delta(content_items(items)),
        _ => StreamFrame::Ignored,
    }
}

/// Decode one raw line (bytes are decoded lossily as UTF-8).
pub fn decode_line(line: &[u8]) -> StreamFrame {
    let line = String::from_utf8_lossy(line);
    let line = line.trim_end_matches(['\r', '\n']);
    if line.trim().is_empty() {
        return StreamFrame::Ignored;
    }
    let Some(payload) = line.strip_prefix(DATA_MARKER) else {
        return StreamFrame::Ignored;
    };
    let payload = payload.strip_prefix(' ').unwrap_or(payload);
    if payload.trim().is_empty() {
        return StreamFrame::Ignored;
    }
    if payload.trim() == DONE_SENTINEL {
        return StreamFrame::Done;
    }
    match serde_json::from_str::<Value>(payload) {
        Ok(value) => delta_frame(&value),
        Err(_) => StreamFrame::Malformed(payload.to_string()),
    }
}
