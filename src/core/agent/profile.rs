use anyhow::{Result, anyhow};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::collections::BTreeMap;

use super::AgentError;
use crate::core::store::Store;

pub const DEFAULT_MODEL: &str = "llama3.1-70b";

pub const DEFAULT_RESPONSE_INSTRUCTION: &str = "You will always maintain a friendly tone and provide concise response. When a user asks you a question, you will also be given excerpts from different sources provided by a search engine.";

pub const RESPONSE_INSTRUCTION_SUFFIX: &str = "Use that information to provide a summary that addresses the user's question. Question: {{.Question}}\n\nContext: {{.Context}}";

pub const QUESTION_PLACEHOLDER: &str = "{{.Question}}";
pub const CONTEXT_PLACEHOLDER: &str = "{{.Context}}";

pub const TEXT_TO_SQL_TOOL: &str = "cortex_analyst_text_to_sql";
pub const SEARCH_TOOL: &str = "cortex_search";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolSpec {
    #[serde(rename = "type")]
    pub tool_type: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tool {
    pub tool_spec: ToolSpec,
}

impl Tool {
    pub fn new(tool_type: &str, name: &str) -> Self {
        Self {
            tool_spec: ToolSpec {
                tool_type: tool_type.to_string(),
                name: name.to_string(),
            },
        }
    }
}

/// Union of the resource fields any tool type may use. Which ones are sent
/// depends on the tool's declared type.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolResource {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub semantic_model_file: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_results: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentSettings {
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub response_instruction: String,
    #[serde(default)]
    pub tools: Vec<Tool>,
    #[serde(default)]
    pub tool_resources: BTreeMap<String, ToolResource>,
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            model: String::new(),
            response_instruction: DEFAULT_RESPONSE_INSTRUCTION.to_string(),
            tools: Vec::new(),
            tool_resources: BTreeMap::new(),
        }
    }
}

impl AgentSettings {
    pub fn model_or_default(&self) -> &str {
        if self.model.trim().is_empty() {
            DEFAULT_MODEL
        } else {
            &self.model
        }
    }

    /// Ensure both placeholders are present, appending the standard suffix if not.
    pub fn with_instruction_suffix(mut self) -> Self {
        if !has_placeholders(&self.response_instruction) {
            self.response_instruction.push_str(RESPONSE_INSTRUCTION_SUFFIX);
        }
        self
    }

    pub fn validate(&self) -> Result<(), AgentError> {
        if !has_placeholders(&self.response_instruction) {
            return Err(AgentError::InvalidSettings(format!(
                "response instruction must include {} and {}",
                QUESTION_PLACEHOLDER, CONTEXT_PLACEHOLDER
            )));
        }
        let mut seen = std::collections::HashSet::new();
        for tool in &self.tools {
            if tool.tool_spec.name.trim().is_empty() {
                return Err(AgentError::InvalidSettings("tool name must not be empty".into()));
            }
            if !seen.insert(tool.tool_spec.name.as_str()) {
                return Err(AgentError::InvalidSettings(format!(
                    "duplicate tool name '{}'",
                    tool.tool_spec.name
                )));
            }
        }
        Ok(())
    }

    /// Resource bundles for tools present in `tools`, shaped by tool type.
    pub fn filtered_tool_resources(&self) -> BTreeMap<String, Value> {
        let mut out = BTreeMap::new();
        for tool in &self.tools {
            let name = &tool.tool_spec.name;
            let Some(resource) = self.tool_resources.get(name) else {
                continue;
            };
            out.insert(name.clone(), shape_resource(&tool.tool_spec.tool_type, resource));
        }
        out
    }

    pub fn build_payload(&self, message: &str) -> Value {
        json!({
            "model": self.model_or_default(),
            "response_instruction": self.response_instruction,
            "messages": [{
                "role": "user",
                "content": [{"type": "text", "text": message}]
            }],
            "tool_choice": {"type": "auto"},
            "tools": self.tools,
            "tool_resources": self.filtered_tool_resources(),
        })
    }
}

fn has_placeholders(instruction: &str) -> bool {
    instruction.contains(QUESTION_PLACEHOLDER) && instruction.contains(CONTEXT_PLACEHOLDER)
}

fn shape_resource(tool_type: &str, resource: &ToolResource) -> Value {
    match tool_type {
        TEXT_TO_SQL_TOOL => json!({
            "semantic_model_file": resource.semantic_model_file.clone().unwrap_or_default(),
        }),
        SEARCH_TOOL => {
            let mut shaped = json!({
                "name": resource.name.clone().unwrap_or_default(),
                "max_results": resource.max_results.unwrap_or(1),
                "database": resource.database.clone().unwrap_or_default(),
                "schema": resource.schema.clone().unwrap_or_default(),
            });
            if let (Some(filter), Some(obj)) = (&resource.filter, shaped.as_object_mut()) {
                obj.insert("filter".to_string(), filter.clone());
            }
            shaped
        }
        _ => json!({}),
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AgentProfile {
    pub name: String,
    pub settings: AgentSettings,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Saved agent definitions on top of the store's `agents` table.
#[derive(Clone)]
pub struct AgentProfiles {
    store: Store,
}

impl AgentProfiles {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    /// New agents get the standard instruction suffix; duplicates are rejected.
    pub async fn create(&self, name: &str, settings: AgentSettings) -> Result<AgentProfile> {
        let name = name.trim();
        if name.is_empty() {
            return Err(anyhow!("Agent name must not be empty"));
        }
        if self.store.get_agent_row(name).await?.is_some() {
            return Err(anyhow!("Agent '{}' already exists", name));
        }
        self.save(name, settings.with_instruction_suffix()).await
    }

    /// Insert or update by name. Settings must already be valid.
    pub async fn save(&self, name: &str, settings: AgentSettings) -> Result<AgentProfile> {
        settings.validate()?;
        let json = serde_json::to_string(&settings)?;
        self.store.upsert_agent(name, &json).await?;
        self.get(name)
            .await?
            .ok_or_else(|| anyhow!("Agent '{}' vanished after save", name))
    }

    pub async fn get(&self, name: &str) -> Result<Option<AgentProfile>> {
        let Some(row) = self.store.get_agent_row(name).await? else {
            return Ok(None);
        };
        Ok(Some(AgentProfile {
            settings: serde_json::from_str(&row.settings_json)?,
            name: row.name,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }))
    }

    pub async fn list(&self) -> Result<Vec<AgentProfile>> {
        let mut out = Vec::new();
        for row in self.store.list_agent_rows().await? {
            out.push(AgentProfile {
                settings: serde_json::from_str(&row.settings_json)?,
                name: row.name,
                created_at: row.created_at,
                updated_at: row.updated_at,
            });
        }
        Ok(out)
    }

    pub async fn delete(&self, name: &str) -> Result<bool> {
        self.store.delete_agent_row(name).await
    }
}
