use anyhow::{Result, anyhow};
use console::style;

use super::flag_value;
use crate::core::AppContext;
use crate::core::agent::AgentSettings;
use crate::core::agent::profile::{SEARCH_TOOL, TEXT_TO_SQL_TOOL, Tool, ToolResource};
use crate::core::terminal::{GuideSection, print_error, print_info, print_success};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct AgentCreateArgs {
    pub name: String,
    pub model: Option<String>,
    pub instruction: Option<String>,
    pub semantic_model_file: Option<String>,
    pub search_service: Option<String>,
    pub max_results: Option<u32>,
    pub database: Option<String>,
    pub schema: Option<String>,
    pub settings_file: Option<String>,
}

pub(crate) fn parse_agent_create_args(args: &[String], start: usize) -> AgentCreateArgs {
    let mut parsed = AgentCreateArgs::default();
    let mut i = start;
    while i < args.len() {
        let value = flag_value(args, i);
        match args[i].as_str() {
            "--model" => parsed.model = value,
            "--instruction" => parsed.instruction = value,
            "--semantic-model" => parsed.semantic_model_file = value,
            "--search-service" => parsed.search_service = value,
            "--max-results" => parsed.max_results = value.and_then(|v| v.parse().ok()),
            "--database" => parsed.database = value,
            "--schema" => parsed.schema = value,
            "--settings-file" => parsed.settings_file = value,
            positional => {
                if parsed.name.is_empty() && !positional.starts_with('-') {
                    parsed.name = positional.to_string();
                }
                i += 1;
                continue;
            }
        }
        i += 2;
    }
    parsed
}

impl AgentCreateArgs {
    /// Build settings from flags. Database and schema fall back to the
    /// warehouse section of the config.
    pub fn to_settings(&self, ctx: &AppContext) -> AgentSettings {
        let mut settings = AgentSettings::default();
        if let Some(model) = &self.model {
            settings.model = model.clone();
        }
        if let Some(instruction) = &self.instruction {
            settings.response_instruction = instruction.clone();
        }
        if let Some(file) = &self.semantic_model_file {
            settings.tools.push(Tool::new(TEXT_TO_SQL_TOOL, "analyst1"));
            settings.tool_resources.insert(
                "analyst1".to_string(),
                ToolResource {
                    semantic_model_file: Some(file.clone()),
                    ..Default::default()
                },
            );
        }
        if let Some(service) = &self.search_service {
            settings.tools.push(Tool::new(SEARCH_TOOL, "search1"));
            settings.tool_resources.insert(
                "search1".to_string(),
                ToolResource {
                    name: Some(service.clone()),
                    max_results: self.max_results,
                    database: self.database.clone().or_else(|| ctx.config.warehouse.database.clone()),
                    schema: self.schema.clone().or_else(|| ctx.config.warehouse.schema.clone()),
                    ..Default::default()
                },
            );
        }
        settings
    }
}

fn print_usage() {
    GuideSection::new("cortexkit agent")
        .command("create <name>", "Create an agent profile")
        .command("list", "List agent profiles")
        .command("show <name>", "Show one profile as JSON")
        .command("delete <name>", "Delete a profile")
        .blank()
        .text("create options:")
        .text("  --model <name>              Model (default llama3.1-70b)")
        .text("  --instruction <text>        Response instruction")
        .text("  --semantic-model <file>     Add a text-to-SQL tool")
        .text("  --search-service <name>     Add a search tool")
        .text("  --max-results <n>           Search results per call (default 1)")
        .text("  --database, --schema        Search service location")
        .text("  --settings-file <json>      Load full settings from a JSON file")
        .blank()
        .hint("cortexkit agent create sales --semantic-model @DB.SCHEMA.STAGE/sales.yaml", "")
        .print();
}

pub async fn run_agent_command(ctx: &AppContext, args: &[String]) -> Result<()> {
    let sub_cmd = args.get(2).map(String::as_str).unwrap_or("");
    let name = args.get(3).cloned().unwrap_or_default();

    match sub_cmd {
        "create" => {
            let parsed = parse_agent_create_args(args, 3);
            if parsed.name.is_empty() {
                print_error("Agent name is required.");
                print_usage();
                return Ok(());
            }
            let settings = match &parsed.settings_file {
                Some(path) => {
                    let raw = tokio::fs::read_to_string(path).await?;
                    serde_json::from_str(&raw)
                        .map_err(|e| anyhow!("Invalid settings file {}: {}", path, e))?
                }
                None => parsed.to_settings(ctx),
            };
            let profile = ctx.profiles.create(&parsed.name, settings).await?;
            print_success(&format!(
                "Agent '{}' created with {} tool(s).",
                profile.name,
                profile.settings.tools.len()
            ));
        }
        "list" => {
            let profiles = ctx.profiles.list().await?;
            if profiles.is_empty() {
                print_info("No agents yet. Create one with 'cortexkit agent create <name>'.");
                return Ok(());
            }
            let mut section = GuideSection::new("Agents");
            for profile in &profiles {
                let tools: Vec<&str> = profile
                    .settings
                    .tools
                    .iter()
                    .map(|t| t.tool_spec.name.as_str())
                    .collect();
                section = section.command(
                    &profile.name,
                    &format!("{} [{}]", profile.settings.model_or_default(), tools.join(", ")),
                );
            }
            section.print();
        }
        "show" => match ctx.profiles.get(&name).await? {
            Some(profile) => println!("{}", serde_json::to_string_pretty(&profile)?),
            None => print_error(&format!("Agent '{}' not found.", name)),
        },
        "delete" | "remove" => {
            if ctx.profiles.delete(&name).await? {
                print_success(&format!("Agent '{}' deleted.", name));
            } else {
                print_error(&format!("Agent '{}' not found.", name));
            }
        }
        _ => {
            println!("{}", style("Usage: cortexkit agent <command> [name]").bold());
            print_usage();
        }
    }
    Ok(())
}
