mod agent_cmd;
mod chat;
mod jobs;
mod secrets;

use anyhow::Result;
use console::style;
use std::path::PathBuf;

use crate::core::AppContext;
use crate::core::config::{AppConfig, CONFIG_FILE};
use crate::core::store::DateRange;
use crate::core::terminal::{self, GuideSection, print_error, print_info, print_success};
use crate::platform::{NativePlatform, Platform};

fn print_help() {
    terminal::print_banner();

    GuideSection::new("Setup")
        .command("init", "Create the data directory and a default config.toml")
        .command("secret", "Manage encrypted credentials (set, list, remove)")
        .print();

    GuideSection::new("Jobs")
        .command("run", "Run a SQL statement as a tracked job")
        .command("jobs", "List tracked jobs, newest first")
        .command("job <id>", "Show one job and its error log")
        .command("logs", "List error log entries")
        .print();

    GuideSection::new("Agents")
        .command("agent", "Manage agent profiles (create, list, show, delete)")
        .command("ask", "Send a single message to an agent")
        .command("chat", "Start an interactive chat with an agent")
        .print();

    GuideSection::new("Server")
        .command("serve", "Start the HTTP API")
        .print();

    println!(
        "\n {} {} <command> [subcommand]\n",
        style("Usage:").bold(),
        style("cortexkit").green()
    );
}

pub(crate) fn data_dir() -> PathBuf {
    NativePlatform::data_dir()
}

/// Value following `args[i]`, if any.
pub(crate) fn flag_value(args: &[String], i: usize) -> Option<String> {
    args.get(i + 1).cloned()
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct RangeFlags {
    pub from: Option<String>,
    pub to: Option<String>,
    pub days: Option<String>,
}

pub(crate) fn parse_range_flags(args: &[String], start: usize) -> RangeFlags {
    let mut flags = RangeFlags::default();
    let mut i = start;
    while i < args.len() {
        match args[i].as_str() {
            "--from" => {
                flags.from = flag_value(args, i);
                i += 2;
            }
            "--to" => {
                flags.to = flag_value(args, i);
                i += 2;
            }
            "--days" | "-d" => {
                flags.days = flag_value(args, i);
                i += 2;
            }
            _ => i += 1,
        }
    }
    flags
}

impl RangeFlags {
    pub fn to_range(&self) -> Result<Option<DateRange>> {
        Ok(DateRange::from_bounds(
            self.from.as_deref(),
            self.to.as_deref(),
            self.days.as_deref(),
        )?)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct RunCommandArgs {
    pub operation: String,
    pub statement: String,
    pub details: String,
}

pub(crate) fn parse_run_command_args(args: &[String], start: usize) -> RunCommandArgs {
    let mut parsed = RunCommandArgs::default();
    let mut i = start;
    while i < args.len() {
        match args[i].as_str() {
            "--operation" | "-o" => {
                parsed.operation = flag_value(args, i).unwrap_or_default();
                i += 2;
            }
            "--statement" | "-s" => {
                parsed.statement = flag_value(args, i).unwrap_or_default();
                i += 2;
            }
            "--details" => {
                parsed.details = flag_value(args, i).unwrap_or_default();
                i += 2;
            }
            _ => i += 1,
        }
    }
    parsed
}

pub(crate) fn parse_serve_flags(
    args: &[String],
    start: usize,
    mut host: String,
    mut port: u16,
) -> (String, u16) {
    let mut i = start;
    while i < args.len() {
        match args[i].as_str() {
            "--port" | "-p" => {
                if let Some(value) = flag_value(args, i) {
                    port = value.parse().unwrap_or(port);
                }
                i += 2;
            }
            "--host" => {
                if let Some(value) = flag_value(args, i) {
                    host = value;
                }
                i += 2;
            }
            _ => i += 1,
        }
    }
    (host, port)
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct AskArgs {
    pub agent: String,
    pub message: String,
}

/// `--agent` names the profile; everything else is the message.
pub(crate) fn parse_ask_args(args: &[String], start: usize) -> AskArgs {
    let mut agent = String::new();
    let mut words = Vec::new();
    let mut i = start;
    while i < args.len() {
        match args[i].as_str() {
            "--agent" | "-a" => {
                agent = flag_value(args, i).unwrap_or_default();
                i += 2;
            }
            word => {
                words.push(word.to_string());
                i += 1;
            }
        }
    }
    AskArgs {
        agent,
        message: words.join(" "),
    }
}

async fn run_init(data_dir: &std::path::Path) -> Result<()> {
    tokio::fs::create_dir_all(data_dir).await?;
    NativePlatform::restrict_dir_permissions(data_dir);

    let config_path = data_dir.join(CONFIG_FILE);
    if config_path.exists() {
        print_info(&format!("Keeping existing {}", config_path.display()));
    } else {
        let path = AppConfig::default().save(data_dir).await?;
        NativePlatform::restrict_file_permissions(&path);
        print_success(&format!("Wrote {}", path.display()));
    }

    // Opening the context creates the database and schema.
    let ctx = AppContext::open(data_dir).await?;
    GuideSection::new("cortexkit initialized")
        .status("Data dir", &data_dir.display().to_string())
        .status(
            "Database",
            &ctx.store
                .path()
                .map(|p| p.display().to_string())
                .unwrap_or_default(),
        )
        .blank()
        .text("Fill in [account] and [service] in config.toml, then store your key:")
        .hint("cortexkit secret set rsa_private_key --file rsa_key.p8", "")
        .print();
    Ok(())
}

async fn run_serve(ctx: AppContext, args: &[String]) -> Result<()> {
    let (host, port) = parse_serve_flags(
        args,
        2,
        ctx.config.server.host.clone(),
        ctx.config.server.port,
    );
    GuideSection::new("API Server")
        .status("Listening", &format!("http://{}:{}", host, port))
        .status("Max concurrent jobs", &ctx.runner.max_concurrent().to_string())
        .print();
    println!();
    crate::interfaces::web::serve(ctx, &host, port).await
}

pub async fn run_main() -> Result<()> {
    let args: Vec<String> = std::env::args().collect();
    let cmd = args.get(1).map(String::as_str).unwrap_or("help");
    let data_dir = data_dir();

    if matches!(cmd, "help" | "--help" | "-h") {
        print_help();
        return Ok(());
    }
    if cmd == "init" {
        return run_init(&data_dir).await;
    }

    let ctx = AppContext::open(&data_dir).await?;
    // Interactive commands keep tracing out of the terminal.
    let suppress_stdout = cmd != "serve";
    crate::logging::init_logging(&data_dir, ctx.config.logging.tracing_level(), suppress_stdout)?;

    match cmd {
        "serve" => run_serve(ctx, &args).await,
        "run" => jobs::run_statement(&ctx, &parse_run_command_args(&args, 2)).await,
        "jobs" => jobs::list_jobs(&ctx, &parse_range_flags(&args, 2)).await,
        "job" => jobs::show_job(&ctx, args.get(2).map(String::as_str)).await,
        "logs" => jobs::list_logs(&ctx, &parse_range_flags(&args, 2)).await,
        "agent" => agent_cmd::run_agent_command(&ctx, &args).await,
        "ask" => chat::ask_once(&ctx, &parse_ask_args(&args, 2)).await,
        "chat" => chat::run_chat(&ctx, &parse_ask_args(&args, 2).agent).await,
        "secret" => secrets::run_secret_command(&ctx, &args).await,
        other => {
            print_error(&format!("Unknown command '{}'", other));
            print_help();
            Ok(())
        }
    }
}
