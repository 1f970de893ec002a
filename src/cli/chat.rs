use anyhow::{Result, anyhow};
use console::style;
use tokio::io::{AsyncBufReadExt, BufReader};

use super::AskArgs;
use crate::core::AppContext;
use crate::core::agent::session::display_text;
use crate::core::agent::{AgentProfile, AssembledResponse, ChatSession};
use crate::core::terminal::{GuideSection, print_error, print_info};

async fn load_profile(ctx: &AppContext, agent: &str) -> Result<AgentProfile> {
    if agent.trim().is_empty() {
        return Err(anyhow!("--agent <name> is required"));
    }
    ctx.profiles
        .get(agent)
        .await?
        .ok_or_else(|| anyhow!("Agent '{}' not found", agent))
}

fn print_response(response: &AssembledResponse) {
    println!("\n{}\n", display_text(&response.text));
    if response.has_query() {
        println!("{}", style("Generated SQL:").bold().cyan());
        println!("{}\n", style(&response.query).dim());
    }
}

pub async fn ask_once(ctx: &AppContext, args: &AskArgs) -> Result<()> {
    if args.message.trim().is_empty() {
        print_error("A message is required.");
        GuideSection::new("cortexkit ask")
            .hint("cortexkit ask --agent sales \"How many orders shipped last week?\"", "")
            .print();
        return Ok(());
    }
    let profile = load_profile(ctx, &args.agent).await?;
    let client = ctx.agent_client().await?;
    let response = client
        .invoke_and_assemble(&profile.settings, &args.message)
        .await?;
    print_response(&response);
    Ok(())
}

pub async fn run_chat(ctx: &AppContext, agent: &str) -> Result<()> {
    let profile = load_profile(ctx, agent).await?;
    let client = ctx.agent_client().await?;
    let mut session = ChatSession::new(&profile.name);

    GuideSection::new(&format!("Chat with {}", profile.name))
        .status("Model", profile.settings.model_or_default())
        .status("Transport", &format!("{:?}", client.transport()))
        .blank()
        .text("/reset clears the conversation, /exit quits.")
        .print();

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("{} ", style("you>").green().bold());
        std::io::Write::flush(&mut std::io::stdout())?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let message = line.trim();
        match message {
            "" => continue,
            "/exit" | "/quit" => break,
            "/reset" => {
                session.reset();
                print_info("Conversation cleared.");
                continue;
            }
            _ => {}
        }

        match session.ask(&client, &profile.settings, message).await {
            Ok(response) => print_response(&response),
            Err(e) => print_error(&e.to_string()),
        }
    }
    Ok(())
}
