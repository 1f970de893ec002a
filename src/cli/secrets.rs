use anyhow::{Result, anyhow};

use super::flag_value;
use crate::core::AppContext;
use crate::core::terminal::{GuideSection, print_error, print_info, print_success};

fn print_usage() {
    GuideSection::new("cortexkit secret")
        .command("set <key> <value>", "Store a secret")
        .command("set <key> --file <path>", "Store a file's contents (e.g. a PEM key)")
        .command("list", "List stored keys")
        .command("remove <key>", "Delete a secret")
        .blank()
        .hint("cortexkit secret set rsa_private_key --file rsa_key.p8", "")
        .print();
}

/// Resolve the value for `secret set`: `--file` wins over a positional value.
pub(crate) async fn secret_value(args: &[String], start: usize) -> Result<Option<String>> {
    let mut positional = None;
    let mut i = start;
    while i < args.len() {
        match args[i].as_str() {
            "--file" | "-f" => {
                let path = flag_value(args, i).ok_or_else(|| anyhow!("--file needs a path"))?;
                let content = tokio::fs::read_to_string(&path)
                    .await
                    .map_err(|e| anyhow!("Cannot read {}: {}", path, e))?;
                return Ok(Some(content));
            }
            value => {
                if positional.is_none() {
                    positional = Some(value.to_string());
                }
                i += 1;
            }
        }
    }
    Ok(positional)
}

pub async fn run_secret_command(ctx: &AppContext, args: &[String]) -> Result<()> {
    let sub_cmd = args.get(2).map(String::as_str).unwrap_or("");
    let key = args.get(3).map(String::as_str).unwrap_or("").trim();

    match sub_cmd {
        "set" => {
            if key.is_empty() {
                print_usage();
                return Ok(());
            }
            let Some(value) = secret_value(args, 4).await? else {
                print_error("A value or --file is required.");
                return Ok(());
            };
            ctx.vault.set_secret(key, &value).await?;
            print_success(&format!("Stored secret '{}'.", key));
        }
        "list" => {
            let keys = ctx.vault.list_keys().await?;
            if keys.is_empty() {
                print_info("The vault is empty.");
                return Ok(());
            }
            let mut section = GuideSection::new("Secrets");
            for key in &keys {
                section = section.bullet(key);
            }
            section.print();
        }
        "remove" | "delete" => {
            if ctx.vault.remove_secret(key).await? {
                print_success(&format!("Removed secret '{}'.", key));
            } else {
                print_error(&format!("No secret named '{}'.", key));
            }
        }
        _ => print_usage(),
    }
    Ok(())
}
