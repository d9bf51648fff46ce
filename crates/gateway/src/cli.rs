//! Command-line interface: argument parsing, config loading, and the
//! local chat mode.

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;

use pal_domain::approval::ApprovalOutcome;
use pal_domain::chunk::ChunkPayload;
use pal_domain::config::Config;
use pal_domain::prompt::{PromptEnvelope, Source};

use crate::runtime;
use crate::state::AppState;
use crate::transport::{ChatTransport, LocalTransport};

/// Palaver — a multi-transport agentic chat runtime.
#[derive(Debug, Parser)]
#[command(name = "palaver", version, about)]
pub struct Cli {
    /// Path to the config file (default: ./palaver.toml).
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Start the gateway server (default when no subcommand is given).
    Serve,
    /// Talk to the agent from this terminal.
    Chat {
        /// Sender id attached to your messages.
        #[arg(long, default_value = "cli-user")]
        sender: String,
    },
    /// Configuration utilities.
    #[command(subcommand)]
    Config(ConfigCommand),
    /// Print version information.
    Version,
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Check the config file for problems.
    Validate,
    /// Print the effective configuration.
    Show,
}

/// Load the config file, falling back to defaults when it is absent.
pub fn load_config(path: Option<&PathBuf>) -> anyhow::Result<(Config, PathBuf)> {
    let path = path
        .cloned()
        .unwrap_or_else(|| PathBuf::from("palaver.toml"));
    let config = if path.exists() {
        let raw = std::fs::read_to_string(&path)
            .with_context(|| format!("reading {}", path.display()))?;
        Config::from_toml(&raw).with_context(|| format!("parsing {}", path.display()))?
    } else {
        Config::default()
    };
    Ok((config, path))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Chat mode
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Line-oriented local conversation against the runtime via the CLI
/// transport. Approval requests are answered inline.
pub async fn chat(state: AppState, sender: String) -> anyhow::Result<()> {
    let cli_transport = Arc::new(LocalTransport::new(Source::Cli, "default", false));
    // Must be registered before intake starts so its reader spawns.
    state.composite.register(cli_transport.clone());

    let shutdown = CancellationToken::new();
    runtime::start(&state, &shutdown);

    let key = cli_transport
        .create_topic_if_needed(None, None, None, Some("cli"))
        .await?;
    let mut chunks = cli_transport.subscribe();

    eprintln!("palaver chat — Ctrl+D to exit");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        eprint!("you> ");
        std::io::stderr().flush().ok();
        let Some(line) = lines.next_line().await? else {
            break;
        };
        let prompt = line.trim();
        if prompt.is_empty() {
            continue;
        }

        let mut envelope = PromptEnvelope::new(prompt, sender.as_str(), Source::Cli);
        envelope.conversation_id = Some(key.conversation_id);
        envelope.thread_id = Some(key.thread_id);
        envelope.agent_id = Some(key.agent_id.clone());
        cli_transport.submit(envelope).await?;

        // Stream the reply until the turn ends.
        'turn: while let Ok((chunk_key, chunk)) = chunks.recv().await {
            if chunk_key != key {
                continue;
            }
            match chunk.payload {
                ChunkPayload::Content { delta } => {
                    print!("{delta}");
                    std::io::stdout().flush().ok();
                }
                ChunkPayload::Reasoning { .. } | ChunkPayload::ToolCall { .. } => {}
                ChunkPayload::Terminal => {
                    println!();
                    break 'turn;
                }
                ChunkPayload::Error { message } => {
                    eprintln!("\nerror: {message}");
                    break 'turn;
                }
                ChunkPayload::Approval { request } => {
                    eprintln!("\napproval requested:");
                    for call in &request.calls {
                        eprintln!("  {}({})", call.tool_name, call.arguments);
                    }
                    eprint!("approve? [y]es / [n]o / [a]lways: ");
                    std::io::stderr().flush().ok();
                    let answer = lines.next_line().await?.unwrap_or_default();
                    let outcome = match answer.trim() {
                        "y" | "yes" => ApprovalOutcome::Approved,
                        "a" | "always" => ApprovalOutcome::ApprovedAndRemember,
                        _ => ApprovalOutcome::Rejected,
                    };
                    state.approvals.resolve(&request.approval_id, outcome);
                }
            }
        }
    }

    shutdown.cancel();
    Ok(())
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Config utilities
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Print validation issues; returns false when any is an error.
pub fn validate_config(config: &Config, path: &std::path::Path) -> bool {
    use pal_domain::config::ConfigSeverity;

    let issues = config.validate();
    if issues.is_empty() {
        println!("{}: ok", path.display());
        return true;
    }
    let mut valid = true;
    for issue in &issues {
        match issue.severity {
            ConfigSeverity::Warning => println!("warning: {issue}"),
            ConfigSeverity::Error => {
                println!("error: {issue}");
                valid = false;
            }
        }
    }
    valid
}

pub fn show_config(config: &Config) {
    match toml::to_string_pretty(config) {
        Ok(rendered) => println!("{rendered}"),
        Err(e) => eprintln!("failed to render config: {e}"),
    }
}
