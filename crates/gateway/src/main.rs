use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use pal_domain::config::{Config, ConfigSeverity};
use pal_domain::model::LanguageModel;
use pal_gateway::cli::{self, Cli, Command, ConfigCommand};
use pal_gateway::model::DevEchoModel;
use pal_gateway::runtime;
use pal_gateway::runtime::tools::ToolSet;
use pal_gateway::state::build_app_state;
use pal_gateway::{api, state::AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        // Default to serve when no subcommand is given.
        None | Some(Command::Serve) => {
            init_tracing();
            let (config, _path) = cli::load_config(cli.config.as_ref())?;
            run_server(Arc::new(config)).await
        }
        Some(Command::Chat { sender }) => {
            // Keep stdout clean for the conversation.
            init_tracing_quiet();
            let (config, _path) = cli::load_config(cli.config.as_ref())?;
            let state = build_state(Arc::new(config))?;
            cli::chat(state, sender).await
        }
        Some(Command::Config(ConfigCommand::Validate)) => {
            let (config, path) = cli::load_config(cli.config.as_ref())?;
            if !cli::validate_config(&config, &path) {
                std::process::exit(1);
            }
            Ok(())
        }
        Some(Command::Config(ConfigCommand::Show)) => {
            let (config, _path) = cli::load_config(cli.config.as_ref())?;
            cli::show_config(&config);
            Ok(())
        }
        Some(Command::Version) => {
            println!("palaver {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

/// Structured JSON tracing for the server.
fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,pal_gateway=debug")),
        )
        .json()
        .init();
}

/// Warnings-only tracing for chat mode.
fn init_tracing_quiet() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();
}

fn build_state(config: Arc<Config>) -> anyhow::Result<AppState> {
    // Concrete LLM providers are wired by embedders; the binary runs
    // the development echo model.
    let (state, _queue) = build_app_state(config, Arc::new(DevEchoModel), Arc::new(ToolSet::new()))
        .context("building app state")?;
    Ok(state)
}

async fn run_server(config: Arc<Config>) -> anyhow::Result<()> {
    tracing::info!("palaver starting");

    // ── Config validation ────────────────────────────────────────────
    let issues = config.validate();
    for issue in &issues {
        match issue.severity {
            ConfigSeverity::Warning => tracing::warn!("config: {issue}"),
            ConfigSeverity::Error => tracing::error!("config: {issue}"),
        }
    }
    if issues.iter().any(|i| i.severity == ConfigSeverity::Error) {
        anyhow::bail!(
            "config validation failed with {} error(s)",
            issues
                .iter()
                .filter(|i| i.severity == ConfigSeverity::Error)
                .count()
        );
    }

    let state = build_state(config.clone())?;
    tracing::info!(model = state.model.model_id(), "model ready");

    // ── Runtime: intake + scheduler ──────────────────────────────────
    let shutdown = CancellationToken::new();
    runtime::start(&state, &shutdown);
    tracing::info!("prompt intake + scheduler started");

    // ── Router ───────────────────────────────────────────────────────
    let app = api::router()
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .layer(tower::limit::ConcurrencyLimitLayer::new(
            config.server.max_concurrent_requests,
        ))
        .with_state(state);

    // ── Bind ─────────────────────────────────────────────────────────
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding to {addr}"))?;
    tracing::info!(addr = %addr, "palaver listening");

    let server_shutdown = shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutdown requested");
            server_shutdown.cancel();
        })
        .await
        .context("axum server error")?;

    Ok(())
}
