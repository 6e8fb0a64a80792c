mod api;
mod bootstrap;
mod config;
mod editor;
mod events;
mod headers;
mod probe;
mod proxy;
mod retry;
mod rewrite;
mod sdk;
mod server;

use crate::bootstrap::BootstrapState;
use crate::config::AppConfig;
use crate::editor::ExportOptions;
use crate::rewrite::RewriteTable;
use crate::server::AppState;
use anyhow::Context;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "tkdesigner", version, about = "TK Designer edge server")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Serve the SDK proxy, vendor rewrites and editor endpoints.
    Serve {
        /// TOML file with `[[rewrites]]` entries replacing the default table.
        #[arg(long, env = "REWRITES_FILE")]
        rewrites: Option<PathBuf>,
    },
    /// Bootstrap a headless editor against the SDK and report the outcome.
    Probe {
        /// Script URL to load; defaults to the configured upstream SDK.
        #[arg(long)]
        sdk_url: Option<String>,
        /// Export the opened design as PNG into this file.
        #[arg(long)]
        export: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let config = AppConfig::from_env()?;

    match cli.command.unwrap_or(Command::Serve { rewrites: None }) {
        Command::Serve { rewrites } => serve(config, rewrites).await,
        Command::Probe { sdk_url, export } => {
            let sdk_url = sdk_url.unwrap_or_else(|| config.sdk_upstream_url.to_string());
            let client = reqwest::Client::builder()
                .timeout(config.upstream_timeout)
                .build()?;
            let export_options = export.as_ref().map(|_| ExportOptions::default());
            let report =
                probe::run(client, config.bootstrap_options(sdk_url.clone()), export_options).await;
            if report.state != BootstrapState::Open {
                anyhow::bail!("editor did not open from {sdk_url}: {:?}", report.state);
            }
            println!("editor opened from {sdk_url}");
            if let (Some(path), Some(result)) = (export, report.export) {
                let design = result.context("export failed")?;
                tokio::fs::write(&path, &design.data)
                    .await
                    .with_context(|| format!("failed to write {}", path.display()))?;
                println!("exported {} bytes to {}", design.data.len(), path.display());
            }
            Ok(())
        }
    }
}

async fn serve(config: AppConfig, rewrites: Option<PathBuf>) -> anyhow::Result<()> {
    let rewrites_file = rewrites.or_else(|| config.rewrites_file.clone());
    let table = match &rewrites_file {
        Some(path) => RewriteTable::load(path)
            .with_context(|| format!("failed to load rewrites from {}", path.display()))?,
        None => RewriteTable::defaults(&config.vendor),
    };
    if config.api_key.is_none() {
        tracing::warn!("no editor API key configured; /_editor/config will report an error");
    }

    tracing::debug!(schedule = ?config.bootstrap.retry.schedule(), "editor retry schedule");
    let addr = config.bind_addr;
    let state = AppState::with_rewrites(config, table)?;
    tracing::info!(%addr, "starting tkdesigner server");
    server::run(addr, state).await
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .try_init();
}
