//! CLI entry point for the dirserve tool.

use anyhow::{Context, Result};
use dirserve_core::{AppState, SandboxRoot, config, serve};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

mod cli;
mod config_runtime;

use config_runtime::{
    apply_config_defaults, parse_cli_with_sources, resolve_default_log_level, resolve_settings,
};

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments first (before tracing, so --help works without logs)
    let (args, cli_sources) = parse_cli_with_sources();
    let loaded = config::load_default_file_config().context("Failed to load config file")?;
    let args = apply_config_defaults(args, &cli_sources, loaded.config.as_ref());

    // Priority: RUST_LOG env var > quiet flag > verbose flag > default (info)
    let default_level = resolve_default_log_level(&args);
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    debug!(?args, "CLI arguments parsed");
    if let Some(path) = &loaded.path {
        debug!(path = %path.display(), loaded = loaded.loaded_from_file(), "config file");
    }

    let settings = resolve_settings(&args);
    let root = SandboxRoot::new(&settings.root)
        .with_context(|| format!("Cannot serve '{}'", settings.root.display()))?;

    let listener = TcpListener::bind(settings.addr)
        .await
        .with_context(|| format!("Failed to bind {}", settings.addr))?;

    let shutdown = CancellationToken::new();
    tokio::spawn(shutdown_on_ctrl_c(shutdown.clone()));

    info!(
        chunk_size = settings.pipeline.chunk_size,
        channel_capacity = settings.pipeline.channel_capacity,
        empty_dirs = settings.pipeline.walk.include_empty_dirs,
        "dirserve starting"
    );
    let state = AppState::new(root, settings.pipeline, shutdown);
    serve::serve(listener, state).await.context("Server error")?;
    Ok(())
}

async fn shutdown_on_ctrl_c(shutdown: CancellationToken) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "cannot listen for ctrl-c; graceful shutdown disabled");
        return;
    }
    info!("shutdown requested");
    shutdown.cancel();
}
