//! lswitchd - P4 linker switch program registry daemon
//!
//! Links the configured startup programs, then serves the program config
//! RPC surface until interrupted.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use lswitch_registry::{
    server, DaemonConfig, LinkerRuntime, LinkingCoordinator, DEFAULT_CONFIG_PATH,
};
use tokio::net::TcpListener;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// P4 linker switch program registry daemon
#[derive(Parser, Debug)]
#[command(name = "lswitchd")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file
    #[arg(short = 'c', long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Override the RPC listen address (e.g. 127.0.0.1:9091)
    #[arg(short = 'l', long)]
    listen: Option<String>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    init_logging();

    info!("--- Starting lswitchd ---");

    match run(args).await {
        Ok(()) => {
            info!("lswitchd: shutdown complete");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("lswitchd: exiting with error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn init_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .with_thread_ids(true)
        .with_level(true)
        .init();
}

async fn run(args: Args) -> Result<()> {
    let mut config = DaemonConfig::load_or_default(&args.config)?;
    if let Some(listen) = args.listen {
        config.server.listen_addr = listen;
    }
    config.validate()?;

    let coordinator = Arc::new(LinkingCoordinator::new(
        Arc::new(LinkerRuntime::new()),
        config.coordinator_config(),
    ));

    preload_programs(&coordinator, &config).await;

    let addr = config.listen_addr()?;
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;

    server::serve(listener, coordinator, shutdown_signal()).await?;
    Ok(())
}

/// Links the `[[programs]]` listed in the config, in order.
///
/// A program that fails to load is logged and skipped.
async fn preload_programs(coordinator: &LinkingCoordinator, config: &DaemonConfig) {
    for program in &config.programs {
        let config_str = match program.read() {
            Ok(text) => text,
            Err(e) => {
                warn!(program = %program.name, error = %e, "Startup program unreadable");
                continue;
            }
        };

        match coordinator.add(&program.name, &config_str).await {
            Ok(version) => info!(program = %program.name, version, "Startup program linked"),
            Err(e) => warn!(program = %program.name, error = %e, "Startup program not linked"),
        }
    }
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => warn!("Received SIGINT, shutting down gracefully..."),
        Err(e) => error!(error = %e, "Failed to listen for ctrl-c"),
    }
}
