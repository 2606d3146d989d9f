//! Sprint Relay — low-latency blockchain block-event relay.
//!
//! Polls one or more Bitcoin-RPC-compatible upstreams for new block tips,
//! adapts its polling cadence to recent activity, and fans out a
//! notification to connected peers and a metrics endpoint the moment a
//! new tip is observed.

use clap::Parser;
use sprint_relay::{Config, Controller};
use std::path::PathBuf;
use std::process::ExitCode;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Parser)]
#[command(name = "sprint-relay", version, about = "Low-latency blockchain block-event relay")]
struct Args {
    /// Path to a TOML config file. Defaults layer under it; environment
    /// variables (SPRINT_*) layer on top.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the configured log level (trace, debug, info, warn, error).
    #[arg(long)]
    log_level: Option<String>,
}

fn init_logging(level_override: Option<&str>, config_level: Option<&str>) {
    let directive = level_override.or(config_level).unwrap_or("info");
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(format!("sprint_relay={directive}")));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    let config = match Config::load(args.config.as_deref()) {
        Ok(cfg) => cfg,
        Err(e) => {
            // Logging isn't initialized yet — a bad config is the one
            // failure mode that must be visible even with no tracing
            // subscriber wired up.
            eprintln!("fatal: {e}");
            return ExitCode::FAILURE;
        }
    };

    init_logging(args.log_level.as_deref(), config.log_level.as_deref());

    info!("────────────────────────────────────────────");
    info!("  sprint-relay v{VERSION}");
    info!("────────────────────────────────────────────");
    info!(sources = config.rpc_nodes.len(), turbo = config.turbo_mode, peers = config.peers.len(), "starting");

    let cancel = CancellationToken::new();
    let shutdown_cancel = cancel.clone();
    tokio::spawn(async move {
        wait_for_shutdown_signal().await;
        info!("shutdown signal received");
        shutdown_cancel.cancel();
    });

    let controller = Controller::new(config);
    match controller.run(cancel).await {
        Ok(()) => {
            info!("sprint-relay exited cleanly");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!(error = %e, "sprint-relay exited with a fatal error");
            ExitCode::FAILURE
        }
    }
}

#[cfg(unix)]
async fn wait_for_shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};
    let mut sigterm = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = sigterm.recv() => {}
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
