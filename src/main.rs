#![forbid(unsafe_code)]

//! `mcp-bridge`: MCP message bridge binary.
//!
//! Loads configuration, restores persisted client state, and serves the
//! bridge's MCP tools over stdio or a Unix-domain socket until a shutdown
//! signal arrives.

use std::path::PathBuf;

use clap::{Parser, ValueEnum};
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

use mcp_bridge::bridge::BridgeOrchestrator;
use mcp_bridge::config::TransportMode;
use mcp_bridge::registry::StateRegistry;
use mcp_bridge::{AppError, BridgeConfig, Result};

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum TransportArg {
    Stdio,
    Socket,
}

impl From<TransportArg> for TransportMode {
    fn from(arg: TransportArg) -> Self {
        match arg {
            TransportArg::Stdio => Self::Stdio,
            TransportArg::Socket => Self::Socket,
        }
    }
}

#[derive(Debug, Parser)]
#[command(name = "mcp-bridge", about = "MCP message bridge", version, long_about = None)]
struct Cli {
    /// Path to the TOML configuration file. Defaults apply when omitted.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Override the configured transport.
    #[arg(long, value_enum)]
    transport: Option<TransportArg>,

    /// Override the configured socket path.
    #[arg(long)]
    socket_path: Option<PathBuf>,

    /// Log output format (text or json).
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,
}

fn main() -> Result<()> {
    let args = Cli::parse();
    init_tracing(args.log_format)?;
    info!("mcp-bridge bootstrap");

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| AppError::Config(format!("failed to build tokio runtime: {err}")))?
        .block_on(run(args))
}

async fn run(args: Cli) -> Result<()> {
    // ── Load configuration ──────────────────────────────
    let mut config = match &args.config {
        Some(path) => BridgeConfig::load_from_path(path)?,
        None => BridgeConfig::default(),
    };
    if let Some(transport) = args.transport {
        config.transport = transport.into();
    }
    if let Some(path) = args.socket_path {
        config.socket_path = path;
    }
    config.validate()?;
    info!(
        transport = ?config.transport,
        socket = %config.socket_path.display(),
        db = ?config.db_path(),
        "configuration loaded"
    );

    // ── Restore state and start ─────────────────────────
    let registry = StateRegistry::open(config.registry.clone()).await?;
    let bridge = BridgeOrchestrator::new(config, registry);
    bridge.initialize().await;
    bridge.start().await?;
    info!("bridge ready");

    // ── Wait for shutdown ───────────────────────────────
    tokio::select! {
        () = shutdown_signal() => info!("shutdown signal received"),
        () = bridge.closed() => info!("transport closed"),
    }
    bridge.stop().await;

    info!("mcp-bridge shut down");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(err) => {
                tracing::warn!(%err, "failed to register SIGTERM handler, using ctrl-c only");
                let _ = ctrl_c.await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(err) = ctrl_c.await {
            tracing::error!(%err, "ctrl-c signal handler failed");
        }
    }
}

/// Logs go to stderr so stdout stays free for the stdio MCP transport.
fn init_tracing(log_format: LogFormat) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr);

    match log_format {
        LogFormat::Text => subscriber
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
        LogFormat::Json => subscriber
            .json()
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
    }

    Ok(())
}
