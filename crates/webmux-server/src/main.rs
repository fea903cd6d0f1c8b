//! webmux-server: shell session multiplexer.
//!
//! Accepts WebSocket connections and gives each user a set of PTY-backed
//! terminal sessions that survive disconnects; recent output is replayed
//! when a connection for that user returns.

mod config;
mod manager;
mod routing;
mod server;
mod session;
mod transport;

use clap::Parser;
use config::ServerConfig;
use routing::RoutingMode;
use server::MuxServer;
use std::path::PathBuf;
use tracing::{error, info};

/// webmux-server — shell session multiplexer over WebSocket
#[derive(Parser, Debug)]
#[command(name = "webmux-server", version, about = "Shell session multiplexer over WebSocket")]
struct Cli {
    /// Listen port
    #[arg(short, long)]
    port: Option<u16>,

    /// Config file path
    #[arg(long, default_value = "~/.webmux/config.toml")]
    config: String,

    /// Output routing policy
    #[arg(long, value_enum)]
    routing: Option<RoutingMode>,

    /// Kill a user's sessions when their connection drops
    /// (default: sessions persist for reconnection)
    #[arg(long)]
    ephemeral: bool,

    /// Per-session scrollback capacity in bytes
    #[arg(long)]
    history_capacity: Option<usize>,

    /// Shell executable for new sessions
    #[arg(long)]
    shell: Option<String>,

    /// Maximum concurrent sessions
    #[arg(long)]
    max_sessions: Option<usize>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Initialize tracing
    use tracing_subscriber::EnvFilter;
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .init();

    info!(version = env!("CARGO_PKG_VERSION"), "starting webmux-server");

    let config_path = PathBuf::from(&cli.config);
    let server_config = match ServerConfig::load(
        Some(&config_path),
        cli.port,
        cli.max_sessions,
        cli.routing,
        cli.ephemeral,
        cli.history_capacity,
        cli.shell.as_deref(),
    ) {
        Ok(cfg) => cfg,
        Err(e) => {
            error!(error = %e, "failed to load config");
            std::process::exit(1);
        }
    };

    let server = MuxServer::new(server_config);

    tokio::select! {
        result = server.run() => {
            if let Err(e) = result {
                error!(error = %e, "server error");
                std::process::exit(1);
            }
        }
        _ = shutdown_signal() => {
            info!("received shutdown signal");
        }
    }

    info!("webmux-server stopped");
}

/// Wait for SIGTERM or SIGINT (Ctrl+C).
async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        let mut sigterm =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                .expect("failed to install SIGTERM handler");
        tokio::select! {
            _ = ctrl_c => {}
            _ = sigterm.recv() => {}
        }
    }

    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
    }
}
