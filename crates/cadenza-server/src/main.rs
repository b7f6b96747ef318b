//! Cadenza server binary.
//!
//! # Usage
//!
//! ```bash
//! # Defaults (0.0.0.0:12346), env-driven configuration
//! cadenza-server
//!
//! # Explicit bind and verbose logs
//! cadenza-server --host 127.0.0.1 --port 12346 --log-level debug
//! ```
//!
//! Exits 0 after a graceful SIGINT/SIGTERM stop, 1 on fatal startup
//! errors.

use cadenza_server::{Server, ServerConfig};
use clap::Parser;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Cadenza multiplayer coordination server
#[derive(Parser, Debug)]
#[command(name = "cadenza-server")]
#[command(about = "Real-time room coordination server for rhythm game multiplayer")]
#[command(version)]
struct Args {
    /// Bind host (overrides HOST)
    #[arg(long)]
    host: Option<String>,

    /// Bind port (overrides PORT)
    #[arg(short, long)]
    port: Option<u16>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));
    tracing_subscriber::registry().with(fmt::layer()).with(filter).init();

    let mut config = ServerConfig::from_env()?;
    if let Some(host) = args.host {
        config.host = host;
    }
    if let Some(port) = args.port {
        config.port = port;
    }

    tracing::info!("cadenza server starting");
    let server = Server::bind(config).await?;
    tracing::info!("listening on {}", server.local_addr()?);

    let handle = server.shutdown_handle();
    tokio::spawn(async move {
        wait_for_stop_signal().await;
        tracing::info!("stop signal received");
        handle.shutdown();
    });

    server.run().await?;
    Ok(())
}

#[cfg(unix)]
async fn wait_for_stop_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    let mut term = match signal(SignalKind::terminate()) {
        Ok(term) => term,
        Err(err) => {
            tracing::error!("cannot install SIGTERM handler: {err}");
            let _ = tokio::signal::ctrl_c().await;
            return;
        },
    };
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {},
        _ = term.recv() => {},
    }
}

#[cfg(not(unix))]
async fn wait_for_stop_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
