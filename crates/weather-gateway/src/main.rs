//! Weather gateway: entry point.
//!
//! Accepts weather station connections on one port and browser WebSocket
//! connections on another, and relays reading requests and readings between
//! them.
//!
//! # Usage
//!
//! ```text
//! weather-gateway [OPTIONS]
//!
//! Options:
//!   --config <PATH>        TOML configuration file [default: weather-gateway.toml]
//!   --bind <IP>            Address both listeners bind to
//!   --device-port <PORT>   Port for weather stations
//!   --browser-port <PORT>  Port for browsers (WebSocket)
//!   --threads <N>          Runtime worker threads (0 = one per CPU)
//! ```
//!
//! Options left out keep the value from the configuration file, which in
//! turn falls back to built-in defaults.  A missing configuration file is
//! not an error.
//!
//! # Environment variable overrides
//!
//! | Variable               | Option           |
//! |------------------------|------------------|
//! | `WEATHER_CONFIG`       | `--config`       |
//! | `WEATHER_BIND`         | `--bind`         |
//! | `WEATHER_DEVICE_PORT`  | `--device-port`  |
//! | `WEATHER_BROWSER_PORT` | `--browser-port` |
//! | `WEATHER_THREADS`      | `--threads`      |
//!
//! Log verbosity is controlled with `RUST_LOG` (default `info`).

use std::path::PathBuf;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use anyhow::Context;
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use weather_gateway::domain::config::load_config;
use weather_gateway::domain::GatewayConfig;
use weather_gateway::infrastructure::run_server;

// ── CLI argument definitions ──────────────────────────────────────────────────

/// Gateway between weather stations (binary TCP) and browsers (WebSocket).
#[derive(Debug, Parser)]
#[command(
    name = "weather-gateway",
    about = "Relays weather station readings to browser clients",
    version
)]
struct Cli {
    /// Path of the TOML configuration file.
    #[arg(long, default_value = "weather-gateway.toml", env = "WEATHER_CONFIG")]
    config: PathBuf,

    /// IP address both listeners bind to, e.g. `0.0.0.0` or `127.0.0.1`.
    #[arg(long, env = "WEATHER_BIND")]
    bind: Option<String>,

    /// TCP port for weather station connections.
    #[arg(long, env = "WEATHER_DEVICE_PORT")]
    device_port: Option<u16>,

    /// TCP port for browser WebSocket connections.
    #[arg(long, env = "WEATHER_BROWSER_PORT")]
    browser_port: Option<u16>,

    /// Number of runtime worker threads; 0 means one per hardware thread.
    #[arg(long, env = "WEATHER_THREADS")]
    threads: Option<usize>,
}

impl Cli {
    /// Loads the configuration file and applies command-line overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed, or if the
    /// overridden values are invalid.
    fn into_gateway_config(self) -> anyhow::Result<GatewayConfig> {
        let config = load_config(&self.config)
            .with_context(|| format!("failed to load {}", self.config.display()))?;
        self.apply_overrides(config)
    }

    fn apply_overrides(self, mut config: GatewayConfig) -> anyhow::Result<GatewayConfig> {
        if let Some(bind) = self.bind {
            config.server.bind_address = bind;
        }
        if let Some(port) = self.device_port {
            config.server.device_port = port;
        }
        if let Some(port) = self.browser_port {
            config.server.browser_port = port;
        }
        if let Some(threads) = self.threads {
            config.server.worker_threads = threads;
        }
        config.validate().context("invalid command-line override")?;
        Ok(config)
    }
}

// ── Entry point ───────────────────────────────────────────────────────────────

/// Program entry point.
///
/// The runtime is built by hand rather than with `#[tokio::main]` because
/// the worker thread count comes from the configuration.
fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Cli::parse().into_gateway_config()?;

    let mut builder = tokio::runtime::Builder::new_multi_thread();
    if config.server.worker_threads > 0 {
        builder.worker_threads(config.server.worker_threads);
    }
    let runtime = builder
        .enable_all()
        .build()
        .context("failed to build the tokio runtime")?;

    runtime.block_on(serve(config))
}

async fn serve(config: GatewayConfig) -> anyhow::Result<()> {
    info!(
        "weather gateway starting: bind={}, device_port={}, browser_port={}, allow-listed devices={}",
        config.server.bind_address,
        config.server.device_port,
        config.server.browser_port,
        config.devices.len()
    );

    // Cleared by Ctrl+C; the accept loops poll it every 200 ms.
    let running = Arc::new(AtomicBool::new(true));
    let running_clone = Arc::clone(&running);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("received Ctrl+C, shutting down");
                running_clone.store(false, Ordering::Relaxed);
            }
            Err(e) => error!("failed to listen for Ctrl+C signal: {e}"),
        }
    });

    run_server(config, running).await?;

    info!("weather gateway stopped");
    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────────────────
