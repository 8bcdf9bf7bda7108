//! # converge
//!
//! Entry point for the converge runtime.
//!
//! ## Startup
//!
//! 1. **Configuration** - defaults, optional file, `CONVERGE_*` overrides
//! 2. **Tracing** - `RUST_LOG` or the configured level
//! 3. **Runtime** - event bus, storage and controller
//!
//! ## Shutdown
//!
//! On Ctrl+C the controller stops taking work and waits for in-flight
//! reconciles, then the bus drains its buffer and closes.

#![forbid(unsafe_code)]
#![forbid(clippy::unwrap_used)]
#![forbid(clippy::panic)]
#![deny(clippy::expect_used)]

use std::time::Instant;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal;
use tracing::{info, warn};

use converge::cli::{Cli, Commands};
use converge::telemetry::init_tracing;
use converge::{Runtime, RuntimeConfig};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = RuntimeConfig::load(cli.config.as_deref()).with_context(|| match &cli.config {
        Some(path) => format!("Failed to load configuration from {}", path.display()),
        None => "Failed to load configuration".to_string(),
    })?;

    match cli.command() {
        Commands::CheckConfig => {
            let rendered = config.to_toml().context("Failed to render configuration")?;
            println!("{rendered}");
            Ok(())
        }
        Commands::Run => run(config).await,
    }
}

async fn run(config: RuntimeConfig) -> Result<()> {
    let start_time = Instant::now();
    init_tracing(&config.log_level);

    info!(source = %config.source, "converge starting");

    let runtime = Runtime::new(config).context("Failed to build runtime")?;
    runtime.start().await.context("Failed to start runtime")?;

    info!(elapsed = ?start_time.elapsed(), "converge running; press Ctrl+C to stop");

    if let Err(e) = signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for shutdown signal; stopping");
    }

    info!("Shutting down");
    runtime.shutdown().await;
    Ok(())
}
