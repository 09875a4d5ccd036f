//! # Stagecast relay server
//!
//! Room-based presence and signaling relay for live event broadcasting:
//! one broadcaster, many viewers, chat fan-out, and per-user
//! notifications. Media itself flows peer-to-peer; this process only
//! bootstraps the peer sessions and relays room events.
//!
//! ## Usage
//!
//! ```bash
//! # Run with default settings
//! stagecast
//!
//! # Run with environment variables
//! STAGECAST_PORT=8080 STAGECAST_HOST=0.0.0.0 stagecast
//! ```

mod config;
mod handlers;
mod metrics;

use anyhow::Result;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "stagecast=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = config::Config::load()?;

    tracing::info!("Starting Stagecast relay on {}:{}", config.host, config.port);

    metrics::init_metrics();

    handlers::run_server(config).await?;

    Ok(())
}
