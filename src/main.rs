//! pac-harness entry point.
//!
//! Starts a world of PAs from environment configuration and keeps it
//! running until Ctrl-C.

use std::time::Duration;

use anyhow::Context;
use tracing_subscriber::EnvFilter;

use pac_harness::config::HarnessConfig;
use pac_harness::context::{PaConfig, WorldConfig, WorldContext};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration first: it decides the log format
    let config = HarnessConfig::from_env().context("invalid harness configuration")?;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if config.log_json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    let pa = PaConfig::new(config.ready_timeout)
        .with_rank(config.rank.clone())
        .with_subscription_capacity(config.subscription_capacity);
    let world_config = WorldConfig::new(config.pa_count, config.ready_timeout)
        .with_pa(pa)
        .with_transport(config.transport())
        .with_private_transport(config.private_transport);

    let mut world = WorldContext::new(world_config)?;
    world.start().await.context("world failed to start")?;

    for pa in world.pas() {
        tracing::info!(
            pa = %pa.name(),
            id = %pa.id(),
            api = ?pa.api_base_url(),
            transport_port = ?pa.transport_port(),
            "PA ready"
        );
    }

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl-c")?;
    tracing::info!("shutdown requested");

    let report = tokio::time::timeout(Duration::from_secs(30), world.shutdown())
        .await
        .context("shutdown timed out")?;
    if report.is_clean() {
        tracing::info!("harness stopped");
    } else {
        tracing::warn!(%report, "harness stopped with teardown failures");
    }
    Ok(())
}
