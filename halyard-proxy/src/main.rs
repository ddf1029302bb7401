//! Halyard Proxy Engine
//!
//! The Tokio async engine that loads the gateway configuration, registers HA
//! services with the routing core, probes backend health, and forwards
//! requests with failover.

#![deny(missing_docs)]

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use halyard_core::HaRouter;

mod config;
mod dispatch;
mod health_check;
mod logging;
mod server;

use config::{policy_registry, GatewayConfig};

const CONFIG_ENV: &str = "HALYARD_CONFIG";
const DEFAULT_CONFIG_PATH: &str = "halyard.toml";

/// The primary entrypoint for the Halyard gateway.
///
/// The config path is the first argument, then `HALYARD_CONFIG`, then
/// `halyard.toml` in the working directory.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let path = std::env::args()
        .nth(1)
        .or_else(|| std::env::var(CONFIG_ENV).ok())
        .map_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH), PathBuf::from);

    let config = GatewayConfig::load(&path)?;
    logging::init_logging(&config.logging);
    tracing::info!(path = %path.display(), "starting Halyard gateway");

    let boards = config.leader_boards();
    let registry = policy_registry(&boards);
    let router = Arc::new(HaRouter::with_registry(config.descriptor()?, registry));
    register_services(&router, &config);

    if config.health_check_interval_ms > 0 {
        health_check::prober::spawn_health_checker(
            router.clone(),
            boards.into_values().collect(),
            config.health_check_interval_ms,
        );
    }

    let gateway = server::Gateway::new(
        router,
        &config.services,
        Duration::from_millis(config.upstream_timeout_ms),
    );

    tokio::select! {
        result = server::start_server(config.listen, gateway) => {
            if let Err(e) = &result {
                tracing::error!(error = %e, "server failed");
            }
            result?;
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("shutdown signal received");
        }
    }

    tracing::info!("shutting down gracefully");
    Ok(())
}

/// Registers every HA-enabled service that has backend URLs configured.
///
/// A service that fails registration is logged and served without failover.
fn register_services(router: &HaRouter, config: &GatewayConfig) {
    for (name, service) in &config.services {
        if !router.is_ha_enabled(name) {
            tracing::info!(service = %name, "HA disabled, using direct dispatch");
            continue;
        }
        if let Err(e) = router.register_service(name, service.urls.clone()) {
            tracing::error!(
                service = %name,
                error = %e,
                "HA registration failed, using direct dispatch"
            );
        }
    }

    for name in router.descriptor().enabled_services() {
        if !config.services.contains_key(name) {
            tracing::warn!(service = %name, "HA enabled but no backend URLs configured");
        }
    }
}
