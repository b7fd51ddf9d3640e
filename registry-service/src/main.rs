//! # Registry Service
//!
//! Hosts the pre-provisioning hook and the cleanup endpoint against the
//! AWS IoT registry.
//!
//! ## Running
//!
//! ```bash
//! export REGISTRY_REGION=eu-west-1
//! export REGISTRY_PORT=8080
//! registry-service
//! ```
//!
//! ## API Endpoints
//!
//! - `GET /health` - Health check
//! - `POST /hooks/pre-provision` - Pre-provisioning hook
//! - `POST /cleanup` - Lifecycle cleanup pass

use anyhow::Result;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

use registry_service::{api, AppState, AwsIotRegistry};
use shared::config::RegistryServiceConfig;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(true)
        .with_thread_ids(true)
        .init();

    info!("Starting Registry Service");
    info!("Version: {}", shared::VERSION);

    let config = RegistryServiceConfig::from_env()?;
    config.validate()?;

    info!(
        region = ?config.region,
        thing_type = %config.thing_type,
        "Configuration loaded"
    );

    let registry = Arc::new(AwsIotRegistry::new(config.region.clone()).await);
    let state = Arc::new(AppState::new(config.clone(), registry));

    let app = api::create_router(state);

    let bind_addr = config.api.bind_addr();
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!(address = %bind_addr, "Server running");

    axum::serve(listener, app).await?;

    Ok(())
}
