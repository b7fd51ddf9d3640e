//! # Registry Service for Edge Fleet Provisioning
//!
//! Registry-side half of the trust bootstrap:
//! - pre-provisioning hook that clears a stale thing of the same name before
//!   a device re-registers
//! - fleet-wide lifecycle cleanup of orphaned things and certificates
//! - HTTP surface for both
//!
//! All registry access goes through [`registry::DeviceRegistry`], backed by
//! AWS IoT in production and by [`registry::MemoryRegistry`] in tests.

pub mod api;
pub mod cleaner;
pub mod guard;
pub mod registry;
pub mod teardown;

use std::sync::Arc;

use shared::config::RegistryServiceConfig;

pub use cleaner::LifecycleCleaner;
pub use guard::{GuardDecision, PreProvisioningGuard};
pub use registry::{AwsIotRegistry, DeviceRegistry, MemoryRegistry, RegistryError};

/// Application state shared across handlers
pub struct AppState {
    /// Configuration
    pub config: RegistryServiceConfig,
    /// Pre-provisioning hook logic
    pub guard: PreProvisioningGuard,
    /// Fleet cleaner
    pub cleaner: LifecycleCleaner,
}

impl AppState {
    /// Wire the guard and cleaner to one registry backend
    pub fn new(config: RegistryServiceConfig, registry: Arc<dyn DeviceRegistry>) -> Self {
        Self {
            guard: PreProvisioningGuard::new(Arc::clone(&registry)),
            cleaner: LifecycleCleaner::new(registry, config.thing_type.clone()),
            config,
        }
    }
}
