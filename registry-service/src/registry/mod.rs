//! Registry abstraction
//!
//! The pre-provisioning guard and the lifecycle cleaner only ever talk to
//! the device registry through [`DeviceRegistry`]. Two backends exist:
//! - [`MemoryRegistry`]: in-process, enforces the same attachment rules as
//!   the managed registry and records every mutation
//! - [`AwsIotRegistry`]: the managed AWS IoT registry

pub mod aws;
pub mod memory;

pub use aws::AwsIotRegistry;
pub use memory::{MemoryRegistry, RegistryOp};

use async_trait::async_trait;
use shared::error::ProvisioningError;
use shared::types::{CertificateRecord, CertificateStatus, ThingRecord};

/// Error type for registry operations
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    /// Resource does not exist
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// Operation violates an attachment dependency
    #[error("Dependency conflict: {0}")]
    Conflict(String),

    /// Registry rejected or failed the call
    #[error("Registry service error: {0}")]
    Service(String),

    /// Could not reach the registry
    #[error("Registry transport error: {0}")]
    Transport(String),
}

impl RegistryError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, RegistryError::NotFound(_))
    }
}

impl From<RegistryError> for ProvisioningError {
    fn from(err: RegistryError) -> Self {
        match err {
            RegistryError::NotFound(what) => ProvisioningError::NotFound(what),
            other => ProvisioningError::Registry(other.to_string()),
        }
    }
}

pub type RegistryResult<T> = Result<T, RegistryError>;

/// Operations on the identity ↔ certificate ↔ policy graph
#[async_trait]
pub trait DeviceRegistry: Send + Sync {
    /// Look up a thing; `Ok(None)` when it does not exist
    async fn describe_thing(&self, thing_name: &str) -> RegistryResult<Option<ThingRecord>>;

    /// All things of a type
    async fn list_things(&self, thing_type: &str) -> RegistryResult<Vec<ThingRecord>>;

    /// Principals (certificate ARNs) attached to a thing
    async fn list_thing_principals(&self, thing_name: &str) -> RegistryResult<Vec<String>>;

    /// Things a principal is attached to
    async fn list_principal_things(&self, principal: &str) -> RegistryResult<Vec<String>>;

    /// All certificates in the registry
    async fn list_certificates(&self) -> RegistryResult<Vec<CertificateRecord>>;

    /// Policy names attached to a principal
    async fn list_attached_policies(&self, principal: &str) -> RegistryResult<Vec<String>>;

    async fn detach_thing_principal(&self, thing_name: &str, principal: &str) -> RegistryResult<()>;

    async fn detach_policy(&self, policy_name: &str, principal: &str) -> RegistryResult<()>;

    async fn update_certificate_status(
        &self,
        certificate_id: &str,
        status: CertificateStatus,
    ) -> RegistryResult<()>;

    /// Delete an inactive certificate with no remaining attachments
    async fn delete_certificate(&self, certificate_id: &str) -> RegistryResult<()>;

    /// Delete a thing with no remaining principals
    async fn delete_thing(&self, thing_name: &str) -> RegistryResult<()>;
}
