//! # Device Client for Edge Fleet Provisioning
//!
//! On-device half of the trust bootstrap:
//! - hardware identity probe
//! - key pair and CSR generation
//! - correlated request/reply over MQTT with the claim credential
//! - certificate issuance and thing registration
//! - atomic persistence of the resulting credential and config
//!
//! [`ProvisioningOrchestrator`] ties these together.

pub mod ca;
pub mod exchange;
pub mod identity;
pub mod issuer;
pub mod keygen;
pub mod orchestrator;
pub mod registrar;
pub mod storage;
pub mod transport;

// Re-export commonly used types
pub use exchange::CorrelatedExchange;
pub use identity::DeviceProbe;
pub use issuer::CertificateIssuer;
pub use orchestrator::{ProvisioningOrchestrator, ProvisioningOutcome};
pub use registrar::IdentityRegistrar;
pub use storage::CredentialStore;
pub use transport::{MqttTransport, PubSubTransport};
