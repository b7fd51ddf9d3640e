//! # Shared Data Types for Edge Fleet Provisioning
//!
//! Every payload exchanged with the registry has a typed structure here so
//! that shape drift shows up as a decode error rather than a missing key
//! deep in the flow.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

use crate::constants::thing_name_for_serial;
use crate::error::ProvisioningError;

// =============================================================================
// DEVICE IDENTITY
// =============================================================================

/// Hardware-derived identity of one physical device
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceIdentity {
    /// Hardware serial (stable for the device's life)
    pub serial: String,

    /// Deterministic thing name (prefix + serial)
    pub name: String,

    /// MAC address without separators, best-effort
    pub mac_address: String,
}

impl DeviceIdentity {
    /// Create an identity, deriving the name from the serial
    pub fn new(serial: impl Into<String>, mac_address: impl Into<String>) -> Self {
        let serial = serial.into();
        Self {
            name: thing_name_for_serial(&serial),
            serial,
            mac_address: mac_address.into(),
        }
    }

    /// Parameters the provisioning template expects for this device
    pub fn registration_parameters(&self) -> RegistrationParameters {
        RegistrationParameters {
            serial_number: self.serial.clone(),
            mac_address: self.mac_address.clone(),
            thing_name: self.name.clone(),
        }
    }
}

// =============================================================================
// CERTIFICATE ISSUANCE PAYLOADS
// =============================================================================

/// Request published on the create-certificate topic
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateCertificateRequest {
    /// PEM-encoded signing request
    pub certificate_signing_request: String,
}

/// Accepted reply of the create-certificate call
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateCertificateResponse {
    /// Certificate id assigned by the registry
    pub certificate_id: String,

    /// Issued certificate (PEM)
    pub certificate_pem: String,

    /// Single-use proof of possession required by registration
    pub certificate_ownership_token: String,
}

/// A certificate issued from the device's signing request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssuedCertificate {
    /// Registry certificate id
    pub id: String,

    /// Certificate PEM
    pub pem: String,

    /// Ownership token (single-use)
    pub ownership_token: String,
}

impl From<CreateCertificateResponse> for IssuedCertificate {
    fn from(response: CreateCertificateResponse) -> Self {
        Self {
            id: response.certificate_id,
            pem: response.certificate_pem,
            ownership_token: response.certificate_ownership_token,
        }
    }
}

// =============================================================================
// REGISTRATION PAYLOADS
// =============================================================================

/// Parameters consumed by the server-side provisioning template
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistrationParameters {
    #[serde(rename = "SerialNumber")]
    pub serial_number: String,

    #[serde(rename = "MacAddress")]
    pub mac_address: String,

    /// Requested name; the registry may answer with a different one
    #[serde(rename = "ThingName")]
    pub thing_name: String,
}

/// Request published on the template's provision topic
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterThingRequest {
    /// Token from the certificate issuance step
    pub certificate_ownership_token: String,

    /// Template parameters
    pub parameters: RegistrationParameters,
}

/// Accepted reply of the registration call
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterThingResponse {
    /// Canonical name of the registered thing (authoritative)
    pub thing_name: String,

    /// Optional device configuration attached by the template
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub device_configuration: BTreeMap<String, String>,
}

/// Body delivered on any `/rejected` topic
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RejectedReply {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl RejectedReply {
    /// Reason surfaced to the caller: the error message, else the raw payload
    pub fn reason_from_payload(payload: &[u8]) -> String {
        match serde_json::from_slice::<RejectedReply>(payload) {
            Ok(RejectedReply {
                error_message: Some(message),
                ..
            }) => message,
            _ => String::from_utf8_lossy(payload).into_owned(),
        }
    }
}

// =============================================================================
// LOCAL PROVISIONING CONFIG
// =============================================================================

/// Persisted marker that the device is provisioned
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProvisioningConfig {
    /// Broker endpoint address
    pub endpoint: String,

    /// Registered (canonical) thing name
    pub thing_name: String,

    /// Device certificate file
    pub cert_path: PathBuf,

    /// Device private key file
    pub key_path: PathBuf,

    /// Root CA file
    pub ca_path: PathBuf,
}

impl ProvisioningConfig {
    /// All fields populated
    pub fn is_well_formed(&self) -> bool {
        !self.endpoint.trim().is_empty()
            && !self.thing_name.trim().is_empty()
            && !self.cert_path.as_os_str().is_empty()
            && !self.key_path.as_os_str().is_empty()
            && !self.ca_path.as_os_str().is_empty()
    }
}

// =============================================================================
// PROVISIONING STATE MACHINE
// =============================================================================

/// States of one provisioning run
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProvisioningState {
    Start,
    KeyGenerated,
    CertIssued,
    Registered,
    /// Terminal success
    Persisted,
    /// Terminal failure
    Failed(String),
}

impl ProvisioningState {
    /// Check if no further transition is possible
    pub fn is_terminal(&self) -> bool {
        matches!(self, ProvisioningState::Persisted | ProvisioningState::Failed(_))
    }
}

impl std::fmt::Display for ProvisioningState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProvisioningState::Start => write!(f, "START"),
            ProvisioningState::KeyGenerated => write!(f, "KEY_GENERATED"),
            ProvisioningState::CertIssued => write!(f, "CERT_ISSUED"),
            ProvisioningState::Registered => write!(f, "REGISTERED"),
            ProvisioningState::Persisted => write!(f, "PERSISTED"),
            ProvisioningState::Failed(reason) => write!(f, "FAILED({})", reason),
        }
    }
}

// =============================================================================
// REGISTRY RECORDS
// =============================================================================

/// Identity record as listed by the registry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThingRecord {
    pub name: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub thing_type: Option<String>,
}

/// Certificate status in the registry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CertificateStatus {
    Active,
    Inactive,
    Revoked,
    PendingTransfer,
    RegisterInactive,
    PendingActivation,
}

impl std::fmt::Display for CertificateStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            CertificateStatus::Active => "ACTIVE",
            CertificateStatus::Inactive => "INACTIVE",
            CertificateStatus::Revoked => "REVOKED",
            CertificateStatus::PendingTransfer => "PENDING_TRANSFER",
            CertificateStatus::RegisterInactive => "REGISTER_INACTIVE",
            CertificateStatus::PendingActivation => "PENDING_ACTIVATION",
        };
        write!(f, "{}", s)
    }
}

/// Certificate as listed by the registry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CertificateRecord {
    /// Certificate id
    pub id: String,

    /// Principal reference used for attachments
    pub arn: String,

    pub status: CertificateStatus,
}

impl CertificateRecord {
    /// Shortened id for display
    pub fn short_id(&self) -> &str {
        let end = self
            .id
            .char_indices()
            .nth(12)
            .map(|(i, _)| i)
            .unwrap_or(self.id.len());
        &self.id[..end]
    }
}

// =============================================================================
// PRE-PROVISIONING HOOK
// =============================================================================

/// Event delivered by the registry before it finalizes a registration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PreProvisioningHookRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub claim_certificate_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub certificate_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub certificate_pem: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template_arn: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,

    /// Template parameters as sent by the device
    #[serde(default)]
    pub parameters: BTreeMap<String, String>,
}

/// Decision returned to the registry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PreProvisioningHookResponse {
    pub allow_provisioning: bool,
}

// =============================================================================
// CLEANUP REPORTING
// =============================================================================

/// Resource touched by a cleanup step
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum ResourceRef {
    Thing(String),
    Certificate(String),
}

impl std::fmt::Display for ResourceRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResourceRef::Thing(name) => write!(f, "thing '{}'", name),
            ResourceRef::Certificate(id) => write!(f, "certificate '{}'", id),
        }
    }
}

/// Individual step of a multi-resource cleanup
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CleanupStep {
    ListPrincipals,
    ListPrincipalThings,
    DetachPrincipal,
    ListPolicies,
    DetachPolicy,
    Deactivate,
    DeleteCertificate,
    DeleteThing,
}

impl std::fmt::Display for CleanupStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            CleanupStep::ListPrincipals => "list_principals",
            CleanupStep::ListPrincipalThings => "list_principal_things",
            CleanupStep::DetachPrincipal => "detach_principal",
            CleanupStep::ListPolicies => "list_policies",
            CleanupStep::DetachPolicy => "detach_policy",
            CleanupStep::Deactivate => "deactivate",
            CleanupStep::DeleteCertificate => "delete_certificate",
            CleanupStep::DeleteThing => "delete_thing",
        };
        write!(f, "{}", s)
    }
}

/// A swallowed failure, kept for the operator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CleanupFailure {
    pub resource: ResourceRef,
    pub step: CleanupStep,
    pub reason: String,
}

impl From<CleanupFailure> for ProvisioningError {
    fn from(failure: CleanupFailure) -> Self {
        ProvisioningError::PartialCleanupFailure {
            resource: failure.resource.to_string(),
            step: failure.step.to_string(),
            reason: failure.reason,
        }
    }
}

impl std::fmt::Display for CleanupFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({}): {}", self.resource, self.step, self.reason)
    }
}

/// Outcome of one fleet-wide cleanup pass
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CleanupReport {
    /// When the scan started
    pub started_at: DateTime<Utc>,

    /// Preview mode: findings only, no mutation
    pub dry_run: bool,

    /// Identities with no attached certificate
    pub orphaned_things: Vec<String>,

    /// Certificates attached to no identity
    pub orphaned_certificates: Vec<CertificateRecord>,

    /// Certificates with status INACTIVE
    pub inactive_certificates: Vec<CertificateRecord>,

    /// Identities actually deleted
    pub deleted_things: Vec<String>,

    /// Certificate ids actually deleted
    pub deleted_certificates: Vec<String>,

    /// Steps that failed and need manual attention
    pub failures: Vec<CleanupFailure>,
}

impl CleanupReport {
    /// Empty report for a pass starting now
    pub fn new(dry_run: bool) -> Self {
        Self {
            started_at: Utc::now(),
            dry_run,
            orphaned_things: Vec::new(),
            orphaned_certificates: Vec::new(),
            inactive_certificates: Vec::new(),
            deleted_things: Vec::new(),
            deleted_certificates: Vec::new(),
            failures: Vec::new(),
        }
    }

    /// Total number of findings across the three groups
    pub fn findings_count(&self) -> usize {
        self.orphaned_things.len()
            + self.orphaned_certificates.len()
            + self.inactive_certificates.len()
    }

    /// Nothing to clean
    pub fn is_clean(&self) -> bool {
        self.findings_count() == 0
    }

    /// Distinct certificates to delete (orphaned first, then inactive)
    pub fn certificates_to_delete(&self) -> Vec<CertificateRecord> {
        let mut certificates: Vec<CertificateRecord> = Vec::new();
        for cert in self
            .orphaned_certificates
            .iter()
            .chain(self.inactive_certificates.iter())
        {
            if !certificates.iter().any(|c| c.id == cert.id) {
                certificates.push(cert.clone());
            }
        }
        certificates
    }
}
