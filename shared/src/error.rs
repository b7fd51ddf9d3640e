//! # Error Types for Edge Fleet Provisioning
//!
//! One error enum covers the whole provisioning flow. The first group of
//! variants is the exchange taxonomy surfaced by the correlated exchange,
//! the certificate issuer and the identity registrar; the rest are the
//! local failures around it (keys, config, storage).

use thiserror::Error;

/// Main error type for the provisioning system
#[derive(Error, Debug)]
pub enum ProvisioningError {
    // =========================================================================
    // EXCHANGE ERRORS
    // =========================================================================

    /// Connect/auth failure or the connection dropped mid-exchange
    #[error("Transport error talking to '{endpoint}': {reason}")]
    Transport { endpoint: String, reason: String },

    /// No reply within the deadline
    #[error("{operation} timed out after {timeout_secs} seconds")]
    Timeout { operation: String, timeout_secs: u64 },

    /// The registry explicitly declined the request
    #[error("{operation} rejected: {reason}")]
    Rejected { operation: String, reason: String },

    // =========================================================================
    // REGISTRY ERRORS
    // =========================================================================

    /// Resource does not exist (a normal signal when probing for residue)
    #[error("Not found: {0}")]
    NotFound(String),

    /// A single detach/delete step of a best-effort cleanup failed
    #[error("Cleanup step '{step}' failed for {resource}: {reason}")]
    PartialCleanupFailure {
        resource: String,
        step: String,
        reason: String,
    },

    /// Registry API call failed
    #[error("Registry error: {0}")]
    Registry(String),

    // =========================================================================
    // LOCAL ERRORS
    // =========================================================================

    /// Key pair or signing request generation failed
    #[error("Key generation failed: {0}")]
    KeyGeneration(String),

    /// Claim configuration file is missing
    #[error("Claim config not found: {0}")]
    MissingClaimConfig(String),

    /// Invalid configuration
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Failed to read/write a local file
    #[error("Storage I/O error: {0}")]
    StorageIO(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Result type alias using ProvisioningError
pub type ProvisioningResult<T> = Result<T, ProvisioningError>;

// =============================================================================
// ERROR CONVERSIONS
// =============================================================================

impl From<serde_json::Error> for ProvisioningError {
    fn from(err: serde_json::Error) -> Self {
        ProvisioningError::Serialization(err.to_string())
    }
}

impl From<std::io::Error> for ProvisioningError {
    fn from(err: std::io::Error) -> Self {
        ProvisioningError::StorageIO(err.to_string())
    }
}

// =============================================================================
// ERROR CATEGORIES (for logging)
// =============================================================================

impl ProvisioningError {
    /// Get the error category for logging
    pub fn category(&self) -> &'static str {
        match self {
            ProvisioningError::Transport { .. }
            | ProvisioningError::Timeout { .. }
            | ProvisioningError::Rejected { .. } => "exchange",

            ProvisioningError::NotFound(_)
            | ProvisioningError::PartialCleanupFailure { .. }
            | ProvisioningError::Registry(_) => "registry",

            ProvisioningError::KeyGeneration(_) => "crypto",

            ProvisioningError::MissingClaimConfig(_)
            | ProvisioningError::Configuration(_) => "config",

            ProvisioningError::StorageIO(_) => "storage",

            ProvisioningError::Serialization(_) => "serialization",
        }
    }

    /// Check if re-running the whole flow later may succeed without operator action
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ProvisioningError::Transport { .. } | ProvisioningError::Timeout { .. }
        )
    }

    /// Check if this is the "resource absent" signal
    pub fn is_not_found(&self) -> bool {
        matches!(self, ProvisioningError::NotFound(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_category() {
        let err = ProvisioningError::Rejected {
            operation: "CreateCertificateFromCsr".into(),
            reason: "bad csr".into(),
        };
        assert_eq!(err.category(), "exchange");

        let err = ProvisioningError::NotFound("edge-ai-1".into());
        assert_eq!(err.category(), "registry");
        assert!(err.is_not_found());

        let err = ProvisioningError::MissingClaimConfig("/etc/edge-ai/claim/config.json".into());
        assert_eq!(err.category(), "config");

        let err: ProvisioningError = serde_json::from_str::<u8>("x").unwrap_err().into();
        assert_eq!(err.category(), "serialization");
    }

    #[test]
    fn test_is_retryable() {
        let err = ProvisioningError::Timeout {
            operation: "RegisterThing".into(),
            timeout_secs: 30,
        };
        assert!(err.is_retryable());

        let err = ProvisioningError::Rejected {
            operation: "RegisterThing".into(),
            reason: "template denied".into(),
        };
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_display_carries_reason() {
        let err = ProvisioningError::Rejected {
            operation: "RegisterThing".into(),
            reason: "InvalidParameters".into(),
        };
        assert_eq!(err.to_string(), "RegisterThing rejected: InvalidParameters");
    }
}
