//! # Configuration for Edge Fleet Provisioning
//!
//! The device side reads its registry endpoint and template name from the
//! pre-seeded claim configuration file so the claim credential and its
//! endpoint stay together. The registry service reads environment variables.

use crate::constants::*;
use crate::error::{ProvisioningError, ProvisioningResult};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

// =============================================================================
// CLAIM CONFIGURATION
// =============================================================================

/// Pre-seeded claim configuration (`<claim_dir>/config.json`)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaimConfig {
    /// Broker endpoint the claim credential is valid for
    pub endpoint: String,

    /// Provisioning template to register against
    pub template_name: String,
}

impl ClaimConfig {
    /// Path of the claim configuration inside a claim directory
    pub fn path_in(claim_dir: &Path) -> PathBuf {
        claim_dir.join(CLAIM_CONFIG_FILE)
    }

    /// Parse and validate claim configuration read from `path`
    pub fn from_json(path: &Path, json: &str) -> ProvisioningResult<Self> {
        let config: ClaimConfig = serde_json::from_str(json).map_err(|e| {
            ProvisioningError::Configuration(format!("{}: {}", path.display(), e))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the claim configuration
    pub fn validate(&self) -> ProvisioningResult<()> {
        if self.endpoint.trim().is_empty() {
            return Err(ProvisioningError::Configuration(
                "claim config has an empty endpoint".into(),
            ));
        }
        if self.template_name.trim().is_empty() {
            return Err(ProvisioningError::Configuration(
                "claim config has an empty template_name".into(),
            ));
        }
        Ok(())
    }
}

/// Location of the claim certificate/key pair
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClaimCredentialPaths {
    pub cert_path: PathBuf,
    pub key_path: PathBuf,
}

impl ClaimCredentialPaths {
    /// Standard file names inside a claim directory
    pub fn in_dir(claim_dir: &Path) -> Self {
        Self {
            cert_path: claim_dir.join(CLAIM_CERT_FILE),
            key_path: claim_dir.join(CLAIM_KEY_FILE),
        }
    }
}

// =============================================================================
// EXCHANGE CONFIGURATION
// =============================================================================

/// Connection and deadline settings of one correlated exchange
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExchangeConfig {
    /// Broker TLS port
    pub port: u16,

    /// MQTT keep-alive in seconds
    pub keep_alive_secs: u64,

    /// Deadline for the connection acknowledgement in seconds
    pub connect_timeout_secs: u64,

    /// Deadline for subscription acknowledgements in milliseconds
    pub subscribe_ack_timeout_ms: u64,

    /// Deadline for the reply in seconds
    pub reply_timeout_secs: u64,
}

impl Default for ExchangeConfig {
    fn default() -> Self {
        Self {
            port: MQTT_PORT,
            keep_alive_secs: MQTT_KEEP_ALIVE_SECS,
            connect_timeout_secs: CONNECT_TIMEOUT_SECS,
            subscribe_ack_timeout_ms: SUBSCRIBE_ACK_TIMEOUT_MS,
            reply_timeout_secs: REPLY_TIMEOUT_SECS,
        }
    }
}

impl ExchangeConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn subscribe_ack_timeout(&self) -> Duration {
        Duration::from_millis(self.subscribe_ack_timeout_ms)
    }

    pub fn reply_timeout(&self) -> Duration {
        Duration::from_secs(self.reply_timeout_secs)
    }
}

// =============================================================================
// HARDWARE PROBE CONFIGURATION
// =============================================================================

/// Where the device identity is read from
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProbeConfig {
    /// Device-tree serial number file
    pub serial_number_path: PathBuf,

    /// Fallback machine id file
    pub machine_id_path: PathBuf,

    /// Network interface class directory
    pub net_class_path: PathBuf,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            serial_number_path: PathBuf::from(SERIAL_NUMBER_PATH),
            machine_id_path: PathBuf::from(MACHINE_ID_PATH),
            net_class_path: PathBuf::from(NET_CLASS_PATH),
        }
    }
}

// =============================================================================
// DEVICE CLIENT CONFIGURATION
// =============================================================================

/// Configuration for the Device Client
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceClientConfig {
    /// Directory for the device's own credential and provisioning config
    pub iot_dir: PathBuf,

    /// Directory holding the claim credential and claim config
    pub claim_dir: PathBuf,

    /// Where to fetch the root CA when it is not on disk
    pub root_ca_url: String,

    /// Hardware identity sources
    pub probe: ProbeConfig,

    /// Exchange deadlines
    pub exchange: ExchangeConfig,
}

impl Default for DeviceClientConfig {
    fn default() -> Self {
        Self {
            iot_dir: PathBuf::from(DEFAULT_IOT_DIR),
            claim_dir: PathBuf::from(DEFAULT_CLAIM_DIR),
            root_ca_url: AMAZON_ROOT_CA_URL.into(),
            probe: ProbeConfig::default(),
            exchange: ExchangeConfig::default(),
        }
    }
}

impl DeviceClientConfig {
    /// Persisted provisioning config location
    pub fn provisioning_config_path(&self) -> PathBuf {
        self.iot_dir.join(PROVISIONING_CONFIG_FILE)
    }

    /// Device certificate location
    pub fn cert_path(&self) -> PathBuf {
        self.iot_dir.join(DEVICE_CERT_FILE)
    }

    /// Device private key location
    pub fn key_path(&self) -> PathBuf {
        self.iot_dir.join(DEVICE_KEY_FILE)
    }

    /// Root CA location
    pub fn ca_path(&self) -> PathBuf {
        self.iot_dir.join(ROOT_CA_FILE)
    }

    /// Claim credential locations
    pub fn claim_credentials(&self) -> ClaimCredentialPaths {
        ClaimCredentialPaths::in_dir(&self.claim_dir)
    }

    /// Validate the configuration
    pub fn validate(&self) -> ProvisioningResult<()> {
        if self.iot_dir == self.claim_dir {
            return Err(ProvisioningError::Configuration(
                "iot_dir and claim_dir must differ: the claim credential is never stored with the device credential".into(),
            ));
        }
        if self.exchange.reply_timeout_secs == 0 {
            return Err(ProvisioningError::Configuration(
                "reply timeout must be non-zero".into(),
            ));
        }
        Ok(())
    }
}

// =============================================================================
// REGISTRY SERVICE CONFIGURATION
// =============================================================================

/// Configuration for the Registry Service (pre-provisioning hook host)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryServiceConfig {
    /// Region of the managed registry (None = SDK default chain)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,

    /// Thing type managed by this fleet
    pub thing_type: String,

    /// Hook API configuration
    pub api: ApiConfig,
}

impl Default for RegistryServiceConfig {
    fn default() -> Self {
        Self {
            region: None,
            thing_type: THING_TYPE.into(),
            api: ApiConfig::default(),
        }
    }
}

impl RegistryServiceConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> ProvisioningResult<Self> {
        let mut config = Self::default();

        if let Ok(region) = env::var(ENV_REGISTRY_REGION) {
            config.region = Some(region);
        }

        if let Ok(thing_type) = env::var(ENV_REGISTRY_THING_TYPE) {
            config.thing_type = thing_type;
        }

        if let Ok(host) = env::var(ENV_REGISTRY_BIND_HOST) {
            config.api.host = host;
        }

        if let Ok(port) = env::var(ENV_REGISTRY_PORT) {
            config.api.port = port.parse().map_err(|_| {
                ProvisioningError::Configuration(format!("{} is not a port: {}", ENV_REGISTRY_PORT, port))
            })?;
        }

        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> ProvisioningResult<()> {
        if self.thing_type.trim().is_empty() {
            return Err(ProvisioningError::Configuration("thing type is empty".into()));
        }
        Ok(())
    }
}

// =============================================================================
// API CONFIGURATION
// =============================================================================

/// API server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    /// Host to bind to
    pub host: String,

    /// Port to listen on
    pub port: u16,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: REGISTRY_SERVICE_PORT,
        }
    }
}

impl ApiConfig {
    /// Get the bind address
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
