//! # Credential Storage for Device Client
//!
//! File layout under the IoT directory:
//! - `private.key` - device private key (PEM)
//! - `device.crt` - issued device certificate (PEM)
//! - `AmazonRootCA1.pem` - broker root CA
//! - `config.json` - [`ProvisioningConfig`], the "provisioned" marker
//!
//! Every file is written atomically (temp file, fsync, rename) with
//! owner-only permissions. The config is written last, so a crash at any
//! point leaves either no marker or a complete one.

use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use shared::{
    config::{ClaimConfig, DeviceClientConfig},
    constants::SECRET_FILE_MODE,
    error::{ProvisioningError, ProvisioningResult},
    types::ProvisioningConfig,
};

/// On-disk store for the device credential and provisioning config
#[derive(Debug, Clone)]
pub struct CredentialStore {
    config_path: PathBuf,
    cert_path: PathBuf,
    key_path: PathBuf,
    ca_path: PathBuf,
}

impl CredentialStore {
    /// Store rooted at the client's IoT directory
    pub fn new(config: &DeviceClientConfig) -> Self {
        Self {
            config_path: config.provisioning_config_path(),
            cert_path: config.cert_path(),
            key_path: config.key_path(),
            ca_path: config.ca_path(),
        }
    }

    pub fn cert_path(&self) -> &Path {
        &self.cert_path
    }

    pub fn key_path(&self) -> &Path {
        &self.key_path
    }

    pub fn ca_path(&self) -> &Path {
        &self.ca_path
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    /// Store the device private key
    pub async fn store_private_key(&self, pem: &str) -> ProvisioningResult<()> {
        write_atomic(&self.key_path, pem.as_bytes()).await?;
        debug!(path = ?self.key_path, "Private key stored");
        Ok(())
    }

    /// Store the issued device certificate
    pub async fn store_certificate(&self, pem: &str) -> ProvisioningResult<()> {
        write_atomic(&self.cert_path, pem.as_bytes()).await?;
        debug!(path = ?self.cert_path, "Certificate stored");
        Ok(())
    }

    /// Store the root CA
    pub async fn store_root_ca(&self, pem: &[u8]) -> ProvisioningResult<()> {
        write_atomic(&self.ca_path, pem).await?;
        debug!(path = ?self.ca_path, "Root CA stored");
        Ok(())
    }

    pub fn has_root_ca(&self) -> bool {
        self.ca_path.exists()
    }

    /// Persist the provisioning config
    pub async fn store_config(&self, config: &ProvisioningConfig) -> ProvisioningResult<()> {
        let json = serde_json::to_vec_pretty(config)?;
        write_atomic(&self.config_path, &json).await?;
        info!(path = ?self.config_path, thing_name = %config.thing_name, "Provisioning config stored");
        Ok(())
    }

    /// Load the provisioning config
    ///
    /// A file that cannot be parsed is treated as absent so that the next
    /// run provisions again and overwrites it.
    pub async fn load_config(&self) -> ProvisioningResult<Option<ProvisioningConfig>> {
        if !self.config_path.exists() {
            return Ok(None);
        }

        let json = tokio::fs::read_to_string(&self.config_path).await?;
        match serde_json::from_str::<ProvisioningConfig>(&json) {
            Ok(config) => Ok(Some(config)),
            Err(e) => {
                warn!(path = ?self.config_path, error = %e, "Ignoring unreadable provisioning config");
                Ok(None)
            }
        }
    }

    /// Existing well-formed config, if the device is provisioned
    pub async fn provisioned_config(&self) -> ProvisioningResult<Option<ProvisioningConfig>> {
        Ok(self
            .load_config()
            .await?
            .filter(ProvisioningConfig::is_well_formed))
    }
}

/// Load the pre-seeded claim configuration from `claim_dir`
pub async fn load_claim_config(claim_dir: &Path) -> ProvisioningResult<ClaimConfig> {
    let path = ClaimConfig::path_in(claim_dir);
    let json = match tokio::fs::read_to_string(&path).await {
        Ok(json) => json,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(ProvisioningError::MissingClaimConfig(path.display().to_string()));
        }
        Err(e) => return Err(e.into()),
    };
    ClaimConfig::from_json(&path, &json)
}

/// Write `bytes` to `path` via a sibling temp file and rename
async fn write_atomic(path: &Path, bytes: &[u8]) -> ProvisioningResult<()> {
    let parent = path
        .parent()
        .ok_or_else(|| ProvisioningError::StorageIO(format!("{} has no parent", path.display())))?;
    tokio::fs::create_dir_all(parent).await?;

    let file_name = path
        .file_name()
        .ok_or_else(|| ProvisioningError::StorageIO(format!("{} has no file name", path.display())))?;
    let mut tmp_name = file_name.to_os_string();
    tmp_name.push(".tmp");
    let tmp_path = parent.join(tmp_name);

    let mut options = tokio::fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    options.mode(SECRET_FILE_MODE);

    let mut file = options.open(&tmp_path).await?;
    file.write_all(bytes).await?;
    file.sync_all().await?;
    drop(file);

    // The temp file may predate this run with wider permissions
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        tokio::fs::set_permissions(&tmp_path, std::fs::Permissions::from_mode(SECRET_FILE_MODE))
            .await?;
    }

    tokio::fs::rename(&tmp_path, path).await?;
    Ok(())
}
