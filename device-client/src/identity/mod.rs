//! # Device Identity Probe
//!
//! Derives the [`DeviceIdentity`] from hardware:
//! - serial: device-tree serial number (trailing NULs stripped), falling
//!   back to the machine id
//! - MAC: first physical interface under the net class directory, colons
//!   removed, falling back to `"unknown"`
//!
//! The name is derived from the serial, so the same board always asks for
//! the same thing name.

use std::path::Path;
use tracing::{debug, info, warn};

use shared::{
    config::ProbeConfig,
    constants::{UNKNOWN_MAC_ADDRESS, VIRTUAL_INTERFACE_PREFIXES},
    error::{ProvisioningError, ProvisioningResult},
    types::DeviceIdentity,
};

/// Reads the hardware identity of this device
pub struct DeviceProbe {
    config: ProbeConfig,
}

impl DeviceProbe {
    pub fn new(config: ProbeConfig) -> Self {
        Self { config }
    }

    /// Probe serial and MAC and build the identity
    pub async fn identity(&self) -> ProvisioningResult<DeviceIdentity> {
        let serial = self.serial().await?;
        let mac = self.mac_address().await;
        let identity = DeviceIdentity::new(serial, mac);

        info!(
            thing_name = %identity.name,
            serial = %identity.serial,
            mac_address = %identity.mac_address,
            "Device identity probed"
        );
        Ok(identity)
    }

    /// Hardware serial number
    pub async fn serial(&self) -> ProvisioningResult<String> {
        if let Some(serial) = read_trimmed(&self.config.serial_number_path).await {
            return Ok(serial);
        }

        debug!(path = ?self.config.serial_number_path, "No device-tree serial, trying machine id");

        read_trimmed(&self.config.machine_id_path)
            .await
            .ok_or_else(|| {
                ProvisioningError::Configuration(format!(
                    "no device serial: neither {} nor {} is readable",
                    self.config.serial_number_path.display(),
                    self.config.machine_id_path.display()
                ))
            })
    }

    /// MAC of the first physical interface, best-effort
    pub async fn mac_address(&self) -> String {
        match self.first_physical_mac().await {
            Some(mac) => mac,
            None => {
                warn!(path = ?self.config.net_class_path, "No physical interface found");
                UNKNOWN_MAC_ADDRESS.to_string()
            }
        }
    }

    async fn first_physical_mac(&self) -> Option<String> {
        let mut entries = tokio::fs::read_dir(&self.config.net_class_path).await.ok()?;

        let mut interfaces = Vec::new();
        while let Ok(Some(entry)) = entries.next_entry().await {
            let name = entry.file_name().to_string_lossy().into_owned();
            if !is_virtual_interface(&name) {
                interfaces.push((name, entry.path()));
            }
        }
        // Directory order is unspecified
        interfaces.sort();

        for (name, path) in interfaces {
            if let Some(mac) = read_trimmed(&path.join("address")).await {
                let mac = mac.replace(':', "");
                if !mac.is_empty() && mac.chars().any(|c| c != '0') {
                    debug!(interface = %name, "Using interface MAC");
                    return Some(mac);
                }
            }
        }
        None
    }
}

fn is_virtual_interface(name: &str) -> bool {
    VIRTUAL_INTERFACE_PREFIXES
        .iter()
        .any(|prefix| name.starts_with(prefix))
}

/// File content without surrounding whitespace and NULs, `None` if empty
async fn read_trimmed(path: &Path) -> Option<String> {
    let raw = tokio::fs::read(path).await.ok()?;
    let text = String::from_utf8_lossy(&raw);
    let trimmed = text.trim_matches(|c: char| c == '\0' || c.is_whitespace());
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    fn probe_in(dir: &Path) -> DeviceProbe {
        DeviceProbe::new(ProbeConfig {
            serial_number_path: dir.join("serial-number"),
            machine_id_path: dir.join("machine-id"),
            net_class_path: dir.join("net"),
        })
    }

    fn add_interface(dir: &Path, name: &str, mac: &str) {
        let iface = dir.join("net").join(name);
        fs::create_dir_all(&iface).unwrap();
        fs::write(iface.join("address"), format!("{}\n", mac)).unwrap();
    }

    #[tokio::test]
    async fn test_device_tree_serial_strips_nul() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("serial-number"), b"ABC123\0").unwrap();
        fs::write(dir.path().join("machine-id"), "deadbeef\n").unwrap();

        assert_eq!(probe_in(dir.path()).serial().await.unwrap(), "ABC123");
    }

    #[tokio::test]
    async fn test_machine_id_fallback() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("serial-number"), b"\0").unwrap();
        fs::write(dir.path().join("machine-id"), "deadbeef\n").unwrap();

        assert_eq!(probe_in(dir.path()).serial().await.unwrap(), "deadbeef");
    }

    #[tokio::test]
    async fn test_no_serial_is_error() {
        let dir = tempdir().unwrap();
        assert!(matches!(
            probe_in(dir.path()).serial().await,
            Err(ProvisioningError::Configuration(_))
        ));
    }

    #[tokio::test]
    async fn test_mac_skips_virtual_interfaces() {
        let dir = tempdir().unwrap();
        add_interface(dir.path(), "lo", "00:00:00:00:00:00");
        add_interface(dir.path(), "docker0", "02:42:ac:11:00:02");
        add_interface(dir.path(), "veth1a2b", "16:2e:9a:00:00:01");
        add_interface(dir.path(), "eth0", "0a:1b:2c:3d:4e:5f");

        assert_eq!(probe_in(dir.path()).mac_address().await, "0a1b2c3d4e5f");
    }

    #[tokio::test]
    async fn test_mac_unknown_without_interfaces() {
        let dir = tempdir().unwrap();
        add_interface(dir.path(), "lo", "00:00:00:00:00:00");
        assert_eq!(probe_in(dir.path()).mac_address().await, UNKNOWN_MAC_ADDRESS);
    }

    #[tokio::test]
    async fn test_identity_name_from_serial() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("serial-number"), b"ABC123\0").unwrap();
        add_interface(dir.path(), "wlan0", "aa:bb:cc:dd:ee:ff");

        let identity = probe_in(dir.path()).identity().await.unwrap();
        assert_eq!(identity.name, "edge-ai-ABC123");
        assert_eq!(identity.mac_address, "aabbccddeeff");
    }
}
