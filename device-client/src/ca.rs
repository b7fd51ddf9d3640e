//! Root CA bootstrap

use tracing::info;

use shared::error::{ProvisioningError, ProvisioningResult};

use crate::storage::CredentialStore;

const PEM_CERTIFICATE_MARKER: &str = "-----BEGIN CERTIFICATE-----";

/// Make sure the broker root CA is on disk, downloading it if needed
pub async fn ensure_root_ca(store: &CredentialStore, url: &str) -> ProvisioningResult<()> {
    if store.has_root_ca() {
        return Ok(());
    }

    info!(url = %url, "Root CA missing, downloading");

    let transport_error = |reason: String| ProvisioningError::Transport {
        endpoint: url.to_string(),
        reason,
    };

    let response = reqwest::get(url)
        .await
        .map_err(|e| transport_error(e.to_string()))?
        .error_for_status()
        .map_err(|e| transport_error(e.to_string()))?;
    let body = response
        .bytes()
        .await
        .map_err(|e| transport_error(e.to_string()))?;

    if !String::from_utf8_lossy(&body).contains(PEM_CERTIFICATE_MARKER) {
        return Err(transport_error("response is not a PEM certificate".into()));
    }

    store.store_root_ca(&body).await?;
    info!(path = ?store.ca_path(), "Root CA stored");
    Ok(())
}
