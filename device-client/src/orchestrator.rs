//! # Provisioning Orchestrator
//!
//! Drives one provisioning attempt through
//! `START → KEY_GENERATED → CERT_ISSUED → REGISTERED → PERSISTED`, with
//! any step able to end in `FAILED`.
//!
//! - A well-formed persisted config short-circuits `START` to `PERSISTED`
//!   without touching the network.
//! - Every attempt generates a fresh key and CSR.
//! - There is no rollback. A registration failure after issuance leaves an
//!   unattached certificate in the registry for the lifecycle cleaner.
//! - Nothing is written locally before registration succeeds; the config
//!   is written last.

use std::sync::Arc;
use tracing::{error, info, warn};

use registry_service::{DeviceRegistry, PreProvisioningGuard};
use shared::{
    config::{ClaimConfig, DeviceClientConfig},
    error::ProvisioningResult,
    types::{DeviceIdentity, ProvisioningConfig, ProvisioningState},
};

use crate::ca::ensure_root_ca;
use crate::exchange::CorrelatedExchange;
use crate::issuer::CertificateIssuer;
use crate::keygen::generate_key_and_csr;
use crate::registrar::IdentityRegistrar;
use crate::storage::CredentialStore;
use crate::transport::PubSubTransport;

/// Terminal-success result of a run
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProvisioningOutcome {
    /// A config was already present; nothing was done
    AlreadyProvisioned(ProvisioningConfig),
    /// This run registered the device
    Provisioned(ProvisioningConfig),
}

impl ProvisioningOutcome {
    pub fn config(&self) -> &ProvisioningConfig {
        match self {
            ProvisioningOutcome::AlreadyProvisioned(config)
            | ProvisioningOutcome::Provisioned(config) => config,
        }
    }
}

/// Sequencer of one device's provisioning
pub struct ProvisioningOrchestrator {
    config: DeviceClientConfig,
    claim: ClaimConfig,
    identity: DeviceIdentity,
    transport: Arc<dyn PubSubTransport>,
    store: CredentialStore,
    preclean: Option<Arc<dyn DeviceRegistry>>,
    state: ProvisioningState,
    history: Vec<ProvisioningState>,
}

impl ProvisioningOrchestrator {
    /// `transport` must authenticate with the claim credential
    pub fn new(
        config: DeviceClientConfig,
        claim: ClaimConfig,
        identity: DeviceIdentity,
        transport: Arc<dyn PubSubTransport>,
    ) -> Self {
        let store = CredentialStore::new(&config);
        Self {
            config,
            claim,
            identity,
            transport,
            store,
            preclean: None,
            state: ProvisioningState::Start,
            history: vec![ProvisioningState::Start],
        }
    }

    /// Remove any existing thing of the same name before key generation
    pub fn with_preclean(mut self, registry: Arc<dyn DeviceRegistry>) -> Self {
        self.preclean = Some(registry);
        self
    }

    /// Current state
    pub fn state(&self) -> &ProvisioningState {
        &self.state
    }

    /// States visited by the last run, in order
    pub fn history(&self) -> &[ProvisioningState] {
        &self.history
    }

    fn transition(&mut self, next: ProvisioningState) {
        info!(from = %self.state, to = %next, thing_name = %self.identity.name, "State transition");
        self.history.push(next.clone());
        self.state = next;
    }

    /// Run one attempt to a terminal state
    pub async fn run(&mut self) -> ProvisioningResult<ProvisioningOutcome> {
        self.state = ProvisioningState::Start;
        self.history = vec![ProvisioningState::Start];

        match self.execute().await {
            Ok(outcome) => Ok(outcome),
            Err(e) => {
                error!(
                    thing_name = %self.identity.name,
                    state = %self.state,
                    category = e.category(),
                    retryable = e.is_retryable(),
                    error = %e,
                    "Provisioning failed"
                );
                self.transition(ProvisioningState::Failed(e.to_string()));
                Err(e)
            }
        }
    }

    async fn execute(&mut self) -> ProvisioningResult<ProvisioningOutcome> {
        if let Some(existing) = self.store.provisioned_config().await? {
            info!(thing_name = %existing.thing_name, "Already provisioned, nothing to do");
            self.transition(ProvisioningState::Persisted);
            return Ok(ProvisioningOutcome::AlreadyProvisioned(existing));
        }

        ensure_root_ca(&self.store, &self.config.root_ca_url).await?;

        if let Some(registry) = &self.preclean {
            info!(thing_name = %self.identity.name, "Pre-cleaning existing registry entries");
            let failures = PreProvisioningGuard::new(Arc::clone(registry))
                .cleanup_thing(&self.identity.name)
                .await;
            if !failures.is_empty() {
                warn!(failures = failures.len(), "Pre-clean incomplete, continuing");
            }
        }

        let generated = generate_key_and_csr(&self.identity.name)?;
        self.transition(ProvisioningState::KeyGenerated);

        let exchange = CorrelatedExchange::new(
            Arc::clone(&self.transport),
            self.config.exchange.clone(),
            self.identity.name.clone(),
        );

        let issued = CertificateIssuer::new(&exchange)
            .issue_certificate(&generated.csr_pem)
            .await?;
        self.transition(ProvisioningState::CertIssued);

        let registered = IdentityRegistrar::new(&exchange)
            .register_identity(
                &issued.ownership_token,
                &self.claim.template_name,
                self.identity.registration_parameters(),
            )
            .await?;
        self.transition(ProvisioningState::Registered);

        self.store.store_private_key(&generated.private_key_pem).await?;
        self.store.store_certificate(&issued.pem).await?;

        let config = ProvisioningConfig {
            endpoint: self.claim.endpoint.clone(),
            thing_name: registered.thing_name,
            cert_path: self.store.cert_path().to_path_buf(),
            key_path: self.store.key_path().to_path_buf(),
            ca_path: self.store.ca_path().to_path_buf(),
        };
        self.store.store_config(&config).await?;
        self.transition(ProvisioningState::Persisted);

        info!(
            thing_name = %config.thing_name,
            certificate_id = %issued.id,
            "Device provisioned"
        );
        Ok(ProvisioningOutcome::Provisioned(config))
    }
}
