//! # Pre-Provisioning Guard
//!
//! Runs before the registry finalizes a registration. If the requested thing
//! name is already taken, the old thing and every certificate attached to
//! it are torn down so the new registration starts from a clean slate.
//!
//! ## Decision Table
//!
//! | Situation                         | Decision |
//! |-----------------------------------|----------|
//! | `ThingName` parameter missing     | deny     |
//! | lookup fails (not "not found")    | deny     |
//! | thing absent                      | allow    |
//! | thing present, cleanup attempted  | allow    |
//!
//! Cleanup failures never turn an allow into a deny; they are logged and
//! returned so the operator can see which resources need attention.

use std::sync::Arc;
use tracing::{error, info, warn};

use shared::constants::{certificate_id_from_arn, PARAM_THING_NAME};
use shared::types::{CleanupFailure, PreProvisioningHookRequest, PreProvisioningHookResponse};

use crate::registry::DeviceRegistry;
use crate::teardown::{retire_certificate, retire_thing};

/// Outcome of one guard invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GuardDecision {
    /// Whether registration may proceed
    pub allow: bool,

    /// Thing name the decision is about, if one was supplied
    pub thing_name: Option<String>,

    /// An existing thing was found and cleanup was attempted
    pub cleaned_existing: bool,

    /// Swallowed cleanup failures
    pub failures: Vec<CleanupFailure>,
}

impl GuardDecision {
    fn deny(thing_name: Option<String>) -> Self {
        Self {
            allow: false,
            thing_name,
            cleaned_existing: false,
            failures: Vec::new(),
        }
    }

    /// Wire response for the registry
    pub fn response(&self) -> PreProvisioningHookResponse {
        PreProvisioningHookResponse {
            allow_provisioning: self.allow,
        }
    }
}

/// Pre-provisioning hook logic
pub struct PreProvisioningGuard {
    registry: Arc<dyn DeviceRegistry>,
}

impl PreProvisioningGuard {
    pub fn new(registry: Arc<dyn DeviceRegistry>) -> Self {
        Self { registry }
    }

    /// Decide on one registration attempt
    pub async fn handle(&self, request: &PreProvisioningHookRequest) -> GuardDecision {
        let thing_name = match request
            .parameters
            .get(PARAM_THING_NAME)
            .map(|name| name.trim())
            .filter(|name| !name.is_empty())
        {
            Some(name) => name.to_string(),
            None => {
                warn!(
                    certificate_id = ?request.certificate_id,
                    "No ThingName in pre-provisioning request, denying"
                );
                return GuardDecision::deny(None);
            }
        };

        info!(thing_name = %thing_name, "Pre-provisioning check");

        match self.registry.describe_thing(&thing_name).await {
            Ok(None) => {
                info!(thing_name = %thing_name, "Thing does not exist, allowing provisioning");
                GuardDecision {
                    allow: true,
                    thing_name: Some(thing_name),
                    cleaned_existing: false,
                    failures: Vec::new(),
                }
            }
            Err(e) if e.is_not_found() => GuardDecision {
                allow: true,
                thing_name: Some(thing_name),
                cleaned_existing: false,
                failures: Vec::new(),
            },
            Err(e) => {
                error!(thing_name = %thing_name, error = %e, "Thing lookup failed, denying provisioning");
                GuardDecision::deny(Some(thing_name))
            }
            Ok(Some(_)) => {
                info!(thing_name = %thing_name, "Thing already exists, cleaning up before re-provisioning");
                let failures = self.cleanup_thing(&thing_name).await;
                if failures.is_empty() {
                    info!(thing_name = %thing_name, "Existing thing removed");
                } else {
                    warn!(
                        thing_name = %thing_name,
                        failures = failures.len(),
                        "Cleanup incomplete, allowing provisioning anyway"
                    );
                }
                GuardDecision {
                    allow: true,
                    thing_name: Some(thing_name),
                    cleaned_existing: true,
                    failures,
                }
            }
        }
    }

    /// Tear down a thing and every certificate attached to it
    ///
    /// Best-effort: returns every step that failed.
    pub async fn cleanup_thing(&self, thing_name: &str) -> Vec<CleanupFailure> {
        let registry = self.registry.as_ref();
        let mut failures = Vec::new();

        match registry.list_thing_principals(thing_name).await {
            Ok(principals) => {
                for principal in principals {
                    let certificate_id = certificate_id_from_arn(&principal).to_string();
                    info!(
                        thing_name = %thing_name,
                        certificate_id = %certificate_id,
                        "Retiring attached certificate"
                    );
                    retire_certificate(registry, &certificate_id, &principal, None, &mut failures)
                        .await;
                }
            }
            Err(e) if e.is_not_found() => return failures,
            // retire_thing below repeats the listing and records the failure
            Err(_) => {}
        }

        retire_thing(registry, thing_name, &mut failures).await;
        failures
    }
}
