//! Identity registration through a provisioning template

use std::collections::BTreeMap;
use tracing::{info, warn};

use shared::constants::provision_topic;
use shared::error::{ProvisioningError, ProvisioningResult};
use shared::types::{RegisterThingRequest, RegisterThingResponse, RegistrationParameters};

use crate::exchange::CorrelatedExchange;

const OPERATION: &str = "RegisterThing";

/// Result of a successful registration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisteredIdentity {
    /// Canonical thing name assigned by the registry
    pub thing_name: String,

    /// Configuration attached by the template, if any
    pub device_configuration: BTreeMap<String, String>,
}

/// Claims a named identity with an ownership token
pub struct IdentityRegistrar<'a> {
    exchange: &'a CorrelatedExchange,
}

impl<'a> IdentityRegistrar<'a> {
    pub fn new(exchange: &'a CorrelatedExchange) -> Self {
        Self { exchange }
    }

    /// Register against `template_name`
    ///
    /// The returned name is the identity of record; it may differ from
    /// `parameters.thing_name`.
    pub async fn register_identity(
        &self,
        ownership_token: &str,
        template_name: &str,
        parameters: RegistrationParameters,
    ) -> ProvisioningResult<RegisteredIdentity> {
        let requested = parameters.thing_name.clone();
        let request = RegisterThingRequest {
            certificate_ownership_token: ownership_token.to_string(),
            parameters,
        };

        let response: RegisterThingResponse = self
            .exchange
            .request(OPERATION, &provision_topic(template_name), &request)
            .await?;

        if response.thing_name.trim().is_empty() {
            return Err(ProvisioningError::Serialization(format!(
                "{} accepted reply carries an empty thingName",
                OPERATION
            )));
        }

        if response.thing_name != requested {
            warn!(
                requested = %requested,
                registered = %response.thing_name,
                "Registry assigned a different thing name"
            );
        }
        info!(thing_name = %response.thing_name, template = %template_name, "Thing registered");

        Ok(RegisteredIdentity {
            thing_name: response.thing_name,
            device_configuration: response.device_configuration,
        })
    }
}
