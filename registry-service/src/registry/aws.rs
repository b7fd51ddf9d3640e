//! AWS IoT registry backend

use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_iot::config::Region;
use aws_sdk_iot::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use aws_sdk_iot::types::CertificateStatus as SdkCertificateStatus;
use aws_sdk_iot::Client;
use tracing::{debug, info};

use shared::types::{CertificateRecord, CertificateStatus, ThingRecord};

use super::{DeviceRegistry, RegistryError, RegistryResult};

const RESOURCE_NOT_FOUND: &str = "ResourceNotFoundException";

/// Managed registry reached through the AWS SDK
#[derive(Debug, Clone)]
pub struct AwsIotRegistry {
    client: Client,
}

impl AwsIotRegistry {
    /// Build a client; `None` uses the SDK's default region chain
    pub async fn new(region: Option<String>) -> Self {
        let mut loader = aws_config::defaults(BehaviorVersion::latest());
        if let Some(region) = region {
            loader = loader.region(Region::new(region));
        }
        let sdk_config = loader.load().await;

        info!(
            region = ?sdk_config.region().map(|r| r.as_ref().to_string()),
            "AWS IoT registry client ready"
        );

        Self {
            client: Client::new(&sdk_config),
        }
    }
}

fn classify<E, R>(err: SdkError<E, R>) -> RegistryError
where
    E: ProvideErrorMetadata + std::error::Error + 'static,
    R: std::fmt::Debug,
{
    match &err {
        SdkError::DispatchFailure(_) | SdkError::TimeoutError(_) => {
            RegistryError::Transport(DisplayErrorContext(&err).to_string())
        }
        _ if err.code() == Some(RESOURCE_NOT_FOUND) => {
            RegistryError::NotFound(err.message().unwrap_or(RESOURCE_NOT_FOUND).to_string())
        }
        _ => RegistryError::Service(DisplayErrorContext(&err).to_string()),
    }
}

fn status_from_sdk(status: Option<&SdkCertificateStatus>) -> CertificateStatus {
    match status {
        Some(SdkCertificateStatus::Inactive) => CertificateStatus::Inactive,
        Some(SdkCertificateStatus::Revoked) => CertificateStatus::Revoked,
        Some(SdkCertificateStatus::PendingTransfer) => CertificateStatus::PendingTransfer,
        Some(SdkCertificateStatus::RegisterInactive) => CertificateStatus::RegisterInactive,
        Some(SdkCertificateStatus::PendingActivation) => CertificateStatus::PendingActivation,
        // Unrecognized statuses are never swept as inactive
        _ => CertificateStatus::Active,
    }
}

fn status_to_sdk(status: CertificateStatus) -> SdkCertificateStatus {
    match status {
        CertificateStatus::Active => SdkCertificateStatus::Active,
        CertificateStatus::Inactive => SdkCertificateStatus::Inactive,
        CertificateStatus::Revoked => SdkCertificateStatus::Revoked,
        CertificateStatus::PendingTransfer => SdkCertificateStatus::PendingTransfer,
        CertificateStatus::RegisterInactive => SdkCertificateStatus::RegisterInactive,
        CertificateStatus::PendingActivation => SdkCertificateStatus::PendingActivation,
    }
}

#[async_trait]
impl DeviceRegistry for AwsIotRegistry {
    async fn describe_thing(&self, thing_name: &str) -> RegistryResult<Option<ThingRecord>> {
        match self.client.describe_thing().thing_name(thing_name).send().await {
            Ok(output) => Ok(Some(ThingRecord {
                name: output.thing_name().unwrap_or(thing_name).to_string(),
                thing_type: output.thing_type_name().map(str::to_string),
            })),
            Err(err) => match classify(err) {
                RegistryError::NotFound(_) => Ok(None),
                other => Err(other),
            },
        }
    }

    async fn list_things(&self, thing_type: &str) -> RegistryResult<Vec<ThingRecord>> {
        let mut pages = self
            .client
            .list_things()
            .thing_type_name(thing_type)
            .into_paginator()
            .send();

        let mut things = Vec::new();
        while let Some(page) = pages.next().await {
            let page = page.map_err(classify)?;
            for thing in page.things() {
                if let Some(name) = thing.thing_name() {
                    things.push(ThingRecord {
                        name: name.to_string(),
                        thing_type: thing.thing_type_name().map(str::to_string),
                    });
                }
            }
        }
        debug!(thing_type = %thing_type, count = things.len(), "Listed things");
        Ok(things)
    }

    async fn list_thing_principals(&self, thing_name: &str) -> RegistryResult<Vec<String>> {
        let mut pages = self
            .client
            .list_thing_principals()
            .thing_name(thing_name)
            .into_paginator()
            .send();

        let mut principals = Vec::new();
        while let Some(page) = pages.next().await {
            let page = page.map_err(classify)?;
            principals.extend(page.principals().iter().cloned());
        }
        Ok(principals)
    }

    async fn list_principal_things(&self, principal: &str) -> RegistryResult<Vec<String>> {
        let mut pages = self
            .client
            .list_principal_things()
            .principal(principal)
            .into_paginator()
            .send();

        let mut things = Vec::new();
        while let Some(page) = pages.next().await {
            let page = page.map_err(classify)?;
            things.extend(page.things().iter().cloned());
        }
        Ok(things)
    }

    async fn list_certificates(&self) -> RegistryResult<Vec<CertificateRecord>> {
        let mut pages = self.client.list_certificates().into_paginator().send();

        let mut certificates = Vec::new();
        while let Some(page) = pages.next().await {
            let page = page.map_err(classify)?;
            for cert in page.certificates() {
                if let (Some(id), Some(arn)) = (cert.certificate_id(), cert.certificate_arn()) {
                    certificates.push(CertificateRecord {
                        id: id.to_string(),
                        arn: arn.to_string(),
                        status: status_from_sdk(cert.status()),
                    });
                }
            }
        }
        debug!(count = certificates.len(), "Listed certificates");
        Ok(certificates)
    }

    async fn list_attached_policies(&self, principal: &str) -> RegistryResult<Vec<String>> {
        let mut pages = self
            .client
            .list_attached_policies()
            .target(principal)
            .into_paginator()
            .send();

        let mut policies = Vec::new();
        while let Some(page) = pages.next().await {
            let page = page.map_err(classify)?;
            policies.extend(
                page.policies()
                    .iter()
                    .filter_map(|p| p.policy_name().map(str::to_string)),
            );
        }
        Ok(policies)
    }

    async fn detach_thing_principal(&self, thing_name: &str, principal: &str) -> RegistryResult<()> {
        self.client
            .detach_thing_principal()
            .thing_name(thing_name)
            .principal(principal)
            .send()
            .await
            .map_err(classify)?;
        Ok(())
    }

    async fn detach_policy(&self, policy_name: &str, principal: &str) -> RegistryResult<()> {
        self.client
            .detach_policy()
            .policy_name(policy_name)
            .target(principal)
            .send()
            .await
            .map_err(classify)?;
        Ok(())
    }

    async fn update_certificate_status(
        &self,
        certificate_id: &str,
        status: CertificateStatus,
    ) -> RegistryResult<()> {
        self.client
            .update_certificate()
            .certificate_id(certificate_id)
            .new_status(status_to_sdk(status))
            .send()
            .await
            .map_err(classify)?;
        Ok(())
    }

    async fn delete_certificate(&self, certificate_id: &str) -> RegistryResult<()> {
        self.client
            .delete_certificate()
            .certificate_id(certificate_id)
            .force_delete(true)
            .send()
            .await
            .map_err(classify)?;
        Ok(())
    }

    async fn delete_thing(&self, thing_name: &str) -> RegistryResult<()> {
        self.client
            .delete_thing()
            .thing_name(thing_name)
            .send()
            .await
            .map_err(classify)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        for status in [
            CertificateStatus::Active,
            CertificateStatus::Inactive,
            CertificateStatus::Revoked,
            CertificateStatus::PendingTransfer,
            CertificateStatus::RegisterInactive,
            CertificateStatus::PendingActivation,
        ] {
            assert_eq!(status_from_sdk(Some(&status_to_sdk(status))), status);
        }
        assert_eq!(status_from_sdk(None), CertificateStatus::Active);
    }
}
