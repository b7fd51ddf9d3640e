//! Dependency-ordered teardown of registry resources
//!
//! Both the pre-provisioning guard and the lifecycle cleaner remove
//! resources through these two routines so the ordering rules live in one
//! place:
//! - certificate: detach from every thing, detach every policy, deactivate,
//!   delete
//! - thing: detach every principal, delete
//!
//! Each step is best-effort. A failed step is logged, recorded in the
//! caller's failure list, and the later steps that depend on it are
//! skipped, so a delete is never attempted while an attachment is known to
//! remain.

use tracing::{debug, warn};

use shared::types::{CertificateStatus, CleanupFailure, CleanupStep, ResourceRef};

use crate::registry::DeviceRegistry;

fn record(
    failures: &mut Vec<CleanupFailure>,
    resource: ResourceRef,
    step: CleanupStep,
    reason: impl ToString,
) {
    let failure = CleanupFailure {
        resource,
        step,
        reason: reason.to_string(),
    };
    warn!(
        resource = %failure.resource,
        step = %failure.step,
        reason = %failure.reason,
        "Cleanup step failed"
    );
    failures.push(failure);
}

/// Detach, deactivate and delete one certificate
///
/// `status` skips the deactivation call when the certificate is already
/// known to be inactive. Returns whether the certificate was deleted.
pub async fn retire_certificate(
    registry: &dyn DeviceRegistry,
    certificate_id: &str,
    principal: &str,
    status: Option<CertificateStatus>,
    failures: &mut Vec<CleanupFailure>,
) -> bool {
    let resource = || ResourceRef::Certificate(certificate_id.to_string());
    let mut detached = true;

    match registry.list_principal_things(principal).await {
        Ok(things) => {
            for thing_name in things {
                if let Err(e) = registry.detach_thing_principal(&thing_name, principal).await {
                    record(failures, resource(), CleanupStep::DetachPrincipal, e);
                    detached = false;
                } else {
                    debug!(certificate_id = %certificate_id, thing_name = %thing_name, "Detached certificate from thing");
                }
            }
        }
        Err(e) => {
            record(failures, resource(), CleanupStep::ListPrincipalThings, e);
            detached = false;
        }
    }

    match registry.list_attached_policies(principal).await {
        Ok(policies) => {
            for policy_name in policies {
                if let Err(e) = registry.detach_policy(&policy_name, principal).await {
                    record(failures, resource(), CleanupStep::DetachPolicy, e);
                    detached = false;
                } else {
                    debug!(certificate_id = %certificate_id, policy_name = %policy_name, "Detached policy");
                }
            }
        }
        Err(e) => {
            record(failures, resource(), CleanupStep::ListPolicies, e);
            detached = false;
        }
    }

    if !detached {
        return false;
    }

    if status != Some(CertificateStatus::Inactive) {
        if let Err(e) = registry
            .update_certificate_status(certificate_id, CertificateStatus::Inactive)
            .await
        {
            record(failures, resource(), CleanupStep::Deactivate, e);
            return false;
        }
    }

    match registry.delete_certificate(certificate_id).await {
        Ok(()) => {
            debug!(certificate_id = %certificate_id, "Certificate deleted");
            true
        }
        Err(e) => {
            record(failures, resource(), CleanupStep::DeleteCertificate, e);
            false
        }
    }
}

/// Detach every principal from a thing and delete it
///
/// Detached certificates are left in place. Returns whether the thing was
/// deleted.
pub async fn retire_thing(
    registry: &dyn DeviceRegistry,
    thing_name: &str,
    failures: &mut Vec<CleanupFailure>,
) -> bool {
    let resource = || ResourceRef::Thing(thing_name.to_string());

    let principals = match registry.list_thing_principals(thing_name).await {
        Ok(principals) => principals,
        Err(e) => {
            record(failures, resource(), CleanupStep::ListPrincipals, e);
            return false;
        }
    };

    let mut detached = true;
    for principal in principals {
        if let Err(e) = registry.detach_thing_principal(thing_name, &principal).await {
            record(failures, resource(), CleanupStep::DetachPrincipal, e);
            detached = false;
        }
    }
    if !detached {
        return false;
    }

    match registry.delete_thing(thing_name).await {
        Ok(()) => {
            debug!(thing_name = %thing_name, "Thing deleted");
            true
        }
        Err(e) => {
            record(failures, resource(), CleanupStep::DeleteThing, e);
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{MemoryRegistry, RegistryOp};
    use shared::constants::{POLICY_NAME, THING_TYPE};

    #[tokio::test]
    async fn test_retire_certificate_order() {
        let registry = MemoryRegistry::new();
        registry.create_thing("edge-ai-1", Some(THING_TYPE)).unwrap();
        let cert = registry.insert_certificate("cert-1", CertificateStatus::Active);
        registry.attach_thing_principal("edge-ai-1", &cert.arn).unwrap();
        registry.attach_policy(POLICY_NAME, &cert.arn).unwrap();
        registry.clear_mutations();

        let mut failures = Vec::new();
        let deleted =
            retire_certificate(&registry, "cert-1", &cert.arn, Some(cert.status), &mut failures).await;

        assert!(deleted);
        assert!(failures.is_empty());
        assert_eq!(
            registry.mutations(),
            vec![
                RegistryOp::DetachPrincipal {
                    thing_name: "edge-ai-1".into(),
                    principal: cert.arn.clone()
                },
                RegistryOp::DetachPolicy {
                    policy_name: POLICY_NAME.into(),
                    principal: cert.arn.clone()
                },
                RegistryOp::UpdateCertificate {
                    certificate_id: "cert-1".into(),
                    status: CertificateStatus::Inactive
                },
                RegistryOp::DeleteCertificate("cert-1".into()),
            ]
        );
    }

    #[tokio::test]
    async fn test_failed_detach_skips_delete() {
        let registry = MemoryRegistry::new();
        let cert = registry.insert_certificate("cert-1", CertificateStatus::Inactive);
        registry.attach_policy(POLICY_NAME, &cert.arn).unwrap();
        registry.inject_failure(CleanupStep::DetachPolicy, &cert.arn);
        registry.clear_mutations();

        let mut failures = Vec::new();
        let deleted =
            retire_certificate(&registry, "cert-1", &cert.arn, Some(cert.status), &mut failures).await;

        assert!(!deleted);
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].step, CleanupStep::DetachPolicy);
        // Neither deactivation nor deletion was attempted
        assert!(registry.mutations().is_empty());
        assert!(registry.certificate("cert-1").is_some());
    }

    #[tokio::test]
    async fn test_retire_thing_keeps_certificate() {
        let registry = MemoryRegistry::new();
        registry.create_thing("edge-ai-1", Some(THING_TYPE)).unwrap();
        let cert = registry.insert_certificate("cert-1", CertificateStatus::Active);
        registry.attach_thing_principal("edge-ai-1", &cert.arn).unwrap();

        let mut failures = Vec::new();
        assert!(retire_thing(&registry, "edge-ai-1", &mut failures).await);
        assert!(failures.is_empty());
        assert!(!registry.thing_exists("edge-ai-1"));
        assert!(registry.certificate("cert-1").is_some());
    }
}
