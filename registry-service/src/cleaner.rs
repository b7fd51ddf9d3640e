//! # Lifecycle Cleaner
//!
//! Fleet-wide sweep for resources left inconsistent by interrupted
//! provisioning runs. One pass has two phases:
//!
//! 1. **Scan**: list the fleet's things and every certificate, and classify
//!    - things with no attached principal (orphaned things)
//!    - certificates attached to no thing (orphaned certificates)
//!    - certificates with status `INACTIVE`
//! 2. **Apply**: delete the findings in dependency order. Skipped in
//!    preview mode.
//!
//! Per-resource failures in either phase are recorded in the report and the
//! pass continues with the next resource.

use std::sync::Arc;
use tracing::{info, warn};

use shared::types::{CertificateStatus, CleanupFailure, CleanupReport, CleanupStep, ResourceRef};

use crate::registry::{DeviceRegistry, RegistryResult};
use crate::teardown::{retire_certificate, retire_thing};

/// Batch cleaner over one registry
pub struct LifecycleCleaner {
    registry: Arc<dyn DeviceRegistry>,
    thing_type: String,
}

impl LifecycleCleaner {
    /// Create a cleaner for the things of `thing_type`
    pub fn new(registry: Arc<dyn DeviceRegistry>, thing_type: impl Into<String>) -> Self {
        Self {
            registry,
            thing_type: thing_type.into(),
        }
    }

    /// Scan and, unless `dry_run`, delete the findings
    pub async fn run(&self, dry_run: bool) -> RegistryResult<CleanupReport> {
        let mut report = self.scan().await?;
        if dry_run {
            info!(findings = report.findings_count(), "Dry run, nothing deleted");
        } else {
            self.apply(&mut report).await;
        }
        Ok(report)
    }

    /// Classify the registry's current state without mutating it
    ///
    /// The returned report is marked as a preview. Failing to enumerate
    /// things or certificates at all is an error; failing to inspect a
    /// single resource is recorded and that resource is left unclassified.
    pub async fn scan(&self) -> RegistryResult<CleanupReport> {
        let mut report = CleanupReport::new(true);

        let things = self.registry.list_things(&self.thing_type).await?;
        info!(thing_type = %self.thing_type, count = things.len(), "Scanning things");

        for thing in things {
            match self.registry.list_thing_principals(&thing.name).await {
                Ok(principals) if principals.is_empty() => {
                    info!(thing_name = %thing.name, "Orphaned thing");
                    report.orphaned_things.push(thing.name);
                }
                Ok(_) => {}
                Err(e) => {
                    warn!(thing_name = %thing.name, error = %e, "Could not list principals");
                    report.failures.push(CleanupFailure {
                        resource: ResourceRef::Thing(thing.name),
                        step: CleanupStep::ListPrincipals,
                        reason: e.to_string(),
                    });
                }
            }
        }

        let certificates = self.registry.list_certificates().await?;
        info!(count = certificates.len(), "Scanning certificates");

        for cert in certificates {
            match self.registry.list_principal_things(&cert.arn).await {
                Ok(things) if things.is_empty() => {
                    info!(certificate_id = %cert.short_id(), status = %cert.status, "Orphaned certificate");
                    report.orphaned_certificates.push(cert.clone());
                }
                Ok(_) => {}
                Err(e) => {
                    warn!(certificate_id = %cert.short_id(), error = %e, "Could not list attached things");
                    report.failures.push(CleanupFailure {
                        resource: ResourceRef::Certificate(cert.id.clone()),
                        step: CleanupStep::ListPrincipalThings,
                        reason: e.to_string(),
                    });
                }
            }

            if cert.status == CertificateStatus::Inactive {
                info!(certificate_id = %cert.short_id(), "Inactive certificate");
                report.inactive_certificates.push(cert);
            }
        }

        info!(
            orphaned_things = report.orphaned_things.len(),
            orphaned_certificates = report.orphaned_certificates.len(),
            inactive_certificates = report.inactive_certificates.len(),
            "Scan complete"
        );

        Ok(report)
    }

    /// Delete every finding of a scanned report
    pub async fn apply(&self, report: &mut CleanupReport) {
        let registry = self.registry.as_ref();
        report.dry_run = false;

        let things = report.orphaned_things.clone();
        for thing_name in things {
            if retire_thing(registry, &thing_name, &mut report.failures).await {
                info!(thing_name = %thing_name, "Deleted orphaned thing");
                report.deleted_things.push(thing_name);
            }
        }

        for cert in report.certificates_to_delete() {
            if retire_certificate(
                registry,
                &cert.id,
                &cert.arn,
                Some(cert.status),
                &mut report.failures,
            )
            .await
            {
                info!(certificate_id = %cert.short_id(), "Deleted certificate");
                report.deleted_certificates.push(cert.id);
            }
        }

        if report.failures.is_empty() {
            info!(
                things = report.deleted_things.len(),
                certificates = report.deleted_certificates.len(),
                "Cleanup complete"
            );
        } else {
            warn!(
                things = report.deleted_things.len(),
                certificates = report.deleted_certificates.len(),
                failures = report.failures.len(),
                "Cleanup finished with failures"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{MemoryRegistry, RegistryOp};
    use shared::constants::{POLICY_NAME, THING_TYPE};

    /// Healthy device plus the given residue
    fn fleet() -> Arc<MemoryRegistry> {
        let registry = Arc::new(MemoryRegistry::new());
        registry.create_thing("edge-ai-HEALTHY", Some(THING_TYPE)).unwrap();
        let cert = registry.insert_certificate("cert-healthy", CertificateStatus::Active);
        registry.attach_thing_principal("edge-ai-HEALTHY", &cert.arn).unwrap();
        registry.attach_policy(POLICY_NAME, &cert.arn).unwrap();
        registry
    }

    fn cleaner(registry: &Arc<MemoryRegistry>) -> LifecycleCleaner {
        LifecycleCleaner::new(registry.clone(), THING_TYPE)
    }

    #[tokio::test]
    async fn test_dry_run_reports_without_mutation() {
        let registry = fleet();
        registry.create_thing("edge-ai-ORPHAN1", Some(THING_TYPE)).unwrap();
        registry.create_thing("edge-ai-ORPHAN2", Some(THING_TYPE)).unwrap();
        let orphan = registry.insert_certificate("cert-orphan", CertificateStatus::Active);
        registry.attach_policy(POLICY_NAME, &orphan.arn).unwrap();
        registry.clear_mutations();

        let report = cleaner(&registry).run(true).await.unwrap();

        assert!(report.dry_run);
        assert_eq!(report.findings_count(), 3);
        assert_eq!(report.orphaned_things, vec!["edge-ai-ORPHAN1", "edge-ai-ORPHAN2"]);
        assert_eq!(report.orphaned_certificates.len(), 1);
        assert_eq!(report.orphaned_certificates[0].id, "cert-orphan");
        assert!(report.inactive_certificates.is_empty());
        assert!(report.deleted_things.is_empty());
        assert!(report.deleted_certificates.is_empty());
        assert!(registry.mutations().is_empty());
    }

    #[tokio::test]
    async fn test_orphan_classification() {
        let registry = fleet();
        registry.create_thing("edge-ai-ORPHAN", Some(THING_TYPE)).unwrap();
        // Things of another type are out of scope
        registry.create_thing("gateway-1", Some("gateway")).unwrap();
        let retired = registry.insert_certificate("cert-retired", CertificateStatus::Inactive);
        registry.create_thing("edge-ai-RETIRED", Some(THING_TYPE)).unwrap();
        registry.attach_thing_principal("edge-ai-RETIRED", &retired.arn).unwrap();
        registry.insert_certificate("cert-loose", CertificateStatus::Inactive);

        let report = cleaner(&registry).scan().await.unwrap();

        assert_eq!(report.orphaned_things, vec!["edge-ai-ORPHAN"]);
        let orphaned: Vec<&str> = report
            .orphaned_certificates
            .iter()
            .map(|c| c.id.as_str())
            .collect();
        assert_eq!(orphaned, vec!["cert-loose"]);
        let inactive: Vec<&str> = report
            .inactive_certificates
            .iter()
            .map(|c| c.id.as_str())
            .collect();
        assert_eq!(inactive, vec!["cert-loose", "cert-retired"]);
    }

    #[tokio::test]
    async fn test_apply_deletes_in_dependency_order() {
        let registry = fleet();
        registry.create_thing("edge-ai-ORPHAN", Some(THING_TYPE)).unwrap();
        let orphan = registry.insert_certificate("cert-orphan", CertificateStatus::Active);
        registry.attach_policy(POLICY_NAME, &orphan.arn).unwrap();
        let retired = registry.insert_certificate("cert-retired", CertificateStatus::Inactive);
        registry.create_thing("edge-ai-RETIRED", Some(THING_TYPE)).unwrap();
        registry.attach_thing_principal("edge-ai-RETIRED", &retired.arn).unwrap();
        registry.attach_policy(POLICY_NAME, &retired.arn).unwrap();
        registry.clear_mutations();

        let report = cleaner(&registry).run(false).await.unwrap();

        assert!(!report.dry_run);
        assert!(report.failures.is_empty(), "{:?}", report.failures);
        assert_eq!(report.deleted_things, vec!["edge-ai-ORPHAN"]);
        assert_eq!(report.deleted_certificates, vec!["cert-orphan", "cert-retired"]);

        let ops = registry.mutations();
        let position = |op: &RegistryOp| ops.iter().position(|o| o == op).unwrap();
        let delete_retired = position(&RegistryOp::DeleteCertificate("cert-retired".into()));
        assert!(
            position(&RegistryOp::DetachPolicy {
                policy_name: POLICY_NAME.into(),
                principal: retired.arn.clone()
            }) < delete_retired
        );
        assert!(
            position(&RegistryOp::DetachPrincipal {
                thing_name: "edge-ai-RETIRED".into(),
                principal: retired.arn.clone()
            }) < delete_retired
        );
        // Already inactive: no redundant status update
        assert!(!ops.contains(&RegistryOp::UpdateCertificate {
            certificate_id: "cert-retired".into(),
            status: CertificateStatus::Inactive
        }));

        // The healthy device is untouched
        assert!(registry.thing_exists("edge-ai-HEALTHY"));
        assert!(registry.certificate("cert-healthy").is_some());
        // The thing that lost its certificate is found on the next pass
        let next = cleaner(&registry).scan().await.unwrap();
        assert_eq!(next.orphaned_things, vec!["edge-ai-RETIRED"]);
    }

    #[tokio::test]
    async fn test_orphaned_and_inactive_deleted_once() {
        let registry = fleet();
        registry.insert_certificate("cert-both", CertificateStatus::Inactive);
        registry.clear_mutations();

        let report = cleaner(&registry).run(false).await.unwrap();

        assert_eq!(report.findings_count(), 2);
        assert_eq!(report.deleted_certificates, vec!["cert-both"]);
        assert!(report.failures.is_empty());
        let deletes = registry
            .mutations()
            .into_iter()
            .filter(|op| matches!(op, RegistryOp::DeleteCertificate(_)))
            .count();
        assert_eq!(deletes, 1);
    }

    #[tokio::test]
    async fn test_continues_past_failures() {
        let registry = fleet();
        registry.create_thing("edge-ai-STUCK", Some(THING_TYPE)).unwrap();
        registry.create_thing("edge-ai-ORPHAN", Some(THING_TYPE)).unwrap();
        let stuck = registry.insert_certificate("cert-stuck", CertificateStatus::Active);
        registry.attach_policy(POLICY_NAME, &stuck.arn).unwrap();
        registry.insert_certificate("cert-orphan", CertificateStatus::Active);
        registry.inject_failure(CleanupStep::DeleteThing, "edge-ai-STUCK");
        registry.inject_failure(CleanupStep::DetachPolicy, &stuck.arn);

        let report = cleaner(&registry).run(false).await.unwrap();

        assert_eq!(report.deleted_things, vec!["edge-ai-ORPHAN"]);
        assert_eq!(report.deleted_certificates, vec!["cert-orphan"]);
        assert_eq!(report.failures.len(), 2);
        assert!(report
            .failures
            .iter()
            .any(|f| f.resource == ResourceRef::Thing("edge-ai-STUCK".into())
                && f.step == CleanupStep::DeleteThing));
        assert!(report
            .failures
            .iter()
            .any(|f| f.resource == ResourceRef::Certificate("cert-stuck".into())
                && f.step == CleanupStep::DetachPolicy));
        // Policy still attached, so the certificate was never deleted or deactivated
        assert_eq!(
            registry.certificate("cert-stuck").map(|c| c.status),
            Some(CertificateStatus::Active)
        );
    }

    #[tokio::test]
    async fn test_listing_failure_is_fatal() {
        let registry = fleet();
        registry.set_unavailable(true);
        assert!(cleaner(&registry).run(true).await.is_err());
    }
}
