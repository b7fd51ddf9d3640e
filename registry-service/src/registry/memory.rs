//! In-memory registry backend
//!
//! Holds the thing/certificate/policy graph in a hashmap-backed store and
//! enforces the managed registry's deletion rules:
//! - a certificate is deletable only when inactive, attached to no thing
//!   and carrying no policy
//! - a thing is deletable only when no principal is attached
//!
//! Every mutation is appended to an operation log so callers can assert
//! exactly what a guard or cleaner pass changed. Failures can be injected
//! per step and target to exercise the best-effort paths.

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::{BTreeMap, BTreeSet, HashSet};
use tracing::{debug, info};

use shared::types::{CertificateRecord, CertificateStatus, CleanupStep, ThingRecord};

use super::{DeviceRegistry, RegistryError, RegistryResult};

/// One recorded mutation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryOp {
    CreateThing(String),
    CreateCertificate(String),
    AttachPrincipal { thing_name: String, principal: String },
    AttachPolicy { policy_name: String, principal: String },
    DetachPrincipal { thing_name: String, principal: String },
    DetachPolicy { policy_name: String, principal: String },
    UpdateCertificate { certificate_id: String, status: CertificateStatus },
    DeleteCertificate(String),
    DeleteThing(String),
}

#[derive(Debug, Clone)]
struct ThingEntry {
    thing_type: Option<String>,
    principals: BTreeSet<String>,
}

#[derive(Debug, Clone)]
struct CertificateEntry {
    arn: String,
    status: CertificateStatus,
    policies: BTreeSet<String>,
}

#[derive(Debug, Default)]
struct RegistryState {
    things: BTreeMap<String, ThingEntry>,
    certificates: BTreeMap<String, CertificateEntry>,
    ownership_tokens: BTreeMap<String, String>,
    ops: Vec<RegistryOp>,
    next_id: u64,
    injected: HashSet<(CleanupStep, String)>,
    unavailable: bool,
}

impl RegistryState {
    fn check_injected(&self, step: CleanupStep, target: &str) -> RegistryResult<()> {
        if self.injected.contains(&(step, target.to_string())) {
            return Err(RegistryError::Service(format!(
                "injected failure: {} on {}",
                step, target
            )));
        }
        Ok(())
    }

    fn certificate_id_for_principal(&self, principal: &str) -> Option<String> {
        self.certificates
            .iter()
            .find(|(_, entry)| entry.arn == principal)
            .map(|(id, _)| id.clone())
    }
}

/// In-memory device registry
#[derive(Debug, Default)]
pub struct MemoryRegistry {
    state: RwLock<RegistryState>,
}

impl MemoryRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Principal reference for a certificate id
    pub fn arn_for(certificate_id: &str) -> String {
        format!("arn:aws:iot:local:000000000000:cert/{}", certificate_id)
    }

    // =========================================================================
    // Provisioning-side mutations
    // =========================================================================

    /// Create a thing
    pub fn create_thing(&self, thing_name: &str, thing_type: Option<&str>) -> RegistryResult<()> {
        let mut state = self.state.write();
        if state.things.contains_key(thing_name) {
            return Err(RegistryError::Conflict(format!(
                "thing '{}' already exists",
                thing_name
            )));
        }
        state.things.insert(
            thing_name.to_string(),
            ThingEntry {
                thing_type: thing_type.map(str::to_string),
                principals: BTreeSet::new(),
            },
        );
        state.ops.push(RegistryOp::CreateThing(thing_name.to_string()));
        info!(thing_name = %thing_name, "Thing created");
        Ok(())
    }

    /// Add a certificate with an explicit id
    pub fn insert_certificate(&self, certificate_id: &str, status: CertificateStatus) -> CertificateRecord {
        let arn = Self::arn_for(certificate_id);
        let mut state = self.state.write();
        state.certificates.insert(
            certificate_id.to_string(),
            CertificateEntry {
                arn: arn.clone(),
                status,
                policies: BTreeSet::new(),
            },
        );
        state
            .ops
            .push(RegistryOp::CreateCertificate(certificate_id.to_string()));
        CertificateRecord {
            id: certificate_id.to_string(),
            arn,
            status,
        }
    }

    /// Issue an active certificate and its single-use ownership token
    ///
    /// Ids are sequential: the first issuance yields `cert-1` / `tok-1`.
    pub fn issue_certificate(&self) -> (CertificateRecord, String) {
        let (certificate_id, token) = {
            let mut state = self.state.write();
            state.next_id += 1;
            (format!("cert-{}", state.next_id), format!("tok-{}", state.next_id))
        };
        let record = self.insert_certificate(&certificate_id, CertificateStatus::Active);
        self.state
            .write()
            .ownership_tokens
            .insert(token.clone(), certificate_id.clone());
        debug!(certificate_id = %certificate_id, "Certificate issued");
        (record, token)
    }

    /// Consume an ownership token, returning the certificate it proves
    pub fn redeem_ownership_token(&self, token: &str) -> RegistryResult<CertificateRecord> {
        let mut state = self.state.write();
        let certificate_id = state
            .ownership_tokens
            .remove(token)
            .ok_or_else(|| RegistryError::NotFound(format!("ownership token '{}'", token)))?;
        let entry = state
            .certificates
            .get(&certificate_id)
            .ok_or_else(|| RegistryError::NotFound(format!("certificate '{}'", certificate_id)))?;
        Ok(CertificateRecord {
            id: certificate_id,
            arn: entry.arn.clone(),
            status: entry.status,
        })
    }

    pub fn attach_thing_principal(&self, thing_name: &str, principal: &str) -> RegistryResult<()> {
        let mut state = self.state.write();
        let thing = state
            .things
            .get_mut(thing_name)
            .ok_or_else(|| RegistryError::NotFound(format!("thing '{}'", thing_name)))?;
        thing.principals.insert(principal.to_string());
        state.ops.push(RegistryOp::AttachPrincipal {
            thing_name: thing_name.to_string(),
            principal: principal.to_string(),
        });
        Ok(())
    }

    pub fn attach_policy(&self, policy_name: &str, principal: &str) -> RegistryResult<()> {
        let mut state = self.state.write();
        let certificate_id = state
            .certificate_id_for_principal(principal)
            .ok_or_else(|| RegistryError::NotFound(format!("principal '{}'", principal)))?;
        if let Some(entry) = state.certificates.get_mut(&certificate_id) {
            entry.policies.insert(policy_name.to_string());
        }
        state.ops.push(RegistryOp::AttachPolicy {
            policy_name: policy_name.to_string(),
            principal: principal.to_string(),
        });
        Ok(())
    }

    // =========================================================================
    // Fault injection
    // =========================================================================

    /// Make `step` fail whenever it targets `target`
    pub fn inject_failure(&self, step: CleanupStep, target: &str) {
        self.state.write().injected.insert((step, target.to_string()));
    }

    /// Make lookups fail with a transport error
    pub fn set_unavailable(&self, unavailable: bool) {
        self.state.write().unavailable = unavailable;
    }

    // =========================================================================
    // Inspection
    // =========================================================================

    /// Mutations recorded so far
    pub fn mutations(&self) -> Vec<RegistryOp> {
        self.state.read().ops.clone()
    }

    /// Forget the recorded mutations
    pub fn clear_mutations(&self) {
        self.state.write().ops.clear();
    }

    pub fn thing_exists(&self, thing_name: &str) -> bool {
        self.state.read().things.contains_key(thing_name)
    }

    pub fn certificate(&self, certificate_id: &str) -> Option<CertificateRecord> {
        self.state
            .read()
            .certificates
            .get(certificate_id)
            .map(|entry| CertificateRecord {
                id: certificate_id.to_string(),
                arn: entry.arn.clone(),
                status: entry.status,
            })
    }

    pub fn principals_of(&self, thing_name: &str) -> Vec<String> {
        self.state
            .read()
            .things
            .get(thing_name)
            .map(|thing| thing.principals.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn policies_of(&self, principal: &str) -> Vec<String> {
        let state = self.state.read();
        state
            .certificates
            .values()
            .find(|entry| entry.arn == principal)
            .map(|entry| entry.policies.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Total number of policy attachments across all certificates
    pub fn policy_attachment_count(&self) -> usize {
        self.state
            .read()
            .certificates
            .values()
            .map(|entry| entry.policies.len())
            .sum()
    }
}

#[async_trait]
impl DeviceRegistry for MemoryRegistry {
    async fn describe_thing(&self, thing_name: &str) -> RegistryResult<Option<ThingRecord>> {
        let state = self.state.read();
        if state.unavailable {
            return Err(RegistryError::Transport("registry unreachable".into()));
        }
        Ok(state.things.get(thing_name).map(|thing| ThingRecord {
            name: thing_name.to_string(),
            thing_type: thing.thing_type.clone(),
        }))
    }

    async fn list_things(&self, thing_type: &str) -> RegistryResult<Vec<ThingRecord>> {
        let state = self.state.read();
        if state.unavailable {
            return Err(RegistryError::Transport("registry unreachable".into()));
        }
        Ok(state
            .things
            .iter()
            .filter(|(_, thing)| thing.thing_type.as_deref() == Some(thing_type))
            .map(|(name, thing)| ThingRecord {
                name: name.clone(),
                thing_type: thing.thing_type.clone(),
            })
            .collect())
    }

    async fn list_thing_principals(&self, thing_name: &str) -> RegistryResult<Vec<String>> {
        let state = self.state.read();
        state.check_injected(CleanupStep::ListPrincipals, thing_name)?;
        state
            .things
            .get(thing_name)
            .map(|thing| thing.principals.iter().cloned().collect())
            .ok_or_else(|| RegistryError::NotFound(format!("thing '{}'", thing_name)))
    }

    async fn list_principal_things(&self, principal: &str) -> RegistryResult<Vec<String>> {
        let state = self.state.read();
        state.check_injected(CleanupStep::ListPrincipalThings, principal)?;
        Ok(state
            .things
            .iter()
            .filter(|(_, thing)| thing.principals.contains(principal))
            .map(|(name, _)| name.clone())
            .collect())
    }

    async fn list_certificates(&self) -> RegistryResult<Vec<CertificateRecord>> {
        let state = self.state.read();
        if state.unavailable {
            return Err(RegistryError::Transport("registry unreachable".into()));
        }
        Ok(state
            .certificates
            .iter()
            .map(|(id, entry)| CertificateRecord {
                id: id.clone(),
                arn: entry.arn.clone(),
                status: entry.status,
            })
            .collect())
    }

    async fn list_attached_policies(&self, principal: &str) -> RegistryResult<Vec<String>> {
        let state = self.state.read();
        state.check_injected(CleanupStep::ListPolicies, principal)?;
        Ok(state
            .certificates
            .values()
            .find(|entry| entry.arn == principal)
            .map(|entry| entry.policies.iter().cloned().collect())
            .unwrap_or_default())
    }

    async fn detach_thing_principal(&self, thing_name: &str, principal: &str) -> RegistryResult<()> {
        let mut state = self.state.write();
        state.check_injected(CleanupStep::DetachPrincipal, principal)?;
        let thing = state
            .things
            .get_mut(thing_name)
            .ok_or_else(|| RegistryError::NotFound(format!("thing '{}'", thing_name)))?;
        thing.principals.remove(principal);
        state.ops.push(RegistryOp::DetachPrincipal {
            thing_name: thing_name.to_string(),
            principal: principal.to_string(),
        });
        Ok(())
    }

    async fn detach_policy(&self, policy_name: &str, principal: &str) -> RegistryResult<()> {
        let mut state = self.state.write();
        state.check_injected(CleanupStep::DetachPolicy, principal)?;
        let certificate_id = state
            .certificate_id_for_principal(principal)
            .ok_or_else(|| RegistryError::NotFound(format!("principal '{}'", principal)))?;
        if let Some(entry) = state.certificates.get_mut(&certificate_id) {
            entry.policies.remove(policy_name);
        }
        state.ops.push(RegistryOp::DetachPolicy {
            policy_name: policy_name.to_string(),
            principal: principal.to_string(),
        });
        Ok(())
    }

    async fn update_certificate_status(
        &self,
        certificate_id: &str,
        status: CertificateStatus,
    ) -> RegistryResult<()> {
        let mut state = self.state.write();
        state.check_injected(CleanupStep::Deactivate, certificate_id)?;
        let entry = state
            .certificates
            .get_mut(certificate_id)
            .ok_or_else(|| RegistryError::NotFound(format!("certificate '{}'", certificate_id)))?;
        entry.status = status;
        state.ops.push(RegistryOp::UpdateCertificate {
            certificate_id: certificate_id.to_string(),
            status,
        });
        Ok(())
    }

    async fn delete_certificate(&self, certificate_id: &str) -> RegistryResult<()> {
        let mut state = self.state.write();
        state.check_injected(CleanupStep::DeleteCertificate, certificate_id)?;
        let entry = state
            .certificates
            .get(certificate_id)
            .ok_or_else(|| RegistryError::NotFound(format!("certificate '{}'", certificate_id)))?;

        if entry.status == CertificateStatus::Active {
            return Err(RegistryError::Conflict(format!(
                "certificate '{}' is still active",
                certificate_id
            )));
        }
        if !entry.policies.is_empty() {
            return Err(RegistryError::Conflict(format!(
                "certificate '{}' still has {} policies attached",
                certificate_id,
                entry.policies.len()
            )));
        }
        let arn = entry.arn.clone();
        if state.things.values().any(|thing| thing.principals.contains(&arn)) {
            return Err(RegistryError::Conflict(format!(
                "certificate '{}' is still attached to a thing",
                certificate_id
            )));
        }

        state.certificates.remove(certificate_id);
        state.ownership_tokens.retain(|_, id| id != certificate_id);
        state
            .ops
            .push(RegistryOp::DeleteCertificate(certificate_id.to_string()));
        Ok(())
    }

    async fn delete_thing(&self, thing_name: &str) -> RegistryResult<()> {
        let mut state = self.state.write();
        state.check_injected(CleanupStep::DeleteThing, thing_name)?;
        let thing = state
            .things
            .get(thing_name)
            .ok_or_else(|| RegistryError::NotFound(format!("thing '{}'", thing_name)))?;
        if !thing.principals.is_empty() {
            return Err(RegistryError::Conflict(format!(
                "thing '{}' still has {} principals attached",
                thing_name,
                thing.principals.len()
            )));
        }
        state.things.remove(thing_name);
        state.ops.push(RegistryOp::DeleteThing(thing_name.to_string()));
        Ok(())
    }
}
