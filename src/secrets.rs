//! # Secret Manager
//!
//! Generates, rotates, and distributes credentials and TLS material with
//! versioning.
//!
//! Every mutation requires a [`LeaderToken`]: only the leader unit
//! originates secret material, non-leader units observe and apply. Writes
//! go through a write-ahead intent record and become visible to consumers
//! only after [`SecretManager::commit`], so a pass that fails mid-way never
//! exposes a partial rotation.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use rand::Rng;
use tracing::{debug, info};
use zeroize::Zeroizing;

use crate::constants::GENERATED_PASSWORD_LEN;
use crate::errors::LifecycleError;
use crate::tls::{self, TlsMaterial};

/// Capability token proving the holder is the elected leader.
///
/// Minted only by [`ClusterContext::leader_token`](crate::cluster::ClusterContext::leader_token);
/// secret mutation methods take it by reference, which makes them statically
/// unavailable to code paths that never acquired leadership.
#[derive(Debug)]
pub struct LeaderToken {
    _priv: (),
}

impl LeaderToken {
    pub(crate) fn new() -> Self {
        Self { _priv: () }
    }
}

/// One active credential for a principal.
#[derive(Clone)]
pub struct Credential {
    pub principal: String,
    value: Zeroizing<String>,
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub rotated_by: String,
}

impl Credential {
    /// The secret value.
    #[must_use]
    pub fn value(&self) -> &str {
        &self.value
    }
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Never expose the secret value in debug output
        f.debug_struct("Credential")
            .field("principal", &self.principal)
            .field("version", &self.version)
            .field("created_at", &self.created_at)
            .field("rotated_by", &self.rotated_by)
            .finish_non_exhaustive()
    }
}

/// Audit trail entry emitted for every rotation and TLS issuance.
#[derive(Debug, Clone)]
pub struct AuditRecord {
    pub principal: String,
    pub version: u64,
    pub actor: String,
    pub timestamp: DateTime<Utc>,
}

/// Credential and TLS material store.
///
/// Guarded by the single-pass-at-a-time invariant of the reconciler; no
/// internal locking.
#[derive(Debug, Default)]
pub struct SecretManager {
    active: BTreeMap<String, Credential>,
    /// Write-ahead intents, committed once the workload acknowledges
    pending: BTreeMap<String, Credential>,
    tls: Option<TlsMaterial>,
    audit: Vec<AuditRecord>,
}

impl SecretManager {
    /// Idempotently ensure a credential exists for `principal`.
    ///
    /// Returns the existing (or already staged) credential when present,
    /// otherwise stages a freshly generated one at version 1.
    pub fn ensure(&mut self, _token: &LeaderToken, principal: &str, actor: &str) -> Credential {
        if let Some(cred) = self.pending.get(principal) {
            return cred.clone();
        }
        if let Some(cred) = self.active.get(principal) {
            return cred.clone();
        }

        let cred = Credential {
            principal: principal.to_string(),
            value: Zeroizing::new(generate_password()),
            version: 1,
            created_at: Utc::now(),
            rotated_by: actor.to_string(),
        };
        info!(principal, version = 1, "staging initial credential");
        self.pending.insert(principal.to_string(), cred.clone());
        cred
    }

    /// Stage a rotation for `principal`.
    ///
    /// Generates a value when `new_value` is omitted. The staged version is
    /// strictly greater than the active one; the old version is invalidated
    /// atomically at [`commit`](Self::commit) time. Emits an audit record.
    pub fn rotate(
        &mut self,
        _token: &LeaderToken,
        principal: &str,
        new_value: Option<String>,
        actor: &str,
    ) -> Credential {
        let next_version = self.active.get(principal).map_or(1, |c| c.version + 1);
        let cred = Credential {
            principal: principal.to_string(),
            value: Zeroizing::new(new_value.unwrap_or_else(generate_password)),
            version: next_version,
            created_at: Utc::now(),
            rotated_by: actor.to_string(),
        };

        info!(principal, version = next_version, actor, "staging credential rotation");
        self.audit.push(AuditRecord {
            principal: principal.to_string(),
            version: next_version,
            actor: actor.to_string(),
            timestamp: Utc::now(),
        });
        self.pending.insert(principal.to_string(), cred.clone());
        cred
    }

    /// Commit the staged intent for `principal`, invalidating the previous
    /// version for authentication in the same step.
    pub fn commit(&mut self, principal: &str) {
        if let Some(cred) = self.pending.remove(principal) {
            debug!(principal, version = cred.version, "committing credential");
            self.active.insert(principal.to_string(), cred);
        }
    }

    /// Commit every staged intent. Called once the workload has
    /// acknowledged the applied configuration.
    pub fn commit_all(&mut self) {
        let principals: Vec<String> = self.pending.keys().cloned().collect();
        for principal in principals {
            self.commit(&principal);
        }
    }

    /// Discard the staged intent for `principal`.
    pub fn rollback(&mut self, principal: &str) {
        self.pending.remove(principal);
    }

    /// Discard all staged intents, restoring the last committed view.
    pub fn rollback_all(&mut self) {
        if !self.pending.is_empty() {
            debug!(count = self.pending.len(), "rolling back staged credentials");
            self.pending.clear();
        }
    }

    /// Whether any intent is staged but not yet committed.
    #[must_use]
    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    /// The staged-or-active credential for `principal`, preferring the
    /// staged one. This is the value the desired configuration is rendered
    /// from.
    #[must_use]
    pub fn desired(&self, principal: &str) -> Option<&Credential> {
        self.pending.get(principal).or_else(|| self.active.get(principal))
    }

    /// The committed credential for `principal`, if any.
    #[must_use]
    pub fn get(&self, principal: &str) -> Option<&Credential> {
        self.active.get(principal)
    }

    /// Check a value against the committed credential. Only the active
    /// version authenticates; prior versions authenticate nothing.
    #[must_use]
    pub fn authenticate(&self, principal: &str, value: &str) -> bool {
        self.active
            .get(principal)
            .is_some_and(|c| c.value() == value)
    }

    // --- TLS ---

    /// Issue TLS material for the unit, tied to a certificates relation.
    ///
    /// Caller-supplied key material is validated for PEM structural
    /// correctness; otherwise a fresh key is generated. A CSR is produced
    /// either way and an audit record emitted.
    pub fn issue_tls_key(
        &mut self,
        _token: &LeaderToken,
        relation_id: &str,
        private_key: Option<&str>,
        subject: &str,
        sans: &[String],
    ) -> Result<&TlsMaterial, LifecycleError> {
        let key = match private_key {
            Some(pem) => {
                tls::validate_private_key(pem)?;
                pem.to_string()
            }
            None => tls::generate_private_key()?,
        };
        let csr = tls::generate_csr(&key, subject, sans)?;

        info!(relation_id, subject, "issuing unit TLS key and CSR");
        self.audit.push(AuditRecord {
            principal: "unit-tls".to_string(),
            version: self.audit.iter().filter(|r| r.principal == "unit-tls").count() as u64 + 1,
            actor: subject.to_string(),
            timestamp: Utc::now(),
        });

        Ok(self.tls.insert(TlsMaterial {
            private_key: key,
            certificate_signing_request: csr,
            signed_certificate: None,
            ca_certificate: None,
            issuer_relation_id: relation_id.to_string(),
        }))
    }

    /// Regenerate the CSR from the existing private key, e.g. on
    /// certificate expiry or after a key swap.
    pub fn renew_csr(
        &mut self,
        _token: &LeaderToken,
        subject: &str,
        sans: &[String],
    ) -> Result<&TlsMaterial, LifecycleError> {
        let material = self.tls.as_mut().ok_or_else(|| {
            LifecycleError::ValidationFailure("no TLS material to renew".to_string())
        })?;
        material.certificate_signing_request = tls::generate_csr(&material.private_key, subject, sans)?;
        material.signed_certificate = None;
        material.ca_certificate = None;
        Ok(material)
    }

    /// Apply a signed certificate arriving from the certificates provider.
    ///
    /// The certificate is keyed by CSR; one that does not match the CSR on
    /// record is rejected.
    pub fn certificate_signed(
        &mut self,
        csr: &str,
        certificate: &str,
        ca: &str,
    ) -> Result<(), LifecycleError> {
        let material = self.tls.as_mut().ok_or_else(|| {
            LifecycleError::ValidationFailure("certificate arrived without TLS material".to_string())
        })?;
        if material.certificate_signing_request.trim() != csr.trim() {
            return Err(LifecycleError::ValidationFailure(
                "signed certificate does not match the CSR on record".to_string(),
            ));
        }
        material.signed_certificate = Some(certificate.to_string());
        material.ca_certificate = Some(ca.to_string());
        Ok(())
    }

    /// Tear down all TLS material, reverting the unit to a non-TLS
    /// configuration.
    pub fn teardown_tls(&mut self) {
        if self.tls.take().is_some() {
            info!("TLS material removed");
        }
    }

    /// Current TLS material, if any.
    #[must_use]
    pub fn tls(&self) -> Option<&TlsMaterial> {
        self.tls.as_ref()
    }

    /// Audit trail of rotations and TLS issuances.
    #[must_use]
    pub fn audit_log(&self) -> &[AuditRecord] {
        &self.audit
    }
}

/// Generate a credential value using the thread-local CSPRNG.
fn generate_password() -> String {
    let mut rng = rand::thread_rng();
    (0..GENERATED_PASSWORD_LEN)
        .map(|_| {
            let idx = rng.gen_range(0..62);
            match idx {
                0..=9 => (b'0' + idx) as char,
                10..=35 => (b'a' + idx - 10) as char,
                _ => (b'A' + idx - 36) as char,
            }
        })
        .collect()
}
