//! # Cluster Context
//!
//! The single explicit context object passed into every reconciliation
//! pass. It owns the relation tracker, the secret manager, the auth store,
//! the broker-facing cluster config, and the last-applied state. Created at
//! process start, persisted across passes, torn down at process exit; no
//! component mutates it outside a pass.

use std::collections::BTreeMap;

use serde_json::Value;

use crate::auth::AuthStore;
use crate::config::ClusterConfig;
use crate::constants::{ADMIN_USER, KAFKA_RELATION, PEER_RELATION, TLS_RELATION};
use crate::errors::LifecycleError;
use crate::relations::{RelationStatus, RelationTracker};
use crate::restart::RestartLock;
use crate::secrets::{LeaderToken, SecretManager};

/// Externally visible status of the operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperatorStatus {
    Active,
    NoPeerRelation,
    KafkaNotRelated,
    KafkaNoData,
    KafkaTlsMismatch,
    AwaitingCertificate,
    NoCreds,
    ServiceNotRunning,
}

impl OperatorStatus {
    /// Human-readable status message.
    #[must_use]
    pub fn message(&self) -> &'static str {
        match self {
            OperatorStatus::Active => "active",
            OperatorStatus::NoPeerRelation => "no peer relation yet",
            OperatorStatus::KafkaNotRelated => "missing required kafka relation",
            OperatorStatus::KafkaNoData => "kafka credentials not created yet",
            OperatorStatus::KafkaTlsMismatch => {
                "tls must be enabled on both karapace and kafka"
            }
            OperatorStatus::AwaitingCertificate => "unit waiting for signed certificates",
            OperatorStatus::NoCreds => "internal credentials not yet added",
            OperatorStatus::ServiceNotRunning => "karapace service not running",
        }
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        matches!(self, OperatorStatus::Active)
    }
}

/// Snapshot of what was last successfully applied to the workload.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AppliedState {
    pub service_config: BTreeMap<String, Value>,
    pub authfile: String,
    pub tls_files: bool,
}

/// Mutable state of the running deployment, owned by the reconciliation
/// loop.
#[derive(Debug)]
pub struct ClusterContext {
    pub unit_name: String,
    pub unit_address: String,
    is_leader: bool,
    pub relations: RelationTracker,
    pub secrets: SecretManager,
    pub auth: AuthStore,
    pub cluster_config: ClusterConfig,
    pub restart_lock: RestartLock,
    pub last_applied: Option<AppliedState>,
    pub status: OperatorStatus,
}

impl ClusterContext {
    #[must_use]
    pub fn new(unit_name: impl Into<String>, unit_address: impl Into<String>) -> Self {
        Self {
            unit_name: unit_name.into(),
            unit_address: unit_address.into(),
            is_leader: false,
            relations: RelationTracker::default(),
            secrets: SecretManager::default(),
            auth: AuthStore::default(),
            cluster_config: ClusterConfig::default(),
            restart_lock: RestartLock::default(),
            last_applied: None,
            status: OperatorStatus::NoPeerRelation,
        }
    }

    pub fn set_leader(&mut self, is_leader: bool) {
        self.is_leader = is_leader;
    }

    #[must_use]
    pub fn is_leader(&self) -> bool {
        self.is_leader
    }

    /// Acquire the capability token required for secret mutation.
    ///
    /// Fails with [`LifecycleError::LeadershipRequired`] on non-leader
    /// units; there is no other way to mint a [`LeaderToken`].
    pub fn leader_token(&self) -> Result<LeaderToken, LifecycleError> {
        if self.is_leader {
            Ok(LeaderToken::new())
        } else {
            Err(LifecycleError::LeadershipRequired)
        }
    }

    // --- RELATION VIEWS ---

    #[must_use]
    pub fn has_peer_relation(&self) -> bool {
        !matches!(
            self.relations.status(PEER_RELATION),
            RelationStatus::Absent | RelationStatus::Broken
        )
    }

    /// Whether the deployment should run with TLS: true while a
    /// certificates relation is established.
    #[must_use]
    pub fn tls_enabled(&self) -> bool {
        !matches!(
            self.relations.status(TLS_RELATION),
            RelationStatus::Absent | RelationStatus::Broken
        )
    }

    /// A kafka relation field, empty string when missing.
    #[must_use]
    pub fn kafka_field(&self, key: &str) -> &str {
        self.relations
            .get(KAFKA_RELATION)
            .and_then(|r| r.field(key))
            .unwrap_or("")
    }

    /// Whether the broker advertises TLS.
    #[must_use]
    pub fn kafka_tls(&self) -> bool {
        self.kafka_field("tls") == "enabled"
    }

    /// Whether the kafka relation carries everything needed to connect.
    #[must_use]
    pub fn kafka_ready(&self) -> bool {
        ["topic", "username", "password", "endpoints"]
            .iter()
            .all(|key| !self.kafka_field(key).is_empty())
    }

    /// SANs for the unit certificate.
    #[must_use]
    pub fn sans(&self) -> Vec<String> {
        vec![self.unit_name.clone()]
    }

    /// Compute the pre-start status from current relation and secret state.
    ///
    /// Mirrors the order a failing deployment resolves its blockers in:
    /// peer relation, broker relation, broker data, TLS agreement,
    /// certificate, internal credentials.
    #[must_use]
    pub fn ready_to_start(&self) -> OperatorStatus {
        if !self.has_peer_relation() {
            return OperatorStatus::NoPeerRelation;
        }

        if matches!(
            self.relations.status(KAFKA_RELATION),
            RelationStatus::Absent | RelationStatus::Broken
        ) {
            return OperatorStatus::KafkaNotRelated;
        }

        if !self.kafka_ready() {
            return OperatorStatus::KafkaNoData;
        }

        // TLS must be enabled on both sides or on neither
        if self.tls_enabled() != self.kafka_tls() {
            return OperatorStatus::KafkaTlsMismatch;
        }

        if self.tls_enabled() && !self.secrets.tls().is_some_and(|m| m.is_signed()) {
            return OperatorStatus::AwaitingCertificate;
        }

        if self.secrets.desired(ADMIN_USER).is_none() {
            return OperatorStatus::NoCreds;
        }

        OperatorStatus::Active
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn kafka_fields(tls: &str) -> BTreeMap<String, String> {
        [
            ("topic", "_schemas"),
            ("username", "relation-5"),
            ("password", "pw"),
            ("endpoints", "k1:9092"),
            ("tls", tls),
        ]
        .iter()
        .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
        .collect()
    }

    #[test]
    fn test_leader_token_requires_leadership() {
        let mut ctx = ClusterContext::new("karapace/0", "10.0.0.5");
        assert!(matches!(
            ctx.leader_token(),
            Err(LifecycleError::LeadershipRequired)
        ));

        ctx.set_leader(true);
        assert!(ctx.leader_token().is_ok());
    }

    #[test]
    fn test_ready_to_start_progression() {
        let mut ctx = ClusterContext::new("karapace/0", "10.0.0.5");
        ctx.set_leader(true);
        assert_eq!(ctx.ready_to_start(), OperatorStatus::NoPeerRelation);

        ctx.relations
            .update(PEER_RELATION, "karapace/0", BTreeMap::new())
            .unwrap();
        assert_eq!(ctx.ready_to_start(), OperatorStatus::KafkaNotRelated);

        ctx.relations
            .update(KAFKA_RELATION, "kafka/0", BTreeMap::new())
            .unwrap();
        assert_eq!(ctx.ready_to_start(), OperatorStatus::KafkaNoData);

        ctx.relations
            .update(KAFKA_RELATION, "kafka/0", kafka_fields("disabled"))
            .unwrap();
        assert_eq!(ctx.ready_to_start(), OperatorStatus::NoCreds);

        let token = ctx.leader_token().unwrap();
        ctx.secrets.ensure(&token, ADMIN_USER, "karapace/0");
        assert_eq!(ctx.ready_to_start(), OperatorStatus::Active);
    }

    #[test]
    fn test_tls_mismatch_is_detected() {
        let mut ctx = ClusterContext::new("karapace/0", "10.0.0.5");
        ctx.set_leader(true);
        ctx.relations
            .update(PEER_RELATION, "karapace/0", BTreeMap::new())
            .unwrap();
        ctx.relations
            .update(KAFKA_RELATION, "kafka/0", kafka_fields("enabled"))
            .unwrap();

        // Broker runs TLS, registry does not
        assert_eq!(ctx.ready_to_start(), OperatorStatus::KafkaTlsMismatch);
    }

    #[test]
    fn test_tls_waits_for_signed_certificate() {
        let mut ctx = ClusterContext::new("karapace/0", "10.0.0.5");
        ctx.set_leader(true);
        ctx.relations
            .update(PEER_RELATION, "karapace/0", BTreeMap::new())
            .unwrap();
        ctx.relations
            .update(KAFKA_RELATION, "kafka/0", kafka_fields("enabled"))
            .unwrap();
        ctx.relations
            .update(TLS_RELATION, "ca/0", BTreeMap::new())
            .unwrap();

        let token = ctx.leader_token().unwrap();
        ctx.secrets
            .issue_tls_key(&token, "certificates:1", None, "karapace/0", &[])
            .unwrap();
        assert_eq!(ctx.ready_to_start(), OperatorStatus::AwaitingCertificate);

        let csr = ctx
            .secrets
            .tls()
            .unwrap()
            .certificate_signing_request
            .clone();
        ctx.secrets.certificate_signed(&csr, "CERT", "CA").unwrap();
        ctx.secrets.ensure(&token, ADMIN_USER, "karapace/0");
        assert_eq!(ctx.ready_to_start(), OperatorStatus::Active);
    }
}
