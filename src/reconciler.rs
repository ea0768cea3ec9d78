//! # Reconciler
//!
//! Core reconciliation logic for the registry deployment.
//!
//! Every external event funnels through [`Reconciler::handle`], which runs a
//! full pass over a single mutable [`ClusterContext`]. Passes are serialized
//! by construction (the reconciler is `&mut self` throughout), so two passes
//! never interleave.
//!
//! ## Reconciliation Flow
//!
//! 1. Fold the event into tracked state (relation data, leadership, TLS)
//! 2. Stage any missing internal credentials (leader only)
//! 3. Compute the desired workload state: service config, authfile, TLS files
//! 4. Diff against the last successfully applied state
//! 5. Apply the delta under the rolling-restart lock, retrying transient
//!    backend failures with bounded exponential backoff
//! 6. On success commit staged secrets and mark relations active; on
//!    exhausted retries roll staged secrets back and mark the broker
//!    relation broken so consumers never observe active-with-stale-config

use std::collections::{BTreeMap, BTreeSet};
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::auth::Role;
use crate::backoff::ExponentialBackoff;
use crate::cluster::{AppliedState, ClusterContext, OperatorStatus};
use crate::config::{
    apply_config_overrides, render_service_config, RetryPolicy, ServiceConfigContext,
};
use crate::constants::{
    ADMIN_USER, CLIENT_RELATION, COS_RELATION, INTERNAL_USERS, KAFKA_RELATION, PEER_RELATION,
    RESTART_RELATION, SERVICE_PORT, TLS_RELATION,
};
use crate::errors::LifecycleError;
use crate::metrics;
use crate::relations::RelationStatus;
use crate::tls;
use crate::workload::{RegistryPaths, Workload};

/// External event driving a reconciliation pass.
///
/// Events deserialize from the JSON-lines stream the operator consumes in
/// production, e.g. `{"event": "relation_changed", "relation": "kafka", ...}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum Event {
    /// Deployment configuration changed; carries the full deployment
    /// config and triggers a recompute of everything.
    ConfigChanged {
        #[serde(default)]
        unit_count: Option<u32>,
        #[serde(default)]
        constraints: BTreeMap<String, String>,
    },
    /// Leadership settled on this unit (or moved away from it).
    LeaderElected { is_leader: bool },
    /// Periodic re-check with no state change of its own.
    UpdateStatus,
    /// Relation data observed for a peer.
    RelationChanged {
        relation: String,
        peer: String,
        #[serde(default)]
        fields: BTreeMap<String, String>,
    },
    /// A peer departed a relation.
    RelationBroken { relation: String, peer: String },
    /// The certificates provider returned a signed certificate.
    CertificateAvailable {
        csr: String,
        certificate: String,
        ca: String,
    },
    /// The unit certificate is about to expire.
    CertificateExpiring,
    /// Operator action: set (or regenerate) an internal password.
    SetPassword {
        principal: String,
        #[serde(default)]
        password: Option<String>,
    },
    /// Operator action: read back an internal password.
    GetPassword { principal: String },
    /// Operator action: swap the unit TLS private key.
    SetTlsPrivateKey {
        #[serde(default)]
        key: Option<String>,
    },
}

/// Outcome of one reconciliation pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconciliationResult {
    pub status: OperatorStatus,
    /// Data published back to the caller: action results, relation data,
    /// freshly generated CSRs.
    pub outputs: BTreeMap<String, String>,
    /// Whether this pass changed the workload.
    pub applied: bool,
}

impl ReconciliationResult {
    fn idle(status: OperatorStatus) -> Self {
        Self {
            status,
            outputs: BTreeMap::new(),
            applied: false,
        }
    }
}

fn transient(message: impl Into<String>) -> LifecycleError {
    LifecycleError::TransientBackendFailure(message.into())
}

/// Single-threaded reconciler owning the cluster context and the workload.
pub struct Reconciler<W: Workload> {
    pub ctx: ClusterContext,
    pub workload: W,
    paths: RegistryPaths,
    policy: RetryPolicy,
}

impl<W: Workload> Reconciler<W> {
    #[must_use]
    pub fn new(ctx: ClusterContext, workload: W, paths: RegistryPaths, policy: RetryPolicy) -> Self {
        Self {
            ctx,
            workload,
            paths,
            policy,
        }
    }

    /// Handle one event: fold it into tracked state, then run a full pass.
    ///
    /// This is the only entry point; callers never mutate the context
    /// directly.
    pub async fn handle(&mut self, event: Event) -> Result<ReconciliationResult, LifecycleError> {
        metrics::increment_reconciliations();
        let started = Instant::now();

        let result = self.dispatch(event).await;

        metrics::observe_reconciliation_duration(started.elapsed().as_secs_f64());
        if result.is_err() {
            metrics::increment_reconciliation_errors();
        }
        self.update_relation_gauge();
        result
    }

    async fn dispatch(&mut self, event: Event) -> Result<ReconciliationResult, LifecycleError> {
        let mut extra_outputs: BTreeMap<String, String> = BTreeMap::new();

        match event {
            Event::ConfigChanged {
                unit_count,
                constraints,
            } => {
                if let Some(count) = unit_count {
                    self.ctx.cluster_config.desired_unit_count = count;
                }
                self.ctx.cluster_config.constraints = constraints;
            }

            Event::UpdateStatus => {}

            Event::LeaderElected { is_leader } => {
                info!(is_leader, "leadership settled");
                self.ctx.set_leader(is_leader);
            }

            Event::RelationChanged {
                relation,
                peer,
                fields,
            } => {
                self.ctx.relations.update(&relation, &peer, fields)?;

                if relation == KAFKA_RELATION {
                    self.ctx.cluster_config.broker_endpoints = self
                        .ctx
                        .kafka_field("endpoints")
                        .split(',')
                        .filter(|e| !e.is_empty())
                        .map(str::to_string)
                        .collect();
                }

                // Joining the certificates relation triggers key issuance
                if relation == TLS_RELATION
                    && self.ctx.is_leader()
                    && self.ctx.secrets.tls().is_none()
                {
                    let token = self.ctx.leader_token()?;
                    let subject = self.ctx.unit_name.clone();
                    let sans = self.ctx.sans();
                    let material =
                        self.ctx
                            .secrets
                            .issue_tls_key(&token, TLS_RELATION, None, &subject, &sans)?;
                    extra_outputs.insert(
                        "csr".to_string(),
                        material.certificate_signing_request.clone(),
                    );
                    self.ctx.last_applied = None;
                }
            }

            Event::RelationBroken { relation, peer } => {
                self.relation_broken(&relation, &peer).await?;
            }

            Event::CertificateAvailable {
                csr,
                certificate,
                ca,
            } => {
                self.ctx.secrets.certificate_signed(&csr, &certificate, &ca)?;
                self.ctx.last_applied = None;
            }

            Event::CertificateExpiring => {
                let token = self.ctx.leader_token()?;
                let subject = self.ctx.unit_name.clone();
                let sans = self.ctx.sans();
                let material = self.ctx.secrets.renew_csr(&token, &subject, &sans)?;
                warn!("unit certificate expiring, requesting renewal");
                extra_outputs.insert(
                    "csr".to_string(),
                    material.certificate_signing_request.clone(),
                );
            }

            Event::SetPassword {
                principal,
                password,
            } => {
                self.set_password(&principal, password)?;
            }

            Event::GetPassword { principal } => {
                // Read-only: no pass, no mutation
                let cred = self.ctx.secrets.get(&principal).ok_or_else(|| {
                    LifecycleError::ValidationFailure(format!(
                        "no credential exists for '{principal}'"
                    ))
                })?;
                let mut outputs = BTreeMap::new();
                outputs.insert("username".to_string(), principal);
                outputs.insert("password".to_string(), cred.value().to_string());
                return Ok(ReconciliationResult {
                    status: self.ctx.status,
                    outputs,
                    applied: false,
                });
            }

            Event::SetTlsPrivateKey { key } => {
                self.set_tls_private_key(key, &mut extra_outputs)?;
            }
        }

        let mut result = self.reconcile().await?;
        result.outputs.extend(extra_outputs);
        Ok(result)
    }

    /// Fold a peer departure into state and clean up after the relation.
    async fn relation_broken(
        &mut self,
        relation: &str,
        peer: &str,
    ) -> Result<(), LifecycleError> {
        self.ctx.relations.remove(relation, peer);

        if relation == CLIENT_RELATION {
            self.ctx.auth.remove_user(&client_username(peer));
        }

        if self.ctx.relations.status(relation) != RelationStatus::Broken {
            return Ok(());
        }

        match relation {
            KAFKA_RELATION => {
                // Fail closed: without a broker the registry must not serve
                info!("kafka relation broken, stopping service");
                if let Err(e) = self.workload.stop().await {
                    warn!(error = %e, "failed to stop service on broker departure");
                }
                self.ctx.cluster_config.broker_endpoints.clear();
                self.ctx.last_applied = None;
                self.ctx.relations.clear(KAFKA_RELATION);
            }
            TLS_RELATION => {
                info!("certificates relation broken, reverting to plaintext");
                self.ctx.secrets.teardown_tls();
                self.ctx.last_applied = None;
                self.ctx.relations.clear(TLS_RELATION);
            }
            _ => {
                self.ctx.relations.clear(relation);
            }
        }
        Ok(())
    }

    /// Stage a rotation of an internal credential.
    fn set_password(
        &mut self,
        principal: &str,
        password: Option<String>,
    ) -> Result<(), LifecycleError> {
        let token = self.ctx.leader_token()?;
        if !INTERNAL_USERS.contains(&principal) {
            return Err(LifecycleError::ValidationFailure(format!(
                "'{principal}' is not an internal user"
            )));
        }
        if let (Some(new), Some(current)) = (&password, self.ctx.secrets.desired(principal)) {
            if current.value() == new {
                return Err(LifecycleError::ValidationFailure(
                    "the old and new passwords are equal".to_string(),
                ));
            }
        }

        let actor = self.ctx.unit_name.clone();
        self.ctx.secrets.rotate(&token, principal, password, &actor);
        self.ctx.last_applied = None;
        Ok(())
    }

    /// Swap (or regenerate) the unit TLS private key and re-request signing.
    fn set_tls_private_key(
        &mut self,
        key: Option<String>,
        outputs: &mut BTreeMap<String, String>,
    ) -> Result<(), LifecycleError> {
        let token = self.ctx.leader_token()?;
        if !self.ctx.tls_enabled() {
            return Err(LifecycleError::ValidationFailure(
                "no certificates relation established".to_string(),
            ));
        }

        let normalized = key.as_deref().map(tls::normalize_private_key).transpose()?;
        let subject = self.ctx.unit_name.clone();
        let sans = self.ctx.sans();
        let material = self.ctx.secrets.issue_tls_key(
            &token,
            TLS_RELATION,
            normalized.as_deref(),
            &subject,
            &sans,
        )?;
        outputs.insert(
            "csr".to_string(),
            material.certificate_signing_request.clone(),
        );
        self.ctx.last_applied = None;
        Ok(())
    }

    /// Run one full pass: recompute desired state, diff, apply, commit.
    pub async fn reconcile(&mut self) -> Result<ReconciliationResult, LifecycleError> {
        if self.ctx.is_leader() && self.ctx.has_peer_relation() {
            self.stage_credentials()?;
        }

        let status = self.ctx.ready_to_start();
        if !status.is_active() {
            // A previously active broker relation losing required fields
            // is a breakage, not a fresh join
            if status == OperatorStatus::KafkaNoData
                && self.ctx.relations.status(KAFKA_RELATION) == RelationStatus::Active
            {
                self.ctx
                    .relations
                    .set_status(KAFKA_RELATION, RelationStatus::Broken);
            }
            // Fail closed while the broker is unusable
            if matches!(
                status,
                OperatorStatus::KafkaNotRelated
                    | OperatorStatus::KafkaNoData
                    | OperatorStatus::KafkaTlsMismatch
            ) && self.workload.active().await
            {
                warn!(reason = status.message(), "stopping service");
                if let Err(e) = self.workload.stop().await {
                    warn!(error = %e, "failed to stop service");
                }
            }
            info!(status = status.message(), "unit not ready");
            self.ctx.status = status;
            return Ok(ReconciliationResult::idle(status));
        }

        let desired = self.desired_state()?;
        if self.ctx.last_applied.as_ref() == Some(&desired) && self.workload.active().await {
            // Converged: nothing staged can remain, relations stay active
            self.ctx.secrets.commit_all();
            self.mark_active();
            self.ctx.status = OperatorStatus::Active;
            return Ok(ReconciliationResult {
                status: OperatorStatus::Active,
                outputs: self.published_outputs(),
                applied: false,
            });
        }

        self.apply_with_retry(&desired).await?;

        let had_pending = self.ctx.secrets.has_pending();
        self.ctx.secrets.commit_all();
        if had_pending {
            metrics::increment_secret_rotations();
        }
        self.ctx.last_applied = Some(desired);
        self.mark_active();

        self.ctx.status = if self.workload.active().await {
            OperatorStatus::Active
        } else {
            OperatorStatus::ServiceNotRunning
        };
        info!(status = self.ctx.status.message(), "reconciliation pass applied");

        Ok(ReconciliationResult {
            status: self.ctx.status,
            outputs: self.published_outputs(),
            applied: true,
        })
    }

    /// Apply the desired state, retrying transient failures with bounded
    /// exponential backoff. Exhausting the retry budget rolls staged secrets
    /// back and breaks the broker relation.
    async fn apply_with_retry(&mut self, desired: &AppliedState) -> Result<(), LifecycleError> {
        let mut backoff =
            ExponentialBackoff::new(self.policy.backoff_base_ms, self.policy.backoff_max_ms);
        let mut last_err = None;

        for attempt in 1..=self.policy.attempts {
            match self.apply(desired).await {
                Ok(()) => return Ok(()),
                Err(e) if e.is_transient() => {
                    warn!(attempt, error = %e, "workload apply failed");
                    metrics::increment_retry_attempts();
                    last_err = Some(e);
                    if attempt < self.policy.attempts {
                        tokio::time::sleep(backoff.next_backoff()).await;
                    }
                }
                Err(e) => return Err(e),
            }
        }

        let err = last_err.unwrap_or_else(|| transient("workload apply failed"));
        error!(
            attempts = self.policy.attempts,
            error = %err,
            "retry budget exhausted, breaking broker relation"
        );

        // Never leave the service running against configuration that was
        // not fully applied
        self.ctx.secrets.rollback_all();
        if let Err(e) = self.workload.stop().await {
            warn!(error = %e, "failed to stop service after apply failure");
        }
        self.ctx
            .relations
            .set_status(KAFKA_RELATION, RelationStatus::Broken);
        self.ctx.last_applied = None;
        self.ctx.status = OperatorStatus::ServiceNotRunning;
        Err(err)
    }

    /// One apply attempt: write files and restart under the restart lock.
    /// The lock is released whether the attempt succeeds or fails.
    async fn apply(&mut self, desired: &AppliedState) -> Result<(), LifecycleError> {
        let unit = self.ctx.unit_name.clone();
        if !self.ctx.restart_lock.acquire(&unit) {
            return Err(transient(format!(
                "rolling restart in progress, lock held by {:?}",
                self.ctx.restart_lock.holder()
            )));
        }
        let result = self.apply_locked(desired).await;
        self.ctx.restart_lock.release(&unit);
        result
    }

    async fn apply_locked(&mut self, desired: &AppliedState) -> Result<(), LifecycleError> {
        let config_json = serde_json::to_string_pretty(&desired.service_config)
            .map_err(|e| LifecycleError::ValidationFailure(format!("config rendering: {e}")))?;

        let config_path = self.paths.karapace_config();
        let authfile_path = self.paths.registry_authfile();
        let certfile = self.paths.ssl_certfile();
        let keyfile = self.paths.ssl_keyfile();
        let cafile = self.paths.ssl_cafile();

        let tls_payload = if desired.tls_files {
            let material = self.ctx.secrets.tls().ok_or_else(|| {
                LifecycleError::ValidationFailure("TLS enabled without key material".to_string())
            })?;
            let certificate = material.signed_certificate.clone().ok_or_else(|| {
                LifecycleError::ValidationFailure("TLS enabled without a signed certificate".to_string())
            })?;
            let ca = material.ca_certificate.clone().ok_or_else(|| {
                LifecycleError::ValidationFailure("TLS enabled without a CA certificate".to_string())
            })?;
            Some((material.private_key.clone(), certificate, ca))
        } else {
            None
        };

        self.put_file(&config_path, &config_json).await?;
        self.put_file(&authfile_path, &desired.authfile).await?;
        match tls_payload {
            Some((key, certificate, ca)) => {
                self.put_file(&keyfile, &key).await?;
                self.put_file(&certfile, &certificate).await?;
                self.put_file(&cafile, &ca).await?;
            }
            None => {
                self.drop_file(&keyfile).await?;
                self.drop_file(&certfile).await?;
                self.drop_file(&cafile).await?;
            }
        }

        let restart = self.workload.active().await;
        let op = if restart {
            metrics::increment_workload_restarts();
            self.workload.restart()
        } else {
            self.workload.start()
        };
        tokio::time::timeout(self.policy.workload_timeout, op)
            .await
            .map_err(|_| transient("service restart timed out"))?
            .map_err(|e| transient(format!("{e:#}")))?;

        if !self.workload.active().await {
            return Err(transient("service did not come up after restart"));
        }
        Ok(())
    }

    async fn put_file(&mut self, path: &str, content: &str) -> Result<(), LifecycleError> {
        tokio::time::timeout(
            self.policy.workload_timeout,
            self.workload.write_file(path, content),
        )
        .await
        .map_err(|_| transient(format!("timed out writing {path}")))?
        .map_err(|e| transient(format!("{e:#}")))
    }

    async fn drop_file(&mut self, path: &str) -> Result<(), LifecycleError> {
        tokio::time::timeout(self.policy.workload_timeout, self.workload.remove_file(path))
            .await
            .map_err(|_| transient(format!("timed out removing {path}")))?
            .map_err(|e| transient(format!("{e:#}")))
    }

    /// Stage any missing credentials: the internal admin plus one per
    /// related client application. Leader only.
    fn stage_credentials(&mut self) -> Result<(), LifecycleError> {
        let token = self.ctx.leader_token()?;
        let actor = self.ctx.unit_name.clone();
        self.ctx.secrets.ensure(&token, ADMIN_USER, &actor);
        for (username, _) in self.client_users() {
            self.ctx.secrets.ensure(&token, &username, &actor);
        }
        Ok(())
    }

    /// Desired client users derived from the provides relation: one
    /// credential per related application, read-scoped to its subject.
    fn client_users(&self) -> Vec<(String, Option<String>)> {
        let Some(state) = self.ctx.relations.get(CLIENT_RELATION) else {
            return Vec::new();
        };
        if state.status == RelationStatus::Broken {
            return Vec::new();
        }
        let subject = state.field("subject").map(str::to_string);
        state
            .peer_units
            .iter()
            .map(|peer| (client_username(peer), subject.clone()))
            .collect()
    }

    /// Bring the auth store in line with the desired credential set.
    ///
    /// Users are only rewritten when their password actually changed, so
    /// the rendered authfile stays byte-stable across converged passes.
    fn sync_auth_store(&mut self) {
        let mut keep: BTreeSet<String> = BTreeSet::new();

        if let Some(cred) = self.ctx.secrets.desired(ADMIN_USER) {
            let value = cred.value().to_string();
            keep.insert(ADMIN_USER.to_string());
            if !self.ctx.auth.verify(ADMIN_USER, &value) {
                self.ctx.auth.add_user(ADMIN_USER, &value, true);
                self.ctx.auth.add_acl(ADMIN_USER, Role::Admin, None);
            }
        }

        for (username, subject) in self.client_users() {
            let Some(cred) = self.ctx.secrets.desired(&username) else {
                continue;
            };
            let value = cred.value().to_string();
            keep.insert(username.clone());
            if !self.ctx.auth.verify(&username, &value) {
                self.ctx.auth.add_user(&username, &value, true);
                self.ctx.auth.add_acl(&username, Role::User, subject.as_deref());
            }
        }

        for username in self.ctx.auth.usernames() {
            if username.starts_with("relation-") && !keep.contains(&username) {
                self.ctx.auth.remove_user(&username);
            }
        }
    }

    /// Render the full desired workload state for this pass.
    fn desired_state(&mut self) -> Result<AppliedState, LifecycleError> {
        self.sync_auth_store();
        let authfile = self
            .ctx
            .auth
            .render()
            .map_err(|e| LifecycleError::ValidationFailure(format!("authfile rendering: {e}")))?;

        let bootstrap_servers = self.ctx.cluster_config.broker_endpoints.join(",");
        let config_ctx = ServiceConfigContext {
            advertised_hostname: &self.ctx.unit_address,
            bootstrap_servers: &bootstrap_servers,
            sasl_username: self.ctx.kafka_field("username"),
            sasl_password: self.ctx.kafka_field("password"),
            tls_enabled: self.ctx.tls_enabled(),
            paths: &self.paths,
        };
        let mut service_config = render_service_config(&config_ctx);
        apply_config_overrides(&mut service_config, &self.ctx.cluster_config.constraints);

        Ok(AppliedState {
            service_config,
            authfile,
            tls_files: self.ctx.tls_enabled(),
        })
    }

    /// Mark every established relation active after a successful apply.
    fn mark_active(&mut self) {
        for relation in [
            PEER_RELATION,
            RESTART_RELATION,
            KAFKA_RELATION,
            TLS_RELATION,
            CLIENT_RELATION,
            COS_RELATION,
        ] {
            if self.ctx.relations.status(relation) == RelationStatus::Joining {
                self.ctx.relations.set_status(relation, RelationStatus::Active);
            }
        }
    }

    /// Relation data published to consumers after a successful pass:
    /// service endpoint plus, on the leader, client credentials.
    fn published_outputs(&self) -> BTreeMap<String, String> {
        let mut outputs = BTreeMap::new();
        outputs.insert(
            "endpoints".to_string(),
            format!("{}:{SERVICE_PORT}", self.ctx.unit_address),
        );
        outputs.insert("unit_address".to_string(), self.ctx.unit_address.clone());
        if self.ctx.cluster_config.desired_unit_count > 0 {
            outputs.insert(
                "planned_units".to_string(),
                self.ctx.cluster_config.desired_unit_count.to_string(),
            );
        }
        outputs.insert(
            "tls".to_string(),
            if self.ctx.tls_enabled() { "enabled" } else { "disabled" }.to_string(),
        );
        if let Some(cred) = self.ctx.secrets.get(ADMIN_USER) {
            outputs.insert(
                "internal_credential_version".to_string(),
                cred.version.to_string(),
            );
        }
        if self.ctx.is_leader() {
            for (username, _) in self.client_users() {
                if let Some(cred) = self.ctx.secrets.get(&username) {
                    outputs.insert(username, cred.value().to_string());
                }
            }
        }
        outputs
    }

    fn update_relation_gauge(&self) {
        let active = [
            PEER_RELATION,
            RESTART_RELATION,
            KAFKA_RELATION,
            TLS_RELATION,
            CLIENT_RELATION,
            COS_RELATION,
        ]
        .iter()
        .filter(|r| self.ctx.relations.status(r) == RelationStatus::Active)
        .count();
        #[allow(clippy::cast_possible_wrap, reason = "at most six relations")]
        metrics::set_relations_active(active as i64);
    }
}

/// Credential principal for a related client application.
fn client_username(peer: &str) -> String {
    format!("relation-{}", peer.replace('/', "-"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workload::InMemoryWorkload;
    use std::time::Duration;

    fn test_policy() -> RetryPolicy {
        RetryPolicy {
            backoff_base_ms: 1,
            backoff_max_ms: 4,
            attempts: 3,
            workload_timeout: Duration::from_secs(5),
        }
    }

    fn reconciler() -> Reconciler<InMemoryWorkload> {
        let mut ctx = ClusterContext::new("karapace/0", "10.0.0.5");
        ctx.set_leader(true);
        Reconciler::new(
            ctx,
            InMemoryWorkload::default(),
            RegistryPaths::new("/etc/karapace"),
            test_policy(),
        )
    }

    fn kafka_fields() -> BTreeMap<String, String> {
        [
            ("topic", "_schemas"),
            ("username", "relation-5"),
            ("password", "broker-pw"),
            ("endpoints", "k1:9092,k2:9092"),
        ]
        .iter()
        .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
        .collect()
    }

    async fn make_ready(r: &mut Reconciler<InMemoryWorkload>) {
        r.handle(Event::RelationChanged {
            relation: PEER_RELATION.to_string(),
            peer: "karapace/0".to_string(),
            fields: BTreeMap::new(),
        })
        .await
        .unwrap();
        r.handle(Event::RelationChanged {
            relation: KAFKA_RELATION.to_string(),
            peer: "kafka/0".to_string(),
            fields: kafka_fields(),
        })
        .await
        .unwrap();
    }

    fn config_changed() -> Event {
        Event::ConfigChanged {
            unit_count: None,
            constraints: BTreeMap::new(),
        }
    }

    #[tokio::test]
    async fn test_pass_applies_config_and_starts_service() {
        let mut r = reconciler();
        make_ready(&mut r).await;

        let result = r.handle(config_changed()).await.unwrap();
        assert_eq!(result.status, OperatorStatus::Active);
        assert!(r.workload.running);

        let config = &r.workload.files["/etc/karapace/karapace.config.json"];
        assert!(config.contains("\"bootstrap_uri\": \"k1:9092,k2:9092\""));
        assert!(config.contains("\"sasl_plain_username\": \"relation-5\""));

        let authfile = &r.workload.files["/etc/karapace/authfile.json"];
        assert!(authfile.contains("\"username\": \"operator\""));
    }

    #[tokio::test]
    async fn test_converged_pass_does_not_restart() {
        let mut r = reconciler();
        make_ready(&mut r).await;
        r.handle(config_changed()).await.unwrap();
        let restarts = r.workload.restarts;

        let result = r.handle(Event::UpdateStatus).await.unwrap();
        assert!(!result.applied);
        assert_eq!(r.workload.restarts, restarts);
    }

    #[tokio::test]
    async fn test_not_ready_without_kafka() {
        let mut r = reconciler();
        r.handle(Event::RelationChanged {
            relation: PEER_RELATION.to_string(),
            peer: "karapace/0".to_string(),
            fields: BTreeMap::new(),
        })
        .await
        .unwrap();

        let result = r.handle(config_changed()).await.unwrap();
        assert_eq!(result.status, OperatorStatus::KafkaNotRelated);
        assert!(!r.workload.running);
        assert!(r.workload.files.is_empty());
    }

    #[tokio::test]
    async fn test_desired_config_follows_cluster_config() {
        let mut r = reconciler();
        make_ready(&mut r).await;

        let constraints: BTreeMap<String, String> = [
            ("log_level".to_string(), "DEBUG".to_string()),
            ("session_timeout_ms".to_string(), "5000".to_string()),
        ]
        .into_iter()
        .collect();
        let result = r
            .handle(Event::ConfigChanged {
                unit_count: Some(3),
                constraints,
            })
            .await
            .unwrap();

        assert_eq!(
            r.ctx.cluster_config.broker_endpoints,
            vec!["k1:9092".to_string(), "k2:9092".to_string()]
        );
        let config = &r.workload.files["/etc/karapace/karapace.config.json"];
        assert!(config.contains("\"bootstrap_uri\": \"k1:9092,k2:9092\""));
        assert!(config.contains("\"log_level\": \"DEBUG\""));
        assert!(config.contains("\"session_timeout_ms\": 5000"));
        assert_eq!(result.outputs["planned_units"], "3");
    }

    #[tokio::test]
    async fn test_restart_lock_released_after_failed_apply() {
        let mut r = reconciler();
        make_ready(&mut r).await;

        r.workload.fail_next = 3;
        let err = r
            .handle(Event::SetPassword {
                principal: ADMIN_USER.to_string(),
                password: Some("hunter2".to_string()),
            })
            .await
            .unwrap_err();
        assert!(err.is_transient());
        assert!(r.ctx.restart_lock.holder().is_none());
    }

    #[tokio::test]
    async fn test_set_password_rejects_reuse() {
        let mut r = reconciler();
        make_ready(&mut r).await;
        r.handle(Event::SetPassword {
            principal: ADMIN_USER.to_string(),
            password: Some("hunter2".to_string()),
        })
        .await
        .unwrap();

        let err = r
            .handle(Event::SetPassword {
                principal: ADMIN_USER.to_string(),
                password: Some("hunter2".to_string()),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, LifecycleError::ValidationFailure(_)));
    }

    #[tokio::test]
    async fn test_set_password_requires_leadership() {
        let mut r = reconciler();
        r.ctx.set_leader(false);
        let err = r
            .handle(Event::SetPassword {
                principal: ADMIN_USER.to_string(),
                password: None,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, LifecycleError::LeadershipRequired));
    }

    #[tokio::test]
    async fn test_set_password_rejects_unknown_principal() {
        let mut r = reconciler();
        let err = r
            .handle(Event::SetPassword {
                principal: "root".to_string(),
                password: None,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, LifecycleError::ValidationFailure(_)));
    }

    #[test]
    fn test_event_deserializes_from_json_line() {
        let event: Event = serde_json::from_str(
            r#"{"event": "relation_changed", "relation": "kafka", "peer": "kafka/0", "fields": {"endpoints": "k:9092"}}"#,
        )
        .unwrap();
        assert!(matches!(
            event,
            Event::RelationChanged { relation, .. } if relation == "kafka"
        ));
    }
}
