//! # Relation State Tracker
//!
//! Records which peer/requires/provides relations are established, pending,
//! or broken, and enforces per-relation cardinality limits.
//!
//! Relations move through `absent -> joining -> active -> broken -> absent`.
//! The tracker stores observed databag fields; deciding when a relation is
//! `active` is the reconciler's job, driven by field validation.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::constants::{
    CLIENT_RELATION, COS_RELATION, KAFKA_RELATION, PEER_RELATION, RESTART_RELATION, TLS_RELATION,
};
use crate::errors::LifecycleError;

/// Kind of integration point, mirroring charm metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RelationKind {
    Peer,
    Requires,
    Provides,
}

/// Lifecycle status of a tracked relation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RelationStatus {
    Absent,
    Joining,
    Active,
    Broken,
}

/// Static declaration of a relation endpoint.
#[derive(Debug, Clone)]
pub struct RelationSpec {
    pub name: &'static str,
    pub interface: &'static str,
    pub kind: RelationKind,
    /// Maximum number of simultaneous peers, `None` for unlimited
    pub limit: Option<usize>,
    pub optional: bool,
}

/// Live state of one relation endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelationState {
    pub relation_name: String,
    pub interface: String,
    pub kind: RelationKind,
    pub status: RelationStatus,
    pub peer_units: BTreeSet<String>,
    /// Latest observed databag, merged latest-wins across events
    pub fields: BTreeMap<String, String>,
}

impl RelationState {
    fn new(spec: &RelationSpec) -> Self {
        Self {
            relation_name: spec.name.to_string(),
            interface: spec.interface.to_string(),
            kind: spec.kind,
            status: RelationStatus::Joining,
            peer_units: BTreeSet::new(),
            fields: BTreeMap::new(),
        }
    }

    /// Fetch a field, treating the empty string as absent.
    #[must_use]
    pub fn field(&self, key: &str) -> Option<&str> {
        self.fields.get(key).map(String::as_str).filter(|v| !v.is_empty())
    }
}

/// Tracker for all declared relation endpoints of the operator.
#[derive(Debug)]
pub struct RelationTracker {
    specs: BTreeMap<&'static str, RelationSpec>,
    relations: BTreeMap<String, RelationState>,
}

impl Default for RelationTracker {
    fn default() -> Self {
        Self::new(declared_relations())
    }
}

/// The relation endpoints this operator declares.
#[must_use]
pub fn declared_relations() -> Vec<RelationSpec> {
    vec![
        RelationSpec {
            name: PEER_RELATION,
            interface: "cluster",
            kind: RelationKind::Peer,
            limit: None,
            optional: false,
        },
        RelationSpec {
            name: RESTART_RELATION,
            interface: "rolling_op",
            kind: RelationKind::Peer,
            limit: None,
            optional: false,
        },
        RelationSpec {
            name: KAFKA_RELATION,
            interface: "kafka_client",
            kind: RelationKind::Requires,
            limit: Some(1),
            optional: false,
        },
        RelationSpec {
            name: TLS_RELATION,
            interface: "tls-certificates",
            kind: RelationKind::Requires,
            limit: Some(1),
            optional: true,
        },
        RelationSpec {
            name: CLIENT_RELATION,
            interface: "karapace_client",
            kind: RelationKind::Provides,
            limit: None,
            optional: true,
        },
        RelationSpec {
            name: COS_RELATION,
            interface: "cos_agent",
            kind: RelationKind::Provides,
            limit: None,
            optional: true,
        },
    ]
}

impl RelationTracker {
    #[must_use]
    pub fn new(specs: Vec<RelationSpec>) -> Self {
        Self {
            specs: specs.into_iter().map(|s| (s.name, s)).collect(),
            relations: BTreeMap::new(),
        }
    }

    /// Record observed relation data for a peer.
    ///
    /// First observation moves the relation `absent -> joining`. Fields with
    /// empty values are deleted from the stored databag, everything else is
    /// merged latest-wins. Exceeding the declared cardinality limit fails
    /// with [`LifecycleError::CardinalityViolation`] and leaves the existing
    /// relation untouched.
    pub fn update(
        &mut self,
        relation_name: &str,
        peer_id: &str,
        fields: BTreeMap<String, String>,
    ) -> Result<&RelationState, LifecycleError> {
        let spec = self.specs.get(relation_name).ok_or_else(|| {
            LifecycleError::ValidationFailure(format!("unknown relation '{relation_name}'"))
        })?;

        let state = self
            .relations
            .entry(relation_name.to_string())
            .or_insert_with(|| RelationState::new(spec));

        if let Some(limit) = spec.limit {
            if !state.peer_units.contains(peer_id) && state.peer_units.len() >= limit {
                warn!(
                    relation = relation_name,
                    peer = peer_id,
                    limit,
                    "rejecting relation peer over cardinality limit"
                );
                return Err(LifecycleError::CardinalityViolation {
                    relation: relation_name.to_string(),
                    limit,
                });
            }
        }

        state.peer_units.insert(peer_id.to_string());
        if state.status == RelationStatus::Broken || state.status == RelationStatus::Absent {
            state.status = RelationStatus::Joining;
        }

        for (key, value) in fields {
            if value.is_empty() {
                state.fields.remove(&key);
            } else {
                state.fields.insert(key, value);
            }
        }

        Ok(&self.relations[relation_name])
    }

    /// Record the departure of a peer. When the last peer leaves, the
    /// relation is marked `broken`; the reconciler clears it to `absent`
    /// once cleanup completes.
    pub fn remove(&mut self, relation_name: &str, peer_id: &str) {
        if let Some(state) = self.relations.get_mut(relation_name) {
            state.peer_units.remove(peer_id);
            if state.peer_units.is_empty() {
                state.status = RelationStatus::Broken;
                state.fields.clear();
            }
        }
    }

    /// Look up a tracked relation. `None` means `absent`.
    #[must_use]
    pub fn get(&self, relation_name: &str) -> Option<&RelationState> {
        self.relations.get(relation_name)
    }

    /// Mark a relation's lifecycle status.
    pub fn set_status(&mut self, relation_name: &str, status: RelationStatus) {
        if let Some(state) = self.relations.get_mut(relation_name) {
            state.status = status;
        }
    }

    /// Complete the `broken -> absent` transition after cleanup.
    pub fn clear(&mut self, relation_name: &str) {
        self.relations.remove(relation_name);
    }

    /// Current lifecycle status of a relation (`Absent` when untracked).
    #[must_use]
    pub fn status(&self, relation_name: &str) -> RelationStatus {
        self.relations
            .get(relation_name)
            .map_or(RelationStatus::Absent, |s| s.status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fields(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect()
    }

    #[test]
    fn test_first_observation_moves_to_joining() {
        let mut tracker = RelationTracker::default();
        assert_eq!(tracker.status(KAFKA_RELATION), RelationStatus::Absent);

        tracker
            .update(KAFKA_RELATION, "kafka/0", fields(&[("endpoints", "k:9092")]))
            .unwrap();
        assert_eq!(tracker.status(KAFKA_RELATION), RelationStatus::Joining);
    }

    #[test]
    fn test_cardinality_limit_rejects_second_peer() {
        let mut tracker = RelationTracker::default();
        tracker
            .update(KAFKA_RELATION, "kafka/0", fields(&[("endpoints", "a:9092")]))
            .unwrap();

        let err = tracker
            .update(KAFKA_RELATION, "other-kafka/0", BTreeMap::new())
            .unwrap_err();
        assert!(matches!(err, LifecycleError::CardinalityViolation { .. }));

        // Existing relation unaffected
        let state = tracker.get(KAFKA_RELATION).unwrap();
        assert_eq!(state.field("endpoints"), Some("a:9092"));
        assert!(state.peer_units.contains("kafka/0"));
        assert!(!state.peer_units.contains("other-kafka/0"));
    }

    #[test]
    fn test_same_peer_update_is_not_a_violation() {
        let mut tracker = RelationTracker::default();
        tracker
            .update(KAFKA_RELATION, "kafka/0", fields(&[("endpoints", "a:9092")]))
            .unwrap();
        tracker
            .update(KAFKA_RELATION, "kafka/0", fields(&[("endpoints", "b:9092")]))
            .unwrap();
        assert_eq!(
            tracker.get(KAFKA_RELATION).unwrap().field("endpoints"),
            Some("b:9092")
        );
    }

    #[test]
    fn test_empty_value_deletes_field() {
        let mut tracker = RelationTracker::default();
        tracker
            .update(KAFKA_RELATION, "kafka/0", fields(&[("password", "s3cr3t")]))
            .unwrap();
        tracker
            .update(KAFKA_RELATION, "kafka/0", fields(&[("password", "")]))
            .unwrap();
        assert_eq!(tracker.get(KAFKA_RELATION).unwrap().field("password"), None);
    }

    #[test]
    fn test_last_peer_departure_marks_broken() {
        let mut tracker = RelationTracker::default();
        tracker
            .update(KAFKA_RELATION, "kafka/0", fields(&[("endpoints", "a:9092")]))
            .unwrap();
        tracker.remove(KAFKA_RELATION, "kafka/0");
        assert_eq!(tracker.status(KAFKA_RELATION), RelationStatus::Broken);

        tracker.clear(KAFKA_RELATION);
        assert_eq!(tracker.status(KAFKA_RELATION), RelationStatus::Absent);
        assert!(tracker.get(KAFKA_RELATION).is_none());
    }

    #[test]
    fn test_unknown_relation_is_validation_failure() {
        let mut tracker = RelationTracker::default();
        let err = tracker
            .update("mystery", "app/0", BTreeMap::new())
            .unwrap_err();
        assert!(matches!(err, LifecycleError::ValidationFailure(_)));
    }

    #[test]
    fn test_unlimited_provides_accepts_many_peers() {
        let mut tracker = RelationTracker::default();
        for i in 0..5 {
            tracker
                .update(CLIENT_RELATION, &format!("app{i}"), BTreeMap::new())
                .unwrap();
        }
        assert_eq!(tracker.get(CLIENT_RELATION).unwrap().peer_units.len(), 5);
    }
}
