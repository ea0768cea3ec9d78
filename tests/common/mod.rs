//! Common test utilities for lifecycle integration tests
//!
//! Builds reconcilers backed by the in-memory workload with a shrunk retry
//! policy so backoff sleeps do not slow the suite down.

use std::collections::BTreeMap;
use std::time::Duration;

use karapace_operator::cluster::ClusterContext;
use karapace_operator::config::RetryPolicy;
use karapace_operator::constants::{KAFKA_RELATION, PEER_RELATION};
use karapace_operator::reconciler::{Event, Reconciler};
use karapace_operator::workload::{InMemoryWorkload, RegistryPaths};

pub const CONF_DIR: &str = "/etc/karapace";
pub const UNIT: &str = "karapace/0";

/// Retry policy with millisecond backoff for fast tests.
pub fn fast_policy() -> RetryPolicy {
    RetryPolicy {
        backoff_base_ms: 1,
        backoff_max_ms: 4,
        attempts: 3,
        workload_timeout: Duration::from_secs(5),
    }
}

/// A leader reconciler with no relations established yet.
pub fn leader_reconciler() -> Reconciler<InMemoryWorkload> {
    let mut ctx = ClusterContext::new(UNIT, "10.0.0.5");
    ctx.set_leader(true);
    Reconciler::new(
        ctx,
        InMemoryWorkload::default(),
        RegistryPaths::new(CONF_DIR),
        fast_policy(),
    )
}

pub fn fields(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
        .collect()
}

pub fn config_changed() -> Event {
    Event::ConfigChanged {
        unit_count: None,
        constraints: BTreeMap::new(),
    }
}

pub fn peer_joined() -> Event {
    Event::RelationChanged {
        relation: PEER_RELATION.to_string(),
        peer: UNIT.to_string(),
        fields: BTreeMap::new(),
    }
}

pub fn kafka_joined() -> Event {
    Event::RelationChanged {
        relation: KAFKA_RELATION.to_string(),
        peer: "kafka/0".to_string(),
        fields: fields(&[
            ("topic", "_schemas"),
            ("username", "relation-5"),
            ("password", "broker-pw"),
            ("endpoints", "kafka-0:9092,kafka-1:9092"),
        ]),
    }
}

/// Drive a fresh reconciler to an active, applied state.
pub async fn active_reconciler() -> Reconciler<InMemoryWorkload> {
    let mut r = leader_reconciler();
    r.handle(peer_joined()).await.expect("peer join");
    r.handle(kafka_joined()).await.expect("kafka join");
    let result = r.handle(config_changed()).await.expect("initial pass");
    assert!(result.status.is_active(), "fixture should converge");
    r
}
