//! # Metrics
//!
//! Prometheus metrics for monitoring the operator.
//!
//! ## Metrics Exposed
//!
//! - `karapace_operator_reconciliations_total` - Total number of reconciliation passes
//! - `karapace_operator_reconciliation_errors_total` - Total number of failed passes
//! - `karapace_operator_reconciliation_duration_seconds` - Duration of reconciliation passes
//! - `karapace_operator_secret_rotations_total` - Total number of committed secret rotations
//! - `karapace_operator_workload_restarts_total` - Total number of workload restarts issued
//! - `karapace_operator_retry_attempts_total` - Total number of retried workload operations
//! - `karapace_operator_relations_active` - Current number of active relations

use anyhow::Result;
use prometheus::{Histogram, IntCounter, IntGauge, Registry};
use std::sync::LazyLock;

pub(crate) static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

static RECONCILIATIONS_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "karapace_operator_reconciliations_total",
        "Total number of reconciliation passes",
    )
    .expect("Failed to create RECONCILIATIONS_TOTAL metric - this should never happen")
});

static RECONCILIATION_ERRORS_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "karapace_operator_reconciliation_errors_total",
        "Total number of failed reconciliation passes",
    )
    .expect("Failed to create RECONCILIATION_ERRORS_TOTAL metric - this should never happen")
});

static RECONCILIATION_DURATION: LazyLock<Histogram> = LazyLock::new(|| {
    Histogram::with_opts(
        prometheus::HistogramOpts::new(
            "karapace_operator_reconciliation_duration_seconds",
            "Duration of reconciliation passes in seconds",
        )
        .buckets(vec![0.1, 0.5, 1.0, 2.0, 5.0, 10.0, 30.0]),
    )
    .expect("Failed to create RECONCILIATION_DURATION metric - this should never happen")
});

static SECRET_ROTATIONS_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "karapace_operator_secret_rotations_total",
        "Total number of committed secret rotations",
    )
    .expect("Failed to create SECRET_ROTATIONS_TOTAL metric - this should never happen")
});

static WORKLOAD_RESTARTS_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "karapace_operator_workload_restarts_total",
        "Total number of workload restarts issued",
    )
    .expect("Failed to create WORKLOAD_RESTARTS_TOTAL metric - this should never happen")
});

static RETRY_ATTEMPTS_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "karapace_operator_retry_attempts_total",
        "Total number of retried workload operations",
    )
    .expect("Failed to create RETRY_ATTEMPTS_TOTAL metric - this should never happen")
});

static RELATIONS_ACTIVE: LazyLock<IntGauge> = LazyLock::new(|| {
    IntGauge::new(
        "karapace_operator_relations_active",
        "Current number of active relations",
    )
    .expect("Failed to create RELATIONS_ACTIVE metric - this should never happen")
});

#[allow(
    clippy::missing_errors_doc,
    reason = "Error documentation is provided in doc comments"
)]
pub fn register_metrics() -> Result<()> {
    REGISTRY.register(Box::new(RECONCILIATIONS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(RECONCILIATION_ERRORS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(RECONCILIATION_DURATION.clone()))?;
    REGISTRY.register(Box::new(SECRET_ROTATIONS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(WORKLOAD_RESTARTS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(RETRY_ATTEMPTS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(RELATIONS_ACTIVE.clone()))?;

    Ok(())
}

pub fn increment_reconciliations() {
    RECONCILIATIONS_TOTAL.inc();
}

pub fn increment_reconciliation_errors() {
    RECONCILIATION_ERRORS_TOTAL.inc();
}

pub fn observe_reconciliation_duration(duration: f64) {
    RECONCILIATION_DURATION.observe(duration);
}

pub fn increment_secret_rotations() {
    SECRET_ROTATIONS_TOTAL.inc();
}

pub fn increment_workload_restarts() {
    WORKLOAD_RESTARTS_TOTAL.inc();
}

pub fn increment_retry_attempts() {
    RETRY_ATTEMPTS_TOTAL.inc();
}

pub fn set_relations_active(count: i64) {
    RELATIONS_ACTIVE.set(count);
}
