//! # Configuration
//!
//! The broker-facing cluster configuration, the retry policy for transient
//! backend failures, and the rendering of the registry's service config
//! file.
//!
//! `ClusterConfig` is owned exclusively by the reconciliation loop and is
//! mutated only from relation data changes on the kafka dependency and
//! from config-changed events.

use std::collections::BTreeMap;
use std::time::Duration;

use serde_json::{json, Value};

use crate::constants::{
    DEFAULT_BACKOFF_BASE_MS, DEFAULT_BACKOFF_MAX_MS, DEFAULT_RETRY_ATTEMPTS,
    DEFAULT_WORKLOAD_TIMEOUT_SECS, KAFKA_CONSUMER_GROUP, KAFKA_TOPIC, SERVICE_PORT,
};
use crate::workload::RegistryPaths;

/// Broker-facing configuration for the deployment.
///
/// `broker_endpoints` follows the kafka relation data and is the single
/// source the rendered `bootstrap_uri` is derived from; `desired_unit_count`
/// and `constraints` follow config-changed events and feed the peer relation
/// data and the rendered config overrides respectively.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClusterConfig {
    /// Bootstrap endpoints of the broker cluster, in relation-data order
    pub broker_endpoints: Vec<String>,
    /// Number of registry units the deployment wants running
    pub desired_unit_count: u32,
    /// Operator-supplied service config overrides
    pub constraints: BTreeMap<String, String>,
}

/// Retry policy for transient backend failures.
///
/// The exact backoff parameters are configurable policy, not fixed
/// constants; tests shrink them to keep passes fast.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub backoff_base_ms: u64,
    pub backoff_max_ms: u64,
    pub attempts: u32,
    /// Time bound on a single workload operation
    pub workload_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            backoff_base_ms: DEFAULT_BACKOFF_BASE_MS,
            backoff_max_ms: DEFAULT_BACKOFF_MAX_MS,
            attempts: DEFAULT_RETRY_ATTEMPTS,
            workload_timeout: Duration::from_secs(DEFAULT_WORKLOAD_TIMEOUT_SECS),
        }
    }
}

/// Inputs for rendering the registry service configuration.
#[derive(Debug)]
pub struct ServiceConfigContext<'a> {
    pub advertised_hostname: &'a str,
    pub bootstrap_servers: &'a str,
    pub sasl_username: &'a str,
    pub sasl_password: &'a str,
    pub tls_enabled: bool,
    pub paths: &'a RegistryPaths,
}

/// Render the desired registry config map.
///
/// Returns a `BTreeMap` so the rendering is deterministic, which the
/// reconciler relies on when diffing against the last-applied state.
#[must_use]
pub fn render_service_config(ctx: &ServiceConfigContext<'_>) -> BTreeMap<String, Value> {
    let tls_path = |p: String| {
        if ctx.tls_enabled {
            json!(p)
        } else {
            Value::Null
        }
    };

    let mut config = BTreeMap::new();
    config.insert("advertised_hostname".into(), json!(ctx.advertised_hostname));
    config.insert("access_logs_debug".into(), json!(false));
    config.insert("rest_authorization".into(), json!(false));
    config.insert("client_id".into(), json!("sr-1"));
    config.insert("compatibility".into(), json!("FULL"));
    config.insert("group_id".into(), json!(KAFKA_CONSUMER_GROUP));
    config.insert("host".into(), json!("127.0.0.1"));
    config.insert("log_level".into(), json!("INFO"));
    config.insert("port".into(), json!(SERVICE_PORT));
    config.insert("master_eligibility".into(), json!(true));
    config.insert("replication_factor".into(), json!(1));
    config.insert("karapace_rest".into(), json!(false));
    config.insert("karapace_registry".into(), json!(true));
    config.insert("topic_name".into(), json!(KAFKA_TOPIC));
    config.insert("protobuf_runtime_directory".into(), json!("runtime"));
    config.insert("session_timeout_ms".into(), json!(10_000));
    config.insert(
        "security_protocol".into(),
        json!(if ctx.tls_enabled { "SASL_SSL" } else { "SASL_PLAINTEXT" }),
    );
    config.insert("ssl_cafile".into(), tls_path(ctx.paths.ssl_cafile()));
    config.insert("ssl_certfile".into(), tls_path(ctx.paths.ssl_certfile()));
    config.insert("ssl_keyfile".into(), tls_path(ctx.paths.ssl_keyfile()));
    config.insert("bootstrap_uri".into(), json!(ctx.bootstrap_servers));
    config.insert("sasl_bootstrap_uri".into(), json!(ctx.bootstrap_servers));
    config.insert("sasl_mechanism".into(), json!("SCRAM-SHA-512"));
    config.insert("sasl_plain_username".into(), json!(ctx.sasl_username));
    config.insert("sasl_plain_password".into(), json!(ctx.sasl_password));
    config.insert(
        "registry_authfile".into(),
        json!(ctx.paths.registry_authfile()),
    );
    // Options below run the server itself in HTTPS mode, not covered yet
    config.insert("server_tls_certfile".into(), Value::Null);
    config.insert("server_tls_keyfile".into(), Value::Null);
    config.insert("registry_ca".into(), Value::Null);
    config
}

/// Overlay operator-supplied overrides onto a rendered config.
///
/// Values parse as JSON where possible so numeric and boolean overrides
/// keep their type; anything else is inserted as a string.
pub fn apply_config_overrides(
    config: &mut BTreeMap<String, Value>,
    overrides: &BTreeMap<String, String>,
) {
    for (key, value) in overrides {
        let parsed = serde_json::from_str(value).unwrap_or_else(|_| json!(value));
        config.insert(key.clone(), parsed);
    }
}
