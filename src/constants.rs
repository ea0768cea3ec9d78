//! # Constants
//!
//! Shared constants used throughout the operator.
//!
//! These values represent reasonable defaults and can be overridden via
//! configuration or environment variables where applicable.

/// Relation name for the peer relation exchanging unit/cluster state
pub const PEER_RELATION: &str = "cluster";

/// Relation name for the rolling-restart coordination peer relation
pub const RESTART_RELATION: &str = "restart";

/// Relation name for the Kafka broker dependency
pub const KAFKA_RELATION: &str = "kafka";

/// Relation name for the TLS certificates provider
pub const TLS_RELATION: &str = "certificates";

/// Relation name for requirer applications consuming the registry
pub const CLIENT_RELATION: &str = "karapace";

/// Relation name for the observability collector scrape endpoint
pub const COS_RELATION: &str = "cos-agent";

/// Internal admin principal
pub const ADMIN_USER: &str = "operator";

/// All internal principals managed by the operator
pub const INTERNAL_USERS: &[&str] = &[ADMIN_USER];

/// Kafka topic backing the schema registry
pub const KAFKA_TOPIC: &str = "_schemas";

/// Kafka consumer group used by the registry
pub const KAFKA_CONSUMER_GROUP: &str = "schema-registry";

/// Port the registry service listens on
pub const SERVICE_PORT: u16 = 8081;

/// Default HTTP server port for metrics and health probes
pub const DEFAULT_METRICS_PORT: u16 = 5000;

/// Default exponential backoff starting value (milliseconds)
pub const DEFAULT_BACKOFF_BASE_MS: u64 = 1000;

/// Default exponential backoff maximum value (milliseconds)
pub const DEFAULT_BACKOFF_MAX_MS: u64 = 30_000;

/// Default number of retry attempts for transient backend failures
pub const DEFAULT_RETRY_ATTEMPTS: u32 = 3;

/// Default time bound on a single workload operation (seconds)
pub const DEFAULT_WORKLOAD_TIMEOUT_SECS: u64 = 30;

/// Default expiry for a held rolling-restart lock (seconds)
pub const DEFAULT_RESTART_LOCK_TIMEOUT_SECS: u64 = 300;

/// Default interval between periodic status reconciliations (seconds)
pub const DEFAULT_UPDATE_STATUS_INTERVAL_SECS: u64 = 60;

/// Generated credential length (characters)
pub const GENERATED_PASSWORD_LEN: usize = 32;
