//! Karapace Operator Library
//!
//! This library provides the core functionality for the Karapace schema
//! registry operator: relation lifecycle tracking, credential and TLS
//! secret management, and the reconciliation loop that keeps the managed
//! service converged with the declared state.
//! Tests are included in the module files (e.g., reconciler.rs).

pub mod auth;
pub mod backoff;
pub mod cluster;
pub mod config;
pub mod constants;
pub mod errors;
pub mod metrics;
pub mod reconciler;
pub mod relations;
pub mod restart;
pub mod secrets;
pub mod server;
pub mod tls;
pub mod workload;

pub use cluster::{ClusterContext, OperatorStatus};
pub use errors::LifecycleError;
pub use reconciler::{Event, ReconciliationResult, Reconciler};
