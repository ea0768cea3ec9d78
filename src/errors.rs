//! # Errors
//!
//! Failure taxonomy for the lifecycle controller.
//!
//! Transient failures are retried with bounded backoff and never surface as
//! relation breakage. Everything else is terminal for the current
//! reconciliation pass: it is logged, reflected in the externally visible
//! status, and the driving relation is marked broken where applicable.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum LifecycleError {
    /// A relation with a declared `limit` received one peer too many.
    /// The existing relation is left untouched.
    #[error("relation '{relation}' exceeds cardinality limit {limit}")]
    CardinalityViolation { relation: String, limit: usize },

    /// Caller-supplied key material failed PEM structural validation.
    #[error("invalid key material: {0}")]
    InvalidKeyMaterial(String),

    /// Required relation fields are missing or malformed.
    #[error("validation failed: {0}")]
    ValidationFailure(String),

    /// The managed service rejected an operation in a retryable way
    /// (rolling restart in progress, timeout, ...).
    #[error("transient backend failure: {0}")]
    TransientBackendFailure(String),

    /// A secret mutation was attempted without holding leadership.
    #[error("secret mutation requires leadership")]
    LeadershipRequired,
}

impl LifecycleError {
    /// Whether the failure is subject to the retry policy.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, LifecycleError::TransientBackendFailure(_))
    }
}
