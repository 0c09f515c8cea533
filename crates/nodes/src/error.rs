//! Node-level error type.

use thiserror::Error;

/// Errors returned by a node's `execute` method.
///
/// The engine uses the variant to decide retry behaviour:
/// - `Retryable` — re-invoked with the same input, per the node's policy.
/// - `Fatal`     — the step (and the execution) fails immediately.
#[derive(Debug, Error, Clone)]
pub enum NodeError {
    /// Transient failure; worth another attempt.
    #[error("retryable node error: {0}")]
    Retryable(String),

    /// Permanent failure; no retry should be attempted.
    #[error("fatal node error: {0}")]
    Fatal(String),
}
