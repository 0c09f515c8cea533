//! Engine-level error types.

use thiserror::Error;

use crate::compiler::ValidationError;
use crate::store::StoreError;

/// Errors produced by the workflow engine (validation, execution, control).
#[derive(Debug, Error)]
pub enum EngineError {
    // ------ Validation errors ------

    /// The graph failed compilation; the execution was never created.
    #[error("workflow failed validation: {}", format_validation(.0))]
    Validation(Vec<ValidationError>),

    // ------ Execution errors ------

    /// A node's executor failed after exhausting its retry policy.
    #[error("node '{node_id}' failed: {message}")]
    Step { node_id: String, message: String },

    /// A non-manual trigger fired for a workflow that isn't active.
    #[error("workflow '{0}' is not active")]
    Inactive(uuid::Uuid),

    // ------ Control errors ------

    /// A control command was issued against an execution in the wrong state.
    #[error(transparent)]
    Control(#[from] ControlError),

    // ------ Persistence errors ------

    /// The store rejected an operation; the execution is left at its last
    /// durably-committed state and the operation is safe to retry.
    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

fn format_validation(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

/// Rejected control commands. These have no side effects: the execution's
/// state is exactly what it was before the call.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ControlError {
    /// The command is not valid from the execution's current status.
    #[error("cannot {command} execution in status '{status}'")]
    InvalidTransition {
        command: &'static str,
        status: String,
    },

    /// Another traversal already owns this execution id.
    #[error("execution '{0}' already has a live traversal")]
    Conflict(uuid::Uuid),

    /// The execution id is unknown.
    #[error("execution '{0}' not found")]
    UnknownExecution(uuid::Uuid),
}
