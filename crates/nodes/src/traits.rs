//! The `NodeExecutor` trait — the contract every node kind must fulfil.

use async_trait::async_trait;
use serde_json::Value;

use crate::NodeError;

/// Output key a condition/switch executor sets to the branch tag it selected.
/// The engine routes on this value; everything else in the output is opaque.
pub const SELECTED_BRANCH_KEY: &str = "branch";

/// Shared context passed to every node during execution.
///
/// Defined here (in the nodes crate) so both the engine and individual node
/// implementations can import it without a circular dependency.
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    /// ID of the parent workflow.
    pub workflow_id: uuid::Uuid,
    /// ID of the current execution run.
    pub execution_id: uuid::Uuid,
    /// ID of the node being executed.
    pub node_id: String,
    /// Payload the execution was triggered with.
    pub trigger: Value,
}

/// The core node trait.
///
/// `parameters` is the node's opaque configuration bag from the workflow
/// definition; `input` is the upstream output (or the trigger payload for
/// trigger nodes).
#[async_trait]
pub trait NodeExecutor: Send + Sync {
    async fn execute(
        &self,
        parameters: &Value,
        input: Value,
        ctx: &ExecutionContext,
    ) -> Result<Value, NodeError>;
}
