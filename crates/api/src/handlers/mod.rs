//! Request handlers, grouped per resource.

pub mod executions;
pub mod webhooks;
pub mod workflows;

use std::sync::Arc;

use engine::WorkflowEngine;

/// Shared application state injected into every handler.
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<WorkflowEngine>,
}
