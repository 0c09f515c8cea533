//! `engine` crate — graph model, graph compiler, scheduler state machine,
//! step executor with retries, and the persistence-adapter interface.

pub mod compiler;
pub mod control;
pub mod error;
pub mod models;
pub mod scheduler;
pub mod service;
pub mod step;
pub mod store;

pub use compiler::{compile, decompile, validate, ExecutionPlan, ValidationError, ValidationReport};
pub use error::{ControlError, EngineError};
pub use models::{
    ExecutionStatus, NodeDefinition, NodeKind, StepLog, StepStatus, TriggerType, WebhookBinding,
    WorkflowDefinition, WorkflowExecution,
};
pub use service::WorkflowEngine;
pub use store::{ExecutionStore, MemoryStore, StoreError};

#[cfg(test)]
mod scheduler_tests;
