//! Row structs that map 1-to-1 onto database tables.
//!
//! These are *persistence* rows — the domain types live in the `engine`
//! crate and travel through the `record`/`definition` JSON columns.

use sqlx::FromRow;

/// A persisted workflow definition row.
#[derive(Debug, Clone, FromRow)]
pub struct WorkflowRow {
    pub id: String,
    pub name: String,
    /// Full JSON `WorkflowDefinition` snapshot.
    pub definition: String,
    pub created_at: String,
}

/// A persisted workflow execution row.
#[derive(Debug, Clone, FromRow)]
pub struct ExecutionRow {
    pub id: String,
    pub workflow_id: String,
    pub instance_id: Option<String>,
    pub status: String,
    /// Full JSON `WorkflowExecution` snapshot.
    pub record: String,
    pub started_at: String,
}

/// A persisted step log row (one per attempt).
#[derive(Debug, Clone, FromRow)]
pub struct StepLogRow {
    pub id: String,
    pub execution_id: String,
    pub node_id: String,
    pub attempt: i64,
    pub status: String,
    /// Full JSON `StepLog` snapshot.
    pub record: String,
    pub started_at: String,
}

/// A persisted webhook binding row.
#[derive(Debug, Clone, FromRow)]
pub struct BindingRow {
    pub id: String,
    pub workflow_id: String,
    pub path: String,
    pub method: String,
    pub auth: String,
}
