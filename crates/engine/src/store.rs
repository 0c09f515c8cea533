//! Persistence adapter — the narrow storage interface the engine writes
//! through, plus the in-memory implementation used by tests and one-shot
//! local runs.
//!
//! No business logic lives behind this trait; implementations store and
//! return records verbatim. All writes for one execution flow through its
//! single scheduler task, which is what keeps the per-execution
//! single-writer invariant without locks at this layer.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

use crate::models::{StepLog, WebhookBinding, WorkflowDefinition, WorkflowExecution};

// ---------------------------------------------------------------------------
// StoreError
// ---------------------------------------------------------------------------

/// Errors surfaced by a persistence adapter.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("record not found")]
    NotFound,

    /// A uniqueness invariant was violated (e.g. a webhook `(path, method)`
    /// pair already bound).
    #[error("conflict: {0}")]
    Conflict(String),

    /// The backing store failed; the caller may retry.
    #[error("storage backend error: {0}")]
    Backend(String),
}

// ---------------------------------------------------------------------------
// ExecutionStore
// ---------------------------------------------------------------------------

/// Durable storage for workflow definitions, execution records, step logs
/// and webhook bindings.
#[async_trait]
pub trait ExecutionStore: Send + Sync {
    // ------ Workflows ------

    /// Insert or replace a workflow definition by id.
    async fn save_workflow(&self, workflow: &WorkflowDefinition) -> Result<(), StoreError>;

    async fn get_workflow(&self, id: Uuid) -> Result<WorkflowDefinition, StoreError>;

    async fn list_workflows(&self) -> Result<Vec<WorkflowDefinition>, StoreError>;

    /// Delete by id; `NotFound` if nothing was deleted.
    async fn delete_workflow(&self, id: Uuid) -> Result<(), StoreError>;

    // ------ Executions ------

    async fn create_execution(&self, execution: &WorkflowExecution) -> Result<(), StoreError>;

    /// Replace the stored record with the given snapshot.
    async fn update_execution(&self, execution: &WorkflowExecution) -> Result<(), StoreError>;

    async fn get_execution(&self, id: Uuid) -> Result<WorkflowExecution, StoreError>;

    /// Look up an execution by its client idempotency token.
    async fn find_execution_by_instance(
        &self,
        workflow_id: Uuid,
        instance_id: &str,
    ) -> Result<Option<WorkflowExecution>, StoreError>;

    // ------ Step logs ------

    /// Append a new attempt row. Rows are never replaced across attempts.
    async fn append_step_log(&self, log: &StepLog) -> Result<(), StoreError>;

    /// Finalize an existing attempt row (same `log.id`).
    async fn update_step_log(&self, log: &StepLog) -> Result<(), StoreError>;

    /// All rows for an execution, ordered by `started_at` then attempt.
    async fn list_step_logs(&self, execution_id: Uuid) -> Result<Vec<StepLog>, StoreError>;

    // ------ Webhook bindings ------

    /// Create a binding; `Conflict` if the `(path, method)` pair is taken.
    async fn create_binding(&self, binding: &WebhookBinding) -> Result<(), StoreError>;

    async fn find_binding(
        &self,
        path: &str,
        method: &str,
    ) -> Result<Option<WebhookBinding>, StoreError>;
}

// ---------------------------------------------------------------------------
// MemoryStore
// ---------------------------------------------------------------------------

#[derive(Default)]
struct MemoryInner {
    workflows: HashMap<Uuid, WorkflowDefinition>,
    executions: HashMap<Uuid, WorkflowExecution>,
    step_logs: Vec<StepLog>,
    bindings: Vec<WebhookBinding>,
}

/// In-process store. Backs engine tests and `nodeflow run`; nothing
/// survives the process.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<MemoryInner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ExecutionStore for MemoryStore {
    async fn save_workflow(&self, workflow: &WorkflowDefinition) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        inner.workflows.insert(workflow.id, workflow.clone());
        Ok(())
    }

    async fn get_workflow(&self, id: Uuid) -> Result<WorkflowDefinition, StoreError> {
        let inner = self.inner.lock().unwrap();
        inner.workflows.get(&id).cloned().ok_or(StoreError::NotFound)
    }

    async fn list_workflows(&self) -> Result<Vec<WorkflowDefinition>, StoreError> {
        let inner = self.inner.lock().unwrap();
        let mut all: Vec<WorkflowDefinition> = inner.workflows.values().cloned().collect();
        all.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(all)
    }

    async fn delete_workflow(&self, id: Uuid) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        inner
            .workflows
            .remove(&id)
            .map(|_| ())
            .ok_or(StoreError::NotFound)
    }

    async fn create_execution(&self, execution: &WorkflowExecution) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        inner.executions.insert(execution.id, execution.clone());
        Ok(())
    }

    async fn update_execution(&self, execution: &WorkflowExecution) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        if !inner.executions.contains_key(&execution.id) {
            return Err(StoreError::NotFound);
        }
        inner.executions.insert(execution.id, execution.clone());
        Ok(())
    }

    async fn get_execution(&self, id: Uuid) -> Result<WorkflowExecution, StoreError> {
        let inner = self.inner.lock().unwrap();
        inner.executions.get(&id).cloned().ok_or(StoreError::NotFound)
    }

    async fn find_execution_by_instance(
        &self,
        workflow_id: Uuid,
        instance_id: &str,
    ) -> Result<Option<WorkflowExecution>, StoreError> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .executions
            .values()
            .find(|e| {
                e.workflow_id == workflow_id && e.instance_id.as_deref() == Some(instance_id)
            })
            .cloned())
    }

    async fn append_step_log(&self, log: &StepLog) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        inner.step_logs.push(log.clone());
        Ok(())
    }

    async fn update_step_log(&self, log: &StepLog) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        match inner.step_logs.iter_mut().find(|l| l.id == log.id) {
            Some(row) => {
                *row = log.clone();
                Ok(())
            }
            None => Err(StoreError::NotFound),
        }
    }

    async fn list_step_logs(&self, execution_id: Uuid) -> Result<Vec<StepLog>, StoreError> {
        let inner = self.inner.lock().unwrap();
        let mut logs: Vec<StepLog> = inner
            .step_logs
            .iter()
            .filter(|l| l.execution_id == execution_id)
            .cloned()
            .collect();
        logs.sort_by(|a, b| {
            a.started_at
                .cmp(&b.started_at)
                .then(a.attempt.cmp(&b.attempt))
        });
        Ok(logs)
    }

    async fn create_binding(&self, binding: &WebhookBinding) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        if inner
            .bindings
            .iter()
            .any(|b| b.path == binding.path && b.method == binding.method)
        {
            return Err(StoreError::Conflict(format!(
                "webhook {} {} already bound",
                binding.method, binding.path
            )));
        }
        inner.bindings.push(binding.clone());
        Ok(())
    }

    async fn find_binding(
        &self,
        path: &str,
        method: &str,
    ) -> Result<Option<WebhookBinding>, StoreError> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .bindings
            .iter()
            .find(|b| b.path == path && b.method == method)
            .cloned())
    }
}

// ============================================================
// Unit tests
// ============================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ConnectionMap, TriggerType};
    use serde_json::json;

    fn store() -> MemoryStore {
        MemoryStore::new()
    }

    fn workflow() -> WorkflowDefinition {
        WorkflowDefinition::new("wf", vec![], ConnectionMap::new())
    }

    #[tokio::test]
    async fn workflow_crud_round_trips() {
        let store = store();
        let wf = workflow();
        store.save_workflow(&wf).await.unwrap();
        let loaded = store.get_workflow(wf.id).await.unwrap();
        assert_eq!(loaded.name, "wf");
        store.delete_workflow(wf.id).await.unwrap();
        assert!(matches!(
            store.get_workflow(wf.id).await,
            Err(StoreError::NotFound)
        ));
    }

    #[tokio::test]
    async fn instance_id_lookup_finds_existing_execution() {
        let store = store();
        let wf = workflow();
        let exec = WorkflowExecution::new(
            wf.clone(),
            TriggerType::Manual,
            json!({}),
            Some("token-1".into()),
        );
        store.create_execution(&exec).await.unwrap();

        let found = store
            .find_execution_by_instance(wf.id, "token-1")
            .await
            .unwrap();
        assert_eq!(found.map(|e| e.id), Some(exec.id));

        let missing = store
            .find_execution_by_instance(wf.id, "token-2")
            .await
            .unwrap();
        assert!(missing.is_none());
    }

    #[tokio::test]
    async fn duplicate_binding_conflicts() {
        let store = store();
        let wf = workflow();
        store
            .create_binding(&WebhookBinding::new(wf.id, "hook", "POST"))
            .await
            .unwrap();
        let err = store
            .create_binding(&WebhookBinding::new(wf.id, "hook", "POST"))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));

        // Same path, different method is fine.
        store
            .create_binding(&WebhookBinding::new(wf.id, "hook", "GET"))
            .await
            .unwrap();
    }
}
