//! The control surface: validate / execute / pause / resume / terminate,
//! plus the workflow CRUD the HTTP layer and CLI sit on.
//!
//! `WorkflowEngine` is an explicit handle — every control call names its
//! execution id; there is no process-wide "current execution". Executions
//! run as spawned tasks owned by the engine's control registry, and clients
//! observe them only through the polled `WorkflowExecution` read model.

use std::sync::Arc;

use serde_json::Value;
use tracing::{error, info};
use uuid::Uuid;

use nodes::NodeRegistry;

use crate::compiler::{compile, validate, ValidationReport};
use crate::control::{ControlReceiver, ControlRegistry, ControlSignal};
use crate::error::{ControlError, EngineError};
use crate::models::{
    ExecutionStatus, StepStatus, TriggerType, WebhookBinding, WorkflowDefinition,
    WorkflowExecution,
};
use crate::scheduler::Scheduler;
use crate::store::{ExecutionStore, StoreError};

/// One engine per process; cheap to clone via `Arc`.
pub struct WorkflowEngine {
    store: Arc<dyn ExecutionStore>,
    registry: Arc<NodeRegistry>,
    controls: Arc<ControlRegistry>,
}

impl WorkflowEngine {
    pub fn new(store: Arc<dyn ExecutionStore>, registry: Arc<NodeRegistry>) -> Self {
        Self {
            store,
            registry,
            controls: Arc::new(ControlRegistry::new()),
        }
    }

    pub fn store(&self) -> &Arc<dyn ExecutionStore> {
        &self.store
    }

    // -----------------------------------------------------------------------
    // Workflows
    // -----------------------------------------------------------------------

    /// Pure validation; never touches storage.
    pub fn validate(&self, definition: &WorkflowDefinition) -> ValidationReport {
        validate(definition)
    }

    /// Validate, then persist. Invalid graphs are rejected with the full
    /// error list and nothing is written.
    pub async fn create_workflow(
        &self,
        definition: WorkflowDefinition,
    ) -> Result<WorkflowDefinition, EngineError> {
        compile(&definition).map_err(EngineError::Validation)?;
        self.store.save_workflow(&definition).await?;
        info!(workflow_id = %definition.id, name = definition.name.as_str(), "workflow saved");
        Ok(definition)
    }

    pub async fn get_workflow(&self, id: Uuid) -> Result<WorkflowDefinition, EngineError> {
        Ok(self.store.get_workflow(id).await?)
    }

    pub async fn list_workflows(&self) -> Result<Vec<WorkflowDefinition>, EngineError> {
        Ok(self.store.list_workflows().await?)
    }

    pub async fn delete_workflow(&self, id: Uuid) -> Result<(), EngineError> {
        Ok(self.store.delete_workflow(id).await?)
    }

    /// Bind `(path, method)` to a workflow. The store enforces global
    /// uniqueness of the pair.
    pub async fn register_webhook(
        &self,
        binding: WebhookBinding,
    ) -> Result<WebhookBinding, EngineError> {
        self.store.get_workflow(binding.workflow_id).await?;
        self.store.create_binding(&binding).await?;
        Ok(binding)
    }

    // -----------------------------------------------------------------------
    // Execute
    // -----------------------------------------------------------------------

    /// Create a queued execution (snapshotting the definition), start the
    /// scheduler asynchronously, and return the record immediately.
    ///
    /// Supplying an `instance_id` already used for this workflow returns the
    /// existing execution instead of starting a duplicate.
    pub async fn execute(
        &self,
        workflow_id: Uuid,
        trigger_type: TriggerType,
        trigger_payload: Value,
        instance_id: Option<String>,
    ) -> Result<WorkflowExecution, EngineError> {
        let definition = self.store.get_workflow(workflow_id).await?;
        if trigger_type != TriggerType::Manual && !definition.active {
            return Err(EngineError::Inactive(workflow_id));
        }
        compile(&definition).map_err(EngineError::Validation)?;

        if let Some(token) = &instance_id {
            if let Some(existing) = self
                .store
                .find_execution_by_instance(workflow_id, token)
                .await?
            {
                return Ok(existing);
            }
        }

        let execution =
            WorkflowExecution::new(definition, trigger_type, trigger_payload, instance_id);
        self.store.create_execution(&execution).await?;

        let control = self
            .controls
            .register(execution.id)
            .ok_or(ControlError::Conflict(execution.id))?;
        self.spawn_traversal(
            execution.clone(),
            control,
            move |scheduler, execution, control| async move {
                scheduler.start_run(execution, control).await
            },
        );

        Ok(execution)
    }

    /// Route an inbound webhook to its workflow and execute it with the
    /// request body as trigger payload.
    pub async fn handle_webhook(
        &self,
        path: &str,
        method: &str,
        payload: Value,
    ) -> Result<WorkflowExecution, EngineError> {
        let binding = self
            .store
            .find_binding(path, &method.to_ascii_uppercase())
            .await?
            .ok_or(StoreError::NotFound)?;
        self.execute(binding.workflow_id, TriggerType::Webhook, payload, None)
            .await
    }

    // -----------------------------------------------------------------------
    // Status / control
    // -----------------------------------------------------------------------

    /// Read-only snapshot for polling.
    pub async fn get_execution(&self, id: Uuid) -> Result<WorkflowExecution, EngineError> {
        Ok(self.store.get_execution(id).await?)
    }

    /// Request a pause at the next step boundary. Valid only while `running`.
    pub async fn pause(&self, id: Uuid) -> Result<(), EngineError> {
        let execution = self.fetch_for_control(id).await?;
        match execution.status {
            ExecutionStatus::Running | ExecutionStatus::Queued => {}
            other => {
                return Err(ControlError::InvalidTransition {
                    command: "pause",
                    status: other.to_string(),
                }
                .into());
            }
        }
        if self.controls.signal(id, ControlSignal::Pause) {
            Ok(())
        } else {
            // The traversal ended between our status read and the signal.
            let now = self.fetch_for_control(id).await?;
            Err(ControlError::InvalidTransition {
                command: "pause",
                status: now.status.to_string(),
            }
            .into())
        }
    }

    /// Resume a `waiting` execution from its persisted state.
    pub async fn resume(
        &self,
        id: Uuid,
        payload: Option<Value>,
    ) -> Result<WorkflowExecution, EngineError> {
        let execution = self.fetch_for_control(id).await?;
        if execution.status != ExecutionStatus::Waiting {
            return Err(ControlError::InvalidTransition {
                command: "resume",
                status: execution.status.to_string(),
            }
            .into());
        }

        let control = self
            .controls
            .register(id)
            .ok_or(ControlError::Conflict(id))?;
        self.spawn_traversal(
            execution.clone(),
            control,
            move |scheduler, execution, control| async move {
                scheduler.resume_run(execution, payload, control).await
            },
        );

        Ok(execution)
    }

    /// Cancel from `running` or `waiting`. Terminating an already-terminal
    /// execution is a no-op, not an error.
    pub async fn terminate(&self, id: Uuid) -> Result<(), EngineError> {
        let execution = self.fetch_for_control(id).await?;
        if execution.status.is_terminal() {
            return Ok(());
        }

        // A live traversal observes the signal at its next suspension point.
        if self.controls.signal(id, ControlSignal::Terminate) {
            return Ok(());
        }

        // No traversal owns the id (waiting, or left behind by a crash):
        // cancel directly, closing out whatever step was open.
        cancel_suspended(&self.store, id).await
    }

    // -----------------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------------

    async fn fetch_for_control(&self, id: Uuid) -> Result<WorkflowExecution, EngineError> {
        match self.store.get_execution(id).await {
            Ok(execution) => Ok(execution),
            Err(StoreError::NotFound) => Err(ControlError::UnknownExecution(id).into()),
            Err(e) => Err(e.into()),
        }
    }

    /// Spawn a traversal task that releases its control-registry entry on
    /// exit, whatever the outcome.
    fn spawn_traversal<F, Fut>(&self, execution: WorkflowExecution, control: ControlReceiver, drive: F)
    where
        F: FnOnce(Scheduler, WorkflowExecution, ControlReceiver) -> Fut + Send + 'static,
        Fut: std::future::Future<Output = Result<WorkflowExecution, EngineError>> + Send,
    {
        let scheduler = Scheduler::new(Arc::clone(&self.store), Arc::clone(&self.registry));
        let controls = Arc::clone(&self.controls);
        let store = Arc::clone(&self.store);
        let execution_id = execution.id;
        tokio::spawn(async move {
            let outcome = drive(scheduler, execution, control.clone()).await;
            controls.release(execution_id);
            match outcome {
                Ok(final_state) => {
                    // A terminate that raced the transition into `waiting`
                    // was signalled but never observed; apply it now.
                    let late_terminate = final_state.status == ExecutionStatus::Waiting
                        && *control.borrow() == ControlSignal::Terminate;
                    if late_terminate {
                        if let Err(e) = cancel_suspended(&store, execution_id).await {
                            error!(execution_id = %execution_id, error = %e, "late cancel failed");
                        }
                    }
                }
                Err(e) => {
                    // The record stays at its last durably-committed state;
                    // the failure is visible through the status read model.
                    error!(execution_id = %execution_id, error = %e, "traversal aborted");
                }
            }
        });
    }
}

/// Cancel an execution with no live traversal: close out the open step row
/// and stamp the terminal state. No-op when the record is already terminal.
async fn cancel_suspended(
    store: &Arc<dyn ExecutionStore>,
    id: Uuid,
) -> Result<(), EngineError> {
    let mut execution = store.get_execution(id).await?;
    if execution.status.is_terminal() {
        return Ok(());
    }

    let logs = store.list_step_logs(id).await?;
    if let Some(mut open) = logs.into_iter().rev().find(|l| {
        matches!(
            l.status,
            StepStatus::Waiting | StepStatus::Running | StepStatus::Retrying
        )
    }) {
        open.error = Some("execution cancelled".into());
        open.finish(StepStatus::Error);
        store.update_step_log(&open).await?;
    }

    execution.finish(ExecutionStatus::Cancelled);
    store.update_execution(&execution).await?;
    info!(execution_id = %id, "execution cancelled while suspended");
    Ok(())
}
