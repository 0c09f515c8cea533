//! Single-step execution with the engine-owned retry policy.
//!
//! Every attempt gets its own `StepLog` row: `running` while in flight, then
//! `success`, `retrying` (failed but attempts remain) or `error`. The
//! executor is a black box; the engine only interprets its three-way result,
//! plus the selected-branch key on conditional nodes.

use std::sync::Arc;

use serde_json::Value;
use tracing::warn;
use uuid::Uuid;

use nodes::{ExecutionContext, NodeError, NodeRegistry, SELECTED_BRANCH_KEY};

use crate::control::{ControlReceiver, ControlSignal};
use crate::models::{NodeDefinition, StepLog, StepStatus};
use crate::store::{ExecutionStore, StoreError};

/// How a step ended, after the retry policy has been applied.
#[derive(Debug)]
pub enum StepOutcome {
    /// The node produced an output; traversal continues past it.
    Success(Value),
    /// Fatal failure or retries exhausted; terminal for this run.
    Failed(String),
    /// A terminate signal arrived during a retry backoff.
    Cancelled,
}

/// Run one node to its step outcome, appending one log row per attempt.
#[allow(clippy::too_many_arguments)]
pub async fn run_step(
    store: Arc<dyn ExecutionStore>,
    registry: Arc<NodeRegistry>,
    execution_id: Uuid,
    workflow_id: Uuid,
    trigger: Value,
    node: NodeDefinition,
    input: Value,
    mut control: ControlReceiver,
) -> Result<StepOutcome, StoreError> {
    let ctx = ExecutionContext {
        workflow_id,
        execution_id,
        node_id: node.id.clone(),
        trigger,
    };

    let executor = match registry.get(node.kind.as_str()) {
        Some(executor) => executor,
        None => {
            // Same failure mode as dispatching an unknown node type: the
            // step fails fatally and the attempt is still logged.
            let mut log = StepLog::start(execution_id, &node, 1, Some(input));
            let message = format!("no executor registered for kind '{}'", node.kind);
            log.error = Some(message.clone());
            log.finish(StepStatus::Error);
            store.append_step_log(&log).await?;
            return Ok(StepOutcome::Failed(message));
        }
    };

    let max_attempts = node.retry.max_attempts.max(1);

    for attempt in 1..=max_attempts {
        let mut log = StepLog::start(execution_id, &node, attempt, Some(input.clone()));
        store.append_step_log(&log).await?;

        match executor.execute(&node.parameters, input.clone(), &ctx).await {
            Ok(output) => {
                // A conditional node that doesn't say where to route is a
                // broken executor, not a recoverable condition.
                if node.kind.is_conditional()
                    && output.get(SELECTED_BRANCH_KEY).and_then(Value::as_str).is_none()
                {
                    let message = format!(
                        "{} node '{}' returned no selected branch tag",
                        node.kind, node.id
                    );
                    log.output = Some(output);
                    log.error = Some(message.clone());
                    log.finish(StepStatus::Error);
                    store.update_step_log(&log).await?;
                    return Ok(StepOutcome::Failed(message));
                }

                log.output = Some(output.clone());
                log.finish(StepStatus::Success);
                store.update_step_log(&log).await?;
                return Ok(StepOutcome::Success(output));
            }

            Err(NodeError::Fatal(message)) => {
                log.error = Some(message.clone());
                log.finish(StepStatus::Error);
                store.update_step_log(&log).await?;
                return Ok(StepOutcome::Failed(message));
            }

            Err(NodeError::Retryable(message)) => {
                if attempt >= max_attempts {
                    log.error = Some(message.clone());
                    log.finish(StepStatus::Error);
                    store.update_step_log(&log).await?;
                    return Ok(StepOutcome::Failed(message));
                }

                log.error = Some(message.clone());
                log.finish(StepStatus::Retrying);
                store.update_step_log(&log).await?;

                let delay = node.retry.backoff.delay_after(attempt);
                warn!(
                    node_id = node.id.as_str(),
                    attempt,
                    max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = message.as_str(),
                    "step failed, retrying after backoff"
                );

                if backoff_or_terminate(&mut control, delay).await {
                    // The retry never happened; close out the attempt row so
                    // the cancellation is attributed to this step.
                    log.error = Some("execution cancelled during retry backoff".into());
                    log.finish(StepStatus::Error);
                    store.update_step_log(&log).await?;
                    return Ok(StepOutcome::Cancelled);
                }
            }
        }
    }

    unreachable!("retry loop returns on every branch of the final attempt");
}

/// Sleep the backoff interval, waking early only for a terminate signal.
/// Pause is deliberately not honored here: a retrying step is mid-step, and
/// pause takes effect at step boundaries.
async fn backoff_or_terminate(control: &mut ControlReceiver, delay: std::time::Duration) -> bool {
    if *control.borrow() == ControlSignal::Terminate {
        return true;
    }
    tokio::select! {
        _ = tokio::time::sleep(delay) => false,
        terminated = wait_for_terminate(control) => terminated,
    }
}

async fn wait_for_terminate(control: &mut ControlReceiver) -> bool {
    loop {
        // A closed channel means the traversal's registry entry is gone and
        // nothing can signal us any more; sleep out the backoff instead.
        if control.changed().await.is_err() {
            return std::future::pending().await;
        }
        if *control.borrow() == ControlSignal::Terminate {
            return true;
        }
    }
}
