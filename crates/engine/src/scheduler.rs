//! Execution scheduler — walks an `ExecutionPlan` and drives the
//! execution-level state machine.
//!
//! Traversal is ready-set driven. Every edge is `pending`, `delivered` or
//! `dead`; a node becomes ready once all its incoming edges are resolved and
//! at least one delivered. Conditional nodes deliver only their selected
//! branch and kill the rest; deadness propagates, which is how whole
//! never-selected subgraphs end up `skipped` without ever being visited.
//!
//! Steps in the same ready wave run concurrently. Pause and terminate are
//! cooperative: they are observed between waves (and terminate additionally
//! inside retry backoff), never mid-step.
//!
//! Everything the scheduler knows is reconstructable from the persisted
//! execution record plus the plan, so resume is a pure replay.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use serde_json::Value;
use tokio::task::JoinSet;
use tracing::{error, info, instrument};

use nodes::NodeRegistry;

use crate::compiler::{compile, ExecutionPlan};
use crate::control::{ControlReceiver, ControlSignal};
use crate::error::EngineError;
use crate::models::{
    ExecutionStatus, NodeId, StepLog, StepStatus, WorkflowExecution,
};
use crate::step::{run_step, StepOutcome};
use crate::store::{ExecutionStore, StoreError};

// ---------------------------------------------------------------------------
// Traversal bookkeeping
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EdgeState {
    Pending,
    Delivered,
    Dead,
}

/// Pure traversal state over one plan. No I/O; the scheduler drives it and
/// persists around it.
struct Traversal {
    plan: ExecutionPlan,
    start: NodeId,
    edge_state: Vec<EdgeState>,
    /// Delivered inputs per node: (input index, upstream output).
    inputs: HashMap<NodeId, Vec<(u32, Value)>>,
    executed: HashSet<NodeId>,
    dead: HashSet<NodeId>,
    /// Frontier, in the order nodes became ready.
    ready: Vec<NodeId>,
}

impl Traversal {
    fn new(plan: ExecutionPlan, start: NodeId) -> Self {
        let edge_state = vec![EdgeState::Pending; plan.edges().len()];
        let mut traversal = Self {
            plan,
            start: start.clone(),
            edge_state,
            inputs: HashMap::new(),
            executed: HashSet::new(),
            dead: HashSet::new(),
            ready: vec![start],
        };

        // Everything without an inbound edge other than the start node can
        // never receive data this run: other triggers, orphaned subgraphs.
        let roots: Vec<NodeId> = traversal
            .plan
            .node_ids()
            .iter()
            .filter(|id| **id != traversal.start && traversal.plan.incoming(id).is_empty())
            .cloned()
            .collect();
        for id in roots {
            traversal.mark_dead(&id);
        }
        traversal
    }

    fn is_ready(&self, id: &str) -> bool {
        self.ready.iter().any(|n| n == id)
    }

    fn mark_dead(&mut self, id: &str) {
        if self.executed.contains(id) || self.dead.contains(id) || self.is_ready(id) {
            return;
        }
        self.dead.insert(id.to_string());
        if let Some(groups) = self.plan.outgoing(id) {
            let idxs: Vec<usize> = groups.values().flatten().copied().collect();
            for idx in idxs {
                self.kill_edge(idx);
            }
        }
    }

    fn kill_edge(&mut self, idx: usize) {
        if self.edge_state[idx] != EdgeState::Pending {
            return;
        }
        self.edge_state[idx] = EdgeState::Dead;
        let target = self.plan.edge(idx).target.clone();
        self.settle_target(&target);
    }

    fn deliver_edge(&mut self, idx: usize, value: &Value) {
        if self.edge_state[idx] != EdgeState::Pending {
            return;
        }
        self.edge_state[idx] = EdgeState::Delivered;
        let edge = self.plan.edge(idx);
        let (target, input_index) = (edge.target.clone(), edge.input_index);
        self.inputs
            .entry(target.clone())
            .or_default()
            .push((input_index, value.clone()));
        self.settle_target(&target);
    }

    /// Once all of a node's incoming edges are resolved, it either joins the
    /// ready frontier (something was delivered) or dies (nothing was).
    fn settle_target(&mut self, target: &str) {
        if self.executed.contains(target) || self.dead.contains(target) || self.is_ready(target)
        {
            return;
        }
        let incoming = self.plan.incoming(target);
        if incoming
            .iter()
            .any(|&i| self.edge_state[i] == EdgeState::Pending)
        {
            return;
        }
        let delivered = incoming
            .iter()
            .any(|&i| self.edge_state[i] == EdgeState::Delivered);
        if delivered {
            self.ready.push(target.to_string());
        } else {
            self.mark_dead(target);
        }
    }

    /// Record a node's success and resolve its outgoing edges. `selected` is
    /// the branch tag a conditional node chose; unconditional nodes deliver
    /// every group.
    fn apply_success(&mut self, id: &str, output: &Value, selected: Option<&str>) {
        self.ready.retain(|n| n != id);
        self.executed.insert(id.to_string());

        let Some(groups) = self.plan.outgoing(id) else {
            return;
        };
        let conditional = self
            .plan
            .node(id)
            .map(|n| n.kind.is_conditional())
            .unwrap_or(false);

        let mut to_deliver: Vec<usize> = Vec::new();
        let mut to_kill: Vec<usize> = Vec::new();
        for (tag, idxs) in groups {
            let taken = !conditional || Some(tag.as_str()) == selected;
            if taken {
                to_deliver.extend(idxs.iter().copied());
            } else {
                to_kill.extend(idxs.iter().copied());
            }
        }
        for idx in to_deliver {
            self.deliver_edge(idx, output);
        }
        for idx in to_kill {
            self.kill_edge(idx);
        }
    }

    /// Input handed to a node: the trigger payload for the start node, the
    /// single delivered value otherwise, or an array ordered by input index
    /// when several edges delivered.
    fn input_for(&self, id: &str, trigger_payload: &Value) -> Value {
        if id == self.start {
            return trigger_payload.clone();
        }
        let mut delivered = self.inputs.get(id).cloned().unwrap_or_default();
        delivered.sort_by_key(|(index, _)| *index);
        match delivered.len() {
            0 => Value::Null,
            1 => delivered.into_iter().next().unwrap().1,
            _ => Value::Array(delivered.into_iter().map(|(_, v)| v).collect()),
        }
    }

    /// Rebuild state from a persisted execution by replaying its completed
    /// steps, in completion order, with their recorded outputs.
    fn replay(&mut self, execution: &WorkflowExecution) {
        for id in &execution.completed_steps {
            let Some(output) = execution.results.get(id).cloned() else {
                continue;
            };
            let selected = self
                .plan
                .selected_branch(execution, id)
                .map(str::to_string);
            self.apply_success(id, &output, selected.as_deref());
        }
    }
}

// ---------------------------------------------------------------------------
// Scheduler
// ---------------------------------------------------------------------------

/// Drives one execution at a time. Stateless between runs: everything lives
/// in the store and the plan.
pub struct Scheduler {
    store: Arc<dyn ExecutionStore>,
    registry: Arc<NodeRegistry>,
}

enum WaveEnd {
    Continue,
    Errored { node_id: NodeId, message: String },
    Cancelled,
}

impl Scheduler {
    pub fn new(store: Arc<dyn ExecutionStore>, registry: Arc<NodeRegistry>) -> Self {
        Self { store, registry }
    }

    /// Start a fresh (queued) execution and drive it to a suspension point
    /// or a terminal state.
    #[instrument(skip_all, fields(execution_id = %execution.id))]
    pub async fn start_run(
        &self,
        mut execution: WorkflowExecution,
        control: ControlReceiver,
    ) -> Result<WorkflowExecution, EngineError> {
        let plan = compile(&execution.definition).map_err(EngineError::Validation)?;
        let start = plan.triggers()[0].clone();
        let traversal = Traversal::new(plan, start);

        execution.status = ExecutionStatus::Running;
        self.store.update_execution(&execution).await?;
        info!(workflow_id = %execution.workflow_id, "execution started");

        self.traverse(execution, traversal, control).await
    }

    /// Resume a `waiting` execution from its persisted state.
    #[instrument(skip_all, fields(execution_id = %execution.id))]
    pub async fn resume_run(
        &self,
        mut execution: WorkflowExecution,
        resume_payload: Option<Value>,
        control: ControlReceiver,
    ) -> Result<WorkflowExecution, EngineError> {
        let plan = compile(&execution.definition).map_err(EngineError::Validation)?;
        let start = plan.triggers()[0].clone();
        let mut traversal = Traversal::new(plan, start);
        traversal.replay(&execution);

        // If we suspended *at* a wait node, resuming completes it: the node
        // is never re-executed, its output is the resume payload (or its own
        // input when none was given), and traversal continues with its
        // successors.
        if let Some(current) = execution.current_step.clone() {
            let is_unfinished_wait = !execution.completed_steps.contains(&current)
                && traversal
                    .plan
                    .node(&current)
                    .map(|n| n.wait)
                    .unwrap_or(false);
            if is_unfinished_wait {
                let output = resume_payload
                    .unwrap_or_else(|| traversal.input_for(&current, &execution.trigger_payload));
                self.close_waiting_log(&execution, &current, &output).await?;
                execution.completed_steps.push(current.clone());
                execution.results.insert(current.clone(), output.clone());
                traversal.apply_success(&current, &output, None);
            }
        }

        execution.status = ExecutionStatus::Running;
        execution.current_step = None;
        self.store.update_execution(&execution).await?;
        info!(resumed_from = ?execution.completed_steps.last(), "execution resumed");

        self.traverse(execution, traversal, control).await
    }

    /// Flip the open `waiting` row of a wait node to `success`.
    async fn close_waiting_log(
        &self,
        execution: &WorkflowExecution,
        node_id: &str,
        output: &Value,
    ) -> Result<(), StoreError> {
        let logs = self.store.list_step_logs(execution.id).await?;
        if let Some(mut log) = logs
            .into_iter()
            .rev()
            .find(|l| l.node_id == node_id && l.status == StepStatus::Waiting)
        {
            log.output = Some(output.clone());
            log.finish(StepStatus::Success);
            self.store.update_step_log(&log).await?;
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Main loop
    // -----------------------------------------------------------------------

    async fn traverse(
        &self,
        mut execution: WorkflowExecution,
        mut traversal: Traversal,
        control: ControlReceiver,
    ) -> Result<WorkflowExecution, EngineError> {
        loop {
            if traversal.ready.is_empty() {
                return self.finish_completed(execution, &traversal).await;
            }

            // Suspension point: between waves. Copy the signal out so the
            // watch guard never lives across an await.
            let signal = *control.borrow();
            match signal {
                ControlSignal::Terminate => {
                    return self.finish_cancelled(execution).await;
                }
                ControlSignal::Pause => {
                    return self
                        .finish_waiting(execution, traversal.ready.first().cloned())
                        .await;
                }
                ControlSignal::Run => {}
            }

            let wave: Vec<NodeId> = std::mem::take(&mut traversal.ready);

            // Wait nodes suspend the run before they execute; everything
            // else in the wave runs first so its results are durable.
            let (wait_nodes, run_nodes): (Vec<NodeId>, Vec<NodeId>) = wave
                .into_iter()
                .partition(|id| traversal.plan.node(id).map(|n| n.wait).unwrap_or(false));

            if !run_nodes.is_empty() {
                match self
                    .run_wave(&mut execution, &mut traversal, &run_nodes, &control)
                    .await?
                {
                    WaveEnd::Continue => {}
                    WaveEnd::Errored { node_id, message } => {
                        return self.finish_errored(execution, node_id, message).await;
                    }
                    WaveEnd::Cancelled => {
                        return self.finish_cancelled(execution).await;
                    }
                }
            }

            if let Some(wait_node) = wait_nodes.first() {
                let input = traversal.input_for(wait_node, &execution.trigger_payload);
                let node = traversal.plan.node(wait_node).expect("wait node is in plan");
                let mut log = StepLog::start(execution.id, node, 1, Some(input));
                log.status = StepStatus::Waiting;
                self.store.append_step_log(&log).await?;
                return self.finish_waiting(execution, Some(wait_node.clone())).await;
            }
        }
    }

    /// Run one concurrent wave of non-wait nodes to completion.
    async fn run_wave(
        &self,
        execution: &mut WorkflowExecution,
        traversal: &mut Traversal,
        run_nodes: &[NodeId],
        control: &ControlReceiver,
    ) -> Result<WaveEnd, EngineError> {
        execution.current_step = Some(run_nodes[0].clone());
        self.store.update_execution(execution).await?;

        let mut join_set: JoinSet<(NodeId, Result<StepOutcome, StoreError>)> = JoinSet::new();
        for id in run_nodes {
            let node = traversal
                .plan
                .node(id)
                .expect("ready node is in plan")
                .clone();
            let input = traversal.input_for(id, &execution.trigger_payload);
            let store = Arc::clone(&self.store);
            let registry = Arc::clone(&self.registry);
            let execution_id = execution.id;
            let workflow_id = execution.workflow_id;
            let trigger = execution.trigger_payload.clone();
            let step_control = control.clone();
            let node_id = id.clone();
            join_set.spawn(async move {
                let outcome = run_step(
                    store,
                    registry,
                    execution_id,
                    workflow_id,
                    trigger,
                    node,
                    input,
                    step_control,
                )
                .await;
                (node_id, outcome)
            });
        }

        let mut failed: Option<(NodeId, String)> = None;
        let mut cancelled = false;

        while let Some(joined) = join_set.join_next().await {
            let (node_id, outcome) = joined.map_err(|e| EngineError::Step {
                node_id: "<join>".into(),
                message: format!("step task panicked: {e}"),
            })?;

            match outcome? {
                StepOutcome::Success(output) => {
                    let selected = if traversal
                        .plan
                        .node(&node_id)
                        .map(|n| n.kind.is_conditional())
                        .unwrap_or(false)
                    {
                        output
                            .get(nodes::SELECTED_BRANCH_KEY)
                            .and_then(Value::as_str)
                            .map(str::to_string)
                    } else {
                        None
                    };

                    execution.completed_steps.push(node_id.clone());
                    execution.results.insert(node_id.clone(), output.clone());
                    self.store.update_execution(execution).await?;
                    traversal.apply_success(&node_id, &output, selected.as_deref());
                }
                StepOutcome::Failed(message) => {
                    if failed.is_none() {
                        failed = Some((node_id, message));
                    }
                }
                StepOutcome::Cancelled => cancelled = true,
            }
        }

        if cancelled {
            return Ok(WaveEnd::Cancelled);
        }
        if let Some((node_id, message)) = failed {
            return Ok(WaveEnd::Errored { node_id, message });
        }
        Ok(WaveEnd::Continue)
    }

    // -----------------------------------------------------------------------
    // Terminal / suspension transitions
    // -----------------------------------------------------------------------

    async fn finish_completed(
        &self,
        mut execution: WorkflowExecution,
        traversal: &Traversal,
    ) -> Result<WorkflowExecution, EngineError> {
        // Every node the run never executed is dead code for this run;
        // record that explicitly so the attempt history is complete.
        for id in traversal.plan.node_ids() {
            if traversal.executed.contains(id) {
                continue;
            }
            let node = traversal.plan.node(id).expect("arena owns all ids");
            let mut log = StepLog::start(execution.id, node, 0, None);
            log.finish(StepStatus::Skipped);
            self.store.append_step_log(&log).await?;
        }

        execution.finish(ExecutionStatus::Completed);
        self.store.update_execution(&execution).await?;
        info!(
            steps = execution.completed_steps.len(),
            duration_ms = execution.duration_ms,
            "execution completed"
        );
        Ok(execution)
    }

    async fn finish_errored(
        &self,
        mut execution: WorkflowExecution,
        node_id: NodeId,
        message: String,
    ) -> Result<WorkflowExecution, EngineError> {
        execution.error = Some(format!("step '{node_id}' failed: {message}"));
        execution.finish(ExecutionStatus::Errored);
        self.store.update_execution(&execution).await?;
        error!(node_id = node_id.as_str(), message = message.as_str(), "execution errored");
        Ok(execution)
    }

    async fn finish_cancelled(
        &self,
        mut execution: WorkflowExecution,
    ) -> Result<WorkflowExecution, EngineError> {
        execution.finish(ExecutionStatus::Cancelled);
        self.store.update_execution(&execution).await?;
        info!("execution cancelled");
        Ok(execution)
    }

    async fn finish_waiting(
        &self,
        mut execution: WorkflowExecution,
        current_step: Option<NodeId>,
    ) -> Result<WorkflowExecution, EngineError> {
        execution.status = ExecutionStatus::Waiting;
        execution.current_step = current_step;
        self.store.update_execution(&execution).await?;
        info!(current_step = ?execution.current_step, "execution waiting");
        Ok(execution)
    }
}
