//! Integration tests for the execution engine.
//!
//! These run the full control surface (`WorkflowEngine`) against the
//! in-memory store and mock node executors, so no external services are
//! required. Status assertions go through the same polled read model real
//! clients use.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use uuid::Uuid;

use nodes::builtin::{PassthroughNode, TriggerNode};
use nodes::mock::{MockBehaviour, MockNode};
use nodes::NodeRegistry;

use crate::compiler::compile;
use crate::error::{ControlError, EngineError};
use crate::models::{
    Connection, ConnectionMap, ExecutionStatus, NodeDefinition, NodeKind, OutputGroups,
    RetryPolicy, StepStatus, TriggerType, WebhookBinding, WorkflowDefinition, MAIN_BRANCH,
};
use crate::service::WorkflowEngine;
use crate::store::{ExecutionStore, MemoryStore};

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

fn engine_with(registry: NodeRegistry) -> (WorkflowEngine, Arc<MemoryStore>) {
    let store = Arc::new(MemoryStore::new());
    let engine = WorkflowEngine::new(store.clone(), Arc::new(registry));
    (engine, store)
}

/// Base registry: real trigger intake + passthrough actions; tests override
/// individual kinds with mocks.
fn base_registry() -> NodeRegistry {
    let mut registry = NodeRegistry::new();
    registry.register("trigger", Arc::new(TriggerNode));
    registry.register("action", Arc::new(PassthroughNode));
    registry
}

fn connect(map: &mut ConnectionMap, source: &str, tag: &str, targets: &[&str]) {
    map.entry(source.to_string())
        .or_insert_with(OutputGroups::new)
        .insert(
            tag.to_string(),
            targets.iter().map(|t| Connection::to(*t)).collect(),
        );
}

async fn wait_until(
    store: &Arc<MemoryStore>,
    id: Uuid,
    pred: impl Fn(ExecutionStatus) -> bool,
) -> crate::models::WorkflowExecution {
    for _ in 0..500 {
        let exec = store.get_execution(id).await.unwrap();
        if pred(exec.status) {
            return exec;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("timed out waiting for execution {id} to reach the expected status");
}

// ---------------------------------------------------------------------------
// Scenario: Trigger -> Switch{a,b} -> (a: NodeA), (b: NodeB)
// ---------------------------------------------------------------------------

fn switch_workflow() -> WorkflowDefinition {
    let mut connections = ConnectionMap::new();
    connect(&mut connections, "start", MAIN_BRANCH, &["sw"]);
    connect(&mut connections, "sw", "a", &["node_a"]);
    connect(&mut connections, "sw", "b", &["node_b"]);

    WorkflowDefinition::new(
        "switchy",
        vec![
            NodeDefinition::new("start", NodeKind::Trigger),
            NodeDefinition::new("sw", NodeKind::Switch),
            NodeDefinition::new("node_a", NodeKind::Action),
            NodeDefinition::new("node_b", NodeKind::Action),
        ],
        connections,
    )
}

#[tokio::test]
async fn switch_executes_only_the_selected_branch() {
    let mut registry = base_registry();
    registry.register("switch", Arc::new(MockNode::selecting_branch("a")));
    let (engine, store) = engine_with(registry);

    let wf = engine.create_workflow(switch_workflow()).await.unwrap();
    let exec = engine
        .execute(wf.id, TriggerType::Manual, json!({ "go": true }), None)
        .await
        .unwrap();
    assert_eq!(exec.status, ExecutionStatus::Queued);

    let done = wait_until(&store, exec.id, |s| s.is_terminal()).await;
    assert_eq!(done.status, ExecutionStatus::Completed);
    assert_eq!(done.completed_steps, ["start", "sw", "node_a"]);
    assert!(!done.completed_steps.iter().any(|n| n == "node_b"));

    // The unselected branch is reported skipped in the attempt history.
    let logs = store.list_step_logs(exec.id).await.unwrap();
    let node_b_logs: Vec<_> = logs.iter().filter(|l| l.node_id == "node_b").collect();
    assert_eq!(node_b_logs.len(), 1);
    assert_eq!(node_b_logs[0].status, StepStatus::Skipped);
    assert!(done.duration_ms.is_some());
}

#[tokio::test]
async fn traversed_edges_match_the_branch_exclusivity_formula() {
    let mut registry = base_registry();
    registry.register("switch", Arc::new(MockNode::selecting_branch("a")));
    let (engine, store) = engine_with(registry);

    let wf = engine.create_workflow(switch_workflow()).await.unwrap();
    let exec = engine
        .execute(wf.id, TriggerType::Manual, json!({}), None)
        .await
        .unwrap();
    let done = wait_until(&store, exec.id, |s| s.is_terminal()).await;

    let plan = compile(&done.definition).unwrap();
    let traversed: Vec<(String, String, String)> = plan
        .traversed_edges(&done)
        .into_iter()
        .map(|e| (e.source.clone(), e.branch.clone(), e.target.clone()))
        .collect();

    assert_eq!(
        traversed,
        [
            ("start".into(), MAIN_BRANCH.into(), "sw".into()),
            ("sw".into(), "a".into(), "node_a".into()),
        ]
    );
}

// ---------------------------------------------------------------------------
// Scenario: Trigger -> Wait -> Action
// ---------------------------------------------------------------------------

fn wait_workflow() -> WorkflowDefinition {
    let mut connections = ConnectionMap::new();
    connect(&mut connections, "start", MAIN_BRANCH, &["approval"]);
    connect(&mut connections, "approval", MAIN_BRANCH, &["after"]);

    let mut approval = NodeDefinition::new("approval", NodeKind::Action);
    approval.wait = true;

    WorkflowDefinition::new(
        "gated",
        vec![
            NodeDefinition::new("start", NodeKind::Trigger),
            approval,
            NodeDefinition::new("after", NodeKind::AiAgent),
        ],
        connections,
    )
}

#[tokio::test]
async fn wait_node_suspends_then_resume_completes() {
    let after = Arc::new(MockNode::returning(json!({ "notified": true })));
    let mut registry = base_registry();
    registry.register("ai-agent", after.clone());
    let (engine, store) = engine_with(registry);

    let wf = engine.create_workflow(wait_workflow()).await.unwrap();
    let exec = engine
        .execute(wf.id, TriggerType::Manual, json!({ "ticket": 7 }), None)
        .await
        .unwrap();

    let waiting = wait_until(&store, exec.id, |s| s == ExecutionStatus::Waiting).await;
    assert_eq!(waiting.current_step.as_deref(), Some("approval"));
    assert_eq!(waiting.completed_steps, ["start"]);
    assert_eq!(after.call_count(), 0);

    let logs = store.list_step_logs(exec.id).await.unwrap();
    let open = logs.iter().find(|l| l.node_id == "approval").unwrap();
    assert_eq!(open.status, StepStatus::Waiting);

    engine
        .resume(exec.id, Some(json!({ "approved": true })))
        .await
        .unwrap();

    let done = wait_until(&store, exec.id, |s| s.is_terminal()).await;
    assert_eq!(done.status, ExecutionStatus::Completed);
    assert_eq!(done.completed_steps, ["start", "approval", "after"]);
    assert_eq!(done.results["approval"], json!({ "approved": true }));

    // Resume ran only the successor; the wait node itself never hit an
    // executor and its log row flipped to success.
    assert_eq!(after.call_count(), 1);
    let logs = store.list_step_logs(exec.id).await.unwrap();
    let approval_logs: Vec<_> = logs.iter().filter(|l| l.node_id == "approval").collect();
    assert_eq!(approval_logs.len(), 1);
    assert_eq!(approval_logs[0].status, StepStatus::Success);
}

#[tokio::test]
async fn resume_never_reexecutes_predecessors() {
    let trigger = Arc::new(MockNode::returning(json!({ "seen": true })));
    let after = Arc::new(MockNode::returning(json!({ "done": true })));
    let mut registry = NodeRegistry::new();
    registry.register("trigger", trigger.clone());
    registry.register("action", Arc::new(PassthroughNode));
    registry.register("ai-agent", after.clone());
    let (engine, store) = engine_with(registry);

    let wf = engine.create_workflow(wait_workflow()).await.unwrap();
    let exec = engine
        .execute(wf.id, TriggerType::Manual, json!({}), None)
        .await
        .unwrap();

    wait_until(&store, exec.id, |s| s == ExecutionStatus::Waiting).await;
    assert_eq!(trigger.call_count(), 1);

    engine.resume(exec.id, None).await.unwrap();
    let done = wait_until(&store, exec.id, |s| s.is_terminal()).await;

    assert_eq!(done.status, ExecutionStatus::Completed);
    assert_eq!(trigger.call_count(), 1, "trigger must not run again");
    assert_eq!(after.call_count(), 1);
}

#[tokio::test]
async fn resume_is_rejected_unless_waiting() {
    let (engine, store) = engine_with(base_registry());

    let mut connections = ConnectionMap::new();
    connect(&mut connections, "start", MAIN_BRANCH, &["a"]);
    let wf = engine
        .create_workflow(WorkflowDefinition::new(
            "plain",
            vec![
                NodeDefinition::new("start", NodeKind::Trigger),
                NodeDefinition::new("a", NodeKind::Action),
            ],
            connections,
        ))
        .await
        .unwrap();

    let exec = engine
        .execute(wf.id, TriggerType::Manual, json!({}), None)
        .await
        .unwrap();
    wait_until(&store, exec.id, |s| s.is_terminal()).await;

    let err = engine.resume(exec.id, None).await.unwrap_err();
    assert!(matches!(
        err,
        EngineError::Control(ControlError::InvalidTransition { command: "resume", .. })
    ));
}

// ---------------------------------------------------------------------------
// Retry accounting
// ---------------------------------------------------------------------------

#[tokio::test]
async fn always_failing_node_produces_one_row_per_attempt() {
    let mut registry = base_registry();
    registry.register("action", Arc::new(MockNode::failing_retryable("api 503")));
    let (engine, store) = engine_with(registry);

    let mut connections = ConnectionMap::new();
    connect(&mut connections, "start", MAIN_BRANCH, &["flaky"]);
    let mut flaky = NodeDefinition::new("flaky", NodeKind::Action);
    flaky.retry = RetryPolicy {
        max_attempts: 3,
        backoff: crate::models::Backoff::Fixed { delay_ms: 5 },
    };

    let wf = engine
        .create_workflow(WorkflowDefinition::new(
            "retries",
            vec![NodeDefinition::new("start", NodeKind::Trigger), flaky],
            connections,
        ))
        .await
        .unwrap();

    let exec = engine
        .execute(wf.id, TriggerType::Manual, json!({}), None)
        .await
        .unwrap();
    let done = wait_until(&store, exec.id, |s| s.is_terminal()).await;

    assert_eq!(done.status, ExecutionStatus::Errored);
    assert!(done.error.as_deref().unwrap().contains("api 503"));

    let logs = store.list_step_logs(exec.id).await.unwrap();
    let attempts: Vec<_> = logs.iter().filter(|l| l.node_id == "flaky").collect();
    assert_eq!(attempts.len(), 3);
    assert_eq!(
        attempts.iter().map(|l| l.attempt).collect::<Vec<_>>(),
        [1, 2, 3]
    );
    assert_eq!(attempts[0].status, StepStatus::Retrying);
    assert_eq!(attempts[1].status, StepStatus::Retrying);
    assert_eq!(attempts[2].status, StepStatus::Error);
}

#[tokio::test]
async fn flaky_node_recovers_within_its_attempt_limit() {
    let mut registry = base_registry();
    registry.register(
        "action",
        Arc::new(MockNode::flaky(2, json!({ "recovered": true }))),
    );
    let (engine, store) = engine_with(registry);

    let mut connections = ConnectionMap::new();
    connect(&mut connections, "start", MAIN_BRANCH, &["flaky"]);
    let mut flaky = NodeDefinition::new("flaky", NodeKind::Action);
    flaky.retry = RetryPolicy {
        max_attempts: 3,
        backoff: crate::models::Backoff::Exponential { base_ms: 2 },
    };

    let wf = engine
        .create_workflow(WorkflowDefinition::new(
            "recovers",
            vec![NodeDefinition::new("start", NodeKind::Trigger), flaky],
            connections,
        ))
        .await
        .unwrap();

    let exec = engine
        .execute(wf.id, TriggerType::Manual, json!({}), None)
        .await
        .unwrap();
    let done = wait_until(&store, exec.id, |s| s.is_terminal()).await;

    assert_eq!(done.status, ExecutionStatus::Completed);
    assert_eq!(done.results["flaky"]["recovered"], true);

    let logs = store.list_step_logs(exec.id).await.unwrap();
    let statuses: Vec<_> = logs
        .iter()
        .filter(|l| l.node_id == "flaky")
        .map(|l| l.status)
        .collect();
    assert_eq!(
        statuses,
        [StepStatus::Retrying, StepStatus::Retrying, StepStatus::Success]
    );
}

// ---------------------------------------------------------------------------
// Failure semantics
// ---------------------------------------------------------------------------

#[tokio::test]
async fn fatal_step_stops_traversal_and_leaves_successors_unvisited() {
    let never = Arc::new(MockNode::returning(json!({})));
    let mut registry = base_registry();
    registry.register("action", Arc::new(MockNode::failing_fatal("bad credentials")));
    registry.register("ai-agent", never.clone());
    let (engine, store) = engine_with(registry);

    let mut connections = ConnectionMap::new();
    connect(&mut connections, "start", MAIN_BRANCH, &["boom"]);
    connect(&mut connections, "boom", MAIN_BRANCH, &["never"]);

    let wf = engine
        .create_workflow(WorkflowDefinition::new(
            "fails",
            vec![
                NodeDefinition::new("start", NodeKind::Trigger),
                NodeDefinition::new("boom", NodeKind::Action),
                NodeDefinition::new("never", NodeKind::AiAgent),
            ],
            connections,
        ))
        .await
        .unwrap();

    let exec = engine
        .execute(wf.id, TriggerType::Manual, json!({}), None)
        .await
        .unwrap();
    let done = wait_until(&store, exec.id, |s| s.is_terminal()).await;

    assert_eq!(done.status, ExecutionStatus::Errored);
    assert!(done.error.as_deref().unwrap().contains("bad credentials"));
    assert_eq!(done.completed_steps, ["start"]);
    assert_eq!(never.call_count(), 0);

    // Errored runs leave unreached nodes unvisited: no skipped rows.
    let logs = store.list_step_logs(exec.id).await.unwrap();
    assert!(logs.iter().all(|l| l.node_id != "never"));
}

#[tokio::test]
async fn conditional_without_branch_tag_fails_the_step() {
    let mut registry = base_registry();
    // A switch executor that "forgets" to set the branch key.
    registry.register("switch", Arc::new(MockNode::returning(json!({ "oops": 1 }))));
    let (engine, store) = engine_with(registry);

    let wf = engine.create_workflow(switch_workflow()).await.unwrap();
    let exec = engine
        .execute(wf.id, TriggerType::Manual, json!({}), None)
        .await
        .unwrap();
    let done = wait_until(&store, exec.id, |s| s.is_terminal()).await;

    assert_eq!(done.status, ExecutionStatus::Errored);
    assert!(done.error.as_deref().unwrap().contains("branch"));
}

#[tokio::test]
async fn unregistered_kind_fails_the_step_fatally() {
    // Registry without an ai-agent executor.
    let (engine, store) = engine_with(base_registry());

    let mut connections = ConnectionMap::new();
    connect(&mut connections, "start", MAIN_BRANCH, &["agent"]);
    let wf = engine
        .create_workflow(WorkflowDefinition::new(
            "agents",
            vec![
                NodeDefinition::new("start", NodeKind::Trigger),
                NodeDefinition::new("agent", NodeKind::AiAgent),
            ],
            connections,
        ))
        .await
        .unwrap();

    let exec = engine
        .execute(wf.id, TriggerType::Manual, json!({}), None)
        .await
        .unwrap();
    let done = wait_until(&store, exec.id, |s| s.is_terminal()).await;

    assert_eq!(done.status, ExecutionStatus::Errored);
    assert!(done.error.as_deref().unwrap().contains("no executor registered"));
}

// ---------------------------------------------------------------------------
// Pause / terminate
// ---------------------------------------------------------------------------

#[tokio::test]
async fn pause_takes_effect_at_the_next_step_boundary() {
    let after = Arc::new(MockNode::returning(json!({ "late": true })));
    let mut registry = base_registry();
    registry.register(
        "action",
        Arc::new(MockNode::scripted(vec![MockBehaviour::Delay(
            Duration::from_millis(150),
            json!({ "slow": true }),
        )])),
    );
    registry.register("ai-agent", after.clone());
    let (engine, store) = engine_with(registry);

    let mut connections = ConnectionMap::new();
    connect(&mut connections, "start", MAIN_BRANCH, &["slow"]);
    connect(&mut connections, "slow", MAIN_BRANCH, &["after"]);
    let wf = engine
        .create_workflow(WorkflowDefinition::new(
            "pausable",
            vec![
                NodeDefinition::new("start", NodeKind::Trigger),
                NodeDefinition::new("slow", NodeKind::Action),
                NodeDefinition::new("after", NodeKind::AiAgent),
            ],
            connections,
        ))
        .await
        .unwrap();

    let exec = engine
        .execute(wf.id, TriggerType::Manual, json!({}), None)
        .await
        .unwrap();

    // Let the slow step get going, then ask for a pause mid-step.
    tokio::time::sleep(Duration::from_millis(40)).await;
    engine.pause(exec.id).await.unwrap();

    let waiting = wait_until(&store, exec.id, |s| s == ExecutionStatus::Waiting).await;
    // The in-flight step ran to completion before the pause took effect.
    assert!(waiting.completed_steps.iter().any(|n| n == "slow"));
    assert_eq!(after.call_count(), 0);

    engine.resume(exec.id, None).await.unwrap();
    let done = wait_until(&store, exec.id, |s| s.is_terminal()).await;
    assert_eq!(done.status, ExecutionStatus::Completed);
    assert_eq!(after.call_count(), 1);
}

#[tokio::test]
async fn pause_is_rejected_while_waiting() {
    let (engine, store) = engine_with(base_registry());
    let wf = engine.create_workflow(wait_workflow()).await.unwrap();
    // ai-agent is unregistered but never reached before the wait node.
    let exec = engine
        .execute(wf.id, TriggerType::Manual, json!({}), None)
        .await
        .unwrap();
    wait_until(&store, exec.id, |s| s == ExecutionStatus::Waiting).await;

    let err = engine.pause(exec.id).await.unwrap_err();
    assert!(matches!(
        err,
        EngineError::Control(ControlError::InvalidTransition { command: "pause", .. })
    ));
}

#[tokio::test]
async fn terminate_while_waiting_is_idempotent() {
    let (engine, store) = engine_with(base_registry());
    let wf = engine.create_workflow(wait_workflow()).await.unwrap();
    let exec = engine
        .execute(wf.id, TriggerType::Manual, json!({}), None)
        .await
        .unwrap();
    wait_until(&store, exec.id, |s| s == ExecutionStatus::Waiting).await;

    engine.terminate(exec.id).await.unwrap();
    let first = wait_until(&store, exec.id, |s| s.is_terminal()).await;
    assert_eq!(first.status, ExecutionStatus::Cancelled);

    // The open waiting row was closed out.
    let logs = store.list_step_logs(exec.id).await.unwrap();
    let approval = logs.iter().find(|l| l.node_id == "approval").unwrap();
    assert_eq!(approval.status, StepStatus::Error);

    // Second terminate is a no-op producing an identical record.
    engine.terminate(exec.id).await.unwrap();
    let second = store.get_execution(exec.id).await.unwrap();
    assert_eq!(
        serde_json::to_value(&first).unwrap(),
        serde_json::to_value(&second).unwrap()
    );
}

#[tokio::test]
async fn terminate_while_running_stops_after_the_current_step() {
    let after = Arc::new(MockNode::returning(json!({})));
    let mut registry = base_registry();
    registry.register(
        "action",
        Arc::new(MockNode::scripted(vec![MockBehaviour::Delay(
            Duration::from_millis(120),
            json!({ "slow": true }),
        )])),
    );
    registry.register("ai-agent", after.clone());
    let (engine, store) = engine_with(registry);

    let mut connections = ConnectionMap::new();
    connect(&mut connections, "start", MAIN_BRANCH, &["slow"]);
    connect(&mut connections, "slow", MAIN_BRANCH, &["after"]);
    let wf = engine
        .create_workflow(WorkflowDefinition::new(
            "cancellable",
            vec![
                NodeDefinition::new("start", NodeKind::Trigger),
                NodeDefinition::new("slow", NodeKind::Action),
                NodeDefinition::new("after", NodeKind::AiAgent),
            ],
            connections,
        ))
        .await
        .unwrap();

    let exec = engine
        .execute(wf.id, TriggerType::Manual, json!({}), None)
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(30)).await;
    engine.terminate(exec.id).await.unwrap();

    let done = wait_until(&store, exec.id, |s| s.is_terminal()).await;
    assert_eq!(done.status, ExecutionStatus::Cancelled);
    // The in-flight step was never interrupted; traversal just stopped after.
    assert!(done.completed_steps.iter().any(|n| n == "slow"));
    assert_eq!(after.call_count(), 0);
}

// ---------------------------------------------------------------------------
// Execute semantics
// ---------------------------------------------------------------------------

#[tokio::test]
async fn instance_id_makes_execute_idempotent() {
    let (engine, store) = engine_with(base_registry());
    let mut connections = ConnectionMap::new();
    connect(&mut connections, "start", MAIN_BRANCH, &["a"]);
    let wf = engine
        .create_workflow(WorkflowDefinition::new(
            "idem",
            vec![
                NodeDefinition::new("start", NodeKind::Trigger),
                NodeDefinition::new("a", NodeKind::Action),
            ],
            connections,
        ))
        .await
        .unwrap();

    let first = engine
        .execute(wf.id, TriggerType::Event, json!({ "n": 1 }), Some("tok-1".into()))
        .await
        .unwrap();
    wait_until(&store, first.id, |s| s.is_terminal()).await;

    let second = engine
        .execute(wf.id, TriggerType::Event, json!({ "n": 2 }), Some("tok-1".into()))
        .await
        .unwrap();
    assert_eq!(second.id, first.id, "same token returns the same run");

    let third = engine
        .execute(wf.id, TriggerType::Event, json!({ "n": 3 }), Some("tok-2".into()))
        .await
        .unwrap();
    assert_ne!(third.id, first.id);
}

#[tokio::test]
async fn non_manual_triggers_require_an_active_workflow() {
    let (engine, _store) = engine_with(base_registry());
    let mut connections = ConnectionMap::new();
    connect(&mut connections, "start", MAIN_BRANCH, &["a"]);
    let mut wf = WorkflowDefinition::new(
        "inactive",
        vec![
            NodeDefinition::new("start", NodeKind::Trigger),
            NodeDefinition::new("a", NodeKind::Action),
        ],
        connections,
    );
    wf.active = false;
    let wf = engine.create_workflow(wf).await.unwrap();

    let err = engine
        .execute(wf.id, TriggerType::Webhook, json!({}), None)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Inactive(_)));

    // Manual test-runs are allowed regardless.
    engine
        .execute(wf.id, TriggerType::Manual, json!({}), None)
        .await
        .unwrap();
}

#[tokio::test]
async fn webhook_binding_routes_to_execute() {
    let (engine, store) = engine_with(base_registry());
    let mut connections = ConnectionMap::new();
    connect(&mut connections, "start", MAIN_BRANCH, &["a"]);
    let wf = engine
        .create_workflow(WorkflowDefinition::new(
            "hooked",
            vec![
                NodeDefinition::new("start", NodeKind::Trigger),
                NodeDefinition::new("a", NodeKind::Action),
            ],
            connections,
        ))
        .await
        .unwrap();

    engine
        .register_webhook(WebhookBinding::new(wf.id, "orders", "POST"))
        .await
        .unwrap();

    // Duplicate (path, method) is rejected at creation time.
    let dup = engine
        .register_webhook(WebhookBinding::new(wf.id, "orders", "post"))
        .await;
    assert!(matches!(
        dup,
        Err(EngineError::Store(crate::store::StoreError::Conflict(_)))
    ));

    let exec = engine
        .handle_webhook("orders", "post", json!({ "order": 42 }))
        .await
        .unwrap();
    assert_eq!(exec.trigger_type, TriggerType::Webhook);

    let done = wait_until(&store, exec.id, |s| s.is_terminal()).await;
    assert_eq!(done.status, ExecutionStatus::Completed);
    // The trigger passed the request body downstream untouched.
    assert_eq!(done.results["a"], json!({ "order": 42 }));
}

#[tokio::test]
async fn invalid_definition_never_creates_an_execution() {
    let (engine, store) = engine_with(base_registry());

    // Bypass create_workflow's validation to simulate a corrupt record.
    let mut connections = ConnectionMap::new();
    connect(&mut connections, "start", MAIN_BRANCH, &["ghost"]);
    let wf = WorkflowDefinition::new(
        "broken",
        vec![NodeDefinition::new("start", NodeKind::Trigger)],
        connections,
    );
    store.save_workflow(&wf).await.unwrap();

    let err = engine
        .execute(wf.id, TriggerType::Manual, json!({}), None)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Validation(_)));
}

// ---------------------------------------------------------------------------
// Fan-out ordering
// ---------------------------------------------------------------------------

#[tokio::test]
async fn completed_steps_reflect_true_completion_order() {
    // start fans out to fast and slow; slow finishes last despite being
    // declared first.
    let mut registry = base_registry();
    registry.register(
        "action",
        Arc::new(MockNode::scripted(vec![MockBehaviour::Delay(
            Duration::from_millis(80),
            json!({ "slow": true }),
        )])),
    );
    registry.register("ai-agent", Arc::new(MockNode::returning(json!({ "fast": true }))));
    let (engine, store) = engine_with(registry);

    let mut connections = ConnectionMap::new();
    connect(&mut connections, "start", MAIN_BRANCH, &["slow", "fast"]);
    let wf = engine
        .create_workflow(WorkflowDefinition::new(
            "fanout",
            vec![
                NodeDefinition::new("start", NodeKind::Trigger),
                NodeDefinition::new("slow", NodeKind::Action),
                NodeDefinition::new("fast", NodeKind::AiAgent),
            ],
            connections,
        ))
        .await
        .unwrap();

    let exec = engine
        .execute(wf.id, TriggerType::Manual, json!({}), None)
        .await
        .unwrap();
    let done = wait_until(&store, exec.id, |s| s.is_terminal()).await;

    assert_eq!(done.status, ExecutionStatus::Completed);
    assert_eq!(done.completed_steps, ["start", "fast", "slow"]);
}
