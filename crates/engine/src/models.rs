//! Core domain models for the workflow engine.
//!
//! These types are the source of truth for what a workflow, an execution and
//! a step log look like in memory.  They serialise to/from the JSON columns
//! the persistence adapter writes, so the string forms of every enum here are
//! load-bearing: clients poll them verbatim.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Node identifier, unique within one workflow.
pub type NodeId = String;

/// Label distinguishing a node's output groups.
pub type BranchTag = String;

/// Branch tag carried by every unconditional node's single output group.
pub const MAIN_BRANCH: &str = "main";

// ---------------------------------------------------------------------------
// NodeKind
// ---------------------------------------------------------------------------

/// What a node *is*; what it *does* lives behind the executor registered
/// for the kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NodeKind {
    Trigger,
    Action,
    AiAgent,
    Condition,
    Switch,
}

impl NodeKind {
    /// Conditional nodes route to exactly one of their labeled output groups.
    pub fn is_conditional(self) -> bool {
        matches!(self, Self::Condition | Self::Switch)
    }

    /// The registry key for this kind.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Trigger => "trigger",
            Self::Action => "action",
            Self::AiAgent => "ai-agent",
            Self::Condition => "condition",
            Self::Switch => "switch",
        }
    }
}

impl std::fmt::Display for NodeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Retry policy
// ---------------------------------------------------------------------------

/// Backoff applied between retry attempts of one step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Backoff {
    /// Same delay before every retry.
    Fixed { delay_ms: u64 },
    /// `base_ms * 2^(attempt-1)` before the next retry.
    Exponential { base_ms: u64 },
}

impl Default for Backoff {
    fn default() -> Self {
        Self::Fixed { delay_ms: 100 }
    }
}

impl Backoff {
    /// Delay to wait after the given (1-based) failed attempt.
    pub fn delay_after(self, attempt: u32) -> std::time::Duration {
        let ms = match self {
            Self::Fixed { delay_ms } => delay_ms,
            Self::Exponential { base_ms } => {
                base_ms.saturating_mul(2u64.saturating_pow(attempt.saturating_sub(1)))
            }
        };
        std::time::Duration::from_millis(ms)
    }
}

/// Per-node retry policy, owned by the engine (never by the executor).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default)]
    pub backoff: Backoff,
}

fn default_max_attempts() -> u32 {
    1
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            backoff: Backoff::default(),
        }
    }
}

// ---------------------------------------------------------------------------
// NodeDefinition
// ---------------------------------------------------------------------------

/// Editor canvas coordinates. The engine never reads these.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

/// A single node in the workflow graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeDefinition {
    /// Unique identifier within this workflow (referenced by connections).
    pub id: NodeId,
    /// Display name; step logs fall back to the id when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub kind: NodeKind,
    #[serde(default)]
    pub position: Position,
    /// Opaque configuration interpreted by the node executor.
    #[serde(default)]
    pub parameters: Value,
    /// Designated wait node: traversal suspends here until resumed.
    #[serde(default)]
    pub wait: bool,
    #[serde(default)]
    pub retry: RetryPolicy,
}

impl NodeDefinition {
    /// Minimal constructor used by tests and the CLI.
    pub fn new(id: impl Into<NodeId>, kind: NodeKind) -> Self {
        Self {
            id: id.into(),
            name: None,
            kind,
            position: Position::default(),
            parameters: Value::Null,
            wait: false,
            retry: RetryPolicy::default(),
        }
    }

    /// Name shown in step logs.
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.id)
    }
}

// ---------------------------------------------------------------------------
// Connections
// ---------------------------------------------------------------------------

/// Directed link from one node's output group to another node's input.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Connection {
    /// Target node id.
    pub node: NodeId,
    /// Which input slot of the target this connection feeds.
    #[serde(default)]
    pub input_index: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

impl Connection {
    pub fn to(node: impl Into<NodeId>) -> Self {
        Self {
            node: node.into(),
            input_index: 0,
            label: None,
        }
    }
}

/// Output groups of one source node, keyed by branch tag.
pub type OutputGroups = BTreeMap<BranchTag, Vec<Connection>>;

/// Source node id -> output groups.
pub type ConnectionMap = BTreeMap<NodeId, OutputGroups>;

// ---------------------------------------------------------------------------
// WorkflowDefinition
// ---------------------------------------------------------------------------

/// A complete workflow definition as authored in the editor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    pub id: Uuid,
    pub owner: String,
    pub name: String,
    pub nodes: Vec<NodeDefinition>,
    #[serde(default)]
    pub connections: ConnectionMap,
    #[serde(default)]
    pub active: bool,
    #[serde(default = "default_version")]
    pub version: u32,
}

fn default_version() -> u32 {
    1
}

impl WorkflowDefinition {
    /// Convenience constructor for tests and the CLI.
    pub fn new(
        name: impl Into<String>,
        nodes: Vec<NodeDefinition>,
        connections: ConnectionMap,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            owner: "local".into(),
            name: name.into(),
            nodes,
            connections,
            active: true,
            version: 1,
        }
    }

    pub fn node(&self, id: &str) -> Option<&NodeDefinition> {
        self.nodes.iter().find(|n| n.id == id)
    }
}

// ---------------------------------------------------------------------------
// Execution status
// ---------------------------------------------------------------------------

/// Lifecycle of one workflow execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    Queued,
    Running,
    Waiting,
    Completed,
    Errored,
    Cancelled,
}

impl ExecutionStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Errored | Self::Cancelled)
    }
}

impl std::fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Queued => write!(f, "queued"),
            Self::Running => write!(f, "running"),
            Self::Waiting => write!(f, "waiting"),
            Self::Completed => write!(f, "completed"),
            Self::Errored => write!(f, "errored"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

impl std::str::FromStr for ExecutionStatus {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(Self::Queued),
            "running" => Ok(Self::Running),
            "waiting" => Ok(Self::Waiting),
            "completed" => Ok(Self::Completed),
            "errored" => Ok(Self::Errored),
            "cancelled" => Ok(Self::Cancelled),
            other => Err(format!("unknown execution status: {other}")),
        }
    }
}

// ---------------------------------------------------------------------------
// Step status
// ---------------------------------------------------------------------------

/// Lifecycle of one step attempt within an execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    Pending,
    Running,
    Success,
    Error,
    Retrying,
    Skipped,
    Waiting,
}

impl std::fmt::Display for StepStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Running => write!(f, "running"),
            Self::Success => write!(f, "success"),
            Self::Error => write!(f, "error"),
            Self::Retrying => write!(f, "retrying"),
            Self::Skipped => write!(f, "skipped"),
            Self::Waiting => write!(f, "waiting"),
        }
    }
}

impl std::str::FromStr for StepStatus {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "running" => Ok(Self::Running),
            "success" => Ok(Self::Success),
            "error" => Ok(Self::Error),
            "retrying" => Ok(Self::Retrying),
            "skipped" => Ok(Self::Skipped),
            "waiting" => Ok(Self::Waiting),
            other => Err(format!("unknown step status: {other}")),
        }
    }
}

// ---------------------------------------------------------------------------
// Trigger type
// ---------------------------------------------------------------------------

/// How an execution was started.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TriggerType {
    Manual,
    Webhook,
    Schedule,
    Event,
}

impl std::fmt::Display for TriggerType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Manual => write!(f, "manual"),
            Self::Webhook => write!(f, "webhook"),
            Self::Schedule => write!(f, "schedule"),
            Self::Event => write!(f, "event"),
        }
    }
}

// ---------------------------------------------------------------------------
// WorkflowExecution
// ---------------------------------------------------------------------------

/// One run of a workflow definition.
///
/// The definition is snapshotted at start: later saves of the workflow never
/// affect a run already in flight. Only the scheduler mutates this record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowExecution {
    pub id: Uuid,
    pub workflow_id: Uuid,
    /// Definition as it was when the execution was created.
    pub definition: WorkflowDefinition,
    /// Client-supplied idempotency token.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance_id: Option<String>,
    pub status: ExecutionStatus,
    pub trigger_type: TriggerType,
    pub trigger_payload: Value,
    /// Node the run is at (last started, or the wait node while `waiting`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_step: Option<NodeId>,
    /// Append-only, in true completion order.
    #[serde(default)]
    pub completed_steps: Vec<NodeId>,
    /// Node id -> output of its successful step.
    #[serde(default)]
    pub results: BTreeMap<NodeId, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
}

impl WorkflowExecution {
    /// Fresh `queued` execution snapshotting the given definition.
    pub fn new(
        definition: WorkflowDefinition,
        trigger_type: TriggerType,
        trigger_payload: Value,
        instance_id: Option<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            workflow_id: definition.id,
            definition,
            instance_id,
            status: ExecutionStatus::Queued,
            trigger_type,
            trigger_payload,
            current_step: None,
            completed_steps: Vec::new(),
            results: BTreeMap::new(),
            error: None,
            started_at: Utc::now(),
            finished_at: None,
            duration_ms: None,
        }
    }

    /// Stamp a terminal status together with `finished_at`/`duration_ms`.
    pub fn finish(&mut self, status: ExecutionStatus) {
        let now = Utc::now();
        self.status = status;
        self.finished_at = Some(now);
        self.duration_ms = Some((now - self.started_at).num_milliseconds().max(0) as u64);
        self.current_step = None;
    }
}

// ---------------------------------------------------------------------------
// StepLog
// ---------------------------------------------------------------------------

/// One attempt of one node within an execution.
///
/// Retries append a new row with an incremented attempt number; rows are
/// never reused across attempts, so the full attempt history survives.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepLog {
    pub id: Uuid,
    pub execution_id: Uuid,
    pub node_id: NodeId,
    pub node_name: String,
    pub status: StepStatus,
    /// 1-based attempt number.
    pub attempt: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
}

impl StepLog {
    /// New `running` attempt row.
    pub fn start(
        execution_id: Uuid,
        node: &NodeDefinition,
        attempt: u32,
        input: Option<Value>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            execution_id,
            node_id: node.id.clone(),
            node_name: node.display_name().to_string(),
            status: StepStatus::Running,
            attempt,
            input,
            output: None,
            error: None,
            started_at: Utc::now(),
            finished_at: None,
            duration_ms: None,
        }
    }

    /// Finalize this attempt with the given status.
    pub fn finish(&mut self, status: StepStatus) {
        let now = Utc::now();
        self.status = status;
        self.finished_at = Some(now);
        self.duration_ms = Some((now - self.started_at).num_milliseconds().max(0) as u64);
    }
}

// ---------------------------------------------------------------------------
// WebhookBinding
// ---------------------------------------------------------------------------

/// Authentication mode an ingress router applies before dispatching.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WebhookAuth {
    #[default]
    None,
    Basic,
    Header,
}

/// Maps an inbound `(path, method)` pair to a workflow.
///
/// The pair is globally unique; the store enforces this at creation time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookBinding {
    pub id: Uuid,
    pub workflow_id: Uuid,
    pub path: String,
    /// Upper-cased HTTP method.
    pub method: String,
    #[serde(default)]
    pub auth: WebhookAuth,
}

impl WebhookBinding {
    pub fn new(workflow_id: Uuid, path: impl Into<String>, method: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            workflow_id,
            path: path.into(),
            method: method.to_ascii_uppercase(),
            auth: WebhookAuth::None,
        }
    }
}

// ============================================================
// Unit tests
// ============================================================
#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    #[test]
    fn status_strings_round_trip() {
        for s in [
            ExecutionStatus::Queued,
            ExecutionStatus::Running,
            ExecutionStatus::Waiting,
            ExecutionStatus::Completed,
            ExecutionStatus::Errored,
            ExecutionStatus::Cancelled,
        ] {
            let parsed: ExecutionStatus = s.to_string().parse().unwrap();
            assert_eq!(parsed, s);
        }
        for s in [
            StepStatus::Pending,
            StepStatus::Running,
            StepStatus::Success,
            StepStatus::Error,
            StepStatus::Retrying,
            StepStatus::Skipped,
            StepStatus::Waiting,
        ] {
            let parsed: StepStatus = s.to_string().parse().unwrap();
            assert_eq!(parsed, s);
        }
    }

    #[test]
    fn node_kind_serializes_kebab_case() {
        assert_eq!(
            serde_json::to_string(&NodeKind::AiAgent).unwrap(),
            "\"ai-agent\""
        );
        assert_eq!(NodeKind::AiAgent.as_str(), "ai-agent");
    }

    #[test]
    fn retry_policy_defaults_to_single_attempt() {
        let p: RetryPolicy = serde_json::from_str("{}").unwrap();
        assert_eq!(p.max_attempts, 1);
    }

    #[test]
    fn exponential_backoff_doubles() {
        let b = Backoff::Exponential { base_ms: 100 };
        assert_eq!(b.delay_after(1).as_millis(), 100);
        assert_eq!(b.delay_after(2).as_millis(), 200);
        assert_eq!(b.delay_after(3).as_millis(), 400);
    }

    #[test]
    fn execution_finish_records_duration() {
        let wf = WorkflowDefinition::new("t", vec![], ConnectionMap::new());
        let mut exec = WorkflowExecution::new(wf, TriggerType::Manual, Value::Null, None);
        exec.finish(ExecutionStatus::Completed);
        assert!(exec.status.is_terminal());
        assert!(exec.finished_at.is_some());
        assert!(exec.duration_ms.is_some());
    }
}
