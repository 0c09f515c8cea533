//! Graph compiler — lowers an authoring-time workflow into an execution plan.
//!
//! Checks performed, all accumulated into one error list:
//! 1. At least one trigger node exists.
//! 2. Node IDs are unique within the workflow.
//! 3. No connection references a missing node (either side).
//! 4. Condition/switch nodes carry at least one labeled output group.
//! 5. The graph is acyclic (DFS coloring over the id arena).
//!
//! Non-trigger nodes unreachable from every trigger are *warnings*, not hard
//! errors: they are dead code, and the runtime reports them as `skipped`.
//!
//! Compilation is pure. It never touches executors or storage.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};

use thiserror::Error;

use crate::models::{
    BranchTag, Connection, ConnectionMap, NodeDefinition, NodeId, NodeKind, WorkflowDefinition,
    WorkflowExecution,
};

/// Output key a condition/switch executor uses to report the taken branch.
pub use nodes::SELECTED_BRANCH_KEY;

// ---------------------------------------------------------------------------
// Validation errors / warnings
// ---------------------------------------------------------------------------

/// Hard validation failures; any of these rejects the graph.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// The workflow has no trigger node, so nothing could ever start it.
    #[error("workflow has no trigger node")]
    NoTrigger,

    /// Two or more nodes share the same ID.
    #[error("duplicate node ID: '{0}'")]
    DuplicateNodeId(NodeId),

    /// A connection references a node ID that doesn't exist in the workflow.
    #[error("connection references unknown node '{node_id}' ({side} side)")]
    UnknownNode { node_id: NodeId, side: &'static str },

    /// A condition/switch node has nowhere to route to.
    #[error("conditional node '{0}' has no labeled output group")]
    ConditionalWithoutBranches(NodeId),

    /// DFS found a back-edge.
    #[error("workflow graph contains a cycle through node '{0}'")]
    CycleDetected(NodeId),
}

/// Soft findings surfaced alongside a successful compile.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationWarning {
    /// Dead code: the node can never be reached from a trigger.
    #[error("node '{0}' is unreachable from any trigger")]
    UnreachableNode(NodeId),
}

/// Outcome of `validate` — the pure, persistence-free check the control
/// surface exposes to clients.
#[derive(Debug, Clone)]
pub struct ValidationReport {
    pub valid: bool,
    pub errors: Vec<ValidationError>,
    pub warnings: Vec<ValidationWarning>,
}

// ---------------------------------------------------------------------------
// ExecutionPlan
// ---------------------------------------------------------------------------

/// One lowered connection. `branch` is the output-group tag it belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlanEdge {
    pub source: NodeId,
    pub branch: BranchTag,
    pub target: NodeId,
    pub input_index: u32,
    pub label: Option<String>,
}

/// Validated, execution-ready form of a workflow graph.
///
/// Nodes live in an id-keyed arena; edges are a flat list indexed by the
/// per-node adjacency maps, so the scheduler can track per-edge state by
/// plain index.
#[derive(Debug, Clone)]
pub struct ExecutionPlan {
    nodes: HashMap<NodeId, NodeDefinition>,
    /// Definition order, preserved for decompilation and trigger selection.
    node_order: Vec<NodeId>,
    edges: Vec<PlanEdge>,
    /// Source node -> branch tag -> edge indices, group order preserved.
    outgoing: HashMap<NodeId, BTreeMap<BranchTag, Vec<usize>>>,
    /// Target node -> edge indices.
    incoming: HashMap<NodeId, Vec<usize>>,
    /// Trigger node ids in definition order.
    triggers: Vec<NodeId>,
    warnings: Vec<ValidationWarning>,
}

impl ExecutionPlan {
    pub fn node(&self, id: &str) -> Option<&NodeDefinition> {
        self.nodes.get(id)
    }

    /// All node ids in definition order.
    pub fn node_ids(&self) -> &[NodeId] {
        &self.node_order
    }

    pub fn edges(&self) -> &[PlanEdge] {
        &self.edges
    }

    pub fn edge(&self, idx: usize) -> &PlanEdge {
        &self.edges[idx]
    }

    /// Outgoing edge indices of `id`, grouped by branch tag.
    pub fn outgoing(&self, id: &str) -> Option<&BTreeMap<BranchTag, Vec<usize>>> {
        self.outgoing.get(id)
    }

    /// Incoming edge indices of `id`.
    pub fn incoming(&self, id: &str) -> &[usize] {
        self.incoming.get(id).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn triggers(&self) -> &[NodeId] {
        &self.triggers
    }

    pub fn warnings(&self) -> &[ValidationWarning] {
        &self.warnings
    }

    /// Branch tag a completed conditional node selected, read back from the
    /// execution's result map.
    pub fn selected_branch<'e>(
        &self,
        exec: &'e WorkflowExecution,
        node_id: &str,
    ) -> Option<&'e str> {
        exec.results
            .get(node_id)
            .and_then(|v| v.get(SELECTED_BRANCH_KEY))
            .and_then(|v| v.as_str())
    }

    /// The edges a finished run actually traversed: both endpoints completed,
    /// and for conditional sources the edge lies on the selected branch.
    ///
    /// This is the same computation a client performs to highlight taken
    /// edges in the editor, exposed here as a read model.
    pub fn traversed_edges(&self, exec: &WorkflowExecution) -> Vec<&PlanEdge> {
        let completed: HashSet<&str> =
            exec.completed_steps.iter().map(String::as_str).collect();

        self.edges
            .iter()
            .filter(|e| {
                if !completed.contains(e.source.as_str())
                    || !completed.contains(e.target.as_str())
                {
                    return false;
                }
                match self.nodes.get(&e.source) {
                    Some(n) if n.kind.is_conditional() => {
                        self.selected_branch(exec, &e.source) == Some(e.branch.as_str())
                    }
                    Some(_) => true,
                    None => false,
                }
            })
            .collect()
    }
}

// ---------------------------------------------------------------------------
// compile
// ---------------------------------------------------------------------------

/// Validate `workflow` and lower it into an [`ExecutionPlan`].
///
/// All validation failures are collected; the caller gets the complete list
/// rather than the first hit.
pub fn compile(workflow: &WorkflowDefinition) -> Result<ExecutionPlan, Vec<ValidationError>> {
    let mut errors = Vec::new();

    // -----------------------------------------------------------------------
    // Node arena; duplicate IDs rejected.
    // -----------------------------------------------------------------------
    let mut nodes: HashMap<NodeId, NodeDefinition> = HashMap::new();
    let mut node_order: Vec<NodeId> = Vec::with_capacity(workflow.nodes.len());
    for node in &workflow.nodes {
        if nodes.insert(node.id.clone(), node.clone()).is_some() {
            errors.push(ValidationError::DuplicateNodeId(node.id.clone()));
        } else {
            node_order.push(node.id.clone());
        }
    }

    // -----------------------------------------------------------------------
    // Triggers.
    // -----------------------------------------------------------------------
    let triggers: Vec<NodeId> = node_order
        .iter()
        .filter(|id| nodes[*id].kind == NodeKind::Trigger)
        .cloned()
        .collect();
    if triggers.is_empty() {
        errors.push(ValidationError::NoTrigger);
    }

    // -----------------------------------------------------------------------
    // Lower connections to edges; dangling references rejected.
    // -----------------------------------------------------------------------
    let mut edges: Vec<PlanEdge> = Vec::new();
    let mut outgoing: HashMap<NodeId, BTreeMap<BranchTag, Vec<usize>>> = HashMap::new();
    let mut incoming: HashMap<NodeId, Vec<usize>> = HashMap::new();

    for (source, groups) in &workflow.connections {
        if !nodes.contains_key(source) {
            errors.push(ValidationError::UnknownNode {
                node_id: source.clone(),
                side: "source",
            });
            continue;
        }
        for (branch, conns) in groups {
            for conn in conns {
                if !nodes.contains_key(&conn.node) {
                    errors.push(ValidationError::UnknownNode {
                        node_id: conn.node.clone(),
                        side: "target",
                    });
                    continue;
                }
                let idx = edges.len();
                edges.push(PlanEdge {
                    source: source.clone(),
                    branch: branch.clone(),
                    target: conn.node.clone(),
                    input_index: conn.input_index,
                    label: conn.label.clone(),
                });
                outgoing
                    .entry(source.clone())
                    .or_default()
                    .entry(branch.clone())
                    .or_default()
                    .push(idx);
                incoming.entry(conn.node.clone()).or_default().push(idx);
            }
        }
    }

    // -----------------------------------------------------------------------
    // Conditional nodes need somewhere to route to.
    // -----------------------------------------------------------------------
    for id in &node_order {
        let node = &nodes[id];
        if node.kind.is_conditional() {
            let has_group = workflow
                .connections
                .get(id)
                .map(|g| !g.is_empty())
                .unwrap_or(false);
            if !has_group {
                errors.push(ValidationError::ConditionalWithoutBranches(id.clone()));
            }
        }
    }

    // -----------------------------------------------------------------------
    // Cycle detection: DFS coloring (white/gray/black) over the arena.
    // -----------------------------------------------------------------------
    #[derive(Clone, Copy, PartialEq)]
    enum Color {
        White,
        Gray,
        Black,
    }

    let mut color: HashMap<&str, Color> =
        node_order.iter().map(|id| (id.as_str(), Color::White)).collect();

    // Iterative DFS; a gray successor is a back-edge.
    for start in &node_order {
        if color[start.as_str()] != Color::White {
            continue;
        }
        let mut stack: Vec<(&str, usize)> = vec![(start.as_str(), 0)];
        color.insert(start.as_str(), Color::Gray);
        'dfs: while let Some((node_id, child)) = stack.pop() {
            let succ: Vec<&str> = outgoing
                .get(node_id)
                .into_iter()
                .flat_map(|g| g.values())
                .flatten()
                .map(|&i| edges[i].target.as_str())
                .collect();
            for (pos, &next) in succ.iter().enumerate().skip(child) {
                match color[next] {
                    Color::Gray => {
                        errors.push(ValidationError::CycleDetected(next.to_string()));
                        break 'dfs;
                    }
                    Color::White => {
                        stack.push((node_id, pos + 1));
                        stack.push((next, 0));
                        color.insert(next, Color::Gray);
                        continue 'dfs;
                    }
                    Color::Black => {}
                }
            }
            color.insert(node_id, Color::Black);
        }
    }

    if !errors.is_empty() {
        return Err(errors);
    }

    // -----------------------------------------------------------------------
    // Reachability from triggers; unreachable non-triggers are warnings.
    // -----------------------------------------------------------------------
    let mut reached: HashSet<&str> = HashSet::new();
    let mut queue: VecDeque<&str> = triggers.iter().map(String::as_str).collect();
    reached.extend(queue.iter().copied());
    while let Some(id) = queue.pop_front() {
        if let Some(groups) = outgoing.get(id) {
            for &idx in groups.values().flatten() {
                let target = edges[idx].target.as_str();
                if reached.insert(target) {
                    queue.push_back(target);
                }
            }
        }
    }

    let warnings: Vec<ValidationWarning> = node_order
        .iter()
        .filter(|id| {
            !reached.contains(id.as_str()) && nodes[id.as_str()].kind != NodeKind::Trigger
        })
        .map(|id| ValidationWarning::UnreachableNode(id.clone()))
        .collect();

    Ok(ExecutionPlan {
        nodes,
        node_order,
        edges,
        outgoing,
        incoming,
        triggers,
        warnings,
    })
}

/// Pure validation for the control surface: compile and throw away the plan.
pub fn validate(workflow: &WorkflowDefinition) -> ValidationReport {
    match compile(workflow) {
        Ok(plan) => ValidationReport {
            valid: true,
            errors: Vec::new(),
            warnings: plan.warnings.clone(),
        },
        Err(errors) => ValidationReport {
            valid: false,
            errors,
            warnings: Vec::new(),
        },
    }
}

// ---------------------------------------------------------------------------
// decompile
// ---------------------------------------------------------------------------

/// Rebuild the editor representation from a plan.
///
/// Node set, connection set and branch tags survive the round trip; this is
/// what the editor loads when a user opens a workflow that only exists in
/// compiled form.
pub fn decompile(plan: &ExecutionPlan) -> (Vec<NodeDefinition>, ConnectionMap) {
    let nodes: Vec<NodeDefinition> = plan
        .node_order
        .iter()
        .map(|id| plan.nodes[id].clone())
        .collect();

    let mut connections = ConnectionMap::new();
    for (source, groups) in &plan.outgoing {
        let entry = connections.entry(source.clone()).or_default();
        for (branch, idxs) in groups {
            let conns: Vec<Connection> = idxs
                .iter()
                .map(|&i| {
                    let e = &plan.edges[i];
                    Connection {
                        node: e.target.clone(),
                        input_index: e.input_index,
                        label: e.label.clone(),
                    }
                })
                .collect();
            entry.insert(branch.clone(), conns);
        }
    }

    (nodes, connections)
}
