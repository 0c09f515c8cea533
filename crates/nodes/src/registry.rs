//! Maps node kind strings to `NodeExecutor` implementations.

use std::collections::HashMap;
use std::sync::Arc;

use crate::builtin::{ConditionNode, PassthroughNode, SwitchNode, TriggerNode};
use crate::NodeExecutor;

/// Kind string -> boxed executor. The engine looks nodes up here at each
/// step; an unregistered kind fails the step fatally.
#[derive(Default)]
pub struct NodeRegistry {
    executors: HashMap<String, Arc<dyn NodeExecutor>>,
}

impl NodeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the built-in executors: `trigger`, `condition`,
    /// `switch` and a passthrough `action`. `ai-agent` has no builtin; an
    /// integration registers its own.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register("trigger", Arc::new(TriggerNode));
        registry.register("action", Arc::new(PassthroughNode));
        registry.register("condition", Arc::new(ConditionNode));
        registry.register("switch", Arc::new(SwitchNode));
        registry
    }

    pub fn register(&mut self, kind: impl Into<String>, executor: Arc<dyn NodeExecutor>) {
        self.executors.insert(kind.into(), executor);
    }

    pub fn get(&self, kind: &str) -> Option<Arc<dyn NodeExecutor>> {
        self.executors.get(kind).cloned()
    }
}
