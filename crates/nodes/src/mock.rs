//! `MockNode` — a scripted test double for `NodeExecutor`.
//!
//! Useful in unit and integration tests where a real node implementation is
//! either unavailable or irrelevant.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::traits::{ExecutionContext, NodeExecutor, SELECTED_BRANCH_KEY};
use crate::NodeError;

/// One step of a mock's script.
#[derive(Debug, Clone)]
pub enum MockBehaviour {
    /// Return `{"node": <node id>}` merged with the given object.
    ReturnValue(Value),
    /// Select a branch tag (for condition/switch nodes).
    SelectBranch(String),
    /// Fail with a `Retryable` error.
    FailRetryable(String),
    /// Fail with a `Fatal` error.
    FailFatal(String),
    /// Sleep, then return the given value (for pause-timing tests).
    Delay(Duration, Value),
}

/// A mock node that records every call it receives and plays back a script
/// of behaviours, one per call. The last behaviour repeats once the script
/// is exhausted.
pub struct MockNode {
    script: Mutex<Vec<MockBehaviour>>,
    position: Mutex<usize>,
    /// All inputs seen by this node (in call order).
    pub calls: Arc<Mutex<Vec<Value>>>,
}

impl MockNode {
    pub fn scripted(script: Vec<MockBehaviour>) -> Self {
        assert!(!script.is_empty(), "mock script must not be empty");
        Self {
            script: Mutex::new(script),
            position: Mutex::new(0),
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Always succeed with the given value.
    pub fn returning(value: Value) -> Self {
        Self::scripted(vec![MockBehaviour::ReturnValue(value)])
    }

    /// Always fail with a `Retryable` error.
    pub fn failing_retryable(msg: impl Into<String>) -> Self {
        Self::scripted(vec![MockBehaviour::FailRetryable(msg.into())])
    }

    /// Always fail with a `Fatal` error.
    pub fn failing_fatal(msg: impl Into<String>) -> Self {
        Self::scripted(vec![MockBehaviour::FailFatal(msg.into())])
    }

    /// Always select the given branch.
    pub fn selecting_branch(tag: impl Into<String>) -> Self {
        Self::scripted(vec![MockBehaviour::SelectBranch(tag.into())])
    }

    /// Fail `failures` times with retryable errors, then succeed.
    pub fn flaky(failures: usize, then: Value) -> Self {
        let mut script = vec![
            MockBehaviour::FailRetryable("transient failure".into());
            failures
        ];
        script.push(MockBehaviour::ReturnValue(then));
        Self::scripted(script)
    }

    /// Number of times this node has been executed.
    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl NodeExecutor for MockNode {
    async fn execute(
        &self,
        _parameters: &Value,
        input: Value,
        ctx: &ExecutionContext,
    ) -> Result<Value, NodeError> {
        self.calls.lock().unwrap().push(input.clone());

        let behaviour = {
            let script = self.script.lock().unwrap();
            let mut position = self.position.lock().unwrap();
            let idx = (*position).min(script.len() - 1);
            *position += 1;
            script[idx].clone()
        };

        match behaviour {
            MockBehaviour::ReturnValue(v) => {
                // Tag the output with the executing node so tests can trace
                // data flowing through the pipeline.
                let mut out = json!({ "node": ctx.node_id });
                if let (Some(out_obj), Some(v_obj)) = (out.as_object_mut(), v.as_object()) {
                    for (k, val) in v_obj {
                        out_obj.insert(k.clone(), val.clone());
                    }
                }
                Ok(out)
            }
            MockBehaviour::SelectBranch(tag) => {
                Ok(json!({ SELECTED_BRANCH_KEY: tag, "node": ctx.node_id }))
            }
            MockBehaviour::FailRetryable(msg) => Err(NodeError::Retryable(msg)),
            MockBehaviour::FailFatal(msg) => Err(NodeError::Fatal(msg)),
            MockBehaviour::Delay(duration, v) => {
                tokio::time::sleep(duration).await;
                Ok(v)
            }
        }
    }
}

// ============================================================
// Unit tests
// ============================================================
#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(node_id: &str) -> ExecutionContext {
        ExecutionContext {
            workflow_id: uuid::Uuid::new_v4(),
            execution_id: uuid::Uuid::new_v4(),
            node_id: node_id.into(),
            trigger: json!({}),
        }
    }

    #[tokio::test]
    async fn flaky_mock_fails_then_succeeds() {
        let node = MockNode::flaky(2, json!({ "done": true }));
        let c = ctx("flaky");

        for _ in 0..2 {
            let err = node.execute(&Value::Null, json!({}), &c).await.unwrap_err();
            assert!(matches!(err, NodeError::Retryable(_)));
        }
        let out = node.execute(&Value::Null, json!({}), &c).await.unwrap();
        assert_eq!(out["done"], true);
        assert_eq!(node.call_count(), 3);
    }

    #[tokio::test]
    async fn returning_mock_tags_output_with_node_id() {
        let node = MockNode::returning(json!({ "step": 1 }));
        let out = node
            .execute(&Value::Null, json!({}), &ctx("node_a"))
            .await
            .unwrap();
        assert_eq!(out["node"], "node_a");
        assert_eq!(out["step"], 1);
    }

    #[tokio::test]
    async fn branch_mock_sets_selected_branch_key() {
        let node = MockNode::selecting_branch("a");
        let out = node
            .execute(&Value::Null, json!({}), &ctx("switch"))
            .await
            .unwrap();
        assert_eq!(out[SELECTED_BRANCH_KEY], "a");
    }
}
