//! Built-in node executors.
//!
//! Conditionals implement a single predicate per branch — `field`/`op`/
//! `value` against the incoming data — which is all the routing model
//! supports by design; there is no expression language.

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::traits::{ExecutionContext, NodeExecutor, SELECTED_BRANCH_KEY};
use crate::NodeError;

/// Dot-path lookup into a JSON value (`"user.plan"`).
fn lookup<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = value;
    for key in path.split('.') {
        current = current.get(key)?;
    }
    Some(current)
}

fn required_str<'a>(parameters: &'a Value, key: &str) -> Result<&'a str, NodeError> {
    parameters
        .get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| NodeError::Fatal(format!("missing '{key}' parameter")))
}

// ---------------------------------------------------------------------------
// TriggerNode
// ---------------------------------------------------------------------------

/// Trigger intake: hands the trigger payload on unchanged.
pub struct TriggerNode;

#[async_trait]
impl NodeExecutor for TriggerNode {
    async fn execute(
        &self,
        _parameters: &Value,
        input: Value,
        _ctx: &ExecutionContext,
    ) -> Result<Value, NodeError> {
        Ok(input)
    }
}

// ---------------------------------------------------------------------------
// PassthroughNode
// ---------------------------------------------------------------------------

/// Default `action` executor: forwards its input untouched.
pub struct PassthroughNode;

#[async_trait]
impl NodeExecutor for PassthroughNode {
    async fn execute(
        &self,
        _parameters: &Value,
        input: Value,
        _ctx: &ExecutionContext,
    ) -> Result<Value, NodeError> {
        Ok(input)
    }
}

// ---------------------------------------------------------------------------
// ConditionNode
// ---------------------------------------------------------------------------

/// Two-way router. Parameters: `field` (dot path), `op`
/// (`eq | ne | gt | lt | exists`) and, except for `exists`, `value`.
/// Selects branch `"true"` or `"false"`.
pub struct ConditionNode;

#[async_trait]
impl NodeExecutor for ConditionNode {
    async fn execute(
        &self,
        parameters: &Value,
        input: Value,
        _ctx: &ExecutionContext,
    ) -> Result<Value, NodeError> {
        let field = required_str(parameters, "field")?;
        let op = parameters.get("op").and_then(Value::as_str).unwrap_or("eq");
        let actual = lookup(&input, field);

        let holds = match op {
            "exists" => actual.is_some(),
            "eq" | "ne" => {
                let expected = parameters
                    .get("value")
                    .ok_or_else(|| NodeError::Fatal("missing 'value' parameter".into()))?;
                let equal = actual == Some(expected);
                if op == "eq" {
                    equal
                } else {
                    !equal
                }
            }
            "gt" | "lt" => {
                let expected = parameters
                    .get("value")
                    .and_then(Value::as_f64)
                    .ok_or_else(|| NodeError::Fatal("'value' must be a number".into()))?;
                match actual.and_then(Value::as_f64) {
                    Some(n) if op == "gt" => n > expected,
                    Some(n) => n < expected,
                    None => false,
                }
            }
            other => {
                return Err(NodeError::Fatal(format!("unknown condition op '{other}'")));
            }
        };

        let branch = if holds { "true" } else { "false" };
        tracing::debug!(field, op, branch, "condition evaluated");
        Ok(json!({ SELECTED_BRANCH_KEY: branch, "value": input }))
    }
}

// ---------------------------------------------------------------------------
// SwitchNode
// ---------------------------------------------------------------------------

/// N-way router. Parameters: `field` (dot path), `cases` (array of strings),
/// optional `default` case. The field's string value selects the branch.
pub struct SwitchNode;

#[async_trait]
impl NodeExecutor for SwitchNode {
    async fn execute(
        &self,
        parameters: &Value,
        input: Value,
        _ctx: &ExecutionContext,
    ) -> Result<Value, NodeError> {
        let field = required_str(parameters, "field")?;
        let cases = parameters
            .get("cases")
            .and_then(Value::as_array)
            .ok_or_else(|| NodeError::Fatal("missing 'cases' parameter".into()))?;

        let actual = lookup(&input, field).and_then(Value::as_str);

        let matched = actual.filter(|v| {
            cases
                .iter()
                .any(|c| c.as_str().map(|s| s == *v).unwrap_or(false))
        });

        let branch = match matched {
            Some(case) => case.to_string(),
            None => match parameters.get("default").and_then(Value::as_str) {
                Some(default) => default.to_string(),
                None => {
                    return Err(NodeError::Fatal(format!(
                        "no case matched field '{field}' and no default given"
                    )));
                }
            },
        };

        tracing::debug!(field, branch = branch.as_str(), "switch case selected");
        Ok(json!({ SELECTED_BRANCH_KEY: branch, "value": input }))
    }
}
