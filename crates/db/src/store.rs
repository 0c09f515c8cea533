//! `SqliteStore` — the `ExecutionStore` implementation behind `serve`.

use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;
use uuid::Uuid;

use engine::models::{WebhookAuth, WebhookBinding};
use engine::{ExecutionStore, StepLog, StoreError, WorkflowDefinition, WorkflowExecution};

use crate::models::{BindingRow, ExecutionRow, StepLogRow, WorkflowRow};
use crate::pool::DbPool;

/// SQLite-backed persistence adapter.
pub struct SqliteStore {
    pool: DbPool,
}

impl SqliteStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn map_sqlx(e: sqlx::Error) -> StoreError {
    match &e {
        sqlx::Error::RowNotFound => StoreError::NotFound,
        sqlx::Error::Database(db) if db.is_unique_violation() => {
            StoreError::Conflict(db.message().to_string())
        }
        _ => StoreError::Backend(e.to_string()),
    }
}

fn to_json<T: Serialize>(value: &T) -> Result<String, StoreError> {
    serde_json::to_string(value).map_err(|e| StoreError::Backend(e.to_string()))
}

fn from_json<T: DeserializeOwned>(text: &str) -> Result<T, StoreError> {
    serde_json::from_str(text).map_err(|e| StoreError::Backend(e.to_string()))
}

fn timestamp(dt: chrono::DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn auth_to_str(auth: WebhookAuth) -> &'static str {
    match auth {
        WebhookAuth::None => "none",
        WebhookAuth::Basic => "basic",
        WebhookAuth::Header => "header",
    }
}

fn auth_from_str(s: &str) -> WebhookAuth {
    match s {
        "basic" => WebhookAuth::Basic,
        "header" => WebhookAuth::Header,
        _ => WebhookAuth::None,
    }
}

// ---------------------------------------------------------------------------
// ExecutionStore impl
// ---------------------------------------------------------------------------

#[async_trait]
impl ExecutionStore for SqliteStore {
    async fn save_workflow(&self, workflow: &WorkflowDefinition) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT OR REPLACE INTO workflows (id, name, definition, created_at)
            VALUES (?, ?, ?, ?)
            "#,
        )
        .bind(workflow.id.to_string())
        .bind(&workflow.name)
        .bind(to_json(workflow)?)
        .bind(timestamp(Utc::now()))
        .execute(&self.pool)
        .await
        .map_err(map_sqlx)?;

        debug!(workflow_id = %workflow.id, "workflow saved");
        Ok(())
    }

    async fn get_workflow(&self, id: Uuid) -> Result<WorkflowDefinition, StoreError> {
        let row = sqlx::query_as::<_, WorkflowRow>(
            "SELECT id, name, definition, created_at FROM workflows WHERE id = ?",
        )
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx)?
        .ok_or(StoreError::NotFound)?;

        from_json(&row.definition)
    }

    async fn list_workflows(&self) -> Result<Vec<WorkflowDefinition>, StoreError> {
        let rows = sqlx::query_as::<_, WorkflowRow>(
            "SELECT id, name, definition, created_at FROM workflows ORDER BY created_at DESC",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx)?;

        rows.iter().map(|r| from_json(&r.definition)).collect()
    }

    async fn delete_workflow(&self, id: Uuid) -> Result<(), StoreError> {
        let result = sqlx::query("DELETE FROM workflows WHERE id = ?")
            .bind(id.to_string())
            .execute(&self.pool)
            .await
            .map_err(map_sqlx)?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    async fn create_execution(&self, execution: &WorkflowExecution) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO executions (id, workflow_id, instance_id, status, record, started_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(execution.id.to_string())
        .bind(execution.workflow_id.to_string())
        .bind(&execution.instance_id)
        .bind(execution.status.to_string())
        .bind(to_json(execution)?)
        .bind(timestamp(execution.started_at))
        .execute(&self.pool)
        .await
        .map_err(map_sqlx)?;
        Ok(())
    }

    async fn update_execution(&self, execution: &WorkflowExecution) -> Result<(), StoreError> {
        let result = sqlx::query("UPDATE executions SET status = ?, record = ? WHERE id = ?")
            .bind(execution.status.to_string())
            .bind(to_json(execution)?)
            .bind(execution.id.to_string())
            .execute(&self.pool)
            .await
            .map_err(map_sqlx)?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    async fn get_execution(&self, id: Uuid) -> Result<WorkflowExecution, StoreError> {
        let row = sqlx::query_as::<_, ExecutionRow>(
            r#"
            SELECT id, workflow_id, instance_id, status, record, started_at
            FROM executions WHERE id = ?
            "#,
        )
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx)?
        .ok_or(StoreError::NotFound)?;

        from_json(&row.record)
    }

    async fn find_execution_by_instance(
        &self,
        workflow_id: Uuid,
        instance_id: &str,
    ) -> Result<Option<WorkflowExecution>, StoreError> {
        let row = sqlx::query_as::<_, ExecutionRow>(
            r#"
            SELECT id, workflow_id, instance_id, status, record, started_at
            FROM executions WHERE workflow_id = ? AND instance_id = ?
            "#,
        )
        .bind(workflow_id.to_string())
        .bind(instance_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx)?;

        row.map(|r| from_json(&r.record)).transpose()
    }

    async fn append_step_log(&self, log: &StepLog) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO step_logs (id, execution_id, node_id, attempt, status, record, started_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(log.id.to_string())
        .bind(log.execution_id.to_string())
        .bind(&log.node_id)
        .bind(log.attempt as i64)
        .bind(log.status.to_string())
        .bind(to_json(log)?)
        .bind(timestamp(log.started_at))
        .execute(&self.pool)
        .await
        .map_err(map_sqlx)?;
        Ok(())
    }

    async fn update_step_log(&self, log: &StepLog) -> Result<(), StoreError> {
        let result = sqlx::query("UPDATE step_logs SET status = ?, record = ? WHERE id = ?")
            .bind(log.status.to_string())
            .bind(to_json(log)?)
            .bind(log.id.to_string())
            .execute(&self.pool)
            .await
            .map_err(map_sqlx)?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    async fn list_step_logs(&self, execution_id: Uuid) -> Result<Vec<StepLog>, StoreError> {
        let rows = sqlx::query_as::<_, StepLogRow>(
            r#"
            SELECT id, execution_id, node_id, attempt, status, record, started_at
            FROM step_logs WHERE execution_id = ?
            ORDER BY started_at ASC, attempt ASC
            "#,
        )
        .bind(execution_id.to_string())
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx)?;

        rows.iter().map(|r| from_json(&r.record)).collect()
    }

    async fn create_binding(&self, binding: &WebhookBinding) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO webhook_bindings (id, workflow_id, path, method, auth)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(binding.id.to_string())
        .bind(binding.workflow_id.to_string())
        .bind(&binding.path)
        .bind(&binding.method)
        .bind(auth_to_str(binding.auth))
        .execute(&self.pool)
        .await
        .map_err(map_sqlx)?;
        Ok(())
    }

    async fn find_binding(
        &self,
        path: &str,
        method: &str,
    ) -> Result<Option<WebhookBinding>, StoreError> {
        let row = sqlx::query_as::<_, BindingRow>(
            r#"
            SELECT id, workflow_id, path, method, auth
            FROM webhook_bindings WHERE path = ? AND method = ?
            "#,
        )
        .bind(path)
        .bind(method)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx)?;

        row.map(|r| {
            Ok(WebhookBinding {
                id: Uuid::parse_str(&r.id).map_err(|e| StoreError::Backend(e.to_string()))?,
                workflow_id: Uuid::parse_str(&r.workflow_id)
                    .map_err(|e| StoreError::Backend(e.to_string()))?,
                path: r.path,
                method: r.method,
                auth: auth_from_str(&r.auth),
            })
        })
        .transpose()
    }
}

// ============================================================
// Integration tests against sqlite::memory:
// ============================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::create_pool;
    use engine::models::{
        ConnectionMap, ExecutionStatus, NodeDefinition, NodeKind, StepStatus, TriggerType,
    };
    use serde_json::json;

    async fn store() -> SqliteStore {
        let pool = create_pool("sqlite::memory:", 1).await.unwrap();
        SqliteStore::new(pool)
    }

    fn workflow() -> WorkflowDefinition {
        WorkflowDefinition::new(
            "wf",
            vec![NodeDefinition::new("start", NodeKind::Trigger)],
            ConnectionMap::new(),
        )
    }

    #[tokio::test]
    async fn workflow_round_trips_through_sqlite() {
        let store = store().await;
        let wf = workflow();
        store.save_workflow(&wf).await.unwrap();

        let loaded = store.get_workflow(wf.id).await.unwrap();
        assert_eq!(loaded.id, wf.id);
        assert_eq!(loaded.nodes.len(), 1);
        assert_eq!(loaded.nodes[0].kind, NodeKind::Trigger);

        store.delete_workflow(wf.id).await.unwrap();
        assert!(matches!(
            store.get_workflow(wf.id).await,
            Err(StoreError::NotFound)
        ));
    }

    #[tokio::test]
    async fn execution_status_updates_persist() {
        let store = store().await;
        let wf = workflow();
        let mut exec = WorkflowExecution::new(
            wf,
            TriggerType::Webhook,
            json!({ "k": "v" }),
            Some("tok".into()),
        );
        store.create_execution(&exec).await.unwrap();

        exec.status = ExecutionStatus::Running;
        exec.completed_steps.push("start".into());
        store.update_execution(&exec).await.unwrap();

        let loaded = store.get_execution(exec.id).await.unwrap();
        assert_eq!(loaded.status, ExecutionStatus::Running);
        assert_eq!(loaded.completed_steps, ["start"]);
        assert_eq!(loaded.trigger_payload, json!({ "k": "v" }));

        let found = store
            .find_execution_by_instance(exec.workflow_id, "tok")
            .await
            .unwrap();
        assert_eq!(found.map(|e| e.id), Some(exec.id));
    }

    #[tokio::test]
    async fn step_logs_keep_attempt_order() {
        let store = store().await;
        let wf = workflow();
        let exec = WorkflowExecution::new(wf, TriggerType::Manual, json!({}), None);
        store.create_execution(&exec).await.unwrap();

        let node = NodeDefinition::new("flaky", NodeKind::Action);
        for attempt in 1..=3u32 {
            let mut log = StepLog::start(exec.id, &node, attempt, Some(json!({})));
            log.finish(if attempt < 3 {
                StepStatus::Retrying
            } else {
                StepStatus::Error
            });
            store.append_step_log(&log).await.unwrap();
        }

        let logs = store.list_step_logs(exec.id).await.unwrap();
        assert_eq!(logs.len(), 3);
        assert_eq!(logs.iter().map(|l| l.attempt).collect::<Vec<_>>(), [1, 2, 3]);
        assert_eq!(logs[2].status, StepStatus::Error);
    }

    #[tokio::test]
    async fn binding_uniqueness_is_enforced_by_the_unique_index() {
        let store = store().await;
        let wf = workflow();
        store
            .create_binding(&WebhookBinding::new(wf.id, "orders", "POST"))
            .await
            .unwrap();

        let err = store
            .create_binding(&WebhookBinding::new(wf.id, "orders", "POST"))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));

        let found = store.find_binding("orders", "POST").await.unwrap().unwrap();
        assert_eq!(found.workflow_id, wf.id);
        assert_eq!(found.auth, WebhookAuth::None);
    }

    #[tokio::test]
    async fn updating_a_missing_execution_is_not_found() {
        let store = store().await;
        let wf = workflow();
        let exec = WorkflowExecution::new(wf, TriggerType::Manual, json!({}), None);
        assert!(matches!(
            store.update_execution(&exec).await,
            Err(StoreError::NotFound)
        ));
    }
}
