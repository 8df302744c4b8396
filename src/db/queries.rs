// Persistence store for scenario and task records.
//
// The store is pure storage: no status checks, no business rules. Every call
// is a single round-trip to SurrealDB, so the database stays the only source
// of truth for every caller (API process, CLI process, background workers).

use tracing::debug;

use crate::db::schema::{ScenarioRow, TaskRow};
use crate::db::Db;
use crate::error::{ScenarioError, ScenarioResult};
use crate::model::{Scenario, Task};
use crate::types::{ScenarioId, TaskId};

/// Handle to the `scenario` and `task` tables. Cheap to clone.
#[derive(Clone)]
pub struct ScenarioStore {
    db: Db,
}

impl ScenarioStore {
    pub fn new(db: Db) -> Self {
        Self { db }
    }

    pub fn db(&self) -> &Db {
        &self.db
    }

    /// Insert a new scenario row. Fails if the id already exists.
    pub async fn save_scenario(&self, scenario: &Scenario) -> ScenarioResult<()> {
        let row = ScenarioRow::encode(scenario)?;

        self.db
            .query("CREATE type::thing('scenario', $id) CONTENT $row RETURN NONE")
            .bind(("id", row.scenario_id.clone()))
            .bind(("row", row))
            .await?
            .check()?;

        debug!("Saved scenario {}", scenario.id);
        Ok(())
    }

    pub async fn get_scenario(&self, id: &ScenarioId) -> ScenarioResult<Option<Scenario>> {
        let mut res = self
            .db
            .query(
                r#"
                SELECT scenario_id, name, status, config, result, started_at, finished_at
                FROM scenario
                WHERE scenario_id = $id
                LIMIT 1
                "#,
            )
            .bind(("id", id.as_str().to_string()))
            .await?;

        let rows: Vec<ScenarioRow> = res.take(0)?;
        rows.into_iter().next().map(ScenarioRow::decode).transpose()
    }

    /// Replace the full scenario row. Fails with `NotFound` if it does not exist.
    pub async fn update_scenario(&self, scenario: &Scenario) -> ScenarioResult<()> {
        let row = ScenarioRow::encode(scenario)?;

        let mut res = self
            .db
            .query(
                "UPDATE type::thing('scenario', $id) CONTENT $row RETURN scenario_id",
            )
            .bind(("id", row.scenario_id.clone()))
            .bind(("row", row))
            .await?;

        // UPDATE on a missing record id writes nothing and returns no rows.
        let written: Vec<serde_json::Value> = res.take(0)?;
        if written.is_empty() {
            return Err(ScenarioError::scenario_not_found(scenario.id.as_str()));
        }
        Ok(())
    }

    /// Insert a new task row. Fails if the id already exists.
    pub async fn save_task(&self, task: &Task) -> ScenarioResult<()> {
        let row = TaskRow::encode(task);

        self.db
            .query("CREATE type::thing('task', $id) CONTENT $row RETURN NONE")
            .bind(("id", row.task_id.clone()))
            .bind(("row", row))
            .await?
            .check()?;

        debug!("Saved task {} for scenario {}", task.task_id, task.scenario_id);
        Ok(())
    }

    pub async fn get_task(&self, task_id: &TaskId) -> ScenarioResult<Option<Task>> {
        let mut res = self
            .db
            .query(
                r#"
                SELECT task_id, scenario_id, status, error, created_at, started_at, finished_at
                FROM task
                WHERE task_id = $id
                LIMIT 1
                "#,
            )
            .bind(("id", task_id.as_str().to_string()))
            .await?;

        let rows: Vec<TaskRow> = res.take(0)?;
        rows.into_iter().next().map(TaskRow::decode).transpose()
    }

    /// Replace the full task row. Fails with `NotFound` if it does not exist.
    pub async fn update_task(&self, task: &Task) -> ScenarioResult<()> {
        let row = TaskRow::encode(task);

        let mut res = self
            .db
            .query("UPDATE type::thing('task', $id) CONTENT $row RETURN task_id")
            .bind(("id", row.task_id.clone()))
            .bind(("row", row))
            .await?;

        let written: Vec<serde_json::Value> = res.take(0)?;
        if written.is_empty() {
            return Err(ScenarioError::task_not_found(task.task_id.as_str()));
        }
        Ok(())
    }

    /// All tasks recorded for a scenario, oldest first.
    pub async fn list_tasks(&self, scenario_id: &ScenarioId) -> ScenarioResult<Vec<Task>> {
        let mut res = self
            .db
            .query(
                r#"
                SELECT task_id, scenario_id, status, error, created_at, started_at, finished_at
                FROM task
                WHERE scenario_id = $scenario_id
                ORDER BY created_at ASC
                "#,
            )
            .bind(("scenario_id", scenario_id.as_str().to_string()))
            .await?;

        let rows: Vec<TaskRow> = res.take(0)?;
        rows.into_iter().map(TaskRow::decode).collect()
    }

    /// Delete every scenario and task row.
    pub async fn clear(&self) -> ScenarioResult<()> {
        self.db.query("DELETE task; DELETE scenario;").await?.check()?;
        Ok(())
    }
}
