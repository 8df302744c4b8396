//! Read-only lookups shared by the REST API and the CLI.

use crate::db::ScenarioStore;
use crate::error::{ScenarioError, ScenarioResult};
use crate::model::{Scenario, Task};
use crate::types::{ScenarioId, TaskId};

/// Pass-through reads that turn a missing row into `ScenarioError::NotFound`.
#[derive(Clone)]
pub struct ScenarioQueries {
    store: ScenarioStore,
}

impl ScenarioQueries {
    pub fn new(store: ScenarioStore) -> Self {
        Self { store }
    }

    pub async fn get_scenario(&self, id: &ScenarioId) -> ScenarioResult<Scenario> {
        self.store
            .get_scenario(id)
            .await?
            .ok_or_else(|| ScenarioError::scenario_not_found(id.as_str()))
    }

    pub async fn get_task(&self, task_id: &TaskId) -> ScenarioResult<Task> {
        self.store
            .get_task(task_id)
            .await?
            .ok_or_else(|| ScenarioError::task_not_found(task_id.as_str()))
    }

    /// Run history of a scenario, oldest task first.
    pub async fn list_tasks(&self, scenario_id: &ScenarioId) -> ScenarioResult<Vec<Task>> {
        // Distinguish "unknown scenario" from "never run".
        self.get_scenario(scenario_id).await?;
        self.store.list_tasks(scenario_id).await
    }
}
