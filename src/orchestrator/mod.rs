//! Scenario lifecycle manager - creates scenarios, enqueues runs and exposes
//! the read side, with the store as the single source of truth.

pub mod lifecycle;

use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use crate::config::RunnerConfig;
use crate::runner::{RunJob, TaskRunner};
use crate::db::{create_connection, ensure_schema, DatabaseConfig, ScenarioStore};
use crate::error::{ScenarioError, ScenarioResult};
use crate::executor::{DemoExecutor, ScenarioExecutor};
use crate::model::{timestamp_now, JsonMap, Scenario, Task};
use crate::query::ScenarioQueries;
use crate::types::{ScenarioId, TaskId};

/// Owns the state machine of scenarios and their execution tasks.
///
/// Holds no authoritative in-memory state: every read and write goes through
/// the store, so several processes sharing one database observe the same
/// lifecycle.
pub struct Orchestrator {
    store: ScenarioStore,
    queries: ScenarioQueries,
    runner: TaskRunner,
}

impl Orchestrator {
    /// Connect to the database, create the schema and start the worker pool
    /// with the placeholder executor.
    pub async fn new(db_config: DatabaseConfig, runner_config: RunnerConfig) -> ScenarioResult<Self> {
        let db = create_connection(db_config).await?;
        ensure_schema(&db).await?;

        let executor = Arc::new(DemoExecutor::new(runner_config.executor_delay()));
        Ok(Self::with_executor(
            ScenarioStore::new(db),
            executor,
            &runner_config,
        ))
    }

    /// Build an orchestrator over an existing store and a custom executor.
    pub fn with_executor(
        store: ScenarioStore,
        executor: Arc<dyn ScenarioExecutor>,
        runner_config: &RunnerConfig,
    ) -> Self {
        let runner = TaskRunner::new(store.clone(), executor, runner_config);
        Self {
            queries: ScenarioQueries::new(store.clone()),
            store,
            runner,
        }
    }

    /// Persist a new `pending` scenario. `config` defaults to an empty mapping.
    pub async fn create_scenario(
        &self,
        name: &str,
        config: Option<JsonMap>,
    ) -> ScenarioResult<Scenario> {
        if name.trim().is_empty() {
            return Err(ScenarioError::Validation(
                "Scenario name must not be empty".to_string(),
            ));
        }

        let scenario = Scenario::new_pending(
            name.to_string(),
            config.unwrap_or_default(),
            timestamp_now(),
        );
        self.store.save_scenario(&scenario).await?;

        info!("Created scenario {} ('{}')", scenario.id, scenario.name);
        Ok(scenario)
    }

    /// Record a new `pending` task for the scenario and hand it to the runner.
    ///
    /// Returns once the task row is stored and the job is queued; execution
    /// outcome is only observable by polling `get_task`. Never waits for a
    /// worker: if the queue is full the task is marked failed and a
    /// `Storage` error is returned. Re-running a scenario is allowed, each
    /// call yielding an independent task.
    pub async fn enqueue_run(&self, scenario_id: &ScenarioId) -> ScenarioResult<Task> {
        let scenario = self.queries.get_scenario(scenario_id).await?;

        let task = Task::new_pending(scenario.id.clone(), timestamp_now());
        self.store.save_task(&task).await?;

        let job = RunJob {
            task_id: task.task_id.clone(),
            scenario,
        };
        if let Err(e) = self.runner.submit(job) {
            // Do not leave a task that nobody will ever pick up.
            lifecycle::fail_run(&self.store, &task, e.to_string()).await?;
            return Err(e);
        }

        info!("Queued task {} for scenario {}", task.task_id, task.scenario_id);
        Ok(task)
    }

    pub async fn get_scenario(&self, id: &ScenarioId) -> ScenarioResult<Scenario> {
        self.queries.get_scenario(id).await
    }

    pub async fn get_task(&self, task_id: &TaskId) -> ScenarioResult<Task> {
        self.queries.get_task(task_id).await
    }

    pub async fn list_tasks(&self, scenario_id: &ScenarioId) -> ScenarioResult<Vec<Task>> {
        self.queries.list_tasks(scenario_id).await
    }

    /// Poll a task until it reaches `finished` or `failed`.
    pub async fn wait_for_task(
        &self,
        task_id: &TaskId,
        poll_interval: Duration,
    ) -> ScenarioResult<Task> {
        loop {
            let task = self.get_task(task_id).await?;
            if task.status.is_terminal() {
                return Ok(task);
            }
            tokio::time::sleep(poll_interval).await;
        }
    }

    /// Create, run and wait for a scenario in one blocking call.
    ///
    /// Returns the final scenario record whether the run finished or failed;
    /// a failed run is visible through its `status`.
    pub async fn run_to_completion(
        &self,
        name: &str,
        config: Option<JsonMap>,
        poll_interval: Duration,
    ) -> ScenarioResult<Scenario> {
        let scenario = self.create_scenario(name, config).await?;
        let task = self.enqueue_run(&scenario.id).await?;
        self.wait_for_task(&task.task_id, poll_interval).await?;
        self.get_scenario(&scenario.id).await
    }

    /// Get reference to the store.
    pub fn store(&self) -> &ScenarioStore {
        &self.store
    }

    /// Stop the worker pool after the queued runs complete.
    pub async fn shutdown(self) {
        self.runner.shutdown().await;
    }
}
