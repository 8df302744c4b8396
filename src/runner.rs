// Background execution of scenario runs on a bounded worker pool.
//
// Jobs are handed over through a bounded channel; the only thing a worker
// reports back is what it writes to the store. Callers learn about progress
// by polling the task record.

use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;

use crate::config::RunnerConfig;
use crate::db::ScenarioStore;
use crate::error::{ScenarioError, ScenarioResult};
use crate::executor::ScenarioExecutor;
use crate::model::{Scenario, Task};
use crate::orchestrator::lifecycle;
use crate::types::TaskId;

/// One queued execution: the task to drive and the scenario it runs.
#[derive(Debug, Clone)]
pub struct RunJob {
    pub task_id: TaskId,
    pub scenario: Scenario,
}

pub struct TaskRunner {
    sender: mpsc::Sender<RunJob>,
    workers: Vec<JoinHandle<()>>,
}

impl TaskRunner {
    /// Spawn the worker pool. Must be called from within a tokio runtime.
    pub fn new(
        store: ScenarioStore,
        executor: Arc<dyn ScenarioExecutor>,
        config: &RunnerConfig,
    ) -> Self {
        let (sender, receiver) = mpsc::channel::<RunJob>(config.queue_capacity.max(1));
        let receiver = Arc::new(Mutex::new(receiver));

        let workers = (0..config.workers.max(1))
            .map(|worker_id| {
                let receiver = receiver.clone();
                let store = store.clone();
                let executor = executor.clone();

                tokio::spawn(async move {
                    Self::worker_loop(worker_id, receiver, store, executor).await;
                })
            })
            .collect();

        Self { sender, workers }
    }

    /// Queue a job without waiting.
    ///
    /// Fails with a `Storage` error when the queue is full or the pool has
    /// been shut down; the caller decides what happens to the job's task.
    pub fn submit(&self, job: RunJob) -> ScenarioResult<()> {
        let task_id = job.task_id.clone();
        self.sender.try_send(job).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => ScenarioError::Storage(format!(
                "task queue is full, task {} was not queued",
                task_id
            )),
            mpsc::error::TrySendError::Closed(_) => ScenarioError::Storage(format!(
                "task runner is shut down, task {} was not queued",
                task_id
            )),
        })
    }

    /// Stop accepting jobs and wait for queued ones to drain.
    pub async fn shutdown(self) {
        drop(self.sender);
        for worker in self.workers {
            if let Err(e) = worker.await {
                tracing::error!("Worker exited abnormally: {}", e);
            }
        }
    }

    async fn worker_loop(
        worker_id: usize,
        receiver: Arc<Mutex<mpsc::Receiver<RunJob>>>,
        store: ScenarioStore,
        executor: Arc<dyn ScenarioExecutor>,
    ) {
        tracing::debug!("Worker {} started", worker_id);

        loop {
            // Hold the lock only while waiting for the next job.
            let job = {
                let mut rx = receiver.lock().await;
                rx.recv().await
            };

            let Some(job) = job else {
                break;
            };

            tracing::debug!("Worker {} picked up task {}", worker_id, job.task_id);
            if let Err(e) = Self::process(&store, executor.clone(), job).await {
                tracing::error!("Worker {} could not record task outcome: {}", worker_id, e);
            }
        }

        tracing::debug!("Worker {} stopped", worker_id);
    }

    /// Drive one task from `pending` to a terminal state.
    ///
    /// Executor failures (including panics) end in a `failed` task and are
    /// not returned. So does a store failure while recording the result: the
    /// task is then marked failed with the storage error. Only a failure to
    /// write even the failed state is returned.
    pub async fn process(
        store: &ScenarioStore,
        executor: Arc<dyn ScenarioExecutor>,
        job: RunJob,
    ) -> ScenarioResult<Task> {
        let task = match lifecycle::begin_run(store, &job.task_id).await {
            Ok(task) => task,
            Err(e @ ScenarioError::Validation(_)) => return Err(e),
            Err(e) => {
                // The run never started; close the task so pollers are not stuck.
                let pending = lifecycle::with_retry("task read", || store.get_task(&job.task_id))
                    .await?
                    .ok_or_else(|| ScenarioError::task_not_found(job.task_id.as_str()))?;
                return lifecycle::fail_run(store, &pending, e.to_string()).await;
            }
        };

        let name = job.scenario.name.clone();
        let config = job.scenario.config.clone();
        let outcome =
            tokio::task::spawn_blocking(move || executor.execute(&name, &config)).await;

        let error = match outcome {
            Ok(Ok(result)) => match lifecycle::complete_run(store, &task, result).await {
                Ok(done) => return Ok(done),
                Err(e) => format!("could not record result: {}", e),
            },
            Ok(Err(e)) => ScenarioError::Execution(e.to_string()).to_string(),
            Err(join_err) => {
                ScenarioError::Execution(format!("executor panicked: {}", join_err)).to_string()
            }
        };
        lifecycle::fail_run(store, &task, error).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{create_connection, ensure_schema, DatabaseConfig};
    use crate::executor::{DemoExecutor, ExecutionError};
    use crate::model::{timestamp_now, JsonMap};
    use crate::types::RunStatus;
    use std::time::Duration;

    struct FailingExecutor;

    impl ScenarioExecutor for FailingExecutor {
        fn execute(&self, _name: &str, _config: &JsonMap) -> Result<JsonMap, ExecutionError> {
            Err(ExecutionError("malformed config".to_string()))
        }
    }

    struct PanickingExecutor;

    impl ScenarioExecutor for PanickingExecutor {
        fn execute(&self, _name: &str, _config: &JsonMap) -> Result<JsonMap, ExecutionError> {
            panic!("simulation diverged");
        }
    }

    async fn seeded() -> (ScenarioStore, RunJob) {
        let db = create_connection(DatabaseConfig::in_memory()).await.unwrap();
        ensure_schema(&db).await.unwrap();
        let store = ScenarioStore::new(db);

        let scenario = Scenario::new_pending("demo".to_string(), JsonMap::new(), timestamp_now());
        store.save_scenario(&scenario).await.unwrap();
        let task = Task::new_pending(scenario.id.clone(), timestamp_now());
        store.save_task(&task).await.unwrap();

        let job = RunJob {
            task_id: task.task_id,
            scenario,
        };
        (store, job)
    }

    #[tokio::test]
    async fn test_process_success() {
        let (store, job) = seeded().await;
        let executor = Arc::new(DemoExecutor::new(Duration::ZERO));

        let task = TaskRunner::process(&store, executor, job.clone()).await.unwrap();
        assert_eq!(task.status, RunStatus::Finished);

        let scenario = store.get_scenario(&job.scenario.id).await.unwrap().unwrap();
        assert_eq!(scenario.status, RunStatus::Finished);
        assert!(scenario.result.is_some());
    }

    #[tokio::test]
    async fn test_process_executor_error() {
        let (store, job) = seeded().await;

        let task = TaskRunner::process(&store, Arc::new(FailingExecutor), job.clone())
            .await
            .unwrap();
        assert_eq!(task.status, RunStatus::Failed);
        assert!(task.error.unwrap().contains("malformed config"));

        let scenario = store.get_scenario(&job.scenario.id).await.unwrap().unwrap();
        assert_eq!(scenario.status, RunStatus::Failed);
        assert_eq!(scenario.result, None);
    }

    #[tokio::test]
    async fn test_process_executor_panic_is_captured() {
        let (store, job) = seeded().await;

        let task = TaskRunner::process(&store, Arc::new(PanickingExecutor), job)
            .await
            .unwrap();
        assert_eq!(task.status, RunStatus::Failed);
        assert!(task.error.unwrap().contains("panicked"));
    }

    #[tokio::test]
    async fn test_pool_drains_queue_on_shutdown() {
        let (store, job) = seeded().await;
        let config = RunnerConfig {
            workers: 2,
            queue_capacity: 4,
            executor_delay_ms: 0,
        };
        let runner = TaskRunner::new(
            store.clone(),
            Arc::new(DemoExecutor::new(Duration::ZERO)),
            &config,
        );

        runner.submit(job.clone()).unwrap();
        runner.shutdown().await;

        let task = store.get_task(&job.task_id).await.unwrap().unwrap();
        assert_eq!(task.status, RunStatus::Finished);
    }

    #[tokio::test]
    async fn test_submit_rejects_when_queue_full() {
        let (store, job) = seeded().await;
        let config = RunnerConfig {
            workers: 1,
            queue_capacity: 1,
            executor_delay_ms: 0,
        };
        let runner = TaskRunner::new(
            store.clone(),
            Arc::new(DemoExecutor::new(Duration::ZERO)),
            &config,
        );

        // No await between the two calls, so the worker cannot drain the slot.
        runner.submit(job.clone()).unwrap();
        let err = runner.submit(job.clone()).unwrap_err();
        assert_eq!(err.kind(), "StorageError");
        assert!(err.to_string().contains("queue is full"));

        runner.shutdown().await;
        let task = store.get_task(&job.task_id).await.unwrap().unwrap();
        assert_eq!(task.status, RunStatus::Finished);
    }

    #[tokio::test]
    async fn test_task_fails_when_scenario_removed_mid_run() {
        let (store, job) = seeded().await;
        let executor = Arc::new(DemoExecutor::new(Duration::from_millis(200)));

        let worker_store = store.clone();
        let worker_job = job.clone();
        let handle = tokio::spawn(async move {
            TaskRunner::process(&worker_store, executor, worker_job).await
        });

        // Same statement the `reset` command issues against a live database.
        tokio::time::sleep(Duration::from_millis(80)).await;
        store.db().query("DELETE scenario").await.unwrap().check().unwrap();

        let task = handle.await.unwrap().unwrap();
        assert_eq!(task.status, RunStatus::Failed);
        assert!(task.finished_at.is_some());
        assert!(task.error.unwrap().contains("could not record result"));

        let stored = store.get_task(&job.task_id).await.unwrap().unwrap();
        assert_eq!(stored.status, RunStatus::Failed);
        assert!(stored.finished_at.is_some());
    }
}
