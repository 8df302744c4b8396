//! State-machine transitions for a task and the scenario it mirrors onto.
//!
//! Every transition is a read-modify-write against the store; nothing is
//! cached between steps. Ordering within a terminal transition is fixed: the
//! scenario row is written first and the task's terminal status last, so a
//! poller that observes a terminal task always sees the matching scenario.
//!
//! Concurrent runs of one scenario all write the same scenario row, and the
//! engine rejects conflicting transactions. Each step is therefore retried
//! with backoff while the failure is retryable, re-reading the row on every
//! attempt.

use std::future::Future;
use std::time::{Duration, SystemTime};
use tracing::{debug, info, warn};

use crate::db::ScenarioStore;
use crate::error::{ScenarioError, ScenarioResult};
use crate::model::{timestamp_now, JsonMap, Scenario, Task};
use crate::types::{RunStatus, TaskId};

/// Maximum attempts for a single store step.
pub const MAX_WRITE_ATTEMPTS: u32 = 12;

/// Base backoff between attempts.
const BACKOFF_BASE: Duration = Duration::from_millis(5);

/// Maximum backoff between attempts.
const BACKOFF_MAX: Duration = Duration::from_millis(250);

/// Random jitter for backoff (0-20ms).
fn jitter() -> Duration {
    let nanos = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .subsec_nanos();
    Duration::from_millis(u64::from(nanos % 20))
}

/// Run one store step, retrying it while it fails with a retryable error.
///
/// `step` is invoked afresh on every attempt, so it must re-read whatever
/// rows it modifies.
pub(crate) async fn with_retry<T, F, Fut>(what: &str, mut step: F) -> ScenarioResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = ScenarioResult<T>>,
{
    let mut attempt = 1;
    let mut backoff = BACKOFF_BASE;

    loop {
        match step().await {
            Err(e) if e.is_retryable() && attempt < MAX_WRITE_ATTEMPTS => {
                debug!("{} failed (attempt {}/{}): {}", what, attempt, MAX_WRITE_ATTEMPTS, e);
                tokio::time::sleep(backoff.min(BACKOFF_MAX) + jitter()).await;
                backoff = backoff.saturating_mul(2);
                attempt += 1;
            }
            outcome => return outcome,
        }
    }
}

fn ensure_transition(task: &Task, next: RunStatus) -> ScenarioResult<()> {
    if task.status.can_transition_to(next) {
        Ok(())
    } else {
        Err(ScenarioError::Validation(format!(
            "task {} cannot move from {} to {}",
            task.task_id, task.status, next
        )))
    }
}

async fn load_task(store: &ScenarioStore, task_id: &TaskId) -> ScenarioResult<Task> {
    store
        .get_task(task_id)
        .await?
        .ok_or_else(|| ScenarioError::task_not_found(task_id.as_str()))
}

async fn load_scenario_of(store: &ScenarioStore, task: &Task) -> ScenarioResult<Scenario> {
    store
        .get_scenario(&task.scenario_id)
        .await?
        .ok_or_else(|| ScenarioError::scenario_not_found(task.scenario_id.as_str()))
}

/// Write the task's terminal row, retrying transient failures.
async fn write_task(store: &ScenarioStore, task: &Task) -> ScenarioResult<()> {
    with_retry("task write", move || async move { store.update_task(task).await }).await
}

/// `pending -> running` for the task, and reset the scenario for a new run.
///
/// Re-running a scenario that already reached a terminal state is allowed:
/// its previous result and `finished_at` are cleared here.
pub async fn begin_run(store: &ScenarioStore, task_id: &TaskId) -> ScenarioResult<Task> {
    let mut task = with_retry("task read", move || load_task(store, task_id)).await?;
    ensure_transition(&task, RunStatus::Running)?;

    let now = timestamp_now();
    task.status = RunStatus::Running;
    task.started_at = Some(now);
    write_task(store, &task).await?;

    let running = &task;
    with_retry("scenario reset", move || async move {
        let mut scenario = load_scenario_of(store, running).await?;
        scenario.status = RunStatus::Running;
        scenario.started_at = now;
        scenario.result = None;
        scenario.finished_at = None;
        store.update_scenario(&scenario).await
    })
    .await?;

    info!("Task {} running for scenario {}", task.task_id, task.scenario_id);
    Ok(task)
}

/// `running -> finished`: store the result on the scenario, then close the task.
pub async fn complete_run(
    store: &ScenarioStore,
    task: &Task,
    result: JsonMap,
) -> ScenarioResult<Task> {
    ensure_transition(task, RunStatus::Finished)?;
    let now = timestamp_now();

    let result = &result;
    with_retry("scenario result write", move || async move {
        let mut scenario = load_scenario_of(store, task).await?;
        scenario.status = RunStatus::Finished;
        scenario.result = Some(result.clone());
        scenario.finished_at = Some(now);
        store.update_scenario(&scenario).await
    })
    .await?;

    let mut task = task.clone();
    task.status = RunStatus::Finished;
    task.error = None;
    task.finished_at = Some(now);
    write_task(store, &task).await?;

    info!("Task {} finished for scenario {}", task.task_id, task.scenario_id);
    Ok(task)
}

/// Move the task to `failed` with `error`, marking the scenario `failed` first.
///
/// Accepts a task in `pending` or `running`, since a run can fail before the
/// runner managed to persist `running`. If the scenario write fails the
/// scenario keeps its last stored state and the storage error is appended to
/// the task's error text; the task is still marked failed.
pub async fn fail_run(store: &ScenarioStore, task: &Task, error: String) -> ScenarioResult<Task> {
    if task.status.is_terminal() {
        return Err(ScenarioError::Validation(format!(
            "task {} is already {}",
            task.task_id, task.status
        )));
    }
    let now = timestamp_now();
    let mut error = error;

    let scenario_write = with_retry("scenario failure write", move || async move {
        let mut scenario = load_scenario_of(store, task).await?;
        scenario.status = RunStatus::Failed;
        scenario.result = None;
        scenario.finished_at = Some(now);
        store.update_scenario(&scenario).await
    });
    if let Err(e) = scenario_write.await {
        warn!(
            "Could not mark scenario {} failed: {}",
            task.scenario_id, e
        );
        error = format!("{}; additionally: {}", error, e);
    }

    let mut task = task.clone();
    task.status = RunStatus::Failed;
    task.error = Some(error);
    task.finished_at = Some(now);
    write_task(store, &task).await?;

    warn!(
        "Task {} failed for scenario {}: {}",
        task.task_id,
        task.scenario_id,
        task.error.as_deref().unwrap_or_default()
    );
    Ok(task)
}
