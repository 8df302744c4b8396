use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::types::{RunStatus, ScenarioId, TaskId};

/// Arbitrary JSON-compatible mapping used for scenario configs and results.
pub type JsonMap = Map<String, Value>;

/// Current time at the precision the store keeps (microseconds), so a record
/// handed back to a caller compares equal to the one read from the store.
pub fn timestamp_now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}

/// A named unit of work with a configuration payload and a lifecycle outcome.
///
/// `result` is present only while `status == Finished`, and `finished_at`
/// only while the status is terminal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scenario {
    pub id: ScenarioId,
    pub name: String,
    pub status: RunStatus,
    pub config: JsonMap,
    pub result: Option<JsonMap>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl Scenario {
    /// A freshly created scenario in `Pending` state.
    pub fn new_pending(name: String, config: JsonMap, now: DateTime<Utc>) -> Self {
        Self {
            id: ScenarioId::generate(),
            name,
            status: RunStatus::Pending,
            config,
            result: None,
            started_at: now,
            finished_at: None,
        }
    }
}

/// One execution attempt of a scenario's run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub task_id: TaskId,
    pub scenario_id: ScenarioId,
    pub status: RunStatus,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl Task {
    pub fn new_pending(scenario_id: ScenarioId, now: DateTime<Utc>) -> Self {
        Self {
            task_id: TaskId::generate(),
            scenario_id,
            status: RunStatus::Pending,
            error: None,
            created_at: now,
            started_at: None,
            finished_at: None,
        }
    }
}

/// Body returned by `POST /scenarios/{id}/run`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskAccepted {
    pub task_id: TaskId,
    pub scenario_id: ScenarioId,
    pub status: RunStatus,
}

impl From<&Task> for TaskAccepted {
    fn from(task: &Task) -> Self {
        Self {
            task_id: task.task_id.clone(),
            scenario_id: task.scenario_id.clone(),
            status: task.status,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_pending_scenario_wire_shape() {
        let scenario = Scenario::new_pending("demo".to_string(), JsonMap::new(), Utc::now());
        let value = serde_json::to_value(&scenario).unwrap();

        assert_eq!(value["name"], json!("demo"));
        assert_eq!(value["status"], json!("pending"));
        assert_eq!(value["config"], json!({}));
        assert_eq!(value["result"], Value::Null);
        assert_eq!(value["finished_at"], Value::Null);
        assert!(value["started_at"].is_string());
    }

    #[test]
    fn test_task_accepted_from_task() {
        let task = Task::new_pending(ScenarioId::new("s-1"), Utc::now());
        let accepted = TaskAccepted::from(&task);
        let value = serde_json::to_value(&accepted).unwrap();

        assert_eq!(value["scenario_id"], json!("s-1"));
        assert_eq!(value["status"], json!("pending"));
        assert_eq!(value["task_id"], json!(task.task_id.as_str()));
    }
}
