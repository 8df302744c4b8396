use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::db::Db;
use crate::error::{ScenarioError, ScenarioResult};
use crate::model::{JsonMap, Scenario, Task};
use crate::types::{RunStatus, ScenarioId, TaskId};

/// Create both tables if they do not exist yet. Safe to call on every startup.
pub async fn ensure_schema(db: &Db) -> ScenarioResult<()> {
    let schema_queries = [
        // Scenario table
        "DEFINE TABLE IF NOT EXISTS scenario SCHEMAFULL;
         DEFINE FIELD IF NOT EXISTS scenario_id ON TABLE scenario TYPE string;
         DEFINE FIELD IF NOT EXISTS name ON TABLE scenario TYPE string;
         DEFINE FIELD IF NOT EXISTS status ON TABLE scenario TYPE string;
         DEFINE FIELD IF NOT EXISTS config ON TABLE scenario TYPE string;
         DEFINE FIELD IF NOT EXISTS result ON TABLE scenario TYPE option<string>;
         DEFINE FIELD IF NOT EXISTS started_at ON TABLE scenario TYPE string;
         DEFINE FIELD IF NOT EXISTS finished_at ON TABLE scenario TYPE option<string>;
         DEFINE INDEX IF NOT EXISTS scenario_id_unique ON TABLE scenario COLUMNS scenario_id UNIQUE;",

        // Task table
        "DEFINE TABLE IF NOT EXISTS task SCHEMAFULL;
         DEFINE FIELD IF NOT EXISTS task_id ON TABLE task TYPE string;
         DEFINE FIELD IF NOT EXISTS scenario_id ON TABLE task TYPE string;
         DEFINE FIELD IF NOT EXISTS status ON TABLE task TYPE string;
         DEFINE FIELD IF NOT EXISTS error ON TABLE task TYPE option<string>;
         DEFINE FIELD IF NOT EXISTS created_at ON TABLE task TYPE string;
         DEFINE FIELD IF NOT EXISTS started_at ON TABLE task TYPE option<string>;
         DEFINE FIELD IF NOT EXISTS finished_at ON TABLE task TYPE option<string>;
         DEFINE INDEX IF NOT EXISTS task_id_unique ON TABLE task COLUMNS task_id UNIQUE;
         DEFINE INDEX IF NOT EXISTS task_scenario_id ON TABLE task COLUMNS scenario_id;",
    ];

    for query in schema_queries {
        db.query(query).await?.check()?;
    }

    Ok(())
}

/// Persisted representation of a scenario.
///
/// Structured fields are stored as JSON text and timestamps as RFC 3339 text.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScenarioRow {
    pub scenario_id: String,
    pub name: String,
    pub status: String,
    pub config: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
    pub started_at: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<String>,
}

/// Persisted representation of a task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskRow {
    pub task_id: String,
    pub scenario_id: String,
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub created_at: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<String>,
}

fn encode_time(t: &DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn decode_time(s: &str) -> ScenarioResult<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(s)?.with_timezone(&Utc))
}

fn decode_opt_time(s: Option<&str>) -> ScenarioResult<Option<DateTime<Utc>>> {
    s.map(decode_time).transpose()
}

fn decode_status(s: &str) -> ScenarioResult<RunStatus> {
    s.parse().map_err(|e| ScenarioError::Storage(format!("corrupt row: {}", e)))
}

impl ScenarioRow {
    pub fn encode(scenario: &Scenario) -> ScenarioResult<Self> {
        Ok(Self {
            scenario_id: scenario.id.as_str().to_string(),
            name: scenario.name.clone(),
            status: scenario.status.as_str().to_string(),
            config: serde_json::to_string(&scenario.config)?,
            result: scenario
                .result
                .as_ref()
                .map(serde_json::to_string)
                .transpose()?,
            started_at: encode_time(&scenario.started_at),
            finished_at: scenario.finished_at.as_ref().map(encode_time),
        })
    }

    pub fn decode(self) -> ScenarioResult<Scenario> {
        let config: JsonMap = serde_json::from_str(&self.config)?;
        let result: Option<JsonMap> = self
            .result
            .as_deref()
            .map(serde_json::from_str)
            .transpose()?;

        Ok(Scenario {
            id: ScenarioId::new(self.scenario_id),
            name: self.name,
            status: decode_status(&self.status)?,
            config,
            result,
            started_at: decode_time(&self.started_at)?,
            finished_at: decode_opt_time(self.finished_at.as_deref())?,
        })
    }
}

impl TaskRow {
    pub fn encode(task: &Task) -> Self {
        Self {
            task_id: task.task_id.as_str().to_string(),
            scenario_id: task.scenario_id.as_str().to_string(),
            status: task.status.as_str().to_string(),
            error: task.error.clone(),
            created_at: encode_time(&task.created_at),
            started_at: task.started_at.as_ref().map(encode_time),
            finished_at: task.finished_at.as_ref().map(encode_time),
        }
    }

    pub fn decode(self) -> ScenarioResult<Task> {
        Ok(Task {
            task_id: TaskId::new(self.task_id),
            scenario_id: ScenarioId::new(self.scenario_id),
            status: decode_status(&self.status)?,
            error: self.error,
            created_at: decode_time(&self.created_at)?,
            started_at: decode_opt_time(self.started_at.as_deref())?,
            finished_at: decode_opt_time(self.finished_at.as_deref())?,
        })
    }
}
