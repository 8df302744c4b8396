// Scenario execution engine.
//
// Executors are synchronous and free of side effects beyond their return
// value. The task runner moves each call onto tokio's blocking pool, so an
// implementation may block for as long as its computation needs.

use serde_json::Value;
use std::time::Duration;

use crate::model::JsonMap;

/// Why an executor could not produce a result. Recorded on the failed task.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionError(pub String);

impl std::fmt::Display for ExecutionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::error::Error for ExecutionError {}

/// Computes the result payload for a named scenario and its config.
pub trait ScenarioExecutor: Send + Sync + 'static {
    fn execute(&self, name: &str, config: &JsonMap) -> Result<JsonMap, ExecutionError>;
}

/// Placeholder computation: waits `delay` and echoes the config back.
#[derive(Debug, Clone)]
pub struct DemoExecutor {
    delay: Duration,
}

impl DemoExecutor {
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }
}

impl Default for DemoExecutor {
    fn default() -> Self {
        Self::new(Duration::from_millis(100))
    }
}

impl ScenarioExecutor for DemoExecutor {
    fn execute(&self, name: &str, config: &JsonMap) -> Result<JsonMap, ExecutionError> {
        tracing::debug!("Executing scenario '{}' ({:?} simulated work)", name, self.delay);
        std::thread::sleep(self.delay);

        let mut result = JsonMap::new();
        result.insert("summary".to_string(), Value::String("demo result".to_string()));
        result.insert("input_config".to_string(), Value::Object(config.clone()));
        Ok(result)
    }
}
