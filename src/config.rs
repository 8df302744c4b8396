use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::{env, fs, path::Path, time::Duration};

use crate::model::JsonMap;

/// Settings for the background worker pool and the placeholder executor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunnerConfig {
    /// Number of worker tasks draining the run queue.
    pub workers: usize,
    /// Capacity of the bounded submission queue.
    pub queue_capacity: usize,
    /// Artificial delay of the demo executor, in milliseconds.
    pub executor_delay_ms: u64,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            workers: env_or("SCENARIO_WORKERS", 4),
            queue_capacity: env_or("SCENARIO_QUEUE_CAPACITY", 64),
            executor_delay_ms: env_or("SCENARIO_EXECUTOR_DELAY_MS", 100),
        }
    }
}

impl RunnerConfig {
    pub fn executor_delay(&self) -> Duration {
        Duration::from_millis(self.executor_delay_ms)
    }
}

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Load a scenario configuration mapping from a `.json`, `.yaml` or `.yml` file.
///
/// The document must be a mapping at the top level; an empty YAML document
/// is treated as an empty mapping.
pub fn load_scenario_config(path: &Path) -> anyhow::Result<JsonMap> {
    let raw = fs::read_to_string(path)?;
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default();

    let value: Value = match ext.as_str() {
        "json" => serde_json::from_str(&raw)?,
        "yaml" | "yml" => serde_yaml::from_str(&raw)?,
        other => {
            return Err(anyhow::anyhow!(
                "Unsupported config file format: .{}",
                other
            ));
        }
    };

    match value {
        Value::Object(map) => Ok(map),
        Value::Null => Ok(JsonMap::new()),
        _ => Err(anyhow::anyhow!(
            "Config file `{}` must contain a mapping at the top level",
            path.display()
        )),
    }
}
