// Core modules
mod config;
mod error;
mod model;
mod types;
pub mod db;
pub mod executor;

// Lifecycle and execution
mod runner;
mod orchestrator;
mod query;
pub mod api;

// Re-export key types and functions
pub use config::{RunnerConfig, load_scenario_config};
pub use db::{DatabaseConfig, Db, ScenarioStore, create_connection, ensure_schema};
pub use error::{ScenarioError, ScenarioResult};
pub use executor::{DemoExecutor, ExecutionError, ScenarioExecutor};
pub use model::{JsonMap, Scenario, Task, TaskAccepted};
pub use types::{RunStatus, ScenarioId, TaskId};

pub use runner::{RunJob, TaskRunner};
pub use orchestrator::{Orchestrator, lifecycle};
pub use query::ScenarioQueries;

use std::sync::Arc;

/// Convenience function to create the REST router over a fully configured
/// orchestrator.
///
/// Connects to the database, ensures the schema and starts the worker pool.
pub async fn create_app(
    db_config: DatabaseConfig,
    runner_config: RunnerConfig,
) -> ScenarioResult<axum::Router> {
    let orchestrator = Orchestrator::new(db_config, runner_config).await?;
    Ok(api::create_router(Arc::new(orchestrator)))
}
