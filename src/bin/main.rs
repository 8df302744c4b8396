use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;
use tracing::{Level, info};
use tracing_subscriber::EnvFilter;
use serde_json::{Value, json};
use scenario_runner::{
    DatabaseConfig, Orchestrator, RunStatus, RunnerConfig, Scenario, ScenarioError, ScenarioId,
    ScenarioQueries, ScenarioStore, TaskId,
    create_app, create_connection, ensure_schema, load_scenario_config,
};

#[derive(Parser)]
#[command(name = "scenario-runner")]
#[command(about = "Create, run and inspect scenarios")]
struct Cli {
    /// Database connection string (memory, surrealkv://<path>, ws://host:port)
    #[arg(long, global = true, env = "DATABASE_URL")]
    db_url: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the REST server
    Serve {
        /// Bind address, e.g. 0.0.0.0:8000
        #[arg(long, default_value = "0.0.0.0:8000")]
        bind: String,
    },
    /// Create a scenario, run it and wait for the final record
    RunScenario {
        /// Name of the scenario to run
        #[arg(long)]
        name: String,
        /// Path to a JSON or YAML config file
        #[arg(long)]
        config: Option<PathBuf>,
        /// Path to write the output JSON
        #[arg(long)]
        output: Option<PathBuf>,
        /// Interval between task status polls, in milliseconds
        #[arg(long, default_value_t = 50)]
        poll_interval_ms: u64,
    },
    /// Print a scenario record
    GetScenario { id: String },
    /// Print a task record
    GetTask { task_id: String },
    /// Initialize the database schema
    Init,
    /// Delete all scenario and task records
    Reset,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(e) = init_tracing() {
        return report(Err(e));
    }
    report(run(cli).await)
}

fn init_tracing() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env().add_directive("scenario_runner=info".parse()?),
        )
        .with_max_level(Level::INFO)
        .with_writer(std::io::stderr)
        .init();
    Ok(())
}

/// Map the outcome to an exit code, printing errors as JSON on stderr.
fn report(outcome: Result<()>) -> ExitCode {
    match outcome {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            let payload = error_payload(&e);
            eprintln!(
                "{}",
                serde_json::to_string_pretty(&payload).unwrap_or_else(|_| e.to_string())
            );
            ExitCode::FAILURE
        }
    }
}

/// `{"error": ..., "type": ...}` body printed for a failed command.
fn error_payload(e: &anyhow::Error) -> Value {
    let kind = e
        .downcast_ref::<ScenarioError>()
        .map(|se| se.kind())
        .unwrap_or("Error");
    json!({ "error": e.to_string(), "type": kind })
}

/// Create and run one scenario, wait for it and write the final record to
/// `output` when given. The caller prints the record.
async fn run_scenario_command(
    orchestrator: &Orchestrator,
    name: &str,
    config: Option<&Path>,
    output: Option<&Path>,
    poll_interval: Duration,
) -> Result<Scenario> {
    let config = config.map(load_scenario_config).transpose()?;

    let scenario = orchestrator
        .run_to_completion(name, config, poll_interval)
        .await?;

    if let Some(path) = output {
        write_output(path, &serde_json::to_string_pretty(&scenario)?)?;
    }
    Ok(scenario)
}

/// A run that ended `failed` makes the command fail.
fn ensure_finished(scenario: &Scenario) -> Result<()> {
    if scenario.status == RunStatus::Failed {
        return Err(ScenarioError::Execution(format!(
            "scenario '{}' ({}) failed",
            scenario.name, scenario.id
        ))
        .into());
    }
    Ok(())
}

async fn run(cli: Cli) -> Result<()> {
    let db_config = match cli.db_url {
        Some(url) => DatabaseConfig {
            url,
            ..Default::default()
        },
        None => DatabaseConfig::default(),
    };
    info!("Using database url: {}", db_config.url);

    match cli.command {
        Commands::Serve { bind } => {
            let app = create_app(db_config, RunnerConfig::default()).await?;

            let listener = tokio::net::TcpListener::bind(&bind).await?;
            info!("Scenario API listening on http://{}", bind);

            axum::serve(listener, app).await?;
        }
        Commands::RunScenario {
            name,
            config,
            output,
            poll_interval_ms,
        } => {
            let orchestrator = Orchestrator::new(db_config, RunnerConfig::default()).await?;
            let outcome = run_scenario_command(
                &orchestrator,
                &name,
                config.as_deref(),
                output.as_deref(),
                Duration::from_millis(poll_interval_ms),
            )
            .await;
            orchestrator.shutdown().await;

            let scenario = outcome?;
            println!("{}", serde_json::to_string_pretty(&scenario)?);
            ensure_finished(&scenario)?;
        }
        Commands::GetScenario { id } => {
            let store = open_store(db_config).await?;
            let scenario = ScenarioQueries::new(store)
                .get_scenario(&ScenarioId::new(id))
                .await?;
            println!("{}", serde_json::to_string_pretty(&scenario)?);
        }
        Commands::GetTask { task_id } => {
            let store = open_store(db_config).await?;
            let task = ScenarioQueries::new(store)
                .get_task(&TaskId::new(task_id))
                .await?;
            println!("{}", serde_json::to_string_pretty(&task)?);
        }
        Commands::Init => {
            info!("Initializing database...");
            open_store(db_config).await?;
            info!("Database initialized successfully");
        }
        Commands::Reset => {
            let store = open_store(db_config).await?;
            store.clear().await?;
            info!("Deleted all scenario and task records");
        }
    }

    Ok(())
}

async fn open_store(db_config: DatabaseConfig) -> Result<ScenarioStore> {
    let db = create_connection(db_config).await?;
    ensure_schema(&db).await?;
    Ok(ScenarioStore::new(db))
}

fn write_output(path: &Path, contents: &str) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, contents)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use scenario_runner::{DemoExecutor, ExecutionError, JsonMap, ScenarioExecutor};
    use std::sync::Arc;
    use tempfile::TempDir;

    const POLL: Duration = Duration::from_millis(10);

    struct FailingExecutor;

    impl ScenarioExecutor for FailingExecutor {
        fn execute(&self, _name: &str, _config: &JsonMap) -> Result<JsonMap, ExecutionError> {
            Err(ExecutionError("solver did not converge".to_string()))
        }
    }

    fn test_runner_config() -> RunnerConfig {
        RunnerConfig {
            workers: 1,
            queue_capacity: 4,
            executor_delay_ms: 0,
        }
    }

    async fn orchestrator_with(executor: Arc<dyn ScenarioExecutor>) -> Orchestrator {
        let db = create_connection(DatabaseConfig::in_memory()).await.unwrap();
        ensure_schema(&db).await.unwrap();
        Orchestrator::with_executor(ScenarioStore::new(db), executor, &test_runner_config())
    }

    async fn demo_orchestrator() -> Orchestrator {
        orchestrator_with(Arc::new(DemoExecutor::new(Duration::ZERO))).await
    }

    #[tokio::test]
    async fn test_run_scenario_basic() {
        let orchestrator = demo_orchestrator().await;
        let scenario = run_scenario_command(&orchestrator, "demo", None, None, POLL)
            .await
            .unwrap();

        assert_eq!(scenario.name, "demo");
        assert_eq!(scenario.status, RunStatus::Finished);
        assert!(ensure_finished(&scenario).is_ok());

        let printed: Value =
            serde_json::from_str(&serde_json::to_string_pretty(&scenario).unwrap()).unwrap();
        for key in ["id", "name", "status", "result", "started_at", "finished_at"] {
            assert!(printed.get(key).is_some(), "missing {}", key);
        }
        assert_eq!(printed["result"]["summary"], json!("demo result"));
    }

    #[tokio::test]
    async fn test_run_scenario_with_json_config_and_output_file() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("config.json");
        std::fs::write(&config_path, r#"{"param1": "value1", "param2": 42}"#).unwrap();
        let output_path = temp_dir.path().join("out/result.json");

        let orchestrator = demo_orchestrator().await;
        let scenario = run_scenario_command(
            &orchestrator,
            "test-scenario",
            Some(&config_path),
            Some(&output_path),
            POLL,
        )
        .await
        .unwrap();

        let written: Value =
            serde_json::from_str(&std::fs::read_to_string(&output_path).unwrap()).unwrap();
        assert_eq!(written["name"], json!("test-scenario"));
        assert_eq!(written["id"], json!(scenario.id.as_str()));
        assert_eq!(
            written["result"]["input_config"],
            json!({"param1": "value1", "param2": 42})
        );
    }

    #[tokio::test]
    async fn test_run_scenario_with_yaml_config() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("config.yaml");
        std::fs::write(&config_path, "region: north\nyears: 30\n").unwrap();

        let orchestrator = demo_orchestrator().await;
        let scenario = run_scenario_command(&orchestrator, "yaml", Some(&config_path), None, POLL)
            .await
            .unwrap();

        assert_eq!(
            scenario.result.map(Value::Object).unwrap()["input_config"],
            json!({"region": "north", "years": 30})
        );
    }

    #[tokio::test]
    async fn test_unsupported_config_extension_is_reported() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("config.toml");
        std::fs::write(&config_path, "years = 30").unwrap();

        let orchestrator = demo_orchestrator().await;
        let err = run_scenario_command(&orchestrator, "toml", Some(&config_path), None, POLL)
            .await
            .unwrap_err();

        let payload = error_payload(&err);
        assert!(payload["error"]
            .as_str()
            .unwrap()
            .contains("Unsupported config file format"));
        assert_eq!(payload["type"], json!("Error"));
    }

    #[tokio::test]
    async fn test_failed_run_is_an_execution_error() {
        let orchestrator = orchestrator_with(Arc::new(FailingExecutor)).await;
        let scenario = run_scenario_command(&orchestrator, "broken", None, None, POLL)
            .await
            .unwrap();
        assert_eq!(scenario.status, RunStatus::Failed);

        let err = ensure_finished(&scenario).unwrap_err();
        let payload = error_payload(&err);
        assert_eq!(payload["type"], json!("ExecutionError"));
        assert!(payload["error"].as_str().unwrap().contains("broken"));
    }

    #[test]
    fn test_not_found_payload() {
        let err: anyhow::Error = ScenarioError::scenario_not_found("missing").into();
        assert_eq!(
            error_payload(&err),
            json!({"error": "Scenario with id 'missing' not found", "type": "NotFoundError"})
        );
    }
}
