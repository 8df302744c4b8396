//! Error taxonomy for scenario lifecycle operations.
//!
//! - `Validation` and `NotFound` are detected synchronously and returned to
//!   the immediate caller.
//! - `Execution` is only ever recorded on a failed task, never returned from
//!   `enqueue_run`.
//! - `Storage` covers engine I/O and lock failures and is retryable.

use std::fmt;

/// Errors produced by the store, the lifecycle manager and the runner.
#[derive(Debug, Clone, PartialEq)]
pub enum ScenarioError {
    /// Bad caller input, e.g. an empty scenario name.
    Validation(String),

    /// An unknown scenario or task id.
    NotFound {
        /// Which kind of record was looked up ("scenario" or "task").
        kind: &'static str,
        id: String,
    },

    /// The executor failed while running a scenario.
    Execution(String),

    /// The persistence engine failed (I/O, lock wait, corrupt row).
    Storage(String),
}

impl fmt::Display for ScenarioError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Validation(msg) => write!(f, "Validation error: {}", msg),
            Self::NotFound { kind, id } => {
                let mut chars = kind.chars();
                let title = match chars.next() {
                    Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                    None => String::new(),
                };
                write!(f, "{} with id '{}' not found", title, id)
            }
            Self::Execution(msg) => write!(f, "Execution failed: {}", msg),
            Self::Storage(msg) => write!(f, "Storage error: {}", msg),
        }
    }
}

impl std::error::Error for ScenarioError {}

/// Result type for scenario operations.
pub type ScenarioResult<T> = Result<T, ScenarioError>;

impl ScenarioError {
    pub fn scenario_not_found(id: impl Into<String>) -> Self {
        Self::NotFound {
            kind: "scenario",
            id: id.into(),
        }
    }

    pub fn task_not_found(id: impl Into<String>) -> Self {
        Self::NotFound {
            kind: "task",
            id: id.into(),
        }
    }

    /// Storage failures may succeed on retry; everything else is final.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Storage(_))
    }

    /// Short name of the variant, used in CLI error payloads.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Validation(_) => "ValidationError",
            Self::NotFound { .. } => "NotFoundError",
            Self::Execution(_) => "ExecutionError",
            Self::Storage(_) => "StorageError",
        }
    }
}

impl From<surrealdb::Error> for ScenarioError {
    fn from(err: surrealdb::Error) -> Self {
        Self::Storage(err.to_string())
    }
}

impl From<serde_json::Error> for ScenarioError {
    fn from(err: serde_json::Error) -> Self {
        Self::Storage(format!("corrupt row: {}", err))
    }
}

impl From<chrono::ParseError> for ScenarioError {
    fn from(err: chrono::ParseError) -> Self {
        Self::Storage(format!("corrupt timestamp: {}", err))
    }
}
