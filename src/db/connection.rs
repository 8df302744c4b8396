use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;
use surrealdb::engine::any::Any;
use surrealdb::opt::auth::Root;
use surrealdb::Surreal;
use tracing::debug;

use crate::error::{ScenarioError, ScenarioResult};

pub type Db = Surreal<Any>;

/// Default location of the single-file embedded store.
pub const DEFAULT_DATABASE_URL: &str = "surrealkv://data/scenarios.db";

/// URL schemes whose remainder is a filesystem path.
const EMBEDDED_SCHEMES: &[&str] = &["surrealkv+versioned://", "surrealkv://", "rocksdb://"];

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Connection string: `memory`, `surrealkv://<path>`, `ws://host:port`, ...
    pub url: String,
    pub namespace: String,
    pub database: String,
    pub username: Option<String>,
    pub password: Option<String>,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: env::var("DATABASE_URL")
                .unwrap_or_else(|_| DEFAULT_DATABASE_URL.to_string()),
            namespace: env::var("SCENARIO_DB_NAMESPACE")
                .unwrap_or_else(|_| "gaia".to_string()),
            database: env::var("SCENARIO_DB_DATABASE")
                .unwrap_or_else(|_| "scenarios".to_string()),
            username: env::var("SCENARIO_DB_USERNAME").ok(),
            password: env::var("SCENARIO_DB_PASSWORD").ok(),
        }
    }
}

impl DatabaseConfig {
    /// An isolated in-memory store, used by tests and throwaway runs.
    pub fn in_memory() -> Self {
        Self {
            url: "memory".to_string(),
            ..Default::default()
        }
    }

    /// Filesystem path of an embedded store, if the url names one.
    pub fn embedded_path(&self) -> Option<PathBuf> {
        EMBEDDED_SCHEMES.iter().find_map(|scheme| {
            self.url
                .strip_prefix(scheme)
                .filter(|rest| !rest.is_empty())
                .map(PathBuf::from)
        })
    }
}

pub async fn create_connection(config: DatabaseConfig) -> ScenarioResult<Db> {
    // The embedded engines do not create missing parent directories.
    if let Some(path) = config.embedded_path() {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| {
                ScenarioError::Storage(format!(
                    "failed to create database directory {}: {}",
                    parent.display(),
                    e
                ))
            })?;
        }
    }

    debug!("Connecting to database at {}", config.url);
    let db = surrealdb::engine::any::connect(config.url).await?;

    // Sign in if credentials are provided
    if let (Some(username), Some(password)) = (config.username, config.password) {
        db.signin(Root {
            username: &username,
            password: &password,
        })
        .await?;
    }

    db.use_ns(config.namespace).use_db(config.database).await?;

    Ok(db)
}
