// REST API endpoints for scenarios

use axum::{
    Router,
    extract::{Path, State, rejection::JsonRejection},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
};
use http::header::LOCATION;
use serde::Deserialize;
use serde_json::{Value, json};
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::error::ScenarioError;
use crate::model::{JsonMap, Scenario, Task, TaskAccepted};
use crate::orchestrator::Orchestrator;
use crate::types::{ScenarioId, TaskId};

pub type AppState = Arc<Orchestrator>;

/// Body of `POST /scenarios`.
#[derive(Debug, Deserialize)]
pub struct CreateScenarioRequest {
    pub name: String,
    #[serde(default)]
    pub config: Option<JsonMap>,
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/scenarios", post(create_scenario))
        .route("/scenarios/{id}", get(get_scenario))
        .route("/scenarios/{id}/run", post(run_scenario))
        .route("/scenarios/{id}/tasks", get(list_tasks))
        .route("/scenarios/tasks/{task_id}", get(get_task))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        )
        .with_state(state)
}

impl IntoResponse for ScenarioError {
    fn into_response(self) -> Response {
        let status = match &self {
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::NotFound { .. } => StatusCode::NOT_FOUND,
            Self::Execution(_) | Self::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let detail = match &self {
            Self::Validation(msg) => msg.clone(),
            other => other.to_string(),
        };

        if status.is_server_error() {
            tracing::error!("Request failed: {}", self);
        }

        (status, Json(json!({ "detail": detail }))).into_response()
    }
}

/// Malformed or incomplete request bodies are caller errors.
impl From<JsonRejection> for ScenarioError {
    fn from(rejection: JsonRejection) -> Self {
        Self::Validation(rejection.body_text())
    }
}

async fn health_check() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

async fn create_scenario(
    State(state): State<AppState>,
    payload: Result<Json<CreateScenarioRequest>, JsonRejection>,
) -> Result<Response, ScenarioError> {
    let Json(payload) = payload?;
    let scenario = state
        .create_scenario(&payload.name, payload.config)
        .await?;

    let location = format!("/scenarios/{}", scenario.id);
    Ok((StatusCode::CREATED, [(LOCATION, location)], Json(scenario)).into_response())
}

async fn get_scenario(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Scenario>, ScenarioError> {
    let scenario = state.get_scenario(&ScenarioId::new(id)).await?;
    Ok(Json(scenario))
}

/// Queue a run and return immediately with the pending task.
async fn run_scenario(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Response, ScenarioError> {
    let task = state.enqueue_run(&ScenarioId::new(id)).await?;

    let location = format!("/scenarios/tasks/{}", task.task_id);
    Ok((
        StatusCode::ACCEPTED,
        [(LOCATION, location)],
        Json(TaskAccepted::from(&task)),
    )
        .into_response())
}

async fn get_task(
    State(state): State<AppState>,
    Path(task_id): Path<String>,
) -> Result<Json<Task>, ScenarioError> {
    let task = state.get_task(&TaskId::new(task_id)).await?;
    Ok(Json(task))
}

async fn list_tasks(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ScenarioError> {
    let tasks = state.list_tasks(&ScenarioId::new(id)).await?;
    Ok(Json(json!({
        "tasks": tasks,
        "count": tasks.len(),
    })))
}
