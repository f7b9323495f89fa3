use axum::extract::{Path, State};
use axum::Json;
use bulkops_core::catalog::{Environment, TargetResolver};
use serde::Serialize;
use uuid::Uuid;

use crate::error::AppError;
use crate::state::AppState;

#[derive(Serialize)]
pub struct ActionSummary {
    pub name: String,
    pub endpoint: String,
    pub command: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub requires_connection: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
}

#[derive(Serialize)]
pub struct ProjectSummary {
    pub id: Uuid,
    pub name: String,
    pub environments: usize,
}

/// GET /api/actions: bulk endpoints this server exposes.
pub async fn list_actions(State(app): State<AppState>) -> Json<Vec<ActionSummary>> {
    let actions = app
        .config
        .actions
        .iter()
        .map(|(name, action)| ActionSummary {
            name: name.clone(),
            endpoint: format!("/ws/bulk/{name}"),
            command: action.command.clone(),
            requires_connection: action.requires_connection.clone(),
            timeout_secs: action.timeout_secs,
        })
        .collect();
    Json(actions)
}

/// GET /api/projects
pub async fn list_projects(
    State(app): State<AppState>,
) -> Result<Json<Vec<ProjectSummary>>, AppError> {
    let projects = app.catalog.projects().await?;
    let summaries = projects
        .iter()
        .map(|p| ProjectSummary {
            id: p.id,
            name: p.name.clone(),
            environments: p.environments.len(),
        })
        .collect();
    Ok(Json(summaries))
}

/// GET /api/projects/{id}/environments
pub async fn list_environments(
    State(app): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Vec<Environment>>, AppError> {
    Ok(Json(app.catalog.list_targets(id).await?))
}
