use axum::extract::{Path, State};
use axum::Json;

use crate::error::AppError;
use crate::history::RunRecord;
use crate::state::AppState;

/// GET /api/runs: recent runs, newest first.
pub async fn list_runs(State(app): State<AppState>) -> Json<Vec<RunRecord>> {
    Json(app.runs.list())
}

/// GET /api/runs/{id}
pub async fn get_run(
    State(app): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<RunRecord>, AppError> {
    app.runs
        .get(id)
        .map(Json)
        .ok_or_else(|| AppError::not_found(format!("run {id} not found")))
}
