//! Handlers for the `/tasks` resource.

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use relay_pipeline::SubmitRequest;

use crate::error::{AppError, AppResult};
use crate::response::DataResponse;
use crate::state::AppState;

/// POST /api/v1/tasks
///
/// Submit a generation task. Returns 201 with the identifiers once a
/// backend has accepted the job; the outcome arrives later on the
/// client's callback URL.
pub async fn submit_task(
    State(state): State<AppState>,
    payload: Result<Json<SubmitRequest>, JsonRejection>,
) -> AppResult<impl IntoResponse> {
    let Json(request) = payload?;
    let receipt = state.dispatcher.submit(request).await?;
    Ok((StatusCode::CREATED, Json(DataResponse { data: receipt })))
}

/// GET /api/v1/tasks/{id}
pub async fn get_task(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<impl IntoResponse> {
    let internal_id = uuid::Uuid::parse_str(&id)
        .map_err(|_| AppError::BadRequest(format!("`{id}` is not a task id")))?;
    let record = state
        .dispatcher
        .task(internal_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Task {internal_id} not found")))?;
    Ok(Json(DataResponse { data: record }))
}
