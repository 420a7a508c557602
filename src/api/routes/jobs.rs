//! Job mapping routes.

use axum::extract::{Path, State};
use axum::routing::{get, post};
use axum::{Json, Router};

use crate::api::error::ApiResult;
use crate::api::models::{CreateJobRequest, JobResponse, UpdateJobRequest};
use crate::api::server::AppState;
use crate::Error;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_jobs).post(create_job))
        .route("/{id}", get(get_job).put(update_job).delete(delete_job))
        .route("/{id}/activate", post(activate_job))
        .route("/{id}/deactivate", post(deactivate_job))
}

async fn list_jobs(State(state): State<AppState>) -> ApiResult<Json<Vec<JobResponse>>> {
    let jobs = state.manager.list_mappings().await?;
    Ok(Json(jobs.iter().map(JobResponse::from).collect()))
}

async fn create_job(
    State(state): State<AppState>,
    Json(request): Json<CreateJobRequest>,
) -> ApiResult<Json<JobResponse>> {
    let job = state
        .manager
        .create_mapping(
            &request.source_channel_id,
            &request.sink_account_id,
            &request.sink_access_token,
        )
        .await?;
    Ok(Json(JobResponse::from(&job)))
}

async fn get_job(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<JobResponse>> {
    let job = state
        .manager
        .get_mapping(&id)
        .await?
        .ok_or_else(|| Error::not_found("Job", &id))?;
    Ok(Json(JobResponse::from(&job)))
}

async fn update_job(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<UpdateJobRequest>,
) -> ApiResult<Json<JobResponse>> {
    let job = state
        .manager
        .update_mapping(
            &id,
            &request.source_channel_id,
            &request.sink_account_id,
            &request.sink_access_token,
            request.is_active,
        )
        .await?;
    Ok(Json(JobResponse::from(&job)))
}

async fn delete_job(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<serde_json::Value>> {
    state.manager.delete_mapping(&id).await?;
    Ok(Json(serde_json::json!({ "status": "deleted" })))
}

async fn activate_job(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<JobResponse>> {
    let job = state.manager.set_active(&id, true).await?;
    Ok(Json(JobResponse::from(&job)))
}

async fn deactivate_job(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<JobResponse>> {
    let job = state.manager.set_active(&id, false).await?;
    Ok(Json(JobResponse::from(&job)))
}
