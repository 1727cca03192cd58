//! Job admission, lookup, listing, and cancellation handlers.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;
use voxflow_core::job::{Job, JobKind, JobRequest, JobState};
use voxflow_core::types::JobId;
use voxflow_store::JobListQuery;

use crate::error::AppResult;
use crate::response::DataResponse;
use crate::state::AppState;

/// Query parameters for `GET /jobs`.
#[derive(Debug, Deserialize, Default)]
pub struct ListParams {
    pub state: Option<JobState>,
    pub kind: Option<JobKind>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

/// Optional body for `POST /jobs/{id}/cancel`.
#[derive(Debug, Deserialize)]
pub struct CancelBody {
    pub reason: Option<String>,
}

/// `POST /jobs` -- admit a new job.
///
/// Validation failures reject with 400 and never create a job record.
pub async fn create_job(
    State(state): State<AppState>,
    Json(request): Json<JobRequest>,
) -> AppResult<(StatusCode, Json<DataResponse<Job>>)> {
    let job = state.orchestrator.submit(request).await?;
    Ok((StatusCode::CREATED, Json(DataResponse { data: job })))
}

/// `GET /jobs` -- list jobs, newest first, with optional filters.
pub async fn list_jobs(
    State(state): State<AppState>,
    Query(params): Query<ListParams>,
) -> AppResult<Json<DataResponse<Vec<Job>>>> {
    let query = JobListQuery {
        state: params.state,
        kind: params.kind,
        limit: params.limit,
        offset: params.offset,
    };
    let jobs = state.orchestrator.list(&query).await?;
    Ok(Json(DataResponse { data: jobs }))
}

/// `GET /jobs/{id}` -- load one job record.
pub async fn get_job(
    State(state): State<AppState>,
    Path(id): Path<JobId>,
) -> AppResult<Json<DataResponse<Job>>> {
    let job = state.orchestrator.job(id).await?;
    Ok(Json(DataResponse { data: job }))
}

/// `POST /jobs/{id}/cancel` -- cancel a job that is still cancellable.
///
/// Terminal jobs and jobs already reassembling reject with 409.
pub async fn cancel_job(
    State(state): State<AppState>,
    Path(id): Path<JobId>,
    body: Option<Json<CancelBody>>,
) -> AppResult<Json<DataResponse<Job>>> {
    let reason = body
        .and_then(|Json(b)| b.reason)
        .unwrap_or_else(|| "cancelled by user".into());
    let job = state.orchestrator.cancel_job(id, &reason).await?;
    Ok(Json(DataResponse { data: job }))
}
