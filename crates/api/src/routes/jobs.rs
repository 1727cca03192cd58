//! Route definitions for job admission and lifecycle.

use axum::routing::{get, post};
use axum::Router;

use crate::handlers::jobs;
use crate::state::AppState;
use crate::ws;

/// Job routes mounted at `/jobs`.
///
/// ```text
/// POST /               -> create_job
/// GET  /               -> list_jobs
/// GET  /{id}           -> get_job
/// POST /{id}/cancel    -> cancel_job
/// GET  /{id}/progress  -> WebSocket progress stream (?from= to resume)
/// ```
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", post(jobs::create_job).get(jobs::list_jobs))
        .route("/{id}", get(jobs::get_job))
        .route("/{id}/cancel", post(jobs::cancel_job))
        .route("/{id}/progress", get(ws::progress_ws))
}
