//! Route definitions, grouped per resource and assembled under `/api/v1`.

pub mod health;
pub mod jobs;
pub mod pools;

use axum::Router;

use crate::state::AppState;

/// All `/api/v1` routes.
pub fn api_routes() -> Router<AppState> {
    Router::new()
        .nest("/jobs", jobs::router())
        .nest("/pools", pools::router())
}
