//! Route definitions for resource pool introspection.

use axum::routing::get;
use axum::Router;

use crate::handlers::pools;
use crate::state::AppState;

/// Pool routes mounted at `/pools`.
///
/// ```text
/// GET / -> list_pools
/// ```
pub fn router() -> Router<AppState> {
    Router::new().route("/", get(pools::list_pools))
}
