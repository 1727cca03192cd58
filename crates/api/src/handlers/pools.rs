//! Resource pool occupancy handler.

use axum::extract::State;
use axum::Json;
use voxflow_engine::PoolSnapshot;

use crate::error::AppResult;
use crate::response::DataResponse;
use crate::state::AppState;

/// `GET /pools` -- current occupancy of every resource pool.
pub async fn list_pools(
    State(state): State<AppState>,
) -> AppResult<Json<DataResponse<Vec<PoolSnapshot>>>> {
    Ok(Json(DataResponse {
        data: state.orchestrator.pools(),
    }))
}
