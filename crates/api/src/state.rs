use std::sync::Arc;

use voxflow_engine::Orchestrator;

use crate::config::ServerConfig;

/// Shared application state available to all Axum handlers via `State<AppState>`.
///
/// This is cheaply cloneable (inner data is behind `Arc` or is already `Clone`).
#[derive(Clone)]
pub struct AppState {
    /// The orchestration engine: admission, lookup, cancellation, progress.
    pub orchestrator: Orchestrator,
    /// Server configuration.
    pub config: Arc<ServerConfig>,
}
