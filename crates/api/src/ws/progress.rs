//! Per-job progress streaming over WebSocket.
//!
//! `GET /jobs/{id}/progress?from=N` upgrades and streams the job's
//! progress events with `sequence_number > N` (pass 0, or omit, for the
//! full retained stream). Each frame carries a `type` discriminator
//! matching the push message constants; the final frame is the terminal
//! event, after which the server closes.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, Query, State};
use axum::response::Response;
use serde::Deserialize;
use serde_json::json;
use tokio_stream::StreamExt;
use voxflow_core::types::JobId;

use crate::error::AppResult;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct ProgressParams {
    /// Last sequence number the client has already seen.
    #[serde(default)]
    pub from: u64,
}

/// HTTP handler that upgrades the connection and streams progress.
///
/// Unknown job ids are rejected with 404 before the upgrade; otherwise the
/// client would hold a socket that can never produce an event.
pub async fn progress_ws(
    ws: WebSocketUpgrade,
    Path(id): Path<JobId>,
    Query(params): Query<ProgressParams>,
    State(state): State<AppState>,
) -> AppResult<Response> {
    state.orchestrator.job(id).await?;
    Ok(ws.on_upgrade(move |socket| stream_progress(socket, state, id, params.from)))
}

async fn stream_progress(mut socket: WebSocket, state: AppState, job_id: JobId, from_seq: u64) {
    tracing::info!(%job_id, from_seq, "Progress subscriber connected");

    let mut events = state.orchestrator.subscribe(job_id, from_seq).await;
    while let Some(event) = events.next().await {
        let frame = json!({
            "type": event.phase.message_type(),
            "job_id": event.job_id,
            "seq": event.sequence_number,
            "phase": event.phase,
            "percent": event.percent,
            "detail": event.detail,
            "emitted_at": event.emitted_at,
        });
        let text = match serde_json::to_string(&frame) {
            Ok(text) => text,
            Err(e) => {
                tracing::error!(%job_id, error = %e, "Could not encode progress frame");
                break;
            }
        };
        if socket.send(Message::Text(text.into())).await.is_err() {
            tracing::debug!(%job_id, "Progress subscriber disconnected");
            return;
        }
    }

    // The stream ended at the job's terminal event (or the retention
    // window was empty); close cleanly.
    let _ = socket.send(Message::Close(None)).await;
    tracing::debug!(%job_id, "Progress stream closed");
}
