//! Progress channel implementation: per-job sequence allocation, bounded
//! replay buffer, and `tokio::sync::broadcast` fan-out.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use chrono::{Duration, Utc};
use tokio::sync::{broadcast, mpsc, RwLock};
use tokio_stream::wrappers::ReceiverStream;
use voxflow_core::progress::{ProgressEvent, ProgressPhase};
use voxflow_core::types::JobId;

/// Default number of events retained per job for replay.
pub const DEFAULT_RETENTION: usize = 256;

/// Broadcast buffer per job; slow live subscribers recover missed events
/// from the retained buffer.
const BROADCAST_CAPACITY: usize = 64;

/// Outbound buffer per subscriber.
const SUBSCRIBER_CAPACITY: usize = 64;

struct JobStream {
    next_seq: u64,
    retained: VecDeque<ProgressEvent>,
    sender: broadcast::Sender<ProgressEvent>,
    terminated: bool,
}

impl JobStream {
    fn new() -> Self {
        let (sender, _) = broadcast::channel(BROADCAST_CAPACITY);
        Self {
            next_seq: 1,
            retained: VecDeque::new(),
            sender,
            terminated: false,
        }
    }
}

struct Inner {
    streams: RwLock<HashMap<JobId, JobStream>>,
    retention: usize,
}

/// Ordered, replayable, finite progress event channel.
///
/// Cheaply cloneable; all clones share the same per-job streams.
#[derive(Clone)]
pub struct ProgressChannel {
    inner: Arc<Inner>,
}

impl Default for ProgressChannel {
    fn default() -> Self {
        Self::new(DEFAULT_RETENTION)
    }
}

impl ProgressChannel {
    pub fn new(retention: usize) -> Self {
        Self {
            inner: Arc::new(Inner {
                streams: RwLock::new(HashMap::new()),
                retention: retention.max(1),
            }),
        }
    }

    /// Publish a progress event for a job.
    ///
    /// Allocates the next sequence number, retains the event, and fans it
    /// out to live subscribers. Zero subscribers is not an error — the
    /// event stays retained for the replay window. Events published after
    /// a terminal event are dropped (the stream has ended).
    pub async fn publish(
        &self,
        job_id: JobId,
        phase: ProgressPhase,
        percent: u8,
        detail: Option<String>,
    ) -> Option<ProgressEvent> {
        let mut streams = self.inner.streams.write().await;
        let stream = streams.entry(job_id).or_insert_with(JobStream::new);
        if stream.terminated {
            tracing::warn!(%job_id, ?phase, "Progress event after terminal event dropped");
            return None;
        }

        let event = ProgressEvent {
            job_id,
            sequence_number: stream.next_seq,
            phase,
            percent: percent.min(100),
            detail,
            emitted_at: Utc::now(),
        };
        stream.next_seq += 1;
        stream.terminated = event.is_terminal();

        stream.retained.push_back(event.clone());
        while stream.retained.len() > self.inner.retention {
            stream.retained.pop_front();
        }

        // SendError only means there are no live receivers.
        let _ = stream.sender.send(event.clone());
        Some(event)
    }

    /// Subscribe to a job's progress from `from_seq` (exclusive: events
    /// with `sequence_number > from_seq` are delivered; pass 0 for all).
    ///
    /// The returned stream yields events in sequence order with no gaps
    /// within the retention window, and ends after the terminal event.
    /// A subscriber that lags behind the live fan-out is caught up from
    /// the retained buffer rather than observing a hole.
    ///
    /// Only `publish` creates per-job state; subscribing to a job that has
    /// never published (or was already pruned) yields a stream that ends
    /// immediately and leaves nothing behind.
    pub async fn subscribe(&self, job_id: JobId, from_seq: u64) -> ReceiverStream<ProgressEvent> {
        let (tx, rx) = mpsc::channel(SUBSCRIBER_CAPACITY);

        // Snapshot the replay set and attach the live receiver under the
        // same lock as publishers take, so nothing falls between them.
        let snapshot = {
            let streams = self.inner.streams.read().await;
            streams.get(&job_id).map(|stream| {
                let replay: Vec<ProgressEvent> = stream
                    .retained
                    .iter()
                    .filter(|e| e.sequence_number > from_seq)
                    .cloned()
                    .collect();
                (replay, stream.sender.subscribe(), stream.terminated)
            })
        };

        match snapshot {
            Some((replay, live, terminated)) => {
                let inner = Arc::clone(&self.inner);
                tokio::spawn(forward_events(inner, job_id, replay, live, terminated, tx));
            }
            // Dropping the sender ends the stream without an entry ever
            // existing for this id.
            None => drop(tx),
        }

        ReceiverStream::new(rx)
    }

    /// Drop retained state for terminated jobs whose last event is older
    /// than `window`. Progress is not an audit log; this bounds memory.
    pub async fn prune_terminated(&self, window: std::time::Duration) {
        let cutoff = Utc::now()
            - Duration::from_std(window).unwrap_or_else(|_| Duration::seconds(i64::MAX / 1_000));
        let mut streams = self.inner.streams.write().await;
        streams.retain(|_, s| {
            let expired =
                s.terminated && s.retained.back().is_none_or(|e| e.emitted_at < cutoff);
            !expired
        });
    }

    #[cfg(test)]
    async fn tracked_jobs(&self) -> usize {
        self.inner.streams.read().await.len()
    }
}

/// Forward replayed then live events to one subscriber, deduplicating by
/// sequence number and stopping after the terminal event.
async fn forward_events(
    inner: Arc<Inner>,
    job_id: JobId,
    replay: Vec<ProgressEvent>,
    mut live: broadcast::Receiver<ProgressEvent>,
    mut terminated: bool,
    tx: mpsc::Sender<ProgressEvent>,
) {
    let mut last_seq = 0u64;

    for event in replay {
        let is_terminal = event.is_terminal();
        last_seq = event.sequence_number;
        if tx.send(event).await.is_err() {
            return;
        }
        if is_terminal {
            return;
        }
    }
    if terminated {
        // The terminal event predates the replay window; nothing further
        // will ever arrive.
        return;
    }

    loop {
        match live.recv().await {
            Ok(event) => {
                if event.sequence_number <= last_seq {
                    continue;
                }
                let is_terminal = event.is_terminal();
                last_seq = event.sequence_number;
                if tx.send(event).await.is_err() {
                    return;
                }
                if is_terminal {
                    return;
                }
            }
            Err(broadcast::error::RecvError::Lagged(_)) => {
                // Catch up from the retained buffer so the subscriber
                // sees no gap.
                let catchup: Vec<ProgressEvent> = {
                    let streams = inner.streams.read().await;
                    match streams.get(&job_id) {
                        Some(s) => {
                            terminated = s.terminated;
                            s.retained
                                .iter()
                                .filter(|e| e.sequence_number > last_seq)
                                .cloned()
                                .collect()
                        }
                        None => return,
                    }
                };
                for event in catchup {
                    let is_terminal = event.is_terminal();
                    last_seq = event.sequence_number;
                    if tx.send(event).await.is_err() {
                        return;
                    }
                    if is_terminal {
                        return;
                    }
                }
                if terminated {
                    return;
                }
            }
            Err(broadcast::error::RecvError::Closed) => return,
        }
    }
}
