//! Viewer registry and broadcast primitive with per-viewer backpressure
//! eviction: a slow viewer's full queue gets that viewer closed, never a
//! blocked broadcast.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, RwLock};
use uuid::Uuid;

use crate::telemetry::Telemetry;

/// Minimum per-viewer outbound queue capacity, in frames. The spec pins
/// this to a tunable rather than a hidden constant; the default below
/// approximates "~2 seconds at a typical bitrate" in frame-count terms
/// since the queue holds discrete chunks, not raw bytes — see
/// `Config`-derived sizing in `coordinator`.
pub const DEFAULT_QUEUE_CAPACITY: usize = 1024;

/// What travels down a viewer's outbound queue. `Close` lets the
/// coordinator hand a specific WebSocket close code to the per-viewer
/// writer task through the same FIFO channel live bytes flow over, so a
/// close is never reordered ahead of bytes already queued.
#[derive(Debug, Clone)]
pub enum ViewerFrame {
    Data(Bytes),
    Close(u16),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueResult {
    Enqueued,
    QueueFull,
    Closed,
}

pub struct Viewer {
    pub id: Uuid,
    pub connected_at: Instant,
    sender: mpsc::Sender<ViewerFrame>,
}

pub struct ClientManager {
    viewers: RwLock<HashMap<Uuid, Viewer>>,
    queue_capacity: usize,
    telemetry: Arc<Telemetry>,
}

impl ClientManager {
    pub fn new(queue_capacity: usize, telemetry: Arc<Telemetry>) -> Self {
        Self {
            viewers: RwLock::new(HashMap::new()),
            queue_capacity: queue_capacity.max(1),
            telemetry,
        }
    }

    /// Register a viewer and return its id plus the receiver half of its
    /// outbound queue, which the caller's per-viewer writer task drains.
    pub async fn add(&self) -> (Uuid, mpsc::Receiver<ViewerFrame>) {
        let id = Uuid::new_v4();
        let (tx, rx) = mpsc::channel(self.queue_capacity);

        let viewer = Viewer {
            id,
            connected_at: Instant::now(),
            sender: tx,
        };

        self.viewers.write().await.insert(id, viewer);
        (id, rx)
    }

    /// Remove and close a viewer's sink. Idempotent.
    pub async fn remove(&self, id: Uuid) {
        self.viewers.write().await.remove(&id);
    }

    pub async fn count(&self) -> usize {
        self.viewers.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.viewers.read().await.is_empty()
    }

    /// Send a single payload to one viewer's queue (used to deliver the
    /// bootstrap blob to a newly-admitted viewer before any live bytes).
    pub async fn send_to(&self, id: Uuid, payload: Bytes) -> EnqueueResult {
        self.send_frame_to(id, ViewerFrame::Data(payload)).await
    }

    /// Queue a close frame for one viewer and drop it from the registry.
    /// The writer task still drains any bytes queued ahead of the close,
    /// then sends the close and ends.
    pub async fn close(&self, id: Uuid, code: u16) {
        let _ = self.send_frame_to(id, ViewerFrame::Close(code)).await;
        self.remove(id).await;
    }

    /// Queue a close frame for every current viewer and clear the
    /// registry. Used on fault transitions and orderly shutdown.
    pub async fn close_all(&self, code: u16) {
        let ids: Vec<Uuid> = self.viewers.read().await.keys().copied().collect();
        for id in ids {
            self.close(id, code).await;
        }
    }

    async fn send_frame_to(&self, id: Uuid, frame: ViewerFrame) -> EnqueueResult {
        let sender = {
            let viewers = self.viewers.read().await;
            viewers.get(&id).map(|viewer| viewer.sender.clone())
        };

        match sender {
            Some(sender) => self.try_enqueue(id, &sender, frame).await,
            None => EnqueueResult::Closed,
        }
    }

    /// Enqueue `bytes` to every current viewer. A viewer whose queue is
    /// full is evicted rather than allowed to stall the rest; a viewer
    /// whose receiver has dropped is removed as stale.
    pub async fn broadcast(&self, bytes: Bytes) {
        let senders: Vec<(Uuid, mpsc::Sender<ViewerFrame>)> = {
            let viewers = self.viewers.read().await;
            viewers
                .values()
                .map(|viewer| (viewer.id, viewer.sender.clone()))
                .collect()
        };

        let mut to_evict = Vec::new();
        for (id, sender) in senders {
            match self
                .try_enqueue(id, &sender, ViewerFrame::Data(bytes.clone()))
                .await
            {
                EnqueueResult::Enqueued => {}
                EnqueueResult::QueueFull | EnqueueResult::Closed => to_evict.push(id),
            }
        }

        for id in to_evict {
            self.remove(id).await;
        }
    }

    async fn try_enqueue(&self, id: Uuid, sender: &mpsc::Sender<ViewerFrame>, frame: ViewerFrame) -> EnqueueResult {
        match sender.try_send(frame) {
            Ok(()) => EnqueueResult::Enqueued,
            Err(TrySendError::Full(_)) => {
                self.telemetry.inc_viewer_evicted_backpressure();
                tracing::warn!(viewer_id = %id, "evicting viewer: outbound queue full");
                EnqueueResult::QueueFull
            }
            Err(TrySendError::Closed(_)) => EnqueueResult::Closed,
        }
    }
}
