//! Debounced batch writer for staff annotation edits.
//!
//! Edits are coalesced per memberId (last write wins) and flushed as one
//! batch write to the record store after a quiet period. A failed batch is
//! retried once with the identical snapshot after a fixed backoff; edits
//! arriving in the meantime accumulate separately and flush on their own
//! timer. The worker is sequential, so at most one batch write is ever in
//! flight per queue.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::DeskError;
use crate::member::{now_ms, AnnotationEdit};
use crate::store::SharedStore;

#[derive(Debug, Clone, Copy)]
pub struct QueueConfig {
    /// Quiet period before a flush. Resets on every new enqueue.
    pub debounce: Duration,
    /// Fixed delay before the single retry of a failed batch.
    pub retry_backoff: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            debounce: Duration::from_millis(2000),
            retry_backoff: Duration::from_millis(5000),
        }
    }
}

#[derive(Default)]
pub struct QueueStats {
    pub pending: AtomicUsize,
    pub flushed_edits: AtomicUsize,
    pub flush_calls: AtomicUsize,
    pub flush_failures: AtomicUsize,
    pub retries: AtomicUsize,
}

impl QueueStats {
    pub fn snapshot(&self) -> serde_json::Value {
        serde_json::json!({
            "pending": self.pending.load(Ordering::Relaxed),
            "flushed_edits": self.flushed_edits.load(Ordering::Relaxed),
            "flush_calls": self.flush_calls.load(Ordering::Relaxed),
            "flush_failures": self.flush_failures.load(Ordering::Relaxed),
            "retries": self.retries.load(Ordering::Relaxed),
        })
    }
}

enum Msg {
    Enqueue(AnnotationEdit),
    Flush(oneshot::Sender<Result<usize, DeskError>>),
}

/// Handle to the queue worker. Explicitly constructed and owned — create one
/// at startup, pass clones to whoever enqueues, flush it at teardown.
#[derive(Clone)]
pub struct AnnotationQueue {
    tx: mpsc::UnboundedSender<Msg>,
    stats: Arc<QueueStats>,
}

impl AnnotationQueue {
    pub fn spawn(store: SharedStore, config: QueueConfig) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let stats = Arc::new(QueueStats::default());
        let worker_stats = stats.clone();
        let handle = tokio::spawn(run_worker(store, config, worker_stats, rx));
        (Self { tx, stats }, handle)
    }

    /// Insert or overwrite the pending edit for this member and (re-)arm the
    /// debounce timer. Stamps the timestamp when the caller left it unset.
    pub fn enqueue(&self, mut edit: AnnotationEdit) -> Result<(), DeskError> {
        if edit.timestamp.is_none() {
            edit.timestamp = Some(now_ms());
        }
        self.tx
            .send(Msg::Enqueue(edit))
            .map_err(|_| DeskError::Internal("annotation queue stopped".into()))
    }

    /// Forced flush: cancel the debounce and write everything pending now.
    /// Returns the number of edits written. On failure the batch is merged
    /// back into pending (newer edits win) and the error is returned.
    pub async fn flush(&self) -> Result<usize, DeskError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(Msg::Flush(reply_tx))
            .map_err(|_| DeskError::Internal("annotation queue stopped".into()))?;
        reply_rx
            .await
            .map_err(|_| DeskError::Internal("annotation queue stopped".into()))?
    }

    pub fn stats(&self) -> &QueueStats {
        &self.stats
    }
}

struct Worker {
    store: SharedStore,
    config: QueueConfig,
    stats: Arc<QueueStats>,
    pending: HashMap<String, AnnotationEdit>,
}

async fn run_worker(
    store: SharedStore,
    config: QueueConfig,
    stats: Arc<QueueStats>,
    mut rx: mpsc::UnboundedReceiver<Msg>,
) {
    let mut w = Worker { store, config, stats, pending: HashMap::new() };

    loop {
        if w.pending.is_empty() {
            // Idle: wait for the first message.
            let msg = match rx.recv().await {
                Some(m) => m,
                None => return,
            };
            match msg {
                Msg::Flush(reply) => {
                    let _ = reply.send(w.flush_once().await);
                    continue;
                }
                Msg::Enqueue(edit) => w.insert(edit),
            }
        }

        // Pending: quiet-period debounce. Restarting the timeout on every
        // enqueue is what makes this a debounce rather than an interval.
        // Edits left over from a failed flush re-enter here too, so nothing
        // ever sits in the map without a timer armed.
        match tokio::time::timeout(w.config.debounce, rx.recv()).await {
            Ok(Some(Msg::Enqueue(edit))) => w.insert(edit),
            Ok(Some(Msg::Flush(reply))) => {
                let _ = reply.send(w.flush_once().await);
            }
            Ok(None) => {
                // Channel closed mid-debounce — final chance to deliver.
                debug!(pending = w.pending.len(), "queue closing, final flush");
                let _ = w.flush_once().await;
                return;
            }
            Err(_) => w.flush_with_retry(&mut rx).await,
        }
    }
}

impl Worker {
    fn insert(&mut self, edit: AnnotationEdit) {
        self.pending.insert(edit.member_id.clone(), edit);
        self.stats.pending.store(self.pending.len(), Ordering::Relaxed);
    }

    fn take_snapshot(&mut self) -> Vec<AnnotationEdit> {
        let snapshot: Vec<AnnotationEdit> =
            std::mem::take(&mut self.pending).into_values().collect();
        self.stats.pending.store(0, Ordering::Relaxed);
        snapshot
    }

    /// Merge a failed batch back without clobbering anything enqueued since.
    fn restore_snapshot(&mut self, snapshot: Vec<AnnotationEdit>) {
        for edit in snapshot {
            self.pending.entry(edit.member_id.clone()).or_insert(edit);
        }
        self.stats.pending.store(self.pending.len(), Ordering::Relaxed);
    }

    async fn write_batch(&self, batch: &[AnnotationEdit]) -> Result<(), DeskError> {
        self.stats.flush_calls.fetch_add(1, Ordering::Relaxed);
        self.store.write_annotations_batch(batch).await?;
        // Writes landed — cached annotation reads are now stale.
        self.store.invalidate_annotations_cache().await;
        self.stats.flushed_edits.fetch_add(batch.len(), Ordering::Relaxed);
        Ok(())
    }

    /// Single-attempt flush used by the forced path and final delivery.
    async fn flush_once(&mut self) -> Result<usize, DeskError> {
        let snapshot = self.take_snapshot();
        if snapshot.is_empty() {
            return Ok(0);
        }
        let n = snapshot.len();
        match self.write_batch(&snapshot).await {
            Ok(()) => {
                info!(edits = n, "annotation batch written");
                Ok(n)
            }
            Err(e) => {
                self.stats.flush_failures.fetch_add(1, Ordering::Relaxed);
                warn!(error = %e, edits = n, "forced flush failed, edits re-queued");
                self.restore_snapshot(snapshot);
                Err(e)
            }
        }
    }

    /// Timer-fired flush: one write, and on failure one fixed-backoff retry
    /// of the identical snapshot. Edits arriving during the backoff go into
    /// pending, not into the retried batch.
    async fn flush_with_retry(&mut self, rx: &mut mpsc::UnboundedReceiver<Msg>) {
        let snapshot = self.take_snapshot();
        if snapshot.is_empty() {
            return;
        }
        let n = snapshot.len();
        match self.write_batch(&snapshot).await {
            Ok(()) => {
                info!(edits = n, "annotation batch written");
                return;
            }
            Err(e) => {
                self.stats.flush_failures.fetch_add(1, Ordering::Relaxed);
                warn!(error = %e, edits = n, backoff_ms = self.config.retry_backoff.as_millis() as u64,
                    "annotation batch write failed, will retry");
            }
        }

        // Backoff wait. Keep accepting enqueues so nothing stalls; a forced
        // flush here merges the failed batch with pending and writes the lot.
        let deadline = tokio::time::Instant::now() + self.config.retry_backoff;
        loop {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if remaining.is_zero() {
                break;
            }
            match tokio::time::timeout(remaining, rx.recv()).await {
                Ok(Some(Msg::Enqueue(edit))) => self.insert(edit),
                Ok(Some(Msg::Flush(reply))) => {
                    self.restore_snapshot(snapshot);
                    let _ = reply.send(self.flush_once().await);
                    return;
                }
                Ok(None) | Err(_) => break,
            }
        }

        self.stats.retries.fetch_add(1, Ordering::Relaxed);
        match self.write_batch(&snapshot).await {
            Ok(()) => info!(edits = n, "annotation batch written on retry"),
            Err(e) => {
                // Retry exhausted: keep the edits rather than dropping them.
                // They merge under anything newer and ride the next cycle.
                self.stats.flush_failures.fetch_add(1, Ordering::Relaxed);
                warn!(error = %e, edits = n, "annotation batch retry failed, edits re-queued");
                self.restore_snapshot(snapshot);
            }
        }
    }
}
