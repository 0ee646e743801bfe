//! Debounced Commit Queue.
//!
//! Collapses a burst of quantity changes on one line into a single commit.
//! Each line owns an independent timer; every push resets it and replaces
//! the pending value. Only when the timer fires with no further input is the
//! commit callback invoked, carrying the last value pushed.
//!
//! An in-flight commit is never cancelled here; only the not-yet-fired timer
//! is. Stale timers are guarded by a per-push sequence number in addition to
//! being aborted on supersession.

use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;

use cart_sync_core::LineId;
use futures::future::{BoxFuture, join_all};
use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::timer::ScheduledTask;

/// Callback invoked with `(line, quantity)` once a line's input quiesces.
pub type CommitFn = Arc<dyn Fn(LineId, u32) -> BoxFuture<'static, ()> + Send + Sync>;

struct PendingCommit {
    quantity: u32,
    seq: u64,
    timer: ScheduledTask,
}

#[derive(Default)]
struct QueueState {
    pending: HashMap<LineId, PendingCommit>,
    next_seq: u64,
}

/// Per-line debounce timers in front of the commit callback.
#[derive(Clone)]
pub struct DebouncedCommitQueue {
    state: Arc<Mutex<QueueState>>,
    delay: Duration,
    commit: CommitFn,
}

impl std::fmt::Debug for DebouncedCommitQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DebouncedCommitQueue")
            .field("delay", &self.delay)
            .field("pending", &self.state.lock().pending.len())
            .finish_non_exhaustive()
    }
}

impl DebouncedCommitQueue {
    /// Create a queue with the given quiet period.
    #[must_use]
    pub fn new(delay: Duration, commit: CommitFn) -> Self {
        Self {
            state: Arc::new(Mutex::new(QueueState::default())),
            delay,
            commit,
        }
    }

    /// Record a new value for a line and restart its timer.
    ///
    /// Must be called from within a tokio runtime.
    pub fn push(&self, line_id: &LineId, quantity: u32) {
        let mut state = self.state.lock();
        state.next_seq += 1;
        let seq = state.next_seq;

        let timer = ScheduledTask::after(
            self.delay,
            fire(
                Arc::downgrade(&self.state),
                Arc::clone(&self.commit),
                line_id.clone(),
                seq,
            ),
        );

        // Replacing the entry aborts the superseded timer.
        state.pending.insert(
            line_id.clone(),
            PendingCommit {
                quantity,
                seq,
                timer,
            },
        );
        trace!(line_id = %line_id, quantity, seq, "Quantity change debounced");
    }

    /// The value waiting to be committed for a line.
    #[must_use]
    pub fn pending(&self, line_id: &LineId) -> Option<u32> {
        self.state.lock().pending.get(line_id).map(|p| p.quantity)
    }

    /// Drop a line's pending value without committing it.
    pub fn cancel(&self, line_id: &LineId) -> Option<u32> {
        let removed = self.state.lock().pending.remove(line_id)?;
        removed.timer.cancel();
        debug!(line_id = %line_id, "Pending quantity commit cancelled");
        Some(removed.quantity)
    }

    /// Commit a line's pending value now. Returns whether anything was pending.
    pub async fn flush(&self, line_id: &LineId) -> bool {
        let Some(quantity) = self.cancel(line_id) else {
            return false;
        };
        (self.commit)(line_id.clone(), quantity).await;
        true
    }

    /// Commit every pending value now.
    pub async fn flush_all(&self) {
        let drained: Vec<(LineId, u32)> = {
            let mut state = self.state.lock();
            state
                .pending
                .drain()
                .map(|(line_id, pending)| {
                    pending.timer.cancel();
                    (line_id, pending.quantity)
                })
                .collect()
        };
        join_all(
            drained
                .into_iter()
                .map(|(line_id, quantity)| (self.commit)(line_id, quantity)),
        )
        .await;
    }

    /// Drop every pending value and abort every timer.
    pub fn clear(&self) {
        self.state.lock().pending.clear();
    }

    /// Number of lines with a pending value.
    #[must_use]
    pub fn len(&self) -> usize {
        self.state.lock().pending.len()
    }

    /// Whether no line has a pending value.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Timer body: commits the pending value if this push is still the latest.
async fn fire(state: Weak<Mutex<QueueState>>, commit: CommitFn, line_id: LineId, seq: u64) {
    let Some(state) = state.upgrade() else {
        return;
    };

    let quantity = {
        let mut guard = state.lock();
        if guard.pending.get(&line_id).is_none_or(|p| p.seq != seq) {
            return;
        }
        let Some(pending) = guard.pending.remove(&line_id) else {
            return;
        };
        // Removing our own handle must not abort the commit below.
        pending.timer.detach();
        pending.quantity
    };
    drop(state);

    debug!(line_id = %line_id, quantity, "Committing debounced quantity");
    commit(line_id, quantity).await;
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    type Calls = Arc<Mutex<Vec<(LineId, u32)>>>;

    fn recording_queue(delay_ms: u64) -> (DebouncedCommitQueue, Calls) {
        let calls: Calls = Arc::new(Mutex::new(Vec::new()));
        let recorded = Arc::clone(&calls);
        let commit: CommitFn = Arc::new(move |line_id, quantity| {
            let recorded = Arc::clone(&recorded);
            Box::pin(async move {
                recorded.lock().push((line_id, quantity));
            })
        });
        (
            DebouncedCommitQueue::new(Duration::from_millis(delay_ms), commit),
            calls,
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_burst_commits_once_with_last_value() {
        let (queue, calls) = recording_queue(300);
        let line = LineId::new("l1");

        for quantity in 2..=6 {
            queue.push(&line, quantity);
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        assert!(calls.lock().is_empty());
        assert_eq!(queue.pending(&line), Some(6));

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(*calls.lock(), vec![(line.clone(), 6)]);
        assert_eq!(queue.pending(&line), None);
        assert!(queue.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_lines_are_independent() {
        let (queue, calls) = recording_queue(300);
        queue.push(&LineId::new("l1"), 2);
        tokio::time::sleep(Duration::from_millis(200)).await;
        queue.push(&LineId::new("l2"), 7);

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(*calls.lock(), vec![(LineId::new("l1"), 2)]);

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(calls.lock().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_prevents_commit() {
        let (queue, calls) = recording_queue(300);
        let line = LineId::new("l1");
        queue.push(&line, 4);

        assert_eq!(queue.cancel(&line), Some(4));
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert!(calls.lock().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_flush_commits_immediately_once() {
        let (queue, calls) = recording_queue(300);
        let line = LineId::new("l1");
        queue.push(&line, 4);

        assert!(queue.flush(&line).await);
        assert_eq!(*calls.lock(), vec![(line.clone(), 4)]);

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(calls.lock().len(), 1);
        assert!(!queue.flush(&line).await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_flush_all() {
        let (queue, calls) = recording_queue(300);
        queue.push(&LineId::new("l1"), 1);
        queue.push(&LineId::new("l2"), 2);

        queue.flush_all().await;
        assert_eq!(calls.lock().len(), 2);
        assert!(queue.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_clear_drops_timers() {
        let (queue, calls) = recording_queue(300);
        queue.push(&LineId::new("l1"), 3);
        queue.clear();

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert!(calls.lock().is_empty());
    }
}
