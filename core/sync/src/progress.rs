//! Progress notifications for synchronization runs.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::mpsc;

/// Event emitted to progress subscribers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncEvent {
    /// Bytes the run is about to transfer, sent once before any byte moves.
    TotalSize(u64),
    /// Cumulative bytes transferred so far in the run.
    Progress(u64),
}

/// Fan-out of [`SyncEvent`]s to any number of subscribers.
///
/// Sends never block and never fail; subscribers that have dropped their
/// receiver are pruned on the next send. Within a run, `Progress` values
/// are non-decreasing.
#[derive(Debug, Default)]
pub struct ProgressHub {
    subscribers: Mutex<Vec<mpsc::UnboundedSender<SyncEvent>>>,
    reported: AtomicU64,
}

impl ProgressHub {
    /// Create a hub with no subscribers.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new subscriber.
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<SyncEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(tx);
        rx
    }

    /// Announce the size of a new run and reset the progress counter.
    pub fn total(&self, bytes: u64) {
        self.reported.store(0, Ordering::SeqCst);
        self.broadcast(SyncEvent::TotalSize(bytes));
    }

    /// Report cumulative progress. Values below the last report are dropped.
    pub fn progress(&self, bytes: u64) {
        let previous = self.reported.fetch_max(bytes, Ordering::SeqCst);
        if bytes >= previous {
            self.broadcast(SyncEvent::Progress(bytes));
        }
    }

    /// Last progress value reported in the current run.
    pub fn reported(&self) -> u64 {
        self.reported.load(Ordering::SeqCst)
    }

    fn broadcast(&self, event: SyncEvent) {
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|tx| tx.send(event).is_ok());
    }
}

/// Progress sink for one transfer item.
///
/// Converts the item's own byte count into the run's cumulative count.
#[derive(Debug, Clone)]
pub struct ProgressReporter {
    hub: Arc<ProgressHub>,
    base: u64,
}

impl ProgressReporter {
    /// Reporter for an item starting after `base` bytes of the run.
    pub fn new(hub: Arc<ProgressHub>, base: u64) -> Self {
        Self { hub, base }
    }

    /// Report that `item_bytes` of the current item have moved.
    pub fn report(&self, item_bytes: u64) {
        self.hub.progress(self.base + item_bytes);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drain(rx: &mut mpsc::UnboundedReceiver<SyncEvent>) -> Vec<SyncEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    #[test]
    fn test_events_reach_all_subscribers() {
        let hub = ProgressHub::new();
        let mut first = hub.subscribe();
        let mut second = hub.subscribe();

        hub.total(10);
        hub.progress(4);

        let expected = vec![SyncEvent::TotalSize(10), SyncEvent::Progress(4)];
        assert_eq!(drain(&mut first), expected);
        assert_eq!(drain(&mut second), expected);
    }

    #[test]
    fn test_progress_is_monotonic() {
        let hub = ProgressHub::new();
        let mut rx = hub.subscribe();

        hub.total(100);
        hub.progress(30);
        hub.progress(20);
        hub.progress(30);
        hub.progress(50);

        assert_eq!(
            drain(&mut rx),
            vec![
                SyncEvent::TotalSize(100),
                SyncEvent::Progress(30),
                SyncEvent::Progress(30),
                SyncEvent::Progress(50),
            ]
        );
    }

    #[test]
    fn test_total_resets_counter() {
        let hub = ProgressHub::new();
        hub.progress(500);
        hub.total(10);
        assert_eq!(hub.reported(), 0);
    }

    #[test]
    fn test_dropped_subscriber_is_pruned() {
        let hub = ProgressHub::new();
        let rx = hub.subscribe();
        drop(rx);
        hub.total(1);
        assert!(hub.subscribers.lock().unwrap().is_empty());
    }

    #[test]
    fn test_reporter_offsets_item_bytes() {
        let hub = Arc::new(ProgressHub::new());
        let mut rx = hub.subscribe();
        let reporter = ProgressReporter::new(hub.clone(), 100);

        reporter.report(5);
        assert_eq!(drain(&mut rx), vec![SyncEvent::Progress(105)]);
    }
}
