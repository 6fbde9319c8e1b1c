//! Run events and scheduler statistics

use chrono::{DateTime, Utc};
use ferrosync_types::{FileStatus, JobKey, RunId, RunStatus};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tokio::sync::broadcast;

/// Progress notification emitted by the executor
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunEvent {
    /// A run created its history record
    Started {
        /// History record id
        run_id: RunId,
        /// Schedule identity
        key: JobKey,
    },
    /// One file reached its final outcome
    FileFinished {
        /// History record id
        run_id: RunId,
        /// Path relative to the sync root
        file: String,
        /// Outcome
        status: FileStatus,
        /// Bytes transferred, or the listed size for skipped/failed files
        size: u64,
    },
    /// The run was finalized
    Finished {
        /// History record id
        run_id: RunId,
        /// Final status
        status: RunStatus,
        /// Files transferred
        files_transferred: u64,
        /// Bytes transferred
        total_bytes: u64,
    },
}

/// Broadcast channel for [`RunEvent`]s
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<RunEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(Self::DEFAULT_CAPACITY)
    }
}

impl EventBus {
    /// Events buffered per slow subscriber
    pub const DEFAULT_CAPACITY: usize = 256;

    /// Create a bus
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Receive future events
    pub fn subscribe(&self) -> broadcast::Receiver<RunEvent> {
        self.sender.subscribe()
    }

    /// Publish an event; having no subscribers is fine
    pub fn publish(&self, event: RunEvent) {
        let _ = self.sender.send(event);
    }
}

/// Point-in-time scheduler counters
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SchedulerStats {
    /// Ticks performed
    pub ticks: u64,
    /// Runs dispatched, automatic and manual
    pub dispatched: u64,
    /// Runs finalized as success
    pub succeeded: u64,
    /// Runs finalized as failed
    pub failed: u64,
    /// Dispatches rejected by the in-flight guard
    pub rejected_duplicates: u64,
    /// Stale `running` statuses reset by the watchdog
    pub stale_resets: u64,
    /// Files transferred across all runs
    pub files_transferred: u64,
    /// Bytes transferred across all runs
    pub bytes_transferred: u64,
    /// Seconds since the collector was created
    pub uptime_secs: u64,
}

impl SchedulerStats {
    /// Percentage of finished runs that succeeded
    pub fn success_rate(&self) -> f64 {
        let finished = self.succeeded + self.failed;
        if finished > 0 {
            (self.succeeded as f64 / finished as f64) * 100.0
        } else {
            0.0
        }
    }
}

/// Lock-free counters behind [`SchedulerStats`]
#[derive(Debug)]
pub struct StatsCollector {
    ticks: AtomicU64,
    dispatched: AtomicU64,
    succeeded: AtomicU64,
    failed: AtomicU64,
    rejected_duplicates: AtomicU64,
    stale_resets: AtomicU64,
    files_transferred: AtomicU64,
    bytes_transferred: AtomicU64,
    started: Instant,
    last_tick: std::sync::Mutex<Option<DateTime<Utc>>>,
}

impl Default for StatsCollector {
    fn default() -> Self {
        Self {
            ticks: AtomicU64::new(0),
            dispatched: AtomicU64::new(0),
            succeeded: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            rejected_duplicates: AtomicU64::new(0),
            stale_resets: AtomicU64::new(0),
            files_transferred: AtomicU64::new(0),
            bytes_transferred: AtomicU64::new(0),
            started: Instant::now(),
            last_tick: std::sync::Mutex::new(None),
        }
    }
}

impl StatsCollector {
    /// Count a tick
    pub fn record_tick(&self, at: DateTime<Utc>) {
        self.ticks.fetch_add(1, Ordering::Relaxed);
        if let Ok(mut last_tick) = self.last_tick.lock() {
            *last_tick = Some(at);
        }
    }

    /// Count a dispatch
    pub fn record_dispatch(&self) {
        self.dispatched.fetch_add(1, Ordering::Relaxed);
    }

    /// Count a guard rejection
    pub fn record_duplicate(&self) {
        self.rejected_duplicates.fetch_add(1, Ordering::Relaxed);
    }

    /// Count stale resets
    pub fn record_stale_resets(&self, count: u64) {
        self.stale_resets.fetch_add(count, Ordering::Relaxed);
    }

    /// Count a finished run
    pub fn record_run(&self, success: bool, files: u64, bytes: u64) {
        if success {
            self.succeeded.fetch_add(1, Ordering::Relaxed);
        } else {
            self.failed.fetch_add(1, Ordering::Relaxed);
        }
        self.files_transferred.fetch_add(files, Ordering::Relaxed);
        self.bytes_transferred.fetch_add(bytes, Ordering::Relaxed);
    }

    /// Time of the last tick
    pub fn last_tick(&self) -> Option<DateTime<Utc>> {
        self.last_tick.lock().ok().and_then(|last_tick| *last_tick)
    }

    /// Current counters
    pub fn snapshot(&self) -> SchedulerStats {
        SchedulerStats {
            ticks: self.ticks.load(Ordering::Relaxed),
            dispatched: self.dispatched.load(Ordering::Relaxed),
            succeeded: self.succeeded.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            rejected_duplicates: self.rejected_duplicates.load(Ordering::Relaxed),
            stale_resets: self.stale_resets.load(Ordering::Relaxed),
            files_transferred: self.files_transferred.load(Ordering::Relaxed),
            bytes_transferred: self.bytes_transferred.load(Ordering::Relaxed),
            uptime_secs: self.started.elapsed().as_secs(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn test_counters() {
        let stats = StatsCollector::default();
        stats.record_tick(Utc::now());
        stats.record_dispatch();
        stats.record_dispatch();
        stats.record_run(true, 3, 300);
        stats.record_run(false, 0, 0);
        stats.record_duplicate();

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.ticks, 1);
        assert_eq!(snapshot.dispatched, 2);
        assert_eq!(snapshot.files_transferred, 3);
        assert_eq!(snapshot.rejected_duplicates, 1);
        assert!((snapshot.success_rate() - 50.0).abs() < f64::EPSILON);
        assert!(stats.last_tick().is_some());
    }

    #[tokio::test]
    async fn test_event_bus_fans_out() {
        let bus = EventBus::default();
        bus.publish(RunEvent::Started {
            run_id: Uuid::new_v4(),
            key: JobKey::new("c1", "lost"),
        });

        let mut receiver = bus.subscribe();
        let run_id = Uuid::new_v4();
        bus.publish(RunEvent::Finished {
            run_id,
            status: RunStatus::Success,
            files_transferred: 1,
            total_bytes: 10,
        });

        match receiver.recv().await.unwrap() {
            RunEvent::Finished { run_id: received, .. } => assert_eq!(received, run_id),
            other => panic!("unexpected event {other:?}"),
        }
    }
}
