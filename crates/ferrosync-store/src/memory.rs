//! In-memory store
//!
//! Implements the schedule, history and connection seams over one [`Snapshot`] behind a
//! `tokio` lock. When a snapshot file is attached, every mutation is written through to it.
//! Finished runs and audit events beyond the configured [`Retention`] are dropped oldest
//! first on each write, which keeps the snapshot and its rewrite cost bounded.

use crate::snapshot::{AuditEvent, Snapshot};
use async_trait::async_trait;
use chrono::Utc;
use ferrosync_types::{
    Connection, ConnectionRegistry, Error, HistoryQuery, HistoryStore, Result, RunId, RunRecord,
    Schedule, ScheduleId, ScheduleStore,
};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::RwLock;
use tracing::{debug, info};

/// Upper bounds for the append-only parts of the state; `0` keeps everything
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Retention {
    /// Finished run records kept; runs still in progress are never dropped
    pub max_history: usize,
    /// Audit events kept
    pub max_audit_events: usize,
}

impl Retention {
    /// Drop the oldest entries over the limits, returning how many runs and events went
    pub fn apply(&self, state: &mut Snapshot) -> (usize, usize) {
        let mut runs = 0;
        if self.max_history > 0 && state.history.len() > self.max_history {
            let mut finished: Vec<_> = state
                .history
                .iter()
                .filter(|record| record.is_finished())
                .map(|record| (record.start_time, record.id))
                .collect();
            finished.sort_unstable();
            let dropped: HashSet<RunId> = finished
                .into_iter()
                .take(state.history.len() - self.max_history)
                .map(|(_, id)| id)
                .collect();
            state.history.retain(|record| !dropped.contains(&record.id));
            runs = dropped.len();
        }

        let mut events = 0;
        if self.max_audit_events > 0 && state.audit_log.len() > self.max_audit_events {
            events = state.audit_log.len() - self.max_audit_events;
            state.audit_log.drain(..events);
        }
        (runs, events)
    }
}

/// In-memory implementation of every persistence seam
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: RwLock<Snapshot>,
    snapshot_path: Option<PathBuf>,
    retention: Retention,
    fail_writes: AtomicBool,
}

impl MemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a store backed by a snapshot file; a missing file starts empty
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let snapshot = if tokio::fs::try_exists(&path).await.unwrap_or(false) {
            let snapshot = Snapshot::load(&path).await?;
            info!(
                path = %path.display(),
                schedules = snapshot.schedules.len(),
                runs = snapshot.history.len(),
                "Loaded state snapshot"
            );
            snapshot
        } else {
            Snapshot::default()
        };

        Ok(Self {
            state: RwLock::new(snapshot),
            snapshot_path: Some(path),
            retention: Retention::default(),
            fail_writes: AtomicBool::new(false),
        })
    }

    /// Bound history and audit log; applied from the next write on
    #[must_use]
    pub fn with_retention(mut self, retention: Retention) -> Self {
        self.retention = retention;
        self
    }

    /// Attached snapshot file
    pub fn snapshot_path(&self) -> Option<&Path> {
        self.snapshot_path.as_deref()
    }

    /// Make every write fail with a persistence error
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Register or replace a connection
    pub async fn add_connection(&self, connection: Connection) -> Result<()> {
        self.write(|state| {
            state.connections.retain(|c| c.id != connection.id);
            state.connections.push(connection);
            Ok(())
        })
        .await
    }

    /// Every registered connection
    pub async fn connections(&self) -> Vec<Connection> {
        self.state.read().await.connections.clone()
    }

    /// Audit log, oldest first
    pub async fn audit_events(&self) -> Vec<AuditEvent> {
        self.state.read().await.audit_log.clone()
    }

    /// Copy of the current state
    pub async fn snapshot(&self) -> Snapshot {
        self.state.read().await.clone()
    }

    /// Write the current state to the attached snapshot file
    pub async fn flush(&self) -> Result<()> {
        let Some(path) = &self.snapshot_path else {
            return Ok(());
        };
        let snapshot = self.state.read().await.clone();
        snapshot.save(path).await
    }

    async fn write<T, F>(&self, mutate: F) -> Result<T>
    where
        F: FnOnce(&mut Snapshot) -> Result<T> + Send,
        T: Send,
    {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(Error::persistence("store is rejecting writes"));
        }

        let mut state = self.state.write().await;
        let value = mutate(&mut state)?;
        let (runs, events) = self.retention.apply(&mut state);
        if runs + events > 0 {
            debug!(runs, events, "Dropped entries over retention");
        }
        if let Some(path) = &self.snapshot_path {
            state.save(path).await?;
            debug!(path = %path.display(), "Snapshot written");
        }
        Ok(value)
    }
}

#[async_trait]
impl ScheduleStore for MemoryStore {
    async fn create_schedule(&self, schedule: Schedule) -> Result<Schedule> {
        self.write(|state| {
            let duplicate = state
                .schedules
                .iter()
                .any(|s| s.connection_id == schedule.connection_id && s.name == schedule.name);
            if duplicate {
                return Err(Error::invalid_schedule(format!(
                    "schedule '{}' already exists for connection '{}'",
                    schedule.name, schedule.connection_id
                )));
            }
            state.schedules.push(schedule.clone());
            Ok(schedule)
        })
        .await
    }

    async fn update_schedule(&self, schedule: &Schedule) -> Result<()> {
        self.write(|state| {
            let stored = state
                .schedules
                .iter_mut()
                .find(|s| s.id == schedule.id)
                .ok_or_else(|| Error::ScheduleNotFound {
                    connection_id: schedule.connection_id.clone(),
                    name: schedule.name.clone(),
                })?;
            *stored = schedule.clone();
            Ok(())
        })
        .await
    }

    async fn delete_schedule(&self, id: ScheduleId) -> Result<()> {
        self.write(|state| {
            let before = state.schedules.len();
            state.schedules.retain(|s| s.id != id);
            if state.schedules.len() == before {
                return Err(Error::persistence(format!("schedule {id} does not exist")));
            }
            Ok(())
        })
        .await
    }

    async fn get_schedule_by_name(
        &self,
        connection_id: &str,
        name: &str,
    ) -> Result<Option<Schedule>> {
        Ok(self
            .state
            .read()
            .await
            .schedules
            .iter()
            .find(|s| s.connection_id == connection_id && s.name == name)
            .cloned())
    }

    async fn get_all_schedules(&self) -> Result<Vec<Schedule>> {
        Ok(self.state.read().await.schedules.clone())
    }

    async fn get_schedules_by_connection(&self, connection_id: &str) -> Result<Vec<Schedule>> {
        Ok(self
            .state
            .read()
            .await
            .schedules
            .iter()
            .filter(|s| s.connection_id == connection_id)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl HistoryStore for MemoryStore {
    async fn create_history_record(&self, record: &RunRecord) -> Result<()> {
        self.write(|state| {
            state.history.push(record.clone());
            Ok(())
        })
        .await
    }

    async fn update_history_record(&self, record: &RunRecord) -> Result<()> {
        self.write(|state| {
            match state.history.iter_mut().find(|r| r.id == record.id) {
                Some(stored) => *stored = record.clone(),
                // The initial insert may have been lost to a failed write.
                None => state.history.push(record.clone()),
            }
            Ok(())
        })
        .await
    }

    async fn get_history(&self, query: &HistoryQuery) -> Result<Vec<RunRecord>> {
        let state = self.state.read().await;
        let mut records: Vec<RunRecord> = state
            .history
            .iter()
            .filter(|record| query.matches(record))
            .cloned()
            .collect();
        records.sort_by(|a, b| b.start_time.cmp(&a.start_time));

        Ok(records
            .into_iter()
            .skip(query.offset)
            .take(query.limit)
            .collect())
    }

    async fn record_audit_event(&self, message: &str) -> Result<()> {
        self.write(|state| {
            state.audit_log.push(AuditEvent {
                timestamp: Utc::now(),
                message: message.to_string(),
            });
            Ok(())
        })
        .await
    }
}

#[async_trait]
impl ConnectionRegistry for MemoryStore {
    async fn get_connection(&self, id: &str) -> Result<Option<Connection>> {
        Ok(self
            .state
            .read()
            .await
            .connections
            .iter()
            .find(|c| c.id == id)
            .cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use ferrosync_types::{Endpoint, Frequency};
    use rstest::rstest;
    use tempfile::TempDir;

    fn schedule(connection: &str, name: &str) -> Schedule {
        Schedule::new(
            connection,
            name,
            Endpoint::ftp("/out"),
            Endpoint::local("/in"),
            Frequency::Daily,
        )
    }

    #[tokio::test]
    async fn test_schedule_crud() {
        let store = MemoryStore::new();
        let created = store.create_schedule(schedule("c1", "nightly")).await.unwrap();
        store.create_schedule(schedule("c2", "nightly")).await.unwrap();

        assert!(store.create_schedule(schedule("c1", "nightly")).await.is_err());
        assert_eq!(store.get_all_schedules().await.unwrap().len(), 2);
        assert_eq!(store.get_schedules_by_connection("c1").await.unwrap().len(), 1);

        let mut updated = created.clone();
        updated.enabled = false;
        store.update_schedule(&updated).await.unwrap();
        let fetched = store.get_schedule_by_name("c1", "nightly").await.unwrap().unwrap();
        assert!(!fetched.enabled);

        store.delete_schedule(created.id).await.unwrap();
        assert!(store.get_schedule_by_name("c1", "nightly").await.unwrap().is_none());
        assert!(store.delete_schedule(created.id).await.is_err());
    }

    #[rstest]
    #[case(0, 2, vec![4, 3])]
    #[case(2, 2, vec![2, 1])]
    #[case(4, 10, vec![0])]
    #[tokio::test]
    async fn test_history_paging_newest_first(
        #[case] offset: usize,
        #[case] limit: usize,
        #[case] expected_minutes: Vec<i64>,
    ) {
        let store = MemoryStore::new();
        let sched = schedule("c1", "nightly");
        let base = Utc::now();
        for minutes in 0..5 {
            let record = RunRecord::start(&sched, base + Duration::minutes(minutes));
            store.create_history_record(&record).await.unwrap();
        }
        store
            .create_history_record(&RunRecord::start(&schedule("c2", "other"), base))
            .await
            .unwrap();

        let page = store
            .get_history(&HistoryQuery::for_schedule(sched.id).page(limit, offset))
            .await
            .unwrap();
        let minutes: Vec<i64> = page
            .iter()
            .map(|r| (r.start_time - base).num_minutes())
            .collect();
        assert_eq!(minutes, expected_minutes);
    }

    #[tokio::test]
    async fn test_failed_writes_are_persistence_errors() {
        let store = MemoryStore::new();
        store.set_fail_writes(true);

        let error = store.record_audit_event("hello").await.unwrap_err();
        assert!(matches!(error, Error::Persistence { .. }));
        assert!(store.audit_events().await.is_empty());
    }

    #[tokio::test]
    async fn test_snapshot_survives_reopen() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("state.yaml");

        {
            let store = MemoryStore::open(&path).await.unwrap();
            store
                .add_connection(Connection::new("c1", "ftp.example.com", "u", "p"))
                .await
                .unwrap();
            store.create_schedule(schedule("c1", "nightly")).await.unwrap();
            store.record_audit_event("created").await.unwrap();
        }

        let reopened = MemoryStore::open(&path).await.unwrap();
        assert!(reopened.get_connection("c1").await.unwrap().is_some());
        assert!(reopened
            .get_schedule_by_name("c1", "nightly")
            .await
            .unwrap()
            .is_some());
        assert_eq!(reopened.audit_events().await.len(), 1);
    }

    #[tokio::test]
    async fn test_retention_drops_oldest_finished_runs_and_events() {
        let store = MemoryStore::new().with_retention(Retention {
            max_history: 2,
            max_audit_events: 3,
        });
        let sched = schedule("c1", "nightly");
        let base = Utc::now();

        let in_progress = RunRecord::start(&sched, base - Duration::hours(1));
        store.create_history_record(&in_progress).await.unwrap();
        for minutes in 0..3 {
            let mut record = RunRecord::start(&sched, base + Duration::minutes(minutes));
            record.succeed(base + Duration::minutes(minutes) + Duration::seconds(5));
            store.create_history_record(&record).await.unwrap();
        }
        for n in 0..5 {
            store.record_audit_event(&format!("event {n}")).await.unwrap();
        }

        let history = store
            .get_history(&HistoryQuery::for_schedule(sched.id))
            .await
            .unwrap();
        let ids: Vec<_> = history.iter().map(|r| r.id).collect();
        assert_eq!(history.len(), 2);
        assert!(ids.contains(&in_progress.id));
        assert_eq!((history[0].start_time - base).num_minutes(), 2);

        let events: Vec<_> = store
            .audit_events()
            .await
            .into_iter()
            .map(|e| e.message)
            .collect();
        assert_eq!(events, vec!["event 2", "event 3", "event 4"]);
    }
}
