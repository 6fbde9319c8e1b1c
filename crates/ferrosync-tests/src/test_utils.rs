//! Unified test utilities for FerroSync integration tests

use chrono::{TimeDelta, Utc};
use ferrosync_config::SchedulerSettings;
use ferrosync_engine::{Scheduler, SyncExecutor};
use ferrosync_store::MemoryStore;
use ferrosync_transport::MemoryRemote;
use ferrosync_types::{
    Connection, Endpoint, Frequency, RetryConfig, Schedule, ScheduleStore,
};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;

/// Connection registered by every harness
pub const CONNECTION_ID: &str = "conn-1";

/// Attempts allowed per connect and per transfer
pub const RETRY_BUDGET: u32 = 3;

/// Scheduler wired to an in-memory server and a fresh store
pub struct SyncHarness {
    /// In-memory FTP server
    pub remote: MemoryRemote,
    /// State store shared with the scheduler
    pub store: Arc<MemoryStore>,
    /// Scheduler under test
    pub scheduler: Scheduler,
    /// Scratch directory for local endpoints
    pub workspace: TempDir,
}

impl SyncHarness {
    /// Harness with an in-memory store
    pub async fn new() -> Self {
        Self::with_store(Arc::new(MemoryStore::new()), MemoryRemote::new()).await
    }

    /// Harness around an existing store and server
    pub async fn with_store(store: Arc<MemoryStore>, remote: MemoryRemote) -> Self {
        Self::with_settings(store, remote, test_settings()).await
    }

    /// Harness with explicit scheduler settings
    pub async fn with_settings(
        store: Arc<MemoryStore>,
        remote: MemoryRemote,
        settings: SchedulerSettings,
    ) -> Self {
        if store.connections().await.is_empty() {
            store
                .add_connection(test_connection())
                .await
                .expect("Failed to register test connection");
        }

        let executor = SyncExecutor::new(Arc::new(remote.clone()), store.clone())
            .with_retry(
                RetryConfig::immediate(RETRY_BUDGET),
                RetryConfig::immediate(RETRY_BUDGET),
            );
        Self {
            remote,
            scheduler: Scheduler::new(settings, store.clone(), executor),
            store,
            workspace: TempDir::new().expect("Failed to create workspace"),
        }
    }

    /// Path inside the scratch directory
    pub fn local(&self, relative: &str) -> PathBuf {
        self.workspace.path().join(relative)
    }

    /// Write a local file, creating its parent directories
    pub fn write_local(&self, relative: &str, contents: &str) -> PathBuf {
        let path = self.local(relative);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("Failed to create test directory");
        }
        fs::write(&path, contents).expect("Failed to write test file");
        path
    }

    /// Download schedule from `/out` into `<workspace>/<name>`
    pub fn download(&self, name: &str, frequency: Frequency) -> Schedule {
        Schedule::new(
            CONNECTION_ID,
            name,
            Endpoint::ftp("/out"),
            Endpoint::local(self.local(name)),
            frequency,
        )
    }

    /// Upload schedule from `<workspace>/<source>` into `remote`
    pub fn upload(&self, name: &str, source: &str, remote: &str) -> Schedule {
        Schedule::new(
            CONNECTION_ID,
            name,
            Endpoint::local(self.local(source)),
            Endpoint::ftp(remote),
            Frequency::Daily,
        )
    }

    /// Store a schedule whose `nextRun` passed a minute ago, bypassing validation
    pub async fn store_due(&self, mut schedule: Schedule) -> Schedule {
        schedule.next_run = Some(Utc::now() - TimeDelta::minutes(1));
        self.store
            .create_schedule(schedule)
            .await
            .expect("Failed to store schedule")
    }
}

/// Scheduler settings with UTC trigger times
pub fn test_settings() -> SchedulerSettings {
    SchedulerSettings {
        max_concurrent_runs: 4,
        use_local_time: false,
        ..SchedulerSettings::default()
    }
}

/// The connection every harness registers
pub fn test_connection() -> Connection {
    Connection::new(CONNECTION_ID, "ftp.example.com", "sync", "secret")
}

/// Read a local file as UTF-8
pub fn read_local(path: &Path) -> String {
    fs::read_to_string(path).expect("Failed to read local file")
}
