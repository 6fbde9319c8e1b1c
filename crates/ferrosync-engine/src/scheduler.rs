//! Scheduler loop
//!
//! The [`Scheduler`] periodically looks for due schedules and dispatches each one onto its
//! own task. A tick never waits for the runs it dispatches.
//!
//! Per-schedule state (`status`, `lastRun`, `nextRun`) is only written while holding that
//! schedule's key in the [`JobTable`]. The key is claimed before the schedule is re-read
//! and released only after the completion state has been persisted, so two ticks or two
//! manual triggers can never both observe "not running" and both dispatch.

use crate::executor::SyncExecutor;
use crate::guard::{JobPermit, JobTable};
use crate::monitor::{EventBus, SchedulerStats, StatsCollector};
use crate::next_run::NextRunCalculator;
use chrono::{DateTime, TimeDelta, Utc};
use ferrosync_config::{Config, SchedulerSettings};
use ferrosync_types::{
    ConnectionRegistry, Error, HistoryQuery, HistoryStore, JobKey, Result, RunRecord,
    Schedule, ScheduleId, ScheduleStatus, ScheduleStore, TransportFactory,
};
use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::Duration;
use tokio::sync::{oneshot, watch, Semaphore};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

/// What caused a run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    /// Found due by a tick
    Automatic,
    /// Requested through [`Scheduler::run_now`]
    Manual,
}

impl fmt::Display for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Automatic => write!(f, "automatic"),
            Self::Manual => write!(f, "manual"),
        }
    }
}

/// A dispatched run
///
/// Dropping the handle detaches the run; it still completes and records its outcome.
#[derive(Debug)]
pub struct RunHandle {
    key: JobKey,
    handle: JoinHandle<Result<RunRecord>>,
}

impl RunHandle {
    /// Schedule the run belongs to
    pub fn key(&self) -> &JobKey {
        &self.key
    }

    /// Wait for the run to finish
    pub async fn wait(self) -> Result<RunRecord> {
        self.handle
            .await
            .map_err(|e| Error::other(format!("run task for {} failed: {e}", self.key)))?
    }
}

/// Outcome of one tick
#[derive(Debug, Default)]
pub struct TickReport {
    /// Runs started by this tick
    pub dispatched: Vec<RunHandle>,
    /// Due schedules whose key was already held
    pub skipped: Vec<JobKey>,
    /// Due schedules that could not be dispatched
    pub failed: Vec<(JobKey, String)>,
    /// Schedules that got their first `nextRun`
    pub initialized: usize,
    /// Stale `running` statuses reset by the watchdog
    pub stale_resets: usize,
}

impl TickReport {
    /// Keys of the dispatched runs
    pub fn dispatched_keys(&self) -> Vec<JobKey> {
        self.dispatched.iter().map(|run| run.key().clone()).collect()
    }

    /// Wait for every dispatched run
    pub async fn join(self) -> Vec<Result<RunRecord>> {
        let mut results = Vec::with_capacity(self.dispatched.len());
        for run in self.dispatched {
            results.push(run.wait().await);
        }
        results
    }
}

/// Observable scheduler state
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SchedulerStatus {
    /// Whether the periodic loop is active
    pub running: bool,
    /// Tick period
    pub check_interval_ms: u64,
    /// Schedules with a run in flight
    pub in_flight: Vec<JobKey>,
    /// Counters
    pub stats: SchedulerStats,
    /// Time of the last tick
    pub last_tick: Option<DateTime<Utc>>,
}

struct Ticker {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

struct Inner {
    schedules: Arc<dyn ScheduleStore>,
    history: Arc<dyn HistoryStore>,
    connections: Arc<dyn ConnectionRegistry>,
    executor: SyncExecutor,
    calculator: NextRunCalculator,
    settings: SchedulerSettings,
    jobs: JobTable,
    slots: Arc<Semaphore>,
    stats: StatsCollector,
    running: AtomicBool,
    check_interval_ms: AtomicU64,
    ticker: Mutex<Option<Ticker>>,
}

/// Periodic dispatcher of due schedules
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<Inner>,
}

impl fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scheduler")
            .field("running", &self.is_running())
            .field("in_flight", &self.inner.jobs.keys())
            .finish_non_exhaustive()
    }
}

impl Scheduler {
    /// Create a scheduler over one store implementing every persistence seam
    pub fn new<S>(settings: SchedulerSettings, store: Arc<S>, executor: SyncExecutor) -> Self
    where
        S: ScheduleStore + HistoryStore + ConnectionRegistry + 'static,
    {
        Self::from_parts(settings, store.clone(), store.clone(), store, executor)
    }

    /// Create a scheduler from separate collaborators
    pub fn from_parts(
        settings: SchedulerSettings,
        schedules: Arc<dyn ScheduleStore>,
        history: Arc<dyn HistoryStore>,
        connections: Arc<dyn ConnectionRegistry>,
        executor: SyncExecutor,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                schedules,
                history,
                connections,
                executor,
                calculator: NextRunCalculator::from_settings(&settings),
                jobs: JobTable::new(),
                slots: Arc::new(Semaphore::new(settings.max_concurrent_runs.max(1))),
                stats: StatsCollector::default(),
                running: AtomicBool::new(false),
                check_interval_ms: AtomicU64::new(settings.check_interval_ms),
                ticker: Mutex::new(None),
                settings,
            }),
        }
    }

    /// Create a scheduler and executor from the main config
    pub fn from_config<S>(config: &Config, store: Arc<S>, transports: Arc<dyn TransportFactory>) -> Self
    where
        S: ScheduleStore + HistoryStore + ConnectionRegistry + 'static,
    {
        let executor = SyncExecutor::from_config(config, transports, store.clone());
        Self::new(config.scheduler.clone(), store, executor)
    }

    /// Progress events of every run
    pub fn events(&self) -> &EventBus {
        self.inner.executor.events()
    }

    /// Calculator used for `nextRun`
    pub fn calculator(&self) -> NextRunCalculator {
        self.inner.calculator
    }

    /// Start the periodic loop.
    ///
    /// Resets stale statuses and performs one check immediately, then checks every
    /// `check_interval`. Returns `false` when the loop was already running.
    pub async fn start(&self, check_interval: Duration) -> bool {
        let check_interval = check_interval.max(Duration::from_millis(1));
        let (ready_tx, ready_rx) = oneshot::channel();
        {
            let mut ticker = self.ticker();
            if self.inner.running.swap(true, Ordering::SeqCst) {
                info!("Scheduler already running");
                return false;
            }
            self.inner
                .check_interval_ms
                .store(check_interval.as_millis() as u64, Ordering::Relaxed);

            let (shutdown, shutdown_rx) = watch::channel(false);
            let handle = tokio::spawn(tick_loop(
                Arc::downgrade(&self.inner),
                check_interval,
                shutdown_rx,
                ready_tx,
            ));
            *ticker = Some(Ticker { shutdown, handle });
        }
        info!(check_interval_ms = check_interval.as_millis() as u64, "Scheduler started");

        // resolves after the first check, or when the loop ended before it
        let _ = ready_rx.await;
        true
    }

    /// Stop dispatching automatic runs. Runs already dispatched complete normally.
    pub async fn stop(&self) {
        let ticker = {
            let mut ticker = self.ticker();
            if !self.inner.running.swap(false, Ordering::SeqCst) {
                return;
            }
            ticker.take()
        };
        if let Some(ticker) = ticker {
            let _ = ticker.shutdown.send(true);
            if let Err(e) = ticker.handle.await {
                warn!(error = %e, "Scheduler loop ended abnormally");
            }
        }
        info!(in_flight = self.inner.jobs.len(), "Scheduler stopped");
    }

    /// Whether the periodic loop is active
    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }

    fn ticker(&self) -> std::sync::MutexGuard<'_, Option<Ticker>> {
        self.inner.ticker.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Check for due schedules now
    pub async fn tick(&self) -> Result<TickReport> {
        self.tick_at(Utc::now()).await
    }

    /// Check for schedules due at `now`
    pub async fn tick_at(&self, now: DateTime<Utc>) -> Result<TickReport> {
        self.inner.stats.record_tick(now);
        let mut report = TickReport {
            stale_resets: self.reset_stale_runs(now).await.unwrap_or_else(|e| {
                warn!(error = %e, "Stale run check failed");
                0
            }),
            ..TickReport::default()
        };

        let schedules = self.inner.schedules.get_all_schedules().await?;
        for schedule in schedules.into_iter().filter(|s| s.enabled) {
            let key = schedule.key();

            if schedule.next_run.is_none() {
                match self.initialize_next_run(&key, now).await {
                    Ok(true) => report.initialized += 1,
                    Ok(false) => {}
                    Err(e) => {
                        warn!(schedule = %key, error = %e, "Cannot compute first run");
                        report.failed.push((key, e.to_string()));
                    }
                }
                continue;
            }
            if !schedule.is_due(now) {
                continue;
            }

            match self.dispatch_due(&key, now).await {
                Ok(Some(run)) => report.dispatched.push(run),
                Ok(None) => debug!(schedule = %key, "No longer due"),
                Err(Error::DuplicateInFlight { .. }) => {
                    debug!(schedule = %key, "Already in flight, skipping");
                    report.skipped.push(key);
                }
                Err(e) => {
                    error!(schedule = %key, error = %e, "Dispatch failed");
                    report.failed.push((key, e.to_string()));
                }
            }
        }

        if !report.dispatched.is_empty() || !report.failed.is_empty() {
            info!(
                dispatched = report.dispatched.len(),
                skipped = report.skipped.len(),
                failed = report.failed.len(),
                "Scheduler check completed"
            );
        }
        Ok(report)
    }

    /// Run a schedule immediately, regardless of its `nextRun`.
    ///
    /// Returns as soon as the run is dispatched. A second call while the first run is in
    /// flight fails with [`Error::DuplicateInFlight`].
    pub async fn run_now(&self, connection_id: &str, name: &str) -> Result<RunHandle> {
        let key = JobKey::new(connection_id, name);
        let (permit, schedule) = self.claim(&key).await?;
        info!(schedule = %key, "Manual run requested");
        Ok(self.launch(permit, schedule, Trigger::Manual).await)
    }

    async fn dispatch_due(&self, key: &JobKey, now: DateTime<Utc>) -> Result<Option<RunHandle>> {
        let (permit, schedule) = self.claim(key).await?;
        if !schedule.is_due(now) {
            return Ok(None);
        }
        Ok(Some(self.launch(permit, schedule, Trigger::Automatic).await))
    }

    /// Take the key, then read the schedule under it
    async fn claim(&self, key: &JobKey) -> Result<(JobPermit, Schedule)> {
        let Some(permit) = self.inner.jobs.try_acquire(key.clone()) else {
            self.inner.stats.record_duplicate();
            return Err(Error::DuplicateInFlight {
                connection_id: key.connection_id.clone(),
                name: key.name.clone(),
            });
        };
        let schedule = self.find(key).await?;
        Ok((permit, schedule))
    }

    async fn find(&self, key: &JobKey) -> Result<Schedule> {
        self.inner
            .schedules
            .get_schedule_by_name(&key.connection_id, &key.name)
            .await?
            .ok_or_else(|| Error::ScheduleNotFound {
                connection_id: key.connection_id.clone(),
                name: key.name.clone(),
            })
    }

    async fn launch(&self, permit: JobPermit, mut schedule: Schedule, trigger: Trigger) -> RunHandle {
        let key = permit.key().clone();
        schedule.status = ScheduleStatus::Running;
        if let Err(e) = self.inner.schedules.update_schedule(&schedule).await {
            warn!(schedule = %key, error = %e, "Failed to persist running status");
        }
        self.inner.stats.record_dispatch();
        self.audit(format!("Dispatched {trigger} run of {key}")).await;

        let scheduler = self.clone();
        let handle = tokio::spawn(async move { scheduler.run_guarded(permit, schedule, trigger).await });
        RunHandle { key, handle }
    }

    async fn run_guarded(&self, permit: JobPermit, schedule: Schedule, trigger: Trigger) -> Result<RunRecord> {
        let key = permit.key().clone();
        let slot = self.inner.slots.clone().acquire_owned().await.ok();
        debug!(schedule = %key, %trigger, "Run slot acquired");

        let result = match self
            .inner
            .connections
            .get_connection(&schedule.connection_id)
            .await
        {
            Ok(Some(connection)) => self.inner.executor.execute(&schedule, &connection).await,
            Ok(None) => {
                let e = Error::ConnectionNotFound {
                    connection_id: schedule.connection_id.clone(),
                };
                self.inner.executor.record_failure(&schedule, &e).await;
                Err(e)
            }
            Err(e) => {
                self.inner.executor.record_failure(&schedule, &e).await;
                Err(e)
            }
        };
        drop(slot);

        self.complete(&key, schedule, &result, Utc::now()).await;
        drop(permit);
        result
    }

    /// Persist the completion state while the key is still held
    async fn complete(
        &self,
        key: &JobKey,
        dispatched: Schedule,
        result: &Result<RunRecord>,
        finished: DateTime<Utc>,
    ) {
        let mut schedule = match self.find(key).await {
            Ok(latest) => latest,
            Err(e) => {
                warn!(schedule = %key, error = %e, "Cannot reload schedule after run");
                dispatched
            }
        };
        schedule.last_run = Some(finished);
        schedule.next_run = Some(self.inner.calculator.next_run(&schedule, finished));
        schedule.status = if result.is_ok() {
            ScheduleStatus::Success
        } else {
            ScheduleStatus::Failed
        };
        if let Err(e) = self.inner.schedules.update_schedule(&schedule).await {
            warn!(schedule = %key, error = %e, "Failed to persist run completion");
        }

        match result {
            Ok(record) => {
                self.inner
                    .stats
                    .record_run(true, record.files_transferred, record.total_bytes);
                self.audit(format!(
                    "Run of {key} succeeded: {} files, {} bytes",
                    record.files_transferred, record.total_bytes
                ))
                .await;
            }
            Err(e) => {
                self.inner.stats.record_run(false, 0, 0);
                self.audit(format!("Run of {key} failed: {e}")).await;
            }
        }
    }

    async fn initialize_next_run(&self, key: &JobKey, now: DateTime<Utc>) -> Result<bool> {
        let Some(_permit) = self.inner.jobs.try_acquire(key.clone()) else {
            return Ok(false);
        };
        let mut schedule = self.find(key).await?;
        if schedule.next_run.is_some() {
            return Ok(false);
        }
        schedule.next_run = Some(self.inner.calculator.next_run(&schedule, now));
        self.inner.schedules.update_schedule(&schedule).await?;
        Ok(true)
    }

    /// Reset `running` statuses left behind by a previous process.
    ///
    /// A schedule is stale when its key is not held here and its `lastRun` is missing or
    /// older than the configured threshold.
    pub async fn reset_stale_runs(&self, now: DateTime<Utc>) -> Result<usize> {
        let threshold = TimeDelta::from_std(self.inner.settings.stale_run_threshold())
            .unwrap_or_else(|_| TimeDelta::days(36_500));
        let mut reset = 0;

        for listed in self.inner.schedules.get_all_schedules().await? {
            if listed.status != ScheduleStatus::Running {
                continue;
            }
            let key = listed.key();
            let Some(_permit) = self.inner.jobs.try_acquire(key.clone()) else {
                continue;
            };
            // the listing may predate a run that completed before the key was taken
            let mut schedule = match self.find(&key).await {
                Ok(schedule) => schedule,
                Err(Error::ScheduleNotFound { .. }) => continue,
                Err(e) => return Err(e),
            };
            let stale = schedule.status == ScheduleStatus::Running
                && schedule.last_run.map_or(true, |last| now - last > threshold);
            if !stale {
                continue;
            }

            schedule.status = ScheduleStatus::Failed;
            match self.inner.schedules.update_schedule(&schedule).await {
                Ok(()) => {
                    warn!(schedule = %key, "Reset stale running status");
                    self.audit(format!("Reset stale running status of {key}")).await;
                    reset += 1;
                }
                Err(e) => warn!(schedule = %key, error = %e, "Failed to reset stale status"),
            }
        }

        self.inner.stats.record_stale_resets(reset as u64);
        Ok(reset)
    }

    /// Validate and store a new schedule with its first `nextRun`
    pub async fn create_schedule(&self, mut schedule: Schedule) -> Result<Schedule> {
        schedule.validate()?;
        schedule.status = ScheduleStatus::Idle;
        schedule.last_run = None;
        schedule.next_run = Some(self.inner.calculator.next_run(&schedule, Utc::now()));

        let created = self.inner.schedules.create_schedule(schedule).await?;
        info!(schedule = %created.key(), next_run = ?created.next_run, "Schedule created");
        self.audit(format!("Created schedule {}", created.key())).await;
        Ok(created)
    }

    /// Replace a schedule's definition, keeping its run state.
    ///
    /// Rejected with [`Error::DuplicateInFlight`] while the schedule is running.
    pub async fn update_schedule(&self, mut schedule: Schedule) -> Result<Schedule> {
        schedule.validate()?;
        let existing = self.find_by_id(schedule.id).await?;

        // run state comes from the copy read under the key, not from the lookup above
        let (_permit, current) = self.claim(&existing.key()).await?;
        if current.id != schedule.id {
            return Err(Error::invalid_schedule(format!(
                "schedule {} was replaced while updating",
                existing.key()
            )));
        }
        let _renamed = if schedule.key() == current.key() {
            None
        } else {
            Some(self.claim_free(&schedule.key()).await?)
        };

        schedule.status = current.status;
        schedule.last_run = current.last_run;
        schedule.next_run = Some(self.inner.calculator.next_run(&schedule, Utc::now()));
        self.inner.schedules.update_schedule(&schedule).await?;

        info!(schedule = %schedule.key(), "Schedule updated");
        self.audit(format!("Updated schedule {}", schedule.key())).await;
        Ok(schedule)
    }

    /// Remove a schedule; rejected while it is running
    pub async fn delete_schedule(&self, connection_id: &str, name: &str) -> Result<()> {
        let key = JobKey::new(connection_id, name);
        let (_permit, schedule) = self.claim(&key).await?;
        self.inner.schedules.delete_schedule(schedule.id).await?;

        info!(schedule = %key, "Schedule deleted");
        self.audit(format!("Deleted schedule {key}")).await;
        Ok(())
    }

    /// Enable or disable automatic runs; enabling recomputes `nextRun`
    pub async fn set_enabled(&self, connection_id: &str, name: &str, enabled: bool) -> Result<Schedule> {
        let key = JobKey::new(connection_id, name);
        let (_permit, mut schedule) = self.claim(&key).await?;
        schedule.enabled = enabled;
        if enabled {
            schedule.next_run = Some(self.inner.calculator.next_run(&schedule, Utc::now()));
        }
        self.inner.schedules.update_schedule(&schedule).await?;

        let state = if enabled { "Enabled" } else { "Disabled" };
        self.audit(format!("{state} schedule {key}")).await;
        Ok(schedule)
    }

    /// Find a schedule by identity
    pub async fn get_schedule(&self, connection_id: &str, name: &str) -> Result<Schedule> {
        self.find(&JobKey::new(connection_id, name)).await
    }

    /// Every schedule, or only those of one connection
    pub async fn list_schedules(&self, connection_id: Option<&str>) -> Result<Vec<Schedule>> {
        match connection_id {
            Some(id) => self.inner.schedules.get_schedules_by_connection(id).await,
            None => self.inner.schedules.get_all_schedules().await,
        }
    }

    /// Run history, newest first
    pub async fn history(&self, query: &HistoryQuery) -> Result<Vec<RunRecord>> {
        self.inner.history.get_history(query).await
    }

    /// Current state and counters
    pub fn status(&self) -> SchedulerStatus {
        SchedulerStatus {
            running: self.is_running(),
            check_interval_ms: self.inner.check_interval_ms.load(Ordering::Relaxed),
            in_flight: self.inner.jobs.keys(),
            stats: self.inner.stats.snapshot(),
            last_tick: self.inner.stats.last_tick(),
        }
    }

    async fn find_by_id(&self, id: ScheduleId) -> Result<Schedule> {
        self.inner
            .schedules
            .get_all_schedules()
            .await?
            .into_iter()
            .find(|s| s.id == id)
            .ok_or_else(|| Error::invalid_schedule(format!("schedule {id} does not exist")))
    }

    /// Take a key that must not belong to an existing schedule
    async fn claim_free(&self, key: &JobKey) -> Result<JobPermit> {
        let Some(permit) = self.inner.jobs.try_acquire(key.clone()) else {
            return Err(Error::DuplicateInFlight {
                connection_id: key.connection_id.clone(),
                name: key.name.clone(),
            });
        };
        if self.find(key).await.is_ok() {
            return Err(Error::invalid_schedule(format!("schedule {key} already exists")));
        }
        Ok(permit)
    }

    async fn audit(&self, message: String) {
        if let Err(e) = self.inner.history.record_audit_event(&message).await {
            warn!(error = %e, "Failed to record audit event");
        }
    }
}

/// One check through a weak handle; `false` once the scheduler is gone or stopped
async fn check_once(inner: &Weak<Inner>) -> bool {
    let Some(inner) = inner.upgrade() else {
        return false;
    };
    if !inner.running.load(Ordering::SeqCst) {
        return false;
    }
    if let Err(e) = (Scheduler { inner }).tick().await {
        error!(error = %e, "Scheduler check failed");
    }
    true
}

async fn tick_loop(
    inner: Weak<Inner>,
    check_interval: Duration,
    mut shutdown: watch::Receiver<bool>,
    ready: oneshot::Sender<()>,
) {
    let active = check_once(&inner).await;
    let _ = ready.send(());

    if active {
        let mut interval =
            tokio::time::interval_at(Instant::now() + check_interval, check_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                biased;
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                _ = interval.tick() => {
                    if !check_once(&inner).await {
                        break;
                    }
                }
            }
        }
    }
    debug!("Scheduler loop exited");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitor::RunEvent;
    use ferrosync_store::MemoryStore;
    use ferrosync_transport::MemoryRemote;
    use ferrosync_types::{
        Connection, Endpoint, Frequency, RetryConfig, RunStatus, ScheduleOptions,
    };
    use tempfile::TempDir;

    struct Fixture {
        remote: MemoryRemote,
        store: Arc<MemoryStore>,
        scheduler: Scheduler,
        local: TempDir,
    }

    fn settings() -> SchedulerSettings {
        SchedulerSettings {
            max_concurrent_runs: 4,
            use_local_time: false,
            ..SchedulerSettings::default()
        }
    }

    async fn fixture() -> Fixture {
        let remote = MemoryRemote::new();
        let store = Arc::new(MemoryStore::new());
        store
            .add_connection(Connection::new("conn-1", "ftp.example.com", "user", "secret"))
            .await
            .unwrap();
        let executor = SyncExecutor::new(Arc::new(remote.clone()), store.clone())
            .with_retry(RetryConfig::immediate(3), RetryConfig::immediate(3));
        Fixture {
            remote,
            scheduler: Scheduler::new(settings(), store.clone(), executor),
            store,
            local: TempDir::new().unwrap(),
        }
    }

    /// Store whose full listing returns a snapshot that is `delay` old
    struct SlowListing {
        store: Arc<MemoryStore>,
        delay: Duration,
    }

    #[async_trait::async_trait]
    impl ScheduleStore for SlowListing {
        async fn create_schedule(&self, schedule: Schedule) -> Result<Schedule> {
            self.store.create_schedule(schedule).await
        }

        async fn update_schedule(&self, schedule: &Schedule) -> Result<()> {
            self.store.update_schedule(schedule).await
        }

        async fn delete_schedule(&self, id: ScheduleId) -> Result<()> {
            self.store.delete_schedule(id).await
        }

        async fn get_schedule_by_name(
            &self,
            connection_id: &str,
            name: &str,
        ) -> Result<Option<Schedule>> {
            self.store.get_schedule_by_name(connection_id, name).await
        }

        async fn get_all_schedules(&self) -> Result<Vec<Schedule>> {
            let snapshot = self.store.get_all_schedules().await;
            tokio::time::sleep(self.delay).await;
            snapshot
        }

        async fn get_schedules_by_connection(&self, connection_id: &str) -> Result<Vec<Schedule>> {
            self.store.get_schedules_by_connection(connection_id).await
        }
    }

    async fn slow_listing_fixture(delay: Duration) -> Fixture {
        let mut f = fixture().await;
        let executor = SyncExecutor::new(Arc::new(f.remote.clone()), f.store.clone())
            .with_retry(RetryConfig::immediate(3), RetryConfig::immediate(3));
        let schedules = Arc::new(SlowListing {
            store: f.store.clone(),
            delay,
        });
        f.scheduler = Scheduler::from_parts(
            settings(),
            schedules,
            f.store.clone(),
            f.store.clone(),
            executor,
        );
        f
    }

    impl Fixture {
        fn schedule(&self, connection: &str, name: &str, frequency: Frequency) -> Schedule {
            Schedule::new(
                connection,
                name,
                Endpoint::ftp("/out"),
                Endpoint::local(self.local.path().join(name)),
                frequency,
            )
        }

        /// Store a schedule that became due a minute ago
        async fn due(&self, connection: &str, name: &str) -> Schedule {
            let mut schedule = self.schedule(connection, name, Frequency::Daily);
            schedule.next_run = Some(Utc::now() - TimeDelta::minutes(1));
            self.store.create_schedule(schedule).await.unwrap()
        }
    }

    #[tokio::test]
    async fn test_second_manual_run_is_rejected_while_first_in_flight() {
        let f = fixture().await;
        f.remote.add_file("/out/a.csv", "abc");
        f.remote.set_transfer_delay(Duration::from_millis(200));
        f.scheduler
            .create_schedule(f.schedule("conn-1", "pull", Frequency::Manual))
            .await
            .unwrap();

        let first = f.scheduler.run_now("conn-1", "pull").await.unwrap();
        let second = f.scheduler.run_now("conn-1", "pull").await.unwrap_err();
        assert!(matches!(second, Error::DuplicateInFlight { .. }));
        assert_eq!(f.scheduler.status().in_flight, vec![JobKey::new("conn-1", "pull")]);

        let record = first.wait().await.unwrap();
        assert_eq!(record.files_transferred, 1);
        assert_eq!(f.remote.transfer_attempts("/out/a.csv"), 1);
        assert_eq!(f.scheduler.status().stats.rejected_duplicates, 1);

        let schedule = f.scheduler.get_schedule("conn-1", "pull").await.unwrap();
        assert_eq!(schedule.status, ScheduleStatus::Success);
        assert!(schedule.next_run.unwrap() > Utc::now() + TimeDelta::days(365 * 99));

        // released once finished
        f.scheduler.run_now("conn-1", "pull").await.unwrap().wait().await.unwrap();
    }

    #[tokio::test]
    async fn test_tick_dispatches_due_schedules_only() {
        let f = fixture().await;
        f.remote.add_file("/out/a.csv", "abc");
        f.due("conn-1", "due").await;
        f.scheduler
            .create_schedule(f.schedule("conn-1", "later", Frequency::Daily))
            .await
            .unwrap();
        let mut disabled = f.schedule("conn-1", "disabled", Frequency::Daily);
        disabled.enabled = false;
        disabled.next_run = Some(Utc::now() - TimeDelta::minutes(1));
        f.store.create_schedule(disabled).await.unwrap();

        let report = f.scheduler.tick().await.unwrap();
        assert_eq!(report.dispatched_keys(), vec![JobKey::new("conn-1", "due")]);
        let results = report.join().await;
        assert!(results[0].is_ok());

        let schedule = f.scheduler.get_schedule("conn-1", "due").await.unwrap();
        assert_eq!(schedule.status, ScheduleStatus::Success);
        assert!(schedule.last_run.is_some());
        assert!(schedule.next_run.unwrap() > Utc::now());

        let history = f
            .scheduler
            .history(&HistoryQuery::for_connection("conn-1"))
            .await
            .unwrap();
        assert_eq!(history.len(), 1);

        let again = f.scheduler.tick().await.unwrap();
        assert!(again.dispatched.is_empty());
    }

    #[tokio::test]
    async fn test_failed_run_is_isolated_and_clears_status() {
        let f = fixture().await;
        f.remote.add_file("/out/a.csv", "abc");
        f.due("ghost", "orphan").await;
        f.due("conn-1", "healthy").await;

        let report = f.scheduler.tick().await.unwrap();
        assert_eq!(report.dispatched.len(), 2);
        let results = report.join().await;
        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        assert!(results
            .iter()
            .any(|r| matches!(r, Err(Error::ConnectionNotFound { .. }))));

        let orphan = f.scheduler.get_schedule("ghost", "orphan").await.unwrap();
        assert_eq!(orphan.status, ScheduleStatus::Failed);
        assert!(orphan.next_run.unwrap() > Utc::now());
        assert!(f.scheduler.status().in_flight.is_empty());

        let history = f
            .scheduler
            .history(&HistoryQuery::for_connection("ghost"))
            .await
            .unwrap();
        assert_eq!(history[0].status, RunStatus::Failed);
        assert!(history[0].end_time.is_some());
        assert!(!history[0].errors.is_empty());
    }

    #[tokio::test]
    async fn test_executor_error_marks_schedule_failed() {
        let f = fixture().await;
        f.remote.fail_list("/out");
        f.remote.add_directory("/out");
        f.due("conn-1", "broken").await;

        let results = f.scheduler.tick().await.unwrap().join().await;
        assert!(results[0].is_err());

        let schedule = f.scheduler.get_schedule("conn-1", "broken").await.unwrap();
        assert_eq!(schedule.status, ScheduleStatus::Failed);
        assert_eq!(f.scheduler.status().stats.failed, 1);
    }

    #[tokio::test]
    async fn test_first_tick_initializes_missing_next_run() {
        let f = fixture().await;
        f.store
            .create_schedule(f.schedule("conn-1", "fresh", Frequency::Hourly))
            .await
            .unwrap();

        let report = f.scheduler.tick().await.unwrap();
        assert_eq!(report.initialized, 1);
        assert!(report.dispatched.is_empty());
        let schedule = f.scheduler.get_schedule("conn-1", "fresh").await.unwrap();
        assert!(schedule.next_run.unwrap() > Utc::now());
    }

    #[tokio::test]
    async fn test_watchdog_resets_only_stale_statuses() {
        let f = fixture().await;
        let mut stale = f.schedule("conn-1", "stale", Frequency::Daily);
        stale.status = ScheduleStatus::Running;
        f.store.create_schedule(stale).await.unwrap();
        let mut recent = f.schedule("conn-1", "recent", Frequency::Daily);
        recent.status = ScheduleStatus::Running;
        recent.last_run = Some(Utc::now());
        f.store.create_schedule(recent).await.unwrap();

        let reset = f.scheduler.reset_stale_runs(Utc::now()).await.unwrap();
        assert_eq!(reset, 1);
        let stale = f.scheduler.get_schedule("conn-1", "stale").await.unwrap();
        assert_eq!(stale.status, ScheduleStatus::Failed);
        let recent = f.scheduler.get_schedule("conn-1", "recent").await.unwrap();
        assert_eq!(recent.status, ScheduleStatus::Running);
        assert!(f
            .store
            .audit_events()
            .await
            .iter()
            .any(|event| event.message.contains("conn-1/stale")));
    }

    #[tokio::test]
    async fn test_mutations_rejected_while_in_flight() {
        let f = fixture().await;
        f.remote.add_file("/out/a.csv", "abc");
        f.remote.set_transfer_delay(Duration::from_millis(200));
        let created = f
            .scheduler
            .create_schedule(f.schedule("conn-1", "busy", Frequency::Manual))
            .await
            .unwrap();

        let run = f.scheduler.run_now("conn-1", "busy").await.unwrap();
        let mut edited = created.clone();
        edited.options = ScheduleOptions {
            overwrite_existing: true,
            ..ScheduleOptions::default()
        };
        assert!(matches!(
            f.scheduler.update_schedule(edited.clone()).await,
            Err(Error::DuplicateInFlight { .. })
        ));
        assert!(matches!(
            f.scheduler.delete_schedule("conn-1", "busy").await,
            Err(Error::DuplicateInFlight { .. })
        ));

        run.wait().await.unwrap();
        let updated = f.scheduler.update_schedule(edited).await.unwrap();
        assert!(updated.options.overwrite_existing);
        assert_eq!(updated.status, ScheduleStatus::Success);
        f.scheduler.delete_schedule("conn-1", "busy").await.unwrap();
        assert!(matches!(
            f.scheduler.run_now("conn-1", "busy").await,
            Err(Error::ScheduleNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_create_validates_and_disable_stops_dispatch() {
        let f = fixture().await;
        let invalid = f.schedule("conn-1", "bad", Frequency::Monthly).with_day_of_month(32);
        assert!(matches!(
            f.scheduler.create_schedule(invalid).await,
            Err(Error::InvalidSchedule { .. })
        ));

        f.due("conn-1", "paused").await;
        f.scheduler.set_enabled("conn-1", "paused", false).await.unwrap();
        assert!(f.scheduler.tick().await.unwrap().dispatched.is_empty());

        let enabled = f.scheduler.set_enabled("conn-1", "paused", true).await.unwrap();
        assert!(enabled.next_run.unwrap() > Utc::now());
    }

    #[tokio::test]
    async fn test_persistence_failures_do_not_stop_runs() {
        let f = fixture().await;
        f.remote.add_file("/out/a.csv", "abc");
        f.scheduler
            .create_schedule(f.schedule("conn-1", "offline", Frequency::Manual))
            .await
            .unwrap();
        f.store.set_fail_writes(true);

        let record = f
            .scheduler
            .run_now("conn-1", "offline")
            .await
            .unwrap()
            .wait()
            .await
            .unwrap();
        assert_eq!(record.status, RunStatus::Success);
        assert!(f.local.path().join("offline/a.csv").exists());
    }

    #[tokio::test]
    async fn test_start_checks_immediately_and_stop_is_idempotent() {
        let f = fixture().await;
        f.remote.add_file("/out/a.csv", "abc");
        f.due("conn-1", "boot").await;
        let mut events = f.scheduler.events().subscribe();

        assert!(f.scheduler.start(Duration::from_millis(50)).await);
        assert!(!f.scheduler.start(Duration::from_millis(50)).await);
        assert!(f.scheduler.is_running());

        let finished = tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                if let Ok(RunEvent::Finished { status, .. }) = events.recv().await {
                    return status;
                }
            }
        })
        .await
        .unwrap();
        assert_eq!(finished, RunStatus::Success);

        f.scheduler.stop().await;
        f.scheduler.stop().await;
        let status = f.scheduler.status();
        assert!(!status.running);
        assert_eq!(status.check_interval_ms, 50);
        assert!(status.stats.ticks >= 1);
    }

    #[tokio::test]
    async fn test_watchdog_keeps_run_that_finished_during_listing() {
        let f = slow_listing_fixture(Duration::from_millis(300)).await;
        f.remote.add_file("/out/a.csv", "abc");
        f.remote.set_transfer_delay(Duration::from_millis(100));
        f.scheduler
            .create_schedule(f.schedule("conn-1", "pull", Frequency::Daily))
            .await
            .unwrap();

        let run = f.scheduler.run_now("conn-1", "pull").await.unwrap();
        let reset = f.scheduler.reset_stale_runs(Utc::now()).await.unwrap();
        assert_eq!(reset, 0);
        run.wait().await.unwrap();

        let schedule = f.scheduler.get_schedule("conn-1", "pull").await.unwrap();
        assert_eq!(schedule.status, ScheduleStatus::Success);
        assert!(schedule.last_run.is_some());
        assert!(schedule.next_run.unwrap() > Utc::now());
        assert!(f
            .scheduler
            .tick()
            .await
            .unwrap()
            .dispatched
            .is_empty());
    }

    #[tokio::test]
    async fn test_update_keeps_state_of_run_that_finished_during_lookup() {
        let f = slow_listing_fixture(Duration::from_millis(300)).await;
        f.remote.add_file("/out/a.csv", "abc");
        f.remote.set_transfer_delay(Duration::from_millis(100));
        let created = f
            .scheduler
            .create_schedule(f.schedule("conn-1", "pull", Frequency::Daily))
            .await
            .unwrap();

        let run = f.scheduler.run_now("conn-1", "pull").await.unwrap();
        let mut edited = created;
        edited.options.overwrite_existing = true;
        let updated = f.scheduler.update_schedule(edited).await.unwrap();
        run.wait().await.unwrap();

        assert_eq!(updated.status, ScheduleStatus::Success);
        let stored = f.scheduler.get_schedule("conn-1", "pull").await.unwrap();
        assert_eq!(stored.status, ScheduleStatus::Success);
        assert!(stored.last_run.is_some());
        assert!(stored.options.overwrite_existing);
    }

    #[tokio::test]
    async fn test_stop_during_first_check_ends_the_loop() {
        let f = slow_listing_fixture(Duration::from_millis(200)).await;
        let starter = {
            let scheduler = f.scheduler.clone();
            tokio::spawn(async move { scheduler.start(Duration::from_millis(20)).await })
        };

        tokio::time::sleep(Duration::from_millis(50)).await;
        f.scheduler.stop().await;
        assert!(starter.await.unwrap());
        assert!(!f.scheduler.is_running());

        let ticks = f.scheduler.status().stats.ticks;
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(f.scheduler.status().stats.ticks, ticks);

        // can be started again afterwards
        assert!(f.scheduler.start(Duration::from_millis(20)).await);
        f.scheduler.stop().await;
    }
}
