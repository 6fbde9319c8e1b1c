//! Sync executor
//!
//! Performs one run of one schedule. The history record is created before any I/O and is
//! finalized exactly once: `success` when the walk completes (individual files may still
//! have failed), `failed` when something outside the per-file loop cannot continue.
//!
//! Subdirectories are walked with an explicit worklist of `(source, destination)` pairs.

use crate::monitor::{EventBus, RunEvent};
use crate::retry::Backoff;
use chrono::Utc;
use ferrosync_config::Config;
use ferrosync_filter::FileFilter;
use ferrosync_transport::local;
use ferrosync_types::{
    join_remote, Connection, Endpoint, Entry, Error, FileRecord, FileStatus, HistoryStore,
    Result, RetryConfig, RunRecord, RunStatus, Schedule, Transport, TransportFactory,
};
use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// One directory pair waiting to be synced
#[derive(Debug, Clone)]
struct WorkItem {
    source: Endpoint,
    destination: Endpoint,
    relative: String,
}

/// Runs sync jobs against a transport
pub struct SyncExecutor {
    transports: Arc<dyn TransportFactory>,
    history: Arc<dyn HistoryStore>,
    connect_retry: RetryConfig,
    transfer_retry: RetryConfig,
    temp_dir: Option<PathBuf>,
    events: EventBus,
}

impl SyncExecutor {
    /// Create an executor with default retry budgets
    pub fn new(transports: Arc<dyn TransportFactory>, history: Arc<dyn HistoryStore>) -> Self {
        let retry = ferrosync_config::RetrySettings::default();
        Self {
            transports,
            history,
            connect_retry: retry.connect,
            transfer_retry: retry.transfer,
            temp_dir: None,
            events: EventBus::default(),
        }
    }

    /// Create an executor configured from the main config
    pub fn from_config(
        config: &Config,
        transports: Arc<dyn TransportFactory>,
        history: Arc<dyn HistoryStore>,
    ) -> Self {
        Self::new(transports, history)
            .with_retry(config.retry.connect.clone(), config.retry.transfer.clone())
            .with_temp_dir(config.transport.temp_dir.clone())
    }

    /// Set the connect and transfer retry budgets
    pub fn with_retry(mut self, connect: RetryConfig, transfer: RetryConfig) -> Self {
        self.connect_retry = connect;
        self.transfer_retry = transfer;
        self
    }

    /// Set the relay directory for server-to-server copies
    pub fn with_temp_dir(mut self, temp_dir: Option<PathBuf>) -> Self {
        self.temp_dir = temp_dir;
        self
    }

    /// Event bus the executor publishes progress to
    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Run one sync of `schedule` using `connection`.
    ///
    /// Returns the finalized record on success. On failure the record has already been
    /// finalized as `failed` and persisted; the error is returned to the caller.
    pub async fn execute(&self, schedule: &Schedule, connection: &Connection) -> Result<RunRecord> {
        let mut record = RunRecord::start(schedule, Utc::now());
        if let Err(e) = self.history.create_history_record(&record).await {
            warn!(run_id = %record.id, error = %e, "Failed to persist new run record");
        }
        self.events.publish(RunEvent::Started {
            run_id: record.id,
            key: schedule.key(),
        });
        info!(
            run_id = %record.id,
            schedule = %schedule.key(),
            source = %schedule.source,
            destination = %schedule.destination,
            "Sync run started"
        );

        let outcome = self.run(schedule, connection, &mut record).await;
        match outcome {
            Ok(()) => {
                record.succeed(Utc::now());
                info!(
                    run_id = %record.id,
                    files = record.files_transferred,
                    bytes = record.total_bytes,
                    skipped = record.count(FileStatus::Skipped),
                    failed = record.count(FileStatus::Failed),
                    "Sync run completed"
                );
                self.finalize(&record).await;
                Ok(record)
            }
            Err(e) => {
                record.fail(e.to_string(), Utc::now());
                error!(run_id = %record.id, schedule = %schedule.key(), error = %e, "Sync run failed");
                self.finalize(&record).await;
                Err(e)
            }
        }
    }

    /// Record a run that failed before the executor could start, such as a missing
    /// connection, so the failure still leaves a finalized history record
    pub async fn record_failure(&self, schedule: &Schedule, failure: &Error) -> RunRecord {
        let now = Utc::now();
        let mut record = RunRecord::start(schedule, now);
        record.fail(failure.to_string(), now);
        if let Err(e) = self.history.create_history_record(&record).await {
            warn!(run_id = %record.id, error = %e, "Failed to persist failed run record");
        }
        self.events.publish(RunEvent::Finished {
            run_id: record.id,
            status: RunStatus::Failed,
            files_transferred: 0,
            total_bytes: 0,
        });
        record
    }

    async fn finalize(&self, record: &RunRecord) {
        if let Err(e) = self.history.update_history_record(record).await {
            warn!(run_id = %record.id, error = %e, "Failed to persist finalized run record");
        }
        self.events.publish(RunEvent::Finished {
            run_id: record.id,
            status: record.status,
            files_transferred: record.files_transferred,
            total_bytes: record.total_bytes,
        });
    }

    async fn run(
        &self,
        schedule: &Schedule,
        connection: &Connection,
        record: &mut RunRecord,
    ) -> Result<()> {
        let direction = schedule.direction()?;
        let filter = FileFilter::names_only(&schedule.options.file_patterns)?;
        debug!(run_id = %record.id, %direction, "Resolved sync direction");

        let mut transport = self.transports.create();
        self.connect(transport.as_mut(), connection).await?;

        let root = WorkItem {
            source: resolve(&schedule.source, connection),
            destination: resolve(&schedule.destination, connection),
            relative: String::new(),
        };
        let result = self
            .walk(transport.as_mut(), schedule, &filter, root, record)
            .await;

        if let Err(e) = transport.close().await {
            warn!(run_id = %record.id, error = %e, "Failed to close transport");
        }
        result
    }

    async fn connect(&self, transport: &mut dyn Transport, connection: &Connection) -> Result<()> {
        let mut backoff = Backoff::new(&self.connect_retry);
        loop {
            match transport.connect(connection).await {
                Ok(()) => return Ok(()),
                Err(e) => match backoff.retry_after(&e) {
                    Some(delay) => {
                        warn!(
                            connection = %connection.id,
                            attempt = backoff.attempt() - 1,
                            max_attempts = backoff.max_attempts(),
                            delay_ms = delay.as_millis() as u64,
                            error = %e,
                            "Connect attempt failed, retrying"
                        );
                        tokio::time::sleep(delay).await;
                    }
                    None => {
                        return Err(match e {
                            Error::Connection { .. } => e,
                            other => Error::connection(other.to_string()),
                        })
                    }
                },
            }
        }
    }

    async fn walk(
        &self,
        transport: &mut dyn Transport,
        schedule: &Schedule,
        filter: &FileFilter,
        root: WorkItem,
        record: &mut RunRecord,
    ) -> Result<()> {
        let mut queue = VecDeque::from([root]);

        while let Some(item) = queue.pop_front() {
            let entries = list(transport, &item.source).await?;
            ensure_directory(transport, &item.destination).await?;
            debug!(source = %item.source, entries = entries.len(), "Listed source directory");

            for entry in entries {
                if entry.name == "." || entry.name == ".." {
                    continue;
                }
                let relative = if item.relative.is_empty() {
                    entry.name.clone()
                } else {
                    format!("{}/{}", item.relative, entry.name)
                };
                if !filter.accepts_name(&relative, entry.is_directory) {
                    debug!(file = %relative, "Filtered out");
                    continue;
                }

                let source = child(&item.source, &entry.name);
                let destination = child(&item.destination, &entry.name);

                if entry.is_directory {
                    if schedule.options.include_subfolders {
                        queue.push_back(WorkItem {
                            source,
                            destination,
                            relative,
                        });
                    }
                    continue;
                }

                let file_record = self
                    .sync_file(transport, schedule, &entry, &relative, &source, &destination)
                    .await;
                if let Some(error) = &file_record.error {
                    record.errors.push(format!("{relative}: {error}"));
                }
                self.events.publish(RunEvent::FileFinished {
                    run_id: record.id,
                    file: relative,
                    status: file_record.status,
                    size: file_record.size,
                });
                record.push_file(file_record);
            }
        }
        Ok(())
    }

    /// Outcome of one file; failures here never abort the run
    async fn sync_file(
        &self,
        transport: &mut dyn Transport,
        schedule: &Schedule,
        entry: &Entry,
        relative: &str,
        source: &Endpoint,
        destination: &Endpoint,
    ) -> FileRecord {
        let exists = match destination_exists(transport, destination).await {
            Ok(exists) => exists,
            Err(e) => {
                warn!(file = %relative, error = %e, "Cannot check destination");
                return FileRecord::failed(relative, entry.size, e.to_string());
            }
        };
        if exists && !schedule.options.overwrite_existing {
            debug!(file = %relative, "Destination exists, skipping");
            return FileRecord::skipped(
                relative,
                entry.size,
                "destination exists and overwrite is disabled",
            );
        }

        let bytes = match self.transfer(transport, relative, source, destination).await {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(file = %relative, error = %e, "Transfer failed");
                return FileRecord::failed(relative, entry.size, e.to_string());
            }
        };
        debug!(file = %relative, bytes, "Transferred");

        if schedule.options.delete_after_sync {
            if let Err(e) = delete_source(transport, source).await {
                warn!(file = %relative, error = %e, "Failed to delete source after sync");
            }
        }

        FileRecord::success(relative, bytes)
    }

    async fn transfer(
        &self,
        transport: &mut dyn Transport,
        relative: &str,
        source: &Endpoint,
        destination: &Endpoint,
    ) -> Result<u64> {
        let mut backoff = Backoff::new(&self.transfer_retry);
        loop {
            match self.transfer_once(transport, source, destination).await {
                Ok(bytes) => {
                    if backoff.attempt() > 1 {
                        info!(file = %relative, attempt = backoff.attempt(), "Transfer succeeded after retry");
                    }
                    return Ok(bytes);
                }
                Err(e) => match backoff.retry_after(&e) {
                    Some(delay) => {
                        warn!(
                            file = %relative,
                            attempt = backoff.attempt() - 1,
                            max_attempts = backoff.max_attempts(),
                            delay_ms = delay.as_millis() as u64,
                            error = %e,
                            "Transfer attempt failed, retrying"
                        );
                        tokio::time::sleep(delay).await;
                    }
                    None => return Err(e),
                },
            }
        }
    }

    async fn transfer_once(
        &self,
        transport: &mut dyn Transport,
        source: &Endpoint,
        destination: &Endpoint,
    ) -> Result<u64> {
        match (source, destination) {
            (Endpoint::Ftp { path: from }, Endpoint::Local { path: to }) => {
                transport.download(from, to).await
            }
            (Endpoint::Local { path: from }, Endpoint::Ftp { path: to }) => {
                transport.upload(from, to).await
            }
            (Endpoint::Ftp { path: from }, Endpoint::Ftp { path: to }) => {
                let relay = self.relay_file()?;
                transport.download(from, relay.path()).await?;
                transport.upload(relay.path(), to).await
            }
            (Endpoint::Local { .. }, Endpoint::Local { .. }) => Err(Error::invalid_schedule(
                "local to local sync is not supported",
            )),
        }
    }

    fn relay_file(&self) -> Result<tempfile::NamedTempFile> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("ferrosync-relay-");
        let relay = match &self.temp_dir {
            Some(dir) => builder.tempfile_in(dir),
            None => builder.tempfile(),
        };
        relay.map_err(|e| {
            let dir = self.temp_dir.clone().unwrap_or_else(std::env::temp_dir);
            Error::filesystem(dir, format!("cannot create relay file: {e}"))
        })
    }
}

/// Relative remote paths are taken from the connection's default directory
fn resolve(endpoint: &Endpoint, connection: &Connection) -> Endpoint {
    match endpoint {
        Endpoint::Ftp { path } if !path.starts_with('/') => {
            Endpoint::ftp(join_remote(&connection.default_path, path))
        }
        other => other.clone(),
    }
}

fn child(parent: &Endpoint, name: &str) -> Endpoint {
    match parent {
        Endpoint::Ftp { path } => Endpoint::ftp(join_remote(path, name)),
        Endpoint::Local { path } => Endpoint::local(path.join(name)),
    }
}

async fn list(transport: &mut dyn Transport, endpoint: &Endpoint) -> Result<Vec<Entry>> {
    match endpoint {
        Endpoint::Ftp { path } => transport.list(path).await,
        Endpoint::Local { path } => local::list_dir(path).await,
    }
}

async fn ensure_directory(transport: &mut dyn Transport, endpoint: &Endpoint) -> Result<()> {
    match endpoint {
        Endpoint::Ftp { path } => transport.create_directory(path).await,
        Endpoint::Local { path } => local::create_dir_all(path).await,
    }
}

async fn destination_exists(transport: &mut dyn Transport, endpoint: &Endpoint) -> Result<bool> {
    match endpoint {
        Endpoint::Ftp { path } => transport.file_exists(path).await,
        Endpoint::Local { path } => local::file_exists(path).await,
    }
}

async fn delete_source(transport: &mut dyn Transport, endpoint: &Endpoint) -> Result<()> {
    match endpoint {
        Endpoint::Ftp { path } => transport.delete(path).await,
        Endpoint::Local { path } => local::remove_file(path).await,
    }
}
