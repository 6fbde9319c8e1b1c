//! Collaborator traits
//!
//! The engine talks to the outside world only through these seams: a transport for the
//! FTP side, a connection registry for credentials, and persistence for schedules, run
//! history and audit events.

use crate::{Connection, Entry, HistoryQuery, Result, RunRecord, Schedule, ScheduleId};
use async_trait::async_trait;
use std::path::Path;

/// Uniform file transport, regardless of sync direction
///
/// Remote paths are `/`-separated strings; local paths are filesystem paths.
#[async_trait]
pub trait Transport: Send {
    /// Open the session and log in
    async fn connect(&mut self, connection: &Connection) -> Result<()>;

    /// Close the session; closing an unconnected transport is a no-op
    async fn close(&mut self) -> Result<()>;

    /// List the entries of a remote directory, without `.` and `..`
    async fn list(&mut self, path: &str) -> Result<Vec<Entry>>;

    /// Upload a local file, returning the number of bytes sent
    async fn upload(&mut self, local_path: &Path, remote_path: &str) -> Result<u64>;

    /// Download a remote file, returning the number of bytes received
    async fn download(&mut self, remote_path: &str, local_path: &Path) -> Result<u64>;

    /// Delete a remote file
    async fn delete(&mut self, remote_path: &str) -> Result<()>;

    /// Create a remote directory and its missing parents; existing directories are fine
    async fn create_directory(&mut self, path: &str) -> Result<()>;

    /// Whether a remote file exists
    async fn file_exists(&mut self, path: &str) -> Result<bool>;
}

/// Creates a fresh, unconnected transport for each run
pub trait TransportFactory: Send + Sync {
    /// Create a transport
    fn create(&self) -> Box<dyn Transport>;
}

/// Read-only lookup of connection credentials
#[async_trait]
pub trait ConnectionRegistry: Send + Sync {
    /// Find a connection by id
    async fn get_connection(&self, id: &str) -> Result<Option<Connection>>;
}

/// Persistence of schedule definitions and state
#[async_trait]
pub trait ScheduleStore: Send + Sync {
    /// Insert a new schedule; `(connection_id, name)` must be unique
    async fn create_schedule(&self, schedule: Schedule) -> Result<Schedule>;

    /// Replace a stored schedule, matched by id
    async fn update_schedule(&self, schedule: &Schedule) -> Result<()>;

    /// Remove a schedule
    async fn delete_schedule(&self, id: ScheduleId) -> Result<()>;

    /// Find a schedule by its identity
    async fn get_schedule_by_name(&self, connection_id: &str, name: &str)
        -> Result<Option<Schedule>>;

    /// Every schedule
    async fn get_all_schedules(&self) -> Result<Vec<Schedule>>;

    /// Schedules of one connection
    async fn get_schedules_by_connection(&self, connection_id: &str) -> Result<Vec<Schedule>>;
}

/// Persistence of run history and audit events
#[async_trait]
pub trait HistoryStore: Send + Sync {
    /// Store a new run record
    async fn create_history_record(&self, record: &RunRecord) -> Result<()>;

    /// Replace a stored run record, matched by id
    async fn update_history_record(&self, record: &RunRecord) -> Result<()>;

    /// Page through run records, newest first
    async fn get_history(&self, query: &HistoryQuery) -> Result<Vec<RunRecord>>;

    /// Append a free-form audit message
    async fn record_audit_event(&self, message: &str) -> Result<()>;
}
