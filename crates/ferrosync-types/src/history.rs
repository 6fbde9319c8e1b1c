//! Run history records
//!
//! A [`RunRecord`] is created in the `running` state before a run does any I/O and is
//! finalized exactly once, so an interrupted process still leaves an audit trail.

use crate::{Schedule, ScheduleId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for a history record
pub type RunId = Uuid;

/// Overall state of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    /// Run in progress, or interrupted before finalization
    Running,
    /// Run completed; individual files may still have failed
    Success,
    /// Run aborted by an unrecoverable error
    Failed,
}

/// Outcome of a single file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileStatus {
    /// Transferred
    Success,
    /// Deliberately not transferred
    Skipped,
    /// Retry budget exhausted
    Failed,
}

/// Per-file entry in a run's details
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRecord {
    /// Source path of the file
    pub file: String,
    /// Outcome
    pub status: FileStatus,
    /// Size in bytes as listed at the source
    pub size: u64,
    /// Last error for failed files
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Why the file was skipped
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl FileRecord {
    /// Successful transfer
    pub fn success(file: impl Into<String>, size: u64) -> Self {
        Self {
            file: file.into(),
            status: FileStatus::Success,
            size,
            error: None,
            reason: None,
        }
    }

    /// Skipped file with the reason
    pub fn skipped(file: impl Into<String>, size: u64, reason: impl Into<String>) -> Self {
        Self {
            file: file.into(),
            status: FileStatus::Skipped,
            size,
            error: None,
            reason: Some(reason.into()),
        }
    }

    /// Failed transfer with the last error
    pub fn failed(file: impl Into<String>, size: u64, error: impl Into<String>) -> Self {
        Self {
            file: file.into(),
            status: FileStatus::Failed,
            size,
            error: Some(error.into()),
            reason: None,
        }
    }
}

/// Detail section of a run record
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RunDetails {
    /// Every file the run looked at, in processing order
    pub files: Vec<FileRecord>,
}

/// History record of one sync run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunRecord {
    /// Unique id
    pub id: RunId,
    /// Connection the schedule belongs to
    pub connection_id: String,
    /// Schedule id
    pub schedule_id: ScheduleId,
    /// Schedule name at the time of the run
    pub schedule_name: String,
    /// Overall status
    pub status: RunStatus,
    /// Files transferred successfully
    pub files_transferred: u64,
    /// Bytes transferred successfully
    pub total_bytes: u64,
    /// When the record was created
    pub start_time: DateTime<Utc>,
    /// When the record was finalized
    pub end_time: Option<DateTime<Utc>>,
    /// Top-level error lines
    pub errors: Vec<String>,
    /// Per-file outcomes
    pub details: RunDetails,
}

impl RunRecord {
    /// Start a record for the given schedule
    pub fn start(schedule: &Schedule, start_time: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            connection_id: schedule.connection_id.clone(),
            schedule_id: schedule.id,
            schedule_name: schedule.name.clone(),
            status: RunStatus::Running,
            files_transferred: 0,
            total_bytes: 0,
            start_time,
            end_time: None,
            errors: Vec::new(),
            details: RunDetails::default(),
        }
    }

    /// Record a per-file outcome, updating the counters for successes
    pub fn push_file(&mut self, record: FileRecord) {
        if record.status == FileStatus::Success {
            self.files_transferred += 1;
            self.total_bytes += record.size;
        }
        self.details.files.push(record);
    }

    /// Count files with the given status
    pub fn count(&self, status: FileStatus) -> usize {
        self.details
            .files
            .iter()
            .filter(|file| file.status == status)
            .count()
    }

    /// Finalize as successful
    pub fn succeed(&mut self, end_time: DateTime<Utc>) {
        self.status = RunStatus::Success;
        self.end_time = Some(end_time);
    }

    /// Finalize as failed with a top-level error
    pub fn fail(&mut self, error: impl Into<String>, end_time: DateTime<Utc>) {
        self.status = RunStatus::Failed;
        self.errors.push(error.into());
        self.end_time = Some(end_time);
    }

    /// Whether the record has been finalized
    pub fn is_finished(&self) -> bool {
        self.status != RunStatus::Running && self.end_time.is_some()
    }
}

/// Filter for history lookups
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HistoryFilter {
    /// Runs of one schedule
    Schedule(ScheduleId),
    /// Runs of every schedule of one connection
    Connection(String),
}

/// History lookup with pagination, newest first
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryQuery {
    /// Which runs to return
    pub filter: HistoryFilter,
    /// Maximum number of records
    pub limit: usize,
    /// Records to skip
    pub offset: usize,
}

impl HistoryQuery {
    /// Default page size
    pub const DEFAULT_LIMIT: usize = 50;

    /// Runs of one schedule
    pub fn for_schedule(schedule_id: ScheduleId) -> Self {
        Self {
            filter: HistoryFilter::Schedule(schedule_id),
            limit: Self::DEFAULT_LIMIT,
            offset: 0,
        }
    }

    /// Runs of one connection
    pub fn for_connection(connection_id: impl Into<String>) -> Self {
        Self {
            filter: HistoryFilter::Connection(connection_id.into()),
            limit: Self::DEFAULT_LIMIT,
            offset: 0,
        }
    }

    /// Set the page
    pub fn page(mut self, limit: usize, offset: usize) -> Self {
        self.limit = limit;
        self.offset = offset;
        self
    }

    /// Whether a record matches the filter
    pub fn matches(&self, record: &RunRecord) -> bool {
        match &self.filter {
            HistoryFilter::Schedule(id) => record.schedule_id == *id,
            HistoryFilter::Connection(id) => record.connection_id == *id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Endpoint, Frequency};

    fn record() -> RunRecord {
        let schedule = Schedule::new(
            "conn-1",
            "nightly",
            Endpoint::ftp("/out"),
            Endpoint::local("/in"),
            Frequency::Daily,
        );
        RunRecord::start(&schedule, Utc::now())
    }

    #[test]
    fn test_counters_only_follow_successes() {
        let mut run = record();
        run.push_file(FileRecord::success("a.csv", 100));
        run.push_file(FileRecord::skipped("b.csv", 50, "destination exists"));
        run.push_file(FileRecord::failed("c.csv", 70, "timeout"));

        assert_eq!(run.files_transferred, 1);
        assert_eq!(run.total_bytes, 100);
        assert_eq!(run.details.files.len(), 3);
        assert_eq!(run.count(FileStatus::Skipped), 1);
        assert_eq!(run.count(FileStatus::Failed), 1);
    }

    #[test]
    fn test_finalize() {
        let mut run = record();
        assert!(!run.is_finished());

        run.fail("listing failed", Utc::now());
        assert!(run.is_finished());
        assert_eq!(run.status, RunStatus::Failed);
        assert_eq!(run.errors, vec!["listing failed".to_string()]);
    }

    #[test]
    fn test_file_record_json_omits_empty_fields() {
        let json = serde_json::to_value(FileRecord::success("a.csv", 1)).unwrap();
        assert_eq!(json["status"], "success");
        assert!(json.get("error").is_none());
        assert!(json.get("reason").is_none());
    }

    #[test]
    fn test_query_matches() {
        let run = record();
        assert!(HistoryQuery::for_schedule(run.schedule_id).matches(&run));
        assert!(HistoryQuery::for_connection("conn-1").matches(&run));
        assert!(!HistoryQuery::for_connection("conn-2").matches(&run));
    }
}
