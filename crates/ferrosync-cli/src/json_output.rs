//! JSON output structures for the FerroSync CLI

use chrono::{DateTime, Utc};
use ferrosync_filter::MatchStrategy;
use ferrosync_types::{FileStatus, Frequency, RunId, RunRecord, RunStatus};
use serde::Serialize;

/// Envelope shared by every JSON document the CLI prints
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JsonOutput<T> {
    /// Operation metadata
    pub metadata: OutputMetadata,
    /// Command payload
    pub data: T,
}

/// Operation metadata
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OutputMetadata {
    /// FerroSync version
    pub version: String,
    /// Command that produced the document
    pub command: String,
    /// When the document was produced
    pub timestamp: String,
}

impl<T: Serialize> JsonOutput<T> {
    /// Wrap a payload
    pub fn new(command: &str, data: T) -> Self {
        Self {
            metadata: OutputMetadata {
                version: env!("CARGO_PKG_VERSION").to_string(),
                command: command.to_string(),
                timestamp: Utc::now().to_rfc3339(),
            },
            data,
        }
    }

    /// Print as pretty JSON on stdout
    pub fn print(&self) -> anyhow::Result<()> {
        println!("{}", serde_json::to_string_pretty(self)?);
        Ok(())
    }
}

/// Condensed outcome of one run
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunSummaryJson {
    /// History record id
    pub run_id: RunId,
    /// Final status
    pub status: RunStatus,
    /// Files transferred
    pub files_transferred: u64,
    /// Bytes transferred
    pub total_bytes: u64,
    /// Files skipped
    pub files_skipped: usize,
    /// Files failed
    pub files_failed: usize,
    /// Wall time in seconds
    pub duration_seconds: Option<f64>,
    /// Top-level errors
    pub errors: Vec<String>,
}

impl From<&RunRecord> for RunSummaryJson {
    fn from(record: &RunRecord) -> Self {
        Self {
            run_id: record.id,
            status: record.status,
            files_transferred: record.files_transferred,
            total_bytes: record.total_bytes,
            files_skipped: record.count(FileStatus::Skipped),
            files_failed: record.count(FileStatus::Failed),
            duration_seconds: record
                .end_time
                .and_then(|end| (end - record.start_time).to_std().ok())
                .map(|elapsed| elapsed.as_secs_f64()),
            errors: record.errors.clone(),
        }
    }
}

/// Upcoming trigger instants
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NextRunJson {
    /// Frequency evaluated
    pub frequency: Frequency,
    /// Reference instant
    pub from: DateTime<Utc>,
    /// Whether the schedule never triggers automatically
    pub manual: bool,
    /// Trigger instants in order
    pub runs: Vec<DateTime<Utc>>,
}

/// Result of testing files against one pattern
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchJson {
    /// Pattern tested
    pub pattern: String,
    /// Per-file results
    pub results: Vec<MatchResultJson>,
}

/// One file tested against a pattern
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchResultJson {
    /// Candidate path
    pub file: String,
    /// Whether it matched
    pub matched: bool,
    /// Strategy that matched it
    pub strategy: Option<String>,
}

impl MatchResultJson {
    /// Build from a matcher verdict
    pub fn new(file: &str, strategy: Option<MatchStrategy>) -> Self {
        Self {
            file: file.to_string(),
            matched: strategy.is_some(),
            strategy: strategy.map(|s| s.to_string()),
        }
    }
}
