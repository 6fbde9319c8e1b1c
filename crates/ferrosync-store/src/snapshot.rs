//! Snapshot files
//!
//! The whole store state serialized as one JSON or YAML document, chosen by extension
//! (`.yaml`/`.yml` for YAML, anything else JSON).

use chrono::{DateTime, Utc};
use ferrosync_types::{Connection, Error, Result, RunRecord, Schedule};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// One audit log line
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEvent {
    /// When it was recorded
    pub timestamp: DateTime<Utc>,
    /// Message
    pub message: String,
}

/// Serialized store state
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Snapshot {
    /// Registered connections
    pub connections: Vec<Connection>,
    /// Schedule definitions and state
    pub schedules: Vec<Schedule>,
    /// Run history, oldest first
    pub history: Vec<RunRecord>,
    /// Audit log, oldest first
    pub audit_log: Vec<AuditEvent>,
}

enum Format {
    Json,
    Yaml,
}

impl Format {
    fn for_path(path: &Path) -> Self {
        match path.extension().and_then(|ext| ext.to_str()) {
            Some("yaml" | "yml") => Self::Yaml,
            _ => Self::Json,
        }
    }
}

impl Snapshot {
    /// Read a snapshot file
    pub async fn load(path: &Path) -> Result<Self> {
        let content = tokio::fs::read_to_string(path).await.map_err(|e| {
            Error::persistence(format!("cannot read snapshot {}: {e}", path.display()))
        })?;

        match Format::for_path(path) {
            Format::Yaml => serde_yaml::from_str(&content).map_err(|e| {
                Error::persistence(format!("invalid snapshot {}: {e}", path.display()))
            }),
            Format::Json => serde_json::from_str(&content).map_err(|e| {
                Error::persistence(format!("invalid snapshot {}: {e}", path.display()))
            }),
        }
    }

    /// Write the snapshot, replacing the file atomically
    pub async fn save(&self, path: &Path) -> Result<()> {
        let content = match Format::for_path(path) {
            Format::Yaml => serde_yaml::to_string(self)
                .map_err(|e| Error::persistence(format!("cannot serialize snapshot: {e}")))?,
            Format::Json => serde_json::to_string_pretty(self)
                .map_err(|e| Error::persistence(format!("cannot serialize snapshot: {e}")))?,
        };

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                Error::persistence(format!("cannot create {}: {e}", parent.display()))
            })?;
        }

        let staging = path.with_extension("tmp");
        tokio::fs::write(&staging, content).await.map_err(|e| {
            Error::persistence(format!("cannot write {}: {e}", staging.display()))
        })?;
        tokio::fs::rename(&staging, path).await.map_err(|e| {
            Error::persistence(format!("cannot replace {}: {e}", path.display()))
        })
    }
}
