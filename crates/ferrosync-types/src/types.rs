//! Core data types for FerroSync
//!
//! Listing entries and the identity used by the in-flight guard.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// File size in bytes
pub type FileSize = u64;

/// Identity of a schedule for mutual exclusion: `(connection_id, name)`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct JobKey {
    /// Owning connection
    pub connection_id: String,
    /// Schedule name
    pub name: String,
}

impl JobKey {
    /// Create a job key
    pub fn new(connection_id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            connection_id: connection_id.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for JobKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.connection_id, self.name)
    }
}

/// One entry of a directory listing, local or remote
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    /// Base name
    pub name: String,
    /// Whether the entry is a directory
    pub is_directory: bool,
    /// Size in bytes (0 for directories)
    pub size: FileSize,
    /// Last modification time, when the listing provides one
    pub modified: Option<DateTime<Utc>>,
}

impl Entry {
    /// File entry
    pub fn file(name: impl Into<String>, size: FileSize) -> Self {
        Self {
            name: name.into(),
            is_directory: false,
            size,
            modified: None,
        }
    }

    /// Directory entry
    pub fn directory(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            is_directory: true,
            size: 0,
            modified: None,
        }
    }

    /// Attach a modification time
    pub fn with_modified(mut self, modified: DateTime<Utc>) -> Self {
        self.modified = Some(modified);
        self
    }
}

/// Join two `/`-separated remote path segments
pub fn join_remote(base: &str, name: &str) -> String {
    let name = name.trim_start_matches('/');
    if base.is_empty() {
        return name.to_string();
    }
    if base.ends_with('/') {
        format!("{base}{name}")
    } else {
        format!("{base}/{name}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_join_remote() {
        assert_eq!(join_remote("/out", "a.csv"), "/out/a.csv");
        assert_eq!(join_remote("/out/", "a.csv"), "/out/a.csv");
        assert_eq!(join_remote("/", "a.csv"), "/a.csv");
        assert_eq!(join_remote("", "a.csv"), "a.csv");
        assert_eq!(join_remote("/out", "/sub"), "/out/sub");
    }

    #[test]
    fn test_job_key_display() {
        assert_eq!(JobKey::new("c1", "nightly").to_string(), "c1/nightly");
    }
}
