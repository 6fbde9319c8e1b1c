//! Schedule definitions
//!
//! A [`Schedule`] is a named, persisted sync job. Its identity is the pair
//! `(connection_id, name)`; the scheduler mutates only `status`, `last_run` and
//! `next_run`.

use crate::{Error, JobKey, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use uuid::Uuid;

/// Unique identifier for a schedule
pub type ScheduleId = Uuid;

/// How often a schedule triggers automatically
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Frequency {
    /// Never triggered automatically
    Manual,
    /// Every hour at the configured minute
    Hourly,
    /// Every day at `HH:MM`
    Daily,
    /// Every week on `day_of_week` at `HH:MM`
    Weekly,
    /// Every month on `day_of_month` at `HH:MM`
    Monthly,
}

impl Frequency {
    /// Lower-case name as used in configuration and on the command line
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Manual => "manual",
            Self::Hourly => "hourly",
            Self::Daily => "daily",
            Self::Weekly => "weekly",
            Self::Monthly => "monthly",
        }
    }
}

impl fmt::Display for Frequency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for Frequency {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "manual" => Ok(Self::Manual),
            "hourly" => Ok(Self::Hourly),
            "daily" => Ok(Self::Daily),
            "weekly" => Ok(Self::Weekly),
            "monthly" => Ok(Self::Monthly),
            other => Err(Error::invalid_schedule(format!("unknown frequency '{other}'"))),
        }
    }
}

/// Wall-clock trigger time, serialized as `"HH:MM"`
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct ScheduleTime {
    hour: u32,
    minute: u32,
}

impl ScheduleTime {
    /// Create a trigger time, validating the ranges
    pub fn new(hour: u32, minute: u32) -> Result<Self> {
        if hour > 23 || minute > 59 {
            return Err(Error::invalid_schedule(format!(
                "time {hour:02}:{minute:02} is out of range"
            )));
        }
        Ok(Self { hour, minute })
    }

    /// Hour component (0-23)
    pub fn hour(self) -> u32 {
        self.hour
    }

    /// Minute component (0-59)
    pub fn minute(self) -> u32 {
        self.minute
    }
}

impl fmt::Display for ScheduleTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}", self.hour, self.minute)
    }
}

impl FromStr for ScheduleTime {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = || Error::invalid_schedule(format!("time '{s}' is not in HH:MM format"));
        let (hour, minute) = s.trim().split_once(':').ok_or_else(invalid)?;
        if hour.is_empty() || minute.len() != 2 || hour.len() > 2 {
            return Err(invalid());
        }
        let hour = hour.parse().map_err(|_| invalid())?;
        let minute = minute.parse().map_err(|_| invalid())?;
        Self::new(hour, minute)
    }
}

impl Serialize for ScheduleTime {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ScheduleTime {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// One side of a sync job
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Endpoint {
    /// Path on the connection's FTP server
    Ftp {
        /// Remote path, `/`-separated
        path: String,
    },
    /// Path on the local filesystem
    Local {
        /// Local directory
        path: PathBuf,
    },
}

impl Endpoint {
    /// Remote endpoint helper
    pub fn ftp(path: impl Into<String>) -> Self {
        Self::Ftp { path: path.into() }
    }

    /// Local endpoint helper
    pub fn local(path: impl Into<PathBuf>) -> Self {
        Self::Local { path: path.into() }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ftp { path } => write!(f, "ftp:{path}"),
            Self::Local { path } => write!(f, "local:{}", path.display()),
        }
    }
}

impl FromStr for Endpoint {
    type Err = Error;

    /// Parse the `ftp:<path>` / `local:<path>` form produced by `Display`
    fn from_str(s: &str) -> Result<Self> {
        match s.split_once(':') {
            Some(("ftp", path)) if !path.is_empty() => Ok(Self::ftp(path)),
            Some(("local", path)) if !path.is_empty() => Ok(Self::local(path)),
            _ => Err(Error::invalid_schedule(format!(
                "endpoint '{s}' must look like ftp:<path> or local:<path>"
            ))),
        }
    }
}

/// Transfer direction, derived from the endpoint kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncDirection {
    /// Download from the server into a local directory
    FtpToLocal,
    /// Upload a local directory to the server
    LocalToFtp,
    /// Copy between two paths of the same server through a local relay file
    FtpToFtp,
}

impl fmt::Display for SyncDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::FtpToLocal => "ftp->local",
            Self::LocalToFtp => "local->ftp",
            Self::FtpToFtp => "ftp->ftp",
        };
        f.write_str(name)
    }
}

/// Per-schedule transfer options
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ScheduleOptions {
    /// Delete the source file after a successful transfer
    pub delete_after_sync: bool,
    /// Replace files that already exist at the destination
    pub overwrite_existing: bool,
    /// Descend into subdirectories
    pub include_subfolders: bool,
    /// Name patterns; a leading `!` marks an exclude pattern
    pub file_patterns: Vec<String>,
}

/// Observable run state of a schedule
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScheduleStatus {
    /// Never run, or reset
    #[default]
    Idle,
    /// A run is in flight
    Running,
    /// Last run finished successfully
    Success,
    /// Last run failed
    Failed,
}

impl fmt::Display for ScheduleStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Running => "running",
            Self::Success => "success",
            Self::Failed => "failed",
        };
        f.pad(name)
    }
}

/// A named, persisted sync job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Schedule {
    /// Unique id
    pub id: ScheduleId,
    /// Name, unique per connection
    pub name: String,
    /// Owning connection
    pub connection_id: String,
    /// Where files are read from
    pub source: Endpoint,
    /// Where files are written to
    pub destination: Endpoint,
    /// Trigger frequency
    pub frequency: Frequency,
    /// Trigger time (`hourly` only uses the minute)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time: Option<ScheduleTime>,
    /// Weekday for `weekly`, 0 = Sunday
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub day_of_week: Option<u8>,
    /// Day for `monthly`, 1-31
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub day_of_month: Option<u8>,
    /// Transfer options
    #[serde(default)]
    pub options: ScheduleOptions,
    /// Whether automatic triggering is enabled
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Current run state
    #[serde(default)]
    pub status: ScheduleStatus,
    /// Completion time of the last run
    #[serde(default)]
    pub last_run: Option<DateTime<Utc>>,
    /// Next automatic trigger
    #[serde(default)]
    pub next_run: Option<DateTime<Utc>>,
}

fn default_enabled() -> bool {
    true
}

impl Schedule {
    /// Create an enabled, idle schedule with default options
    pub fn new(
        connection_id: impl Into<String>,
        name: impl Into<String>,
        source: Endpoint,
        destination: Endpoint,
        frequency: Frequency,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            connection_id: connection_id.into(),
            source,
            destination,
            frequency,
            time: None,
            day_of_week: None,
            day_of_month: None,
            options: ScheduleOptions::default(),
            enabled: true,
            status: ScheduleStatus::Idle,
            last_run: None,
            next_run: None,
        }
    }

    /// Set the trigger time
    pub fn with_time(mut self, time: ScheduleTime) -> Self {
        self.time = Some(time);
        self
    }

    /// Set the weekday (0 = Sunday)
    pub fn with_day_of_week(mut self, day: u8) -> Self {
        self.day_of_week = Some(day);
        self
    }

    /// Set the day of month (1-31)
    pub fn with_day_of_month(mut self, day: u8) -> Self {
        self.day_of_month = Some(day);
        self
    }

    /// Replace the transfer options
    pub fn with_options(mut self, options: ScheduleOptions) -> Self {
        self.options = options;
        self
    }

    /// Identity used by the in-flight guard
    pub fn key(&self) -> JobKey {
        JobKey::new(&self.connection_id, &self.name)
    }

    /// Direction implied by the endpoint kinds
    pub fn direction(&self) -> Result<SyncDirection> {
        match (&self.source, &self.destination) {
            (Endpoint::Ftp { .. }, Endpoint::Local { .. }) => Ok(SyncDirection::FtpToLocal),
            (Endpoint::Local { .. }, Endpoint::Ftp { .. }) => Ok(SyncDirection::LocalToFtp),
            (Endpoint::Ftp { .. }, Endpoint::Ftp { .. }) => Ok(SyncDirection::FtpToFtp),
            (Endpoint::Local { .. }, Endpoint::Local { .. }) => Err(Error::invalid_schedule(
                "local to local synchronization is not supported",
            )),
        }
    }

    /// Whether the scheduler may trigger this schedule at `now`
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.enabled
            && self.status != ScheduleStatus::Running
            && self.next_run.is_some_and(|next| next <= now)
    }

    /// Validate the user-editable fields
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(Error::invalid_schedule("name must not be empty"));
        }
        if self.connection_id.trim().is_empty() {
            return Err(Error::invalid_schedule("connection id must not be empty"));
        }
        if let Some(day) = self.day_of_week {
            if day > 6 {
                return Err(Error::invalid_schedule(format!(
                    "day of week {day} is out of range 0-6"
                )));
            }
        }
        if let Some(day) = self.day_of_month {
            if !(1..=31).contains(&day) {
                return Err(Error::invalid_schedule(format!(
                    "day of month {day} is out of range 1-31"
                )));
            }
        }
        if self
            .options
            .file_patterns
            .iter()
            .any(|pattern| pattern.trim_start_matches('!').trim().is_empty())
        {
            return Err(Error::invalid_schedule("file patterns must not be empty"));
        }
        self.direction()?;
        Ok(())
    }
}
