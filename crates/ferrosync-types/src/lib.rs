//! Core type system and error handling for FerroSync
//!
//! This crate provides the foundational types shared by every FerroSync crate:
//!
//! - **Error handling**: one error taxonomy with severity and retry classification
//! - **Schedules**: frequency, trigger time, endpoints, options and run state
//! - **History**: run records with per-file outcomes
//! - **Traits**: the transport, registry and persistence seams
//!
//! # Examples
//!
//! ```rust
//! use ferrosync_types::{Endpoint, Frequency, Result, Schedule};
//!
//! fn nightly() -> Result<Schedule> {
//!     let schedule = Schedule::new(
//!         "conn-1",
//!         "nightly",
//!         Endpoint::ftp("/outbox"),
//!         Endpoint::local("/data/inbox"),
//!         Frequency::Daily,
//!     )
//!     .with_time("02:30".parse()?);
//!     schedule.validate()?;
//!     Ok(schedule)
//! }
//! # nightly().unwrap();
//! ```

#![deny(missing_docs)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod connection;
pub mod error;
pub mod history;
pub mod result;
pub mod schedule;
pub mod traits;
pub mod types;

// Re-export commonly used types
pub use config::RetryConfig;
pub use connection::Connection;
pub use error::{Error, ErrorKind, ErrorSeverity};
pub use history::{
    FileRecord, FileStatus, HistoryFilter, HistoryQuery, RunDetails, RunId, RunRecord, RunStatus,
};
pub use result::Result;
pub use schedule::{
    Endpoint, Frequency, Schedule, ScheduleId, ScheduleOptions, ScheduleStatus, ScheduleTime,
    SyncDirection,
};
pub use traits::*;
pub use types::*;
