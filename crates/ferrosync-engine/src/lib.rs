//! Scheduling and sync engine for FerroSync
//!
//! This crate decides when a schedule runs and performs the run:
//!
//! - **Next-run calculation**: wall-clock trigger arithmetic for every frequency
//! - **Sync execution**: connect, walk, filter, transfer with retry, record outcomes
//! - **Scheduler loop**: periodic dispatch with one run in flight per schedule
//! - **Monitoring**: run events and scheduler counters
//!
//! # Examples
//!
//! ```rust
//! use ferrosync_config::SchedulerSettings;
//! use ferrosync_engine::{Scheduler, SyncExecutor};
//! use ferrosync_store::MemoryStore;
//! use ferrosync_transport::MemoryRemote;
//! use ferrosync_types::{Connection, Endpoint, Frequency, Schedule};
//! use std::sync::Arc;
//!
//! # async fn example() -> ferrosync_types::Result<()> {
//! let store = Arc::new(MemoryStore::new());
//! store
//!     .add_connection(Connection::new("conn-1", "ftp.example.com", "user", "secret"))
//!     .await?;
//!
//! let executor = SyncExecutor::new(Arc::new(MemoryRemote::new()), store.clone());
//! let scheduler = Scheduler::new(SchedulerSettings::default(), store, executor);
//!
//! scheduler
//!     .create_schedule(Schedule::new(
//!         "conn-1",
//!         "nightly",
//!         Endpoint::ftp("/outbox"),
//!         Endpoint::local("/data/inbox"),
//!         Frequency::Daily,
//!     ))
//!     .await?;
//!
//! let run = scheduler.run_now("conn-1", "nightly").await?;
//! println!("Started {}", run.key());
//! # Ok(())
//! # }
//! ```

#![deny(missing_docs)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

pub mod executor;
pub mod guard;
pub mod monitor;
pub mod next_run;
pub mod retry;
pub mod scheduler;

pub use executor::SyncExecutor;
pub use guard::{JobPermit, JobTable};
pub use monitor::{EventBus, RunEvent, SchedulerStats, StatsCollector};
pub use next_run::{next_run, NextRunCalculator, TimeBasis, MANUAL_HORIZON};
pub use retry::Backoff;
pub use scheduler::{RunHandle, Scheduler, SchedulerStatus, TickReport, Trigger};
