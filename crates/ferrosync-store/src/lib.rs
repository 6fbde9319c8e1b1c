//! State storage for FerroSync
//!
//! [`MemoryStore`] implements the schedule store, history store and connection registry
//! seams in memory, optionally writing every change through to a [`Snapshot`] file.

#![deny(missing_docs)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

pub mod memory;
pub mod snapshot;

pub use memory::{MemoryStore, Retention};
pub use snapshot::{AuditEvent, Snapshot};
