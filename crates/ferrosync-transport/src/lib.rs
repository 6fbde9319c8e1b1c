//! Transports for FerroSync
//!
//! This crate implements the [`Transport`](ferrosync_types::Transport) seam:
//!
//! - **FTP/FTPS**: [`FtpTransport`] over `suppaftp`, explicit TLS when the connection is secure
//! - **In-memory**: [`MemoryRemote`] for tests and dry runs, with failure injection
//! - **Local filesystem**: helpers in [`local`] for the local side of a run
//!
//! # Examples
//!
//! ```rust
//! use ferrosync_transport::MemoryRemote;
//! use ferrosync_types::{Connection, Transport};
//!
//! # async fn example() -> ferrosync_types::Result<()> {
//! let remote = MemoryRemote::new();
//! remote.add_file("/outbox/report.csv", "id,total\n");
//!
//! let mut transport = remote.transport();
//! transport
//!     .connect(&Connection::new("conn-1", "localhost", "user", "secret"))
//!     .await?;
//! let entries = transport.list("/outbox").await?;
//! assert_eq!(entries.len(), 1);
//! # Ok(())
//! # }
//! ```

#![deny(missing_docs)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

use ferrosync_config::TransportSettings;
use std::time::Duration;

pub mod ftp;
pub mod local;
pub mod memory;

pub use ftp::{FtpTransport, FtpTransportFactory};
pub use memory::{MemoryRemote, MemoryTransport};

/// Session options for network transports
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportOptions {
    /// Control connection timeout
    pub connect_timeout: Duration,
    /// Use passive data connections
    pub passive_mode: bool,
}

impl Default for TransportOptions {
    fn default() -> Self {
        Self::from(&TransportSettings::default())
    }
}

impl From<&TransportSettings> for TransportOptions {
    fn from(settings: &TransportSettings) -> Self {
        Self {
            connect_timeout: settings.connect_timeout(),
            passive_mode: settings.passive_mode,
        }
    }
}
