//! Error types and handling for FerroSync
//!
//! Every failure in the sync pipeline is expressed as one [`Error`] variant. The variant
//! decides how the failure is treated: whether the retry helper may try again, whether it
//! is fatal to the run, and how it is surfaced to callers of the scheduler.

use std::path::PathBuf;

/// How much of the current run a failure affects, ordered from least to most
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
pub enum ErrorSeverity {
    /// The request is dropped; the schedule itself is fine
    Low,
    /// Worth another attempt within the retry budget
    Medium,
    /// The run fails and is recorded as such
    High,
}

/// Main error type for FerroSync operations
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum Error {
    /// Local I/O failed for a reason other than a missing path or access rights
    #[error("local i/o failed: {message}")]
    Io {
        /// Rendered `std::io::Error`
        message: String,
    },

    /// Local path does not exist
    #[error("no such local path: {path}")]
    FileNotFound {
        /// Missing path
        path: PathBuf,
    },

    /// Local path is not accessible
    #[error("access denied to local path: {path}")]
    PermissionDenied {
        /// Inaccessible path
        path: PathBuf,
    },

    /// Transport connection could not be established
    #[error("Connection error: {message}")]
    Connection {
        /// Error message describing the connection issue
        message: String,
    },

    /// A single file transfer failed
    #[error("Transfer of '{path}' failed: {message}")]
    Transfer {
        /// Path of the file being transferred
        path: String,
        /// Error message from the transport
        message: String,
    },

    /// Local filesystem side of a run is unusable
    #[error("Filesystem error at '{path}': {message}")]
    Filesystem {
        /// Local path involved
        path: PathBuf,
        /// Error message
        message: String,
    },

    /// Schedule lookup failed
    #[error("Schedule '{name}' not found for connection '{connection_id}'")]
    ScheduleNotFound {
        /// Owning connection id
        connection_id: String,
        /// Schedule name
        name: String,
    },

    /// Connection lookup failed
    #[error("Connection '{connection_id}' not found")]
    ConnectionNotFound {
        /// Connection id that was requested
        connection_id: String,
    },

    /// A run of the same schedule is already in flight
    #[error("Schedule '{name}' for connection '{connection_id}' is already running")]
    DuplicateInFlight {
        /// Owning connection id
        connection_id: String,
        /// Schedule name
        name: String,
    },

    /// Persistence collaborator failed
    #[error("Persistence error: {message}")]
    Persistence {
        /// Error message
        message: String,
    },

    /// Schedule definition is invalid
    #[error("Invalid schedule: {message}")]
    InvalidSchedule {
        /// Error message describing the invalid field
        message: String,
    },

    /// File pattern could not be compiled
    #[error("Invalid pattern '{pattern}': {message}")]
    Pattern {
        /// Offending pattern
        pattern: String,
        /// Compiler message
        message: String,
    },

    /// Settings could not be loaded or are out of range
    #[error("Invalid configuration: {message}")]
    Config {
        /// Loader or validation message
        message: String,
    },

    /// Transport did not answer in time
    #[error("No response from server within {seconds}s")]
    Timeout {
        /// Configured timeout
        seconds: u64,
    },

    /// Anything else
    #[error("{message}")]
    Other {
        /// Custom error message
        message: String,
    },
}

/// Coarse grouping of [`Error`] variants
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// I/O related errors
    Io,
    /// Connection errors
    Connection,
    /// Per-file transfer errors
    Transfer,
    /// Local filesystem errors
    Filesystem,
    /// Lookup failures for schedules or connections
    NotFound,
    /// Mutual exclusion rejections
    DuplicateInFlight,
    /// Persistence errors
    Persistence,
    /// Validation errors (schedule, pattern, config)
    Validation,
    /// Timeout
    Timeout,
    /// Other errors
    Other,
}

impl Error {
    /// Group this error belongs to
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Io { .. } | Self::FileNotFound { .. } | Self::PermissionDenied { .. } => {
                ErrorKind::Io
            }
            Self::Connection { .. } => ErrorKind::Connection,
            Self::Transfer { .. } => ErrorKind::Transfer,
            Self::Filesystem { .. } => ErrorKind::Filesystem,
            Self::ScheduleNotFound { .. } | Self::ConnectionNotFound { .. } => ErrorKind::NotFound,
            Self::DuplicateInFlight { .. } => ErrorKind::DuplicateInFlight,
            Self::Persistence { .. } => ErrorKind::Persistence,
            Self::InvalidSchedule { .. } | Self::Pattern { .. } | Self::Config { .. } => {
                ErrorKind::Validation
            }
            Self::Timeout { .. } => ErrorKind::Timeout,
            Self::Other { .. } => ErrorKind::Other,
        }
    }

    /// Impact on the run in progress
    pub fn severity(&self) -> ErrorSeverity {
        match self {
            Self::Io { .. } => ErrorSeverity::Medium,
            Self::FileNotFound { .. } | Self::PermissionDenied { .. } => ErrorSeverity::High,
            Self::Connection { .. } => ErrorSeverity::Medium,
            Self::Transfer { .. } => ErrorSeverity::Medium,
            Self::Filesystem { .. } => ErrorSeverity::High,
            Self::ScheduleNotFound { .. } | Self::ConnectionNotFound { .. } => ErrorSeverity::High,
            Self::DuplicateInFlight { .. } => ErrorSeverity::Low,
            Self::Persistence { .. } => ErrorSeverity::Low,
            Self::InvalidSchedule { .. } | Self::Pattern { .. } | Self::Config { .. } => {
                ErrorSeverity::High
            }
            Self::Timeout { .. } => ErrorSeverity::Medium,
            Self::Other { .. } => ErrorSeverity::Medium,
        }
    }

    /// Whether the same call could succeed if repeated
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::Io { message } => {
                let message = message.to_ascii_lowercase();
                message.contains("interrupted")
                    || message.contains("would block")
                    || message.contains("timed out")
                    || message.contains("connection reset")
                    || message.contains("broken pipe")
            }
            Self::Connection { .. } | Self::Transfer { .. } | Self::Timeout { .. } => true,
            Self::Persistence { .. } | Self::Other { .. } => true,
            Self::FileNotFound { .. }
            | Self::PermissionDenied { .. }
            | Self::Filesystem { .. }
            | Self::ScheduleNotFound { .. }
            | Self::ConnectionNotFound { .. }
            | Self::DuplicateInFlight { .. }
            | Self::InvalidSchedule { .. }
            | Self::Pattern { .. }
            | Self::Config { .. } => false,
        }
    }

    /// Whether the retry helper may spend another attempt on this error
    pub fn should_retry(&self) -> bool {
        self.severity() <= ErrorSeverity::Medium && self.is_recoverable()
    }

    /// Create a new connection error
    pub fn connection<S: Into<String>>(message: S) -> Self {
        Self::Connection {
            message: message.into(),
        }
    }

    /// Create a new transfer error
    pub fn transfer<P: Into<String>, S: Into<String>>(path: P, message: S) -> Self {
        Self::Transfer {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Create a new local filesystem error
    pub fn filesystem<P: Into<PathBuf>, S: Into<String>>(path: P, message: S) -> Self {
        Self::Filesystem {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Create a new persistence error
    pub fn persistence<S: Into<String>>(message: S) -> Self {
        Self::Persistence {
            message: message.into(),
        }
    }

    /// Create a new invalid schedule error
    pub fn invalid_schedule<S: Into<String>>(message: S) -> Self {
        Self::InvalidSchedule {
            message: message.into(),
        }
    }

    /// Configuration failure
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Failure with no better variant
    pub fn other(message: impl Into<String>) -> Self {
        Self::Other {
            message: message.into(),
        }
    }

    /// Convert an I/O error raised while touching a local path
    pub fn from_io(path: impl Into<PathBuf>, error: &std::io::Error) -> Self {
        let path = path.into();
        match error.kind() {
            std::io::ErrorKind::NotFound => Self::FileNotFound { path },
            std::io::ErrorKind::PermissionDenied => Self::PermissionDenied { path },
            _ => Self::Io {
                message: format!("{}: {}", path.display(), error),
            },
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(source: std::io::Error) -> Self {
        let message = source.to_string();
        Self::Io { message }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn test_retry_implies_recoverable(message in ".*") {
            let errors = vec![
                Error::from(std::io::Error::other(message.clone())),
                Error::connection(message.clone()),
                Error::transfer("a.txt", message.clone()),
                Error::persistence(message.clone()),
                Error::other(message.clone()),
            ];

            for error in errors {
                prop_assert_eq!(
                    error.should_retry(),
                    error.is_recoverable() && error.severity() != ErrorSeverity::High
                );
            }
        }
    }

    #[test]
    fn test_connection_error_is_retried() {
        let error = Error::connection("connection refused");
        assert_eq!(error.kind(), ErrorKind::Connection);
        assert!(error.should_retry());
    }

    #[test]
    fn test_transfer_error_is_retried() {
        let error = Error::transfer("/remote/a.csv", "data connection closed");
        assert_eq!(error.kind(), ErrorKind::Transfer);
        assert!(error.should_retry());
        assert!(error.to_string().contains("/remote/a.csv"));
    }

    #[test]
    fn test_permanent_errors_are_not_retried() {
        let errors = vec![
            Error::FileNotFound { path: PathBuf::from("/missing") },
            Error::PermissionDenied { path: PathBuf::from("/protected") },
            Error::filesystem("/data", "not a directory"),
            Error::invalid_schedule("bad time"),
            Error::DuplicateInFlight {
                connection_id: "c1".into(),
                name: "nightly".into(),
            },
        ];

        for error in errors {
            assert!(!error.should_retry(), "{error} should not be retried");
        }
    }

    #[test]
    fn test_transient_io_messages_are_retried() {
        assert!(Error::Io { message: "Connection timed out".into() }.should_retry());
        assert!(Error::Io { message: "Broken pipe".into() }.should_retry());
        assert!(!Error::Io { message: "No space left on device".into() }.should_retry());
    }

    #[test]
    fn test_from_io_maps_not_found_and_permission() {
        let not_found = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        assert!(matches!(
            Error::from_io("/a", &not_found),
            Error::FileNotFound { .. }
        ));

        let denied = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "nope");
        assert!(matches!(
            Error::from_io("/a", &denied),
            Error::PermissionDenied { .. }
        ));
    }

    #[test]
    fn test_duplicate_trigger_is_low_severity() {
        let error = Error::DuplicateInFlight {
            connection_id: "c1".into(),
            name: "nightly".into(),
        };
        assert_eq!(error.severity(), ErrorSeverity::Low);
        assert_eq!(error.kind(), ErrorKind::DuplicateInFlight);
        assert!(ErrorSeverity::Low < ErrorSeverity::High);
    }
}
