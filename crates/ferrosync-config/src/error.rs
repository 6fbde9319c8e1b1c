//! Configuration errors

use std::path::PathBuf;
use thiserror::Error;

/// Why a configuration could not be loaded, validated or written
#[derive(Error, Debug)]
pub enum ConfigError {
    /// A configuration file could not be read or written
    #[error("cannot access config file {}: {source}", path.display())]
    File {
        /// File that was accessed
        path: PathBuf,
        /// Underlying I/O error
        source: std::io::Error,
    },

    /// A layer could not be parsed or merged
    #[error("cannot parse configuration: {0}")]
    Parse(#[from] config::ConfigError),

    /// A setting is out of range
    #[error("invalid {field}: {message}")]
    Invalid {
        /// Dotted key of the offending setting
        field: &'static str,
        /// What is wrong with it
        message: String,
    },

    /// The configuration could not be rendered
    #[error("cannot render configuration as {format}: {message}")]
    Render {
        /// Target format
        format: &'static str,
        /// Serializer message
        message: String,
    },
}

impl ConfigError {
    /// Out-of-range setting
    pub fn invalid(field: &'static str, message: impl Into<String>) -> Self {
        Self::Invalid {
            field,
            message: message.into(),
        }
    }
}

impl From<ConfigError> for ferrosync_types::Error {
    fn from(error: ConfigError) -> Self {
        Self::config(error.to_string())
    }
}

/// Result type for configuration operations
pub type ConfigResult<T> = Result<T, ConfigError>;
