//! Connection records read from the connection registry

use serde::{Deserialize, Serialize};
use std::fmt;

/// Credentials and defaults for one FTP server
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Connection {
    /// Registry id
    pub id: String,
    /// Host name or address
    pub host: String,
    /// Control port
    #[serde(default = "default_port")]
    pub port: u16,
    /// Login user
    pub username: String,
    /// Login secret
    #[serde(default)]
    pub password: String,
    /// Use explicit FTPS
    #[serde(default)]
    pub secure: bool,
    /// Working directory after login
    #[serde(default = "default_path")]
    pub default_path: String,
}

fn default_port() -> u16 {
    Connection::DEFAULT_PORT
}

fn default_path() -> String {
    "/".to_string()
}

impl Connection {
    /// Standard FTP control port
    pub const DEFAULT_PORT: u16 = 21;

    /// Create a plain-FTP connection on the default port
    pub fn new(
        id: impl Into<String>,
        host: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            host: host.into(),
            port: Self::DEFAULT_PORT,
            username: username.into(),
            password: password.into(),
            secure: false,
            default_path: default_path(),
        }
    }

    /// `host:port` for the control connection
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

// The secret never reaches logs.
impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &"***")
            .field("secure", &self.secure)
            .field("default_path", &self.default_path)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_debug_redacts_password() {
        let connection = Connection::new("c1", "ftp.example.com", "bob", "hunter2");
        let debug = format!("{connection:?}");
        assert!(!debug.contains("hunter2"));
        assert!(debug.contains("ftp.example.com"));
    }

    #[test]
    fn test_defaults_on_deserialize() {
        let connection: Connection = serde_json::from_str(
            r#"{"id":"c1","host":"h","username":"u"}"#,
        )
        .unwrap();
        assert_eq!(connection.port, 21);
        assert_eq!(connection.default_path, "/");
        assert_eq!(connection.address(), "h:21");
    }
}
