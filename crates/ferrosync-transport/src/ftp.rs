//! FTP and explicit FTPS transport
//!
//! `suppaftp`'s synchronous client is driven from `spawn_blocking`; the control stream is
//! moved into the blocking task for each command and handed back afterwards.
//!
//! After a failed command the control channel is checked with `NOOP`. A session that no
//! longer answers in step is dropped and reopened with the same credentials on next use.

use crate::TransportOptions;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ferrosync_types::{Connection, Entry, Error, Result, Transport, TransportFactory};
use native_tls::TlsConnector;
use std::io::Read;
use std::net::{SocketAddr, ToSocketAddrs};
use std::path::{Path, PathBuf};
use suppaftp::list::File as ListedFile;
use suppaftp::types::FileType;
use suppaftp::{FtpError, Mode, NativeTlsConnector, NativeTlsFtpStream, Status};
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

/// Transport speaking FTP, upgraded to TLS for secure connections
pub struct FtpTransport {
    options: TransportOptions,
    stream: Option<NativeTlsFtpStream>,
    session: Option<Connection>,
}

impl FtpTransport {
    /// Create an unconnected transport
    pub fn new(options: TransportOptions) -> Self {
        Self {
            options,
            stream: None,
            session: None,
        }
    }

    /// Whether a session is open
    pub fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    async fn with_stream<T, F>(&mut self, operation: &'static str, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut NativeTlsFtpStream) -> Result<T> + Send + 'static,
    {
        let mut stream = match self.stream.take() {
            Some(stream) => stream,
            None => self.reopen(operation).await?,
        };

        let (stream, result) = tokio::task::spawn_blocking(move || {
            let result = f(&mut stream);
            let stream = match result {
                Ok(_) => Some(stream),
                Err(_) => stream.noop().ok().map(|()| stream),
            };
            (stream, result)
        })
        .await
        .map_err(|e| Error::other(format!("{operation} task failed: {e}")))?;

        if stream.is_none() {
            warn!(operation, "FTP control channel out of step, session dropped");
        }
        self.stream = stream;
        result
    }

    async fn reopen(&self, operation: &'static str) -> Result<NativeTlsFtpStream> {
        let connection = self
            .session
            .clone()
            .ok_or_else(|| Error::connection(format!("{operation}: not connected")))?;
        let options = self.options.clone();
        info!(host = %connection.host, "Reopening FTP session");

        tokio::task::spawn_blocking(move || open_session(&connection, &options))
            .await
            .map_err(|e| Error::connection(format!("reconnect task failed: {e}")))?
    }
}

#[async_trait]
impl Transport for FtpTransport {
    async fn connect(&mut self, connection: &Connection) -> Result<()> {
        if self.stream.is_some() {
            self.close().await?;
        }

        let session = connection.clone();
        let connection = connection.clone();
        let options = self.options.clone();
        info!(
            host = %connection.host,
            port = connection.port,
            secure = connection.secure,
            "Connecting to FTP server"
        );

        let stream = tokio::task::spawn_blocking(move || open_session(&connection, &options))
            .await
            .map_err(|e| Error::connection(format!("connect task failed: {e}")))??;

        self.stream = Some(stream);
        self.session = Some(session);
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        let session = self.session.take();
        let Some(mut stream) = self.stream.take() else {
            return Ok(());
        };
        let host = session.map(|c| c.host).unwrap_or_default();

        let result = tokio::task::spawn_blocking(move || stream.quit())
            .await
            .map_err(|e| Error::other(format!("close task failed: {e}")))?;
        if let Err(e) = result {
            // The session is gone either way.
            warn!(host = %host, error = %e, "FTP QUIT failed");
        }
        Ok(())
    }

    async fn list(&mut self, path: &str) -> Result<Vec<Entry>> {
        let path = path.to_string();
        self.with_stream("list", move |stream| {
            let lines = stream
                .list(Some(&path))
                .map_err(|e| Error::Io {
                    message: format!("cannot list '{path}': {e}"),
                })?;
            Ok(parse_listing(&lines))
        })
        .await
    }

    async fn upload(&mut self, local_path: &Path, remote_path: &str) -> Result<u64> {
        let local_path = local_path.to_path_buf();
        let remote_path = remote_path.to_string();
        self.with_stream("upload", move |stream| {
            let mut file = std::fs::File::open(&local_path)
                .map_err(|e| Error::from_io(&local_path, &e))?;
            stream
                .put_file(&remote_path, &mut file)
                .map_err(|e| map_transfer_error(&remote_path, e))
        })
        .await
    }

    async fn download(&mut self, remote_path: &str, local_path: &Path) -> Result<u64> {
        let local_path = local_path.to_path_buf();
        let remote_path = remote_path.to_string();
        self.with_stream("download", move |stream| {
            download_blocking(stream, &remote_path, &local_path)
        })
        .await
    }

    async fn delete(&mut self, remote_path: &str) -> Result<()> {
        let remote_path = remote_path.to_string();
        self.with_stream("delete", move |stream| {
            stream
                .rm(&remote_path)
                .map_err(|e| map_transfer_error(&remote_path, e))
        })
        .await
    }

    async fn create_directory(&mut self, path: &str) -> Result<()> {
        let path = path.to_string();
        self.with_stream("create_directory", move |stream| {
            let absolute = path.starts_with('/');
            let mut current = String::new();
            for segment in path.split('/').filter(|s| !s.is_empty()) {
                if absolute || !current.is_empty() {
                    current.push('/');
                }
                current.push_str(segment);
                match stream.mkdir(&current) {
                    Ok(()) => debug!(path = %current, "Created remote directory"),
                    // 550 on MKD means the directory is already there
                    Err(FtpError::UnexpectedResponse(response))
                        if response.status == Status::FileUnavailable => {}
                    Err(e) => return Err(map_transfer_error(&current, e)),
                }
            }
            Ok(())
        })
        .await
    }

    async fn file_exists(&mut self, path: &str) -> Result<bool> {
        let path = path.to_string();
        self.with_stream("file_exists", move |stream| match stream.size(&path) {
            Ok(_) => Ok(true),
            Err(FtpError::UnexpectedResponse(response))
                if response.status == Status::FileUnavailable =>
            {
                Ok(false)
            }
            Err(e) => Err(map_transfer_error(&path, e)),
        })
        .await
    }
}

/// Creates [`FtpTransport`]s sharing one set of options
#[derive(Debug, Clone, Default)]
pub struct FtpTransportFactory {
    options: TransportOptions,
}

impl FtpTransportFactory {
    /// Create a factory
    pub fn new(options: TransportOptions) -> Self {
        Self { options }
    }
}

impl TransportFactory for FtpTransportFactory {
    fn create(&self) -> Box<dyn Transport> {
        Box::new(FtpTransport::new(self.options.clone()))
    }
}

fn open_session(connection: &Connection, options: &TransportOptions) -> Result<NativeTlsFtpStream> {
    let address = resolve(connection)?;
    let mut stream = NativeTlsFtpStream::connect_timeout(address, options.connect_timeout)
        .map_err(|e| Error::connection(format!("cannot reach {}: {e}", connection.address())))?;

    if connection.secure {
        let connector = TlsConnector::new()
            .map_err(|e| Error::connection(format!("TLS setup failed: {e}")))?;
        stream = stream
            .into_secure(NativeTlsConnector::from(connector), &connection.host)
            .map_err(|e| Error::connection(format!("TLS negotiation failed: {e}")))?;
    }

    stream
        .login(&connection.username, &connection.password)
        .map_err(|e| Error::connection(format!("login failed for '{}': {e}", connection.username)))?;

    let mode = if options.passive_mode {
        Mode::Passive
    } else {
        Mode::Active
    };
    stream.set_mode(mode);
    stream
        .transfer_type(FileType::Binary)
        .map_err(|e| Error::connection(format!("cannot switch to binary mode: {e}")))?;

    debug!(address = %address, "FTP session established");
    Ok(stream)
}

fn resolve(connection: &Connection) -> Result<SocketAddr> {
    (connection.host.as_str(), connection.port)
        .to_socket_addrs()
        .map_err(|e| Error::connection(format!("cannot resolve {}: {e}", connection.address())))?
        .next()
        .ok_or_else(|| Error::connection(format!("no address for {}", connection.address())))
}

fn download_blocking(
    stream: &mut NativeTlsFtpStream,
    remote_path: &str,
    local_path: &Path,
) -> Result<u64> {
    let mut reader = stream
        .retr_as_stream(remote_path)
        .map_err(|e| map_transfer_error(remote_path, e))?;
    let staged = stage(&mut reader, remote_path, local_path);
    // the transfer reply is read even when the copy failed
    let finalized = stream
        .finalize_retr_stream(reader)
        .map_err(|e| map_transfer_error(remote_path, e));

    let (partial, bytes) = staged?;
    finalized?;
    partial
        .persist(local_path)
        .map_err(|e| Error::from_io(local_path, &e.error))?;
    Ok(bytes)
}

/// Copy `reader` into a temporary file beside `local_path`.
///
/// The temporary file is removed when dropped, so a failed copy leaves nothing behind.
fn stage(
    reader: &mut impl Read,
    remote_path: &str,
    local_path: &Path,
) -> Result<(NamedTempFile, u64)> {
    let dir = match local_path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let mut partial = tempfile::Builder::new()
        .prefix(".ferrosync-")
        .suffix(".part")
        .tempfile_in(dir)
        .map_err(|e| Error::from_io(dir, &e))?;
    let bytes = std::io::copy(reader, &mut partial)
        .map_err(|e| Error::transfer(remote_path, e.to_string()))?;
    Ok((partial, bytes))
}

fn parse_listing(lines: &[String]) -> Vec<Entry> {
    lines
        .iter()
        .filter_map(|line| match ListedFile::try_from(line.as_str()) {
            Ok(file) => Some(file),
            Err(e) => {
                debug!(line = %line, error = ?e, "Skipping unparseable LIST line");
                None
            }
        })
        .filter(|file| file.name() != "." && file.name() != "..")
        .map(|file| {
            let entry = if file.is_directory() {
                Entry::directory(file.name())
            } else {
                Entry::file(file.name(), file.size() as u64)
            };
            entry.with_modified(DateTime::<Utc>::from(file.modified()))
        })
        .collect()
}

fn map_transfer_error(path: &str, error: FtpError) -> Error {
    match error {
        FtpError::UnexpectedResponse(response) if response.status == Status::FileUnavailable => {
            Error::FileNotFound {
                path: PathBuf::from(path),
            }
        }
        FtpError::ConnectionError(e) => Error::transfer(path, format!("connection lost: {e}")),
        other => Error::transfer(path, other.to_string()),
    }
}
