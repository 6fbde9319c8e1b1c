//! In-memory remote filesystem
//!
//! [`MemoryRemote`] is a shared handle to a fake FTP server. Every [`MemoryTransport`]
//! created from it sees the same files, and failures can be injected per operation.

use async_trait::async_trait;
use ferrosync_types::{Connection, Entry, Error, Result, Transport, TransportFactory};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Default)]
struct RemoteState {
    files: BTreeMap<String, Vec<u8>>,
    dirs: BTreeSet<String>,
    connect_failures: u32,
    list_failures: HashSet<String>,
    transfer_failures: HashMap<String, u32>,
    delete_failures: HashSet<String>,
    transfer_delay: Option<Duration>,
    transfer_attempts: HashMap<String, u32>,
    connects: u64,
}

/// Shared in-memory remote filesystem with failure injection
#[derive(Debug, Clone)]
pub struct MemoryRemote {
    state: Arc<Mutex<RemoteState>>,
}

impl Default for MemoryRemote {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryRemote {
    /// Create an empty remote holding only `/`
    pub fn new() -> Self {
        let mut state = RemoteState::default();
        state.dirs.insert("/".to_string());
        Self {
            state: Arc::new(Mutex::new(state)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, RemoteState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Add a file, creating its parent directories
    pub fn add_file(&self, path: &str, contents: impl Into<Vec<u8>>) {
        let path = normalize(path);
        let mut state = self.lock();
        insert_parents(&mut state.dirs, &path);
        state.files.insert(path, contents.into());
    }

    /// Add a directory and its parents
    pub fn add_directory(&self, path: &str) {
        let path = normalize(path);
        let mut state = self.lock();
        insert_parents(&mut state.dirs, &path);
        state.dirs.insert(path);
    }

    /// Contents of a file
    pub fn read_file(&self, path: &str) -> Option<Vec<u8>> {
        self.lock().files.get(&normalize(path)).cloned()
    }

    /// Whether a file exists
    pub fn has_file(&self, path: &str) -> bool {
        self.lock().files.contains_key(&normalize(path))
    }

    /// Whether a directory exists
    pub fn has_directory(&self, path: &str) -> bool {
        self.lock().dirs.contains(&normalize(path))
    }

    /// Fail the next `times` connection attempts
    pub fn fail_connect(&self, times: u32) {
        self.lock().connect_failures = times;
    }

    /// Fail every listing of `path`
    pub fn fail_list(&self, path: &str) {
        self.lock().list_failures.insert(normalize(path));
    }

    /// Fail the next `times` uploads or downloads of `path`
    pub fn fail_transfer(&self, path: &str, times: u32) {
        self.lock().transfer_failures.insert(normalize(path), times);
    }

    /// Fail every deletion of `path`
    pub fn fail_delete(&self, path: &str) {
        self.lock().delete_failures.insert(normalize(path));
    }

    /// Delay every upload and download
    pub fn set_transfer_delay(&self, delay: Duration) {
        self.lock().transfer_delay = Some(delay);
    }

    /// Successful connections so far
    pub fn connect_count(&self) -> u64 {
        self.lock().connects
    }

    /// Upload/download attempts made for `path`, failed ones included
    pub fn transfer_attempts(&self, path: &str) -> u32 {
        self.lock()
            .transfer_attempts
            .get(&normalize(path))
            .copied()
            .unwrap_or(0)
    }

    /// Create an unconnected transport on this remote
    pub fn transport(&self) -> MemoryTransport {
        MemoryTransport {
            remote: self.clone(),
            connected: false,
        }
    }

    fn begin_transfer(&self, path: &str) -> Result<Option<Duration>> {
        let mut state = self.lock();
        *state.transfer_attempts.entry(path.to_string()).or_insert(0) += 1;
        if let Some(remaining) = state.transfer_failures.get_mut(path) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(Error::transfer(path, "injected transfer failure"));
            }
        }
        Ok(state.transfer_delay)
    }
}

impl TransportFactory for MemoryRemote {
    fn create(&self) -> Box<dyn Transport> {
        Box::new(self.transport())
    }
}

/// Transport over a [`MemoryRemote`]
#[derive(Debug)]
pub struct MemoryTransport {
    remote: MemoryRemote,
    connected: bool,
}

impl MemoryTransport {
    fn ensure_connected(&self) -> Result<()> {
        if self.connected {
            Ok(())
        } else {
            Err(Error::connection("not connected"))
        }
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn connect(&mut self, connection: &Connection) -> Result<()> {
        let mut state = self.remote.lock();
        if state.connect_failures > 0 {
            state.connect_failures -= 1;
            return Err(Error::connection(format!(
                "cannot reach {}: injected connect failure",
                connection.address()
            )));
        }
        state.connects += 1;
        self.connected = true;
        debug!(connection = %connection.id, "Memory transport connected");
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        self.connected = false;
        Ok(())
    }

    async fn list(&mut self, path: &str) -> Result<Vec<Entry>> {
        self.ensure_connected()?;
        let path = normalize(path);
        let state = self.remote.lock();

        if state.list_failures.contains(&path) {
            return Err(Error::Io {
                message: format!("cannot list '{path}': injected listing failure"),
            });
        }
        if !state.dirs.contains(&path) {
            return Err(Error::FileNotFound {
                path: PathBuf::from(&path),
            });
        }

        let dirs = state
            .dirs
            .iter()
            .filter(|dir| dir.as_str() != "/" && parent(dir) == path)
            .map(|dir| Entry::directory(basename(dir)));
        let files = state
            .files
            .iter()
            .filter(|(file, _)| parent(file) == path)
            .map(|(file, data)| Entry::file(basename(file), data.len() as u64));

        Ok(dirs.chain(files).collect())
    }

    async fn upload(&mut self, local_path: &Path, remote_path: &str) -> Result<u64> {
        self.ensure_connected()?;
        let remote_path = normalize(remote_path);
        if let Some(delay) = self.remote.begin_transfer(&remote_path)? {
            tokio::time::sleep(delay).await;
        }

        let data = tokio::fs::read(local_path)
            .await
            .map_err(|e| Error::from_io(local_path, &e))?;
        let bytes = data.len() as u64;

        let mut state = self.remote.lock();
        if !state.dirs.contains(&parent(&remote_path)) {
            return Err(Error::transfer(&remote_path, "parent directory does not exist"));
        }
        state.files.insert(remote_path, data);
        Ok(bytes)
    }

    async fn download(&mut self, remote_path: &str, local_path: &Path) -> Result<u64> {
        self.ensure_connected()?;
        let remote_path = normalize(remote_path);
        if let Some(delay) = self.remote.begin_transfer(&remote_path)? {
            tokio::time::sleep(delay).await;
        }

        let data = self
            .remote
            .read_file(&remote_path)
            .ok_or_else(|| Error::FileNotFound {
                path: PathBuf::from(&remote_path),
            })?;
        tokio::fs::write(local_path, &data)
            .await
            .map_err(|e| Error::from_io(local_path, &e))?;
        Ok(data.len() as u64)
    }

    async fn delete(&mut self, remote_path: &str) -> Result<()> {
        self.ensure_connected()?;
        let remote_path = normalize(remote_path);
        let mut state = self.remote.lock();
        if state.delete_failures.contains(&remote_path) {
            return Err(Error::transfer(&remote_path, "injected delete failure"));
        }
        state
            .files
            .remove(&remote_path)
            .map(|_| ())
            .ok_or(Error::FileNotFound {
                path: PathBuf::from(remote_path),
            })
    }

    async fn create_directory(&mut self, path: &str) -> Result<()> {
        self.ensure_connected()?;
        self.remote.add_directory(path);
        Ok(())
    }

    async fn file_exists(&mut self, path: &str) -> Result<bool> {
        self.ensure_connected()?;
        Ok(self.remote.has_file(path))
    }
}

fn normalize(path: &str) -> String {
    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty() && *s != ".").collect();
    format!("/{}", segments.join("/"))
}

fn parent(path: &str) -> String {
    match path.rfind('/') {
        Some(0) | None => "/".to_string(),
        Some(index) => path[..index].to_string(),
    }
}

fn basename(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

fn insert_parents(dirs: &mut BTreeSet<String>, path: &str) {
    let mut current = parent(path);
    while current != "/" {
        let next = parent(&current);
        dirs.insert(current);
        current = next;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn connection() -> Connection {
        Connection::new("conn-1", "ftp.example.com", "user", "secret")
    }

    #[tokio::test]
    async fn test_list_shows_direct_children() {
        let remote = MemoryRemote::new();
        remote.add_file("/out/a.csv", "a");
        remote.add_file("/out/sub/b.csv", "bb");
        remote.add_file("/other/c.csv", "c");

        let mut transport = remote.transport();
        transport.connect(&connection()).await.unwrap();
        let mut entries = transport.list("/out").await.unwrap();
        entries.sort_by(|a, b| a.name.cmp(&b.name));

        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0], Entry::file("a.csv", 1));
        assert_eq!(entries[1], Entry::directory("sub"));
    }

    #[tokio::test]
    async fn test_missing_directory_and_injected_list_failure() {
        let remote = MemoryRemote::new();
        remote.add_directory("/broken");
        remote.fail_list("/broken");

        let mut transport = remote.transport();
        transport.connect(&connection()).await.unwrap();

        assert!(matches!(
            transport.list("/missing").await,
            Err(Error::FileNotFound { .. })
        ));
        assert!(matches!(transport.list("/broken").await, Err(Error::Io { .. })));
    }

    #[tokio::test]
    async fn test_connect_failures_are_consumed() {
        let remote = MemoryRemote::new();
        remote.fail_connect(2);

        let mut transport = remote.transport();
        assert!(transport.connect(&connection()).await.is_err());
        assert!(transport.connect(&connection()).await.is_err());
        transport.connect(&connection()).await.unwrap();
        assert_eq!(remote.connect_count(), 1);
    }

    #[tokio::test]
    async fn test_round_trip_through_local_disk() {
        let temp_dir = TempDir::new().unwrap();
        let local = temp_dir.path().join("a.csv");
        let remote = MemoryRemote::new();
        remote.add_file("/out/a.csv", "payload");
        remote.add_directory("/in");
        remote.fail_transfer("/out/a.csv", 1);

        let mut transport = remote.transport();
        transport.connect(&connection()).await.unwrap();

        assert!(transport.download("/out/a.csv", &local).await.is_err());
        assert_eq!(transport.download("/out/a.csv", &local).await.unwrap(), 7);
        assert_eq!(remote.transfer_attempts("/out/a.csv"), 2);

        assert_eq!(transport.upload(&local, "/in/a.csv").await.unwrap(), 7);
        assert_eq!(remote.read_file("/in/a.csv").unwrap(), b"payload");
        assert!(transport.file_exists("/in/a.csv").await.unwrap());

        transport.delete("/out/a.csv").await.unwrap();
        assert!(!remote.has_file("/out/a.csv"));
    }

    #[tokio::test]
    async fn test_upload_requires_parent_directory() {
        let temp_dir = TempDir::new().unwrap();
        let local = temp_dir.path().join("a.csv");
        std::fs::write(&local, "x").unwrap();

        let remote = MemoryRemote::new();
        let mut transport = remote.transport();
        transport.connect(&connection()).await.unwrap();

        assert!(transport.upload(&local, "/deep/dir/a.csv").await.is_err());
        transport.create_directory("/deep/dir").await.unwrap();
        transport.upload(&local, "/deep/dir/a.csv").await.unwrap();
        assert!(remote.has_directory("/deep"));
    }

    #[tokio::test]
    async fn test_requires_connection() {
        let mut transport = MemoryRemote::new().transport();
        assert!(matches!(
            transport.list("/").await,
            Err(Error::Connection { .. })
        ));
    }
}
