#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::net::TcpListener;

use vaultsync::config::Endpoint;
use vaultsync::fs::types::{FileRecord, Tombstone};
use vaultsync::fs::LocalTree;
use vaultsync::server::{serve, AppState};
use vaultsync::store::{ContentStore, StoreOptions};
use vaultsync::sync::{HttpTransport, RemoteStore, SyncFilter};
use vaultsync::Error;

pub const MAX_UPLOAD: usize = 64 * 1024;

/// A content store served on an ephemeral local port.
pub struct TestServer {
    pub url: String,
    pub store: Arc<ContentStore>,
    _dir: TempDir,
}

impl TestServer {
    pub async fn start(token: Option<&str>, tombstones: bool) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let options = StoreOptions {
            tombstones,
            ..StoreOptions::default()
        };
        let store = Arc::new(ContentStore::open(dir.path(), options).unwrap());
        let state = AppState::new(Arc::clone(&store), token.map(str::to_string));

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(serve(listener, state, MAX_UPLOAD));

        Self {
            url: format!("http://{}", addr),
            store,
            _dir: dir,
        }
    }

    pub async fn private() -> Self {
        Self::start(None, true).await
    }

    pub async fn publish() -> Self {
        Self::start(None, false).await
    }

    pub fn transport(&self) -> Arc<HttpTransport> {
        self.transport_with_token(None)
    }

    pub fn transport_with_token(&self, token: Option<&str>) -> Arc<HttpTransport> {
        let endpoint = Endpoint {
            url: self.url.clone(),
            token: token.map(str::to_string),
        };
        Arc::new(HttpTransport::new(&endpoint, Duration::from_secs(10)).unwrap())
    }

    pub fn put(&self, path: &str, content: &[u8]) {
        self.store.put(path, &mut &content[..]).unwrap();
    }

    pub fn paths(&self) -> Vec<String> {
        self.store.list().unwrap().into_iter().map(|r| r.path).collect()
    }

    pub fn read(&self, path: &str) -> Vec<u8> {
        self.store.read(path).unwrap()
    }

    /// Absolute path of a stored file.
    pub fn file(&self, path: &str) -> PathBuf {
        self.store.root().join(path)
    }
}

/// A local vault in a temp dir.
pub struct Vault {
    dir: TempDir,
    root: PathBuf,
}

impl Vault {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().canonicalize().unwrap();
        Self { dir, root }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path(&self, rel: &str) -> PathBuf {
        self.root.join(rel)
    }

    pub fn tree(&self) -> LocalTree {
        LocalTree::new(&self.root, SyncFilter::default())
    }

    pub fn write(&self, rel: &str, content: &[u8]) -> PathBuf {
        let path = self.path(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, content).unwrap();
        path
    }

    pub fn read(&self, rel: &str) -> Vec<u8> {
        fs::read(self.path(rel)).unwrap()
    }

    pub fn exists(&self, rel: &str) -> bool {
        self.path(rel).exists()
    }
}

pub fn set_mtime(path: &Path, at: DateTime<Utc>) {
    let file = fs::File::options().write(true).open(path).unwrap();
    file.set_modified(at.into()).unwrap();
}

pub fn sorted(mut paths: Vec<String>) -> Vec<String> {
    paths.sort();
    paths
}

/// Wraps a real transport and fails chosen calls. Counts listings.
pub struct FaultyRemote {
    inner: Arc<HttpTransport>,
    corrupt_listing: bool,
    tombstones_down: bool,
    failing: HashSet<String>,
    listings: AtomicUsize,
}

impl FaultyRemote {
    pub fn new(inner: Arc<HttpTransport>) -> Self {
        Self {
            inner,
            corrupt_listing: false,
            tombstones_down: false,
            failing: HashSet::new(),
            listings: AtomicUsize::new(0),
        }
    }

    pub fn with_corrupt_listing(mut self) -> Self {
        self.corrupt_listing = true;
        self
    }

    pub fn with_tombstones_down(mut self) -> Self {
        self.tombstones_down = true;
        self
    }

    /// Uploads and downloads of `path` fail.
    pub fn failing_on(mut self, path: &str) -> Self {
        self.failing.insert(path.to_string());
        self
    }

    pub fn listings(&self) -> usize {
        self.listings.load(Ordering::SeqCst)
    }

    fn check(&self, rel_path: &str) -> vaultsync::Result<()> {
        if self.failing.contains(rel_path) {
            return Err(Error::transport(format!("{}: connection reset", rel_path)));
        }
        Ok(())
    }
}

#[async_trait]
impl RemoteStore for FaultyRemote {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn list_files(&self) -> vaultsync::Result<Vec<FileRecord>> {
        self.listings.fetch_add(1, Ordering::SeqCst);
        if self.corrupt_listing {
            return Err(Error::Decode {
                what: "file listing".to_string(),
                message: "expected value at line 1 column 1".to_string(),
            });
        }
        self.inner.list_files().await
    }

    async fn list_tombstones(&self) -> vaultsync::Result<Vec<Tombstone>> {
        if self.tombstones_down {
            return Err(Error::transport("503 Service Unavailable"));
        }
        self.inner.list_tombstones().await
    }

    async fn upload(&self, rel_path: &str, local_path: &Path) -> vaultsync::Result<u64> {
        self.check(rel_path)?;
        self.inner.upload(rel_path, local_path).await
    }

    async fn download(&self, rel_path: &str, local_path: &Path) -> vaultsync::Result<u64> {
        self.check(rel_path)?;
        self.inner.download(rel_path, local_path).await
    }

    async fn delete(&self, rel_path: &str) -> vaultsync::Result<()> {
        self.inner.delete(rel_path).await
    }
}
