//! Reconciliation engine.
//!
//! A pass compares the local tree with a remote listing (plus, for the private
//! target, its tombstones), decides one action per path, then executes the
//! actions in order. Failures are per file: they are logged, counted, and the
//! pass moves on. Only failing to list the remote or to walk the local root
//! aborts a pass.

use rayon::prelude::*;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::fs::atomic::remove_empty_parents;
use crate::fs::local::LocalTree;
use crate::fs::types::{FileRecord, LocalFile, Tombstone};
use crate::store::path::canonical_key;
use crate::sync::conflict::{resolve_local, resolve_remote_only, Cause, ConflictStrategy, Resolution};
use crate::sync::hash::hash_file;
use crate::sync::publish::PublishFilter;
use crate::sync::transport::RemoteStore;
use crate::sync::watcher::{Fingerprint, RecentPaths};

/// Sync mode of a target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncMode {
    /// Changes flow both ways. With `push_only`, remote-only files are never
    /// created locally.
    Bidirectional { push_only: bool },
    /// One-way push of publish-eligible files. Anything else is removed remotely.
    Publish,
}

impl SyncMode {
    pub fn is_publish(&self) -> bool {
        matches!(self, Self::Publish)
    }

    pub fn is_push_only(&self) -> bool {
        matches!(self, Self::Bidirectional { push_only: true })
    }
}

/// A remote store and how to sync with it.
#[derive(Clone)]
pub struct SyncTarget {
    /// Name used in logs.
    pub name: String,
    pub remote: Arc<dyn RemoteStore>,
    pub mode: SyncMode,
}

impl SyncTarget {
    pub fn private(remote: Arc<dyn RemoteStore>, push_only: bool) -> Self {
        Self {
            name: "private".to_string(),
            remote,
            mode: SyncMode::Bidirectional { push_only },
        }
    }

    pub fn publish(remote: Arc<dyn RemoteStore>) -> Self {
        Self {
            name: "publish".to_string(),
            remote,
            mode: SyncMode::Publish,
        }
    }
}

impl fmt::Debug for SyncTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncTarget")
            .field("name", &self.name)
            .field("remote", &self.remote.name())
            .field("mode", &self.mode)
            .finish()
    }
}

/// Action to take for a file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncAction {
    /// Send the local file to the remote.
    Upload { path: String, cause: Cause },
    /// Fetch the remote file into the local tree.
    Download { path: String, cause: Cause },
    /// Remove the local file.
    DeleteLocal { path: String, cause: Cause },
    /// Remove the remote file.
    DeleteRemote { path: String, cause: Cause },
    /// Skip file (no action needed).
    Skip { path: String, reason: String },
}

impl SyncAction {
    fn from_resolution(path: &str, resolution: Resolution) -> Self {
        let path = path.to_string();
        match resolution {
            Resolution::Upload(cause) => Self::Upload { path, cause },
            Resolution::Download(cause) => Self::Download { path, cause },
            Resolution::DeleteLocal(cause) => Self::DeleteLocal { path, cause },
            Resolution::DeleteRemote(cause) => Self::DeleteRemote { path, cause },
            Resolution::UpToDate => Self::Skip {
                path,
                reason: "up to date".to_string(),
            },
        }
    }

    /// Get the path associated with this action.
    pub fn path(&self) -> &str {
        match self {
            Self::Upload { path, .. }
            | Self::Download { path, .. }
            | Self::DeleteLocal { path, .. }
            | Self::DeleteRemote { path, .. }
            | Self::Skip { path, .. } => path,
        }
    }

    /// Check if this is a skip action.
    pub fn is_skip(&self) -> bool {
        matches!(self, Self::Skip { .. })
    }
}

impl fmt::Display for SyncAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Upload { path, cause } => write!(f, "uploading ({}): {}", cause, path),
            Self::Download { path, cause } => write!(f, "downloading ({}): {}", cause, path),
            Self::DeleteLocal { path, cause } => write!(f, "deleting local ({}): {}", cause, path),
            Self::DeleteRemote { path, cause } => write!(f, "deleting remote ({}): {}", cause, path),
            Self::Skip { path, reason } => write!(f, "skipping ({}): {}", reason, path),
        }
    }
}

/// Sync statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncStats {
    /// Local files considered.
    pub files_scanned: usize,
    pub uploaded: usize,
    pub downloaded: usize,
    pub deleted_local: usize,
    pub deleted_remote: usize,
    /// Files already in sync.
    pub skipped: usize,
    /// Files whose hash or action failed.
    pub failed: usize,
    pub bytes_uploaded: u64,
    pub bytes_downloaded: u64,
    /// Total duration.
    pub duration_ms: u64,
}

impl SyncStats {
    /// Completed transfers and deletions.
    pub fn changes(&self) -> usize {
        self.uploaded + self.downloaded + self.deleted_local + self.deleted_remote
    }

    pub fn summary(&self) -> String {
        format!(
            "{} uploaded ({}), {} downloaded ({}), {} deleted locally, {} deleted remotely, {} unchanged, {} failed in {}ms",
            self.uploaded,
            humansize::format_size(self.bytes_uploaded, humansize::DECIMAL),
            self.downloaded,
            humansize::format_size(self.bytes_downloaded, humansize::DECIMAL),
            self.deleted_local,
            self.deleted_remote,
            self.skipped,
            self.failed,
            self.duration_ms,
        )
    }
}

/// A file that could not be synced in this pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncFailure {
    pub path: String,
    pub error: String,
}

/// Result of a sync operation.
#[derive(Debug)]
pub struct SyncResult {
    /// Target name.
    pub target: String,
    /// Actions that were planned/executed.
    pub actions: Vec<SyncAction>,
    pub failures: Vec<SyncFailure>,
    /// Statistics.
    pub stats: SyncStats,
    /// Whether this was a dry run.
    pub dry_run: bool,
}

impl SyncResult {
    /// Planned actions other than skips.
    pub fn changes(&self) -> impl Iterator<Item = &SyncAction> {
        self.actions.iter().filter(|a| !a.is_skip())
    }
}

/// A local file with its content hash, or the error hashing it.
struct LocalEntry {
    file: LocalFile,
    hash: Result<String>,
}

/// Walk the tree, keep what the mode allows, and hash in parallel.
fn snapshot(tree: &LocalTree, mode: SyncMode) -> Result<Vec<LocalEntry>> {
    let mut files = tree.scan()?;
    if mode.is_publish() {
        let filter = PublishFilter::from_files(&files);
        files.retain(|f| filter.is_eligible(&f.rel_path, &f.abs_path));
    }

    Ok(files
        .into_par_iter()
        .map(|file| {
            let hash = hash_file(&file.abs_path).map(|h| h.value);
            LocalEntry { file, hash }
        })
        .collect())
}

/// Decide one action per path. Hash failures are reported and the path is
/// treated as present so nothing overwrites or deletes it remotely.
fn plan(
    mode: SyncMode,
    local: &[LocalEntry],
    remote: &[FileRecord],
    tombstones: &[Tombstone],
    is_syncable: impl Fn(&str) -> bool,
) -> (Vec<SyncAction>, Vec<SyncFailure>) {
    let remote_map: HashMap<&str, &FileRecord> = remote.iter().map(|r| (r.path.as_str(), r)).collect();
    let tombstone_map: HashMap<&str, &Tombstone> = tombstones.iter().map(|t| (t.path.as_str(), t)).collect();

    let mut actions = Vec::new();
    let mut failures = Vec::new();
    let mut seen: HashSet<&str> = HashSet::new();

    for entry in local {
        let path = entry.file.rel_path.as_str();
        seen.insert(path);

        let hash = match &entry.hash {
            Ok(hash) => hash,
            Err(e) => {
                failures.push(SyncFailure {
                    path: path.to_string(),
                    error: e.to_string(),
                });
                continue;
            }
        };

        let resolution = resolve_local(
            mode,
            hash,
            entry.file.modified,
            remote_map.get(path).copied(),
            tombstone_map.get(path).copied(),
        );
        actions.push(SyncAction::from_resolution(path, resolution));
    }

    for record in remote {
        let path = record.path.as_str();
        if seen.contains(path) {
            continue;
        }
        let resolution = resolve_remote_only(mode, is_syncable(path));
        if resolution == Resolution::UpToDate {
            continue;
        }
        // Never write outside the local root, whatever the server says
        if matches!(resolution, Resolution::Download(_)) && canonical_key(path).ok().as_deref() != Some(path) {
            failures.push(SyncFailure {
                path: path.to_string(),
                error: Error::invalid_path(path).to_string(),
            });
            continue;
        }
        actions.push(SyncAction::from_resolution(path, resolution));
    }

    (actions, failures)
}

/// Sync engine for orchestrating sync operations.
pub struct SyncEngine {
    tree: LocalTree,
    dry_run: bool,
    recent: Option<Arc<RecentPaths>>,
}

impl SyncEngine {
    pub fn new(tree: LocalTree) -> Self {
        Self {
            tree,
            dry_run: false,
            recent: None,
        }
    }

    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Remember the state this engine leaves local paths in.
    pub fn with_recent(mut self, recent: Arc<RecentPaths>) -> Self {
        self.recent = Some(recent);
        self
    }

    pub fn tree(&self) -> &LocalTree {
        &self.tree
    }

    pub fn is_dry_run(&self) -> bool {
        self.dry_run
    }

    /// Perform a full reconciliation against `target`.
    pub async fn sync(&self, target: &SyncTarget) -> Result<SyncResult> {
        self.run(target, self.dry_run).await
    }

    async fn run(&self, target: &SyncTarget, dry_run: bool) -> Result<SyncResult> {
        let started = Instant::now();

        let remote_files = match target.remote.list_files().await {
            Ok(files) => files,
            Err(e @ Error::Decode { .. }) => {
                warn!("[{}] {}, treating remote listing as empty", target.name, e);
                Vec::new()
            }
            Err(e) => return Err(e),
        };

        let tombstones = match target.mode {
            SyncMode::Bidirectional { .. } => match target.remote.list_tombstones().await {
                Ok(tombstones) => tombstones,
                Err(e) => {
                    warn!("[{}] failed to list tombstones: {}", target.name, e);
                    Vec::new()
                }
            },
            SyncMode::Publish => Vec::new(),
        };

        let tree = self.tree.clone();
        let mode = target.mode;
        debug!(
            "[{}] {} remote files, {} tombstones, conflicts: {}",
            target.name,
            remote_files.len(),
            tombstones.len(),
            ConflictStrategy::for_mode(mode).description()
        );
        let local = tokio::task::spawn_blocking(move || snapshot(&tree, mode))
            .await
            .map_err(|e| Error::io(self.tree.root(), std::io::Error::new(std::io::ErrorKind::Other, e)))??;

        let filter = self.tree.filter();
        let (actions, failures) = plan(mode, &local, &remote_files, &tombstones, |p| filter.is_syncable(p));

        let mut result = SyncResult {
            target: target.name.clone(),
            stats: SyncStats {
                files_scanned: local.len(),
                failed: failures.len(),
                ..SyncStats::default()
            },
            actions,
            failures,
            dry_run,
        };
        for failure in &result.failures {
            warn!("[{}] {}: {}", target.name, failure.path, failure.error);
        }

        for action in &result.actions {
            if action.is_skip() {
                result.stats.skipped += 1;
                continue;
            }
            if dry_run {
                info!("[{}] would be {}", target.name, action);
                continue;
            }

            info!("[{}] {}", target.name, action);
            match self.execute(target, action).await {
                Ok(bytes) => record(&mut result.stats, action, bytes),
                Err(e) if e.is_not_found() && matches!(action, SyncAction::DeleteRemote { .. } | SyncAction::DeleteLocal { .. }) => {
                    debug!("[{}] already gone: {}", target.name, action.path());
                    record(&mut result.stats, action, 0);
                }
                Err(e) => {
                    warn!("[{}] {} failed: {}", target.name, action.path(), e);
                    result.stats.failed += 1;
                    result.failures.push(SyncFailure {
                        path: action.path().to_string(),
                        error: e.to_string(),
                    });
                }
            }
        }

        result.stats.duration_ms = started.elapsed().as_millis() as u64;
        info!("[{}] sync {}: {}", target.name, if dry_run { "planned" } else { "complete" }, result.stats.summary());
        Ok(result)
    }

    async fn execute(&self, target: &SyncTarget, action: &SyncAction) -> Result<u64> {
        match action {
            SyncAction::Upload { path, .. } => target.remote.upload(path, &self.tree.abs_path(path)).await,
            SyncAction::Download { path, .. } => {
                let abs_path = self.tree.abs_path(path);
                let written = target.remote.download(path, &abs_path).await?;
                self.mark(path, Fingerprint::of(&abs_path));
                Ok(written)
            }
            SyncAction::DeleteLocal { path, .. } => {
                self.delete_local(path)?;
                Ok(0)
            }
            SyncAction::DeleteRemote { path, .. } => {
                target.remote.delete(path).await?;
                Ok(0)
            }
            SyncAction::Skip { .. } => Ok(0),
        }
    }

    /// Remove a local file and the directories it leaves empty.
    pub fn delete_local(&self, rel_path: &str) -> Result<()> {
        let abs_path = self.tree.abs_path(rel_path);
        std::fs::remove_file(&abs_path).map_err(|e| Error::from_io(&abs_path, rel_path, e))?;
        self.mark(rel_path, Fingerprint::Absent);
        if let Some(parent) = abs_path.parent() {
            for dir in remove_empty_parents(parent, self.tree.root()) {
                if let Some(rel_dir) = self.tree.rel_path(&dir) {
                    self.mark(&rel_dir, Fingerprint::Absent);
                }
            }
        }
        Ok(())
    }

    fn mark(&self, rel_path: &str, state: Fingerprint) {
        if let Some(recent) = &self.recent {
            recent.mark(rel_path, state);
        }
    }
}

fn record(stats: &mut SyncStats, action: &SyncAction, bytes: u64) {
    match action {
        SyncAction::Upload { .. } => {
            stats.uploaded += 1;
            stats.bytes_uploaded += bytes;
        }
        SyncAction::Download { .. } => {
            stats.downloaded += 1;
            stats.bytes_downloaded += bytes;
        }
        SyncAction::DeleteLocal { .. } => stats.deleted_local += 1,
        SyncAction::DeleteRemote { .. } => stats.deleted_remote += 1,
        SyncAction::Skip { .. } => stats.skipped += 1,
    }
}
