use chrono::{DateTime, Utc};
use jwalk::WalkDir;
use std::fs;
use std::path::{Component, Path, PathBuf};

use crate::error::{Error, Result};
use crate::fs::types::LocalFile;
use crate::sync::exclude::SyncFilter;

/// Convert `path` under `root` to a relative slash-separated key.
/// Returns None when `path` is not under `root`.
pub fn relative_key(root: &Path, path: &Path) -> Option<String> {
    let rel = path.strip_prefix(root).ok()?;
    let mut parts = Vec::new();
    for component in rel.components() {
        match component {
            Component::Normal(name) => parts.push(name.to_string_lossy().to_string()),
            Component::CurDir => {}
            _ => return None,
        }
    }
    if parts.is_empty() {
        None
    } else {
        Some(parts.join("/"))
    }
}

/// Join a slash-separated key onto `root` using native separators.
pub fn join_key(root: &Path, key: &str) -> PathBuf {
    let mut path = root.to_path_buf();
    for part in key.split('/').filter(|p| !p.is_empty()) {
        path.push(part);
    }
    path
}

/// Modification time of a file as UTC, keeping sub-second precision.
pub fn modified_utc(metadata: &fs::Metadata) -> Option<DateTime<Utc>> {
    metadata.modified().ok().map(DateTime::<Utc>::from)
}

/// Walks a local directory and yields the syncable files in it.
#[derive(Debug, Clone)]
pub struct LocalTree {
    root: PathBuf,
    filter: SyncFilter,
}

impl LocalTree {
    pub fn new(root: impl Into<PathBuf>, filter: SyncFilter) -> Self {
        Self {
            root: root.into(),
            filter,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn filter(&self) -> &SyncFilter {
        &self.filter
    }

    /// Absolute local path for a relative key.
    pub fn abs_path(&self, rel_path: &str) -> PathBuf {
        join_key(&self.root, rel_path)
    }

    pub fn rel_path(&self, abs_path: &Path) -> Option<String> {
        relative_key(&self.root, abs_path)
    }

    /// Stat a single file, returning None if it is missing, not a regular
    /// file, or not syncable.
    pub fn stat(&self, rel_path: &str) -> Option<LocalFile> {
        if !self.filter.is_syncable(rel_path) {
            return None;
        }
        let abs_path = self.abs_path(rel_path);
        let metadata = fs::metadata(&abs_path).ok()?;
        if !metadata.is_file() {
            return None;
        }
        Some(LocalFile {
            rel_path: rel_path.to_string(),
            abs_path,
            size: metadata.len(),
            modified: modified_utc(&metadata)?,
        })
    }

    /// Walk the tree. Entries that vanish or cannot be read mid-walk are
    /// skipped; only a missing root is an error.
    pub fn scan(&self) -> Result<Vec<LocalFile>> {
        if !self.root.is_dir() {
            return Err(Error::io(
                &self.root,
                std::io::Error::new(std::io::ErrorKind::NotFound, "sync directory not found"),
            ));
        }

        Ok(self.scan_dir(&self.root))
    }

    /// Syncable files below `dir`, which must lie inside the root. A missing
    /// directory yields nothing.
    pub fn scan_dir(&self, dir: &Path) -> Vec<LocalFile> {
        let mut files = Vec::new();
        for entry in WalkDir::new(dir).skip_hidden(false).sort(true) {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    tracing::warn!("walk error under {}: {}", dir.display(), e);
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }
            let abs_path = entry.path();
            let Some(rel_path) = self.rel_path(&abs_path) else {
                continue;
            };
            if !self.filter.is_syncable(&rel_path) {
                continue;
            }
            let Ok(metadata) = entry.metadata() else {
                continue;
            };
            let Some(modified) = modified_utc(&metadata) else {
                continue;
            };
            files.push(LocalFile {
                rel_path,
                abs_path,
                size: metadata.len(),
                modified,
            });
        }

        files
    }

    /// Directories under the root (root included) that are not excluded.
    pub fn directories(&self) -> Vec<PathBuf> {
        self.directories_under(&self.root)
    }

    /// Directories under `dir` (itself included) that are not excluded.
    pub fn directories_under(&self, dir: &Path) -> Vec<PathBuf> {
        let mut dirs = Vec::new();
        for entry in WalkDir::new(dir).skip_hidden(false).into_iter().flatten() {
            if !entry.file_type().is_dir() {
                continue;
            }
            let path = entry.path();
            match self.rel_path(&path) {
                Some(rel) if self.filter.is_excluded(&rel) => continue,
                _ => dirs.push(path),
            }
        }
        dirs
    }
}
