//! Durable file store keyed by relative path.
//!
//! Every mutation takes the store's write lock, so no reader ever observes a
//! half-applied put or delete. Listing and reads share the read lock and may
//! run concurrently with each other.

use chrono::{Duration, Utc};
use jwalk::WalkDir;
use parking_lot::RwLock;
use rayon::prelude::*;
use std::fs::{self, File};
use std::io::Read;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::fs::atomic::{remove_empty_parents, write_atomic, STAGING_PREFIX};
use crate::fs::local::{modified_utc, relative_key};
use crate::fs::types::{FileRecord, Tombstone};
use crate::store::path::resolve;
use crate::store::tombstone::{default_retention, TombstoneJournal, JOURNAL_FILE};
use crate::sync::hash::hash_file;

/// Store options.
#[derive(Debug, Clone)]
pub struct StoreOptions {
    /// Keep a deletion journal. Private stores do; publish stores may not.
    pub tombstones: bool,
    /// How long tombstones are kept.
    pub tombstone_retention: Duration,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            tombstones: true,
            tombstone_retention: default_retention(),
        }
    }
}

pub struct ContentStore {
    root: PathBuf,
    lock: RwLock<()>,
    journal: Option<TombstoneJournal>,
}

impl ContentStore {
    /// Open (creating if needed) a store rooted at `root`.
    pub fn open(root: impl AsRef<Path>, options: StoreOptions) -> Result<Self> {
        let root = root.as_ref();
        fs::create_dir_all(root).map_err(|e| Error::io(root, e))?;
        let root = root.canonicalize().map_err(|e| Error::io(root, e))?;

        let journal = options
            .tombstones
            .then(|| TombstoneJournal::new(&root).with_retention(options.tombstone_retention));

        Ok(Self {
            root,
            lock: RwLock::new(()),
            journal,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn keeps_tombstones(&self) -> bool {
        self.journal.is_some()
    }

    /// Store the reader's bytes at `path`, replacing any previous version.
    /// Returns the number of bytes written.
    pub fn put<R: Read>(&self, path: &str, reader: &mut R) -> Result<u64> {
        let (key, full) = resolve(&self.root, path)?;
        let _guard = self.lock.write();

        if full.is_dir() {
            return Err(Error::invalid_path(path));
        }
        let written = write_atomic(&full, reader).map_err(|e| Error::io(&full, e))?;

        if let Some(journal) = &self.journal {
            if journal.remove(&key)? {
                tracing::debug!("{} recreated, tombstone dropped", key);
            }
        }
        Ok(written)
    }

    /// Open the file at `path` for reading.
    pub fn get(&self, path: &str) -> Result<File> {
        let (key, full) = resolve(&self.root, path)?;
        let _guard = self.lock.read();

        let file = File::open(&full).map_err(|e| Error::from_io(&full, &key, e))?;
        let is_file = file
            .metadata()
            .map(|m| m.is_file())
            .map_err(|e| Error::io(&full, e))?;
        if !is_file {
            return Err(Error::not_found(key));
        }
        Ok(file)
    }

    /// Read the whole file at `path`.
    pub fn read(&self, path: &str) -> Result<Vec<u8>> {
        let mut file = self.get(path)?;
        let mut data = Vec::new();
        file.read_to_end(&mut data)
            .map_err(|e| Error::io(self.root.join(path), e))?;
        Ok(data)
    }

    /// Remove the file at `path`, prune empty parent directories, and record
    /// a tombstone when journaling.
    pub fn delete(&self, path: &str) -> Result<()> {
        let (key, full) = resolve(&self.root, path)?;
        let _guard = self.lock.write();

        if full.is_dir() {
            return Err(Error::invalid_path(path));
        }
        fs::remove_file(&full).map_err(|e| Error::from_io(&full, &key, e))?;

        if let Some(parent) = full.parent() {
            remove_empty_parents(parent, &self.root);
        }
        if let Some(journal) = &self.journal {
            journal.record(&key, Utc::now())?;
        }
        Ok(())
    }

    /// Walk the store and hash every file. Cost is proportional to the total
    /// number of stored bytes.
    pub fn list(&self) -> Result<Vec<FileRecord>> {
        let _guard = self.lock.read();

        let mut paths = Vec::new();
        for entry in WalkDir::new(&self.root).skip_hidden(false).sort(true) {
            let entry = entry.map_err(|e| {
                Error::io(
                    &self.root,
                    std::io::Error::new(std::io::ErrorKind::Other, e.to_string()),
                )
            })?;
            if !entry.file_type().is_file() {
                continue;
            }
            let full = entry.path();
            let Some(key) = relative_key(&self.root, &full) else {
                continue;
            };
            if is_internal(&key) {
                continue;
            }
            paths.push((key, full));
        }

        let mut records = paths
            .into_par_iter()
            .map(|(key, full)| {
                let metadata = fs::metadata(&full).map_err(|e| Error::io(&full, e))?;
                let hash = hash_file(&full)?;
                let mod_time = modified_utc(&metadata).ok_or_else(|| {
                    Error::io(
                        &full,
                        std::io::Error::new(std::io::ErrorKind::Unsupported, "no modification time"),
                    )
                })?;
                Ok(FileRecord {
                    path: key,
                    hash: hash.value,
                    size: hash.size,
                    mod_time,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        records.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(records)
    }

    /// Active tombstones, pruning expired ones. Empty when not journaling.
    pub fn list_tombstones(&self) -> Result<Vec<Tombstone>> {
        let Some(journal) = &self.journal else {
            return Ok(Vec::new());
        };
        // Pruning rewrites the journal
        let _guard = self.lock.write();
        journal.list(Utc::now())
    }
}

/// The journal and staging files are store internals, never listed.
fn is_internal(key: &str) -> bool {
    key == JOURNAL_FILE
        || key
            .rsplit('/')
            .next()
            .is_some_and(|name| name.starts_with(STAGING_PREFIX))
}
