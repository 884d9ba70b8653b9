//! Deletion journal.
//!
//! A JSON array of [`Tombstone`] kept in one hidden file at the store root.
//! At most one entry per path; entries older than the retention window are
//! dropped whenever the journal is listed. Callers serialize access.

use chrono::{DateTime, Duration, Utc};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::fs::atomic::write_atomic;
use crate::fs::types::Tombstone;

/// File name of the journal at the store root.
pub const JOURNAL_FILE: &str = ".tombstones.json";

/// How long a tombstone is kept.
pub fn default_retention() -> Duration {
    Duration::days(30)
}

#[derive(Debug, Clone)]
pub struct TombstoneJournal {
    path: PathBuf,
    retention: Duration,
}

impl TombstoneJournal {
    pub fn new(root: &Path) -> Self {
        Self {
            path: root.join(JOURNAL_FILE),
            retention: default_retention(),
        }
    }

    pub fn with_retention(mut self, retention: Duration) -> Self {
        self.retention = retention;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(&self) -> Result<Vec<Tombstone>> {
        let data = match fs::read(&self.path) {
            Ok(data) => data,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(Error::io(&self.path, e)),
        };
        if data.iter().all(|b| b.is_ascii_whitespace()) {
            return Ok(Vec::new());
        }
        serde_json::from_slice(&data).map_err(|e| Error::Decode {
            what: self.path.display().to_string(),
            message: e.to_string(),
        })
    }

    fn save(&self, tombstones: &[Tombstone]) -> Result<()> {
        let data = serde_json::to_vec(tombstones).map_err(|e| {
            Error::io(&self.path, io::Error::new(io::ErrorKind::InvalidData, e))
        })?;
        write_atomic(&self.path, &mut data.as_slice()).map_err(|e| Error::io(&self.path, e))?;
        Ok(())
    }

    /// Record a deletion. Re-deleting a path moves its timestamp forward.
    pub fn record(&self, rel_path: &str, deleted_at: DateTime<Utc>) -> Result<()> {
        let mut tombstones = self.load()?;
        match tombstones.iter_mut().find(|t| t.path == rel_path) {
            Some(existing) => existing.deleted_at = deleted_at,
            None => tombstones.push(Tombstone {
                path: rel_path.to_string(),
                deleted_at,
            }),
        }
        self.save(&tombstones)
    }

    /// Drop the tombstone for a path that was legitimately recreated.
    /// Returns true if one existed.
    pub fn remove(&self, rel_path: &str) -> Result<bool> {
        let tombstones = self.load()?;
        let before = tombstones.len();
        let kept: Vec<Tombstone> = tombstones.into_iter().filter(|t| t.path != rel_path).collect();
        if kept.len() == before {
            return Ok(false);
        }
        self.save(&kept)?;
        Ok(true)
    }

    /// Active tombstones as of `now`. Expired entries are pruned from disk.
    pub fn list(&self, now: DateTime<Utc>) -> Result<Vec<Tombstone>> {
        let tombstones = self.load()?;
        let cutoff = now - self.retention;
        let total = tombstones.len();
        let active: Vec<Tombstone> = tombstones
            .into_iter()
            .filter(|t| t.deleted_at > cutoff)
            .collect();

        if active.len() != total {
            tracing::debug!(pruned = total - active.len(), "pruning expired tombstones");
            self.save(&active)?;
        }
        Ok(active)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_record_updates_existing_entry() {
        let dir = tempdir().unwrap();
        let journal = TombstoneJournal::new(dir.path());
        let t1 = Utc::now() - Duration::hours(2);
        let t2 = Utc::now() - Duration::hours(1);

        journal.record("a.md", t1).unwrap();
        journal.record("a.md", t2).unwrap();
        journal.record("b.md", t1).unwrap();

        let listed = journal.list(Utc::now()).unwrap();
        assert_eq!(listed.len(), 2);
        let a = listed.iter().find(|t| t.path == "a.md").unwrap();
        assert_eq!(a.deleted_at, t2);
    }

    #[test]
    fn test_list_prunes_expired() {
        let dir = tempdir().unwrap();
        let journal = TombstoneJournal::new(dir.path());
        let now = Utc::now();

        journal.record("old.md", now - Duration::days(31)).unwrap();
        journal.record("new.md", now - Duration::days(1)).unwrap();

        let listed = journal.list(now).unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].path, "new.md");

        // Pruned on disk too
        let raw = fs::read_to_string(journal.path()).unwrap();
        assert!(!raw.contains("old.md"));
    }

    #[test]
    fn test_remove() {
        let dir = tempdir().unwrap();
        let journal = TombstoneJournal::new(dir.path());

        journal.record("a.md", Utc::now()).unwrap();
        assert!(journal.remove("a.md").unwrap());
        assert!(!journal.remove("a.md").unwrap());
        assert!(journal.list(Utc::now()).unwrap().is_empty());
    }

    #[test]
    fn test_missing_journal_is_empty() {
        let dir = tempdir().unwrap();
        let journal = TombstoneJournal::new(dir.path());
        assert!(journal.list(Utc::now()).unwrap().is_empty());
    }

    #[test]
    fn test_corrupt_journal_is_decode_error() {
        let dir = tempdir().unwrap();
        let journal = TombstoneJournal::new(dir.path());
        fs::write(journal.path(), b"{not json").unwrap();

        assert!(matches!(journal.list(Utc::now()), Err(Error::Decode { .. })));
    }
}
