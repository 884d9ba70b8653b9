//! Per-file decision rules for reconciliation.
//!
//! Content is never merged. When both sides hold different bytes for a path,
//! one side wins outright according to the target's [`ConflictStrategy`].

use chrono::{DateTime, Utc};
use std::fmt;

use crate::fs::types::{FileRecord, Tombstone};
use crate::sync::engine::SyncMode;

/// How differing content on both sides is settled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConflictStrategy {
    /// The side with the strictly newer modification time wins. Equal times
    /// go to the remote.
    #[default]
    NewerWins,
    /// The local copy always wins.
    LocalWins,
}

impl ConflictStrategy {
    pub fn for_mode(mode: SyncMode) -> Self {
        match mode {
            SyncMode::Bidirectional { .. } => Self::NewerWins,
            SyncMode::Publish => Self::LocalWins,
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            Self::NewerWins => "Use newer file, remote on ties",
            Self::LocalWins => "Always use local",
        }
    }
}

/// Why an action was chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cause {
    /// Local file the remote has never seen.
    New,
    /// Local file whose remote copy was deleted before it was last modified.
    RecreatedAfterDelete,
    /// Remote copy was deleted after the local file was last modified.
    DeletedRemotely,
    LocalNewer,
    RemoteNewer,
    /// Same modification time, different content.
    SameTime,
    /// Publish target: local content is authoritative.
    LocalAuthoritative,
    /// Remote file with no local counterpart.
    RemoteOnly,
    /// Publish target: remote file missing locally or no longer eligible.
    NotPublished,
}

impl fmt::Display for Cause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::New => "new",
            Self::RecreatedAfterDelete => "recreated after tombstone",
            Self::DeletedRemotely => "tombstone",
            Self::LocalNewer => "local newer",
            Self::RemoteNewer => "remote newer",
            Self::SameTime => "same mtime, remote wins",
            Self::LocalAuthoritative => "publish",
            Self::RemoteOnly => "new remote",
            Self::NotPublished => "not published",
        };
        f.write_str(s)
    }
}

/// Outcome for one path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    Upload(Cause),
    Download(Cause),
    DeleteLocal(Cause),
    DeleteRemote(Cause),
    UpToDate,
}

/// Settle a path whose content differs on the two sides.
pub fn resolve_conflict(
    strategy: ConflictStrategy,
    local_modified: DateTime<Utc>,
    remote_modified: DateTime<Utc>,
) -> Resolution {
    match strategy {
        ConflictStrategy::LocalWins => Resolution::Upload(Cause::LocalAuthoritative),
        ConflictStrategy::NewerWins => {
            if local_modified > remote_modified {
                Resolution::Upload(Cause::LocalNewer)
            } else if local_modified < remote_modified {
                Resolution::Download(Cause::RemoteNewer)
            } else {
                Resolution::Download(Cause::SameTime)
            }
        }
    }
}

/// Decide what to do with a local file given the remote record and, for a
/// bidirectional target, the tombstone for the same path.
pub fn resolve_local(
    mode: SyncMode,
    local_hash: &str,
    local_modified: DateTime<Utc>,
    remote: Option<&FileRecord>,
    tombstone: Option<&Tombstone>,
) -> Resolution {
    match remote {
        Some(record) if record.hash == local_hash => Resolution::UpToDate,
        Some(record) => resolve_conflict(ConflictStrategy::for_mode(mode), local_modified, record.mod_time),
        None => match (mode, tombstone) {
            (SyncMode::Bidirectional { .. }, Some(tombstone)) => {
                if tombstone.deleted_at > local_modified {
                    Resolution::DeleteLocal(Cause::DeletedRemotely)
                } else {
                    Resolution::Upload(Cause::RecreatedAfterDelete)
                }
            }
            _ => Resolution::Upload(Cause::New),
        },
    }
}

/// Decide what to do with a remote file that has no eligible local copy.
/// `syncable` is whether the path passes the local sync filter.
pub fn resolve_remote_only(mode: SyncMode, syncable: bool) -> Resolution {
    match mode {
        SyncMode::Publish => Resolution::DeleteRemote(Cause::NotPublished),
        SyncMode::Bidirectional { push_only: false } if syncable => Resolution::Download(Cause::RemoteOnly),
        SyncMode::Bidirectional { .. } => Resolution::UpToDate,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    const PRIVATE: SyncMode = SyncMode::Bidirectional { push_only: false };
    const PUSH_ONLY: SyncMode = SyncMode::Bidirectional { push_only: true };

    fn at(day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, day, 0, 0, 0).unwrap()
    }

    fn record(hash: &str, day: u32) -> FileRecord {
        FileRecord {
            path: "note.md".to_string(),
            hash: hash.to_string(),
            size: 1,
            mod_time: at(day),
        }
    }

    fn tombstone(day: u32) -> Tombstone {
        Tombstone {
            path: "note.md".to_string(),
            deleted_at: at(day),
        }
    }

    #[test]
    fn test_matching_hash_is_up_to_date() {
        let remote = record("abc", 1);
        assert_eq!(resolve_local(PRIVATE, "abc", at(5), Some(&remote), None), Resolution::UpToDate);
        assert_eq!(resolve_local(SyncMode::Publish, "abc", at(5), Some(&remote), None), Resolution::UpToDate);
    }

    #[test]
    fn test_newer_wins_strictly() {
        let remote = record("remote", 2);
        assert_eq!(
            resolve_local(PRIVATE, "local", at(3), Some(&remote), None),
            Resolution::Upload(Cause::LocalNewer)
        );
        assert_eq!(
            resolve_local(PRIVATE, "local", at(1), Some(&remote), None),
            Resolution::Download(Cause::RemoteNewer)
        );
    }

    #[test]
    fn test_equal_times_download() {
        let remote = record("remote", 2);
        assert_eq!(
            resolve_local(PRIVATE, "local", at(2), Some(&remote), None),
            Resolution::Download(Cause::SameTime)
        );
    }

    #[test]
    fn test_publish_local_always_wins() {
        let remote = record("remote", 9);
        assert_eq!(
            resolve_local(SyncMode::Publish, "local", at(1), Some(&remote), None),
            Resolution::Upload(Cause::LocalAuthoritative)
        );
    }

    #[test]
    fn test_tombstone_precedence() {
        assert_eq!(
            resolve_local(PRIVATE, "local", at(1), None, Some(&tombstone(2))),
            Resolution::DeleteLocal(Cause::DeletedRemotely)
        );
        assert_eq!(
            resolve_local(PRIVATE, "local", at(3), None, Some(&tombstone(2))),
            Resolution::Upload(Cause::RecreatedAfterDelete)
        );
        // Equal: not strictly after the local edit
        assert_eq!(
            resolve_local(PRIVATE, "local", at(2), None, Some(&tombstone(2))),
            Resolution::Upload(Cause::RecreatedAfterDelete)
        );
    }

    #[test]
    fn test_tombstone_ignored_when_remote_present_or_publish() {
        let remote = record("local", 1);
        assert_eq!(
            resolve_local(PRIVATE, "local", at(1), Some(&remote), Some(&tombstone(5))),
            Resolution::UpToDate
        );
        assert_eq!(
            resolve_local(SyncMode::Publish, "local", at(1), None, Some(&tombstone(5))),
            Resolution::Upload(Cause::New)
        );
    }

    #[test]
    fn test_remote_only() {
        assert_eq!(resolve_remote_only(PRIVATE, true), Resolution::Download(Cause::RemoteOnly));
        assert_eq!(resolve_remote_only(PRIVATE, false), Resolution::UpToDate);
        assert_eq!(resolve_remote_only(PUSH_ONLY, true), Resolution::UpToDate);
        assert_eq!(
            resolve_remote_only(SyncMode::Publish, false),
            Resolution::DeleteRemote(Cause::NotPublished)
        );
    }
}
