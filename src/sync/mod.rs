//! Client side: reconciliation against remote stores and the change watch loop.

pub mod conflict;
pub mod daemon;
pub mod engine;
pub mod exclude;
pub mod hash;
pub mod publish;
pub mod transport;
pub mod watcher;

pub use conflict::{Cause, ConflictStrategy, Resolution};
pub use daemon::SyncDaemon;
pub use engine::{SyncAction, SyncEngine, SyncFailure, SyncMode, SyncResult, SyncStats, SyncTarget};
pub use exclude::{ExcludePatterns, SyncFilter};
pub use hash::{hash_bytes, hash_file, FileHash};
pub use publish::PublishFilter;
pub use transport::{HttpTransport, RemoteStore};
pub use watcher::{EventDebouncer, FileWatcher, Fingerprint, RecentPaths, SettledPath, WatchEvent, WatchEventKind};
