//! File system watcher for the change watch loop.
//!
//! Directories are watched one by one (non-recursive) so that directories
//! created later can be added as they appear. Events are delivered on a tokio
//! channel, one [`WatchEvent`] per affected path.

use anyhow::Result;
use notify::event::ModifyKind;
use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::hash::Hash;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant, SystemTime};
use tokio::sync::mpsc;

/// Quiet period after the last event for a path before it is handled.
pub const DEBOUNCE_WINDOW: Duration = Duration::from_millis(500);

/// Type of file system event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchEventKind {
    /// File or directory was created.
    Created,
    /// File content was written.
    Modified,
    /// File or directory was deleted.
    Removed,
    /// File or directory was renamed, from or to this path.
    Renamed,
    /// Metadata changes, access, anything else.
    Other,
}

impl WatchEventKind {
    fn from_notify(kind: &EventKind) -> Self {
        match kind {
            EventKind::Create(_) => Self::Created,
            EventKind::Modify(ModifyKind::Name(_)) => Self::Renamed,
            EventKind::Modify(ModifyKind::Metadata(_)) => Self::Other,
            EventKind::Modify(_) => Self::Modified,
            EventKind::Remove(_) => Self::Removed,
            EventKind::Access(_) | EventKind::Any | EventKind::Other => Self::Other,
        }
    }

    /// Create or write.
    pub fn is_write(&self) -> bool {
        matches!(self, Self::Created | Self::Modified)
    }

    /// Remove or rename.
    pub fn is_remove(&self) -> bool {
        matches!(self, Self::Removed | Self::Renamed)
    }
}

/// A file system watch event for a single path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchEvent {
    pub kind: WatchEventKind,
    pub path: PathBuf,
}

impl WatchEvent {
    pub fn new(kind: WatchEventKind, path: impl Into<PathBuf>) -> Self {
        Self {
            kind,
            path: path.into(),
        }
    }

    /// Split a notify event into one event per path.
    fn from_notify(event: Event) -> Vec<Self> {
        let kind = WatchEventKind::from_notify(&event.kind);
        event
            .paths
            .into_iter()
            .map(|path| Self::new(kind, path))
            .collect()
    }
}

/// File system watcher feeding an async channel.
pub struct FileWatcher {
    watcher: RecommendedWatcher,
    receiver: mpsc::UnboundedReceiver<WatchEvent>,
    watched: HashSet<PathBuf>,
}

impl FileWatcher {
    /// Create a watcher with nothing watched yet.
    pub fn new() -> Result<Self> {
        let (tx, rx) = mpsc::unbounded_channel();

        let watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| match res {
                Ok(event) => {
                    for watch_event in WatchEvent::from_notify(event) {
                        let _ = tx.send(watch_event);
                    }
                }
                Err(e) => tracing::warn!("watcher error: {}", e),
            },
            Config::default(),
        )?;

        Ok(Self {
            watcher,
            receiver: rx,
            watched: HashSet::new(),
        })
    }

    /// Watch a single directory. Returns false if it was already watched.
    pub fn watch_dir(&mut self, path: &Path) -> Result<bool> {
        if self.watched.contains(path) {
            return Ok(false);
        }
        self.watcher.watch(path, RecursiveMode::NonRecursive)?;
        self.watched.insert(path.to_path_buf());
        tracing::debug!("watching {}", path.display());
        Ok(true)
    }

    /// Forget a directory and everything below it. The OS usually drops the
    /// watch itself once the directory is gone.
    pub fn forget_dir(&mut self, path: &Path) {
        let gone: Vec<PathBuf> = self
            .watched
            .iter()
            .filter(|p| p.starts_with(path))
            .cloned()
            .collect();
        for dir in gone {
            let _ = self.watcher.unwatch(&dir);
            self.watched.remove(&dir);
        }
    }

    pub fn is_watched_dir(&self, path: &Path) -> bool {
        self.watched.contains(path)
    }

    pub fn watched_count(&self) -> usize {
        self.watched.len()
    }

    /// Next event. None once the watcher is gone.
    pub async fn next_event(&mut self) -> Option<WatchEvent> {
        self.receiver.recv().await
    }
}

/// A map whose entries expire after a fixed time and whose size is capped.
/// When full, expired entries go first, then the oldest.
#[derive(Debug)]
pub struct ExpiringMap<K, V> {
    ttl: Duration,
    capacity: usize,
    entries: HashMap<K, (V, Instant)>,
}

impl<K: Eq + Hash + Clone, V> ExpiringMap<K, V> {
    pub fn new(ttl: Duration, capacity: usize) -> Self {
        Self {
            ttl,
            capacity: capacity.max(1),
            entries: HashMap::new(),
        }
    }

    pub fn insert(&mut self, key: K, value: V) {
        self.insert_at(key, value, Instant::now());
    }

    pub fn get<Q>(&mut self, key: &Q) -> Option<&V>
    where
        K: std::borrow::Borrow<Q>,
        Q: Eq + Hash + ?Sized,
    {
        self.get_at(key, Instant::now())
    }

    pub fn remove<Q>(&mut self, key: &Q) -> Option<V>
    where
        K: std::borrow::Borrow<Q>,
        Q: Eq + Hash + ?Sized,
    {
        self.entries.remove(key).map(|(value, _)| value)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn insert_at(&mut self, key: K, value: V, now: Instant) {
        if !self.entries.contains_key(&key) && self.entries.len() >= self.capacity {
            self.evict(now);
        }
        self.entries.insert(key, (value, now));
    }

    fn get_at<Q>(&mut self, key: &Q, now: Instant) -> Option<&V>
    where
        K: std::borrow::Borrow<Q>,
        Q: Eq + Hash + ?Sized,
    {
        let fresh = match self.entries.get(key) {
            Some((_, at)) => now.duration_since(*at) < self.ttl,
            None => return None,
        };
        if !fresh {
            self.entries.remove(key);
            return None;
        }
        self.entries.get(key).map(|(value, _)| value)
    }

    fn evict(&mut self, now: Instant) {
        let ttl = self.ttl;
        self.entries.retain(|_, (_, at)| now.duration_since(*at) < ttl);
        while self.entries.len() >= self.capacity {
            let oldest = self
                .entries
                .iter()
                .min_by_key(|(_, (_, at))| *at)
                .map(|(k, _)| k.clone());
            match oldest {
                Some(key) => {
                    self.entries.remove(&key);
                }
                None => break,
            }
        }
    }
}

/// A path whose events have gone quiet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SettledPath {
    pub path: PathBuf,
    /// Whether any event in the burst was a remove or rename.
    pub removed: bool,
}

impl SettledPath {
    /// The burst as a single event for the handler.
    pub fn into_event(self) -> WatchEvent {
        let kind = if self.removed {
            WatchEventKind::Removed
        } else {
            WatchEventKind::Modified
        };
        WatchEvent::new(kind, self.path)
    }
}

#[derive(Debug)]
struct Pending {
    due: Instant,
    removed: bool,
}

/// Trailing-edge debouncer. Every event pushes the path's deadline back by
/// the window; a path is released once no event arrived for a full window,
/// so the handler always sees the final state.
#[derive(Debug)]
pub struct EventDebouncer {
    window: Duration,
    capacity: usize,
    pending: HashMap<PathBuf, Pending>,
}

impl EventDebouncer {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            capacity: 4096,
            pending: HashMap::new(),
        }
    }

    pub fn record(&mut self, event: &WatchEvent) {
        self.record_at(event, Instant::now());
    }

    fn record_at(&mut self, event: &WatchEvent, now: Instant) {
        let due = now + self.window;
        if !self.pending.contains_key(&event.path) && self.pending.len() >= self.capacity {
            // Full: release everything on the next flush
            for pending in self.pending.values_mut() {
                pending.due = now;
            }
        }
        let pending = self.pending.entry(event.path.clone()).or_insert(Pending {
            due,
            removed: false,
        });
        pending.due = pending.due.max(due);
        pending.removed |= event.kind.is_remove();
    }

    /// Earliest deadline among pending paths.
    pub fn next_due(&self) -> Option<Instant> {
        self.pending.values().map(|p| p.due).min()
    }

    /// Remove and return the paths whose window has closed, oldest first.
    pub fn take_due(&mut self) -> Vec<SettledPath> {
        self.take_due_at(Instant::now())
    }

    fn take_due_at(&mut self, now: Instant) -> Vec<SettledPath> {
        let mut due: Vec<(Instant, PathBuf)> = self
            .pending
            .iter()
            .filter(|(_, p)| p.due <= now)
            .map(|(path, p)| (p.due, path.clone()))
            .collect();
        due.sort();

        due.into_iter()
            .filter_map(|(_, path)| {
                self.pending
                    .remove(&path)
                    .map(|p| SettledPath { path, removed: p.removed })
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

impl Default for EventDebouncer {
    fn default() -> Self {
        Self::new(DEBOUNCE_WINDOW)
    }
}

/// What a path looks like on disk, enough to tell one write from another.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fingerprint {
    Absent,
    Dir,
    File {
        size: u64,
        modified: Option<SystemTime>,
    },
}

impl Fingerprint {
    pub fn of(path: &Path) -> Self {
        match std::fs::metadata(path) {
            Ok(meta) if meta.is_dir() => Self::Dir,
            Ok(meta) => Self::File {
                size: meta.len(),
                modified: meta.modified().ok(),
            },
            Err(_) => Self::Absent,
        }
    }
}

/// Relative paths the engine itself just changed on disk, with the state it
/// left them in. An event is only the engine's own echo while the path still
/// matches that state.
#[derive(Debug)]
pub struct RecentPaths {
    inner: Mutex<ExpiringMap<String, Fingerprint>>,
}

impl RecentPaths {
    pub fn new(ttl: Duration) -> Self {
        Self {
            inner: Mutex::new(ExpiringMap::new(ttl, 16_384)),
        }
    }

    pub fn mark(&self, rel_path: &str, state: Fingerprint) {
        self.inner.lock().insert(rel_path.to_string(), state);
    }

    /// True if the engine left `rel_path` in exactly `state`.
    pub fn is_own(&self, rel_path: &str, state: &Fingerprint) -> bool {
        self.inner.lock().get(rel_path) == Some(state)
    }
}

impl Default for RecentPaths {
    fn default() -> Self {
        Self::new(Duration::from_secs(5))
    }
}
