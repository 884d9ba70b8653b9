//! Change watch loop.
//!
//! After the startup reconciliation, one loop multiplexes two sources:
//! file system events for the local tree and a timer that re-runs full
//! reconciliation against the private target. Events are collected per path
//! and handled once the path has been quiet for the debounce window, one path
//! at a time, based on what is on disk at that point.

use anyhow::{Context, Result};
use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep_until, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::fs::local::LocalTree;
use crate::sync::engine::{SyncEngine, SyncMode, SyncTarget};
use crate::sync::exclude::is_markdown;
use crate::sync::publish::{extract_image_refs, is_published_content, PublishFilter};
use crate::sync::watcher::{EventDebouncer, FileWatcher, Fingerprint, RecentPaths, WatchEvent, DEBOUNCE_WINDOW};

/// Runs the change watch loop for up to two targets.
pub struct SyncDaemon {
    engine: SyncEngine,
    private: Option<SyncTarget>,
    publish: Option<SyncTarget>,
    poll_interval: Duration,
    recent: Arc<RecentPaths>,
    debouncer: EventDebouncer,
    watcher: FileWatcher,
}

impl SyncDaemon {
    /// Set up the daemon and watch every directory of the tree.
    pub fn new(tree: LocalTree, private: Option<SyncTarget>, publish: Option<SyncTarget>) -> Result<Self> {
        let recent = Arc::new(RecentPaths::default());
        let engine = SyncEngine::new(tree).with_recent(Arc::clone(&recent));

        let mut watcher = FileWatcher::new().context("Failed to create file watcher")?;
        for dir in engine.tree().directories() {
            watcher
                .watch_dir(&dir)
                .with_context(|| format!("Failed to watch {}", dir.display()))?;
        }

        Ok(Self {
            engine,
            private,
            publish,
            poll_interval: Duration::from_secs(crate::config::DEFAULT_POLL_INTERVAL_SECS),
            recent,
            debouncer: EventDebouncer::new(DEBOUNCE_WINDOW),
            watcher,
        })
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.engine = self.engine.with_dry_run(dry_run);
        self
    }

    pub fn with_debounce(mut self, window: Duration) -> Self {
        self.debouncer = EventDebouncer::new(window);
        self
    }

    pub fn engine(&self) -> &SyncEngine {
        &self.engine
    }

    fn tree(&self) -> &LocalTree {
        self.engine.tree()
    }

    fn targets(&self) -> impl Iterator<Item = &SyncTarget> {
        self.private.iter().chain(self.publish.iter())
    }

    /// Full reconciliation against every target. Any failure is returned.
    pub async fn initial_sync(&self) -> Result<()> {
        for target in self.targets() {
            self.engine
                .sync(target)
                .await
                .with_context(|| format!("full sync ({}) against {} failed", target.name, target.remote.name()))?;
        }
        Ok(())
    }

    /// Full reconciliation against one target. Failures are logged.
    async fn reconcile(&self, target: &SyncTarget) {
        if let Err(e) = self.engine.sync(target).await {
            warn!("[{}] periodic sync failed: {}", target.name, e);
        }
    }

    /// Process events and timer ticks until interrupted.
    pub async fn run(mut self) -> Result<()> {
        let poll = matches!(
            self.private.as_ref().map(|t| t.mode),
            Some(SyncMode::Bidirectional { push_only: false })
        );
        let mut interval = tokio::time::interval(self.poll_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately; startup already reconciled
        interval.tick().await;

        let shutdown = tokio::signal::ctrl_c();
        tokio::pin!(shutdown);

        info!(
            "watching {} ({} directories){}",
            self.tree().root().display(),
            self.watcher.watched_count(),
            if poll {
                format!(", polling every {}s", self.poll_interval.as_secs())
            } else {
                String::new()
            }
        );

        loop {
            let flush_at = self.debouncer.next_due().map(Instant::from_std);
            tokio::select! {
                event = self.watcher.next_event() => match event {
                    Some(event) => self.queue_event(event),
                    None => break,
                },
                _ = sleep_until(flush_at.unwrap_or_else(Instant::now)), if flush_at.is_some() => {
                    self.process_due().await;
                }
                _ = interval.tick(), if poll => {
                    if let Some(private) = &self.private {
                        self.reconcile(private).await;
                    }
                }
                _ = &mut shutdown => {
                    info!("shutting down");
                    break;
                }
            }
        }
        Ok(())
    }

    /// Hold an event until its path has been quiet for the debounce window.
    pub fn queue_event(&mut self, event: WatchEvent) {
        if !event.kind.is_write() && !event.kind.is_remove() {
            return;
        }
        match self.tree().rel_path(&event.path) {
            Some(rel_path) if !self.tree().filter().is_excluded(&rel_path) => self.debouncer.record(&event),
            _ => {}
        }
    }

    /// Handle every queued path whose window has closed.
    pub async fn process_due(&mut self) {
        for settled in self.debouncer.take_due() {
            self.handle_event(settled.into_event()).await;
        }
    }

    /// Act on the current state of the event's path. Writes are pushed; a
    /// vanished path is a delete only if a remove was seen, so a create
    /// followed by a quick delete does nothing.
    pub async fn handle_event(&mut self, event: WatchEvent) {
        if !event.kind.is_write() && !event.kind.is_remove() {
            return;
        }
        let Some(rel_path) = self.tree().rel_path(&event.path) else {
            return;
        };
        if self.tree().filter().is_excluded(&rel_path) {
            return;
        }

        let state = Fingerprint::of(&event.path);
        if self.recent.is_own(&rel_path, &state) {
            if state == Fingerprint::Absent {
                self.watcher.forget_dir(&event.path);
            }
            debug!("ignoring own change: {}", rel_path);
            return;
        }

        match state {
            Fingerprint::Dir => self.handle_new_dir(&event.path).await,
            Fingerprint::File { .. } => {
                if self.tree().filter().is_syncable(&rel_path) {
                    self.handle_write(&rel_path).await;
                }
            }
            Fingerprint::Absent if !event.kind.is_remove() => debug!("vanished before sync: {}", rel_path),
            Fingerprint::Absent => {
                if self.watcher.is_watched_dir(&event.path) {
                    self.watcher.forget_dir(&event.path);
                    self.handle_dir_delete(&rel_path).await;
                } else if self.tree().filter().is_syncable(&rel_path) {
                    self.handle_delete(&rel_path).await;
                }
            }
        }
    }

    /// A directory appeared (created, or moved in): watch it and everything
    /// below it, then push the syncable files it already holds.
    async fn handle_new_dir(&mut self, dir: &Path) {
        for sub in self.tree().directories_under(dir) {
            match self.watcher.watch_dir(&sub) {
                Ok(true) => info!("watching new directory {}", sub.display()),
                Ok(false) => {}
                Err(e) => warn!("failed to watch {}: {}", sub.display(), e),
            }
        }

        let files = self.tree().scan_dir(dir);
        for file in files {
            if self.recent.is_own(&file.rel_path, &Fingerprint::of(&file.abs_path)) {
                continue;
            }
            self.handle_write(&file.rel_path).await;
        }
    }

    /// Push a created or written file to the private target, and to the
    /// publish target if eligible. Ineligible files are removed from the
    /// publish target.
    pub async fn handle_write(&self, rel_path: &str) {
        let abs_path = self.tree().abs_path(rel_path);

        if let Some(private) = &self.private {
            self.push(private, rel_path, &abs_path).await;
        }

        let Some(publish) = &self.publish else {
            return;
        };

        if is_markdown(rel_path) {
            let content = tokio::fs::read_to_string(&abs_path).await.unwrap_or_default();
            if is_published_content(&content) {
                self.push(publish, rel_path, &abs_path).await;
                self.push_referenced_images(publish, &content).await;
            } else {
                self.remove(publish, rel_path).await;
            }
        } else {
            let tree = self.tree().clone();
            let filter = tokio::task::spawn_blocking(move || PublishFilter::scan(&tree)).await;
            match filter {
                Ok(Ok(filter)) if filter.is_referenced(rel_path) => {
                    self.push(publish, rel_path, &abs_path).await;
                }
                Ok(Ok(_)) => self.remove(publish, rel_path).await,
                Ok(Err(e)) => warn!("[{}] cannot check {}: {}", publish.name, rel_path, e),
                Err(e) => warn!("[{}] cannot check {}: {}", publish.name, rel_path, e),
            }
        }
    }

    /// Push the local images a published note embeds.
    async fn push_referenced_images(&self, publish: &SyncTarget, content: &str) {
        let refs: HashSet<String> = extract_image_refs(content).into_iter().collect();
        if refs.is_empty() {
            return;
        }

        let root = self.tree().root().to_path_buf();
        let images = self
            .tree()
            .scan_dir(&root)
            .into_iter()
            .filter(|f| {
                let name = f.rel_path.rsplit('/').next().unwrap_or(&f.rel_path);
                refs.contains(name)
            });
        for image in images {
            self.push(publish, &image.rel_path, &image.abs_path).await;
        }
    }

    /// Propagate a local delete to every target.
    pub async fn handle_delete(&self, rel_path: &str) {
        for target in self.targets() {
            self.remove(target, rel_path).await;
        }
    }

    /// Delete every remote path equal to or below a removed directory.
    pub async fn handle_dir_delete(&self, rel_dir: &str) {
        let prefix = format!("{}/", rel_dir);
        for target in self.targets() {
            let files = match target.remote.list_files().await {
                Ok(files) => files,
                Err(e) => {
                    warn!("[{}] cannot list files to delete {}: {}", target.name, rel_dir, e);
                    continue;
                }
            };
            let doomed: Vec<String> = files
                .into_iter()
                .map(|f| f.path)
                .filter(|p| p == rel_dir || p.starts_with(&prefix))
                .collect();
            if !doomed.is_empty() {
                info!("[{}] directory removed: {} ({} files)", target.name, rel_dir, doomed.len());
            }
            for path in doomed {
                self.remove(target, &path).await;
            }
        }
    }

    async fn push(&self, target: &SyncTarget, rel_path: &str, abs_path: &Path) {
        if self.engine.is_dry_run() {
            info!("[{}] would upload: {}", target.name, rel_path);
            return;
        }
        match target.remote.upload(rel_path, abs_path).await {
            Ok(bytes) => info!(
                "[{}] synced: {} ({})",
                target.name,
                rel_path,
                humansize::format_size(bytes, humansize::DECIMAL)
            ),
            Err(e) => warn!("[{}] upload {} failed: {}", target.name, rel_path, e),
        }
    }

    async fn remove(&self, target: &SyncTarget, rel_path: &str) {
        if self.engine.is_dry_run() {
            info!("[{}] would delete: {}", target.name, rel_path);
            return;
        }
        match target.remote.delete(rel_path).await {
            Ok(()) => info!("[{}] deleted: {}", target.name, rel_path),
            Err(e) if e.is_not_found() => debug!("[{}] not on remote: {}", target.name, rel_path),
            Err(e) => warn!("[{}] delete {} failed: {}", target.name, rel_path, e),
        }
    }
}
