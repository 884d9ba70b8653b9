//! Hook for the downstream site renderer.
//!
//! The renderer lives outside this crate. The server only tells it that the
//! stored files changed.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::process::Command;

#[async_trait]
pub trait Rebuilder: Send + Sync {
    /// Called after every successful put or delete.
    async fn rebuild(&self) -> anyhow::Result<()>;
}

/// Does nothing. Used when no renderer is configured.
pub struct NoopRebuilder;

#[async_trait]
impl Rebuilder for NoopRebuilder {
    async fn rebuild(&self) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Runs a shell command with the data directory as its working directory.
pub struct CommandRebuilder {
    command: String,
    data_dir: PathBuf,
}

impl CommandRebuilder {
    pub fn new(command: impl Into<String>, data_dir: impl Into<PathBuf>) -> Self {
        Self {
            command: command.into(),
            data_dir: data_dir.into(),
        }
    }
}

#[async_trait]
impl Rebuilder for CommandRebuilder {
    async fn rebuild(&self) -> anyhow::Result<()> {
        let (shell, flag) = if cfg!(windows) { ("cmd", "/C") } else { ("sh", "-c") };
        let status = Command::new(shell)
            .arg(flag)
            .arg(&self.command)
            .current_dir(&self.data_dir)
            .env("VAULTSYNC_DATA", &self.data_dir)
            .status()
            .await?;

        if !status.success() {
            anyhow::bail!("rebuild command `{}` exited with {}", self.command, status);
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
struct QueueState {
    running: bool,
    pending: bool,
}

/// Coalesces rebuild requests. At most one rebuild runs at a time; requests
/// arriving meanwhile collapse into a single follow-up run.
pub struct RebuildQueue {
    rebuilder: Arc<dyn Rebuilder>,
    state: Mutex<QueueState>,
}

impl RebuildQueue {
    pub fn new(rebuilder: Arc<dyn Rebuilder>) -> Arc<Self> {
        Arc::new(Self {
            rebuilder,
            state: Mutex::new(QueueState::default()),
        })
    }

    /// Request a rebuild. Returns immediately.
    pub fn trigger(self: &Arc<Self>) {
        {
            let mut state = self.state.lock();
            if state.running {
                state.pending = true;
                return;
            }
            state.running = true;
        }

        let queue = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                match queue.rebuilder.rebuild().await {
                    Ok(()) => tracing::debug!("site rebuild finished"),
                    Err(e) => tracing::warn!("site rebuild failed: {:#}", e),
                }

                let mut state = queue.state.lock();
                if state.pending {
                    state.pending = false;
                } else {
                    state.running = false;
                    break;
                }
            }
        });
    }

    pub fn is_idle(&self) -> bool {
        !self.state.lock().running
    }
}
