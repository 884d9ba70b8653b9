use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info};
use tracing_subscriber::{fmt, EnvFilter};

use vaultsync::config::{env_secret, ClientConfig, ClientSection, ConfigFile, ServerSection, PUBLISH_TOKEN_ENV, TOKEN_ENV};
use vaultsync::fs::LocalTree;
use vaultsync::sync::{ExcludePatterns, HttpTransport, SyncDaemon, SyncFilter, SyncTarget};

#[derive(Parser)]
#[command(name = "vaultsync", version, about = "Keep a folder of notes and images in sync with remote stores")]
struct Cli {
    /// Config file (default: <config dir>/vaultsync/config.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Serve a content store over HTTP
    Serve(ServeArgs),
    /// Sync a local directory with a private and/or publish store
    Sync(SyncArgs),
}

#[derive(Args)]
struct ServeArgs {
    /// Address to bind
    #[arg(long)]
    bind: Option<String>,
    /// Port to listen on
    #[arg(short, long)]
    port: Option<u16>,
    /// Data directory
    #[arg(short, long)]
    data: Option<PathBuf>,
    /// Maximum upload size in bytes
    #[arg(long)]
    max_upload_bytes: Option<usize>,
    /// Do not record tombstones (publish stores)
    #[arg(long)]
    no_tombstones: bool,
    /// Shell command run in the data directory after every change
    #[arg(long)]
    rebuild_command: Option<String>,
}

impl ServeArgs {
    fn into_section(self) -> ServerSection {
        ServerSection {
            bind: self.bind,
            port: self.port,
            data: self.data,
            max_upload_bytes: self.max_upload_bytes,
            tombstones: self.no_tombstones.then_some(false),
            rebuild_command: self.rebuild_command,
            token: None,
        }
    }
}

#[derive(Args)]
struct SyncArgs {
    /// Local directory to sync
    #[arg(short, long)]
    dir: Option<PathBuf>,
    /// Private server URL (bidirectional)
    #[arg(short, long)]
    server: Option<String>,
    /// Publish server URL (one-way, published files only)
    #[arg(long)]
    publish_server: Option<String>,
    /// Never download files that only exist remotely
    #[arg(long)]
    push_only: bool,
    /// Seconds between full syncs with the private server
    #[arg(long)]
    poll_interval: Option<u64>,
    /// Request timeout in seconds
    #[arg(long)]
    timeout: Option<u64>,
    /// Extra exclude pattern (repeatable)
    #[arg(short, long)]
    exclude: Vec<String>,
    /// Log what would change without changing anything
    #[arg(long)]
    dry_run: bool,
    /// Run the startup sync and exit
    #[arg(long)]
    once: bool,
}

impl SyncArgs {
    fn into_section(self) -> ClientSection {
        ClientSection {
            dir: self.dir,
            server: self.server,
            publish_server: self.publish_server,
            push_only: self.push_only.then_some(true),
            poll_interval_secs: self.poll_interval,
            timeout_secs: self.timeout,
            exclude: self.exclude,
            dry_run: self.dry_run.then_some(true),
            once: self.once.then_some(true),
            token: None,
            publish_token: None,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Init logging
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(filter).init();

    let cli = Cli::parse();
    let file = ConfigFile::load(cli.config.as_deref())?;

    match cli.command {
        Command::Serve(args) => {
            let config = file.server.merge(args.into_section()).resolve(env_secret(TOKEN_ENV));
            vaultsync::server::run(&config).await
        }
        Command::Sync(args) => {
            let config = file
                .client
                .merge(args.into_section())
                .resolve(env_secret(TOKEN_ENV), env_secret(PUBLISH_TOKEN_ENV))?;
            run_client(config).await
        }
    }
}

async fn run_client(config: ClientConfig) -> Result<()> {
    let root = config
        .dir
        .canonicalize()
        .with_context(|| format!("Sync directory not found: {}", config.dir.display()))?;
    let excludes = ExcludePatterns::with_extra(&config.exclude)?;
    debug!("exclude patterns: {}", excludes.patterns().join(", "));
    let tree = LocalTree::new(root, SyncFilter::new(excludes));

    let private = match &config.private {
        Some(endpoint) => Some(SyncTarget::private(
            Arc::new(HttpTransport::new(endpoint, config.timeout)?),
            config.push_only,
        )),
        None => None,
    };
    let publish = match &config.publish {
        Some(endpoint) => Some(SyncTarget::publish(Arc::new(HttpTransport::new(endpoint, config.timeout)?))),
        None => None,
    };

    for target in private.iter().chain(publish.iter()) {
        info!("{} target: {}", target.name, target.remote.name());
    }
    if config.push_only {
        info!("push-only mode: remote-only files are not downloaded");
    }

    let daemon = SyncDaemon::new(tree, private, publish)?
        .with_poll_interval(config.poll_interval)
        .with_dry_run(config.dry_run);

    daemon.initial_sync().await?;
    if config.once {
        return Ok(());
    }
    daemon.run().await
}
