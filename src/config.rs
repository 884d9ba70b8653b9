//! Configuration: optional TOML file, command-line overrides, secrets from
//! the environment.
//!
//! ```toml
//! [server]
//! port = 8080
//! data = "/srv/vault"
//! rebuild_command = "make site"
//!
//! [client]
//! dir = "~/notes"
//! server = "https://notes.example.com"
//! publish_server = "https://blog.example.com"
//! exclude = ["drafts/**"]
//! ```

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Server secret, and client token for the private target.
pub const TOKEN_ENV: &str = "VAULTSYNC_TOKEN";
/// Client token for the publish target.
pub const PUBLISH_TOKEN_ENV: &str = "VAULTSYNC_PUBLISH_TOKEN";

pub const DEFAULT_PORT: u16 = 8080;
pub const DEFAULT_MAX_UPLOAD_BYTES: usize = 100 << 20;
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 60;
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Default config file location: `<config dir>/vaultsync/config.toml`.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("vaultsync").join("config.toml"))
}

/// Expand a leading `~/` to the home directory.
pub fn expand_home(path: &Path) -> PathBuf {
    match path.strip_prefix("~") {
        Ok(rest) => match dirs::home_dir() {
            Some(home) => home.join(rest),
            None => path.to_path_buf(),
        },
        Err(_) => path.to_path_buf(),
    }
}

/// Read an environment variable, treating empty as unset.
pub fn env_secret(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

/// The on-disk configuration file.
#[derive(Debug, Default, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ConfigFile {
    pub server: ServerSection,
    pub client: ClientSection,
}

impl ConfigFile {
    pub fn parse(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Load `explicit` (which must exist) or the default location (which may not).
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let (path, required) = match explicit {
            Some(path) => (path.to_path_buf(), true),
            None => match default_config_path() {
                Some(path) => (path, false),
                None => return Ok(Self::default()),
            },
        };

        if !path.exists() {
            if required {
                bail!("config file not found: {}", path.display());
            }
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let config = Self::parse(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
        tracing::debug!("loaded config from {}", path.display());
        Ok(config)
    }
}

/// `[server]` section. Every field is optional so command-line values can be
/// layered on top.
#[derive(Debug, Default, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerSection {
    pub bind: Option<String>,
    pub port: Option<u16>,
    pub data: Option<PathBuf>,
    pub max_upload_bytes: Option<usize>,
    pub tombstones: Option<bool>,
    pub rebuild_command: Option<String>,
    pub token: Option<String>,
}

impl ServerSection {
    /// Values set in `overrides` win.
    pub fn merge(self, overrides: ServerSection) -> Self {
        Self {
            bind: overrides.bind.or(self.bind),
            port: overrides.port.or(self.port),
            data: overrides.data.or(self.data),
            max_upload_bytes: overrides.max_upload_bytes.or(self.max_upload_bytes),
            tombstones: overrides.tombstones.or(self.tombstones),
            rebuild_command: overrides.rebuild_command.or(self.rebuild_command),
            token: overrides.token.or(self.token),
        }
    }

    /// Resolve defaults. `env_token` takes precedence over a token in the file.
    pub fn resolve(self, env_token: Option<String>) -> ServerConfig {
        ServerConfig {
            bind: self.bind.unwrap_or_else(|| "0.0.0.0".to_string()),
            port: self.port.unwrap_or(DEFAULT_PORT),
            data: expand_home(&self.data.unwrap_or_else(|| PathBuf::from("./data"))),
            max_upload_bytes: self.max_upload_bytes.unwrap_or(DEFAULT_MAX_UPLOAD_BYTES),
            tombstones: self.tombstones.unwrap_or(true),
            rebuild_command: self.rebuild_command.filter(|c| !c.trim().is_empty()),
            token: env_token.or(self.token).filter(|t| !t.is_empty()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind: String,
    pub port: u16,
    pub data: PathBuf,
    pub max_upload_bytes: usize,
    pub tombstones: bool,
    pub rebuild_command: Option<String>,
    pub token: Option<String>,
}

/// `[client]` section.
#[derive(Debug, Default, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ClientSection {
    pub dir: Option<PathBuf>,
    pub server: Option<String>,
    pub publish_server: Option<String>,
    pub push_only: Option<bool>,
    pub poll_interval_secs: Option<u64>,
    pub timeout_secs: Option<u64>,
    pub exclude: Vec<String>,
    pub dry_run: Option<bool>,
    pub once: Option<bool>,
    pub token: Option<String>,
    pub publish_token: Option<String>,
}

impl ClientSection {
    /// Values set in `overrides` win; exclude patterns accumulate.
    pub fn merge(self, overrides: ClientSection) -> Self {
        let mut exclude = self.exclude;
        exclude.extend(overrides.exclude);
        Self {
            dir: overrides.dir.or(self.dir),
            server: overrides.server.or(self.server),
            publish_server: overrides.publish_server.or(self.publish_server),
            push_only: overrides.push_only.or(self.push_only),
            poll_interval_secs: overrides.poll_interval_secs.or(self.poll_interval_secs),
            timeout_secs: overrides.timeout_secs.or(self.timeout_secs),
            exclude,
            dry_run: overrides.dry_run.or(self.dry_run),
            once: overrides.once.or(self.once),
            token: overrides.token.or(self.token),
            publish_token: overrides.publish_token.or(self.publish_token),
        }
    }

    /// Resolve defaults and validate. Environment tokens take precedence.
    pub fn resolve(self, env_token: Option<String>, env_publish_token: Option<String>) -> Result<ClientConfig> {
        let private = self.server.filter(|s| !s.trim().is_empty()).map(|url| Endpoint {
            url,
            token: env_token.or(self.token).filter(|t| !t.is_empty()),
        });
        let publish = self.publish_server.filter(|s| !s.trim().is_empty()).map(|url| Endpoint {
            url,
            token: env_publish_token.or(self.publish_token).filter(|t| !t.is_empty()),
        });

        if private.is_none() && publish.is_none() {
            bail!("at least one of --server or --publish-server must be set");
        }

        let poll_interval_secs = self.poll_interval_secs.unwrap_or(DEFAULT_POLL_INTERVAL_SECS);
        if poll_interval_secs == 0 {
            bail!("poll interval must be at least one second");
        }

        Ok(ClientConfig {
            dir: expand_home(&self.dir.unwrap_or_else(|| PathBuf::from("."))),
            private,
            publish,
            push_only: self.push_only.unwrap_or(false),
            poll_interval: Duration::from_secs(poll_interval_secs),
            timeout: Duration::from_secs(self.timeout_secs.unwrap_or(DEFAULT_TIMEOUT_SECS)),
            exclude: self.exclude,
            dry_run: self.dry_run.unwrap_or(false),
            once: self.once.unwrap_or(false),
        })
    }
}

/// A remote store URL and its bearer token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub url: String,
    pub token: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub dir: PathBuf,
    /// Bidirectional target.
    pub private: Option<Endpoint>,
    /// One-way filtered target.
    pub publish: Option<Endpoint>,
    pub push_only: bool,
    pub poll_interval: Duration,
    pub timeout: Duration,
    pub exclude: Vec<String>,
    pub dry_run: bool,
    pub once: bool,
}
