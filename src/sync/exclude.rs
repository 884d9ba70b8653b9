//! Which local files take part in sync.
//!
//! A path is syncable when its extension is one of [`SYNC_EXTENSIONS`] and no
//! exclude pattern matches it. Exclude patterns are .gitignore-style globs.

use anyhow::Result;
use globset::{Glob, GlobSet, GlobSetBuilder};
use std::path::{Component, Path};

/// Extensions that are synced. Everything else is ignored.
pub const SYNC_EXTENSIONS: &[&str] = &["md", "png", "jpg", "jpeg", "gif", "svg", "webp"];

/// Image extensions (the non-markdown subset of [`SYNC_EXTENSIONS`]).
pub const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "gif", "svg", "webp"];

/// Default patterns to exclude from sync operations.
pub const DEFAULT_EXCLUDES: &[&str] = &[
    // Version control
    ".git",
    ".git/**",
    ".svn",
    ".hg",

    // Note-app state and trash
    ".obsidian",
    ".obsidian/**",
    ".trash",
    ".trash/**",

    // OS-specific
    ".DS_Store",
    "Thumbs.db",
    "desktop.ini",

    // Editor swap and backup files
    "*.swp",
    "*.swo",
    "*~",
    "*.tmp",
    "*.bak",

    // Our own staging files
    ".vaultsync-*",
];

fn extension_lower(path: &str) -> Option<String> {
    Path::new(path)
        .extension()
        .map(|e| e.to_string_lossy().to_ascii_lowercase())
}

/// True if the path has a syncable extension.
pub fn has_sync_extension(path: &str) -> bool {
    extension_lower(path).is_some_and(|ext| SYNC_EXTENSIONS.contains(&ext.as_str()))
}

pub fn is_markdown(path: &str) -> bool {
    extension_lower(path).is_some_and(|ext| ext == "md")
}

pub fn is_image(path: &str) -> bool {
    extension_lower(path).is_some_and(|ext| IMAGE_EXTENSIONS.contains(&ext.as_str()))
}

/// Pattern matching for file exclusion.
#[derive(Debug, Clone)]
pub struct ExcludePatterns {
    /// Compiled glob set for matching.
    glob_set: GlobSet,
    /// Raw pattern strings (for display).
    patterns: Vec<String>,
}

impl Default for ExcludePatterns {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl ExcludePatterns {
    /// Create with default exclude patterns.
    pub fn with_defaults() -> Self {
        let mut builder = GlobSetBuilder::new();
        let mut patterns = Vec::new();

        for pattern in DEFAULT_EXCLUDES {
            if let Ok(glob) = Glob::new(pattern) {
                builder.add(glob);
                patterns.push(pattern.to_string());
            }
        }

        Self {
            glob_set: builder.build().unwrap_or_else(|_| GlobSet::empty()),
            patterns,
        }
    }

    /// Create from a list of patterns.
    pub fn from_patterns<S: AsRef<str>>(patterns: &[S]) -> Result<Self> {
        let mut builder = GlobSetBuilder::new();
        let mut pattern_list = Vec::new();

        for pattern in patterns {
            builder.add(Glob::new(pattern.as_ref())?);
            pattern_list.push(pattern.as_ref().to_string());
        }

        Ok(Self {
            glob_set: builder.build()?,
            patterns: pattern_list,
        })
    }

    /// Defaults plus the given extra patterns.
    pub fn with_extra<S: AsRef<str>>(extra: &[S]) -> Result<Self> {
        let mut all: Vec<String> = DEFAULT_EXCLUDES.iter().map(|p| p.to_string()).collect();
        for pattern in extra {
            if !all.iter().any(|p| p == pattern.as_ref()) {
                all.push(pattern.as_ref().to_string());
            }
        }
        Self::from_patterns(&all)
    }

    /// Check if a relative path should be excluded.
    pub fn is_excluded(&self, path: &str) -> bool {
        if self.glob_set.is_match(path) {
            return true;
        }

        // Check each path component for directory patterns like ".git"
        for component in Path::new(path).components() {
            if let Component::Normal(name) = component {
                if self.glob_set.is_match(name.to_string_lossy().as_ref()) {
                    return true;
                }
            }
        }

        false
    }

    /// Get the list of patterns.
    pub fn patterns(&self) -> &[String] {
        &self.patterns
    }
}

/// Extension filter combined with exclude patterns.
#[derive(Debug, Clone, Default)]
pub struct SyncFilter {
    excludes: ExcludePatterns,
}

impl SyncFilter {
    pub fn new(excludes: ExcludePatterns) -> Self {
        Self { excludes }
    }

    /// A file that should be synced: syncable extension and not excluded.
    pub fn is_syncable(&self, rel_path: &str) -> bool {
        has_sync_extension(rel_path) && !self.excludes.is_excluded(rel_path)
    }

    pub fn is_excluded(&self, rel_path: &str) -> bool {
        self.excludes.is_excluded(rel_path)
    }
}
