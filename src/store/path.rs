// Path canonicalization for store keys
// Handles both forward and backward slashes, resolves "." and "..",
// and rejects anything that would leave the store root

use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::fs::atomic::STAGING_PREFIX;
use crate::store::tombstone::JOURNAL_FILE;

/// Canonicalize a client-supplied relative path into a slash-separated key.
///
/// "a/./b/../c.md" becomes "a/c.md". Absolute paths, paths that climb above
/// the root, empty paths, and reserved names are rejected.
pub fn canonical_key(raw: &str) -> Result<String> {
    let normalized = raw.replace('\\', "/");
    if normalized.starts_with('/') || has_drive_prefix(&normalized) {
        return Err(Error::invalid_path(raw));
    }

    let mut parts: Vec<&str> = Vec::new();
    for part in normalized.split('/') {
        match part {
            "" | "." => continue,
            ".." => {
                if parts.pop().is_none() {
                    return Err(Error::invalid_path(raw));
                }
            }
            other => parts.push(other),
        }
    }

    if parts.is_empty() {
        return Err(Error::invalid_path(raw));
    }
    if parts.iter().any(|p| p.starts_with(STAGING_PREFIX)) {
        return Err(Error::invalid_path(raw));
    }
    if parts.len() == 1 && parts[0] == JOURNAL_FILE {
        return Err(Error::invalid_path(raw));
    }

    Ok(parts.join("/"))
}

fn has_drive_prefix(path: &str) -> bool {
    let bytes = path.as_bytes();
    bytes.len() >= 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':'
}

/// Resolve `raw` under `root`, returning the canonical key and the full path.
pub fn resolve(root: &Path, raw: &str) -> Result<(String, PathBuf)> {
    let key = canonical_key(raw)?;
    let full = crate::fs::join_key(root, &key);
    if !full.starts_with(root) || full == root {
        return Err(Error::invalid_path(raw));
    }
    Ok((key, full))
}
