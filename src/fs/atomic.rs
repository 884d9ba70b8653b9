//! Staged writes and directory cleanup shared by the store and the transport.

use std::fs;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use tempfile::Builder;

/// Prefix for staging files. Scanners and stores skip anything carrying it.
pub const STAGING_PREFIX: &str = ".vaultsync-";

/// Write `reader` to `path` through a temporary sibling that is renamed into
/// place, so readers only ever see the old or the new content.
pub fn write_atomic<R: Read>(path: &Path, reader: &mut R) -> io::Result<u64> {
    let parent = path
        .parent()
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "path has no parent"))?;
    fs::create_dir_all(parent)?;

    let mut staged = Builder::new().prefix(STAGING_PREFIX).tempfile_in(parent)?;
    let written = io::copy(reader, staged.as_file_mut())?;
    staged.as_file_mut().flush()?;
    staged.as_file().sync_all()?;

    // Dropping the staged file on error removes it
    staged.persist(path).map_err(|e| e.error)?;
    Ok(written)
}

/// Remove `start` and its ancestors while they are empty, stopping at `root`.
/// Returns the removed directories, deepest first.
pub fn remove_empty_parents(start: &Path, root: &Path) -> Vec<PathBuf> {
    let mut removed = Vec::new();
    let mut dir = start.to_path_buf();
    while dir != root && dir.starts_with(root) {
        if fs::remove_dir(&dir).is_err() {
            break; // not empty
        }
        removed.push(dir.clone());
        match dir.parent() {
            Some(parent) => dir = parent.to_path_buf(),
            None => break,
        }
    }
    removed
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_write_atomic_creates_parents_and_replaces() {
        let dir = tempdir().unwrap();
        let target = dir.path().join("a/b/note.md");

        write_atomic(&target, &mut &b"first"[..]).unwrap();
        assert_eq!(fs::read(&target).unwrap(), b"first");

        let written = write_atomic(&target, &mut &b"second!"[..]).unwrap();
        assert_eq!(written, 7);
        assert_eq!(fs::read(&target).unwrap(), b"second!");

        // No staging leftovers
        let names: Vec<_> = fs::read_dir(target.parent().unwrap())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
            .collect();
        assert_eq!(names, vec!["note.md".to_string()]);
    }

    #[test]
    fn test_remove_empty_parents_stops_at_root_and_non_empty() {
        let dir = tempdir().unwrap();
        let root = dir.path();
        fs::create_dir_all(root.join("keep/x/y")).unwrap();
        fs::write(root.join("keep/other.md"), b"x").unwrap();

        let removed = remove_empty_parents(&root.join("keep/x/y"), root);

        assert_eq!(removed, vec![root.join("keep/x/y"), root.join("keep/x")]);
        assert!(!root.join("keep/x").exists());
        assert!(root.join("keep").exists());
        assert!(root.exists());
    }
}
