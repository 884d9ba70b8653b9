//! Content hashing for file records.
//!
//! SHA-256, hex encoded. Both sides of a sync must agree on this, so it is
//! the only algorithm.

use sha2::{Digest, Sha256};
use std::io::Read;
use std::path::Path;

use crate::error::{Error, Result};

/// A computed file hash.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileHash {
    /// Hex encoded SHA-256.
    pub value: String,
    /// File size in bytes.
    pub size: u64,
}

/// Hash bytes.
pub fn hash_bytes(data: &[u8]) -> String {
    format!("{:x}", Sha256::digest(data))
}

/// Hash everything a reader yields.
pub fn hash_reader<R: Read>(reader: &mut R) -> std::io::Result<FileHash> {
    let mut hasher = Sha256::new();
    let mut buffer = [0u8; 65536]; // 64KB buffer
    let mut size = 0u64;

    loop {
        let bytes_read = reader.read(&mut buffer)?;
        if bytes_read == 0 {
            break;
        }
        hasher.update(&buffer[..bytes_read]);
        size += bytes_read as u64;
    }

    Ok(FileHash {
        value: format!("{:x}", hasher.finalize()),
        size,
    })
}

/// Hash a file.
pub fn hash_file(path: &Path) -> Result<FileHash> {
    let mut file = std::fs::File::open(path).map_err(|e| Error::io(path, e))?;
    hash_reader(&mut file).map_err(|e| Error::io(path, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_hash_bytes() {
        let hash1 = hash_bytes(b"hello world");
        let hash2 = hash_bytes(b"hello world");
        let hash3 = hash_bytes(b"goodbye world");

        assert_eq!(hash1, hash2);
        assert_ne!(hash1, hash3);
        assert_eq!(hash1.len(), 64); // 256-bit digest
        assert_eq!(
            hash_bytes(b""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn test_hash_file_matches_bytes() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(b"test content").unwrap();

        let hash = hash_file(file.path()).unwrap();

        assert_eq!(hash.size, 12);
        assert_eq!(hash.value, hash_bytes(b"test content"));
    }

    #[test]
    fn test_hash_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        assert!(hash_file(&dir.path().join("missing")).is_err());
    }
}
