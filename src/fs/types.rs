use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// One stored file, as listed by a content store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRecord {
    /// Relative, slash-separated path. Unique within a store.
    pub path: String,
    /// Hex SHA-256 of the content.
    pub hash: String,
    pub size: u64,
    pub mod_time: DateTime<Utc>,
}

/// Marks that `path` was deleted from the private store at `deleted_at`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tombstone {
    pub path: String,
    pub deleted_at: DateTime<Utc>,
}

/// A syncable file found by walking the local tree.
#[derive(Debug, Clone)]
pub struct LocalFile {
    pub rel_path: String,
    pub abs_path: PathBuf,
    pub size: u64,
    pub modified: DateTime<Utc>,
}

impl LocalFile {
    pub fn format_size(&self) -> String {
        humansize::format_size(self.size, humansize::DECIMAL)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_file_record_wire_names() {
        let record = FileRecord {
            path: "notes/a.md".to_string(),
            hash: "abc".to_string(),
            size: 3,
            mod_time: Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap(),
        };
        let json = serde_json::to_value(&record).unwrap();

        assert_eq!(json["path"], "notes/a.md");
        assert_eq!(json["size"], 3);
        assert!(json["mod_time"].as_str().unwrap().starts_with("2024-01-02T03:04:05"));
    }

    #[test]
    fn test_tombstone_wire_names() {
        let json = r#"[{"path":"a.md","deleted_at":"2024-05-01T10:00:00Z"}]"#;
        let parsed: Vec<Tombstone> = serde_json::from_str(json).unwrap();

        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0].path, "a.md");
        assert_eq!(
            parsed[0].deleted_at,
            Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap()
        );
    }
}
