//! Content store: atomic file storage with a deletion journal.

pub mod content;
pub mod path;
pub mod tombstone;

pub use content::{ContentStore, StoreOptions};
pub use path::canonical_key;
pub use tombstone::{TombstoneJournal, JOURNAL_FILE};
