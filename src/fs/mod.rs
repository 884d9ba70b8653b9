pub mod atomic;
pub mod local;
pub mod types;

pub use atomic::{remove_empty_parents, write_atomic, STAGING_PREFIX};
pub use local::{join_key, relative_key, LocalTree};
pub use types::*;
