// Library module for vaultsync
// Re-exports modules for use in integration tests and the binary

pub mod config;
pub mod error;
pub mod fs;
pub mod server;
pub mod store;
pub mod sync;

pub use error::{Error, Result};
