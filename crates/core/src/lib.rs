//! gitdrive core library.
//!
//! Keeps a git working directory in sync with a remote branch: commits local
//! edits, rebases onto remote changes while resolving conflicts, pushes, and
//! tells the user about it.

pub mod config;
pub mod conflict;
pub mod errors;
pub mod exec;
pub mod git;
pub mod identity;
pub mod notify;
pub mod scheduler;
pub mod sync;
pub mod validate;

#[cfg(test)]
mod test_support;

// Re-exports for convenience.
pub use config::{AppConfig, ConflictPolicy, SyncConfig};
pub use errors::CoreError;
pub use sync::{CycleReport, Synchronizer};
