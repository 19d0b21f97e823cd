//! Command-line interface for music-sync.
//!
//! Commands for syncing a library root, inspecting a single file, browsing
//! the synced library and following a root for changes.

mod commands;

pub use commands::{Cli, Commands, run_command};
