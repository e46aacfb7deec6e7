// src/watch/mod.rs

//! Config file watching for hot reload.
//!
//! This module only turns "the config file now has different content" into
//! a `reload` control event. Loading, validating and swapping the tables is
//! the manager runtime's job.

pub mod watcher;

pub use watcher::{hash_file, spawn_config_watcher, WatcherHandle, DEFAULT_DEBOUNCE};
