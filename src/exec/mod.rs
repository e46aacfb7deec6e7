// src/exec/mod.rs

//! Worker launching layer.
//!
//! This module is responsible for actually starting worker processes with
//! `tokio::process::Command` and reporting their exits back to the manager
//! runtime as `ManagerEvent::ProcessExited`.
//!
//! - [`backend`] provides the `LaunchBackend` trait and the concrete
//!   `RealLauncher` used in production, which tests replace with a fake.
//! - [`launcher_loop`] owns the running processes, one per pair.
//! - [`process`] runs a single worker process.

pub mod backend;
pub mod launcher_loop;
pub mod process;

pub use backend::{LaunchBackend, RealLauncher};
pub use launcher_loop::{spawn_launcher, LauncherRequest};
