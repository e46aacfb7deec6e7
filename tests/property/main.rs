//! Property tests for the pure parts of the manager.

mod checklist;
mod resolver;
