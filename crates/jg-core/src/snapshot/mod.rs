//! JGA Snapshot Format and Loader
//!
//! This module provides the binary format definition and zero-copy loader
//! for compiled automaton snapshots.

mod format;
mod loader;

pub use format::*;
pub use loader::*;
