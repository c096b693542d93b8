//! JarmGuard Core Library
//!
//! This crate provides the automaton representation and CPU matching engine
//! used to classify TLS negotiation fingerprints against pattern sets.
//!
//! # Architecture
//!
//! Pattern sets are compiled (by `jg-compiler`) into a dense Aho-Corasick
//! automaton: a flat `states x 16` transition table and an output bitmap.
//! The same two arrays feed both the CPU worker pool here and the
//! accelerator backend in `jg-runtime`, and can be persisted as a `JGA1`
//! snapshot.
//!
//! # Modules
//!
//! - `fingerprint`: hex alphabet and fixed-length fingerprint parsing
//! - `automaton`: dense transition table and output bitmap
//! - `matcher`: worker-pool batch matcher
//! - `snapshot`: JGA snapshot format and zero-copy loader
//! - `hash`: CRC32 checksums
//! - `types`: Shared type definitions

pub mod automaton;
pub mod fingerprint;
pub mod hash;
pub mod matcher;
pub mod snapshot;
pub mod types;

// Re-export commonly used types
pub use automaton::{AutomatonError, DenseAutomaton, MAX_STATES};
pub use fingerprint::{Fingerprint, FingerprintError, ALPHABET_SIZE, FINGERPRINT_LEN};
pub use hash::crc32;
pub use matcher::{CpuMatcher, MatcherError};
pub use snapshot::{Snapshot, SnapshotError};
pub use types::{Disposition, PatternSetId, RequestContext, Verdict};
