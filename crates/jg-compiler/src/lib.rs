//! JarmGuard Pattern Compiler
//!
//! This crate compiles hex pattern lists into dense Aho-Corasick automata
//! and writes them as JGA snapshots.

pub mod builder;
pub mod optimizer;
pub mod parser;
pub mod trie;

pub use builder::{
    build_automaton, build_automaton_with_limit, build_snapshot, BuildError, BuildOutput,
    BuildStats, PatternWarning, WarningReason,
};
pub use optimizer::{optimize_patterns, pattern_list_digest, OptimizeStats};
pub use parser::parse_pattern_list;
