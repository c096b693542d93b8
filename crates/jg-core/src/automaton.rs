//! Dense Aho-Corasick automaton
//!
//! The automaton is a flattened `num_states x ALPHABET_SIZE` transition table
//! plus an output bitmap, both stored as `u32` so they can be handed to an
//! accelerator without conversion. State 0 is the root.
//!
//! The table is a total function: every `(state, symbol)` cell holds a valid
//! state id, so a scan never needs a "no transition" branch.

use crate::fingerprint::ALPHABET_SIZE;

/// Largest state count whose table indices still fit in a `u32`.
pub const MAX_STATES: usize = (u32::MAX as usize) / ALPHABET_SIZE;

/// Error type for reconstructing an automaton from raw parts.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AutomatonError {
    #[error("Automaton has no states")]
    Empty,
    #[error("Too many states: {0}")]
    TooManyStates(usize),
    #[error("Transition table has {actual} cells, expected {expected}")]
    TableLength { expected: usize, actual: usize },
    #[error("Output bitmap has {actual} entries, expected {expected}")]
    OutputLength { expected: usize, actual: usize },
    #[error("Transition at cell {cell} targets state {target} (only {num_states} states)")]
    TransitionOutOfRange { cell: usize, target: u32, num_states: usize },
    #[error("Output entry {state} is {value}, expected 0 or 1")]
    InvalidOutput { state: usize, value: u32 },
    #[error("Root state is accepting")]
    AcceptingRoot,
}

/// Immutable dense automaton for one pattern-set generation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DenseAutomaton {
    num_states: usize,
    transitions: Vec<u32>,
    output: Vec<u32>,
}

impl DenseAutomaton {
    /// Reconstruct an automaton from its raw arrays, validating every
    /// invariant a scan relies on.
    pub fn from_parts(
        num_states: usize,
        transitions: Vec<u32>,
        output: Vec<u32>,
    ) -> Result<Self, AutomatonError> {
        if num_states == 0 {
            return Err(AutomatonError::Empty);
        }
        if num_states > MAX_STATES {
            return Err(AutomatonError::TooManyStates(num_states));
        }

        let expected = num_states * ALPHABET_SIZE;
        if transitions.len() != expected {
            return Err(AutomatonError::TableLength { expected, actual: transitions.len() });
        }
        if output.len() != num_states {
            return Err(AutomatonError::OutputLength { expected: num_states, actual: output.len() });
        }

        if let Some((cell, &target)) = transitions
            .iter()
            .enumerate()
            .find(|&(_, &t)| t as usize >= num_states)
        {
            return Err(AutomatonError::TransitionOutOfRange { cell, target, num_states });
        }
        if let Some((state, &value)) = output.iter().enumerate().find(|&(_, &v)| v > 1) {
            return Err(AutomatonError::InvalidOutput { state, value });
        }
        if output[0] != 0 {
            return Err(AutomatonError::AcceptingRoot);
        }

        Ok(Self { num_states, transitions, output })
    }

    pub fn num_states(&self) -> usize {
        self.num_states
    }

    /// Flattened transition table, `num_states * ALPHABET_SIZE` cells.
    pub fn transitions(&self) -> &[u32] {
        &self.transitions
    }

    /// Output bitmap, one 0/1 entry per state.
    pub fn output(&self) -> &[u32] {
        &self.output
    }

    /// Number of accepting states (after failure-link propagation).
    pub fn accepting_states(&self) -> usize {
        self.output.iter().filter(|&&v| v != 0).count()
    }

    /// Follow one transition.
    #[inline]
    pub fn step(&self, state: u32, symbol: u8) -> u32 {
        self.transitions[state as usize * ALPHABET_SIZE + symbol as usize]
    }

    #[inline]
    pub fn is_accepting(&self, state: u32) -> bool {
        self.output[state as usize] != 0
    }

    /// Scan a symbol sequence, OR-ing the accept bit of every visited state.
    ///
    /// Symbols must be `< ALPHABET_SIZE`; `Fingerprint` guarantees this.
    #[inline]
    pub fn scan(&self, symbols: &[u8]) -> bool {
        let mut state = 0u32;
        let mut hit = 0u32;
        for &symbol in symbols {
            state = self.step(state, symbol);
            hit |= self.output[state as usize];
        }
        hit != 0
    }

    /// Approximate resident size of both arrays in bytes.
    pub fn size_bytes(&self) -> usize {
        (self.transitions.len() + self.output.len()) * std::mem::size_of::<u32>()
    }
}
