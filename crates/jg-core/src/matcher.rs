//! CPU Matching Engine
//!
//! A fixed-size worker pool scans a batch of fingerprints against a shared,
//! read-only automaton. The batch is cut into contiguous near-equal chunks,
//! one per worker, and each worker writes into its own disjoint slice of the
//! output, so no locking is needed. The pool scope is the join barrier.

use std::num::NonZeroUsize;

use crate::automaton::DenseAutomaton;
use crate::fingerprint::Fingerprint;

/// Error type for worker pool construction.
#[derive(Debug, thiserror::Error)]
pub enum MatcherError {
    #[error("Failed to build worker pool: {0}")]
    Pool(#[from] rayon::ThreadPoolBuildError),
}

/// Multi-threaded matcher over a dense automaton.
pub struct CpuMatcher {
    pool: rayon::ThreadPool,
}

impl CpuMatcher {
    /// Create a matcher with `threads` workers (0 = available parallelism).
    pub fn new(threads: usize) -> Result<Self, MatcherError> {
        let threads = if threads == 0 {
            std::thread::available_parallelism()
                .map(NonZeroUsize::get)
                .unwrap_or(1)
        } else {
            threads
        };

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|i| format!("jg-match-{i}"))
            .build()?;

        log::debug!("CPU matcher started with {} workers", threads);
        Ok(Self { pool })
    }

    pub fn workers(&self) -> usize {
        self.pool.current_num_threads()
    }

    /// Match every fingerprint; `result[i]` corresponds to `batch[i]`.
    pub fn match_batch(&self, automaton: &DenseAutomaton, batch: &[Fingerprint]) -> Vec<bool> {
        let mut results = vec![false; batch.len()];
        if batch.is_empty() {
            return results;
        }

        let chunk = chunk_len(batch.len(), self.workers());
        self.pool.scope(|scope| {
            for (inputs, outputs) in batch.chunks(chunk).zip(results.chunks_mut(chunk)) {
                scope.spawn(move |_| {
                    for (fingerprint, slot) in inputs.iter().zip(outputs.iter_mut()) {
                        *slot = automaton.scan(fingerprint.symbols());
                    }
                });
            }
        });

        results
    }
}

/// Length of each contiguous chunk when splitting `len` items over
/// `workers` workers.
pub fn chunk_len(len: usize, workers: usize) -> usize {
    len.div_ceil(workers.max(1)).max(1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fingerprint::{ALPHABET_SIZE, FINGERPRINT_LEN};

    /// Automaton accepting the single symbol `f` (15).
    fn accepts_f() -> DenseAutomaton {
        let mut transitions = vec![0u32; 2 * ALPHABET_SIZE];
        transitions[15] = 1;
        transitions[ALPHABET_SIZE + 15] = 1;
        DenseAutomaton::from_parts(2, transitions, vec![0, 1]).unwrap()
    }

    fn fingerprint_with_f_at(pos: Option<usize>) -> Fingerprint {
        let mut text = vec![b'0'; FINGERPRINT_LEN];
        if let Some(pos) = pos {
            text[pos] = b'f';
        }
        Fingerprint::parse(std::str::from_utf8(&text).unwrap()).unwrap()
    }

    #[test]
    fn test_chunk_len() {
        assert_eq!(chunk_len(10, 4), 3);
        assert_eq!(chunk_len(8, 4), 2);
        assert_eq!(chunk_len(3, 8), 1);
        assert_eq!(chunk_len(0, 4), 1);
        assert_eq!(chunk_len(5, 0), 5);
    }

    #[test]
    fn test_results_preserve_order() {
        let matcher = CpuMatcher::new(3).unwrap();
        let automaton = accepts_f();

        let batch: Vec<Fingerprint> = (0..17)
            .map(|i| fingerprint_with_f_at(if i % 3 == 0 { Some(i) } else { None }))
            .collect();
        let results = matcher.match_batch(&automaton, &batch);

        assert_eq!(results.len(), batch.len());
        for (i, matched) in results.iter().enumerate() {
            assert_eq!(*matched, i % 3 == 0, "index {i}");
        }
    }

    #[test]
    fn test_empty_batch() {
        let matcher = CpuMatcher::new(2).unwrap();
        assert!(matcher.match_batch(&accepts_f(), &[]).is_empty());
    }

    #[test]
    fn test_match_anywhere_in_fingerprint() {
        let matcher = CpuMatcher::new(1).unwrap();
        let automaton = accepts_f();
        let batch = vec![
            fingerprint_with_f_at(Some(0)),
            fingerprint_with_f_at(Some(FINGERPRINT_LEN - 1)),
            fingerprint_with_f_at(None),
        ];
        assert_eq!(matcher.match_batch(&automaton, &batch), vec![true, true, false]);
    }

    #[test]
    fn test_zero_threads_uses_available_parallelism() {
        let matcher = CpuMatcher::new(0).unwrap();
        assert!(matcher.workers() >= 1);
    }
}
