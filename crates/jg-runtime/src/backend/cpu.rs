use std::sync::Arc;

use async_trait::async_trait;
use jg_core::{CpuMatcher, DenseAutomaton, Fingerprint, PatternSetId};

use super::{BackendKind, MatchBackend};
use crate::error::{Error, Result};

/// Worker-pool backend. The pool blocks until every chunk is done, so each
/// call runs on tokio's blocking threads.
pub struct CpuBackend {
    set: PatternSetId,
    automaton: Arc<DenseAutomaton>,
    matcher: Arc<CpuMatcher>,
}

impl CpuBackend {
    pub fn new(set: PatternSetId, automaton: Arc<DenseAutomaton>, matcher: Arc<CpuMatcher>) -> Self {
        Self {
            set,
            automaton,
            matcher,
        }
    }
}

#[async_trait]
impl MatchBackend for CpuBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Cpu
    }

    fn pattern_set(&self) -> &PatternSetId {
        &self.set
    }

    async fn match_batch(&self, batch: Arc<[Fingerprint]>) -> Result<Vec<bool>> {
        if batch.is_empty() {
            return Ok(Vec::new());
        }

        let automaton = self.automaton.clone();
        let matcher = self.matcher.clone();
        tokio::task::spawn_blocking(move || matcher.match_batch(&automaton, &batch))
            .await
            .map_err(|e| Error::dispatch(&self.set, format!("worker pool task failed: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jg_compiler::build_automaton;

    fn fingerprint(fill: char, tail: &str) -> Fingerprint {
        let mut text: String = std::iter::repeat(fill).take(62 - tail.len()).collect();
        text.push_str(tail);
        Fingerprint::parse(&text).unwrap()
    }

    #[tokio::test]
    async fn test_preserves_batch_order() {
        let automaton = Arc::new(build_automaton(&["abc"]).unwrap().automaton);
        let matcher = Arc::new(CpuMatcher::new(3).unwrap());
        let backend = CpuBackend::new(PatternSetId::BLOCKLIST, automaton, matcher);

        let batch: Arc<[Fingerprint]> = (0..10)
            .map(|i| if i % 3 == 0 { fingerprint('0', "abc") } else { fingerprint('1', "ab") })
            .collect::<Vec<_>>()
            .into();

        let results = backend.match_batch(batch).await.unwrap();
        let expected: Vec<bool> = (0..10).map(|i| i % 3 == 0).collect();
        assert_eq!(results, expected);
    }

    #[tokio::test]
    async fn test_empty_batch() {
        let automaton = Arc::new(build_automaton(&["abc"]).unwrap().automaton);
        let backend = CpuBackend::new(
            PatternSetId::TRACKERS,
            automaton,
            Arc::new(CpuMatcher::new(1).unwrap()),
        );
        let empty: Arc<[Fingerprint]> = Vec::new().into();
        assert!(backend.match_batch(empty).await.unwrap().is_empty());
    }
}
