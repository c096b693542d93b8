//! Automaton Cache
//!
//! Persists each pattern set's dense automaton in a [`BlobStore`] so a
//! restart can skip the fetch and build. Four keys per set:
//!
//! - `<set>/states`: state count (`u32` LE)
//! - `<set>/table`: transition table (`u32` LE array)
//! - `<set>/bitmap`: output bitmap (`u32` LE array)
//! - `<set>/patterns`: raw pattern list, newline-joined (best effort)
//!
//! `states` is written last and read first, so an interrupted save reads
//! back as a miss.

use std::sync::Arc;

use jg_core::snapshot::{decode_u32_array, encode_u32_array};
use jg_core::{DenseAutomaton, PatternSetId};

use crate::error::Result;
use crate::store::BlobStore;

const STATES: &str = "states";
const TABLE: &str = "table";
const BITMAP: &str = "bitmap";
const PATTERNS: &str = "patterns";

fn key(set: &PatternSetId, kind: &str) -> String {
    format!("{}/{kind}", set.as_str())
}

#[derive(Clone)]
pub struct AutomatonCache {
    store: Arc<dyn BlobStore>,
}

impl AutomatonCache {
    pub fn new(store: Arc<dyn BlobStore>) -> Self {
        Self { store }
    }

    pub async fn save(&self, set: &PatternSetId, automaton: &DenseAutomaton) -> Result<()> {
        self.store
            .put(&key(set, TABLE), &encode_u32_array(automaton.transitions()))
            .await?;
        self.store
            .put(&key(set, BITMAP), &encode_u32_array(automaton.output()))
            .await?;
        let states = (automaton.num_states() as u32).to_le_bytes();
        self.store.put(&key(set, STATES), &states).await?;

        log::debug!(
            "Cached {set}: {} states, {} bytes",
            automaton.num_states(),
            automaton.size_bytes()
        );
        Ok(())
    }

    /// `Ok(None)` on a cold start. Entries that no longer decode to a valid
    /// automaton are dropped and also reported as a miss.
    pub async fn load(&self, set: &PatternSetId) -> Result<Option<DenseAutomaton>> {
        let Some(states) = self.store.get(&key(set, STATES)).await? else {
            log::debug!("Cache miss for {set}");
            return Ok(None);
        };
        let table = self.store.get(&key(set, TABLE)).await?;
        let bitmap = self.store.get(&key(set, BITMAP)).await?;

        let decoded = match (decode_states(&states), table, bitmap) {
            (Some(num_states), Some(table), Some(bitmap)) => {
                match (decode_u32_array(&table), decode_u32_array(&bitmap)) {
                    (Some(transitions), Some(output)) => {
                        DenseAutomaton::from_parts(num_states, transitions, output)
                            .map_err(|e| e.to_string())
                    }
                    _ => Err("array length is not a multiple of 4".to_string()),
                }
            }
            _ => Err("incomplete entry".to_string()),
        };

        match decoded {
            Ok(automaton) => {
                log::info!("Loaded {set} from cache: {} states", automaton.num_states());
                Ok(Some(automaton))
            }
            Err(reason) => {
                log::warn!("Discarding cached {set}: {reason}");
                self.clear(set).await?;
                Ok(None)
            }
        }
    }

    /// Best effort: failures are logged, never returned.
    pub async fn save_patterns(&self, set: &PatternSetId, patterns: &[String]) {
        let joined = patterns.join("\n");
        if let Err(e) = self.store.put(&key(set, PATTERNS), joined.as_bytes()).await {
            log::warn!("Could not cache raw patterns for {set}: {e}");
        }
    }

    /// Best effort: `None` on a miss or any failure.
    pub async fn load_patterns(&self, set: &PatternSetId) -> Option<Vec<String>> {
        let data = match self.store.get(&key(set, PATTERNS)).await {
            Ok(data) => data?,
            Err(e) => {
                log::warn!("Could not read cached patterns for {set}: {e}");
                return None;
            }
        };
        let text = String::from_utf8(data).ok()?;
        Some(
            text.lines()
                .filter(|l| !l.is_empty())
                .map(str::to_string)
                .collect(),
        )
    }

    /// Remove every key for `set`. `states` goes first so a partial clear
    /// still reads as a miss.
    pub async fn clear(&self, set: &PatternSetId) -> Result<()> {
        for kind in [STATES, TABLE, BITMAP, PATTERNS] {
            self.store.delete(&key(set, kind)).await?;
        }
        Ok(())
    }
}

fn decode_states(data: &[u8]) -> Option<usize> {
    let bytes: [u8; 4] = data.try_into().ok()?;
    Some(u32::from_le_bytes(bytes) as usize)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{FsBlobStore, MemoryBlobStore};
    use jg_compiler::build_automaton;

    fn sample() -> DenseAutomaton {
        build_automaton(&["aaaa", "bbbb", "2ad2ad16d2ad2ad22c42d42d"])
            .unwrap()
            .automaton
    }

    #[tokio::test]
    async fn test_cold_start_is_a_miss() {
        let cache = AutomatonCache::new(Arc::new(MemoryBlobStore::new()));
        assert!(cache.load(&PatternSetId::BLOCKLIST).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_round_trip_is_identical() {
        let dir = tempfile::tempdir().unwrap();
        let cache = AutomatonCache::new(Arc::new(FsBlobStore::new(dir.path())));
        let automaton = sample();

        cache.save(&PatternSetId::BLOCKLIST, &automaton).await.unwrap();
        let loaded = cache.load(&PatternSetId::BLOCKLIST).await.unwrap().unwrap();

        assert_eq!(loaded.transitions(), automaton.transitions());
        assert_eq!(loaded.output(), automaton.output());
        assert_eq!(loaded.num_states(), automaton.num_states());

        // Keyed by set name.
        assert!(cache.load(&PatternSetId::TRACKERS).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_corrupt_entry_is_discarded() {
        let store = Arc::new(MemoryBlobStore::new());
        let cache = AutomatonCache::new(store.clone());
        cache.save(&PatternSetId::TRACKERS, &sample()).await.unwrap();

        store.put("trackers/bitmap", &[1, 2, 3]).await.unwrap();
        assert!(cache.load(&PatternSetId::TRACKERS).await.unwrap().is_none());
        assert!(store.get("trackers/table").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_interrupted_save_reads_as_miss() {
        let store = Arc::new(MemoryBlobStore::new());
        let cache = AutomatonCache::new(store.clone());
        cache.save(&PatternSetId::BLOCKLIST, &sample()).await.unwrap();
        store.delete("blocklist/states").await.unwrap();

        assert!(cache.load(&PatternSetId::BLOCKLIST).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_patterns_and_clear() {
        let store = Arc::new(MemoryBlobStore::new());
        let cache = AutomatonCache::new(store.clone());
        let set = PatternSetId::BLOCKLIST;

        assert!(cache.load_patterns(&set).await.is_none());
        let patterns = vec!["aaaa".to_string(), "bbbb".to_string()];
        cache.save_patterns(&set, &patterns).await;
        assert_eq!(cache.load_patterns(&set).await, Some(patterns));

        cache.save(&set, &sample()).await.unwrap();
        cache.clear(&set).await.unwrap();
        assert!(store.is_empty());
    }
}
