//! Automaton Manager
//!
//! Owns the resident automaton of every pattern set. Each set has its own
//! initialization guard: concurrent `ensure_ready` calls for one set share a
//! single build, while different sets initialize independently.
//!
//! A fatal initialization failure (empty or invalid pattern set, bad
//! configuration) is remembered and returned without refetching until the
//! set is refreshed.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use jg_compiler::build_automaton;
use jg_core::{DenseAutomaton, PatternSetId};
use parking_lot::{Mutex, RwLock};

use crate::backend::{BackendFactory, BackendKind, MatchBackend};
use crate::cache::AutomatonCache;
use crate::dataset::DatasetSource;
use crate::error::{Error, Result};

/// A ready automaton together with the backend prepared for it.
pub struct Resident {
    pub automaton: Arc<DenseAutomaton>,
    pub backend: Arc<dyn MatchBackend>,
    /// Increases every time any set is (re)built or loaded
    pub generation: u64,
}

impl Resident {
    pub fn backend_kind(&self) -> BackendKind {
        self.backend.kind()
    }
}

impl std::fmt::Debug for Resident {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Resident")
            .field("automaton", &self.automaton)
            .field("backend", &self.backend.kind())
            .field("generation", &self.generation)
            .finish()
    }
}

pub struct AutomatonManager {
    sets: Vec<PatternSetId>,
    cache: AutomatonCache,
    dataset: Arc<dyn DatasetSource>,
    backends: BackendFactory,
    resident: RwLock<HashMap<PatternSetId, Arc<Resident>>>,
    guards: Mutex<HashMap<PatternSetId, Arc<tokio::sync::Mutex<()>>>>,
    failed: RwLock<HashMap<PatternSetId, Error>>,
    generation: AtomicU64,
}

impl AutomatonManager {
    pub fn new(
        sets: Vec<PatternSetId>,
        cache: AutomatonCache,
        dataset: Arc<dyn DatasetSource>,
        backends: BackendFactory,
    ) -> Self {
        Self {
            sets,
            cache,
            dataset,
            backends,
            resident: RwLock::new(HashMap::new()),
            guards: Mutex::new(HashMap::new()),
            failed: RwLock::new(HashMap::new()),
            generation: AtomicU64::new(0),
        }
    }

    /// Configured pattern sets, in configuration order.
    pub fn sets(&self) -> &[PatternSetId] {
        &self.sets
    }

    /// Currently resident automaton for `set`, if any.
    pub fn get(&self, set: &PatternSetId) -> Option<Arc<Resident>> {
        self.resident.read().get(set).cloned()
    }

    pub fn is_ready(&self, set: &PatternSetId) -> bool {
        self.resident.read().contains_key(set)
    }

    /// Make `set` resident, loading from the cache or building it. Returns
    /// immediately when it already is.
    pub async fn ensure_ready(&self, set: &PatternSetId) -> Result<Arc<Resident>> {
        if let Some(resident) = self.get(set) {
            return Ok(resident);
        }
        self.check_failed(set)?;

        let guard = self.guard(set);
        let _lock = guard.lock().await;

        // Double-check after acquiring the guard
        if let Some(resident) = self.get(set) {
            return Ok(resident);
        }
        self.check_failed(set)?;

        let loaded = match self.cache.load(set).await? {
            Some(automaton) => self.adopt(set, Arc::new(automaton)).await,
            None => self.rebuild(set).await,
        };
        let resident = loaded.map_err(|e| self.remember_failure(set, e))?;
        self.resident.write().insert(set.clone(), resident.clone());
        Ok(resident)
    }

    /// Whether `set` is parked on a fatal failure awaiting refresh.
    pub fn has_failed(&self, set: &PatternSetId) -> bool {
        self.failed.read().contains_key(set)
    }

    /// Ready every configured set.
    pub async fn ensure_all_ready(&self) -> Result<()> {
        let results =
            futures::future::join_all(self.sets.iter().map(|set| self.ensure_ready(set))).await;
        results.into_iter().try_for_each(|r| r.map(|_| ()))
    }

    /// Rebuild every configured set from the dataset source.
    ///
    /// The previous automaton keeps serving until its replacement is ready;
    /// batches already holding it finish against it. A set whose rebuild
    /// fails keeps its previous automaton.
    pub async fn refresh(&self) -> Result<()> {
        let results =
            futures::future::join_all(self.sets.iter().map(|set| self.refresh_set(set))).await;
        results.into_iter().collect()
    }

    pub async fn refresh_set(&self, set: &PatternSetId) -> Result<()> {
        let guard = self.guard(set);
        let _lock = guard.lock().await;

        self.failed.write().remove(set);
        self.cache.clear(set).await?;
        let resident = match self.rebuild(set).await {
            Ok(resident) => resident,
            Err(e) => {
                log::error!("Refresh of {set} failed, keeping previous automaton: {e}");
                return Err(self.remember_failure(set, e));
            }
        };

        let previous = self.resident.write().insert(set.clone(), resident.clone());
        log::info!(
            "Swapped {set} to generation {} ({} states, was {})",
            resident.generation,
            resident.automaton.num_states(),
            previous.map_or_else(|| "none".to_string(), |p| p.generation.to_string())
        );
        Ok(())
    }

    fn check_failed(&self, set: &PatternSetId) -> Result<()> {
        match self.failed.read().get(set).and_then(Error::replay) {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn remember_failure(&self, set: &PatternSetId, error: Error) -> Error {
        if let Some(copy) = error.replay() {
            log::warn!("{set} disabled until refreshed: {error}");
            self.failed.write().insert(set.clone(), copy);
        }
        error
    }

    fn guard(&self, set: &PatternSetId) -> Arc<tokio::sync::Mutex<()>> {
        self.guards.lock().entry(set.clone()).or_default().clone()
    }

    async fn adopt(&self, set: &PatternSetId, automaton: Arc<DenseAutomaton>) -> Result<Arc<Resident>> {
        let backend = self.backends.prepare(set, automaton.clone()).await?;
        let generation = self.generation.fetch_add(1, Ordering::Relaxed) + 1;
        log::debug!("{set} ready on {} backend (generation {generation})", backend.kind());
        Ok(Arc::new(Resident {
            automaton,
            backend,
            generation,
        }))
    }

    /// Fetch, build, prepare a backend, then persist.
    async fn rebuild(&self, set: &PatternSetId) -> Result<Arc<Resident>> {
        let patterns = self.dataset.fetch(set).await?;

        let build_patterns = patterns.clone();
        let output = tokio::task::spawn_blocking(move || build_automaton(&build_patterns))
            .await
            .map_err(|e| Error::transient(format!("build task for {set} failed: {e}")))?
            .map_err(|source| Error::Construction {
                set: set.clone(),
                source,
            })?;

        let automaton = Arc::new(output.automaton);
        let resident = self.adopt(set, automaton.clone()).await?;

        self.cache.save(set, &automaton).await?;
        self.cache.save_patterns(set, &patterns).await;
        Ok(resident)
    }
}
