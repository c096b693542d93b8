//! JarmGuard Runtime
//!
//! Async service layer that turns a stream of fingerprinted connections into
//! per-pattern-set verdicts.
//!
//! # Architecture
//!
//! ```text
//! RequestContext ─▶ Classifier::submit ─▶ BatchScheduler ─▶ MatchBackend ─▶ VerdictSink
//!                                              │
//!                                              ▼
//!                                      AutomatonManager ─▶ AutomatonCache ─▶ BlobStore
//!                                              │
//!                                              ▼
//!                                        DatasetSource
//! ```
//!
//! # Modules
//!
//! - `backend`: CPU and accelerator matching backends
//! - `cache`: automaton persistence over a blob store
//! - `config`: runtime configuration
//! - `dataset`: pattern-set sources
//! - `helper`: framing for the fingerprint helper process
//! - `manager`: automaton lifecycle and initialization guard
//! - `scheduler`: request batching and result fan-out
//! - `sink`: verdict delivery

use std::sync::Arc;

use jg_core::{Fingerprint, RequestContext};

pub mod backend;
pub mod cache;
pub mod config;
pub mod dataset;
pub mod error;
pub mod helper;
pub mod manager;
pub mod scheduler;
pub mod sink;
pub mod store;

pub use backend::{BackendFactory, BackendKind, BackendPreference, MatchBackend};
pub use cache::AutomatonCache;
pub use config::{PatternSetConfig, RuntimeConfig};
pub use dataset::{DatasetSource, HttpDatasetSource, StaticDatasetSource};
pub use error::{Error, ErrorKind, Result};
pub use manager::{AutomatonManager, Resident};
pub use scheduler::{BatchScheduler, MatchRequest, SchedulerConfig, SchedulerStats};
pub use sink::{ChannelSink, VerdictSink};
pub use store::{BlobStore, FsBlobStore, MemoryBlobStore};

/// Wires the manager and scheduler together behind one handle.
pub struct Classifier {
    config: RuntimeConfig,
    manager: Arc<AutomatonManager>,
    scheduler: BatchScheduler,
}

impl Classifier {
    /// Start a classifier with explicit collaborators. Automata are built
    /// lazily on the first batch unless [`Classifier::warm_up`] is called.
    pub fn start(
        config: RuntimeConfig,
        dataset: Arc<dyn DatasetSource>,
        store: Arc<dyn BlobStore>,
        sink: Arc<dyn VerdictSink>,
    ) -> Result<Self> {
        config.validate()?;

        let backends = BackendFactory::new(&config)?;
        let manager = Arc::new(AutomatonManager::new(
            config.pattern_set_ids(),
            AutomatonCache::new(store),
            dataset,
            backends,
        ));
        let scheduler = BatchScheduler::start(SchedulerConfig::from(&config), manager.clone(), sink);

        log::info!(
            "Classifier started: sets={:?}, backend={:?}, batch={}, wait={}ms",
            config.pattern_sets.iter().map(|s| s.name.as_str()).collect::<Vec<_>>(),
            config.backend,
            config.max_batch_size,
            config.max_wait_ms
        );

        Ok(Self {
            config,
            manager,
            scheduler,
        })
    }

    /// Start with the configured sources and cache directory (in-memory
    /// store when none is set).
    pub fn from_config(config: RuntimeConfig, sink: Arc<dyn VerdictSink>) -> Result<Self> {
        let dataset = Arc::new(HttpDatasetSource::new(&config)?);
        let store: Arc<dyn BlobStore> = match &config.cache_dir {
            Some(dir) => Arc::new(FsBlobStore::new(dir)),
            None => Arc::new(MemoryBlobStore::new()),
        };
        Self::start(config, dataset, store, sink)
    }

    /// Queue a request for classification.
    ///
    /// Returns `Ok(false)` without queuing when the fingerprint is the
    /// helper's "no answer" marker: such a request never gets a verdict.
    pub fn submit(&self, context: RequestContext) -> Result<bool> {
        let fingerprint = Fingerprint::parse(&context.fingerprint)?;
        if fingerprint.is_empty_response() {
            log::debug!("No fingerprint for {}, not classifying", context.domain);
            return Ok(false);
        }

        self.scheduler.submit(MatchRequest {
            context,
            fingerprint,
        })?;
        Ok(true)
    }

    /// Ready every configured pattern set now instead of on first use.
    pub async fn warm_up(&self) -> Result<()> {
        self.manager.ensure_all_ready().await
    }

    /// Rebuild every pattern set from its sources.
    pub async fn refresh(&self) -> Result<()> {
        self.manager.refresh().await
    }

    /// Deliver verdicts for everything already submitted, then stop.
    pub async fn shutdown(&self) -> Result<()> {
        self.scheduler.shutdown().await
    }

    pub fn stats(&self) -> &SchedulerStats {
        self.scheduler.stats()
    }

    pub fn manager(&self) -> &Arc<AutomatonManager> {
        &self.manager
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use jg_core::{Disposition, PatternSetId, Verdict, FINGERPRINT_LEN};
    use tokio::sync::mpsc::UnboundedReceiver;

    const JARM: &str = "2ad2ad16d2ad2ad22c42d42d00042d58c7162162b6a603b3e3b16b2e4c9bab";

    fn config() -> RuntimeConfig {
        RuntimeConfig::default()
            .with_backend(BackendPreference::Cpu)
            .with_worker_threads(2)
            .with_max_wait(Duration::from_millis(10))
    }

    fn start(
        dataset: Arc<StaticDatasetSource>,
    ) -> (Classifier, UnboundedReceiver<(RequestContext, Verdict)>) {
        let (sink, rx) = ChannelSink::new();
        let classifier = Classifier::start(
            config(),
            dataset,
            Arc::new(MemoryBlobStore::new()),
            Arc::new(sink),
        )
        .unwrap();
        (classifier, rx)
    }

    fn dataset() -> Arc<StaticDatasetSource> {
        Arc::new(
            StaticDatasetSource::new()
                .with_set(PatternSetId::BLOCKLIST, &[JARM])
                .with_set(PatternSetId::TRACKERS, &["16b2e4c9bab"]),
        )
    }

    #[tokio::test]
    async fn test_blocklist_takes_precedence() {
        let (classifier, mut rx) = start(dataset());
        classifier.warm_up().await.unwrap();

        assert!(classifier.submit(RequestContext::new("c2.test", 3, JARM)).unwrap());
        let (ctx, verdict) = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap()
            .unwrap();

        assert_eq!(ctx.domain, "c2.test");
        assert!(verdict.is_blocklisted());
        assert!(verdict.is_tracker());
        assert_eq!(verdict.disposition(), Disposition::Block);
        classifier.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_empty_response_is_not_classified() {
        let (classifier, mut rx) = start(dataset());
        let zeros = "0".repeat(FINGERPRINT_LEN);

        assert!(!classifier.submit(RequestContext::new("quiet.test", 1, zeros)).unwrap());
        classifier.shutdown().await.unwrap();

        assert!(rx.try_recv().is_err());
        assert_eq!(classifier.stats().submitted(), 0);
    }

    #[tokio::test]
    async fn test_invalid_fingerprint_is_rejected() {
        let (classifier, _rx) = start(dataset());
        let err = classifier
            .submit(RequestContext::new("bad.test", 1, "not-a-fingerprint"))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidFingerprint);
    }

    #[tokio::test]
    async fn test_refresh_changes_verdicts() {
        let dataset = dataset();
        let (classifier, mut rx) = start(dataset.clone());

        classifier.submit(RequestContext::new("a.test", 1, JARM)).unwrap();
        let (_, before) = rx.recv().await.unwrap();
        assert!(before.is_blocklisted());

        dataset.replace(PatternSetId::BLOCKLIST, &["ffffffff"]);
        classifier.refresh().await.unwrap();

        classifier.submit(RequestContext::new("a.test", 2, JARM)).unwrap();
        let (_, after) = rx.recv().await.unwrap();
        assert!(!after.is_blocklisted());
        assert_eq!(after.disposition(), Disposition::Track);
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let (sink, _rx) = ChannelSink::new();
        let result = Classifier::start(
            config().with_max_batch_size(0),
            dataset(),
            Arc::new(MemoryBlobStore::new()),
            Arc::new(sink),
        );
        assert!(matches!(result, Err(Error::Config(_))));
    }
}
