//! Pattern-set sources

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use jg_compiler::{optimize_patterns, parse_pattern_list};
use jg_core::PatternSetId;
use parking_lot::RwLock;

use crate::config::RuntimeConfig;
use crate::error::{Error, Result};

/// Default per-request timeout for remote lists.
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(30);

/// Supplies the raw patterns of a pattern set.
#[async_trait]
pub trait DatasetSource: Send + Sync {
    /// Deduplicated patterns for `set`, in first-seen order.
    async fn fetch(&self, set: &PatternSetId) -> Result<Vec<String>>;
}

/// Fetches each configured source (URL or local path) and concatenates them.
pub struct HttpDatasetSource {
    client: reqwest::Client,
    sources: HashMap<PatternSetId, Vec<String>>,
}

impl HttpDatasetSource {
    pub fn new(config: &RuntimeConfig) -> Result<Self> {
        Self::with_timeout(config, DEFAULT_FETCH_TIMEOUT)
    }

    pub fn with_timeout(config: &RuntimeConfig, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Config(format!("http client: {e}")))?;

        let sources = config
            .pattern_sets
            .iter()
            .map(|set| (set.id(), set.sources.clone()))
            .collect();

        Ok(Self { client, sources })
    }

    async fn fetch_one(&self, source: &str) -> Result<String> {
        if is_remote(source) {
            let response = self
                .client
                .get(source)
                .send()
                .await
                .and_then(reqwest::Response::error_for_status)
                .map_err(|e| Error::transient(format!("fetching {source}: {e}")))?;
            response
                .text()
                .await
                .map_err(|e| Error::transient(format!("reading {source}: {e}")))
        } else {
            tokio::fs::read_to_string(source)
                .await
                .map_err(|e| Error::io(format!("reading {source}"), e))
        }
    }
}

#[async_trait]
impl DatasetSource for HttpDatasetSource {
    async fn fetch(&self, set: &PatternSetId) -> Result<Vec<String>> {
        let sources = self
            .sources
            .get(set)
            .ok_or_else(|| Error::Config(format!("no sources configured for {set}")))?;

        let mut patterns = Vec::new();
        for source in sources {
            let text = self.fetch_one(source).await?;
            let parsed = parse_pattern_list(&text);
            log::debug!("Fetched {} patterns for {set} from {source}", parsed.len());
            patterns.extend(parsed);
        }

        let stats = optimize_patterns(&mut patterns);
        if stats.deduped > 0 {
            log::debug!("Removed {} duplicate patterns from {set}", stats.deduped);
        }
        Ok(patterns)
    }
}

fn is_remote(source: &str) -> bool {
    source.starts_with("http://") || source.starts_with("https://")
}

/// In-memory pattern sets.
#[derive(Default)]
pub struct StaticDatasetSource {
    sets: RwLock<HashMap<PatternSetId, Vec<String>>>,
    fetches: AtomicUsize,
}

impl StaticDatasetSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_set<S: AsRef<str>>(self, set: PatternSetId, patterns: &[S]) -> Self {
        self.replace(set, patterns);
        self
    }

    /// Swap in new contents; picked up by the next fetch.
    pub fn replace<S: AsRef<str>>(&self, set: PatternSetId, patterns: &[S]) {
        let patterns = patterns.iter().map(|p| p.as_ref().to_string()).collect();
        self.sets.write().insert(set, patterns);
    }

    /// Number of `fetch` calls served so far.
    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl DatasetSource for StaticDatasetSource {
    async fn fetch(&self, set: &PatternSetId) -> Result<Vec<String>> {
        self.fetches.fetch_add(1, Ordering::Relaxed);
        let mut patterns = self.sets.read().get(set).cloned().unwrap_or_default();
        optimize_patterns(&mut patterns);
        Ok(patterns)
    }
}
