//! Runtime configuration

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use jg_core::PatternSetId;
use serde::{Deserialize, Serialize};

use crate::backend::BackendPreference;
use crate::error::{Error, Result};

/// One named pattern set and the lists it is assembled from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatternSetConfig {
    pub name: String,
    /// URLs or local file paths
    #[serde(default)]
    pub sources: Vec<String>,
}

impl PatternSetConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            sources: Vec::new(),
        }
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.sources.push(source.into());
        self
    }

    pub fn id(&self) -> PatternSetId {
        PatternSetId::new(self.name.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    pub pattern_sets: Vec<PatternSetConfig>,
    pub backend: BackendPreference,
    pub max_batch_size: usize,
    pub max_wait_ms: u64,
    pub dispatch_timeout_ms: u64,
    /// 0 = available parallelism
    pub worker_threads: usize,
    /// In-memory store when unset
    pub cache_dir: Option<PathBuf>,
    /// Fingerprints the accelerator buffers hold before they are regrown
    pub max_gpu_batch: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            pattern_sets: vec![
                PatternSetConfig::new(PatternSetId::BLOCKLIST.as_str()),
                PatternSetConfig::new(PatternSetId::TRACKERS.as_str()),
            ],
            backend: BackendPreference::Auto,
            max_batch_size: 64,
            max_wait_ms: 25,
            dispatch_timeout_ms: 2000,
            worker_threads: 0,
            cache_dir: None,
            max_gpu_batch: 4096,
        }
    }
}

impl RuntimeConfig {
    /// Load and validate a JSON config file. Missing fields take defaults.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| Error::io(format!("reading {}", path.display()), e))?;
        let config: Self = serde_json::from_str(&text)
            .map_err(|e| Error::Config(format!("{}: {e}", path.display())))?;
        config.validate()?;
        Ok(config)
    }

    pub fn with_pattern_sets(mut self, sets: Vec<PatternSetConfig>) -> Self {
        self.pattern_sets = sets;
        self
    }

    pub fn with_backend(mut self, backend: BackendPreference) -> Self {
        self.backend = backend;
        self
    }

    pub fn with_max_batch_size(mut self, size: usize) -> Self {
        self.max_batch_size = size;
        self
    }

    pub fn with_max_wait(mut self, wait: Duration) -> Self {
        self.max_wait_ms = wait.as_millis() as u64;
        self
    }

    pub fn with_dispatch_timeout(mut self, timeout: Duration) -> Self {
        self.dispatch_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn with_worker_threads(mut self, threads: usize) -> Self {
        self.worker_threads = threads;
        self
    }

    pub fn with_cache_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.cache_dir = Some(dir.as_ref().to_path_buf());
        self
    }

    pub fn max_wait(&self) -> Duration {
        Duration::from_millis(self.max_wait_ms)
    }

    pub fn dispatch_timeout(&self) -> Duration {
        Duration::from_millis(self.dispatch_timeout_ms)
    }

    pub fn pattern_set_ids(&self) -> Vec<PatternSetId> {
        self.pattern_sets.iter().map(PatternSetConfig::id).collect()
    }

    pub fn pattern_set(&self, id: &PatternSetId) -> Option<&PatternSetConfig> {
        self.pattern_sets.iter().find(|s| s.name == id.as_str())
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_batch_size == 0 {
            return Err(Error::Config("max_batch_size must be positive".into()));
        }
        if self.max_wait_ms == 0 {
            return Err(Error::Config("max_wait_ms must be positive".into()));
        }
        if self.dispatch_timeout_ms == 0 {
            return Err(Error::Config("dispatch_timeout_ms must be positive".into()));
        }
        if self.max_gpu_batch == 0 {
            return Err(Error::Config("max_gpu_batch must be positive".into()));
        }
        if self.pattern_sets.is_empty() {
            return Err(Error::Config("at least one pattern set is required".into()));
        }

        let mut seen = HashSet::new();
        for set in &self.pattern_sets {
            if set.name.trim().is_empty() {
                return Err(Error::Config("pattern set name is empty".into()));
            }
            if !seen.insert(set.name.as_str()) {
                return Err(Error::Config(format!("duplicate pattern set {:?}", set.name)));
            }
        }
        Ok(())
    }
}
