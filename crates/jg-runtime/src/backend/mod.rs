//! Matching backends
//!
//! Both backends walk the same dense automaton and report, per fingerprint,
//! whether any visited state was accepting. A backend instance is bound to
//! one automaton generation of one pattern set; a refresh prepares a new
//! instance and drops the old one once in-flight batches release it.

use std::sync::Arc;

use async_trait::async_trait;
use jg_core::{CpuMatcher, DenseAutomaton, Fingerprint, PatternSetId};
use serde::{Deserialize, Serialize};

use crate::config::RuntimeConfig;
use crate::error::{Error, Result};

mod cpu;
#[cfg(feature = "gpu")]
mod gpu;

pub use cpu::CpuBackend;
#[cfg(feature = "gpu")]
pub use gpu::{GpuBackend, GpuContext};

/// Which backend the factory should hand out.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendPreference {
    /// Accelerator if one can be acquired, CPU otherwise
    #[default]
    Auto,
    Accelerator,
    Cpu,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    Accelerator,
    Cpu,
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BackendKind::Accelerator => f.write_str("accelerator"),
            BackendKind::Cpu => f.write_str("cpu"),
        }
    }
}

/// A backend prepared for one automaton generation.
#[async_trait]
pub trait MatchBackend: Send + Sync {
    fn kind(&self) -> BackendKind;

    fn pattern_set(&self) -> &PatternSetId;

    /// Match a batch; `result[i]` corresponds to `batch[i]`.
    async fn match_batch(&self, batch: Arc<[Fingerprint]>) -> Result<Vec<bool>>;
}

/// Prepares backends for freshly built or loaded automata.
///
/// The CPU worker pool and the accelerator device are shared by every
/// pattern set; per-set pipelines and table buffers are not.
pub struct BackendFactory {
    preference: BackendPreference,
    cpu: Arc<CpuMatcher>,
    #[cfg(feature = "gpu")]
    gpu: tokio::sync::OnceCell<std::result::Result<Arc<GpuContext>, String>>,
    #[cfg_attr(not(feature = "gpu"), allow(dead_code))]
    max_gpu_batch: usize,
}

impl BackendFactory {
    pub fn new(config: &RuntimeConfig) -> Result<Self> {
        let cpu = CpuMatcher::new(config.worker_threads)
            .map_err(|e| Error::Config(format!("worker pool: {e}")))?;

        Ok(Self {
            preference: config.backend,
            cpu: Arc::new(cpu),
            #[cfg(feature = "gpu")]
            gpu: tokio::sync::OnceCell::new(),
            max_gpu_batch: config.max_gpu_batch,
        })
    }

    pub fn preference(&self) -> BackendPreference {
        self.preference
    }

    /// Prepare the preferred backend for `automaton`.
    ///
    /// Under `Auto`, a capability failure falls back to the CPU backend; any
    /// other error propagates.
    pub async fn prepare(
        &self,
        set: &PatternSetId,
        automaton: Arc<DenseAutomaton>,
    ) -> Result<Arc<dyn MatchBackend>> {
        match self.preference {
            BackendPreference::Cpu => Ok(self.cpu_backend(set, automaton)),
            BackendPreference::Accelerator => self.accelerator_backend(set, automaton).await,
            BackendPreference::Auto => {
                match self.accelerator_backend(set, automaton.clone()).await {
                    Ok(backend) => Ok(backend),
                    Err(e) if e.triggers_fallback() => {
                        log::warn!("{e}; matching {set} on the CPU backend");
                        Ok(self.cpu_backend(set, automaton))
                    }
                    Err(e) => Err(e),
                }
            }
        }
    }

    pub fn cpu_backend(
        &self,
        set: &PatternSetId,
        automaton: Arc<DenseAutomaton>,
    ) -> Arc<dyn MatchBackend> {
        Arc::new(CpuBackend::new(set.clone(), automaton, self.cpu.clone()))
    }

    #[cfg(feature = "gpu")]
    pub async fn accelerator_backend(
        &self,
        set: &PatternSetId,
        automaton: Arc<DenseAutomaton>,
    ) -> Result<Arc<dyn MatchBackend>> {
        let context = self
            .gpu
            .get_or_init(|| async {
                GpuContext::new()
                    .await
                    .map(Arc::new)
                    .map_err(|e| e.to_string())
            })
            .await
            .clone()
            .map_err(Error::CapabilityUnavailable)?;

        let backend =
            GpuBackend::new(context, set.clone(), &automaton, self.max_gpu_batch).await?;
        Ok(Arc::new(backend))
    }

    #[cfg(not(feature = "gpu"))]
    pub async fn accelerator_backend(
        &self,
        _set: &PatternSetId,
        _automaton: Arc<DenseAutomaton>,
    ) -> Result<Arc<dyn MatchBackend>> {
        Err(Error::CapabilityUnavailable(
            "built without the `gpu` feature".into(),
        ))
    }
}
