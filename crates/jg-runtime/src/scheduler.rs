//! Batch Scheduler
//!
//! Requests accumulate on a single task that owns the pending list. A batch
//! is flushed as soon as it reaches `max_batch_size`, or `max_wait` after the
//! first request of the current window, whichever comes first. The pending
//! list is swapped out before the batch is matched, so requests arriving
//! during a match start the next window.
//!
//! Each flushed batch runs on its own task and is matched against every
//! pattern set concurrently. If any set fails, no request in the batch gets
//! a verdict.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use jg_core::{Fingerprint, PatternSetId, RequestContext, Verdict};
use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::Instant;

use crate::config::RuntimeConfig;
use crate::error::{Error, Result};
use crate::manager::AutomatonManager;
use crate::sink::VerdictSink;

/// One fingerprint plus the caller context it came with.
#[derive(Debug, Clone)]
pub struct MatchRequest {
    pub context: RequestContext,
    pub fingerprint: Fingerprint,
}

impl MatchRequest {
    /// Validate the fingerprint carried in `context`.
    pub fn new(context: RequestContext) -> Result<Self> {
        let fingerprint = Fingerprint::parse(&context.fingerprint)?;
        Ok(Self {
            context,
            fingerprint,
        })
    }
}

#[derive(Debug, Clone, Copy)]
pub struct SchedulerConfig {
    pub max_batch_size: usize,
    pub max_wait: Duration,
    pub dispatch_timeout: Duration,
}

impl From<&RuntimeConfig> for SchedulerConfig {
    fn from(config: &RuntimeConfig) -> Self {
        Self {
            max_batch_size: config.max_batch_size,
            max_wait: config.max_wait(),
            dispatch_timeout: config.dispatch_timeout(),
        }
    }
}

#[derive(Debug, Default)]
pub struct SchedulerStats {
    submitted: AtomicU64,
    batches_flushed: AtomicU64,
    batches_failed: AtomicU64,
    requests_matched: AtomicU64,
    last_batch_size: AtomicU64,
}

impl SchedulerStats {
    pub fn submitted(&self) -> u64 {
        self.submitted.load(Ordering::Relaxed)
    }

    pub fn batches_flushed(&self) -> u64 {
        self.batches_flushed.load(Ordering::Relaxed)
    }

    /// Flushed batches whose results were withheld.
    pub fn batches_failed(&self) -> u64 {
        self.batches_failed.load(Ordering::Relaxed)
    }

    /// Requests that received a verdict.
    pub fn requests_matched(&self) -> u64 {
        self.requests_matched.load(Ordering::Relaxed)
    }

    pub fn last_batch_size(&self) -> u64 {
        self.last_batch_size.load(Ordering::Relaxed)
    }
}

enum Command {
    Submit(MatchRequest),
    Shutdown(oneshot::Sender<()>),
}

pub struct BatchScheduler {
    tx: mpsc::UnboundedSender<Command>,
    stats: Arc<SchedulerStats>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl BatchScheduler {
    /// Spawn the accumulation loop. Must be called within a tokio runtime.
    pub fn start(
        config: SchedulerConfig,
        manager: Arc<AutomatonManager>,
        sink: Arc<dyn VerdictSink>,
    ) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let stats = Arc::new(SchedulerStats::default());
        let dispatcher = Arc::new(Dispatcher {
            manager,
            sink,
            dispatch_timeout: config.dispatch_timeout,
            stats: stats.clone(),
        });

        let task = tokio::spawn(run(rx, config, dispatcher));
        Self {
            tx,
            stats,
            task: Mutex::new(Some(task)),
        }
    }

    /// Enqueue a request. Never waits.
    pub fn submit(&self, request: MatchRequest) -> Result<()> {
        self.tx
            .send(Command::Submit(request))
            .map_err(|_| Error::SchedulerClosed)?;
        self.stats.submitted.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    pub fn stats(&self) -> &SchedulerStats {
        &self.stats
    }

    /// Flush whatever is pending, wait for every in-flight batch, then stop.
    pub async fn shutdown(&self) -> Result<()> {
        let (ack_tx, ack_rx) = oneshot::channel();
        self.tx
            .send(Command::Shutdown(ack_tx))
            .map_err(|_| Error::SchedulerClosed)?;
        let _ = ack_rx.await;

        let task = self.task.lock().take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                log::error!("Scheduler task ended abnormally: {e}");
            }
        }
        Ok(())
    }
}

async fn run(
    mut rx: mpsc::UnboundedReceiver<Command>,
    config: SchedulerConfig,
    dispatcher: Arc<Dispatcher>,
) {
    let max_batch = config.max_batch_size.max(1);
    let mut pending: Vec<MatchRequest> = Vec::with_capacity(max_batch);
    let mut deadline: Option<Instant> = None;
    let mut in_flight = JoinSet::new();

    loop {
        tokio::select! {
            command = rx.recv() => match command {
                Some(Command::Submit(request)) => {
                    if pending.is_empty() {
                        deadline = Some(Instant::now() + config.max_wait);
                    }
                    pending.push(request);
                    if pending.len() >= max_batch {
                        deadline = None;
                        flush(&mut pending, max_batch, &mut in_flight, &dispatcher);
                    }
                }
                Some(Command::Shutdown(ack)) => {
                    drain(&mut pending, &mut in_flight, &dispatcher).await;
                    let _ = ack.send(());
                    return;
                }
                None => {
                    drain(&mut pending, &mut in_flight, &dispatcher).await;
                    return;
                }
            },
            _ = wait_until(deadline) => {
                deadline = None;
                flush(&mut pending, max_batch, &mut in_flight, &dispatcher);
            }
            Some(joined) = in_flight.join_next(), if !in_flight.is_empty() => {
                if let Err(e) = joined {
                    log::error!("Batch task ended abnormally: {e}");
                }
            }
        }
    }
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

fn flush(
    pending: &mut Vec<MatchRequest>,
    max_batch: usize,
    in_flight: &mut JoinSet<()>,
    dispatcher: &Arc<Dispatcher>,
) {
    if pending.is_empty() {
        return;
    }
    let batch = std::mem::replace(pending, Vec::with_capacity(max_batch));
    let dispatcher = dispatcher.clone();
    in_flight.spawn(async move { dispatcher.dispatch(batch).await });
}

async fn drain(
    pending: &mut Vec<MatchRequest>,
    in_flight: &mut JoinSet<()>,
    dispatcher: &Arc<Dispatcher>,
) {
    flush(pending, 0, in_flight, dispatcher);
    while let Some(joined) = in_flight.join_next().await {
        if let Err(e) = joined {
            log::error!("Batch task ended abnormally: {e}");
        }
    }
}

struct Dispatcher {
    manager: Arc<AutomatonManager>,
    sink: Arc<dyn VerdictSink>,
    dispatch_timeout: Duration,
    stats: Arc<SchedulerStats>,
}

impl Dispatcher {
    async fn dispatch(&self, batch: Vec<MatchRequest>) {
        let size = batch.len();
        let (contexts, fingerprints): (Vec<_>, Vec<_>) = batch
            .into_iter()
            .map(|request| (request.context, request.fingerprint))
            .unzip();
        let fingerprints: Arc<[Fingerprint]> = fingerprints.into();

        let sets = self.manager.sets();
        let outcomes = join_all(sets.iter().map(|set| self.match_set(set, fingerprints.clone()))).await;

        self.stats.batches_flushed.fetch_add(1, Ordering::Relaxed);
        self.stats.last_batch_size.store(size as u64, Ordering::Relaxed);

        let mut columns = Vec::with_capacity(sets.len());
        let mut failed = false;
        for (set, outcome) in sets.iter().zip(outcomes) {
            match outcome {
                Ok(results) => columns.push((set, results)),
                Err(e) => {
                    log::warn!("Withholding batch of {size}: {set} failed: {e}");
                    failed = true;
                }
            }
        }
        if failed {
            self.stats.batches_failed.fetch_add(1, Ordering::Relaxed);
            return;
        }

        self.stats.requests_matched.fetch_add(size as u64, Ordering::Relaxed);
        for (index, context) in contexts.into_iter().enumerate() {
            let mut verdict = Verdict::new();
            for (set, results) in &columns {
                verdict.push((*set).clone(), results[index]);
            }
            self.sink.deliver(context, verdict);
        }
    }

    async fn match_set(&self, set: &PatternSetId, batch: Arc<[Fingerprint]>) -> Result<Vec<bool>> {
        let resident = self.manager.ensure_ready(set).await?;

        let expected = batch.len();
        let results = tokio::time::timeout(self.dispatch_timeout, resident.backend.match_batch(batch))
            .await
            .map_err(|_| {
                Error::dispatch(set, format!("no result within {:?}", self.dispatch_timeout))
            })??;

        if results.len() != expected {
            return Err(Error::dispatch(
                set,
                format!("{} results for {expected} inputs", results.len()),
            ));
        }
        Ok(results)
    }
}
