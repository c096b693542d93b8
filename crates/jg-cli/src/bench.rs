use std::cmp::Ordering;
use std::sync::Arc;
use std::time::Instant;

use clap::ValueEnum;
use jg_core::{DenseAutomaton, Fingerprint, PatternSetId, FINGERPRINT_LEN};
use jg_runtime::{BackendFactory, BackendPreference, MatchBackend, RuntimeConfig};

use crate::snapshot;

#[derive(Debug, Clone, Copy, ValueEnum, PartialEq, Eq)]
pub enum BenchBackend {
    Cpu,
    Accelerator,
    Both,
}

pub struct BenchOptions {
    pub input_paths: Vec<String>,
    pub batch: usize,
    pub iterations: usize,
    pub backend: BenchBackend,
    pub workers: usize,
    pub hit_rate: f64,
    pub seed: u32,
}

struct BenchResult {
    name: String,
    batches: usize,
    batch_size: usize,
    total_ms: f64,
    p50_ms: f64,
    p95_ms: f64,
    p99_ms: f64,
    fingerprints_per_sec: u64,
    hit_pct: f64,
}

pub fn run(opts: BenchOptions) -> Result<(), String> {
    println!("============================================================");
    println!("JarmGuard Benchmark");
    println!("============================================================");

    let compiled = snapshot::compile_automaton(&opts.input_paths, false)?;
    println!(
        "Compiled {} list(s): {} patterns, {} states ({:.1} KB) in {:.1}ms",
        opts.input_paths.len(),
        compiled.stats.patterns_after - compiled.stats.patterns_skipped,
        compiled.stats.num_states,
        compiled.automaton.size_bytes() as f64 / 1024.0,
        compiled.stats.total_ms
    );

    let mut rand = create_rng(opts.seed);
    let batches: Vec<Arc<[Fingerprint]>> = (0..opts.iterations.max(1))
        .map(|_| generate_batch(&compiled.patterns, opts.batch.max(1), opts.hit_rate, &mut rand).map(Arc::from))
        .collect::<Result<_, String>>()?;

    let runtime = tokio::runtime::Runtime::new()
        .map_err(|e| format!("Failed to start runtime: {}", e))?;
    runtime.block_on(run_backends(&opts, Arc::new(compiled.automaton), &batches))
}

async fn run_backends(
    opts: &BenchOptions,
    automaton: Arc<DenseAutomaton>,
    batches: &[Arc<[Fingerprint]>],
) -> Result<(), String> {
    let config = RuntimeConfig::default()
        .with_backend(BackendPreference::Cpu)
        .with_worker_threads(opts.workers);
    let factory = BackendFactory::new(&config).map_err(|e| e.to_string())?;
    let set = PatternSetId::BLOCKLIST;

    let mut backends: Vec<Arc<dyn MatchBackend>> = Vec::new();
    if opts.backend != BenchBackend::Accelerator {
        backends.push(factory.cpu_backend(&set, automaton.clone()));
    }
    if opts.backend != BenchBackend::Cpu {
        match factory.accelerator_backend(&set, automaton.clone()).await {
            Ok(backend) => backends.push(backend),
            Err(e) if opts.backend == BenchBackend::Both => {
                println!("Accelerator unavailable ({}), benchmarking CPU only", e);
            }
            Err(e) => return Err(e.to_string()),
        }
    }

    let mut outputs: Vec<Vec<Vec<bool>>> = Vec::new();
    for backend in &backends {
        // Warmup
        backend
            .match_batch(batches[0].clone())
            .await
            .map_err(|e| e.to_string())?;

        println!("------------------------------------------------------------");
        let (result, output) = run_backend(backend.as_ref(), batches).await?;
        println!("{}", format_result(&result));
        outputs.push(output);
    }

    if let [first, second] = outputs.as_slice() {
        let disagreements: usize = first
            .iter()
            .zip(second)
            .map(|(a, b)| a.iter().zip(b).filter(|(x, y)| x != y).count())
            .sum();
        println!("------------------------------------------------------------");
        if disagreements > 0 {
            return Err(format!("Backends disagree on {} fingerprints", disagreements));
        }
        println!("Backends agree on all {} fingerprints", first.iter().map(Vec::len).sum::<usize>());
    }

    Ok(())
}

async fn run_backend(
    backend: &dyn MatchBackend,
    batches: &[Arc<[Fingerprint]>],
) -> Result<(BenchResult, Vec<Vec<bool>>), String> {
    let mut samples_ms = Vec::with_capacity(batches.len());
    let mut outputs = Vec::with_capacity(batches.len());
    let mut hits = 0usize;
    let mut total = 0usize;

    let start = Instant::now();
    for batch in batches {
        let batch_start = Instant::now();
        let results = backend
            .match_batch(batch.clone())
            .await
            .map_err(|e| e.to_string())?;
        samples_ms.push(batch_start.elapsed().as_secs_f64() * 1000.0);

        hits += results.iter().filter(|&&hit| hit).count();
        total += results.len();
        outputs.push(results);
    }
    let total_ms = start.elapsed().as_secs_f64() * 1000.0;

    samples_ms.sort_by(|a, b| a.partial_cmp(b).unwrap_or(Ordering::Equal));

    let result = BenchResult {
        name: backend.kind().to_string(),
        batches: batches.len(),
        batch_size: batches.first().map_or(0, |b| b.len()),
        total_ms,
        p50_ms: percentile(&samples_ms, 0.50),
        p95_ms: percentile(&samples_ms, 0.95),
        p99_ms: percentile(&samples_ms, 0.99),
        fingerprints_per_sec: if total_ms > 0.0 { (total as f64 / (total_ms / 1000.0)) as u64 } else { 0 },
        hit_pct: if total > 0 { (hits as f64 / total as f64) * 100.0 } else { 0.0 },
    };
    Ok((result, outputs))
}

fn format_result(result: &BenchResult) -> String {
    format!(
        "{}:\n  Batches: {} x {}\n  Total: {:.2} ms\n  P50: {:.3} ms/batch\n  P95: {:.3} ms/batch\n  P99: {:.3} ms/batch\n  Throughput: {} fingerprints/sec\n  Matched: {:.1}%",
        result.name,
        result.batches,
        result.batch_size,
        result.total_ms,
        result.p50_ms,
        result.p95_ms,
        result.p99_ms,
        result.fingerprints_per_sec,
        result.hit_pct,
    )
}

fn percentile(values: &[f64], p: f64) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let idx = ((values.len() as f64) * p).ceil() as usize;
    let idx = idx.saturating_sub(1).min(values.len() - 1);
    values[idx]
}

fn create_rng(seed: u32) -> impl FnMut() -> f64 {
    let mut state = seed;
    move || {
        state = state.wrapping_mul(1664525).wrapping_add(1013904223);
        (state as f64) / (u32::MAX as f64 + 1.0)
    }
}

fn rand_int(rand: &mut impl FnMut() -> f64, min: usize, max: usize) -> usize {
    let span = max - min + 1;
    min + ((rand() * span as f64) as usize).min(span - 1)
}

fn rand_hex(rand: &mut impl FnMut() -> f64, len: usize) -> String {
    const CHARS: &[u8] = b"0123456789abcdef";
    let mut out = String::with_capacity(len);
    for _ in 0..len {
        let idx = (rand() * CHARS.len() as f64).floor() as usize;
        out.push(CHARS[idx.min(CHARS.len() - 1)] as char);
    }
    out
}

/// Random fingerprints, a `hit_rate` share of which embed a known pattern.
fn generate_batch(
    patterns: &[String],
    size: usize,
    hit_rate: f64,
    rand: &mut impl FnMut() -> f64,
) -> Result<Vec<Fingerprint>, String> {
    let plantable: Vec<&String> = patterns
        .iter()
        .filter(|p| p.len() <= FINGERPRINT_LEN && p.bytes().all(|b| b.is_ascii_hexdigit()))
        .collect();

    (0..size)
        .map(|_| {
            let mut text = rand_hex(rand, FINGERPRINT_LEN);
            if !plantable.is_empty() && rand() < hit_rate {
                let pattern = plantable[rand_int(rand, 0, plantable.len() - 1)];
                let offset = rand_int(rand, 0, FINGERPRINT_LEN - pattern.len());
                text.replace_range(offset..offset + pattern.len(), pattern);
            }
            Fingerprint::parse(&text).map_err(|e| e.to_string())
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn planted_batches_contain_patterns() {
        let patterns = vec!["deadbeef".to_string(), "zz".to_string()];
        let mut rand = create_rng(7);
        let batch = generate_batch(&patterns, 50, 1.0, &mut rand).unwrap();
        assert_eq!(batch.len(), 50);
        assert!(batch.iter().all(|fp| fp.as_str().contains("deadbeef")));
    }

    #[test]
    fn percentile_picks_nearest_rank() {
        let values = [1.0, 2.0, 3.0, 4.0];
        assert_eq!(percentile(&values, 0.5), 2.0);
        assert_eq!(percentile(&values, 0.99), 4.0);
        assert_eq!(percentile(&[], 0.5), 0.0);
    }
}
