//! JarmGuard CLI
//!
//! Compiles fingerprint pattern lists into JGA snapshots, inspects them,
//! and drives the matching backends from the command line.

use std::collections::HashMap;
use std::io::{self, BufRead};
use std::path::Path;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use env_logger::Env;

use jg_core::snapshot::{Snapshot, SnapshotFlags};
use jg_core::{CpuMatcher, Fingerprint, RequestContext};
use jg_runtime::{ChannelSink, Classifier, RuntimeConfig};

mod bench;
mod snapshot;

use bench::{BenchBackend, BenchOptions};

#[derive(Parser)]
#[command(name = "jarmguard")]
#[command(about = "JARM fingerprint pattern compiler and matcher")]
struct Cli {
    /// Log filter when RUST_LOG is unset
    #[arg(long, global = true, default_value = "info")]
    log: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compile pattern lists into a JGA snapshot
    Compile {
        /// Input pattern list files
        #[arg(short, long, required = true)]
        input: Vec<String>,

        /// Output snapshot file
        #[arg(short, long, default_value = "snapshot.jga")]
        output: String,

        /// Verbose output
        #[arg(short, long)]
        verbose: bool,
    },

    /// Validate a JGA snapshot
    Validate {
        /// Snapshot file to validate
        #[arg(short, long)]
        input: String,
    },

    /// Dump snapshot info
    Info {
        /// Snapshot file to inspect
        #[arg(short, long)]
        input: String,

        /// Print as JSON
        #[arg(long)]
        json: bool,
    },

    /// Match fingerprints against a snapshot
    Match {
        /// Snapshot file
        #[arg(short, long)]
        snapshot: String,

        /// Fingerprints to match (one per stdin line when omitted)
        fingerprints: Vec<String>,
    },

    /// Benchmark the matching backends
    Bench {
        /// Input pattern list files
        #[arg(short, long, required = true)]
        input: Vec<String>,

        /// Fingerprints per batch
        #[arg(long, default_value_t = 1024)]
        batch: usize,

        /// Batches per backend
        #[arg(long, default_value_t = 20)]
        iterations: usize,

        /// Backend(s) to run
        #[arg(long, value_enum, default_value = "both")]
        backend: BenchBackend,

        /// CPU worker threads (0 = available parallelism)
        #[arg(long, default_value_t = 0)]
        workers: usize,

        /// Share of fingerprints that embed a known pattern
        #[arg(long, default_value_t = 0.1)]
        hit_rate: f64,

        /// Seed for the fingerprint generator
        #[arg(long, default_value_t = 12345)]
        seed: u32,
    },

    /// Classify `domain fingerprint` lines from stdin
    Classify {
        /// Runtime configuration (JSON)
        #[arg(short, long)]
        config: Option<String>,
    },
}

fn main() {
    let cli = Cli::parse();
    env_logger::Builder::from_env(Env::default().default_filter_or(cli.log.as_str())).init();

    let result = match cli.command {
        Commands::Compile {
            input,
            output,
            verbose,
        } => cmd_compile(&input, &output, verbose),
        Commands::Validate { input } => cmd_validate(&input),
        Commands::Info { input, json } => cmd_info(&input, json),
        Commands::Match {
            snapshot,
            fingerprints,
        } => cmd_match(&snapshot, fingerprints),
        Commands::Bench {
            input,
            batch,
            iterations,
            backend,
            workers,
            hit_rate,
            seed,
        } => bench::run(BenchOptions {
            input_paths: input,
            batch,
            iterations,
            backend,
            workers,
            hit_rate,
            seed,
        }),
        Commands::Classify { config } => cmd_classify(config.as_deref()),
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

fn cmd_compile(inputs: &[String], output: &str, verbose: bool) -> Result<(), String> {
    let (bytes, stats) = snapshot::compile_snapshot_bytes(inputs, verbose)?;
    snapshot::write_snapshot(Path::new(output), &bytes)?;

    println!("Compiled {} pattern lists to '{}'", inputs.len(), output);
    println!("  Lines:     {}", stats.lines);
    println!(
        "  Patterns:  {} -> {} (dedupe removed {}, skipped {})",
        stats.patterns_before, stats.patterns_after, stats.patterns_deduped, stats.patterns_skipped
    );
    println!("  States:    {}", stats.num_states);
    println!("  Build id:  {:08x}", stats.build_id);
    println!("  Size:      {} bytes ({:.1} KB)", bytes.len(), bytes.len() as f64 / 1024.0);
    println!("  Time:      {:.1}ms", stats.total_ms);

    Ok(())
}

fn cmd_validate(input: &str) -> Result<(), String> {
    let bytes = snapshot::read_snapshot(Path::new(input))?;
    let snapshot = Snapshot::load(&bytes)
        .map_err(|e| format!("Invalid snapshot: {}", e))?;
    let automaton = snapshot
        .automaton()
        .map_err(|e| format!("Invalid snapshot: {}", e))?;

    println!("Snapshot '{}' is valid", input);
    println!("  Version:     {}", snapshot.version);
    println!("  Sections:    {}", snapshot.section_count());
    println!("  States:      {}", automaton.num_states());
    println!("  Size:        {} bytes", bytes.len());

    Ok(())
}

fn cmd_info(input: &str, json: bool) -> Result<(), String> {
    let bytes = snapshot::read_snapshot(Path::new(input))?;
    let snapshot = Snapshot::load(&bytes)
        .map_err(|e| format!("Invalid snapshot: {}", e))?;
    let meta = snapshot
        .meta()
        .map_err(|e| format!("Invalid snapshot: {}", e))?;
    let automaton = snapshot
        .automaton()
        .map_err(|e| format!("Invalid snapshot: {}", e))?;

    if json {
        let info = serde_json::json!({
            "path": input,
            "version": snapshot.version,
            "build_id": format!("{:08x}", snapshot.build_id),
            "checksummed": snapshot.flags.contains(SnapshotFlags::HAS_CRC32),
            "size_bytes": bytes.len(),
            "num_states": meta.num_states,
            "accepting_states": automaton.accepting_states(),
            "alphabet_size": meta.alphabet_size,
            "fingerprint_len": meta.fingerprint_len,
            "pattern_count": meta.pattern_count,
        });
        let text = serde_json::to_string_pretty(&info)
            .map_err(|e| format!("Failed to encode info: {}", e))?;
        println!("{}", text);
        return Ok(());
    }

    println!("Snapshot: {}", input);
    println!("  Magic:       JGA1");
    println!("  Version:     {}", snapshot.version);
    println!("  Build id:    {:08x}", snapshot.build_id);
    println!("  Flags:       {:?}", snapshot.flags);
    println!("  Sections:    {}", snapshot.section_count());
    println!("  Total size:  {} bytes ({:.1} KB)", bytes.len(), bytes.len() as f64 / 1024.0);
    println!();

    println!("Automaton:");
    println!("  Patterns:    {}", meta.pattern_count);
    println!("  States:      {} ({} accepting)", meta.num_states, automaton.accepting_states());
    println!("  Alphabet:    {}", meta.alphabet_size);
    println!("  Input len:   {}", meta.fingerprint_len);
    println!("  Table:       {:.1} KB", automaton.size_bytes() as f64 / 1024.0);

    Ok(())
}

fn read_stdin_lines() -> Result<Vec<String>, String> {
    io::stdin()
        .lock()
        .lines()
        .map(|line| line.map_err(|e| format!("Failed to read stdin: {}", e)))
        .filter(|line| !matches!(line, Ok(l) if l.trim().is_empty()))
        .collect()
}

fn cmd_match(snapshot_path: &str, fingerprints: Vec<String>) -> Result<(), String> {
    let automaton = snapshot::load_automaton(Path::new(snapshot_path))?;
    let texts = if fingerprints.is_empty() {
        read_stdin_lines()?
    } else {
        fingerprints
    };

    let batch = texts
        .iter()
        .map(|text| Fingerprint::parse(text.trim()).map_err(|e| format!("'{}': {}", text.trim(), e)))
        .collect::<Result<Vec<_>, String>>()?;

    let matcher = CpuMatcher::new(0).map_err(|e| e.to_string())?;
    let results = matcher.match_batch(&automaton, &batch);

    for (fingerprint, matched) in batch.iter().zip(results) {
        println!("{}\t{}", fingerprint, if matched { "match" } else { "no-match" });
    }

    Ok(())
}

fn cmd_classify(config_path: Option<&str>) -> Result<(), String> {
    let config = match config_path {
        Some(path) => RuntimeConfig::from_json_file(path).map_err(|e| e.to_string())?,
        None => RuntimeConfig::default(),
    };

    let mut requests = Vec::new();
    for (tab_id, line) in read_stdin_lines()?.iter().enumerate() {
        let mut fields = line.split_whitespace();
        match (fields.next(), fields.next()) {
            (Some(domain), Some(fingerprint)) => {
                requests.push(RequestContext::new(domain, tab_id as i32, fingerprint))
            }
            _ => return Err(format!("Expected 'domain fingerprint', got '{}'", line.trim())),
        }
    }

    let runtime = tokio::runtime::Runtime::new()
        .map_err(|e| format!("Failed to start runtime: {}", e))?;

    runtime.block_on(async move {
        let (sink, mut rx) = ChannelSink::new();
        let classifier =
            Classifier::from_config(config, Arc::new(sink)).map_err(|e| e.to_string())?;
        classifier.warm_up().await.map_err(|e| e.to_string())?;

        let mut pending = Vec::with_capacity(requests.len());
        for request in requests {
            let domain = request.domain.clone();
            let tab_id = request.tab_id;
            let queued = classifier.submit(request).map_err(|e| e.to_string())?;
            pending.push((domain, tab_id, queued));
        }
        classifier.shutdown().await.map_err(|e| e.to_string())?;

        let mut verdicts = HashMap::new();
        while let Ok((context, verdict)) = rx.try_recv() {
            verdicts.insert(context.tab_id, verdict);
        }

        for (domain, tab_id, queued) in pending {
            let label = match verdicts.get(&tab_id) {
                Some(verdict) => format!("{:?}", verdict.disposition()).to_lowercase(),
                None if queued => "unclassified".to_string(),
                None => "no-fingerprint".to_string(),
            };
            println!("{}\t{}", domain, label);
        }

        let stats = classifier.stats();
        log::info!(
            "Classified {} requests in {} batches ({} failed)",
            stats.requests_matched(),
            stats.batches_flushed(),
            stats.batches_failed()
        );
        Ok(())
    })
}
