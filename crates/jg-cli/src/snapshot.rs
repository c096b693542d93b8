use std::fs;
use std::path::Path;
use std::time::Instant;

use jg_compiler::{build_automaton, build_snapshot, optimize_patterns, parse_pattern_list, pattern_list_digest};
use jg_core::snapshot::Snapshot;
use jg_core::DenseAutomaton;

#[derive(Debug, Clone)]
pub struct CompileStats {
    pub lines: usize,
    pub patterns_before: usize,
    pub patterns_after: usize,
    pub patterns_deduped: usize,
    pub patterns_skipped: usize,
    pub num_states: usize,
    pub build_id: u32,
    pub total_ms: f64,
}

pub struct Compiled {
    pub automaton: DenseAutomaton,
    pub patterns: Vec<String>,
    pub stats: CompileStats,
}

/// Read, concatenate and dedupe pattern lists.
pub fn read_pattern_lists(inputs: &[String], verbose: bool) -> Result<(Vec<String>, usize), String> {
    if inputs.is_empty() {
        return Err("No input files specified".to_string());
    }

    let mut patterns = Vec::new();
    let mut total_lines = 0usize;

    for (list_id, path) in inputs.iter().enumerate() {
        let content = fs::read_to_string(path)
            .map_err(|e| format!("Failed to read '{}': {}", path, e))?;

        let line_count = content.lines().count();
        total_lines += line_count;
        let parsed = parse_pattern_list(&content);

        if verbose {
            println!(
                "  [{}] {} - {} lines, {} patterns",
                list_id,
                Path::new(path).file_name().unwrap_or_default().to_string_lossy(),
                line_count,
                parsed.len()
            );
        }

        patterns.extend(parsed);
    }

    Ok((patterns, total_lines))
}

pub fn compile_automaton(inputs: &[String], verbose: bool) -> Result<Compiled, String> {
    let start = Instant::now();
    let (mut patterns, lines) = read_pattern_lists(inputs, verbose)?;

    let optimize_stats = optimize_patterns(&mut patterns);
    let output = build_automaton(&patterns).map_err(|e| format!("Build failed: {}", e))?;

    if verbose {
        for warning in &output.warnings {
            println!("  skipped #{} {:?}: {:?}", warning.index, warning.pattern, warning.reason);
        }
    }

    let stats = CompileStats {
        lines,
        patterns_before: optimize_stats.before,
        patterns_after: optimize_stats.after,
        patterns_deduped: optimize_stats.deduped,
        patterns_skipped: output.stats.skipped,
        num_states: output.stats.num_states,
        build_id: pattern_list_digest(&patterns),
        total_ms: start.elapsed().as_secs_f64() * 1000.0,
    };

    Ok(Compiled {
        automaton: output.automaton,
        patterns,
        stats,
    })
}

pub fn compile_snapshot_bytes(inputs: &[String], verbose: bool) -> Result<(Vec<u8>, CompileStats), String> {
    let compiled = compile_automaton(inputs, verbose)?;
    let accepted = compiled.stats.patterns_after - compiled.stats.patterns_skipped;
    let bytes = build_snapshot(&compiled.automaton, accepted, compiled.stats.build_id);

    Snapshot::load(&bytes)
        .map_err(|e| format!("Generated snapshot failed validation: {}", e))?;

    Ok((bytes, compiled.stats))
}

pub fn write_snapshot(path: &Path, bytes: &[u8]) -> Result<(), String> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| format!("Failed to create '{}': {}", parent.display(), e))?;
    }
    fs::write(path, bytes)
        .map_err(|e| format!("Failed to write '{}': {}", path.display(), e))?;
    Ok(())
}

pub fn read_snapshot(path: &Path) -> Result<Vec<u8>, String> {
    fs::read(path)
        .map_err(|e| format!("Failed to read '{}': {}", path.display(), e))
}

pub fn load_automaton(path: &Path) -> Result<DenseAutomaton, String> {
    let bytes = read_snapshot(path)?;
    let snapshot = Snapshot::load(&bytes)
        .map_err(|e| format!("Invalid snapshot: {}", e))?;
    snapshot
        .automaton()
        .map_err(|e| format!("Invalid snapshot: {}", e))
}
