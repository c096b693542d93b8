use std::time::{Duration, Instant};

use jg_core::automaton::{AutomatonError, DenseAutomaton, MAX_STATES};
use jg_core::fingerprint::{encode_symbols, FingerprintError, ALPHABET_SIZE, FINGERPRINT_LEN};
use jg_core::hash::{crc32, Crc32};
use jg_core::snapshot::{
    align_offset, encode_u32_array, header, meta, section_entry, write_u16_le, write_u32_le,
    SectionId, SnapshotFlags, HEADER_SIZE, JGA_MAGIC, JGA_VERSION, META_SIZE, SECTION_ENTRY_SIZE,
};

use crate::trie::{Trie, ROOT};

/// Error type for automaton construction.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BuildError {
    #[error("Pattern set contains no valid patterns")]
    EmptyPatternSet,
    #[error("Automaton exceeds {limit} states")]
    TooManyStates { limit: usize },
    #[error("Built automaton is invalid: {0}")]
    Automaton(#[from] AutomatonError),
}

/// Why a pattern was skipped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WarningReason {
    Empty,
    InvalidSymbol { position: usize, found: char },
}

/// A pattern that was skipped during construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatternWarning {
    /// Index of the pattern in the input sequence
    pub index: usize,
    pub pattern: String,
    pub reason: WarningReason,
}

#[derive(Debug, Clone, Copy)]
pub struct BuildStats {
    pub accepted: usize,
    pub skipped: usize,
    pub num_states: usize,
    pub accepting_states: usize,
    pub elapsed: Duration,
}

#[derive(Debug)]
pub struct BuildOutput {
    pub automaton: DenseAutomaton,
    pub warnings: Vec<PatternWarning>,
    pub stats: BuildStats,
}

/// Build a dense automaton from a pattern list.
///
/// Deterministic: the same input always yields bit-identical tables.
/// Empty or malformed patterns are skipped and reported as warnings.
pub fn build_automaton<S: AsRef<str>>(patterns: &[S]) -> Result<BuildOutput, BuildError> {
    build_automaton_with_limit(patterns, MAX_STATES)
}

/// As [`build_automaton`], with an explicit upper bound on the state count.
pub fn build_automaton_with_limit<S: AsRef<str>>(
    patterns: &[S],
    max_states: usize,
) -> Result<BuildOutput, BuildError> {
    let start = Instant::now();
    let limit = max_states.min(MAX_STATES);

    let mut trie = Trie::with_capacity_limit(limit);
    let mut warnings = Vec::new();
    let mut accepted = 0usize;

    for (index, pattern) in patterns.iter().enumerate() {
        let pattern = pattern.as_ref();
        let symbols = match validate_pattern(pattern) {
            Ok(symbols) => symbols,
            Err(reason) => {
                log::warn!("Skipping pattern #{index} {pattern:?}: {reason:?}");
                warnings.push(PatternWarning {
                    index,
                    pattern: pattern.to_string(),
                    reason,
                });
                continue;
            }
        };

        trie.insert(&symbols)
            .map_err(|e| BuildError::TooManyStates { limit: e.limit })?;
        accepted += 1;
    }

    if accepted == 0 {
        return Err(BuildError::EmptyPatternSet);
    }

    let order = trie.build_failure_links();
    let automaton = materialize(&trie, &order)?;

    let stats = BuildStats {
        accepted,
        skipped: warnings.len(),
        num_states: automaton.num_states(),
        accepting_states: automaton.accepting_states(),
        elapsed: start.elapsed(),
    };

    log::info!(
        "Built automaton: {} patterns ({} skipped), {} states, {:.1}ms",
        stats.accepted,
        stats.skipped,
        stats.num_states,
        stats.elapsed.as_secs_f64() * 1000.0
    );

    Ok(BuildOutput {
        automaton,
        warnings,
        stats,
    })
}

fn validate_pattern(pattern: &str) -> Result<Vec<u8>, WarningReason> {
    if pattern.is_empty() {
        return Err(WarningReason::Empty);
    }
    encode_symbols(pattern).map_err(|e| match e {
        FingerprintError::InvalidSymbol { position, found } => {
            WarningReason::InvalidSymbol { position, found }
        }
        FingerprintError::InvalidLength { .. } => WarningReason::Empty,
    })
}

/// Resolve every `(state, symbol)` cell into a flat table.
///
/// Rows are filled in BFS order, so a missing edge can copy the already
/// resolved cell of the node's failure link. That is the same answer as
/// walking the failure chain until some node has the edge, falling back to
/// the root.
fn materialize(trie: &Trie, order: &[u32]) -> Result<DenseAutomaton, BuildError> {
    let num_states = trie.len();
    let mut transitions = vec![0u32; num_states * ALPHABET_SIZE];
    let mut output = vec![0u32; num_states];

    for &node in order {
        let row = node as usize * ALPHABET_SIZE;
        let fail_row = trie.fail(node) as usize * ALPHABET_SIZE;

        for symbol in 0..ALPHABET_SIZE {
            transitions[row + symbol] = match trie.child(node, symbol as u8) {
                Some(child) => child,
                None if node == ROOT => ROOT,
                None => transitions[fail_row + symbol],
            };
        }

        output[node as usize] = u32::from(trie.is_accepting(node));
    }

    Ok(DenseAutomaton::from_parts(num_states, transitions, output)?)
}

// =============================================================================
// Snapshot Writer
// =============================================================================

/// Serialize an automaton as a JGA snapshot.
pub fn build_snapshot(automaton: &DenseAutomaton, pattern_count: usize, build_id: u32) -> Vec<u8> {
    let mut meta_section = vec![0u8; META_SIZE];
    write_u32_le(&mut meta_section, meta::NUM_STATES, automaton.num_states() as u32);
    write_u32_le(&mut meta_section, meta::ALPHABET_SIZE, ALPHABET_SIZE as u32);
    write_u32_le(&mut meta_section, meta::FINGERPRINT_LEN, FINGERPRINT_LEN as u32);
    write_u32_le(&mut meta_section, meta::PATTERN_COUNT, pattern_count as u32);

    let mut sections = [
        SectionData::new(SectionId::Meta, meta_section, 1),
        SectionData::new(
            SectionId::Transitions,
            encode_u32_array(automaton.transitions()),
            automaton.transitions().len(),
        ),
        SectionData::new(
            SectionId::Output,
            encode_u32_array(automaton.output()),
            automaton.output().len(),
        ),
    ];

    let section_count = sections.len();
    let section_dir_offset = HEADER_SIZE;
    let section_dir_bytes = section_count * SECTION_ENTRY_SIZE;
    let mut data_offset = align_offset(section_dir_offset + section_dir_bytes, 4);

    for section in &mut sections {
        section.offset = data_offset;
        data_offset = align_offset(data_offset + section.data.len(), 4);
    }

    let total_size = data_offset;
    let mut buffer = vec![0u8; total_size];

    buffer[header::MAGIC..header::MAGIC + 4].copy_from_slice(&JGA_MAGIC);
    write_u16_le(&mut buffer, header::VERSION, JGA_VERSION);
    write_u16_le(&mut buffer, header::FLAGS, SnapshotFlags::HAS_CRC32.bits());
    write_u32_le(&mut buffer, header::HEADER_BYTES, HEADER_SIZE as u32);
    write_u32_le(&mut buffer, header::SECTION_COUNT, section_count as u32);
    write_u32_le(&mut buffer, header::SECTION_DIR_OFFSET, section_dir_offset as u32);
    write_u32_le(&mut buffer, header::SECTION_DIR_BYTES, section_dir_bytes as u32);
    write_u32_le(&mut buffer, header::BUILD_ID, build_id);

    for (index, section) in sections.iter().enumerate() {
        let entry_offset = section_dir_offset + index * SECTION_ENTRY_SIZE;
        write_u16_le(&mut buffer, entry_offset + section_entry::ID, section.id as u16);
        write_u16_le(&mut buffer, entry_offset + section_entry::FLAGS, 0);
        write_u32_le(&mut buffer, entry_offset + section_entry::OFFSET, section.offset as u32);
        write_u32_le(&mut buffer, entry_offset + section_entry::LENGTH, section.data.len() as u32);
        write_u32_le(&mut buffer, entry_offset + section_entry::COUNT, section.count as u32);
        write_u32_le(&mut buffer, entry_offset + section_entry::CRC32, crc32(&section.data));

        let end = section.offset + section.data.len();
        buffer[section.offset..end].copy_from_slice(&section.data);
    }

    let mut hasher = Crc32::new();
    hasher.update(&buffer[..header::SNAPSHOT_CRC32]);
    hasher.update(&buffer[header::SNAPSHOT_CRC32 + 4..]);
    let checksum = hasher.finish();
    write_u32_le(&mut buffer, header::SNAPSHOT_CRC32, checksum);

    buffer
}

struct SectionData {
    id: SectionId,
    data: Vec<u8>,
    count: usize,
    offset: usize,
}

impl SectionData {
    fn new(id: SectionId, data: Vec<u8>, count: usize) -> Self {
        Self { id, data, count, offset: 0 }
    }
}

#[cfg(test)]
mod tests {
    use jg_core::fingerprint::{Fingerprint, FINGERPRINT_LEN};
    use jg_core::snapshot::{Snapshot, SnapshotError};

    use super::*;

    const JARM: &str = "2ad2ad16d2ad2ad22c42d42d00042d58c7162162b6a603b3e3b16b2e4c9bab";

    fn scan_text(automaton: &DenseAutomaton, text: &str) -> bool {
        automaton.scan(&encode_symbols(text).unwrap())
    }

    /// Reference substring check over the same alphabet.
    fn naive_contains(patterns: &[&str], text: &str) -> bool {
        patterns.iter().any(|p| text.contains(p))
    }

    /// Small deterministic generator so the property checks need no extra
    /// dependencies.
    struct Lcg(u64);

    impl Lcg {
        fn next(&mut self) -> u64 {
            self.0 = self.0.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
            self.0 >> 33
        }

        fn hex(&mut self, len: usize, alphabet: &[u8]) -> String {
            (0..len)
                .map(|_| alphabet[(self.next() as usize) % alphabet.len()] as char)
                .collect()
        }
    }

    #[test]
    fn full_length_pattern_matches_only_exact_fingerprint() {
        let output = build_automaton(&[JARM]).unwrap();
        let automaton = output.automaton;

        let hit = Fingerprint::parse(JARM).unwrap();
        assert!(automaton.scan(hit.symbols()));

        let mut miss = JARM.to_string();
        miss.replace_range(FINGERPRINT_LEN - 1.., "c");
        let miss = Fingerprint::parse(&miss).unwrap();
        assert!(!automaton.scan(miss.symbols()));

        assert_eq!(automaton.num_states(), FINGERPRINT_LEN + 1);
    }

    #[test]
    fn detects_both_patterns_after_partial_overlap() {
        let automaton = build_automaton(&["aaaa", "bbbb"]).unwrap().automaton;
        let symbols = encode_symbols("aaaabbbb").unwrap();

        let mut state = 0u32;
        let mut hits = Vec::new();
        for (pos, &symbol) in symbols.iter().enumerate() {
            state = automaton.step(state, symbol);
            if automaton.is_accepting(state) {
                hits.push(pos);
            }
        }
        assert_eq!(hits, vec![3, 7]);

        // Overlap that forces a failure transition before the second match.
        assert!(scan_text(&automaton, "aaabbbb"));
        assert!(scan_text(&automaton, "aaaaa"));
        assert!(!scan_text(&automaton, "aaabbb"));
    }

    #[test]
    fn suffix_pattern_detected_inside_longer_path() {
        let automaton = build_automaton(&["abcd", "bc"]).unwrap().automaton;
        assert!(scan_text(&automaton, "0abc0"));
        assert!(!scan_text(&automaton, "0ab0c"));
    }

    #[test]
    fn malformed_patterns_are_skipped_with_warning() {
        let output = build_automaton(&["abc!1234", "0123"]).unwrap();
        assert_eq!(output.automaton.num_states(), 5);
        assert_eq!(output.stats.accepted, 1);
        assert_eq!(output.stats.skipped, 1);
        assert_eq!(
            output.warnings,
            vec![PatternWarning {
                index: 0,
                pattern: "abc!1234".to_string(),
                reason: WarningReason::InvalidSymbol { position: 3, found: '!' },
            }]
        );
    }

    #[test]
    fn empty_pattern_is_a_warning() {
        let output = build_automaton(&["", "ff"]).unwrap();
        assert_eq!(output.warnings[0].reason, WarningReason::Empty);
        assert_eq!(output.automaton.num_states(), 3);
    }

    #[test]
    fn empty_pattern_set_is_fatal() {
        let empty: [&str; 0] = [];
        assert_eq!(build_automaton(&empty).unwrap_err(), BuildError::EmptyPatternSet);
        assert_eq!(build_automaton(&["zz", ""]).unwrap_err(), BuildError::EmptyPatternSet);
    }

    #[test]
    fn state_limit_is_fatal() {
        let err = build_automaton_with_limit(&["0123456789"], 5).unwrap_err();
        assert_eq!(err, BuildError::TooManyStates { limit: 5 });
    }

    #[test]
    fn build_is_deterministic() {
        let patterns = ["deadbeef", "beefcafe", "cafe", "00ff00"];
        let a = build_automaton(&patterns).unwrap().automaton;
        let b = build_automaton(&patterns).unwrap().automaton;
        assert_eq!(a.transitions(), b.transitions());
        assert_eq!(a.output(), b.output());
    }

    #[test]
    fn table_is_total_and_in_range() {
        let automaton = build_automaton(&["0f0f", "f0f0", "123"]).unwrap().automaton;
        assert_eq!(automaton.transitions().len(), automaton.num_states() * ALPHABET_SIZE);
        assert!(automaton
            .transitions()
            .iter()
            .all(|&t| (t as usize) < automaton.num_states()));
        assert_eq!(automaton.output()[0], 0);
    }

    #[test]
    fn matches_naive_substring_search() {
        // Small alphabet so random texts actually contain patterns.
        let alphabet = b"01a";
        let mut rng = Lcg(0x5eed);

        for _ in 0..50 {
            let count = 1 + (rng.next() as usize % 6);
            let owned: Vec<String> = (0..count)
                .map(|_| {
                    let len = 1 + (rng.next() as usize % 5);
                    rng.hex(len, alphabet)
                })
                .collect();
            let patterns: Vec<&str> = owned.iter().map(String::as_str).collect();
            let automaton = build_automaton(&patterns).unwrap().automaton;

            for _ in 0..40 {
                let text = rng.hex(FINGERPRINT_LEN, alphabet);
                assert_eq!(
                    scan_text(&automaton, &text),
                    naive_contains(&patterns, &text),
                    "patterns={patterns:?} text={text}"
                );
            }
        }
    }

    #[test]
    fn snapshot_round_trips_automaton() {
        let automaton = build_automaton(&["aaaa", "bbbb", JARM]).unwrap().automaton;
        let bytes = build_snapshot(&automaton, 3, 42);

        let snapshot = Snapshot::load(&bytes).expect("snapshot should load");
        assert_eq!(snapshot.build_id, 42);
        assert_eq!(snapshot.section_count(), 3);

        let meta = snapshot.meta().unwrap();
        assert_eq!(meta.num_states, automaton.num_states());
        assert_eq!(meta.pattern_count, 3);
        assert_eq!(meta.fingerprint_len, FINGERPRINT_LEN);

        assert_eq!(snapshot.automaton().unwrap(), automaton);
    }

    #[test]
    fn snapshot_detects_corruption() {
        let automaton = build_automaton(&["abcd"]).unwrap().automaton;
        let mut bytes = build_snapshot(&automaton, 1, 0);
        let last = bytes.len() - 1;
        bytes[last] ^= 0xff;
        assert!(matches!(
            Snapshot::load(&bytes),
            Err(SnapshotError::Crc32Mismatch { .. })
        ));
    }
}
