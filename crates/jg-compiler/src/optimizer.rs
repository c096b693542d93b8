use std::collections::HashSet;

use jg_core::hash::Crc32;

pub struct OptimizeStats {
    pub before: usize,
    pub after: usize,
    pub deduped: usize,
}

/// Remove duplicate patterns, keeping the first occurrence of each.
///
/// Patterns are compared case-insensitively; survivors are lowercased.
pub fn optimize_patterns(patterns: &mut Vec<String>) -> OptimizeStats {
    let before = patterns.len();

    for pattern in patterns.iter_mut() {
        pattern.make_ascii_lowercase();
    }

    let mut seen: HashSet<String> = HashSet::with_capacity(patterns.len());
    let mut deduped = 0usize;
    patterns.retain(|pattern| {
        if seen.contains(pattern) {
            deduped += 1;
            false
        } else {
            seen.insert(pattern.clone());
            true
        }
    });

    OptimizeStats {
        before,
        after: patterns.len(),
        deduped,
    }
}

/// Order-independent digest of a pattern list, used as snapshot build id.
pub fn pattern_list_digest(patterns: &[String]) -> u32 {
    let mut sorted: Vec<&str> = patterns.iter().map(String::as_str).collect();
    sorted.sort_unstable();

    let mut hasher = Crc32::new();
    for pattern in sorted {
        hasher.update(pattern.as_bytes());
        hasher.update(b"\n");
    }
    hasher.finish()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn owned(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn removes_duplicates_preserving_order() {
        let mut patterns = owned(&["bbbb", "aaaa", "BBBB", "cccc", "aaaa"]);
        let stats = optimize_patterns(&mut patterns);

        assert_eq!(patterns, owned(&["bbbb", "aaaa", "cccc"]));
        assert_eq!(stats.before, 5);
        assert_eq!(stats.after, 3);
        assert_eq!(stats.deduped, 2);
    }

    #[test]
    fn digest_ignores_order() {
        let a = owned(&["aaaa", "bbbb"]);
        let b = owned(&["bbbb", "aaaa"]);
        assert_eq!(pattern_list_digest(&a), pattern_list_digest(&b));
        assert_ne!(pattern_list_digest(&a), pattern_list_digest(&owned(&["aaaa"])));
    }
}
