//! Core type definitions for JarmGuard
//!
//! These types are shared by the compiler, the runtime scheduler and the
//! CLI. They carry no behaviour beyond small classification helpers.

use std::borrow::Cow;
use std::fmt;

// =============================================================================
// Pattern-set identifiers
// =============================================================================

/// Name of an independently maintained pattern set.
///
/// Two sets are well known (`blocklist` and `trackers`); any other name is
/// accepted and treated as an additional set.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PatternSetId(Cow<'static, str>);

impl PatternSetId {
    /// Malicious-host blocklist.
    pub const BLOCKLIST: PatternSetId = PatternSetId(Cow::Borrowed("blocklist"));
    /// Advertising / tracking list.
    pub const TRACKERS: PatternSetId = PatternSetId(Cow::Borrowed("trackers"));

    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        match name.as_str() {
            "blocklist" => Self::BLOCKLIST,
            "trackers" => Self::TRACKERS,
            _ => Self(Cow::Owned(name)),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_blocklist(&self) -> bool {
        *self == Self::BLOCKLIST
    }

    pub fn is_trackers(&self) -> bool {
        *self == Self::TRACKERS
    }
}

impl fmt::Display for PatternSetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PatternSetId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for PatternSetId {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

// =============================================================================
// Request Context
// =============================================================================

/// Caller context carried through a batch untouched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestContext {
    /// Domain the fingerprint was taken from
    pub domain: String,
    /// Tab that initiated the navigation
    pub tab_id: i32,
    /// Raw fingerprint text as reported by the helper
    pub fingerprint: String,
}

impl RequestContext {
    pub fn new(domain: impl Into<String>, tab_id: i32, fingerprint: impl Into<String>) -> Self {
        Self {
            domain: domain.into(),
            tab_id,
            fingerprint: fingerprint.into(),
        }
    }
}

// =============================================================================
// Verdicts
// =============================================================================

/// Action the consumer should take for a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// No configured set matched
    Allow,
    /// Tracker list matched (counting action)
    Track,
    /// Blocklist matched (block / redirect action)
    Block,
}

/// One boolean per configured pattern set, in configuration order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Verdict {
    matches: Vec<(PatternSetId, bool)>,
}

impl Verdict {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_match(mut self, set: PatternSetId, matched: bool) -> Self {
        self.push(set, matched);
        self
    }

    pub fn push(&mut self, set: PatternSetId, matched: bool) {
        match self.matches.iter_mut().find(|(id, _)| *id == set) {
            Some(entry) => entry.1 = matched,
            None => self.matches.push((set, matched)),
        }
    }

    /// Result for a set; `false` when the set was not evaluated.
    pub fn matched(&self, set: &PatternSetId) -> bool {
        self.matches
            .iter()
            .find(|(id, _)| id == set)
            .map(|(_, m)| *m)
            .unwrap_or(false)
    }

    pub fn is_blocklisted(&self) -> bool {
        self.matched(&PatternSetId::BLOCKLIST)
    }

    pub fn is_tracker(&self) -> bool {
        self.matched(&PatternSetId::TRACKERS)
    }

    /// Blocklist takes precedence over tracker accounting.
    pub fn disposition(&self) -> Disposition {
        if self.is_blocklisted() {
            Disposition::Block
        } else if self.is_tracker() {
            Disposition::Track
        } else {
            Disposition::Allow
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&PatternSetId, bool)> {
        self.matches.iter().map(|(id, m)| (id, *m))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn well_known_ids_are_interned() {
        assert_eq!(PatternSetId::new("blocklist"), PatternSetId::BLOCKLIST);
        assert_eq!(PatternSetId::from("trackers"), PatternSetId::TRACKERS);
        assert_eq!(PatternSetId::new("custom").as_str(), "custom");
        assert!(PatternSetId::BLOCKLIST.is_blocklist());
        assert!(!PatternSetId::new("custom").is_trackers());
    }

    #[test]
    fn blocklist_wins_over_trackers() {
        let verdict = Verdict::new()
            .with_match(PatternSetId::BLOCKLIST, true)
            .with_match(PatternSetId::TRACKERS, true);
        assert_eq!(verdict.disposition(), Disposition::Block);

        let verdict = Verdict::new()
            .with_match(PatternSetId::BLOCKLIST, false)
            .with_match(PatternSetId::TRACKERS, true);
        assert_eq!(verdict.disposition(), Disposition::Track);
    }

    #[test]
    fn missing_sets_read_as_no_match() {
        let verdict = Verdict::default();
        assert!(!verdict.is_blocklisted());
        assert!(!verdict.is_tracker());
        assert_eq!(verdict.disposition(), Disposition::Allow);
    }

    #[test]
    fn push_overwrites_existing_entry() {
        let mut verdict = Verdict::new().with_match(PatternSetId::TRACKERS, false);
        verdict.push(PatternSetId::TRACKERS, true);
        assert!(verdict.is_tracker());
        assert_eq!(verdict.iter().count(), 1);
    }
}
