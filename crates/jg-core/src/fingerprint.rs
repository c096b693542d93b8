//! Hexadecimal alphabet and fixed-length fingerprints
//!
//! Every pattern and fingerprint is a string over the 16 hex digits. The
//! automaton never sees characters, only symbol codes `0..16`.

use std::fmt;

/// Number of symbols in the alphabet (hex digits).
pub const ALPHABET_SIZE: usize = 16;

/// Length of a TLS negotiation fingerprint in symbols.
pub const FINGERPRINT_LEN: usize = 62;

/// Error type for fingerprint parsing.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FingerprintError {
    #[error("Fingerprint must be {expected} symbols, got {actual}")]
    InvalidLength { expected: usize, actual: usize },
    #[error("Invalid symbol {found:?} at position {position}")]
    InvalidSymbol { position: usize, found: char },
}

/// Map a byte to its symbol code. Case-insensitive.
#[inline]
pub const fn symbol_of(byte: u8) -> Option<u8> {
    match byte {
        b'0'..=b'9' => Some(byte - b'0'),
        b'a'..=b'f' => Some(byte - b'a' + 10),
        b'A'..=b'F' => Some(byte - b'A' + 10),
        _ => None,
    }
}

/// Encode a string into symbol codes, reporting the first invalid byte.
pub fn encode_symbols(text: &str) -> Result<Vec<u8>, FingerprintError> {
    text.char_indices()
        .map(|(position, ch)| {
            u8::try_from(ch)
                .ok()
                .and_then(symbol_of)
                .ok_or(FingerprintError::InvalidSymbol { position, found: ch })
        })
        .collect()
}

/// A validated fixed-length fingerprint.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Fingerprint {
    text: String,
    symbols: Box<[u8]>,
}

impl Fingerprint {
    /// Parse and validate a fingerprint string.
    pub fn parse(text: &str) -> Result<Self, FingerprintError> {
        let text = text.trim();
        if text.len() != FINGERPRINT_LEN {
            return Err(FingerprintError::InvalidLength {
                expected: FINGERPRINT_LEN,
                actual: text.chars().count(),
            });
        }
        let symbols = encode_symbols(text)?;
        Ok(Self {
            text: text.to_ascii_lowercase(),
            symbols: symbols.into_boxed_slice(),
        })
    }

    /// Lowercase text form.
    pub fn as_str(&self) -> &str {
        &self.text
    }

    /// Symbol codes, one per character.
    pub fn symbols(&self) -> &[u8] {
        &self.symbols
    }

    /// The helper reports an all-zero fingerprint when the host did not
    /// answer any of the probes.
    pub fn is_empty_response(&self) -> bool {
        self.symbols.iter().all(|&s| s == 0)
    }
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fingerprint({})", self.text)
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

impl std::str::FromStr for Fingerprint {
    type Err = FingerprintError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "2ad2ad16d2ad2ad22c42d42d00042d58c7162162b6a603b3e3b16b2e4c9bab";

    #[test]
    fn test_symbol_of_covers_alphabet() {
        assert_eq!(symbol_of(b'0'), Some(0));
        assert_eq!(symbol_of(b'9'), Some(9));
        assert_eq!(symbol_of(b'a'), Some(10));
        assert_eq!(symbol_of(b'F'), Some(15));
        assert_eq!(symbol_of(b'g'), None);
        assert_eq!(symbol_of(b'!'), None);
    }

    #[test]
    fn test_parse_sample() {
        assert_eq!(SAMPLE.len(), FINGERPRINT_LEN);
        let fp = Fingerprint::parse(SAMPLE).unwrap();
        assert_eq!(fp.symbols().len(), FINGERPRINT_LEN);
        assert_eq!(fp.symbols()[0], 2);
        assert_eq!(fp.symbols()[1], 10);
        assert!(!fp.is_empty_response());
    }

    #[test]
    fn test_parse_is_case_insensitive() {
        let upper = Fingerprint::parse(&SAMPLE.to_uppercase()).unwrap();
        let lower = Fingerprint::parse(SAMPLE).unwrap();
        assert_eq!(upper, lower);
        assert_eq!(upper.as_str(), SAMPLE);
    }

    #[test]
    fn test_parse_rejects_wrong_length() {
        let err = Fingerprint::parse("abc").unwrap_err();
        assert_eq!(
            err,
            FingerprintError::InvalidLength { expected: FINGERPRINT_LEN, actual: 3 }
        );
    }

    #[test]
    fn test_parse_rejects_bad_symbol() {
        let mut bad = SAMPLE.to_string();
        bad.replace_range(5..6, "z");
        let err = Fingerprint::parse(&bad).unwrap_err();
        assert_eq!(err, FingerprintError::InvalidSymbol { position: 5, found: 'z' });
    }

    #[test]
    fn test_empty_response_marker() {
        let zeros = "0".repeat(FINGERPRINT_LEN);
        assert!(Fingerprint::parse(&zeros).unwrap().is_empty_response());
    }
}
