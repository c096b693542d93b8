use jg_core::{FingerprintError, PatternSetId, SnapshotError};
use jg_compiler::BuildError;
use thiserror::Error;

/// Classifies runtime errors for programmatic matching.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Empty or invalid pattern set; aborts readiness
    Construction,
    /// Accelerator missing or resource allocation failed
    CapabilityUnavailable,
    /// Dataset fetch or cache I/O failure
    TransientIo,
    /// Backend call failed or timed out mid-match
    Dispatch,
    /// Invalid configuration
    Config,
    /// Corrupt cached or on-disk automaton
    Snapshot,
    /// Fingerprint failed validation
    InvalidFingerprint,
    /// Scheduler loop has stopped
    SchedulerClosed,
}

/// Runtime error types
#[derive(Error, Debug)]
pub enum Error {
    #[error("Failed to build automaton for {set}: {source}")]
    Construction {
        set: PatternSetId,
        #[source]
        source: BuildError,
    },

    #[error("Accelerator unavailable: {0}")]
    CapabilityUnavailable(String),

    #[error("I/O error: {message}")]
    TransientIo {
        message: String,
        #[source]
        source: Option<std::io::Error>,
    },

    #[error("Dispatch failed for {set}: {message}")]
    Dispatch { set: PatternSetId, message: String },

    #[error("Config error: {0}")]
    Config(String),

    #[error("Snapshot error: {0}")]
    Snapshot(#[from] SnapshotError),

    #[error("Invalid fingerprint: {0}")]
    InvalidFingerprint(#[from] FingerprintError),

    #[error("Scheduler is closed")]
    SchedulerClosed,
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Construction { .. } => ErrorKind::Construction,
            Error::CapabilityUnavailable(_) => ErrorKind::CapabilityUnavailable,
            Error::TransientIo { .. } => ErrorKind::TransientIo,
            Error::Dispatch { .. } => ErrorKind::Dispatch,
            Error::Config(_) => ErrorKind::Config,
            Error::Snapshot(_) => ErrorKind::Snapshot,
            Error::InvalidFingerprint(_) => ErrorKind::InvalidFingerprint,
            Error::SchedulerClosed => ErrorKind::SchedulerClosed,
        }
    }

    /// Errors that no retry will fix without new input.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::Construction | ErrorKind::Config | ErrorKind::SchedulerClosed
        )
    }

    /// Copy of a fatal error, so it can be returned again to later callers.
    pub(crate) fn replay(&self) -> Option<Self> {
        match self {
            Error::Construction { set, source } => Some(Error::Construction {
                set: set.clone(),
                source: source.clone(),
            }),
            Error::Config(message) => Some(Error::Config(message.clone())),
            Error::SchedulerClosed => Some(Error::SchedulerClosed),
            _ => None,
        }
    }

    /// Errors that should switch the caller to the CPU backend.
    pub fn triggers_fallback(&self) -> bool {
        self.kind() == ErrorKind::CapabilityUnavailable
    }

    pub(crate) fn io(message: impl Into<String>, source: std::io::Error) -> Self {
        Error::TransientIo {
            message: message.into(),
            source: Some(source),
        }
    }

    pub(crate) fn transient(message: impl Into<String>) -> Self {
        Error::TransientIo {
            message: message.into(),
            source: None,
        }
    }

    pub(crate) fn dispatch(set: &PatternSetId, message: impl Into<String>) -> Self {
        Error::Dispatch {
            set: set.clone(),
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capability_error_triggers_fallback() {
        let err = Error::CapabilityUnavailable("no adapter".into());
        assert_eq!(err.kind(), ErrorKind::CapabilityUnavailable);
        assert!(err.triggers_fallback());
        assert!(!err.is_fatal());
    }

    #[test]
    fn test_construction_error_is_fatal() {
        let err = Error::Construction {
            set: PatternSetId::BLOCKLIST,
            source: BuildError::EmptyPatternSet,
        };
        assert!(err.is_fatal());
        assert!(!err.triggers_fallback());
        assert!(err.to_string().contains("blocklist"));
    }

    #[test]
    fn test_transient_io_is_retryable() {
        let err = Error::io(
            "reading cache",
            std::io::Error::new(std::io::ErrorKind::NotFound, "gone"),
        );
        assert_eq!(err.kind(), ErrorKind::TransientIo);
        assert!(!err.is_fatal());
    }

    #[test]
    fn test_dispatch_error_kind_is_matchable() {
        let err = Error::dispatch(&PatternSetId::TRACKERS, "timed out");
        match &err {
            Error::Dispatch { set, .. } => assert!(set.is_trackers()),
            _ => panic!("expected Dispatch"),
        }
        assert!(!err.is_fatal());
    }

    #[test]
    fn test_fingerprint_error_converts() {
        let err: Error = FingerprintError::InvalidLength { expected: 62, actual: 3 }.into();
        assert_eq!(err.kind(), ErrorKind::InvalidFingerprint);
    }
}
