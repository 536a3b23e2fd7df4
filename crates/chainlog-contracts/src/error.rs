//! Error types for the chainlog audit ledger.
//!
//! All fallible operations return `ChainResult<T>`. The variants follow the
//! retry semantics callers need: only `StorageUnavailable` is safe to retry
//! as-is, everything else requires a fix or an operator.

use thiserror::Error;

use crate::report::BreakKind;

/// The unified error type for chainlog.
#[derive(Debug, Error)]
pub enum ChainError {
    /// The event contains data that has no canonical byte representation
    /// (non-finite floats, excessive nesting, an action/state mismatch).
    ///
    /// The caller must fix the event; this is never retried automatically.
    #[error("encoding error: {reason}")]
    EncodingError { reason: String },

    /// A transient persistence or lock failure. Retrying the identical call
    /// is safe.
    #[error("storage unavailable: {reason}")]
    StorageUnavailable { reason: String },

    /// The store detected a sequence conflict or holds an unreadable record.
    ///
    /// Two writers bypassed partition exclusivity, or storage was corrupted
    /// out-of-band. Fatal: surfaced for operator investigation.
    #[error("integrity violation in partition '{partition_key}': {reason}")]
    IntegrityViolation { partition_key: String, reason: String },

    /// Verification found a break in the hash chain.
    #[error("chain broken in partition '{partition_key}' at sequence {sequence}: {kind}")]
    ChainBroken {
        partition_key: String,
        sequence: u64,
        kind: BreakKind,
    },

    /// A sequence range was empty, reversed, or started at zero.
    #[error("invalid sequence range {from}..={to}")]
    InvalidRange { from: u64, to: u64 },

    /// A required configuration value is missing or invalid.
    #[error("configuration error: {reason}")]
    ConfigError { reason: String },
}

impl ChainError {
    /// True when the failed call may be retried unchanged.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ChainError::StorageUnavailable { .. })
    }
}

/// Convenience alias used throughout the chainlog crates.
pub type ChainResult<T> = Result<T, ChainError>;
