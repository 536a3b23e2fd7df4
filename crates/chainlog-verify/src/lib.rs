//! # chainlog-verify
//!
//! Read-only integrity checking for chainlog partitions.
//!
//! [`ChainVerifier`] recomputes every entry's hash in a range and walks the
//! links between them, reporting the first break it finds. It needs only an
//! [`AppendStore`](chainlog_core::traits::AppendStore), never a writer.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use chainlog_verify::ChainVerifier;
//!
//! let verifier = ChainVerifier::new(store);
//! let report = verifier.verify("org-1", 1, u64::MAX)?;
//! if !report.valid {
//!     eprintln!("{report}");
//! }
//! ```

pub mod engine;

pub use engine::{ChainVerifier, VerifyOptions};

// ── Tests ─────────────────────────────────────────────────────────────────────
