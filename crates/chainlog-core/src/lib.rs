//! # chainlog-core
//!
//! The write path of the chainlog audit ledger.
//!
//! This crate provides:
//! - `encoder` — deterministic byte encoding of an entry's fields
//! - `hash`    — the SHA-256 chain link over `(previous_hash, encoding)`
//! - `traits`  — the `AppendStore` and `Clock` seams
//! - `writer`  — `ChainWriter`, the only component that creates entries
//!
//! ## Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use chainlog_core::ChainWriter;
//!
//! let writer = ChainWriter::new(Arc::new(store));
//! let entry = writer.append("org-1", event)?;
//! ```

pub mod encoder;
pub mod hash;
pub mod traits;
pub mod writer;

pub use encoder::{encode, encode_entry, EntryFields};
pub use hash::{compute_hash, hash_entry};
pub use traits::{AppendStore, Clock, EntryStream, SystemClock};
pub use writer::{validate_event, ChainWriter};

// ── Tests ─────────────────────────────────────────────────────────────────────
