//! # chainlog-store
//!
//! Insert-only implementations of [`chainlog_core::traits::AppendStore`].
//!
//! - [`InMemoryAppendStore`] — `RwLock`-guarded vectors; for tests, demos,
//!   and short-lived processes.
//! - [`FileAppendStore`] — one fsync'd JSON-lines file per partition;
//!   survives restarts and repairs torn trailing writes.
//!
//! Both enforce the same commit rule: an entry is accepted only if it
//! extends the partition tail exactly (next sequence, matching
//! `previous_hash`). Anything else is an `IntegrityViolation`.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use chainlog_core::ChainWriter;
//! use chainlog_store::FileAppendStore;
//!
//! let store = Arc::new(FileAppendStore::open("/var/lib/chainlog")?);
//! let writer = ChainWriter::new(store);
//! ```

pub mod file;
pub mod memory;

pub use file::FileAppendStore;
pub use memory::InMemoryAppendStore;

// ── Tests ─────────────────────────────────────────────────────────────────────
