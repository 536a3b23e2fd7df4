//! Ledger configuration schema.
//!
//! A `LedgerConfig` is deserialized from TOML. Every section is optional;
//! an empty document yields an in-memory ledger with default timeouts.
//!
//! ```toml
//! [store]
//! kind = "file"
//! root = "/var/lib/chainlog"
//!
//! [writer]
//! lock_timeout_ms = 5000
//!
//! [verify]
//! deadline_ms = 30000
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use chainlog_contracts::error::{ChainError, ChainResult};
use chainlog_core::{traits::AppendStore, writer::DEFAULT_LOCK_TIMEOUT};
use chainlog_store::{FileAppendStore, InMemoryAppendStore};

/// Which `AppendStore` backs the ledger.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StoreKind {
    #[default]
    Memory,
    File,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StoreConfig {
    #[serde(default)]
    pub kind: StoreKind,
    /// Directory holding partition files. Required when `kind = "file"`.
    pub root: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WriterConfig {
    /// Upper bound on waiting for a partition's append lock.
    #[serde(default = "default_lock_timeout_ms")]
    pub lock_timeout_ms: u64,
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            lock_timeout_ms: default_lock_timeout_ms(),
        }
    }
}

fn default_lock_timeout_ms() -> u64 {
    DEFAULT_LOCK_TIMEOUT.as_millis() as u64
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct VerifyConfig {
    /// Wall-clock budget per verification run. Unbounded when absent.
    pub deadline_ms: Option<u64>,
}

/// The top-level structure deserialized from a TOML ledger file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LedgerConfig {
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub writer: WriterConfig,
    #[serde(default)]
    pub verify: VerifyConfig,
}

impl LedgerConfig {
    /// Parse `s` as TOML and validate it.
    ///
    /// Returns `ChainError::ConfigError` if the TOML is malformed, does not
    /// match the schema, or fails validation.
    pub fn from_toml_str(s: &str) -> ChainResult<Self> {
        let config: LedgerConfig = toml::from_str(s).map_err(|e| ChainError::ConfigError {
            reason: format!("failed to parse ledger TOML: {}", e),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Read the file at `path` and parse it as TOML ledger configuration.
    pub fn from_file(path: &Path) -> ChainResult<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| ChainError::ConfigError {
            reason: format!("failed to read config file '{}': {}", path.display(), e),
        })?;
        Self::from_toml_str(&contents)
    }

    /// A file-backed configuration rooted at `root`, defaults elsewhere.
    pub fn file(root: impl Into<PathBuf>) -> Self {
        Self {
            store: StoreConfig {
                kind: StoreKind::File,
                root: Some(root.into()),
            },
            ..Self::default()
        }
    }

    pub fn validate(&self) -> ChainResult<()> {
        if self.store.kind == StoreKind::File && self.store.root.is_none() {
            return Err(ChainError::ConfigError {
                reason: "store.root is required when store.kind = \"file\"".to_string(),
            });
        }
        if self.writer.lock_timeout_ms == 0 {
            return Err(ChainError::ConfigError {
                reason: "writer.lock_timeout_ms must be greater than zero".to_string(),
            });
        }
        if self.verify.deadline_ms == Some(0) {
            return Err(ChainError::ConfigError {
                reason: "verify.deadline_ms must be greater than zero".to_string(),
            });
        }
        Ok(())
    }

    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.writer.lock_timeout_ms)
    }

    pub fn verify_deadline(&self) -> Option<Duration> {
        self.verify.deadline_ms.map(Duration::from_millis)
    }

    /// Build the configured store.
    pub fn open_store(&self) -> ChainResult<Arc<dyn AppendStore>> {
        self.validate()?;
        debug!(kind = ?self.store.kind, "opening append store");
        match (&self.store.kind, &self.store.root) {
            (StoreKind::Memory, _) => Ok(Arc::new(InMemoryAppendStore::new())),
            (StoreKind::File, Some(root)) => Ok(Arc::new(FileAppendStore::open(root)?)),
            (StoreKind::File, None) => Err(ChainError::ConfigError {
                reason: "store.root is required when store.kind = \"file\"".to_string(),
            }),
        }
    }
}
