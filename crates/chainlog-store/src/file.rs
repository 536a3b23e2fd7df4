//! JSON-lines implementation of `AppendStore`.
//!
//! Layout: one file per partition under a root directory, named
//! `<hex(partition_key)>.jsonl`, one serialized `AuditEntry` per line.
//!
//! A commit is one `write_all` of a complete, newline-terminated line
//! followed by `sync_data`. Readers only ever consider newline-terminated
//! lines, so an in-flight or torn write is invisible to them. When a
//! partition is first opened for writing, a torn trailing fragment left by a
//! crash is truncated away.
//!
//! Records are addressed by position: the n-th non-blank complete line of a
//! file is position n, whatever `sequence` it claims.
//!
//! Only one process may write a root directory at a time; partition
//! exclusivity comes from the in-process `ChainWriter`.

use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

use chainlog_contracts::{
    entry::{AuditEntry, ChainTail},
    error::{ChainError, ChainResult},
};
use chainlog_core::traits::{AppendStore, EntryStream};

use crate::memory::check_extends;

const EXTENSION: &str = "jsonl";

fn io_error(context: &str, path: &Path, e: std::io::Error) -> ChainError {
    ChainError::StorageUnavailable {
        reason: format!("{context} '{}': {e}", path.display()),
    }
}

// ── Per-partition state ───────────────────────────────────────────────────────

/// The writable side of one partition file, with its cached cursor.
struct PartitionFile {
    path: PathBuf,
    file: File,
    /// Length of the file up to and including the last complete line.
    len: u64,
    /// Number of records in the file.
    records: u64,
    tail: ChainTail,
    /// Idempotency key → position.
    idempotency: HashMap<String, u64>,
    /// Set when a failed append could not be rolled back; the cached cursor
    /// no longer describes the file and must be rebuilt from disk.
    stale: bool,
}

impl PartitionFile {
    /// Open (or create) a partition file, rebuild the tail and idempotency
    /// index, and drop any torn trailing fragment.
    fn open(path: PathBuf, partition_key: &str) -> ChainResult<Self> {
        let mut tail = ChainTail::GENESIS;
        let mut idempotency = HashMap::new();
        let mut len = 0u64;
        let mut records = 0u64;
        let mut physical_len = 0u64;

        if path.exists() {
            let reader = File::open(&path).map_err(|e| io_error("failed to open", &path, e))?;
            let mut lines = CompleteLines::new(BufReader::new(reader));
            let mut position = 0u64;
            while let Some(line) = lines.next_line() {
                let (line_no, bytes) = line.map_err(|e| io_error("failed to read", &path, e))?;
                position += 1;
                let entry = parse_line(partition_key, position, line_no, &bytes)?;
                if let Some(key) = &entry.idempotency_key {
                    idempotency.insert(key.clone(), position);
                }
                tail = ChainTail::of(&entry);
            }
            records = position;
            len = lines.complete_len;
            physical_len = lines.total_len;
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| io_error("failed to open", &path, e))?;

        if physical_len > len {
            warn!(
                path = %path.display(),
                torn_bytes = physical_len - len,
                "truncating torn trailing write"
            );
            file.set_len(len)
                .map_err(|e| io_error("failed to truncate", &path, e))?;
            file.sync_data()
                .map_err(|e| io_error("failed to sync", &path, e))?;
        }

        debug!(
            path = %path.display(),
            sequence = tail.sequence,
            "partition file opened"
        );

        Ok(Self {
            path,
            file,
            len,
            records,
            tail,
            idempotency,
            stale: false,
        })
    }

    fn append_line(&mut self, line: &[u8]) -> ChainResult<()> {
        let result = self
            .file
            .write_all(line)
            .and_then(|_| self.file.sync_data());
        if let Err(e) = result {
            // Cut back whatever reached the file. If that fails too, the line
            // may be complete on disk and only a rescan can tell.
            if let Err(rollback) = self.file.set_len(self.len) {
                error!(
                    path = %self.path.display(),
                    error = %rollback,
                    "failed to roll back append; partition will be rescanned"
                );
                self.stale = true;
            }
            return Err(io_error("failed to append to", &self.path, e));
        }
        self.len += line.len() as u64;
        self.records += 1;
        Ok(())
    }
}

// ── Public store ──────────────────────────────────────────────────────────────

/// A durable, append-only store of newline-delimited JSON files.
pub struct FileAppendStore {
    root: PathBuf,
    partitions: Mutex<HashMap<String, Arc<Mutex<PartitionFile>>>>,
}

impl FileAppendStore {
    /// Open or create a store rooted at `root`.
    pub fn open(root: impl AsRef<Path>) -> ChainResult<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root).map_err(|e| io_error("failed to create", &root, e))?;
        info!(root = %root.display(), "file append store opened");
        Ok(Self {
            root,
            partitions: Mutex::new(HashMap::new()),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn partition_path(&self, partition_key: &str) -> PathBuf {
        self.root
            .join(format!("{}.{EXTENSION}", hex::encode(partition_key.as_bytes())))
    }

    /// Get the cached writable handle for a partition, opening it on first use.
    fn partition(&self, partition_key: &str) -> ChainResult<Arc<Mutex<PartitionFile>>> {
        let mut partitions = self.partitions.lock();
        if let Some(p) = partitions.get(partition_key) {
            return Ok(p.clone());
        }
        let opened = Arc::new(Mutex::new(PartitionFile::open(
            self.partition_path(partition_key),
            partition_key,
        )?));
        partitions.insert(partition_key.to_string(), opened.clone());
        Ok(opened)
    }

    /// Like `partition`, but never returns a handle marked stale.
    fn live_partition(&self, partition_key: &str) -> ChainResult<Arc<Mutex<PartitionFile>>> {
        let partition = self.partition(partition_key)?;
        if !partition.lock().stale {
            return Ok(partition);
        }
        self.evict(partition_key, &partition);
        self.partition(partition_key)
    }

    /// Swap a partition's write handle for a read-only one, so the next
    /// append and its rollback both fail.
    #[cfg(test)]
    pub(crate) fn break_writes(&self, partition_key: &str) -> ChainResult<()> {
        let partition = self.partition(partition_key)?;
        let mut file = partition.lock();
        file.file = File::open(&file.path).map_err(|e| io_error("failed to open", &file.path, e))?;
        Ok(())
    }

    #[cfg(test)]
    pub(crate) fn is_cached(&self, partition_key: &str) -> bool {
        self.partitions.lock().contains_key(partition_key)
    }

    /// Forget a cached handle so the next access rescans the file.
    fn evict(&self, partition_key: &str, handle: &Arc<Mutex<PartitionFile>>) {
        let mut partitions = self.partitions.lock();
        if partitions
            .get(partition_key)
            .is_some_and(|cached| Arc::ptr_eq(cached, handle))
        {
            partitions.remove(partition_key);
            warn!(partition_key = %partition_key, "partition cache evicted");
        }
    }
}

impl AppendStore for FileAppendStore {
    fn read_tail(&self, partition_key: &str) -> ChainResult<ChainTail> {
        if !self.partitions.lock().contains_key(partition_key)
            && !self.partition_path(partition_key).exists()
        {
            return Ok(ChainTail::GENESIS);
        }
        let partition = self.live_partition(partition_key)?;
        let tail = partition.lock().tail;
        Ok(tail)
    }

    fn commit(&self, entry: &AuditEntry) -> ChainResult<()> {
        let partition = self.live_partition(&entry.partition_key)?;
        let mut file = partition.lock();
        if file.stale {
            drop(file);
            self.evict(&entry.partition_key, &partition);
            return Err(ChainError::StorageUnavailable {
                reason: format!("partition '{}' is being rescanned", entry.partition_key),
            });
        }

        check_extends(&file.tail, entry)?;

        let mut line = serde_json::to_vec(entry).map_err(|e| ChainError::EncodingError {
            reason: format!("failed to serialize entry: {e}"),
        })?;
        line.push(b'\n');
        if let Err(e) = file.append_line(&line) {
            if file.stale {
                drop(file);
                self.evict(&entry.partition_key, &partition);
            }
            return Err(e);
        }

        if let Some(key) = &entry.idempotency_key {
            let position = file.records;
            file.idempotency.insert(key.clone(), position);
        }
        file.tail = ChainTail::of(entry);

        debug!(
            partition_key = %entry.partition_key,
            sequence = entry.sequence,
            bytes = line.len(),
            "entry appended to file"
        );
        Ok(())
    }

    fn read_range(&self, partition_key: &str, from: u64, to: u64) -> ChainResult<EntryStream> {
        let path = self.partition_path(partition_key);
        let file = match File::open(&path) {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(Box::new(std::iter::empty::<ChainResult<AuditEntry>>()))
            }
            Err(e) => return Err(io_error("failed to open", &path, e)),
        };
        Ok(Box::new(RangeReader {
            lines: CompleteLines::new(BufReader::new(file)),
            path,
            partition_key: partition_key.to_string(),
            from,
            to,
            position: 0,
            done: false,
        }))
    }

    fn find_by_idempotency_key(
        &self,
        partition_key: &str,
        key: &str,
    ) -> ChainResult<Option<AuditEntry>> {
        if !self.partition_path(partition_key).exists() {
            return Ok(None);
        }
        let position = match self.live_partition(partition_key)?.lock().idempotency.get(key) {
            Some(&p) => p,
            None => return Ok(None),
        };
        self.read_range(partition_key, position, position)?
            .next()
            .transpose()
    }

    fn partitions(&self) -> ChainResult<Vec<String>> {
        let dir = fs::read_dir(&self.root).map_err(|e| io_error("failed to list", &self.root, e))?;
        let mut keys = Vec::new();
        for item in dir {
            let item = item.map_err(|e| io_error("failed to list", &self.root, e))?;
            let path = item.path();
            if path.extension().and_then(|x| x.to_str()) != Some(EXTENSION) {
                continue;
            }
            let non_empty = item.metadata().map(|m| m.len() > 0).unwrap_or(false);
            let decoded = path
                .file_stem()
                .and_then(|s| s.to_str())
                .and_then(|s| hex::decode(s).ok())
                .and_then(|b| String::from_utf8(b).ok());
            match decoded {
                Some(key) if non_empty => keys.push(key),
                Some(_) => {}
                None => warn!(path = %path.display(), "ignoring file with undecodable partition name"),
            }
        }
        keys.sort();
        Ok(keys)
    }
}

impl std::fmt::Debug for FileAppendStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileAppendStore")
            .field("root", &self.root)
            .finish_non_exhaustive()
    }
}

// ── Line reading ──────────────────────────────────────────────────────────────

/// Yields only newline-terminated lines, with 1-based line numbers.
struct CompleteLines<R> {
    reader: R,
    buf: Vec<u8>,
    line_no: usize,
    /// Bytes up to the end of the last complete line.
    complete_len: u64,
    /// Bytes read in total, including any trailing fragment.
    total_len: u64,
}

impl<R: BufRead> CompleteLines<R> {
    fn new(reader: R) -> Self {
        Self {
            reader,
            buf: Vec::new(),
            line_no: 0,
            complete_len: 0,
            total_len: 0,
        }
    }

    fn next_line(&mut self) -> Option<std::io::Result<(usize, Vec<u8>)>> {
        loop {
            self.buf.clear();
            let n = match self.reader.read_until(b'\n', &mut self.buf) {
                Ok(n) => n,
                Err(e) => return Some(Err(e)),
            };
            if n == 0 {
                return None;
            }
            self.total_len += n as u64;
            if self.buf.last() != Some(&b'\n') {
                // Torn or in-flight write; never surfaced.
                return None;
            }
            self.complete_len = self.total_len;
            self.line_no += 1;
            self.buf.pop();
            if self.buf.iter().all(u8::is_ascii_whitespace) {
                continue;
            }
            return Some(Ok((self.line_no, std::mem::take(&mut self.buf))));
        }
    }
}

fn parse_line(
    partition_key: &str,
    position: u64,
    line_no: usize,
    bytes: &[u8],
) -> ChainResult<AuditEntry> {
    serde_json::from_slice(bytes).map_err(|e| ChainError::IntegrityViolation {
        partition_key: partition_key.to_string(),
        reason: format!("unreadable record at position {position} (line {line_no}): {e}"),
    })
}

/// Lazy reader behind `FileAppendStore::read_range`.
///
/// Counts records from the top of the file and only decodes those inside
/// the requested positions.
struct RangeReader {
    lines: CompleteLines<BufReader<File>>,
    path: PathBuf,
    partition_key: String,
    from: u64,
    to: u64,
    /// Position of the last record read.
    position: u64,
    done: bool,
}

impl Iterator for RangeReader {
    type Item = ChainResult<AuditEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        while !self.done {
            let (line_no, bytes) = match self.lines.next_line() {
                Some(Ok(line)) => line,
                Some(Err(e)) => {
                    self.done = true;
                    return Some(Err(io_error("failed to read", &self.path, e)));
                }
                None => break,
            };
            self.position += 1;
            if self.position < self.from {
                continue;
            }
            if self.position > self.to {
                break;
            }
            let parsed = parse_line(&self.partition_key, self.position, line_no, &bytes);
            if parsed.is_err() {
                self.done = true;
            }
            return Some(parsed);
        }
        self.done = true;
        None
    }
}
