//! # Storage Module - Durable Buffering Layer
//!
//! This module provides the persistence layer for the telemetry node: the
//! write-first buffer queue that holds every reading until the broker has
//! confirmed it, and the date-partitioned archive log (see [`archive`]).
//!
//! ## Architecture
//!
//! The storage system uses a flat file-based approach with newline-delimited
//! records:
//!
//! ```text
//! data/
//! ├── buffer.jsonl     ← unconfirmed readings (FIFO, oldest first)
//! ├── archive/         ← permanent per-day audit copies
//! │   ├── 2026-03-15.jsonl
//! │   └── ...
//! └── node_state.json  ← boot counter
//! ```
//!
//! ## File format
//!
//! One record = one single-line UTF-8 JSON object, LF-terminated, no blank
//! lines. The queue never parses records; it moves opaque lines.
//!
//! ## Crash safety
//!
//! Removal is rewrite-without-prefix: the surviving suffix is written to a
//! unique temp file in the same directory, fsynced, and renamed over the
//! original. A power loss before the rename leaves the original file intact;
//! after it, the new content is complete. Leftover temp files found at
//! startup are crash artifacts and are deleted (the original file is
//! authoritative). Mutations take an exclusive `fs2` lock on the backing
//! file so a concurrently running `status` invocation cannot observe a
//! half-written state.

pub mod archive;

use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use fs2::FileExt;
use log::{info, warn};
use thiserror::Error;

/// Errors that can arise in the durable buffering layer.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Wrapper around IO errors (medium unavailable, write failed).
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Returned when the configured backlog bound is reached. The caller
    /// must treat the record as undelivered-and-unbuffered.
    #[error("backlog full: {backlog} buffered records")]
    CapacityExceeded { backlog: usize },
}

/// Capability used by [`BufferQueue::drain_while`] to deliver one record.
/// Returning `false` stops the drain at that record; everything from it on
/// stays buffered, in order.
#[async_trait]
pub trait RecordPublisher: Send {
    async fn publish_record(&mut self, record: &str) -> bool;
}

/// Append-only, crash-recoverable FIFO of opaque line records backed by a
/// single file. The in-memory count is recovered by scanning the file at
/// open and kept equal to the true on-disk line count after every
/// completed operation.
pub struct BufferQueue {
    path: PathBuf,
    count: usize,
    max_backlog: usize,
}

impl BufferQueue {
    /// Open (or create) the queue at `path`. Creates parent directories,
    /// removes any leftover rewrite temp file from a previous crash, and
    /// recovers the record count from the file.
    pub fn open<P: Into<PathBuf>>(path: P, max_backlog: usize) -> Result<Self, StoreError> {
        let path = path.into();
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)?;
        }
        remove_stale_temps(&path);

        let count = count_lines(&path)?;
        if count > 0 {
            info!("recovered {} buffered records from {}", count, path.display());
        }
        Ok(BufferQueue {
            path,
            count,
            max_backlog,
        })
    }

    /// Number of buffered records. O(1).
    pub fn count(&self) -> usize {
        self.count
    }

    /// Append one record. The record must be a single line without an
    /// embedded newline; payload builders guarantee this.
    pub fn append(&mut self, record: &str) -> Result<(), StoreError> {
        debug_assert!(!record.contains('\n'), "queue records are single lines");
        if self.count >= self.max_backlog {
            return Err(StoreError::CapacityExceeded {
                backlog: self.count,
            });
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        file.lock_exclusive()?;
        writeln!(file, "{}", record)?;
        file.flush()?;
        file.sync_all()?;
        drop(file);

        self.count += 1;
        Ok(())
    }

    /// Return the oldest record without mutating state. `None` on an empty
    /// queue (a sentinel, not an error).
    pub fn peek_oldest(&self) -> Option<String> {
        if self.count == 0 {
            return None;
        }
        let file = File::open(&self.path).ok()?;
        let mut reader = BufReader::new(file);
        let mut line = String::new();
        loop {
            line.clear();
            match reader.read_line(&mut line) {
                Ok(0) => return None,
                Ok(_) => {
                    let trimmed = line.trim();
                    if !trimmed.is_empty() {
                        return Some(trimmed.to_string());
                    }
                }
                Err(_) => return None,
            }
        }
    }

    /// Remove exactly the oldest record by rewriting the file without it.
    /// Returns `false` (no-op) on an empty queue. O(n) in backlog size.
    pub fn pop_oldest(&mut self) -> bool {
        if self.count == 0 {
            return false;
        }
        let lines = match read_records(&self.path) {
            Ok(lines) => lines,
            Err(e) => {
                warn!("pop: failed to read {}: {}", self.path.display(), e);
                return false;
            }
        };
        if lines.is_empty() {
            self.count = 0;
            return false;
        }
        match rewrite_records(&self.path, &lines[1..]) {
            Ok(()) => {
                self.count = lines.len() - 1;
                true
            }
            Err(e) => {
                warn!("pop: rewrite of {} failed: {}", self.path.display(), e);
                self.reconcile_count();
                false
            }
        }
    }

    /// Deliver buffered records in FIFO order through `publisher`, stopping
    /// at the first failure, attempting at most `max_batch` records. The
    /// file is rewritten to hold only the unattempted suffix. Returns how
    /// many records were confirmed delivered.
    pub async fn drain_while<P: RecordPublisher + ?Sized>(
        &mut self,
        publisher: &mut P,
        max_batch: usize,
    ) -> usize {
        if self.count == 0 || max_batch == 0 {
            return 0;
        }
        let lines = match read_records(&self.path) {
            Ok(lines) => lines,
            Err(e) => {
                warn!("drain: failed to read {}: {}", self.path.display(), e);
                return 0;
            }
        };
        if lines.is_empty() {
            self.count = 0;
            return 0;
        }

        let mut delivered = 0usize;
        for record in lines.iter().take(max_batch) {
            if publisher.publish_record(record).await {
                delivered += 1;
            } else {
                break;
            }
        }

        if delivered > 0 {
            match rewrite_records(&self.path, &lines[delivered..]) {
                Ok(()) => self.count = lines.len() - delivered,
                Err(e) => {
                    // Delivered records stay on disk and will be sent again
                    // later; duplicates are covered by at-least-once.
                    warn!("drain: rewrite of {} failed: {}", self.path.display(), e);
                    self.reconcile_count();
                }
            }
        }
        delivered
    }

    /// Re-derive the cached count from the file after a failed rewrite so
    /// the count/file invariant holds.
    fn reconcile_count(&mut self) {
        self.count = count_lines(&self.path).unwrap_or(self.count);
    }
}

/// Count non-blank lines; an absent file is an empty queue.
fn count_lines(path: &Path) -> Result<usize, StoreError> {
    match File::open(path) {
        Ok(file) => {
            let reader = BufReader::new(file);
            let mut count = 0usize;
            for line in reader.lines() {
                if !line?.trim().is_empty() {
                    count += 1;
                }
            }
            Ok(count)
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(0),
        Err(e) => Err(e.into()),
    }
}

/// Read all records, oldest first, skipping blank lines.
fn read_records(path: &Path) -> Result<Vec<String>, StoreError> {
    let file = File::open(path)?;
    let reader = BufReader::new(file);
    let mut lines = Vec::new();
    for line in reader.lines() {
        let line = line?;
        let trimmed = line.trim();
        if !trimmed.is_empty() {
            lines.push(trimmed.to_string());
        }
    }
    Ok(lines)
}

/// Replace the queue file with `remaining`, never deleting the original
/// before the replacement is fully written: content goes to a unique temp
/// file (fsynced), which is then renamed over the original.
fn rewrite_records(path: &Path, remaining: &[String]) -> Result<(), StoreError> {
    // Hold the destination lock for the whole rewrite.
    let lock_file = OpenOptions::new()
        .create(true)
        .read(true)
        .write(true)
        .open(path)?;
    lock_file.lock_exclusive()?;

    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let base = path
        .file_name()
        .and_then(|s| s.to_str())
        .unwrap_or("buffer.jsonl");
    let mut counter = 0u32;
    let tmp_path = loop {
        let candidate = dir.join(format!(".{}.tmp-{}-{}", base, std::process::id(), counter));
        match OpenOptions::new().write(true).create_new(true).open(&candidate) {
            Ok(mut tmp) => {
                for line in remaining {
                    writeln!(tmp, "{}", line)?;
                }
                tmp.flush()?;
                let _ = tmp.sync_all();
                break candidate;
            }
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                counter = counter.saturating_add(1);
                continue;
            }
            Err(e) => return Err(e.into()),
        }
    };

    fs::rename(&tmp_path, path)?;

    // Fsync the directory to persist the rename (best-effort)
    if let Ok(dir_file) = File::open(dir) {
        let _ = dir_file.sync_all();
    }
    drop(lock_file);
    Ok(())
}

/// Delete leftover rewrite temp files next to `path`. These only exist if
/// a previous process died between writing a temp file and renaming it;
/// the original file is intact and authoritative in that case.
fn remove_stale_temps(path: &Path) {
    let dir = match path.parent() {
        Some(dir) if dir.as_os_str().is_empty() => Path::new("."),
        Some(dir) => dir,
        None => Path::new("."),
    };
    let base = match path.file_name().and_then(|s| s.to_str()) {
        Some(base) => base,
        None => return,
    };
    let prefix = format!(".{}.tmp-", base);
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(_) => return,
    };
    for entry in entries.flatten() {
        let name = entry.file_name();
        if let Some(name) = name.to_str() {
            if name.starts_with(&prefix) {
                info!("removing interrupted rewrite artifact {}", name);
                let _ = fs::remove_file(entry.path());
            }
        }
    }
}

/// Atomically replace `path` with `content` using the same temp-file +
/// rename discipline as the queue rewrite. Used for small state files.
pub(crate) fn atomic_write(path: &Path, content: &str) -> Result<(), StoreError> {
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir)?;
    }
    let lines: Vec<String> = content
        .split('\n')
        .map(|l| l.trim_end_matches('\r').to_string())
        .filter(|l| !l.is_empty())
        .collect();
    rewrite_records(path, &lines)
}
