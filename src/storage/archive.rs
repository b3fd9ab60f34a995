//! Date-partitioned archive log.
//!
//! Every reading gets a permanent copy here regardless of delivery state,
//! one file per local calendar date (`archive/2026-03-15.jsonl`). Rotation
//! is purely by filename: a new date label opens a new file. The running
//! system appends and nothing else; archive files are never read back,
//! truncated, or compacted.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::PathBuf;

use fs2::FileExt;

use super::StoreError;

/// Partition label used when the wall clock is not trustworthy.
pub const FALLBACK_PARTITION: &str = "unknown";

pub struct ArchiveLog {
    dir: PathBuf,
}

impl ArchiveLog {
    /// Create the archive directory if needed.
    pub fn new<P: Into<PathBuf>>(dir: P) -> Result<Self, StoreError> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(ArchiveLog { dir })
    }

    /// Append one record to the partition for `date_label` (a `YYYY-MM-DD`
    /// string, or [`FALLBACK_PARTITION`]). Errors are returned so the
    /// caller can log them, but archival is best-effort by contract: the
    /// orchestrator swallows failures and continues with delivery.
    pub fn append(&self, date_label: &str, record: &str) -> Result<(), StoreError> {
        debug_assert!(!record.contains('\n'), "archive records are single lines");
        let path = self.dir.join(format!("{}.jsonl", date_label));
        let mut file = OpenOptions::new().create(true).append(true).open(path)?;
        file.lock_exclusive()?;
        writeln!(file, "{}", record)?;
        file.flush()?;
        Ok(())
    }

    /// Number of day partitions on disk; used by the `status` command.
    pub fn partition_count(&self) -> usize {
        fs::read_dir(&self.dir)
            .map(|entries| {
                entries
                    .flatten()
                    .filter(|e| {
                        e.path()
                            .extension()
                            .map(|ext| ext == "jsonl")
                            .unwrap_or(false)
                    })
                    .count()
            })
            .unwrap_or(0)
    }
}
