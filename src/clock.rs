//! Wall-clock and uptime source.
//!
//! Timestamps come from the local clock in ISO 8601 with the zone offset,
//! matching the format downstream expects in payloads and archive names.
//! A host clock that has not been set (container cold boot, dead RTC)
//! reads as some time before the year 2000; in that state the clock is
//! reported unsynced and the epoch sentinel / `unknown` archive partition
//! are used instead of a misleading timestamp.

use std::time::Instant;

use chrono::{Datelike, Local, SecondsFormat};

use crate::storage::archive::FALLBACK_PARTITION;

/// Timestamp emitted while the wall clock is not trustworthy.
pub const EPOCH_SENTINEL: &str = "1970-01-01T00:00:00+00:00";

/// Time capability the orchestrator and payload builders depend on.
pub trait TimeSource: Send {
    /// ISO 8601 timestamp with zone offset, or [`EPOCH_SENTINEL`] when
    /// unsynced.
    fn iso_timestamp(&self) -> String;

    fn is_synced(&self) -> bool;

    /// Seconds since this process started.
    fn uptime_seconds(&self) -> u64;

    /// Archive partition label: local `YYYY-MM-DD`, or the fallback
    /// partition when unsynced.
    fn date_label(&self) -> String;
}

pub struct SystemClock {
    boot: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        SystemClock {
            boot: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl TimeSource for SystemClock {
    fn iso_timestamp(&self) -> String {
        if !self.is_synced() {
            return EPOCH_SENTINEL.to_string();
        }
        Local::now().to_rfc3339_opts(SecondsFormat::Secs, false)
    }

    fn is_synced(&self) -> bool {
        Local::now().year() >= 2000
    }

    fn uptime_seconds(&self) -> u64 {
        self.boot.elapsed().as_secs()
    }

    fn date_label(&self) -> String {
        if !self.is_synced() {
            return FALLBACK_PARTITION.to_string();
        }
        Local::now().format("%Y-%m-%d").to_string()
    }
}
