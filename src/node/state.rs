//! Process-wide runtime counters.
//!
//! All mutable node-level state lives in one explicit value owned by the
//! orchestrator and passed to whoever needs to read it; there are no
//! ambient globals. Only the boot count survives restarts: it is loaded
//! from `node_state.json`, incremented once, and written back atomically
//! at startup.

use std::path::{Path, PathBuf};

use log::warn;
use serde::{Deserialize, Serialize};

use crate::storage;

#[derive(Debug, Default, Serialize, Deserialize)]
struct PersistedState {
    boot_count: u32,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RuntimeCounters {
    /// Number of process starts, 1-based after the first boot.
    pub boot_count: u32,
    /// Readings sampled since this boot.
    pub reading_count: u64,
    /// Publish attempts that failed or found the broker down.
    pub publish_failures: u64,
}

impl RuntimeCounters {
    /// Load the persisted boot count from `data_dir`, increment it, and
    /// persist the new value. State-file problems degrade to a fresh
    /// counter; losing a boot count is not worth refusing to start.
    pub fn load(data_dir: &Path) -> Self {
        let path = state_path(data_dir);
        let previous = match std::fs::read_to_string(&path) {
            Ok(content) => serde_json::from_str::<PersistedState>(&content)
                .map(|s| s.boot_count)
                .unwrap_or_else(|e| {
                    warn!("unreadable state file {}: {}", path.display(), e);
                    0
                }),
            Err(_) => 0,
        };
        let state = PersistedState {
            boot_count: previous.saturating_add(1),
        };
        match serde_json::to_string(&state) {
            Ok(content) => {
                if let Err(e) = storage::atomic_write(&path, &content) {
                    warn!("cannot persist boot count to {}: {}", path.display(), e);
                }
            }
            Err(e) => warn!("cannot serialize node state: {}", e),
        }
        RuntimeCounters {
            boot_count: state.boot_count,
            reading_count: 0,
            publish_failures: 0,
        }
    }

    /// Read the persisted boot count without bumping it (used by the
    /// `status` command).
    pub fn peek_boot_count(data_dir: &Path) -> u32 {
        let path = state_path(data_dir);
        std::fs::read_to_string(&path)
            .ok()
            .and_then(|content| serde_json::from_str::<PersistedState>(&content).ok())
            .map(|s| s.boot_count)
            .unwrap_or(0)
    }
}

fn state_path(data_dir: &Path) -> PathBuf {
    data_dir.join("node_state.json")
}
