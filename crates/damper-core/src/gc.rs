//! Stale-state garbage collection.
//!
//! Sweeps are opportunistic: any invocation may trigger one near its end,
//! guarded by a dedicated non-blocking lock and a marker holding the last
//! sweep time. Files older than the stale threshold are removed unless a
//! live runner is associated with their key.

use std::collections::HashSet;
use std::time::SystemTime;

use tracing::debug;

use crate::clock::now_ms;
use crate::error::Result;
use crate::lock::RunLock;
use crate::store::{Key, Mode, StateDir};

/// Sweep cadence and staleness threshold.
#[derive(Debug, Clone, Copy)]
pub struct GcPolicy {
    /// Minimum interval between sweeps.
    pub interval_ms: u64,
    /// Minimum age of a file before it is eligible for removal.
    pub stale_after_ms: u64,
}

impl Default for GcPolicy {
    fn default() -> Self {
        Self {
            interval_ms: 600_000,
            stale_after_ms: 3_600_000,
        }
    }
}

/// Opportunistic sweep: skips silently when another process is sweeping or
/// the last sweep is recent. Returns the number of files removed.
pub fn maybe_sweep(store: &StateDir, policy: &GcPolicy) -> Result<usize> {
    let Some(_lock) = RunLock::try_acquire(&store.sweep_lock_path())? else {
        return Ok(0);
    };

    let now = now_ms();
    if let Some(mark) = store.read_ms(&store.sweep_marker_path())? {
        if now.saturating_sub(mark) < policy.interval_ms {
            return Ok(0);
        }
    }
    store.write_ms(&store.sweep_marker_path(), now)?;

    sweep_locked(store, policy)
}

/// Sweep regardless of the marker age (the explicit `--gc` path). Still
/// skips when another process holds the sweep lock.
pub fn force_sweep(store: &StateDir, policy: &GcPolicy) -> Result<usize> {
    let Some(_lock) = RunLock::try_acquire(&store.sweep_lock_path())? else {
        return Ok(0);
    };
    store.write_ms(&store.sweep_marker_path(), now_ms())?;
    sweep_locked(store, policy)
}

fn sweep_locked(store: &StateDir, policy: &GcPolicy) -> Result<usize> {
    // Full key stems ("debounce-<id>") whose runner stamp verifies live.
    // Per-key files are protected only by their own (mode, id) runner;
    // per-id files by a live runner in either mode.
    let mut live: HashSet<String> = HashSet::new();
    for entry in std::fs::read_dir(store.root())? {
        let entry = entry?;
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        let Some(stem) = name.strip_suffix(".stamp") else {
            continue;
        };
        let Some(key) = stem_key(stem) else { continue };
        let alive = store
            .read_stamp(&key)
            .ok()
            .flatten()
            .is_some_and(|s| s.is_alive());
        if alive {
            live.insert(stem.to_string());
        }
    }

    let mut removed = 0;
    for entry in std::fs::read_dir(store.root())? {
        let entry = entry?;
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        if name == "sweep.at" || name == "sweep.lock" {
            continue;
        }

        let Ok(meta) = entry.metadata() else { continue };
        let Ok(modified) = meta.modified() else { continue };
        let age_ms = SystemTime::now()
            .duration_since(modified)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);
        if age_ms < policy.stale_after_ms {
            continue;
        }

        let stem = name.rsplit_once('.').map_or(name, |(s, _)| s);
        let protected = match stem.strip_prefix("id-") {
            Some(enc) => Mode::ALL
                .iter()
                .any(|mode| live.contains(&format!("{}-{}", mode, enc))),
            None => live.contains(stem),
        };
        if protected {
            continue;
        }

        if std::fs::remove_file(entry.path()).is_ok() {
            debug!(file = name, age_ms, "gc removed stale state file");
            removed += 1;
        }
    }

    Ok(removed)
}

fn stem_key(stem: &str) -> Option<Key> {
    for mode in Mode::ALL {
        if let Some(enc) = stem.strip_prefix(&format!("{}-", mode)) {
            return crate::store::decode_id(enc).map(|id| Key::new(mode, id));
        }
    }
    None
}
