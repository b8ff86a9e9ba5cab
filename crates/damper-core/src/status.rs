//! Best-effort enumeration of the state store for display.
//!
//! Reads are lock-free: status is an observation tool and tolerates files
//! changing underneath it.

use std::collections::BTreeSet;
use std::time::SystemTime;

use serde::Serialize;

use crate::clock::RunnerStamp;
use crate::error::Result;
use crate::store::{decode_id, Key, Mode, StateDir};

/// Snapshot of one (mode, id) slot.
#[derive(Debug, Clone, Serialize)]
pub struct KeyStatus {
    pub mode: Mode,
    pub id: String,
    /// A runner with a verified stamp currently owns the key.
    pub alive: bool,
    pub pid: Option<u32>,
    /// Most recent execution for the id, either mode.
    pub last_exec_ms: Option<u64>,
    /// Pending deadline (debounce) or window end (throttle).
    pub scheduled_ms: Option<u64>,
    /// Milliseconds since the key was last called.
    pub age_ms: Option<u64>,
    pub dirty: bool,
    pub cmd: Vec<String>,
}

/// Enumerate every key in the store, sorted by id then mode.
pub fn collect(store: &StateDir) -> Result<Vec<KeyStatus>> {
    let mut stems: BTreeSet<(String, Mode)> = BTreeSet::new();

    for entry in std::fs::read_dir(store.root())? {
        let entry = entry?;
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        let stem = name.rsplit_once('.').map_or(name, |(s, _)| s);
        for mode in Mode::ALL {
            if let Some(enc) = stem.strip_prefix(&format!("{}-", mode)) {
                if let Some(id) = decode_id(enc) {
                    stems.insert((id, mode));
                }
            }
        }
    }

    let mut out = Vec::with_capacity(stems.len());
    for (id, mode) in stems {
        if let Some(status) = collect_one(store, &Key::new(mode, id))? {
            out.push(status);
        }
    }
    Ok(out)
}

/// Snapshot a single key. `None` when no state exists for it.
pub fn collect_one(store: &StateDir, key: &Key) -> Result<Option<KeyStatus>> {
    let cmd = store.read_cmd(key)?;
    let scheduled_ms = store.read_ms(&store.timer_path(key))?;
    let stamp = store.read_stamp(key)?;

    if cmd.is_none() && scheduled_ms.is_none() && stamp.is_none() {
        return Ok(None);
    }

    let alive = stamp.as_ref().is_some_and(RunnerStamp::is_alive);
    let age_ms = file_age_ms(store, key);

    Ok(Some(KeyStatus {
        mode: key.mode,
        id: key.id.clone(),
        alive,
        pid: stamp.map(|s| s.pid),
        last_exec_ms: store.read_last_exec(&key.id)?,
        scheduled_ms,
        age_ms,
        dirty: store.is_dirty(key),
        cmd: cmd
            .unwrap_or_default()
            .iter()
            .map(|a| a.to_string_lossy().into_owned())
            .collect(),
    }))
}

/// Age of the most recent call, from the cmd blob's mtime.
fn file_age_ms(store: &StateDir, key: &Key) -> Option<u64> {
    let modified = std::fs::metadata(store.cmd_path(key))
        .and_then(|m| m.modified())
        .ok()?;
    SystemTime::now()
        .duration_since(modified)
        .ok()
        .map(|d| d.as_millis() as u64)
}
