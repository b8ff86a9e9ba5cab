//! Reset: cancel a pending schedule, terminating its runner if one is live.

use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::clock::RunnerStamp;
use crate::error::Result;
use crate::lock::StateLock;
use crate::store::{Key, Mode, StateDir};

/// Grace between SIGTERM and SIGKILL when terminating a runner.
const RESET_GRACE: Duration = Duration::from_millis(100);
const POLL_TICK: Duration = Duration::from_millis(10);

/// Cancel the (mode, id) schedule and delete its per-key files.
/// `last_exec_ms` for the id is preserved.
pub fn reset(store: &StateDir, mode: Mode, id: &str) -> Result<()> {
    let key = Key::new(mode, id);
    let lock_path = store.state_lock_path(&key);

    // Read the stamp under the lock, but drop it before the termination
    // grace: the state lock is never held across a wait.
    let stamp = {
        let _lock = StateLock::acquire(&lock_path, store.lock_wait_ms())?;
        store.read_stamp(&key)?
    };

    if let Some(stamp) = stamp {
        // Signals go only to a verified stamp; a reused pid never gets one.
        if stamp.is_alive() {
            terminate(&stamp);
        }
    }

    let _lock = StateLock::acquire(&lock_path, store.lock_wait_ms())?;
    store.remove_key_files(&key)?;
    debug!(key = %key, "reset cleared per-key state");
    Ok(())
}

/// Reset both modes of an id, then delete the per-id files
/// (`last_exec_ms` and the run lock).
pub fn reset_all(store: &StateDir, id: &str) -> Result<()> {
    for mode in Mode::ALL {
        reset(store, mode, id)?;
    }
    store.remove_id_files(id)?;
    Ok(())
}

fn terminate(stamp: &RunnerStamp) {
    debug!(pid = stamp.pid, "terminating runner");
    unsafe {
        libc::kill(stamp.pid as libc::pid_t, libc::SIGTERM);
    }

    let deadline = Instant::now() + RESET_GRACE;
    while Instant::now() < deadline {
        if !stamp.is_alive() {
            return;
        }
        std::thread::sleep(POLL_TICK);
    }

    if stamp.is_alive() {
        warn!(pid = stamp.pid, "runner ignored SIGTERM, sending SIGKILL");
        unsafe {
            libc::kill(stamp.pid as libc::pid_t, libc::SIGKILL);
        }
    }
}
