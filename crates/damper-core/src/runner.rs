//! The runner loop: wait out the scheduled time, re-check, execute.
//!
//! A runner owns the key's pending slot from the moment it claims it until
//! it releases it. The state lock is held only across decision points; the
//! runner sleeps and executes with the lock dropped.

use std::time::Duration;

use tracing::debug;

use crate::clock::{now_ms, RunnerStamp};
use crate::engine::Request;
use crate::error::Result;
use crate::exec;
use crate::lock::StateLock;
use crate::store::{Key, Mode, StateDir};

/// Exclusive ownership of a key's `pending_pid` / `runner_stamp` slot.
///
/// Releasing is guaranteed: if the runner unwinds without a clean release,
/// the drop guard clears the slot so a crashed decision path never leaves a
/// live-looking runner behind.
pub struct RunnerSlot<'a> {
    store: &'a StateDir,
    key: Key,
    released: bool,
}

impl<'a> RunnerSlot<'a> {
    /// Claim the slot. Caller must hold the key's state lock.
    pub fn claim(store: &'a StateDir, key: &Key) -> Result<Self> {
        store.write_runner(key, &RunnerStamp::current())?;
        Ok(Self {
            store,
            key: key.clone(),
            released: false,
        })
    }

    /// Clear the slot files. Caller should hold the key's state lock.
    pub fn release(&mut self) -> Result<()> {
        if !self.released {
            self.store.clear_runner(&self.key)?;
            self.released = true;
        }
        Ok(())
    }
}

impl Drop for RunnerSlot<'_> {
    fn drop(&mut self) {
        if !self.released {
            let _ = self.store.clear_runner(&self.key);
        }
    }
}

/// Drive a claimed key to completion.
///
/// `commit_ref` is the wall-clock ms at which the current schedule was
/// committed; an execution recorded after it (by either mode of the id)
/// proves the pending fire redundant and it is skipped.
///
/// Returns the exit code of the execution this runner performed, or `None`
/// when every pending fire was skipped or the key was reset underneath us.
pub fn run(
    store: &StateDir,
    req: &Request,
    key: &Key,
    mut slot: RunnerSlot<'_>,
    mut commit_ref: u64,
) -> Result<Option<i32>> {
    let lock_path = store.state_lock_path(key);
    let mut fired: Option<i32> = None;

    loop {
        // Read the current target, then sleep with the lock dropped.
        let target = {
            let _lock = StateLock::acquire(&lock_path, store.lock_wait_ms())?;
            match store.read_ms(&store.timer_path(key))? {
                Some(t) => t,
                None => {
                    // Reset swept the key out from under us.
                    slot.release()?;
                    return Ok(fired);
                }
            }
        };

        let now = now_ms();
        if target > now {
            debug!(key = %key, wait_ms = target - now, "runner sleeping");
            std::thread::sleep(Duration::from_millis(target - now));
            continue;
        }

        // Final pass: decide under the lock whether we still fire.
        {
            let _lock = StateLock::acquire(&lock_path, store.lock_wait_ms())?;

            match store.read_ms(&store.timer_path(key))? {
                None => {
                    slot.release()?;
                    return Ok(fired);
                }
                // A later call pushed the schedule out while we slept.
                Some(t) if t > now_ms() => continue,
                Some(_) => {}
            }

            let last = store.read_last_exec(&key.id)?;
            if last.is_some_and(|l| l > commit_ref) {
                debug!(key = %key, last_exec_ms = last.unwrap(), commit_ref, "smart skip");
                if key.mode == Mode::Throttle {
                    store.clear_dirty(key)?;
                }
                slot.release()?;
                return Ok(fired);
            }

            if key.mode == Mode::Throttle {
                if !(req.trailing && store.is_dirty(key)) {
                    // Window closed with nothing owed.
                    store.clear_dirty(key)?;
                    slot.release()?;
                    return Ok(fired);
                }
                // Consume the dirtiness we are about to serve; calls landing
                // during the execution mark it anew.
                store.clear_dirty(key)?;
            }
        }

        let outcome = exec::execute(store, key, req.timeout_ms)?;
        if !outcome.ran {
            let _lock = StateLock::acquire(&lock_path, store.lock_wait_ms())?;
            slot.release()?;
            return Ok(fired);
        }
        fired = Some(outcome.code);

        // Post-execution bookkeeping.
        let _lock = StateLock::acquire(&lock_path, store.lock_wait_ms())?;
        if key.mode == Mode::Throttle && req.trailing && store.is_dirty(key) {
            // Calls arrived while the child ran: re-arm from execution time.
            let next = outcome.at_ms.saturating_add(req.delay_ms);
            debug!(key = %key, window_end_ms = next, "re-arming throttle window");
            store.write_ms(&store.timer_path(key), next)?;
            commit_ref = outcome.at_ms;
            continue;
        }
        slot.release()?;
        return Ok(fired);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_slot_claim_and_release() {
        let temp = TempDir::new().unwrap();
        let store = StateDir::open(temp.path()).unwrap();
        let key = Key::new(Mode::Debounce, "slot");

        let mut slot = RunnerSlot::claim(&store, &key).unwrap();
        assert!(store.read_stamp(&key).unwrap().is_some());
        assert!(store.pid_path(&key).exists());

        slot.release().unwrap();
        assert!(store.read_stamp(&key).unwrap().is_none());
    }

    #[test]
    fn test_slot_drop_guard_clears_files() {
        let temp = TempDir::new().unwrap();
        let store = StateDir::open(temp.path()).unwrap();
        let key = Key::new(Mode::Throttle, "guard");

        {
            let _slot = RunnerSlot::claim(&store, &key).unwrap();
            assert!(store.pid_path(&key).exists());
        }
        assert!(!store.pid_path(&key).exists());
        assert!(store.read_stamp(&key).unwrap().is_none());
    }
}
