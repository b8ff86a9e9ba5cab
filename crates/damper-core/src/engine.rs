//! The decision engine: every invocation lands here after argument
//! validation, takes the key's state lock, and leaves with one of four
//! outcomes: execute now, become the runner, attach to an existing runner,
//! or skip.

use std::ffi::OsString;

use tracing::debug;

use crate::clock::{now_ms, RunnerStamp};
use crate::error::{EngineError, Result, EXIT_BUSY_SKIP, EXIT_QUEUED};
use crate::exec;
use crate::lock::StateLock;
use crate::runner::{self, RunnerSlot};
use crate::store::{Key, Mode, StateDir};

/// One coordination request, as parsed from the command line.
#[derive(Debug, Clone)]
pub struct Request {
    pub mode: Mode,
    pub id: String,
    /// Debounce interval / throttle window, in milliseconds.
    pub delay_ms: u64,
    pub leading: bool,
    pub trailing: bool,
    /// Skip outright (exit 76) when a live runner owns the key.
    pub no_wait: bool,
    /// Kill the child after this many milliseconds (exit 79).
    pub timeout_ms: Option<u64>,
    /// Command to execute, argv[0] first.
    pub argv: Vec<OsString>,
}

impl Request {
    fn validate(&self) -> Result<()> {
        if self.id.is_empty() {
            return Err(EngineError::Usage("id must be non-empty".into()));
        }
        if self.delay_ms == 0 {
            return Err(EngineError::Usage(
                "delay must be a positive integer of milliseconds".into(),
            ));
        }
        if !self.leading && !self.trailing {
            return Err(EngineError::Usage(
                "at least one of --leading and --trailing must be true".into(),
            ));
        }
        if self.argv.is_empty() {
            return Err(EngineError::Usage("missing command to execute".into()));
        }
        if self
            .argv
            .iter()
            .any(|a| a.as_encoded_bytes().contains(&0))
        {
            return Err(EngineError::Usage(
                "command arguments must not contain NUL bytes".into(),
            ));
        }
        Ok(())
    }
}

/// What an invocation does after the decision lock is released.
enum Plan<'a> {
    /// Terminal: return this exit code.
    Done(i32),
    /// Execute the leading edge now; no trailing follow-up.
    Lead,
    /// Execute the leading edge now, then wait out the schedule.
    LeadTrail { slot: RunnerSlot<'a> },
    /// Become the runner and wait out the schedule.
    Trail {
        slot: RunnerSlot<'a>,
        commit_ref: u64,
    },
}

/// Coordinate one invocation. Returns the process exit code.
pub fn invoke(store: &StateDir, req: &Request) -> Result<i32> {
    req.validate()?;
    let key = Key::new(req.mode, req.id.clone());

    let lock = StateLock::acquire(&store.state_lock_path(&key), store.lock_wait_ms())?;
    let plan = decide(store, req, &key)?;
    // Decisions only under the lock; sleeps and children run without it.
    drop(lock);

    match plan {
        Plan::Done(code) => Ok(code),
        Plan::Lead => Ok(exec::execute(store, &key, req.timeout_ms)?.code),
        Plan::LeadTrail { slot } => {
            let lead = exec::execute(store, &key, req.timeout_ms)?;
            // The leading fire is this runner's commitment point: only an
            // execution recorded after it cancels the trailing edge.
            let trailed = runner::run(store, req, &key, slot, lead.at_ms)?;
            Ok(trailed.unwrap_or(lead.code))
        }
        Plan::Trail { slot, commit_ref } => {
            Ok(runner::run(store, req, &key, slot, commit_ref)?.unwrap_or(0))
        }
    }
}

/// The state machine proper. Caller holds the key's state lock.
fn decide<'a>(store: &'a StateDir, req: &Request, key: &Key) -> Result<Plan<'a>> {
    let now = now_ms();

    let stamp = store.read_stamp(key)?;
    let runner_alive = stamp.as_ref().is_some_and(RunnerStamp::is_alive);
    if let Some(stale) = stamp.filter(|_| !runner_alive) {
        // Dead-but-recorded runner: any caller may heal the slot.
        debug!(key = %key, pid = stale.pid, "clearing stale runner slot");
        store.clear_runner(key)?;
    }

    if runner_alive {
        if req.no_wait {
            // Pure skip-if-busy: nothing is touched.
            return Ok(Plan::Done(EXIT_BUSY_SKIP));
        }
        store.write_cmd(key, &req.argv)?;
        match req.mode {
            Mode::Debounce => {
                // Armed: push the deadline forward. Running (timer already
                // reached): the update above coalesces into the in-flight
                // execution.
                if let Some(t) = store.read_ms(&store.timer_path(key))? {
                    if t > now {
                        let pushed = t.max(now.saturating_add(req.delay_ms));
                        store.write_ms(&store.timer_path(key), pushed)?;
                    }
                }
            }
            Mode::Throttle => {
                // Fixed window: never advanced by calls inside it.
                store.set_dirty(key)?;
            }
        }
        debug!(key = %key, "attached to live runner");
        return Ok(Plan::Done(EXIT_QUEUED));
    }

    let timer = store.read_ms(&store.timer_path(key))?;
    let schedule_open = timer.is_some_and(|t| t > now);
    let target = now.saturating_add(req.delay_ms);

    match req.mode {
        Mode::Debounce => {
            if schedule_open {
                // Armed with no live runner: a leading-only call opened the
                // interval, or a runner died mid-schedule. Push the deadline;
                // a trailing-capable caller adopts the schedule.
                store.write_cmd(key, &req.argv)?;
                let pushed = target.max(timer.unwrap_or(0));
                store.write_ms(&store.timer_path(key), pushed)?;
                if req.trailing {
                    let slot = RunnerSlot::claim(store, key)?;
                    debug!(key = %key, deadline_ms = pushed, "adopted orphaned schedule");
                    return Ok(Plan::Trail {
                        slot,
                        commit_ref: now,
                    });
                }
                return Ok(Plan::Done(EXIT_QUEUED));
            }
            store.write_cmd(key, &req.argv)?;
            store.write_ms(&store.timer_path(key), target)?;
            if req.leading {
                if req.trailing {
                    let slot = RunnerSlot::claim(store, key)?;
                    Ok(Plan::LeadTrail { slot })
                } else {
                    Ok(Plan::Lead)
                }
            } else {
                let slot = RunnerSlot::claim(store, key)?;
                Ok(Plan::Trail {
                    slot,
                    commit_ref: now,
                })
            }
        }
        Mode::Throttle => {
            if schedule_open {
                // Window still open, runner gone (or leading fired without
                // trailing). A trailing-capable caller adopts the window.
                store.write_cmd(key, &req.argv)?;
                store.set_dirty(key)?;
                if req.trailing {
                    let slot = RunnerSlot::claim(store, key)?;
                    debug!(key = %key, "adopted open throttle window");
                    return Ok(Plan::Trail {
                        slot,
                        commit_ref: now,
                    });
                }
                return Ok(Plan::Done(EXIT_QUEUED));
            }
            store.write_cmd(key, &req.argv)?;
            store.write_ms(&store.timer_path(key), target)?;
            if req.leading {
                store.clear_dirty(key)?;
                if req.trailing {
                    let slot = RunnerSlot::claim(store, key)?;
                    Ok(Plan::LeadTrail { slot })
                } else {
                    Ok(Plan::Lead)
                }
            } else {
                store.set_dirty(key)?;
                let slot = RunnerSlot::claim(store, key)?;
                Ok(Plan::Trail {
                    slot,
                    commit_ref: now,
                })
            }
        }
    }
}
