//! Single-flight child execution with optional timeout supervision.

use std::os::unix::process::ExitStatusExt;
use std::process::{Child, Command, ExitStatus};
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::clock::now_ms;
use crate::error::{Result, EXIT_TIMEOUT};
use crate::lock::RunLock;
use crate::store::{Key, StateDir};

/// Poll tick while supervising a timed child.
const POLL_TICK: Duration = Duration::from_millis(10);
/// Grace between SIGTERM and SIGKILL.
const KILL_GRACE: Duration = Duration::from_millis(100);

/// Result of one executor pass.
#[derive(Debug, Clone, Copy)]
pub struct ExecOutcome {
    /// False when the cmd blob was gone (a reset or smart skip raced in).
    pub ran: bool,
    /// Child exit code, or the wire timeout code.
    pub code: i32,
    /// Wall-clock ms at which the child was spawned.
    pub at_ms: u64,
}

impl ExecOutcome {
    fn skipped() -> Self {
        Self {
            ran: false,
            code: 0,
            at_ms: now_ms(),
        }
    }
}

/// Execute the key's pending command under the per-id run lock.
///
/// The blob is re-read inside the lock so the child always gets the most
/// recent argv. `last_exec_ms` is recorded before the lock is released,
/// which keeps it monotone for the id.
pub fn execute(store: &StateDir, key: &Key, timeout_ms: Option<u64>) -> Result<ExecOutcome> {
    let run_lock = RunLock::acquire(&store.run_lock_path(&key.id))?;

    let argv = match store.read_cmd(key)? {
        Some(argv) => argv,
        None => {
            debug!(key = %key, "empty cmd blob, nothing to execute");
            return Ok(ExecOutcome::skipped());
        }
    };

    let at_ms = now_ms();
    let mut cmd = Command::new(&argv[0]);
    cmd.args(&argv[1..]);

    debug!(key = %key, argv = ?argv, "spawning child");
    let child = match cmd.spawn() {
        Ok(child) => child,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            // Shell convention for an unrunnable command.
            warn!(key = %key, "command not found: {:?}", argv[0]);
            store.record_last_exec(&key.id, at_ms)?;
            return Ok(ExecOutcome {
                ran: true,
                code: 127,
                at_ms,
            });
        }
        Err(e) => return Err(e.into()),
    };

    let code = match timeout_ms {
        Some(limit) => supervise(child, Duration::from_millis(limit))?,
        None => {
            let mut child = child;
            exit_code(child.wait()?)
        }
    };

    store.record_last_exec(&key.id, at_ms)?;
    drop(run_lock);

    Ok(ExecOutcome {
        ran: true,
        code,
        at_ms,
    })
}

/// Wait for the child up to `limit`, then escalate SIGTERM → grace → SIGKILL.
fn supervise(mut child: Child, limit: Duration) -> Result<i32> {
    let deadline = Instant::now() + limit;

    loop {
        if let Some(status) = child.try_wait()? {
            return Ok(exit_code(status));
        }
        if Instant::now() >= deadline {
            break;
        }
        std::thread::sleep(POLL_TICK);
    }

    let pid = child.id() as libc::pid_t;
    debug!(pid, "child exceeded timeout, sending SIGTERM");
    unsafe {
        libc::kill(pid, libc::SIGTERM);
    }

    let grace_deadline = Instant::now() + KILL_GRACE;
    loop {
        if child.try_wait()?.is_some() {
            return Ok(EXIT_TIMEOUT);
        }
        if Instant::now() >= grace_deadline {
            break;
        }
        std::thread::sleep(POLL_TICK);
    }

    warn!(pid, "child ignored SIGTERM, sending SIGKILL");
    unsafe {
        libc::kill(pid, libc::SIGKILL);
    }
    // SIGKILL cannot be ignored; reap so no zombie outlives the caller.
    child.wait()?;
    Ok(EXIT_TIMEOUT)
}

fn exit_code(status: ExitStatus) -> i32 {
    status
        .code()
        .unwrap_or_else(|| 128 + status.signal().unwrap_or(0))
}
