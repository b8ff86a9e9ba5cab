//! Wall-clock time source and runner identity.
//!
//! A runner is identified by a stamp of (pid, start_ms, os_start_token).
//! The token is whatever string the OS yields for the process's creation
//! time; a pid match with a token mismatch means the pid was reused and the
//! stored stamp is dead. No signal is ever sent on a mismatched stamp.

use serde::{Deserialize, Serialize};

/// Current wall-clock time in milliseconds since the Unix epoch.
pub fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Identity of the process that owns a key's pending slot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunnerStamp {
    /// Runner process id
    pub pid: u32,
    /// Wall-clock ms at which the runner claimed the slot
    pub start_ms: u64,
    /// OS-reported process creation token, used to detect pid reuse
    pub os_start_token: String,
}

impl RunnerStamp {
    /// Stamp for the current process.
    pub fn current() -> Self {
        let pid = std::process::id();
        Self {
            pid,
            start_ms: now_ms(),
            os_start_token: os_start_token(pid).unwrap_or_default(),
        }
    }

    /// True iff the stamped pid exists and its creation token still matches.
    pub fn is_alive(&self) -> bool {
        if !pid_exists(self.pid) {
            return false;
        }
        match os_start_token(self.pid) {
            Some(token) => token == self.os_start_token,
            // Token unavailable (e.g. procfs raced with process exit):
            // only trust the pid when we never had a token to compare.
            None => self.os_start_token.is_empty(),
        }
    }
}

/// Signal-zero existence check.
fn pid_exists(pid: u32) -> bool {
    if pid == 0 {
        return false;
    }
    let rc = unsafe { libc::kill(pid as libc::pid_t, 0) };
    if rc == 0 {
        return true;
    }
    // EPERM means the process exists but belongs to someone else.
    std::io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
}

/// OS creation token for a pid, if the platform can provide one.
#[cfg(target_os = "linux")]
pub fn os_start_token(pid: u32) -> Option<String> {
    // Field 22 of /proc/<pid>/stat is the kernel start time in clock ticks.
    // The comm field can contain spaces and parens, so parse after the
    // last ')': the remainder starts at field 3.
    let stat = std::fs::read_to_string(format!("/proc/{}/stat", pid)).ok()?;
    let rest = &stat[stat.rfind(')')? + 1..];
    rest.split_whitespace().nth(19).map(str::to_string)
}

#[cfg(not(target_os = "linux"))]
pub fn os_start_token(pid: u32) -> Option<String> {
    let out = std::process::Command::new("ps")
        .args(["-p", &pid.to_string(), "-o", "lstart="])
        .output()
        .ok()?;
    if !out.status.success() {
        return None;
    }
    let token = String::from_utf8_lossy(&out.stdout).trim().to_string();
    if token.is_empty() {
        None
    } else {
        Some(token)
    }
}
