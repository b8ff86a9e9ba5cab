//! On-disk state store: one flat directory of per-key and per-id files.
//!
//! Layout inside the state directory:
//!
//! ```text
//! <state_dir>/
//!   debounce-<id>.lock     state lock for (debounce, id)
//!   debounce-<id>.cmd      NUL-delimited argv of the pending command
//!   debounce-<id>.pid      pending runner pid (decimal)
//!   debounce-<id>.stamp    runner stamp (JSON)
//!   debounce-<id>.at       deadline_ms (debounce) / window_end_ms (throttle)
//!   throttle-<id>.dirty    trailing execution owed for the open window
//!   id-<id>.runlock        single-flight run lock, shared by both modes
//!   id-<id>.last           last_exec_ms, shared by both modes
//!   sweep.at               timestamp of the last GC sweep
//!   sweep.lock             GC sweep lock
//! ```
//!
//! Ids are percent-encoded into filenames. Files are regenerated freely;
//! there is no format versioning and the store is not durable.

use std::ffi::{OsStr, OsString};
use std::fmt;
use std::fs;
use std::os::unix::ffi::{OsStrExt, OsStringExt};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::clock::RunnerStamp;
use crate::error::{EngineError, Result};

/// Timing policy applied to a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    Debounce,
    Throttle,
}

impl Mode {
    pub const ALL: [Mode; 2] = [Mode::Debounce, Mode::Throttle];

    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Debounce => "debounce",
            Mode::Throttle => "throttle",
        }
    }

    pub fn parse(s: &str) -> Option<Mode> {
        match s {
            "debounce" => Some(Mode::Debounce),
            "throttle" => Some(Mode::Throttle),
            _ => None,
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A (mode, id) pair naming one state slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Key {
    pub mode: Mode,
    pub id: String,
}

impl Key {
    pub fn new(mode: Mode, id: impl Into<String>) -> Self {
        Self {
            mode,
            id: id.into(),
        }
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.mode, self.id)
    }
}

/// Handle to the state directory.
#[derive(Debug, Clone)]
pub struct StateDir {
    root: PathBuf,
    lock_wait_ms: u64,
}

impl StateDir {
    /// Open (creating if needed) the state directory.
    ///
    /// Refuses to operate through a symlinked root: a world-writable tmp
    /// directory must not redirect writes elsewhere.
    pub fn open(root: &Path) -> Result<Self> {
        if let Ok(meta) = fs::symlink_metadata(root) {
            if meta.file_type().is_symlink() {
                return Err(EngineError::Io(std::io::Error::new(
                    std::io::ErrorKind::InvalidInput,
                    format!("state directory {} is a symlink", root.display()),
                )));
            }
            if !meta.is_dir() {
                return Err(EngineError::Io(std::io::Error::new(
                    std::io::ErrorKind::NotADirectory,
                    format!("state directory {} is not a directory", root.display()),
                )));
            }
        } else {
            fs::create_dir_all(root)?;
        }

        Ok(Self {
            root: root.to_path_buf(),
            lock_wait_ms: 50,
        })
    }

    /// Override the bounded state-lock wait (defaults to 50 ms).
    pub fn with_lock_wait_ms(mut self, ms: u64) -> Self {
        self.lock_wait_ms = ms;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn lock_wait_ms(&self) -> u64 {
        self.lock_wait_ms
    }

    // ========== Paths ==========

    fn key_stem(key: &Key) -> String {
        format!("{}-{}", key.mode, encode_id(&key.id))
    }

    fn id_stem(id: &str) -> String {
        format!("id-{}", encode_id(id))
    }

    pub fn state_lock_path(&self, key: &Key) -> PathBuf {
        self.root.join(format!("{}.lock", Self::key_stem(key)))
    }

    pub fn cmd_path(&self, key: &Key) -> PathBuf {
        self.root.join(format!("{}.cmd", Self::key_stem(key)))
    }

    pub fn pid_path(&self, key: &Key) -> PathBuf {
        self.root.join(format!("{}.pid", Self::key_stem(key)))
    }

    pub fn stamp_path(&self, key: &Key) -> PathBuf {
        self.root.join(format!("{}.stamp", Self::key_stem(key)))
    }

    /// Deadline (debounce) or window end (throttle), wall-clock ms.
    pub fn timer_path(&self, key: &Key) -> PathBuf {
        self.root.join(format!("{}.at", Self::key_stem(key)))
    }

    pub fn dirty_path(&self, key: &Key) -> PathBuf {
        self.root.join(format!("{}.dirty", Self::key_stem(key)))
    }

    pub fn run_lock_path(&self, id: &str) -> PathBuf {
        self.root.join(format!("{}.runlock", Self::id_stem(id)))
    }

    pub fn last_exec_path(&self, id: &str) -> PathBuf {
        self.root.join(format!("{}.last", Self::id_stem(id)))
    }

    pub fn sweep_marker_path(&self) -> PathBuf {
        self.root.join("sweep.at")
    }

    pub fn sweep_lock_path(&self) -> PathBuf {
        self.root.join("sweep.lock")
    }

    // ========== Field I/O ==========

    /// Write a file atomically via a temporary sibling and rename.
    pub fn atomic_write(&self, target: &Path, data: &[u8]) -> Result<()> {
        let name = target
            .file_name()
            .and_then(OsStr::to_str)
            .unwrap_or("field");
        let tmp = self
            .root
            .join(format!(".tmp.{}.{}", std::process::id(), name));
        fs::write(&tmp, data)?;
        fs::rename(&tmp, target)?;
        Ok(())
    }

    /// Read a millisecond timestamp field. Missing or garbled files read as
    /// absent; the store regenerates them freely.
    pub fn read_ms(&self, path: &Path) -> Result<Option<u64>> {
        match fs::read_to_string(path) {
            Ok(s) => Ok(s.trim().parse().ok()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub fn write_ms(&self, path: &Path, value: u64) -> Result<()> {
        self.atomic_write(path, value.to_string().as_bytes())
    }

    /// Read the pending command argv for a key. `None` when absent or empty.
    pub fn read_cmd(&self, key: &Key) -> Result<Option<Vec<OsString>>> {
        match fs::read(self.cmd_path(key)) {
            Ok(bytes) => {
                let argv = decode_argv(&bytes);
                Ok(if argv.is_empty() { None } else { Some(argv) })
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub fn write_cmd(&self, key: &Key, argv: &[OsString]) -> Result<()> {
        self.atomic_write(&self.cmd_path(key), &encode_argv(argv))
    }

    /// Read the runner stamp for a key. Garbled stamps read as absent.
    pub fn read_stamp(&self, key: &Key) -> Result<Option<RunnerStamp>> {
        match fs::read(self.stamp_path(key)) {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes).ok()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Claim the runner slot for a key: pending pid plus verified stamp.
    pub fn write_runner(&self, key: &Key, stamp: &RunnerStamp) -> Result<()> {
        self.atomic_write(&self.pid_path(key), stamp.pid.to_string().as_bytes())?;
        let json = serde_json::to_vec(stamp).map_err(|e| {
            EngineError::Io(std::io::Error::new(std::io::ErrorKind::InvalidData, e))
        })?;
        self.atomic_write(&self.stamp_path(key), &json)
    }

    /// Release the runner slot. Tolerates already-missing files.
    pub fn clear_runner(&self, key: &Key) -> Result<()> {
        remove_if_exists(&self.pid_path(key))?;
        remove_if_exists(&self.stamp_path(key))?;
        Ok(())
    }

    pub fn set_dirty(&self, key: &Key) -> Result<()> {
        self.atomic_write(&self.dirty_path(key), b"1")
    }

    pub fn clear_dirty(&self, key: &Key) -> Result<()> {
        remove_if_exists(&self.dirty_path(key))
    }

    pub fn is_dirty(&self, key: &Key) -> bool {
        self.dirty_path(key).exists()
    }

    pub fn read_last_exec(&self, id: &str) -> Result<Option<u64>> {
        self.read_ms(&self.last_exec_path(id))
    }

    /// Record an execution time. `last_exec_ms` is monotonically
    /// non-decreasing; callers must hold the run lock for the id.
    pub fn record_last_exec(&self, id: &str, at_ms: u64) -> Result<()> {
        let path = self.last_exec_path(id);
        let current = self.read_ms(&path)?.unwrap_or(0);
        if at_ms > current {
            self.write_ms(&path, at_ms)?;
        }
        Ok(())
    }

    /// Delete every per-key file for (mode, id), including the state lock.
    pub fn remove_key_files(&self, key: &Key) -> Result<()> {
        remove_if_exists(&self.cmd_path(key))?;
        remove_if_exists(&self.pid_path(key))?;
        remove_if_exists(&self.stamp_path(key))?;
        remove_if_exists(&self.timer_path(key))?;
        remove_if_exists(&self.dirty_path(key))?;
        remove_if_exists(&self.state_lock_path(key))?;
        Ok(())
    }

    /// Delete the per-id files (`last_exec_ms` and the run lock).
    pub fn remove_id_files(&self, id: &str) -> Result<()> {
        remove_if_exists(&self.last_exec_path(id))?;
        remove_if_exists(&self.run_lock_path(id))?;
        Ok(())
    }
}

fn remove_if_exists(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

// ========== Filename encoding ==========

/// Percent-encode an id into a filename-safe form. Alphanumerics and
/// `. _ -` pass through; every other byte becomes `%XX`.
pub fn encode_id(id: &str) -> String {
    let mut out = String::with_capacity(id.len());
    for &b in id.as_bytes() {
        match b {
            b'a'..=b'z' | b'A'..=b'Z' | b'0'..=b'9' | b'.' | b'_' | b'-' => {
                out.push(b as char);
            }
            _ => out.push_str(&format!("%{:02X}", b)),
        }
    }
    out
}

/// Inverse of [`encode_id`]. `None` on malformed escapes.
pub fn decode_id(s: &str) -> Option<String> {
    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let hex = s.get(i + 1..i + 3)?;
            out.push(u8::from_str_radix(hex, 16).ok()?);
            i += 3;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8(out).ok()
}

// ========== Argv codec ==========

/// Encode argv as a NUL-terminated sequence. Safe for arguments containing
/// any byte except NUL.
pub fn encode_argv(argv: &[OsString]) -> Vec<u8> {
    let mut out = Vec::new();
    for arg in argv {
        out.extend_from_slice(arg.as_bytes());
        out.push(0);
    }
    out
}

/// Decode a NUL-terminated argv sequence.
pub fn decode_argv(bytes: &[u8]) -> Vec<OsString> {
    let mut out = Vec::new();
    let mut rest = bytes;
    while let Some(pos) = rest.iter().position(|&b| b == 0) {
        out.push(OsString::from_vec(rest[..pos].to_vec()));
        rest = &rest[pos + 1..];
    }
    out
}
