//! Advisory file locks.
//!
//! Two scopes: the per-(mode, id) state lock serializes decision-making and
//! is acquired with a short bounded wait; the per-id run lock guarantees
//! single-flight execution across both modes and is acquired blocking.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use fs2::FileExt;

use crate::error::{EngineError, Result};

const RETRY_SLEEP: Duration = Duration::from_millis(5);

fn open_lock_file(path: &Path) -> std::io::Result<File> {
    OpenOptions::new()
        .create(true)
        .read(true)
        .write(true)
        .open(path)
}

/// Exclusive lock over a key's decision state.
///
/// Held only across decision code, never across sleeps or child execution.
/// Released on drop.
#[derive(Debug)]
pub struct StateLock {
    file: File,
    path: PathBuf,
}

impl StateLock {
    /// Try to acquire within `wait_ms`; contention past the bound is an
    /// immediate error, never retried internally.
    pub fn acquire(path: &Path, wait_ms: u64) -> Result<Self> {
        let file = open_lock_file(path)?;
        let deadline = Instant::now() + Duration::from_millis(wait_ms);

        loop {
            match file.try_lock_exclusive() {
                Ok(()) => {
                    return Ok(Self {
                        file,
                        path: path.to_path_buf(),
                    })
                }
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                    if Instant::now() >= deadline {
                        return Err(EngineError::LockContention(format!(
                            "{} held past {} ms",
                            path.display(),
                            wait_ms
                        )));
                    }
                    std::thread::sleep(RETRY_SLEEP);
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for StateLock {
    fn drop(&mut self) {
        let _ = self.file.unlock();
    }
}

/// Exclusive single-flight lock for an id, shared by both modes.
#[derive(Debug)]
pub struct RunLock {
    file: File,
}

impl RunLock {
    /// Acquire blocking; callers queue behind the running child.
    pub fn acquire(path: &Path) -> Result<Self> {
        let file = open_lock_file(path)?;
        file.lock_exclusive()?;
        Ok(Self { file })
    }

    /// Non-blocking probe used by the GC sweep lock.
    pub fn try_acquire(path: &Path) -> Result<Option<Self>> {
        let file = open_lock_file(path)?;
        match file.try_lock_exclusive() {
            Ok(()) => Ok(Some(Self { file })),
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

impl Drop for RunLock {
    fn drop(&mut self) {
        let _ = self.file.unlock();
    }
}
