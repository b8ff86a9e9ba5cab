//! Engine error taxonomy and the fixed exit-code contract.

use thiserror::Error;

/// I/O or OS failure
pub const EXIT_IO: i32 = 70;
/// State lock not acquired within the bounded wait
pub const EXIT_CONTENTION: i32 = 75;
/// `--no-wait` with a live runner; nothing updated
pub const EXIT_BUSY_SKIP: i32 = 76;
/// Call accepted; another runner will execute with possibly updated args
pub const EXIT_QUEUED: i32 = 77;
/// Bad usage / invalid arguments
pub const EXIT_USAGE: i32 = 78;
/// Child killed for exceeding `--timeout`
pub const EXIT_TIMEOUT: i32 = 79;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("invalid usage: {0}")]
    Usage(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("state lock busy: {0}")]
    LockContention(String),
}

impl EngineError {
    /// Map the error to its wire exit code.
    pub fn exit_code(&self) -> i32 {
        match self {
            EngineError::Usage(_) => EXIT_USAGE,
            EngineError::Io(_) => EXIT_IO,
            EngineError::LockContention(_) => EXIT_CONTENTION,
        }
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;
