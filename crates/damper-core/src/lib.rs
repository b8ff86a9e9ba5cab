//! # damper-core
//!
//! Cross-process debounce/throttle coordination for arbitrary commands.
//!
//! Unrelated OS processes share only a state directory; advisory file locks
//! serialize per-key decisions, a per-id run lock makes execution
//! single-flight across both modes, and a shared `last_exec_ms` lets
//! debounce and throttle schedules for the same id deduplicate each other.

pub mod clock;
pub mod engine;
pub mod error;
pub mod exec;
pub mod gc;
pub mod lock;
pub mod reset;
pub mod runner;
pub mod status;
pub mod store;

pub use clock::{now_ms, RunnerStamp};
pub use engine::{invoke, Request};
pub use error::{
    EngineError, EXIT_BUSY_SKIP, EXIT_CONTENTION, EXIT_IO, EXIT_QUEUED, EXIT_TIMEOUT, EXIT_USAGE,
};
pub use gc::GcPolicy;
pub use status::KeyStatus;
pub use store::{Key, Mode, StateDir};
