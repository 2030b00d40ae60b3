//! Orchestration of an island-based symbolic-regression search.
//!
//! # Overview
//!
//! - **Backend contract** (`backend`): the [`SearchBackend`] trait an external
//!   engine implements, plus its error types
//! - **Orchestrator** (`orchestrator`): the cycle/epoch control loop
//! - **Progress buffer** (`snapshots`): versioned ring buffer of snapshots
//! - **Audit log** (`diary`): call counting from the backend's free-text diary
//! - **Run state facade** (`monitor`): read-only, thread-safe view for pollers
//! - **Runner** (`runner`): background thread wrapper
//! - **Simulated backend** (`simulated`): deterministic in-process engine
//!
//! # Example
//!
//! ```rust,no_run
//! use symreg_orchestrator::schema::RunConfig;
//! use symreg_orchestrator::search::{Orchestrator, SimulatedBackend, spawn};
//!
//! let orchestrator = Orchestrator::new(RunConfig::default(), SimulatedBackend::new(42));
//! let handle = spawn(orchestrator).unwrap();
//!
//! let mut cursor = None;
//! while !handle.is_finished() {
//!     for frame in handle.monitor().get_progress_since(cursor) {
//!         println!("{}", frame.log_message);
//!         cursor = Some(frame.version);
//!     }
//!     std::thread::sleep(std::time::Duration::from_millis(100));
//! }
//! let result = handle.join().unwrap();
//! println!("Best: {} ({:.2})", result.expression, result.score);
//! ```

mod backend;
mod diary;
mod monitor;
mod orchestrator;
mod runner;
mod simulated;
mod snapshots;

#[cfg(test)]
mod testing;

pub use backend::{
    ConfigurationError, QueryError, RetentionPolicy, SearchBackend, StepError,
};
pub use diary::{
    AuditLog, CallCounter, CallTally, DEFAULT_DETAIL_PATTERN, DEFAULT_SUCCESS_PATTERNS,
    DIARY_TIME_FORMAT, DiaryCall, DiaryReadError, DiaryScanner,
};
pub use monitor::{RunMonitor, RunState};
pub use orchestrator::{EPOCH_UNITS, Orchestrator, RunError};
pub use runner::{RUNNER_THREAD_NAME, RunHandle, spawn};
pub use simulated::{Basis, DIARY_FILE_NAME, SimulatedBackend, Term};
pub use snapshots::{ProgressBuffer, ProgressEntry};
