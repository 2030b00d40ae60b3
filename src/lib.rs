//! Symbolic-regression orchestrator - Cycle/epoch control and progress sync.
//!
//! This crate drives an island-based symbolic-regression search engine
//! through cycles and epochs, reconstructs an audit trail of backend model
//! calls from the engine's diary, and publishes versioned progress snapshots
//! that other threads can poll without blocking the search.
//!
//! # Architecture
//!
//! The crate is split into two main modules:
//!
//! - `schema`: Run configuration and the published state types
//! - `search`: Backend contract, orchestrator, progress buffer and facade
//!
//! # Example
//!
//! ```rust,no_run
//! use symreg_orchestrator::{
//!     schema::RunConfig,
//!     search::{Orchestrator, SimulatedBackend},
//! };
//!
//! let config = RunConfig {
//!     cycles: 5,
//!     epochs_per_cycle: 10,
//!     ..Default::default()
//! };
//! let mut orchestrator = Orchestrator::new(config, SimulatedBackend::new(7));
//! let monitor = orchestrator.monitor();
//!
//! let result = orchestrator
//!     .run_with_callback(|frame| println!("{}", frame.log_message))
//!     .expect("run");
//!
//! println!("Best score {:.2}: {}", result.score, result.expression);
//! println!("API calls: {}", monitor.get_state().total_api_calls);
//! ```

pub mod schema;
pub mod search;

// Re-export commonly used types
pub use schema::{FinalResult, ProgressSnapshot, RunConfig, RunStateSnapshot};
pub use search::{Orchestrator, RunMonitor, SearchBackend, SimulatedBackend};
