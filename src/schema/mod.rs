//! Schema module - Configuration and published state types for orchestrated runs.

mod config;
mod progress;

pub use config::*;
pub use progress::*;
