//! Contract between the orchestrator and an external search engine.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::schema::{ParetoEntry, RunConfig};

/// Whether the backend keeps prior candidate material for the next cycle.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum RetentionPolicy {
    /// Keep retained ideas and build on them.
    Retain,
    /// Drop retained ideas, forcing fresh generation.
    Discard,
}

impl RetentionPolicy {
    /// Cycles retain every third cycle (0-based index divisible by 3).
    pub fn for_cycle(cycle_index: usize) -> Self {
        if cycle_index % 3 == 0 {
            Self::Retain
        } else {
            Self::Discard
        }
    }
}

/// Backend rejected the run parameters. Fatal for the run.
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
#[error("Backend configuration rejected: {0}")]
pub struct ConfigurationError(pub String);

/// A unit of backend work failed. Recoverable, isolated to its epoch.
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
#[error("Backend step failed: {0}")]
pub struct StepError(pub String);

/// A best-candidate query failed, usually because none exists yet.
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
#[error("Backend query failed: {0}")]
pub struct QueryError(pub String);

impl QueryError {
    /// No candidate has been produced yet.
    pub fn no_candidate() -> Self {
        Self("no candidate available yet".to_owned())
    }
}

/// An external search engine driven one step at a time.
///
/// Implementations may parallelize internally (for example across islands)
/// but every method is called from the single orchestrator thread.
pub trait SearchBackend {
    /// One-time setup before the first cycle.
    fn configure(&mut self, config: &RunConfig) -> Result<(), ConfigurationError>;

    /// Per-cycle hint about keeping prior candidate material.
    fn set_retention_policy(&mut self, policy: RetentionPolicy);

    /// Redistribute or reset the island populations. Safe before any step.
    fn repopulate(&mut self) -> Result<(), StepError>;

    /// Execute `units` units of work. A failed step must leave the backend
    /// in a state where the next step can run.
    fn step(&mut self, units: usize) -> Result<(), StepError>;

    /// Best score found so far.
    fn best_score(&self) -> Result<f64, QueryError>;

    /// Best expression found so far.
    fn best_expression(&self) -> Result<String, QueryError>;

    /// Free-text diary location, if the backend writes one.
    fn diary_path(&self) -> Option<PathBuf>;

    /// Best candidate per complexity level.
    fn pareto_frontier(&self) -> Result<Vec<ParetoEntry>, QueryError> {
        Ok(Vec::new())
    }
}

impl<B: SearchBackend + ?Sized> SearchBackend for Box<B> {
    fn configure(&mut self, config: &RunConfig) -> Result<(), ConfigurationError> {
        (**self).configure(config)
    }

    fn set_retention_policy(&mut self, policy: RetentionPolicy) {
        (**self).set_retention_policy(policy)
    }

    fn repopulate(&mut self) -> Result<(), StepError> {
        (**self).repopulate()
    }

    fn step(&mut self, units: usize) -> Result<(), StepError> {
        (**self).step(units)
    }

    fn best_score(&self) -> Result<f64, QueryError> {
        (**self).best_score()
    }

    fn best_expression(&self) -> Result<String, QueryError> {
        (**self).best_expression()
    }

    fn diary_path(&self) -> Option<PathBuf> {
        (**self).diary_path()
    }

    fn pareto_frontier(&self) -> Result<Vec<ParetoEntry>, QueryError> {
        (**self).pareto_frontier()
    }
}
