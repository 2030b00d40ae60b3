//! Scripted backend for orchestrator tests.

use std::path::PathBuf;

use crate::schema::{ParetoEntry, RunConfig};

use super::backend::{ConfigurationError, QueryError, RetentionPolicy, SearchBackend, StepError};
use super::monitor::RunMonitor;

/// What the backend does on one step.
#[derive(Debug, Clone)]
pub enum Scripted {
    /// Step succeeds and the backend's best becomes `(score, expression)`.
    Report(f64, &'static str),
    /// Step succeeds without changing the backend's best.
    Idle,
    /// Step succeeds but both queries fail for this epoch.
    QueryFails,
    /// Step fails.
    StepFails,
}

/// Call observed by the backend, in order.
#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Configure,
    Retention(RetentionPolicy),
    Repopulate,
    Step(usize),
}

#[derive(Debug, Default)]
pub struct ScriptedBackend {
    script: Vec<Scripted>,
    cursor: usize,
    best: Option<(f64, String)>,
    queries_broken: bool,
    pub calls: Vec<Call>,
    pub reject_configure: bool,
    pub diary: Option<PathBuf>,
    /// Request a stop through this monitor once `steps` steps have run.
    pub stop_after: Option<(usize, RunMonitor)>,
}

impl ScriptedBackend {
    pub fn new(script: Vec<Scripted>) -> Self {
        Self {
            script,
            ..Default::default()
        }
    }

    pub fn steps(&self) -> usize {
        self.calls
            .iter()
            .filter(|c| matches!(c, Call::Step(_)))
            .count()
    }
}

impl SearchBackend for ScriptedBackend {
    fn configure(&mut self, _config: &RunConfig) -> Result<(), ConfigurationError> {
        self.calls.push(Call::Configure);
        if self.reject_configure {
            return Err(ConfigurationError("missing api keys".into()));
        }
        Ok(())
    }

    fn set_retention_policy(&mut self, policy: RetentionPolicy) {
        self.calls.push(Call::Retention(policy));
    }

    fn repopulate(&mut self) -> Result<(), StepError> {
        self.calls.push(Call::Repopulate);
        Ok(())
    }

    fn step(&mut self, units: usize) -> Result<(), StepError> {
        self.calls.push(Call::Step(units));
        let action = self.script.get(self.cursor).cloned().unwrap_or(Scripted::Idle);
        self.cursor += 1;

        if let Some((after, monitor)) = &self.stop_after
            && self.steps() >= *after
        {
            monitor.request_stop();
        }

        self.queries_broken = false;
        match action {
            Scripted::Report(score, expression) => {
                self.best = Some((score, expression.to_owned()));
                Ok(())
            }
            Scripted::Idle => Ok(()),
            Scripted::QueryFails => {
                self.queries_broken = true;
                Ok(())
            }
            Scripted::StepFails => Err(StepError("sampler crashed".into())),
        }
    }

    fn best_score(&self) -> Result<f64, QueryError> {
        if self.queries_broken {
            return Err(QueryError("database locked".into()));
        }
        self.best
            .as_ref()
            .map(|(s, _)| *s)
            .ok_or_else(QueryError::no_candidate)
    }

    fn best_expression(&self) -> Result<String, QueryError> {
        if self.queries_broken {
            return Err(QueryError("database locked".into()));
        }
        self.best
            .as_ref()
            .map(|(_, e)| e.clone())
            .ok_or_else(QueryError::no_candidate)
    }

    fn diary_path(&self) -> Option<PathBuf> {
        self.diary.clone()
    }

    fn pareto_frontier(&self) -> Result<Vec<ParetoEntry>, QueryError> {
        Ok(self
            .best
            .iter()
            .map(|(score, expression)| ParetoEntry {
                complexity: expression.len(),
                expression: expression.clone(),
                score: *score,
            })
            .collect())
    }
}
