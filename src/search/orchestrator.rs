//! Cycle/epoch control loop.

use chrono::Utc;
use log::{error, info, warn};

use crate::schema::{
    AuditStatus, ConfigError, FinalResult, ProgressSnapshot, RunConfig, RunPhase,
    TerminationReason,
};

use super::backend::{ConfigurationError, QueryError, RetentionPolicy, SearchBackend};
use super::diary::{AuditLog, CallCounter, DiaryScanner};
use super::monitor::{RunMonitor, RunPublisher, RunState};
use super::snapshots::ProgressEntry;

/// Backend work units requested per epoch.
pub const EPOCH_UNITS: usize = 1;

/// Characters of the expression shown in progress lines.
const EXPRESSION_PREVIEW_CHARS: usize = 50;

/// Errors that abort a run. Everything else is absorbed per epoch.
#[derive(Debug, thiserror::Error)]
pub enum RunError {
    #[error("Invalid run configuration: {0}")]
    InvalidConfig(#[from] ConfigError),
    #[error(transparent)]
    Backend(#[from] ConfigurationError),
    #[error("Run was already started")]
    AlreadyStarted,
}

/// Drives a search backend through the configured cycles and epochs.
///
/// Each cycle sets a retention policy, repopulates islands (except the first
/// cycle) and runs its epochs. Each epoch is one backend step followed by a
/// best-candidate query, one audit record and one progress snapshot. Step and
/// query failures are logged and recorded, never propagated.
///
/// Stop requests are checked before every cycle and before and after every
/// epoch. A step in flight is never interrupted, so stop latency is bounded by
/// the backend's longest step.
pub struct Orchestrator<B, C = DiaryScanner> {
    config: RunConfig,
    backend: B,
    audit: AuditLog<C>,
    state: RunState,
    publisher: RunPublisher,
}

impl<B: SearchBackend> Orchestrator<B> {
    /// Create an orchestrator that counts calls by scanning the backend diary.
    pub fn new(config: RunConfig, backend: B) -> Self {
        Self::with_call_counter(config, backend, DiaryScanner::default())
    }
}

impl<B: SearchBackend, C: CallCounter> Orchestrator<B, C> {
    /// Create an orchestrator with a custom call-count source.
    pub fn with_call_counter(config: RunConfig, backend: B, counter: C) -> Self {
        let audit = AuditLog::with_counter(&config, counter);
        let state = RunState::new(&config);
        let publisher = RunPublisher::new(&config);
        Self {
            config,
            backend,
            audit,
            state,
            publisher,
        }
    }

    /// Read handle for pollers. Can be cloned and sent to other threads.
    pub fn monitor(&self) -> RunMonitor {
        self.publisher.monitor()
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    /// Working state as last written by the loop.
    pub fn state(&self) -> &RunState {
        &self.state
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    /// Run to completion (blocking).
    pub fn run(&mut self) -> Result<FinalResult, RunError> {
        self.run_with_callback(|_| {})
    }

    /// Run to completion, calling `callback` after every published snapshot.
    pub fn run_with_callback<F>(&mut self, mut callback: F) -> Result<FinalResult, RunError>
    where
        F: FnMut(&ProgressSnapshot),
    {
        if self.state.phase != RunPhase::NotStarted {
            return Err(RunError::AlreadyStarted);
        }

        if let Err(err) = self.prepare() {
            error!("Run aborted before the first cycle: {err}");
            self.state.phase = RunPhase::Failed;
            self.publisher.finish(&self.state, None);
            return Err(err);
        }

        self.state.phase = RunPhase::Running;
        self.publisher.start(&self.state);
        info!(
            "Starting run: {} cycles x {} epochs, {} islands, shutdown score {}",
            self.config.cycles,
            self.config.epochs_per_cycle,
            self.config.island_count,
            self.config.shutdown_score
        );

        let reason = self.run_cycles(&mut callback);
        Ok(self.finish(reason))
    }

    fn prepare(&mut self) -> Result<(), RunError> {
        self.config.validate()?;
        self.backend.configure(&self.config)?;
        Ok(())
    }

    fn stop_requested(&self) -> bool {
        self.publisher.stop_requested()
    }

    fn run_cycles<F>(&mut self, callback: &mut F) -> TerminationReason
    where
        F: FnMut(&ProgressSnapshot),
    {
        for cycle_index in 0..self.config.cycles {
            if self.stop_requested() {
                info!("Run stopped before cycle {}", cycle_index + 1);
                return TerminationReason::Stopped;
            }

            self.state.current_cycle = cycle_index + 1;
            self.publisher.publish_state(&self.state);
            self.begin_cycle(cycle_index);

            let exit = self.run_epochs(callback);
            self.close_cycle();

            if let Some(reason) = exit {
                return reason;
            }
        }
        TerminationReason::Exhausted
    }

    fn begin_cycle(&mut self, cycle_index: usize) {
        let policy = RetentionPolicy::for_cycle(cycle_index);
        self.backend.set_retention_policy(policy);

        // Nothing to redistribute before the first cycle.
        if cycle_index != 0
            && let Err(err) = self.backend.repopulate()
        {
            warn!("Repopulation before cycle {} failed: {err}", cycle_index + 1);
        }

        info!(
            "Cycle {}/{} running ({policy:?})",
            self.state.current_cycle, self.state.total_cycles
        );
    }

    /// Returns the reason to end the run, or `None` if the cycle ran out of epochs.
    fn run_epochs<F>(&mut self, callback: &mut F) -> Option<TerminationReason>
    where
        F: FnMut(&ProgressSnapshot),
    {
        for epoch_index in 0..self.config.epochs_per_cycle {
            if self.stop_requested() {
                info!("Run stopped during cycle {}", self.state.current_cycle);
                return Some(TerminationReason::Stopped);
            }

            let snapshot = self.run_epoch(epoch_index + 1);
            callback(&snapshot);

            if self.state.best_score >= self.config.shutdown_score {
                info!(
                    "Reached shutdown score {} (best {:.4})",
                    self.config.shutdown_score, self.state.best_score
                );
                return Some(TerminationReason::TargetReached);
            }
            if self.stop_requested() {
                info!("Run stopped during cycle {}", self.state.current_cycle);
                return Some(TerminationReason::Stopped);
            }
        }
        None
    }

    fn run_epoch(&mut self, epoch: usize) -> ProgressSnapshot {
        let cycle = self.state.current_cycle;
        let total = self.config.epochs_per_cycle;

        let (status, log_message) = match self.backend.step(EPOCH_UNITS) {
            Err(err) => {
                warn!("Epoch {epoch}/{total} of cycle {cycle} failed, skipping: {err}");
                (
                    AuditStatus::Unknown,
                    format!("Epoch {epoch}/{total} failed: {err}"),
                )
            }
            Ok(()) => {
                let message = match self.query_candidate() {
                    Ok((score, expression)) => {
                        self.accept(score, expression);
                        let line = self.progress_line(epoch);
                        info!("{line}");
                        line
                    }
                    Err(err) => {
                        warn!("Epoch {epoch}/{total} of cycle {cycle}: result unavailable: {err}");
                        format!("Epoch {epoch}/{total} | result unavailable: {err}")
                    }
                };
                let status = if self.state.best_expression.is_empty() {
                    AuditStatus::NoExpression
                } else {
                    AuditStatus::Success
                };
                (status, message)
            }
        };

        let diary = self.backend.diary_path();
        let record = self.audit.record(
            diary.as_deref(),
            cycle,
            self.state.best_score,
            &self.state.best_expression,
            status,
        );
        self.state.total_api_calls = self.audit.total_api_calls();

        let entry = ProgressEntry {
            cycle,
            epoch,
            total_epochs_in_cycle: total,
            score: self.state.best_score,
            expression: self.state.best_expression.clone(),
            log_message,
        };
        self.publisher.publish_epoch(&self.state, entry, record)
    }

    fn query_candidate(&self) -> Result<(f64, String), QueryError> {
        let expression = self.backend.best_expression()?;
        if expression.trim().is_empty() {
            return Err(QueryError::no_candidate());
        }
        let score = self.backend.best_score()?;
        if !score.is_finite() {
            return Err(QueryError(format!("non-finite score {score}")));
        }
        Ok((score, expression))
    }

    /// Take the backend's best-so-far unless it would lower the published best.
    fn accept(&mut self, score: f64, expression: String) {
        if score < self.state.best_score {
            warn!(
                "Backend reported best score {score:.4} below known best {:.4}; keeping known candidate",
                self.state.best_score
            );
            return;
        }
        self.state.best_score = score;
        self.state.best_expression = expression;
    }

    fn progress_line(&self, epoch: usize) -> String {
        let total = self.config.epochs_per_cycle;
        let percent = epoch as f64 / total as f64 * 100.0;
        format!(
            "Epoch {epoch}/{total} ({percent:.0}%) | score: {:.4} | expression: {}",
            self.state.best_score,
            abbreviate(&self.state.best_expression, EXPRESSION_PREVIEW_CHARS)
        )
    }

    fn close_cycle(&mut self) {
        // Cycles without a valid candidate leave no history entry.
        if self.state.best_score > 0.0 {
            self.state.score_history.push(self.state.best_score);
        }
        info!(
            "Cycle {} finished | best score: {:.4}",
            self.state.current_cycle, self.state.best_score
        );
        self.publisher.publish_state(&self.state);
    }

    fn finish(&mut self, reason: TerminationReason) -> FinalResult {
        self.state.phase = match reason {
            TerminationReason::Stopped => RunPhase::Stopped,
            TerminationReason::Exhausted | TerminationReason::TargetReached => {
                RunPhase::Completed
            }
        };

        let pareto_frontier = self.backend.pareto_frontier().unwrap_or_else(|err| {
            warn!("Pareto frontier unavailable: {err}");
            Vec::new()
        });

        let result = FinalResult {
            score: self.state.best_score,
            expression: self.state.best_expression.clone(),
            timestamp: Utc::now(),
            total_cycles: self.config.cycles,
            total_api_calls: self.state.total_api_calls,
            reason,
            pareto_frontier,
        };
        info!(
            "Run finished ({reason:?}) | best score: {:.4} | API calls: {}",
            result.score, result.total_api_calls
        );
        self.publisher.finish(&self.state, Some(result.clone()));
        result
    }
}

fn abbreviate(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_owned(),
    }
}
