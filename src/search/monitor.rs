//! Read-only run state facade shared with pollers.
//!
//! The orchestrator is the only writer. It publishes every field that belongs
//! to one epoch (state, snapshot, audit record) under a single write lock, so
//! a reader sees either all of an epoch or none of it. Locks are held only
//! for field copies, never across a backend call.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Instant;

use log::debug;

use crate::schema::{
    AuditRecord, FinalResult, ProgressSnapshot, RunConfig, RunPhase, RunStateSnapshot,
};

use super::snapshots::{ProgressBuffer, ProgressEntry};

/// Mutable run state. Written only by the orchestrator.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunState {
    pub phase: RunPhase,
    /// 1-based cycle in progress (0 before the first cycle).
    pub current_cycle: usize,
    pub total_cycles: usize,
    pub best_score: f64,
    /// Empty until the backend reports a valid candidate.
    pub best_expression: String,
    /// Best score at the end of each cycle that produced a candidate.
    pub score_history: Vec<f64>,
    pub total_api_calls: u64,
}

impl RunState {
    pub(crate) fn new(config: &RunConfig) -> Self {
        Self {
            total_cycles: config.cycles,
            ..Default::default()
        }
    }
}

#[derive(Debug)]
struct Published {
    state: RunState,
    progress: ProgressBuffer,
    audit: VecDeque<AuditRecord>,
    audit_capacity: usize,
    final_result: Option<FinalResult>,
    started_at: Option<Instant>,
    finished_at: Option<Instant>,
}

impl Published {
    fn elapsed_seconds(&self) -> f64 {
        self.started_at
            .map(|start| {
                self.finished_at
                    .unwrap_or_else(Instant::now)
                    .duration_since(start)
                    .as_secs_f64()
            })
            .unwrap_or(0.0)
    }
}

#[derive(Debug)]
struct Shared {
    published: RwLock<Published>,
    stop: AtomicBool,
}

impl Shared {
    fn read(&self) -> RwLockReadGuard<'_, Published> {
        self.published.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Published> {
        self.published.write().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Cloneable read handle on a run.
///
/// Every method returns owned data assembled under a short read lock.
#[derive(Debug, Clone)]
pub struct RunMonitor {
    shared: Arc<Shared>,
}

impl RunMonitor {
    /// Consistent point-in-time view of the run.
    pub fn get_state(&self) -> RunStateSnapshot {
        let published = self.shared.read();
        let state = &published.state;
        RunStateSnapshot {
            phase: state.phase,
            is_running: state.phase == RunPhase::Running,
            should_stop: self.stop_requested(),
            current_cycle: state.current_cycle,
            total_cycles: state.total_cycles,
            best_score: state.best_score,
            best_expression: state.best_expression.clone(),
            total_api_calls: state.total_api_calls,
            elapsed_seconds: published.elapsed_seconds(),
            score_history: state.score_history.clone(),
            state_version: published.progress.latest_version(),
            audit_log: published.audit.iter().cloned().collect(),
            last_frame: published.progress.latest().cloned(),
        }
    }

    /// Progress snapshots newer than `version` (everything if `None`).
    pub fn get_progress_since(&self, version: Option<u64>) -> Vec<ProgressSnapshot> {
        self.shared.read().progress.since(version)
    }

    /// Final result, once the run completed or was stopped.
    pub fn get_final_result(&self) -> Option<FinalResult> {
        self.shared.read().final_result.clone()
    }

    /// Ask the run to stop at its next checkpoint. Idempotent.
    pub fn request_stop(&self) {
        self.shared.stop.store(true, Ordering::Relaxed);
    }

    pub fn stop_requested(&self) -> bool {
        self.shared.stop.load(Ordering::Relaxed)
    }

    pub fn phase(&self) -> RunPhase {
        self.shared.read().state.phase
    }

    /// Version of the latest published snapshot.
    pub fn state_version(&self) -> u64 {
        self.shared.read().progress.latest_version()
    }

    /// Retained audit records, oldest first.
    pub fn audit_log(&self) -> Vec<AuditRecord> {
        self.shared.read().audit.iter().cloned().collect()
    }
}

/// Write side of the facade. Owned by exactly one orchestrator.
#[derive(Debug)]
pub(crate) struct RunPublisher {
    shared: Arc<Shared>,
}

impl RunPublisher {
    pub(crate) fn new(config: &RunConfig) -> Self {
        let published = Published {
            state: RunState::new(config),
            progress: ProgressBuffer::new(config.buffers.progress_capacity),
            audit: VecDeque::new(),
            audit_capacity: config.buffers.audit_capacity.max(1),
            final_result: None,
            started_at: None,
            finished_at: None,
        };
        Self {
            shared: Arc::new(Shared {
                published: RwLock::new(published),
                stop: AtomicBool::new(false),
            }),
        }
    }

    pub(crate) fn monitor(&self) -> RunMonitor {
        RunMonitor {
            shared: Arc::clone(&self.shared),
        }
    }

    pub(crate) fn stop_requested(&self) -> bool {
        self.shared.stop.load(Ordering::Relaxed)
    }

    /// Mark the run started and publish its initial state.
    pub(crate) fn start(&self, state: &RunState) {
        let mut published = self.shared.write();
        published.started_at = Some(Instant::now());
        published.state = state.clone();
    }

    /// Publish state changes that carry no snapshot (cycle boundaries).
    pub(crate) fn publish_state(&self, state: &RunState) {
        self.shared.write().state = state.clone();
    }

    /// Publish one epoch: state, snapshot and audit record together.
    pub(crate) fn publish_epoch(
        &self,
        state: &RunState,
        entry: ProgressEntry,
        record: AuditRecord,
    ) -> ProgressSnapshot {
        let mut published = self.shared.write();
        published.state = state.clone();
        let snapshot = published.progress.append(entry).clone();
        if published.progress.evicted() == 1 {
            debug!(
                "Progress buffer reached {} snapshots; evicting oldest",
                published.progress.capacity()
            );
        }
        published.audit.push_back(record);
        while published.audit.len() > published.audit_capacity {
            published.audit.pop_front();
        }
        snapshot
    }

    /// Publish the terminal state and, for completed or stopped runs, the result.
    pub(crate) fn finish(&self, state: &RunState, result: Option<FinalResult>) {
        let mut published = self.shared.write();
        published.state = state.clone();
        published.final_result = result;
        // Elapsed time freezes only once no further updates can follow.
        if published.started_at.is_some() && state.phase.is_terminal() {
            published.finished_at = Some(Instant::now());
        }
    }
}
