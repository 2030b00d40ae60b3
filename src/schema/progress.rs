//! Published run types: progress snapshots, audit records and results.
//!
//! Everything here is produced by the orchestrator and handed out by value to
//! pollers, so all types are plain data (`Clone + Serialize`).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle of a run.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum RunPhase {
    /// Created but `run` not yet called.
    #[default]
    NotStarted,
    /// Cycles are executing.
    Running,
    /// All cycles ran, or the shutdown score was reached.
    Completed,
    /// A stop request ended the run early.
    Stopped,
    /// The run aborted before any cycle (configuration fault).
    Failed,
}

impl RunPhase {
    /// Whether no further state changes will happen.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Stopped | Self::Failed)
    }
}

/// Why a run that produced a result ended.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum TerminationReason {
    /// Every configured cycle and epoch ran.
    Exhausted,
    /// Best score reached the shutdown threshold.
    TargetReached,
    /// A stop was requested.
    Stopped,
}

/// Immutable record of run progress at one epoch boundary.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProgressSnapshot {
    /// Monotone version, unique within a run.
    pub version: u64,
    /// 1-based cycle number.
    pub cycle: usize,
    /// 1-based epoch number within the cycle.
    pub epoch: usize,
    /// Epochs configured per cycle.
    pub total_epochs_in_cycle: usize,
    /// Best score known after this epoch.
    pub score: f64,
    /// Best expression known after this epoch (empty if none yet).
    pub expression: String,
    pub timestamp: DateTime<Utc>,
    /// Human-readable progress line.
    pub log_message: String,
}

/// Outcome recorded for one epoch attempt.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AuditStatus {
    /// Step succeeded and a candidate expression is known.
    Success,
    /// Step succeeded but no valid expression exists yet.
    NoExpression,
    /// Step failed; outcome unknown.
    Unknown,
}

/// Structured record of one epoch attempt, reconstructed from the run diary.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AuditRecord {
    /// 1-based cycle number.
    pub cycle: usize,
    /// Model the call is attributed to.
    pub model: String,
    /// Best expression at the time (empty if none).
    pub expression: String,
    /// Best score at the time.
    pub score: f64,
    pub timestamp: DateTime<Utc>,
    /// Cumulative backend calls when the record was made.
    pub total_api_calls: u64,
    pub status: AuditStatus,
}

/// Best candidate for one complexity level.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ParetoEntry {
    /// Complexity measure reported by the backend.
    pub complexity: usize,
    pub expression: String,
    pub score: f64,
}

/// Summary produced once when a run ends.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FinalResult {
    pub score: f64,
    pub expression: String,
    pub timestamp: DateTime<Utc>,
    /// Cycles configured for the run.
    pub total_cycles: usize,
    pub total_api_calls: u64,
    /// Why the run ended.
    pub reason: TerminationReason,
    /// Score/complexity trade-off reported by the backend at the end.
    #[serde(default)]
    pub pareto_frontier: Vec<ParetoEntry>,
}

/// Consistent point-in-time view of a run, assembled for pollers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunStateSnapshot {
    pub phase: RunPhase,
    pub is_running: bool,
    pub should_stop: bool,
    /// 1-based cycle in progress (0 before the first cycle).
    pub current_cycle: usize,
    pub total_cycles: usize,
    pub best_score: f64,
    pub best_expression: String,
    pub total_api_calls: u64,
    /// Seconds since the run started; frozen once it ends.
    pub elapsed_seconds: f64,
    /// Best score at the end of each cycle that produced a candidate.
    pub score_history: Vec<f64>,
    /// Version of the latest progress snapshot (0 if none).
    pub state_version: u64,
    /// Retained audit records, oldest first.
    pub audit_log: Vec<AuditRecord>,
    /// Most recent progress snapshot.
    pub last_frame: Option<ProgressSnapshot>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_phases() {
        assert!(!RunPhase::NotStarted.is_terminal());
        assert!(!RunPhase::Running.is_terminal());
        assert!(RunPhase::Completed.is_terminal());
        assert!(RunPhase::Stopped.is_terminal());
        assert!(RunPhase::Failed.is_terminal());
    }

    #[test]
    fn test_audit_status_wire_names() {
        let json = serde_json::to_string(&AuditStatus::NoExpression).unwrap();
        assert_eq!(json, "\"no_expression\"");
        let parsed: AuditStatus = serde_json::from_str("\"unknown\"").unwrap();
        assert_eq!(parsed, AuditStatus::Unknown);
    }
}
