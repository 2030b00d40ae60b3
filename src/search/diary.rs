//! Audit log reconstruction from the backend's free-text diary.
//!
//! The backend does not emit structured call events, so call counts are
//! re-derived by pattern matching its diary. The scan only refines the call
//! counter; every epoch gets an [`AuditRecord`] whether or not it succeeds.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use chrono::{NaiveDateTime, Utc};
use log::{debug, info, warn};
use regex::Regex;

use crate::schema::{AuditRecord, AuditStatus, RunConfig};

/// Phrases the backend writes after a successful model call.
pub const DEFAULT_SUCCESS_PATTERNS: [&str; 3] = [
    r"(?is)get_answer.*?调用成功",
    r"(?i)API调用成功",
    r"(?i)模型响应成功",
];

/// Timestamped call line: `[YYYY-mm-dd HH:MM:SS] ... 模型: <name> ... 调用成功`.
pub const DEFAULT_DETAIL_PATTERN: &str =
    r"(?is)\[(\d{4}-\d{2}-\d{2} \d{2}:\d{2}:\d{2})\].*?模型[：:]?\s*(\S+).*?(?:调用成功|响应成功)";

/// Timestamp format used in diary lines.
pub const DIARY_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

static SUCCESS_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    DEFAULT_SUCCESS_PATTERNS
        .iter()
        .map(|p| Regex::new(p).expect("static diary pattern"))
        .collect()
});

static DETAIL_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(DEFAULT_DETAIL_PATTERN).expect("static diary pattern"));

/// Diary could not be scanned. Recoverable: callers fall back to estimates.
#[derive(Debug, thiserror::Error)]
pub enum DiaryReadError {
    #[error("Backend has not reported a diary location")]
    Unavailable,
    #[error("Diary {} does not exist", .path.display())]
    Missing { path: PathBuf },
    #[error("Failed to read diary {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// One call recovered from the diary.
#[derive(Debug, Clone, PartialEq)]
pub struct DiaryCall {
    pub timestamp: Option<NaiveDateTime>,
    pub model: String,
}

/// Result of scanning a diary.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CallTally {
    /// Successful calls found.
    pub total: u64,
    /// Most recent calls with details, oldest first.
    pub recent: Vec<DiaryCall>,
}

/// Source of backend call counts.
///
/// [`DiaryScanner`] is the heuristic implementation; a structured event feed
/// can replace it without touching the orchestrator.
pub trait CallCounter {
    /// Count calls made so far, reading from `diary` if the source needs it.
    fn count_calls(&mut self, diary: Option<&Path>) -> Result<CallTally, DiaryReadError>;
}

/// Regex-based diary scanner.
#[derive(Debug, Clone)]
pub struct DiaryScanner {
    success_patterns: Vec<Regex>,
    detail_pattern: Regex,
    recent_limit: usize,
}

impl Default for DiaryScanner {
    fn default() -> Self {
        Self {
            success_patterns: SUCCESS_PATTERNS.clone(),
            detail_pattern: DETAIL_PATTERN.clone(),
            recent_limit: 10,
        }
    }
}

impl DiaryScanner {
    /// Scanner with custom patterns. The detail pattern must capture the
    /// timestamp as group 1 and the model as group 2.
    pub fn with_patterns(success: &[&str], detail: &str) -> Result<Self, regex::Error> {
        let success_patterns = success
            .iter()
            .map(|p| Regex::new(p))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            success_patterns,
            detail_pattern: Regex::new(detail)?,
            recent_limit: 10,
        })
    }

    /// Keep at most `limit` detailed calls in each tally.
    pub fn with_recent_limit(mut self, limit: usize) -> Self {
        self.recent_limit = limit;
        self
    }

    /// Count successful calls in diary text.
    pub fn scan(&self, text: &str) -> CallTally {
        let total = self
            .success_patterns
            .iter()
            .map(|re| re.find_iter(text).count() as u64)
            .sum();

        let calls: Vec<DiaryCall> = self
            .detail_pattern
            .captures_iter(text)
            .map(|caps| DiaryCall {
                timestamp: caps
                    .get(1)
                    .and_then(|m| NaiveDateTime::parse_from_str(m.as_str(), DIARY_TIME_FORMAT).ok()),
                model: caps
                    .get(2)
                    .map(|m| m.as_str().to_owned())
                    .unwrap_or_default(),
            })
            .collect();
        let skip = calls.len().saturating_sub(self.recent_limit);

        CallTally {
            total,
            recent: calls.into_iter().skip(skip).collect(),
        }
    }
}

impl CallCounter for DiaryScanner {
    fn count_calls(&mut self, diary: Option<&Path>) -> Result<CallTally, DiaryReadError> {
        let path = diary.ok_or(DiaryReadError::Unavailable)?;
        let text = fs::read_to_string(path).map_err(|source| {
            if source.kind() == io::ErrorKind::NotFound {
                DiaryReadError::Missing {
                    path: path.to_path_buf(),
                }
            } else {
                DiaryReadError::Io {
                    path: path.to_path_buf(),
                    source,
                }
            }
        })?;
        Ok(self.scan(&text))
    }
}

/// Builds one audit record per epoch and keeps the running call total.
#[derive(Debug)]
pub struct AuditLog<C = DiaryScanner> {
    counter: C,
    model: String,
    fallback_estimate: u64,
    total_api_calls: u64,
}

impl AuditLog<DiaryScanner> {
    /// Audit log backed by the default diary scanner.
    pub fn new(config: &RunConfig) -> Self {
        Self::with_counter(config, DiaryScanner::default())
    }
}

impl<C: CallCounter> AuditLog<C> {
    /// Audit log backed by a custom call counter.
    pub fn with_counter(config: &RunConfig, counter: C) -> Self {
        Self {
            counter,
            model: config.backend.primary_model().to_owned(),
            fallback_estimate: config.estimated_calls_per_epoch(),
            total_api_calls: 0,
        }
    }

    /// Cumulative call count. Never decreases.
    pub fn total_api_calls(&self) -> u64 {
        self.total_api_calls
    }

    /// Refresh the call counter, then build the record for this epoch.
    pub fn record(
        &mut self,
        diary: Option<&Path>,
        cycle: usize,
        score: f64,
        expression: &str,
        status: AuditStatus,
    ) -> AuditRecord {
        self.refresh_call_count(diary);

        AuditRecord {
            cycle,
            model: self.model.clone(),
            expression: expression.to_owned(),
            score,
            timestamp: Utc::now(),
            total_api_calls: self.total_api_calls,
            status,
        }
    }

    fn refresh_call_count(&mut self, diary: Option<&Path>) {
        let previous = self.total_api_calls;
        match self.counter.count_calls(diary) {
            Ok(tally) => {
                self.total_api_calls = previous.max(tally.total);
                if let Some(last) = tally.recent.last() {
                    debug!(
                        "Latest diary call: model={} at {:?} ({} recent)",
                        last.model,
                        last.timestamp,
                        tally.recent.len()
                    );
                }
            }
            Err(err) => {
                warn!("{err}; estimating {} calls", self.fallback_estimate);
                self.total_api_calls = previous.saturating_add(self.fallback_estimate);
            }
        }

        if self.total_api_calls / 10 > previous / 10 {
            info!("Cumulative API calls: {}", self.total_api_calls);
        }
    }
}
