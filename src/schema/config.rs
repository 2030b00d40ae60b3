//! Configuration types for an orchestrated search run.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Temperature used for models that have no explicit entry.
pub const DEFAULT_MODEL_TEMPERATURE: f32 = 1.0;

/// Top-level run configuration. Immutable for the life of a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    /// Number of cycles (outer loop iterations).
    pub cycles: usize,
    /// Epochs per cycle (one backend step each).
    pub epochs_per_cycle: usize,
    /// Number of islands (parallel populations) inside the backend.
    pub island_count: usize,
    /// Score at which the run terminates early.
    pub shutdown_score: f64,
    /// Parameters handed to the search backend.
    #[serde(default)]
    pub backend: BackendConfig,
    /// Retention ceilings for published history.
    #[serde(default)]
    pub buffers: BufferConfig,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            cycles: 10,
            epochs_per_cycle: 10,
            island_count: 4,
            shutdown_score: 80.0,
            backend: BackendConfig::default(),
            buffers: BufferConfig::default(),
        }
    }
}

/// Backend connection and sampling parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    /// Models the backend may query, in priority order.
    #[serde(default)]
    pub models: Vec<String>,
    /// Sampling temperature per model. Padded with 1.0 when shorter than `models`.
    #[serde(default)]
    pub model_temperatures: Vec<f32>,
    /// Parallel samplers per island.
    #[serde(default = "default_samplers")]
    pub samplers: usize,
    /// Best retained ideas a prompt may draw its example from.
    #[serde(default = "default_examples")]
    pub examples: usize,
    /// Candidates generated per prompt.
    #[serde(default = "default_generate")]
    pub generate: usize,
    /// Temperature used when sampling examples from an island.
    #[serde(default = "default_sample_temperature")]
    pub sample_temperature: f32,
    /// Score a candidate must reach before it is handed over to the island.
    #[serde(default)]
    pub hand_over_threshold: f64,
    /// Path to the API key file, if the backend needs one.
    #[serde(default)]
    pub api_keys_path: Option<PathBuf>,
    /// Directory the backend writes its database and diary into.
    #[serde(default)]
    pub work_dir: Option<PathBuf>,
    /// Whether each prompt's example expression is copied into the diary.
    #[serde(default = "default_record_prompt")]
    pub record_prompt_in_diary: bool,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            models: Vec::new(),
            model_temperatures: Vec::new(),
            samplers: default_samplers(),
            examples: default_examples(),
            generate: default_generate(),
            sample_temperature: default_sample_temperature(),
            hand_over_threshold: 0.0,
            api_keys_path: None,
            work_dir: None,
            record_prompt_in_diary: default_record_prompt(),
        }
    }
}

fn default_samplers() -> usize {
    1
}
fn default_examples() -> usize {
    3
}
fn default_generate() -> usize {
    1
}
fn default_sample_temperature() -> f32 {
    20.0
}
fn default_record_prompt() -> bool {
    true
}

impl BackendConfig {
    /// Model temperatures aligned with `models`, missing entries filled with 1.0.
    pub fn model_temperatures_padded(&self) -> Vec<f32> {
        let mut temps = self.model_temperatures.clone();
        if temps.len() < self.models.len() {
            temps.resize(self.models.len(), DEFAULT_MODEL_TEMPERATURE);
        }
        temps
    }

    /// Temperature of the primary model.
    pub fn primary_temperature(&self) -> f32 {
        self.model_temperatures_padded()
            .first()
            .copied()
            .unwrap_or(DEFAULT_MODEL_TEMPERATURE)
    }

    /// Identifier recorded in audit records.
    pub fn primary_model(&self) -> &str {
        self.models.first().map(String::as_str).unwrap_or("unknown")
    }
}

/// Bounded-memory policy for published history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BufferConfig {
    /// Maximum progress snapshots retained.
    #[serde(default = "default_progress_capacity")]
    pub progress_capacity: usize,
    /// Maximum audit records retained.
    #[serde(default = "default_audit_capacity")]
    pub audit_capacity: usize,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            progress_capacity: default_progress_capacity(),
            audit_capacity: default_audit_capacity(),
        }
    }
}

fn default_progress_capacity() -> usize {
    2000
}
fn default_audit_capacity() -> usize {
    1000
}

/// Upper bounds accepted for the loop dimensions.
pub const MAX_CYCLES: usize = 100;
pub const MAX_EPOCHS_PER_CYCLE: usize = 100;
pub const MAX_ISLANDS: usize = 20;

impl RunConfig {
    /// Upper bound on epochs in the run.
    #[inline]
    pub fn total_epochs(&self) -> usize {
        self.cycles * self.epochs_per_cycle
    }

    /// Calls assumed per epoch when the diary cannot be read.
    #[inline]
    pub fn estimated_calls_per_epoch(&self) -> u64 {
        (self.epochs_per_cycle * self.island_count) as u64
    }

    /// Validate configuration parameters.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.cycles == 0 || self.cycles > MAX_CYCLES {
            return Err(ConfigError::InvalidCycles(self.cycles));
        }
        if self.epochs_per_cycle == 0 || self.epochs_per_cycle > MAX_EPOCHS_PER_CYCLE {
            return Err(ConfigError::InvalidEpochs(self.epochs_per_cycle));
        }
        if self.island_count == 0 || self.island_count > MAX_ISLANDS {
            return Err(ConfigError::InvalidIslands(self.island_count));
        }
        if !self.shutdown_score.is_finite() || !(0.0..=100.0).contains(&self.shutdown_score) {
            return Err(ConfigError::InvalidShutdownScore(self.shutdown_score));
        }
        if self.buffers.progress_capacity == 0 || self.buffers.audit_capacity == 0 {
            return Err(ConfigError::ZeroCapacity);
        }
        for (i, t) in self.backend.model_temperatures.iter().enumerate() {
            if !t.is_finite() || *t <= 0.0 {
                return Err(ConfigError::InvalidTemperature {
                    index: i,
                    value: *t,
                });
            }
        }
        Ok(())
    }
}

/// Run configuration validation errors.
#[derive(Debug, thiserror::Error, PartialEq)]
pub enum ConfigError {
    #[error("Cycle count {0} outside 1..=100")]
    InvalidCycles(usize),
    #[error("Epochs per cycle {0} outside 1..=100")]
    InvalidEpochs(usize),
    #[error("Island count {0} outside 1..=20")]
    InvalidIslands(usize),
    #[error("Shutdown score {0} must be finite and within 0..=100")]
    InvalidShutdownScore(f64),
    #[error("Buffer capacities must be non-zero")]
    ZeroCapacity,
    #[error("Model temperature {index} is invalid: {value}")]
    InvalidTemperature { index: usize, value: f32 },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_valid() {
        assert!(RunConfig::default().validate().is_ok());
    }

    #[test]
    fn test_rejects_zero_dimensions() {
        let config = RunConfig {
            cycles: 0,
            ..Default::default()
        };
        assert_eq!(config.validate(), Err(ConfigError::InvalidCycles(0)));

        let config = RunConfig {
            island_count: 21,
            ..Default::default()
        };
        assert_eq!(config.validate(), Err(ConfigError::InvalidIslands(21)));
    }

    #[test]
    fn test_rejects_nan_shutdown_score() {
        let config = RunConfig {
            shutdown_score: f64::NAN,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidShutdownScore(_))
        ));
    }

    #[test]
    fn test_temperatures_padded() {
        let backend = BackendConfig {
            models: vec!["a".into(), "b".into(), "c".into()],
            model_temperatures: vec![0.5],
            ..Default::default()
        };
        assert_eq!(backend.model_temperatures_padded(), vec![0.5, 1.0, 1.0]);
        assert_eq!(backend.primary_model(), "a");
        assert_eq!(backend.primary_temperature(), 0.5);
        assert_eq!(BackendConfig::default().primary_temperature(), 1.0);
        assert_eq!(BackendConfig::default().primary_model(), "unknown");
    }

    #[test]
    fn test_serialization_defaults() {
        let json = r#"{"cycles": 3, "epochs_per_cycle": 2, "island_count": 1, "shutdown_score": 80.0}"#;
        let parsed: RunConfig = serde_json::from_str(json).unwrap();
        assert_eq!(parsed.buffers.progress_capacity, 2000);
        assert_eq!(parsed.buffers.audit_capacity, 1000);
        assert_eq!(parsed.backend.samplers, 1);
        assert!(parsed.backend.record_prompt_in_diary);
        assert_eq!(parsed.total_epochs(), 6);
        assert_eq!(parsed.estimated_calls_per_epoch(), 2);
    }
}
