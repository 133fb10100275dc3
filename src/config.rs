//! TOML configuration for the analysis engine.
//!
//! Every threshold, penalty and table the engine uses lives here and is
//! passed in at construction. Missing fields fall back to compiled-in
//! defaults; `validate` rejects values that indicate a caller defect.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::detect::baseline::BaselineMethod;
use crate::detect::flags::{DeviationThreshold, Polarity};
use crate::detect::window::GapTolerance;

/// Environment variable naming a config file to load.
pub const CONFIG_ENV: &str = "LOADLENS_CONFIG";

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("invalid configuration: {field} {reason}")]
    Invalid { field: String, reason: String },
}

impl ConfigError {
    fn invalid(field: impl Into<String>, reason: impl Into<String>) -> Self {
        ConfigError::Invalid {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// Engine config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Valid samples in the trailing baseline window.
    pub baseline_window_k: usize,
    pub baseline_method: BaselineMethod,
    /// Floor for baseline magnitudes in relative deviations.
    pub baseline_epsilon: f64,
    pub default_weight: f64,

    /// Absolute overlap required, capped at the transaction window's length.
    pub min_overlap_seconds: f64,
    /// Overlap fraction must be strictly greater than this.
    pub min_overlap_fraction: f64,
    /// Transaction metric holding request rate, used for share.
    pub request_rate_metric: String,
    pub per_txn_coverage: f64,
    pub per_txn_max_k: usize,
    pub direction_mismatch_penalty: f64,
    pub cause_lead_seconds: f64,
    pub effect_lag_seconds: f64,
    pub cause_boost: f64,
    pub effect_penalty: f64,
    /// Candidates must score strictly above this to be kept.
    pub min_impact: f64,
    pub top_n_contributors: usize,

    /// Run scope analysis and attribution on the rayon pool.
    pub parallel: bool,

    // Tables last so the TOML rendering keeps plain keys at the top.
    pub max_gap_tolerance: GapTolerance,
    pub default_threshold: DeviationThreshold,
    pub deviation_thresholds: BTreeMap<String, DeviationThreshold>,
    pub metric_polarity: BTreeMap<String, Polarity>,
    pub metric_weights: BTreeMap<String, f64>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        let relative = DeviationThreshold::relative;
        let deviation_thresholds = BTreeMap::from([
            ("response_time_avg".to_string(), relative(0.25)),
            ("response_time_median".to_string(), relative(0.25)),
            ("response_time_p90".to_string(), relative(0.3)),
            ("response_time_p95".to_string(), relative(0.3)),
            ("response_time_p99".to_string(), relative(0.35)),
            ("throughput".to_string(), relative(0.2)),
            ("error_rate".to_string(), DeviationThreshold::absolute(0.02)),
            ("cpu_usage".to_string(), relative(0.2).with_absolute(5.0)),
            ("memory_usage".to_string(), relative(0.2).with_absolute(5.0)),
        ]);
        let metric_polarity = BTreeMap::from([("throughput".to_string(), Polarity::LowerIsWorse)]);
        let metric_weights = BTreeMap::from([
            ("error_rate".to_string(), 1.5),
            ("response_time_p90".to_string(), 1.2),
            ("response_time_p95".to_string(), 1.2),
            ("response_time_p99".to_string(), 1.2),
            ("response_time_avg".to_string(), 1.0),
            ("response_time_median".to_string(), 1.0),
        ]);

        Self {
            baseline_window_k: 5,
            baseline_method: BaselineMethod::Median,
            baseline_epsilon: 1e-9,
            default_threshold: relative(0.25),
            deviation_thresholds,
            metric_polarity,
            default_weight: 1.0,
            metric_weights,
            max_gap_tolerance: GapTolerance::Points(1),
            min_overlap_seconds: 5.0,
            min_overlap_fraction: 0.0,
            request_rate_metric: "throughput".to_string(),
            per_txn_coverage: 0.8,
            per_txn_max_k: 50,
            direction_mismatch_penalty: 0.5,
            cause_lead_seconds: 10.0,
            effect_lag_seconds: 30.0,
            cause_boost: 1.2,
            effect_penalty: 0.5,
            min_impact: 0.0,
            top_n_contributors: 5,
            parallel: true,
        }
    }
}

impl EngineConfig {
    /// Load configuration from a TOML file at `path`.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;
        let config: Self = toml::from_str(&content)
            .with_context(|| format!("failed to parse config file: {}", path.display()))?;
        info!(path = %path.display(), "loaded engine configuration");
        Ok(config)
    }

    /// Load from `LOADLENS_CONFIG` when set, otherwise use defaults.
    pub fn load_or_default() -> Self {
        if let Ok(env_path) = std::env::var(CONFIG_ENV) {
            let path = PathBuf::from(&env_path);
            match Self::load(&path) {
                Ok(cfg) => return cfg,
                Err(e) => {
                    warn!(
                        path = %path.display(),
                        error = %e,
                        "LOADLENS_CONFIG set but file could not be loaded, using defaults"
                    );
                }
            }
        }
        debug!("no config file given, using compiled-in defaults");
        Self::default()
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("failed to serialize configuration")
    }

    pub fn threshold_for(&self, metric: &str) -> DeviationThreshold {
        self.deviation_thresholds
            .get(metric)
            .copied()
            .unwrap_or(self.default_threshold)
    }

    pub fn polarity_for(&self, metric: &str) -> Polarity {
        self.metric_polarity.get(metric).copied().unwrap_or_default()
    }

    pub fn weight_for(&self, metric: &str) -> f64 {
        self.metric_weights
            .get(metric)
            .copied()
            .unwrap_or(self.default_weight)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.baseline_window_k == 0 {
            return Err(ConfigError::invalid("baseline_window_k", "must be at least 1"));
        }
        positive("baseline_epsilon", self.baseline_epsilon)?;

        check_threshold("default_threshold", &self.default_threshold)?;
        for (metric, threshold) in &self.deviation_thresholds {
            check_threshold(&format!("deviation_thresholds.{}", metric), threshold)?;
        }

        non_negative("default_weight", self.default_weight)?;
        for (metric, weight) in &self.metric_weights {
            non_negative(&format!("metric_weights.{}", metric), *weight)?;
        }

        if let GapTolerance::Seconds(s) = self.max_gap_tolerance {
            non_negative("max_gap_tolerance.seconds", s)?;
        }

        non_negative("min_overlap_seconds", self.min_overlap_seconds)?;
        unit_interval("min_overlap_fraction", self.min_overlap_fraction)?;
        unit_interval("per_txn_coverage", self.per_txn_coverage)?;
        if self.per_txn_max_k == 0 {
            return Err(ConfigError::invalid("per_txn_max_k", "must be at least 1"));
        }
        if self.request_rate_metric.trim().is_empty() {
            return Err(ConfigError::invalid("request_rate_metric", "must not be empty"));
        }

        penalty("direction_mismatch_penalty", self.direction_mismatch_penalty)?;
        penalty("effect_penalty", self.effect_penalty)?;
        if !(self.cause_boost.is_finite() && self.cause_boost > 1.0) {
            return Err(ConfigError::invalid("cause_boost", "must be greater than 1"));
        }
        non_negative("cause_lead_seconds", self.cause_lead_seconds)?;
        non_negative("effect_lag_seconds", self.effect_lag_seconds)?;
        non_negative("min_impact", self.min_impact)?;
        if self.top_n_contributors == 0 {
            return Err(ConfigError::invalid("top_n_contributors", "must be at least 1"));
        }
        Ok(())
    }
}

fn non_negative(field: &str, value: f64) -> Result<(), ConfigError> {
    if value.is_finite() && value >= 0.0 {
        Ok(())
    } else {
        Err(ConfigError::invalid(field, format!("must be a non-negative number, got {}", value)))
    }
}

fn positive(field: &str, value: f64) -> Result<(), ConfigError> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(ConfigError::invalid(field, format!("must be positive, got {}", value)))
    }
}

fn unit_interval(field: &str, value: f64) -> Result<(), ConfigError> {
    if value.is_finite() && (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(ConfigError::invalid(field, format!("must be within [0, 1], got {}", value)))
    }
}

/// Penalties must be strictly between 0 and 1 so they always lower a score.
fn penalty(field: &str, value: f64) -> Result<(), ConfigError> {
    if value.is_finite() && value > 0.0 && value < 1.0 {
        Ok(())
    } else {
        Err(ConfigError::invalid(field, format!("must be within (0, 1), got {}", value)))
    }
}

fn check_threshold(field: &str, threshold: &DeviationThreshold) -> Result<(), ConfigError> {
    if threshold.relative.is_none() && threshold.absolute.is_none() {
        return Err(ConfigError::invalid(field, "needs a relative or absolute bound"));
    }
    if let Some(r) = threshold.relative {
        non_negative(&format!("{}.relative", field), r)?;
    }
    if let Some(a) = threshold.absolute {
        non_negative(&format!("{}.absolute", field), a)?;
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
