//! loadlens -- anomaly detection and attribution for performance-test runs.
//!
//! Turns overall and per-transaction metric series into anomaly windows,
//! links transaction anomalies to the overall anomalies they plausibly
//! explain, and emits the result as structured events for report
//! generators and dashboards.

pub mod analysis;
pub mod config;
pub mod detect;
pub mod engine;
pub mod events;

pub use config::{ConfigError, EngineConfig};
pub use detect::series::{MetricSeries, RunMetrics, Sample};
pub use engine::AnalysisEngine;
pub use events::{AnalysisReport, AnomalyEvent};

use anyhow::{Context, Result};
use std::path::Path;

/// Load a run file, analyse it and return the validated report.
pub fn analyze_file(input: &Path, config: EngineConfig) -> Result<AnalysisReport> {
    let content = std::fs::read_to_string(input)
        .with_context(|| format!("failed to read run metrics: {}", input.display()))?;
    let run: RunMetrics = serde_json::from_str(&content)
        .with_context(|| format!("failed to parse run metrics: {}", input.display()))?;
    tracing::info!(path = %input.display(), "loaded run metrics");

    let engine = AnalysisEngine::new(config)?;
    let report = engine.analyze(&run);
    report
        .validate()
        .context("engine produced a report that fails schema validation")?;
    Ok(report)
}
