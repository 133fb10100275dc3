//! Runs one test run through detection, attribution and event assembly.

use crate::analysis::attribution::AttributionEngine;
use crate::config::{ConfigError, EngineConfig};
use crate::detect::scope::ScopeAnalyzer;
use crate::detect::series::RunMetrics;
use crate::events::{AnalysisReport, EventAssembler};
use std::time::Instant;
use tracing::info;

/// Batch analysis of one test run: scope analysis, then attribution, then
/// event assembly.
#[derive(Debug, Clone)]
pub struct AnalysisEngine {
    config: EngineConfig,
}

impl AnalysisEngine {
    /// Rejects invalid configuration; this is the only way a run can fail.
    pub fn new(config: EngineConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn analyze(&self, run: &RunMetrics) -> AnalysisReport {
        let started = Instant::now();
        info!(
            transactions = run.transaction_count(),
            series = run.series_count(),
            "starting anomaly analysis"
        );

        // Attribution reads every transaction window, so all scope analysis
        // has to finish first.
        let windows = ScopeAnalyzer::new(&self.config).analyze(run);
        info!(
            overall_windows = windows.overall_count(),
            transaction_windows = windows.transaction_count(),
            "scope analysis complete"
        );

        let outcome = AttributionEngine::new(&self.config, &windows, run).attribute_all(&windows);
        let report = EventAssembler::assemble(outcome, &windows);

        info!(
            overall_events = report.overall.len(),
            transaction_events = report.transactions.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "analysis complete"
        );
        report
    }
}
