//! Runs baseline -> flags -> windows for every (scope, metric) of a run.

use crate::config::EngineConfig;
use crate::detect::baseline::BaselineEstimator;
use crate::detect::flags::FlagExtractor;
use crate::detect::series::{MetricSeries, RunMetrics};
use crate::detect::window::{AnomalyWindow, WindowBuilder};
use crate::detect::{DetectError, Scope};
use rayon::prelude::*;
use std::collections::BTreeMap;
use tracing::debug;

/// Windows per metric for the overall scope and for every transaction.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScopeWindows {
    pub overall: BTreeMap<String, Vec<AnomalyWindow>>,
    pub transactions: BTreeMap<String, BTreeMap<String, Vec<AnomalyWindow>>>,
}

impl ScopeWindows {
    pub fn overall_windows(&self) -> impl Iterator<Item = &AnomalyWindow> {
        self.overall.values().flatten()
    }

    pub fn transaction_windows(&self) -> impl Iterator<Item = &AnomalyWindow> {
        self.transactions.values().flat_map(|m| m.values().flatten())
    }

    pub fn overall_count(&self) -> usize {
        self.overall_windows().count()
    }

    pub fn transaction_count(&self) -> usize {
        self.transaction_windows().count()
    }
}

pub struct ScopeAnalyzer<'a> {
    config: &'a EngineConfig,
}

impl<'a> ScopeAnalyzer<'a> {
    pub fn new(config: &'a EngineConfig) -> Self {
        Self { config }
    }

    /// Windows for one series. Too little history yields no windows.
    pub fn analyze_series(
        &self,
        scope: &Scope,
        metric: &str,
        series: &MetricSeries,
    ) -> Vec<AnomalyWindow> {
        let estimator =
            BaselineEstimator::new(self.config.baseline_window_k, self.config.baseline_method);
        let baseline = match estimator.estimate(series) {
            Ok(b) => b,
            Err(DetectError::InsufficientHistory { needed, have }) => {
                debug!(%scope, metric, needed, have, "insufficient history, skipping");
                return Vec::new();
            }
            Err(e) => {
                debug!(%scope, metric, error = %e, "baseline unavailable, skipping");
                return Vec::new();
            }
        };

        let extractor = FlagExtractor::new(
            self.config.threshold_for(metric),
            self.config.polarity_for(metric),
            self.config.baseline_epsilon,
        );
        let flags = extractor.extract(series, &baseline);
        let windows =
            WindowBuilder::new(self.config.max_gap_tolerance).build(&flags, scope, metric);
        debug!(
            %scope,
            metric,
            flagged = flags.anomalous_count(),
            windows = windows.len(),
            "scope metric analysed"
        );
        windows
    }

    /// Analyse every series of the run. Each (scope, metric) is independent.
    pub fn analyze(&self, run: &RunMetrics) -> ScopeWindows {
        let mut jobs: Vec<(Scope, &str, &MetricSeries)> = run
            .overall
            .iter()
            .map(|(metric, series)| (Scope::Overall, metric.as_str(), series))
            .collect();
        for (txn, metrics) in &run.transactions {
            for (metric, series) in metrics {
                jobs.push((Scope::Transaction(txn.clone()), metric.as_str(), series));
            }
        }

        let run_job = |(scope, metric, series): &(Scope, &str, &MetricSeries)| {
            let windows = self.analyze_series(scope, metric, series);
            (scope.clone(), metric.to_string(), windows)
        };
        let results: Vec<(Scope, String, Vec<AnomalyWindow>)> = if self.config.parallel {
            jobs.par_iter().map(run_job).collect()
        } else {
            jobs.iter().map(run_job).collect()
        };

        let mut out = ScopeWindows::default();
        for (scope, metric, windows) in results {
            match scope {
                Scope::Overall => {
                    out.overall.insert(metric, windows);
                }
                Scope::Transaction(txn) => {
                    out.transactions.entry(txn).or_default().insert(metric, windows);
                }
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::Direction;
    use chrono::{TimeZone, Utc};

    fn series(values: &[f64]) -> MetricSeries {
        let values: Vec<Option<f64>> = values.iter().copied().map(Some).collect();
        MetricSeries::from_values(Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap(), 10, &values)
    }

    fn run() -> RunMetrics {
        let mut run = RunMetrics::default();
        run.overall.insert(
            "response_time_avg".to_string(),
            series(&[100.0, 100.0, 100.0, 100.0, 100.0, 100.0, 200.0, 210.0, 100.0, 100.0]),
        );
        run.overall.insert("error_rate".to_string(), series(&[0.0, 0.0]));
        run.transactions.entry("checkout".to_string()).or_default().insert(
            "response_time_avg".to_string(),
            series(&[50.0, 50.0, 50.0, 50.0, 50.0, 50.0, 90.0, 95.0, 50.0, 50.0]),
        );
        run
    }

    #[test]
    fn test_analyze_builds_both_collections() {
        let cfg = EngineConfig::default();
        let windows = ScopeAnalyzer::new(&cfg).analyze(&run());

        let rt = &windows.overall["response_time_avg"];
        assert_eq!(rt.len(), 1);
        assert_eq!(rt[0].direction, Direction::Degradation);
        assert_eq!(rt[0].point_count, 2);

        // Too short for the baseline: empty, not an error.
        assert!(windows.overall["error_rate"].is_empty());

        let checkout = &windows.transactions["checkout"]["response_time_avg"];
        assert_eq!(checkout.len(), 1);
        assert_eq!(checkout[0].scope, Scope::Transaction("checkout".to_string()));
        assert_eq!(windows.overall_count(), 1);
        assert_eq!(windows.transaction_count(), 1);
    }

    #[test]
    fn test_parallel_matches_sequential() {
        let parallel = EngineConfig::default();
        let sequential = EngineConfig {
            parallel: false,
            ..Default::default()
        };
        assert_eq!(
            ScopeAnalyzer::new(&parallel).analyze(&run()),
            ScopeAnalyzer::new(&sequential).analyze(&run())
        );
    }

    #[test]
    fn test_flat_series_has_no_windows() {
        let cfg = EngineConfig::default();
        let flat = series(&[10.0; 20]);
        let windows =
            ScopeAnalyzer::new(&cfg).analyze_series(&Scope::Overall, "response_time_avg", &flat);
        assert!(windows.is_empty());
    }
}
