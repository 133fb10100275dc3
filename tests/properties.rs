//! Property-based checks of the detection and attribution invariants.

use chrono::{DateTime, TimeZone, Utc};
use loadlens::analysis::attribution::score;
use loadlens::analysis::share::{CoverageCap, ShareModel};
use loadlens::analysis::TemporalRelationship;
use loadlens::detect::baseline::BaselineEstimator;
use loadlens::detect::flags::FlagExtractor;
use loadlens::detect::scope::ScopeAnalyzer;
use loadlens::detect::Scope;
use loadlens::{AnalysisEngine, AnalysisReport, EngineConfig, MetricSeries, RunMetrics};
use proptest::prelude::*;

const METRIC: &str = "response_time_avg";

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap()
}

/// Positive values with occasional gaps.
fn values(max_len: usize) -> impl Strategy<Value = Vec<Option<f64>>> {
    prop::collection::vec(prop::option::weighted(0.9, 1.0f64..500.0), 0..max_len)
}

fn run_strategy() -> impl Strategy<Value = RunMetrics> {
    (
        values(40),
        prop::collection::vec((values(40), 1.0f64..200.0), 0..4),
    )
        .prop_map(|(overall, txns)| {
            let mut run = RunMetrics::default();
            run.overall
                .insert(METRIC.to_string(), MetricSeries::from_values(t0(), 10, &overall));
            for (i, (rt, rate)) in txns.into_iter().enumerate() {
                let metrics = run.transactions.entry(format!("txn{}", i)).or_default();
                let len = rt.len();
                metrics.insert(METRIC.to_string(), MetricSeries::from_values(t0(), 10, &rt));
                metrics.insert(
                    "throughput".to_string(),
                    MetricSeries::from_values(t0(), 10, &vec![Some(rate); len]),
                );
            }
            run
        })
}

proptest! {
    #[test]
    fn short_series_never_yields_windows(vals in prop::collection::vec(1.0f64..500.0, 0..=5)) {
        let config = EngineConfig::default();
        let series = MetricSeries::from_values(
            t0(),
            10,
            &vals.iter().copied().map(Some).collect::<Vec<_>>(),
        );
        let windows = ScopeAnalyzer::new(&config).analyze_series(&Scope::Overall, METRIC, &series);
        prop_assert!(windows.is_empty());
    }

    #[test]
    fn windows_are_ordered_disjoint_and_one_directional(vals in values(80)) {
        let config = EngineConfig::default();
        let series = MetricSeries::from_values(t0(), 10, &vals);
        let windows = ScopeAnalyzer::new(&config).analyze_series(&Scope::Overall, METRIC, &series);

        for pair in windows.windows(2) {
            prop_assert!(pair[0].end < pair[1].start);
        }

        if windows.is_empty() {
            return Ok(());
        }
        let baseline = BaselineEstimator::new(config.baseline_window_k, config.baseline_method)
            .estimate(&series)
            .unwrap();
        let flags = FlagExtractor::new(
            config.threshold_for(METRIC),
            config.polarity_for(METRIC),
            config.baseline_epsilon,
        )
        .extract(&series, &baseline);

        for w in &windows {
            prop_assert!(w.start <= w.end);
            prop_assert!(w.point_count >= 1);
            for p in flags.points() {
                if p.timestamp >= w.start && p.timestamp <= w.end {
                    if let Some(direction) = p.direction {
                        prop_assert_eq!(direction, w.direction);
                    }
                }
            }
        }
    }

    #[test]
    fn shares_never_exceed_one(
        rates in prop::collection::vec(0.0f64..1000.0, 0..12),
        coverage in 0.05f64..=1.0,
        max_k in 1usize..20,
    ) {
        let mut run = RunMetrics::default();
        for (i, rate) in rates.iter().enumerate() {
            run.transactions.entry(format!("txn{}", i)).or_default().insert(
                "throughput".to_string(),
                MetricSeries::from_values(t0(), 10, &[Some(*rate); 6]),
            );
        }
        let model = ShareModel::new(&run, "throughput");
        let table = model.shares(t0(), t0() + chrono::Duration::seconds(50));

        prop_assert!(table.covered() <= 1.0 + 1e-9);
        for (_, share) in table.iter() {
            prop_assert!((0.0..=1.0 + 1e-9).contains(&share));
        }

        let kept = CoverageCap::new(coverage, max_k).select(table.iter().collect(), |c| (c.1, c.0));
        prop_assert!(kept.len() <= max_k);
        prop_assert!(kept.len() <= table.len());
        if !table.is_empty() {
            prop_assert!(!kept.is_empty());
        }
    }

    #[test]
    fn adjustments_are_strict(
        share in 0.01f64..=1.0,
        severity in 0.01f64..10.0,
        weight in 0.1f64..3.0,
    ) {
        let config = EngineConfig::default();
        let at = |matched: bool, rel: TemporalRelationship| {
            score(share, severity, weight, matched, rel, &config)
        };
        let base = at(true, TemporalRelationship::Correlated);
        let mismatched = at(false, TemporalRelationship::Correlated);
        let cause = at(true, TemporalRelationship::PotentialCause);
        let effect = at(true, TemporalRelationship::DownstreamEffect);

        prop_assert!(mismatched < base);
        prop_assert!(cause > base);
        prop_assert!(effect < base);
    }

    #[test]
    fn flat_input_yields_no_events(level in 1.0f64..1000.0, len in 6usize..60, txns in 0usize..4) {
        let flat = vec![Some(level); len];
        let mut run = RunMetrics::default();
        run.overall.insert(METRIC.to_string(), MetricSeries::from_values(t0(), 10, &flat));
        for i in 0..txns {
            let metrics = run.transactions.entry(format!("txn{}", i)).or_default();
            metrics.insert(METRIC.to_string(), MetricSeries::from_values(t0(), 10, &flat));
            metrics.insert("throughput".to_string(), MetricSeries::from_values(t0(), 10, &flat));
        }
        let report = AnalysisEngine::new(EngineConfig::default()).unwrap().analyze(&run);
        prop_assert!(report.is_empty());
    }

    #[test]
    fn reports_validate_and_round_trip(run in run_strategy()) {
        let report = AnalysisEngine::new(EngineConfig::default()).unwrap().analyze(&run);
        prop_assert!(report.validate().is_ok());

        for event in &report.overall {
            let meta = event.attribution.as_ref().unwrap();
            prop_assert!(meta.total_explained_share <= 1.0 + 1e-9);
            prop_assert!(event.contributors.len() <= EngineConfig::default().top_n_contributors);
        }

        let json = report.to_json(false).unwrap();
        let parsed = AnalysisReport::from_json(&json).unwrap();
        prop_assert_eq!(&parsed, &report);
    }

    #[test]
    fn analysis_is_deterministic(run in run_strategy()) {
        let parallel = AnalysisEngine::new(EngineConfig::default()).unwrap().analyze(&run);
        let sequential_config = EngineConfig {
            parallel: false,
            ..EngineConfig::default()
        };
        let sequential = AnalysisEngine::new(sequential_config).unwrap().analyze(&run);
        prop_assert_eq!(parallel, sequential);
    }
}
