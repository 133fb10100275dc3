//! Sorted-window index over transaction anomaly windows.
//!
//! Windows of one (transaction, metric) are non-overlapping and ordered, so
//! both their starts and their ends are sorted. A query binary-searches the
//! first window ending at or after the query start and walks forward while
//! windows still start before the query end.

use crate::detect::scope::ScopeWindows;
use crate::detect::window::AnomalyWindow;
use chrono::{DateTime, Utc};

#[derive(Debug)]
struct MetricWindows<'a> {
    windows: &'a [AnomalyWindow],
}

impl<'a> MetricWindows<'a> {
    fn overlapping(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> impl Iterator<Item = &'a AnomalyWindow> {
        let windows: &'a [AnomalyWindow] = self.windows;
        let first = windows.partition_point(|w| w.end < start);
        windows[first..].iter().take_while(move |w| w.start <= end)
    }
}

#[derive(Debug)]
pub struct TransactionIndex<'a> {
    pub transaction: &'a str,
    metrics: Vec<MetricWindows<'a>>,
}

impl<'a> TransactionIndex<'a> {
    pub fn window_count(&self) -> usize {
        self.metrics.iter().map(|m| m.windows.len()).sum()
    }

    /// Windows of this transaction whose closed span meets `[start, end]`.
    pub fn overlapping(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> impl Iterator<Item = &'a AnomalyWindow> + '_ {
        self.metrics.iter().flat_map(move |m| m.overlapping(start, end))
    }
}

/// Built once per run, queried once per overall window.
#[derive(Debug, Default)]
pub struct IntervalIndex<'a> {
    transactions: Vec<TransactionIndex<'a>>,
}

impl<'a> IntervalIndex<'a> {
    pub fn build(windows: &'a ScopeWindows) -> Self {
        let transactions = windows
            .transactions
            .iter()
            .map(|(name, metrics)| TransactionIndex {
                transaction: name.as_str(),
                metrics: metrics
                    .values()
                    .filter(|w| !w.is_empty())
                    .map(|w| MetricWindows { windows: w.as_slice() })
                    .collect(),
            })
            .collect();
        Self { transactions }
    }

    pub fn window_count(&self) -> usize {
        self.transactions.iter().map(|t| t.window_count()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.window_count() == 0
    }

    pub fn transactions(&self) -> &[TransactionIndex<'a>] {
        &self.transactions
    }

    pub fn query(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> Vec<&'a AnomalyWindow> {
        self.transactions
            .iter()
            .flat_map(|t| t.overlapping(start, end))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::{Direction, Scope};
    use chrono::{Duration, TimeZone};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap()
    }

    fn window(txn: &str, metric: &str, start: i64, end: i64) -> AnomalyWindow {
        AnomalyWindow {
            scope: Scope::Transaction(txn.to_string()),
            metric: metric.to_string(),
            start: t0() + Duration::seconds(start),
            end: t0() + Duration::seconds(end),
            direction: Direction::Degradation,
            peak_delta: 1.0,
            avg_delta: 1.0,
            baseline_mean: 1.0,
            point_count: 1,
        }
    }

    fn scope_windows() -> ScopeWindows {
        let mut sw = ScopeWindows::default();
        let login = sw.transactions.entry("login".to_string()).or_default();
        login.insert(
            "response_time_avg".to_string(),
            vec![
                window("login", "response_time_avg", 0, 30),
                window("login", "response_time_avg", 100, 150),
                window("login", "response_time_avg", 300, 310),
            ],
        );
        login.insert("error_rate".to_string(), vec![window("login", "error_rate", 120, 400)]);
        sw.transactions
            .entry("search".to_string())
            .or_default()
            .insert("response_time_avg".to_string(), Vec::new());
        sw
    }

    #[test]
    fn test_query_finds_overlaps_only() {
        let sw = scope_windows();
        let index = IntervalIndex::build(&sw);
        assert_eq!(index.window_count(), 4);
        assert!(!index.is_empty());

        let hits = index.query(t0() + Duration::seconds(140), t0() + Duration::seconds(200));
        let mut spans: Vec<(String, i64)> = hits
            .iter()
            .map(|w| (w.metric.clone(), (w.start - t0()).num_seconds()))
            .collect();
        spans.sort();
        assert_eq!(
            spans,
            vec![("error_rate".to_string(), 120), ("response_time_avg".to_string(), 100)]
        );
    }

    #[test]
    fn test_query_touching_boundaries() {
        let sw = scope_windows();
        let index = IntervalIndex::build(&sw);
        let hits = index.query(t0() + Duration::seconds(30), t0() + Duration::seconds(30));
        assert_eq!(hits.len(), 1);
        assert!(index.query(t0() + Duration::seconds(31), t0() + Duration::seconds(99)).is_empty());
    }

    #[test]
    fn test_empty_index() {
        let sw = ScopeWindows::default();
        assert!(IntervalIndex::build(&sw).is_empty());
    }
}
