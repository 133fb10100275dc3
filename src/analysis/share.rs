//! Request-rate share of transactions over a time interval.

use crate::detect::series::{MetricSeries, RunMetrics};
use chrono::{DateTime, Utc};

/// Shares of every transaction with traffic in one interval, largest first.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ShareTable<'a> {
    shares: Vec<(&'a str, f64)>,
    /// Total request rate of every transaction with data in the interval.
    pub total_rate: f64,
}

impl<'a> ShareTable<'a> {
    /// Share of `transaction`; zero when it had no data in the interval.
    pub fn share_of(&self, transaction: &str) -> f64 {
        self.shares
            .iter()
            .find(|(name, _)| *name == transaction)
            .map(|(_, share)| *share)
            .unwrap_or(0.0)
    }

    pub fn len(&self) -> usize {
        self.shares.len()
    }

    pub fn is_empty(&self) -> bool {
        self.shares.is_empty()
    }

    pub fn covered(&self) -> f64 {
        self.shares.iter().map(|(_, s)| s).sum()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&'a str, f64)> + '_ {
        self.shares.iter().copied()
    }
}

/// Computes shares from each transaction's request-rate series.
#[derive(Debug)]
pub struct ShareModel<'a> {
    rates: Vec<(&'a str, &'a MetricSeries)>,
}

impl<'a> ShareModel<'a> {
    pub fn new(run: &'a RunMetrics, rate_metric: &str) -> Self {
        let rates = run
            .transactions
            .iter()
            .filter_map(|(name, metrics)| metrics.get(rate_metric).map(|s| (name.as_str(), s)))
            .collect();
        Self { rates }
    }

    pub fn transaction_count(&self) -> usize {
        self.rates.len()
    }

    /// Shares over the closed interval `[start, end]`.
    ///
    /// A transaction's rate is the mean of its valid samples inside the
    /// interval; without samples it has no rate there and no share. The
    /// denominator is the total rate of all transactions with samples.
    pub fn shares(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> ShareTable<'a> {
        let mut shares: Vec<(&'a str, f64)> = self
            .rates
            .iter()
            .filter_map(|(name, series)| {
                let (mean, n) = series
                    .values_between(start, end)
                    .fold((0.0, 0usize), |(mean, n), v| {
                        (mean + (v.max(0.0) - mean) / (n + 1) as f64, n + 1)
                    });
                (n > 0).then(|| (*name, mean))
            })
            .filter(|(_, rate)| *rate > 0.0)
            .collect();

        let total_rate: f64 = shares.iter().map(|(_, r)| r).sum();
        if total_rate <= 0.0 {
            return ShareTable::default();
        }
        for (_, rate) in shares.iter_mut() {
            *rate /= total_rate;
        }
        shares.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(b.0)));

        ShareTable { shares, total_rate }
    }
}

/// Bounds how many candidate transactions an overall window evaluates.
#[derive(Debug, Clone, Copy)]
pub struct CoverageCap {
    coverage: f64,
    max_k: usize,
}

impl CoverageCap {
    pub fn new(coverage: f64, max_k: usize) -> Self {
        Self {
            coverage,
            max_k: max_k.max(1),
        }
    }

    /// Walk candidates in descending share order, keeping them until the
    /// cumulative share reaches the coverage target or `max_k` were kept.
    /// Returns the kept candidates in that order.
    pub fn select<T>(&self, mut candidates: Vec<T>, share: impl Fn(&T) -> (f64, &str)) -> Vec<T> {
        candidates.sort_by(|a, b| {
            let (sa, na) = share(a);
            let (sb, nb) = share(b);
            sb.total_cmp(&sa).then_with(|| na.cmp(nb))
        });

        let mut cumulative = 0.0;
        let mut kept = 0;
        for c in &candidates {
            if kept >= self.max_k || (kept > 0 && cumulative >= self.coverage) {
                break;
            }
            cumulative += share(c).0;
            kept += 1;
        }
        candidates.truncate(kept);
        candidates
    }
}
