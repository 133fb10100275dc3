//! Trailing-window baseline estimation.

use crate::detect::series::MetricSeries;
use crate::detect::DetectError;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// How the expected value is derived from the trailing window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BaselineMethod {
    #[default]
    Median,
    Mean,
}

impl BaselineMethod {
    fn estimate(&self, window: &VecDeque<f64>) -> f64 {
        match self {
            BaselineMethod::Mean => window
                .iter()
                .enumerate()
                .fold(0.0, |mean, (i, v)| mean + (v - mean) / (i + 1) as f64)
                .clamp(f64::MIN, f64::MAX),
            BaselineMethod::Median => {
                let mut sorted: Vec<f64> = window.iter().copied().collect();
                sorted.sort_by(|a, b| a.total_cmp(b));
                let mid = sorted.len() / 2;
                if sorted.len() % 2 == 1 {
                    sorted[mid]
                } else {
                    sorted[mid - 1] / 2.0 + sorted[mid] / 2.0
                }
            }
        }
    }
}

/// Expected value per index of a series; `None` until enough history exists.
#[derive(Debug, Clone, PartialEq)]
pub struct Baseline {
    values: Vec<Option<f64>>,
}

impl Baseline {
    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn get(&self, index: usize) -> Result<f64, DetectError> {
        self.values
            .get(index)
            .copied()
            .flatten()
            .ok_or(DetectError::MissingBaseline { index })
    }

    pub fn defined_count(&self) -> usize {
        self.values.iter().filter(|v| v.is_some()).count()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct BaselineEstimator {
    k: usize,
    method: BaselineMethod,
}

impl BaselineEstimator {
    pub fn new(k: usize, method: BaselineMethod) -> Self {
        Self {
            k: k.max(1),
            method,
        }
    }

    /// Compute the baseline from strictly earlier valid samples only.
    ///
    /// Gaps are skipped and never count toward `k`. A series needs at least
    /// `k + 1` valid samples for any point to be assessable.
    pub fn estimate(&self, series: &MetricSeries) -> Result<Baseline, DetectError> {
        let have = series.valid_count();
        if have <= self.k {
            return Err(DetectError::InsufficientHistory {
                needed: self.k + 1,
                have,
            });
        }

        let mut window: VecDeque<f64> = VecDeque::with_capacity(self.k + 1);
        let mut values = Vec::with_capacity(series.len());
        for i in 0..series.len() {
            if window.len() == self.k {
                values.push(Some(self.method.estimate(&window)));
            } else {
                values.push(None);
            }
            if let Some(v) = series.value(i) {
                window.push_back(v);
                if window.len() > self.k {
                    window.pop_front();
                }
            }
        }

        Ok(Baseline { values })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn series(values: &[Option<f64>]) -> MetricSeries {
        MetricSeries::from_values(Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap(), 10, values)
    }

    #[test]
    fn test_undefined_until_k_valid_points() {
        let s = series(&[Some(1.0), Some(2.0), Some(3.0), Some(10.0)]);
        let b = BaselineEstimator::new(3, BaselineMethod::Median).estimate(&s).unwrap();
        assert_eq!(b.len(), 4);
        assert!(b.get(0).is_err());
        assert!(b.get(2).is_err());
        assert_eq!(b.get(3), Ok(2.0));
    }

    #[test]
    fn test_gaps_do_not_count_toward_k() {
        let s = series(&[Some(1.0), None, Some(3.0), None, Some(5.0)]);
        let b = BaselineEstimator::new(2, BaselineMethod::Mean).estimate(&s).unwrap();
        // Only two valid points precede index 3 and index 4.
        assert_eq!(b.get(2), Err(DetectError::MissingBaseline { index: 2 }));
        assert_eq!(b.get(3), Ok(2.0));
        assert_eq!(b.get(4), Ok(2.0));
    }

    #[test]
    fn test_never_looks_ahead() {
        let s = series(&[Some(1.0), Some(1.0), Some(100.0), Some(1.0)]);
        let b = BaselineEstimator::new(2, BaselineMethod::Mean).estimate(&s).unwrap();
        assert_eq!(b.get(2), Ok(1.0));
        assert_eq!(b.get(3), Ok(50.5));
    }

    #[test]
    fn test_even_window_median() {
        let s = series(&[Some(4.0), Some(1.0), Some(3.0), Some(2.0), Some(9.0)]);
        let b = BaselineEstimator::new(4, BaselineMethod::Median).estimate(&s).unwrap();
        assert_eq!(b.get(4), Ok(2.5));
    }

    #[test]
    fn test_insufficient_history() {
        let s = series(&[Some(1.0), None, Some(2.0)]);
        let err = BaselineEstimator::new(2, BaselineMethod::Median).estimate(&s).unwrap_err();
        assert_eq!(err, DetectError::InsufficientHistory { needed: 3, have: 2 });
    }
}
