//! Metric series and the per-run input collection.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum SeriesError {
    #[error("timestamps must be strictly increasing (sample {index} is not after sample {prev})")]
    NonIncreasing { index: usize, prev: usize },
}

/// One sample of a metric. `value == None` means no data was collected.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub value: Option<f64>,
}

/// Ordered (timestamp, value) pairs for one metric in one scope.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<Sample>", into = "Vec<Sample>")]
pub struct MetricSeries {
    samples: Vec<Sample>,
}

impl MetricSeries {
    pub fn new(samples: Vec<Sample>) -> Result<Self, SeriesError> {
        for (index, pair) in samples.windows(2).enumerate() {
            if pair[1].timestamp <= pair[0].timestamp {
                return Err(SeriesError::NonIncreasing {
                    index: index + 1,
                    prev: index,
                });
            }
        }
        Ok(Self { samples })
    }

    /// Build an evenly spaced series starting at `start`.
    pub fn from_values(start: DateTime<Utc>, step_secs: i64, values: &[Option<f64>]) -> Self {
        let samples = values
            .iter()
            .enumerate()
            .map(|(i, value)| Sample {
                timestamp: start + step_offset(step_secs, i),
                value: *value,
            })
            .collect();
        Self { samples }
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn samples(&self) -> &[Sample] {
        &self.samples
    }

    pub fn timestamp(&self, index: usize) -> DateTime<Utc> {
        self.samples[index].timestamp
    }

    /// Value at `index`, with gaps and non-finite values reported as `None`.
    pub fn value(&self, index: usize) -> Option<f64> {
        self.samples
            .get(index)
            .and_then(|s| s.value)
            .filter(|v| v.is_finite())
    }

    pub fn valid_count(&self) -> usize {
        (0..self.samples.len())
            .filter(|&i| self.value(i).is_some())
            .count()
    }

    /// Valid values whose timestamps fall inside the closed range `[start, end]`.
    pub fn values_between(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> impl Iterator<Item = f64> + '_ {
        let lo = self.samples.partition_point(|s| s.timestamp < start);
        let hi = self.samples.partition_point(|s| s.timestamp <= end);
        self.samples[lo..hi.max(lo)]
            .iter()
            .filter_map(|s| s.value.filter(|v| v.is_finite()))
    }
}

/// Offset of sample `index` in an evenly spaced series.
fn step_offset(step_secs: i64, index: usize) -> Duration {
    let index = i64::try_from(index).unwrap_or(i64::MAX);
    Duration::seconds(step_secs.max(1).saturating_mul(index))
}

impl TryFrom<Vec<Sample>> for MetricSeries {
    type Error = SeriesError;

    fn try_from(samples: Vec<Sample>) -> Result<Self, Self::Error> {
        Self::new(samples)
    }
}

impl From<MetricSeries> for Vec<Sample> {
    fn from(series: MetricSeries) -> Self {
        series.samples
    }
}

/// All metric series collected for one test run, keyed by scope and metric.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunMetrics {
    #[serde(default)]
    pub overall: BTreeMap<String, MetricSeries>,
    #[serde(default)]
    pub transactions: BTreeMap<String, BTreeMap<String, MetricSeries>>,
}

impl RunMetrics {
    pub fn transaction_count(&self) -> usize {
        self.transactions.len()
    }

    pub fn series_count(&self) -> usize {
        self.overall.len() + self.transactions.values().map(|m| m.len()).sum::<usize>()
    }
}
