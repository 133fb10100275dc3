//! Per-point anomaly flags and the sources the window builder reads them from.

use crate::detect::baseline::Baseline;
use crate::detect::series::MetricSeries;
use crate::detect::Direction;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Which way a metric has to move to get worse.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Polarity {
    /// Response time, error rate, resource usage.
    #[default]
    HigherIsWorse,
    /// Throughput.
    LowerIsWorse,
}

impl Polarity {
    /// Direction of a non-zero deviation `value - baseline`.
    pub fn direction(&self, delta: f64) -> Direction {
        let worse = match self {
            Polarity::HigherIsWorse => delta > 0.0,
            Polarity::LowerIsWorse => delta < 0.0,
        };
        if worse {
            Direction::Degradation
        } else {
            Direction::Improvement
        }
    }
}

/// Deviation required before a point counts as anomalous.
///
/// With both bounds set, the absolute bound applies only while the baseline
/// is effectively zero and the relative bound applies otherwise.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct DeviationThreshold {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relative: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub absolute: Option<f64>,
}

impl DeviationThreshold {
    pub fn relative(value: f64) -> Self {
        Self {
            relative: Some(value),
            absolute: None,
        }
    }

    pub fn absolute(value: f64) -> Self {
        Self {
            relative: None,
            absolute: Some(value),
        }
    }

    /// Add an absolute bound used while the baseline is near zero.
    pub fn with_absolute(self, value: f64) -> Self {
        Self {
            absolute: Some(value),
            ..self
        }
    }

    pub fn is_exceeded(&self, delta: f64, baseline: f64, epsilon: f64) -> bool {
        if delta == 0.0 {
            return false;
        }
        let near_zero = baseline.abs() <= epsilon;
        let relative_hit = |r: f64| delta.abs() / baseline.abs().max(epsilon) >= r;
        let absolute_hit = |a: f64| delta.abs() >= a;
        match (self.relative, self.absolute) {
            (Some(r), Some(a)) => {
                if near_zero {
                    absolute_hit(a)
                } else {
                    relative_hit(r)
                }
            }
            (Some(r), None) => relative_hit(r),
            (None, Some(a)) => absolute_hit(a),
            (None, None) => false,
        }
    }
}

/// State of one point as seen by the window builder.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FlagPoint {
    pub timestamp: DateTime<Utc>,
    /// `Some` when the point is anomalous.
    pub direction: Option<Direction>,
    pub delta: Option<f64>,
    pub baseline: Option<f64>,
}

impl FlagPoint {
    pub fn normal(timestamp: DateTime<Utc>) -> Self {
        Self {
            timestamp,
            direction: None,
            delta: None,
            baseline: None,
        }
    }
}

/// Anything that can be read as a chronological stream of flagged points.
pub trait FlagSource {
    fn len(&self) -> usize;

    fn point(&self, index: usize) -> FlagPoint;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Flags produced by [`FlagExtractor`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PointFlags {
    points: Vec<FlagPoint>,
}

impl PointFlags {
    pub fn anomalous_count(&self) -> usize {
        self.points.iter().filter(|p| p.direction.is_some()).count()
    }

    pub fn points(&self) -> &[FlagPoint] {
        &self.points
    }
}

impl FlagSource for PointFlags {
    fn len(&self) -> usize {
        self.points.len()
    }

    fn point(&self, index: usize) -> FlagPoint {
        self.points[index]
    }
}

/// Adapter over string tags emitted by an external classifier.
///
/// `"degradation"` and `"improvement"` (case-insensitive) are anomalous,
/// anything else is a normal point. Tags carry no magnitudes.
#[derive(Debug, Clone)]
pub struct TaggedFlags<S> {
    timestamps: Vec<DateTime<Utc>>,
    tags: Vec<S>,
}

impl<S: AsRef<str>> TaggedFlags<S> {
    /// Pairs tags with timestamps; extra entries on either side are ignored.
    pub fn new(timestamps: Vec<DateTime<Utc>>, tags: Vec<S>) -> Self {
        Self { timestamps, tags }
    }

    fn parse(tag: &str) -> Option<Direction> {
        match tag.trim().to_ascii_lowercase().as_str() {
            "degradation" => Some(Direction::Degradation),
            "improvement" => Some(Direction::Improvement),
            _ => None,
        }
    }
}

impl<S: AsRef<str>> FlagSource for TaggedFlags<S> {
    fn len(&self) -> usize {
        self.timestamps.len().min(self.tags.len())
    }

    fn point(&self, index: usize) -> FlagPoint {
        FlagPoint {
            direction: Self::parse(self.tags[index].as_ref()),
            ..FlagPoint::normal(self.timestamps[index])
        }
    }
}

/// Turns a series and its baseline into per-point flags.
#[derive(Debug, Clone, Copy)]
pub struct FlagExtractor {
    pub threshold: DeviationThreshold,
    pub polarity: Polarity,
    pub epsilon: f64,
}

impl FlagExtractor {
    pub fn new(threshold: DeviationThreshold, polarity: Polarity, epsilon: f64) -> Self {
        Self {
            threshold,
            polarity,
            epsilon,
        }
    }

    /// Points without data or without a baseline are never anomalous.
    pub fn extract(&self, series: &MetricSeries, baseline: &Baseline) -> PointFlags {
        let points = (0..series.len())
            .map(|i| {
                let timestamp = series.timestamp(i);
                let (Some(value), Ok(expected)) = (series.value(i), baseline.get(i)) else {
                    return FlagPoint::normal(timestamp);
                };
                let delta = (value - expected).clamp(f64::MIN, f64::MAX);
                let direction = self
                    .threshold
                    .is_exceeded(delta, expected, self.epsilon)
                    .then(|| self.polarity.direction(delta));
                FlagPoint {
                    timestamp,
                    direction,
                    delta: Some(delta),
                    baseline: Some(expected),
                }
            })
            .collect();
        PointFlags { points }
    }
}
