//! Merging flagged points into anomaly windows.

use crate::detect::flags::FlagSource;
use crate::detect::{Direction, Scope};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// How long a run of non-anomalous points may be before it closes a window.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GapTolerance {
    /// Maximum number of consecutive non-anomalous points absorbed.
    Points(usize),
    /// Maximum seconds between the last anomalous point and the resuming one.
    Seconds(f64),
}

impl Default for GapTolerance {
    fn default() -> Self {
        GapTolerance::Points(1)
    }
}

/// A maximal span where one metric deviates from baseline in one direction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnomalyWindow {
    pub scope: Scope,
    pub metric: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub direction: Direction,
    /// Signed deviation with the largest magnitude.
    pub peak_delta: f64,
    /// Mean signed deviation over the anomalous points.
    pub avg_delta: f64,
    /// Mean baseline over the anomalous points.
    pub baseline_mean: f64,
    /// Anomalous points inside the window (absorbed gap points excluded).
    pub point_count: usize,
}

impl AnomalyWindow {
    pub fn duration_secs(&self) -> f64 {
        (self.end - self.start).num_milliseconds() as f64 / 1000.0
    }

    /// Relative magnitude `|avg_delta| / max(|baseline_mean|, epsilon)`,
    /// saturating at `f64::MAX`.
    pub fn severity(&self, epsilon: f64) -> f64 {
        (self.avg_delta.abs() / self.baseline_mean.abs().max(epsilon)).min(f64::MAX)
    }

    /// Seconds of the closed intersection with `[start, end]`, or `None`
    /// when the spans are disjoint.
    pub fn intersection_secs(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> Option<f64> {
        let lo = self.start.max(start);
        let hi = self.end.min(end);
        (lo <= hi).then(|| (hi - lo).num_milliseconds() as f64 / 1000.0)
    }
}

/// Mean that updates in place and stays finite for finite inputs.
#[derive(Debug, Default, Clone, Copy)]
struct RunningMean {
    mean: f64,
    count: usize,
}

impl RunningMean {
    fn push(&mut self, value: f64) {
        self.count += 1;
        self.mean += (value - self.mean) / self.count as f64;
        if !self.mean.is_finite() {
            // (value - mean) can overflow for values of opposite sign near f64::MAX.
            self.mean = self.mean.clamp(f64::MIN, f64::MAX);
        }
    }

    fn get(&self) -> f64 {
        self.mean
    }
}

#[derive(Debug)]
struct OpenWindow {
    direction: Direction,
    start: usize,
    last: usize,
    delta: RunningMean,
    peak_delta: f64,
    baseline: RunningMean,
    point_count: usize,
}

impl OpenWindow {
    fn open(index: usize, direction: Direction) -> Self {
        Self {
            direction,
            start: index,
            last: index,
            delta: RunningMean::default(),
            peak_delta: 0.0,
            baseline: RunningMean::default(),
            point_count: 0,
        }
    }

    fn absorb(&mut self, index: usize, delta: Option<f64>, baseline: Option<f64>) {
        self.last = index;
        self.point_count += 1;
        if let Some(d) = delta {
            self.delta.push(d);
            if d.abs() > self.peak_delta.abs() {
                self.peak_delta = d;
            }
        }
        if let Some(b) = baseline {
            self.baseline.push(b);
        }
    }

    fn close<F: FlagSource + ?Sized>(
        self,
        source: &F,
        scope: &Scope,
        metric: &str,
    ) -> AnomalyWindow {
        AnomalyWindow {
            scope: scope.clone(),
            metric: metric.to_string(),
            start: source.point(self.start).timestamp,
            end: source.point(self.last).timestamp,
            direction: self.direction,
            peak_delta: self.peak_delta,
            avg_delta: self.delta.get(),
            baseline_mean: self.baseline.get(),
            point_count: self.point_count,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct WindowBuilder {
    gap: GapTolerance,
}

impl WindowBuilder {
    pub fn new(gap: GapTolerance) -> Self {
        Self { gap }
    }

    fn gap_absorbed<F: FlagSource + ?Sized>(&self, source: &F, last: usize, resume: usize) -> bool {
        let skipped = resume - last - 1;
        if skipped == 0 {
            return true;
        }
        match self.gap {
            GapTolerance::Points(max) => skipped <= max,
            GapTolerance::Seconds(max) => {
                let elapsed = source.point(resume).timestamp - source.point(last).timestamp;
                elapsed.num_milliseconds() as f64 / 1000.0 <= max
            }
        }
    }

    /// Scan the source chronologically and emit non-overlapping windows.
    ///
    /// A direction flip always closes the open window; the flipped point
    /// opens the next one.
    pub fn build<F: FlagSource + ?Sized>(
        &self,
        source: &F,
        scope: &Scope,
        metric: &str,
    ) -> Vec<AnomalyWindow> {
        let mut windows = Vec::new();
        let mut current: Option<OpenWindow> = None;

        for i in 0..source.len() {
            let point = source.point(i);
            let Some(direction) = point.direction else {
                continue;
            };

            current = match current.take() {
                Some(mut open)
                    if open.direction == direction && self.gap_absorbed(source, open.last, i) =>
                {
                    open.absorb(i, point.delta, point.baseline);
                    Some(open)
                }
                previous => {
                    if let Some(done) = previous {
                        windows.push(done.close(source, scope, metric));
                    }
                    let mut open = OpenWindow::open(i, direction);
                    open.absorb(i, point.delta, point.baseline);
                    Some(open)
                }
            };
        }

        if let Some(done) = current {
            windows.push(done.close(source, scope, metric));
        }
        windows
    }
}
