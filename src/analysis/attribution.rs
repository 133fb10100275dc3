//! Links overall anomaly windows to the transaction windows that explain them.

use crate::analysis::interval::IntervalIndex;
use crate::analysis::share::{CoverageCap, ShareModel, ShareTable};
use crate::config::EngineConfig;
use crate::detect::scope::ScopeWindows;
use crate::detect::series::RunMetrics;
use crate::detect::window::AnomalyWindow;
use crate::events::event_id;
use chrono::{DateTime, Utc};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, info};
use uuid::Uuid;

/// Start-time ordering of a contributor relative to the overall window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TemporalRelationship {
    PotentialCause,
    DownstreamEffect,
    Correlated,
}

impl TemporalRelationship {
    /// `lead_seconds` is how long before the overall window the candidate started.
    pub fn classify(lead_seconds: f64, config: &EngineConfig) -> Self {
        if lead_seconds > 0.0 && lead_seconds >= config.cause_lead_seconds {
            TemporalRelationship::PotentialCause
        } else if lead_seconds < 0.0 && -lead_seconds >= config.effect_lag_seconds {
            TemporalRelationship::DownstreamEffect
        } else {
            TemporalRelationship::Correlated
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttributionStatus {
    Success,
    Failed,
    NotAttempted,
}

/// One transaction window credited with part of an overall anomaly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Contributor {
    pub transaction: String,
    pub metric: String,
    /// Event id of the transaction window.
    pub event_id: Uuid,
    pub overlap_fraction: f64,
    pub overlap_seconds: f64,
    pub share: f64,
    pub severity: f64,
    pub metric_weight: f64,
    pub impact: f64,
    pub direction_match: bool,
    pub temporal_relationship: TemporalRelationship,
    pub lead_seconds: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttributionMetadata {
    pub status: AttributionStatus,
    pub candidates_considered: usize,
    pub contributors_found: usize,
    pub top_contributor_share: f64,
    pub total_explained_share: f64,
}

impl AttributionMetadata {
    fn not_attempted() -> Self {
        Self {
            status: AttributionStatus::NotAttempted,
            candidates_considered: 0,
            contributors_found: 0,
            top_contributor_share: 0.0,
            total_explained_share: 0.0,
        }
    }

    pub fn for_contributors(contributors: &[Contributor], candidates_considered: usize) -> Self {
        let status = if contributors.is_empty() {
            AttributionStatus::Failed
        } else {
            AttributionStatus::Success
        };
        Self {
            status,
            candidates_considered,
            contributors_found: contributors.len(),
            top_contributor_share: contributors.first().map(|c| c.share).unwrap_or(0.0),
            total_explained_share: contributors.iter().map(|c| c.share).sum::<f64>().min(1.0),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Attribution {
    pub contributors: Vec<Contributor>,
    pub metadata: AttributionMetadata,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AttributedWindow {
    pub window: AnomalyWindow,
    pub attribution: Attribution,
}

/// Attribution of every overall window plus the reverse links.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AttributionOutcome {
    /// Ordered by (start, metric).
    pub attributed: Vec<AttributedWindow>,
    /// Transaction event id -> overall event ids it was credited to.
    pub contributes_to: HashMap<Uuid, Vec<Uuid>>,
}

/// `share x severity x weight`, then direction and temporal adjustments.
/// Saturates at `f64::MAX`.
pub fn score(
    share: f64,
    severity: f64,
    metric_weight: f64,
    direction_match: bool,
    relationship: TemporalRelationship,
    config: &EngineConfig,
) -> f64 {
    let mut impact = share * severity * metric_weight;
    if !direction_match {
        impact *= config.direction_mismatch_penalty;
    }
    let adjusted = match relationship {
        TemporalRelationship::PotentialCause => impact * config.cause_boost,
        TemporalRelationship::DownstreamEffect => impact * config.effect_penalty,
        TemporalRelationship::Correlated => impact,
    };
    adjusted.min(f64::MAX)
}

fn seconds_between(later: DateTime<Utc>, earlier: DateTime<Utc>) -> f64 {
    (later - earlier).num_milliseconds() as f64 / 1000.0
}

pub struct AttributionEngine<'a> {
    config: &'a EngineConfig,
    index: IntervalIndex<'a>,
    shares: ShareModel<'a>,
    cap: CoverageCap,
}

impl<'a> AttributionEngine<'a> {
    /// Builds the transaction interval index once for the whole run.
    pub fn new(config: &'a EngineConfig, windows: &'a ScopeWindows, run: &'a RunMetrics) -> Self {
        Self {
            config,
            index: IntervalIndex::build(windows),
            shares: ShareModel::new(run, &config.request_rate_metric),
            cap: CoverageCap::new(config.per_txn_coverage, config.per_txn_max_k),
        }
    }

    /// Overlap check. Returns `(overlap_seconds, overlap_fraction)` of a
    /// qualifying candidate.
    fn overlap(&self, overall: &AnomalyWindow, candidate: &AnomalyWindow) -> Option<(f64, f64)> {
        let overlap_seconds = candidate.intersection_secs(overall.start, overall.end)?;
        let span = candidate.duration_secs();
        let fraction = if span > 0.0 {
            (overlap_seconds / span).min(1.0)
        } else {
            1.0
        };
        let required = self.config.min_overlap_seconds.min(span);
        (overlap_seconds >= required && fraction > self.config.min_overlap_fraction)
            .then_some((overlap_seconds, fraction))
    }

    fn candidate(
        &self,
        overall: &AnomalyWindow,
        candidate: &AnomalyWindow,
        share_cache: &mut HashMap<(DateTime<Utc>, DateTime<Utc>), ShareTable<'a>>,
    ) -> Option<Contributor> {
        let transaction = candidate.scope.transaction()?;
        let (overlap_seconds, overlap_fraction) = self.overlap(overall, candidate)?;

        let sub_start = overall.start.max(candidate.start);
        let sub_end = overall.end.min(candidate.end);
        let share = share_cache
            .entry((sub_start, sub_end))
            .or_insert_with(|| self.shares.shares(sub_start, sub_end))
            .share_of(transaction);

        let severity = candidate.severity(self.config.baseline_epsilon);
        let metric_weight = self.config.weight_for(&candidate.metric);
        let direction_match = candidate.direction == overall.direction;
        let lead_seconds = seconds_between(overall.start, candidate.start);
        let temporal_relationship = TemporalRelationship::classify(lead_seconds, self.config);
        let impact = score(
            share,
            severity,
            metric_weight,
            direction_match,
            temporal_relationship,
            self.config,
        );

        Some(Contributor {
            transaction: transaction.to_string(),
            metric: candidate.metric.clone(),
            event_id: event_id(candidate),
            overlap_fraction,
            overlap_seconds,
            share,
            severity,
            metric_weight,
            impact,
            direction_match,
            temporal_relationship,
            lead_seconds,
        })
    }

    /// Rank the transaction windows overlapping one overall window.
    pub fn attribute(&self, overall: &AnomalyWindow) -> Attribution {
        if self.index.is_empty() {
            return Attribution {
                contributors: Vec::new(),
                metadata: AttributionMetadata::not_attempted(),
            };
        }

        let candidates = self.index.query(overall.start, overall.end);
        let mut share_cache = HashMap::new();

        // Best-scoring window per transaction.
        let mut best: BTreeMap<String, Contributor> = BTreeMap::new();
        for window in &candidates {
            let Some(c) = self.candidate(overall, window, &mut share_cache) else {
                continue;
            };
            let replace = best
                .get(&c.transaction)
                .map_or(true, |existing| c.impact > existing.impact);
            if replace {
                best.insert(c.transaction.clone(), c);
            }
        }

        // Only candidate transactions compete for coverage.
        let best: Vec<Contributor> = best.into_values().collect();
        let evaluated = self.cap.select(best, |c| (c.share, c.transaction.as_str()));
        let mut contributors: Vec<Contributor> = evaluated
            .into_iter()
            .filter(|c| !c.impact.is_nan() && c.impact > self.config.min_impact)
            .collect();
        contributors.sort_by(|a, b| {
            b.impact
                .total_cmp(&a.impact)
                .then_with(|| a.transaction.cmp(&b.transaction))
                .then_with(|| a.metric.cmp(&b.metric))
        });
        contributors.truncate(self.config.top_n_contributors);

        debug!(
            metric = %overall.metric,
            start = %overall.start,
            candidates = candidates.len(),
            kept = contributors.len(),
            "overall window attributed"
        );

        let metadata = AttributionMetadata::for_contributors(&contributors, candidates.len());
        Attribution { contributors, metadata }
    }

    /// Attribute every overall window; windows are independent of each other.
    pub fn attribute_all(&self, windows: &ScopeWindows) -> AttributionOutcome {
        let mut overall: Vec<&AnomalyWindow> = windows.overall_windows().collect();
        overall.sort_by(|a, b| a.start.cmp(&b.start).then_with(|| a.metric.cmp(&b.metric)));

        let attributions: Vec<Attribution> = if self.config.parallel {
            overall.par_iter().map(|w| self.attribute(w)).collect()
        } else {
            overall.iter().map(|w| self.attribute(w)).collect()
        };

        let mut contributes_to: HashMap<Uuid, Vec<Uuid>> = HashMap::new();
        let attributed: Vec<AttributedWindow> = overall
            .into_iter()
            .zip(attributions)
            .map(|(window, attribution)| {
                let overall_id = event_id(window);
                for c in &attribution.contributors {
                    contributes_to.entry(c.event_id).or_default().push(overall_id);
                }
                AttributedWindow {
                    window: window.clone(),
                    attribution,
                }
            })
            .collect();

        let succeeded = attributed
            .iter()
            .filter(|a| a.attribution.metadata.status == AttributionStatus::Success)
            .count();
        info!(
            overall_windows = attributed.len(),
            transaction_windows = self.index.window_count(),
            attributed = succeeded,
            "attribution complete"
        );

        AttributionOutcome {
            attributed,
            contributes_to,
        }
    }
}
