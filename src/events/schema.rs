//! Structural validation of an [`AnalysisReport`].
//!
//! Anything the engine emits passes these checks; they exist so consumers
//! can verify reports that were stored or hand-edited.

use crate::analysis::attribution::AttributionStatus;
use crate::detect::Scope;
use crate::events::{event_id, AnalysisReport, AnomalyEvent};
use std::collections::{BTreeMap, HashMap, HashSet};
use thiserror::Error;
use uuid::Uuid;

const TOLERANCE: f64 = 1e-9;

#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("malformed report: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("event {id}: {reason}")]
    InvalidEvent { id: Uuid, reason: String },

    #[error("event {id} does not match the id derived from its window ({expected})")]
    IdMismatch { id: Uuid, expected: Uuid },

    #[error("duplicate event id {0}")]
    DuplicateId(Uuid),

    #[error("events {first} and {second} overlap for {scope} {metric}")]
    Overlap {
        scope: Scope,
        metric: String,
        first: Uuid,
        second: Uuid,
    },

    #[error("event {id} links to {target}, which {reason}")]
    DanglingLink { id: Uuid, target: Uuid, reason: String },
}

fn invalid(event: &AnomalyEvent, reason: impl Into<String>) -> SchemaError {
    SchemaError::InvalidEvent {
        id: event.id,
        reason: reason.into(),
    }
}

fn check_window(event: &AnomalyEvent) -> Result<(), SchemaError> {
    let w = &event.window;
    if w.start > w.end {
        return Err(invalid(event, "window starts after it ends"));
    }
    if w.metric.is_empty() {
        return Err(invalid(event, "metric is empty"));
    }
    if ![w.peak_delta, w.avg_delta, w.baseline_mean].iter().all(|v| v.is_finite()) {
        return Err(invalid(event, "window statistics must be finite"));
    }
    let expected = event_id(w);
    if event.id != expected {
        return Err(SchemaError::IdMismatch {
            id: event.id,
            expected,
        });
    }
    Ok(())
}

fn check_overall(event: &AnomalyEvent) -> Result<(), SchemaError> {
    if !event.window.scope.is_overall() {
        return Err(invalid(event, "overall collection holds a transaction-scope event"));
    }
    if !event.contributes_to.is_empty() {
        return Err(invalid(event, "overall events cannot contribute to other events"));
    }
    let Some(meta) = &event.attribution else {
        return Err(invalid(event, "attribution metadata is missing"));
    };

    let contributors = &event.contributors;
    if meta.contributors_found != contributors.len() {
        return Err(invalid(event, "contributors_found does not match the contributor list"));
    }
    let status_ok = match meta.status {
        AttributionStatus::Success => !contributors.is_empty(),
        AttributionStatus::Failed | AttributionStatus::NotAttempted => contributors.is_empty(),
    };
    if !status_ok {
        return Err(invalid(event, "attribution status disagrees with the contributor list"));
    }

    let mut seen = HashSet::new();
    for c in contributors {
        let unit = 0.0..=1.0 + TOLERANCE;
        if !unit.contains(&c.share) || !unit.contains(&c.overlap_fraction) {
            return Err(invalid(
                event,
                format!("contributor {} has share or overlap outside [0, 1]", c.transaction),
            ));
        }
        if !(c.impact.is_finite() && c.impact >= 0.0) {
            return Err(invalid(
                event,
                format!("contributor {} has an invalid impact", c.transaction),
            ));
        }
        if !seen.insert(c.transaction.as_str()) {
            return Err(invalid(event, format!("transaction {} listed twice", c.transaction)));
        }
    }
    if contributors.windows(2).any(|pair| pair[0].impact < pair[1].impact) {
        return Err(invalid(event, "contributors are not ranked by impact"));
    }

    let top = contributors.first().map(|c| c.share).unwrap_or(0.0);
    let total = contributors.iter().map(|c| c.share).sum::<f64>().min(1.0);
    if (meta.top_contributor_share - top).abs() > TOLERANCE
        || (meta.total_explained_share - total).abs() > TOLERANCE
    {
        return Err(invalid(event, "share summary disagrees with the contributor list"));
    }
    Ok(())
}

fn check_transaction(event: &AnomalyEvent) -> Result<(), SchemaError> {
    if event.window.scope.is_overall() {
        return Err(invalid(event, "transaction collection holds an overall-scope event"));
    }
    if event.attribution.is_some() || !event.contributors.is_empty() {
        return Err(invalid(event, "transaction events carry no attribution"));
    }
    Ok(())
}

/// Windows of one (scope, metric) must be ordered and disjoint.
fn check_ordering<'a>(events: impl Iterator<Item = &'a AnomalyEvent>) -> Result<(), SchemaError> {
    let mut groups: BTreeMap<(&Scope, &str), Vec<&AnomalyEvent>> = BTreeMap::new();
    for e in events {
        groups
            .entry((&e.window.scope, e.window.metric.as_str()))
            .or_default()
            .push(e);
    }
    for ((scope, metric), mut group) in groups {
        group.sort_by_key(|e| e.window.start);
        for pair in group.windows(2) {
            if pair[0].window.end >= pair[1].window.start {
                return Err(SchemaError::Overlap {
                    scope: scope.clone(),
                    metric: metric.to_string(),
                    first: pair[0].id,
                    second: pair[1].id,
                });
            }
        }
    }
    Ok(())
}

impl AnalysisReport {
    pub fn validate(&self) -> Result<(), SchemaError> {
        let mut ids: HashMap<Uuid, &AnomalyEvent> = HashMap::new();
        for event in self.overall.iter().chain(self.transactions.iter()) {
            check_window(event)?;
            if ids.insert(event.id, event).is_some() {
                return Err(SchemaError::DuplicateId(event.id));
            }
        }
        for event in &self.overall {
            check_overall(event)?;
        }
        for event in &self.transactions {
            check_transaction(event)?;
        }
        check_ordering(self.overall.iter().chain(self.transactions.iter()))?;

        // Forward and reverse links must agree.
        for overall in &self.overall {
            for c in &overall.contributors {
                let Some(target) = ids.get(&c.event_id) else {
                    return Err(SchemaError::DanglingLink {
                        id: overall.id,
                        target: c.event_id,
                        reason: "does not exist".to_string(),
                    });
                };
                if target.window.scope.transaction() != Some(c.transaction.as_str())
                    || target.window.metric != c.metric
                {
                    return Err(SchemaError::DanglingLink {
                        id: overall.id,
                        target: c.event_id,
                        reason: "is a different transaction window".to_string(),
                    });
                }
                if !target.contributes_to.contains(&overall.id) {
                    return Err(SchemaError::DanglingLink {
                        id: overall.id,
                        target: c.event_id,
                        reason: "has no back-link".to_string(),
                    });
                }
            }
        }
        for txn in &self.transactions {
            for target_id in &txn.contributes_to {
                let credited = ids
                    .get(target_id)
                    .filter(|t| t.window.scope.is_overall())
                    .is_some_and(|t| t.contributors.iter().any(|c| c.event_id == txn.id));
                if !credited {
                    return Err(SchemaError::DanglingLink {
                        id: txn.id,
                        target: *target_id,
                        reason: "does not list it as a contributor".to_string(),
                    });
                }
            }
        }
        Ok(())
    }
}
