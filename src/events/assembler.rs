//! Packages attributed windows into the final event collections.

use crate::analysis::attribution::AttributionOutcome;
use crate::detect::scope::ScopeWindows;
use crate::events::{event_id, AnalysisReport, AnomalyEvent};
use std::cmp::Ordering;

pub struct EventAssembler;

fn chronological(a: &AnomalyEvent, b: &AnomalyEvent) -> Ordering {
    a.window
        .start
        .cmp(&b.window.start)
        .then_with(|| a.window.metric.cmp(&b.window.metric))
        .then_with(|| a.window.scope.cmp(&b.window.scope))
}

impl EventAssembler {
    /// Wrap every window in an event. No further analysis happens here.
    pub fn assemble(outcome: AttributionOutcome, windows: &ScopeWindows) -> AnalysisReport {
        let AttributionOutcome {
            attributed,
            mut contributes_to,
        } = outcome;

        let mut overall: Vec<AnomalyEvent> = attributed
            .into_iter()
            .map(|a| AnomalyEvent {
                id: event_id(&a.window),
                window: a.window,
                attribution: Some(a.attribution.metadata),
                contributors: a.attribution.contributors,
                contributes_to: Vec::new(),
            })
            .collect();
        overall.sort_by(chronological);

        let mut transactions: Vec<AnomalyEvent> = windows
            .transaction_windows()
            .map(|w| {
                let id = event_id(w);
                let mut links = contributes_to.remove(&id).unwrap_or_default();
                links.dedup();
                AnomalyEvent {
                    id,
                    window: w.clone(),
                    attribution: None,
                    contributors: Vec::new(),
                    contributes_to: links,
                }
            })
            .collect();
        transactions.sort_by(chronological);

        AnalysisReport {
            overall,
            transactions,
        }
    }
}
