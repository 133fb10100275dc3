//! Externally consumed anomaly events.

pub mod assembler;
pub mod schema;

use crate::analysis::attribution::{AttributionMetadata, Contributor};
use crate::detect::window::AnomalyWindow;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub use assembler::EventAssembler;
pub use schema::SchemaError;

/// Namespace for window-derived event ids.
const EVENT_NAMESPACE: Uuid = Uuid::from_u128(0x6c0a_d3f1_52b4_4e0e_9a57_1f3c_8e2d_04b7);

/// Stable id of the event wrapping `window`: a UUID v5 over its scope,
/// metric and span, so identical windows always map to the same id.
///
/// Names are length-prefixed so no choice of separator inside a
/// transaction or metric name can make two keys collide.
pub fn event_id(window: &AnomalyWindow) -> Uuid {
    let scope = window.scope.to_string();
    let key = format!(
        "{}:{}|{}:{}|{}|{}",
        scope.len(),
        scope,
        window.metric.len(),
        window.metric,
        window.start.timestamp_millis(),
        window.end.timestamp_millis()
    );
    Uuid::new_v5(&EVENT_NAMESPACE, key.as_bytes())
}

/// One anomaly window plus its attribution links. Immutable once assembled.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnomalyEvent {
    pub id: Uuid,
    #[serde(flatten)]
    pub window: AnomalyWindow,
    /// Always present on overall events, absent on transaction events.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attribution: Option<AttributionMetadata>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub contributors: Vec<Contributor>,
    /// Overall events this transaction event was credited to.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub contributes_to: Vec<Uuid>,
}

/// Engine output for one test run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnalysisReport {
    pub overall: Vec<AnomalyEvent>,
    pub transactions: Vec<AnomalyEvent>,
}

impl AnalysisReport {
    pub fn event_count(&self) -> usize {
        self.overall.len() + self.transactions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.event_count() == 0
    }

    pub fn find(&self, id: Uuid) -> Option<&AnomalyEvent> {
        self.overall
            .iter()
            .chain(self.transactions.iter())
            .find(|e| e.id == id)
    }

    pub fn to_json(&self, pretty: bool) -> serde_json::Result<String> {
        if pretty {
            serde_json::to_string_pretty(self)
        } else {
            serde_json::to_string(self)
        }
    }

    /// Parse and run schema validation.
    pub fn from_json(text: &str) -> Result<Self, SchemaError> {
        let report: Self = serde_json::from_str(text)?;
        report.validate()?;
        Ok(report)
    }
}
