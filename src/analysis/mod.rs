//! Cross-scope attribution of overall anomalies to transaction anomalies.

pub mod attribution;
pub mod interval;
pub mod share;

pub use attribution::{
    AttributionEngine, AttributionMetadata, AttributionOutcome, AttributionStatus, Contributor,
    TemporalRelationship,
};
