//! Anomaly detection: baselines, per-point flags and anomaly windows.

pub mod baseline;
pub mod flags;
pub mod scope;
pub mod series;
pub mod window;

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum DetectError {
    #[error("insufficient history: need {needed} valid samples, have {have}")]
    InsufficientHistory { needed: usize, have: usize },

    #[error("no baseline available at index {index}")]
    MissingBaseline { index: usize },
}

/// Direction of a deviation relative to the metric's notion of "worse".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Degradation,
    Improvement,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Degradation => "degradation",
            Direction::Improvement => "improvement",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Level at which a metric is measured.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Scope {
    Overall,
    Transaction(String),
}

impl Scope {
    pub fn is_overall(&self) -> bool {
        matches!(self, Scope::Overall)
    }

    pub fn transaction(&self) -> Option<&str> {
        match self {
            Scope::Overall => None,
            Scope::Transaction(name) => Some(name),
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scope::Overall => f.write_str("overall"),
            Scope::Transaction(name) => write!(f, "txn:{}", name),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scope_serde_shape() {
        let overall = serde_json::to_value(Scope::Overall).unwrap();
        assert_eq!(overall, serde_json::json!("overall"));

        let txn = serde_json::to_value(Scope::Transaction("login".to_string())).unwrap();
        assert_eq!(txn, serde_json::json!({ "transaction": "login" }));
    }

    #[test]
    fn test_insufficient_history_display() {
        let err = DetectError::InsufficientHistory { needed: 6, have: 2 };
        assert_eq!(
            err.to_string(),
            "insufficient history: need 6 valid samples, have 2"
        );
    }
}
