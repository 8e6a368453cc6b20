//! Per-record classification outcomes.

use serde::{Deserialize, Serialize};

/// One record's classification as returned by the service.
///
/// `labels` and `scores` are positionally aligned, highest-confidence first.
/// Labels are opaque category tags: they are never parsed, trimmed or
/// assumed numeric.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Classification {
    /// Category tags, passed through verbatim.
    pub labels: Vec<String>,

    /// Confidence scores, same length as `labels`, non-increasing.
    /// `f64` keeps the values JSON-exact end to end; a narrower float
    /// would pick up widening noise in the output rows.
    pub scores: Vec<f64>,
}

impl Classification {
    /// Validate the shape of a prediction.
    ///
    /// Returns the reason string when the prediction is malformed: arity
    /// mismatch between labels and scores, empty prediction, or scores not
    /// in non-increasing order.
    pub fn validate(&self) -> Result<(), &'static str> {
        if self.labels.len() != self.scores.len() {
            return Err("label_score_length_mismatch");
        }
        if self.labels.is_empty() {
            return Err("empty_prediction");
        }
        if self.scores.windows(2).any(|w| w[0] < w[1]) {
            return Err("scores_not_descending");
        }
        Ok(())
    }

    /// Top label, if any.
    pub fn prediction(&self) -> Option<&str> {
        self.labels.first().map(String::as_str)
    }

    /// Top score, if any.
    pub fn confidence(&self) -> Option<f64> {
        self.scores.first().copied()
    }
}

/// Outcome for a single record after executor and validation.
///
/// A failed outcome is still written to the output artifact: the record is
/// accounted for and the checkpoint advances past it.
#[derive(Debug, Clone)]
pub enum RecordOutcome {
    /// The service returned a well-formed classification.
    Classified(Classification),

    /// This record could not be classified. The rest of its batch may have
    /// succeeded.
    Failed {
        /// Machine-readable reason, e.g. `payload_too_large`,
        /// `max_attempts_exhausted`, `rejected_by_service`.
        error_type: String,
        /// Human-readable detail.
        message: String,
    },
}

impl RecordOutcome {
    /// Shorthand for a failure outcome.
    pub fn failed(error_type: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Failed {
            error_type: error_type.into(),
            message: message.into(),
        }
    }

    /// True for [`RecordOutcome::Classified`].
    pub fn is_classified(&self) -> bool {
        matches!(self, Self::Classified(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_ok() {
        let c = Classification {
            labels: vec!["__label__1".into(), "__label__0".into()],
            scores: vec![0.9, 0.1],
        };
        assert!(c.validate().is_ok());
        assert_eq!(c.prediction(), Some("__label__1"));
        assert_eq!(c.confidence(), Some(0.9));
    }

    #[test]
    fn test_validate_length_mismatch() {
        let c = Classification {
            labels: vec!["a".into()],
            scores: vec![0.9, 0.1],
        };
        assert_eq!(c.validate(), Err("label_score_length_mismatch"));
    }

    #[test]
    fn test_validate_empty() {
        let c = Classification {
            labels: vec![],
            scores: vec![],
        };
        assert_eq!(c.validate(), Err("empty_prediction"));
    }

    #[test]
    fn test_validate_score_order() {
        let c = Classification {
            labels: vec!["a".into(), "b".into()],
            scores: vec![0.1, 0.9],
        };
        assert_eq!(c.validate(), Err("scores_not_descending"));
    }

    #[test]
    fn test_failed_outcome() {
        let o = RecordOutcome::failed("payload_too_large", "1048577 bytes");
        assert!(!o.is_classified());
    }
}
