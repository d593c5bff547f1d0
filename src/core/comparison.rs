use crate::domain::model::{CountResult, Verdict};
use crate::utils::error::Result;
use crate::utils::validation::{validate_non_negative, Validate};
use serde::{Deserialize, Serialize};

/// Policy for calling a human count "close enough" to the detector's.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ComparisonPolicy {
    /// Differences strictly below this are close enough.
    pub close_match_threshold: f64,
}

impl Default for ComparisonPolicy {
    fn default() -> Self {
        Self {
            close_match_threshold: 5.0,
        }
    }
}

impl ComparisonPolicy {
    pub fn new(close_match_threshold: f64) -> Self {
        Self {
            close_match_threshold,
        }
    }

    pub fn judge(&self, human_count: u64, automated_count: u64) -> CountResult {
        let absolute_difference = human_count.abs_diff(automated_count);
        let verdict = if (absolute_difference as f64) < self.close_match_threshold {
            Verdict::CloseEnough
        } else {
            Verdict::NotCloseEnough
        };

        tracing::info!(
            "Human {} vs detector {}: difference {} ({:?})",
            human_count,
            automated_count,
            absolute_difference,
            verdict
        );

        CountResult {
            human_count,
            automated_count,
            absolute_difference,
            verdict,
        }
    }
}

impl Validate for ComparisonPolicy {
    fn validate(&self) -> Result<()> {
        validate_non_negative("comparison.close_match_threshold", self.close_match_threshold)
    }
}
