//! Page results: the outcome of auditing one URL, success or failure as data.

use crate::error::{PageError, PageErrorKind};
use crate::report::artifact::ImpactCounts;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Structured failure captured instead of propagating an error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageFailure {
    pub kind: PageErrorKind,
    pub message: String,
    /// Debug rendering of the error, the closest thing to a stack we keep.
    pub detail: String,
    pub timestamp: DateTime<Utc>,
}

impl From<&PageError> for PageFailure {
    fn from(err: &PageError) -> Self {
        Self {
            kind: err.kind(),
            message: err.to_string(),
            detail: format!("{err:?}"),
            timestamp: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageSuccess {
    pub artifact: PathBuf,
    pub screenshot: Option<PathBuf>,
    pub counts: ImpactCounts,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum PageOutcome {
    Success(PageSuccess),
    Failure(PageFailure),
}

/// Outcome of auditing one URL within a run. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageResult {
    pub url: String,
    pub base_name: String,
    /// 1-based dispatch position, for progress display only.
    pub index: usize,
    pub total: usize,
    pub duration_ms: u64,
    pub outcome: PageOutcome,
}

impl PageResult {
    pub fn is_success(&self) -> bool {
        matches!(self.outcome, PageOutcome::Success(_))
    }

    pub fn failure(&self) -> Option<&PageFailure> {
        match &self.outcome {
            PageOutcome::Failure(f) => Some(f),
            PageOutcome::Success(_) => None,
        }
    }
}

/// Success/failure tally for a finished run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunTally {
    pub successful: usize,
    pub failed: usize,
}

impl RunTally {
    pub fn from_results(results: &[PageResult]) -> Self {
        let successful = results.iter().filter(|r| r.is_success()).count();
        Self {
            successful,
            failed: results.len() - successful,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_from_error() {
        let err = PageError::timeout("navigation", 1000);
        let failure = PageFailure::from(&err);
        assert_eq!(failure.kind, PageErrorKind::TimeoutError);
        assert_eq!(failure.message, "navigation timed out after 1000ms");
        assert!(failure.detail.contains("Timeout"));
    }

    #[test]
    fn test_outcome_serializes_with_status_tag() {
        let result = PageResult {
            url: "https://example.com/".into(),
            base_name: "example.com".into(),
            index: 1,
            total: 1,
            duration_ms: 12,
            outcome: PageOutcome::Failure(PageFailure::from(&PageError::InvalidResult(
                "null".into(),
            ))),
        };
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["outcome"]["status"], "failure");
        assert_eq!(json["outcome"]["kind"], "InvalidResultError");
        assert!(!result.is_success());
        assert_eq!(RunTally::from_results(&[result]).failed, 1);
    }
}
