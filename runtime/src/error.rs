//! Error taxonomy for the audit pipeline.
//!
//! Run-level failures (`PipelineError`) abort a run. Page-level failures
//! (`PageError`) are captured on the page result and never leave the
//! executor as control flow.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Failures that are fatal to a whole run.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// The sitemap could not be fetched or answered with a non-success status.
    #[error("failed to fetch {url}: {reason}")]
    Fetch { url: String, reason: String },

    /// A sitemap or stored document was not in the expected shape.
    #[error("failed to parse {source_name}: {reason}")]
    Parse { source_name: String, reason: String },

    /// A URL or configuration value was malformed.
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl PipelineError {
    pub fn fetch(url: impl Into<String>, reason: impl fmt::Display) -> Self {
        Self::Fetch {
            url: url.into(),
            reason: reason.to_string(),
        }
    }

    pub fn parse(source_name: impl Into<String>, reason: impl fmt::Display) -> Self {
        Self::Parse {
            source_name: source_name.into(),
            reason: reason.to_string(),
        }
    }

    pub fn validation(field: impl Into<String>, reason: impl fmt::Display) -> Self {
        Self::Validation {
            field: field.into(),
            reason: reason.to_string(),
        }
    }
}

/// Classification of a single page failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PageErrorKind {
    ValidationError,
    TimeoutError,
    PageSizeExceeded,
    InvalidResultError,
    BrowserError,
    StorageError,
}

impl PageErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ValidationError => "ValidationError",
            Self::TimeoutError => "TimeoutError",
            Self::PageSizeExceeded => "PageSizeExceeded",
            Self::InvalidResultError => "InvalidResultError",
            Self::BrowserError => "BrowserError",
            Self::StorageError => "StorageError",
        }
    }
}

impl fmt::Display for PageErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A failure while auditing one page.
#[derive(Debug, Clone, thiserror::Error)]
pub enum PageError {
    #[error("invalid url {url}: {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("{operation} timed out after {timeout_ms}ms")]
    Timeout { operation: String, timeout_ms: u64 },

    #[error("page size {content_length} bytes exceeds limit of {limit} bytes")]
    PageSizeExceeded { content_length: u64, limit: u64 },

    #[error("invalid audit result: {0}")]
    InvalidResult(String),

    #[error("browser error: {0}")]
    Browser(String),

    /// Writing the page's artifacts failed.
    #[error("storage error: {0}")]
    Storage(String),
}

impl PageError {
    pub fn kind(&self) -> PageErrorKind {
        match self {
            Self::InvalidUrl { .. } => PageErrorKind::ValidationError,
            Self::Timeout { .. } => PageErrorKind::TimeoutError,
            Self::PageSizeExceeded { .. } => PageErrorKind::PageSizeExceeded,
            Self::InvalidResult(_) => PageErrorKind::InvalidResultError,
            Self::Browser(_) => PageErrorKind::BrowserError,
            Self::Storage(_) => PageErrorKind::StorageError,
        }
    }

    pub fn timeout(operation: &str, timeout_ms: u64) -> Self {
        Self::Timeout {
            operation: operation.to_string(),
            timeout_ms,
        }
    }

    /// Wrap any displayable browser-side failure.
    pub fn browser(err: impl fmt::Display) -> Self {
        Self::Browser(err.to_string())
    }
}
