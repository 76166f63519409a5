//! JSONL run log: one append-only event line per page and run milestone.

use crate::audit::result::{PageOutcome, PageResult};
use anyhow::{Context, Result};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;

/// A single run event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunEvent {
    pub timestamp: String,
    pub event: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// Append-only JSONL logger for one run.
pub struct RunLogger {
    file: File,
}

impl RunLogger {
    /// Open or create the log file.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("failed to open run log: {}", path.display()))?;

        Ok(Self { file })
    }

    pub fn log(&mut self, event: &RunEvent) -> Result<()> {
        let json = serde_json::to_string(event)?;
        writeln!(self.file, "{json}")?;
        Ok(())
    }

    /// Log a run milestone (`started`, `rejected`, `finished`, ...).
    pub fn log_milestone(
        &mut self,
        event: &str,
        url: Option<&str>,
        status: &str,
        detail: Option<&str>,
    ) -> Result<()> {
        self.log(&RunEvent {
            timestamp: Utc::now().to_rfc3339(),
            event: event.to_string(),
            url: url.map(String::from),
            index: None,
            duration_ms: None,
            status: status.to_string(),
            detail: detail.map(String::from),
        })
    }

    /// Log the outcome of one page audit.
    pub fn log_page(&mut self, result: &PageResult) -> Result<()> {
        let (status, detail) = match &result.outcome {
            PageOutcome::Success(s) => (
                "success".to_string(),
                Some(format!("{} violated rules", s.counts.total())),
            ),
            PageOutcome::Failure(f) => (f.kind.to_string(), Some(f.message.clone())),
        };
        self.log(&RunEvent {
            timestamp: Utc::now().to_rfc3339(),
            event: "page".to_string(),
            url: Some(result.url.clone()),
            index: Some(result.index),
            duration_ms: Some(result.duration_ms),
            status,
            detail,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::result::PageFailure;
    use crate::error::PageError;

    #[test]
    fn test_appends_one_line_per_event() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run/events.jsonl");

        let mut logger = RunLogger::open(&path).unwrap();
        logger
            .log_milestone("started", Some("https://example.com/sitemap.xml"), "ok", None)
            .unwrap();
        logger
            .log_page(&PageResult {
                url: "https://example.com/a".into(),
                base_name: "example.com_a".into(),
                index: 1,
                total: 1,
                duration_ms: 40,
                outcome: PageOutcome::Failure(PageFailure::from(&PageError::timeout(
                    "navigation",
                    30_000,
                ))),
            })
            .unwrap();
        drop(logger);

        // Reopening appends.
        RunLogger::open(&path)
            .unwrap()
            .log_milestone("finished", None, "ok", Some("0 ok, 1 failed"))
            .unwrap();

        let events: Vec<RunEvent> = std::fs::read_to_string(&path)
            .unwrap()
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(events.len(), 3);
        assert_eq!(events[1].event, "page");
        assert_eq!(events[1].status, "TimeoutError");
        assert_eq!(events[1].duration_ms, Some(40));
        assert_eq!(events[2].detail.as_deref(), Some("0 ok, 1 failed"));
    }
}
