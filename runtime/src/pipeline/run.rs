//! A run: its id, its settings snapshot, and where its artifacts live.

use crate::config::Settings;
use crate::error::PipelineError;
use chrono::{DateTime, Utc};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

/// Directory under the output root holding one subdirectory per run.
pub const RUNS_DIR: &str = "runs";
pub const RESULTS_DIR: &str = "results";
pub const SUMMARY_FILE: &str = "summary.json";
pub const EVENTS_FILE: &str = "events.jsonl";

/// Lexically sortable run id, e.g. `2026-10-19T08-30-05-123Z`.
pub fn format_run_id(at: DateTime<Utc>) -> String {
    at.format("%Y-%m-%dT%H-%M-%S-%3fZ").to_string()
}

#[derive(Debug, Clone)]
pub struct Run {
    pub id: String,
    pub started_at: DateTime<Utc>,
    pub settings: Settings,
    pub dir: PathBuf,
}

impl Run {
    /// Create the run directory under `output_root`, stamped now.
    pub fn create(output_root: &Path, settings: Settings) -> Result<Self, PipelineError> {
        Self::create_at(output_root, settings, Utc::now())
    }

    /// Create the run directory for a run started at `started_at`.
    ///
    /// Two runs in the same millisecond get `-2`, `-3`, ... suffixes.
    pub fn create_at(
        output_root: &Path,
        settings: Settings,
        started_at: DateTime<Utc>,
    ) -> Result<Self, PipelineError> {
        let runs = output_root.join(RUNS_DIR);
        std::fs::create_dir_all(&runs)?;

        let base = format_run_id(started_at);
        let mut id = base.clone();
        let mut n = 2;
        let dir = loop {
            let dir = runs.join(&id);
            match std::fs::create_dir(&dir) {
                Ok(()) => break dir,
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                    id = format!("{base}-{n}");
                    n += 1;
                }
                Err(e) => return Err(e.into()),
            }
        };
        std::fs::create_dir_all(dir.join(RESULTS_DIR))?;

        Ok(Self {
            id,
            started_at,
            settings,
            dir,
        })
    }

    pub fn results_dir(&self) -> PathBuf {
        self.dir.join(RESULTS_DIR)
    }

    pub fn summary_path(&self) -> PathBuf {
        self.dir.join(SUMMARY_FILE)
    }

    pub fn events_path(&self) -> PathBuf {
        self.dir.join(EVENTS_FILE)
    }
}
