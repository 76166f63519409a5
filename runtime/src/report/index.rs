//! The reports index: a self-healing list of completed runs.
//!
//! Entries whose summary or results directory has disappeared are dropped
//! every time the index is read or written.

use crate::config::Settings;
use crate::error::PipelineError;
use crate::pipeline::run::Run;
use crate::report::artifact::{write_json_atomic, ImpactCounts};
use crate::report::summary::RunSummary;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// File name of the index under the output root.
pub const INDEX_FILE: &str = "reports-index.json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexEntry {
    pub run_id: String,
    pub generated_at: DateTime<Utc>,
    /// Relative to the output root when the run lives under it.
    pub summary_path: PathBuf,
    pub results_dir: PathBuf,
    pub successful: usize,
    pub failed: usize,
    pub impact_totals: ImpactCounts,
    pub settings: Settings,
}

impl IndexEntry {
    pub fn from_summary(root: &Path, run: &Run, summary: &RunSummary) -> Self {
        Self {
            run_id: run.id.clone(),
            generated_at: summary.generated_at,
            summary_path: relative_to(root, &run.summary_path()),
            results_dir: relative_to(root, &run.results_dir()),
            successful: summary.successful,
            failed: summary.failed,
            impact_totals: summary.impact_totals,
            settings: run.settings.clone(),
        }
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct IndexFile {
    #[serde(default)]
    runs: Vec<IndexEntry>,
}

pub struct ReportsIndex {
    root: PathBuf,
    entries: Vec<IndexEntry>,
}

impl ReportsIndex {
    /// Read the index under `root` and drop stale entries.
    ///
    /// A missing or unparsable index reads as empty.
    pub fn load(root: &Path) -> Result<Self, PipelineError> {
        let path = root.join(INDEX_FILE);
        let entries = match std::fs::read_to_string(&path) {
            Ok(raw) => match serde_json::from_str::<IndexFile>(&raw) {
                Ok(file) => file.runs,
                Err(e) => {
                    warn!("ignoring unparsable index {}: {e}", path.display());
                    Vec::new()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(e) => return Err(e.into()),
        };

        let mut index = Self {
            root: root.to_path_buf(),
            entries,
        };
        index.reconcile();
        Ok(index)
    }

    /// Drop entries whose summary file or results directory is missing.
    /// Returns how many were dropped.
    pub fn reconcile(&mut self) -> usize {
        let before = self.entries.len();
        let root = &self.root;
        self.entries.retain(|entry| {
            let alive = resolve(root, &entry.summary_path).is_file()
                && resolve(root, &entry.results_dir).is_dir();
            if !alive {
                debug!("dropping stale index entry {}", entry.run_id);
            }
            alive
        });
        before - self.entries.len()
    }

    /// Insert or replace the entry for `entry.run_id` and persist the index.
    pub fn upsert(&mut self, entry: IndexEntry) -> Result<(), PipelineError> {
        self.entries.retain(|e| e.run_id != entry.run_id);
        self.entries.push(entry);
        self.entries.sort_by(|a, b| {
            b.generated_at
                .cmp(&a.generated_at)
                .then_with(|| b.run_id.cmp(&a.run_id))
        });
        self.reconcile();
        self.save()
    }

    pub fn save(&self) -> Result<(), PipelineError> {
        let file = IndexFile {
            runs: self.entries.clone(),
        };
        write_json_atomic(&self.path(), &file)
    }

    /// Newest first.
    pub fn entries(&self) -> &[IndexEntry] {
        &self.entries
    }

    pub fn get(&self, run_id: &str) -> Option<&IndexEntry> {
        self.entries.iter().find(|e| e.run_id == run_id)
    }

    pub fn path(&self) -> PathBuf {
        self.root.join(INDEX_FILE)
    }

    /// Absolute location of an entry's summary.
    pub fn summary_path(&self, entry: &IndexEntry) -> PathBuf {
        resolve(&self.root, &entry.summary_path)
    }
}

fn relative_to(root: &Path, path: &Path) -> PathBuf {
    path.strip_prefix(root)
        .map(Path::to_path_buf)
        .unwrap_or_else(|_| path.to_path_buf())
}

fn resolve(root: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        root.join(path)
    }
}
