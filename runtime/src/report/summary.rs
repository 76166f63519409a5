//! Run summary built from the artifacts on disk.

use crate::config::Settings;
use crate::error::{PageErrorKind, PipelineError};
use crate::pipeline::run::Run;
use crate::report::artifact::{write_json_atomic, ArtifactStatus, Impact, ImpactCounts, PageArtifact};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// One row of the per-page table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageSummary {
    pub url: String,
    pub filename: String,
    pub status: ArtifactStatus,
    pub counts: ImpactCounts,
    pub total: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<PageErrorKind>,
}

/// How often one rule was violated across the run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleTally {
    pub id: String,
    pub impact: Impact,
    pub help: String,
    /// Pages on which the rule failed.
    pub pages: usize,
    /// Offending nodes summed over those pages.
    pub nodes: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_id: String,
    pub generated_at: DateTime<Utc>,
    pub settings: Settings,
    pub successful: usize,
    pub failed: usize,
    /// Artifacts that could not be parsed and were left out.
    pub unreadable: usize,
    /// Violated-rule counts per impact, over successful pages.
    pub impact_totals: ImpactCounts,
    /// Share of successful pages with at least one violation of each impact.
    pub impact_page_rates: BTreeMap<Impact, f64>,
    pub pages: Vec<PageSummary>,
    /// Most widespread first.
    pub rules: Vec<RuleTally>,
}

/// Read every artifact of `run` and aggregate them.
pub fn summarize_run(run: &Run) -> Result<RunSummary, PipelineError> {
    let (artifacts, unreadable) = read_artifacts(&run.results_dir())?;

    let mut impact_totals = ImpactCounts::default();
    let mut pages_with = ImpactCounts::default();
    let mut rules: HashMap<String, RuleTally> = HashMap::new();
    let mut pages = Vec::with_capacity(artifacts.len());
    let mut successful = 0;

    for artifact in &artifacts {
        if artifact.status == ArtifactStatus::Ok {
            successful += 1;
            impact_totals.merge(&artifact.counts);
            for impact in Impact::ALL {
                if artifact.counts.get(impact) > 0 {
                    pages_with.add(impact, 1);
                }
            }
            for violation in artifact.violations.values().flatten() {
                let tally = rules.entry(violation.id.clone()).or_insert_with(|| RuleTally {
                    id: violation.id.clone(),
                    impact: violation.impact,
                    help: violation.help.clone(),
                    pages: 0,
                    nodes: 0,
                });
                tally.pages += 1;
                tally.nodes += violation.nodes;
            }
        }

        pages.push(PageSummary {
            url: artifact.meta.url.clone(),
            filename: artifact.meta.filename.clone(),
            status: artifact.status,
            counts: artifact.counts,
            total: artifact.counts.total(),
            error: artifact.error.as_ref().map(|e| e.kind),
        });
    }

    let impact_page_rates = Impact::ALL
        .into_iter()
        .map(|impact| {
            let rate = if successful == 0 {
                0.0
            } else {
                pages_with.get(impact) as f64 / successful as f64
            };
            (impact, rate)
        })
        .collect();

    let mut rules: Vec<RuleTally> = rules.into_values().collect();
    rules.sort_by(|a, b| {
        b.pages
            .cmp(&a.pages)
            .then(b.impact.cmp(&a.impact))
            .then_with(|| a.id.cmp(&b.id))
    });

    Ok(RunSummary {
        run_id: run.id.clone(),
        generated_at: Utc::now(),
        settings: run.settings.clone(),
        successful,
        failed: artifacts.len() - successful,
        unreadable,
        impact_totals,
        impact_page_rates,
        pages,
        rules,
    })
}

/// Persist the summary as `summary.json` in the run directory.
pub fn write_summary(run: &Run, summary: &RunSummary) -> Result<PathBuf, PipelineError> {
    let path = run.summary_path();
    write_json_atomic(&path, summary)?;
    debug!("wrote {}", path.display());
    Ok(path)
}

/// Parse every `*.json` artifact in `dir`, sorted by filename. Returns the
/// artifacts and the number that failed to parse.
fn read_artifacts(dir: &Path) -> Result<(Vec<PageArtifact>, usize), PipelineError> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok((Vec::new(), 0)),
        Err(e) => return Err(e.into()),
    };

    let mut paths: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.extension().is_some_and(|ext| ext == "json"))
        .collect();
    paths.sort();

    let mut artifacts = Vec::with_capacity(paths.len());
    let mut unreadable = 0;
    for path in paths {
        let parsed = std::fs::read_to_string(&path)
            .map_err(|e| e.to_string())
            .and_then(|raw| serde_json::from_str::<PageArtifact>(&raw).map_err(|e| e.to_string()));
        match parsed {
            Ok(artifact) => artifacts.push(artifact),
            Err(e) => {
                warn!("skipping unreadable artifact {}: {e}", path.display());
                unreadable += 1;
            }
        }
    }
    Ok((artifacts, unreadable))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::result::PageFailure;
    use crate::config::DeviceMode;
    use crate::error::PageError;
    use crate::report::artifact::{count_violations, group_violations, ArtifactMeta};
    use serde_json::json;

    fn settings() -> Settings {
        serde_json::from_str(r#"{"sitemap_url": "https://example.com/sitemap.xml"}"#).unwrap()
    }

    fn meta(run: &Run, name: &str) -> ArtifactMeta {
        ArtifactMeta {
            run_id: run.id.clone(),
            url: format!("https://example.com/{name}"),
            filename: format!("{name}.json"),
            locale: "en".into(),
            mode: DeviceMode::Desktop,
            tags: vec!["wcag2a".into()],
            screenshot: None,
            audited_at: Utc::now(),
        }
    }

    fn write_ok(run: &Run, name: &str, payload: serde_json::Value) {
        let violations = group_violations(&payload).unwrap();
        let artifact = PageArtifact {
            status: ArtifactStatus::Ok,
            meta: meta(run, name),
            counts: count_violations(&violations),
            violations,
            error: None,
            audit: Some(payload),
        };
        write_json_atomic(&run.results_dir().join(format!("{name}.json")), &artifact).unwrap();
    }

    #[test]
    fn test_summarize_mixed_run() {
        let root = tempfile::tempdir().unwrap();
        let run = Run::create(root.path(), settings()).unwrap();

        write_ok(
            &run,
            "a",
            json!({"violations": [
                {"id": "image-alt", "impact": "critical", "nodes": [{}, {}]},
                {"id": "color-contrast", "impact": "serious", "nodes": [{}]}
            ]}),
        );
        write_ok(
            &run,
            "b",
            json!({"violations": [
                {"id": "color-contrast", "impact": "serious", "nodes": [{}, {}, {}]}
            ]}),
        );
        write_ok(&run, "c", json!({"violations": []}));

        let failure = PageFailure::from(&PageError::timeout("navigation", 10));
        let failed = PageArtifact {
            status: ArtifactStatus::Failed,
            meta: meta(&run, "d"),
            counts: ImpactCounts::default(),
            violations: Default::default(),
            error: Some(failure),
            audit: None,
        };
        write_json_atomic(&run.results_dir().join("d.json"), &failed).unwrap();
        std::fs::write(run.results_dir().join("e.json"), "{truncated").unwrap();
        std::fs::write(run.results_dir().join("a.jpg"), "jpeg").unwrap();

        let summary = summarize_run(&run).unwrap();
        assert_eq!(summary.successful, 3);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.unreadable, 1);
        assert_eq!(summary.impact_totals.critical, 1);
        assert_eq!(summary.impact_totals.serious, 2);
        assert!((summary.impact_page_rates[&Impact::Serious] - 2.0 / 3.0).abs() < 1e-9);
        assert_eq!(summary.impact_page_rates[&Impact::Minor], 0.0);

        assert_eq!(summary.pages.len(), 4);
        assert_eq!(summary.pages[0].total, 2);
        assert_eq!(summary.pages[3].error, Some(PageErrorKind::TimeoutError));

        assert_eq!(summary.rules[0].id, "color-contrast");
        assert_eq!(summary.rules[0].pages, 2);
        assert_eq!(summary.rules[0].nodes, 4);

        let path = write_summary(&run, &summary).unwrap();
        let back: RunSummary = serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap();
        assert_eq!(back.successful, 3);
    }

    #[test]
    fn test_summarize_empty_run() {
        let root = tempfile::tempdir().unwrap();
        let run = Run::create(root.path(), settings()).unwrap();
        let summary = summarize_run(&run).unwrap();
        assert_eq!(summary.successful + summary.failed, 0);
        assert_eq!(summary.impact_page_rates[&Impact::Critical], 0.0);
    }
}
