//! Per-page artifacts: file naming, violation grouping, atomic persistence.

use crate::audit::result::PageFailure;
use crate::config::DeviceMode;
use crate::error::PageError;
use chrono::{DateTime, Utc};
use fnv::FnvHasher;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::hash::Hasher;
use std::io::Write;
use std::path::{Path, PathBuf};
use url::Url;

/// Longest base filename before a hash suffix replaces the tail.
const MAX_BASE_NAME: usize = 120;

/// Severity of an accessibility violation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Impact {
    Minor,
    Moderate,
    Serious,
    Critical,
}

impl Impact {
    pub const ALL: [Impact; 4] = [
        Impact::Critical,
        Impact::Serious,
        Impact::Moderate,
        Impact::Minor,
    ];

    /// axe reports `null` impact for some rules; those are bucketed as minor.
    pub fn from_axe(raw: Option<&str>) -> Impact {
        match raw {
            Some("critical") => Impact::Critical,
            Some("serious") => Impact::Serious,
            Some("moderate") => Impact::Moderate,
            _ => Impact::Minor,
        }
    }
}

/// Violated-rule counts per impact level.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImpactCounts {
    pub critical: usize,
    pub serious: usize,
    pub moderate: usize,
    pub minor: usize,
}

impl ImpactCounts {
    pub fn get(&self, impact: Impact) -> usize {
        match impact {
            Impact::Critical => self.critical,
            Impact::Serious => self.serious,
            Impact::Moderate => self.moderate,
            Impact::Minor => self.minor,
        }
    }

    pub fn add(&mut self, impact: Impact, n: usize) {
        match impact {
            Impact::Critical => self.critical += n,
            Impact::Serious => self.serious += n,
            Impact::Moderate => self.moderate += n,
            Impact::Minor => self.minor += n,
        }
    }

    pub fn merge(&mut self, other: &ImpactCounts) {
        for impact in Impact::ALL {
            self.add(impact, other.get(impact));
        }
    }

    pub fn total(&self) -> usize {
        self.critical + self.serious + self.moderate + self.minor
    }
}

/// One violated rule on one page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ViolationSummary {
    pub id: String,
    pub impact: Impact,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub help: String,
    #[serde(default)]
    pub help_url: String,
    /// Number of offending nodes.
    pub nodes: usize,
    /// CSS selectors of the offending nodes.
    #[serde(default)]
    pub targets: Vec<String>,
}

pub type GroupedViolations = BTreeMap<Impact, Vec<ViolationSummary>>;

/// Group the `violations` of an axe result by impact.
///
/// Anything that is not an object with a `violations` array is an
/// invalid result.
pub fn group_violations(payload: &serde_json::Value) -> Result<GroupedViolations, PageError> {
    let obj = payload
        .as_object()
        .ok_or_else(|| PageError::InvalidResult(format!("expected object, got {}", json_kind(payload))))?;
    let violations = obj
        .get("violations")
        .and_then(|v| v.as_array())
        .ok_or_else(|| PageError::InvalidResult("missing violations array".to_string()))?;

    let mut grouped = GroupedViolations::new();
    for v in violations {
        let Some(id) = v.get("id").and_then(|id| id.as_str()) else {
            continue;
        };
        let impact = Impact::from_axe(v.get("impact").and_then(|i| i.as_str()));
        let nodes = v.get("nodes").and_then(|n| n.as_array());
        let targets = nodes
            .map(|nodes| {
                nodes
                    .iter()
                    .filter_map(|n| n.get("target"))
                    .filter_map(|t| t.as_array())
                    .flat_map(|t| t.iter().filter_map(|s| s.as_str().map(String::from)))
                    .collect()
            })
            .unwrap_or_default();

        grouped.entry(impact).or_default().push(ViolationSummary {
            id: id.to_string(),
            impact,
            description: str_field(v, "description"),
            help: str_field(v, "help"),
            help_url: str_field(v, "helpUrl"),
            nodes: nodes.map(|n| n.len()).unwrap_or(0),
            targets,
        });
    }
    Ok(grouped)
}

/// Count violated rules per impact.
pub fn count_violations(grouped: &GroupedViolations) -> ImpactCounts {
    let mut counts = ImpactCounts::default();
    for (impact, list) in grouped {
        counts.add(*impact, list.len());
    }
    counts
}

fn str_field(v: &serde_json::Value, key: &str) -> String {
    v.get(key)
        .and_then(|s| s.as_str())
        .unwrap_or_default()
        .to_string()
}

fn json_kind(v: &serde_json::Value) -> &'static str {
    match v {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "boolean",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactStatus {
    Ok,
    Failed,
}

/// Run metadata stamped on every artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactMeta {
    pub run_id: String,
    pub url: String,
    pub filename: String,
    pub locale: String,
    pub mode: DeviceMode,
    pub tags: Vec<String>,
    pub screenshot: Option<String>,
    pub audited_at: DateTime<Utc>,
}

/// The JSON document persisted for one page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageArtifact {
    pub status: ArtifactStatus,
    pub meta: ArtifactMeta,
    #[serde(default)]
    pub counts: ImpactCounts,
    #[serde(default)]
    pub violations: GroupedViolations,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<PageFailure>,
    /// Raw audit payload as returned by the rule engine.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audit: Option<serde_json::Value>,
}

/// A URL paired with the base filename its artifacts are written under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageTarget {
    pub url: Url,
    pub base_name: String,
}

/// Stable filename stem: hostname plus path segments.
///
/// A hash of the full URL is appended when the query string would otherwise
/// be lost or the name had to be truncated.
pub fn derive_base_name(url: &Url) -> String {
    let mut parts: Vec<String> = Vec::new();
    let host = url.host_str().unwrap_or("unknown-host").to_ascii_lowercase();
    parts.push(match url.port() {
        Some(port) => format!("{host}_{port}"),
        None => host,
    });
    if let Some(segments) = url.path_segments() {
        parts.extend(segments.filter(|s| !s.is_empty()).map(sanitize_segment));
    }

    let mut name = parts.join("_");
    let needs_hash = url.query().is_some() || name.len() > MAX_BASE_NAME;
    if name.len() > MAX_BASE_NAME {
        let mut cut = MAX_BASE_NAME;
        while !name.is_char_boundary(cut) {
            cut -= 1;
        }
        name.truncate(cut);
    }
    if needs_hash {
        name = format!("{name}-{}", url_hash(url));
    }
    name
}

fn sanitize_segment(segment: &str) -> String {
    segment
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '.' | '_') {
                c.to_ascii_lowercase()
            } else {
                '-'
            }
        })
        .collect()
}

/// Short, stable FNV-1a hash of the full URL.
pub fn url_hash(url: &Url) -> String {
    let mut hasher = FnvHasher::default();
    hasher.write(url.as_str().as_bytes());
    format!("{:08x}", hasher.finish() as u32)
}

/// Derive base names for a run, disambiguating collisions with the URL hash.
pub fn assign_base_names(urls: Vec<Url>) -> Vec<PageTarget> {
    let mut used = HashSet::new();
    urls.into_iter()
        .map(|url| {
            let mut name = derive_base_name(&url);
            if used.contains(&name) {
                name = format!("{name}-{}", url_hash(&url));
            }
            let stem = name.clone();
            let mut n = 2;
            while used.contains(&name) {
                name = format!("{stem}-{n}");
                n += 1;
            }
            used.insert(name.clone());
            PageTarget {
                url,
                base_name: name,
            }
        })
        .collect()
}

/// Write `bytes` to `path` via a synced temp file and rename, so readers
/// never observe a partial file.
pub fn write_bytes_atomic(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let tmp = tmp_path(path);
    {
        let mut file = std::fs::File::create(&tmp)?;
        file.write_all(bytes)?;
        file.sync_all()?;
    }
    std::fs::rename(&tmp, path).inspect_err(|_| {
        let _ = std::fs::remove_file(&tmp);
    })
}

/// Pretty-print `value` as JSON and write it atomically.
pub fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<(), crate::error::PipelineError> {
    let bytes = serde_json::to_vec_pretty(value)?;
    write_bytes_atomic(path, &bytes)?;
    Ok(())
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    #[test]
    fn test_base_name_from_path() {
        assert_eq!(derive_base_name(&url("https://www.Example.com/")), "www.example.com");
        assert_eq!(
            derive_base_name(&url("https://example.com/blog/My Post/")),
            "example.com_blog_my-20post"
        );
        assert_eq!(
            derive_base_name(&url("http://localhost:8080/a/b.html")),
            "localhost_8080_a_b.html"
        );
    }

    #[test]
    fn test_base_name_hash_for_query() {
        let a = derive_base_name(&url("https://example.com/search?q=a"));
        let b = derive_base_name(&url("https://example.com/search?q=b"));
        assert!(a.starts_with("example.com_search-"));
        assert_ne!(a, b);
        // Stable across calls.
        assert_eq!(a, derive_base_name(&url("https://example.com/search?q=a")));
    }

    #[test]
    fn test_base_name_truncates_long_paths() {
        let long = format!("https://example.com/{}", "x".repeat(300));
        let name = derive_base_name(&url(&long));
        assert!(name.len() <= MAX_BASE_NAME + 9);
        assert!(name.contains('-'));
    }

    #[test]
    fn test_assign_base_names_disambiguates() {
        // Both sanitize to the same stem.
        let targets = assign_base_names(vec![
            url("https://example.com/a b"),
            url("https://example.com/a-20b"),
            url("https://example.com/other"),
        ]);
        let names: HashSet<_> = targets.iter().map(|t| t.base_name.clone()).collect();
        assert_eq!(names.len(), 3);
        assert_eq!(targets[2].base_name, "example.com_other");
    }

    #[test]
    fn test_group_violations() {
        let payload = json!({
            "violations": [
                {"id": "color-contrast", "impact": "serious", "help": "Contrast",
                 "helpUrl": "https://dequeuniversity.com/rules/axe/color-contrast",
                 "nodes": [{"target": ["#a"]}, {"target": [".b"]}]},
                {"id": "image-alt", "impact": "critical", "nodes": [{"target": ["img"]}]},
                {"id": "region", "impact": null, "nodes": []}
            ],
            "passes": []
        });
        let grouped = group_violations(&payload).unwrap();
        assert_eq!(grouped[&Impact::Serious][0].nodes, 2);
        assert_eq!(grouped[&Impact::Serious][0].targets, vec!["#a", ".b"]);
        assert_eq!(grouped[&Impact::Critical][0].id, "image-alt");
        assert_eq!(grouped[&Impact::Minor][0].id, "region");

        let counts = count_violations(&grouped);
        assert_eq!(counts.total(), 3);
        assert_eq!(counts.critical, 1);
    }

    #[test]
    fn test_group_violations_rejects_invalid() {
        assert!(matches!(
            group_violations(&json!(null)),
            Err(PageError::InvalidResult(_))
        ));
        assert!(matches!(
            group_violations(&json!({"passes": []})),
            Err(PageError::InvalidResult(_))
        ));
    }

    #[test]
    fn test_write_atomic_replaces_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/page.json");
        write_json_atomic(&path, &json!({"v": 1})).unwrap();
        write_json_atomic(&path, &json!({"v": 2})).unwrap();

        let back: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(back["v"], 2);
        assert!(!dir.path().join("nested/page.json.tmp").exists());
    }
}
