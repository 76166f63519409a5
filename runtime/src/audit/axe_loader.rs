//! Locate the axe-core bundle and build the scripts injected into pages.

use anyhow::{bail, Context, Result};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{info, warn};

const AXE_FILE: &str = "axe.min.js";

/// Locale that needs no `axe.configure` call.
const BUILTIN_LOCALE: &str = "en";

/// The axe-core source plus lazily loaded locale packs.
pub struct AxeLoader {
    script: String,
    source: PathBuf,
    locales: Mutex<HashMap<String, Option<String>>>,
}

impl AxeLoader {
    /// Find `axe.min.js`, preferring an explicit path.
    pub fn new(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::from_file(path);
        }

        let mut search_paths = vec![
            crate::config::audit_home().join("axe"),
            PathBuf::from("axe"),
            PathBuf::from("node_modules/axe-core"),
            PathBuf::from("../node_modules/axe-core"),
        ];
        if let Ok(exe) = std::env::current_exe() {
            if let Some(exe_dir) = exe.parent() {
                search_paths.insert(0, exe_dir.join("axe"));
            }
        }

        for base in &search_paths {
            let path = base.join(AXE_FILE);
            if path.exists() {
                return Self::from_file(&path);
            }
        }

        bail!(
            "{AXE_FILE} not found (searched {}); set A11Y_AXE_PATH",
            search_paths
                .iter()
                .map(|p| p.display().to_string())
                .collect::<Vec<_>>()
                .join(", ")
        )
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let script = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        info!("loaded axe-core from {}", path.display());
        Ok(Self::from_source(script, path.to_path_buf()))
    }

    pub fn from_source(script: String, source: PathBuf) -> Self {
        Self {
            script,
            source,
            locales: Mutex::new(HashMap::new()),
        }
    }

    /// The axe-core bundle to evaluate in the page.
    pub fn script(&self) -> &str {
        &self.script
    }

    /// Locale pack JSON from `locales/<locale>.json` beside the bundle, if any.
    fn locale_pack(&self, locale: &str) -> Option<String> {
        if locale == BUILTIN_LOCALE {
            return None;
        }
        let mut cache = match self.locales.lock() {
            Ok(cache) => cache,
            Err(poisoned) => poisoned.into_inner(),
        };
        cache
            .entry(locale.to_string())
            .or_insert_with(|| {
                let dir = self.source.parent().unwrap_or_else(|| Path::new("."));
                let path = dir.join("locales").join(format!("{locale}.json"));
                match std::fs::read_to_string(&path) {
                    Ok(pack) => Some(pack),
                    Err(_) => {
                        warn!("no axe locale pack at {}, reporting in English", path.display());
                        None
                    }
                }
            })
            .clone()
    }

    /// Script that runs axe restricted to `tags` and resolves to the result object.
    ///
    /// Resolves to `null` when axe is missing from the page.
    pub fn run_script(&self, tags: &[String], locale: &str) -> String {
        let tags_json = serde_json::to_string(tags).unwrap_or_else(|_| "[]".to_string());
        let configure = self
            .locale_pack(locale)
            .map(|pack| format!("axe.configure({{ locale: {pack} }});"))
            .unwrap_or_default();
        let run_only = if tags.is_empty() {
            String::new()
        } else {
            format!("runOnly: {{ type: 'tag', values: {tags_json} }},")
        };

        format!(
            r#"
            (async function() {{
                if (typeof axe === 'undefined') return null;
                {configure}
                const results = await axe.run(document, {{
                    {run_only}
                    resultTypes: ['violations']
                }});
                return JSON.parse(JSON.stringify(results));
            }})()
            "#
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_script_embeds_tags() {
        let loader = AxeLoader::from_source("/* axe */".into(), PathBuf::from("axe.min.js"));
        let script = loader.run_script(&["wcag2a".into(), "best-practice".into()], "en");
        assert!(script.contains(r#"values: ["wcag2a","best-practice"]"#));
        assert!(!script.contains("axe.configure"));
    }

    #[test]
    fn test_locale_pack_loaded_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let axe = dir.path().join(AXE_FILE);
        std::fs::write(&axe, "var axe = {};").unwrap();
        std::fs::create_dir_all(dir.path().join("locales")).unwrap();
        std::fs::write(dir.path().join("locales/de.json"), r#"{"lang":"de"}"#).unwrap();

        let loader = AxeLoader::new(Some(&axe)).unwrap();
        assert_eq!(loader.script(), "var axe = {};");
        assert!(loader
            .run_script(&[], "de")
            .contains(r#"axe.configure({ locale: {"lang":"de"} });"#));
        // Missing pack falls back to the built-in locale.
        assert!(!loader.run_script(&[], "fr").contains("axe.configure"));
    }

    #[test]
    fn test_missing_explicit_path_errors() {
        assert!(AxeLoader::new(Some(Path::new("/nonexistent/axe.min.js"))).is_err());
    }
}
