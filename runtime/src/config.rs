//! Settings and pipeline tuning.
//!
//! `Settings` is the externally-owned document describing *what* to audit;
//! it is read fresh at the start of every run. `AuditConfig` describes *how*
//! to audit: defaults, then `A11Y_*` environment variables, then CLI flags.

use crate::error::PipelineError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Rule tags used when the settings document names none.
pub const DEFAULT_TAGS: &[&str] = &["wcag2a", "wcag2aa"];

/// Device emulation used while auditing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceMode {
    #[default]
    Desktop,
    Mobile,
}

impl DeviceMode {
    /// Viewport emulated for this mode.
    pub fn viewport(self) -> Viewport {
        match self {
            Self::Desktop => Viewport {
                width: 1920,
                height: 1080,
                scale: 1.0,
                mobile: false,
            },
            Self::Mobile => Viewport {
                width: 390,
                height: 844,
                scale: 3.0,
                mobile: true,
            },
        }
    }
}

/// Fixed viewport applied to every page of a run.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
    pub scale: f64,
    pub mobile: bool,
}

/// How often the outer scheduler should trigger a run. Recorded, not acted on.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Frequency {
    Manual,
    Hourly,
    #[default]
    Daily,
    Weekly,
    Monthly,
}

/// The settings document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    pub sitemap_url: String,
    #[serde(default = "default_tags")]
    pub tags: Vec<String>,
    #[serde(default)]
    pub mode: DeviceMode,
    #[serde(default = "default_max_pages")]
    pub max_pages: usize,
    #[serde(default)]
    pub frequency: Frequency,
}

fn default_tags() -> Vec<String> {
    DEFAULT_TAGS.iter().map(|t| t.to_string()).collect()
}

fn default_max_pages() -> usize {
    50
}

impl Settings {
    /// Read and validate the settings file.
    pub fn load(path: &Path) -> Result<Self, PipelineError> {
        let raw = std::fs::read_to_string(path)?;
        let settings: Settings = serde_json::from_str(&raw)
            .map_err(|e| PipelineError::parse(path.display().to_string(), e))?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), PipelineError> {
        let url = url::Url::parse(&self.sitemap_url)
            .map_err(|e| PipelineError::validation("sitemap_url", e))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(PipelineError::validation(
                "sitemap_url",
                format!("unsupported scheme '{}'", url.scheme()),
            ));
        }
        if self.tags.iter().any(|t| t.trim().is_empty()) {
            return Err(PipelineError::validation("tags", "empty tag"));
        }
        Ok(())
    }
}

/// Image format for page screenshots.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScreenshotFormat {
    Png,
    #[default]
    Jpeg,
    Webp,
}

impl ScreenshotFormat {
    pub fn extension(self) -> &'static str {
        match self {
            Self::Png => "png",
            Self::Jpeg => "jpg",
            Self::Webp => "webp",
        }
    }
}

impl FromStr for ScreenshotFormat {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "png" => Ok(Self::Png),
            "jpeg" | "jpg" => Ok(Self::Jpeg),
            "webp" => Ok(Self::Webp),
            other => Err(PipelineError::validation(
                "screenshot format",
                format!("unknown format '{other}'"),
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScreenshotOptions {
    pub enabled: bool,
    pub format: ScreenshotFormat,
    /// JPEG/WebP quality, 0-100. Ignored for PNG.
    pub quality: u8,
}

impl Default for ScreenshotOptions {
    fn default() -> Self {
        Self {
            enabled: true,
            format: ScreenshotFormat::Jpeg,
            quality: 80,
        }
    }
}

/// Pipeline tuning.
#[derive(Debug, Clone, PartialEq)]
pub struct AuditConfig {
    /// Global ceiling on in-flight audits.
    pub concurrency: usize,
    /// Ceiling on in-flight audits per hostname.
    pub per_domain_concurrency: usize,
    /// Minimum milliseconds between dispatches to one hostname.
    pub per_domain_delay_ms: u64,
    /// Time box for navigation and for the audit itself.
    pub navigation_timeout_ms: u64,
    /// Abort loads whose `Content-Length` exceeds this many bytes.
    pub max_page_bytes: Option<u64>,
    pub screenshot: ScreenshotOptions,
    pub locale: String,
    pub allow_domains: Vec<String>,
    pub block_domains: Vec<String>,
    /// Root that holds `runs/` and `reports-index.json`.
    pub output_root: PathBuf,
    /// Explicit axe-core script location.
    pub axe_path: Option<PathBuf>,
    pub chromium_path: Option<PathBuf>,
    pub headless: bool,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            concurrency: 4,
            per_domain_concurrency: 2,
            per_domain_delay_ms: 250,
            navigation_timeout_ms: 30_000,
            max_page_bytes: Some(10 * 1024 * 1024),
            screenshot: ScreenshotOptions::default(),
            locale: "en".to_string(),
            allow_domains: Vec::new(),
            block_domains: Vec::new(),
            output_root: default_output_root(),
            axe_path: None,
            chromium_path: None,
            headless: true,
        }
    }
}

/// Home directory for run artifacts (`$A11Y_HOME` or `~/.a11y-audit`).
pub fn audit_home() -> PathBuf {
    if let Ok(p) = std::env::var("A11Y_HOME") {
        return PathBuf::from(p);
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("/tmp"))
        .join(".a11y-audit")
}

fn default_output_root() -> PathBuf {
    audit_home().join("reports")
}

impl AuditConfig {
    /// Defaults overlaid with `A11Y_*` environment variables.
    pub fn from_env() -> Result<Self, PipelineError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`AuditConfig::from_env`] with an injectable variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, PipelineError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(v) = parse_var(&lookup, "A11Y_CONCURRENCY")? {
            config.concurrency = v;
        }
        if let Some(v) = parse_var(&lookup, "A11Y_PER_DOMAIN_CONCURRENCY")? {
            config.per_domain_concurrency = v;
        }
        if let Some(v) = parse_var(&lookup, "A11Y_PER_DOMAIN_DELAY_MS")? {
            config.per_domain_delay_ms = v;
        }
        if let Some(v) = parse_var(&lookup, "A11Y_NAVIGATION_TIMEOUT_MS")? {
            config.navigation_timeout_ms = v;
        }
        if let Some(v) = parse_var::<u64, _>(&lookup, "A11Y_MAX_PAGE_BYTES")? {
            // 0 disables the size guard.
            config.max_page_bytes = (v > 0).then_some(v);
        }
        if let Some(v) = parse_var(&lookup, "A11Y_SCREENSHOTS")? {
            config.screenshot.enabled = v;
        }
        if let Some(v) = lookup("A11Y_SCREENSHOT_FORMAT") {
            config.screenshot.format = v.parse()?;
        }
        if let Some(v) = parse_var(&lookup, "A11Y_SCREENSHOT_QUALITY")? {
            config.screenshot.quality = v;
        }
        if let Some(v) = lookup("A11Y_LOCALE") {
            config.locale = v;
        }
        if let Some(v) = lookup("A11Y_ALLOW_DOMAINS") {
            config.allow_domains = split_list(&v);
        }
        if let Some(v) = lookup("A11Y_BLOCK_DOMAINS") {
            config.block_domains = split_list(&v);
        }
        if let Some(v) = lookup("A11Y_OUTPUT_DIR") {
            config.output_root = PathBuf::from(v);
        }
        if let Some(v) = lookup("A11Y_AXE_PATH") {
            config.axe_path = Some(PathBuf::from(v));
        }
        if let Some(v) = lookup("A11Y_CHROMIUM_PATH") {
            config.chromium_path = Some(PathBuf::from(v));
        }
        if let Some(v) = parse_var(&lookup, "A11Y_HEADLESS")? {
            config.headless = v;
        }

        Ok(config)
    }

    pub fn validate(&self) -> Result<(), PipelineError> {
        if self.per_domain_concurrency == 0 {
            return Err(PipelineError::validation(
                "per_domain_concurrency",
                "must be at least 1",
            ));
        }
        if self.navigation_timeout_ms == 0 {
            return Err(PipelineError::validation(
                "navigation_timeout_ms",
                "must be greater than 0",
            ));
        }
        if self.screenshot.quality > 100 {
            return Err(PipelineError::validation(
                "screenshot quality",
                "must be between 0 and 100",
            ));
        }
        if self.locale.trim().is_empty() {
            return Err(PipelineError::validation("locale", "must not be empty"));
        }
        Ok(())
    }
}

fn parse_var<T, F>(lookup: &F, key: &str) -> Result<Option<T>, PipelineError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e| PipelineError::validation(key, e)),
        None => Ok(None),
    }
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}
