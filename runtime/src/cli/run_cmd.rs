//! `a11y-audit run --settings FILE`: execute one audit run.

use crate::acquisition::http_client::HttpClient;
use crate::audit::axe_loader::AxeLoader;
use crate::cli::output::{self, Styled};
use crate::cli::progress::BarProgress;
use crate::config::{AuditConfig, ScreenshotFormat, Settings};
use crate::pipeline::{run_pipeline, RunReport};
use crate::renderer::chromium::{ChromiumOptions, ChromiumRenderer};
use crate::renderer::Renderer;
use anyhow::{Context, Result};
use clap::Args;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Flags that override `A11Y_*` environment settings for one run.
#[derive(Debug, Clone, Default, Args)]
pub struct RunArgs {
    /// Settings document (JSON) describing what to audit.
    #[arg(long, short)]
    pub settings: PathBuf,

    /// Global ceiling on concurrent page audits.
    #[arg(long)]
    pub concurrency: Option<usize>,

    /// Ceiling on concurrent audits per hostname.
    #[arg(long)]
    pub per_domain: Option<usize>,

    /// Minimum milliseconds between requests to one hostname.
    #[arg(long)]
    pub delay_ms: Option<u64>,

    /// Navigation and audit timeout in milliseconds.
    #[arg(long)]
    pub timeout_ms: Option<u64>,

    /// Abort pages whose Content-Length exceeds this many bytes (0 disables).
    #[arg(long)]
    pub max_page_bytes: Option<u64>,

    #[arg(long)]
    pub no_screenshots: bool,

    /// png, jpeg or webp.
    #[arg(long)]
    pub screenshot_format: Option<ScreenshotFormat>,

    /// Locale for rule messages.
    #[arg(long)]
    pub locale: Option<String>,

    /// Only audit these domains (repeatable).
    #[arg(long = "allow")]
    pub allow: Vec<String>,

    /// Never audit these domains or CIDR ranges (repeatable).
    #[arg(long = "block")]
    pub block: Vec<String>,

    /// Where runs and the reports index are written.
    #[arg(long)]
    pub output_dir: Option<PathBuf>,

    #[arg(long)]
    pub axe_path: Option<PathBuf>,

    #[arg(long)]
    pub chromium_path: Option<PathBuf>,

    /// Show the browser window.
    #[arg(long)]
    pub headed: bool,
}

impl RunArgs {
    /// Layer these flags over `config`.
    pub fn apply(&self, config: &mut AuditConfig) {
        if let Some(v) = self.concurrency {
            config.concurrency = v;
        }
        if let Some(v) = self.per_domain {
            config.per_domain_concurrency = v;
        }
        if let Some(v) = self.delay_ms {
            config.per_domain_delay_ms = v;
        }
        if let Some(v) = self.timeout_ms {
            config.navigation_timeout_ms = v;
        }
        if let Some(v) = self.max_page_bytes {
            config.max_page_bytes = (v > 0).then_some(v);
        }
        if self.no_screenshots {
            config.screenshot.enabled = false;
        }
        if let Some(v) = self.screenshot_format {
            config.screenshot.format = v;
        }
        if let Some(v) = &self.locale {
            config.locale = v.clone();
        }
        if !self.allow.is_empty() {
            config.allow_domains = self.allow.clone();
        }
        if !self.block.is_empty() {
            config.block_domains = self.block.clone();
        }
        if let Some(v) = &self.output_dir {
            config.output_root = v.clone();
        }
        if let Some(v) = &self.axe_path {
            config.axe_path = Some(v.clone());
        }
        if let Some(v) = &self.chromium_path {
            config.chromium_path = Some(v.clone());
        }
        if self.headed {
            config.headless = false;
        }
    }
}

/// Run the audit command.
pub async fn run(args: RunArgs) -> Result<()> {
    let s = Styled::new();
    let start = Instant::now();

    let settings = Settings::load(&args.settings)
        .with_context(|| format!("loading settings from {}", args.settings.display()))?;
    let mut config = AuditConfig::from_env()?;
    args.apply(&mut config);
    config.validate()?;

    let axe = Arc::new(AxeLoader::new(config.axe_path.as_deref())?);
    let renderer: Arc<dyn Renderer> = Arc::new(
        ChromiumRenderer::launch(
            ChromiumOptions {
                executable: config.chromium_path.clone(),
                headless: config.headless,
                request_timeout: Duration::from_millis(config.navigation_timeout_ms),
            },
            axe,
        )
        .await?,
    );
    let http = HttpClient::new()?;

    let interactive = !output::is_quiet() && !output::is_json();
    if interactive {
        output::print_header(&s);
    }
    let progress = if interactive {
        BarProgress::new()
    } else {
        BarProgress::hidden()
    };

    // First Ctrl-C closes the browser; in-flight pages then fail fast and the
    // run still aggregates what it has. A second one exits immediately.
    let interrupt = {
        let renderer = Arc::clone(&renderer);
        tokio::spawn(async move {
            let mut signals = 0;
            while tokio::signal::ctrl_c().await.is_ok() {
                signals += 1;
                if interrupt_action(signals) == InterruptAction::Exit {
                    warn!("interrupted again, exiting");
                    std::process::exit(INTERRUPTED_EXIT_CODE);
                }
                warn!("interrupted, closing browser (press Ctrl-C again to quit)");
                if let Err(e) = renderer.shutdown().await {
                    warn!("closing browser: {e:#}");
                }
            }
        })
    };

    let outcome = run_pipeline(settings, &config, Arc::clone(&renderer), &http, &progress).await;
    interrupt.abort();
    if let Err(e) = renderer.shutdown().await {
        debug!("browser shutdown: {e:#}");
    }

    let report = match outcome {
        Ok(report) => report,
        Err(e) => {
            progress.clear();
            return Err(e);
        }
    };

    if output::is_json() {
        output::print_json(&serde_json::to_value(&report)?);
        return Ok(());
    }
    if !output::is_quiet() {
        print_report(&s, &report, start.elapsed());
    }
    Ok(())
}

/// Conventional exit status for a process killed by SIGINT.
const INTERRUPTED_EXIT_CODE: i32 = 130;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum InterruptAction {
    /// Stop the browser and let the run aggregate.
    Drain,
    Exit,
}

fn interrupt_action(signals: usize) -> InterruptAction {
    if signals > 1 {
        InterruptAction::Exit
    } else {
        InterruptAction::Drain
    }
}

fn print_report(s: &Styled, report: &RunReport, elapsed: Duration) {
    eprintln!();
    eprintln!(
        "  Run {} finished in {}",
        s.bold(&report.run_id),
        output::format_duration_ms(elapsed.as_millis() as u64)
    );
    output::print_check(s.ok_sym(), "Audited", &report.successful.to_string());
    let failed_sym = if report.failed > 0 { s.fail_sym() } else { s.ok_sym() };
    output::print_check(failed_sym, "Failed", &report.failed.to_string());
    if report.blocked > 0 {
        output::print_check(s.warn_sym(), "Blocked", &report.blocked.to_string());
    }
    if report.unreadable > 0 {
        output::print_check(s.warn_sym(), "Unreadable", &report.unreadable.to_string());
    }
    eprintln!();
    eprintln!("  Summary: {}", s.dim(&report.summary_path.display().to_string()));
}
