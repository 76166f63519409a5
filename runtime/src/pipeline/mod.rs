//! End-to-end run: resolve, filter, schedule audits, aggregate.

pub mod run;

pub use run::Run;

use crate::acquisition::http_client::HttpClient;
use crate::audit::executor::{AuditOptions, PageAuditor};
use crate::audit::logger::RunLogger;
use crate::audit::result::{PageResult, RunTally};
use crate::cartography::scheduler::{CrawlScheduler, SchedulerLimits};
use crate::cartography::sitemap::resolve_sitemap;
use crate::config::{AuditConfig, Settings};
use crate::pool::manager::PoolManager;
use crate::renderer::Renderer;
use crate::report::artifact::assign_base_names;
use crate::report::index::{IndexEntry, ReportsIndex};
use crate::report::summary::{summarize_run, write_summary};
use crate::trust::url_policy::UrlPolicy;
use anyhow::{Context, Result};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tracing::{info, warn};

/// Observer for run progress, e.g. a terminal progress bar.
pub trait ProgressSink: Send + Sync {
    /// Called once the candidate set is final.
    fn planned(&self, _total: usize) {}
    fn page_done(&self, _result: &PageResult) {}
    fn finished(&self, _report: &RunReport) {}
}

/// Progress sink that ignores everything.
pub struct NoProgress;

impl ProgressSink for NoProgress {}

/// What a finished run reports back to its caller.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: String,
    pub run_dir: PathBuf,
    pub summary_path: PathBuf,
    pub successful: usize,
    pub failed: usize,
    /// Candidates rejected by the URL policy.
    pub blocked: usize,
    /// Artifacts the aggregator could not read.
    pub unreadable: usize,
}

/// Execute one run with `settings`, read fresh by the caller.
///
/// Only run-level problems (invalid settings, unreachable root sitemap,
/// unwritable output) are errors. Page failures are counted in the report.
pub async fn run_pipeline(
    settings: Settings,
    config: &AuditConfig,
    renderer: Arc<dyn Renderer>,
    http: &HttpClient,
    progress: &dyn ProgressSink,
) -> Result<RunReport> {
    settings.validate()?;
    config.validate()?;

    let candidates = resolve_sitemap(http, &settings.sitemap_url, settings.max_pages)
        .await
        .with_context(|| format!("resolving {}", settings.sitemap_url))?;

    let policy = UrlPolicy::new(&config.allow_domains, &config.block_domains);
    let (allowed, rejected) = policy.partition(candidates);
    for (url, reason) in &rejected {
        warn!("skipping {url}: {reason}");
    }

    let run = Run::create(&config.output_root, settings.clone())
        .with_context(|| format!("creating run under {}", config.output_root.display()))?;
    info!(
        "run {}: {} page(s) to audit, {} rejected",
        run.id,
        allowed.len(),
        rejected.len()
    );

    let logger = Mutex::new(RunLogger::open(&run.events_path())?);
    log_event(&logger, |l| {
        l.log_milestone("started", Some(&settings.sitemap_url), "ok", None)
    });
    for (url, reason) in &rejected {
        let reason = reason.to_string();
        log_event(&logger, |l| {
            l.log_milestone("rejected", Some(url.as_str()), "blocked", Some(&reason))
        });
    }

    let targets = assign_base_names(allowed);
    progress.planned(targets.len());

    let pool = Arc::new(PoolManager::new(renderer, config.concurrency.max(1)));
    let auditor = PageAuditor::new(
        Arc::clone(&pool),
        AuditOptions {
            tags: settings.tags.clone(),
            locale: config.locale.clone(),
            mode: settings.mode,
            timeout_ms: config.navigation_timeout_ms,
            max_page_bytes: config.max_page_bytes,
            screenshot: config.screenshot.clone(),
        },
        run.id.clone(),
        run.results_dir(),
    );
    let scheduler = CrawlScheduler::new(SchedulerLimits {
        concurrency: config.concurrency,
        per_domain: config.per_domain_concurrency,
        delay_ms: config.per_domain_delay_ms,
    });

    let results = scheduler
        .run(targets, |dispatch| {
            let auditor = &auditor;
            let logger = &logger;
            async move {
                let result = auditor.audit(dispatch).await;
                log_event(logger, |l| l.log_page(&result));
                progress.page_done(&result);
                result
            }
        })
        .await;
    let tally = RunTally::from_results(&results);

    let summary = summarize_run(&run).context("summarizing run")?;
    let summary_path = write_summary(&run, &summary).context("writing summary")?;
    let mut index = ReportsIndex::load(&config.output_root)?;
    index
        .upsert(IndexEntry::from_summary(&config.output_root, &run, &summary))
        .context("updating reports index")?;

    let detail = format!("{} ok, {} failed", tally.successful, tally.failed);
    log_event(&logger, |l| l.log_milestone("finished", None, "ok", Some(&detail)));
    info!("run {} finished: {detail}", run.id);

    let report = RunReport {
        run_id: run.id.clone(),
        run_dir: run.dir.clone(),
        summary_path,
        successful: tally.successful,
        failed: tally.failed,
        blocked: rejected.len(),
        unreadable: summary.unreadable,
    };
    progress.finished(&report);
    Ok(report)
}

/// The run log is best-effort; a write failure never fails the run.
fn log_event<F>(logger: &Mutex<RunLogger>, write: F)
where
    F: FnOnce(&mut RunLogger) -> Result<()>,
{
    let mut guard = match logger.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    };
    if let Err(e) = write(&mut guard) {
        warn!("run log write failed: {e:#}");
    }
}
