//! Page audit executor: one URL in, one `PageResult` out.
//!
//! Every failure is captured on the result and mirrored by a failure
//! artifact, so the aggregator sees each dispatched page exactly once.

use crate::audit::result::{PageFailure, PageOutcome, PageResult, PageSuccess};
use crate::cartography::scheduler::Dispatch;
use crate::config::{DeviceMode, ScreenshotOptions};
use crate::error::PageError;
use crate::pool::manager::PoolManager;
use crate::renderer::{NavigateOptions, RenderContext};
use crate::report::artifact::{
    count_violations, group_violations, write_bytes_atomic, write_json_atomic, ArtifactMeta,
    ArtifactStatus, GroupedViolations, ImpactCounts, PageArtifact, PageTarget,
};
use chrono::Utc;
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use url::Url;

/// How each page is loaded and audited.
#[derive(Debug, Clone)]
pub struct AuditOptions {
    pub tags: Vec<String>,
    pub locale: String,
    pub mode: DeviceMode,
    /// Applies separately to navigation, screenshot and audit.
    pub timeout_ms: u64,
    pub max_page_bytes: Option<u64>,
    pub screenshot: ScreenshotOptions,
}

/// Everything captured from a page before it is persisted.
struct Captured {
    screenshot: Option<Vec<u8>>,
    payload: serde_json::Value,
    grouped: GroupedViolations,
}

pub struct PageAuditor {
    pool: Arc<PoolManager>,
    options: AuditOptions,
    run_id: String,
    results_dir: PathBuf,
}

impl PageAuditor {
    pub fn new(
        pool: Arc<PoolManager>,
        options: AuditOptions,
        run_id: impl Into<String>,
        results_dir: PathBuf,
    ) -> Self {
        Self {
            pool,
            options,
            run_id: run_id.into(),
            results_dir,
        }
    }

    /// Audit one dispatched page. Never fails; errors become failure results.
    pub async fn audit(&self, dispatch: Dispatch) -> PageResult {
        let started = Instant::now();
        let target = &dispatch.target;

        let outcome = match self.audit_page(target).await {
            Ok(success) => {
                info!(
                    "[{}/{}] {} ({} violated rules)",
                    dispatch.index,
                    dispatch.total,
                    target.url,
                    success.counts.total()
                );
                PageOutcome::Success(success)
            }
            Err(err) => {
                warn!("[{}/{}] {} failed: {err}", dispatch.index, dispatch.total, target.url);
                let failure = PageFailure::from(&err);
                self.write_failure_artifact(target, &failure).await;
                PageOutcome::Failure(failure)
            }
        };

        PageResult {
            url: target.url.to_string(),
            base_name: target.base_name.clone(),
            index: dispatch.index,
            total: dispatch.total,
            duration_ms: started.elapsed().as_millis() as u64,
            outcome,
        }
    }

    async fn audit_page(&self, target: &PageTarget) -> Result<PageSuccess, PageError> {
        validate_target(&target.url)?;

        let mut handle = self.pool.acquire().await.map_err(PageError::browser)?;
        let captured = self.drive(handle.context_mut(), &target.url).await;
        if let Err(e) = handle.release().await {
            debug!("closing page for {}: {e:#}", target.url);
        }

        self.persist(target, captured?).await
    }

    async fn drive(&self, page: &mut dyn RenderContext, url: &Url) -> Result<Captured, PageError> {
        let timeout_ms = self.options.timeout_ms;
        let nav = NavigateOptions {
            viewport: self.options.mode.viewport(),
            max_page_bytes: self.options.max_page_bytes,
        };
        let loaded = timed("navigation", timeout_ms, page.navigate(url.as_str(), &nav)).await?;
        debug!("loaded {} in {}ms", loaded.final_url, loaded.load_time_ms);

        let shot = &self.options.screenshot;
        let screenshot = if shot.enabled {
            let bytes = timed(
                "screenshot",
                timeout_ms,
                page.screenshot(shot.format, Some(shot.quality)),
            )
            .await?;
            Some(bytes)
        } else {
            None
        };

        let payload = timed(
            "audit",
            timeout_ms,
            page.audit(&self.options.tags, &self.options.locale),
        )
        .await?;
        let grouped = group_violations(&payload)?;

        Ok(Captured {
            screenshot,
            payload,
            grouped,
        })
    }

    async fn persist(
        &self,
        target: &PageTarget,
        captured: Captured,
    ) -> Result<PageSuccess, PageError> {
        let shot = captured.screenshot.map(|bytes| {
            let name = format!(
                "{}.{}",
                target.base_name,
                self.options.screenshot.format.extension()
            );
            let path = self.results_dir.join(&name);
            (name, path, bytes)
        });

        let counts = count_violations(&captured.grouped);
        let artifact = PageArtifact {
            status: ArtifactStatus::Ok,
            meta: self.meta(target, shot.as_ref().map(|(name, _, _)| name.clone())),
            counts,
            violations: captured.grouped,
            error: None,
            audit: Some(captured.payload),
        };
        let path = self.artifact_path(target);
        let screenshot = shot.as_ref().map(|(_, path, _)| path.clone());

        let artifact_path = path.clone();
        off_runtime(move || {
            if let Some((_, path, bytes)) = &shot {
                write_bytes_atomic(path, bytes)
                    .map_err(|e| PageError::Storage(format!("{}: {e}", path.display())))?;
            }
            write_json_atomic(&artifact_path, &artifact)
                .map_err(|e| PageError::Storage(e.to_string()))
        })
        .await?;

        Ok(PageSuccess {
            artifact: path,
            screenshot,
            counts,
        })
    }

    async fn write_failure_artifact(&self, target: &PageTarget, failure: &PageFailure) {
        let artifact = PageArtifact {
            status: ArtifactStatus::Failed,
            meta: self.meta(target, None),
            counts: ImpactCounts::default(),
            violations: GroupedViolations::new(),
            error: Some(failure.clone()),
            audit: None,
        };
        let path = self.artifact_path(target);
        let written = off_runtime(move || {
            write_json_atomic(&path, &artifact).map_err(|e| PageError::Storage(e.to_string()))
        })
        .await;
        if let Err(e) = written {
            warn!("could not record failure for {}: {e}", target.url);
        }
    }

    fn meta(&self, target: &PageTarget, screenshot: Option<String>) -> ArtifactMeta {
        ArtifactMeta {
            run_id: self.run_id.clone(),
            url: target.url.to_string(),
            filename: format!("{}.json", target.base_name),
            locale: self.options.locale.clone(),
            mode: self.options.mode,
            tags: self.options.tags.clone(),
            screenshot,
            audited_at: Utc::now(),
        }
    }

    fn artifact_path(&self, target: &PageTarget) -> PathBuf {
        self.results_dir.join(format!("{}.json", target.base_name))
    }
}

/// Reject anything a browser should not be pointed at.
fn validate_target(url: &Url) -> Result<(), PageError> {
    let reject = |reason: &str| PageError::InvalidUrl {
        url: url.to_string(),
        reason: reason.to_string(),
    };
    if !matches!(url.scheme(), "http" | "https") {
        return Err(reject("scheme must be http or https"));
    }
    if url.host_str().map_or(true, str::is_empty) {
        return Err(reject("missing host"));
    }
    Ok(())
}

/// Run file writes on the blocking pool. Audits share one scheduler task, so
/// an fsync there would stall every page in flight.
async fn off_runtime<F>(write: F) -> Result<(), PageError>
where
    F: FnOnce() -> Result<(), PageError> + Send + 'static,
{
    tokio::task::spawn_blocking(write)
        .await
        .map_err(|e| PageError::Storage(format!("write task failed: {e}")))?
}

/// Bound `fut` by `timeout_ms`, mapping expiry to a timeout error for `operation`.
async fn timed<T, F>(operation: &str, timeout_ms: u64, fut: F) -> Result<T, PageError>
where
    F: Future<Output = Result<T, PageError>>,
{
    match tokio::time::timeout(Duration::from_millis(timeout_ms), fut).await {
        Ok(result) => result,
        Err(_) => Err(PageError::timeout(operation, timeout_ms)),
    }
}
