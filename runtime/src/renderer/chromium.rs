//! Headless Chromium renderer over the DevTools protocol.

use super::{NavigateOptions, NavigationResult, RenderContext, Renderer};
use crate::audit::axe_loader::AxeLoader;
use crate::config::ScreenshotFormat;
use crate::error::PageError;
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::emulation::SetDeviceMetricsOverrideParams;
use chromiumoxide::cdp::browser_protocol::network::{
    EnableParams, EventResponseReceived, ResourceType,
};
use chromiumoxide::cdp::browser_protocol::page::{CaptureScreenshotFormat, StopLoadingParams};
use chromiumoxide::cdp::js_protocol::runtime::EvaluateParams;
use chromiumoxide::page::ScreenshotParams;
use chromiumoxide::Page;
use futures::StreamExt;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Find a Chromium binary: explicit path first, then the usual names on PATH.
pub fn find_chromium(explicit: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit {
        if path.exists() {
            return Some(path.to_path_buf());
        }
        warn!("configured chromium path {} does not exist", path.display());
    }

    for name in ["google-chrome", "google-chrome-stable", "chromium", "chromium-browser"] {
        if let Ok(path) = which::which(name) {
            return Some(path);
        }
    }

    if cfg!(target_os = "macos") {
        let common = PathBuf::from("/Applications/Google Chrome.app/Contents/MacOS/Google Chrome");
        if common.exists() {
            return Some(common);
        }
    }

    None
}

/// Launch options for [`ChromiumRenderer`].
#[derive(Debug, Clone)]
pub struct ChromiumOptions {
    pub executable: Option<PathBuf>,
    pub headless: bool,
    pub request_timeout: Duration,
}

/// One shared browser process handing out isolated pages.
pub struct ChromiumRenderer {
    browser: Mutex<Option<Browser>>,
    handler: JoinHandle<()>,
    axe: Arc<AxeLoader>,
}

impl ChromiumRenderer {
    pub async fn launch(options: ChromiumOptions, axe: Arc<AxeLoader>) -> Result<Self> {
        let executable = find_chromium(options.executable.as_deref())
            .context("no Chromium binary found; set A11Y_CHROMIUM_PATH")?;

        let mut builder = BrowserConfig::builder()
            .chrome_executable(&executable)
            .request_timeout(options.request_timeout)
            .arg("--disable-gpu")
            .arg("--hide-scrollbars");
        if !options.headless {
            builder = builder.with_head();
        }
        if std::env::var("A11Y_CHROMIUM_NO_SANDBOX").is_ok() {
            builder = builder.no_sandbox();
        }
        let config = builder.build().map_err(|e| anyhow!("browser config: {e}"))?;

        let (browser, mut handler) = Browser::launch(config)
            .await
            .with_context(|| format!("launching {}", executable.display()))?;

        let handler = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    debug!("browser handler stopped: {e}");
                    break;
                }
            }
        });

        info!("launched browser {}", executable.display());
        Ok(Self {
            browser: Mutex::new(Some(browser)),
            handler,
            axe,
        })
    }
}

#[async_trait]
impl Renderer for ChromiumRenderer {
    async fn new_context(&self) -> Result<Box<dyn RenderContext>> {
        let guard = self.browser.lock().await;
        let browser = guard.as_ref().context("browser has been shut down")?;
        let page = browser
            .new_page("about:blank")
            .await
            .context("opening browser page")?;
        Ok(Box::new(ChromiumContext {
            page,
            axe: Arc::clone(&self.axe),
            observer: None,
        }))
    }

    async fn shutdown(&self) -> Result<()> {
        let Some(mut browser) = self.browser.lock().await.take() else {
            return Ok(());
        };
        let closed = browser.close().await;
        let _ = browser.wait().await;
        self.handler.abort();
        closed.context("closing browser")?;
        info!("browser closed");
        Ok(())
    }
}

/// A single page plus the optional response-size observer attached to it.
struct ChromiumContext {
    page: Page,
    axe: Arc<AxeLoader>,
    observer: Option<JoinHandle<()>>,
}

impl ChromiumContext {
    /// Watch document responses and stop loading once one advertises more
    /// than `limit` bytes. The offending length is sent on the returned channel.
    async fn watch_page_size(&mut self, limit: u64) -> Result<oneshot::Receiver<u64>, PageError> {
        self.page
            .execute(EnableParams::default())
            .await
            .map_err(PageError::browser)?;
        let mut events = self
            .page
            .event_listener::<EventResponseReceived>()
            .await
            .map_err(PageError::browser)?;

        let (exceeded, oversize) = oneshot::channel();
        let page = self.page.clone();
        self.observer = Some(tokio::spawn(async move {
            while let Some(event) = events.next().await {
                if event.r#type != ResourceType::Document {
                    continue;
                }
                let Some(length) = content_length(event.response.headers.inner()) else {
                    continue;
                };
                if length > limit {
                    warn!("aborting {}: content-length {length} > {limit}", event.response.url);
                    let _ = exceeded.send(length);
                    let _ = page.execute(StopLoadingParams::default()).await;
                    break;
                }
            }
        }));
        Ok(oversize)
    }
}

/// Drive a navigation until it settles or the size observer reports an
/// oversized document, whichever happens first. A stopped load may never
/// finish, so the report wins without waiting on `nav`.
async fn race_page_size<E: std::fmt::Display>(
    nav: impl Future<Output = Result<(), E>>,
    watch: Option<(u64, oneshot::Receiver<u64>)>,
) -> Result<(), PageError> {
    let Some((limit, mut oversize)) = watch else {
        return nav.await.map_err(PageError::browser);
    };
    let exceeded = |content_length| PageError::PageSizeExceeded {
        content_length,
        limit,
    };

    tokio::pin!(nav);
    let settled = tokio::select! {
        biased;
        Ok(length) = &mut oversize => return Err(exceeded(length)),
        result = &mut nav => result,
    };
    if let Ok(length) = oversize.try_recv() {
        return Err(exceeded(length));
    }
    settled.map_err(PageError::browser)
}

/// Case-insensitive `Content-Length` lookup in a CDP header object.
fn content_length(headers: &serde_json::Value) -> Option<u64> {
    let (_, value) = headers
        .as_object()?
        .iter()
        .find(|(name, _)| name.eq_ignore_ascii_case("content-length"))?;
    match value {
        serde_json::Value::String(s) => s.trim().parse().ok(),
        serde_json::Value::Number(n) => n.as_u64(),
        _ => None,
    }
}

#[async_trait]
impl RenderContext for ChromiumContext {
    async fn navigate(
        &mut self,
        url: &str,
        options: &NavigateOptions,
    ) -> Result<NavigationResult, PageError> {
        let start = Instant::now();
        let vp = options.viewport;
        self.page
            .execute(SetDeviceMetricsOverrideParams::new(
                i64::from(vp.width),
                i64::from(vp.height),
                vp.scale,
                vp.mobile,
            ))
            .await
            .map_err(PageError::browser)?;

        let watch = match options.max_page_bytes {
            Some(limit) => Some((limit, self.watch_page_size(limit).await?)),
            None => None,
        };

        let page = self.page.clone();
        race_page_size(async move { page.goto(url).await.map(|_| ()) }, watch).await?;

        let final_url = self
            .page
            .url()
            .await
            .ok()
            .flatten()
            .unwrap_or_else(|| url.to_string());

        Ok(NavigationResult {
            final_url,
            load_time_ms: start.elapsed().as_millis() as u64,
        })
    }

    async fn screenshot(
        &mut self,
        format: ScreenshotFormat,
        quality: Option<u8>,
    ) -> Result<Vec<u8>, PageError> {
        let cdp_format = match format {
            ScreenshotFormat::Png => CaptureScreenshotFormat::Png,
            ScreenshotFormat::Jpeg => CaptureScreenshotFormat::Jpeg,
            ScreenshotFormat::Webp => CaptureScreenshotFormat::Webp,
        };
        let mut params = ScreenshotParams::builder()
            .format(cdp_format)
            .full_page(false);
        if let Some(q) = quality.filter(|_| format != ScreenshotFormat::Png) {
            params = params.quality(i64::from(q));
        }
        self.page
            .screenshot(params.build())
            .await
            .map_err(PageError::browser)
    }

    async fn audit(
        &mut self,
        tags: &[String],
        locale: &str,
    ) -> Result<serde_json::Value, PageError> {
        let inject = EvaluateParams::builder()
            .expression(self.axe.script())
            .return_by_value(false)
            .build()
            .map_err(PageError::Browser)?;
        self.page
            .evaluate_expression(inject)
            .await
            .map_err(|e| PageError::Browser(format!("injecting axe-core: {e}")))?;

        let run = EvaluateParams::builder()
            .expression(self.axe.run_script(tags, locale))
            .await_promise(true)
            .return_by_value(true)
            .build()
            .map_err(PageError::Browser)?;

        let result = self
            .page
            .evaluate_expression(run)
            .await
            .map_err(PageError::browser)?;

        result
            .into_value::<serde_json::Value>()
            .map_err(|e| PageError::InvalidResult(e.to_string()))
    }

    async fn close(self: Box<Self>) -> Result<()> {
        let this = *self;
        if let Some(observer) = this.observer {
            observer.abort();
        }
        this.page.close().await.context("closing page")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_content_length_lookup() {
        assert_eq!(content_length(&json!({"Content-Length": "2048"})), Some(2048));
        assert_eq!(content_length(&json!({"content-length": 10})), Some(10));
        assert_eq!(content_length(&json!({"content-type": "text/html"})), None);
        assert_eq!(content_length(&json!({"content-length": "lots"})), None);
        assert_eq!(content_length(&json!(null)), None);
    }

    #[tokio::test]
    async fn test_oversize_report_beats_stalled_load() {
        let (tx, rx) = oneshot::channel();
        tx.send(4096).unwrap();
        let stalled = std::future::pending::<Result<(), String>>();
        let raced = race_page_size(stalled, Some((1024, rx)));
        let err = tokio::time::timeout(Duration::from_secs(5), raced)
            .await
            .expect("size report must not wait for the load")
            .unwrap_err();
        assert!(matches!(
            err,
            PageError::PageSizeExceeded {
                content_length: 4096,
                limit: 1024
            }
        ));
    }

    #[tokio::test]
    async fn test_load_completes_when_observer_stays_quiet() {
        let (tx, rx) = oneshot::channel::<u64>();
        drop(tx);
        let ok = race_page_size(async { Ok::<_, String>(()) }, Some((1024, rx))).await;
        assert!(ok.is_ok());

        let failed = race_page_size(async { Err::<(), _>("net::ERR_FAILED") }, None).await;
        assert!(matches!(failed, Err(PageError::Browser(_))));
    }

    #[test]
    fn test_find_chromium_ignores_missing_explicit() {
        // Falls through to PATH lookup; must not return the bogus path.
        let found = find_chromium(Some(Path::new("/definitely/not/chrome")));
        assert_ne!(found, Some(PathBuf::from("/definitely/not/chrome")));
    }
}
