//! In-memory renderer that replays canned behaviour per URL.
//!
//! Lets the pipeline run end to end without a browser, e.g. in tests.

use super::{NavigateOptions, NavigationResult, RenderContext, Renderer};
use crate::config::ScreenshotFormat;
use crate::error::PageError;
use anyhow::{bail, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// What a scripted page does when navigated to and audited.
#[derive(Debug, Clone)]
pub enum PageScript {
    /// Load normally and return this audit payload.
    Audit(serde_json::Value),
    /// Never finish navigating.
    Hang,
    /// Fail navigation with this error.
    Fail(PageError),
    /// Advertise this `Content-Length` for the document, then audit cleanly.
    ContentLength(u64),
}

impl PageScript {
    /// A clean page with no violations.
    pub fn clean() -> Self {
        Self::Audit(serde_json::json!({ "violations": [], "passes": [] }))
    }
}

#[derive(Default)]
struct Shared {
    shut_down: AtomicBool,
    opened: AtomicUsize,
    closed: AtomicUsize,
    navigations: Mutex<Vec<String>>,
}

/// Renderer whose pages follow a per-URL script.
pub struct ScriptedRenderer {
    pages: Arc<HashMap<String, PageScript>>,
    shared: Arc<Shared>,
}

impl ScriptedRenderer {
    /// Pages not in `pages` behave as [`PageScript::clean`].
    pub fn new(pages: HashMap<String, PageScript>) -> Self {
        Self {
            pages: Arc::new(pages),
            shared: Arc::new(Shared::default()),
        }
    }

    /// Contexts opened so far.
    pub fn opened(&self) -> usize {
        self.shared.opened.load(Ordering::SeqCst)
    }

    /// Contexts closed so far.
    pub fn closed(&self) -> usize {
        self.shared.closed.load(Ordering::SeqCst)
    }

    /// URLs navigated to, in order.
    pub fn navigations(&self) -> Vec<String> {
        match self.shared.navigations.lock() {
            Ok(n) => n.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

#[async_trait]
impl Renderer for ScriptedRenderer {
    async fn new_context(&self) -> Result<Box<dyn RenderContext>> {
        if self.shared.shut_down.load(Ordering::SeqCst) {
            bail!("browser has been shut down");
        }
        self.shared.opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(ScriptedContext {
            pages: Arc::clone(&self.pages),
            shared: Arc::clone(&self.shared),
            current: None,
        }))
    }

    async fn shutdown(&self) -> Result<()> {
        self.shared.shut_down.store(true, Ordering::SeqCst);
        Ok(())
    }
}

struct ScriptedContext {
    pages: Arc<HashMap<String, PageScript>>,
    shared: Arc<Shared>,
    current: Option<PageScript>,
}

impl ScriptedContext {
    fn check_alive(&self) -> Result<(), PageError> {
        if self.shared.shut_down.load(Ordering::SeqCst) {
            return Err(PageError::Browser("target closed".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl RenderContext for ScriptedContext {
    async fn navigate(
        &mut self,
        url: &str,
        options: &NavigateOptions,
    ) -> Result<NavigationResult, PageError> {
        self.check_alive()?;
        if let Ok(mut log) = self.shared.navigations.lock() {
            log.push(url.to_string());
        }

        let script = self.pages.get(url).cloned().unwrap_or_else(PageScript::clean);
        match &script {
            PageScript::Hang => std::future::pending::<()>().await,
            PageScript::Fail(err) => return Err(err.clone()),
            PageScript::ContentLength(length) => {
                if let Some(limit) = options.max_page_bytes.filter(|limit| length > limit) {
                    return Err(PageError::PageSizeExceeded {
                        content_length: *length,
                        limit,
                    });
                }
            }
            PageScript::Audit(_) => {}
        }
        self.current = Some(script);

        Ok(NavigationResult {
            final_url: url.to_string(),
            load_time_ms: 0,
        })
    }

    async fn screenshot(
        &mut self,
        format: ScreenshotFormat,
        _quality: Option<u8>,
    ) -> Result<Vec<u8>, PageError> {
        self.check_alive()?;
        Ok(format!("scripted-{}", format.extension()).into_bytes())
    }

    async fn audit(
        &mut self,
        _tags: &[String],
        _locale: &str,
    ) -> Result<serde_json::Value, PageError> {
        self.check_alive()?;
        match &self.current {
            Some(PageScript::Audit(payload)) => Ok(payload.clone()),
            Some(_) => Ok(serde_json::json!({ "violations": [] })),
            None => Err(PageError::Browser("audit before navigation".to_string())),
        }
    }

    async fn close(self: Box<Self>) -> Result<()> {
        self.shared.closed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
