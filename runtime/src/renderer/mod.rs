//! Browser capability: load a page, capture a screenshot, run the rule engine.
//!
//! The pipeline depends only on these traits. `chromium` provides the
//! production implementation; `scripted` a canned one for tests (enabled by
//! the `testing` feature).

pub mod chromium;
#[cfg(any(test, feature = "testing"))]
pub mod scripted;

use crate::config::{ScreenshotFormat, Viewport};
use crate::error::PageError;
use anyhow::Result;
use async_trait::async_trait;

/// Per-navigation options.
#[derive(Debug, Clone, Copy)]
pub struct NavigateOptions {
    pub viewport: Viewport,
    /// Abort the load once response headers advertise more than this many bytes.
    pub max_page_bytes: Option<u64>,
}

/// Result of a completed navigation.
#[derive(Debug, Clone, Default)]
pub struct NavigationResult {
    /// URL after redirects.
    pub final_url: String,
    pub load_time_ms: u64,
}

/// Source of isolated page contexts over one shared browser.
#[async_trait]
pub trait Renderer: Send + Sync {
    /// Open a fresh page context. The caller owns it exclusively until `close`.
    async fn new_context(&self) -> Result<Box<dyn RenderContext>>;

    /// Close the browser. In-flight contexts fail promptly afterwards.
    async fn shutdown(&self) -> Result<()>;
}

/// One browser page.
#[async_trait]
pub trait RenderContext: Send + Sync {
    async fn navigate(
        &mut self,
        url: &str,
        options: &NavigateOptions,
    ) -> Result<NavigationResult, PageError>;

    /// Capture the current viewport.
    async fn screenshot(
        &mut self,
        format: ScreenshotFormat,
        quality: Option<u8>,
    ) -> Result<Vec<u8>, PageError>;

    /// Run the accessibility rule engine restricted to `tags`, reporting in `locale`.
    async fn audit(&mut self, tags: &[String], locale: &str)
        -> Result<serde_json::Value, PageError>;

    /// Release the page and any observers attached to it.
    async fn close(self: Box<Self>) -> Result<()>;
}
