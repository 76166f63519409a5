//! Pool manager for browser page contexts.
//!
//! Hands out page contexts from the shared renderer and caps how many are
//! open at once.

use crate::renderer::{RenderContext, Renderer};
use anyhow::Result;
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Handle to a borrowed page context. Owned by exactly one audit.
pub struct ContextHandle {
    context: Box<dyn RenderContext>,
    _permit: OwnedSemaphorePermit,
}

impl ContextHandle {
    /// Get a mutable reference to the render context.
    pub fn context_mut(&mut self) -> &mut dyn RenderContext {
        self.context.as_mut()
    }

    /// Close the page. The pool slot is freed even if closing fails.
    pub async fn release(self) -> Result<()> {
        self.context.close().await
    }
}

/// Manages page contexts with a concurrency limit.
pub struct PoolManager {
    renderer: Arc<dyn Renderer>,
    semaphore: Arc<Semaphore>,
}

impl PoolManager {
    pub fn new(renderer: Arc<dyn Renderer>, max_contexts: usize) -> Self {
        Self {
            renderer,
            semaphore: Arc::new(Semaphore::new(max_contexts.max(1))),
        }
    }

    /// Acquire a page context from the pool.
    ///
    /// Blocks if the maximum number of concurrent contexts is reached.
    pub async fn acquire(&self) -> Result<ContextHandle> {
        let permit = Arc::clone(&self.semaphore)
            .acquire_owned()
            .await
            .map_err(|e| anyhow::anyhow!("semaphore closed: {}", e))?;

        let context = self.renderer.new_context().await?;
        Ok(ContextHandle {
            context,
            _permit: permit,
        })
    }
}
