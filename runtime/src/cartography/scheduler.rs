//! Domain-aware crawl scheduler.
//!
//! Runs one audit per target with a global in-flight ceiling, a per-host
//! in-flight ceiling, and a minimum spacing between dispatches to the same
//! host. Per-host state lives only for the duration of one [`CrawlScheduler::run`].

use crate::audit::result::{PageOutcome, PageResult};
use crate::cartography::rate_limiter::RateLimiter;
use crate::error::PageError;
use crate::report::artifact::PageTarget;
use futures::stream::{FuturesUnordered, StreamExt};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::time::Instant;
use tracing::debug;

/// Concurrency and politeness limits for one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerLimits {
    /// Global ceiling (`C`). 0 or 1 means sequential.
    pub concurrency: usize,
    /// Per-host ceiling (`D`).
    pub per_domain: usize,
    /// Minimum milliseconds between dispatches to one host (`T`).
    pub delay_ms: u64,
}

/// One scheduled audit, handed to the audit function.
#[derive(Debug, Clone)]
pub struct Dispatch {
    pub target: PageTarget,
    /// 1-based position in the run.
    pub index: usize,
    pub total: usize,
    pub host: String,
    pub dispatched_at: Instant,
}

pub struct CrawlScheduler {
    limits: SchedulerLimits,
}

impl CrawlScheduler {
    pub fn new(limits: SchedulerLimits) -> Self {
        Self { limits }
    }

    /// Audit every target and wait for all of them to settle.
    ///
    /// Results come back in input order. A failing audit is just a failed
    /// `PageResult`; it never stops the others.
    pub async fn run<F, Fut>(&self, targets: Vec<PageTarget>, audit: F) -> Vec<PageResult>
    where
        F: Fn(Dispatch) -> Fut,
        Fut: Future<Output = PageResult>,
    {
        let total = targets.len();
        let mut domains: HashMap<String, Arc<RateLimiter>> = HashMap::new();

        let planned: Vec<(usize, PageTarget, String, Arc<RateLimiter>)> = targets
            .into_iter()
            .enumerate()
            .map(|(i, target)| {
                let host = host_key(&target);
                let gate = domains
                    .entry(host.clone())
                    .or_insert_with(|| {
                        Arc::new(RateLimiter::new(self.limits.per_domain, self.limits.delay_ms))
                    })
                    .clone();
                (i + 1, target, host, gate)
            })
            .collect();

        debug!(
            "scheduling {total} audits across {} host(s) (C={}, D={}, T={}ms)",
            domains.len(),
            self.limits.concurrency,
            self.limits.per_domain,
            self.limits.delay_ms
        );

        if self.limits.concurrency <= 1 || total <= 1 {
            return run_sequential(planned, total, &audit).await;
        }

        let global = Arc::new(Semaphore::new(self.limits.concurrency));
        let mut in_flight: FuturesUnordered<_> = planned
            .into_iter()
            .map(|(index, target, host, gate)| {
                let global = Arc::clone(&global);
                let audit = &audit;
                async move {
                    let _slot = match gate.acquire_slot().await {
                        Ok(p) => p,
                        Err(e) => return (index, aborted(target, index, total, e)),
                    };
                    // The global permit is only taken once the host's spacing
                    // has elapsed; a sleeping host never holds a global slot.
                    let (_permit, dispatched_at) =
                        match gate.turn_with(Arc::clone(&global).acquire_owned()).await {
                            Ok(p) => p,
                            Err(e) => return (index, aborted(target, index, total, e)),
                        };
                    debug!("dispatch {index}/{total} {} ({host})", target.url);
                    let dispatch = Dispatch {
                        target,
                        index,
                        total,
                        host,
                        dispatched_at,
                    };
                    (index, audit(dispatch).await)
                }
            })
            .collect();

        let mut results: Vec<Option<PageResult>> = vec![None; total];
        while let Some((index, result)) = in_flight.next().await {
            results[index - 1] = Some(result);
        }
        results.into_iter().flatten().collect()
    }
}

async fn run_sequential<F, Fut>(
    planned: Vec<(usize, PageTarget, String, Arc<RateLimiter>)>,
    total: usize,
    audit: &F,
) -> Vec<PageResult>
where
    F: Fn(Dispatch) -> Fut,
    Fut: Future<Output = PageResult>,
{
    let mut results = Vec::with_capacity(total);
    for (index, target, host, gate) in planned {
        let guard = match gate.acquire().await {
            Ok(g) => g,
            Err(e) => {
                results.push(aborted(target, index, total, e));
                continue;
            }
        };
        let dispatch = Dispatch {
            target,
            index,
            total,
            host,
            dispatched_at: guard.dispatched_at(),
        };
        results.push(audit(dispatch).await);
    }
    results
}

fn host_key(target: &PageTarget) -> String {
    target
        .url
        .host_str()
        .unwrap_or_default()
        .to_ascii_lowercase()
}

fn aborted(target: PageTarget, index: usize, total: usize, err: impl std::fmt::Display) -> PageResult {
    let error = PageError::Browser(format!("dispatch aborted: {err}"));
    PageResult {
        url: target.url.to_string(),
        base_name: target.base_name,
        index,
        total,
        duration_ms: 0,
        outcome: PageOutcome::Failure((&error).into()),
    }
}
