//! Sitemap-driven accessibility auditing.
//!
//! A run resolves a sitemap into candidate URLs, filters them through a
//! URL policy, audits each page in a headless browser under global and
//! per-host limits, and aggregates the per-page artifacts into a run
//! summary and a self-healing reports index.

pub mod acquisition;
pub mod audit;
pub mod cartography;
pub mod cli;
pub mod config;
pub mod error;
pub mod pipeline;
pub mod pool;
pub mod renderer;
pub mod report;
pub mod trust;
