//! Cartography: sitemap resolution and polite, domain-aware scheduling.

pub mod rate_limiter;
pub mod scheduler;
pub mod sitemap;
