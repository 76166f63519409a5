//! Page auditing: rule-engine loading, per-page execution, results and the run log.

pub mod axe_loader;
pub mod executor;
pub mod logger;
pub mod result;
