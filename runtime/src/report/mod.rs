//! Run outputs: per-page artifacts, the run summary, and the reports index.

pub mod artifact;
pub mod index;
pub mod summary;
