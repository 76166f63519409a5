//! CLI subcommand implementations for the a11y-audit binary.

pub mod output;
pub mod progress;
pub mod reports_cmd;
pub mod resolve_cmd;
pub mod run_cmd;
