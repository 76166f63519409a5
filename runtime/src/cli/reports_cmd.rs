//! `a11y-audit reports`: list completed runs from the reports index.

use crate::cli::output::{self, Styled};
use crate::config::AuditConfig;
use crate::report::index::ReportsIndex;
use anyhow::{Context, Result};
use std::path::PathBuf;

/// Print the reconciled index, newest run first.
pub fn run(output_dir: Option<PathBuf>) -> Result<()> {
    let s = Styled::new();
    let mut config = AuditConfig::from_env()?;
    if let Some(dir) = output_dir {
        config.output_root = dir;
    }

    let index = ReportsIndex::load(&config.output_root)
        .with_context(|| format!("reading index under {}", config.output_root.display()))?;

    if output::is_json() {
        output::print_json(&serde_json::to_value(index.entries())?);
        return Ok(());
    }

    if index.entries().is_empty() {
        eprintln!("  No runs recorded under {}.", config.output_root.display());
        return Ok(());
    }

    eprintln!(
        "  {}",
        s.bold(&format!(
            "{:<28} {:>6} {:>6} {:>8} {:>7}  {}",
            "RUN", "OK", "FAILED", "CRITICAL", "SERIOUS", "SITEMAP"
        ))
    );
    for entry in index.entries() {
        let failed = if entry.failed > 0 {
            s.red(&format!("{:>6}", entry.failed))
        } else {
            format!("{:>6}", entry.failed)
        };
        eprintln!(
            "  {:<28} {:>6} {} {:>8} {:>7}  {}",
            entry.run_id,
            entry.successful,
            failed,
            entry.impact_totals.critical,
            entry.impact_totals.serious,
            s.dim(&entry.settings.sitemap_url)
        );
        if output::is_verbose() {
            eprintln!("      {}", s.dim(&index.summary_path(entry).display().to_string()));
        }
    }
    Ok(())
}
