//! `a11y-audit resolve <SITEMAP>`: list the pages a run would audit.

use crate::acquisition::http_client::HttpClient;
use crate::cartography::sitemap::resolve_sitemap;
use crate::cli::output::{self, Styled};
use crate::config::AuditConfig;
use crate::trust::url_policy::UrlPolicy;
use anyhow::{Context, Result};

/// Resolve and filter without opening a browser.
///
/// Allowed URLs go to stdout, one per line; rejections to stderr.
pub async fn run(sitemap: &str, max_pages: usize, allow: &[String], block: &[String]) -> Result<()> {
    let s = Styled::new();
    let mut config = AuditConfig::from_env()?;
    if !allow.is_empty() {
        config.allow_domains = allow.to_vec();
    }
    if !block.is_empty() {
        config.block_domains = block.to_vec();
    }

    let http = HttpClient::new()?;
    let urls = resolve_sitemap(&http, sitemap, max_pages)
        .await
        .with_context(|| format!("resolving {sitemap}"))?;
    let policy = UrlPolicy::new(&config.allow_domains, &config.block_domains);
    let (allowed, rejected) = policy.partition(urls);

    if output::is_json() {
        output::print_json(&serde_json::json!({
            "sitemap": sitemap,
            "allowed": allowed.iter().map(|u| u.as_str()).collect::<Vec<_>>(),
            "rejected": rejected
                .iter()
                .map(|(url, reason)| serde_json::json!({
                    "url": url.as_str(),
                    "reason": reason.to_string(),
                }))
                .collect::<Vec<_>>(),
        }));
        return Ok(());
    }

    for url in &allowed {
        println!("{url}");
    }
    if !output::is_quiet() {
        for (url, reason) in &rejected {
            eprintln!("  {} {url} {}", s.warn_sym(), s.dim(&reason.to_string()));
        }
        eprintln!();
        eprintln!(
            "  {} allowed, {} rejected",
            s.green(&allowed.len().to_string()),
            s.yellow(&rejected.len().to_string())
        );
    }
    Ok(())
}
