//! Terminal progress for a run, drawn with `indicatif`.

use crate::audit::result::{PageOutcome, PageResult};
use crate::cli::output::Styled;
use crate::pipeline::{ProgressSink, RunReport};
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::time::Duration;

const TEMPLATE: &str = "  {spinner:.cyan} [{bar:30.cyan/blue}] {pos}/{len} {msg}";

/// Progress bar advanced once per finished page.
pub struct BarProgress {
    bar: ProgressBar,
    style: Styled,
}

impl BarProgress {
    pub fn new() -> Self {
        let bar = ProgressBar::new_spinner();
        bar.set_style(
            ProgressStyle::with_template(TEMPLATE)
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("\u{2588}\u{2589}\u{2591}")
                .tick_chars("\u{25b8}\u{25b9}\u{25b8}\u{25b9}\u{25b8}"),
        );
        bar.set_message("resolving sitemap");
        bar.enable_steady_tick(Duration::from_millis(120));
        Self {
            bar,
            style: Styled::new(),
        }
    }

    /// Remove the bar, e.g. when the run aborts.
    pub fn clear(&self) {
        self.bar.finish_and_clear();
    }

    /// A bar that never draws, for `--quiet` and `--json`.
    pub fn hidden() -> Self {
        let this = Self::new();
        this.bar.set_draw_target(ProgressDrawTarget::hidden());
        this
    }
}

impl Default for BarProgress {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressSink for BarProgress {
    fn planned(&self, total: usize) {
        self.bar.set_length(total as u64);
        self.bar.set_position(0);
        self.bar.set_message("auditing");
    }

    fn page_done(&self, result: &PageResult) {
        let line = match &result.outcome {
            PageOutcome::Success(s) => format!(
                "{} {} {}",
                self.style.ok_sym(),
                result.url,
                self.style.dim(&format!("{} violated rules", s.counts.total()))
            ),
            PageOutcome::Failure(f) => format!(
                "{} {} {}",
                self.style.fail_sym(),
                result.url,
                self.style.red(f.kind.as_str())
            ),
        };
        self.bar.println(format!("  {line}"));
        self.bar.inc(1);
    }

    fn finished(&self, _report: &RunReport) {
        self.bar.finish_and_clear();
    }
}
