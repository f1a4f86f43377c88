//! Progress display for bulk actions.

use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use redeploy::{ProgressCallback, RedeployOutcome};

/// Progress bar over the services of a batch, one line per outcome
pub struct BatchProgress {
    bar: Option<ProgressBar>,
    quiet: bool,
}

impl BatchProgress {
    pub fn new(quiet: bool) -> Self {
        Self { bar: None, quiet }
    }

    fn println(&self, line: String) {
        if self.quiet {
            return;
        }
        match &self.bar {
            Some(bar) => bar.suspend(|| println!("{line}")),
            None => println!("{line}"),
        }
    }
}

impl ProgressCallback for BatchProgress {
    fn on_batch_start(&mut self, count: usize, action: &str) {
        if self.quiet || count == 0 {
            return;
        }
        let bar = ProgressBar::new(count as u64);
        if let Ok(style) =
            ProgressStyle::default_bar().template("{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} {msg}")
        {
            bar.set_style(style.progress_chars("=>-"));
        }
        bar.set_message(action.to_string());
        self.bar = Some(bar);
    }

    fn on_service_start(&mut self, keypath: &str) {
        if let Some(bar) = &self.bar {
            bar.set_message(crate::ui::truncate_keypath(keypath, 40));
        }
    }

    fn on_service_complete(&mut self, keypath: &str, outcome: &RedeployOutcome) {
        let line = match outcome {
            RedeployOutcome::DryRunSucceeded { devices, ready } => format!(
                "  {} {keypath} ({devices} device(s){})",
                "✓".green(),
                if *ready { ", ready" } else { "" }
            ),
            RedeployOutcome::CommitSucceeded => format!("  {} {keypath} committed", "✓".green()),
            RedeployOutcome::Skipped { reason } => {
                format!("  {} {keypath} ({})", "○".dimmed(), reason.dimmed())
            }
            RedeployOutcome::Failed { error } => format!("  {} {keypath} ({error})", "✗".red()),
        };
        self.println(line);
        if let Some(bar) = &self.bar {
            bar.inc(1);
        }
    }

    fn on_batch_complete(&mut self) {
        if let Some(bar) = self.bar.take() {
            bar.finish_and_clear();
        }
    }
}
