//! Progress display for the improvement loop.

use std::time::Duration;

use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};

use crate::domain::models::{IterationOutcome, IterationRecord, RunId};
use crate::services::IterationObserver;

const PROGRESS_TEMPLATE: &str = "[{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} {msg}";
const PROGRESS_CHARS: &str = "█▓▒░ ";

/// A bar over `total` iterations; hidden when `visible` is false.
pub fn create_progress_bar(total: u64, visible: bool) -> ProgressBar {
    let pb = ProgressBar::new(total);
    if !visible {
        pb.set_draw_target(ProgressDrawTarget::hidden());
    }
    if let Ok(style) = ProgressStyle::default_bar().template(PROGRESS_TEMPLATE) {
        pb.set_style(style.progress_chars(PROGRESS_CHARS));
    }
    pb.enable_steady_tick(Duration::from_millis(100));
    pb
}

/// Extension trait for ProgressBar to add common utility methods
pub trait ProgressBarExt {
    fn finish_success(&self, message: impl Into<String>);

    fn finish_warning(&self, message: impl Into<String>);
}

impl ProgressBarExt for ProgressBar {
    fn finish_success(&self, message: impl Into<String>) {
        self.finish_with_message(format!("✓ {}", message.into()));
    }

    fn finish_warning(&self, message: impl Into<String>) {
        self.finish_with_message(format!("! {}", message.into()));
    }
}

/// Drives a progress bar from loop callbacks.
#[derive(Debug, Clone)]
pub struct ProgressObserver {
    bar: ProgressBar,
}

impl ProgressObserver {
    pub fn new(visible: bool) -> Self {
        Self {
            bar: create_progress_bar(0, visible),
        }
    }

    pub const fn bar(&self) -> &ProgressBar {
        &self.bar
    }

    /// Close the bar with a one-line verdict.
    pub fn finish(&self, accepted: usize, total: usize) {
        let message = format!("{accepted}/{total} attempts accepted");
        if accepted > 0 {
            self.bar.finish_success(message);
        } else {
            self.bar.finish_warning(message);
        }
    }
}

impl IterationObserver for ProgressObserver {
    fn on_start(&self, run: &RunId, start: u32, end: u32) {
        self.bar.set_length(u64::from(end.saturating_sub(start)));
        self.bar.set_position(0);
        self.bar.set_message(format!("run {run}"));
    }

    fn on_attempt(&self, iteration: u32) {
        self.bar.set_message(format!("attempt {iteration}"));
    }

    fn on_iteration(&self, record: &IterationRecord) {
        let message = match &record.outcome {
            IterationOutcome::Accepted { score } => format!("iteration {} accepted ({score:.4})", record.iteration),
            IterationOutcome::Reverted { kind, .. } => format!("iteration {} reverted ({kind})", record.iteration),
        };
        self.bar.println(&message);
        self.bar.inc(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_observer_tracks_iterations() {
        let observer = ProgressObserver::new(false);
        observer.on_start(&RunId::from("1_x"), 2, 6);
        assert_eq!(observer.bar().length(), Some(4));

        observer.on_iteration(&IterationRecord {
            iteration: 2,
            outcome: IterationOutcome::Accepted { score: 0.5 },
            elapsed_ms: 10,
        });
        assert_eq!(observer.bar().position(), 1);

        observer.finish(1, 1);
        assert!(observer.bar().is_finished());
    }
}
