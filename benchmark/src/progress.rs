use indicatif::{ProgressBar, ProgressStyle};
use std::time::Instant;
use tracing::debug;

const TEMPLATE: &str = "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta}) - {msg}";

pub struct ProgressTracker {
    bar: ProgressBar,
    start_time: Instant,
    passed: usize,
    failed: usize,
}

impl ProgressTracker {
    /// A hidden tracker draws nothing but still keeps counts.
    pub fn new(total: usize, visible: bool) -> Self {
        let bar = if visible {
            ProgressBar::new(total as u64)
        } else {
            ProgressBar::hidden()
        };
        let style = ProgressStyle::default_bar()
            .template(TEMPLATE)
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("#>-");
        bar.set_style(style);

        Self {
            bar,
            start_time: Instant::now(),
            passed: 0,
            failed: 0,
        }
    }

    pub fn record(&mut self, passed: bool) {
        if passed {
            self.passed += 1;
        } else {
            self.failed += 1;
        }
        self.bar.inc(1);

        let done = self.passed + self.failed;
        let per_case = self.start_time.elapsed().as_secs_f64() / done as f64;
        self.bar.set_message(format!(
            "{} passed, {} failed - {:.2}s/case",
            self.passed, self.failed, per_case
        ));
    }

    pub fn finish(&self) {
        self.bar.finish_and_clear();
        debug!(
            "{} passed, {} failed in {:.2}s",
            self.passed,
            self.failed,
            self.start_time.elapsed().as_secs_f64()
        );
    }

    pub fn counts(&self) -> (usize, usize) {
        (self.passed, self.failed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hidden_tracker_counts() {
        let mut tracker = ProgressTracker::new(3, false);
        tracker.record(true);
        tracker.record(false);
        tracker.record(true);
        tracker.finish();
        assert_eq!(tracker.counts(), (2, 1));
    }
}
