//! Keeps the core's notion of "progress" to plain integer updates through
//! a trait, with `indicatif` rendering living entirely in the CLI-facing
//! implementation below.

use indicatif::{MultiProgress, ProgressBar, ProgressStyle};

use crate::source::http::ProgressSink;

/// Per-partition progress: one persistent bar, incremented once per
/// applied operation.
pub trait PartitionProgress: Send {
    fn inc(&self);
    fn finish(&self);
}

pub trait ProgressReporter: Send + Sync {
    fn start_partition(&self, name: &str, total_ops: u64) -> Box<dyn PartitionProgress>;
    /// A sink suitable for `HttpRangeFile::with_progress`, reporting bytes
    /// read for a single range request.
    fn download_sink(&self) -> ProgressSink;
    fn warn(&self, message: &str);
}

pub struct IndicatifReporter {
    bars: MultiProgress,
    download_bar: ProgressBar,
}

impl IndicatifReporter {
    pub fn new() -> Self {
        let bars = MultiProgress::new();
        let download_bar = bars.add(ProgressBar::new(0));
        download_bar.set_style(
            ProgressStyle::with_template("{msg} [{bar:40.cyan/blue}] {bytes}/{total_bytes}")
                .unwrap_or_else(|_| ProgressStyle::default_bar()),
        );
        download_bar.set_message("downloading");
        Self { bars, download_bar }
    }
}

impl Default for IndicatifReporter {
    fn default() -> Self {
        Self::new()
    }
}

struct IndicatifPartitionProgress {
    bar: ProgressBar,
}

impl PartitionProgress for IndicatifPartitionProgress {
    fn inc(&self) {
        self.bar.inc(1);
    }

    fn finish(&self) {
        self.bar.finish_with_message("done");
    }
}

impl ProgressReporter for IndicatifReporter {
    fn start_partition(&self, name: &str, total_ops: u64) -> Box<dyn PartitionProgress> {
        let bar = self.bars.add(ProgressBar::new(total_ops.max(1)));
        bar.set_style(
            ProgressStyle::with_template("{msg} [{bar:40.green/black}] {pos}/{len} ops")
                .unwrap_or_else(|_| ProgressStyle::default_bar()),
        );
        bar.set_message(name.to_string());
        Box::new(IndicatifPartitionProgress { bar })
    }

    fn download_sink(&self) -> ProgressSink {
        let bar = self.download_bar.clone();
        Box::new(move |current, total| {
            if total > 0 {
                bar.set_length(total);
            }
            bar.set_position(current);
        })
    }

    fn warn(&self, message: &str) {
        let _ = self.bars.println(format!("warning: {message}"));
    }
}

/// Used for `--quiet` and in tests: no terminal output, warnings routed to
/// the `log` facade instead.
pub struct NullReporter;

struct NullPartitionProgress;

impl PartitionProgress for NullPartitionProgress {
    fn inc(&self) {}
    fn finish(&self) {}
}

impl ProgressReporter for NullReporter {
    fn start_partition(&self, _name: &str, _total_ops: u64) -> Box<dyn PartitionProgress> {
        Box::new(NullPartitionProgress)
    }

    fn download_sink(&self) -> ProgressSink {
        Box::new(|_, _| {})
    }

    fn warn(&self, message: &str) {
        log::warn!("{message}");
    }
}

/// Test-only reporter that records every `warn(...)` call into a shared
/// `Mutex<Vec<String>>` so other modules' tests can assert on warnings
/// emitted by code that only has a `&dyn ProgressReporter`.
#[cfg(test)]
pub(crate) struct RecordingReporter<'a> {
    warnings: &'a std::sync::Mutex<Vec<String>>,
}

#[cfg(test)]
impl<'a> RecordingReporter<'a> {
    pub(crate) fn new(warnings: &'a std::sync::Mutex<Vec<String>>) -> Self {
        Self { warnings }
    }
}

#[cfg(test)]
impl ProgressReporter for RecordingReporter<'_> {
    fn start_partition(&self, _name: &str, _total_ops: u64) -> Box<dyn PartitionProgress> {
        Box::new(NullPartitionProgress)
    }

    fn download_sink(&self) -> ProgressSink {
        Box::new(|_, _| {})
    }

    fn warn(&self, message: &str) {
        self.warnings.lock().unwrap().push(message.to_string());
    }
}
