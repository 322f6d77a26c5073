//! Download progress reporting.
//!
//! A reporter receives `(downloaded, total)` updates once per transfer block.
//! The display mode is decided by the first update: a known total gives a
//! determinate bar, an unknown total gives a spinner. Whatever happens to the
//! transfer, a terminal reporter always leaves a finished line behind so the
//! next log record or error starts on a fresh line.

use indicatif::{MultiProgress, ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::sync::OnceLock;
use std::time::Duration;

/// Returns the process-wide [`MultiProgress`] every visible bar is drawn through.
///
/// Log output routed through [`crate::logging::IndicatifWriter`] suspends these
/// bars while it writes, so records never tear a live bar.
pub fn global_multi_progress() -> MultiProgress {
    static GLOBAL_MP: OnceLock<MultiProgress> = OnceLock::new();
    GLOBAL_MP
        .get_or_init(|| MultiProgress::with_draw_target(ProgressDrawTarget::stderr_with_hz(10)))
        .clone()
}

// ============================================================================
// Reporter Trait
// ============================================================================

/// Sink for transfer progress.
pub trait ProgressReporter {
    /// Called once per transfer block; `total` is `None` when unknown.
    fn report(&mut self, downloaded: u64, total: Option<u64>);

    /// Called after a successful transfer.
    fn finish(&mut self);

    /// Called when the transfer failed.
    fn abandon(&mut self);
}

/// Maps a raw size announced by a transport to a known total.
///
/// Sizes below one byte mean "unknown".
pub fn known_total(raw: Option<u64>) -> Option<u64> {
    raw.filter(|&total| total >= 1)
}

// ============================================================================
// Progress State Machine
// ============================================================================

/// Display state of a transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressState {
    /// No update received yet.
    Unstarted,
    /// Total size is known; progress is shown as a bar.
    Determinate { downloaded: u64, total: u64 },
    /// Total size is unknown; only activity is shown.
    Indeterminate { downloaded: u64 },
    /// Transfer finished (successfully or not); further updates are ignored.
    Finished { succeeded: bool },
}

/// Pure progress state machine, shared by every reporter implementation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressTracker {
    state: ProgressState,
}

impl ProgressTracker {
    pub fn new() -> Self {
        Self {
            state: ProgressState::Unstarted,
        }
    }

    pub fn state(&self) -> ProgressState {
        self.state
    }

    /// Applies an update. The mode chosen by the first update never changes.
    pub fn update(&mut self, downloaded: u64, total: Option<u64>) -> ProgressState {
        self.state = match self.state {
            ProgressState::Unstarted => match known_total(total) {
                Some(total) => ProgressState::Determinate { downloaded, total },
                None => ProgressState::Indeterminate { downloaded },
            },
            ProgressState::Determinate { total, .. } => ProgressState::Determinate {
                // Servers may under-announce; grow rather than overflow the bar.
                total: total.max(downloaded),
                downloaded,
            },
            ProgressState::Indeterminate { .. } => ProgressState::Indeterminate { downloaded },
            finished @ ProgressState::Finished { .. } => finished,
        };
        self.state
    }

    /// Moves to the finished state; returns false if it was already finished.
    pub fn finish(&mut self, succeeded: bool) -> bool {
        if self.is_finished() {
            return false;
        }
        self.state = ProgressState::Finished { succeeded };
        true
    }

    pub fn is_finished(&self) -> bool {
        matches!(self.state, ProgressState::Finished { .. })
    }

    /// Percentage in determinate mode, `None` otherwise.
    pub fn percent(&self) -> Option<f32> {
        match self.state {
            ProgressState::Determinate { downloaded, total } if total > 0 => {
                Some((downloaded as f32 / total as f32) * 100.0)
            }
            _ => None,
        }
    }
}

impl Default for ProgressTracker {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Terminal Reporter
// ============================================================================

/// Renders progress on stderr with indicatif.
pub struct TerminalProgress {
    label: String,
    tracker: ProgressTracker,
    bar: Option<ProgressBar>,
    visible: bool,
}

impl TerminalProgress {
    /// Creates a reporter drawing on stderr through [`global_multi_progress`].
    pub fn new(label: impl Into<String>) -> Self {
        Self::with_visibility(label.into(), true)
    }

    /// Creates a reporter that tracks state but draws nothing.
    pub fn hidden(label: impl Into<String>) -> Self {
        Self::with_visibility(label.into(), false)
    }

    fn with_visibility(label: String, visible: bool) -> Self {
        Self {
            label,
            tracker: ProgressTracker::new(),
            bar: None,
            visible,
        }
    }

    pub fn state(&self) -> ProgressState {
        self.tracker.state()
    }

    fn start_bar(&self, state: ProgressState) -> ProgressBar {
        let length = match state {
            ProgressState::Determinate { total, .. } => Some(total),
            _ => None,
        };
        let mut bar = ProgressBar::with_draw_target(length, ProgressDrawTarget::hidden());
        if self.visible {
            bar = global_multi_progress().add(bar);
        }

        if length.is_some() {
            bar.set_style(bytes_style());
        } else {
            bar.set_style(spinner_style());
            bar.enable_steady_tick(Duration::from_millis(100));
        }
        bar.set_prefix(self.label.clone());
        bar
    }
}

impl ProgressReporter for TerminalProgress {
    fn report(&mut self, downloaded: u64, total: Option<u64>) {
        let state = self.tracker.update(downloaded, total);
        if self.tracker.is_finished() {
            return;
        }
        if self.bar.is_none() {
            self.bar = Some(self.start_bar(state));
        }
        if let Some(bar) = &self.bar {
            if let ProgressState::Determinate { total, .. } = state {
                bar.set_length(total);
            }
            bar.set_position(downloaded);
        }
    }

    fn finish(&mut self) {
        if !self.tracker.finish(true) {
            return;
        }
        if let Some(bar) = self.bar.take() {
            bar.finish();
        }
    }

    fn abandon(&mut self) {
        if !self.tracker.finish(false) {
            return;
        }
        if let Some(bar) = self.bar.take() {
            // Leaves the line in place and moves to a new one.
            bar.abandon_with_message("failed");
        }
    }
}

impl Drop for TerminalProgress {
    fn drop(&mut self) {
        self.abandon();
    }
}

fn bytes_style() -> ProgressStyle {
    ProgressStyle::with_template(
        "{prefix} [{elapsed_precise}] [{bar:30}] {bytes}/{total_bytes} {msg}",
    )
    .unwrap_or_else(|_| ProgressStyle::default_bar())
    .progress_chars("=> ")
}

fn spinner_style() -> ProgressStyle {
    ProgressStyle::with_template("{prefix} {spinner} [{elapsed_precise}] {bytes} {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_spinner())
}

// ============================================================================
// Silent Reporter
// ============================================================================

/// Reporter that ignores every update.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoProgress;

impl ProgressReporter for NoProgress {
    fn report(&mut self, _downloaded: u64, _total: Option<u64>) {}

    fn finish(&mut self) {}

    fn abandon(&mut self) {}
}
