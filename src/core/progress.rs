//! Progress reporting for synchronization runs.
//!
//! The synchronizer emits one `SyncProgress` after every copied file. Sinks
//! must return immediately: the copy loop calls them inline.

use tokio::sync::mpsc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncProgress {
    pub files_copied: u64,
    pub total_files: u64,
}

impl SyncProgress {
    pub fn new(files_copied: u64, total_files: u64) -> Self {
        Self {
            files_copied,
            total_files,
        }
    }

    /// Completed fraction in `[0, 1]`. An empty run counts as complete.
    pub fn ratio(&self) -> f64 {
        if self.total_files == 0 {
            return 1.0;
        }
        (self.files_copied as f64 / self.total_files as f64).clamp(0.0, 1.0)
    }

    pub fn percentage(&self) -> u8 {
        (self.ratio() * 100.0) as u8
    }
}

/// Receiver of progress ticks.
pub trait ProgressSink: Send {
    fn on_progress(&mut self, progress: SyncProgress);
}

impl ProgressSink for mpsc::UnboundedSender<SyncProgress> {
    fn on_progress(&mut self, progress: SyncProgress) {
        // Receiver going away must not stop the copy.
        let _ = self.send(progress);
    }
}

impl<F> ProgressSink for F
where
    F: FnMut(SyncProgress) + Send,
{
    fn on_progress(&mut self, progress: SyncProgress) {
        self(progress)
    }
}

/// Sink that drops every tick.
pub struct NullSink;

impl ProgressSink for NullSink {
    fn on_progress(&mut self, _progress: SyncProgress) {}
}
