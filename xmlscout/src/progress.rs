use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Thread-safe progress tracker shared between the coordinator, its workers
/// and the caller.
///
/// All mutation goes through this one lock; it is only ever held for the
/// duration of a counter update, never across network I/O. Readers get an
/// eventually consistent snapshot.
#[derive(Debug)]
pub struct ProgressTracker {
    state: Mutex<ProgressState>,
    started: Instant,
}

#[derive(Debug, Default)]
struct ProgressState {
    directories_total: usize,
    directories_processed: usize,
    files_total: usize,
    files_processed: usize,
    matches_found: usize,
    current_directory: String,
    current_file: String,
    errors: Vec<String>,
}

/// Point-in-time copy of the progress counters.
#[derive(Debug, Clone, Default)]
pub struct ProgressSnapshot {
    pub directories_total: usize,
    pub directories_processed: usize,
    pub files_total: usize,
    pub files_processed: usize,
    pub matches_found: usize,
    pub current_directory: String,
    pub current_file: String,
    pub elapsed: Duration,
    pub errors: Vec<String>,
}

impl ProgressTracker {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(ProgressState::default()),
            started: Instant::now(),
        }
    }

    pub fn set_totals(&self, directories: usize, files: usize) {
        let mut state = self.state.lock().unwrap();
        state.directories_total = directories;
        state.files_total = files;
    }

    pub fn update_directory(&self, directory: &str) {
        let mut state = self.state.lock().unwrap();
        state.current_directory = directory.to_string();
        state.directories_processed += 1;
    }

    pub fn update_file(&self, filename: &str) {
        let mut state = self.state.lock().unwrap();
        state.current_file = filename.to_string();
        state.files_processed += 1;
    }

    pub fn add_match(&self) {
        let mut state = self.state.lock().unwrap();
        state.matches_found += 1;
    }

    pub fn add_error(&self, error: impl Into<String>) {
        let mut state = self.state.lock().unwrap();
        state.errors.push(error.into());
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        let state = self.state.lock().unwrap();
        ProgressSnapshot {
            directories_total: state.directories_total,
            directories_processed: state.directories_processed,
            files_total: state.files_total,
            files_processed: state.files_processed,
            matches_found: state.matches_found,
            current_directory: state.current_directory.clone(),
            current_file: state.current_file.clone(),
            elapsed: self.started.elapsed(),
            errors: state.errors.clone(),
        }
    }
}

impl Default for ProgressTracker {
    fn default() -> Self {
        Self::new()
    }
}

/// Shared cancellation flag, set once by the caller and observed
/// cooperatively by workers. Never reset mid-run.
#[derive(Debug, Clone, Default)]
pub struct StopSignal(Arc<AtomicBool>);

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request_stop(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_stop_requested(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters() {
        let progress = ProgressTracker::new();
        progress.set_totals(2, 5);
        progress.update_directory("20240801");
        progress.update_file("a.xml");
        progress.update_file("b.xml");
        progress.add_match();
        progress.add_error("Error processing c.xml: timed out");

        let snapshot = progress.snapshot();
        assert_eq!(snapshot.directories_total, 2);
        assert_eq!(snapshot.directories_processed, 1);
        assert_eq!(snapshot.files_total, 5);
        assert_eq!(snapshot.files_processed, 2);
        assert_eq!(snapshot.matches_found, 1);
        assert_eq!(snapshot.current_directory, "20240801");
        assert_eq!(snapshot.current_file, "b.xml");
        assert_eq!(snapshot.errors.len(), 1);
    }

    #[test]
    fn test_snapshot_is_detached() {
        let progress = ProgressTracker::new();
        let before = progress.snapshot();
        progress.add_match();
        assert_eq!(before.matches_found, 0);
        assert_eq!(progress.snapshot().matches_found, 1);
    }

    #[test]
    fn test_stop_signal() {
        let stop = StopSignal::new();
        assert!(!stop.is_stop_requested());

        let shared = stop.clone();
        shared.request_stop();
        assert!(stop.is_stop_requested());
    }
}
