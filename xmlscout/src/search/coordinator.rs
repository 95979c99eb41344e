use std::sync::Arc;
use std::thread;
use std::time::Duration;

use rayon::prelude::*;
use tracing::{debug, info, warn};

use crate::config::{SearchConfig, SearchMode};
use crate::errors::{SearchError, SearchResult};
use crate::progress::{ProgressSnapshot, ProgressTracker, StopSignal};
use crate::results::{MatchKind, MatchRecord};
use crate::search::{build_engine, EngineError, MatchEngine};
use crate::source::{FileEntry, FileSource};

/// Files dispatched to the worker pool per batch, so a stop request is
/// observed between batches and not only between directories.
const SUB_BATCH_SIZE: usize = 100;

/// Above this many candidate files the worker count is capped, keeping the
/// session pool from being overwhelmed on very wide date ranges.
const LARGE_SET_THRESHOLD: usize = 1000;
const CAPPED_WORKERS: usize = 4;

/// Outcome of one search run.
#[derive(Debug)]
pub struct SearchReport {
    /// Records in directory order, then file order within each directory
    pub matches: Vec<MatchRecord>,
    pub progress: ProgressSnapshot,
    /// True when the run ended because stop was requested
    pub stopped: bool,
}

/// Drives one search run over a `FileSource`: discovery, batching, the
/// per-file retry policy and progress accounting.
///
/// Per-file failures are recorded and never abort the run; only validation
/// and discovery of the directory list itself can fail the run as a whole.
pub struct SearchCoordinator {
    config: SearchConfig,
    progress: Arc<ProgressTracker>,
    stop: StopSignal,
}

impl SearchCoordinator {
    pub fn new(config: SearchConfig) -> Self {
        Self {
            config,
            progress: Arc::new(ProgressTracker::new()),
            stop: StopSignal::new(),
        }
    }

    /// Shared progress tracker, for polling from another thread.
    pub fn progress(&self) -> Arc<ProgressTracker> {
        Arc::clone(&self.progress)
    }

    /// Cancellation handle. Cloneable, safe to trigger from any thread.
    pub fn stop_signal(&self) -> StopSignal {
        self.stop.clone()
    }

    /// Run the search to completion or until stop is requested.
    ///
    /// `on_progress` is invoked once per completed file task with a fresh
    /// snapshot, from whichever worker finished the task.
    pub fn run<F>(&self, source: &dyn FileSource, on_progress: F) -> SearchResult<SearchReport>
    where
        F: Fn(&ProgressSnapshot) + Sync,
    {
        self.validate()?;
        let engine = build_engine(&self.config)?;

        let directories = source.list_directories()?;
        info!("searching {} date directories", directories.len());

        let mut tasks: Vec<(String, Vec<FileEntry>)> = Vec::with_capacity(directories.len());
        let mut total_files = 0usize;
        let size_limit = self.config.max_file_size_bytes();
        for dir in &directories {
            if self.stop.is_stop_requested() {
                break;
            }
            let files = match source.list_files(dir) {
                Ok(files) => files,
                Err(e) => {
                    warn!("listing {} failed: {}", dir, e);
                    self.progress.add_error(format!("Error listing {}: {}", dir, e));
                    continue;
                }
            };
            let mut kept = Vec::with_capacity(files.len());
            for entry in files {
                if entry.size > size_limit {
                    debug!("skipping oversized file {}/{}", dir, entry.name);
                    self.progress.add_error(format!(
                        "Skipping {}/{}: {} bytes exceeds the {} MB limit",
                        dir, entry.name, entry.size, self.config.stream.max_file_size_mb
                    ));
                    continue;
                }
                kept.push(entry);
            }
            total_files += kept.len();
            tasks.push((dir.clone(), kept));
        }
        self.progress.set_totals(directories.len(), total_files);

        let workers = effective_worker_count(self.config.thread_count.get(), total_files);
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(workers)
            .build()
            .map_err(|e| SearchError::config_error(e.to_string()))?;
        debug!("{} worker threads for {} files", workers, total_files);

        let engine = engine.as_deref();
        let mut matches = Vec::new();
        'dirs: for (dir, files) in &tasks {
            if self.stop.is_stop_requested() {
                break;
            }
            self.progress.update_directory(dir);
            for batch in files.chunks(SUB_BATCH_SIZE) {
                if self.stop.is_stop_requested() {
                    break 'dirs;
                }
                let batch_records: Vec<Vec<MatchRecord>> = pool.install(|| {
                    batch
                        .par_iter()
                        .map(|entry| self.run_task(source, engine, dir, entry, &on_progress))
                        .collect()
                });
                matches.extend(batch_records.into_iter().flatten());
            }
        }

        let stopped = self.stop.is_stop_requested();
        let progress = self.progress.snapshot();
        info!(
            "search finished: {} matches in {} files, {} errors, stopped={}",
            matches.len(),
            progress.files_processed,
            progress.errors.len(),
            stopped
        );
        Ok(SearchReport {
            matches,
            progress,
            stopped,
        })
    }

    fn validate(&self) -> SearchResult<()> {
        match self.config.mode {
            SearchMode::Filename => {
                if self.config.file_pattern.is_none() {
                    return Err(SearchError::NoPatterns);
                }
            }
            _ => {
                if self.config.patterns.iter().all(|p| p.trim().is_empty()) {
                    return Err(SearchError::NoPatterns);
                }
            }
        }
        if self.config.end_date < self.config.start_date {
            return Err(SearchError::config_error(format!(
                "end_date {} is before start_date {}",
                self.config.end_date, self.config.start_date
            )));
        }
        Ok(())
    }

    /// One file task on a worker thread. Always advances the progress
    /// counters exactly once, match or not.
    fn run_task<F>(
        &self,
        source: &dyn FileSource,
        engine: Option<&dyn MatchEngine>,
        dir: &str,
        entry: &FileEntry,
        on_progress: &F,
    ) -> Vec<MatchRecord>
    where
        F: Fn(&ProgressSnapshot) + Sync,
    {
        if self.stop.is_stop_requested() {
            return Vec::new();
        }
        let records = match engine {
            None => self.filename_records(source, dir, &entry.name),
            Some(engine) => match self.search_file_with_retry(source, engine, dir, &entry.name) {
                Ok(records) => records,
                Err(e) => {
                    self.progress
                        .add_error(format!("Error processing {}/{}: {}", dir, entry.name, e));
                    Vec::new()
                }
            },
        };
        self.progress.update_file(&entry.name);
        for _ in &records {
            self.progress.add_match();
        }
        on_progress(&self.progress.snapshot());
        records
    }

    /// Discovery already applied the glob, so reaching a task in filename
    /// mode is itself the match.
    fn filename_records(
        &self,
        source: &dyn FileSource,
        dir: &str,
        name: &str,
    ) -> Vec<MatchRecord> {
        let pattern = self.config.file_pattern.clone().unwrap_or_default();
        let mut record = MatchRecord::new(dir, name, MatchKind::Filename, pattern, 0);
        record.file_path = source.display_path(dir, name);
        vec![record]
    }

    /// Retry loop around one file. Only connection-class failures are
    /// retried; the source is refreshed before every extra attempt so a
    /// poisoned session pool is rebuilt.
    fn search_file_with_retry(
        &self,
        source: &dyn FileSource,
        engine: &dyn MatchEngine,
        dir: &str,
        name: &str,
    ) -> SearchResult<Vec<MatchRecord>> {
        let max_attempts = self.config.connection.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match self.search_once(source, engine, dir, name) {
                Ok(records) => return Ok(records),
                Err(e) if e.is_connection_error() && attempt < max_attempts => {
                    warn!(
                        "attempt {}/{} for {}/{} failed: {}",
                        attempt, max_attempts, dir, name, e
                    );
                    let delay = self.config.connection.retry_delay_secs * attempt as u64;
                    if delay > 0 {
                        thread::sleep(Duration::from_secs(delay));
                    }
                    source.refresh();
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn search_once(
        &self,
        source: &dyn FileSource,
        engine: &dyn MatchEngine,
        dir: &str,
        name: &str,
    ) -> SearchResult<Vec<MatchRecord>> {
        let mut outcome: Result<Vec<MatchRecord>, EngineError> = Ok(Vec::new());
        source.read_file(dir, name, &mut |reader| {
            outcome = engine.search_stream(reader, dir, name);
            match &outcome {
                Err(EngineError::Io(e)) => Err(std::io::Error::new(e.kind(), e.to_string())),
                _ => Ok(()),
            }
        })?;
        match outcome {
            Ok(mut records) => {
                let path = source.display_path(dir, name);
                for record in &mut records {
                    record.file_path = path.clone();
                }
                Ok(records)
            }
            Err(EngineError::Content(reason)) => {
                Err(SearchError::content(format!("{}/{}", dir, name), reason))
            }
            Err(EngineError::Io(e)) => Err(SearchError::IoError(e)),
        }
    }
}

/// Worker count for a run: the configured thread count, capped once the
/// candidate set is large enough that more workers would mostly contend on
/// the session pool.
fn effective_worker_count(thread_count: usize, total_files: usize) -> usize {
    if total_files > LARGE_SET_THRESHOLD {
        thread_count.min(CAPPED_WORKERS)
    } else {
        thread_count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_worker_count_uncapped_for_small_sets() {
        assert_eq!(effective_worker_count(8, 100), 8);
        assert_eq!(effective_worker_count(8, LARGE_SET_THRESHOLD), 8);
    }

    #[test]
    fn test_worker_count_capped_for_large_sets() {
        assert_eq!(effective_worker_count(8, LARGE_SET_THRESHOLD + 1), 4);
        assert_eq!(effective_worker_count(2, 5000), 2);
    }
}
