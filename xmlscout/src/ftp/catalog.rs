use chrono::NaiveDate;
use std::collections::HashMap;
use std::io::Read;
use std::sync::Mutex;
use tracing::{debug, info, warn};

use crate::config::{ConnectionConfig, LayoutConfig};
use crate::errors::{SearchError, SearchResult};
use crate::ftp::listing::{
    date_in_range, glob_matches, is_xml_name, parse_date_dir, parse_list_line,
};
use crate::ftp::pool::ConnectionPool;
use crate::ftp::session::{FtpConnector, FtpSession};
use crate::source::{FileEntry, FileSource};

/// Date-partitioned catalog over a pooled FTP server.
///
/// Listing errors degrade to empty results so one unreadable directory never
/// aborts a whole run; streaming errors propagate so the coordinator can
/// apply its retry policy.
pub struct RemoteCatalog {
    pool: ConnectionPool<FtpConnector>,
    layout: LayoutConfig,
    start: NaiveDate,
    end: NaiveDate,
    file_pattern: Option<String>,
    /// Path template that produced files for each date directory, remembered
    /// so streaming addresses the same location the listing found.
    resolved_paths: Mutex<HashMap<String, String>>,
}

impl RemoteCatalog {
    pub fn new(
        connection: ConnectionConfig,
        layout: LayoutConfig,
        start: NaiveDate,
        end: NaiveDate,
        file_pattern: Option<String>,
    ) -> Self {
        let pool_size = connection.pool_size.max(1);
        let pool = ConnectionPool::new(FtpConnector::new(connection), pool_size);
        Self {
            pool,
            layout,
            start,
            end,
            file_pattern,
            resolved_paths: Mutex::new(HashMap::new()),
        }
    }

    /// Acquire one session, health-check it and hand it back. Used by
    /// callers before committing to a long run.
    pub fn check_connection(&self) -> SearchResult<()> {
        match self.pool.acquire() {
            Some(session) => {
                self.pool.release(session);
                Ok(())
            }
            None => Err(SearchError::connection_failed(
                "unable to establish an FTP session",
            )),
        }
    }

    pub fn close(&self) {
        self.pool.close_all();
    }

    fn source_root(&self) -> String {
        if self.layout.source_directory.is_empty() {
            "/".to_string()
        } else {
            format!("/{}", self.layout.source_directory)
        }
    }

    /// Ordered path templates for one date directory; the first that yields
    /// files wins. Tolerates servers with a slightly different root layout
    /// without per-server configuration.
    fn candidate_paths(&self, dir: &str) -> Vec<String> {
        let send = &self.layout.send_subdirectory;
        if self.layout.source_directory.is_empty() {
            vec![format!("/{dir}"), format!("/{dir}/{send}")]
        } else {
            let source = &self.layout.source_directory;
            vec![
                format!("/{dir}"),
                format!("/{source}/{dir}"),
                format!("/{source}/{dir}/{send}"),
            ]
        }
    }

    fn matching_files(&self, lines: &[String]) -> Vec<FileEntry> {
        lines
            .iter()
            .filter_map(|line| parse_list_line(line))
            .filter(|entry| !entry.is_dir)
            .filter(|entry| is_xml_name(&entry.name))
            .filter(|entry| match &self.file_pattern {
                Some(pattern) if !pattern.trim().is_empty() => {
                    glob_matches(pattern, &entry.name)
                }
                _ => true,
            })
            .map(|entry| FileEntry::new(entry.name, entry.size))
            .collect()
    }

    fn file_dir_path(&self, dir: &str) -> String {
        if let Some(path) = self.resolved_paths.lock().unwrap().get(dir) {
            return path.clone();
        }
        // Fall back to the full default layout.
        self.candidate_paths(dir)
            .pop()
            .unwrap_or_else(|| format!("/{dir}"))
    }

    fn with_session<T>(
        &self,
        f: impl FnOnce(&mut FtpSession) -> SearchResult<T>,
    ) -> SearchResult<T> {
        let mut session = self.pool.acquire().ok_or(SearchError::PoolExhausted)?;
        let result = f(&mut session);
        // Release on every exit path; unhealthy sessions are discarded.
        self.pool.release(session);
        result
    }
}

impl FileSource for RemoteCatalog {
    fn list_directories(&self) -> SearchResult<Vec<String>> {
        let root = self.source_root();
        let listed = self.with_session(|session| {
            session.cwd(&root)?;
            session.list()
        });

        let lines = match listed {
            Ok(lines) => lines,
            Err(e) => {
                warn!("Error listing {}: {}", root, e);
                return Ok(Vec::new());
            }
        };

        let mut dirs: Vec<String> = lines
            .iter()
            .filter_map(|line| parse_list_line(line))
            .filter(|entry| entry.is_dir)
            .filter_map(|entry| {
                parse_date_dir(&entry.name).map(|date| (entry.name, date))
            })
            .filter(|(_, date)| date_in_range(*date, self.start, self.end))
            .map(|(name, _)| name)
            .collect();

        // Lexicographic order is chronological for fixed-width YYYYMMDD.
        dirs.sort();
        info!("Found {} date directories in {}", dirs.len(), root);
        Ok(dirs)
    }

    fn list_files(&self, dir: &str) -> SearchResult<Vec<FileEntry>> {
        for path in self.candidate_paths(dir) {
            let listed = self.with_session(|session| {
                session.cwd(&path)?;
                session.list()
            });

            let lines = match listed {
                Ok(lines) => lines,
                Err(e) => {
                    debug!("Could not list {}: {}", path, e);
                    continue;
                }
            };

            let files = self.matching_files(&lines);
            if !files.is_empty() {
                debug!("Found {} XML files in {}", files.len(), path);
                self.resolved_paths
                    .lock()
                    .unwrap()
                    .insert(dir.to_string(), path);
                return Ok(files);
            }
        }

        debug!("No XML files found for {} in any candidate path", dir);
        Ok(Vec::new())
    }

    fn read_file(
        &self,
        dir: &str,
        name: &str,
        consume: &mut dyn FnMut(&mut dyn Read) -> std::io::Result<()>,
    ) -> SearchResult<()> {
        let path = self.file_dir_path(dir);
        self.with_session(|session| {
            session.cwd(&path)?;
            session.retrieve(name, |reader| consume(reader))
        })
    }

    fn display_path(&self, dir: &str, name: &str) -> String {
        format!("{}/{}", self.file_dir_path(dir), name)
    }

    fn refresh(&self) {
        info!("Refreshing FTP connection pool");
        self.pool.close_all();
    }
}

impl Drop for RemoteCatalog {
    fn drop(&mut self) {
        self.pool.close_all();
    }
}
