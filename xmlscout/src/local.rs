use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use ignore::WalkBuilder;
use tracing::debug;

use crate::errors::{SearchError, SearchResult};
use crate::ftp::listing::{date_in_range, glob_matches, is_xml_name, parse_date_dir};
use crate::source::{FileEntry, FileSource};

/// Directory label used for XML files sitting directly in the root.
const ROOT_LABEL: &str = ".";

/// Local directory tree behind the same discover -> stream contract as the
/// remote catalog.
///
/// Directory labels are paths relative to the root. A directory whose final
/// component is an 8-digit date is subject to the configured date range;
/// other directories are always included. Reported paths are relative to
/// the root as well.
#[derive(Debug)]
pub struct LocalTree {
    root: PathBuf,
    start: NaiveDate,
    end: NaiveDate,
    file_pattern: Option<String>,
}

impl LocalTree {
    pub fn new(
        root: impl Into<PathBuf>,
        start: NaiveDate,
        end: NaiveDate,
        file_pattern: Option<String>,
    ) -> SearchResult<Self> {
        let root = root.into();
        if !root.is_dir() {
            return Err(SearchError::invalid_source_path(root));
        }
        Ok(Self {
            root,
            start,
            end,
            file_pattern,
        })
    }

    fn dir_in_range(&self, label: &str) -> bool {
        let leaf = label.rsplit('/').next().unwrap_or(label);
        match parse_date_dir(leaf) {
            Some(date) => date_in_range(date, self.start, self.end),
            None => true,
        }
    }

    fn wanted(&self, name: &str) -> bool {
        is_xml_name(name)
            && self
                .file_pattern
                .as_deref()
                .map_or(true, |pattern| glob_matches(pattern, name))
    }

    fn resolve(&self, dir: &str) -> PathBuf {
        if dir == ROOT_LABEL {
            self.root.clone()
        } else {
            self.root.join(dir)
        }
    }

    fn label_for(&self, dir: &Path) -> Option<String> {
        let relative = dir.strip_prefix(&self.root).ok()?;
        if relative.as_os_str().is_empty() {
            return Some(ROOT_LABEL.to_string());
        }
        let mut parts = Vec::new();
        for component in relative.components() {
            parts.push(component.as_os_str().to_str()?.to_string());
        }
        Some(parts.join("/"))
    }
}

impl FileSource for LocalTree {
    fn list_directories(&self) -> SearchResult<Vec<String>> {
        let mut labels = Vec::new();
        let walker = WalkBuilder::new(&self.root)
            .standard_filters(false)
            .follow_links(false)
            .build();
        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    debug!("walk error under {}: {}", self.root.display(), e);
                    continue;
                }
            };
            if !entry.file_type().map_or(false, |t| t.is_dir()) {
                continue;
            }
            let label = match self.label_for(entry.path()) {
                Some(label) => label,
                None => continue,
            };
            if self.dir_in_range(&label) {
                labels.push(label);
            }
        }
        labels.sort();
        Ok(labels)
    }

    fn list_files(&self, dir: &str) -> SearchResult<Vec<FileEntry>> {
        let mut entries = Vec::new();
        for item in std::fs::read_dir(self.resolve(dir))? {
            let item = item?;
            if !item.file_type()?.is_file() {
                continue;
            }
            let name = match item.file_name().to_str() {
                Some(name) => name.to_string(),
                None => continue,
            };
            if !self.wanted(&name) {
                continue;
            }
            let size = item.metadata()?.len();
            entries.push(FileEntry::new(name, size));
        }
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }

    fn read_file(
        &self,
        dir: &str,
        name: &str,
        consume: &mut dyn FnMut(&mut dyn Read) -> std::io::Result<()>,
    ) -> SearchResult<()> {
        let mut file = File::open(self.resolve(dir).join(name))?;
        consume(&mut file)?;
        Ok(())
    }

    fn display_path(&self, dir: &str, name: &str) -> String {
        if dir == ROOT_LABEL {
            name.to_string()
        } else {
            format!("{}/{}", dir, name)
        }
    }
}
