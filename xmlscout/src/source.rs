use crate::errors::SearchResult;
use std::io::Read;

/// A file discovered by a source. Sizes are advisory: listing parsers fall
/// back to 0 when a size column cannot be read, so they are only used for
/// the max-file-size skip filter, never as an integrity check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEntry {
    pub name: String,
    pub size: u64,
}

impl FileEntry {
    pub fn new(name: impl Into<String>, size: u64) -> Self {
        Self {
            name: name.into(),
            size,
        }
    }
}

/// Uniform `discover -> stream` contract over the remote catalog and the
/// local directory tree, so the coordinator can drive either one.
///
/// `read_file` borrows a reader to the consumer for the duration of one
/// retrieval: chunks arrive in order and are never re-delivered. Sources
/// release whatever backs the stream (a pooled session, a file handle) on
/// every exit path.
pub trait FileSource: Send + Sync {
    /// Directory labels in the order they should be processed.
    fn list_directories(&self) -> SearchResult<Vec<String>>;

    /// Files within one directory, already filtered to XML and the
    /// discovery glob.
    fn list_files(&self, dir: &str) -> SearchResult<Vec<FileEntry>>;

    /// Stream one file's bytes into `consume`.
    fn read_file(
        &self,
        dir: &str,
        name: &str,
        consume: &mut dyn FnMut(&mut dyn Read) -> std::io::Result<()>,
    ) -> SearchResult<()>;

    /// Full path of the file as this source addresses it, for reporting.
    fn display_path(&self, dir: &str, name: &str) -> String;

    /// Tear down and rebuild whatever backs the source. Called by the
    /// retry policy before another attempt; a no-op for local trees.
    fn refresh(&self) {}
}
