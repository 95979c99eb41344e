pub mod coordinator;
pub mod matcher;
pub mod xpath;

pub use coordinator::{SearchCoordinator, SearchReport};

use std::io::Read;

use crate::config::{SearchConfig, SearchMode};
use crate::errors::SearchResult;
use crate::results::MatchRecord;
use matcher::{RegexEngine, TextEngine};
use xpath::XPathEngine;

/// Errors raised while evaluating one stream.
///
/// `Io` failures come from the underlying transport and are candidates for
/// the coordinator's retry policy; `Content` failures (malformed XML) are
/// recorded and the file is skipped, never retried.
#[derive(Debug)]
pub enum EngineError {
    Io(std::io::Error),
    Content(String),
}

impl From<std::io::Error> for EngineError {
    fn from(err: std::io::Error) -> Self {
        EngineError::Io(err)
    }
}

/// A content-matching strategy consuming one byte stream.
///
/// Implementations return at most one record per pattern in find-all mode
/// and at most one record total otherwise. Engines fully drain the reader
/// even after an early hit, so a pooled data connection can complete
/// cleanly.
pub trait MatchEngine: Send + Sync {
    fn search_stream(
        &self,
        reader: &mut dyn Read,
        date_dir: &str,
        filename: &str,
    ) -> Result<Vec<MatchRecord>, EngineError>;
}

/// Build the engine for the configured mode. Filename mode needs no content
/// engine and yields `None`.
pub fn build_engine(config: &SearchConfig) -> SearchResult<Option<Box<dyn MatchEngine>>> {
    let engine: Box<dyn MatchEngine> = match config.mode {
        SearchMode::Text => Box::new(TextEngine::new(
            &config.patterns,
            config.case_sensitive,
            config.stream.chunk_size,
            config.stream.overlap_size,
            !config.find_all,
        )?),
        SearchMode::Regex => Box::new(RegexEngine::new(
            &config.patterns,
            config.case_sensitive,
            config.stream.chunk_size,
            config.stream.overlap_size,
            !config.find_all,
        )?),
        SearchMode::Xpath => Box::new(XPathEngine::new(&config.patterns)?),
        SearchMode::Filename => return Ok(None),
    };
    Ok(Some(engine))
}
