use std::io::ErrorKind;
use std::path::PathBuf;
use suppaftp::FtpError;
use thiserror::Error;

/// Result type for search operations
pub type SearchResult<T> = Result<T, SearchError>;

/// Errors that can occur during discovery, streaming and matching.
///
/// Only configuration errors ([`SearchError::NoPatterns`],
/// [`SearchError::InvalidSourcePath`], [`SearchError::ConfigError`]) abort a
/// run. Everything else is handled per file: connection-class errors are
/// retried, the rest are recorded and skipped.
#[derive(Error, Debug)]
pub enum SearchError {
    #[error("No search patterns provided")]
    NoPatterns,
    #[error("Invalid source path: {0}")]
    InvalidSourcePath(PathBuf),
    #[error("Invalid pattern: {0}")]
    InvalidPattern(String),
    #[error("Configuration error: {0}")]
    ConfigError(String),
    #[error("Connection pool exhausted")]
    PoolExhausted,
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),
    #[error("FTP error: {0}")]
    Ftp(#[from] FtpError),
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Malformed content in {file}: {reason}")]
    Content { file: String, reason: String },
}

impl SearchError {
    pub fn invalid_source_path(path: impl Into<PathBuf>) -> Self {
        Self::InvalidSourcePath(path.into())
    }

    pub fn invalid_pattern(pattern: impl Into<String>) -> Self {
        Self::InvalidPattern(pattern.into())
    }

    pub fn config_error(msg: impl Into<String>) -> Self {
        Self::ConfigError(msg.into())
    }

    pub fn connection_failed(msg: impl Into<String>) -> Self {
        Self::ConnectionFailed(msg.into())
    }

    pub fn content(file: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Content {
            file: file.into(),
            reason: reason.into(),
        }
    }

    /// Whether this error is worth retrying with a fresh connection.
    ///
    /// Covers refused/reset/timed-out transports, a garbled control channel
    /// and pool exhaustion. Listing and content errors are not in this class.
    pub fn is_connection_error(&self) -> bool {
        match self {
            Self::PoolExhausted | Self::ConnectionFailed(_) => true,
            Self::Ftp(e) => matches!(
                e,
                FtpError::ConnectionError(_) | FtpError::BadResponse
            ),
            Self::IoError(e) => matches!(
                e.kind(),
                ErrorKind::ConnectionRefused
                    | ErrorKind::ConnectionReset
                    | ErrorKind::ConnectionAborted
                    | ErrorKind::BrokenPipe
                    | ErrorKind::TimedOut
                    | ErrorKind::UnexpectedEof
            ),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_creation() {
        let err = SearchError::invalid_source_path("/no/such/dir");
        assert!(matches!(err, SearchError::InvalidSourcePath(_)));

        let err = SearchError::invalid_pattern("[bad");
        assert!(matches!(err, SearchError::InvalidPattern(_)));

        let err = SearchError::config_error("overlap exceeds chunk size");
        assert!(matches!(err, SearchError::ConfigError(_)));

        let err = SearchError::content("a.xml", "unexpected end of document");
        assert!(matches!(err, SearchError::Content { .. }));
    }

    #[test]
    fn test_error_messages() {
        assert_eq!(
            SearchError::NoPatterns.to_string(),
            "No search patterns provided"
        );
        assert_eq!(
            SearchError::config_error("missing host").to_string(),
            "Configuration error: missing host"
        );
        assert_eq!(
            SearchError::content("a.xml", "truncated").to_string(),
            "Malformed content in a.xml: truncated"
        );
    }

    #[test]
    fn test_connection_error_classification() {
        assert!(SearchError::PoolExhausted.is_connection_error());
        assert!(SearchError::connection_failed("refused").is_connection_error());

        let reset = std::io::Error::new(ErrorKind::ConnectionReset, "reset");
        assert!(SearchError::IoError(reset).is_connection_error());

        let timeout = std::io::Error::new(ErrorKind::TimedOut, "timed out");
        assert!(SearchError::IoError(timeout).is_connection_error());

        let not_found = std::io::Error::new(ErrorKind::NotFound, "missing");
        assert!(!SearchError::IoError(not_found).is_connection_error());

        assert!(!SearchError::NoPatterns.is_connection_error());
        assert!(!SearchError::content("a.xml", "bad").is_connection_error());
    }
}
