use serde::Serialize;
use std::fmt;

/// What kind of matching produced a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum MatchKind {
    Text,
    Regex,
    XPath,
    Filename,
}

impl fmt::Display for MatchKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            MatchKind::Text => "Text Match",
            MatchKind::Regex => "Regex Match",
            MatchKind::XPath => "XPath Match",
            MatchKind::Filename => "Filename Match",
        };
        f.write_str(label)
    }
}

/// A single match found in one file. Immutable once created.
///
/// `line_number` is 1-based and 0 when not applicable (XPath and filename
/// matches). `occurrences` is only populated by the find-all code path and
/// stays 0 otherwise.
#[derive(Debug, Clone, Serialize)]
pub struct MatchRecord {
    pub date_dir: String,
    pub filename: String,
    /// Full path of the file as the source addresses it
    pub file_path: String,
    pub kind: MatchKind,
    /// Matched text or a context snippet around the hit
    pub matched: String,
    pub line_number: usize,
    pub occurrences: usize,
}

impl MatchRecord {
    pub fn new(
        date_dir: impl Into<String>,
        filename: impl Into<String>,
        kind: MatchKind,
        matched: impl Into<String>,
        line_number: usize,
    ) -> Self {
        let date_dir = date_dir.into();
        let filename = filename.into();
        let file_path = format!("{}/{}", date_dir, filename);
        Self {
            date_dir,
            filename,
            file_path,
            kind,
            matched: matched.into(),
            line_number,
            occurrences: 0,
        }
    }

    pub fn with_occurrences(mut self, occurrences: usize) -> Self {
        self.occurrences = occurrences;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_creation() {
        let record = MatchRecord::new("20240801", "a.xml", MatchKind::Text, "context", 42);
        assert_eq!(record.date_dir, "20240801");
        assert_eq!(record.filename, "a.xml");
        assert_eq!(record.file_path, "20240801/a.xml");
        assert_eq!(record.kind, MatchKind::Text);
        assert_eq!(record.line_number, 42);
        assert_eq!(record.occurrences, 0);
    }

    #[test]
    fn test_occurrences() {
        let record = MatchRecord::new("20240801", "a.xml", MatchKind::Text, "keyword", 3)
            .with_occurrences(7);
        assert_eq!(record.occurrences, 7);
    }

    #[test]
    fn test_kind_labels() {
        assert_eq!(MatchKind::Text.to_string(), "Text Match");
        assert_eq!(MatchKind::Regex.to_string(), "Regex Match");
        assert_eq!(MatchKind::XPath.to_string(), "XPath Match");
        assert_eq!(MatchKind::Filename.to_string(), "Filename Match");
    }
}
