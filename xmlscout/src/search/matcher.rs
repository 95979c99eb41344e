use std::io::{self, Read};

use aho_corasick::AhoCorasick;
use dashmap::DashMap;
use once_cell::sync::Lazy;
use regex::{Regex, RegexBuilder};
use tracing::{debug, warn};

use crate::errors::{SearchError, SearchResult};
use crate::results::{MatchKind, MatchRecord};
use crate::search::{EngineError, MatchEngine};

/// Compiled regexes keyed by case flag and pattern text, shared across
/// engines so repeated runs skip recompilation.
static REGEX_CACHE: Lazy<DashMap<String, Regex>> = Lazy::new(DashMap::new);

/// Bytes of surrounding text kept on each side of a hit.
const CONTEXT_BYTES: usize = 50;

/// How keyword scanning is executed for a window of text.
enum TextStrategy {
    /// Single-pass automaton over all keywords.
    Automaton(AhoCorasick),
    /// Per-keyword substring scan, used when the automaton cannot be built.
    Literal(Vec<String>),
}

/// Occurrence summary for one keyword in find-all mode.
#[derive(Debug, PartialEq)]
pub struct KeywordCount {
    pub keyword: String,
    pub count: usize,
    pub first_line: usize,
}

/// Multi-keyword matcher with leftmost-first tie breaking.
///
/// Case-insensitive matching folds ASCII only, which keeps byte offsets
/// into the original text valid for line and context computation.
pub struct KeywordMatcher {
    keywords: Vec<String>,
    case_sensitive: bool,
    strategy: TextStrategy,
}

impl KeywordMatcher {
    pub fn new(keywords: &[String], case_sensitive: bool) -> SearchResult<Self> {
        if keywords.is_empty() {
            return Err(SearchError::NoPatterns);
        }
        let keywords: Vec<String> = keywords.to_vec();
        let strategy = match AhoCorasick::builder()
            .ascii_case_insensitive(!case_sensitive)
            .match_kind(aho_corasick::MatchKind::LeftmostFirst)
            .build(&keywords)
        {
            Ok(ac) => TextStrategy::Automaton(ac),
            Err(e) => {
                warn!("automaton build failed, falling back to literal scan: {}", e);
                Self::literal_strategy(&keywords, case_sensitive)
            }
        };
        Ok(KeywordMatcher {
            keywords,
            case_sensitive,
            strategy,
        })
    }

    fn literal_strategy(keywords: &[String], case_sensitive: bool) -> TextStrategy {
        let folded = keywords
            .iter()
            .map(|k| {
                if case_sensitive {
                    k.clone()
                } else {
                    k.to_ascii_lowercase()
                }
            })
            .collect();
        TextStrategy::Literal(folded)
    }

    #[cfg(test)]
    fn with_literal_scan(keywords: &[String], case_sensitive: bool) -> Self {
        KeywordMatcher {
            keywords: keywords.to_vec(),
            case_sensitive,
            strategy: Self::literal_strategy(keywords, case_sensitive),
        }
    }

    /// Earliest hit in `text` as `(start, end, keyword_index)`.
    pub fn find_first(&self, text: &str) -> Option<(usize, usize, usize)> {
        match &self.strategy {
            TextStrategy::Automaton(ac) => ac
                .find(text)
                .map(|m| (m.start(), m.end(), m.pattern().as_usize())),
            TextStrategy::Literal(folded) => {
                let hay = self.fold(text);
                let mut best: Option<(usize, usize, usize)> = None;
                for (idx, keyword) in folded.iter().enumerate() {
                    if keyword.is_empty() {
                        continue;
                    }
                    if let Some(pos) = hay.find(keyword) {
                        let candidate = (pos, pos + keyword.len(), idx);
                        match best {
                            Some((start, _, _)) if start <= pos => {}
                            _ => best = Some(candidate),
                        }
                    }
                }
                best
            }
        }
    }

    /// Non-overlapping occurrence counts per keyword, with the line of the
    /// first occurrence. Keywords absent from `text` are omitted.
    pub fn count_all(&self, text: &str) -> Vec<KeywordCount> {
        let hay = self.fold(text);
        let mut counts = Vec::new();
        for keyword in &self.keywords {
            let needle = if self.case_sensitive {
                keyword.clone()
            } else {
                keyword.to_ascii_lowercase()
            };
            if needle.is_empty() {
                continue;
            }
            let count = hay.matches(needle.as_str()).count();
            if count == 0 {
                continue;
            }
            let pos = match hay.find(needle.as_str()) {
                Some(p) => p,
                None => continue,
            };
            counts.push(KeywordCount {
                keyword: keyword.clone(),
                count,
                first_line: line_of(&hay, pos),
            });
        }
        counts
    }

    pub fn keyword(&self, index: usize) -> &str {
        &self.keywords[index]
    }

    fn fold(&self, text: &str) -> String {
        if self.case_sensitive {
            text.to_string()
        } else {
            text.to_ascii_lowercase()
        }
    }
}

/// Regex matcher over one or more patterns. A pattern that fails to compile
/// is demoted to an escaped literal so a typo still searches for something
/// predictable instead of aborting the run.
pub struct RegexMatcher {
    patterns: Vec<(String, Regex)>,
}

impl RegexMatcher {
    pub fn new(patterns: &[String], case_sensitive: bool) -> SearchResult<Self> {
        if patterns.is_empty() {
            return Err(SearchError::NoPatterns);
        }
        let mut compiled = Vec::with_capacity(patterns.len());
        for pattern in patterns {
            let regex = Self::compile(pattern, case_sensitive)?;
            compiled.push((pattern.clone(), regex));
        }
        Ok(RegexMatcher { patterns: compiled })
    }

    fn compile(pattern: &str, case_sensitive: bool) -> SearchResult<Regex> {
        let key = format!("{}:{}", case_sensitive, pattern);
        if let Some(cached) = REGEX_CACHE.get(&key) {
            debug!("regex cache hit for pattern: {}", pattern);
            return Ok(cached.clone());
        }
        let regex = match RegexBuilder::new(pattern)
            .case_insensitive(!case_sensitive)
            .build()
        {
            Ok(r) => r,
            Err(e) => {
                warn!(
                    "invalid regex {:?}, searching for it as a literal: {}",
                    pattern, e
                );
                RegexBuilder::new(&regex::escape(pattern))
                    .case_insensitive(!case_sensitive)
                    .build()
                    .map_err(|e| SearchError::InvalidPattern(e.to_string()))?
            }
        };
        REGEX_CACHE.insert(key, regex.clone());
        Ok(regex)
    }

    /// Hit of the first declared pattern that matches anywhere in `text`,
    /// as `(start, end, pattern_index)`. Patterns are tried in declaration
    /// order; a later pattern is only consulted when every earlier one
    /// missed, regardless of match position.
    pub fn find_first(&self, text: &str) -> Option<(usize, usize, usize)> {
        for (idx, (_, regex)) in self.patterns.iter().enumerate() {
            if let Some(m) = regex.find(text) {
                return Some((m.start(), m.end(), idx));
            }
        }
        None
    }

    /// Occurrence counts per pattern, with the line of the first occurrence.
    pub fn count_all(&self, text: &str) -> Vec<KeywordCount> {
        let mut counts = Vec::new();
        for (pattern, regex) in &self.patterns {
            let count = regex.find_iter(text).count();
            if count == 0 {
                continue;
            }
            let pos = match regex.find(text) {
                Some(m) => m.start(),
                None => continue,
            };
            counts.push(KeywordCount {
                keyword: pattern.clone(),
                count,
                first_line: line_of(text, pos),
            });
        }
        counts
    }

    pub fn pattern(&self, index: usize) -> &str {
        &self.patterns[index].0
    }
}

/// A hit produced while probing one window.
pub struct ChunkHit {
    pub matched: String,
    pub line_number: usize,
}

/// Streams a reader through fixed-size windows with overlap so a hit
/// straddling two reads is still seen whole.
///
/// Window boundaries are advisory: a window may run slightly past
/// `chunk_size` to the end of the read that filled it.
pub struct ChunkScanner {
    chunk_size: usize,
    overlap: usize,
}

impl ChunkScanner {
    pub fn new(chunk_size: usize, overlap: usize) -> SearchResult<Self> {
        if chunk_size == 0 || overlap >= chunk_size {
            return Err(SearchError::config_error(format!(
                "overlap_size ({}) must be smaller than chunk_size ({})",
                overlap, chunk_size
            )));
        }
        Ok(ChunkScanner {
            chunk_size,
            overlap,
        })
    }

    /// Feed windows to `probe` until it reports a hit or the stream ends.
    /// `probe` receives the window text and the number of newlines consumed
    /// before the window started. On a hit the rest of the reader is drained
    /// so the underlying data connection completes cleanly.
    pub fn scan<F>(&self, reader: &mut dyn Read, mut probe: F) -> io::Result<Option<ChunkHit>>
    where
        F: FnMut(&str, usize) -> Option<ChunkHit>,
    {
        let mut buf: Vec<u8> = Vec::with_capacity(self.chunk_size);
        let mut scratch = [0u8; 8192];
        let mut lines_before = 0usize;
        let mut eof = false;
        loop {
            while !eof && buf.len() < self.chunk_size {
                let n = reader.read(&mut scratch)?;
                if n == 0 {
                    eof = true;
                    break;
                }
                buf.extend_from_slice(&scratch[..n]);
            }
            if buf.is_empty() {
                return Ok(None);
            }
            let window = String::from_utf8_lossy(&buf);
            if let Some(hit) = probe(&window, lines_before) {
                io::copy(reader, &mut io::sink())?;
                return Ok(Some(hit));
            }
            if eof {
                return Ok(None);
            }
            let step = (self.chunk_size - self.overlap).min(buf.len());
            lines_before += count_newlines(&buf[..step]);
            buf.drain(..step);
        }
    }
}

/// Keyword search over a stream, one record per file in early-stop mode or
/// one record per matching keyword in find-all mode.
pub struct TextEngine {
    matcher: KeywordMatcher,
    scanner: ChunkScanner,
    early_stop: bool,
}

impl TextEngine {
    pub fn new(
        keywords: &[String],
        case_sensitive: bool,
        chunk_size: usize,
        overlap: usize,
        early_stop: bool,
    ) -> SearchResult<Self> {
        Ok(TextEngine {
            matcher: KeywordMatcher::new(keywords, case_sensitive)?,
            scanner: ChunkScanner::new(chunk_size, overlap)?,
            early_stop,
        })
    }
}

impl MatchEngine for TextEngine {
    fn search_stream(
        &self,
        reader: &mut dyn Read,
        date_dir: &str,
        filename: &str,
    ) -> Result<Vec<MatchRecord>, EngineError> {
        if self.early_stop {
            let hit = self.scanner.scan(reader, |window, lines_before| {
                self.matcher.find_first(window).map(|(start, end, _)| ChunkHit {
                    matched: trimmed_context(window, start, end),
                    line_number: lines_before + line_of(window, start),
                })
            })?;
            Ok(hit
                .map(|h| {
                    vec![MatchRecord::new(
                        date_dir,
                        filename,
                        MatchKind::Text,
                        h.matched,
                        h.line_number,
                    )]
                })
                .unwrap_or_default())
        } else {
            let text = read_all(reader)?;
            Ok(self
                .matcher
                .count_all(&text)
                .into_iter()
                .map(|c| {
                    MatchRecord::new(date_dir, filename, MatchKind::Text, c.keyword, c.first_line)
                        .with_occurrences(c.count)
                })
                .collect())
        }
    }
}

/// Regex search over a stream, mirroring `TextEngine`'s two modes.
pub struct RegexEngine {
    matcher: RegexMatcher,
    scanner: ChunkScanner,
    early_stop: bool,
}

impl RegexEngine {
    pub fn new(
        patterns: &[String],
        case_sensitive: bool,
        chunk_size: usize,
        overlap: usize,
        early_stop: bool,
    ) -> SearchResult<Self> {
        Ok(RegexEngine {
            matcher: RegexMatcher::new(patterns, case_sensitive)?,
            scanner: ChunkScanner::new(chunk_size, overlap)?,
            early_stop,
        })
    }
}

impl MatchEngine for RegexEngine {
    fn search_stream(
        &self,
        reader: &mut dyn Read,
        date_dir: &str,
        filename: &str,
    ) -> Result<Vec<MatchRecord>, EngineError> {
        if self.early_stop {
            let hit = self.scanner.scan(reader, |window, lines_before| {
                self.matcher.find_first(window).map(|(start, end, _)| ChunkHit {
                    matched: window[start..end].to_string(),
                    line_number: lines_before + line_of(window, start),
                })
            })?;
            Ok(hit
                .map(|h| {
                    vec![MatchRecord::new(
                        date_dir,
                        filename,
                        MatchKind::Regex,
                        h.matched,
                        h.line_number,
                    )]
                })
                .unwrap_or_default())
        } else {
            let text = read_all(reader)?;
            Ok(self
                .matcher
                .count_all(&text)
                .into_iter()
                .map(|c| {
                    MatchRecord::new(date_dir, filename, MatchKind::Regex, c.keyword, c.first_line)
                        .with_occurrences(c.count)
                })
                .collect())
        }
    }
}

fn read_all(reader: &mut dyn Read) -> io::Result<String> {
    let mut bytes = Vec::new();
    reader.read_to_end(&mut bytes)?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

fn count_newlines(bytes: &[u8]) -> usize {
    bytes.iter().filter(|&&b| b == b'\n').count()
}

/// 1-based line number of byte offset `pos` within `text`.
fn line_of(text: &str, pos: usize) -> usize {
    1 + count_newlines(&text.as_bytes()[..pos])
}

/// A short excerpt around the hit, clipped to character boundaries and
/// trimmed of surrounding whitespace.
fn trimmed_context(text: &str, start: usize, end: usize) -> String {
    let mut lo = start.saturating_sub(CONTEXT_BYTES);
    while !text.is_char_boundary(lo) {
        lo -= 1;
    }
    let mut hi = (end + CONTEXT_BYTES).min(text.len());
    while !text.is_char_boundary(hi) {
        hi += 1;
    }
    text[lo..hi].trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn keywords(words: &[&str]) -> Vec<String> {
        words.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_keyword_find_first_case_insensitive() {
        let m = KeywordMatcher::new(&keywords(&["NEEDLE"]), false).unwrap();
        let hit = m.find_first("some needle here").unwrap();
        assert_eq!(hit, (5, 11, 0));
    }

    #[test]
    fn test_keyword_find_first_case_sensitive_misses() {
        let m = KeywordMatcher::new(&keywords(&["NEEDLE"]), true).unwrap();
        assert!(m.find_first("some needle here").is_none());
    }

    #[test]
    fn test_keyword_leftmost_wins_across_patterns() {
        let m = KeywordMatcher::new(&keywords(&["beta", "alpha"]), true).unwrap();
        let (start, _, idx) = m.find_first("alpha then beta").unwrap();
        assert_eq!(start, 0);
        assert_eq!(m.keyword(idx), "alpha");
    }

    #[test]
    fn test_literal_scan_matches_automaton_behavior() {
        let text = "alpha then beta";
        let auto = KeywordMatcher::new(&keywords(&["beta", "ALPHA"]), false).unwrap();
        let lit = KeywordMatcher::with_literal_scan(&keywords(&["beta", "ALPHA"]), false);
        assert_eq!(auto.find_first(text), lit.find_first(text));
    }

    #[test]
    fn test_keyword_count_all() {
        let m = KeywordMatcher::new(&keywords(&["ab", "zz"]), false).unwrap();
        let counts = m.count_all("ab\nAB ab\nnothing");
        assert_eq!(counts.len(), 1);
        assert_eq!(counts[0].keyword, "ab");
        assert_eq!(counts[0].count, 3);
        assert_eq!(counts[0].first_line, 1);
    }

    #[test]
    fn test_empty_keyword_list_rejected() {
        assert!(matches!(
            KeywordMatcher::new(&[], false),
            Err(SearchError::NoPatterns)
        ));
    }

    #[test]
    fn test_regex_find_first() {
        let m = RegexMatcher::new(&keywords(&[r"\d{4}"]), true).unwrap();
        let (start, end, _) = m.find_first("id 2024 done").unwrap();
        assert_eq!((start, end), (3, 7));
    }

    #[test]
    fn test_regex_declaration_order_wins_over_position() {
        // Keyword mode picks the earliest offset; regex mode picks the
        // first declared pattern that matches at all.
        let m = RegexMatcher::new(&keywords(&["beta", "alpha"]), true).unwrap();
        let (start, end, idx) = m.find_first("alpha then beta").unwrap();
        assert_eq!(m.pattern(idx), "beta");
        assert_eq!((start, end), (11, 15));
    }

    #[test]
    fn test_invalid_regex_falls_back_to_literal() {
        let m = RegexMatcher::new(&keywords(&["a(b"]), true).unwrap();
        assert!(m.find_first("find a(b here").is_some());
        assert!(m.find_first("find ab here").is_none());
    }

    #[test]
    fn test_regex_count_all() {
        let m = RegexMatcher::new(&keywords(&[r"x\d"]), true).unwrap();
        let counts = m.count_all("x1\nx2 x3");
        assert_eq!(counts[0].count, 3);
        assert_eq!(counts[0].first_line, 1);
    }

    #[test]
    fn test_scanner_rejects_bad_overlap() {
        assert!(ChunkScanner::new(64, 64).is_err());
        assert!(ChunkScanner::new(0, 0).is_err());
        assert!(ChunkScanner::new(64, 16).is_ok());
    }

    #[test]
    fn test_text_engine_finds_match_across_chunk_boundary() {
        // Window of 16 bytes with 8 of overlap; the keyword sits right on
        // the first boundary.
        let engine = TextEngine::new(&keywords(&["boundary"]), true, 16, 8, true).unwrap();
        let data = "aaaaaaaaaaaaboundaryaaaaaaaaaaaa";
        let records = engine
            .search_stream(&mut Cursor::new(data), "20240101", "a.xml")
            .unwrap();
        assert_eq!(records.len(), 1);
        assert!(records[0].matched.contains("boundary"));
    }

    #[test]
    fn test_text_engine_line_numbers_across_chunks() {
        let mut data = String::new();
        for i in 0..200 {
            data.push_str(&format!("line number {}\n", i));
        }
        data.push_str("the needle is here\n");
        let engine = TextEngine::new(&keywords(&["needle"]), true, 256, 32, true).unwrap();
        let records = engine
            .search_stream(&mut Cursor::new(data.clone()), "20240101", "a.xml")
            .unwrap();
        assert_eq!(records[0].line_number, 201);
    }

    #[test]
    fn test_text_engine_early_stop_single_record() {
        let engine = TextEngine::new(&keywords(&["hit"]), true, 64, 8, true).unwrap();
        let records = engine
            .search_stream(&mut Cursor::new("hit hit hit"), "20240101", "a.xml")
            .unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].occurrences, 0);
    }

    #[test]
    fn test_text_engine_find_all_records_per_keyword() {
        let engine =
            TextEngine::new(&keywords(&["one", "two", "absent"]), true, 64, 8, false).unwrap();
        let records = engine
            .search_stream(&mut Cursor::new("one two one"), "20240101", "a.xml")
            .unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].matched, "one");
        assert_eq!(records[0].occurrences, 2);
        assert_eq!(records[1].matched, "two");
        assert_eq!(records[1].occurrences, 1);
    }

    #[test]
    fn test_text_engine_no_match_returns_empty() {
        let engine = TextEngine::new(&keywords(&["zzz"]), true, 64, 8, true).unwrap();
        let records = engine
            .search_stream(&mut Cursor::new("nothing to see"), "20240101", "a.xml")
            .unwrap();
        assert!(records.is_empty());
    }

    #[test]
    fn test_regex_engine_reports_matched_text() {
        let engine = RegexEngine::new(&keywords(&[r"<id>\d+</id>"]), true, 64, 8, true).unwrap();
        let records = engine
            .search_stream(
                &mut Cursor::new("<doc><id>42</id></doc>"),
                "20240102",
                "b.xml",
            )
            .unwrap();
        assert_eq!(records[0].matched, "<id>42</id>");
        assert_eq!(records[0].kind, MatchKind::Regex);
    }

    #[test]
    fn test_trimmed_context_respects_utf8_boundaries() {
        let text = "ééééééé needle ééééééé";
        let start = text.find("needle").unwrap();
        let snippet = trimmed_context(text, start, start + 6);
        assert!(snippet.contains("needle"));
    }

    #[test]
    fn test_scanner_drains_reader_after_hit() {
        let engine = TextEngine::new(&keywords(&["early"]), true, 16, 4, true).unwrap();
        let data = format!("early{}", "x".repeat(4096));
        let mut cursor = Cursor::new(data.clone());
        engine
            .search_stream(&mut cursor, "20240101", "a.xml")
            .unwrap();
        assert_eq!(cursor.position() as usize, data.len());
    }
}
