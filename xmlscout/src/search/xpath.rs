use std::io::{self, BufReader, Read};

use quick_xml::events::Event;
use quick_xml::Reader;
use tracing::debug;

use crate::errors::{SearchError, SearchResult};
use crate::results::{MatchKind, MatchRecord};
use crate::search::{EngineError, MatchEngine};

/// One parsed path expression from the restricted XPath subset.
///
/// Only element-name paths are supported, in three shapes:
/// `//a/b` matches any element whose path ends with `a/b`, `/a/b` matches
/// only the exact path from the document root, and a bare `a/b` matches a
/// non-root element whose path ends with `a/b`.
#[derive(Debug, Clone, PartialEq)]
enum PathExpr {
    Descendant(Vec<String>),
    Absolute(Vec<String>),
    Child(Vec<String>),
}

impl PathExpr {
    fn parse(raw: &str) -> SearchResult<Self> {
        let (variant, body): (fn(Vec<String>) -> PathExpr, &str) =
            if let Some(rest) = raw.strip_prefix("//") {
                (PathExpr::Descendant, rest)
            } else if let Some(rest) = raw.strip_prefix('/') {
                (PathExpr::Absolute, rest)
            } else {
                (PathExpr::Child, raw)
            };
        let steps: Vec<String> = body
            .split('/')
            .map(str::trim)
            .map(String::from)
            .collect();
        if steps.iter().any(|s| s.is_empty()) {
            return Err(SearchError::invalid_pattern(format!(
                "empty step in path expression {:?}",
                raw
            )));
        }
        Ok(variant(steps))
    }

    /// Does the element whose ancestry (root first, element last) is
    /// `stack` satisfy this expression?
    fn matches(&self, stack: &[String]) -> bool {
        match self {
            PathExpr::Descendant(steps) => stack.ends_with(steps),
            PathExpr::Absolute(steps) => stack == steps.as_slice(),
            PathExpr::Child(steps) => stack.ends_with(steps) && stack.len() > steps.len(),
        }
    }
}

/// Structural matcher over a streamed XML document.
///
/// Tracks the open-element stack with a pull parser and reports the first
/// element satisfying any expression. Documents that fail to parse are
/// content errors, not transport errors.
pub struct XPathEngine {
    expressions: Vec<(String, PathExpr)>,
}

impl XPathEngine {
    pub fn new(patterns: &[String]) -> SearchResult<Self> {
        if patterns.is_empty() {
            return Err(SearchError::NoPatterns);
        }
        let mut expressions = Vec::with_capacity(patterns.len());
        for raw in patterns {
            expressions.push((raw.clone(), PathExpr::parse(raw)?));
        }
        Ok(XPathEngine { expressions })
    }

    fn first_match(&self, stack: &[String]) -> Option<&str> {
        self.expressions
            .iter()
            .find(|(_, expr)| expr.matches(stack))
            .map(|(raw, _)| raw.as_str())
    }
}

impl MatchEngine for XPathEngine {
    fn search_stream(
        &self,
        reader: &mut dyn Read,
        date_dir: &str,
        filename: &str,
    ) -> Result<Vec<MatchRecord>, EngineError> {
        let mut xml = Reader::from_reader(BufReader::new(reader));
        let mut buf = Vec::new();
        let mut stack: Vec<String> = Vec::new();
        let mut hit: Option<String> = None;
        loop {
            match xml.read_event_into(&mut buf) {
                Ok(Event::Start(ref e)) => {
                    stack.push(String::from_utf8_lossy(e.name().as_ref()).into_owned());
                    if let Some(raw) = self.first_match(&stack) {
                        hit = Some(raw.to_string());
                        break;
                    }
                }
                Ok(Event::Empty(ref e)) => {
                    stack.push(String::from_utf8_lossy(e.name().as_ref()).into_owned());
                    let matched = self.first_match(&stack).map(str::to_string);
                    stack.pop();
                    if let Some(raw) = matched {
                        hit = Some(raw);
                        break;
                    }
                }
                Ok(Event::End(_)) => {
                    stack.pop();
                }
                Ok(Event::Eof) => break,
                Ok(_) => {}
                Err(e) => {
                    debug!("xml parse failed in {}/{}: {}", date_dir, filename, e);
                    drain(xml.into_inner())?;
                    return Err(EngineError::Content(format!("malformed XML: {}", e)));
                }
            }
            buf.clear();
        }
        drain(xml.into_inner())?;
        Ok(hit
            .map(|raw| {
                vec![MatchRecord::new(
                    date_dir,
                    filename,
                    MatchKind::XPath,
                    format!("XPath: {}", raw),
                    0,
                )]
            })
            .unwrap_or_default())
    }
}

fn drain<R: Read>(mut reader: R) -> io::Result<u64> {
    io::copy(&mut reader, &mut io::sink())
}
