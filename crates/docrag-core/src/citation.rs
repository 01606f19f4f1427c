//! Citation markers.
//!
//! The prompt assembler tags every included chunk with a `[^n]` marker.
//! After generation, [`resolve`] keeps markers that map to an injected
//! chunk, strips any the model invented, and groups the genuine ones by
//! source. [`MarkerFilter`] applies the same stripping to fragments while
//! they stream, so `token` events never carry an invented marker.

use std::collections::HashSet;
use std::sync::LazyLock;

use regex::{Captures, Regex};
use serde::Serialize;

static MARKER: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[ \t]*\[\^(\d+)\]").unwrap());

/// One entry of the citation table built during prompt assembly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Citation {
    /// `n` in `[^n]`, starting at 1.
    pub marker: usize,
    pub source_id: String,
    pub chunk_id: String,
}

/// A source the answer actually cites, with every marker pointing at it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SourceCitation {
    pub source_id: String,
    pub markers: Vec<usize>,
    pub chunk_ids: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolved {
    /// Answer with unknown markers removed.
    pub answer: String,
    /// Cited sources, in order of first citation.
    pub sources: Vec<SourceCitation>,
    /// Number of marker occurrences that were stripped.
    pub stripped: usize,
}

/// Render marker `n` as it appears in prompts and answers.
pub fn marker(n: usize) -> String {
    format!("[^{}]", n)
}

/// Strip markers absent from `table` and collect the cited sources.
pub fn resolve(answer: &str, table: &[Citation]) -> Resolved {
    let mut sources: Vec<SourceCitation> = Vec::new();
    let mut stripped = 0;

    let cleaned = MARKER.replace_all(answer, |caps: &Captures| {
        let known = caps[1]
            .parse::<usize>()
            .ok()
            .and_then(|n| table.iter().find(|c| c.marker == n));
        match known {
            Some(citation) => {
                match sources
                    .iter_mut()
                    .find(|s| s.source_id == citation.source_id)
                {
                    Some(source) => {
                        if !source.markers.contains(&citation.marker) {
                            source.markers.push(citation.marker);
                            source.chunk_ids.push(citation.chunk_id.clone());
                        }
                    }
                    None => sources.push(SourceCitation {
                        source_id: citation.source_id.clone(),
                        markers: vec![citation.marker],
                        chunk_ids: vec![citation.chunk_id.clone()],
                    }),
                }
                caps[0].to_string()
            }
            None => {
                stripped += 1;
                String::new()
            }
        }
    });

    Resolved {
        answer: cleaned.into_owned(),
        sources,
        stripped,
    }
}

/// Strips unknown markers from a fragment stream.
///
/// A fragment may end inside a marker (`... [^` then `4] ...`), so any
/// trailing text that could still become one is held until the next
/// fragment settles it. Trailing spaces and tabs are held too, since they
/// go with a marker that gets stripped.
#[derive(Debug, Clone)]
pub struct MarkerFilter {
    known: HashSet<usize>,
    held: String,
    stripped: usize,
}

impl MarkerFilter {
    pub fn new(table: &[Citation]) -> Self {
        Self {
            known: table.iter().map(|c| c.marker).collect(),
            held: String::new(),
            stripped: 0,
        }
    }

    /// Feed one fragment; returns the text that is safe to forward now.
    pub fn push(&mut self, fragment: &str) -> String {
        self.held.push_str(fragment);
        let tail = self.held.split_off(pending_start(&self.held));
        let ready = std::mem::replace(&mut self.held, tail);
        self.scrub(&ready)
    }

    /// Release whatever is still held at end of stream.
    pub fn finish(&mut self) -> String {
        let rest = std::mem::take(&mut self.held);
        self.scrub(&rest)
    }

    /// Marker occurrences removed so far.
    pub fn stripped(&self) -> usize {
        self.stripped
    }

    fn scrub(&mut self, text: &str) -> String {
        let known = &self.known;
        let mut stripped = 0;
        let cleaned = MARKER.replace_all(text, |caps: &Captures| {
            match caps[1].parse::<usize>() {
                Ok(n) if known.contains(&n) => caps[0].to_string(),
                _ => {
                    stripped += 1;
                    String::new()
                }
            }
        });
        self.stripped += stripped;
        cleaned.into_owned()
    }
}

/// Byte offset where the undecided tail of `text` begins: an unfinished
/// `[`, `[^` or `[^12` plus the blanks before it, or just trailing blanks.
fn pending_start(text: &str) -> usize {
    let mut end = text.len();
    if let Some(open) = text.rfind('[') {
        let rest = &text[open + 1..];
        let unfinished = match rest.strip_prefix('^') {
            Some(digits) => digits.bytes().all(|b| b.is_ascii_digit()),
            None => rest.is_empty(),
        };
        if unfinished {
            end = open;
        }
    }
    text[..end].trim_end_matches([' ', '\t']).len()
}
