//! Code-fence-aware document chunker.
//!
//! Splits a [`Document`] body into [`Chunk`]s of at most `max_chars`
//! characters, with `overlap_chars` of trailing prose carried into the next
//! chunk. Fenced code blocks are atomic: a chunk boundary never falls
//! inside one, and a block larger than `max_chars` becomes a chunk of its
//! own regardless of the limit.
//!
//! # Algorithm
//!
//! 1. Scan the body once, recording fenced code regions (line-start
//!    ```` ``` ```` / `~~~` fences and inline ```` ``` ```` runs), Markdown
//!    headings, and candidate cut positions ranked by tier: section
//!    (heading, blank line, code-block edge), line, sentence, word.
//! 2. From the current start, if the rest fits in `max_chars`, emit it.
//! 3. Otherwise take the limit position `start + max_chars`. If it lands
//!    inside a code region that begins after `start`, pull the limit back
//!    to the region start; if the region begins at `start`, emit the whole
//!    region as one chunk.
//! 4. Cut at the latest best-tier candidate in the back half of the window,
//!    then anywhere in the window, else hard-cut at the limit.
//! 5. Start the next chunk `overlap_chars` before the cut, snapped forward
//!    to a word start and never reaching back into a code region.
//!
//! Chunk ids are derived from `(source_id, ordinal)`, so re-chunking an
//! unchanged document reproduces the same ids and text.
//!
//! # Example
//!
//! ```rust
//! use docrag_core::chunk::{chunk_text, ChunkParams};
//!
//! let out = chunk_text("guide.md", "Hello world.\n\nSecond paragraph.", &ChunkParams::default());
//! assert_eq!(out.chunks.len(), 1);
//! assert_eq!(out.chunks[0].metadata.chunk_ordinal, 0);
//! ```

use std::sync::LazyLock;

use regex::Regex;
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::error::DataQualityWarning;
use crate::models::{Chunk, ChunkMetadata, Document};

/// Approximate characters-per-token ratio used when sizes are configured in tokens.
pub const CHARS_PER_TOKEN: usize = 4;

static PY_DEF: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^\s*(?:async\s+)?def\s+(\w+)\s*\(").unwrap());
static PY_CLASS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^\s*class\s+(\w+)\s*[(:]").unwrap());

/// Size limits for one chunking run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkParams {
    /// Target maximum characters per chunk (code blocks may exceed it).
    pub max_chars: usize,
    /// Characters of trailing context repeated at the start of the next chunk.
    pub overlap_chars: usize,
}

impl ChunkParams {
    pub fn from_tokens(max_tokens: usize, overlap_tokens: usize) -> Self {
        Self {
            max_chars: max_tokens * CHARS_PER_TOKEN,
            overlap_chars: overlap_tokens * CHARS_PER_TOKEN,
        }
    }

    fn normalized(&self) -> Self {
        let max_chars = self.max_chars.max(1);
        Self {
            max_chars,
            overlap_chars: self.overlap_chars.min(max_chars / 2),
        }
    }
}

impl Default for ChunkParams {
    fn default() -> Self {
        Self {
            max_chars: 1500,
            overlap_chars: 200,
        }
    }
}

/// Chunks plus any non-fatal problems found in the source text.
#[derive(Debug, Clone)]
pub struct ChunkOutput {
    pub chunks: Vec<Chunk>,
    pub warnings: Vec<DataQualityWarning>,
}

/// Chunk a [`Document`]. Warnings are logged and returned.
///
/// Every chunk inherits the document's category.
pub fn chunk_document(doc: &Document, params: &ChunkParams) -> ChunkOutput {
    let mut output = chunk_text(&doc.source_id, &doc.body, params);
    if let Some(category) = &doc.category {
        for chunk in &mut output.chunks {
            chunk.metadata.category = Some(category.clone());
        }
    }
    output
}

/// Chunk raw text belonging to `source_id`.
///
/// Always returns at least one chunk; an empty body yields a single empty
/// chunk with ordinal 0.
pub fn chunk_text(source_id: &str, text: &str, params: &ChunkParams) -> ChunkOutput {
    let params = params.normalized();
    let scan = Scan::new(text);

    let mut warnings = Vec::new();
    for region in scan.regions.iter().filter(|r| !r.terminated) {
        let warning = DataQualityWarning {
            source_id: source_id.to_string(),
            offset: region.start,
            message: "unterminated code fence; treating it as running to end of document"
                .to_string(),
        };
        tracing::warn!(source_id, offset = region.start, "data quality: {}", warning.message);
        warnings.push(warning);
    }

    let mut chunks = Vec::new();
    for (start, end) in split_spans(text, &scan, &params) {
        let ordinal = chunks.len() as i64;
        chunks.push(make_chunk(source_id, ordinal, text, start, end, &scan));
    }

    if chunks.is_empty() {
        chunks.push(make_chunk(source_id, 0, text, 0, 0, &scan));
    }

    ChunkOutput { chunks, warnings }
}

/// Deterministic chunk id: the first 16 bytes of `SHA-256(source_id ‖ 0 ‖ ordinal)`.
pub fn chunk_id(source_id: &str, ordinal: i64) -> String {
    let mut hasher = Sha256::new();
    hasher.update(source_id.as_bytes());
    hasher.update([0u8]);
    hasher.update(ordinal.to_le_bytes());
    let digest = hasher.finalize();
    let mut bytes = [0u8; 16];
    bytes.copy_from_slice(&digest[..16]);
    Uuid::from_bytes(bytes).to_string()
}

// ============ Scanning ============

/// A fenced code block, fences included. `end` is exclusive.
#[derive(Debug, Clone)]
struct Region {
    start: usize,
    end: usize,
    lang: String,
    terminated: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Tier {
    Word,
    Sentence,
    Line,
    Section,
}

struct OpenFence {
    start: usize,
    ch: u8,
    len: usize,
    at_line_start: bool,
    lang: String,
}

struct Scan {
    regions: Vec<Region>,
    /// `(position, heading path in effect from there on)`, sorted by position.
    headings: Vec<(usize, Vec<String>)>,
    /// Cut candidates outside code regions, sorted by position.
    cuts: Vec<(usize, Tier)>,
}

impl Scan {
    fn new(text: &str) -> Self {
        let bytes = text.as_bytes();
        let len = bytes.len();
        let mut regions = Vec::new();
        let mut heading_events: Vec<(usize, usize, String)> = Vec::new();
        let mut open: Option<OpenFence> = None;
        let mut at_line_start = true;
        let mut i = 0;

        while i < len {
            match open.take() {
                None => {
                    if at_line_start {
                        if let Some((level, title)) = parse_heading(text, i) {
                            heading_events.push((i, level, title));
                        }
                        let j = skip_indent(bytes, i);
                        if let Some((ch, n)) = fence_run(bytes, j) {
                            let after = j + n;
                            let eol = line_end(bytes, after);
                            if ch == b'`' {
                                if let Some(close) = find_run(bytes, after, eol, b'`', n) {
                                    regions.push(Region {
                                        start: j,
                                        end: close,
                                        lang: "plain".to_string(),
                                        terminated: true,
                                    });
                                    i = close;
                                    at_line_start = false;
                                    continue;
                                }
                            }
                            open = Some(OpenFence {
                                start: j,
                                ch,
                                len: n,
                                at_line_start: true,
                                lang: info_lang(&text[after..eol]),
                            });
                            i = if eol < len { eol + 1 } else { eol };
                            at_line_start = true;
                            continue;
                        }
                    }
                    if bytes[i] == b'`' {
                        let n = run_len(bytes, i, b'`');
                        if n >= 3 {
                            let eol = line_end(bytes, i + n);
                            open = Some(OpenFence {
                                start: i,
                                ch: b'`',
                                len: n,
                                at_line_start: false,
                                lang: info_lang(&text[i + n..eol]),
                            });
                        }
                        i += n;
                        at_line_start = false;
                        continue;
                    }
                    at_line_start = bytes[i] == b'\n';
                    i += 1;
                }
                Some(fence) => {
                    let close = if fence.at_line_start {
                        if at_line_start {
                            let j = skip_indent(bytes, i);
                            match fence_run(bytes, j) {
                                Some((ch, n))
                                    if ch == fence.ch
                                        && n >= fence.len
                                        && text[j + n..line_end(bytes, j + n)]
                                            .trim()
                                            .is_empty() =>
                                {
                                    Some(j + n)
                                }
                                _ => None,
                            }
                        } else {
                            None
                        }
                    } else if bytes[i] == fence.ch {
                        let n = run_len(bytes, i, fence.ch);
                        if n >= fence.len {
                            Some(i + n)
                        } else {
                            i += n;
                            at_line_start = false;
                            open = Some(fence);
                            continue;
                        }
                    } else {
                        None
                    };

                    match close {
                        Some(end) => {
                            regions.push(Region {
                                start: fence.start,
                                end,
                                lang: fence.lang,
                                terminated: true,
                            });
                            i = end;
                            at_line_start = false;
                        }
                        None => {
                            at_line_start = bytes[i] == b'\n';
                            i += 1;
                            open = Some(fence);
                        }
                    }
                }
            }
        }

        if let Some(fence) = open {
            // Chunk ends are trimmed, so the region must be too.
            let end = fence.start.max(text.trim_end().len());
            regions.push(Region {
                start: fence.start,
                end,
                lang: fence.lang,
                terminated: false,
            });
        }

        let headings = heading_snapshots(&heading_events);
        let cuts = cut_candidates(text, &regions, &heading_events);

        Self {
            regions,
            headings,
            cuts,
        }
    }

    fn inside_region(&self, pos: usize) -> bool {
        self.regions.iter().any(|r| r.start < pos && pos < r.end)
    }

    fn region_containing(&self, pos: usize) -> Option<&Region> {
        self.regions.iter().find(|r| r.start < pos && pos < r.end)
    }

    fn heading_path_at(&self, pos: usize) -> Vec<String> {
        let idx = self.headings.partition_point(|(p, _)| *p <= pos);
        if idx == 0 {
            Vec::new()
        } else {
            self.headings[idx - 1].1.clone()
        }
    }

    /// Latest candidate of exactly `tier` in `(lo, hi]`.
    fn latest_cut(&self, lo: usize, hi: usize, tier: Tier) -> Option<usize> {
        let upper = self.cuts.partition_point(|(p, _)| *p <= hi);
        self.cuts[..upper]
            .iter()
            .rev()
            .take_while(|(p, _)| *p > lo)
            .find(|(_, t)| *t == tier)
            .map(|(p, _)| *p)
    }
}

fn skip_indent(bytes: &[u8], i: usize) -> usize {
    let mut j = i;
    while j < bytes.len() && j - i < 3 && bytes[j] == b' ' {
        j += 1;
    }
    j
}

fn run_len(bytes: &[u8], i: usize, ch: u8) -> usize {
    bytes[i..].iter().take_while(|b| **b == ch).count()
}

fn fence_run(bytes: &[u8], i: usize) -> Option<(u8, usize)> {
    let ch = *bytes.get(i)?;
    if ch != b'`' && ch != b'~' {
        return None;
    }
    let n = run_len(bytes, i, ch);
    (n >= 3).then_some((ch, n))
}

fn line_end(bytes: &[u8], from: usize) -> usize {
    bytes[from..]
        .iter()
        .position(|b| *b == b'\n')
        .map(|p| from + p)
        .unwrap_or(bytes.len())
}

/// End of the first run of at least `min` `ch` bytes in `[from, to)`.
fn find_run(bytes: &[u8], from: usize, to: usize, ch: u8, min: usize) -> Option<usize> {
    let mut k = from;
    while k < to {
        if bytes[k] == ch {
            let n = run_len(&bytes[..to], k, ch);
            if n >= min {
                return Some(k + n);
            }
            k += n;
        } else {
            k += 1;
        }
    }
    None
}

fn info_lang(rest: &str) -> String {
    let rest = rest.trim();
    let is_word = !rest.is_empty()
        && rest
            .chars()
            .all(|c| c.is_alphanumeric() || matches!(c, '_' | '-' | '+' | '#' | '.'));
    if is_word {
        rest.to_lowercase()
    } else {
        "plain".to_string()
    }
}

fn parse_heading(text: &str, i: usize) -> Option<(usize, String)> {
    let line = &text[i..i + line_end(text.as_bytes(), i) - i];
    let level = line.bytes().take_while(|b| *b == b'#').count();
    if level == 0 || level > 6 {
        return None;
    }
    let rest = &line[level..];
    if !rest.starts_with(' ') && !rest.starts_with('\t') {
        return None;
    }
    let title = rest.trim().trim_end_matches('#').trim();
    if title.is_empty() {
        return None;
    }
    Some((level, title.to_string()))
}

fn heading_snapshots(events: &[(usize, usize, String)]) -> Vec<(usize, Vec<String>)> {
    let mut stack: Vec<(usize, String)> = Vec::new();
    let mut out = Vec::with_capacity(events.len());
    for (pos, level, title) in events {
        while stack.last().is_some_and(|(l, _)| l >= level) {
            stack.pop();
        }
        stack.push((*level, title.clone()));
        out.push((*pos, stack.iter().map(|(_, t)| t.clone()).collect()));
    }
    out
}

fn cut_candidates(
    text: &str,
    regions: &[Region],
    headings: &[(usize, usize, String)],
) -> Vec<(usize, Tier)> {
    let bytes = text.as_bytes();
    let mut cuts: Vec<(usize, Tier)> = Vec::new();

    for (pos, _, _) in headings {
        cuts.push((*pos, Tier::Section));
    }
    for r in regions {
        cuts.push((r.start, Tier::Section));
        cuts.push((r.end, Tier::Section));
    }
    for (i, b) in bytes.iter().enumerate() {
        let next = i + 1;
        match b {
            b'\n' => {
                let tier = if bytes.get(next) == Some(&b'\n')
                    || (i > 0 && bytes[i - 1] == b'\n')
                {
                    Tier::Section
                } else {
                    Tier::Line
                };
                cuts.push((next, tier));
            }
            b'.' | b'!' | b'?' => {
                if bytes.get(next).is_some_and(|c| c.is_ascii_whitespace()) {
                    cuts.push((next, Tier::Sentence));
                }
            }
            b' ' | b'\t' => cuts.push((next, Tier::Word)),
            _ => {}
        }
    }

    cuts.retain(|(p, _)| *p > 0 && *p < bytes.len());
    cuts.retain(|(p, _)| !regions.iter().any(|r| r.start < *p && *p < r.end));
    cuts.sort();
    // Keep only the highest tier at each position.
    let mut deduped: Vec<(usize, Tier)> = Vec::with_capacity(cuts.len());
    for (p, t) in cuts {
        match deduped.last_mut() {
            Some(last) if last.0 == p => last.1 = last.1.max(t),
            _ => deduped.push((p, t)),
        }
    }
    deduped
}

// ============ Splitting ============

/// Byte index reached after advancing `n` characters from `from`.
fn advance_chars(text: &str, from: usize, n: usize) -> usize {
    text[from..]
        .char_indices()
        .nth(n)
        .map(|(i, _)| from + i)
        .unwrap_or(text.len())
}

/// Byte index `n` characters before `to` (clamped to 0).
fn retreat_chars(text: &str, to: usize, n: usize) -> usize {
    if n == 0 {
        return to;
    }
    text[..to]
        .char_indices()
        .rev()
        .nth(n - 1)
        .map(|(i, _)| i)
        .unwrap_or(0)
}

fn skip_whitespace(text: &str, from: usize) -> usize {
    text[from..]
        .char_indices()
        .find(|(_, c)| !c.is_whitespace())
        .map(|(i, _)| from + i)
        .unwrap_or(text.len())
}

fn trim_end(text: &str, start: usize, end: usize) -> usize {
    start + text[start..end].trim_end().len()
}

/// Compute `(start, end)` byte spans of every chunk, in order.
fn split_spans(text: &str, scan: &Scan, params: &ChunkParams) -> Vec<(usize, usize)> {
    let mut spans = Vec::new();
    let mut start = skip_whitespace(text, 0);

    while start < text.len() {
        let limit = advance_chars(text, start, params.max_chars);
        if limit >= text.len() {
            spans.push((start, trim_end(text, start, text.len())));
            break;
        }

        // A code region straddling the limit either ends this chunk just
        // before it or, when the chunk starts with it, becomes the chunk.
        let mut hi = limit;
        if let Some(region) = scan.region_containing(limit) {
            if region.start <= start {
                spans.push((start, trim_end(text, start, region.end)));
                start = skip_whitespace(text, region.end);
                continue;
            }
            hi = region.start;
        }

        let half = advance_chars(text, start, params.max_chars / 2).min(hi);
        let cut = [half, start]
            .iter()
            .flat_map(|lo| {
                [Tier::Section, Tier::Line, Tier::Sentence, Tier::Word]
                    .into_iter()
                    .map(move |tier| (*lo, tier))
            })
            .find_map(|(lo, tier)| scan.latest_cut(lo, hi, tier))
            .unwrap_or(hi);

        let end = trim_end(text, start, cut);
        if end > start {
            spans.push((start, end));
        }

        start = skip_whitespace(text, next_start(text, scan, start, cut, params.overlap_chars));
    }

    spans
}

/// Where the chunk after a cut at `cut` begins, accounting for overlap.
fn next_start(text: &str, scan: &Scan, start: usize, cut: usize, overlap: usize) -> usize {
    if overlap == 0 || scan.regions.iter().any(|r| r.start == cut) {
        return cut;
    }
    let mut ov = retreat_chars(text, cut, overlap);
    if let Some(word) = scan
        .cuts
        .iter()
        .find(|(p, t)| *p >= ov && *p <= cut && *t >= Tier::Word)
    {
        ov = word.0;
    }
    // Overlap repeats prose only, never a code block.
    if let Some(region_end) = scan
        .regions
        .iter()
        .filter(|r| r.end <= cut)
        .map(|r| r.end)
        .max()
    {
        ov = ov.max(region_end);
    }
    if ov <= start || scan.inside_region(ov) {
        cut
    } else {
        ov
    }
}

fn make_chunk(
    source_id: &str,
    ordinal: i64,
    text: &str,
    start: usize,
    end: usize,
    scan: &Scan,
) -> Chunk {
    let body = &text[start..end];

    let contained: Vec<&Region> = scan
        .regions
        .iter()
        .filter(|r| r.start >= start && r.end <= end && r.end > r.start)
        .collect();

    let mut code_languages: Vec<String> = Vec::new();
    let mut symbols: Vec<String> = Vec::new();
    for region in &contained {
        if !code_languages.contains(&region.lang) {
            code_languages.push(region.lang.clone());
        }
        if matches!(region.lang.as_str(), "python" | "py") {
            let code = &text[region.start..region.end];
            for re in [&*PY_DEF, &*PY_CLASS] {
                for cap in re.captures_iter(code) {
                    let name = cap[1].to_string();
                    if !symbols.contains(&name) {
                        symbols.push(name);
                    }
                }
            }
        }
    }

    let mut hasher = Sha256::new();
    hasher.update(body.as_bytes());
    let hash = format!("{:x}", hasher.finalize());

    Chunk {
        id: chunk_id(source_id, ordinal),
        text: body.to_string(),
        hash,
        metadata: ChunkMetadata {
            source_id: source_id.to_string(),
            chunk_ordinal: ordinal,
            heading_path: scan.heading_path_at(start),
            has_code_block: !contained.is_empty(),
            code_languages,
            symbols,
            span_start: start,
            span_end: end,
            category: None,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(max_chars: usize, overlap_chars: usize) -> ChunkParams {
        ChunkParams {
            max_chars,
            overlap_chars,
        }
    }

    fn fence_count(s: &str) -> usize {
        s.matches("```").count()
    }

    #[test]
    fn test_small_text_single_chunk() {
        let out = chunk_text("doc1", "Hello, world!", &params(100, 10));
        assert_eq!(out.chunks.len(), 1);
        assert_eq!(out.chunks[0].text, "Hello, world!");
        assert_eq!(out.chunks[0].metadata.chunk_ordinal, 0);
        assert!(out.warnings.is_empty());
    }

    #[test]
    fn test_empty_text() {
        let out = chunk_text("doc1", "", &params(100, 10));
        assert_eq!(out.chunks.len(), 1);
        assert_eq!(out.chunks[0].text, "");
    }

    #[test]
    fn test_inline_code_block_kept_whole() {
        let text = "Intro text. ```print(1)\nprint(2)```  Outro text.";
        let out = chunk_text("doc1", text, &params(10, 0));
        let block = "```print(1)\nprint(2)```";
        let holders: Vec<_> = out
            .chunks
            .iter()
            .filter(|c| c.text.contains(block))
            .collect();
        assert_eq!(holders.len(), 1, "chunks: {:?}", out.chunks);
        assert!(holders[0].metadata.has_code_block);
        for c in &out.chunks {
            assert_eq!(fence_count(&c.text) % 2, 0, "unbalanced: {:?}", c.text);
        }
    }

    #[test]
    fn test_oversize_code_block_own_chunk_with_overlap() {
        let code: String = (0..40).map(|i| format!("let x{} = {};\n", i, i)).collect();
        let text = format!(
            "Some prose before the code. More prose here.\n\n```rust\n{}```\n\nTrailing prose after the block.",
            code
        );
        let out = chunk_text("doc1", &text, &params(60, 20));
        let holders: Vec<_> = out
            .chunks
            .iter()
            .filter(|c| c.text.contains("let x39 = 39;"))
            .collect();
        assert_eq!(holders.len(), 1);
        assert!(holders[0].text.starts_with("```rust"));
        assert!(holders[0].text.ends_with("```"));
        assert_eq!(holders[0].metadata.code_languages, vec!["rust".to_string()]);
        for c in &out.chunks {
            assert_eq!(fence_count(&c.text) % 2, 0, "unbalanced: {:?}", c.text);
        }
    }

    #[test]
    fn test_small_code_block_merged() {
        let text = "Run this:\n\n```sh\ncargo build\n```\n\nThen test.";
        let out = chunk_text("doc1", text, &params(200, 0));
        assert_eq!(out.chunks.len(), 1);
        assert!(out.chunks[0].metadata.has_code_block);
        assert_eq!(out.chunks[0].metadata.code_languages, vec!["sh".to_string()]);
    }

    #[test]
    fn test_unterminated_fence_warns() {
        let text = "Intro.\n\n```python\ndef f():\n    return 1\n";
        let out = chunk_text("doc1", text, &params(10, 0));
        assert_eq!(out.warnings.len(), 1);
        assert_eq!(out.warnings[0].offset, 8);
        let last = out.chunks.last().unwrap();
        assert!(last.text.starts_with("```python"));
        assert!(last.text.contains("return 1"));
        assert_eq!(last.metadata.symbols, vec!["f".to_string()]);
        assert!(last.metadata.has_code_block);
        assert_eq!(last.metadata.code_languages, vec!["python".to_string()]);
    }

    #[test]
    fn test_unterminated_fence_with_trailing_blank_lines() {
        let text = "Setup notes.\n\n```rust\nfn main() {}\n\n\n";
        let out = chunk_text("doc1", text, &params(1000, 0));
        assert_eq!(out.chunks.len(), 1);
        let chunk = &out.chunks[0];
        assert!(chunk.text.ends_with("fn main() {}"));
        assert!(chunk.metadata.has_code_block);
        assert_eq!(chunk.metadata.code_languages, vec!["rust".to_string()]);
    }

    #[test]
    fn test_respects_max_outside_code() {
        let text = (0..60)
            .map(|i| format!("Sentence number {} is here.", i))
            .collect::<Vec<_>>()
            .join(" ");
        let out = chunk_text("doc1", &text, &params(120, 30));
        assert!(out.chunks.len() > 1);
        for c in &out.chunks {
            assert!(c.text.chars().count() <= 120, "too long: {}", c.text.len());
            assert!(!c.text.is_empty());
        }
        for (i, c) in out.chunks.iter().enumerate() {
            assert_eq!(c.metadata.chunk_ordinal, i as i64);
        }
    }

    #[test]
    fn test_overlap_repeats_trailing_context() {
        let text = (0..30)
            .map(|i| format!("Para {} talks about things.", i))
            .collect::<Vec<_>>()
            .join("\n\n");
        let out = chunk_text("doc1", &text, &params(100, 30));
        for pair in out.chunks.windows(2) {
            assert!(
                pair[1].metadata.span_start < pair[0].metadata.span_end,
                "expected overlap between {:?} and {:?}",
                pair[0].text,
                pair[1].text
            );
        }
    }

    #[test]
    fn test_no_overlap_when_zero() {
        let text = (0..30)
            .map(|i| format!("Para {} talks about things.", i))
            .collect::<Vec<_>>()
            .join("\n\n");
        let out = chunk_text("doc1", &text, &params(100, 0));
        for pair in out.chunks.windows(2) {
            assert!(pair[1].metadata.span_start >= pair[0].metadata.span_end);
        }
    }

    #[test]
    fn test_spans_match_text() {
        let text = "# Title\n\nAlpha beta gamma. Delta epsilon.\n\n## Sub\n\nZeta eta theta.";
        let out = chunk_text("doc1", text, &params(25, 5));
        for c in &out.chunks {
            assert_eq!(&text[c.metadata.span_start..c.metadata.span_end], c.text);
        }
    }

    #[test]
    fn test_heading_path() {
        let text = "# Guide\n\nIntro words here.\n\n## Install\n\nRun the installer now.\n\n### Linux\n\nUse the package manager.";
        let out = chunk_text("doc1", text, &params(30, 0));
        let linux = out
            .chunks
            .iter()
            .find(|c| c.text.contains("package manager"))
            .unwrap();
        assert_eq!(
            linux.metadata.heading_path,
            vec!["Guide".to_string(), "Install".to_string(), "Linux".to_string()]
        );
        assert_eq!(out.chunks[0].metadata.heading_path, vec!["Guide".to_string()]);
    }

    #[test]
    fn test_hash_inside_code_is_not_heading() {
        let text = "# Real\n\n```sh\n# not a heading\nls\n```\n\nafter";
        let scan = Scan::new(text);
        assert_eq!(scan.headings.len(), 1);
    }

    #[test]
    fn test_tilde_fence_and_longer_closer() {
        let text = "~~~\ncode ``` still code\n~~~~\nafter";
        let scan = Scan::new(text);
        assert_eq!(scan.regions.len(), 1);
        assert!(scan.regions[0].terminated);
        assert_eq!(&text[scan.regions[0].end..], "\nafter");
    }

    #[test]
    fn test_python_symbols() {
        let text = "```python\nclass Loader:\n    def load(self):\n        pass\n\nasync def fetch(url):\n    pass\n```";
        let out = chunk_text("doc1", text, &params(1000, 0));
        assert_eq!(
            out.chunks[0].metadata.symbols,
            vec!["load".to_string(), "fetch".to_string(), "Loader".to_string()]
        );
    }

    #[test]
    fn test_multibyte_utf8_chars() {
        let text = "┌──────────────────┐\n│ Hello world      │\n└──────────────────┘";
        let out = chunk_text("doc1", text, &params(7, 2));
        assert!(!out.chunks.is_empty());
        for c in &out.chunks {
            assert!(!c.text.is_empty());
        }
    }

    #[test]
    fn test_document_category_on_every_chunk() {
        let mut doc = Document::new("https://docs.example.com/retrieval", "One.\n\nTwo.\n\nThree.");
        doc.category = Some("retrieval".into());
        let out = chunk_document(&doc, &params(6, 0));
        assert!(out.chunks.len() > 1);
        assert!(out
            .chunks
            .iter()
            .all(|c| c.metadata.category.as_deref() == Some("retrieval")));
    }

    #[test]
    fn test_deterministic() {
        let text = "Alpha one.\n\n```\nx\n```\n\nBeta two. Gamma three.\n\nDelta four.";
        let c1 = chunk_text("doc1", text, &params(12, 4));
        let c2 = chunk_text("doc1", text, &params(12, 4));
        assert_eq!(c1.chunks, c2.chunks);
    }

    #[test]
    fn test_chunk_id_stable_and_distinct() {
        assert_eq!(chunk_id("a", 0), chunk_id("a", 0));
        assert_ne!(chunk_id("a", 0), chunk_id("a", 1));
        assert_ne!(chunk_id("a", 1), chunk_id("b", 1));
        assert_eq!(chunk_id("a", 0).len(), 36);
    }

    #[test]
    fn test_from_tokens() {
        let p = ChunkParams::from_tokens(100, 10);
        assert_eq!(p.max_chars, 400);
        assert_eq!(p.overlap_chars, 40);
    }
}
