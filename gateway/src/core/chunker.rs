//! Long-form text chunking.
//!
//! Input longer than the configured threshold is split into ordered chunks that can
//! be synthesized independently. Split points are chosen at the boundary nearest to
//! the threshold, preferring sentence ends over clause punctuation over plain
//! whitespace. A boundary never falls inside a word or inside an emotion tag span.

use std::collections::HashMap;
use std::ops::Range;

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{debug, warn};

/// Default maximum chunk length in characters
pub const DEFAULT_MAX_CHUNK_CHARS: usize = 1000;

/// Matches `<tag>` and `</tag>` markers
static TAG_MARKER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"</?([A-Za-z][A-Za-z0-9_-]*)>").expect("tag marker pattern is valid")
});

/// An ordered unit of input text
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    /// Sequence index, starting at 0
    pub index: usize,
    /// Whitespace-trimmed chunk text
    pub text: String,
    /// Character span of `text` within the original input
    pub char_span: Range<usize>,
    /// Set when no safe split point existed and the chunk ends at a hard split
    pub hard_split: bool,
}

impl Chunk {
    pub fn char_len(&self) -> usize {
        self.char_span.len()
    }
}

/// Boundary quality, best first
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum SplitKind {
    Sentence,
    Clause,
    Word,
}

/// Splits text into tag-safe chunks of bounded length
#[derive(Debug, Clone)]
pub struct TextChunker {
    max_chars: usize,
}

impl Default for TextChunker {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_CHUNK_CHARS)
    }
}

impl TextChunker {
    pub fn new(max_chars: usize) -> Self {
        Self {
            max_chars: max_chars.max(1),
        }
    }

    pub fn max_chars(&self) -> usize {
        self.max_chars
    }

    /// Split `text` into ordered chunks.
    ///
    /// Text of at most `max_chars` characters yields a single chunk. Whitespace-only
    /// input yields no chunks.
    pub fn split(&self, text: &str) -> Vec<Chunk> {
        let chars: Vec<char> = text.chars().collect();
        let total = chars.len();
        let spans = protected_spans(text, self.max_chars);

        let mut chunks = Vec::new();
        let mut start = 0;

        while start < total {
            while start < total && chars[start].is_whitespace() {
                start += 1;
            }
            if start >= total {
                break;
            }

            let (end, hard_split) = if total - start <= self.max_chars {
                (total, false)
            } else {
                match self.find_split(&chars, &spans, start) {
                    Some(end) => (end, false),
                    None => (self.hard_split_point(&spans, start), true),
                }
            };

            push_chunk(&mut chunks, &chars, start..end, hard_split);
            start = end;
        }

        debug!(
            input_chars = total,
            chunks = chunks.len(),
            max_chars = self.max_chars,
            "Text chunked"
        );

        chunks
    }

    /// Best safe split point in `(start, start + max_chars]`
    fn find_split(&self, chars: &[char], spans: &[Range<usize>], start: usize) -> Option<usize> {
        let limit = start + self.max_chars;
        let mut best: Option<(SplitKind, usize)> = None;

        for pos in (start + 1..=limit).rev() {
            let Some(kind) = classify_boundary(chars, pos) else {
                continue;
            };
            if inside_span(spans, pos) {
                continue;
            }
            match best {
                Some((current, _)) if kind >= current => {}
                _ => best = Some((kind, pos)),
            }
            if kind == SplitKind::Sentence {
                break;
            }
        }

        best.map(|(_, pos)| pos)
    }

    /// Hard split at the threshold, moved out of any tag span it would cut
    fn hard_split_point(&self, spans: &[Range<usize>], start: usize) -> usize {
        let pos = start + self.max_chars;
        match containing_span(spans, pos) {
            Some(span) if span.start > start => span.start,
            Some(span) => span.end,
            None => pos,
        }
    }
}

fn push_chunk(chunks: &mut Vec<Chunk>, chars: &[char], range: Range<usize>, hard_split: bool) {
    let start = range.start;
    let mut stop = range.end;
    while stop > start && chars[stop - 1].is_whitespace() {
        stop -= 1;
    }
    if stop == start {
        return;
    }

    let index = chunks.len();
    if hard_split {
        warn!(
            chunk_index = index,
            split_at = stop,
            "No safe split point found, falling back to hard split"
        );
    }

    chunks.push(Chunk {
        index,
        text: chars[start..stop].iter().collect(),
        char_span: start..stop,
        hard_split,
    });
}

fn is_sentence_terminator(ch: char) -> bool {
    matches!(ch, '.' | '!' | '?' | '…')
}

fn is_cjk_terminator(ch: char) -> bool {
    matches!(ch, '。' | '！' | '？' | '；')
}

fn is_clause_punctuation(ch: char) -> bool {
    matches!(ch, ',' | ';' | ':' | '，' | '：' | '、')
}

fn is_closing_mark(ch: char) -> bool {
    matches!(ch, '"' | '\'' | ')' | ']' | '”' | '’' | '»' | '」')
}

/// Classify the boundary between `chars[pos - 1]` and `chars[pos]`.
///
/// Returns `None` when the boundary is inside a word.
fn classify_boundary(chars: &[char], pos: usize) -> Option<SplitKind> {
    let next = chars[pos];

    let mut cursor = pos;
    while cursor > 0 && is_closing_mark(chars[cursor - 1]) {
        cursor -= 1;
    }
    let last = (cursor > 0).then(|| chars[cursor - 1]);

    // CJK sentences end without whitespace, but never before their closing marks
    if last.is_some_and(is_cjk_terminator) {
        return (!is_closing_mark(next)).then_some(SplitKind::Sentence);
    }
    if !next.is_whitespace() {
        return None;
    }
    if next == '\n' {
        return Some(SplitKind::Sentence);
    }

    match last {
        Some(ch) if is_sentence_terminator(ch) => Some(SplitKind::Sentence),
        Some(ch) if is_clause_punctuation(ch) => Some(SplitKind::Clause),
        _ => Some(SplitKind::Word),
    }
}

/// Span strictly containing `pos`. `spans` must be sorted and disjoint.
fn containing_span(spans: &[Range<usize>], pos: usize) -> Option<&Range<usize>> {
    let idx = spans.partition_point(|span| span.end <= pos);
    spans.get(idx).filter(|span| span.start < pos)
}

fn inside_span(spans: &[Range<usize>], pos: usize) -> bool {
    containing_span(spans, pos).is_some()
}

struct TagMarker<'a> {
    chars: Range<usize>,
    name: &'a str,
    closing: bool,
}

/// Character ranges that must not contain a chunk boundary.
///
/// A `<tag>...</tag>` pair is protected as a whole when it fits in one chunk;
/// otherwise, and for standalone markers such as `<laugh>`, the marker itself is
/// protected.
fn protected_spans(text: &str, max_chars: usize) -> Vec<Range<usize>> {
    let offsets: Vec<usize> = text.char_indices().map(|(byte, _)| byte).collect();
    let to_char = |byte: usize| offsets.partition_point(|&b| b < byte);

    let markers: Vec<TagMarker<'_>> = TAG_MARKER
        .captures_iter(text)
        .filter_map(|caps| {
            let whole = caps.get(0)?;
            let name = caps.get(1)?.as_str();
            Some(TagMarker {
                chars: to_char(whole.start())..to_char(whole.end()),
                name,
                closing: whole.as_str().starts_with("</"),
            })
        })
        .collect();

    let mut paired = vec![false; markers.len()];
    let mut spans = Vec::new();
    let mut open_by_name: HashMap<String, Vec<usize>> = HashMap::new();

    for (i, marker) in markers.iter().enumerate() {
        let name = marker.name.to_ascii_lowercase();
        if !marker.closing {
            open_by_name.entry(name).or_default().push(i);
            continue;
        }
        let Some(open) = open_by_name.get_mut(&name).and_then(Vec::pop) else {
            continue;
        };
        let span = markers[open].chars.start..marker.chars.end;
        if span.len() <= max_chars {
            paired[open] = true;
            paired[i] = true;
            spans.push(span);
        }
    }

    for (i, marker) in markers.iter().enumerate() {
        if !paired[i] {
            spans.push(marker.chars.clone());
        }
    }

    spans.sort_by_key(|span| span.start);
    let mut merged: Vec<Range<usize>> = Vec::with_capacity(spans.len());
    for span in spans {
        match merged.last_mut() {
            Some(last) if span.start < last.end => last.end = last.end.max(span.end),
            _ => merged.push(span),
        }
    }
    merged
}
