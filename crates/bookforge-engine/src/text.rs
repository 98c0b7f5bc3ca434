//! Sentence and word level text helpers shared by the validators and the
//! deterministic fixer. All offsets are byte ranges into the original text so
//! that edits can be spliced back without disturbing surrounding whitespace.

use regex::Regex;
use std::collections::HashSet;
use std::ops::Range;
use std::sync::LazyLock;

static CAPITALIZED: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[A-Z][A-Za-z]{3,}").unwrap());

/// Byte ranges of the sentences in `text`.
///
/// A sentence ends at a run of terminal punctuation (`.`, `!`, `?`); the run
/// belongs to the sentence. Trailing material without terminal punctuation
/// forms a final sentence with trailing whitespace excluded.
pub(crate) fn sentence_spans(text: &str) -> Vec<Range<usize>> {
    let bytes = text.as_bytes();
    let mut spans = Vec::new();
    let mut start: Option<usize> = None;
    let mut i = 0;

    while i < bytes.len() {
        let b = bytes[i];
        if start.is_none() {
            if b.is_ascii_whitespace() {
                i += 1;
                continue;
            }
            start = Some(i);
        }
        if matches!(b, b'.' | b'!' | b'?') {
            let mut end = i + 1;
            while end < bytes.len() && matches!(bytes[end], b'.' | b'!' | b'?') {
                end += 1;
            }
            if let Some(s) = start.take() {
                spans.push(s..end);
            }
            i = end;
        } else {
            i += 1;
        }
    }

    if let Some(s) = start {
        let end = text.trim_end().len();
        if end > s {
            spans.push(s..end);
        }
    }
    spans
}

/// The sentences of `text` as trimmed slices.
pub(crate) fn split_sentences(text: &str) -> Vec<&str> {
    sentence_spans(text)
        .into_iter()
        .map(|span| text[span].trim())
        .filter(|sentence| !sentence.is_empty())
        .collect()
}

pub(crate) fn word_count(text: &str) -> usize {
    text.split_whitespace().count()
}

/// Capitalized terms of four letters or more, first occurrence order, deduped.
pub(crate) fn capitalized_terms(text: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut terms = Vec::new();
    for found in CAPITALIZED.find_iter(text) {
        if seen.insert(found.as_str()) {
            terms.push(found.as_str().to_string());
        }
    }
    terms
}

/// Leading excerpt of `text`, cut on a character boundary.
pub(crate) fn evidence(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}

/// Excerpt around a byte span, padded with up to forty characters of context
/// on each side.
pub(crate) fn evidence_around(text: &str, span: &Range<usize>) -> String {
    const CONTEXT_CHARS: usize = 40;

    let mut start = span.start.min(text.len());
    while !text.is_char_boundary(start) {
        start -= 1;
    }
    let mut end = span.end.min(text.len());
    while !text.is_char_boundary(end) {
        end += 1;
    }

    let window_start = text[..start]
        .char_indices()
        .rev()
        .take(CONTEXT_CHARS)
        .last()
        .map_or(start, |(i, _)| i);
    let window_end = text[end..]
        .char_indices()
        .take(CONTEXT_CHARS)
        .last()
        .map_or(end, |(i, c)| end + i + c.len_utf8());

    text[window_start..window_end].to_string()
}
