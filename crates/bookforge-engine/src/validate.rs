//! Deterministic manuscript validators.
//!
//! Three rule families inspect drafted text: consistency against the book
//! bible, style against the style guide, and citation coverage when source
//! material was supplied. Validators never touch the network and the same
//! text always yields the same issue batch.

use crate::model::{BookBible, Issue, Severity, Validator};
use crate::text;
use regex::Regex;
use std::collections::HashMap;
use std::sync::LazyLock;

/// Sentences longer than this many words are flagged as overlong.
pub const MAX_SENTENCE_WORDS: usize = 28;

static CITATION_TAG: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\[S\d+\]").unwrap());

const CONTRADICTION_MARKERS: [&str; 2] = ["contradiction", "conflicting"];

/// What the validators know about the text under inspection.
pub struct ValidationContext<'a> {
    /// Chapter number for chapter-level passes, `None` for the manuscript.
    pub chapter: Option<u32>,
    pub bible: &'a BookBible,
    pub style_guide: &'a str,
    pub sources: Option<&'a str>,
}

/// Run every validator over `text` and hand back an ordered issue batch.
///
/// Ids are assigned here, numbered per rule family in discovery order.
pub fn run_validators(text: &str, ctx: &ValidationContext<'_>) -> Vec<Issue> {
    let mut issues = check_consistency(text, ctx);
    issues.extend(check_style(text, ctx));
    issues.extend(check_citations(text, ctx));

    let mut counters: HashMap<Validator, u32> = HashMap::new();
    for issue in &mut issues {
        let counter = counters.entry(issue.validator).or_insert(0);
        *counter += 1;
        issue.id = format!("{}-{:02}", issue.validator, counter);
    }
    issues
}

/// Glossary terms that vanished from the text, plus contradiction markers.
pub fn check_consistency(text: &str, ctx: &ValidationContext<'_>) -> Vec<Issue> {
    let mut issues = Vec::new();

    for term in &ctx.bible.glossary {
        if term.len() > 3 && !text.contains(term.as_str()) {
            issues.push(Issue {
                id: String::new(),
                validator: Validator::Consistency,
                severity: Severity::Low,
                chapter: ctx.chapter,
                span: None,
                message: format!("glossary term {term:?} does not appear in this text"),
                evidence: term.clone(),
                suggestion: Some(format!("mention {term} or prune it from the book bible")),
            });
        }
    }

    let lowered = text.to_ascii_lowercase();
    for marker in CONTRADICTION_MARKERS {
        for (pos, _) in lowered.match_indices(marker) {
            let span = pos..pos + marker.len();
            issues.push(Issue {
                id: String::new(),
                validator: Validator::Consistency,
                severity: Severity::Medium,
                chapter: ctx.chapter,
                span: Some((span.start, span.end)),
                message: format!("contradiction marker {marker:?} in the text"),
                evidence: text::evidence_around(text, &span),
                suggestion: None,
            });
        }
    }

    issues
}

/// Banned phrase occurrences and overlong sentences.
pub fn check_style(text: &str, ctx: &ValidationContext<'_>) -> Vec<Issue> {
    let mut issues = Vec::new();

    for phrase in banned_phrases(ctx.style_guide) {
        let stem = phrase.strip_suffix('s').unwrap_or(&phrase);
        if stem.len() < 2 {
            continue;
        }
        let Ok(pattern) = Regex::new(&format!("(?i){}", regex::escape(stem))) else {
            continue;
        };
        for found in pattern.find_iter(text) {
            let span = found.range();
            issues.push(Issue {
                id: String::new(),
                validator: Validator::Style,
                severity: Severity::High,
                chapter: ctx.chapter,
                span: Some((span.start, span.end)),
                message: format!("banned phrase {phrase:?} in the text"),
                evidence: text::evidence_around(text, &span),
                suggestion: Some(format!("remove {phrase:?}")),
            });
        }
    }

    for span in text::sentence_spans(text) {
        let sentence = text[span.clone()].trim();
        let words = text::word_count(sentence);
        if words > MAX_SENTENCE_WORDS {
            issues.push(Issue {
                id: String::new(),
                validator: Validator::Style,
                severity: Severity::Medium,
                chapter: ctx.chapter,
                span: Some((span.start, span.end)),
                message: format!("overlong sentence ({words} words)"),
                evidence: text::evidence(sentence, 120),
                suggestion: Some("split the sentence".to_string()),
            });
        }
    }

    issues
}

/// Digit-bearing sentences without a citation tag. Only active when the run
/// carries source material.
pub fn check_citations(text: &str, ctx: &ValidationContext<'_>) -> Vec<Issue> {
    let Some(sources) = ctx.sources else {
        return Vec::new();
    };
    if sources.trim().is_empty() {
        return Vec::new();
    }

    let mut issues = Vec::new();
    for span in text::sentence_spans(text) {
        let sentence = text[span.clone()].trim();
        let has_digit = sentence.chars().any(|c| c.is_ascii_digit());
        if has_digit && !CITATION_TAG.is_match(sentence) {
            issues.push(Issue {
                id: String::new(),
                validator: Validator::Citations,
                severity: Severity::High,
                chapter: ctx.chapter,
                span: Some((span.start, span.end)),
                message: "sentence with figures lacks a citation tag".to_string(),
                evidence: text::evidence(sentence, 120),
                suggestion: Some("append a citation tag like [S1]".to_string()),
            });
        }
    }
    issues
}

pub(crate) fn has_citation_tag(text: &str) -> bool {
    CITATION_TAG.is_match(text)
}

/// Phrases the style guide forbids, extracted from clauses that start with
/// "No ". Lowercased and deduped.
pub(crate) fn banned_phrases(style_guide: &str) -> Vec<String> {
    let mut phrases = Vec::new();
    for clause in style_guide.split([',', '\n', '.']) {
        let clause = clause.trim().to_lowercase();
        if let Some(phrase) = clause.strip_prefix("no ") {
            let phrase = phrase.trim().to_string();
            if !phrase.is_empty() && !phrases.contains(&phrase) {
                phrases.push(phrase);
            }
        }
    }
    phrases
}

/// A batch converges when it is empty, or when everything left is low
/// severity and the word count sits within two percent of the target.
#[must_use]
pub fn converged(issues: &[Issue], word_count: usize, target_words: u32) -> bool {
    if issues.is_empty() {
        return true;
    }
    let all_low = issues.iter().all(|issue| issue.severity == Severity::Low);
    all_low && within_two_percent(word_count, target_words)
}

fn within_two_percent(word_count: usize, target_words: u32) -> bool {
    let target = u64::from(target_words);
    (word_count as u64).abs_diff(target) * 50 <= target
}
