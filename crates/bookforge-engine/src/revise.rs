//! Revision strategies.
//!
//! When a validation pass reports issues, the run revises the text. Backends
//! that can rewrite prose get a rewrite prompt carrying the issue batch.
//! Everything else falls back to a deterministic fixer that applies the rule
//! fixes mechanically: banned phrases are cut, digit-bearing sentences get a
//! citation tag, overlong sentences are split at their midpoint.

use crate::model::{Issue, Validator};
use crate::text;
use crate::validate;
use bookforge_llm::{BackendError, TextBackend};
use regex::Regex;

/// How a revision pass changes the text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RevisionStrategy {
    /// Mechanical rule-by-rule fixes, no backend involved.
    Fixer,
    /// Ask the backend to rewrite the text against the issue batch.
    BackendRewrite,
}

impl RevisionStrategy {
    /// Pick a strategy from what the backend claims to support.
    #[must_use]
    pub fn for_backend(backend: &dyn TextBackend) -> Self {
        if backend.supports_rewrite() {
            RevisionStrategy::BackendRewrite
        } else {
            RevisionStrategy::Fixer
        }
    }
}

/// Revised text plus human-readable notes about what changed.
#[derive(Debug, Clone, PartialEq)]
pub struct RevisionOutcome {
    pub text: String,
    /// Empty when the revision left the text untouched.
    pub notes: Vec<String>,
}

/// Revise `content` against `issues` using the given strategy.
///
/// Backend rewrites stream their output through `on_token`; the fixer never
/// calls it.
pub async fn apply(
    strategy: RevisionStrategy,
    backend: &dyn TextBackend,
    content: &str,
    issues: &[Issue],
    style_guide: &str,
    on_token: &mut (dyn FnMut(&str) + Send),
) -> Result<RevisionOutcome, BackendError> {
    match strategy {
        RevisionStrategy::Fixer => Ok(deterministic_fix(content, issues, style_guide)),
        RevisionStrategy::BackendRewrite => {
            let prompt = rewrite_prompt(content, issues, style_guide);
            let text = backend.stream(&prompt, on_token).await?;
            Ok(RevisionOutcome {
                text,
                notes: vec!["revised via backend for reported issues".to_string()],
            })
        }
    }
}

fn rewrite_prompt(content: &str, issues: &[Issue], style_guide: &str) -> String {
    let issues_json =
        serde_json::to_string_pretty(issues).unwrap_or_else(|_| "[]".to_string());
    format!(
        "Revise the following draft to resolve the reported issues.\n\
         Keep the meaning, follow the style guide, change only what the issues require.\n\
         Style guide: {style_guide}\n\
         Issues:\n{issues_json}\n\
         Draft:\n{content}"
    )
}

/// Apply mechanical fixes for the reported issues.
pub fn deterministic_fix(content: &str, issues: &[Issue], style_guide: &str) -> RevisionOutcome {
    let mut text = content.to_string();
    let mut notes = Vec::new();

    for phrase in validate::banned_phrases(style_guide) {
        let stem = phrase.strip_suffix('s').unwrap_or(&phrase);
        if stem.len() < 2 {
            continue;
        }
        let Ok(pattern) = Regex::new(&format!("(?i){}", regex::escape(stem))) else {
            continue;
        };
        let count = pattern.find_iter(&text).count();
        if count == 0 {
            continue;
        }
        text = pattern.replace_all(&text, "").into_owned();
        let label = if count == 1 { "occurrence" } else { "occurrences" };
        notes.push(format!(
            "removed {count} {label} of banned phrase {phrase:?}"
        ));
    }

    let needs_tags = issues
        .iter()
        .any(|issue| issue.validator == Validator::Citations);
    if needs_tags {
        let (tagged, count) = rewrite_sentences(&text, |sentence| {
            let has_digit = sentence.chars().any(|c| c.is_ascii_digit());
            if has_digit && !validate::has_citation_tag(sentence) {
                Some(tag_sentence(sentence))
            } else {
                None
            }
        });
        if count > 0 {
            text = tagged;
            let label = if count == 1 { "sentence" } else { "sentences" };
            notes.push(format!("appended [S1] to {count} {label}"));
        }
    }

    let (split, count) = rewrite_sentences(&text, |sentence| {
        if text::word_count(sentence) > validate::MAX_SENTENCE_WORDS {
            Some(split_long_sentence(sentence))
        } else {
            None
        }
    });
    if count > 0 {
        text = split;
        let label = if count == 1 { "sentence" } else { "sentences" };
        notes.push(format!("split {count} overlong {label}"));
    }

    RevisionOutcome { text, notes }
}

/// Run `rewrite` over each sentence, splicing replacements back so that the
/// whitespace between sentences survives untouched. Returns the new text and
/// how many sentences changed.
fn rewrite_sentences(
    text: &str,
    mut rewrite: impl FnMut(&str) -> Option<String>,
) -> (String, usize) {
    let mut out = String::with_capacity(text.len());
    let mut cursor = 0;
    let mut changed = 0;

    for span in text::sentence_spans(text) {
        out.push_str(&text[cursor..span.start]);
        let sentence = &text[span.clone()];
        match rewrite(sentence) {
            Some(replacement) => {
                out.push_str(&replacement);
                changed += 1;
            }
            None => out.push_str(sentence),
        }
        cursor = span.end;
    }
    out.push_str(&text[cursor..]);
    (out, changed)
}

/// Insert a generic citation tag just before the terminal punctuation.
fn tag_sentence(sentence: &str) -> String {
    let body_end = sentence.trim_end_matches(['.', '!', '?']).len();
    let (body, terminal) = sentence.split_at(body_end);
    format!("{} [S1]{}", body.trim_end(), terminal)
}

/// Split at the midpoint word boundary. The first half gets a period; the
/// second half keeps the original terminal punctuation.
fn split_long_sentence(sentence: &str) -> String {
    let words: Vec<&str> = sentence.split_whitespace().collect();
    let mid = words.len() / 2;
    let first = words[..mid].join(" ");
    let second = words[mid..].join(" ");
    format!("{}. {}", first.trim_end_matches([',', ';', ':']), second)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Severity;
    use async_trait::async_trait;
    use std::sync::Mutex;

    fn citation_issue() -> Issue {
        Issue {
            id: "citations-01".to_string(),
            validator: Validator::Citations,
            severity: Severity::High,
            chapter: None,
            span: None,
            message: "sentence with figures lacks a citation tag".to_string(),
            evidence: String::new(),
            suggestion: None,
        }
    }

    fn style_issue() -> Issue {
        Issue {
            id: "style-01".to_string(),
            validator: Validator::Style,
            severity: Severity::High,
            chapter: None,
            span: None,
            message: "banned phrase".to_string(),
            evidence: String::new(),
            suggestion: None,
        }
    }

    #[test]
    fn fixer_removes_banned_phrases_and_says_so() {
        let outcome = deterministic_fix(
            "A buzzword here. Another buzzword there.",
            &[style_issue()],
            "No buzzwords.",
        );
        assert!(!outcome.text.to_lowercase().contains("buzzword"));
        assert_eq!(outcome.notes.len(), 1);
        assert!(outcome.notes[0].contains("2 occurrences"));
    }

    #[test]
    fn fixer_tags_digit_sentences_only_for_citation_issues() {
        let text = "The study took 14 days. Nothing numeric here.";

        let without = deterministic_fix(text, &[style_issue()], "");
        assert!(!without.text.contains("[S1]"));

        let with = deterministic_fix(text, &[citation_issue()], "");
        assert_eq!(
            with.text,
            "The study took 14 days [S1]. Nothing numeric here."
        );
        assert!(with.notes.iter().any(|n| n.contains("[S1]")));
    }

    #[test]
    fn fixer_leaves_already_tagged_sentences_alone() {
        let text = "The study took 14 days [S3].";
        let outcome = deterministic_fix(text, &[citation_issue()], "");
        assert_eq!(outcome.text, text);
        assert!(outcome.notes.is_empty());
    }

    #[test]
    fn fixer_splits_overlong_sentences_at_the_midpoint() {
        let words = vec!["word"; 30].join(" ");
        let text = format!("{words}!");

        let outcome = deterministic_fix(&text, &[style_issue()], "");
        let sentences = text::split_sentences(&outcome.text);
        assert_eq!(sentences.len(), 2);
        assert_eq!(text::word_count(sentences[0]), 15);
        assert!(sentences[0].ends_with('.'));
        assert!(sentences[1].ends_with('!'));
    }

    #[test]
    fn fixer_preserves_paragraph_breaks() {
        let text = "First thought with a buzzword.\n\nSecond thought stays.";
        let outcome = deterministic_fix(&text, &[style_issue()], "No buzzwords.");
        assert!(outcome.text.contains("\n\nSecond thought stays."));
    }

    #[test]
    fn fixer_with_unfixable_issues_changes_nothing() {
        let low = Issue {
            id: "consistency-01".to_string(),
            validator: Validator::Consistency,
            severity: Severity::Low,
            chapter: None,
            span: None,
            message: "glossary term \"Momentum\" does not appear in this text".to_string(),
            evidence: "Momentum".to_string(),
            suggestion: None,
        };
        let text = "Plain prose without problems.";
        let outcome = deterministic_fix(text, &[low], "Tone: calm.");
        assert_eq!(outcome.text, text);
        assert!(outcome.notes.is_empty());
    }

    #[derive(Debug)]
    struct RewriteBackend {
        prompts: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl TextBackend for RewriteBackend {
        async fn generate(
            &self,
            prompt: &str,
            _max_tokens: Option<u32>,
        ) -> Result<String, BackendError> {
            self.prompts.lock().unwrap().push(prompt.to_string());
            Ok("A clean replacement draft.".to_string())
        }

        async fn stream(
            &self,
            prompt: &str,
            on_token: &mut (dyn for<'a> FnMut(&'a str) + Send),
        ) -> Result<String, BackendError> {
            let text = self.generate(prompt, None).await?;
            for token in text.split_inclusive(char::is_whitespace) {
                on_token(token);
            }
            Ok(text)
        }

        fn supports_rewrite(&self) -> bool {
            true
        }

        fn name(&self) -> &'static str {
            "rewrite-test"
        }
    }

    #[tokio::test]
    async fn backend_rewrite_streams_and_notes_once() {
        let backend = RewriteBackend {
            prompts: Mutex::new(Vec::new()),
        };
        let mut streamed = String::new();

        let outcome = apply(
            RevisionStrategy::BackendRewrite,
            &backend,
            "Draft with a buzzword.",
            &[style_issue()],
            "No buzzwords.",
            &mut |token: &str| streamed.push_str(token),
        )
        .await
        .unwrap();

        assert_eq!(outcome.text, "A clean replacement draft.");
        assert_eq!(outcome.notes, vec!["revised via backend for reported issues"]);
        assert_eq!(streamed, outcome.text);

        let prompts = backend.prompts.lock().unwrap();
        assert_eq!(prompts.len(), 1);
        assert!(prompts[0].contains("style-01"));
        assert!(prompts[0].contains("Draft with a buzzword."));
    }

    #[test]
    fn strategy_follows_backend_capability() {
        let mock = bookforge_llm::MockBackend::new();
        assert_eq!(RevisionStrategy::for_backend(&mock), RevisionStrategy::Fixer);

        let rewrite = RewriteBackend {
            prompts: Mutex::new(Vec::new()),
        };
        assert_eq!(
            RevisionStrategy::for_backend(&rewrite),
            RevisionStrategy::BackendRewrite
        );
    }
}
