//! Deterministic offline backend.
//!
//! Mimics a text generation provider without network access so that runs,
//! tests, and demos behave identically on every invocation. The prompt text
//! is inspected to decide what kind of response to fabricate.

use crate::types::{BackendError, TextBackend};
use async_trait::async_trait;

const DEFAULT_CHAPTERS: usize = 3;
const MAX_CHAPTERS: usize = 24;

const TITLE_POOL: [&str; 12] = [
    "Foundations",
    "First Steps",
    "Daily Practice",
    "Momentum",
    "Obstacles",
    "Course Corrections",
    "Deep Work",
    "Shared Ground",
    "Plateaus",
    "Renewal",
    "Mastery",
    "The Long View",
];

#[derive(Clone, Copy)]
enum RequestKind {
    Outline,
    Chapter,
    Freeform,
}

/// Offline stand-in for a text generation provider.
#[derive(Debug, Default, Clone, Copy)]
pub struct MockBackend;

impl MockBackend {
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    fn detect_request(prompt: &str) -> RequestKind {
        let lower = prompt.to_ascii_lowercase();
        if lower.contains("one chapter title per line") {
            RequestKind::Outline
        } else if lower.contains("title:") {
            RequestKind::Chapter
        } else {
            RequestKind::Freeform
        }
    }

    fn build_response(prompt: &str) -> String {
        match Self::detect_request(prompt) {
            RequestKind::Outline => Self::outline_response(prompt),
            RequestKind::Chapter => Self::chapter_response(prompt),
            RequestKind::Freeform => Self::freeform_response(),
        }
    }

    fn outline_response(prompt: &str) -> String {
        let requested = field_value(prompt, "Chapters:")
            .and_then(|v| v.parse::<usize>().ok())
            .unwrap_or(DEFAULT_CHAPTERS)
            .clamp(1, MAX_CHAPTERS);

        let mut lines = Vec::with_capacity(requested);
        for index in 0..requested {
            let title = mock_title(index);
            lines.push(format!("{}. {}", index + 1, title));
        }
        lines.join("\n")
    }

    fn chapter_response(prompt: &str) -> String {
        let title = field_value(prompt, "Title:").unwrap_or_else(|| "Untitled".to_string());
        let idea = field_value(prompt, "Idea:").unwrap_or_else(|| "the subject".to_string());
        let idea_snippet = snippet(&idea, 60);

        format!(
            "{title} opens the next stretch of this book about {idea_snippet}. \
             The chapter called {title} moves from first principles to worked habits. \
             Short scenes show the idea in motion. \
             A closing checklist turns the material into daily practice.\n"
        )
    }

    fn freeform_response() -> String {
        "The requested draft follows. Plain sentences carry the argument forward. \
         Nothing here depends on an external service.\n"
            .to_string()
    }
}

/// Extract the remainder of the first prompt line starting with `field`.
fn field_value(prompt: &str, field: &str) -> Option<String> {
    prompt.lines().find_map(|line| {
        let rest = line.trim().strip_prefix(field)?.trim();
        if rest.is_empty() {
            None
        } else {
            Some(rest.to_string())
        }
    })
}

fn mock_title(index: usize) -> String {
    let stem = TITLE_POOL[index % TITLE_POOL.len()];
    if index < TITLE_POOL.len() {
        stem.to_string()
    } else {
        format!("{stem} Revisited")
    }
}

fn snippet(text: &str, max_chars: usize) -> String {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return "the subject".to_string();
    }
    trimmed.chars().take(max_chars).collect()
}

#[async_trait]
impl TextBackend for MockBackend {
    async fn generate(
        &self,
        prompt: &str,
        _max_tokens: Option<u32>,
    ) -> Result<String, BackendError> {
        Ok(Self::build_response(prompt))
    }

    async fn stream(
        &self,
        prompt: &str,
        on_token: &mut (dyn for<'a> FnMut(&'a str) + Send),
    ) -> Result<String, BackendError> {
        let text = Self::build_response(prompt);
        for token in text.split_inclusive(char::is_whitespace) {
            on_token(token);
        }
        Ok(text)
    }

    fn supports_rewrite(&self) -> bool {
        false
    }

    fn name(&self) -> &'static str {
        "mock"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn outline_honors_requested_chapter_count() {
        let backend = MockBackend::new();
        let prompt = "You are outlining a nonfiction book.\n\
                      Idea: a field guide to habit change\n\
                      Chapters: 5\n\
                      Target length: 2000 words.\n\
                      List one chapter title per line.\n";

        let response = backend.generate(prompt, None).await.unwrap();
        let lines: Vec<&str> = response.lines().collect();

        assert_eq!(lines.len(), 5);
        assert!(lines[0].starts_with("1. "));
        assert!(lines[4].starts_with("5. "));
    }

    #[tokio::test]
    async fn outline_defaults_when_count_is_auto() {
        let backend = MockBackend::new();
        let prompt = "Idea: anything\nChapters: auto\nList one chapter title per line.\n";

        let response = backend.generate(prompt, None).await.unwrap();
        assert_eq!(response.lines().count(), DEFAULT_CHAPTERS);
    }

    #[tokio::test]
    async fn chapter_embeds_title_verbatim() {
        let backend = MockBackend::new();
        let prompt = "Write chapter 2 of the book.\n\
                      Title: First Steps\n\
                      Idea: a field guide to habit change\n\
                      Style guide: Tone: calm.\n\
                      Aim for roughly 400 words.\n";

        let response = backend.generate(prompt, None).await.unwrap();
        assert!(response.contains("First Steps"));
        assert!(!response.chars().any(|c| c.is_ascii_digit()));
    }

    #[tokio::test]
    async fn responses_are_deterministic() {
        let backend = MockBackend::new();
        let prompt = "Title: Momentum\nIdea: deliberate practice\n";

        let first = backend.generate(prompt, None).await.unwrap();
        let second = backend.generate(prompt, None).await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn stream_tokens_reassemble_exactly() {
        let backend = MockBackend::new();
        let prompt = "Title: Renewal\nIdea: rest as a skill\n";

        let mut collected = String::new();
        let assembled = backend
            .stream(prompt, &mut |token: &str| collected.push_str(token))
            .await
            .unwrap();

        assert_eq!(collected, assembled);
        assert!(!collected.is_empty());
    }

    #[test]
    fn titles_stay_distinct_past_the_pool() {
        let mut seen = std::collections::HashSet::new();
        for index in 0..MAX_CHAPTERS {
            assert!(seen.insert(mock_title(index)), "duplicate title at {index}");
        }
    }
}
