//! Domain types for book runs.
//!
//! Everything that crosses the artifact store or the event log lives here:
//! run inputs, outline, book bible, validator issues, the run state machine,
//! stage labels, log events, and the final report.

use crate::error::EngineError;
use crate::text;
use chrono::{DateTime, Utc};
use regex::Regex;
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;
use thiserror::Error;

static OUTLINE_MARKER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*(?:#{1,6}\s+)?(?:\d+[.)]\s*)?(?:[-*•]\s*)?").unwrap());

/// Caller-supplied parameters that define a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunInput {
    /// One-line premise of the book.
    pub idea: String,
    /// Desired manuscript length in words.
    pub target_words: u32,
    /// Prose constraints, also the source of banned phrases.
    pub style_guide: String,
    /// Manuscript revision budget.
    pub iterations: u32,
    /// Fixed chapter count, or `None` to take it from the outline.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chapter_count: Option<u32>,
    /// Source material that turns on citation checking.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sources: Option<String>,
}

impl RunInput {
    /// Reject inputs that would make a run degenerate before any work starts.
    pub fn validate(&self) -> Result<(), EngineError> {
        if self.idea.trim().is_empty() {
            return Err(EngineError::InvalidInput("idea must not be empty".into()));
        }
        if self.target_words == 0 {
            return Err(EngineError::InvalidInput(
                "target word count must be positive".into(),
            ));
        }
        if self.iterations == 0 {
            return Err(EngineError::InvalidInput(
                "iteration budget must be at least 1".into(),
            ));
        }
        if self.chapter_count == Some(0) {
            return Err(EngineError::InvalidInput(
                "chapter count must be at least 1 when given".into(),
            ));
        }
        Ok(())
    }
}

/// A planned chapter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutlineChapter {
    pub title: String,
    pub summary: String,
}

/// The planned chapter list for a run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Outline {
    pub chapters: Vec<OutlineChapter>,
}

impl Outline {
    /// Parse a backend response into chapters, one title per line.
    ///
    /// Enumeration markers (`1.`, `2)`, bullets, heading hashes) are stripped.
    /// When `requested` is given the list is cut to that many chapters.
    pub fn parse(raw: &str, requested: Option<u32>) -> Self {
        let mut chapters = Vec::new();
        for line in raw.lines() {
            let title = OUTLINE_MARKER.replace(line, "").trim().to_string();
            if title.is_empty() {
                continue;
            }
            let summary = format!("Focus on {title}.");
            chapters.push(OutlineChapter { title, summary });
        }
        if let Some(limit) = requested {
            chapters.truncate(limit as usize);
        }
        Self { chapters }
    }

    #[must_use]
    pub fn to_markdown(&self) -> String {
        let mut out = String::from("# Outline\n\n");
        for (index, chapter) in self.chapters.iter().enumerate() {
            out.push_str(&format!(
                "{}. {}: {}\n",
                index + 1,
                chapter.title,
                chapter.summary
            ));
        }
        out
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.chapters.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.chapters.is_empty()
    }
}

/// Accumulated knowledge about the book, grown after every chapter.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BookBible {
    /// Capitalized terms the manuscript is expected to keep using.
    pub glossary: Vec<String>,
    /// Sentences that carry figures and therefore must stay consistent.
    pub key_claims: Vec<String>,
    /// Proper nouns that recur within a single chapter.
    pub entities: Vec<String>,
}

impl BookBible {
    pub const GLOSSARY_CAP: usize = 50;

    /// Add terms to the glossary, keeping insertion order, dropping
    /// duplicates, and never growing past [`Self::GLOSSARY_CAP`].
    pub fn merge_terms(&mut self, terms: impl IntoIterator<Item = String>) {
        for term in terms {
            if self.glossary.len() >= Self::GLOSSARY_CAP {
                break;
            }
            if !self.glossary.contains(&term) {
                self.glossary.push(term);
            }
        }
    }

    /// Fold a finished chapter into the bible.
    pub fn absorb(&mut self, content: &str) {
        let terms = text::capitalized_terms(content);

        for sentence in text::split_sentences(content) {
            if sentence.chars().any(|c| c.is_ascii_digit()) {
                let claim = sentence.to_string();
                if !self.key_claims.contains(&claim) {
                    self.key_claims.push(claim);
                }
            }
        }

        for term in &terms {
            if content.matches(term.as_str()).count() >= 2 && !self.entities.contains(term) {
                self.entities.push(term.clone());
            }
        }

        self.merge_terms(terms);
    }
}

/// How much an issue should worry the caller.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
}

impl Severity {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
        }
    }
}

/// Which rule family produced an issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Validator {
    Consistency,
    Style,
    Citations,
}

impl Validator {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Validator::Consistency => "consistency",
            Validator::Style => "style",
            Validator::Citations => "citations",
        }
    }
}

impl fmt::Display for Validator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One finding from a validator pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Issue {
    pub id: String,
    pub validator: Validator,
    pub severity: Severity,
    /// Chapter number the finding applies to, absent for manuscript passes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chapter: Option<u32>,
    /// Byte span of the offending text, when a single span exists.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub span: Option<(usize, usize)>,
    pub message: String,
    pub evidence: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggestion: Option<String>,
}

/// Run lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Idle,
    Running,
    Stopped,
    Completed,
    Error,
}

impl RunStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            RunStatus::Idle => "idle",
            RunStatus::Running => "running",
            RunStatus::Stopped => "stopped",
            RunStatus::Completed => "completed",
            RunStatus::Error => "error",
        }
    }

    /// Terminal states never leave via [`RunState::transition`].
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, RunStatus::Completed | RunStatus::Error)
    }

    #[must_use]
    pub fn can_transition_to(self, next: RunStatus) -> bool {
        matches!(
            (self, next),
            (RunStatus::Idle, RunStatus::Running)
                | (RunStatus::Running, RunStatus::Stopped)
                | (RunStatus::Running, RunStatus::Completed)
                | (RunStatus::Running, RunStatus::Error)
                | (RunStatus::Stopped, RunStatus::Running)
        )
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Durable cursor for a run, persisted after every stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunState {
    pub run_id: String,
    pub status: RunStatus,
    /// Current manuscript iteration, starting at 1.
    pub iteration: u32,
    /// Index of the next chapter to draft, starting at 0.
    pub chapter_index: u32,
    /// Indices of chapters that finished their draft and revision.
    pub approved_chapters: Vec<u32>,
    pub bible: BookBible,
    /// Notes from the most recent revision, empty when nothing changed.
    #[serde(default)]
    pub last_diff: Vec<String>,
}

impl RunState {
    #[must_use]
    pub fn new(run_id: impl Into<String>) -> Self {
        Self {
            run_id: run_id.into(),
            status: RunStatus::Idle,
            iteration: 1,
            chapter_index: 0,
            approved_chapters: Vec::new(),
            bible: BookBible::default(),
            last_diff: Vec::new(),
        }
    }

    /// Move to `next`, or fail if the state machine forbids it.
    pub fn transition(&mut self, next: RunStatus) -> Result<(), EngineError> {
        if !self.status.can_transition_to(next) {
            return Err(EngineError::InvalidTransition {
                from: self.status.as_str(),
                to: next.as_str(),
            });
        }
        self.status = next;
        Ok(())
    }
}

/// A pipeline stage, identified in logs by a stable label.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Outline,
    /// Drafting one chapter, 1-indexed.
    Draft(u32),
    /// Validating a chapter, or the whole manuscript when `None`.
    Validate(Option<u32>),
    /// Revising a chapter, or the whole manuscript when `None`.
    Revise(Option<u32>),
    Assemble,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Outline => f.write_str("outline"),
            Stage::Draft(n) => write!(f, "draft-chapter-{n}"),
            Stage::Validate(Some(n)) => write!(f, "validate-chapter-{n}"),
            Stage::Validate(None) => f.write_str("validate-manuscript"),
            Stage::Revise(Some(n)) => write!(f, "revise-chapter-{n}"),
            Stage::Revise(None) => f.write_str("revise-manuscript"),
            Stage::Assemble => f.write_str("assemble"),
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("unrecognized stage label: {0}")]
pub struct StageParseError(String);

impl FromStr for Stage {
    type Err = StageParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parse_number = |rest: &str| rest.parse::<u32>().ok();
        match s {
            "outline" => return Ok(Stage::Outline),
            "assemble" => return Ok(Stage::Assemble),
            "validate-manuscript" => return Ok(Stage::Validate(None)),
            "revise-manuscript" => return Ok(Stage::Revise(None)),
            _ => {}
        }
        if let Some(rest) = s.strip_prefix("draft-chapter-") {
            if let Some(n) = parse_number(rest) {
                return Ok(Stage::Draft(n));
            }
        }
        if let Some(rest) = s.strip_prefix("validate-chapter-") {
            if let Some(n) = parse_number(rest) {
                return Ok(Stage::Validate(Some(n)));
            }
        }
        if let Some(rest) = s.strip_prefix("revise-chapter-") {
            if let Some(n) = parse_number(rest) {
                return Ok(Stage::Revise(Some(n)));
            }
        }
        Err(StageParseError(s.to_string()))
    }
}

impl Serialize for Stage {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Stage {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let label = String::deserialize(deserializer)?;
        label.parse().map_err(D::Error::custom)
    }
}

/// One line of the run event log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LogEvent {
    StageStart {
        at: DateTime<Utc>,
        stage: Stage,
    },
    StageEnd {
        at: DateTime<Utc>,
        stage: Stage,
    },
    Token {
        at: DateTime<Utc>,
        text: String,
    },
    IssueBatch {
        at: DateTime<Utc>,
        iteration: u32,
        issues: Vec<Issue>,
    },
    Error {
        at: DateTime<Utc>,
        message: String,
    },
}

impl LogEvent {
    #[must_use]
    pub fn stage_start(stage: Stage) -> Self {
        LogEvent::StageStart {
            at: Utc::now(),
            stage,
        }
    }

    #[must_use]
    pub fn stage_end(stage: Stage) -> Self {
        LogEvent::StageEnd {
            at: Utc::now(),
            stage,
        }
    }

    #[must_use]
    pub fn token(text: impl Into<String>) -> Self {
        LogEvent::Token {
            at: Utc::now(),
            text: text.into(),
        }
    }

    #[must_use]
    pub fn issue_batch(iteration: u32, issues: Vec<Issue>) -> Self {
        LogEvent::IssueBatch {
            at: Utc::now(),
            iteration,
            issues,
        }
    }

    #[must_use]
    pub fn error(message: impl Into<String>) -> Self {
        LogEvent::Error {
            at: Utc::now(),
            message: message.into(),
        }
    }

    #[must_use]
    pub fn at(&self) -> DateTime<Utc> {
        match self {
            LogEvent::StageStart { at, .. }
            | LogEvent::StageEnd { at, .. }
            | LogEvent::Token { at, .. }
            | LogEvent::IssueBatch { at, .. }
            | LogEvent::Error { at, .. } => *at,
        }
    }
}

/// Cooperative stop flag, polled by the driver between stages.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControlState {
    pub stop: bool,
}

/// Summary written once when a run completes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Report {
    pub run_id: String,
    pub status: RunStatus,
    pub finished_at: DateTime<Utc>,
    /// Manuscript iterations actually spent.
    pub iterations: u32,
    pub word_count: usize,
    pub manuscript_blake3: String,
    pub inputs: RunInput,
    /// Issues still open at the end of the final validation pass.
    pub final_issues: Vec<Issue>,
    /// Issue count per manuscript iteration, oldest first.
    pub history: Vec<usize>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_input() -> RunInput {
        RunInput {
            idea: "a field guide to habit change".to_string(),
            target_words: 2000,
            style_guide: "Tone: calm. No buzzwords.".to_string(),
            iterations: 3,
            chapter_count: Some(2),
            sources: None,
        }
    }

    #[test]
    fn input_validation_rejects_degenerate_values() {
        assert!(sample_input().validate().is_ok());

        let mut input = sample_input();
        input.idea = "   ".to_string();
        assert!(input.validate().is_err());

        let mut input = sample_input();
        input.target_words = 0;
        assert!(input.validate().is_err());

        let mut input = sample_input();
        input.iterations = 0;
        assert!(input.validate().is_err());

        let mut input = sample_input();
        input.chapter_count = Some(0);
        assert!(input.validate().is_err());
    }

    #[test]
    fn outline_parse_strips_enumeration_markers() {
        let raw = "1. Foundations\n2) First Steps\n- Daily Practice\n## Momentum\n\n";
        let outline = Outline::parse(raw, None);
        let titles: Vec<&str> = outline
            .chapters
            .iter()
            .map(|c| c.title.as_str())
            .collect();
        assert_eq!(
            titles,
            vec!["Foundations", "First Steps", "Daily Practice", "Momentum"]
        );
        assert_eq!(outline.chapters[0].summary, "Focus on Foundations.");
    }

    #[test]
    fn outline_parse_honors_requested_limit() {
        let raw = "1. A\n2. B\n3. C\n";
        let outline = Outline::parse(raw, Some(2));
        assert_eq!(outline.len(), 2);
    }

    #[test]
    fn glossary_caps_and_dedupes_in_order() {
        let mut bible = BookBible::default();
        bible.merge_terms((0..60).map(|i| format!("Term{i:02}")));
        assert_eq!(bible.glossary.len(), BookBible::GLOSSARY_CAP);
        assert_eq!(bible.glossary[0], "Term00");

        bible.merge_terms(["Term00".to_string()]);
        assert_eq!(bible.glossary.len(), BookBible::GLOSSARY_CAP);
    }

    #[test]
    fn absorb_collects_claims_and_entities() {
        let mut bible = BookBible::default();
        bible.absorb(
            "Momentum matters. Momentum compounds over 30 days. Renewal comes later.",
        );

        assert!(bible.glossary.contains(&"Momentum".to_string()));
        assert!(bible.key_claims.iter().any(|c| c.contains("30 days")));
        assert_eq!(bible.entities, vec!["Momentum".to_string()]);
    }

    #[test]
    fn status_transition_table() {
        use RunStatus::*;
        let allowed = [
            (Idle, Running),
            (Running, Stopped),
            (Running, Completed),
            (Running, Error),
            (Stopped, Running),
        ];
        for (from, to) in allowed {
            assert!(from.can_transition_to(to), "{from} -> {to} should pass");
        }
        for (from, to) in [
            (Idle, Completed),
            (Completed, Running),
            (Error, Running),
            (Stopped, Completed),
            (Running, Idle),
        ] {
            assert!(!from.can_transition_to(to), "{from} -> {to} should fail");
        }
    }

    #[test]
    fn transition_updates_or_errors() {
        let mut state = RunState::new("run-x");
        state.transition(RunStatus::Running).unwrap();
        assert_eq!(state.status, RunStatus::Running);

        let err = state.transition(RunStatus::Idle).unwrap_err();
        assert!(err.to_string().contains("running -> idle"));
    }

    #[test]
    fn stage_labels_roundtrip() {
        let stages = [
            Stage::Outline,
            Stage::Draft(3),
            Stage::Validate(Some(1)),
            Stage::Validate(None),
            Stage::Revise(Some(12)),
            Stage::Revise(None),
            Stage::Assemble,
        ];
        for stage in stages {
            let label = stage.to_string();
            assert_eq!(label.parse::<Stage>().unwrap(), stage);
        }
        assert!("outline-chapter-1".parse::<Stage>().is_err());
        assert!("draft-chapter-x".parse::<Stage>().is_err());
    }

    #[test]
    fn log_events_serialize_with_a_type_tag() {
        let event = LogEvent::stage_start(Stage::Draft(2));
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], "stage_start");
        assert_eq!(value["stage"], "draft-chapter-2");

        let event = LogEvent::issue_batch(1, Vec::new());
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], "issue_batch");
        assert_eq!(value["iteration"], 1);

        let line = serde_json::to_string(&LogEvent::token("word ")).unwrap();
        let parsed: LogEvent = serde_json::from_str(&line).unwrap();
        assert!(matches!(parsed, LogEvent::Token { ref text, .. } if text == "word "));
    }

    #[test]
    fn severity_orders_low_to_high() {
        assert!(Severity::Low < Severity::Medium);
        assert!(Severity::Medium < Severity::High);
    }

    #[test]
    fn control_state_defaults_to_not_stopped() {
        let parsed: ControlState = serde_json::from_str("{}").unwrap();
        assert!(!parsed.stop);
    }
}
