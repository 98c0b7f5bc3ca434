//! Pipeline driver.
//!
//! One driver task owns one run. Each loop pass checks the cooperative stop
//! flag, then executes the next unfinished step: outline, one chapter, or a
//! manuscript validate/revise pass. State and artifacts are persisted after
//! every step so a restarted driver resumes exactly where the last one left
//! off.

use crate::error::EngineError;
use crate::events::EventBus;
use crate::model::{Issue, LogEvent, Outline, Report, RunInput, RunState, RunStatus, Stage};
use crate::revise::{self, RevisionOutcome, RevisionStrategy};
use crate::store::{RunStore, StoreError};
use crate::text;
use crate::validate::{self, ValidationContext};
use bookforge_llm::{BackendError, TextBackend};
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

enum Step {
    Outline,
    /// Next chapter to draft, 0-indexed.
    Chapter(u32),
    Manuscript,
}

/// Stage-sequencing state machine for one run.
pub struct Driver {
    store: RunStore,
    backend: Arc<dyn TextBackend>,
    bus: EventBus,
    strategy: RevisionStrategy,
    stage_timeout: Duration,
    input: RunInput,
    state: RunState,
}

impl Driver {
    /// Load a driver from persisted state. The revision strategy is decided
    /// here, once per driver, from the backend's declared capability.
    pub fn load(
        store: RunStore,
        backend: Arc<dyn TextBackend>,
        bus: EventBus,
        stage_timeout: Duration,
    ) -> Result<Self, EngineError> {
        let run_name = store.root().file_name().unwrap_or("unknown").to_string();
        let state = store
            .read_state()?
            .ok_or(EngineError::MissingState(run_name))?;
        let input = store
            .read_inputs()?
            .ok_or_else(|| EngineError::MissingInputs(state.run_id.clone()))?;
        let strategy = RevisionStrategy::for_backend(backend.as_ref());

        Ok(Self {
            store,
            backend,
            bus,
            strategy,
            stage_timeout,
            input,
            state,
        })
    }

    /// Run the stage loop until the run terminates or a stop is honored.
    ///
    /// Backend faults end the run with status `error` and are not returned as
    /// an `Err`; the run's own status carries the failure. An `Err` from this
    /// function means the driver itself could not make progress.
    pub async fn drive(mut self) -> Result<(), EngineError> {
        if self.state.status.is_terminal() {
            debug!(run_id = %self.state.run_id, status = %self.state.status, "run already terminal");
            return Ok(());
        }
        if self.state.status != RunStatus::Running {
            self.state.transition(RunStatus::Running)?;
            self.store.put_state(&self.state)?;
        }
        info!(run_id = %self.state.run_id, strategy = ?self.strategy, "driving run");

        loop {
            if self.stop_requested()? {
                self.state.transition(RunStatus::Stopped)?;
                self.bus
                    .emit(&self.store, LogEvent::error("run stopped at user request"))?;
                self.store.put_state(&self.state)?;
                info!(run_id = %self.state.run_id, "run stopped");
                return Ok(());
            }

            let outcome = match self.next_step()? {
                Step::Outline => self.outline_stage().await.map(|()| false),
                Step::Chapter(index) => self.chapter_stage(index).await.map(|()| false),
                Step::Manuscript => self.manuscript_stage().await,
            };

            match outcome {
                Ok(true) => return Ok(()),
                Ok(false) => {}
                Err(EngineError::Backend(fault)) => {
                    self.state.transition(RunStatus::Error)?;
                    self.store.put_state(&self.state)?;
                    self.bus
                        .emit(&self.store, LogEvent::error(format!("backend failure: {fault}")))?;
                    error!(run_id = %self.state.run_id, %fault, "backend failure ended the run");
                    return Ok(());
                }
                Err(other) => return Err(other),
            }
        }
    }

    /// Read the stop flag. A malformed control artifact counts as "no stop
    /// requested" so a corrupt file cannot wedge a run.
    fn stop_requested(&self) -> Result<bool, EngineError> {
        match self.store.read_control() {
            Ok(Some(control)) => Ok(control.stop),
            Ok(None) => Ok(false),
            Err(StoreError::Malformed { path, source }) => {
                warn!(%path, error = %source, "unreadable control artifact, continuing");
                Ok(false)
            }
            Err(other) => Err(other.into()),
        }
    }

    fn next_step(&self) -> Result<Step, EngineError> {
        if !self.store.outline_exists() {
            return Ok(Step::Outline);
        }
        if self.state.chapter_index < self.effective_chapter_count()? {
            Ok(Step::Chapter(self.state.chapter_index))
        } else {
            Ok(Step::Manuscript)
        }
    }

    fn effective_chapter_count(&self) -> Result<u32, EngineError> {
        if let Some(count) = self.input.chapter_count {
            return Ok(count);
        }
        let outline = self.store.read_outline()?.unwrap_or_default();
        Ok(outline.len() as u32)
    }

    fn per_chapter_words(&self) -> Result<u32, EngineError> {
        let count = self.effective_chapter_count()?.max(1);
        Ok((self.input.target_words / count).max(1))
    }

    async fn invoke_generate(&self, prompt: &str) -> Result<String, EngineError> {
        let call = self.backend.generate(prompt, None);
        match tokio::time::timeout(self.stage_timeout, call).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(EngineError::Backend(BackendError::Timeout {
                seconds: self.stage_timeout.as_secs(),
            })),
        }
    }

    /// Revise `content` against `issues`, streaming any backend tokens out as
    /// log events. Token persistence failures are logged and swallowed; the
    /// revision itself matters more than its live feed.
    async fn apply_revision(
        &self,
        content: &str,
        issues: &[Issue],
    ) -> Result<RevisionOutcome, EngineError> {
        let bus = self.bus.clone();
        let store = self.store.clone();
        let mut sink = move |token: &str| {
            if let Err(e) = bus.emit(&store, LogEvent::token(token)) {
                warn!(error = %e, "failed to record token event");
            }
        };

        let call = revise::apply(
            self.strategy,
            self.backend.as_ref(),
            content,
            issues,
            &self.input.style_guide,
            &mut sink,
        );
        match tokio::time::timeout(self.stage_timeout, call).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(EngineError::Backend(BackendError::Timeout {
                seconds: self.stage_timeout.as_secs(),
            })),
        }
    }

    async fn outline_stage(&mut self) -> Result<(), EngineError> {
        let stage = Stage::Outline;
        self.bus.emit(&self.store, LogEvent::stage_start(stage))?;

        let prompt = prompts::outline(&self.input);
        let raw = self.invoke_generate(&prompt).await?;
        let outline = Outline::parse(&raw, self.input.chapter_count);
        if outline.is_empty() {
            return Err(EngineError::Backend(BackendError::Transport(
                "backend returned no usable outline lines".to_string(),
            )));
        }
        self.store.put_outline(&outline)?;

        self.state
            .bible
            .merge_terms(outline.chapters.iter().map(|c| c.title.clone()));
        self.store.put_bible(&self.state.bible)?;
        self.store.put_state(&self.state)?;

        self.bus.emit(&self.store, LogEvent::stage_end(stage))?;
        info!(run_id = %self.state.run_id, chapters = outline.len(), "outline ready");
        Ok(())
    }

    async fn chapter_stage(&mut self, index: u32) -> Result<(), EngineError> {
        let number = index + 1;
        let outline = self.store.read_outline()?.unwrap_or_default();
        let (title, summary) = match outline.chapters.get(index as usize) {
            Some(chapter) => (chapter.title.clone(), chapter.summary.clone()),
            // Requested count can exceed the outline; improvise a heading.
            None => (
                format!("Chapter {number}"),
                format!("Focus on chapter {number}."),
            ),
        };

        let draft_stage = Stage::Draft(number);
        self.bus.emit(&self.store, LogEvent::stage_start(draft_stage))?;
        let prompt = prompts::chapter(
            &self.input,
            number,
            &title,
            &summary,
            self.per_chapter_words()?,
        );
        let draft = self.invoke_generate(&prompt).await?;
        self.store.put_chapter(number, &draft)?;
        self.bus.emit(&self.store, LogEvent::stage_end(draft_stage))?;

        let validate_stage = Stage::Validate(Some(number));
        self.bus
            .emit(&self.store, LogEvent::stage_start(validate_stage))?;
        let issues = {
            let ctx = ValidationContext {
                chapter: Some(number),
                bible: &self.state.bible,
                style_guide: &self.input.style_guide,
                sources: self.input.sources.as_deref(),
            };
            validate::run_validators(&draft, &ctx)
        };
        self.store.put_issues(self.state.iteration, &issues)?;
        self.bus.emit(
            &self.store,
            LogEvent::issue_batch(self.state.iteration, issues.clone()),
        )?;
        self.bus
            .emit(&self.store, LogEvent::stage_end(validate_stage))?;

        let mut final_text = draft;
        if issues.is_empty() {
            self.state.last_diff.clear();
        } else {
            let revise_stage = Stage::Revise(Some(number));
            self.bus
                .emit(&self.store, LogEvent::stage_start(revise_stage))?;
            let outcome = self.apply_revision(&final_text, &issues).await?;
            final_text = outcome.text;
            self.store.put_chapter(number, &final_text)?;
            self.state.last_diff = outcome.notes;
            self.bus
                .emit(&self.store, LogEvent::stage_end(revise_stage))?;
        }

        self.state.bible.absorb(&final_text);
        self.store.put_bible(&self.state.bible)?;

        self.state.approved_chapters.push(index);
        self.state.chapter_index += 1;
        self.state.iteration += 1;
        self.store.put_state(&self.state)?;
        info!(
            run_id = %self.state.run_id,
            chapter = number,
            issues = issues.len(),
            "chapter approved"
        );
        Ok(())
    }

    /// One manuscript pass: assemble if needed, validate, then either finish
    /// or revise. Returns `true` when the run terminated.
    async fn manuscript_stage(&mut self) -> Result<bool, EngineError> {
        let count = self.effective_chapter_count()?;

        if !self.store.manuscript_exists() {
            let stage = Stage::Assemble;
            self.bus.emit(&self.store, LogEvent::stage_start(stage))?;
            let mut parts = Vec::with_capacity(count as usize);
            for number in 1..=count {
                let chapter = self.store.read_chapter(number)?.unwrap_or_default();
                parts.push(chapter.trim_end().to_string());
            }
            self.store.put_manuscript(&parts.join("\n\n"))?;
            self.bus.emit(&self.store, LogEvent::stage_end(stage))?;
            info!(run_id = %self.state.run_id, chapters = count, "manuscript assembled");
        }

        let manuscript = self.store.read_manuscript()?.unwrap_or_default();

        let stage = Stage::Validate(None);
        self.bus.emit(&self.store, LogEvent::stage_start(stage))?;
        let issues = {
            let ctx = ValidationContext {
                chapter: None,
                bible: &self.state.bible,
                style_guide: &self.input.style_guide,
                sources: self.input.sources.as_deref(),
            };
            validate::run_validators(&manuscript, &ctx)
        };
        self.store.put_issues(self.state.iteration, &issues)?;
        self.bus.emit(
            &self.store,
            LogEvent::issue_batch(self.state.iteration, issues.clone()),
        )?;
        self.bus.emit(&self.store, LogEvent::stage_end(stage))?;

        let words = text::word_count(&manuscript);
        let converged = validate::converged(&issues, words, self.input.target_words);
        let budget_spent = self.state.iteration >= self.input.iterations;
        if converged || budget_spent {
            self.finish(&manuscript, issues)?;
            return Ok(true);
        }

        let revise_stage = Stage::Revise(None);
        self.bus
            .emit(&self.store, LogEvent::stage_start(revise_stage))?;
        let outcome = self.apply_revision(&manuscript, &issues).await?;
        self.store.put_manuscript(&outcome.text)?;
        self.state.last_diff = outcome.notes;
        self.bus
            .emit(&self.store, LogEvent::stage_end(revise_stage))?;

        self.state.iteration += 1;
        self.store.put_state(&self.state)?;
        Ok(false)
    }

    fn finish(&mut self, manuscript: &str, final_issues: Vec<Issue>) -> Result<(), EngineError> {
        self.state.transition(RunStatus::Completed)?;
        self.store.put_state(&self.state)?;

        let report = Report {
            run_id: self.state.run_id.clone(),
            status: self.state.status,
            finished_at: Utc::now(),
            iterations: self.state.iteration,
            word_count: text::word_count(manuscript),
            manuscript_blake3: blake3::hash(manuscript.as_bytes()).to_hex().to_string(),
            inputs: self.input.clone(),
            final_issues,
            history: self.store.issue_history()?,
        };
        self.store.put_report(&report)?;
        info!(
            run_id = %self.state.run_id,
            iterations = report.iterations,
            words = report.word_count,
            "run completed"
        );
        Ok(())
    }
}

mod prompts {
    use crate::model::RunInput;

    pub(super) fn outline(input: &RunInput) -> String {
        let chapters = input
            .chapter_count
            .map_or_else(|| "auto".to_string(), |n| n.to_string());
        format!(
            "You are outlining a nonfiction book.\n\
             Idea: {}\n\
             Chapters: {}\n\
             Target length: {} words.\n\
             List one chapter title per line.\n",
            input.idea, chapters, input.target_words
        )
    }

    pub(super) fn chapter(
        input: &RunInput,
        number: u32,
        title: &str,
        summary: &str,
        words: u32,
    ) -> String {
        format!(
            "Write chapter {number} of the book.\n\
             Title: {title}\n\
             Brief: {summary}\n\
             Idea: {}\n\
             Style guide: {}\n\
             Aim for roughly {words} words.\n",
            input.idea, input.style_guide
        )
    }
}
