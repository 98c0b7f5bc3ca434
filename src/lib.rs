//! Book drafting pipeline with rule-gated revision loops.
//!
//! bookforge turns a one-line idea into a full manuscript: it outlines the
//! book, drafts chapters one at a time, validates every draft against a
//! growing book bible and a style guide, and revises until the issue list
//! settles or the iteration budget runs out. Every run persists its
//! artifacts and can be stopped and resumed at stage boundaries.
//!
//! The workspace splits into two library crates plus this facade:
//!
//! - `bookforge-engine`: run state, artifact store, validators, revision,
//!   the stage driver, and the run registry.
//! - `bookforge-llm`: the text generation capability with a deterministic
//!   offline mock and a Gemini HTTP backend.
//!
//! # Quick Start (CLI)
//!
//! ```bash
//! # Draft a book offline with the mock backend
//! bookforge run --idea "a field guide to habit change"
//!
//! # Inspect it afterwards
//! bookforge report <run_id>
//! ```
//!
//! # Quick Start (Library)
//!
//! ```no_run
//! use bookforge::{Engine, EngineConfig, RunInput};
//!
//! # #[tokio::main]
//! # async fn main() -> anyhow::Result<()> {
//! let engine = Engine::new(EngineConfig::default())?;
//! let run_id = engine.create_run(&RunInput {
//!     idea: "a field guide to habit change".to_string(),
//!     target_words: 20_000,
//!     style_guide: "Tone: calm. No buzzwords.".to_string(),
//!     iterations: 5,
//!     chapter_count: None,
//!     sources: None,
//! })?;
//! engine.start(&run_id)?;
//! engine.wait(&run_id).await;
//! println!("{:?}", engine.report(&run_id)?);
//! # Ok(())
//! # }
//! ```

pub mod cli;

pub use bookforge_engine::{
    BookBible, ConfigError, ControlState, Engine, EngineConfig, EngineError, EventBus, Issue,
    LogEvent, Outline, OutlineChapter, Report, RevisionOutcome, RevisionStrategy, RunInput,
    RunRegistry, RunState, RunStatus, RunStore, Severity, Stage, StoreError, Validator,
};
pub use bookforge_llm::{
    BackendConfig, BackendError, GeminiBackend, MockBackend, TextBackend, from_config,
};
