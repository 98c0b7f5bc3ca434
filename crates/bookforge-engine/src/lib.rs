//! Run orchestration engine for bookforge.
//!
//! A run turns one [`RunInput`] into a manuscript: outline, chapters drafted
//! one at a time, validation against deterministic rules, and revision until
//! the issues converge or the iteration budget runs out. Everything a run
//! produces is persisted under its own directory, so runs survive process
//! restarts and resume at the next unfinished step.
//!
//! [`Engine`] is the entry point; [`pipeline::Driver`] does the sequencing;
//! [`validate`] and [`revise`] hold the rule logic.

pub mod config;
pub mod engine;
pub mod error;
pub mod events;
pub mod model;
pub mod pipeline;
pub mod registry;
pub mod revise;
pub mod store;
mod text;
pub mod validate;

pub use config::{ConfigError, EngineConfig};
pub use engine::Engine;
pub use error::EngineError;
pub use events::EventBus;
pub use model::{
    BookBible, ControlState, Issue, LogEvent, Outline, OutlineChapter, Report, RunInput, RunState,
    RunStatus, Severity, Stage, Validator,
};
pub use registry::RunRegistry;
pub use revise::{RevisionOutcome, RevisionStrategy};
pub use store::{RunStore, StoreError};
