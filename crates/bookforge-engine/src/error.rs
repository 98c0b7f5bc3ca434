//! Engine error taxonomy.

use crate::store::StoreError;
use bookforge_llm::BackendError;
use thiserror::Error;

/// Everything that can go wrong while creating or driving a run.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Fault reported by the text generation backend.
    #[error("backend fault: {0}")]
    Backend(#[from] BackendError),

    /// Artifact store failure.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// A lifecycle transition that the state machine forbids.
    #[error("invalid run transition: {from} -> {to}")]
    InvalidTransition { from: &'static str, to: &'static str },

    /// The run directory exists but `inputs.json` is missing.
    #[error("run {0} has no recorded inputs")]
    MissingInputs(String),

    /// The run directory exists but `state.json` is missing.
    #[error("run {0} has no recorded state")]
    MissingState(String),

    /// A run with this identifier already exists on disk.
    #[error("run {0} already exists")]
    RunExists(String),

    /// No run directory with this identifier.
    #[error("unknown run {0}")]
    UnknownRun(String),

    /// The run exists on disk but no driver is executing it.
    #[error("run {0} is not active")]
    NotActive(String),

    /// Caller-supplied inputs failed validation.
    #[error("invalid input: {0}")]
    InvalidInput(String),
}
