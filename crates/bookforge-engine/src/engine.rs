//! Engine facade.
//!
//! The `Engine` ties the pieces together: it owns the configuration, the
//! backend, and the run registry, and exposes the operations a caller needs
//! to create, start, observe, stop, and resume runs.

use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::model::{ControlState, LogEvent, Report, RunInput, RunState};
use crate::pipeline::Driver;
use crate::registry::RunRegistry;
use crate::store::RunStore;
use bookforge_llm::TextBackend;
use chrono::Utc;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::info;

pub struct Engine {
    config: EngineConfig,
    backend: Arc<dyn TextBackend>,
    registry: Arc<RunRegistry>,
}

impl Engine {
    /// Build an engine with the backend selected by the configuration.
    pub fn new(config: EngineConfig) -> Result<Self, EngineError> {
        let backend = bookforge_llm::from_config(&config.backend)?;
        Ok(Self::with_backend(config, backend))
    }

    /// Build an engine around a caller-supplied backend.
    #[must_use]
    pub fn with_backend(config: EngineConfig, backend: Arc<dyn TextBackend>) -> Self {
        Self {
            config,
            backend,
            registry: Arc::new(RunRegistry::new()),
        }
    }

    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    #[must_use]
    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    /// Validate inputs and lay down a fresh run directory. The run starts in
    /// `idle`; call [`Engine::start`] to begin executing it.
    pub fn create_run(&self, input: &RunInput) -> Result<String, EngineError> {
        input.validate()?;
        let run_id = generate_run_id(&input.idea);
        if RunStore::exists(&self.config.data_dir, &run_id) {
            return Err(EngineError::RunExists(run_id));
        }

        let store = RunStore::create(&self.config.data_dir, &run_id)?;
        store.put_inputs(input)?;
        store.put_state(&RunState::new(&run_id))?;
        info!(%run_id, "run created");
        Ok(run_id)
    }

    /// Spawn a driver for the run. Idempotent: returns `false` when a driver
    /// is already active or the run already reached a terminal state.
    pub fn start(&self, run_id: &str) -> Result<bool, EngineError> {
        let store = self.open_existing(run_id)?;
        let state = store
            .read_state()?
            .ok_or_else(|| EngineError::MissingState(run_id.to_string()))?;
        if state.status.is_terminal() {
            return Ok(false);
        }

        let backend = Arc::clone(&self.backend);
        let timeout = self.config.stage_timeout();
        let started = self.registry.start(run_id, move |bus| async move {
            Driver::load(store, backend, bus, timeout)?.drive().await
        });
        Ok(started)
    }

    /// Request a cooperative stop. The driver honors it at its next loop-top
    /// check, so the current stage completes first.
    pub fn stop(&self, run_id: &str) -> Result<(), EngineError> {
        let store = self.open_existing(run_id)?;
        store.put_control(&ControlState { stop: true })?;
        info!(%run_id, "stop requested");
        Ok(())
    }

    /// Clear the stop flag and start the driver again. A no-op returning
    /// `false` on terminal runs.
    pub fn resume(&self, run_id: &str) -> Result<bool, EngineError> {
        let store = self.open_existing(run_id)?;
        let state = store
            .read_state()?
            .ok_or_else(|| EngineError::MissingState(run_id.to_string()))?;
        if state.status.is_terminal() {
            return Ok(false);
        }
        store.put_control(&ControlState { stop: false })?;
        self.start(run_id)
    }

    pub fn status(&self, run_id: &str) -> Result<RunState, EngineError> {
        self.open_existing(run_id)?
            .read_state()?
            .ok_or_else(|| EngineError::MissingState(run_id.to_string()))
    }

    pub fn report(&self, run_id: &str) -> Result<Option<Report>, EngineError> {
        Ok(self.open_existing(run_id)?.read_report()?)
    }

    /// Full event history from the persisted log.
    pub fn read_log(&self, run_id: &str) -> Result<Vec<LogEvent>, EngineError> {
        Ok(self.open_existing(run_id)?.read_log()?)
    }

    /// Attach to the live event stream of an active run.
    pub fn subscribe(&self, run_id: &str) -> Result<broadcast::Receiver<LogEvent>, EngineError> {
        self.registry
            .subscribe(run_id)
            .ok_or_else(|| EngineError::NotActive(run_id.to_string()))
    }

    #[must_use]
    pub fn is_active(&self, run_id: &str) -> bool {
        self.registry.is_active(run_id)
    }

    /// Wait until the run's driver task finishes. Returns immediately when
    /// no driver is active.
    pub async fn wait(&self, run_id: &str) {
        if let Some(handle) = self.registry.take_handle(run_id) {
            let _ = handle.await;
        }
    }

    pub fn list_runs(&self) -> Result<Vec<String>, EngineError> {
        Ok(RunStore::list_runs(&self.config.data_dir)?)
    }

    fn open_existing(&self, run_id: &str) -> Result<RunStore, EngineError> {
        if !RunStore::exists(&self.config.data_dir, run_id) {
            return Err(EngineError::UnknownRun(run_id.to_string()));
        }
        Ok(RunStore::open(&self.config.data_dir, run_id)?)
    }
}

fn generate_run_id(idea: &str) -> String {
    let now = Utc::now();
    let digest = blake3::hash(format!("{idea}\n{}", now.timestamp_subsec_nanos()).as_bytes());
    let hex = digest.to_hex();
    format!("run-{}-{}", now.format("%Y%m%d-%H%M%S"), &hex.as_str()[..8])
}
