//! Process-wide run registry.
//!
//! Owns the mapping from run id to in-flight driver task, enforcing at most
//! one driver per run. Created once and passed around by reference; nothing
//! here is global. Driver failures and panics are absorbed at this boundary,
//! logged, and reflected only in the run's own persisted status.

use crate::error::EngineError;
use crate::events::EventBus;
use crate::model::LogEvent;
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::error;

struct ActiveRun {
    bus: EventBus,
    handle: Option<JoinHandle<()>>,
}

#[derive(Default)]
pub struct RunRegistry {
    runs: Mutex<HashMap<String, ActiveRun>>,
}

impl RunRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, ActiveRun>> {
        match self.runs.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Spawn a driver for `run_id` unless one is already active.
    ///
    /// Returns `false` without calling `make_driver` when the run already has
    /// a task. The entry is registered before the task is spawned, so two
    /// racing starts cannot both win.
    pub fn start<F, Fut>(self: &Arc<Self>, run_id: &str, make_driver: F) -> bool
    where
        F: FnOnce(EventBus) -> Fut,
        Fut: Future<Output = Result<(), EngineError>> + Send + 'static,
    {
        let mut runs = self.lock();
        if runs.contains_key(run_id) {
            return false;
        }

        let bus = EventBus::new();
        let driver = make_driver(bus.clone());
        runs.insert(run_id.to_string(), ActiveRun { bus, handle: None });

        let inner = tokio::spawn(driver);
        let registry = Arc::clone(self);
        let id = run_id.to_string();
        let supervisor = tokio::spawn(async move {
            match inner.await {
                Ok(Ok(())) => {}
                Ok(Err(err)) => error!(run_id = %id, error = %err, "run driver failed"),
                Err(join_err) => error!(run_id = %id, error = %join_err, "run driver panicked"),
            }
            registry.remove(&id);
        });

        if let Some(active) = runs.get_mut(run_id) {
            active.handle = Some(supervisor);
        }
        true
    }

    #[must_use]
    pub fn is_active(&self, run_id: &str) -> bool {
        self.lock().contains_key(run_id)
    }

    /// Attach to the live event stream of an active run.
    pub fn subscribe(&self, run_id: &str) -> Option<broadcast::Receiver<LogEvent>> {
        self.lock().get(run_id).map(|active| active.bus.subscribe())
    }

    /// Take the supervisor handle for a run, e.g. to await its completion.
    pub fn take_handle(&self, run_id: &str) -> Option<JoinHandle<()>> {
        self.lock()
            .get_mut(run_id)
            .and_then(|active| active.handle.take())
    }

    fn remove(&self, run_id: &str) {
        self.lock().remove(run_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Stage;
    use crate::store::RunStore;
    use camino::Utf8PathBuf;
    use tempfile::TempDir;

    async fn wait_for(registry: &Arc<RunRegistry>, run_id: &str) {
        if let Some(handle) = registry.take_handle(run_id) {
            let _ = handle.await;
        }
    }

    #[tokio::test]
    async fn second_start_for_the_same_run_is_ignored() {
        let registry = Arc::new(RunRegistry::new());
        let (tx, rx) = tokio::sync::oneshot::channel::<()>();

        assert!(registry.start("run-a", move |_| async move {
            rx.await.ok();
            Ok(())
        }));
        assert!(!registry.start("run-a", |_| async { Ok(()) }));
        assert!(registry.is_active("run-a"));

        tx.send(()).unwrap();
        wait_for(&registry, "run-a").await;
        assert!(!registry.is_active("run-a"));
    }

    #[tokio::test]
    async fn completed_runs_can_be_started_again() {
        let registry = Arc::new(RunRegistry::new());

        assert!(registry.start("run-a", |_| async { Ok(()) }));
        wait_for(&registry, "run-a").await;

        assert!(registry.start("run-a", |_| async { Ok(()) }));
        wait_for(&registry, "run-a").await;
    }

    #[tokio::test]
    async fn panicking_drivers_are_cleared() {
        let registry = Arc::new(RunRegistry::new());

        assert!(registry.start("run-p", |_| async { panic!("driver blew up") }));
        wait_for(&registry, "run-p").await;
        assert!(!registry.is_active("run-p"));
    }

    #[tokio::test]
    async fn failing_drivers_are_cleared() {
        let registry = Arc::new(RunRegistry::new());

        assert!(registry.start("run-f", |_| async {
            Err(EngineError::UnknownRun("run-f".to_string()))
        }));
        wait_for(&registry, "run-f").await;
        assert!(!registry.is_active("run-f"));
    }

    #[tokio::test]
    async fn subscribers_see_driver_events() {
        let dir = TempDir::new().unwrap();
        let data = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();
        let store = RunStore::create(&data, "run-a").unwrap();

        let registry = Arc::new(RunRegistry::new());
        let (tx, rx) = tokio::sync::oneshot::channel::<()>();

        assert!(registry.start("run-a", move |bus| async move {
            rx.await.ok();
            bus.emit(&store, LogEvent::stage_start(Stage::Outline))?;
            Ok(())
        }));

        let mut events = registry.subscribe("run-a").unwrap();
        tx.send(()).unwrap();

        let event = events.recv().await.unwrap();
        assert!(matches!(event, LogEvent::StageStart { .. }));

        wait_for(&registry, "run-a").await;
        assert!(registry.subscribe("run-a").is_none());
    }
}
