//! Event fan-out for live observation.

use crate::model::LogEvent;
use crate::store::{RunStore, StoreError};
use tokio::sync::broadcast;

const CHANNEL_CAPACITY: usize = 256;

/// Broadcast bus carrying run events to any number of subscribers.
///
/// Emitting persists the event to the run log before publishing, so the log
/// is always at least as complete as anything a subscriber saw. Late
/// subscribers read the log for history and attach for the rest.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<LogEvent>,
}

impl EventBus {
    #[must_use]
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { tx }
    }

    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<LogEvent> {
        self.tx.subscribe()
    }

    /// Persist `event` to the run log, then publish it.
    ///
    /// A send with no live subscribers is not an error.
    pub fn emit(&self, store: &RunStore, event: LogEvent) -> Result<(), StoreError> {
        store.append_log(&event)?;
        let _ = self.tx.send(event);
        Ok(())
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Stage;
    use camino::Utf8PathBuf;
    use tempfile::TempDir;

    fn store_in(dir: &TempDir) -> RunStore {
        let data = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();
        RunStore::create(&data, "run-a").unwrap()
    }

    #[test]
    fn emit_logs_then_publishes() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        let bus = EventBus::new();
        let mut rx = bus.subscribe();

        bus.emit(&store, LogEvent::stage_start(Stage::Outline))
            .unwrap();
        bus.emit(&store, LogEvent::stage_end(Stage::Outline))
            .unwrap();

        assert!(matches!(rx.try_recv().unwrap(), LogEvent::StageStart { .. }));
        assert!(matches!(rx.try_recv().unwrap(), LogEvent::StageEnd { .. }));
        assert_eq!(store.read_log().unwrap().len(), 2);
    }

    #[test]
    fn emit_without_subscribers_still_logs() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        let bus = EventBus::new();

        bus.emit(&store, LogEvent::error("backend failure"))
            .unwrap();
        assert_eq!(store.read_log().unwrap().len(), 1);
    }

    #[test]
    fn late_subscribers_rely_on_the_log_for_history() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        let bus = EventBus::new();

        bus.emit(&store, LogEvent::stage_start(Stage::Assemble))
            .unwrap();

        let mut rx = bus.subscribe();
        assert!(rx.try_recv().is_err());
        assert_eq!(store.read_log().unwrap().len(), 1);
    }
}
