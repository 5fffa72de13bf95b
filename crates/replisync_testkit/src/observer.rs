//! Observer that records progress events.

use parking_lot::Mutex;
use replisync_engine::{CorrelationId, ProgressEvent, SyncObserver, SyncState};

/// Records every [`ProgressEvent`] it receives.
#[derive(Debug, Default)]
pub struct RecordingObserver {
    events: Mutex<Vec<ProgressEvent>>,
}

impl RecordingObserver {
    /// Creates an empty recorder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns all recorded events.
    pub fn events(&self) -> Vec<ProgressEvent> {
        self.events.lock().clone()
    }

    /// Returns the states entered, in order.
    pub fn states(&self) -> Vec<SyncState> {
        self.events.lock().iter().map(|e| e.state).collect()
    }

    /// Returns the states entered by one request, in order.
    pub fn states_for(&self, correlation_id: CorrelationId) -> Vec<SyncState> {
        self.events
            .lock()
            .iter()
            .filter(|e| e.correlation_id == correlation_id)
            .map(|e| e.state)
            .collect()
    }

    /// Returns the retry events.
    pub fn retries(&self) -> Vec<ProgressEvent> {
        self.events
            .lock()
            .iter()
            .filter(|e| e.is_retry())
            .cloned()
            .collect()
    }

    /// Returns the order in which requests first left `Idle`.
    pub fn cycle_order(&self) -> Vec<CorrelationId> {
        let mut order = Vec::new();
        for event in self.events.lock().iter() {
            if event.state == SyncState::Connecting && !order.contains(&event.correlation_id) {
                order.push(event.correlation_id);
            }
        }
        order
    }

    /// Drops all recorded events.
    pub fn clear(&self) {
        self.events.lock().clear();
    }
}

impl SyncObserver for RecordingObserver {
    fn on_event(&self, event: &ProgressEvent) {
        self.events.lock().push(event.clone());
    }
}
