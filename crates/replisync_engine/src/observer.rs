//! Progress observers.

use crate::request::CorrelationId;
use crate::state::SyncState;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

/// Emitted on every state transition of a cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressEvent {
    /// Request driving the cycle.
    pub correlation_id: CorrelationId,
    /// Set being synchronized.
    pub set_id: String,
    /// State entered.
    pub state: SyncState,
    /// Attempt number within the state, starting at 1.
    pub attempt: u32,
    /// Backoff before this attempt, for retries.
    pub retry_delay: Option<Duration>,
    /// Time of the transition.
    pub timestamp: DateTime<Utc>,
}

impl ProgressEvent {
    /// Returns true if this event announces a retry.
    pub fn is_retry(&self) -> bool {
        self.attempt > 1
    }
}

/// Receives progress events.
///
/// Observers run inline on the engine task. They must return quickly; a
/// panicking observer is caught and logged and never fails the cycle.
pub trait SyncObserver: Send + Sync {
    /// Called for every transition.
    fn on_event(&self, event: &ProgressEvent);
}

impl<F> SyncObserver for F
where
    F: Fn(&ProgressEvent) + Send + Sync,
{
    fn on_event(&self, event: &ProgressEvent) {
        self(event)
    }
}

/// Writes progress events to `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingObserver;

impl SyncObserver for TracingObserver {
    fn on_event(&self, event: &ProgressEvent) {
        match event.state {
            SyncState::Failed(kind) => tracing::warn!(
                correlation_id = %event.correlation_id,
                set_id = %event.set_id,
                error_kind = %kind,
                "sync failed"
            ),
            state if event.is_retry() => tracing::info!(
                correlation_id = %event.correlation_id,
                set_id = %event.set_id,
                %state,
                attempt = event.attempt,
                delay_ms = event.retry_delay.map(|d| d.as_millis() as u64),
                "retrying"
            ),
            state => tracing::debug!(
                correlation_id = %event.correlation_id,
                set_id = %event.set_id,
                %state,
                "sync transition"
            ),
        }
    }
}

/// Publishes progress events on a `tokio` broadcast channel.
///
/// Sending never blocks; slow subscribers lag and lose old events.
#[derive(Debug, Clone)]
pub struct BroadcastObserver {
    sender: broadcast::Sender<ProgressEvent>,
}

impl BroadcastObserver {
    /// Creates an observer buffering up to `capacity` events per subscriber.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Subscribes to future events.
    pub fn subscribe(&self) -> broadcast::Receiver<ProgressEvent> {
        self.sender.subscribe()
    }
}

impl SyncObserver for BroadcastObserver {
    fn on_event(&self, event: &ProgressEvent) {
        // No subscribers is fine.
        let _ = self.sender.send(event.clone());
    }
}

/// The observers attached to an orchestrator.
#[derive(Clone, Default)]
pub(crate) struct Observers {
    observers: Vec<Arc<dyn SyncObserver>>,
}

impl Observers {
    pub(crate) fn push(&mut self, observer: Arc<dyn SyncObserver>) {
        self.observers.push(observer);
    }

    pub(crate) fn len(&self) -> usize {
        self.observers.len()
    }

    pub(crate) fn notify(&self, event: &ProgressEvent) {
        for observer in &self.observers {
            let result = catch_unwind(AssertUnwindSafe(|| observer.on_event(event)));
            if result.is_err() {
                tracing::error!(
                    correlation_id = %event.correlation_id,
                    set_id = %event.set_id,
                    state = %event.state,
                    "observer panicked"
                );
            }
        }
    }
}
