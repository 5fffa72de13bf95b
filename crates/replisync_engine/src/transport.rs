//! Transport layer abstraction for sync operations.

use crate::error::{TransportError, TransportResult};
use async_trait::async_trait;
use parking_lot::Mutex;
use replisync_protocol::{Element, Snapshot};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

/// A sync transport exchanges whole snapshots with the authoritative remote.
///
/// This trait abstracts the network layer, allowing for different
/// implementations (HTTP, in-process server, mock for testing, etc.).
/// Network errors and 5xx-class failures are both reported as
/// [`TransportError`], with the `retryable` flag set.
#[async_trait]
pub trait TransportGateway<T: Element>: Send + Sync {
    /// Checks that the remote can be reached.
    ///
    /// The default implementation always succeeds.
    async fn connect(&self) -> TransportResult<()> {
        Ok(())
    }

    /// Fetches the remote snapshot of `set_id`.
    ///
    /// Returns `Ok(None)` if the remote has never seen the set.
    async fn fetch(&self, set_id: &str) -> TransportResult<Option<Snapshot<T>>>;

    /// Sends the resolved snapshot of `set_id` upstream.
    async fn push(&self, set_id: &str, snapshot: &Snapshot<T>) -> TransportResult<()>;
}

#[async_trait]
impl<T, X> TransportGateway<T> for Arc<X>
where
    T: Element,
    X: TransportGateway<T> + ?Sized,
{
    async fn connect(&self) -> TransportResult<()> {
        (**self).connect().await
    }

    async fn fetch(&self, set_id: &str) -> TransportResult<Option<Snapshot<T>>> {
        (**self).fetch(set_id).await
    }

    async fn push(&self, set_id: &str, snapshot: &Snapshot<T>) -> TransportResult<()> {
        (**self).push(set_id, snapshot).await
    }
}

#[derive(Debug)]
struct MockState<T> {
    remote: HashMap<String, Snapshot<T>>,
    connect_failures: VecDeque<TransportError>,
    fetch_failures: VecDeque<TransportError>,
    push_failures: VecDeque<TransportError>,
    pushed: Vec<Snapshot<T>>,
}

/// A mock transport for testing.
///
/// Holds the remote state in memory. A successful push replaces the remote
/// snapshot. Failures can be scripted per operation; each scripted failure
/// is consumed by one call.
#[derive(Debug)]
pub struct MockTransport<T> {
    connected: AtomicBool,
    state: Mutex<MockState<T>>,
    connect_calls: AtomicUsize,
    fetch_calls: AtomicUsize,
    push_calls: AtomicUsize,
}

impl<T: Element> MockTransport<T> {
    /// Creates a new mock transport with no remote state.
    pub fn new() -> Self {
        Self {
            connected: AtomicBool::new(true),
            state: Mutex::new(MockState {
                remote: HashMap::new(),
                connect_failures: VecDeque::new(),
                fetch_failures: VecDeque::new(),
                push_failures: VecDeque::new(),
                pushed: Vec::new(),
            }),
            connect_calls: AtomicUsize::new(0),
            fetch_calls: AtomicUsize::new(0),
            push_calls: AtomicUsize::new(0),
        }
    }

    /// Creates a mock transport whose remote holds `snapshot`.
    pub fn with_remote(snapshot: Snapshot<T>) -> Self {
        let transport = Self::new();
        transport.set_remote(snapshot);
        transport
    }

    /// Sets the remote snapshot for its set id.
    pub fn set_remote(&self, snapshot: Snapshot<T>) {
        self.state.lock().remote.insert(snapshot.id.clone(), snapshot);
    }

    /// Returns the remote snapshot of `set_id`.
    pub fn remote(&self, set_id: &str) -> Option<Snapshot<T>> {
        self.state.lock().remote.get(set_id).cloned()
    }

    /// Sets the connected state. A disconnected transport fails every call
    /// with a retryable error.
    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    /// Makes the next `connect` call fail with `err`.
    pub fn fail_next_connect(&self, err: TransportError) {
        self.state.lock().connect_failures.push_back(err);
    }

    /// Makes the next `fetch` call fail with `err`.
    pub fn fail_next_fetch(&self, err: TransportError) {
        self.state.lock().fetch_failures.push_back(err);
    }

    /// Makes the next `push` call fail with `err`.
    pub fn fail_next_push(&self, err: TransportError) {
        self.state.lock().push_failures.push_back(err);
    }

    /// Returns the number of `connect` calls.
    pub fn connect_calls(&self) -> usize {
        self.connect_calls.load(Ordering::SeqCst)
    }

    /// Returns the number of `fetch` calls.
    pub fn fetch_calls(&self) -> usize {
        self.fetch_calls.load(Ordering::SeqCst)
    }

    /// Returns the number of `push` calls, failed ones included.
    pub fn push_calls(&self) -> usize {
        self.push_calls.load(Ordering::SeqCst)
    }

    /// Returns every successfully pushed snapshot, oldest first.
    pub fn pushed(&self) -> Vec<Snapshot<T>> {
        self.state.lock().pushed.clone()
    }

    fn check_connected(&self) -> TransportResult<()> {
        if self.connected.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(TransportError::retryable("not connected"))
        }
    }
}

impl<T: Element> Default for MockTransport<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<T: Element> TransportGateway<T> for MockTransport<T> {
    async fn connect(&self) -> TransportResult<()> {
        self.connect_calls.fetch_add(1, Ordering::SeqCst);
        self.check_connected()?;
        match self.state.lock().connect_failures.pop_front() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    async fn fetch(&self, set_id: &str) -> TransportResult<Option<Snapshot<T>>> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        self.check_connected()?;
        let mut state = self.state.lock();
        if let Some(err) = state.fetch_failures.pop_front() {
            return Err(err);
        }
        Ok(state.remote.get(set_id).cloned())
    }

    async fn push(&self, set_id: &str, snapshot: &Snapshot<T>) -> TransportResult<()> {
        self.push_calls.fetch_add(1, Ordering::SeqCst);
        self.check_connected()?;
        let mut state = self.state.lock();
        if let Some(err) = state.push_failures.pop_front() {
            return Err(err);
        }
        state.remote.insert(set_id.to_string(), snapshot.clone());
        state.pushed.push(snapshot.clone());
        Ok(())
    }
}
