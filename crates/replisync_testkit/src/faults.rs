//! Fault-injecting gateways.
//!
//! Wrap the in-memory gateways with scripted failures, call counters and
//! gates that pause an operation until the test releases it.

use async_trait::async_trait;
use parking_lot::Mutex;
use replisync_engine::{MockTransport, TransportGateway, TransportResult};
use replisync_protocol::{Element, Snapshot};
use replisync_storage::{MemoryStore, PersistenceGateway, StorageError, StorageResult};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::{watch, Notify};

/// A [`MemoryStore`] with scripted failures and call counters.
pub struct FlakyStore<T> {
    inner: MemoryStore<T>,
    open_failures: Mutex<VecDeque<StorageError>>,
    load_failures: Mutex<VecDeque<StorageError>>,
    save_failures: Mutex<VecDeque<StorageError>>,
    open_calls: AtomicUsize,
    load_calls: AtomicUsize,
    save_calls: AtomicUsize,
    save_delay: Mutex<Duration>,
    idempotent: AtomicBool,
}

impl<T: Element> FlakyStore<T> {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::wrap(MemoryStore::new())
    }

    /// Wraps an existing memory store.
    pub fn wrap(inner: MemoryStore<T>) -> Self {
        Self {
            inner,
            open_failures: Mutex::new(VecDeque::new()),
            load_failures: Mutex::new(VecDeque::new()),
            save_failures: Mutex::new(VecDeque::new()),
            open_calls: AtomicUsize::new(0),
            load_calls: AtomicUsize::new(0),
            save_calls: AtomicUsize::new(0),
            save_delay: Mutex::new(Duration::ZERO),
            idempotent: AtomicBool::new(true),
        }
    }

    /// Returns the wrapped store.
    pub fn inner(&self) -> &MemoryStore<T> {
        &self.inner
    }

    /// Makes the next `open` fail with `err`.
    pub fn fail_next_open(&self, err: StorageError) {
        self.open_failures.lock().push_back(err);
    }

    /// Makes the next `load` fail with `err`.
    pub fn fail_next_load(&self, err: StorageError) {
        self.load_failures.lock().push_back(err);
    }

    /// Makes the next `save` fail with `err`.
    pub fn fail_next_save(&self, err: StorageError) {
        self.save_failures.lock().push_back(err);
    }

    /// Makes every `save` take `delay` before writing.
    pub fn set_save_delay(&self, delay: Duration) {
        *self.save_delay.lock() = delay;
    }

    /// Declares whether repeated saves are safe.
    pub fn set_idempotent(&self, idempotent: bool) {
        self.idempotent.store(idempotent, Ordering::SeqCst);
    }

    /// Returns the number of `open` calls.
    pub fn open_calls(&self) -> usize {
        self.open_calls.load(Ordering::SeqCst)
    }

    /// Returns the number of `load` calls.
    pub fn load_calls(&self) -> usize {
        self.load_calls.load(Ordering::SeqCst)
    }

    /// Returns the number of `save` calls, failed ones included.
    pub fn save_calls(&self) -> usize {
        self.save_calls.load(Ordering::SeqCst)
    }

    /// Returns the number of gateway calls of any kind.
    pub fn total_calls(&self) -> usize {
        self.open_calls() + self.load_calls() + self.save_calls()
    }
}

impl<T: Element> Default for FlakyStore<T> {
    fn default() -> Self {
        Self::new()
    }
}

fn next_failure(queue: &Mutex<VecDeque<StorageError>>) -> StorageResult<()> {
    match queue.lock().pop_front() {
        Some(err) => Err(err),
        None => Ok(()),
    }
}

#[async_trait]
impl<T: Element> PersistenceGateway<T> for FlakyStore<T> {
    async fn open(&self) -> StorageResult<()> {
        self.open_calls.fetch_add(1, Ordering::SeqCst);
        next_failure(&self.open_failures)?;
        self.inner.open().await
    }

    async fn load(&self, set_id: &str) -> StorageResult<Option<Snapshot<T>>> {
        self.load_calls.fetch_add(1, Ordering::SeqCst);
        next_failure(&self.load_failures)?;
        self.inner.load(set_id).await
    }

    async fn save(&self, set_id: &str, snapshot: &Snapshot<T>) -> StorageResult<()> {
        self.save_calls.fetch_add(1, Ordering::SeqCst);
        next_failure(&self.save_failures)?;
        let delay = *self.save_delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        self.inner.save(set_id, snapshot).await
    }

    async fn delete(&self, set_id: &str) -> StorageResult<bool> {
        self.inner.delete(set_id).await
    }

    async fn list(&self) -> StorageResult<Vec<String>> {
        self.inner.list().await
    }

    fn idempotent_writes(&self) -> bool {
        self.idempotent.load(Ordering::SeqCst)
    }
}

/// A [`MockTransport`] whose fetches wait for the test to open a gate.
///
/// Each fetch signals [`wait_for_fetch`](Self::wait_for_fetch) on entry and
/// then blocks until [`open_gate`](Self::open_gate) is called.
pub struct GatedTransport<T> {
    inner: MockTransport<T>,
    entered: Notify,
    gate: watch::Sender<bool>,
}

impl<T: Element> GatedTransport<T> {
    /// Wraps `inner` with a closed gate.
    pub fn new(inner: MockTransport<T>) -> Self {
        let (gate, _) = watch::channel(false);
        Self {
            inner,
            entered: Notify::new(),
            gate,
        }
    }

    /// Returns the wrapped transport.
    pub fn inner(&self) -> &MockTransport<T> {
        &self.inner
    }

    /// Completes once a fetch has started.
    pub async fn wait_for_fetch(&self) {
        self.entered.notified().await;
    }

    /// Lets current and future fetches proceed.
    pub fn open_gate(&self) {
        self.gate.send_replace(true);
    }
}

#[async_trait]
impl<T: Element> TransportGateway<T> for GatedTransport<T> {
    async fn connect(&self) -> TransportResult<()> {
        self.inner.connect().await
    }

    async fn fetch(&self, set_id: &str) -> TransportResult<Option<Snapshot<T>>> {
        self.entered.notify_one();
        let mut gate = self.gate.subscribe();
        // The sender lives as long as `self`.
        let _ = gate.wait_for(|open| *open).await;
        self.inner.fetch(set_id).await
    }

    async fn push(&self, set_id: &str, snapshot: &Snapshot<T>) -> TransportResult<()> {
        self.inner.push(set_id, snapshot).await
    }
}
