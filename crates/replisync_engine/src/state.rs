//! Sync orchestrator state machine.

use crate::config::{RetryConfig, SyncConfig};
use crate::error::{ErrorKind, SyncError, SyncResult, TransportError};
use crate::observer::{Observers, ProgressEvent, SyncObserver};
use crate::request::{CorrelationId, SyncOperation, SyncOutcome, SyncRequest};
use crate::transport::TransportGateway;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use replisync_protocol::{ConflictResolver, Element, ReplicatedSet, Snapshot};
use replisync_storage::PersistenceGateway;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

/// The state of a set within a sync cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "state", content = "error", rename_all = "snake_case")]
pub enum SyncState {
    /// No cycle is running for the set.
    Idle,
    /// Opening the store and connecting the transport.
    Connecting,
    /// Loading local state and fetching remote state.
    Fetching,
    /// Applying the resolution strategy.
    Resolving,
    /// Writing the resolved state locally.
    Persisting,
    /// Sending the resolved state upstream.
    Pushing,
    /// The cycle completed.
    Completed,
    /// The cycle failed.
    Failed(ErrorKind),
}

impl SyncState {
    /// Returns true if a cycle is doing work in this state.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            SyncState::Connecting
                | SyncState::Fetching
                | SyncState::Resolving
                | SyncState::Persisting
                | SyncState::Pushing
        )
    }

    /// Returns true for `Completed` and `Failed`.
    pub fn is_terminal(&self) -> bool {
        matches!(self, SyncState::Completed | SyncState::Failed(_))
    }

    /// Returns true if a cancellation is still honored in this state.
    ///
    /// Once persisting starts, the cycle always runs to completion.
    pub fn is_cancellable(&self) -> bool {
        matches!(
            self,
            SyncState::Idle | SyncState::Connecting | SyncState::Fetching | SyncState::Resolving
        )
    }

    /// Returns the state name.
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncState::Idle => "idle",
            SyncState::Connecting => "connecting",
            SyncState::Fetching => "fetching",
            SyncState::Resolving => "resolving",
            SyncState::Persisting => "persisting",
            SyncState::Pushing => "pushing",
            SyncState::Completed => "completed",
            SyncState::Failed(_) => "failed",
        }
    }
}

impl fmt::Display for SyncState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncState::Failed(kind) => write!(f, "failed({})", kind),
            state => f.write_str(state.as_str()),
        }
    }
}

/// Statistics about sync operations.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SyncStats {
    /// Total number of requests completed.
    pub cycles_completed: u64,
    /// Total number of requests failed.
    pub cycles_failed: u64,
    /// Total number of retries, across all phases.
    pub retries: u64,
    /// Total number of items pushed upstream.
    pub items_pushed: u64,
    /// Last error message.
    pub last_error: Option<String>,
    /// Completion time of the last successful request.
    pub last_completed: Option<DateTime<Utc>>,
}

/// Cooperative cancellation flag shared between a caller and a cycle.
///
/// Cloning yields a handle to the same flag.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    inner: Arc<CancelInner>,
}

#[derive(Debug, Default)]
struct CancelInner {
    cancelled: AtomicBool,
    notify: Notify,
}

impl CancelToken {
    /// Creates a token that is not cancelled.
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation.
    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::SeqCst);
        self.inner.notify.notify_waiters();
    }

    /// Returns true if cancellation was requested.
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Completes once cancellation is requested.
    pub async fn cancelled(&self) {
        loop {
            let notified = self.inner.notify.notified();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }
}

/// Runs requests on behalf of a [`SyncChannel`](crate::SyncChannel).
#[async_trait]
pub trait SyncExecutor<T: Element>: Send + Sync {
    /// Runs one request to its outcome.
    async fn execute(&self, request: &SyncRequest<T>, cancel: &CancelToken) -> SyncOutcome<T>;

    /// Checks the static configuration.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Config`] if the configuration is unusable.
    fn validate(&self) -> SyncResult<()>;

    /// Returns the current state of `set_id`.
    fn state(&self, set_id: &str) -> SyncState;

    /// Returns the current stats.
    fn stats(&self) -> SyncStats;

    /// Returns `set_id` to idle after a cycle was aborted before producing
    /// an outcome.
    fn reset(&self, _set_id: &str, _reason: &str) {}
}

struct Cycle<'a> {
    correlation_id: CorrelationId,
    set_id: &'a str,
    cancel: &'a CancelToken,
}

impl Cycle<'_> {
    fn check_cancelled(&self) -> SyncResult<()> {
        if self.cancel.is_cancelled() {
            Err(SyncError::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// The sync orchestrator drives requests through the sync state machine.
///
/// It owns the in-memory cache of resolved sets and serializes cycles per
/// set id. Cycles for different set ids may run concurrently.
pub struct SyncOrchestrator<T: Element, S, R> {
    config: SyncConfig,
    store: S,
    transport: R,
    cache: RwLock<HashMap<String, ReplicatedSet<T>>>,
    states: RwLock<HashMap<String, SyncState>>,
    set_locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
    stats: RwLock<SyncStats>,
    observers: Observers,
}

impl<T, S, R> SyncOrchestrator<T, S, R>
where
    T: Element,
    S: PersistenceGateway<T>,
    R: TransportGateway<T>,
{
    /// Creates a new orchestrator.
    ///
    /// The configuration is not validated here; see
    /// [`SyncExecutor::validate`].
    pub fn new(config: SyncConfig, store: S, transport: R) -> Self {
        Self {
            config,
            store,
            transport,
            cache: RwLock::new(HashMap::new()),
            states: RwLock::new(HashMap::new()),
            set_locks: Mutex::new(HashMap::new()),
            stats: RwLock::new(SyncStats::default()),
            observers: Observers::default(),
        }
    }

    /// Adds an observer.
    #[must_use]
    pub fn with_observer(self, observer: impl SyncObserver + 'static) -> Self {
        self.with_shared_observer(Arc::new(observer))
    }

    /// Adds an observer that is shared with the caller.
    #[must_use]
    pub fn with_shared_observer(mut self, observer: Arc<dyn SyncObserver>) -> Self {
        self.observers.push(observer);
        self
    }

    /// Returns the configuration.
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Returns the persistence gateway.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Returns the transport gateway.
    pub fn transport(&self) -> &R {
        &self.transport
    }

    /// Returns the number of attached observers.
    pub fn observer_count(&self) -> usize {
        self.observers.len()
    }

    /// Gets the current state of `set_id`.
    pub fn state(&self, set_id: &str) -> SyncState {
        self.states
            .read()
            .get(set_id)
            .copied()
            .unwrap_or(SyncState::Idle)
    }

    /// Gets the current stats.
    pub fn stats(&self) -> SyncStats {
        self.stats.read().clone()
    }

    /// Returns the cached set for `set_id`, if a cycle has produced one.
    pub fn cached(&self, set_id: &str) -> Option<ReplicatedSet<T>> {
        self.cache.read().get(set_id).cloned()
    }

    /// Runs `request` to its outcome.
    ///
    /// Never fails: errors are reported in the outcome. Concurrent calls for
    /// the same set id run one after the other.
    pub async fn execute(&self, request: &SyncRequest<T>, cancel: &CancelToken) -> SyncOutcome<T> {
        let lock = self.set_lock(&request.set_id);
        let outcome = {
            let _guard = lock.lock().await;
            self.run_cycle(request, cancel).await
        };
        self.release_set_lock(&request.set_id, lock);
        outcome
    }

    /// Marks `set_id` idle and records a failure for a cycle that never
    /// reached its outcome.
    pub fn reset(&self, set_id: &str, reason: &str) {
        self.states.write().remove(set_id);
        let mut stats = self.stats.write();
        stats.cycles_failed += 1;
        stats.last_error = Some(reason.to_string());
    }

    async fn run_cycle(&self, request: &SyncRequest<T>, cancel: &CancelToken) -> SyncOutcome<T> {
        let cycle = Cycle {
            correlation_id: request.correlation_id,
            set_id: &request.set_id,
            cancel,
        };
        tracing::debug!(
            correlation_id = %cycle.correlation_id,
            set_id = cycle.set_id,
            operation = request.operation.name(),
            "starting sync cycle"
        );

        let outcome = match self.run(&cycle, &request.operation).await {
            Ok(set) => {
                self.transition(&cycle, SyncState::Completed, 1, None);
                {
                    let mut stats = self.stats.write();
                    stats.cycles_completed += 1;
                    if request.operation.is_remote() {
                        stats.items_pushed += set.len() as u64;
                    }
                    stats.last_completed = Some(Utc::now());
                    stats.last_error = None;
                }
                tracing::info!(
                    correlation_id = %cycle.correlation_id,
                    set_id = cycle.set_id,
                    operation = request.operation.name(),
                    items = set.len(),
                    "sync cycle completed"
                );
                SyncOutcome::succeeded(cycle.correlation_id, cycle.set_id, set.items())
            }
            Err(err) => {
                let kind = err.kind();
                self.transition(&cycle, SyncState::Failed(kind), 1, None);
                {
                    let mut stats = self.stats.write();
                    stats.cycles_failed += 1;
                    stats.last_error = Some(err.to_string());
                }
                if kind == ErrorKind::Cancelled {
                    tracing::info!(
                        correlation_id = %cycle.correlation_id,
                        set_id = cycle.set_id,
                        "sync cycle cancelled"
                    );
                } else {
                    tracing::error!(
                        correlation_id = %cycle.correlation_id,
                        set_id = cycle.set_id,
                        error_kind = %kind,
                        error = %err,
                        "sync cycle failed"
                    );
                }
                SyncOutcome::failed(cycle.correlation_id, cycle.set_id, kind, err.to_string())
            }
        };

        self.transition(&cycle, SyncState::Idle, 1, None);
        outcome
    }

    async fn run(&self, cycle: &Cycle<'_>, operation: &SyncOperation<T>) -> SyncResult<ReplicatedSet<T>> {
        let strategy = self.config.validate()?;
        let set_id = cycle.set_id;

        cycle.check_cancelled()?;
        self.transition(cycle, SyncState::Connecting, 1, None);
        let remote = operation.is_remote();
        self.with_retry(cycle, SyncState::Connecting, &self.config.connect_retry, true, move || {
            async move { self.connect(remote).await }
        })
        .await?;

        cycle.check_cancelled()?;
        self.transition(cycle, SyncState::Fetching, 1, None);

        match operation {
            SyncOperation::GetItems => {
                self.with_retry(cycle, SyncState::Fetching, &self.config.fetch_retry, true, move || {
                    async move { self.cached_or_load(set_id).await }
                })
                .await
            }
            SyncOperation::Add(item) => {
                self.apply_local(cycle, std::slice::from_ref(item)).await
            }
            SyncOperation::Merge(items) => self.apply_local(cycle, items).await,
            SyncOperation::PullAndResolve => {
                let (local, remote) = self
                    .with_retry(cycle, SyncState::Fetching, &self.config.fetch_retry, true, move || {
                        async move {
                            tokio::try_join!(self.load_local(set_id), self.fetch_remote(set_id))
                        }
                    })
                    .await?;

                cycle.check_cancelled()?;
                self.transition(cycle, SyncState::Resolving, 1, None);
                let resolved = ConflictResolver::new(strategy).resolve_sets(&local, &remote);
                tracing::debug!(
                    correlation_id = %cycle.correlation_id,
                    set_id,
                    %strategy,
                    local = local.len(),
                    remote = remote.len(),
                    resolved = resolved.len(),
                    "resolved remote state"
                );

                cycle.check_cancelled()?;
                self.transition(cycle, SyncState::Persisting, 1, None);
                self.persist(cycle, &resolved).await?;

                self.transition(cycle, SyncState::Pushing, 1, None);
                let snapshot = resolved.to_snapshot();
                let snapshot = &snapshot;
                let transport = &self.transport;
                self.with_retry(cycle, SyncState::Pushing, &self.config.push_retry, false, move || {
                    async move {
                        transport
                            .push(set_id, snapshot)
                            .await
                            .map_err(SyncError::Push)
                    }
                })
                .await?;

                Ok(resolved)
            }
        }
    }

    /// Adds `items` to the local set without contacting the remote.
    async fn apply_local(&self, cycle: &Cycle<'_>, items: &[T]) -> SyncResult<ReplicatedSet<T>> {
        let set_id = cycle.set_id;
        let local = self
            .with_retry(cycle, SyncState::Fetching, &self.config.fetch_retry, true, move || {
                async move { self.load_local(set_id).await }
            })
            .await?;

        cycle.check_cancelled()?;
        self.transition(cycle, SyncState::Resolving, 1, None);
        let next = local.add_all(items.iter().cloned());

        cycle.check_cancelled()?;
        self.transition(cycle, SyncState::Persisting, 1, None);
        self.persist(cycle, &next).await?;
        Ok(next)
    }

    async fn connect(&self, remote: bool) -> SyncResult<()> {
        self.store
            .open()
            .await
            .map_err(|e| SyncError::connection_storage(&e))?;
        if remote {
            self.transport
                .connect()
                .await
                .map_err(|e| SyncError::connection_transport(&e))?;
        }
        Ok(())
    }

    /// Loads the stored set and folds in the cached one.
    ///
    /// A set that was never stored is empty.
    async fn load_local(&self, set_id: &str) -> SyncResult<ReplicatedSet<T>> {
        let stored = self
            .store
            .load(set_id)
            .await
            .map_err(|e| SyncError::fetch_storage(&e))?;
        let mut set = match stored {
            Some(snapshot) => into_set(set_id, snapshot, "local store")?,
            None => ReplicatedSet::new(set_id),
        };
        if let Some(cached) = self.cache.read().get(set_id) {
            set.merge_from(cached);
        }
        Ok(set)
    }

    async fn cached_or_load(&self, set_id: &str) -> SyncResult<ReplicatedSet<T>> {
        if let Some(cached) = self.cached(set_id) {
            return Ok(cached);
        }
        let set = self.load_local(set_id).await?;
        self.cache.write().insert(set_id.to_string(), set.clone());
        Ok(set)
    }

    async fn fetch_remote(&self, set_id: &str) -> SyncResult<ReplicatedSet<T>> {
        match self
            .transport
            .fetch(set_id)
            .await
            .map_err(|e| SyncError::fetch_transport(&e))?
        {
            Some(snapshot) => into_set(set_id, snapshot, "remote"),
            None => Ok(ReplicatedSet::new(set_id)),
        }
    }

    /// Saves `set` and updates the cache.
    ///
    /// Retried only when the store declares idempotent writes. Not
    /// cancellable.
    async fn persist(&self, cycle: &Cycle<'_>, set: &ReplicatedSet<T>) -> SyncResult<()> {
        let policy = if self.store.idempotent_writes() {
            self.config.persist_retry.clone()
        } else {
            RetryConfig::no_retry()
        };
        let snapshot = set.to_snapshot();
        let snapshot = &snapshot;
        let store = &self.store;
        let set_id = cycle.set_id;
        self.with_retry(cycle, SyncState::Persisting, &policy, false, move || {
            async move { store.save(set_id, snapshot).await.map_err(SyncError::Persist) }
        })
        .await?;

        self.cache.write().insert(set_id.to_string(), set.clone());
        Ok(())
    }

    /// Runs `op` until it succeeds, fails with a non-retryable error, or
    /// exhausts `policy`. Each retry re-enters `state`.
    ///
    /// Writes are never timed out: a save is either finished or not started.
    async fn with_retry<V, F, Fut>(
        &self,
        cycle: &Cycle<'_>,
        state: SyncState,
        policy: &RetryConfig,
        cancellable: bool,
        mut op: F,
    ) -> SyncResult<V>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = SyncResult<V>>,
    {
        let mut attempt = 1u32;
        loop {
            let limit = self.config.timeout.filter(|_| state != SyncState::Persisting);
            let result = match limit {
                Some(limit) => match tokio::time::timeout(limit, op()).await {
                    Ok(result) => result,
                    Err(_) => Err(timeout_error(state, limit)),
                },
                None => op().await,
            };

            let err = match result {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };
            if !err.is_retryable() || attempt >= policy.max_attempts {
                return Err(err);
            }

            let delay = policy.delay_for_attempt(attempt);
            attempt += 1;
            self.stats.write().retries += 1;
            tracing::warn!(
                correlation_id = %cycle.correlation_id,
                set_id = cycle.set_id,
                %state,
                attempt,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "sync step failed, retrying"
            );
            self.transition(cycle, state, attempt, Some(delay));

            if cancellable {
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = cycle.cancel.cancelled() => return Err(SyncError::Cancelled),
                }
            } else {
                tokio::time::sleep(delay).await;
            }
        }
    }

    fn transition(&self, cycle: &Cycle<'_>, state: SyncState, attempt: u32, retry_delay: Option<Duration>) {
        {
            let mut states = self.states.write();
            if state == SyncState::Idle {
                states.remove(cycle.set_id);
            } else {
                states.insert(cycle.set_id.to_string(), state);
            }
        }
        tracing::trace!(
            correlation_id = %cycle.correlation_id,
            set_id = cycle.set_id,
            %state,
            attempt,
            "state transition"
        );
        self.observers.notify(&ProgressEvent {
            correlation_id: cycle.correlation_id,
            set_id: cycle.set_id.to_string(),
            state,
            attempt,
            retry_delay,
            timestamp: Utc::now(),
        });
    }

    fn set_lock(&self, set_id: &str) -> Arc<tokio::sync::Mutex<()>> {
        Arc::clone(
            self.set_locks
                .lock()
                .entry(set_id.to_string())
                .or_default(),
        )
    }

    /// Drops the lock of `set_id` unless another cycle is waiting on it.
    fn release_set_lock(&self, set_id: &str, lock: Arc<tokio::sync::Mutex<()>>) {
        let mut locks = self.set_locks.lock();
        // One reference in the map, one held here.
        if Arc::strong_count(&lock) == 2 {
            locks.remove(set_id);
        }
    }

    #[cfg(test)]
    fn lock_count(&self) -> usize {
        self.set_locks.lock().len()
    }
}

#[async_trait]
impl<T, S, R> SyncExecutor<T> for SyncOrchestrator<T, S, R>
where
    T: Element,
    S: PersistenceGateway<T>,
    R: TransportGateway<T>,
{
    async fn execute(&self, request: &SyncRequest<T>, cancel: &CancelToken) -> SyncOutcome<T> {
        SyncOrchestrator::execute(self, request, cancel).await
    }

    fn validate(&self) -> SyncResult<()> {
        self.config.validate().map(|_| ())
    }

    fn state(&self, set_id: &str) -> SyncState {
        SyncOrchestrator::state(self, set_id)
    }

    fn stats(&self) -> SyncStats {
        SyncOrchestrator::stats(self)
    }

    fn reset(&self, set_id: &str, reason: &str) {
        SyncOrchestrator::reset(self, set_id, reason);
    }
}

fn into_set<T: Element>(set_id: &str, snapshot: Snapshot<T>, source: &str) -> SyncResult<ReplicatedSet<T>> {
    if snapshot.id != set_id {
        return Err(SyncError::Fetch {
            message: format!(
                "{} returned snapshot {:?} for set {:?}",
                source, snapshot.id, set_id
            ),
            retryable: false,
        });
    }
    Ok(ReplicatedSet::from_snapshot(snapshot))
}

fn timeout_error(state: SyncState, limit: Duration) -> SyncError {
    let message = format!("timed out after {:?}", limit);
    match state {
        SyncState::Connecting => SyncError::Connection {
            message,
            retryable: true,
        },
        SyncState::Pushing => SyncError::Push(TransportError::retryable(message)),
        _ => SyncError::Fetch {
            message,
            retryable: true,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MockTransport;
    use replisync_protocol::ResolutionStrategy;
    use replisync_storage::MemoryStore;

    type TestOrchestrator = SyncOrchestrator<String, Arc<MemoryStore<String>>, Arc<MockTransport<String>>>;

    fn snapshot(id: &str, items: &[&str]) -> Snapshot<String> {
        Snapshot::new(id, items.iter().map(|s| s.to_string()).collect())
    }

    fn orchestrator(
        strategy: ResolutionStrategy,
    ) -> (TestOrchestrator, Arc<MemoryStore<String>>, Arc<MockTransport<String>>) {
        let store = Arc::new(MemoryStore::new());
        let transport = Arc::new(MockTransport::new());
        let config = SyncConfig::new(strategy).with_retry(RetryConfig::new(3).with_jitter(false));
        let orchestrator = SyncOrchestrator::new(config, Arc::clone(&store), Arc::clone(&transport));
        (orchestrator, store, transport)
    }

    #[test]
    fn sync_state_checks() {
        assert!(SyncState::Completed.is_terminal());
        assert!(SyncState::Failed(ErrorKind::Push).is_terminal());
        assert!(!SyncState::Pushing.is_terminal());

        assert!(SyncState::Fetching.is_active());
        assert!(!SyncState::Idle.is_active());

        assert!(SyncState::Resolving.is_cancellable());
        assert!(!SyncState::Persisting.is_cancellable());
        assert!(!SyncState::Pushing.is_cancellable());
    }

    #[test]
    fn foreign_snapshot_is_rejected() {
        let err = into_set("s", snapshot("other", &["x"]), "remote").unwrap_err();
        assert!(matches!(err, SyncError::Fetch { retryable: false, .. }));
        assert_eq!(into_set("s", snapshot("s", &["x"]), "remote").unwrap().len(), 1);
    }

    #[test]
    fn sync_state_display() {
        assert_eq!(SyncState::Fetching.to_string(), "fetching");
        assert_eq!(SyncState::Failed(ErrorKind::Config).to_string(), "failed(config)");
    }

    #[tokio::test]
    async fn cancel_token_wakes_waiters() {
        let token = CancelToken::new();
        let waiter = {
            let token = token.clone();
            tokio::spawn(async move { token.cancelled().await })
        };
        tokio::task::yield_now().await;
        token.cancel();
        waiter.await.unwrap();
        assert!(token.is_cancelled());
    }

    #[tokio::test]
    async fn initial_state() {
        let (orchestrator, _, _) = orchestrator(ResolutionStrategy::Merge);
        assert_eq!(orchestrator.state("s"), SyncState::Idle);
        assert_eq!(orchestrator.stats().cycles_completed, 0);
        assert!(orchestrator.cached("s").is_none());
    }

    #[tokio::test]
    async fn pull_and_resolve_merges() {
        let (orchestrator, store, transport) = orchestrator(ResolutionStrategy::Merge);
        store.save("s", &snapshot("s", &["a"])).await.unwrap();
        transport.set_remote(snapshot("s", &["b"]));

        let outcome = orchestrator
            .execute(&SyncRequest::pull_and_resolve("s"), &CancelToken::new())
            .await;

        assert!(outcome.is_success());
        assert_eq!(outcome.items, vec!["a".to_string(), "b".to_string()]);
        assert_eq!(store.get("s").unwrap().items.len(), 2);
        assert_eq!(transport.pushed().len(), 1);
        assert_eq!(orchestrator.state("s"), SyncState::Idle);
        assert_eq!(orchestrator.stats().items_pushed, 2);
    }

    #[tokio::test]
    async fn server_wins_discards_local() {
        let (orchestrator, store, transport) = orchestrator(ResolutionStrategy::ServerWins);
        store.save("s", &snapshot("s", &["local"])).await.unwrap();
        transport.set_remote(snapshot("s", &["remote"]));

        let outcome = orchestrator
            .execute(&SyncRequest::pull_and_resolve("s"), &CancelToken::new())
            .await;
        assert_eq!(outcome.items, vec!["remote".to_string()]);
    }

    #[tokio::test]
    async fn add_is_local_only() {
        let (orchestrator, store, transport) = orchestrator(ResolutionStrategy::Merge);
        transport.set_connected(false);

        let outcome = orchestrator
            .execute(&SyncRequest::add("s", "x".to_string()), &CancelToken::new())
            .await;

        assert!(outcome.is_success());
        assert_eq!(store.get("s").unwrap().items, vec!["x".to_string()]);
        assert_eq!(transport.fetch_calls(), 0);
        assert_eq!(transport.push_calls(), 0);
    }

    #[tokio::test]
    async fn get_items_prefers_cache() {
        let (orchestrator, store, _) = orchestrator(ResolutionStrategy::Merge);
        orchestrator
            .execute(&SyncRequest::merge("s", vec!["a".into(), "b".into()]), &CancelToken::new())
            .await;
        store.clear();

        let outcome = orchestrator
            .execute(&SyncRequest::get_items("s"), &CancelToken::new())
            .await;
        assert_eq!(outcome.item_count(), 2);
    }

    #[tokio::test]
    async fn fatal_fetch_error_is_not_retried() {
        let (orchestrator, _, transport) = orchestrator(ResolutionStrategy::Merge);
        transport.fail_next_fetch(TransportError::fatal("boom"));

        let outcome = orchestrator
            .execute(&SyncRequest::pull_and_resolve("s"), &CancelToken::new())
            .await;
        assert_eq!(outcome.error_kind(), Some(ErrorKind::Fetch));
        assert_eq!(transport.fetch_calls(), 1);
    }

    #[tokio::test]
    async fn cancelled_before_start() {
        let (orchestrator, store, transport) = orchestrator(ResolutionStrategy::Merge);
        let cancel = CancelToken::new();
        cancel.cancel();

        let outcome = orchestrator
            .execute(&SyncRequest::pull_and_resolve("s"), &cancel)
            .await;
        assert_eq!(outcome.error_kind(), Some(ErrorKind::Cancelled));
        assert_eq!(transport.connect_calls(), 0);
        assert_eq!(store.snapshot_count(), 0);
    }

    #[tokio::test]
    async fn set_locks_are_released_after_cycles() {
        let (orchestrator, _, _) = orchestrator(ResolutionStrategy::Merge);
        for n in 0..50 {
            let outcome = orchestrator
                .execute(&SyncRequest::get_items(format!("set-{}", n)), &CancelToken::new())
                .await;
            assert!(outcome.is_success());
        }
        assert_eq!(orchestrator.lock_count(), 0);
    }

    #[tokio::test]
    async fn reset_returns_set_to_idle() {
        let (orchestrator, _, _) = orchestrator(ResolutionStrategy::Merge);
        orchestrator
            .states
            .write()
            .insert("s".to_string(), SyncState::Fetching);

        orchestrator.reset("s", "sync cycle aborted");
        assert_eq!(orchestrator.state("s"), SyncState::Idle);
        assert_eq!(orchestrator.stats().cycles_failed, 1);
        assert_eq!(orchestrator.stats().last_error.as_deref(), Some("sync cycle aborted"));
    }

    #[tokio::test]
    async fn store_offline_is_connection_error() {
        let (orchestrator, store, _) = orchestrator(ResolutionStrategy::Merge);
        let orchestrator = SyncOrchestrator::new(
            orchestrator.config().clone().with_retry(RetryConfig::no_retry()),
            Arc::clone(&store),
            MockTransport::new(),
        );
        store.set_available(false);

        let outcome = orchestrator
            .execute(&SyncRequest::add("s", "x".to_string()), &CancelToken::new())
            .await;
        assert_eq!(outcome.error_kind(), Some(ErrorKind::Connection));
        assert_eq!(orchestrator.stats().cycles_failed, 1);
    }
}
