//! Background request channel.
//!
//! [`SyncChannel`] is the boundary between a caller and the engine running
//! on background tasks:
//!
//! ```text
//!  caller ──submit──► bounded queue ──► dispatcher ──► lane("todos") ──► executor
//!    ▲                                      │
//!    │                                      └────────► lane("notes") ──► executor
//!    └──────────── SyncTicket ◄──── outcome ◄──────────────┘
//! ```
//!
//! Each set id gets its own lane, which runs its requests one at a time in
//! submission order. A semaphore bounds how many lanes run a cycle at once.
//! A lane is retired as soon as it has no queued work and is started again
//! by the next request for its set id.

use crate::config::ChannelConfig;
use crate::error::{ErrorKind, SyncError, SyncResult};
use crate::request::{CorrelationId, SyncOutcome, SyncRequest};
use crate::state::{CancelToken, SyncExecutor, SyncState, SyncStats};
use hashlink::LruCache;
use parking_lot::Mutex;
use replisync_protocol::Element;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot, Semaphore};
use tokio::task::JoinHandle;

struct Job<T> {
    request: SyncRequest<T>,
    cancel: CancelToken,
}

struct InFlight<T> {
    cancel: CancelToken,
    waiters: Vec<oneshot::Sender<SyncOutcome<T>>>,
}

/// Correlation bookkeeping shared by the handle and the lanes.
struct Registry<T> {
    in_flight: HashMap<CorrelationId, InFlight<T>>,
    completed: LruCache<CorrelationId, SyncOutcome<T>>,
}

impl<T: Element> Registry<T> {
    fn new(dedupe_window: usize) -> Self {
        Self {
            in_flight: HashMap::new(),
            completed: LruCache::new(dedupe_window.max(1)),
        }
    }

    /// Attaches a new ticket to a known correlation id.
    fn attach(&mut self, correlation_id: CorrelationId) -> Option<SyncTicket<T>> {
        if let Some(outcome) = self.completed.get(&correlation_id) {
            tracing::debug!(%correlation_id, "replaying completed request");
            let (sender, receiver) = oneshot::channel();
            let _ = sender.send(outcome.clone());
            return Some(SyncTicket {
                correlation_id,
                receiver,
                cancel: CancelToken::new(),
            });
        }

        let entry = self.in_flight.get_mut(&correlation_id)?;
        tracing::debug!(%correlation_id, "attaching to in-flight request");
        let (sender, receiver) = oneshot::channel();
        entry.waiters.push(sender);
        Some(SyncTicket {
            correlation_id,
            receiver,
            cancel: entry.cancel.clone(),
        })
    }

    fn finish(&mut self, outcome: SyncOutcome<T>) {
        if let Some(entry) = self.in_flight.remove(&outcome.correlation_id) {
            for waiter in entry.waiters {
                // The caller may have dropped its ticket.
                let _ = waiter.send(outcome.clone());
            }
        }
        self.completed.insert(outcome.correlation_id, outcome);
    }

    /// Drops every waiter of a request that will never complete.
    fn abandon(&mut self, correlation_id: &CorrelationId) {
        self.in_flight.remove(correlation_id);
    }
}

/// Receipt for a submitted request.
///
/// Resolves to exactly one [`SyncOutcome`].
#[derive(Debug)]
pub struct SyncTicket<T> {
    correlation_id: CorrelationId,
    receiver: oneshot::Receiver<SyncOutcome<T>>,
    cancel: CancelToken,
}

impl<T> SyncTicket<T> {
    /// Returns the correlation id of the request.
    pub fn correlation_id(&self) -> CorrelationId {
        self.correlation_id
    }

    /// Requests cancellation. Ignored once the request started persisting.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Waits for the outcome.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::ChannelClosed`] if the engine stopped before the
    /// request completed.
    pub async fn outcome(self) -> SyncResult<SyncOutcome<T>> {
        self.receiver.await.map_err(|_| SyncError::ChannelClosed)
    }
}

/// Handle to the background sync engine.
///
/// Submitting returns immediately with a [`SyncTicket`]; the outcome is
/// delivered asynchronously. Requests with a correlation id that is already
/// in flight or recently completed are not run again; they receive the same
/// outcome as the original.
///
/// # Example
///
/// ```rust
/// use replisync_engine::{
///     ChannelConfig, MockTransport, SyncChannel, SyncConfig, SyncOrchestrator, SyncRequest,
/// };
/// use replisync_storage::MemoryStore;
///
/// # let rt = tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap();
/// # rt.block_on(async {
/// let orchestrator = SyncOrchestrator::new(
///     SyncConfig::default(),
///     MemoryStore::<String>::new(),
///     MockTransport::new(),
/// );
/// let channel = SyncChannel::spawn(orchestrator, ChannelConfig::default()).unwrap();
///
/// let ticket = channel.submit(SyncRequest::add("todos", "milk".to_string())).await.unwrap();
/// let outcome = ticket.outcome().await.unwrap();
/// assert!(outcome.is_success());
///
/// channel.shutdown().await.unwrap();
/// # });
/// ```
pub struct SyncChannel<T: Element> {
    sender: mpsc::Sender<Job<T>>,
    registry: Arc<Mutex<Registry<T>>>,
    executor: Arc<dyn SyncExecutor<T>>,
    lanes: Arc<AtomicUsize>,
    dispatcher: JoinHandle<()>,
}

impl<T: Element> SyncChannel<T> {
    /// Starts the background tasks for `executor`.
    ///
    /// Must be called from within a `tokio` runtime.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Config`] if the executor's configuration is
    /// invalid. This is the only fatal error of the engine.
    pub fn spawn<E>(executor: E, config: ChannelConfig) -> SyncResult<Self>
    where
        E: SyncExecutor<T> + 'static,
    {
        Self::spawn_shared(Arc::new(executor), config)
    }

    /// Starts the background tasks for an executor shared with the caller.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Config`] if the executor's configuration is
    /// invalid.
    pub fn spawn_shared(executor: Arc<dyn SyncExecutor<T>>, config: ChannelConfig) -> SyncResult<Self> {
        executor.validate()?;

        let (sender, receiver) = mpsc::channel(config.queue_capacity.max(1));
        let registry = Arc::new(Mutex::new(Registry::new(config.dedupe_window)));
        let semaphore = Arc::new(Semaphore::new(config.max_concurrent_sets.max(1)));
        let lanes = Arc::new(AtomicUsize::new(0));
        let dispatcher = tokio::spawn(dispatch(
            receiver,
            Arc::clone(&executor),
            Arc::clone(&registry),
            semaphore,
            Arc::clone(&lanes),
        ));

        tracing::info!(
            queue_capacity = config.queue_capacity,
            max_concurrent_sets = config.max_concurrent_sets,
            "sync channel started"
        );

        Ok(Self {
            sender,
            registry,
            executor,
            lanes,
            dispatcher,
        })
    }

    /// Submits a request, waiting for queue capacity if needed.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::ChannelClosed`] if the engine has stopped.
    pub async fn submit(&self, request: SyncRequest<T>) -> SyncResult<SyncTicket<T>> {
        let attached = self.registry.lock().attach(request.correlation_id);
        if let Some(ticket) = attached {
            return Ok(ticket);
        }
        let permit = self
            .sender
            .reserve()
            .await
            .map_err(|_| SyncError::ChannelClosed)?;
        Ok(self.enqueue(permit, request))
    }

    /// Submits a request without waiting.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::QueueFull`] if the queue is at capacity, or
    /// [`SyncError::ChannelClosed`] if the engine has stopped.
    pub fn try_submit(&self, request: SyncRequest<T>) -> SyncResult<SyncTicket<T>> {
        let attached = self.registry.lock().attach(request.correlation_id);
        if let Some(ticket) = attached {
            return Ok(ticket);
        }
        let permit = self.sender.try_reserve().map_err(|err| match err {
            TrySendError::Full(()) => SyncError::QueueFull,
            TrySendError::Closed(()) => SyncError::ChannelClosed,
        })?;
        Ok(self.enqueue(permit, request))
    }

    /// Submits a request and waits for its outcome.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::ChannelClosed`] if the engine has stopped.
    pub async fn request(&self, request: SyncRequest<T>) -> SyncResult<SyncOutcome<T>> {
        self.submit(request).await?.outcome().await
    }

    /// Requests cancellation of an in-flight request.
    ///
    /// Returns `false` if no such request is in flight.
    pub fn cancel(&self, correlation_id: &CorrelationId) -> bool {
        match self.registry.lock().in_flight.get(correlation_id) {
            Some(entry) => {
                entry.cancel.cancel();
                true
            }
            None => false,
        }
    }

    /// Returns the current state of `set_id`.
    pub fn state(&self, set_id: &str) -> SyncState {
        self.executor.state(set_id)
    }

    /// Returns the executor's stats.
    pub fn stats(&self) -> SyncStats {
        self.executor.stats()
    }

    /// Returns the number of requests accepted but not yet completed.
    pub fn in_flight(&self) -> usize {
        self.registry.lock().in_flight.len()
    }

    /// Returns the number of set ids that currently have a lane.
    pub fn lanes(&self) -> usize {
        self.lanes.load(Ordering::SeqCst)
    }

    /// Stops accepting requests and waits until every queued request has
    /// completed.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::ChannelClosed`] if the dispatcher task failed.
    pub async fn shutdown(self) -> SyncResult<()> {
        let Self {
            sender, dispatcher, ..
        } = self;
        drop(sender);
        dispatcher.await.map_err(|err| {
            tracing::error!(error = %err, "sync dispatcher failed");
            SyncError::ChannelClosed
        })?;
        tracing::info!("sync channel stopped");
        Ok(())
    }

    fn enqueue(&self, permit: mpsc::Permit<'_, Job<T>>, request: SyncRequest<T>) -> SyncTicket<T> {
        let mut registry = self.registry.lock();
        // A duplicate may have been accepted while this one waited for capacity.
        if let Some(ticket) = registry.attach(request.correlation_id) {
            return ticket;
        }

        let correlation_id = request.correlation_id;
        let cancel = CancelToken::new();
        let (sender, receiver) = oneshot::channel();
        registry.in_flight.insert(
            correlation_id,
            InFlight {
                cancel: cancel.clone(),
                waiters: vec![sender],
            },
        );
        tracing::debug!(
            %correlation_id,
            set_id = %request.set_id,
            operation = request.operation.name(),
            "request queued"
        );
        permit.send(Job {
            request,
            cancel: cancel.clone(),
        });

        SyncTicket {
            correlation_id,
            receiver,
            cancel,
        }
    }
}

struct Lane<T> {
    sender: mpsc::UnboundedSender<Job<T>>,
    /// Jobs sent to the lane and not yet finished. Only the dispatcher
    /// increments it.
    pending: Arc<AtomicUsize>,
    task: JoinHandle<()>,
}

async fn dispatch<T: Element>(
    mut receiver: mpsc::Receiver<Job<T>>,
    executor: Arc<dyn SyncExecutor<T>>,
    registry: Arc<Mutex<Registry<T>>>,
    semaphore: Arc<Semaphore>,
    gauge: Arc<AtomicUsize>,
) {
    let mut lanes: HashMap<String, Lane<T>> = HashMap::new();
    let (idle_sender, mut idle_receiver) = mpsc::unbounded_channel::<String>();

    loop {
        tokio::select! {
            job = receiver.recv() => {
                let Some(job) = job else { break };
                let set_id = job.request.set_id.clone();
                let lane = lanes.entry(set_id.clone()).or_insert_with(|| {
                    let (sender, lane_receiver) = mpsc::unbounded_channel();
                    let pending = Arc::new(AtomicUsize::new(0));
                    let task = tokio::spawn(run_lane(
                        set_id,
                        lane_receiver,
                        Arc::clone(&executor),
                        Arc::clone(&registry),
                        Arc::clone(&semaphore),
                        Arc::clone(&pending),
                        idle_sender.clone(),
                    ));
                    Lane { sender, pending, task }
                });

                lane.pending.fetch_add(1, Ordering::SeqCst);
                if let Err(mpsc::error::SendError(job)) = lane.sender.send(job) {
                    lane.pending.fetch_sub(1, Ordering::SeqCst);
                    tracing::error!(set_id = %job.request.set_id, "lane stopped, dropping request");
                    registry.lock().abandon(&job.request.correlation_id);
                }
                gauge.store(lanes.len(), Ordering::SeqCst);
            }
            Some(set_id) = idle_receiver.recv() => {
                let idle = lanes
                    .get(&set_id)
                    .is_some_and(|lane| lane.pending.load(Ordering::SeqCst) == 0);
                if idle {
                    // Dropping the sender ends the lane task.
                    lanes.remove(&set_id);
                    gauge.store(lanes.len(), Ordering::SeqCst);
                    tracing::trace!(%set_id, "lane retired");
                }
            }
        }
    }

    tracing::debug!(lanes = lanes.len(), "draining lanes");
    for (set_id, lane) in lanes {
        drop(lane.sender);
        if let Err(err) = lane.task.await {
            tracing::error!(%set_id, error = %err, "lane task failed");
        }
    }
    gauge.store(0, Ordering::SeqCst);
}

async fn run_lane<T: Element>(
    set_id: String,
    mut receiver: mpsc::UnboundedReceiver<Job<T>>,
    executor: Arc<dyn SyncExecutor<T>>,
    registry: Arc<Mutex<Registry<T>>>,
    semaphore: Arc<Semaphore>,
    pending: Arc<AtomicUsize>,
    idle: mpsc::UnboundedSender<String>,
) {
    while let Some(job) = receiver.recv().await {
        let Ok(permit) = semaphore.acquire().await else {
            break;
        };
        let outcome = run_job(&executor, job).await;
        drop(permit);
        registry.lock().finish(outcome);

        if pending.fetch_sub(1, Ordering::SeqCst) == 1 {
            // The dispatcher may already be gone during shutdown.
            let _ = idle.send(set_id.clone());
        }
    }
}

/// Runs one job on its own task so that a panicking gateway still yields
/// an outcome.
async fn run_job<T: Element>(executor: &Arc<dyn SyncExecutor<T>>, job: Job<T>) -> SyncOutcome<T> {
    let correlation_id = job.request.correlation_id;
    let set_id = job.request.set_id.clone();
    let task = {
        let executor = Arc::clone(executor);
        tokio::spawn(async move { executor.execute(&job.request, &job.cancel).await })
    };

    match task.await {
        Ok(outcome) => outcome,
        Err(err) => {
            let kind = aborted_kind(executor.state(&set_id));
            let reason = format!("sync cycle aborted: {}", err);
            tracing::error!(%correlation_id, %set_id, error_kind = %kind, error = %err, "sync cycle aborted");
            executor.reset(&set_id, &reason);
            SyncOutcome::failed(correlation_id, set_id, kind, reason)
        }
    }
}

/// Maps the state an aborted cycle was in to the kind of its failure.
fn aborted_kind(state: SyncState) -> ErrorKind {
    match state {
        SyncState::Connecting => ErrorKind::Connection,
        SyncState::Persisting => ErrorKind::Persist,
        SyncState::Pushing => ErrorKind::Push,
        SyncState::Failed(kind) => kind,
        _ => ErrorKind::Fetch,
    }
}
