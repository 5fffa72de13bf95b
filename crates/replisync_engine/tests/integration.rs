//! End-to-end tests for the sync orchestrator and channel.

use replisync_engine::{
    CancelToken, ChannelConfig, ErrorKind, HttpTransport, LoopbackClient, MockTransport,
    ProgressEvent, SyncChannel, SyncConfig, SyncError, SyncOrchestrator, SyncRequest, SyncState,
    TransportError,
};
use async_trait::async_trait;
use replisync_protocol::{ResolutionStrategy, Snapshot};
use replisync_server::{PushPolicy, ServerConfig, ServerTransport, SyncServer};
use replisync_storage::{FileStore, MemoryStore, PersistenceGateway, StorageError, StorageResult};
use replisync_testkit::{
    fast_retry, string_snapshot, test_config, FlakyStore, GatedTransport, RecordingObserver,
    TestStore,
};
use std::sync::Arc;
use std::time::Duration;

type Orchestrator<R> = SyncOrchestrator<String, Arc<FlakyStore<String>>, Arc<R>>;

fn items(values: &[&str]) -> Vec<String> {
    values.iter().map(|s| s.to_string()).collect()
}

fn local_store(values: &[&str]) -> Arc<FlakyStore<String>> {
    Arc::new(FlakyStore::wrap(MemoryStore::with_snapshots([
        string_snapshot("s", values),
    ])))
}

fn remote(values: &[&str]) -> Arc<MockTransport<String>> {
    Arc::new(MockTransport::with_remote(string_snapshot("s", values)))
}

fn orchestrator<R>(config: SyncConfig, store: &Arc<FlakyStore<String>>, transport: &Arc<R>) -> Orchestrator<R>
where
    R: replisync_engine::TransportGateway<String>,
{
    SyncOrchestrator::new(config, Arc::clone(store), Arc::clone(transport))
}

#[tokio::test(start_paused = true)]
async fn merge_persists_and_pushes_once() {
    let store = local_store(&["a"]);
    let transport = remote(&["b"]);
    let sync = orchestrator(test_config(ResolutionStrategy::Merge), &store, &transport);

    let outcome = sync
        .execute(&SyncRequest::pull_and_resolve("s"), &CancelToken::new())
        .await;

    assert!(outcome.is_success(), "{:?}", outcome.error);
    assert_eq!(outcome.items, items(&["a", "b"]));
    assert_eq!(store.save_calls(), 1);
    assert_eq!(store.inner().get("s").unwrap().items, items(&["a", "b"]));
    assert_eq!(transport.push_calls(), 1);
    assert_eq!(transport.remote("s").unwrap().items, items(&["a", "b"]));
    assert_eq!(sync.state("s"), SyncState::Idle);
}

#[tokio::test(start_paused = true)]
async fn winner_strategies_pick_one_side() {
    let store = local_store(&["a"]);
    let transport = remote(&["b"]);
    let client = orchestrator(test_config(ResolutionStrategy::ClientWins), &store, &transport);
    let outcome = client
        .execute(&SyncRequest::pull_and_resolve("s"), &CancelToken::new())
        .await;
    assert_eq!(outcome.items, items(&["a"]));
    assert_eq!(transport.remote("s").unwrap().items, items(&["a"]));

    let store = local_store(&["a"]);
    let transport = remote(&["b"]);
    let server = orchestrator(test_config(ResolutionStrategy::ServerWins), &store, &transport);
    let outcome = server
        .execute(&SyncRequest::pull_and_resolve("s"), &CancelToken::new())
        .await;
    assert_eq!(outcome.items, items(&["b"]));
    assert_eq!(store.inner().get("s").unwrap().items, items(&["b"]));
}

#[tokio::test(start_paused = true)]
async fn push_retries_without_repersisting() {
    let store = local_store(&["a"]);
    let transport = remote(&["b"]);
    transport.fail_next_push(TransportError::from_status(503, "busy"));
    transport.fail_next_push(TransportError::retryable("connection reset"));

    let recorder = Arc::new(RecordingObserver::new());
    let sync = orchestrator(test_config(ResolutionStrategy::Merge), &store, &transport)
        .with_shared_observer(Arc::clone(&recorder) as _);

    let outcome = sync
        .execute(&SyncRequest::pull_and_resolve("s"), &CancelToken::new())
        .await;

    assert!(outcome.is_success());
    assert_eq!(transport.push_calls(), 3);
    assert_eq!(store.save_calls(), 1);

    let retries: Vec<ProgressEvent> = recorder.retries();
    assert_eq!(retries.len(), 2);
    assert!(retries.iter().all(|e| e.state == SyncState::Pushing));
    assert_eq!(retries[0].attempt, 2);
    assert_eq!(retries[1].attempt, 3);
    let first = retries[0].retry_delay.unwrap();
    let second = retries[1].retry_delay.unwrap();
    assert!(second > first);

    let states = recorder.states();
    assert_eq!(
        states,
        vec![
            SyncState::Connecting,
            SyncState::Fetching,
            SyncState::Resolving,
            SyncState::Persisting,
            SyncState::Pushing,
            SyncState::Pushing,
            SyncState::Pushing,
            SyncState::Completed,
            SyncState::Idle,
        ]
    );
    assert_eq!(sync.stats().retries, 2);
}

#[tokio::test(start_paused = true)]
async fn push_exhaustion_fails_after_persisting() {
    let store = local_store(&["a"]);
    let transport = remote(&[]);
    for _ in 0..3 {
        transport.fail_next_push(TransportError::retryable("down"));
    }
    let sync = orchestrator(test_config(ResolutionStrategy::Merge), &store, &transport);

    let outcome = sync
        .execute(&SyncRequest::pull_and_resolve("s"), &CancelToken::new())
        .await;

    assert_eq!(outcome.error_kind(), Some(ErrorKind::Push));
    assert_eq!(store.save_calls(), 1);
    assert_eq!(transport.push_calls(), 3);
}

#[tokio::test(start_paused = true)]
async fn fatal_push_error_is_not_retried() {
    let store = local_store(&["a"]);
    let transport = remote(&[]);
    transport.fail_next_push(TransportError::from_status(400, "rejected"));
    let sync = orchestrator(test_config(ResolutionStrategy::Merge), &store, &transport);

    let outcome = sync
        .execute(&SyncRequest::pull_and_resolve("s"), &CancelToken::new())
        .await;

    assert_eq!(outcome.error_kind(), Some(ErrorKind::Push));
    assert_eq!(transport.push_calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn invalid_strategy_touches_no_gateway() {
    let store = local_store(&["a"]);
    let transport = remote(&["b"]);
    let config = test_config(ResolutionStrategy::Merge).with_strategy_setting("newest-wins");
    let sync = orchestrator(config, &store, &transport);

    let outcome = sync
        .execute(&SyncRequest::pull_and_resolve("s"), &CancelToken::new())
        .await;

    assert_eq!(outcome.error_kind(), Some(ErrorKind::Config));
    assert_eq!(store.total_calls(), 0);
    assert_eq!(transport.connect_calls(), 0);
    assert_eq!(transport.fetch_calls(), 0);
    assert_eq!(transport.push_calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn channel_refuses_invalid_strategy() {
    let store = local_store(&[]);
    let transport = remote(&[]);
    let config = test_config(ResolutionStrategy::Merge).with_strategy_setting("");
    let sync = orchestrator(config, &store, &transport);

    let result = SyncChannel::spawn(sync, ChannelConfig::default());
    assert!(matches!(result, Err(SyncError::Config(_))));
    assert_eq!(store.total_calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn channel_refuses_unusable_backoff() {
    let store = local_store(&["a"]);
    let transport = remote(&[]);
    let config: SyncConfig = serde_json::from_str(
        r#"{ "strategy": "merge", "push_retry": { "backoff_multiplier": -2.0 } }"#,
    )
    .unwrap();
    let sync = orchestrator(config, &store, &transport);

    let result = SyncChannel::spawn(sync, ChannelConfig::default());
    assert!(matches!(result, Err(SyncError::Config(_))));
    assert_eq!(store.total_calls(), 0);
}

/// A store whose loads panic.
struct PanickingStore;

#[async_trait]
impl PersistenceGateway<String> for PanickingStore {
    async fn load(&self, _set_id: &str) -> StorageResult<Option<Snapshot<String>>> {
        panic!("index corrupted")
    }

    async fn save(&self, _set_id: &str, _snapshot: &Snapshot<String>) -> StorageResult<()> {
        Ok(())
    }

    async fn delete(&self, _set_id: &str) -> StorageResult<bool> {
        Ok(false)
    }

    async fn list(&self) -> StorageResult<Vec<String>> {
        Ok(Vec::new())
    }
}

#[tokio::test(start_paused = true)]
async fn panicking_gateway_still_yields_failed_outcome() {
    let sync = SyncOrchestrator::new(
        test_config(ResolutionStrategy::Merge),
        PanickingStore,
        MockTransport::<String>::new(),
    );
    let channel = SyncChannel::spawn(sync, ChannelConfig::default()).unwrap();

    let outcome = channel
        .request(SyncRequest::pull_and_resolve("s"))
        .await
        .unwrap();

    assert_eq!(outcome.error_kind(), Some(ErrorKind::Fetch));
    assert_eq!(channel.state("s"), SyncState::Idle);
    assert_eq!(channel.stats().cycles_failed, 1);
    channel.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn cancel_during_fetch_skips_persist() {
    let store = local_store(&["a"]);
    let transport = Arc::new(GatedTransport::new(MockTransport::with_remote(
        string_snapshot("s", &["b"]),
    )));
    let sync = Arc::new(orchestrator(
        test_config(ResolutionStrategy::Merge),
        &store,
        &transport,
    ));
    let cancel = CancelToken::new();

    let cycle = tokio::spawn({
        let sync = Arc::clone(&sync);
        let cancel = cancel.clone();
        async move {
            sync.execute(&SyncRequest::pull_and_resolve("s"), &cancel)
                .await
        }
    });

    transport.wait_for_fetch().await;
    assert_eq!(sync.state("s"), SyncState::Fetching);
    cancel.cancel();
    transport.open_gate();

    let outcome = cycle.await.unwrap();
    assert_eq!(outcome.error_kind(), Some(ErrorKind::Cancelled));
    assert_eq!(store.save_calls(), 0);
    assert_eq!(transport.inner().push_calls(), 0);
    assert_eq!(sync.state("s"), SyncState::Idle);
}

#[tokio::test(start_paused = true)]
async fn cancel_interrupts_retry_backoff() {
    let store = local_store(&["a"]);
    store.fail_next_load(StorageError::Unavailable("busy".into()));
    let transport = remote(&["b"]);
    let cancel = CancelToken::new();

    let observer = {
        let cancel = cancel.clone();
        move |event: &ProgressEvent| {
            if event.is_retry() {
                cancel.cancel();
            }
        }
    };
    let config = SyncConfig::new(ResolutionStrategy::Merge)
        .with_retry(fast_retry(3).with_initial_delay(Duration::from_secs(3600)))
        .without_timeout();
    let sync = orchestrator(config, &store, &transport).with_observer(observer);

    let outcome = sync
        .execute(&SyncRequest::pull_and_resolve("s"), &cancel)
        .await;

    assert_eq!(outcome.error_kind(), Some(ErrorKind::Cancelled));
    assert_eq!(store.save_calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn cancel_after_persisting_still_completes() {
    let store = local_store(&["a"]);
    let transport = remote(&["b"]);
    let cancel = CancelToken::new();

    let observer = {
        let cancel = cancel.clone();
        move |event: &ProgressEvent| {
            if event.state == SyncState::Persisting {
                cancel.cancel();
            }
        }
    };
    let sync = orchestrator(test_config(ResolutionStrategy::Merge), &store, &transport)
        .with_observer(observer);

    let outcome = sync
        .execute(&SyncRequest::pull_and_resolve("s"), &cancel)
        .await;

    assert!(cancel.is_cancelled());
    assert!(outcome.is_success());
    assert_eq!(store.save_calls(), 1);
    assert_eq!(transport.push_calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn concurrent_pulls_apply_in_submission_order() {
    let store = local_store(&["a"]);
    let transport = remote(&["b"]);
    let recorder = Arc::new(RecordingObserver::new());

    let first = SyncRequest::pull_and_resolve("s");
    let second = SyncRequest::pull_and_resolve("s");
    let first_id = first.correlation_id;

    // Another replica pushes between the two cycles.
    let concurrent_writer = {
        let transport = Arc::clone(&transport);
        move |event: &ProgressEvent| {
            if event.correlation_id == first_id && event.state == SyncState::Completed {
                let mut snapshot = transport.remote("s").unwrap_or_else(|| string_snapshot("s", &[]));
                snapshot.items.push("z".to_string());
                transport.set_remote(snapshot);
            }
        }
    };
    let sync = orchestrator(test_config(ResolutionStrategy::Merge), &store, &transport)
        .with_shared_observer(Arc::clone(&recorder) as _)
        .with_observer(concurrent_writer);
    let channel = SyncChannel::spawn(sync, ChannelConfig::default()).unwrap();

    let first_ticket = channel.submit(first.clone()).await.unwrap();
    let second_ticket = channel.submit(second.clone()).await.unwrap();
    let (first_outcome, second_outcome) =
        tokio::join!(first_ticket.outcome(), second_ticket.outcome());

    assert_eq!(first_outcome.unwrap().items, items(&["a", "b"]));
    assert_eq!(second_outcome.unwrap().items, items(&["a", "b", "z"]));

    assert_eq!(
        recorder.cycle_order(),
        vec![first.correlation_id, second.correlation_id]
    );
    let events = recorder.events();
    let first_done = events
        .iter()
        .position(|e| e.correlation_id == first.correlation_id && e.state == SyncState::Idle)
        .unwrap();
    let second_start = events
        .iter()
        .position(|e| e.correlation_id == second.correlation_id)
        .unwrap();
    assert!(first_done < second_start);

    assert_eq!(store.inner().get("s").unwrap().items, items(&["a", "b", "z"]));
    assert_eq!(transport.remote("s").unwrap().items, items(&["a", "b", "z"]));
    channel.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn local_operations_never_contact_remote() {
    let store = local_store(&[]);
    let transport = remote(&["remote-only"]);
    let sync = orchestrator(test_config(ResolutionStrategy::Merge), &store, &transport);
    let channel = SyncChannel::spawn(sync, ChannelConfig::default()).unwrap();

    channel.request(SyncRequest::add("s", "a".to_string())).await.unwrap();
    channel
        .request(SyncRequest::merge("s", items(&["b", "a", "c"])))
        .await
        .unwrap();
    let outcome = channel.request(SyncRequest::get_items("s")).await.unwrap();

    assert_eq!(outcome.items, items(&["a", "b", "c"]));
    assert_eq!(store.save_calls(), 2);
    assert_eq!(transport.connect_calls(), 0);
    assert_eq!(transport.fetch_calls(), 0);
    assert_eq!(transport.push_calls(), 0);
    channel.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn get_items_on_unknown_set_is_empty() {
    let store = Arc::new(FlakyStore::<String>::new());
    let transport = remote(&[]);
    let sync = orchestrator(test_config(ResolutionStrategy::Merge), &store, &transport);

    let outcome = sync
        .execute(&SyncRequest::get_items("never-written"), &CancelToken::new())
        .await;

    assert!(outcome.is_success());
    assert!(outcome.items.is_empty());
    assert_eq!(store.save_calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn transient_load_failure_is_retried() {
    let store = local_store(&["a"]);
    store.fail_next_load(StorageError::Unavailable("locked".into()));
    let transport = remote(&["b"]);
    let sync = orchestrator(test_config(ResolutionStrategy::Merge), &store, &transport);

    let outcome = sync
        .execute(&SyncRequest::pull_and_resolve("s"), &CancelToken::new())
        .await;

    assert!(outcome.is_success());
    assert_eq!(store.load_calls(), 2);
    assert_eq!(sync.stats().retries, 1);
}

#[tokio::test(start_paused = true)]
async fn open_failure_reports_connection_error() {
    let store = local_store(&[]);
    for _ in 0..3 {
        store.fail_next_open(StorageError::Unavailable("no volume".into()));
    }
    let transport = remote(&[]);
    let sync = orchestrator(test_config(ResolutionStrategy::Merge), &store, &transport);

    let outcome = sync
        .execute(&SyncRequest::add("s", "a".to_string()), &CancelToken::new())
        .await;

    assert_eq!(outcome.error_kind(), Some(ErrorKind::Connection));
    assert_eq!(store.open_calls(), 3);
    assert_eq!(store.save_calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn persist_retry_requires_idempotent_writes() {
    let store = local_store(&["a"]);
    store.fail_next_save(StorageError::Unavailable("flush".into()));
    let transport = remote(&[]);
    let sync = orchestrator(test_config(ResolutionStrategy::Merge), &store, &transport);
    let outcome = sync
        .execute(&SyncRequest::add("s", "b".to_string()), &CancelToken::new())
        .await;
    assert!(outcome.is_success());
    assert_eq!(store.save_calls(), 2);

    let store = local_store(&["a"]);
    store.set_idempotent(false);
    store.fail_next_save(StorageError::Unavailable("flush".into()));
    let sync = orchestrator(test_config(ResolutionStrategy::Merge), &store, &transport);
    let outcome = sync
        .execute(&SyncRequest::add("s", "b".to_string()), &CancelToken::new())
        .await;
    assert_eq!(outcome.error_kind(), Some(ErrorKind::Persist));
    assert_eq!(store.save_calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn hung_fetch_times_out() {
    let store = local_store(&["a"]);
    let transport = Arc::new(GatedTransport::new(MockTransport::new()));
    let config = test_config(ResolutionStrategy::Merge)
        .with_fetch_retry(fast_retry(2))
        .with_timeout(Duration::from_secs(5));
    let sync = orchestrator(config, &store, &transport);

    let outcome = sync
        .execute(&SyncRequest::pull_and_resolve("s"), &CancelToken::new())
        .await;

    assert_eq!(outcome.error_kind(), Some(ErrorKind::Fetch));
    assert!(outcome.error.unwrap().contains("timed out"));
    assert_eq!(store.save_calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn slow_save_is_not_cut_by_timeout() {
    let store = local_store(&["a"]);
    store.set_save_delay(Duration::from_secs(60));
    store.set_idempotent(false);
    let transport = remote(&["b"]);
    let config = test_config(ResolutionStrategy::ServerWins).with_timeout(Duration::from_secs(5));
    let sync = orchestrator(config, &store, &transport);

    let outcome = sync
        .execute(&SyncRequest::pull_and_resolve("s"), &CancelToken::new())
        .await;

    assert!(outcome.is_success(), "{:?}", outcome.error);
    assert_eq!(store.save_calls(), 1);
    assert_eq!(store.inner().get("s").unwrap().items, items(&["b"]));
    assert_eq!(sync.cached("s").unwrap().items(), items(&["b"]));
    assert_eq!(transport.push_calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn missing_remote_is_treated_as_empty() {
    let store = local_store(&["a"]);
    let transport = Arc::new(MockTransport::<String>::new());
    let sync = orchestrator(test_config(ResolutionStrategy::ServerWins), &store, &transport);

    let outcome = sync
        .execute(&SyncRequest::pull_and_resolve("s"), &CancelToken::new())
        .await;

    assert!(outcome.is_success());
    assert!(outcome.items.is_empty());
    assert!(transport.remote("s").unwrap().items.is_empty());
}

#[tokio::test]
async fn file_store_survives_restart() {
    let store = TestStore::<String>::new();
    let reopen = || Arc::new(FileStore::<String>::new(store.path(), store.config().clone()));
    let transport = Arc::new(MockTransport::<String>::new());
    let config = test_config(ResolutionStrategy::Merge);

    let first = SyncOrchestrator::new(config.clone(), reopen(), Arc::clone(&transport));
    let outcome = first
        .execute(&SyncRequest::merge("notes", items(&["x", "y"])), &CancelToken::new())
        .await;
    assert!(outcome.is_success(), "{:?}", outcome.error);

    let second = SyncOrchestrator::new(config, reopen(), Arc::clone(&transport));
    let outcome = second
        .execute(&SyncRequest::get_items("notes"), &CancelToken::new())
        .await;
    assert_eq!(outcome.items, items(&["x", "y"]));
    assert_eq!(store.list().await.unwrap(), vec!["notes".to_string()]);
}

#[tokio::test(start_paused = true)]
async fn replicas_converge_through_server() {
    let server = Arc::new(SyncServer::new(
        ServerConfig::default().with_push_policy(PushPolicy::Merge),
        MemoryStore::<String>::new(),
    ));

    let alice_store = Arc::new(FlakyStore::<String>::new());
    let alice_transport = Arc::new(HttpTransport::new(
        "http://sync.test/",
        LoopbackClient::new(Arc::clone(&server)),
    ));
    let alice = orchestrator(test_config(ResolutionStrategy::Merge), &alice_store, &alice_transport);

    let bob_store = Arc::new(FlakyStore::<String>::new());
    let bob_transport = Arc::new(ServerTransport::new(Arc::clone(&server)));
    let bob = orchestrator(test_config(ResolutionStrategy::Merge), &bob_store, &bob_transport);

    let cancel = CancelToken::new();
    alice.execute(&SyncRequest::add("team/notes", "a".to_string()), &cancel).await;
    bob.execute(&SyncRequest::add("team/notes", "b".to_string()), &cancel).await;

    let pull = || SyncRequest::pull_and_resolve("team/notes");
    assert!(alice.execute(&pull(), &cancel).await.is_success());
    assert!(bob.execute(&pull(), &cancel).await.is_success());
    assert!(alice.execute(&pull(), &cancel).await.is_success());

    let expected = items(&["a", "b"]);
    assert_eq!(alice.cached("team/notes").unwrap().items(), expected);
    assert_eq!(bob.cached("team/notes").unwrap().items(), expected);
    assert_eq!(
        server.handle_fetch("team/notes").await.unwrap().unwrap().items,
        expected
    );
    assert_eq!(server.stats().pushes, 3);
}
