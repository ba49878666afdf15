//! Config propagation scenarios against the in-memory store.

use assert_matches::assert_matches;
use async_trait::async_trait;
use conclave_core::{
    CoordinationStore, CreateMode, NodePath, NodeWatch, SessionState, StoreError, StoreResult,
    Version,
};
use conclave_protocol::{ConfigReader, ConfigWriter, CoordinationError, RetryPolicy};
use conclave_testkit::{init_test_logging, MemorySession, MemoryStore};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

fn config_path() -> NodePath {
    NodePath::new("/config").unwrap()
}

/// How an injected failure behaves on every `set_data`.
#[derive(Clone, Copy)]
enum FailureMode {
    /// Somebody else always got there first.
    StaleVersion,
    /// The session died mid-write.
    SessionLoss,
}

/// Store wrapper that fails every conditional write, counting attempts.
struct FailingWrites {
    inner: MemorySession,
    mode: FailureMode,
    set_data_calls: AtomicU32,
}

impl FailingWrites {
    fn new(inner: MemorySession, mode: FailureMode) -> Self {
        Self {
            inner,
            mode,
            set_data_calls: AtomicU32::new(0),
        }
    }

    fn calls(&self) -> u32 {
        self.set_data_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CoordinationStore for FailingWrites {
    async fn exists(&self, path: &NodePath) -> StoreResult<Option<Version>> {
        self.inner.exists(path).await
    }

    async fn exists_watch(&self, path: &NodePath) -> StoreResult<(Option<Version>, NodeWatch)> {
        self.inner.exists_watch(path).await
    }

    async fn create(
        &self,
        path: &NodePath,
        payload: &[u8],
        mode: CreateMode,
    ) -> StoreResult<NodePath> {
        self.inner.create(path, payload, mode).await
    }

    async fn set_data(
        &self,
        path: &NodePath,
        _payload: &[u8],
        expected: Version,
    ) -> StoreResult<Version> {
        self.set_data_calls.fetch_add(1, Ordering::SeqCst);
        match self.mode {
            FailureMode::StaleVersion => Err(StoreError::version_mismatch(
                path.clone(),
                expected,
                expected.bump(),
            )),
            FailureMode::SessionLoss => Err(StoreError::SessionExpired),
        }
    }

    async fn get_data(&self, path: &NodePath) -> StoreResult<(Vec<u8>, Version)> {
        self.inner.get_data(path).await
    }

    async fn get_data_watch(
        &self,
        path: &NodePath,
    ) -> StoreResult<((Vec<u8>, Version), NodeWatch)> {
        self.inner.get_data_watch(path).await
    }

    async fn get_children(&self, path: &NodePath) -> StoreResult<Vec<String>> {
        self.inner.get_children(path).await
    }

    async fn get_children_watch(&self, path: &NodePath) -> StoreResult<(Vec<String>, NodeWatch)> {
        self.inner.get_children_watch(path).await
    }

    async fn delete(&self, path: &NodePath, expected: Version) -> StoreResult<()> {
        self.inner.delete(path, expected).await
    }

    fn session(&self) -> SessionState {
        self.inner.session()
    }
}

#[tokio::test]
async fn readers_converge_to_the_final_value() {
    init_test_logging();
    let store = MemoryStore::new();
    let writer = ConfigWriter::new(
        Arc::new(store.connect()),
        config_path(),
        RetryPolicy::for_testing(),
    )
    .unwrap();
    let mut readers = [
        ConfigReader::new(Arc::new(store.connect()), config_path()),
        ConfigReader::new(Arc::new(store.connect()), config_path()),
    ];

    writer.write(b"v1").await.unwrap();
    for reader in &mut readers {
        let (value, _) = reader.read().await.unwrap();
        assert_eq!(value, b"v1");
    }

    // A burst of updates; one-shot watches may coalesce the intermediate
    // values, but both readers must settle on the final one.
    for value in [b"v2", b"v3", b"v4", b"v5"] {
        writer.write(value).await.unwrap();
    }
    for reader in &mut readers {
        let mut latest = Vec::new();
        for _ in 0..8 {
            let (value, _) = reader.next_update(Duration::from_secs(1)).await.unwrap();
            latest = value;
            if latest == b"v5" {
                break;
            }
        }
        assert_eq!(latest, b"v5");
    }
}

#[tokio::test]
async fn first_publication_wakes_a_waiting_reader() {
    let store = MemoryStore::new();
    let mut reader = ConfigReader::new(Arc::new(store.connect()), config_path());
    let pending = tokio::spawn(async move { reader.next_update(Duration::from_secs(5)).await });

    tokio::time::sleep(Duration::from_millis(50)).await;
    let writer = ConfigWriter::new(
        Arc::new(store.connect()),
        config_path(),
        RetryPolicy::for_testing(),
    )
    .unwrap();
    writer.write(b"first").await.unwrap();

    let (value, version) = pending.await.unwrap().unwrap();
    assert_eq!(value, b"first");
    assert_eq!(version, Version::INITIAL);
}

#[tokio::test]
async fn deletion_is_not_an_update_but_recreation_is() {
    let store = MemoryStore::new();
    let admin = store.connect();
    let writer = ConfigWriter::new(
        Arc::new(store.connect()),
        config_path(),
        RetryPolicy::for_testing(),
    )
    .unwrap();
    let mut reader = ConfigReader::new(Arc::new(store.connect()), config_path());

    writer.write(b"v1").await.unwrap();
    reader.read().await.unwrap();

    let pending = tokio::spawn(async move { reader.next_update(Duration::from_secs(5)).await });
    tokio::time::sleep(Duration::from_millis(50)).await;

    admin.delete(&config_path(), Version::ANY).await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!pending.is_finished(), "deletion alone must not wake the reader");

    writer.write(b"v2").await.unwrap();
    let (value, _) = pending.await.unwrap().unwrap();
    assert_eq!(value, b"v2");
}

#[tokio::test]
async fn retry_bound_is_respected_exactly() {
    let store = MemoryStore::new();
    let seed = store.connect();
    seed.create(&config_path(), b"seed", CreateMode::Persistent)
        .await
        .unwrap();

    let contended = Arc::new(FailingWrites::new(
        store.connect(),
        FailureMode::StaleVersion,
    ));
    let policy = RetryPolicy::fixed(4, Duration::from_millis(1));
    let writer = ConfigWriter::new(contended.clone(), config_path(), policy).unwrap();

    let err = writer.write(b"update").await.unwrap_err();
    assert_matches!(
        err,
        CoordinationError::RetriesExhausted {
            attempts: 4,
            last: StoreError::VersionMismatch { .. },
        }
    );
    assert_eq!(contended.calls(), 4, "no more, no fewer than the bound");
}

#[tokio::test]
async fn session_loss_is_never_retried() {
    let store = MemoryStore::new();
    let seed = store.connect();
    seed.create(&config_path(), b"seed", CreateMode::Persistent)
        .await
        .unwrap();

    let flaky = Arc::new(FailingWrites::new(store.connect(), FailureMode::SessionLoss));
    let writer = ConfigWriter::new(
        flaky.clone(),
        config_path(),
        RetryPolicy::fixed(5, Duration::from_millis(1)),
    )
    .unwrap();

    let err = writer.write(b"update").await.unwrap_err();
    assert_matches!(
        err,
        CoordinationError::Store(StoreError::SessionExpired)
    );
    assert_eq!(flaky.calls(), 1, "session loss must fail fast");
}

#[tokio::test]
async fn concurrent_writers_serialize_through_the_version_guard() {
    let store = MemoryStore::new();
    let first = ConfigWriter::new(
        Arc::new(store.connect()),
        config_path(),
        RetryPolicy::for_testing(),
    )
    .unwrap();
    let second = ConfigWriter::new(
        Arc::new(store.connect()),
        config_path(),
        RetryPolicy::for_testing(),
    )
    .unwrap();

    let mut version = first.write(b"a0").await.unwrap();
    for (i, writer) in [&second, &first, &second].iter().enumerate() {
        let next = writer.write(format!("a{}", i + 1).as_bytes()).await.unwrap();
        assert_eq!(next, version.bump());
        version = next;
    }

    let (value, stored) = store.peek(&config_path()).unwrap();
    assert_eq!(value, b"a3");
    assert_eq!(stored, version);
}
