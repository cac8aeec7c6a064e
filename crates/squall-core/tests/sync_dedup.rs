//! Dedup and retry behaviour of uploads against an instrumented store.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use squall_core::sync::{
    LocalStore, RemoteObject, RemoteStore, RetryPolicy, SyncError, SyncSession, TransportError,
    UploadAction,
};

/// Wraps a [`LocalStore`], counting calls and failing the first
/// `fail_uploads` uploads with a retryable error.
struct CountingStore {
    inner: LocalStore,
    uploads: AtomicU32,
    copies: AtomicU32,
    fail_uploads: AtomicU32,
}

impl CountingStore {
    fn new(root: &std::path::Path) -> Self {
        Self {
            inner: LocalStore::new(root),
            uploads: AtomicU32::new(0),
            copies: AtomicU32::new(0),
            fail_uploads: AtomicU32::new(0),
        }
    }

    fn failing(self, n: u32) -> Self {
        self.fail_uploads.store(n, Ordering::SeqCst);
        self
    }
}

#[async_trait]
impl RemoteStore for CountingStore {
    fn describe(&self) -> String {
        format!("counting({})", self.inner.describe())
    }

    async fn list(&self) -> Result<Vec<RemoteObject>, TransportError> {
        self.inner.list().await
    }

    async fn download(&self, name: &str) -> Result<Bytes, TransportError> {
        self.inner.download(name).await
    }

    async fn upload(&self, name: &str, data: Bytes) -> Result<(), TransportError> {
        self.uploads.fetch_add(1, Ordering::SeqCst);
        let remaining = self.fail_uploads.load(Ordering::SeqCst);
        if remaining > 0 {
            self.fail_uploads.store(remaining - 1, Ordering::SeqCst);
            return Err(TransportError::retryable(format!("{name}: connection reset")));
        }
        self.inner.upload(name, data).await
    }

    async fn copy(&self, from: &str, to: &str) -> Result<(), TransportError> {
        self.copies.fetch_add(1, Ordering::SeqCst);
        self.inner.copy(from, to).await
    }

    async fn delete(&self, name: &str) -> Result<(), TransportError> {
        self.inner.delete(name).await
    }

    fn content_hash(&self, data: &[u8]) -> String {
        self.inner.content_hash(data)
    }
}

fn session(store: &Arc<CountingStore>) -> SyncSession {
    SyncSession::new(store.clone()).with_retry(RetryPolicy::immediate())
}

#[tokio::test]
async fn identical_content_is_copied_not_uploaded() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(CountingStore::new(dir.path()));
    let mut session = session(&store);
    let payload = Bytes::from_static(b"same bytes in both packages");

    let first = session
        .upload_artifact("App-1.0.0-full.nupkg", payload.clone())
        .await
        .unwrap();
    assert_eq!(first, UploadAction::Uploaded);

    let second = session
        .upload_artifact("App-1.0.1-full.nupkg", payload.clone())
        .await
        .unwrap();
    assert_eq!(
        second,
        UploadAction::Copied {
            from: "App-1.0.0-full.nupkg".to_string()
        }
    );

    let third = session
        .upload_artifact("App-1.0.1-full.nupkg", payload)
        .await
        .unwrap();
    assert_eq!(third, UploadAction::Skipped);

    assert_eq!(store.uploads.load(Ordering::SeqCst), 1);
    assert_eq!(store.copies.load(Ordering::SeqCst), 1);
    assert_eq!(
        std::fs::read(dir.path().join("App-1.0.1-full.nupkg")).unwrap(),
        b"same bytes in both packages"
    );
}

#[tokio::test]
async fn changed_content_replaces_object() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(CountingStore::new(dir.path()));
    let mut session = session(&store);

    session
        .upload_artifact("RELEASES", Bytes::from_static(b"one"))
        .await
        .unwrap();
    let action = session
        .upload_artifact("RELEASES", Bytes::from_static(b"two"))
        .await
        .unwrap();
    assert_eq!(action, UploadAction::Replaced);
    assert_eq!(std::fs::read(dir.path().join("RELEASES")).unwrap(), b"two");
}

#[tokio::test]
async fn transient_failures_are_retried() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(CountingStore::new(dir.path()).failing(2));
    let mut session = session(&store);

    let action = session
        .upload_artifact("App-1.0.0-full.nupkg", Bytes::from_static(b"pkg"))
        .await
        .unwrap();
    assert_eq!(action, UploadAction::Uploaded);
    assert_eq!(store.uploads.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn gives_up_after_three_attempts() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(CountingStore::new(dir.path()).failing(5));
    let mut session = session(&store);

    let err = session
        .upload_artifact("App-1.0.0-full.nupkg", Bytes::from_static(b"pkg"))
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::UploadFailed { .. }));
    assert_eq!(store.uploads.load(Ordering::SeqCst), 3);
    assert!(!dir.path().join("App-1.0.0-full.nupkg").exists());
}
