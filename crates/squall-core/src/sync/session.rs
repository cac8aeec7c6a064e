use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use semver::Version;
use squall_schema::{PACKAGE_EXTENSION, RELEASES_FILENAME, ReleaseEntry, ReleaseManifest, ReleaseName};
use tracing::{debug, info, warn};

use super::{RemoteObject, RemoteStore, RetryPolicy, SyncError, TransportError, check_single_package};
use crate::releases;
use crate::reporter::{NullReporter, Reporter};

/// What happened to one artifact during an upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadAction {
    /// Same name and content already remote.
    Skipped,
    /// Content already remote under another name; copied server-side.
    Copied { from: String },
    /// New object.
    Uploaded,
    /// Object existed with different content and was replaced.
    Replaced,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct UploadOptions {
    /// Keep only this many full releases; also deletes dead remote packages.
    pub keep_max_releases: Option<usize>,
}

#[derive(Debug, Clone, Default)]
pub struct UploadSummary {
    pub actions: Vec<(String, UploadAction)>,
    /// Entries dropped from `RELEASES` by the retention policy.
    pub retired: Vec<ReleaseEntry>,
    /// Remote packages deleted because nothing references them.
    pub deleted: Vec<String>,
}

impl UploadSummary {
    pub fn count(&self, pred: impl Fn(&UploadAction) -> bool) -> usize {
        self.actions.iter().filter(|(_, a)| pred(a)).count()
    }
}

#[derive(Debug, Clone, Default)]
pub struct DownloadSummary {
    pub downloaded: Vec<String>,
    pub skipped: Vec<String>,
    /// `None` when the remote has no `RELEASES`.
    pub latest: Option<Version>,
}

/// One upload or download against a remote store.
///
/// Holds the listing of the store between operations; any mutation made
/// through the session invalidates it.
pub struct SyncSession {
    store: Arc<dyn RemoteStore>,
    retry: RetryPolicy,
    reporter: Arc<dyn Reporter>,
    listing: Option<HashMap<String, RemoteObject>>,
}

impl SyncSession {
    pub fn new(store: Arc<dyn RemoteStore>) -> Self {
        Self {
            store,
            retry: RetryPolicy::default(),
            reporter: Arc::new(NullReporter),
            listing: None,
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_reporter(mut self, reporter: Arc<dyn Reporter>) -> Self {
        self.reporter = reporter;
        self
    }

    pub fn store(&self) -> &Arc<dyn RemoteStore> {
        &self.store
    }

    /// Remote objects keyed by lowercase name, listed once and cached.
    async fn listing(&mut self) -> Result<&HashMap<String, RemoteObject>, SyncError> {
        if self.listing.is_none() {
            let store = Arc::clone(&self.store);
            let objects = self
                .retry
                .run("list", || store.list())
                .await
                .map_err(|source| SyncError::ListFailed {
                    store: self.store.describe(),
                    source,
                })?;
            debug!(store = %self.store.describe(), objects = objects.len(), "listed remote");
            let map = objects
                .into_iter()
                .map(|o| (o.name.to_ascii_lowercase(), o))
                .collect();
            self.listing = Some(map);
        }
        Ok(self.listing.get_or_insert_with(HashMap::new))
    }

    fn invalidate_listing(&mut self) {
        self.listing = None;
    }

    /// Fetch and parse the remote `RELEASES`; `None` if there is none.
    pub async fn fetch_remote_manifest(&self) -> Result<Option<ReleaseManifest>, SyncError> {
        let store = Arc::clone(&self.store);
        match self.retry.run(RELEASES_FILENAME, || store.download(RELEASES_FILENAME)).await {
            Ok(bytes) => {
                let text = String::from_utf8_lossy(&bytes);
                Ok(Some(ReleaseManifest::parse(&text)?))
            }
            Err(e) if e.is_not_found() => Ok(None),
            Err(source) => Err(SyncError::DownloadFailed {
                name: RELEASES_FILENAME.to_string(),
                source,
            }),
        }
    }

    /// Mirror the remote feed into `local_dir`.
    ///
    /// Fetches the newest full release and every delta newer than the newest
    /// full release already present locally. Artifacts already present with
    /// the right SHA1 are kept. `RELEASES` is written last.
    pub async fn download_releases(&mut self, local_dir: &Path) -> Result<DownloadSummary, SyncError> {
        let started = Instant::now();
        self.reporter.section("Downloading");

        let Some(remote) = self.fetch_remote_manifest().await? else {
            self.reporter.info("Remote has no RELEASES, nothing to sync");
            info!(store = %self.store.describe(), "no remote RELEASES");
            return Ok(DownloadSummary::default());
        };
        check_single_package(&remote)?;

        tokio::fs::create_dir_all(local_dir)
            .await
            .map_err(|source| SyncError::Io {
                path: local_dir.to_path_buf(),
                source,
            })?;

        let local_full = newest_local_full(local_dir)?;
        let selected = select_downloads(&remote, local_full.as_ref());
        let mut summary = DownloadSummary {
            latest: remote.latest_version().cloned(),
            ..DownloadSummary::default()
        };

        for entry in selected {
            let path = local_dir.join(&entry.filename);
            if local_matches(&path, entry).await {
                self.reporter.skipped(&entry.filename, "already present");
                summary.skipped.push(entry.filename.clone());
                continue;
            }

            self.reporter.transferring(&entry.filename, 0, Some(entry.filesize));
            let data = self.fetch_entry(entry).await?;
            crate::io::write_atomic_async(&path, data.to_vec())
                .await
                .map_err(|source| SyncError::Io { path, source })?;
            self.reporter
                .done(&entry.filename, "downloaded", Some(entry.filesize));
            summary.downloaded.push(entry.filename.clone());
        }

        releases::save(local_dir, &remote)?;
        self.reporter.summary(
            summary.downloaded.len(),
            "downloaded",
            started.elapsed().as_secs_f64(),
        );
        info!(
            downloaded = summary.downloaded.len(),
            skipped = summary.skipped.len(),
            "download complete"
        );
        Ok(summary)
    }

    async fn fetch_entry(&self, entry: &ReleaseEntry) -> Result<Bytes, SyncError> {
        let store = Arc::clone(&self.store);
        let location = entry.location();
        let data = self
            .retry
            .run(&entry.filename, || store.download(&location))
            .await
            .map_err(|source| {
                self.reporter.failed(&entry.filename, &source.to_string());
                SyncError::DownloadFailed {
                    name: entry.filename.clone(),
                    source,
                }
            })?;
        if !entry.matches(&data) {
            self.reporter.failed(&entry.filename, "hash mismatch");
            return Err(SyncError::HashMismatch {
                name: entry.filename.clone(),
                expected: entry.sha1.to_string(),
                actual: squall_schema::Sha1Hash::compute(&data).to_string(),
            });
        }
        Ok(data)
    }

    /// Publish the local release directory to the store.
    ///
    /// Remote and local `RELEASES` are merged (local wins), artifacts are
    /// uploaded one by one with dedup, and `RELEASES` goes last.
    pub async fn upload_releases(
        &mut self,
        local_dir: &Path,
        options: UploadOptions,
    ) -> Result<UploadSummary, SyncError> {
        let started = Instant::now();
        self.reporter.section("Uploading");

        let local = releases::load(local_dir)?;
        let remote = self.fetch_remote_manifest().await?.unwrap_or_default();
        let mut merged = ReleaseManifest::merge(&local, &remote);
        check_single_package(&merged)?;

        let mut summary = UploadSummary::default();
        if let Some(keep) = options.keep_max_releases {
            summary.retired = merged.retain_latest(keep);
            for entry in &summary.retired {
                debug!(name = %entry.filename, "retired by retention policy");
            }
        }

        for entry in local.iter() {
            if merged.get(&entry.filename).is_none() {
                self.reporter.skipped(&entry.filename, "not in RELEASES");
                continue;
            }
            let path = local_dir.join(&entry.filename);
            let data = tokio::fs::read(&path)
                .await
                .map_err(|source| SyncError::Io { path, source })?;
            let action = self.upload_artifact(&entry.filename, Bytes::from(data)).await?;
            summary.actions.push((entry.filename.clone(), action));
        }

        let ledger = Bytes::from(merged.serialize());
        let action = self.upload_artifact(RELEASES_FILENAME, ledger).await?;
        summary.actions.push((RELEASES_FILENAME.to_string(), action));

        if options.keep_max_releases.is_some() {
            summary.deleted = self.delete_dead_packages(&merged).await?;
        }

        let moved = summary.count(|a| !matches!(a, UploadAction::Skipped));
        self.reporter
            .summary(moved, "uploaded", started.elapsed().as_secs_f64());
        info!(
            uploaded = moved,
            retired = summary.retired.len(),
            deleted = summary.deleted.len(),
            "upload complete"
        );
        Ok(summary)
    }

    /// Upload one object, avoiding transfers where the store already has the
    /// content.
    ///
    /// An existing object with different content is only cleaned up after
    /// the new content is confirmed in a fresh listing.
    pub async fn upload_artifact(&mut self, name: &str, data: Bytes) -> Result<UploadAction, SyncError> {
        let hash = self.store.content_hash(&data);
        let supports_copy = self.store.supports_copy();
        let listing = self.listing().await?;

        let previous = listing.get(&name.to_ascii_lowercase()).cloned();
        let twin = supports_copy
            .then(|| {
                listing
                    .values()
                    .filter(|o| !o.name.eq_ignore_ascii_case(name))
                    .find(|o| o.content_hash.as_deref() == Some(hash.as_str()))
                    .map(|o| o.name.clone())
            })
            .flatten();

        if previous
            .as_ref()
            .is_some_and(|o| o.content_hash.as_deref() == Some(hash.as_str()))
        {
            self.reporter.skipped(name, "unchanged");
            return Ok(UploadAction::Skipped);
        }

        let store = Arc::clone(&self.store);
        let fail = |source: TransportError| SyncError::UploadFailed {
            name: name.to_string(),
            source,
        };

        if let Some(from) = twin {
            self.retry
                .run(name, || store.copy(&from, name))
                .await
                .map_err(fail)?;
            self.invalidate_listing();
            self.reporter.done(name, &format!("copied from {from}"), None);
            info!(name, from = %from, "copied server-side");
            return Ok(UploadAction::Copied { from });
        }

        let size = data.len() as u64;
        self.reporter.transferring(name, 0, Some(size));
        self.retry
            .run(name, || store.upload(name, data.clone()))
            .await
            .map_err(|source| {
                self.reporter.failed(name, &source.to_string());
                fail(source)
            })?;
        self.invalidate_listing();

        let confirmed = self
            .listing()
            .await?
            .get(&name.to_ascii_lowercase())
            .is_some_and(|o| o.content_hash.as_deref().is_none_or(|h| h == hash));
        if !confirmed {
            return Err(SyncError::Unconfirmed(name.to_string()));
        }

        let action = match previous {
            Some(previous) => {
                if let Err(e) = self.store.delete_superseded(&previous).await {
                    warn!(name, error = %e, "failed to remove superseded object");
                }
                UploadAction::Replaced
            }
            None => UploadAction::Uploaded,
        };
        self.reporter.done(name, "uploaded", Some(size));
        Ok(action)
    }

    /// Delete remote packages the ledger no longer mentions. Failures are
    /// logged and skipped.
    async fn delete_dead_packages(&mut self, manifest: &ReleaseManifest) -> Result<Vec<String>, SyncError> {
        let dead: Vec<String> = self
            .listing()
            .await?
            .values()
            .filter(|o| o.name.to_ascii_lowercase().ends_with(PACKAGE_EXTENSION))
            .filter(|o| manifest.get(&o.name).is_none())
            .map(|o| o.name.clone())
            .collect();

        let mut deleted = Vec::new();
        for name in dead {
            let store = Arc::clone(&self.store);
            match self.retry.run(&name, || store.delete(&name)).await {
                Ok(()) => {
                    info!(name = %name, "deleted dead package");
                    deleted.push(name);
                }
                Err(e) => {
                    self.reporter.warning(&format!("Could not delete {name}: {e}"));
                    warn!(name = %name, error = %e, "failed to delete dead package");
                }
            }
        }
        if !deleted.is_empty() {
            self.invalidate_listing();
        }
        deleted.sort();
        Ok(deleted)
    }
}

/// Newest full release present in `dir`, judged by filename.
fn newest_local_full(dir: &Path) -> Result<Option<Version>, SyncError> {
    let entries = std::fs::read_dir(dir).map_err(|source| SyncError::Io {
        path: dir.to_path_buf(),
        source,
    })?;
    Ok(entries
        .filter_map(Result::ok)
        .filter_map(|e| ReleaseName::parse(&e.file_name().to_string_lossy()).ok())
        .filter(|name| !name.is_delta)
        .map(|name| name.version)
        .max())
}

/// Artifacts a mirror should hold: the newest full release plus every delta
/// newer than the newest local full release.
pub(crate) fn select_downloads<'a>(
    remote: &'a ReleaseManifest,
    local_full: Option<&Version>,
) -> Vec<&'a ReleaseEntry> {
    let Some(latest) = remote.latest_full() else {
        return Vec::new();
    };
    let mut selected = vec![latest];
    if let Some(local) = local_full {
        selected.extend(
            remote
                .sorted()
                .into_iter()
                .filter(|e| e.is_delta && e.version > *local),
        );
    }
    selected
}

async fn local_matches(path: &Path, entry: &ReleaseEntry) -> bool {
    match tokio::fs::read(path).await {
        Ok(data) => entry.matches(&data),
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::LocalStore;

    fn manifest(lines: &[(&str, &[u8])]) -> ReleaseManifest {
        ReleaseManifest::from_entries(
            lines
                .iter()
                .map(|(name, data)| ReleaseEntry::from_bytes(name, data).unwrap())
                .collect(),
        )
    }

    #[test]
    fn selection_without_local_full_is_latest_full_only() {
        let remote = manifest(&[
            ("App-1.0.0-full.nupkg", b"f1"),
            ("App-1.1.0-full.nupkg", b"f2"),
            ("App-1.1.0-delta.nupkg", b"d2"),
        ]);
        let names: Vec<&str> = select_downloads(&remote, None)
            .iter()
            .map(|e| e.filename.as_str())
            .collect();
        assert_eq!(names, ["App-1.1.0-full.nupkg"]);
    }

    #[test]
    fn selection_with_local_full_adds_newer_deltas() {
        let remote = manifest(&[
            ("App-1.0.0-full.nupkg", b"f1"),
            ("App-1.1.0-full.nupkg", b"f2"),
            ("App-1.1.0-delta.nupkg", b"d2"),
            ("App-1.2.0-full.nupkg", b"f3"),
            ("App-1.2.0-delta.nupkg", b"d3"),
        ]);
        let local = Version::new(1, 1, 0);
        let names: Vec<&str> = select_downloads(&remote, Some(&local))
            .iter()
            .map(|e| e.filename.as_str())
            .collect();
        assert_eq!(names, ["App-1.2.0-full.nupkg", "App-1.2.0-delta.nupkg"]);
    }

    async fn seeded_remote(dir: &Path) -> Arc<LocalStore> {
        let store = Arc::new(LocalStore::new(dir));
        let full = b"full-1".as_slice();
        store
            .upload("App-1.0.0-full.nupkg", Bytes::from_static(b"full-1"))
            .await
            .unwrap();
        let ledger = manifest(&[("App-1.0.0-full.nupkg", full)]).serialize();
        store
            .upload(RELEASES_FILENAME, Bytes::from(ledger))
            .await
            .unwrap();
        store
    }

    #[tokio::test]
    async fn download_mirrors_and_skips_present_files() {
        let remote_dir = tempfile::tempdir().unwrap();
        let local_dir = tempfile::tempdir().unwrap();
        let store = seeded_remote(remote_dir.path()).await;

        let mut session = SyncSession::new(store.clone()).with_retry(RetryPolicy::immediate());
        let first = session.download_releases(local_dir.path()).await.unwrap();
        assert_eq!(first.downloaded, ["App-1.0.0-full.nupkg"]);
        assert!(local_dir.path().join(RELEASES_FILENAME).is_file());

        let second = session.download_releases(local_dir.path()).await.unwrap();
        assert!(second.downloaded.is_empty());
        assert_eq!(second.skipped, ["App-1.0.0-full.nupkg"]);
    }

    #[tokio::test]
    async fn download_without_remote_releases_is_a_no_op() {
        let remote_dir = tempfile::tempdir().unwrap();
        let local_dir = tempfile::tempdir().unwrap();
        let mut session = SyncSession::new(Arc::new(LocalStore::new(remote_dir.path())));
        let summary = session.download_releases(local_dir.path()).await.unwrap();
        assert!(summary.latest.is_none());
        assert!(!local_dir.path().join(RELEASES_FILENAME).exists());
    }

    #[tokio::test]
    async fn corrupted_artifact_fails_download() {
        let remote_dir = tempfile::tempdir().unwrap();
        let local_dir = tempfile::tempdir().unwrap();
        let store = seeded_remote(remote_dir.path()).await;
        store
            .upload("App-1.0.0-full.nupkg", Bytes::from_static(b"tampered"))
            .await
            .unwrap();

        let mut session = SyncSession::new(store).with_retry(RetryPolicy::immediate());
        let err = session.download_releases(local_dir.path()).await.unwrap_err();
        assert!(matches!(err, SyncError::HashMismatch { .. }));
        assert!(!local_dir.path().join(RELEASES_FILENAME).exists());
    }

    #[tokio::test]
    async fn upload_merges_and_writes_releases_last() {
        let remote_dir = tempfile::tempdir().unwrap();
        let local_dir = tempfile::tempdir().unwrap();
        let store = seeded_remote(remote_dir.path()).await;

        std::fs::write(local_dir.path().join("App-1.1.0-full.nupkg"), b"full-2").unwrap();
        releases::rebuild(local_dir.path()).unwrap();

        let mut session = SyncSession::new(store.clone()).with_retry(RetryPolicy::immediate());
        let summary = session
            .upload_releases(local_dir.path(), UploadOptions::default())
            .await
            .unwrap();

        let last = summary.actions.last().unwrap();
        assert_eq!(last.0, RELEASES_FILENAME);

        let remote = ReleaseManifest::parse(
            &String::from_utf8(store.download(RELEASES_FILENAME).await.unwrap().to_vec()).unwrap(),
        )
        .unwrap();
        let names: Vec<&str> = remote.iter().map(|e| e.filename.as_str()).collect();
        assert_eq!(names, ["App-1.0.0-full.nupkg", "App-1.1.0-full.nupkg"]);
    }

    #[tokio::test]
    async fn upload_rejects_mixed_package_ids() {
        let remote_dir = tempfile::tempdir().unwrap();
        let local_dir = tempfile::tempdir().unwrap();
        let store = seeded_remote(remote_dir.path()).await;

        std::fs::write(local_dir.path().join("Other-2.0.0-full.nupkg"), b"x").unwrap();
        releases::rebuild(local_dir.path()).unwrap();

        let mut session = SyncSession::new(store);
        let err = session
            .upload_releases(local_dir.path(), UploadOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::MixedPackageIds(_)));
    }

    #[tokio::test]
    async fn retention_deletes_dead_packages() {
        let remote_dir = tempfile::tempdir().unwrap();
        let local_dir = tempfile::tempdir().unwrap();
        let store = seeded_remote(remote_dir.path()).await;

        std::fs::write(local_dir.path().join("App-1.1.0-full.nupkg"), b"full-2").unwrap();
        releases::rebuild(local_dir.path()).unwrap();

        let mut session = SyncSession::new(store.clone()).with_retry(RetryPolicy::immediate());
        let summary = session
            .upload_releases(
                local_dir.path(),
                UploadOptions {
                    keep_max_releases: Some(1),
                },
            )
            .await
            .unwrap();
        assert_eq!(summary.retired.len(), 1);
        assert_eq!(summary.deleted, ["App-1.0.0-full.nupkg"]);
        assert!(store.download("App-1.0.0-full.nupkg").await.unwrap_err().is_not_found());
    }
}
