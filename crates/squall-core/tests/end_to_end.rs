//! Publish two versions, push them to a feed, pull and apply them.

use std::path::Path;
use std::sync::Arc;

use semver::Version;
use squall_core::apply::{ApplyOutcome, NoProcesses, UpdateApplier};
use squall_core::delta::{DeltaBuilder, DeltaPackage, Strategy};
use squall_core::diff::DiffBackend;
use squall_core::package::ReleasePackageBuilder;
use squall_core::publish::Publisher;
use squall_core::releases;
use squall_core::sync::{LocalStore, RetryPolicy, SyncSession, UploadOptions};
use squall_schema::{ReleaseManifest, delta_filename, full_filename};

fn binary(seed: u8, len: usize) -> Vec<u8> {
    (0..len)
        .map(|i| (i as u32).wrapping_mul(2_654_435_761).to_le_bytes()[i % 4] ^ seed)
        .collect()
}

fn write_build(dir: &Path, app: &[u8]) {
    std::fs::create_dir_all(dir.join("assets")).unwrap();
    std::fs::write(dir.join("app.bin"), app).unwrap();
    std::fs::write(dir.join("assets").join("readme.txt"), b"unchanged readme").unwrap();
}

async fn publish(root: &Path, version: &str, app: &[u8]) {
    let build = root.join(format!("build-{version}"));
    write_build(&build, app);
    let package = ReleasePackageBuilder::new("App", Version::parse(version).unwrap())
        .unwrap()
        .platform("test")
        .build(&build)
        .unwrap();
    Publisher::new(root.join("releases"), DeltaBuilder::new(DiffBackend::Modern))
        .publish(package)
        .await
        .unwrap();
}

struct Fixture {
    root: tempfile::TempDir,
    v1: Vec<u8>,
    v2: Vec<u8>,
}

async fn fixture() -> Fixture {
    let root = tempfile::tempdir().unwrap();
    let v1 = binary(7, 64 * 1024);
    let mut v2 = v1.clone();
    v2[1000..1064].fill(0xEE);
    v2.extend_from_slice(b"new feature");

    publish(root.path(), "1.0.0", &v1).await;
    publish(root.path(), "1.1.0", &v2).await;
    Fixture { root, v1, v2 }
}

#[tokio::test]
async fn delta_carries_only_the_changed_binary() {
    let fx = fixture().await;
    let releases_dir = fx.root.path().join("releases");

    let delta =
        DeltaPackage::open(&releases_dir.join(delta_filename("App", &Version::new(1, 1, 0))))
            .unwrap();
    let manifest = delta.manifest();
    assert_eq!(manifest.count(Strategy::Diff), 1);
    assert_eq!(manifest.files.len(), 1);
    assert_eq!(manifest.files["lib/test/app.bin"].strategy, Strategy::Diff);
    assert!(!manifest.files.contains_key("lib/test/assets/readme.txt"));

    let diff_len = delta.payload("lib/test/app.bin").unwrap().data.len();
    assert!(diff_len < fx.v2.len() / 4, "diff is {diff_len} bytes");
}

#[tokio::test]
async fn delta_chain_reconstructs_byte_identical_install() {
    let fx = fixture().await;
    let releases_dir = fx.root.path().join("releases");
    let client = fx.root.path().join("client");
    std::fs::create_dir_all(&client).unwrap();

    // Client has the old full package and the new delta, not the new full
    let v1_full = full_filename("App", &Version::new(1, 0, 0));
    let v2_delta = delta_filename("App", &Version::new(1, 1, 0));
    for name in [&v1_full, &v2_delta] {
        std::fs::copy(releases_dir.join(name), client.join(name)).unwrap();
    }
    releases::save(&client, &releases::load(&releases_dir).unwrap()).unwrap();

    let install = fx.root.path().join("App");
    let applier =
        UpdateApplier::new(&install, &client).with_process_control(Arc::new(NoProcesses));
    applier.apply(&Version::new(1, 0, 0)).await.unwrap();
    assert_eq!(std::fs::read(install.join("app.bin")).unwrap(), fx.v1);

    let outcome = applier.apply_latest().await.unwrap();
    assert_eq!(
        outcome,
        ApplyOutcome::Updated {
            from: Some(Version::new(1, 0, 0)),
            to: Version::new(1, 1, 0),
        }
    );
    assert_eq!(std::fs::read(install.join("app.bin")).unwrap(), fx.v2);
    assert_eq!(
        std::fs::read(install.join("assets").join("readme.txt")).unwrap(),
        b"unchanged readme"
    );
    assert_eq!(
        applier.installed().unwrap().unwrap().version,
        Version::new(1, 1, 0)
    );
}

#[tokio::test]
async fn fresh_client_downloads_latest_full_only() {
    let fx = fixture().await;
    let releases_dir = fx.root.path().join("releases");
    let feed = fx.root.path().join("feed");

    let mut publisher = SyncSession::new(Arc::new(LocalStore::new(&feed)))
        .with_retry(RetryPolicy::immediate());
    let summary = publisher
        .upload_releases(&releases_dir, UploadOptions::default())
        .await
        .unwrap();
    assert_eq!(summary.actions.len(), 4);
    assert_eq!(summary.actions.last().unwrap().0, "RELEASES");
    let remote = ReleaseManifest::parse(
        &std::fs::read_to_string(feed.join("RELEASES")).unwrap(),
    )
    .unwrap();
    assert_eq!(remote.len(), 3);

    let client = fx.root.path().join("client");
    let mut session = SyncSession::new(Arc::new(LocalStore::new(&feed)))
        .with_retry(RetryPolicy::immediate());
    let downloaded = session.download_releases(&client).await.unwrap();
    assert_eq!(
        downloaded.downloaded,
        [full_filename("App", &Version::new(1, 1, 0))]
    );
    assert_eq!(downloaded.latest, Some(Version::new(1, 1, 0)));

    let install = fx.root.path().join("App");
    let outcome = UpdateApplier::new(&install, &client)
        .with_process_control(Arc::new(NoProcesses))
        .apply_latest()
        .await
        .unwrap();
    assert_eq!(
        outcome,
        ApplyOutcome::Updated {
            from: None,
            to: Version::new(1, 1, 0),
        }
    );
    assert_eq!(std::fs::read(install.join("app.bin")).unwrap(), fx.v2);
}
