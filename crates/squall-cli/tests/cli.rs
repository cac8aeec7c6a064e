//! End-to-end tests for the `squall` command-line interface.

use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use tempfile::TempDir;

/// Temporary workspace with its own SQUALL_HOME
struct TestContext {
    temp_dir: TempDir,
    squall_home: PathBuf,
}

impl TestContext {
    fn new() -> Self {
        let temp_dir = TempDir::new().expect("failed to create temp dir");
        let squall_home = temp_dir.path().join(".squall");
        std::fs::create_dir_all(&squall_home).expect("failed to create squall home");
        Self {
            temp_dir,
            squall_home,
        }
    }

    fn path(&self, rel: &str) -> PathBuf {
        self.temp_dir.path().join(rel)
    }

    fn squall(&self, args: &[&str]) -> Output {
        let output = Command::new(env!("CARGO_BIN_EXE_squall"))
            .args(args)
            .current_dir(self.temp_dir.path())
            .env("HOME", self.temp_dir.path())
            .env("SQUALL_HOME", &self.squall_home)
            .env_remove("SQUALL_DIFF_BACKEND")
            .output()
            .expect("failed to run squall");
        assert!(
            output.status.success(),
            "squall {args:?} failed:\n{}",
            String::from_utf8_lossy(&output.stderr)
        );
        output
    }

    fn build(&self, version: &str, app: &[u8]) -> PathBuf {
        let dir = self.path(&format!("build-{version}"));
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("app.bin"), app).unwrap();
        std::fs::write(dir.join("readme.txt"), b"same in every version").unwrap();
        dir
    }

    fn releasify(&self, version: &str, build: &Path) {
        self.squall(&[
            "releasify",
            "--id",
            "App",
            "--version",
            version,
            "--build-dir",
            build.to_str().unwrap(),
            "--platform",
            "test",
        ]);
    }
}

#[test]
fn test_help_command() {
    let ctx = TestContext::new();
    let output = ctx.squall(&["--help"]);
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("Usage:"));
    assert!(stdout.contains("releasify"));
}

#[test]
fn test_version_command() {
    let ctx = TestContext::new();
    ctx.squall(&["--version"]);
}

#[test]
fn test_pack_writes_full_package() {
    let ctx = TestContext::new();
    let build = ctx.build("1.0.0", b"binary");
    ctx.squall(&[
        "pack",
        "--id",
        "App",
        "--version",
        "1.0.0",
        "--build-dir",
        build.to_str().unwrap(),
        "--out-dir",
        "out",
    ]);
    assert!(ctx.path("out/App-1.0.0-full.nupkg").is_file());
}

#[test]
fn test_release_upload_download_apply() {
    let ctx = TestContext::new();
    let v1: Vec<u8> = (0..32_768u32).map(|i| (i % 251) as u8).collect();
    let mut v2 = v1.clone();
    v2[500..520].fill(0);

    let b1 = ctx.build("1.0.0", &v1);
    ctx.releasify("1.0.0", &b1);
    let b2 = ctx.build("1.1.0", &v2);
    ctx.releasify("1.1.0", &b2);

    let releases = std::fs::read_to_string(ctx.path("releases/RELEASES")).unwrap();
    assert_eq!(releases.lines().count(), 3);
    assert!(ctx.path("releases/App-1.1.0-delta.nupkg").is_file());

    // Regenerating from disk yields the same ledger
    ctx.squall(&["rebuild-releases", "releases"]);
    assert_eq!(
        std::fs::read_to_string(ctx.path("releases/RELEASES")).unwrap(),
        releases
    );

    let feed = ctx.path("feed");
    ctx.squall(&["upload", "--to", feed.to_str().unwrap()]);
    assert!(feed.join("RELEASES").is_file());

    ctx.squall(&[
        "download",
        "--from",
        feed.to_str().unwrap(),
        "--releases",
        "client",
    ]);
    assert!(ctx.path("client/App-1.1.0-full.nupkg").is_file());

    ctx.squall(&[
        "apply",
        "--releases",
        "client",
        "--install",
        "installed",
        "--no-process-control",
    ]);
    assert_eq!(std::fs::read(ctx.path("installed/app.bin")).unwrap(), v2);
    let version = std::fs::read_to_string(ctx.path("installed/.squall-version")).unwrap();
    assert!(version.contains("1.1.0"));
}
