// tests/common/mod.rs

//! Shared test utilities and helpers for integration tests.

#![allow(dead_code)]

use relpack::checksum::ArtifactSource;
use relpack::delta::ZstdPatchEngine;
use relpack::feed::{DirectoryFeed, RetryPolicy};
use relpack::lock::{LockOptions, MemoryLockService};
use relpack::logging::Logger;
use relpack::model::{Channel, OsPlatform, SnapApp, Target};
use relpack::pack::PackageNaming;
use relpack::publish::{PackOptions, PublisherDeps, ReleasePublisher};
use relpack::time::SystemTimeSource;
use semver::Version;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

/// A publisher over a temp directory feed and an in-process lock service
///
/// Keep the struct alive to prevent cleanup of the temp directory.
pub struct TestEnv {
    pub temp: TempDir,
    pub artifacts: PathBuf,
    pub feed: Arc<DirectoryFeed>,
    pub lock_service: Arc<MemoryLockService>,
    pub publisher: ReleasePublisher,
}

impl TestEnv {
    pub fn new() -> Self {
        let temp = tempfile::tempdir().unwrap();
        let artifacts = temp.path().join("artifacts");
        fs::create_dir_all(&artifacts).unwrap();
        let feed = Arc::new(DirectoryFeed::new(temp.path().join("feed")));
        let lock_service = Arc::new(MemoryLockService::new());

        let publisher = ReleasePublisher::new(PublisherDeps {
            feed: feed.clone(),
            lock_service: lock_service.clone(),
            time: Arc::new(SystemTimeSource),
            engine: Arc::new(ZstdPatchEngine::new()),
            naming: PackageNaming::default(),
            lock_options: fast_lock_options(),
            retry: RetryPolicy::new(2, Duration::from_millis(10)).unwrap(),
            log: Logger::disabled(),
        })
        .unwrap();

        Self {
            temp,
            artifacts,
            feed,
            lock_service,
            publisher,
        }
    }

    /// Replace the artifacts directory with exactly `files`
    pub fn set_artifacts(&self, files: &[(&str, &[u8])]) {
        fs::remove_dir_all(&self.artifacts).unwrap();
        fs::create_dir_all(&self.artifacts).unwrap();
        write_files(&self.artifacts, files);
    }

    pub fn pack_options(&self) -> PackOptions {
        PackOptions {
            sources: vec![ArtifactSource::app(&self.artifacts)],
            ..PackOptions::default()
        }
    }

    pub fn feed_dir(&self, feed: &str) -> PathBuf {
        self.temp.path().join("feed").join(feed)
    }
}

/// Short lease timings so tests finish quickly
pub fn fast_lock_options() -> LockOptions {
    LockOptions {
        lease_duration: Duration::from_millis(400),
        renew_interval: Duration::from_millis(100),
        retry_delay: Duration::from_millis(20),
        max_attempts: Some(50),
        attempt_timeout: Duration::from_secs(2),
    }
}

pub fn write_files(dir: &Path, files: &[(&str, &[u8])]) {
    for (name, data) in files {
        let path = dir.join(name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(path, data).unwrap();
    }
}

/// `demoapp` for linux-x64 with a test -> staging -> production pipeline
pub fn demo_app(major: u64, minor: u64, patch: u64) -> SnapApp {
    SnapApp::new(
        "demoapp",
        Version::new(major, minor, patch),
        Target::new(OsPlatform::Linux, "linux-x64", "net8.0").unwrap(),
        vec![
            Channel::new("test", "main"),
            Channel::new("staging", "main"),
            Channel::new("production", "main"),
        ],
    )
    .unwrap()
}

/// Deterministic pseudo-random bytes (xorshift64)
pub fn pseudo_random_bytes(seed: u64, len: usize) -> Vec<u8> {
    let mut state = seed.wrapping_mul(0x9E37_79B9_7F4A_7C15) | 1;
    (0..len)
        .map(|_| {
            state ^= state << 13;
            state ^= state >> 7;
            state ^= state << 17;
            (state >> 24) as u8
        })
        .collect()
}
