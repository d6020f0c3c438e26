// tests/scenarios.rs

//! End-to-end pack, promote, demote and lock scenarios.

mod common;

use common::{TestEnv, demo_app, fast_lock_options};
use relpack::Error;
use relpack::hash::Checksum;
use relpack::lock::{DistributedReleaseLock, LockDeps, LockOptions, LockService, MemoryLockService};
use relpack::logging::Logger;
use relpack::pack::{ArchiveReader, PackageNaming};
use relpack::releases::{DemoteFilter, PromotionMode, ReleaseQuery};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[tokio::test]
async fn test_genesis_release_of_three_files() {
    let env = TestEnv::new();
    env.set_artifacts(&[
        ("demoapp", b"#!/bin/demoapp"),
        ("demoapp.dll", b"managed code"),
        ("config/appsettings.json", b"{}"),
    ]);

    let summary = env
        .publisher
        .pack(&demo_app(1, 0, 0), env.pack_options(), &CancellationToken::new())
        .await
        .unwrap();

    let full = &summary.full;
    assert!(full.is_genesis() && full.is_full());
    assert_eq!(full.files.len(), 3);
    assert!(full.new_files().is_empty());
    assert!(full.modified_files().is_empty());
    assert!(full.unmodified_files().is_empty());
    assert!(full.deleted_files().is_empty());
    assert!(summary.delta.is_none());
    assert_eq!(full.channels, vec!["test"]);

    // The package on the feed hashes to what the catalog records
    let bytes = std::fs::read(env.feed_dir("main").join(&full.filename)).unwrap();
    assert_eq!(Checksum::of_bytes(&bytes), full.package);
    let mut reader = ArchiveReader::new(&bytes).unwrap();
    assert_eq!(reader.manifest().unwrap().version, full.version);
    assert!(reader.contains("app/config/appsettings.json"));
}

#[cfg(unix)]
#[tokio::test]
async fn test_symlinked_library_is_packed() {
    let env = TestEnv::new();
    env.set_artifacts(&[("libfoo.so.1.0.0", b"shared object")]);
    std::os::unix::fs::symlink("libfoo.so.1.0.0", env.artifacts.join("libfoo.so.1")).unwrap();

    let summary = env
        .publisher
        .pack(&demo_app(1, 0, 0), env.pack_options(), &CancellationToken::new())
        .await
        .unwrap();

    let paths: Vec<_> = summary.full.files.iter().map(|f| f.target_path.as_str()).collect();
    assert_eq!(paths, vec!["app/libfoo.so.1", "app/libfoo.so.1.0.0"]);
    let bytes = std::fs::read(env.feed_dir("main").join(&summary.full.filename)).unwrap();
    let mut reader = ArchiveReader::new(&bytes).unwrap();
    assert_eq!(reader.read("app/libfoo.so.1").unwrap(), b"shared object");
}

#[tokio::test]
async fn test_delta_release_buckets() {
    let env = TestEnv::new();
    let cancel = CancellationToken::new();
    env.set_artifacts(&[("demoapp", b"version one"), ("readme.txt", b"unchanged")]);
    env.publisher
        .pack(&demo_app(1, 0, 0), env.pack_options(), &cancel)
        .await
        .unwrap();

    env.set_artifacts(&[
        ("demoapp", b"version two"),
        ("readme.txt", b"unchanged"),
        ("plugin.dll", b"added"),
    ]);
    let summary = env
        .publisher
        .pack(&demo_app(1, 1, 0), env.pack_options(), &cancel)
        .await
        .unwrap();

    let delta = summary.delta.unwrap();
    assert!(delta.is_delta());
    assert_eq!(delta.new_files(), vec!["app/plugin.dll"]);
    assert_eq!(delta.modified_files(), vec!["app/demoapp"]);
    assert_eq!(delta.unmodified_files(), vec!["app/readme.txt"]);
    assert!(delta.deleted_files().is_empty());

    // Unmodified files are bookkeeping only
    let bytes = std::fs::read(env.feed_dir("main").join(&delta.filename)).unwrap();
    let mut reader = ArchiveReader::new(&bytes).unwrap();
    assert!(reader.read("app/readme.txt").unwrap().is_empty());
    assert_eq!(reader.read("app/plugin.dll").unwrap(), b"added");

    let catalog = env.publisher.load_catalog(&demo_app(1, 1, 0)).await.unwrap();
    assert_eq!(catalog.version(), 2);
    assert_eq!(catalog.len(), 3);
}

#[tokio::test]
async fn test_promote_to_staging() {
    let env = TestEnv::new();
    let cancel = CancellationToken::new();
    env.set_artifacts(&[("demoapp", b"one")]);
    env.publisher
        .pack(&demo_app(1, 0, 0), env.pack_options(), &cancel)
        .await
        .unwrap();
    env.set_artifacts(&[("demoapp", b"two")]);
    env.publisher
        .pack(&demo_app(1, 1, 0), env.pack_options(), &cancel)
        .await
        .unwrap();
    let before = env.publisher.load_catalog(&demo_app(1, 1, 0)).await.unwrap();

    let version = semver::Version::new(1, 1, 0);
    let summary = env
        .publisher
        .promote(
            &demo_app(1, 1, 0),
            "test",
            Some(&version),
            PromotionMode::Next,
            &cancel,
        )
        .await
        .unwrap();
    assert_eq!(summary.plan.to_channels, vec!["staging"]);
    assert_eq!(summary.catalog_version, before.version() + 1);

    let after = env.publisher.load_catalog(&demo_app(1, 1, 0)).await.unwrap();
    let promoted: Vec<_> = after
        .releases(&ReleaseQuery::for_app("demoapp"))
        .into_iter()
        .filter(|r| r.version == version)
        .collect();
    assert_eq!(promoted.len(), 2);
    for release in promoted {
        assert_eq!(release.channels, vec!["test", "staging"]);
    }
}

#[tokio::test]
async fn test_demote_staging() {
    let env = TestEnv::new();
    let cancel = CancellationToken::new();
    let app = demo_app(1, 0, 0);
    env.set_artifacts(&[("demoapp", b"one")]);
    env.publisher
        .pack(&app, env.pack_options(), &cancel)
        .await
        .unwrap();
    env.set_artifacts(&[("demoapp", b"two")]);
    env.publisher
        .pack(&demo_app(1, 1, 0), env.pack_options(), &cancel)
        .await
        .unwrap();
    env.publisher
        .promote(&app, "test", None, PromotionMode::Next, &cancel)
        .await
        .unwrap();

    let filter = DemoteFilter {
        channel: Some("staging".into()),
        ..DemoteFilter::default()
    };
    let summary = env.publisher.demote(&app, &filter, &cancel).await.unwrap();
    assert_eq!(summary.removed.len(), 3);

    let catalog = env.publisher.load_catalog(&app).await.unwrap();
    assert!(
        catalog
            .releases(&ReleaseQuery::for_app("demoapp").channel("staging"))
            .is_empty()
    );
    assert_eq!(catalog.version(), 4);
}

fn lock_for(service: &Arc<MemoryLockService>, options: LockOptions) -> DistributedReleaseLock {
    DistributedReleaseLock::new(
        LockDeps {
            service: service.clone() as Arc<dyn LockService>,
            log: Logger::disabled(),
        },
        &PackageNaming::default().catalog_upstream_id("demoapp"),
        options,
    )
    .unwrap()
}

#[tokio::test]
async fn test_concurrent_acquire_is_exclusive() {
    let service = Arc::new(MemoryLockService::new());
    let holders = Arc::new(AtomicUsize::new(0));
    let max_seen = Arc::new(AtomicUsize::new(0));

    let mut tasks = Vec::new();
    for _ in 0..2 {
        let mut lock = lock_for(&service, fast_lock_options());
        let holders = holders.clone();
        let max_seen = max_seen.clone();
        tasks.push(tokio::spawn(async move {
            lock.acquire(&CancellationToken::new()).await.unwrap();
            let now = holders.fetch_add(1, Ordering::SeqCst) + 1;
            max_seen.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(150)).await;
            lock.ensure_held().unwrap();
            holders.fetch_sub(1, Ordering::SeqCst);
            lock.dispose().await.unwrap();
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }
    assert_eq!(max_seen.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_second_acquire_conflicts_when_retries_run_out() {
    let service = Arc::new(MemoryLockService::new());
    let cancel = CancellationToken::new();
    let mut first = lock_for(&service, fast_lock_options());
    first.acquire(&cancel).await.unwrap();

    let mut second = lock_for(
        &service,
        LockOptions {
            max_attempts: Some(3),
            ..fast_lock_options()
        },
    );
    let err = second.acquire(&cancel).await.unwrap_err();
    assert!(matches!(err, Error::Conflict(_)));
    assert!(first.ensure_held().is_ok());

    first.dispose().await.unwrap();
    second.acquire(&cancel).await.unwrap();
    second.dispose().await.unwrap();
}

#[tokio::test]
async fn test_cancelled_pack_leaves_catalog_alone() {
    let env = TestEnv::new();
    env.set_artifacts(&[("demoapp", b"one")]);
    env.publisher
        .pack(&demo_app(1, 0, 0), env.pack_options(), &CancellationToken::new())
        .await
        .unwrap();

    let cancel = CancellationToken::new();
    cancel.cancel();
    env.set_artifacts(&[("demoapp", b"two")]);
    let err = env
        .publisher
        .pack(&demo_app(1, 1, 0), env.pack_options(), &cancel)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Cancelled));

    let catalog = env.publisher.load_catalog(&demo_app(1, 0, 0)).await.unwrap();
    assert_eq!(catalog.version(), 1);
    assert!(!env.lock_service.is_held("demoapp_relpack"));
}
