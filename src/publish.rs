// src/publish.rs

//! Locked publication cycles
//!
//! Every operation that changes the catalog follows the same cycle:
//!
//! 1. acquire the release lock for the app (`{id}_{suite}`)
//! 2. download the latest catalog from the first channel's push feed
//! 3. build packages / apply the promotion or demotion in memory
//! 4. upload packages, then check the lease is still ours
//! 5. upload the catalog
//! 6. dispose the lock, on every exit path
//!
//! A failure or cancellation before step 5 leaves the published catalog
//! untouched.

use crate::checksum::{ArtifactSource, ChangeCounts, NeverDiff};
use crate::delta::{DeltaPatchEngine, DeltaTotals};
use crate::error::{Error, Result};
use crate::feed::{PackageFeed, RetryPolicy};
use crate::lock::{DistributedReleaseLock, LockDeps, LockOptions, LockService};
use crate::logging::Logger;
use crate::model::{ReleaseKey, SnapApp, SnapRelease};
use crate::pack::{AssemblerDeps, PackRequest, PackageAssembler, PackageNaming, PreviousFull};
use crate::releases::{
    DemoteFilter, PromotionMode, PromotionPlan, ReleaseQuery, SnapAppsReleases, plan_demotion,
    plan_promotion,
};
use crate::time::TimeSource;
use chrono::{DateTime, Utc};
use semver::Version;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Collaborators of the publisher, assembled once at startup
#[derive(Clone)]
pub struct PublisherDeps {
    pub feed: Arc<dyn PackageFeed>,
    pub lock_service: Arc<dyn LockService>,
    pub time: Arc<dyn TimeSource>,
    pub engine: Arc<dyn DeltaPatchEngine>,
    pub naming: PackageNaming,
    pub lock_options: LockOptions,
    pub retry: RetryPolicy,
    pub log: Logger,
}

/// Artifacts and switches of one pack
#[derive(Debug, Clone, Default)]
pub struct PackOptions {
    pub sources: Vec<ArtifactSource>,
    pub never_diff: NeverDiff,
    pub rebase: bool,
    pub release_notes: Option<String>,
}

#[derive(Debug, Clone)]
pub struct PackSummary {
    pub full: SnapRelease,
    pub delta: Option<SnapRelease>,
    pub counts: ChangeCounts,
    pub totals: DeltaTotals,
    pub catalog_version: u64,
}

#[derive(Debug, Clone)]
pub struct PromoteSummary {
    pub plan: PromotionPlan,
    /// False when the version was already fully promoted
    pub changed: bool,
    pub catalog_version: u64,
}

#[derive(Debug, Clone)]
pub struct DemoteSummary {
    pub removed: Vec<ReleaseKey>,
    pub catalog_version: u64,
}

/// Runs pack, promote and demote under the release lock
pub struct ReleasePublisher {
    deps: PublisherDeps,
}

impl ReleasePublisher {
    pub fn new(deps: PublisherDeps) -> Result<Self> {
        deps.lock_options.validate()?;
        Ok(Self { deps })
    }

    pub fn naming(&self) -> &PackageNaming {
        &self.deps.naming
    }

    fn new_lock(&self, app: &SnapApp) -> Result<DistributedReleaseLock> {
        DistributedReleaseLock::new(
            LockDeps {
                service: Arc::clone(&self.deps.lock_service),
                log: self.deps.log.for_app(&app.id),
            },
            &self.deps.naming.catalog_upstream_id(&app.id),
            self.deps.lock_options.clone(),
        )
    }

    /// Download the app's catalog; a missing catalog is a new, empty one
    pub async fn load_catalog(&self, app: &SnapApp) -> Result<SnapAppsReleases> {
        app.validate()?;
        let log = self.deps.log.for_app(&app.id);
        let feed = &app.first_channel()?.push_feed;
        let filename = self.deps.naming.catalog_filename(&app.id);

        let downloaded = self
            .deps
            .retry
            .run(&format!("download {filename}"), &log, || {
                self.deps.feed.download(feed, &filename)
            })
            .await;

        match downloaded {
            Ok(bytes) => SnapAppsReleases::from_archive(&bytes),
            Err(Error::NotFound(_)) => {
                info!(
                    parent: log.span(),
                    "No catalog {} in feed '{}', starting a new one",
                    filename,
                    feed
                );
                Ok(SnapAppsReleases::new())
            }
            Err(e) => Err(e),
        }
    }

    async fn upload(&self, feed: &str, filename: &str, bytes: &[u8], log: &Logger) -> Result<()> {
        self.deps
            .retry
            .run(&format!("upload {filename}"), log, || {
                self.deps.feed.upload(feed, filename, bytes)
            })
            .await
    }

    async fn download(&self, feed: &str, filename: &str, log: &Logger) -> Result<Vec<u8>> {
        self.deps
            .retry
            .run(&format!("download {filename}"), log, || {
                self.deps.feed.download(feed, filename)
            })
            .await
    }

    /// Current time from the trusted source, retrying transient failures
    async fn trusted_now(&self, log: &Logger) -> Result<DateTime<Utc>> {
        self.deps
            .retry
            .run("trusted time", log, || self.deps.time.now())
            .await
    }

    /// Publish a mutated catalog while the lease is provably ours
    async fn store_catalog(
        &self,
        app: &SnapApp,
        catalog: &SnapAppsReleases,
        lock: &DistributedReleaseLock,
        cancel: &CancellationToken,
        log: &Logger,
    ) -> Result<()> {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        let bytes = catalog.to_archive()?;
        lock.ensure_held()?;
        let filename = self.deps.naming.catalog_filename(&app.id);
        self.upload(&app.first_channel()?.push_feed, &filename, &bytes, log)
            .await?;
        info!(
            parent: log.span(),
            "Published catalog {} (version {}, {} releases, {} bytes)",
            filename,
            catalog.version(),
            catalog.len(),
            bytes.len()
        );
        Ok(())
    }

    /// Dispose the lock and keep the operation's own error first
    async fn finish<T>(
        &self,
        mut lock: DistributedReleaseLock,
        result: Result<T>,
        log: &Logger,
    ) -> Result<T> {
        let disposed = lock.dispose().await;
        match (result, disposed) {
            (Ok(value), Ok(())) => Ok(value),
            (Ok(value), Err(e)) => {
                warn!(parent: log.span(), "Lock release failed after publishing: {}", e);
                Ok(value)
            }
            (Err(e), Ok(())) => Err(e),
            (Err(e), Err(release)) => {
                warn!(parent: log.span(), "Lock release failed: {}", release);
                Err(e)
            }
        }
    }

    /// Pack `app.version` from `options.sources` and publish it
    pub async fn pack(
        &self,
        app: &SnapApp,
        options: PackOptions,
        cancel: &CancellationToken,
    ) -> Result<PackSummary> {
        app.validate()?;
        let log = self.deps.log.for_app(&app.id);
        let mut lock = self.new_lock(app)?;
        lock.acquire(cancel).await?;
        let result = self.pack_locked(app, options, &lock, cancel, &log).await;
        self.finish(lock, result, &log).await
    }

    async fn pack_locked(
        &self,
        app: &SnapApp,
        options: PackOptions,
        lock: &DistributedReleaseLock,
        cancel: &CancellationToken,
        log: &Logger,
    ) -> Result<PackSummary> {
        let mut catalog = self.load_catalog(app).await?;
        let before = catalog.version();
        info!(
            parent: log.span(),
            "Packing {} {} ({}); catalog version {} with {} releases",
            app.id,
            app.version,
            app.target.rid,
            before,
            catalog.len()
        );

        let query = ReleaseQuery::for_app(&app.id).rid(&app.target.rid);
        if let Some(latest) = catalog.most_recent_release(&query)
            && app.version <= latest.version
        {
            return Err(Error::Validation(format!(
                "version {} must be greater than the most recent release {}",
                app.version, latest.version
            )));
        }

        let previous = match catalog.most_recent_full(&query) {
            Some(release) => {
                let package = self
                    .download(&app.first_channel()?.push_feed, &release.filename, log)
                    .await?;
                Some(PreviousFull {
                    release: release.clone(),
                    package,
                })
            }
            None => None,
        };

        let assembler = PackageAssembler::new(AssemblerDeps {
            engine: Arc::clone(&self.deps.engine),
            naming: self.deps.naming.clone(),
            log: self.deps.log.child("assembler"),
        });
        let request = PackRequest {
            app: app.clone(),
            sources: options.sources,
            never_diff: options.never_diff,
            rebase: options.rebase,
            release_notes: options.release_notes,
            created_utc: self.trusted_now(log).await?,
        };
        let build_cancel = cancel.clone();
        let output = tokio::task::spawn_blocking(move || {
            assembler.assemble(previous.as_ref(), &request, &build_cancel)
        })
        .await
        .map_err(|e| Error::IoError(format!("package build task failed: {e}")))??;

        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        lock.ensure_held()?;

        let feed = &app.first_channel()?.push_feed;
        self.upload(feed, &output.full.release.filename, &output.full.bytes, log)
            .await?;
        if let Some(delta) = &output.delta {
            self.upload(feed, &delta.release.filename, &delta.bytes, log)
                .await?;
        }

        let full = output.full.release;
        let delta = output.delta.map(|d| d.release);
        let now = self.trusted_now(log).await?;
        catalog.add_release(full.clone(), delta.clone(), now)?;
        self.store_catalog(app, &catalog, lock, cancel, log).await?;

        info!(
            parent: log.span(),
            "Packed {} {}: {}; catalog version {} -> {}",
            app.id,
            app.version,
            output.counts,
            before,
            catalog.version()
        );
        Ok(PackSummary {
            full,
            delta,
            counts: output.counts,
            totals: output.totals,
            catalog_version: catalog.version(),
        })
    }

    /// Promote `version` (default: latest) out of `from_channel`
    pub async fn promote(
        &self,
        app: &SnapApp,
        from_channel: &str,
        version: Option<&Version>,
        mode: PromotionMode,
        cancel: &CancellationToken,
    ) -> Result<PromoteSummary> {
        app.validate()?;
        let log = self.deps.log.for_app(&app.id);
        let mut lock = self.new_lock(app)?;
        lock.acquire(cancel).await?;
        let result = self
            .promote_locked(app, from_channel, version, mode, &lock, cancel, &log)
            .await;
        self.finish(lock, result, &log).await
    }

    #[allow(clippy::too_many_arguments)]
    async fn promote_locked(
        &self,
        app: &SnapApp,
        from_channel: &str,
        version: Option<&Version>,
        mode: PromotionMode,
        lock: &DistributedReleaseLock,
        cancel: &CancellationToken,
        log: &Logger,
    ) -> Result<PromoteSummary> {
        let mut catalog = self.load_catalog(app).await?;
        let before = catalog.version();
        let plan = plan_promotion(&catalog, app, from_channel, version, mode)?;

        if plan.is_noop() {
            info!(parent: log.span(), "Nothing to promote: {}", plan);
            return Ok(PromoteSummary {
                plan,
                changed: false,
                catalog_version: before,
            });
        }
        info!(parent: log.span(), "Promoting {} from '{}'", plan, from_channel);

        let source_feed = app.first_channel()?.push_feed.clone();
        for channel in &plan.to_channels {
            let target_feed = &app.channel(channel)?.push_feed;
            if *target_feed == source_feed {
                continue;
            }
            for key in &plan.releases {
                if cancel.is_cancelled() {
                    return Err(Error::Cancelled);
                }
                let release = catalog
                    .find(key)
                    .ok_or_else(|| Error::NotFound(format!("release {key}")))?;
                if self.deps.feed.exists(target_feed, &release.filename).await? {
                    continue;
                }
                let bytes = self.download(&source_feed, &release.filename, log).await?;
                release.package.verify(&release.filename, &bytes)?;
                self.upload(target_feed, &release.filename, &bytes, log).await?;
            }
        }

        let now = self.trusted_now(log).await?;
        let changed = catalog.promote(&plan.releases, &plan.to_channels, now)?;
        if changed {
            self.store_catalog(app, &catalog, lock, cancel, log).await?;
        }
        info!(
            parent: log.span(),
            "Promoted {} {} to {}; catalog version {} -> {}",
            app.id,
            plan.version,
            plan.to_channels.join(", "),
            before,
            catalog.version()
        );
        Ok(PromoteSummary {
            plan,
            changed,
            catalog_version: catalog.version(),
        })
    }

    /// Remove every release of `app` matching `filter`
    pub async fn demote(
        &self,
        app: &SnapApp,
        filter: &DemoteFilter,
        cancel: &CancellationToken,
    ) -> Result<DemoteSummary> {
        app.validate()?;
        let log = self.deps.log.for_app(&app.id);
        let mut lock = self.new_lock(app)?;
        lock.acquire(cancel).await?;
        let result = self.demote_locked(app, filter, &lock, cancel, &log).await;
        self.finish(lock, result, &log).await
    }

    async fn demote_locked(
        &self,
        app: &SnapApp,
        filter: &DemoteFilter,
        lock: &DistributedReleaseLock,
        cancel: &CancellationToken,
        log: &Logger,
    ) -> Result<DemoteSummary> {
        let mut catalog = self.load_catalog(app).await?;
        let before = catalog.version();
        let keys = plan_demotion(&catalog, &app.id, filter);
        if keys.is_empty() {
            return Err(Error::NotFound(format!(
                "no releases of {} match the demotion filter",
                app.id
            )));
        }
        for key in &keys {
            info!(parent: log.span(), "Demoting {}", key);
        }

        let now = self.trusted_now(log).await?;
        let removed = catalog.demote(&keys, now)?;
        if removed != keys.len() {
            return Err(Error::Integrity(format!(
                "demotion removed {} of {} releases",
                removed,
                keys.len()
            )));
        }
        self.store_catalog(app, &catalog, lock, cancel, log).await?;

        info!(
            parent: log.span(),
            "Demoted {} releases of {}; catalog version {} -> {}",
            removed,
            app.id,
            before,
            catalog.version()
        );
        Ok(DemoteSummary {
            removed: keys,
            catalog_version: catalog.version(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::delta::BlockCopyEngine;
    use crate::feed::DirectoryFeed;
    use crate::lock::MemoryLockService;
    use crate::model::{Channel, OsPlatform, Target};
    use crate::time::SystemTimeSource;
    use async_trait::async_trait;
    use std::fs;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;
    use tempfile::TempDir;

    /// Clock whose first `failures` reads fail like a dropped connection
    struct FlakyClock {
        failures: u32,
        calls: AtomicU32,
    }

    #[async_trait]
    impl TimeSource for FlakyClock {
        async fn now(&self) -> Result<DateTime<Utc>> {
            if self.calls.fetch_add(1, Ordering::SeqCst) < self.failures {
                return Err(Error::TransientNetwork("time source: connection reset".into()));
            }
            Ok(Utc::now())
        }
    }

    struct Fixture {
        temp: TempDir,
        artifacts: std::path::PathBuf,
        lock_service: Arc<MemoryLockService>,
        publisher: ReleasePublisher,
    }

    fn fixture() -> Fixture {
        fixture_with(Arc::new(SystemTimeSource), RetryPolicy::new(1, Duration::ZERO).unwrap())
    }

    fn fixture_with(time: Arc<dyn TimeSource>, retry: RetryPolicy) -> Fixture {
        let temp = TempDir::new().unwrap();
        let artifacts = temp.path().join("artifacts");
        fs::create_dir_all(&artifacts).unwrap();
        let lock_service = Arc::new(MemoryLockService::new());
        let publisher = ReleasePublisher::new(PublisherDeps {
            feed: Arc::new(DirectoryFeed::new(temp.path().join("feed"))),
            lock_service: lock_service.clone(),
            time,
            engine: Arc::new(BlockCopyEngine::new()),
            naming: PackageNaming::default(),
            lock_options: LockOptions {
                retry_delay: Duration::from_millis(10),
                max_attempts: Some(2),
                ..LockOptions::default()
            },
            retry,
            log: Logger::disabled(),
        })
        .unwrap();
        Fixture {
            temp,
            artifacts,
            lock_service,
            publisher,
        }
    }

    fn app(version: Version) -> SnapApp {
        SnapApp::new(
            "demoapp",
            version,
            Target::new(OsPlatform::Linux, "linux-x64", "net8.0").unwrap(),
            vec![
                Channel::new("test", "main"),
                Channel::new("staging", "staging-feed"),
            ],
        )
        .unwrap()
    }

    fn options(fixture: &Fixture) -> PackOptions {
        PackOptions {
            sources: vec![ArtifactSource::app(&fixture.artifacts)],
            ..PackOptions::default()
        }
    }

    #[tokio::test]
    async fn test_pack_releases_lock_and_publishes_catalog() {
        let fixture = fixture();
        fs::write(fixture.artifacts.join("demoapp"), b"v1").unwrap();

        let summary = fixture
            .publisher
            .pack(&app(Version::new(1, 0, 0)), options(&fixture), &CancellationToken::new())
            .await
            .unwrap();
        assert!(summary.full.is_genesis());
        assert_eq!(summary.catalog_version, 1);
        assert!(!fixture.lock_service.is_held("demoapp_relpack"));

        let catalog = fixture
            .publisher
            .load_catalog(&app(Version::new(1, 0, 0)))
            .await
            .unwrap();
        assert_eq!(catalog.version(), 1);
        assert_eq!(catalog.len(), 1);
    }

    #[tokio::test]
    async fn test_pack_rejects_old_version_and_keeps_catalog() {
        let fixture = fixture();
        fs::write(fixture.artifacts.join("demoapp"), b"v1").unwrap();
        let cancel = CancellationToken::new();
        fixture
            .publisher
            .pack(&app(Version::new(1, 0, 0)), options(&fixture), &cancel)
            .await
            .unwrap();

        let err = fixture
            .publisher
            .pack(&app(Version::new(0, 9, 0)), options(&fixture), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
        assert!(!fixture.lock_service.is_held("demoapp_relpack"));

        let catalog = fixture
            .publisher
            .load_catalog(&app(Version::new(1, 0, 0)))
            .await
            .unwrap();
        assert_eq!(catalog.version(), 1);
    }

    #[tokio::test]
    async fn test_pack_waits_for_busy_lock() {
        let fixture = fixture();
        fs::write(fixture.artifacts.join("demoapp"), b"v1").unwrap();
        fixture
            .lock_service
            .try_grant("demoapp_relpack", Duration::from_secs(60))
            .unwrap();

        let err = fixture
            .publisher
            .pack(&app(Version::new(1, 0, 0)), options(&fixture), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Conflict(_)));
    }

    #[tokio::test]
    async fn test_promote_copies_packages_to_target_feed() {
        let fixture = fixture();
        fs::write(fixture.artifacts.join("demoapp"), b"v1").unwrap();
        let cancel = CancellationToken::new();
        let packed = fixture
            .publisher
            .pack(&app(Version::new(1, 0, 0)), options(&fixture), &cancel)
            .await
            .unwrap();

        let summary = fixture
            .publisher
            .promote(&app(Version::new(1, 0, 0)), "test", None, PromotionMode::Next, &cancel)
            .await
            .unwrap();
        assert!(summary.changed);
        assert_eq!(summary.catalog_version, 2);
        assert!(
            fixture
                .temp
                .path()
                .join("feed/staging-feed")
                .join(&packed.full.filename)
                .exists()
        );

        let again = fixture
            .publisher
            .promote(&app(Version::new(1, 0, 0)), "test", None, PromotionMode::Next, &cancel)
            .await
            .unwrap();
        assert!(!again.changed);
        assert_eq!(again.catalog_version, 2);
    }

    #[tokio::test]
    async fn test_pack_retries_trusted_time() {
        let clock = Arc::new(FlakyClock {
            failures: 1,
            calls: AtomicU32::new(0),
        });
        let fixture = fixture_with(
            clock.clone(),
            RetryPolicy::new(3, Duration::from_millis(1)).unwrap(),
        );
        fs::write(fixture.artifacts.join("demoapp"), b"v1").unwrap();

        let summary = fixture
            .publisher
            .pack(&app(Version::new(1, 0, 0)), options(&fixture), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(summary.catalog_version, 1);
        assert!(clock.calls.load(Ordering::SeqCst) >= 3);
    }

    #[tokio::test]
    async fn test_time_failures_exhaust_retries() {
        let fixture = fixture_with(
            Arc::new(FlakyClock {
                failures: u32::MAX,
                calls: AtomicU32::new(0),
            }),
            RetryPolicy::new(2, Duration::from_millis(1)).unwrap(),
        );
        fs::write(fixture.artifacts.join("demoapp"), b"v1").unwrap();

        let err = fixture
            .publisher
            .pack(&app(Version::new(1, 0, 0)), options(&fixture), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::TransientNetwork(_)));
        assert!(!fixture.lock_service.is_held("demoapp_relpack"));
    }

    #[tokio::test]
    async fn test_load_catalog_rejects_app_without_channels() {
        let fixture = fixture();
        let mut app = app(Version::new(1, 0, 0));
        app.channels.clear();
        let err = fixture.publisher.load_catalog(&app).await.unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[tokio::test]
    async fn test_demote_nothing_is_not_found() {
        let fixture = fixture();
        let err = fixture
            .publisher
            .demote(
                &app(Version::new(1, 0, 0)),
                &DemoteFilter::default(),
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
        assert!(!fixture.lock_service.is_held("demoapp_relpack"));
    }
}
