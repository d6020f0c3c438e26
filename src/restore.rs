// src/restore.rs

//! Restore a channel's packages to a local directory
//!
//! Restore runs in three passes:
//!
//! 1. packages already on disk are re-hashed; valid ones are kept
//! 2. the rest are downloaded from the channel's update feed and verified
//! 3. full packages missing from the feed are rebuilt from their
//!    predecessor and the delta of the same version
//!
//! Downloads and hashing each use their own counted admission, so a channel
//! with hundreds of releases never fans out unbounded.

use crate::error::{Error, Result};
use crate::feed::{PackageFeed, RetryPolicy};
use crate::hash::Checksum;
use crate::logging::Logger;
use crate::model::{SnapApp, SnapRelease};
use crate::pack::{PackageNaming, PreviousFull, rebuild_full};
use crate::releases::{ReleaseQuery, SnapAppsReleases};
use futures::stream::{self, StreamExt};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Default number of packages downloaded at once
pub const DEFAULT_DOWNLOAD_CONCURRENCY: usize = 4;

/// Default number of packages hashed at once
pub const DEFAULT_CHECKSUM_CONCURRENCY: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RestoreOptions {
    pub download_concurrency: usize,
    pub checksum_concurrency: usize,
    /// Rebuild full packages the feed no longer has from their delta
    pub rebuild_missing_full: bool,
}

impl RestoreOptions {
    pub fn validate(&self) -> Result<()> {
        if self.download_concurrency == 0 || self.checksum_concurrency == 0 {
            return Err(Error::Config(
                "restore concurrency limits must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for RestoreOptions {
    fn default() -> Self {
        Self {
            download_concurrency: DEFAULT_DOWNLOAD_CONCURRENCY,
            checksum_concurrency: DEFAULT_CHECKSUM_CONCURRENCY,
            rebuild_missing_full: true,
        }
    }
}

#[derive(Clone)]
pub struct RestoreDeps {
    pub feed: Arc<dyn PackageFeed>,
    pub naming: PackageNaming,
    pub retry: RetryPolicy,
    pub log: Logger,
}

/// What a restore did, by package filename
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RestoreReport {
    /// Already on disk with a matching checksum
    pub verified: Vec<String>,
    pub downloaded: Vec<String>,
    pub rebuilt: Vec<String>,
    pub bytes_downloaded: u64,
}

impl RestoreReport {
    pub fn total(&self) -> usize {
        self.verified.len() + self.downloaded.len() + self.rebuilt.len()
    }
}

impl fmt::Display for RestoreReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} packages: {} verified, {} downloaded ({} bytes), {} rebuilt",
            self.total(),
            self.verified.len(),
            self.downloaded.len(),
            self.bytes_downloaded,
            self.rebuilt.len()
        )
    }
}

enum Fetched<'a> {
    Downloaded(&'a SnapRelease, u64),
    /// Full package absent from the feed, to be rebuilt
    Missing(&'a SnapRelease),
}

/// Restore every package of `app` (at its rid) in `channel` into `dest`
pub async fn restore_channel(
    deps: &RestoreDeps,
    catalog: &SnapAppsReleases,
    app: &SnapApp,
    channel: &str,
    dest: &Path,
    options: &RestoreOptions,
    cancel: &CancellationToken,
) -> Result<RestoreReport> {
    options.validate()?;
    let log = deps.log.for_app(&app.id);
    let feed = app.channel(channel)?.update_feed.clone();

    let query = ReleaseQuery::for_app(&app.id)
        .rid(&app.target.rid)
        .channel(channel);
    let releases = catalog.releases(&query);
    if releases.is_empty() {
        return Err(Error::NotFound(format!(
            "releases of {} {} in channel '{}'",
            app.id, app.target.rid, channel
        )));
    }
    info!(
        parent: log.span(),
        "Restoring {} packages of {} {} from '{}' into {}",
        releases.len(),
        app.id,
        app.target.rid,
        feed,
        dest.display()
    );

    tokio::fs::create_dir_all(dest)
        .await
        .map_err(|e| Error::IoError(format!("Failed to create {}: {e}", dest.display())))?;

    let hashing = Arc::new(Semaphore::new(options.checksum_concurrency));
    let mut report = RestoreReport::default();

    // Pass 1: keep what is already valid on disk
    let checked: Vec<Result<(&SnapRelease, bool)>> = stream::iter(releases.iter().copied())
        .map(|release| {
            let hashing = Arc::clone(&hashing);
            let path = dest.join(&release.filename);
            let log = &log;
            async move {
                let valid = verify_on_disk(hashing, path, &release.package, log).await?;
                Ok((release, valid))
            }
        })
        .buffer_unordered(options.checksum_concurrency)
        .collect()
        .await;

    let mut missing = Vec::new();
    for result in checked {
        let (release, valid) = result?;
        if valid {
            report.verified.push(release.filename.clone());
        } else {
            missing.push(release);
        }
    }

    // Pass 2: download and verify
    let fetched: Vec<Result<Fetched<'_>>> = stream::iter(missing)
        .map(|release| {
            let hashing = Arc::clone(&hashing);
            let feed = feed.as_str();
            let log = &log;
            async move {
                if cancel.is_cancelled() {
                    return Err(Error::Cancelled);
                }
                let downloaded = deps
                    .retry
                    .run(&format!("download {}", release.filename), log, || {
                        deps.feed.download(feed, &release.filename)
                    })
                    .await;
                match downloaded {
                    Ok(bytes) => {
                        let bytes = verify_bytes(hashing, release, bytes).await?;
                        write_atomic(&dest.join(&release.filename), &bytes).await?;
                        debug!(
                            parent: log.span(),
                            "Downloaded {} ({} bytes)",
                            release.filename,
                            bytes.len()
                        );
                        Ok(Fetched::Downloaded(release, bytes.len() as u64))
                    }
                    Err(Error::NotFound(_))
                        if options.rebuild_missing_full
                            && release.is_full()
                            && !release.is_genesis() =>
                    {
                        warn!(
                            parent: log.span(),
                            "{} is missing from '{}', will rebuild it",
                            release.filename,
                            feed
                        );
                        Ok(Fetched::Missing(release))
                    }
                    Err(e) => Err(e),
                }
            }
        })
        .buffer_unordered(options.download_concurrency)
        .collect()
        .await;

    let mut to_rebuild = Vec::new();
    for result in fetched {
        match result? {
            Fetched::Downloaded(release, length) => {
                report.downloaded.push(release.filename.clone());
                report.bytes_downloaded += length;
            }
            Fetched::Missing(release) => to_rebuild.push(release),
        }
    }

    // Pass 3: oldest first, so a rebuilt full can be the next one's baseline
    to_rebuild.sort_by(|a, b| a.version.cmp(&b.version));
    for full in to_rebuild {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        rebuild_missing(deps, &releases, full, dest, &log).await?;
        report.rebuilt.push(full.filename.clone());
    }

    report.verified.sort();
    report.downloaded.sort();
    info!(parent: log.span(), "Restored {} {}: {}", app.id, channel, report);
    Ok(report)
}

/// Hash a local package; false when it is absent or does not match
async fn verify_on_disk(
    hashing: Arc<Semaphore>,
    path: PathBuf,
    expected: &Checksum,
    log: &Logger,
) -> Result<bool> {
    if !tokio::fs::try_exists(&path).await.unwrap_or(false) {
        return Ok(false);
    }
    let permit = hashing.acquire_owned().await.map_err(|_| Error::Cancelled)?;
    let hashed = path.clone();
    let actual = tokio::task::spawn_blocking(move || {
        let _permit = permit;
        Checksum::of_file(&hashed)
    })
    .await
    .map_err(|e| Error::IoError(format!("checksum task failed: {e}")))??;

    let valid =
        actual.length == expected.length && actual.hash.eq_ignore_ascii_case(&expected.hash);
    if !valid {
        warn!(
            parent: log.span(),
            "{} does not match its checksum, fetching it again",
            path.display()
        );
    }
    Ok(valid)
}

async fn verify_bytes(
    hashing: Arc<Semaphore>,
    release: &SnapRelease,
    bytes: Vec<u8>,
) -> Result<Vec<u8>> {
    let permit = hashing.acquire_owned().await.map_err(|_| Error::Cancelled)?;
    let expected = release.package.clone();
    let subject = release.filename.clone();
    tokio::task::spawn_blocking(move || {
        let _permit = permit;
        expected.verify(&subject, &bytes)?;
        Ok(bytes)
    })
    .await
    .map_err(|e| Error::IoError(format!("checksum task failed: {e}")))?
}

async fn rebuild_missing(
    deps: &RestoreDeps,
    releases: &[&SnapRelease],
    full: &SnapRelease,
    dest: &Path,
    log: &Logger,
) -> Result<()> {
    let delta = releases
        .iter()
        .find(|r| r.is_delta() && r.version == full.version)
        .ok_or_else(|| {
            Error::NotFound(format!(
                "{} and no delta of {} to rebuild it from",
                full.filename, full.version
            ))
        })?;
    let baseline = releases
        .iter()
        .filter(|r| r.is_full() && r.version < full.version)
        .max_by(|a, b| a.version.cmp(&b.version))
        .ok_or_else(|| Error::NotFound(format!("baseline full release before {}", full.version)))?;

    let previous = PreviousFull {
        release: (*baseline).clone(),
        package: read_package(&dest.join(&baseline.filename)).await?,
    };
    let delta_release = (*delta).clone();
    let delta_package = read_package(&dest.join(&delta.filename)).await?;
    let expected = full.clone();
    let naming = deps.naming.clone();
    let rebuild_log = log.clone();

    let output = tokio::task::spawn_blocking(move || {
        rebuild_full(
            &previous,
            &delta_release,
            &delta_package,
            Some(&expected),
            &naming,
            &rebuild_log,
        )
    })
    .await
    .map_err(|e| Error::IoError(format!("rebuild task failed: {e}")))??;

    write_atomic(&dest.join(&full.filename), &output.bytes).await?;
    info!(parent: log.span(), "Rebuilt {} from {}", full.filename, delta.filename);
    Ok(())
}

async fn read_package(path: &Path) -> Result<Vec<u8>> {
    tokio::fs::read(path)
        .await
        .map_err(|e| Error::IoError(format!("Failed to read {}: {e}", path.display())))
}

async fn write_atomic(path: &Path, data: &[u8]) -> Result<()> {
    let temp_path = path.with_extension("tmp");
    tokio::fs::write(&temp_path, data)
        .await
        .map_err(|e| Error::IoError(format!("Failed to write {}: {e}", temp_path.display())))?;
    tokio::fs::rename(&temp_path, path)
        .await
        .map_err(|e| Error::IoError(format!("Failed to rename temp file: {e}")))
}
