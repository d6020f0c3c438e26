// src/commands/mod.rs
//! Command handlers for the relpack CLI
//!
//! Handlers turn a loaded [`RelpackConfig`] into the library's dependency
//! structs, run one operation and print a summary. Library errors are
//! wrapped with `anyhow` context here and nowhere else.

mod demote;
mod list;
mod pack;
mod promote;
mod restore;

pub use demote::{cmd_demote, demote_filter};
pub use list::cmd_list;
pub use pack::cmd_pack;
pub use promote::cmd_promote;
pub use restore::cmd_restore;

use anyhow::{Context, Result};
use relpack::config::RelpackConfig;
use relpack::delta::{DeltaPatchEngine, engine_by_name};
use relpack::feed::{DirectoryFeed, PackageFeed};
use relpack::lock::{HttpLockService, LockService, MemoryLockService};
use relpack::logging::Logger;
use relpack::publish::{PublisherDeps, ReleasePublisher};
use relpack::restore::RestoreDeps;
use relpack::time::{HttpDateTimeSource, SystemTimeSource, TimeSource};
use semver::Version;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

fn feed(config: &RelpackConfig) -> Arc<dyn PackageFeed> {
    Arc::new(DirectoryFeed::new(&config.feed.directory))
}

fn lock_service(config: &RelpackConfig) -> Result<Arc<dyn LockService>> {
    match &config.lock.url {
        Some(url) => {
            let service = HttpLockService::new(url)
                .with_context(|| format!("Failed to set up the lock service at {url}"))?;
            Ok(Arc::new(service))
        }
        None => {
            warn!("No lock service configured; the release lock only guards this process");
            Ok(Arc::new(MemoryLockService::new()))
        }
    }
}

fn time_source(config: &RelpackConfig) -> Result<Arc<dyn TimeSource>> {
    match &config.time.url {
        Some(url) => Ok(Arc::new(
            HttpDateTimeSource::new(url).context("Failed to set up the trusted time source")?,
        )),
        None => Ok(Arc::new(SystemTimeSource)),
    }
}

/// Wire a publisher from the configuration
pub(crate) fn publisher(
    config: &RelpackConfig,
    engine: Arc<dyn DeltaPatchEngine>,
    log: &Logger,
) -> Result<ReleasePublisher> {
    let deps = PublisherDeps {
        feed: feed(config),
        lock_service: lock_service(config)?,
        time: time_source(config)?,
        engine,
        naming: config.naming()?,
        lock_options: config.lock_options()?,
        retry: config.retry_policy()?,
        log: log.child("publish"),
    };
    Ok(ReleasePublisher::new(deps)?)
}

/// Publisher for commands that never build packages
pub(crate) fn catalog_publisher(config: &RelpackConfig, log: &Logger) -> Result<ReleasePublisher> {
    publisher(config, engine_by_name("zstd")?, log)
}

pub(crate) fn restore_deps(config: &RelpackConfig, log: &Logger) -> Result<RestoreDeps> {
    Ok(RestoreDeps {
        feed: feed(config),
        naming: config.naming()?,
        retry: config.retry_policy()?,
        log: log.child("restore"),
    })
}

pub(crate) fn parse_version(value: &str) -> Result<Version> {
    Version::parse(value).with_context(|| format!("Invalid version '{value}'"))
}

/// Token cancelled on Ctrl-C
pub fn cancel_on_ctrl_c() -> CancellationToken {
    let token = CancellationToken::new();
    let cancel = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupted, cancelling...");
            cancel.cancel();
        }
    });
    token
}

/// Human-readable byte count
pub(crate) fn format_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.2} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{bytes} B")
    }
}
