// src/config.rs
//! Configuration file parsing
//!
//! Supports a TOML file with the following sections:
//! - [feed] - Directory feed root, filename suite, transfer retries
//! - [lock] - Lock service URL, lease timing, acquisition retries
//! - [pack] - Never-diff patterns
//! - [restore] - Download and checksum concurrency
//! - [time] - Trusted time source
//! - [[apps]] - Applications and their [[apps.channels]] pipeline

use crate::checksum::NeverDiff;
use crate::error::{Error, Result};
use crate::feed::RetryPolicy;
use crate::lock::LockOptions;
use crate::model::{Channel, OsPlatform, SnapApp, Target};
use crate::pack::PackageNaming;
use crate::restore::RestoreOptions;
use semver::Version;
use serde::Deserialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default configuration file, relative to the working directory
pub const DEFAULT_CONFIG_PATH: &str = "relpack.toml";

/// TOML configuration file structure
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RelpackConfig {
    #[serde(default)]
    pub feed: FeedSection,

    #[serde(default)]
    pub lock: LockSection,

    #[serde(default)]
    pub pack: PackSection,

    #[serde(default)]
    pub restore: RestoreSection,

    #[serde(default)]
    pub time: TimeSection,

    #[serde(default)]
    pub apps: Vec<AppSection>,
}

/// Package feed configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FeedSection {
    /// Root directory of the directory feed
    #[serde(default = "default_feed_directory")]
    pub directory: PathBuf,

    /// Suite segment of package and catalog filenames
    #[serde(default = "default_suite")]
    pub suite: String,

    #[serde(default = "default_feed_retry_attempts")]
    pub retry_attempts: u32,

    #[serde(default = "default_feed_retry_delay_ms")]
    pub retry_delay_ms: u64,
}

impl Default for FeedSection {
    fn default() -> Self {
        Self {
            directory: default_feed_directory(),
            suite: default_suite(),
            retry_attempts: default_feed_retry_attempts(),
            retry_delay_ms: default_feed_retry_delay_ms(),
        }
    }
}

fn default_feed_directory() -> PathBuf {
    PathBuf::from("feed")
}

fn default_suite() -> String {
    "relpack".to_string()
}

fn default_feed_retry_attempts() -> u32 {
    3
}

fn default_feed_retry_delay_ms() -> u64 {
    1000
}

/// Distributed lock configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LockSection {
    /// HTTP lock service; without one the lock is held in-process
    pub url: Option<String>,

    #[serde(default = "default_lease_duration_secs")]
    pub lease_duration_secs: u64,

    #[serde(default = "default_renew_interval_secs")]
    pub renew_interval_secs: u64,

    /// 0 retries forever
    #[serde(default = "default_lock_retry_attempts")]
    pub retry_attempts: u32,

    #[serde(default = "default_lock_retry_delay_ms")]
    pub retry_delay_ms: u64,

    #[serde(default = "default_attempt_timeout_secs")]
    pub attempt_timeout_secs: u64,
}

impl Default for LockSection {
    fn default() -> Self {
        Self {
            url: None,
            lease_duration_secs: default_lease_duration_secs(),
            renew_interval_secs: default_renew_interval_secs(),
            retry_attempts: default_lock_retry_attempts(),
            retry_delay_ms: default_lock_retry_delay_ms(),
            attempt_timeout_secs: default_attempt_timeout_secs(),
        }
    }
}

fn default_lease_duration_secs() -> u64 {
    60
}

fn default_renew_interval_secs() -> u64 {
    15
}

fn default_lock_retry_attempts() -> u32 {
    20
}

fn default_lock_retry_delay_ms() -> u64 {
    5000
}

fn default_attempt_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PackSection {
    /// Glob patterns of target paths that are always stored whole
    #[serde(default)]
    pub never_diff: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RestoreSection {
    #[serde(default = "default_download_concurrency")]
    pub download_concurrency: usize,

    #[serde(default = "default_checksum_concurrency")]
    pub checksum_concurrency: usize,
}

impl Default for RestoreSection {
    fn default() -> Self {
        Self {
            download_concurrency: default_download_concurrency(),
            checksum_concurrency: default_checksum_concurrency(),
        }
    }
}

fn default_download_concurrency() -> usize {
    crate::restore::DEFAULT_DOWNLOAD_CONCURRENCY
}

fn default_checksum_concurrency() -> usize {
    crate::restore::DEFAULT_CHECKSUM_CONCURRENCY
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TimeSection {
    /// HTTPS endpoint whose `Date` header is trusted; system clock if unset
    pub url: Option<String>,
}

/// One application and its channel pipeline
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AppSection {
    pub id: String,
    pub os: OsPlatform,
    pub rid: String,
    pub framework: String,

    /// Support files packed under the assets root
    pub assets: Option<PathBuf>,

    #[serde(default)]
    pub channels: Vec<ChannelSection>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ChannelSection {
    pub name: String,
    pub push_feed: String,

    /// Defaults to the push feed
    pub update_feed: Option<String>,
}

impl RelpackConfig {
    /// Load and validate a configuration file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("Failed to read {}: {e}", path.display())))?;
        content.parse().map_err(|e| match e {
            Error::Config(reason) => Error::Config(format!("{}: {reason}", path.display())),
            other => other,
        })
    }

    /// Check every section without touching the network
    pub fn validate(&self) -> Result<()> {
        self.naming()?;
        self.lock_options()?;
        self.retry_policy()?;
        self.restore_options().validate()?;
        self.never_diff()?;

        if let Some(url) = &self.lock.url
            && !url.starts_with("http://")
            && !url.starts_with("https://")
        {
            return Err(Error::Config(format!("lock url '{url}' is not http(s)")));
        }
        if let Some(url) = &self.time.url
            && !url.starts_with("https://")
        {
            return Err(Error::Config(format!("time url '{url}' must be https")));
        }

        let mut ids = HashSet::new();
        for app in &self.apps {
            if !ids.insert(app.id.to_lowercase()) {
                return Err(Error::Config(format!("application '{}' is configured twice", app.id)));
            }
            self.build_app(app, Version::new(0, 0, 0))
                .map_err(|e| Error::Config(format!("application '{}': {e}", app.id)))?;
        }
        Ok(())
    }

    pub fn naming(&self) -> Result<PackageNaming> {
        PackageNaming::new(&self.feed.suite)
    }

    pub fn lock_options(&self) -> Result<LockOptions> {
        let options = LockOptions {
            lease_duration: Duration::from_secs(self.lock.lease_duration_secs),
            renew_interval: Duration::from_secs(self.lock.renew_interval_secs),
            retry_delay: Duration::from_millis(self.lock.retry_delay_ms),
            max_attempts: match self.lock.retry_attempts {
                0 => None,
                n => Some(n),
            },
            attempt_timeout: Duration::from_secs(self.lock.attempt_timeout_secs),
        };
        options.validate()?;
        Ok(options)
    }

    pub fn retry_policy(&self) -> Result<RetryPolicy> {
        RetryPolicy::new(
            self.feed.retry_attempts,
            Duration::from_millis(self.feed.retry_delay_ms),
        )
    }

    pub fn restore_options(&self) -> RestoreOptions {
        RestoreOptions {
            download_concurrency: self.restore.download_concurrency,
            checksum_concurrency: self.restore.checksum_concurrency,
            ..RestoreOptions::default()
        }
    }

    pub fn never_diff(&self) -> Result<NeverDiff> {
        NeverDiff::new(&self.pack.never_diff)
    }

    pub fn app_section(&self, id: &str) -> Result<&AppSection> {
        self.apps
            .iter()
            .find(|app| app.id.eq_ignore_ascii_case(id))
            .ok_or_else(|| Error::NotFound(format!("application '{id}' in the configuration")))
    }

    /// Descriptor of a configured application at `version`
    pub fn app(&self, id: &str, version: Version) -> Result<SnapApp> {
        self.build_app(self.app_section(id)?, version)
    }

    fn build_app(&self, section: &AppSection, version: Version) -> Result<SnapApp> {
        let target = Target::new(section.os, &section.rid, &section.framework)?;
        let channels = section
            .channels
            .iter()
            .map(|c| Channel {
                name: c.name.clone(),
                push_feed: c.push_feed.clone(),
                update_feed: c.update_feed.clone().unwrap_or_else(|| c.push_feed.clone()),
            })
            .collect();
        SnapApp::new(&section.id, version, target, channels)
    }
}

impl std::str::FromStr for RelpackConfig {
    type Err = Error;

    fn from_str(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content).map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }
}
