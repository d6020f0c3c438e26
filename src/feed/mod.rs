// src/feed/mod.rs

//! Package feed contract
//!
//! A feed stores release packages and catalog archives by filename. Transport
//! and authentication belong to the implementation; the engine only uploads,
//! downloads and probes. Transient failures are retried by [`RetryPolicy`].

mod directory;

pub use directory::DirectoryFeed;

use crate::error::{Error, Result};
use crate::logging::Logger;
use async_trait::async_trait;
use std::future::Future;
use std::time::Duration;
use tracing::warn;

/// Default attempts for feed operations
pub const DEFAULT_RETRY_ATTEMPTS: u32 = 3;

/// Default fixed delay between feed attempts
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_millis(1000);

/// Storage for packages and catalogs, addressed by feed name and filename
#[async_trait]
pub trait PackageFeed: Send + Sync {
    /// Human-readable name for logs
    fn name(&self) -> &str;

    async fn upload(&self, feed: &str, filename: &str, data: &[u8]) -> Result<()>;

    /// Fetch a file; `Error::NotFound` when it does not exist
    async fn download(&self, feed: &str, filename: &str) -> Result<Vec<u8>>;

    async fn exists(&self, feed: &str, filename: &str) -> Result<bool>;
}

/// Fixed-delay retry of transient network failures
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub delay: Duration,
}

impl RetryPolicy {
    pub fn new(attempts: u32, delay: Duration) -> Result<Self> {
        if attempts == 0 {
            return Err(Error::Config("retry attempts must be positive".to_string()));
        }
        Ok(Self { attempts, delay })
    }

    /// Run `op`, retrying only `Error::TransientNetwork`
    pub async fn run<T, F, Fut>(&self, what: &str, log: &Logger, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match op().await {
                Err(Error::TransientNetwork(reason)) if attempt < self.attempts => {
                    warn!(
                        parent: log.span(),
                        "{} attempt {} failed: {}, retrying...",
                        what,
                        attempt,
                        reason
                    );
                    tokio::time::sleep(self.delay).await;
                }
                Err(Error::TransientNetwork(reason)) => {
                    return Err(Error::TransientNetwork(format!(
                        "{what} failed after {attempt} attempts: {reason}"
                    )));
                }
                other => return other,
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: DEFAULT_RETRY_ATTEMPTS,
            delay: DEFAULT_RETRY_DELAY,
        }
    }
}
