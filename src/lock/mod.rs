// src/lock/mod.rs

//! Lease-based release lock
//!
//! Every catalog mutation (download, change, re-upload) runs while holding a
//! [`DistributedReleaseLock`]. The lock is a lease granted by a
//! [`LockService`] and identified by an opaque challenge; a background task
//! renews it until the lock is released, disposed, cancelled or found lost.
//!
//! State machine:
//!
//! ```text
//! Idle -> Acquiring -> Acquired -> Renewing -> Released
//!                                           -> Expired   (lease gone)
//! any  -> Disposed
//! ```
//!
//! Acquiring twice, or using the lock after dispose, is a usage error and is
//! never retried.

mod http;
mod memory;

pub use http::{HttpLockService, LeaseChallenge};
pub use memory::MemoryLockService;

use crate::error::{Error, Result};
use crate::logging::Logger;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Default lease duration (60 seconds)
pub const DEFAULT_LEASE_DURATION: Duration = Duration::from_secs(60);

/// Default renewal interval (15 seconds)
pub const DEFAULT_RENEW_INTERVAL: Duration = Duration::from_secs(15);

/// Default delay between acquisition attempts
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(5);

/// Default number of acquisition attempts
pub const DEFAULT_MAX_ATTEMPTS: u32 = 20;

/// Default wait for one acquisition attempt
pub const DEFAULT_ATTEMPT_TIMEOUT: Duration = Duration::from_secs(30);

/// Remote lease service contract
#[async_trait]
pub trait LockService: Send + Sync {
    /// Human-readable name for logs
    fn name(&self) -> &str;

    /// Grant a lease: `Some(challenge)` on success, `None` when held elsewhere
    async fn acquire(&self, name: &str, lease: Duration) -> Result<Option<String>>;

    /// Extend a lease; `Error::NotFound` means the lease no longer exists
    async fn renew(&self, name: &str, challenge: &str, lease: Duration) -> Result<()>;

    /// Give a lease back
    async fn release(&self, name: &str, challenge: &str) -> Result<()>;
}

/// Timing and retry policy of a lock
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockOptions {
    pub lease_duration: Duration,
    pub renew_interval: Duration,
    pub retry_delay: Duration,
    /// `None` retries until cancelled
    pub max_attempts: Option<u32>,
    pub attempt_timeout: Duration,
}

impl LockOptions {
    /// Renewal must fit twice into the lease so one missed renewal is harmless
    pub fn validate(&self) -> Result<()> {
        if self.lease_duration.is_zero() || self.renew_interval.is_zero() {
            return Err(Error::Config(
                "lease duration and renewal interval must be positive".to_string(),
            ));
        }
        if self.renew_interval * 2 >= self.lease_duration {
            return Err(Error::Config(format!(
                "renewal interval {:?} must be less than half the lease duration {:?}",
                self.renew_interval, self.lease_duration
            )));
        }
        if self.attempt_timeout.is_zero() {
            return Err(Error::Config("attempt timeout must be positive".to_string()));
        }
        if self.max_attempts == Some(0) {
            return Err(Error::Config(
                "max attempts must be positive (omit it to retry forever)".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for LockOptions {
    fn default() -> Self {
        Self {
            lease_duration: DEFAULT_LEASE_DURATION,
            renew_interval: DEFAULT_RENEW_INTERVAL,
            retry_delay: DEFAULT_RETRY_DELAY,
            max_attempts: Some(DEFAULT_MAX_ATTEMPTS),
            attempt_timeout: DEFAULT_ATTEMPT_TIMEOUT,
        }
    }
}

/// Lifecycle state of a lock
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockState {
    Idle,
    Acquiring,
    Acquired,
    Renewing,
    Released,
    Expired,
    Disposed,
}

impl LockState {
    pub fn is_held(&self) -> bool {
        matches!(self, Self::Acquired | Self::Renewing)
    }
}

impl fmt::Display for LockState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::Acquiring => "acquiring",
            Self::Acquired => "acquired",
            Self::Renewing => "renewing",
            Self::Released => "released",
            Self::Expired => "expired",
            Self::Disposed => "disposed",
        };
        f.write_str(s)
    }
}

/// Collaborators of a lock
#[derive(Clone)]
pub struct LockDeps {
    pub service: Arc<dyn LockService>,
    pub log: Logger,
}

#[derive(Debug)]
struct Shared {
    state: LockState,
    challenge: Option<String>,
    /// Request time of the last grant or renewal the service confirmed
    confirmed_at: Option<Instant>,
}

struct Renewal {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

/// Lease-backed mutual exclusion over one lock name
pub struct DistributedReleaseLock {
    deps: LockDeps,
    name: String,
    options: LockOptions,
    shared: Arc<Mutex<Shared>>,
    renewal: Option<Renewal>,
}

impl DistributedReleaseLock {
    pub fn new(deps: LockDeps, name: &str, options: LockOptions) -> Result<Self> {
        options.validate()?;
        let log = deps.log.child("lock");
        Ok(Self {
            deps: LockDeps { log, ..deps },
            name: name.to_string(),
            options,
            shared: Arc::new(Mutex::new(Shared {
                state: LockState::Idle,
                challenge: None,
                confirmed_at: None,
            })),
            renewal: None,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> LockState {
        self.shared.lock().state
    }

    /// Enter Acquiring from a state that permits it
    fn begin_acquire(&self) -> Result<()> {
        let mut shared = self.shared.lock();
        match shared.state {
            LockState::Disposed => Err(Error::LockUsage(format!(
                "lock '{}' used after dispose",
                self.name
            ))),
            LockState::Acquiring | LockState::Acquired | LockState::Renewing => {
                Err(Error::LockUsage(format!(
                    "lock '{}' is already {}",
                    self.name, shared.state
                )))
            }
            LockState::Idle | LockState::Released | LockState::Expired => {
                shared.state = LockState::Acquiring;
                Ok(())
            }
        }
    }

    fn reset_to_idle(&self) {
        let mut shared = self.shared.lock();
        if shared.state == LockState::Acquiring {
            shared.state = LockState::Idle;
        }
    }

    /// One bounded acquisition attempt
    async fn attempt(&self) -> Result<Option<String>> {
        match tokio::time::timeout(
            self.options.attempt_timeout,
            self.deps
                .service
                .acquire(&self.name, self.options.lease_duration),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(Error::TransientNetwork(format!(
                "acquire of '{}' timed out after {:?}",
                self.name, self.options.attempt_timeout
            ))),
        }
    }

    /// Single attempt; `Ok(false)` when the lock is held elsewhere
    pub async fn try_acquire(&mut self, cancel: &CancellationToken) -> Result<bool> {
        self.begin_acquire()?;
        let log = self.deps.log.clone();
        let sent = Instant::now();
        let result = log.instrument(self.attempt()).await;
        match result {
            Ok(Some(challenge)) => {
                self.on_acquired(challenge, sent, cancel);
                Ok(true)
            }
            Ok(None) => {
                self.reset_to_idle();
                Ok(false)
            }
            Err(e) => {
                self.reset_to_idle();
                Err(e)
            }
        }
    }

    /// Acquire, retrying busy and retryable failures with a fixed delay
    pub async fn acquire(&mut self, cancel: &CancellationToken) -> Result<()> {
        self.begin_acquire()?;
        let log = self.deps.log.clone();
        let mut attempt = 0u32;

        loop {
            if cancel.is_cancelled() {
                self.reset_to_idle();
                return Err(Error::Cancelled);
            }
            attempt += 1;

            let sent = Instant::now();
            let outcome = tokio::select! {
                _ = cancel.cancelled() => {
                    self.reset_to_idle();
                    return Err(Error::Cancelled);
                }
                result = log.instrument(self.attempt()) => result,
            };

            let reason = match outcome {
                Ok(Some(challenge)) => {
                    info!(
                        parent: log.span(),
                        "Acquired lock '{}' from {} service (attempt {})",
                        self.name,
                        self.deps.service.name(),
                        attempt
                    );
                    self.on_acquired(challenge, sent, cancel);
                    return Ok(());
                }
                Ok(None) => "held by another operator".to_string(),
                Err(e) if e.is_retryable() => e.to_string(),
                Err(e) => {
                    self.reset_to_idle();
                    return Err(e);
                }
            };

            if self.options.max_attempts.is_some_and(|max| attempt >= max) {
                self.reset_to_idle();
                return Err(Error::Conflict(format!(
                    "lock '{}' not acquired after {} attempts: {}",
                    self.name, attempt, reason
                )));
            }

            warn!(
                parent: log.span(),
                "Lock '{}' not acquired ({}), retrying in {:?}",
                self.name,
                reason,
                self.options.retry_delay
            );

            tokio::select! {
                _ = cancel.cancelled() => {
                    self.reset_to_idle();
                    return Err(Error::Cancelled);
                }
                _ = tokio::time::sleep(self.options.retry_delay) => {}
            }
        }
    }

    /// `sent` is when the grant was requested; the service's lease starts no earlier
    fn on_acquired(&mut self, challenge: String, sent: Instant, cancel: &CancellationToken) {
        if let Some(stale) = self.renewal.take() {
            stale.token.cancel();
        }
        {
            let mut shared = self.shared.lock();
            shared.state = LockState::Acquired;
            shared.challenge = Some(challenge.clone());
            shared.confirmed_at = Some(sent);
        }
        self.start_renewal(challenge, cancel.child_token());
    }

    fn start_renewal(&mut self, challenge: String, token: CancellationToken) {
        let service = Arc::clone(&self.deps.service);
        let shared = Arc::clone(&self.shared);
        let name = self.name.clone();
        let lease = self.options.lease_duration;
        let interval = self.options.renew_interval;
        let loop_token = token.clone();

        shared.lock().state = LockState::Renewing;
        let handle = tokio::spawn(self.deps.log.instrument(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
            loop {
                tokio::select! {
                    _ = loop_token.cancelled() => break,
                    _ = ticker.tick() => {}
                }

                let sent = Instant::now();
                match service.renew(&name, &challenge, lease).await {
                    Ok(()) => {
                        debug!("Renewed lease on '{}'", name);
                        shared.lock().confirmed_at = Some(sent);
                    }
                    Err(Error::NotFound(_)) => {
                        warn!("Lease on '{}' no longer exists, stopping renewal", name);
                        let mut shared = shared.lock();
                        if shared.state.is_held() {
                            shared.state = LockState::Expired;
                        }
                        break;
                    }
                    Err(e) => warn!("Failed to renew lease on '{}': {}", name, e),
                }
            }
        }));
        self.renewal = Some(Renewal { token, handle });
    }

    async fn stop_renewal(&mut self) {
        if let Some(renewal) = self.renewal.take() {
            renewal.token.cancel();
            if let Err(e) = renewal.handle.await
                && e.is_panic()
            {
                warn!(
                    parent: self.deps.log.span(),
                    "Lease renewal task for '{}' panicked",
                    self.name
                );
            }
        }
    }

    /// Fail unless the lease is still ours
    ///
    /// Mutations call this right before publishing their result.
    pub fn ensure_held(&self) -> Result<()> {
        let shared = self.shared.lock();
        match shared.state {
            LockState::Disposed => Err(Error::LockUsage(format!(
                "lock '{}' used after dispose",
                self.name
            ))),
            LockState::Expired => Err(Error::LeaseLost(format!(
                "lease on '{}' expired",
                self.name
            ))),
            state if !state.is_held() => Err(Error::LockUsage(format!(
                "lock '{}' is not held ({state})",
                self.name
            ))),
            _ => match shared.confirmed_at {
                Some(at) if at.elapsed() < self.options.lease_duration => Ok(()),
                _ => Err(Error::LeaseLost(format!(
                    "lease on '{}' was not renewed within {:?}",
                    self.name, self.options.lease_duration
                ))),
            },
        }
    }

    /// Give the lease back; a no-op unless held
    pub async fn release(&mut self) -> Result<()> {
        let state = self.state();
        if state == LockState::Disposed {
            return Err(Error::LockUsage(format!(
                "lock '{}' used after dispose",
                self.name
            )));
        }
        self.stop_renewal().await;

        let challenge = {
            let mut shared = self.shared.lock();
            let held = shared.state.is_held();
            if held || shared.state == LockState::Expired {
                shared.state = LockState::Released;
            }
            let challenge = shared.challenge.take();
            shared.confirmed_at = None;
            if held { challenge } else { None }
        };

        let Some(challenge) = challenge else {
            return Ok(());
        };
        let log = self.deps.log.clone();
        match self.deps.service.release(&self.name, &challenge).await {
            Ok(()) => {
                info!(parent: log.span(), "Released lock '{}'", self.name);
                Ok(())
            }
            Err(Error::NotFound(_)) => {
                warn!(parent: log.span(), "Lease on '{}' already gone at release", self.name);
                Ok(())
            }
            Err(e) => {
                warn!(
                    parent: log.span(),
                    "Failed to release '{}' ({}); the lease will expire",
                    self.name,
                    e
                );
                Err(e)
            }
        }
    }

    /// Release if held and retire the lock; later use is a usage error
    pub async fn dispose(&mut self) -> Result<()> {
        if self.state() == LockState::Disposed {
            return Err(Error::LockUsage(format!(
                "lock '{}' disposed twice",
                self.name
            )));
        }
        let result = self.release().await;
        self.shared.lock().state = LockState::Disposed;
        result
    }
}

impl Drop for DistributedReleaseLock {
    fn drop(&mut self) {
        if let Some(renewal) = self.renewal.take() {
            renewal.token.cancel();
        }

        // Best effort for callers that never disposed; otherwise the lease expires
        let challenge = {
            let mut shared = self.shared.lock();
            if !shared.state.is_held() {
                return;
            }
            shared.state = LockState::Released;
            shared.challenge.take()
        };
        if let (Some(challenge), Ok(runtime)) =
            (challenge, tokio::runtime::Handle::try_current())
        {
            let service = Arc::clone(&self.deps.service);
            let name = self.name.clone();
            runtime.spawn(async move {
                let _ = service.release(&name, &challenge).await;
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast_options() -> LockOptions {
        LockOptions {
            lease_duration: Duration::from_millis(300),
            renew_interval: Duration::from_millis(50),
            retry_delay: Duration::from_millis(10),
            max_attempts: Some(3),
            attempt_timeout: Duration::from_secs(1),
        }
    }

    fn new_lock(service: &Arc<MemoryLockService>) -> DistributedReleaseLock {
        DistributedReleaseLock::new(
            LockDeps {
                service: service.clone(),
                log: Logger::disabled(),
            },
            "demoapp_relpack",
            fast_options(),
        )
        .unwrap()
    }

    #[test]
    fn test_options_validation() {
        assert!(LockOptions::default().validate().is_ok());
        let options = LockOptions {
            renew_interval: Duration::from_secs(30),
            ..LockOptions::default()
        };
        assert!(matches!(options.validate(), Err(Error::Config(_))));
        let options = LockOptions {
            max_attempts: Some(0),
            ..LockOptions::default()
        };
        assert!(matches!(options.validate(), Err(Error::Config(_))));
    }

    #[tokio::test]
    async fn test_acquire_release_cycle() {
        let service = Arc::new(MemoryLockService::new());
        let mut lock = new_lock(&service);
        let cancel = CancellationToken::new();

        assert_eq!(lock.state(), LockState::Idle);
        lock.acquire(&cancel).await.unwrap();
        assert_eq!(lock.state(), LockState::Renewing);
        assert!(lock.ensure_held().is_ok());
        assert!(service.is_held("demoapp_relpack"));

        lock.release().await.unwrap();
        assert_eq!(lock.state(), LockState::Released);
        assert!(!service.is_held("demoapp_relpack"));
    }

    #[tokio::test]
    async fn test_renewal_outlives_lease() {
        let service = Arc::new(MemoryLockService::new());
        let mut lock = new_lock(&service);
        lock.acquire(&CancellationToken::new()).await.unwrap();

        tokio::time::sleep(Duration::from_millis(700)).await;
        assert!(lock.ensure_held().is_ok());

        let mut rival = new_lock(&service);
        assert!(!rival.try_acquire(&CancellationToken::new()).await.unwrap());
        lock.dispose().await.unwrap();
    }

    #[tokio::test]
    async fn test_busy_lock_exhausts_attempts() {
        let service = Arc::new(MemoryLockService::new());
        let mut holder = new_lock(&service);
        holder.acquire(&CancellationToken::new()).await.unwrap();

        let mut rival = new_lock(&service);
        let err = rival.acquire(&CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, Error::Conflict(_)));
        assert_eq!(rival.state(), LockState::Idle);
        holder.dispose().await.unwrap();
    }

    #[tokio::test]
    async fn test_lost_lease_is_detected() {
        let service = Arc::new(MemoryLockService::new());
        let mut lock = new_lock(&service);
        lock.acquire(&CancellationToken::new()).await.unwrap();

        service.force_expire("demoapp_relpack");
        tokio::time::sleep(Duration::from_millis(150)).await;

        assert_eq!(lock.state(), LockState::Expired);
        assert!(matches!(lock.ensure_held(), Err(Error::LeaseLost(_))));
        lock.dispose().await.unwrap();
    }

    #[tokio::test]
    async fn test_usage_errors() {
        let service = Arc::new(MemoryLockService::new());
        let mut lock = new_lock(&service);
        let cancel = CancellationToken::new();

        lock.acquire(&cancel).await.unwrap();
        assert!(matches!(lock.try_acquire(&cancel).await, Err(Error::LockUsage(_))));

        lock.dispose().await.unwrap();
        assert!(matches!(lock.acquire(&cancel).await, Err(Error::LockUsage(_))));
        assert!(matches!(lock.ensure_held(), Err(Error::LockUsage(_))));
        assert!(matches!(lock.dispose().await, Err(Error::LockUsage(_))));
    }

    #[tokio::test]
    async fn test_dispose_without_acquire_is_noop() {
        let service = Arc::new(MemoryLockService::new());
        let mut lock = new_lock(&service);
        lock.dispose().await.unwrap();
        assert_eq!(lock.state(), LockState::Disposed);
    }

    #[tokio::test]
    async fn test_cancel_stops_renewal_and_dispose_releases() {
        let service = Arc::new(MemoryLockService::new());
        let mut lock = new_lock(&service);
        let cancel = CancellationToken::new();
        lock.acquire(&cancel).await.unwrap();

        cancel.cancel();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(service.is_held("demoapp_relpack"));

        lock.dispose().await.unwrap();
        assert!(!service.is_held("demoapp_relpack"));
    }

    /// Grants at once but answers late; renewals never get through
    struct SlowReplyService {
        inner: Arc<MemoryLockService>,
        reply_delay: Duration,
    }

    #[async_trait]
    impl LockService for SlowReplyService {
        fn name(&self) -> &str {
            "slow"
        }

        async fn acquire(&self, name: &str, lease: Duration) -> Result<Option<String>> {
            let granted = self.inner.acquire(name, lease).await;
            tokio::time::sleep(self.reply_delay).await;
            granted
        }

        async fn renew(&self, name: &str, _challenge: &str, _lease: Duration) -> Result<()> {
            Err(Error::TransientNetwork(format!("renew '{name}': connection reset")))
        }

        async fn release(&self, name: &str, challenge: &str) -> Result<()> {
            self.inner.release(name, challenge).await
        }
    }

    #[tokio::test]
    async fn test_lease_window_starts_at_request() {
        let inner = Arc::new(MemoryLockService::new());
        let mut lock = DistributedReleaseLock::new(
            LockDeps {
                service: Arc::new(SlowReplyService {
                    inner: inner.clone(),
                    reply_delay: Duration::from_millis(250),
                }),
                log: Logger::disabled(),
            },
            "demoapp_relpack",
            LockOptions {
                lease_duration: Duration::from_millis(400),
                renew_interval: Duration::from_millis(100),
                ..fast_options()
            },
        )
        .unwrap();
        lock.acquire(&CancellationToken::new()).await.unwrap();

        // About 500ms after the grant the service lease is gone
        tokio::time::sleep(Duration::from_millis(250)).await;
        let mut rival = new_lock(&inner);
        assert!(rival.try_acquire(&CancellationToken::new()).await.unwrap());
        assert!(matches!(lock.ensure_held(), Err(Error::LeaseLost(_))));

        rival.dispose().await.unwrap();
        lock.dispose().await.unwrap();
    }

    #[tokio::test]
    async fn test_cancelled_acquire() {
        let service = Arc::new(MemoryLockService::new());
        let mut holder = new_lock(&service);
        holder.acquire(&CancellationToken::new()).await.unwrap();

        let cancel = CancellationToken::new();
        cancel.cancel();
        let mut rival = new_lock(&service);
        assert!(matches!(rival.acquire(&cancel).await, Err(Error::Cancelled)));
        holder.dispose().await.unwrap();
    }
}
