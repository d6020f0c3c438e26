// src/lock/memory.rs

//! In-process lease service
//!
//! Used when no lock service URL is configured (a single operator) and by
//! tests. Leases expire on their own exactly like the remote service's.

use super::LockService;
use crate::error::{Error, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;
use uuid::Uuid;

#[derive(Debug, Clone)]
struct Lease {
    challenge: String,
    expires_at: Instant,
}

impl Lease {
    fn is_live(&self) -> bool {
        Instant::now() < self.expires_at
    }
}

/// Lease table guarded by a mutex
#[derive(Debug, Default)]
pub struct MemoryLockService {
    leases: Mutex<HashMap<String, Lease>>,
}

impl MemoryLockService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a live lease exists for `name`
    pub fn is_held(&self, name: &str) -> bool {
        self.leases.lock().get(name).is_some_and(Lease::is_live)
    }

    /// Drop a lease as if it had timed out
    pub fn force_expire(&self, name: &str) {
        self.leases.lock().remove(name);
    }

    /// Grant or refuse a lease for `name`
    pub fn try_grant(&self, name: &str, lease: Duration) -> Option<String> {
        let mut leases = self.leases.lock();
        if leases.get(name).is_some_and(Lease::is_live) {
            return None;
        }
        let challenge = Uuid::new_v4().to_string();
        leases.insert(
            name.to_string(),
            Lease {
                challenge: challenge.clone(),
                expires_at: Instant::now() + lease,
            },
        );
        Some(challenge)
    }

    /// Extend the live lease matching `challenge`
    pub fn extend(&self, name: &str, challenge: &str, lease: Duration) -> Result<()> {
        let mut leases = self.leases.lock();
        match leases.get_mut(name) {
            Some(current) if current.challenge == challenge && current.is_live() => {
                current.expires_at = Instant::now() + lease;
                Ok(())
            }
            _ => Err(Error::NotFound(format!("lease on '{name}'"))),
        }
    }

    /// Remove the live lease matching `challenge`
    pub fn revoke(&self, name: &str, challenge: &str) -> Result<()> {
        let mut leases = self.leases.lock();
        match leases.get(name) {
            Some(current) if current.challenge == challenge && current.is_live() => {
                leases.remove(name);
                Ok(())
            }
            _ => Err(Error::NotFound(format!("lease on '{name}'"))),
        }
    }
}

#[async_trait]
impl LockService for MemoryLockService {
    fn name(&self) -> &str {
        "memory"
    }

    async fn acquire(&self, name: &str, lease: Duration) -> Result<Option<String>> {
        Ok(self.try_grant(name, lease))
    }

    async fn renew(&self, name: &str, challenge: &str, lease: Duration) -> Result<()> {
        self.extend(name, challenge, lease)
    }

    async fn release(&self, name: &str, challenge: &str) -> Result<()> {
        self.revoke(name, challenge)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_grant_is_exclusive() {
        let service = MemoryLockService::new();
        let lease = Duration::from_secs(60);
        let challenge = service.try_grant("app", lease).unwrap();
        assert!(service.try_grant("app", lease).is_none());
        assert!(service.try_grant("other", lease).is_some());

        assert!(matches!(service.revoke("app", "wrong"), Err(Error::NotFound(_))));
        service.revoke("app", &challenge).unwrap();
        assert!(service.try_grant("app", lease).is_some());
    }

    #[test]
    fn test_expired_lease_can_be_taken_over() {
        let service = MemoryLockService::new();
        let first = service.try_grant("app", Duration::ZERO).unwrap();
        let second = service.try_grant("app", Duration::from_secs(60)).unwrap();
        assert_ne!(first, second);
        assert!(matches!(
            service.extend("app", &first, Duration::from_secs(60)),
            Err(Error::NotFound(_))
        ));
        service.extend("app", &second, Duration::from_secs(60)).unwrap();
    }
}
