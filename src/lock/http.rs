// src/lock/http.rs

//! HTTP lease service client
//!
//! Protocol:
//!
//! ```text
//! POST   {base}/locks/{name}?duration_ms={ms}        -> 200 {"challenge": "..."} | 409 busy
//! PUT    {base}/locks/{name}/renew?duration_ms={ms}  body {"challenge": "..."} -> 204 | 404
//! DELETE {base}/locks/{name}                         body {"challenge": "..."} -> 204 | 404
//! ```

use super::LockService;
use crate::error::{Error, Result};
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

/// Request timeout for a single lock call
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Body of acquire responses and renew/release requests
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaseChallenge {
    pub challenge: String,
}

/// Lock service reached over HTTP(S)
pub struct HttpLockService {
    client: reqwest::Client,
    base_url: String,
}

impl HttpLockService {
    pub fn new(base_url: &str) -> Result<Self> {
        if !base_url.starts_with("http://") && !base_url.starts_with("https://") {
            return Err(Error::Config(format!(
                "lock service URL must be http(s): {base_url}"
            )));
        }
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| Error::Config(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn lock_url(&self, name: &str) -> String {
        format!("{}/locks/{}", self.base_url, name)
    }
}

/// Map a non-success status onto the error taxonomy
fn status_error(status: StatusCode, what: &str) -> Error {
    match status {
        StatusCode::NOT_FOUND => Error::NotFound(format!("{what}: lease does not exist")),
        StatusCode::CONFLICT => Error::Conflict(format!("{what}: lease held elsewhere")),
        StatusCode::TOO_MANY_REQUESTS
        | StatusCode::REQUEST_TIMEOUT
        | StatusCode::BAD_GATEWAY
        | StatusCode::SERVICE_UNAVAILABLE
        | StatusCode::GATEWAY_TIMEOUT => {
            Error::TransientNetwork(format!("{what}: lock service returned {status}"))
        }
        s if s.is_server_error() => {
            Error::TransientNetwork(format!("{what}: lock service returned {status}"))
        }
        _ => Error::Validation(format!("{what}: lock service rejected the request ({status})")),
    }
}

/// Lease length as sent on the wire
fn lease_millis(lease: Duration) -> u64 {
    u64::try_from(lease.as_millis()).unwrap_or(u64::MAX)
}

fn send_error(e: reqwest::Error, what: &str) -> Error {
    Error::TransientNetwork(format!("{what}: {e}"))
}

#[async_trait]
impl LockService for HttpLockService {
    fn name(&self) -> &str {
        "http"
    }

    async fn acquire(&self, name: &str, lease: Duration) -> Result<Option<String>> {
        let what = format!("acquire '{name}'");
        debug!("POST {}", self.lock_url(name));
        let response = self
            .client
            .post(self.lock_url(name))
            .query(&[("duration_ms", lease_millis(lease))])
            .send()
            .await
            .map_err(|e| send_error(e, &what))?;

        match response.status() {
            StatusCode::CONFLICT => Ok(None),
            status if status.is_success() => {
                let body: LeaseChallenge = response
                    .json()
                    .await
                    .map_err(|e| Error::Validation(format!("{what}: malformed response: {e}")))?;
                Ok(Some(body.challenge))
            }
            status => Err(status_error(status, &what)),
        }
    }

    async fn renew(&self, name: &str, challenge: &str, lease: Duration) -> Result<()> {
        let what = format!("renew '{name}'");
        let response = self
            .client
            .put(format!("{}/renew", self.lock_url(name)))
            .query(&[("duration_ms", lease_millis(lease))])
            .json(&LeaseChallenge {
                challenge: challenge.to_string(),
            })
            .send()
            .await
            .map_err(|e| send_error(e, &what))?;

        match response.status() {
            status if status.is_success() => Ok(()),
            status => Err(status_error(status, &what)),
        }
    }

    async fn release(&self, name: &str, challenge: &str) -> Result<()> {
        let what = format!("release '{name}'");
        let response = self
            .client
            .delete(self.lock_url(name))
            .json(&LeaseChallenge {
                challenge: challenge.to_string(),
            })
            .send()
            .await
            .map_err(|e| send_error(e, &what))?;

        match response.status() {
            status if status.is_success() => Ok(()),
            status => Err(status_error(status, &what)),
        }
    }
}
