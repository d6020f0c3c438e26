// src/time.rs

//! Trusted time for catalog writes
//!
//! `LastWriteAccessUtc` must not depend on an operator's clock being right,
//! so when configured the engine reads the `Date` header of an HTTPS
//! endpoint instead.

use crate::error::{Error, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::time::Duration;
use tracing::debug;

/// Source of the current UTC time
#[async_trait]
pub trait TimeSource: Send + Sync {
    async fn now(&self) -> Result<DateTime<Utc>>;
}

/// The local system clock
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemTimeSource;

#[async_trait]
impl TimeSource for SystemTimeSource {
    async fn now(&self) -> Result<DateTime<Utc>> {
        Ok(Utc::now())
    }
}

/// Time taken from the `Date` header of a HEAD request
pub struct HttpDateTimeSource {
    client: reqwest::Client,
    url: String,
}

impl HttpDateTimeSource {
    pub fn new(url: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| Error::Config(format!("Failed to create HTTP client: {e}")))?;
        Ok(Self {
            client,
            url: url.to_string(),
        })
    }
}

/// Parse an HTTP `Date` header (RFC 2822 / IMF-fixdate)
pub fn parse_http_date(value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc2822(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| Error::Validation(format!("invalid Date header '{value}': {e}")))
}

#[async_trait]
impl TimeSource for HttpDateTimeSource {
    async fn now(&self) -> Result<DateTime<Utc>> {
        let response = self
            .client
            .head(&self.url)
            .send()
            .await
            .map_err(|e| Error::TransientNetwork(format!("time source {}: {e}", self.url)))?;

        let header = response
            .headers()
            .get(reqwest::header::DATE)
            .ok_or_else(|| Error::NotFound(format!("Date header from {}", self.url)))?
            .to_str()
            .map_err(|e| Error::Validation(format!("unreadable Date header: {e}")))?;

        let now = parse_http_date(header)?;
        debug!("Trusted time from {}: {}", self.url, now);
        Ok(now)
    }
}
