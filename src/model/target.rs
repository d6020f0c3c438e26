// src/model/target.rs

//! Release targets: operating system, runtime identifier and framework

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Runtime identifiers a release may target
pub const SUPPORTED_RIDS: &[&str] = &[
    "win-x86",
    "win-x64",
    "win-arm64",
    "linux-x64",
    "linux-arm",
    "linux-arm64",
];

/// Operating system family of a target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OsPlatform {
    Windows,
    Linux,
}

impl OsPlatform {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Windows => "windows",
            Self::Linux => "linux",
        }
    }

    /// Prefix every runtime identifier of this OS starts with
    pub const fn rid_prefix(&self) -> &'static str {
        match self {
            Self::Windows => "win-",
            Self::Linux => "linux-",
        }
    }
}

impl fmt::Display for OsPlatform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OsPlatform {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "windows" | "win" => Ok(Self::Windows),
            "linux" => Ok(Self::Linux),
            other => Err(Error::Platform(format!("unknown operating system '{other}'"))),
        }
    }
}

/// OS + runtime identifier + framework of a release
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Target {
    pub os: OsPlatform,
    pub rid: String,
    pub framework: String,
}

impl Target {
    /// Create a validated target
    pub fn new(os: OsPlatform, rid: &str, framework: &str) -> Result<Self> {
        let target = Self {
            os,
            rid: rid.to_lowercase(),
            framework: framework.to_string(),
        };
        target.validate()?;
        Ok(target)
    }

    /// Reject runtime identifiers that are unknown or belong to another OS
    pub fn validate(&self) -> Result<()> {
        if !SUPPORTED_RIDS.contains(&self.rid.as_str()) {
            return Err(Error::Platform(format!(
                "unsupported runtime identifier '{}'",
                self.rid
            )));
        }
        if !self.rid.starts_with(self.os.rid_prefix()) {
            return Err(Error::Platform(format!(
                "runtime identifier '{}' does not belong to {}",
                self.rid, self.os
            )));
        }
        if self.framework.trim().is_empty() {
            return Err(Error::Validation("target framework is empty".to_string()));
        }
        Ok(())
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{} ({})", self.os, self.rid, self.framework)
    }
}
