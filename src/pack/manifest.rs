// src/pack/manifest.rs

//! Manifests embedded in every release package
//!
//! - `.relpack/manifest.json`: app id, version, target, kind, channels,
//!   changeset and release notes
//! - `.relpack/checksums.json`: target path -> full hash/length, plus the
//!   delta hash/length of patched files

use crate::error::{Error, Result};
use crate::model::{ChangeEntry, FileEntry, ReleaseKind, Target};
use semver::Version;
use serde::{Deserialize, Serialize};

/// Archive entry holding the package manifest
pub const MANIFEST_PATH: &str = ".relpack/manifest.json";

/// Archive entry holding the checksum manifest
pub const CHECKSUMS_PATH: &str = ".relpack/checksums.json";

/// Current manifest schema version
pub const MANIFEST_FORMAT_VERSION: u32 = 1;

/// Identity and changeset of a package
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageManifest {
    pub format_version: u32,
    pub id: String,
    pub version: Version,
    pub target: Target,
    pub kind: ReleaseKind,
    pub channels: Vec<String>,
    #[serde(default)]
    pub changes: Vec<ChangeEntry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub release_notes: Option<String>,
}

impl PackageManifest {
    pub fn to_json(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec_pretty(self)?)
    }

    /// Parse and reject unknown schema versions
    pub fn from_json(data: &[u8]) -> Result<Self> {
        let manifest: Self = serde_json::from_slice(data)
            .map_err(|e| Error::Validation(format!("malformed package manifest: {e}")))?;
        if manifest.format_version != MANIFEST_FORMAT_VERSION {
            return Err(Error::Validation(format!(
                "package manifest format {} is not supported (expected {})",
                manifest.format_version, MANIFEST_FORMAT_VERSION
            )));
        }
        manifest.target.validate()?;
        Ok(manifest)
    }
}

/// Per-file checksums of a package
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChecksumManifest {
    pub files: Vec<FileEntry>,
}

impl ChecksumManifest {
    pub fn new(files: Vec<FileEntry>) -> Self {
        Self { files }
    }

    pub fn to_json(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec_pretty(self)?)
    }

    pub fn from_json(data: &[u8]) -> Result<Self> {
        let manifest: Self = serde_json::from_slice(data)
            .map_err(|e| Error::Validation(format!("malformed checksum manifest: {e}")))?;
        if manifest
            .files
            .windows(2)
            .any(|w| w[0].target_path >= w[1].target_path)
        {
            return Err(Error::Validation(
                "checksum manifest is not sorted by target path".to_string(),
            ));
        }
        Ok(manifest)
    }

    pub fn get(&self, target_path: &str) -> Option<&FileEntry> {
        self.files
            .binary_search_by(|f| f.target_path.as_str().cmp(target_path))
            .ok()
            .map(|i| &self.files[i])
    }
}
