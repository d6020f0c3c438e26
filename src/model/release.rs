// src/model/release.rs

//! Release records and their file bookkeeping
//!
//! A release's changeset is stored as one list of tagged entries rather than
//! four parallel path lists, so a path can never sit in two buckets. The
//! New/Modified/Unmodified/Deleted views are derived on demand.

use super::target::Target;
use crate::error::{Error, Result};
use crate::hash::Checksum;
use chrono::{DateTime, Utc};
use semver::Version;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Per-file fingerprint recorded in a release
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileEntry {
    /// Archive-relative path (`app/...` or `assets/...`)
    pub target_path: String,
    pub full_hash: String,
    pub full_length: u64,
    /// Present only when the file was diffed rather than stored raw
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delta_hash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delta_length: Option<u64>,
}

impl FileEntry {
    pub fn new(target_path: &str, full: &Checksum) -> Self {
        Self {
            target_path: target_path.to_string(),
            full_hash: full.hash.clone(),
            full_length: full.length,
            delta_hash: None,
            delta_length: None,
        }
    }

    pub fn with_delta(mut self, delta: &Checksum) -> Self {
        self.delta_hash = Some(delta.hash.clone());
        self.delta_length = Some(delta.length);
        self
    }

    pub fn full_checksum(&self) -> Checksum {
        Checksum {
            hash: self.full_hash.clone(),
            length: self.full_length,
        }
    }

    pub fn delta_checksum(&self) -> Option<Checksum> {
        match (&self.delta_hash, self.delta_length) {
            (Some(hash), Some(length)) => Some(Checksum {
                hash: hash.clone(),
                length,
            }),
            _ => None,
        }
    }
}

/// Changeset bucket of one path
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    New,
    Modified,
    Unmodified,
    Deleted,
}

impl ChangeKind {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::New => "new",
            Self::Modified => "modified",
            Self::Unmodified => "unmodified",
            Self::Deleted => "deleted",
        }
    }
}

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One tagged changeset entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeEntry {
    pub target_path: String,
    pub kind: ChangeKind,
}

/// Whether a release is the genesis baseline, a later full or a delta
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReleaseKind {
    Genesis,
    Full,
    Delta,
}

impl ReleaseKind {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Genesis => "genesis",
            Self::Full => "full",
            Self::Delta => "delta",
        }
    }
}

impl fmt::Display for ReleaseKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity of a release inside the catalog
///
/// Genesis and later full releases share the "full" kind: two releases are
/// equivalent when app, rid, version and full/delta kind match.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ReleaseKey {
    pub id: String,
    pub rid: String,
    pub version: Version,
    pub full: bool,
}

impl fmt::Display for ReleaseKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {} ({})",
            self.id,
            self.rid,
            self.version,
            if self.full { "full" } else { "delta" }
        )
    }
}

/// One published package of one application version
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapRelease {
    pub id: String,
    pub version: Version,
    pub target: Target,
    pub kind: ReleaseKind,
    /// Complete file set of this version, sorted by target path
    pub files: Vec<FileEntry>,
    /// Changeset relative to the previous version; empty for genesis
    #[serde(default)]
    pub changes: Vec<ChangeEntry>,
    /// Channels this release has been promoted into, in promotion order
    pub channels: Vec<String>,
    /// Package filename on the feed
    pub filename: String,
    /// Package-level fingerprint
    pub package: Checksum,
    pub created_utc: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub release_notes: Option<String>,
}

impl SnapRelease {
    pub fn is_genesis(&self) -> bool {
        self.kind == ReleaseKind::Genesis
    }

    /// Genesis releases are full releases too
    pub fn is_full(&self) -> bool {
        matches!(self.kind, ReleaseKind::Genesis | ReleaseKind::Full)
    }

    pub fn is_delta(&self) -> bool {
        self.kind == ReleaseKind::Delta
    }

    pub fn key(&self) -> ReleaseKey {
        ReleaseKey {
            id: self.id.clone(),
            rid: self.target.rid.clone(),
            version: self.version.clone(),
            full: self.is_full(),
        }
    }

    pub fn has_channel(&self, channel: &str) -> bool {
        self.channels.iter().any(|c| c == channel)
    }

    pub fn file(&self, target_path: &str) -> Option<&FileEntry> {
        self.files
            .binary_search_by(|f| f.target_path.as_str().cmp(target_path))
            .ok()
            .map(|i| &self.files[i])
    }

    fn bucket(&self, kind: ChangeKind) -> Vec<&str> {
        self.changes
            .iter()
            .filter(|c| c.kind == kind)
            .map(|c| c.target_path.as_str())
            .collect()
    }

    pub fn new_files(&self) -> Vec<&str> {
        self.bucket(ChangeKind::New)
    }

    pub fn modified_files(&self) -> Vec<&str> {
        self.bucket(ChangeKind::Modified)
    }

    pub fn unmodified_files(&self) -> Vec<&str> {
        self.bucket(ChangeKind::Unmodified)
    }

    pub fn deleted_files(&self) -> Vec<&str> {
        self.bucket(ChangeKind::Deleted)
    }

    /// Total full size of the installed file set
    pub fn installed_size(&self) -> u64 {
        self.files.iter().map(|f| f.full_length).sum()
    }

    /// Check the structural invariants of a single record
    ///
    /// Cross-release invariants (Deleted + Modified + Unmodified equal the
    /// previous file set) are checked where the previous release is known.
    pub fn validate(&self) -> Result<()> {
        let subject = format!("{} {} {}", self.id, self.target.rid, self.version);

        if self.files.windows(2).any(|w| w[0].target_path >= w[1].target_path) {
            return Err(Error::Validation(format!(
                "{subject}: files are not sorted and unique"
            )));
        }

        if self.is_genesis() {
            if !self.changes.is_empty() {
                return Err(Error::Validation(format!(
                    "{subject}: genesis release carries a changeset"
                )));
            }
            if self.files.is_empty() {
                return Err(Error::Validation(format!(
                    "{subject}: genesis release has no files"
                )));
            }
            return Ok(());
        }

        let mut seen = BTreeSet::new();
        for change in &self.changes {
            if !seen.insert(change.target_path.as_str()) {
                return Err(Error::Validation(format!(
                    "{subject}: '{}' appears in more than one bucket",
                    change.target_path
                )));
            }
        }

        let current: BTreeSet<&str> = self.files.iter().map(|f| f.target_path.as_str()).collect();
        let surviving: BTreeSet<&str> = self
            .changes
            .iter()
            .filter(|c| c.kind != ChangeKind::Deleted)
            .map(|c| c.target_path.as_str())
            .collect();
        if !self.changes.is_empty() && surviving != current {
            return Err(Error::Validation(format!(
                "{subject}: new + modified + unmodified do not match the file set"
            )));
        }

        if self.is_delta() && self.changes.is_empty() && !self.files.is_empty() {
            return Err(Error::Validation(format!(
                "{subject}: delta release without a changeset"
            )));
        }
        Ok(())
    }
}

impl fmt::Display for SnapRelease {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {} [{}]",
            self.id, self.target.rid, self.version, self.kind
        )
    }
}
