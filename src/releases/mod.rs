// src/releases/mod.rs

//! Release catalog
//!
//! [`SnapAppsReleases`] is the versioned record of every release of one
//! application across runtime identifiers, versions and channels. All
//! mutation goes through `add_release`, `promote` and `demote`, each of which
//! bumps the catalog version exactly once on success; queries never mutate.
//!
//! The catalog travels as its own small archive (`catalog.json` inside a
//! deterministic zip) and is always downloaded fresh under the release lock
//! before a mutation.

pub mod promotion;

pub use promotion::{DemoteFilter, PromotionMode, PromotionPlan, plan_demotion, plan_promotion};

use crate::error::{Error, Result};
use crate::model::{ReleaseKey, SnapRelease};
use crate::pack::{ArchiveReader, ArchiveWriter};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use uuid::Uuid;

/// Current catalog schema version
pub const CATALOG_FORMAT_VERSION: u32 = 1;

/// Archive entry holding the serialized catalog
pub const CATALOG_ENTRY: &str = "catalog.json";

/// Filter for catalog reads
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReleaseQuery {
    pub app_id: String,
    pub rid: Option<String>,
    pub channel: Option<String>,
}

impl ReleaseQuery {
    pub fn for_app(app_id: &str) -> Self {
        Self {
            app_id: app_id.to_lowercase(),
            ..Self::default()
        }
    }

    pub fn rid(mut self, rid: &str) -> Self {
        self.rid = Some(rid.to_lowercase());
        self
    }

    pub fn channel(mut self, channel: &str) -> Self {
        self.channel = Some(channel.to_string());
        self
    }

    fn matches(&self, release: &SnapRelease) -> bool {
        release.id == self.app_id
            && self.rid.as_ref().is_none_or(|rid| &release.target.rid == rid)
            && self
                .channel
                .as_ref()
                .is_none_or(|channel| release.has_channel(channel))
    }
}

/// The release catalog of one application
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapAppsReleases {
    format_version: u32,
    version: u64,
    pack_id: Uuid,
    #[serde(default)]
    last_write_access_utc: Option<DateTime<Utc>>,
    releases: Vec<SnapRelease>,
}

impl SnapAppsReleases {
    /// Empty catalog at version 0
    pub fn new() -> Self {
        Self {
            format_version: CATALOG_FORMAT_VERSION,
            version: 0,
            pack_id: Uuid::nil(),
            last_write_access_utc: None,
            releases: Vec::new(),
        }
    }

    /// Number of successful mutations applied since creation
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Identifier of the pack run that last wrote the catalog
    pub fn pack_id(&self) -> Uuid {
        self.pack_id
    }

    pub fn last_write_access_utc(&self) -> Option<DateTime<Utc>> {
        self.last_write_access_utc
    }

    /// All records, ordered by app, rid, version, full before delta
    pub fn all(&self) -> &[SnapRelease] {
        &self.releases
    }

    pub fn len(&self) -> usize {
        self.releases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.releases.is_empty()
    }

    /// Releases matching `query`, in ascending version order
    pub fn releases(&self, query: &ReleaseQuery) -> Vec<&SnapRelease> {
        self.releases.iter().filter(|r| query.matches(r)).collect()
    }

    /// Highest version matching `query` (the full record when both exist)
    pub fn most_recent_release(&self, query: &ReleaseQuery) -> Option<&SnapRelease> {
        self.releases(query)
            .into_iter()
            .max_by(|a, b| a.version.cmp(&b.version).then(a.is_full().cmp(&b.is_full())))
    }

    /// Most recent full (or genesis) release matching `query`
    pub fn most_recent_full(&self, query: &ReleaseQuery) -> Option<&SnapRelease> {
        self.releases(query)
            .into_iter()
            .filter(|r| r.is_full())
            .max_by(|a, b| a.version.cmp(&b.version))
    }

    /// Genesis release matching `query`, when it is still in the catalog
    pub fn genesis_release(&self, query: &ReleaseQuery) -> Option<&SnapRelease> {
        self.releases(query).into_iter().find(|r| r.is_genesis())
    }

    pub fn find(&self, key: &ReleaseKey) -> Option<&SnapRelease> {
        self.releases.iter().find(|r| &r.key() == key)
    }

    /// Append a version: its full release and, unless genesis or rebase, its delta
    pub fn add_release(
        &mut self,
        full: SnapRelease,
        delta: Option<SnapRelease>,
        now: DateTime<Utc>,
    ) -> Result<()> {
        full.validate()?;
        if !full.is_full() {
            return Err(Error::Validation(format!("{full} is not a full release")));
        }

        if self.find(&full.key()).is_some() {
            return Err(Error::Conflict(format!("{} is already in the catalog", full.key())));
        }

        let query = ReleaseQuery::for_app(&full.id).rid(&full.target.rid);
        let existing = self.releases(&query);
        if full.is_genesis() && !existing.is_empty() {
            return Err(Error::Validation(format!(
                "{full} cannot be genesis: {} already has releases",
                full.target.rid
            )));
        }
        if !full.is_genesis() && existing.is_empty() {
            return Err(Error::Validation(format!(
                "{full} has no baseline in the catalog"
            )));
        }
        if let Some(latest) = existing.iter().map(|r| &r.version).max()
            && full.version <= *latest
        {
            return Err(Error::Validation(format!(
                "{full} is not newer than {latest}"
            )));
        }

        if let Some(delta) = &delta {
            delta.validate()?;
            if !delta.is_delta()
                || delta.id != full.id
                || delta.target.rid != full.target.rid
                || delta.version != full.version
            {
                return Err(Error::Validation(format!(
                    "{delta} does not pair with {full}"
                )));
            }
        }

        let mut incoming = vec![full];
        incoming.extend(delta);
        self.releases.extend(incoming);
        self.releases.sort_by(catalog_order);
        self.commit(now);
        Ok(())
    }

    /// Union `channels` into every release of `keys`
    ///
    /// Returns `false` (and leaves the version alone) when every release
    /// already has every channel.
    pub fn promote(
        &mut self,
        keys: &[ReleaseKey],
        channels: &[String],
        now: DateTime<Utc>,
    ) -> Result<bool> {
        for key in keys {
            if self.find(key).is_none() {
                return Err(Error::NotFound(format!("release {key}")));
            }
        }

        let wanted: HashSet<&ReleaseKey> = keys.iter().collect();
        let mut changed = false;
        for release in self
            .releases
            .iter_mut()
            .filter(|r| wanted.contains(&r.key()))
        {
            for channel in channels {
                if !release.has_channel(channel) {
                    release.channels.push(channel.clone());
                    changed = true;
                }
            }
        }

        if changed {
            self.commit(now);
        }
        Ok(changed)
    }

    /// Remove exactly the releases of `keys`
    ///
    /// Every key must exist; nothing is removed otherwise. Returns the number
    /// of removed records, which callers compare with what they asked for.
    pub fn demote(&mut self, keys: &[ReleaseKey], now: DateTime<Utc>) -> Result<usize> {
        let wanted: HashSet<&ReleaseKey> = keys.iter().collect();
        for key in &wanted {
            if self.find(key).is_none() {
                return Err(Error::NotFound(format!("release {key}")));
            }
        }

        let before = self.releases.len();
        self.releases.retain(|r| !wanted.contains(&r.key()));
        let removed = before - self.releases.len();

        if removed > 0 {
            self.commit(now);
        }
        Ok(removed)
    }

    /// The single place the version counter moves
    fn commit(&mut self, now: DateTime<Utc>) {
        self.version += 1;
        self.pack_id = Uuid::new_v4();
        self.last_write_access_utc = Some(match self.last_write_access_utc {
            Some(previous) if previous > now => previous,
            _ => now,
        });
    }

    /// Serialize into the catalog archive
    pub fn to_archive(&self) -> Result<Vec<u8>> {
        let mut writer = ArchiveWriter::new();
        writer.add(CATALOG_ENTRY, &serde_json::to_vec_pretty(self)?)?;
        writer.finish()
    }

    /// Load a catalog archive, rejecting unknown schemas and malformed records
    pub fn from_archive(bytes: &[u8]) -> Result<Self> {
        let mut reader = ArchiveReader::new(bytes)?;
        let data = reader.read(CATALOG_ENTRY)?;
        let catalog: Self = serde_json::from_slice(&data)
            .map_err(|e| Error::Validation(format!("malformed catalog: {e}")))?;

        if catalog.format_version != CATALOG_FORMAT_VERSION {
            return Err(Error::Validation(format!(
                "catalog format {} is not supported (expected {})",
                catalog.format_version, CATALOG_FORMAT_VERSION
            )));
        }
        let mut seen = HashSet::new();
        for release in &catalog.releases {
            release.target.validate()?;
            release.validate()?;
            if !seen.insert(release.key()) {
                return Err(Error::Validation(format!(
                    "catalog lists {} twice",
                    release.key()
                )));
            }
        }
        Ok(catalog)
    }
}

impl Default for SnapAppsReleases {
    fn default() -> Self {
        Self::new()
    }
}

/// Catalog order: app, rid, version, full before delta
fn catalog_order(a: &SnapRelease, b: &SnapRelease) -> std::cmp::Ordering {
    (&a.id, &a.target.rid, &a.version, !a.is_full()).cmp(&(
        &b.id,
        &b.target.rid,
        &b.version,
        !b.is_full(),
    ))
}
