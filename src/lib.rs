// src/lib.rs

//! relpack release packaging engine
//!
//! Builds versioned, checksum-verified full and delta release packages from
//! a directory of artifacts, tracks which versions have been promoted to
//! which channels, and serializes catalog changes across operators with a
//! leased distributed lock.
//!
//! # Architecture
//!
//! - Checksums: every file and package is identified by SHA-256 + length
//! - Changesets: New/Modified/Unmodified/Deleted between successive releases
//! - Deltas: binary patches verified by re-application before publishing
//! - Catalog: one versioned archive per app, mutated only under the lock
//! - Channels: an ordered promotion pipeline per app

pub mod checksum;
pub mod config;
pub mod delta;
mod error;
pub mod feed;
pub mod hash;
pub mod lock;
pub mod logging;
pub mod model;
pub mod pack;
pub mod publish;
pub mod releases;
pub mod restore;
pub mod time;

pub use checksum::{ArtifactSource, ChangeCounts, Changeset, ChecksumIndex, NeverDiff};
pub use delta::{BlockCopyEngine, DeltaPatchEngine, ZstdPatchEngine};
pub use error::{Error, Result};
pub use hash::Checksum;
pub use lock::{DistributedReleaseLock, LockOptions, LockService, LockState};
pub use model::{
    Channel, FileEntry, OsPlatform, ReleaseKey, ReleaseKind, SnapApp, SnapRelease, Target,
};
pub use publish::{PackOptions, PublisherDeps, ReleasePublisher};
pub use releases::{ReleaseQuery, SnapAppsReleases};
