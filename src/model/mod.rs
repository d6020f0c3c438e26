// src/model/mod.rs

//! Data model shared by packing, the catalog and promotion
//!
//! - **Target**: OS + runtime identifier + framework
//! - **SnapApp / Channel**: application descriptor and its promotion pipeline
//! - **SnapRelease / FileEntry / ChangeEntry**: one published package and its
//!   per-file bookkeeping
//! - **ArchiveRoot**: the app/ and assets/ roots of a package

mod app;
mod layout;
mod release;
mod target;

pub use app::{Channel, SnapApp};
pub use layout::{ArchiveRoot, install_path};
pub use release::{ChangeEntry, ChangeKind, FileEntry, ReleaseKey, ReleaseKind, SnapRelease};
pub use target::{OsPlatform, SUPPORTED_RIDS, Target};
