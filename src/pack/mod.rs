// src/pack/mod.rs

//! Release package construction
//!
//! A package is a deterministic zip archive. File entries live under the
//! `app/` and `assets/` roots; `.relpack/manifest.json` and
//! `.relpack/checksums.json` describe it.

pub mod archive;
pub mod assembler;
pub mod filename;
pub mod manifest;
pub mod rebuild;

pub use archive::{ArchiveReader, ArchiveWriter, read_full_package};
pub use assembler::{
    AssembleOutput, AssemblerDeps, PackRequest, PackageAssembler, PackageOutput, PreviousFull,
};
pub use filename::{PackageNaming, ReleaseFilename};
pub use manifest::{ChecksumManifest, PackageManifest};
pub use rebuild::rebuild_full;
