// src/pack/rebuild.rs

//! Reconstruct a full package from its predecessor and a delta
//!
//! Restores use this when only the delta of a version is available. Every
//! reconstructed file is checked against its recorded full hash, and since
//! archives are deterministic the rebuilt package must hash exactly like the
//! full package recorded in the catalog.

use super::archive::{ArchiveReader, read_full_package, write_package};
use super::assembler::{PackageOutput, PreviousFull};
use super::filename::PackageNaming;
use super::manifest::{ChecksumManifest, PackageManifest};
use crate::delta::engine_for_patch;
use crate::error::{Error, Result};
use crate::hash::Checksum;
use crate::logging::Logger;
use crate::model::{ChangeKind, FileEntry, ReleaseKind, SnapRelease};
use std::collections::BTreeMap;
use tracing::{debug, info};

/// Rebuild the full package of `delta_release`
///
/// `expected` is the catalog's full release of the same version, when known;
/// the rebuilt package must match its hash and length.
pub fn rebuild_full(
    previous: &PreviousFull,
    delta_release: &SnapRelease,
    delta_package: &[u8],
    expected: Option<&SnapRelease>,
    naming: &PackageNaming,
    log: &Logger,
) -> Result<PackageOutput> {
    let _enter = log.enter();

    if !delta_release.is_delta() {
        return Err(Error::Validation(format!("{delta_release} is not a delta release")));
    }
    if previous.release.id != delta_release.id
        || previous.release.target.rid != delta_release.target.rid
        || previous.release.version >= delta_release.version
    {
        return Err(Error::Validation(format!(
            "{} cannot be the baseline of {delta_release}",
            previous.release
        )));
    }
    delta_release
        .package
        .verify(&delta_release.filename, delta_package)?;

    let baseline = read_full_package(&previous.package, &previous.release)?;
    let mut reader = ArchiveReader::new(delta_package)?;
    let delta_manifest = reader.manifest()?;

    let kinds: BTreeMap<&str, ChangeKind> = delta_release
        .changes
        .iter()
        .map(|c| (c.target_path.as_str(), c.kind))
        .collect();

    let mut files = BTreeMap::new();
    let mut entries = Vec::with_capacity(delta_release.files.len());
    for entry in &delta_release.files {
        let path = entry.target_path.as_str();
        let kind = kinds
            .get(path)
            .copied()
            .ok_or_else(|| Error::Integrity(format!("{path} is missing from the changeset")))?;

        let data = match kind {
            ChangeKind::New => reader.read(path)?,
            ChangeKind::Modified => {
                let stored = reader.read(path)?;
                match entry.delta_checksum() {
                    Some(delta) => {
                        delta.verify(path, &stored)?;
                        let older = baseline.get(path).ok_or_else(|| {
                            Error::Integrity(format!(
                                "{path} is modified but absent from the baseline"
                            ))
                        })?;
                        engine_for_patch(&stored)?.patch(older, &stored)?
                    }
                    None => stored,
                }
            }
            ChangeKind::Unmodified => baseline.get(path).cloned().ok_or_else(|| {
                Error::Integrity(format!("{path} is unmodified but absent from the baseline"))
            })?,
            ChangeKind::Deleted => {
                return Err(Error::Integrity(format!(
                    "{path} is deleted but listed as a file"
                )));
            }
        };

        entry.full_checksum().verify(path, &data)?;
        debug!("Rebuilt {path} ({kind})");
        entries.push(FileEntry::new(path, &entry.full_checksum()));
        files.insert(path.to_string(), data);
    }

    let manifest = PackageManifest {
        kind: ReleaseKind::Full,
        ..delta_manifest
    };
    let bytes = write_package(&manifest, &ChecksumManifest::new(entries.clone()), &files)?;
    let package = Checksum::of_bytes(&bytes);

    if let Some(expected) = expected {
        expected.package.verify(&expected.filename, &bytes).map_err(|e| {
            Error::Integrity(format!("rebuilt full package differs from the catalog: {e}"))
        })?;
    }

    let release = SnapRelease {
        kind: ReleaseKind::Full,
        files: entries,
        filename: naming.release_filename(
            &delta_release.id,
            true,
            &delta_release.target.rid,
            &delta_release.version,
        ),
        package,
        ..delta_release.clone()
    };
    info!("Rebuilt {} ({})", release.filename, release.package);
    Ok(PackageOutput { bytes, release })
}
