// src/pack/assembler.rs

//! Full and delta package assembly
//!
//! Given the artifacts of a new version and (optionally) the previous full
//! package, the assembler produces:
//!
//! - a **full package**: every current file under `app/` or `assets/`, plus
//!   the package manifest and checksum manifest
//! - a **delta package** (not for genesis or rebase packs): raw bytes for
//!   New files, verified patches for Modified files, and empty placeholder
//!   entries for Unmodified and Deleted files
//!
//! Nothing is published here; a failed or cancelled build leaves no trace.

use super::archive::{read_full_package, write_package};
use super::filename::PackageNaming;
use super::manifest::{ChecksumManifest, MANIFEST_FORMAT_VERSION, PackageManifest};
use crate::checksum::{ArtifactSource, ChangeCounts, ChecksumIndex, Changeset, NeverDiff};
use crate::delta::{DeltaPatchEngine, DeltaTotals, diff_verified};
use crate::error::{Error, Result};
use crate::hash::Checksum;
use crate::logging::Logger;
use crate::model::{ChangeEntry, ChangeKind, FileEntry, ReleaseKind, SnapApp, SnapRelease};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Collaborators of the assembler
#[derive(Clone)]
pub struct AssemblerDeps {
    pub engine: Arc<dyn DeltaPatchEngine>,
    pub naming: PackageNaming,
    pub log: Logger,
}

/// The previous full release and its package bytes
#[derive(Debug, Clone)]
pub struct PreviousFull {
    pub release: SnapRelease,
    pub package: Vec<u8>,
}

/// Everything needed to pack one version
#[derive(Debug, Clone)]
pub struct PackRequest {
    pub app: SnapApp,
    pub sources: Vec<ArtifactSource>,
    pub never_diff: NeverDiff,
    /// Cut a new full baseline without a delta package
    pub rebase: bool,
    pub release_notes: Option<String>,
    pub created_utc: DateTime<Utc>,
}

/// One built package and its catalog record
#[derive(Debug, Clone)]
pub struct PackageOutput {
    pub bytes: Vec<u8>,
    pub release: SnapRelease,
}

/// Result of one assembly
#[derive(Debug, Clone)]
pub struct AssembleOutput {
    pub full: PackageOutput,
    pub delta: Option<PackageOutput>,
    pub counts: ChangeCounts,
    pub totals: DeltaTotals,
}

/// Builds release packages from artifacts
#[derive(Clone)]
pub struct PackageAssembler {
    deps: AssemblerDeps,
}

impl PackageAssembler {
    pub fn new(deps: AssemblerDeps) -> Self {
        Self { deps }
    }

    /// Build the full package and, relative to `previous`, the delta package
    ///
    /// Blocking: hashing, reading and diffing run on the calling thread.
    /// Callers on the async runtime use `spawn_blocking`.
    pub fn assemble(
        &self,
        previous: Option<&PreviousFull>,
        request: &PackRequest,
        cancel: &CancellationToken,
    ) -> Result<AssembleOutput> {
        let log = self.deps.log.for_app(&request.app.id);
        let _enter = log.enter();
        let app = &request.app;
        app.validate()?;

        if request.rebase && previous.is_none() {
            return Err(Error::Validation(
                "rebase requires a previous release".to_string(),
            ));
        }

        let previous_files = match previous {
            Some(prev) => Some(self.load_previous(prev, app)?),
            None => None,
        };

        let current = ChecksumIndex::scan(&request.sources, cancel, &log)?;
        if current.is_empty() {
            return Err(Error::Validation(format!(
                "no artifacts found for {} {}",
                app.id, app.version
            )));
        }

        let changeset = match previous {
            Some(prev) => Changeset::compute(
                &ChecksumIndex::from_files(&prev.release.files),
                &current,
                &request.never_diff,
            ),
            None => Changeset::default(),
        };
        let counts = changeset.counts();
        if previous.is_some() {
            info!("Changeset for {} {}: {}", app.id, app.version, counts);
            if changeset.is_empty_change() {
                info!("No file changed since the previous release");
            }
        }

        let current_bytes = read_current(&current, cancel)?;

        let full_kind = if previous.is_some() {
            ReleaseKind::Full
        } else {
            ReleaseKind::Genesis
        };
        let full = self.build_full(
            request,
            full_kind,
            current.to_file_entries(),
            changeset.entries().to_vec(),
            &current_bytes,
        )?;
        info!(
            "Built {} package {} ({})",
            full.release.kind, full.release.filename, full.release.package
        );

        let mut totals = DeltaTotals::default();
        let delta = match (previous_files, request.rebase) {
            (Some(previous_files), false) => {
                let delta = self.build_delta(
                    request,
                    &changeset,
                    &current,
                    &current_bytes,
                    &previous_files,
                    &mut totals,
                    cancel,
                )?;
                info!(
                    "Built delta package {} ({}): {} patched, {} raw, {} bytes saved",
                    delta.release.filename,
                    delta.release.package,
                    totals.patched_files,
                    totals.raw_files,
                    totals.bytes_saved()
                );
                Some(delta)
            }
            _ => None,
        };

        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        Ok(AssembleOutput {
            full,
            delta,
            counts,
            totals,
        })
    }

    /// Verify the previous full package and extract its files
    fn load_previous(
        &self,
        prev: &PreviousFull,
        app: &SnapApp,
    ) -> Result<BTreeMap<String, Vec<u8>>> {
        let release = &prev.release;
        if release.id != app.id || release.target.rid != app.target.rid {
            return Err(Error::Validation(format!(
                "previous release {release} does not belong to {} {}",
                app.id, app.target.rid
            )));
        }
        if release.version >= app.version {
            return Err(Error::Validation(format!(
                "version {} is not greater than previous release {}",
                app.version, release.version
            )));
        }
        let files = read_full_package(&prev.package, release)?;
        debug!("Loaded {} files of previous release {}", files.len(), release);
        Ok(files)
    }

    fn build_full(
        &self,
        request: &PackRequest,
        kind: ReleaseKind,
        files: Vec<FileEntry>,
        changes: Vec<ChangeEntry>,
        current_bytes: &BTreeMap<String, Vec<u8>>,
    ) -> Result<PackageOutput> {
        let app = &request.app;
        let manifest = self.manifest(request, kind, changes.clone())?;
        let checksums = ChecksumManifest::new(files.clone());
        let bytes = write_package(&manifest, &checksums, current_bytes)?;

        let release = SnapRelease {
            id: app.id.clone(),
            version: app.version.clone(),
            target: app.target.clone(),
            kind,
            files,
            changes,
            channels: manifest.channels.clone(),
            filename: self
                .deps
                .naming
                .release_filename(&app.id, true, &app.target.rid, &app.version),
            package: Checksum::of_bytes(&bytes),
            created_utc: request.created_utc,
            release_notes: request.release_notes.clone(),
        };
        release.validate()?;
        Ok(PackageOutput { bytes, release })
    }

    #[allow(clippy::too_many_arguments)]
    fn build_delta(
        &self,
        request: &PackRequest,
        changeset: &Changeset,
        current: &ChecksumIndex,
        current_bytes: &BTreeMap<String, Vec<u8>>,
        previous_files: &BTreeMap<String, Vec<u8>>,
        totals: &mut DeltaTotals,
        cancel: &CancellationToken,
    ) -> Result<PackageOutput> {
        let app = &request.app;
        let engine = self.deps.engine.as_ref();
        let mut entries: BTreeMap<String, Vec<u8>> = BTreeMap::new();
        let mut files = Vec::with_capacity(current.len());

        for change in changeset.entries() {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }
            let path = change.target_path.as_str();

            match change.kind {
                ChangeKind::New => {
                    let data = file_bytes(current_bytes, path)?;
                    files.push(FileEntry::new(path, &Checksum::of_bytes(data)));
                    entries.insert(path.to_string(), data.clone());
                    totals.record_raw();
                }
                ChangeKind::Modified => {
                    let data = file_bytes(current_bytes, path)?;
                    let full = Checksum::of_bytes(data);
                    let older = file_bytes(previous_files, path)?;

                    let patched = if changeset.is_forced_full(path) {
                        debug!("{path}: never-diff, shipping full bytes");
                        None
                    } else {
                        let (patch, metrics) = diff_verified(engine, path, older, data)?;
                        debug!("{path}: {metrics}");
                        if metrics.is_worthwhile() {
                            totals.record_patch(&metrics);
                            Some(patch)
                        } else {
                            None
                        }
                    };

                    match patched {
                        Some(patch) => {
                            let entry = FileEntry::new(path, &full)
                                .with_delta(&Checksum::of_bytes(&patch));
                            files.push(entry);
                            entries.insert(path.to_string(), patch);
                        }
                        None => {
                            totals.record_raw();
                            files.push(FileEntry::new(path, &full));
                            entries.insert(path.to_string(), data.clone());
                        }
                    }
                }
                ChangeKind::Unmodified => {
                    let checksum = current.get(path).ok_or_else(|| {
                        Error::Integrity(format!("{path} is unmodified but not indexed"))
                    })?;
                    files.push(FileEntry::new(path, checksum));
                    entries.insert(path.to_string(), Vec::new());
                }
                ChangeKind::Deleted => {
                    entries.insert(path.to_string(), Vec::new());
                }
            }
        }

        let manifest = self.manifest(request, ReleaseKind::Delta, changeset.entries().to_vec())?;
        let checksums = ChecksumManifest::new(files.clone());
        let bytes = write_package(&manifest, &checksums, &entries)?;

        let release = SnapRelease {
            id: app.id.clone(),
            version: app.version.clone(),
            target: app.target.clone(),
            kind: ReleaseKind::Delta,
            files,
            changes: changeset.entries().to_vec(),
            channels: manifest.channels.clone(),
            filename: self
                .deps
                .naming
                .release_filename(&app.id, false, &app.target.rid, &app.version),
            package: Checksum::of_bytes(&bytes),
            created_utc: request.created_utc,
            release_notes: request.release_notes.clone(),
        };
        release.validate()?;
        Ok(PackageOutput { bytes, release })
    }

    fn manifest(
        &self,
        request: &PackRequest,
        kind: ReleaseKind,
        changes: Vec<ChangeEntry>,
    ) -> Result<PackageManifest> {
        let app = &request.app;
        Ok(PackageManifest {
            format_version: MANIFEST_FORMAT_VERSION,
            id: app.id.clone(),
            version: app.version.clone(),
            target: app.target.clone(),
            kind,
            channels: vec![app.first_channel()?.name.clone()],
            changes,
            release_notes: request.release_notes.clone(),
        })
    }
}

/// Read every indexed file and check it did not change since it was hashed
fn read_current(
    index: &ChecksumIndex,
    cancel: &CancellationToken,
) -> Result<BTreeMap<String, Vec<u8>>> {
    let mut files = BTreeMap::new();
    for (path, checksum) in index.iter() {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        let source = index
            .source(path)
            .ok_or_else(|| Error::NotFound(format!("source file of {path}")))?;
        let data = std::fs::read(source)
            .map_err(|e| Error::IoError(format!("Failed to read {}: {e}", source.display())))?;
        checksum.verify(path, &data)?;
        files.insert(path.to_string(), data);
    }
    Ok(files)
}

fn file_bytes<'a>(files: &'a BTreeMap<String, Vec<u8>>, path: &str) -> Result<&'a Vec<u8>> {
    files
        .get(path)
        .ok_or_else(|| Error::Integrity(format!("no bytes for {path}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::delta::BlockCopyEngine;
    use crate::model::{Channel, OsPlatform, Target};
    use crate::pack::archive::ArchiveReader;
    use semver::Version;
    use std::fs;
    use std::path::Path;
    use tempfile::TempDir;

    fn assembler() -> PackageAssembler {
        PackageAssembler::new(AssemblerDeps {
            engine: Arc::new(BlockCopyEngine::new()),
            naming: PackageNaming::default(),
            log: Logger::disabled(),
        })
    }

    fn request(dir: &Path, version: Version) -> PackRequest {
        let target = Target::new(OsPlatform::Linux, "linux-x64", "net8.0").unwrap();
        let app = SnapApp::new(
            "demoapp",
            version,
            target,
            vec![Channel::new("test", "main"), Channel::new("production", "main")],
        )
        .unwrap();
        PackRequest {
            app,
            sources: vec![ArtifactSource::app(dir)],
            never_diff: NeverDiff::none(),
            rebase: false,
            release_notes: None,
            created_utc: DateTime::<Utc>::UNIX_EPOCH,
        }
    }

    fn write(dir: &Path, name: &str, data: &[u8]) {
        fs::write(dir.join(name), data).unwrap();
    }

    #[test]
    fn test_genesis_has_no_delta() {
        let temp = TempDir::new().unwrap();
        write(temp.path(), "demoapp", b"binary v1");
        write(temp.path(), "lib.so", b"library v1");

        let output = assembler()
            .assemble(None, &request(temp.path(), Version::new(1, 0, 0)), &CancellationToken::new())
            .unwrap();

        assert!(output.delta.is_none());
        let release = &output.full.release;
        assert!(release.is_genesis() && release.is_full());
        assert_eq!(release.files.len(), 2);
        assert!(release.changes.is_empty());
        assert_eq!(release.channels, vec!["test"]);
        assert_eq!(release.filename, "demoapp_full_linux-x64_relpack.1.0.0.zip");
        release.package.verify("full", &output.full.bytes).unwrap();
    }

    #[test]
    fn test_delta_entries_and_placeholders() {
        let temp = TempDir::new().unwrap();
        let base = vec![b'x'; 4096];
        write(temp.path(), "keep", b"same bytes");
        write(temp.path(), "big", &base);
        write(temp.path(), "gone", b"removed later");
        let v1 = assembler()
            .assemble(None, &request(temp.path(), Version::new(1, 0, 0)), &CancellationToken::new())
            .unwrap();

        let mut changed = base.clone();
        changed[2000] = b'y';
        write(temp.path(), "big", &changed);
        write(temp.path(), "added", b"brand new");
        fs::remove_file(temp.path().join("gone")).unwrap();

        let previous = PreviousFull {
            release: v1.full.release,
            package: v1.full.bytes,
        };
        let output = assembler()
            .assemble(
                Some(&previous),
                &request(temp.path(), Version::new(1, 1, 0)),
                &CancellationToken::new(),
            )
            .unwrap();

        assert_eq!(output.full.release.kind, ReleaseKind::Full);
        let delta = output.delta.unwrap();
        assert_eq!(delta.release.new_files(), vec!["app/added"]);
        assert_eq!(delta.release.modified_files(), vec!["app/big"]);
        assert_eq!(delta.release.unmodified_files(), vec!["app/keep"]);
        assert_eq!(delta.release.deleted_files(), vec!["app/gone"]);
        assert_eq!(output.totals.patched_files, 1);

        let big = delta.release.file("app/big").unwrap();
        assert!(big.delta_checksum().is_some());

        let mut reader = ArchiveReader::new(&delta.bytes).unwrap();
        assert!(reader.read("app/keep").unwrap().is_empty());
        assert!(reader.read("app/gone").unwrap().is_empty());
        assert_eq!(reader.read("app/added").unwrap(), b"brand new");
        let patch = reader.read("app/big").unwrap();
        assert_eq!(Some(Checksum::of_bytes(&patch)), big.delta_checksum());
        assert!(patch.len() < changed.len());
    }

    #[test]
    fn test_never_diff_ships_full_bytes() {
        let temp = TempDir::new().unwrap();
        write(temp.path(), "bootstrap", b"identical");
        let v1 = assembler()
            .assemble(None, &request(temp.path(), Version::new(1, 0, 0)), &CancellationToken::new())
            .unwrap();
        let previous = PreviousFull {
            release: v1.full.release,
            package: v1.full.bytes,
        };

        let mut req = request(temp.path(), Version::new(1, 0, 1));
        req.never_diff = NeverDiff::new(&["app/boot*".to_string()]).unwrap();
        let output = assembler()
            .assemble(Some(&previous), &req, &CancellationToken::new())
            .unwrap();

        let delta = output.delta.unwrap();
        assert_eq!(delta.release.modified_files(), vec!["app/bootstrap"]);
        assert!(delta.release.file("app/bootstrap").unwrap().delta_hash.is_none());
        let mut reader = ArchiveReader::new(&delta.bytes).unwrap();
        assert_eq!(reader.read("app/bootstrap").unwrap(), b"identical");
    }

    #[test]
    fn test_rebase_skips_delta() {
        let temp = TempDir::new().unwrap();
        write(temp.path(), "a", b"one");
        let v1 = assembler()
            .assemble(None, &request(temp.path(), Version::new(1, 0, 0)), &CancellationToken::new())
            .unwrap();
        let previous = PreviousFull {
            release: v1.full.release,
            package: v1.full.bytes,
        };
        write(temp.path(), "a", b"two");

        let mut req = request(temp.path(), Version::new(2, 0, 0));
        req.rebase = true;
        let output = assembler()
            .assemble(Some(&previous), &req, &CancellationToken::new())
            .unwrap();
        assert!(output.delta.is_none());
        assert_eq!(output.full.release.kind, ReleaseKind::Full);
        assert_eq!(output.full.release.modified_files(), vec!["app/a"]);
    }

    #[test]
    fn test_version_must_increase() {
        let temp = TempDir::new().unwrap();
        write(temp.path(), "a", b"one");
        let v1 = assembler()
            .assemble(None, &request(temp.path(), Version::new(1, 0, 0)), &CancellationToken::new())
            .unwrap();
        let previous = PreviousFull {
            release: v1.full.release,
            package: v1.full.bytes,
        };
        let err = assembler()
            .assemble(
                Some(&previous),
                &request(temp.path(), Version::new(1, 0, 0)),
                &CancellationToken::new(),
            )
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[test]
    fn test_empty_artifacts_rejected() {
        let temp = TempDir::new().unwrap();
        let err = assembler()
            .assemble(None, &request(temp.path(), Version::new(1, 0, 0)), &CancellationToken::new())
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[test]
    fn test_cancelled_build() {
        let temp = TempDir::new().unwrap();
        write(temp.path(), "a", b"one");
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = assembler()
            .assemble(None, &request(temp.path(), Version::new(1, 0, 0)), &cancel)
            .unwrap_err();
        assert!(matches!(err, Error::Cancelled));
    }

    #[test]
    fn test_corrupt_previous_package_rejected() {
        let temp = TempDir::new().unwrap();
        write(temp.path(), "a", b"one");
        let v1 = assembler()
            .assemble(None, &request(temp.path(), Version::new(1, 0, 0)), &CancellationToken::new())
            .unwrap();
        let mut package = v1.full.bytes;
        let last = package.len() - 1;
        package[last] ^= 0xff;
        let previous = PreviousFull {
            release: v1.full.release,
            package,
        };
        let err = assembler()
            .assemble(
                Some(&previous),
                &request(temp.path(), Version::new(1, 1, 0)),
                &CancellationToken::new(),
            )
            .unwrap_err();
        assert!(matches!(err, Error::ChecksumMismatch { .. }));
    }
}
