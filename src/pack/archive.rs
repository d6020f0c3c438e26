// src/pack/archive.rs

//! Deterministic zip archives
//!
//! Entries carry a fixed timestamp and are written in the order given, so the
//! same inputs always produce the same bytes. Rebuilding a full package from a
//! delta relies on this to reproduce the recorded package hash.

use super::manifest::{CHECKSUMS_PATH, ChecksumManifest, MANIFEST_PATH, PackageManifest};
use crate::error::{Error, Result};
use crate::model::SnapRelease;
use std::collections::BTreeMap;
use std::io::{Cursor, Read, Write};
use zip::result::ZipError;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, DateTime, ZipArchive, ZipWriter};

/// In-memory zip writer with reproducible output
pub struct ArchiveWriter {
    zip: ZipWriter<Cursor<Vec<u8>>>,
}

impl ArchiveWriter {
    pub fn new() -> Self {
        Self {
            zip: ZipWriter::new(Cursor::new(Vec::new())),
        }
    }

    fn options(data: &[u8]) -> SimpleFileOptions {
        // Placeholders are stored; deflate adds framing bytes to empty input
        let method = if data.is_empty() {
            CompressionMethod::Stored
        } else {
            CompressionMethod::Deflated
        };
        SimpleFileOptions::default()
            .compression_method(method)
            .last_modified_time(DateTime::default())
            .unix_permissions(0o644)
    }

    /// Append one entry
    pub fn add(&mut self, name: &str, data: &[u8]) -> Result<()> {
        self.zip.start_file(name, Self::options(data))?;
        self.zip
            .write_all(data)
            .map_err(|e| Error::Archive(format!("Failed to write {name}: {e}")))?;
        Ok(())
    }

    pub fn finish(self) -> Result<Vec<u8>> {
        Ok(self.zip.finish()?.into_inner())
    }
}

impl Default for ArchiveWriter {
    fn default() -> Self {
        Self::new()
    }
}

/// Zip reader over borrowed package bytes
pub struct ArchiveReader<'a> {
    zip: ZipArchive<Cursor<&'a [u8]>>,
}

impl<'a> ArchiveReader<'a> {
    pub fn new(bytes: &'a [u8]) -> Result<Self> {
        let zip = ZipArchive::new(Cursor::new(bytes))?;
        Ok(Self { zip })
    }

    pub fn contains(&self, name: &str) -> bool {
        self.zip.index_for_name(name).is_some()
    }

    /// Entry names in archive order
    pub fn names(&self) -> Vec<String> {
        self.zip.file_names().map(str::to_string).collect()
    }

    /// Read one entry fully
    pub fn read(&mut self, name: &str) -> Result<Vec<u8>> {
        let mut file = match self.zip.by_name(name) {
            Ok(file) => file,
            Err(ZipError::FileNotFound) => {
                return Err(Error::NotFound(format!("archive entry {name}")));
            }
            Err(e) => return Err(e.into()),
        };
        let mut data = Vec::with_capacity(usize::try_from(file.size()).unwrap_or(0));
        file.read_to_end(&mut data)
            .map_err(|e| Error::Archive(format!("Failed to read {name}: {e}")))?;
        Ok(data)
    }

    pub fn manifest(&mut self) -> Result<PackageManifest> {
        PackageManifest::from_json(&self.read(MANIFEST_PATH)?)
    }

    pub fn checksums(&mut self) -> Result<ChecksumManifest> {
        ChecksumManifest::from_json(&self.read(CHECKSUMS_PATH)?)
    }
}

/// Write a package: manifests first, then file entries in key order
pub fn write_package(
    manifest: &PackageManifest,
    checksums: &ChecksumManifest,
    entries: &BTreeMap<String, Vec<u8>>,
) -> Result<Vec<u8>> {
    let mut writer = ArchiveWriter::new();
    writer.add(MANIFEST_PATH, &manifest.to_json()?)?;
    writer.add(CHECKSUMS_PATH, &checksums.to_json()?)?;
    for (name, data) in entries {
        writer.add(name, data)?;
    }
    writer.finish()
}

/// Extract every file of a full package, verified against its release record
///
/// The package-level checksum is checked first, then each file against the
/// release's recorded full hash and length.
pub fn read_full_package(
    package: &[u8],
    release: &SnapRelease,
) -> Result<BTreeMap<String, Vec<u8>>> {
    if !release.is_full() {
        return Err(Error::Validation(format!(
            "{release} is not a full release"
        )));
    }
    release.package.verify(&release.filename, package)?;

    let mut reader = ArchiveReader::new(package)?;
    let mut files = BTreeMap::new();
    for entry in &release.files {
        let data = reader.read(&entry.target_path)?;
        entry.full_checksum().verify(&entry.target_path, &data)?;
        files.insert(entry.target_path.clone(), data);
    }
    Ok(files)
}
