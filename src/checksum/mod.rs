// src/checksum/mod.rs

//! Checksum index over a release's file set
//!
//! A [`ChecksumIndex`] maps target paths to [`Checksum`]s in lexicographic
//! order. It is built either from the artifacts on disk (the version being
//! packed) or from a previous release's recorded `files`, and the two are
//! compared by [`changeset::Changeset::compute`].

pub mod changeset;

pub use changeset::{ChangeCounts, Changeset, NeverDiff};

use crate::error::{Error, Result};
use crate::hash::Checksum;
use crate::logging::Logger;
use crate::model::{ArchiveRoot, FileEntry};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use walkdir::WalkDir;

/// A directory whose files are indexed under one archive root
#[derive(Debug, Clone)]
pub struct ArtifactSource {
    pub root: ArchiveRoot,
    pub dir: PathBuf,
}

impl ArtifactSource {
    pub fn app(dir: &Path) -> Self {
        Self {
            root: ArchiveRoot::App,
            dir: dir.to_path_buf(),
        }
    }

    pub fn assets(dir: &Path) -> Self {
        Self {
            root: ArchiveRoot::Assets,
            dir: dir.to_path_buf(),
        }
    }
}

#[derive(Debug, Clone)]
struct IndexedFile {
    checksum: Checksum,
    /// Where the bytes live on disk (None for indexes built from a release)
    source: Option<PathBuf>,
}

/// Target path -> checksum, ordered by target path
#[derive(Debug, Clone, Default)]
pub struct ChecksumIndex {
    entries: BTreeMap<String, IndexedFile>,
}

impl ChecksumIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Index the recorded file set of a release
    pub fn from_files(files: &[FileEntry]) -> Self {
        let entries = files
            .iter()
            .map(|f| {
                (
                    f.target_path.clone(),
                    IndexedFile {
                        checksum: f.full_checksum(),
                        source: None,
                    },
                )
            })
            .collect();
        Self { entries }
    }

    /// Hash every regular file under the given sources
    ///
    /// Files are visited in sorted order so the result (and its log output)
    /// is reproducible. A symlink to a file is indexed under the link's own
    /// path with the content it points at; links to directories, dangling
    /// links and other special files are rejected.
    pub fn scan(
        sources: &[ArtifactSource],
        cancel: &CancellationToken,
        log: &Logger,
    ) -> Result<Self> {
        let _enter = log.enter();
        let mut index = Self::new();

        for source in sources {
            if !source.dir.is_dir() {
                return Err(Error::NotFound(format!(
                    "{} directory {}",
                    source.root,
                    source.dir.display()
                )));
            }

            let walker = WalkDir::new(&source.dir)
                .follow_links(false)
                .sort_by_file_name();

            for entry in walker {
                if cancel.is_cancelled() {
                    return Err(Error::Cancelled);
                }
                let entry = entry.map_err(|e| {
                    Error::IoError(format!("Failed to walk {}: {e}", source.dir.display()))
                })?;

                let file_type = entry.file_type();
                if file_type.is_dir() {
                    continue;
                }
                if file_type.is_symlink() {
                    let resolved = std::fs::metadata(entry.path()).map_err(|e| {
                        Error::Validation(format!(
                            "symlink {} cannot be resolved: {e}",
                            entry.path().display()
                        ))
                    })?;
                    if !resolved.is_file() {
                        return Err(Error::Validation(format!(
                            "symlink {} does not point at a regular file",
                            entry.path().display()
                        )));
                    }
                    debug!("Following symlink {}", entry.path().display());
                } else if !file_type.is_file() {
                    return Err(Error::Validation(format!(
                        "unsupported special file {}",
                        entry.path().display()
                    )));
                }

                let relative = relative_target(&source.dir, entry.path())?;
                let target_path = source.root.target_path(&relative);
                let checksum = Checksum::of_file(entry.path())?;
                debug!("{} -> {}", target_path, checksum.short());
                index.insert(target_path, checksum, Some(entry.path().to_path_buf()))?;
            }
        }

        info!(
            "Indexed {} files ({} bytes)",
            index.len(),
            index.total_length()
        );
        Ok(index)
    }

    /// Add one entry; a target path may only be indexed once
    pub fn insert(
        &mut self,
        target_path: String,
        checksum: Checksum,
        source: Option<PathBuf>,
    ) -> Result<()> {
        ArchiveRoot::split(&target_path)?;
        if self.entries.contains_key(&target_path) {
            return Err(Error::Validation(format!(
                "target path '{target_path}' is indexed twice"
            )));
        }
        self.entries
            .insert(target_path, IndexedFile { checksum, source });
        Ok(())
    }

    pub fn get(&self, target_path: &str) -> Option<&Checksum> {
        self.entries.get(target_path).map(|f| &f.checksum)
    }

    /// On-disk location of a scanned file
    pub fn source(&self, target_path: &str) -> Option<&Path> {
        self.entries
            .get(target_path)
            .and_then(|f| f.source.as_deref())
    }

    pub fn contains(&self, target_path: &str) -> bool {
        self.entries.contains_key(target_path)
    }

    /// Entries in lexicographic target-path order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Checksum)> {
        self.entries
            .iter()
            .map(|(path, file)| (path.as_str(), &file.checksum))
    }

    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn total_length(&self) -> u64 {
        self.entries.values().map(|f| f.checksum.length).sum()
    }

    /// Full-only file entries, sorted by target path
    pub fn to_file_entries(&self) -> Vec<FileEntry> {
        self.iter()
            .map(|(path, checksum)| FileEntry::new(path, checksum))
            .collect()
    }
}

/// Root-relative path with `/` separators
fn relative_target(root: &Path, path: &Path) -> Result<String> {
    let relative = path.strip_prefix(root).map_err(|_| {
        Error::Validation(format!(
            "{} is not under {}",
            path.display(),
            root.display()
        ))
    })?;

    let mut parts = Vec::new();
    for component in relative.components() {
        let part = component.as_os_str().to_str().ok_or_else(|| {
            Error::Validation(format!("path {} is not valid UTF-8", path.display()))
        })?;
        parts.push(part);
    }
    Ok(parts.join("/"))
}
