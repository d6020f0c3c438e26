// src/feed/directory.rs

//! Feed backed by a local (or mounted) directory
//!
//! Each feed name is a subdirectory of the root. Writes go to a temporary
//! file first and are renamed into place, so readers never see a partial
//! package.

use super::PackageFeed;
use crate::error::{Error, Result};
use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Directory tree feed: `{root}/{feed}/{filename}`
#[derive(Debug, Clone)]
pub struct DirectoryFeed {
    root: PathBuf,
}

impl DirectoryFeed {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve a file, refusing names that would escape the feed directory
    fn path_of(&self, feed: &str, filename: &str) -> Result<PathBuf> {
        for part in [feed, filename] {
            if part.is_empty()
                || part == "."
                || part == ".."
                || part.contains('/')
                || part.contains('\\')
            {
                return Err(Error::Validation(format!("invalid feed path component '{part}'")));
            }
        }
        Ok(self.root.join(feed).join(filename))
    }
}

#[async_trait]
impl PackageFeed for DirectoryFeed {
    fn name(&self) -> &str {
        "directory"
    }

    async fn upload(&self, feed: &str, filename: &str, data: &[u8]) -> Result<()> {
        let path = self.path_of(feed, filename)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                Error::IoError(format!("Failed to create feed directory {}: {e}", parent.display()))
            })?;
        }

        let temp_path = path.with_extension("tmp");
        tokio::fs::write(&temp_path, data)
            .await
            .map_err(|e| Error::IoError(format!("Failed to write {}: {e}", temp_path.display())))?;
        tokio::fs::rename(&temp_path, &path)
            .await
            .map_err(|e| Error::IoError(format!("Failed to rename temp file: {e}")))?;

        debug!("Stored {}/{} ({} bytes)", feed, filename, data.len());
        Ok(())
    }

    async fn download(&self, feed: &str, filename: &str) -> Result<Vec<u8>> {
        let path = self.path_of(feed, filename)?;
        match tokio::fs::read(&path).await {
            Ok(data) => Ok(data),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                Err(Error::NotFound(format!("{feed}/{filename}")))
            }
            Err(e) => Err(Error::IoError(format!("Failed to read {}: {e}", path.display()))),
        }
    }

    async fn exists(&self, feed: &str, filename: &str) -> Result<bool> {
        let path = self.path_of(feed, filename)?;
        Ok(tokio::fs::try_exists(&path).await.unwrap_or(false))
    }
}
