// src/pack/filename.rs

//! Feed filenames for release packages and catalogs
//!
//! ```text
//! release:  {id}_{full|delta}_{rid}_{suite}.{version}.{ext}
//! catalog:  {id}_{suite}.{ext}
//! ```
//!
//! Everything is lowercased. The upstream identifier of a file is its name
//! with the `.{version}.{ext}` (or `.{ext}`) suffix stripped.

use crate::error::{Error, Result};
use semver::Version;

/// Default suite segment
pub const DEFAULT_SUITE: &str = "relpack";

/// Extension of every archive written by the engine
pub const ARCHIVE_EXTENSION: &str = "zip";

/// Components of a parsed release filename
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReleaseFilename {
    pub id: String,
    pub full: bool,
    pub rid: String,
    pub version: Version,
}

/// Naming scheme shared by packers and feed readers
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageNaming {
    suite: String,
}

impl PackageNaming {
    pub fn new(suite: &str) -> Result<Self> {
        let suite = suite.to_lowercase();
        if suite.is_empty() || !suite.chars().all(|c| c.is_ascii_alphanumeric() || c == '-') {
            return Err(Error::Config(format!("invalid package suite '{suite}'")));
        }
        Ok(Self { suite })
    }

    pub fn suite(&self) -> &str {
        &self.suite
    }

    /// `{id}_{full|delta}_{rid}_{suite}`
    pub fn release_upstream_id(&self, id: &str, full: bool, rid: &str) -> String {
        format!(
            "{}_{}_{}_{}",
            id,
            if full { "full" } else { "delta" },
            rid,
            self.suite
        )
        .to_lowercase()
    }

    pub fn release_filename(&self, id: &str, full: bool, rid: &str, version: &Version) -> String {
        format!(
            "{}.{}.{}",
            self.release_upstream_id(id, full, rid),
            version,
            ARCHIVE_EXTENSION
        )
        .to_lowercase()
    }

    /// `{id}_{suite}`; also the lock name guarding the catalog
    pub fn catalog_upstream_id(&self, id: &str) -> String {
        format!("{}_{}", id, self.suite).to_lowercase()
    }

    pub fn catalog_filename(&self, id: &str) -> String {
        format!("{}.{}", self.catalog_upstream_id(id), ARCHIVE_EXTENSION)
    }

    /// Strip the version/extension suffix from a release or catalog filename
    pub fn upstream_id_of(&self, filename: &str) -> Option<String> {
        let filename = filename.to_lowercase();
        let stem = filename.strip_suffix(&format!(".{ARCHIVE_EXTENSION}"))?;
        let marker = format!("_{}", self.suite);

        if stem.ends_with(&marker) {
            return Some(stem.to_string());
        }
        let split = stem.rfind(&format!("{marker}."))?;
        Some(stem[..split + marker.len()].to_string())
    }

    /// Parse a release filename produced by [`Self::release_filename`]
    pub fn parse_release_filename(&self, filename: &str) -> Option<ReleaseFilename> {
        let filename = filename.to_lowercase();
        let upstream = self.upstream_id_of(&filename)?;
        let version_part = filename
            .strip_prefix(&upstream)?
            .strip_prefix('.')?
            .strip_suffix(&format!(".{ARCHIVE_EXTENSION}"))?;
        let version = Version::parse(version_part).ok()?;

        let head = upstream.strip_suffix(&format!("_{}", self.suite))?;
        let mut parts = head.split('_');
        let (id, kind, rid) = (parts.next()?, parts.next()?, parts.next()?);
        if parts.next().is_some() {
            return None;
        }
        let full = match kind {
            "full" => true,
            "delta" => false,
            _ => return None,
        };

        Some(ReleaseFilename {
            id: id.to_string(),
            full,
            rid: rid.to_string(),
            version,
        })
    }
}

impl Default for PackageNaming {
    fn default() -> Self {
        Self {
            suite: DEFAULT_SUITE.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_release_filename() {
        let naming = PackageNaming::default();
        let version = Version::parse("1.1.0-Beta.2").unwrap();
        assert_eq!(
            naming.release_filename("DemoApp", true, "linux-x64", &version),
            "demoapp_full_linux-x64_relpack.1.1.0-beta.2.zip"
        );
        assert_eq!(
            naming.release_filename("demoapp", false, "win-x64", &Version::new(2, 0, 0)),
            "demoapp_delta_win-x64_relpack.2.0.0.zip"
        );
    }

    #[test]
    fn test_catalog_filename() {
        let naming = PackageNaming::new("Suite").unwrap();
        assert_eq!(naming.catalog_filename("demoapp"), "demoapp_suite.zip");
        assert_eq!(naming.catalog_upstream_id("demoapp"), "demoapp_suite");
    }

    #[test]
    fn test_upstream_id() {
        let naming = PackageNaming::default();
        assert_eq!(
            naming
                .upstream_id_of("demoapp_delta_linux-x64_relpack.1.2.3.zip")
                .as_deref(),
            Some("demoapp_delta_linux-x64_relpack")
        );
        assert_eq!(
            naming.upstream_id_of("demoapp_relpack.zip").as_deref(),
            Some("demoapp_relpack")
        );
        assert_eq!(naming.upstream_id_of("demoapp.tar.gz"), None);
    }

    #[test]
    fn test_parse_round_trip() {
        let naming = PackageNaming::default();
        let version = Version::parse("3.0.1").unwrap();
        let name = naming.release_filename("my-app", false, "linux-arm64", &version);
        let parsed = naming.parse_release_filename(&name).unwrap();
        assert_eq!(
            parsed,
            ReleaseFilename {
                id: "my-app".into(),
                full: false,
                rid: "linux-arm64".into(),
                version,
            }
        );
        assert!(naming.parse_release_filename("my-app_relpack.zip").is_none());
    }

    #[test]
    fn test_invalid_suite() {
        assert!(matches!(PackageNaming::new("a_b"), Err(Error::Config(_))));
        assert!(PackageNaming::new("").is_err());
    }
}
