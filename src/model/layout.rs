// src/model/layout.rs

//! Archive layout: the two logical roots of a release package
//!
//! Target paths are archive-relative and always start with one of the root
//! prefixes. At install time the application root maps next to the launcher
//! and the assets root maps into a per-version directory.

use crate::error::{Error, Result};
use semver::Version;
use std::fmt;
use std::path::{Path, PathBuf};

/// Logical root of a target path
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArchiveRoot {
    /// Executable-adjacent application files (the artifacts directory)
    App,
    /// Operator supplied support files, installed per version
    Assets,
}

impl ArchiveRoot {
    pub const fn prefix(&self) -> &'static str {
        match self {
            Self::App => "app/",
            Self::Assets => "assets/",
        }
    }

    /// Split a target path into its root and the root-relative remainder
    pub fn split(target_path: &str) -> Result<(Self, &str)> {
        for root in [Self::App, Self::Assets] {
            if let Some(rest) = target_path.strip_prefix(root.prefix()) {
                if !rest.is_empty() {
                    return Ok((root, rest));
                }
            }
        }
        Err(Error::Validation(format!(
            "target path '{target_path}' is outside the app/ and assets/ roots"
        )))
    }

    /// Build a target path from a root-relative path
    pub fn target_path(&self, relative: &str) -> String {
        format!("{}{}", self.prefix(), relative.trim_start_matches('/'))
    }
}

impl fmt::Display for ArchiveRoot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.prefix().trim_end_matches('/'))
    }
}

/// On-disk install location of a target path
pub fn install_path(install_dir: &Path, version: &Version, target_path: &str) -> Result<PathBuf> {
    let (root, rest) = ArchiveRoot::split(target_path)?;
    if rest.split('/').any(|part| part == ".." || part == ".") {
        return Err(Error::Validation(format!(
            "target path '{target_path}' escapes its root"
        )));
    }
    let base = match root {
        ArchiveRoot::App => install_dir.to_path_buf(),
        ArchiveRoot::Assets => install_dir.join(format!("assets-{version}")),
    };
    Ok(rest.split('/').fold(base, |path, part| path.join(part)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split() {
        assert_eq!(
            ArchiveRoot::split("app/bin/demo").unwrap(),
            (ArchiveRoot::App, "bin/demo")
        );
        assert_eq!(
            ArchiveRoot::split("assets/icon.png").unwrap(),
            (ArchiveRoot::Assets, "icon.png")
        );
        assert!(ArchiveRoot::split("lib/demo").is_err());
        assert!(ArchiveRoot::split("app/").is_err());
    }

    #[test]
    fn test_install_path() {
        let dir = Path::new("/opt/demo");
        let version = Version::new(1, 2, 3);
        assert_eq!(
            install_path(dir, &version, "app/bin/demo").unwrap(),
            PathBuf::from("/opt/demo/bin/demo")
        );
        assert_eq!(
            install_path(dir, &version, "assets/icon.png").unwrap(),
            PathBuf::from("/opt/demo/assets-1.2.3/icon.png")
        );
        assert!(install_path(dir, &version, "app/../etc/passwd").is_err());
    }
}
