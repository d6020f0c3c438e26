// src/checksum/changeset.rs

//! Changeset computation between two checksum indexes
//!
//! Every path of `previous ∪ current` is classified exactly once:
//!
//! | in previous | in current | same checksum | bucket     |
//! |-------------|------------|---------------|------------|
//! | no          | yes        | -             | New        |
//! | yes         | yes        | no            | Modified   |
//! | yes         | yes        | yes           | Unmodified |
//! | yes         | no         | -             | Deleted    |
//!
//! Paths matching the never-diff allowlist that exist in both indexes are
//! always Modified and are shipped as full bytes, never as patches.

use super::ChecksumIndex;
use crate::error::{Error, Result};
use crate::model::{ChangeEntry, ChangeKind};
use glob::Pattern;
use std::collections::{BTreeSet, HashSet};
use std::fmt;

/// Operator-configured glob patterns for files that must never be patched
#[derive(Debug, Clone, Default)]
pub struct NeverDiff {
    patterns: Vec<Pattern>,
}

impl NeverDiff {
    /// Compile the allowlist; an invalid pattern is a configuration error
    pub fn new(patterns: &[String]) -> Result<Self> {
        let patterns = patterns
            .iter()
            .map(|p| {
                Pattern::new(p)
                    .map_err(|e| Error::Config(format!("invalid never-diff pattern '{p}': {e}")))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { patterns })
    }

    pub fn none() -> Self {
        Self::default()
    }

    pub fn matches(&self, target_path: &str) -> bool {
        self.patterns.iter().any(|p| p.matches(target_path))
    }
}

/// Bucket sizes, for summaries
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChangeCounts {
    pub new: usize,
    pub modified: usize,
    pub unmodified: usize,
    pub deleted: usize,
}

impl fmt::Display for ChangeCounts {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} new, {} modified, {} unmodified, {} deleted",
            self.new, self.modified, self.unmodified, self.deleted
        )
    }
}

/// Classification of every path between two successive releases
#[derive(Debug, Clone, Default)]
pub struct Changeset {
    entries: Vec<ChangeEntry>,
    /// Modified paths that must be shipped raw
    forced_full: HashSet<String>,
}

impl Changeset {
    /// Compare two indexes in lexicographic path order
    pub fn compute(
        previous: &ChecksumIndex,
        current: &ChecksumIndex,
        never_diff: &NeverDiff,
    ) -> Self {
        let paths: BTreeSet<&str> = previous.paths().chain(current.paths()).collect();
        let mut entries = Vec::with_capacity(paths.len());
        let mut forced_full = HashSet::new();

        for path in paths {
            let kind = match (previous.get(path), current.get(path)) {
                (None, Some(_)) => ChangeKind::New,
                (Some(_), None) => ChangeKind::Deleted,
                (Some(_), Some(_)) if never_diff.matches(path) => {
                    forced_full.insert(path.to_string());
                    ChangeKind::Modified
                }
                (Some(old), Some(new)) if old == new => ChangeKind::Unmodified,
                (Some(_), Some(_)) => ChangeKind::Modified,
                (None, None) => continue,
            };
            entries.push(ChangeEntry {
                target_path: path.to_string(),
                kind,
            });
        }

        Self {
            entries,
            forced_full,
        }
    }

    /// Tagged entries in lexicographic path order
    pub fn entries(&self) -> &[ChangeEntry] {
        &self.entries
    }

    pub fn into_entries(self) -> Vec<ChangeEntry> {
        self.entries
    }

    pub fn kind_of(&self, target_path: &str) -> Option<ChangeKind> {
        self.entries
            .binary_search_by(|e| e.target_path.as_str().cmp(target_path))
            .ok()
            .map(|i| self.entries[i].kind)
    }

    /// Whether a Modified path must be shipped as full bytes
    pub fn is_forced_full(&self, target_path: &str) -> bool {
        self.forced_full.contains(target_path)
    }

    fn paths_of(&self, kind: ChangeKind) -> Vec<&str> {
        self.entries
            .iter()
            .filter(|e| e.kind == kind)
            .map(|e| e.target_path.as_str())
            .collect()
    }

    pub fn new_files(&self) -> Vec<&str> {
        self.paths_of(ChangeKind::New)
    }

    pub fn modified_files(&self) -> Vec<&str> {
        self.paths_of(ChangeKind::Modified)
    }

    pub fn unmodified_files(&self) -> Vec<&str> {
        self.paths_of(ChangeKind::Unmodified)
    }

    pub fn deleted_files(&self) -> Vec<&str> {
        self.paths_of(ChangeKind::Deleted)
    }

    pub fn counts(&self) -> ChangeCounts {
        let mut counts = ChangeCounts::default();
        for entry in &self.entries {
            match entry.kind {
                ChangeKind::New => counts.new += 1,
                ChangeKind::Modified => counts.modified += 1,
                ChangeKind::Unmodified => counts.unmodified += 1,
                ChangeKind::Deleted => counts.deleted += 1,
            }
        }
        counts
    }

    /// True when the new version ships exactly the previous bytes
    pub fn is_empty_change(&self) -> bool {
        self.entries
            .iter()
            .all(|e| e.kind == ChangeKind::Unmodified)
    }
}
