// src/hash.rs

//! SHA-256 fingerprints for files and packages
//!
//! Every file in a release and every package on the feed is identified by a
//! [`Checksum`]: the lowercase hex SHA-256 of its content plus its byte
//! length. Comparing both catches truncation even before hashing finishes.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

/// Read buffer for streaming hashes (64 KB)
const HASH_BUFFER_SIZE: usize = 64 * 1024;

/// Content fingerprint: SHA-256 hex digest and byte length
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Checksum {
    pub hash: String,
    pub length: u64,
}

impl Checksum {
    /// Fingerprint an in-memory buffer
    pub fn of_bytes(data: &[u8]) -> Self {
        Self {
            hash: sha256(data),
            length: data.len() as u64,
        }
    }

    /// Fingerprint a file by streaming it
    pub fn of_file(path: &Path) -> Result<Self> {
        let mut file = File::open(path)
            .map_err(|e| Error::IoError(format!("Failed to open {}: {e}", path.display())))?;
        let (hash, length) = hash_reader(&mut file)
            .map_err(|e| Error::IoError(format!("Failed to read {}: {e}", path.display())))?;
        Ok(Self { hash, length })
    }

    /// Check that `data` matches this fingerprint
    ///
    /// `subject` names the file or package in the error.
    pub fn verify(&self, subject: &str, data: &[u8]) -> Result<()> {
        let actual = Self::of_bytes(data);
        if actual.length != self.length {
            return Err(Error::ChecksumMismatch {
                subject: subject.to_string(),
                expected: format!("{} bytes", self.length),
                actual: format!("{} bytes", actual.length),
            });
        }
        if !actual.hash.eq_ignore_ascii_case(&self.hash) {
            return Err(Error::ChecksumMismatch {
                subject: subject.to_string(),
                expected: self.hash.clone(),
                actual: actual.hash,
            });
        }
        Ok(())
    }

    /// First eight hex characters, for log lines
    pub fn short(&self) -> &str {
        &self.hash[..self.hash.len().min(8)]
    }
}

impl fmt::Display for Checksum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sha256:{} ({} bytes)", self.hash, self.length)
    }
}

/// Compute the SHA-256 hex digest of a byte slice
#[inline]
pub fn sha256(data: &[u8]) -> String {
    format!("{:x}", Sha256::digest(data))
}

/// Compute the SHA-256 hex digest and length of a reader's content
pub fn hash_reader<R: Read>(reader: &mut R) -> io::Result<(String, u64)> {
    let mut hasher = Sha256::new();
    let mut buffer = vec![0u8; HASH_BUFFER_SIZE];
    let mut length = 0u64;

    loop {
        let n = reader.read(&mut buffer)?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
        length += n as u64;
    }

    Ok((format!("{:x}", hasher.finalize()), length))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_sha256_known_value() {
        assert_eq!(
            sha256(b"hello world"),
            "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"
        );
    }

    #[test]
    fn test_checksum_of_empty() {
        let checksum = Checksum::of_bytes(b"");
        assert_eq!(checksum.length, 0);
        assert_eq!(
            checksum.hash,
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn test_hash_reader_matches_bytes() {
        let data = vec![7u8; HASH_BUFFER_SIZE * 2 + 13];
        let mut cursor = std::io::Cursor::new(&data);
        let (hash, length) = hash_reader(&mut cursor).unwrap();
        assert_eq!(hash, sha256(&data));
        assert_eq!(length, data.len() as u64);
    }

    #[test]
    fn test_checksum_of_file() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("file.bin");
        std::fs::write(&path, b"Hello, World!").unwrap();

        let checksum = Checksum::of_file(&path).unwrap();
        assert_eq!(checksum, Checksum::of_bytes(b"Hello, World!"));
    }

    #[test]
    fn test_verify_detects_length_and_hash() {
        let checksum = Checksum::of_bytes(b"abc");
        assert!(checksum.verify("x", b"abc").is_ok());
        assert!(matches!(
            checksum.verify("x", b"abcd"),
            Err(Error::ChecksumMismatch { .. })
        ));
        assert!(matches!(
            checksum.verify("x", b"abd"),
            Err(Error::ChecksumMismatch { .. })
        ));
    }

    #[test]
    fn test_verify_case_insensitive() {
        let mut checksum = Checksum::of_bytes(b"test");
        checksum.hash = checksum.hash.to_uppercase();
        assert!(checksum.verify("x", b"test").is_ok());
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let err = Checksum::of_file(Path::new("/nonexistent/relpack")).unwrap_err();
        assert!(matches!(err, Error::IoError(_)));
    }
}
