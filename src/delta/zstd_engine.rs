// src/delta/zstd_engine.rs

//! Patch engine using zstd dictionary compression
//!
//! The older file is loaded as a zstd dictionary and the newer file is
//! compressed against it, so unchanged regions cost almost nothing:
//! ```text
//! patch = tag | mode | zstd_compress(newer, dictionary = older)
//! ```
//! An empty older file has no dictionary; those patches use plain frames
//! (`mode = 0`). Both directions cross into libzstd through the `zstd` crate.

use super::{DeltaPatchEngine, ZSTD_TAG, split_tag};
use crate::error::{Error, Result};
use std::io::{Read, Write};

/// Default zstd compression level (3 = fast, good compression)
const COMPRESSION_LEVEL: i32 = 3;

const MODE_PLAIN: u8 = 0;
const MODE_DICTIONARY: u8 = 1;

/// zstd dictionary-compression patch engine
#[derive(Debug, Clone, Copy)]
pub struct ZstdPatchEngine {
    level: i32,
}

impl ZstdPatchEngine {
    pub fn new() -> Self {
        Self {
            level: COMPRESSION_LEVEL,
        }
    }

    pub fn with_level(level: i32) -> Self {
        Self { level }
    }

    /// Compress data using dictionary compression
    fn compress_with_dictionary(&self, data: &[u8], dictionary: &[u8]) -> Result<Vec<u8>> {
        // Create encoder dictionary from old version (copied for 'static lifetime)
        let encoder_dict = zstd::dict::EncoderDictionary::copy(dictionary, self.level);

        let mut encoder = zstd::Encoder::with_prepared_dictionary(Vec::new(), &encoder_dict)
            .map_err(|e| Error::DeltaError(format!("Failed to create encoder: {}", e)))?;

        encoder
            .write_all(data)
            .map_err(|e| Error::DeltaError(format!("Failed to write data: {}", e)))?;

        encoder
            .finish()
            .map_err(|e| Error::DeltaError(format!("Failed to finish compression: {}", e)))
    }

    /// Decompress data using dictionary decompression
    fn decompress_with_dictionary(&self, compressed: &[u8], dictionary: &[u8]) -> Result<Vec<u8>> {
        let decoder_dict = zstd::dict::DecoderDictionary::copy(dictionary);

        let mut decoder = zstd::Decoder::with_prepared_dictionary(compressed, &decoder_dict)
            .map_err(|e| Error::DeltaError(format!("Failed to create decoder: {}", e)))?;

        let mut decompressed = Vec::new();
        decoder
            .read_to_end(&mut decompressed)
            .map_err(|e| Error::DeltaError(format!("Failed to read decompressed data: {}", e)))?;

        Ok(decompressed)
    }
}

impl Default for ZstdPatchEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl DeltaPatchEngine for ZstdPatchEngine {
    fn name(&self) -> &'static str {
        "zstd"
    }

    fn diff(&self, older: &[u8], newer: &[u8]) -> Result<Vec<u8>> {
        let (mode, body) = if older.is_empty() {
            let body = zstd::stream::encode_all(newer, self.level)
                .map_err(|e| Error::DeltaError(format!("Failed to compress: {}", e)))?;
            (MODE_PLAIN, body)
        } else {
            (MODE_DICTIONARY, self.compress_with_dictionary(newer, older)?)
        };

        let mut patch = Vec::with_capacity(body.len() + 2);
        patch.push(ZSTD_TAG);
        patch.push(mode);
        patch.extend_from_slice(&body);
        Ok(patch)
    }

    fn patch(&self, older: &[u8], patch: &[u8]) -> Result<Vec<u8>> {
        let rest = split_tag(patch, ZSTD_TAG, self.name())?;
        let (&mode, body) = rest
            .split_first()
            .ok_or_else(|| Error::DeltaError("zstd patch is missing its mode byte".to_string()))?;

        match mode {
            MODE_PLAIN if older.is_empty() => zstd::stream::decode_all(body)
                .map_err(|e| Error::DeltaError(format!("Failed to decompress: {}", e))),
            MODE_DICTIONARY if !older.is_empty() => self.decompress_with_dictionary(body, older),
            _ => Err(Error::DeltaError(format!(
                "zstd patch mode {} does not fit a {}-byte base",
                mode,
                older.len()
            ))),
        }
    }
}
