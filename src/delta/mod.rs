// src/delta/mod.rs

//! Binary diff/patch for delta packages
//!
//! Every engine honours one law: `patch(older, diff(older, newer)) == newer`
//! for arbitrary bytes, empty buffers included. Packing never trusts that law
//! blindly: [`diff_verified`] re-applies each patch and compares hashes, and
//! any failure aborts the entire delta build.
//!
//! # Engines
//!
//! - **ZstdPatchEngine**: zstd dictionary compression with the older file as
//!   dictionary (native libzstd through the `zstd` crate; default)
//! - **BlockCopyEngine**: pure-Rust block copy/insert encoder (fallback)
//!
//! Patches start with a one-byte engine tag so a patch is never applied by
//! the wrong engine.

mod block;
mod metrics;
mod zstd_engine;

pub use block::BlockCopyEngine;
pub use metrics::{DeltaMetrics, DeltaTotals, MAX_DELTA_RATIO};
pub use zstd_engine::ZstdPatchEngine;

use crate::error::{Error, Result};
use crate::hash::sha256;
use std::sync::Arc;

pub(crate) const ZSTD_TAG: u8 = b'Z';
pub(crate) const BLOCK_TAG: u8 = b'B';

/// Binary diff/patch contract
pub trait DeltaPatchEngine: Send + Sync {
    /// Short engine name for logs and configuration
    fn name(&self) -> &'static str;

    /// Produce a patch turning `older` into `newer`
    fn diff(&self, older: &[u8], newer: &[u8]) -> Result<Vec<u8>>;

    /// Reconstruct `newer` from `older` and a patch made by [`Self::diff`]
    fn patch(&self, older: &[u8], patch: &[u8]) -> Result<Vec<u8>>;
}

/// Resolve an engine by its configured name
pub fn engine_by_name(name: &str) -> Result<Arc<dyn DeltaPatchEngine>> {
    match name {
        "zstd" => Ok(Arc::new(ZstdPatchEngine::new())),
        "block" => Ok(Arc::new(BlockCopyEngine::new())),
        other => Err(Error::Config(format!("unknown delta engine '{other}'"))),
    }
}

/// Resolve the engine that produced a patch from its tag byte
///
/// Rebuilds use this instead of the configured engine, so packages made with
/// either engine stay restorable.
pub fn engine_for_patch(patch: &[u8]) -> Result<Arc<dyn DeltaPatchEngine>> {
    match patch.first() {
        Some(&ZSTD_TAG) => Ok(Arc::new(ZstdPatchEngine::new())),
        Some(&BLOCK_TAG) => Ok(Arc::new(BlockCopyEngine::new())),
        Some(other) => Err(Error::DeltaError(format!("unknown patch tag 0x{other:02x}"))),
        None => Err(Error::DeltaError("empty patch".to_string())),
    }
}

/// Check the engine tag and return the patch body
pub(crate) fn split_tag<'a>(patch: &'a [u8], tag: u8, engine: &str) -> Result<&'a [u8]> {
    match patch.split_first() {
        Some((&first, body)) if first == tag => Ok(body),
        Some((&first, _)) => Err(Error::DeltaError(format!(
            "patch tag 0x{first:02x} was not produced by the {engine} engine"
        ))),
        None => Err(Error::DeltaError("empty patch".to_string())),
    }
}

/// Diff, then prove the patch reconstructs `newer` exactly
pub fn diff_verified(
    engine: &dyn DeltaPatchEngine,
    target_path: &str,
    older: &[u8],
    newer: &[u8],
) -> Result<(Vec<u8>, DeltaMetrics)> {
    let patch = engine
        .diff(older, newer)
        .map_err(|e| Error::DeltaError(format!("{target_path}: {e}")))?;

    let rebuilt = engine
        .patch(older, &patch)
        .map_err(|e| Error::Integrity(format!("{target_path}: patch does not apply: {e}")))?;

    if rebuilt.len() != newer.len() || sha256(&rebuilt) != sha256(newer) {
        return Err(Error::Integrity(format!(
            "{target_path}: {} patch round-trip produced different bytes",
            engine.name()
        )));
    }

    let metrics = DeltaMetrics::new(older.len() as u64, newer.len() as u64, patch.len() as u64);
    Ok((patch, metrics))
}
