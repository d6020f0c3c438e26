// src/delta/block.rs

//! Pure-Rust copy/insert patch engine
//!
//! Fallback for hosts where libzstd is unavailable. The older file is cut
//! into fixed blocks; the newer file is scanned for block matches, which are
//! extended forward as far as the bytes agree. Format after the tag:
//!
//! ```text
//! varint(newer_len) { 0x00 varint(offset) varint(len) | 0x01 varint(len) bytes }*
//! ```

use super::{BLOCK_TAG, DeltaPatchEngine, split_tag};
use crate::error::{Error, Result};
use std::collections::HashMap;

/// Match granularity in bytes
const BLOCK_SIZE: usize = 32;

const OP_COPY: u8 = 0x00;
const OP_INSERT: u8 = 0x01;

/// Block-matching copy/insert engine
#[derive(Debug, Clone, Copy, Default)]
pub struct BlockCopyEngine;

impl BlockCopyEngine {
    pub fn new() -> Self {
        Self
    }
}

fn write_varint(out: &mut Vec<u8>, mut value: u64) {
    loop {
        let byte = (value & 0x7f) as u8;
        value >>= 7;
        if value == 0 {
            out.push(byte);
            return;
        }
        out.push(byte | 0x80);
    }
}

fn read_varint(input: &[u8], pos: &mut usize) -> Result<u64> {
    let mut value = 0u64;
    for shift in (0..64).step_by(7) {
        let byte = *input
            .get(*pos)
            .ok_or_else(|| Error::DeltaError("truncated varint in block patch".to_string()))?;
        *pos += 1;
        value |= u64::from(byte & 0x7f) << shift;
        if byte & 0x80 == 0 {
            return Ok(value);
        }
    }
    Err(Error::DeltaError("varint overflow in block patch".to_string()))
}

fn read_usize(input: &[u8], pos: &mut usize) -> Result<usize> {
    usize::try_from(read_varint(input, pos)?)
        .map_err(|_| Error::DeltaError("block patch length exceeds address space".to_string()))
}

fn emit_insert(out: &mut Vec<u8>, literal: &[u8]) {
    if literal.is_empty() {
        return;
    }
    out.push(OP_INSERT);
    write_varint(out, literal.len() as u64);
    out.extend_from_slice(literal);
}

impl DeltaPatchEngine for BlockCopyEngine {
    fn name(&self) -> &'static str {
        "block"
    }

    fn diff(&self, older: &[u8], newer: &[u8]) -> Result<Vec<u8>> {
        let mut blocks: HashMap<&[u8], usize> = HashMap::new();
        for (i, block) in older.chunks_exact(BLOCK_SIZE).enumerate() {
            blocks.entry(block).or_insert(i * BLOCK_SIZE);
        }

        let mut out = vec![BLOCK_TAG];
        write_varint(&mut out, newer.len() as u64);

        let mut pos = 0;
        let mut literal_start = 0;
        while pos + BLOCK_SIZE <= newer.len() {
            let Some(&offset) = blocks.get(&newer[pos..pos + BLOCK_SIZE]) else {
                pos += 1;
                continue;
            };

            let mut len = BLOCK_SIZE;
            while offset + len < older.len()
                && pos + len < newer.len()
                && older[offset + len] == newer[pos + len]
            {
                len += 1;
            }

            emit_insert(&mut out, &newer[literal_start..pos]);
            out.push(OP_COPY);
            write_varint(&mut out, offset as u64);
            write_varint(&mut out, len as u64);

            pos += len;
            literal_start = pos;
        }
        emit_insert(&mut out, &newer[literal_start..]);

        Ok(out)
    }

    fn patch(&self, older: &[u8], patch: &[u8]) -> Result<Vec<u8>> {
        let body = split_tag(patch, BLOCK_TAG, self.name())?;
        let mut pos = 0;
        let expected_len = read_usize(body, &mut pos)?;
        let mut out = Vec::with_capacity(expected_len);

        while pos < body.len() {
            let op = body[pos];
            pos += 1;
            match op {
                OP_COPY => {
                    let offset = read_usize(body, &mut pos)?;
                    let len = read_usize(body, &mut pos)?;
                    let end = offset
                        .checked_add(len)
                        .filter(|&end| end <= older.len())
                        .ok_or_else(|| {
                            Error::DeltaError(format!(
                                "copy {offset}+{len} outside {}-byte base",
                                older.len()
                            ))
                        })?;
                    out.extend_from_slice(&older[offset..end]);
                }
                OP_INSERT => {
                    let len = read_usize(body, &mut pos)?;
                    let end = pos
                        .checked_add(len)
                        .filter(|&end| end <= body.len())
                        .ok_or_else(|| Error::DeltaError("truncated insert".to_string()))?;
                    out.extend_from_slice(&body[pos..end]);
                    pos = end;
                }
                other => {
                    return Err(Error::DeltaError(format!(
                        "unknown block patch op 0x{other:02x}"
                    )));
                }
            }
        }

        if out.len() != expected_len {
            return Err(Error::DeltaError(format!(
                "block patch produced {} bytes, expected {}",
                out.len(),
                expected_len
            )));
        }
        Ok(out)
    }
}
