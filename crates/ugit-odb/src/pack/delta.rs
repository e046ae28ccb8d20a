//! Delta streams: application, sizing, and a simple producer.
//!
//! A delta is `[source_size][target_size][instructions…]` where both sizes
//! are base-128 varints and each instruction either copies a range out of
//! the base or inserts literal bytes.

use std::collections::HashMap;

use ugit_hash::varint;

use crate::OdbError;

fn invalid(offset: usize, reason: impl Into<String>) -> OdbError {
    OdbError::InvalidDelta {
        offset,
        reason: reason.into(),
    }
}

/// Apply a delta to `base`, producing the target bytes.
///
/// Every copy range is bounds-checked against the base; the declared sizes
/// are enforced on both ends.
pub fn apply(base: &[u8], delta: &[u8]) -> Result<Vec<u8>, OdbError> {
    let (source_size, consumed) =
        varint::read_size(delta).map_err(|_| invalid(0, "truncated source size"))?;
    let mut pos = consumed;
    let (target_size, consumed) = varint::read_size(&delta[pos..])
        .map_err(|_| invalid(pos, "truncated target size"))?;
    pos += consumed;

    if source_size as usize != base.len() {
        return Err(invalid(
            0,
            format!(
                "source size mismatch: delta says {source_size}, base is {}",
                base.len()
            ),
        ));
    }

    let mut out = Vec::with_capacity(target_size as usize);

    while pos < delta.len() {
        let cmd = delta[pos];
        pos += 1;

        if cmd & 0x80 != 0 {
            // Copy: offset and size bytes are present per flag bit.
            let mut offset: usize = 0;
            let mut size: usize = 0;
            for (bit, shift) in [(0x01u8, 0u32), (0x02, 8), (0x04, 16), (0x08, 24)] {
                if cmd & bit != 0 {
                    let b = *delta
                        .get(pos)
                        .ok_or_else(|| invalid(pos, "truncated copy offset"))?;
                    offset |= (b as usize) << shift;
                    pos += 1;
                }
            }
            for (bit, shift) in [(0x10u8, 0u32), (0x20, 8), (0x40, 16)] {
                if cmd & bit != 0 {
                    let b = *delta
                        .get(pos)
                        .ok_or_else(|| invalid(pos, "truncated copy size"))?;
                    size |= (b as usize) << shift;
                    pos += 1;
                }
            }
            if size == 0 {
                size = 0x10000;
            }
            if offset + size > base.len() {
                return Err(invalid(
                    pos,
                    format!(
                        "copy out of bounds: offset={offset}, size={size}, base={}",
                        base.len()
                    ),
                ));
            }
            out.extend_from_slice(&base[offset..offset + size]);
        } else if cmd != 0 {
            // Insert `cmd` literal bytes.
            let n = cmd as usize;
            if pos + n > delta.len() {
                return Err(invalid(pos, "truncated insert data"));
            }
            out.extend_from_slice(&delta[pos..pos + n]);
            pos += n;
        } else {
            return Err(invalid(pos - 1, "reserved delta opcode 0"));
        }
    }

    if out.len() != target_size as usize {
        return Err(invalid(
            0,
            format!(
                "target size mismatch: delta says {target_size}, got {}",
                out.len()
            ),
        ));
    }
    Ok(out)
}

/// Read just the `(source_size, target_size)` header of a delta stream.
///
/// Size-only object reads walk chains through this instead of applying
/// anything.
pub fn read_sizes(delta: &[u8]) -> Result<(u64, u64), OdbError> {
    let (source, consumed) =
        varint::read_size(delta).map_err(|_| invalid(0, "truncated source size"))?;
    let (target, _) = varint::read_size(&delta[consumed..])
        .map_err(|_| invalid(consumed, "truncated target size"))?;
    Ok((source, target))
}

const BLOCK: usize = 16;
const MIN_COPY: usize = 4;

/// Produce a delta transforming `base` into `target`.
///
/// Greedy block matching: index the base in fixed-size blocks, then walk the
/// target extending matches forward. Always yields a correct delta; callers
/// decide whether it is small enough to be worth storing.
pub fn compute(base: &[u8], target: &[u8]) -> Vec<u8> {
    let mut delta = Vec::new();
    delta.extend_from_slice(&varint::write_size(base.len() as u64));
    delta.extend_from_slice(&varint::write_size(target.len() as u64));

    let mut block_index: HashMap<&[u8], usize> = HashMap::new();
    if base.len() >= BLOCK {
        for start in (0..=base.len() - BLOCK).step_by(BLOCK) {
            block_index.entry(&base[start..start + BLOCK]).or_insert(start);
        }
    }

    let mut literal: Vec<u8> = Vec::new();
    let mut pos = 0;
    while pos < target.len() {
        let candidate = if pos + BLOCK <= target.len() {
            block_index.get(&target[pos..pos + BLOCK]).copied()
        } else {
            None
        };

        match candidate {
            Some(base_start) => {
                // Extend the match as far as it goes.
                let mut len = BLOCK;
                while base_start + len < base.len()
                    && pos + len < target.len()
                    && base[base_start + len] == target[pos + len]
                {
                    len += 1;
                }
                if len >= MIN_COPY {
                    flush_insert(&mut delta, &mut literal);
                    emit_copy(&mut delta, base_start, len);
                    pos += len;
                } else {
                    literal.push(target[pos]);
                    pos += 1;
                }
            }
            None => {
                literal.push(target[pos]);
                pos += 1;
            }
        }
    }
    flush_insert(&mut delta, &mut literal);
    delta
}

fn flush_insert(delta: &mut Vec<u8>, literal: &mut Vec<u8>) {
    for chunk in literal.chunks(127) {
        delta.push(chunk.len() as u8);
        delta.extend_from_slice(chunk);
    }
    literal.clear();
}

fn emit_copy(delta: &mut Vec<u8>, offset: usize, size: usize) {
    let mut remaining = size;
    let mut off = offset;
    while remaining > 0 {
        let chunk = remaining.min(0x10000);
        let mut cmd = 0x80u8;
        let mut args = Vec::with_capacity(7);
        for (i, bit) in [(0u32, 0x01u8), (8, 0x02), (16, 0x04), (24, 0x08)] {
            let byte = ((off >> i) & 0xff) as u8;
            if byte != 0 {
                cmd |= bit;
                args.push(byte);
            }
        }
        // size of 0x10000 is encoded as zero size bytes
        if chunk != 0x10000 {
            for (i, bit) in [(0u32, 0x10u8), (8, 0x20), (16, 0x40)] {
                let byte = ((chunk >> i) & 0xff) as u8;
                if byte != 0 {
                    cmd |= bit;
                    args.push(byte);
                }
            }
        }
        delta.push(cmd);
        delta.extend_from_slice(&args);
        off += chunk;
        remaining -= chunk;
    }
}
