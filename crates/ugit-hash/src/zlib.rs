//! Zlib compression, one-shot and streaming.
//!
//! Packfiles concatenate independently deflated object records with no
//! length framing, so the streaming inflater must report how many input
//! bytes each stream actually consumed; the next record starts right after.

use std::io::{Read, Write};

use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::{Decompress, FlushDecompress, Status};

pub use flate2::Compression;

use crate::HashError;

/// One-shot zlib deflate.
pub fn deflate(data: &[u8], level: Compression) -> Vec<u8> {
    let mut encoder = ZlibEncoder::new(Vec::with_capacity(data.len() / 2 + 16), level);
    // Writing to a Vec cannot fail.
    encoder.write_all(data).expect("write to Vec");
    encoder.finish().expect("finish to Vec")
}

/// One-shot zlib inflate of a complete stream.
pub fn inflate(data: &[u8]) -> Result<Vec<u8>, HashError> {
    let mut decoder = ZlibDecoder::new(data);
    let mut out = Vec::new();
    decoder
        .read_to_end(&mut out)
        .map_err(|e| HashError::Zlib(e.to_string()))?;
    Ok(out)
}

/// Result of one [`Inflater::push`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InflateStep {
    /// Input bytes consumed by this call.
    pub consumed: usize,
    /// Output bytes produced by this call.
    pub produced: usize,
    /// Whether the zlib stream ended within the consumed input.
    pub done: bool,
}

/// Incremental zlib inflater tolerating arbitrary input chunk boundaries.
pub struct Inflater {
    raw: Decompress,
    finished: bool,
}

impl Inflater {
    pub fn new() -> Self {
        Self {
            raw: Decompress::new(true),
            finished: false,
        }
    }

    /// Feed `input`, appending decompressed bytes to `out`.
    ///
    /// May consume less than the full input: once the stream ends, trailing
    /// bytes are left untouched and `consumed` tells the caller where the
    /// stream boundary fell.
    pub fn push(&mut self, input: &[u8], out: &mut Vec<u8>) -> Result<InflateStep, HashError> {
        if self.finished {
            return Ok(InflateStep {
                consumed: 0,
                produced: 0,
                done: true,
            });
        }

        let in_before = self.raw.total_in();
        let out_before = self.raw.total_out();
        let mut consumed = 0usize;
        let mut produced = 0usize;

        loop {
            let status = self
                .raw
                .decompress_vec(&input[consumed..], out, FlushDecompress::None)
                .map_err(|e| HashError::Zlib(e.to_string()))?;

            consumed = (self.raw.total_in() - in_before) as usize;
            produced = (self.raw.total_out() - out_before) as usize;

            match status {
                Status::StreamEnd => {
                    self.finished = true;
                    break;
                }
                Status::Ok | Status::BufError => {
                    if consumed >= input.len() {
                        break;
                    }
                    // decompress_vec grows the output; BufError with input
                    // remaining means it needs more room.
                    out.reserve(4096);
                }
            }
        }

        Ok(InflateStep {
            consumed,
            produced,
            done: self.finished,
        })
    }

    /// Whether the stream has seen its end marker.
    pub fn is_done(&self) -> bool {
        self.finished
    }
}

impl Default for Inflater {
    fn default() -> Self {
        Self::new()
    }
}

/// Inflate exactly one zlib stream from the head of `data`.
///
/// Returns the decompressed bytes and the number of compressed bytes the
/// stream occupied. Used by the pack reader, where `data` extends past the
/// record into the next object.
pub fn inflate_prefix(data: &[u8], size_hint: usize) -> Result<(Vec<u8>, usize), HashError> {
    let mut inflater = Inflater::new();
    let mut out = Vec::with_capacity(size_hint);
    let step = inflater.push(data, &mut out)?;
    if !step.done {
        return Err(HashError::Zlib("truncated zlib stream".into()));
    }
    Ok((out, step.consumed))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn oneshot_roundtrip() {
        let data = b"hello zlib world, hello zlib world";
        let compressed = deflate(data, Compression::default());
        assert_eq!(inflate(&compressed).unwrap(), data);
    }

    #[test]
    fn inflate_rejects_garbage() {
        assert!(inflate(b"not zlib at all").is_err());
    }

    #[test]
    fn prefix_reports_consumed() {
        let data = b"first object body";
        let mut stream = deflate(data, Compression::default());
        let compressed_len = stream.len();
        stream.extend_from_slice(b"TRAILING NEXT RECORD");

        let (out, consumed) = inflate_prefix(&stream, data.len()).unwrap();
        assert_eq!(out, data);
        assert_eq!(consumed, compressed_len);
    }

    #[test]
    fn streaming_across_chunk_boundaries() {
        let data: Vec<u8> = (0..10_000u32).flat_map(|i| i.to_le_bytes()).collect();
        let compressed = deflate(&data, Compression::best());

        let mut inflater = Inflater::new();
        let mut out = Vec::new();
        let mut fed = 0;
        // Feed in awkward 7-byte chunks.
        while fed < compressed.len() {
            let end = (fed + 7).min(compressed.len());
            let step = inflater.push(&compressed[fed..end], &mut out).unwrap();
            fed += step.consumed;
            if step.done {
                break;
            }
        }
        assert!(inflater.is_done());
        assert_eq!(out, data);
    }

    #[test]
    fn empty_input_roundtrip() {
        let compressed = deflate(b"", Compression::default());
        let (out, consumed) = inflate_prefix(&compressed, 0).unwrap();
        assert!(out.is_empty());
        assert_eq!(consumed, compressed.len());
    }
}
