//! Object identity and byte-level encodings for the ugit portable git core.
//!
//! Provides the `ObjectId` type, streaming SHA-1/SHA-256 hashing, hex
//! conversion, CRC32, zlib compression, and the variable-length integer
//! encodings used by packfiles.

mod algorithm;
mod error;
pub mod crc;
pub mod hasher;
pub mod hex;
mod oid;
pub mod varint;
pub mod zlib;

pub use algorithm::HashAlgorithm;
pub use error::HashError;
pub use oid::ObjectId;
