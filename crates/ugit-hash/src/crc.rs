//! CRC32 as stored in pack index files (big-endian 32-bit).

/// Streaming CRC32 over the raw bytes of a packed object record.
#[derive(Default)]
pub struct Crc32 {
    inner: crc32fast::Hasher,
}

impl Crc32 {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, data: &[u8]) {
        self.inner.update(data);
    }

    pub fn finalize(self) -> u32 {
        self.inner.finalize()
    }

    /// One-shot CRC32.
    pub fn digest(data: &[u8]) -> u32 {
        crc32fast::hash(data)
    }
}
