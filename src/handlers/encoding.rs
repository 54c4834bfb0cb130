//! Gzip helpers for preview responses.

use std::io::{self, Write};

use bytes::Bytes;
use flate2::write::GzEncoder;
use flate2::Compression;

/// Compresses a complete body in one shot.
pub fn gzip_bytes(data: &[u8]) -> io::Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::best());
    encoder.write_all(data)?;
    encoder.finish()
}

/// Incremental gzip encoder for the update stream: every frame is flushed
/// so the client can decompress it without waiting for the stream to end.
pub struct FrameEncoder {
    inner: GzEncoder<Vec<u8>>,
}

impl FrameEncoder {
    pub fn new() -> Self {
        Self {
            inner: GzEncoder::new(Vec::new(), Compression::best()),
        }
    }

    /// Compresses one frame and returns the bytes ready to go on the wire.
    pub fn encode(&mut self, frame: &[u8]) -> io::Result<Bytes> {
        self.inner.write_all(frame)?;
        self.inner.flush()?;
        let buffer = self.inner.get_mut();
        let chunk = Bytes::copy_from_slice(buffer);
        buffer.clear();
        Ok(chunk)
    }

    /// Ends the gzip member, returning the trailer bytes.
    pub fn finish(self) -> io::Result<Bytes> {
        self.inner.finish().map(Bytes::from)
    }
}

impl Default for FrameEncoder {
    fn default() -> Self {
        Self::new()
    }
}
