use std::io::{ErrorKind, Read, Write};

use crate::codec::{DecodeStats, FrameConfig, FrameDecoder};
use crate::error::{FrameError, Result};

const READ_CHUNK_SIZE: usize = 4 * 1024;
const MAX_CHUNKS_PER_POLL: usize = 16;

/// Drains a non-blocking link into parsed JSON objects.
///
/// Each [`FrameReader::poll`] reads whatever is pending right now and
/// returns. A read that would block, or an empty read, ends the poll.
pub struct FrameReader<T> {
    inner: T,
    decoder: FrameDecoder,
}

impl<T: Read> FrameReader<T> {
    /// Create a new frame reader with default configuration.
    pub fn new(inner: T) -> Self {
        Self::with_config(inner, FrameConfig::default())
    }

    /// Create a new frame reader with explicit configuration.
    pub fn with_config(inner: T, config: FrameConfig) -> Self {
        Self {
            inner,
            decoder: FrameDecoder::with_config(config),
        }
    }

    /// Read everything currently available and decode it.
    pub fn poll(&mut self) -> Result<Vec<serde_json::Value>> {
        let mut out = Vec::new();
        let mut chunk = [0u8; READ_CHUNK_SIZE];

        for _ in 0..MAX_CHUNKS_PER_POLL {
            let read = match self.inner.read(&mut chunk) {
                Ok(n) => n,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) if err.kind() == ErrorKind::WouldBlock => break,
                Err(err) => return Err(FrameError::Io(err)),
            };
            if read == 0 {
                break;
            }
            out.extend(self.decoder.feed(&chunk[..read]));
        }

        Ok(out)
    }

    /// Decoder counters.
    pub fn stats(&self) -> &DecodeStats {
        self.decoder.stats()
    }

    /// Borrow the underlying stream.
    pub fn get_ref(&self) -> &T {
        &self.inner
    }

    /// Mutably borrow the underlying stream.
    pub fn get_mut(&mut self) -> &mut T {
        &mut self.inner
    }

    /// Consume the reader and return the inner stream.
    pub fn into_inner(self) -> T {
        self.inner
    }
}

/// Writes pass straight through, so a [`crate::FrameWriter`] can wrap a
/// reader and share one duplex link.
impl<T: Write> Write for FrameReader<T> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.inner.write(buf)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.inner.flush()
    }
}
