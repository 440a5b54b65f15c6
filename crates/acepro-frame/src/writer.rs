use std::io::{ErrorKind, Write};

use bytes::{Buf, BytesMut};
use serde::Serialize;
use tracing::trace;

use crate::codec::{encode_frame, FrameConfig, HEADER_SIZE, TRAILER_SIZE};
use crate::error::{FrameError, Result};

const INITIAL_BUFFER_CAPACITY: usize = 1024;

/// Encoded bytes allowed to wait on a link that stopped accepting writes.
pub const MAX_PENDING_BYTES: usize = 64 * 1024;

/// Writes complete frames to any `Write` link without blocking.
///
/// A write that would block leaves the unsent tail buffered; the next
/// [`FrameWriter::send`] or [`FrameWriter::write_pending`] continues it.
/// Frames always leave in the order they were sent.
pub struct FrameWriter<T> {
    inner: T,
    buf: BytesMut,
    config: FrameConfig,
}

impl<T: Write> FrameWriter<T> {
    /// Create a new frame writer with default configuration.
    pub fn new(inner: T) -> Self {
        Self::with_config(inner, FrameConfig::default())
    }

    /// Create a new frame writer with explicit configuration.
    pub fn with_config(inner: T, config: FrameConfig) -> Self {
        Self {
            inner,
            buf: BytesMut::with_capacity(INITIAL_BUFFER_CAPACITY),
            config,
        }
    }

    /// Serialize `message` to JSON and send it as one frame.
    pub fn send<M: Serialize + ?Sized>(&mut self, message: &M) -> Result<()> {
        let payload = serde_json::to_vec(message)?;
        self.send_payload(&payload)
    }

    /// Frame a raw payload and write as much as the link takes right now.
    pub fn send_payload(&mut self, payload: &[u8]) -> Result<()> {
        if payload.len() > self.config.max_payload_size {
            return Err(FrameError::PayloadTooLarge {
                size: payload.len(),
                max: self.config.max_payload_size,
            });
        }
        if self.buf.len() + HEADER_SIZE + payload.len() + TRAILER_SIZE > MAX_PENDING_BYTES {
            return Err(FrameError::Io(std::io::Error::new(
                ErrorKind::WouldBlock,
                format!("{} bytes still waiting for the link", self.buf.len()),
            )));
        }

        encode_frame(payload, &mut self.buf)?;
        self.write_pending()?;
        Ok(())
    }

    /// Write buffered bytes until the link would block.
    ///
    /// Returns `true` once nothing is left to send.
    pub fn write_pending(&mut self) -> Result<bool> {
        while !self.buf.is_empty() {
            match self.inner.write(&self.buf) {
                Ok(0) => return Err(FrameError::ConnectionClosed),
                Ok(n) => self.buf.advance(n),
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) if err.kind() == ErrorKind::WouldBlock => {
                    trace!(pending = self.buf.len(), "link would block");
                    return Ok(false);
                }
                Err(err) => return Err(FrameError::Io(err)),
            }
        }

        self.flush()?;
        Ok(true)
    }

    /// Bytes accepted by [`FrameWriter::send`] but not yet written.
    pub fn pending(&self) -> usize {
        self.buf.len()
    }

    /// Flush the underlying link.
    pub fn flush(&mut self) -> Result<()> {
        loop {
            match self.inner.flush() {
                Ok(()) => return Ok(()),
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(FrameError::Io(err)),
            }
        }
    }

    /// Borrow the underlying link.
    pub fn get_ref(&self) -> &T {
        &self.inner
    }

    /// Mutably borrow the underlying link.
    pub fn get_mut(&mut self) -> &mut T {
        &mut self.inner
    }

    /// Consume the writer and return the inner link.
    pub fn into_inner(self) -> T {
        self.inner
    }
}
