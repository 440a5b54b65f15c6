use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::Serialize;
use tracing::{trace, warn};

use crate::crc::crc16;
use crate::error::{FrameError, Result};

/// Frame header: marker (2) + length (2) = 4 bytes.
pub const HEADER_SIZE: usize = 4;

/// Frame trailer: CRC16 (2) + terminator (1) = 3 bytes.
pub const TRAILER_SIZE: usize = 3;

/// Start-of-frame marker.
pub const MAGIC: [u8; 2] = [0xFF, 0xAA];

/// End-of-frame byte.
pub const TERMINATOR: u8 = 0xFE;

/// Default maximum accepted payload: 16 KiB.
pub const DEFAULT_MAX_PAYLOAD: usize = 16 * 1024;

/// Encode a payload into the wire format.
///
/// Wire format:
/// ```text
/// ┌────────────┬──────────┬───────────────┬──────────┬──────┐
/// │ Marker(2B) │ Len (2B) │ Payload       │ CRC16    │ Term │
/// │ 0xFF 0xAA  │ LE       │ (Len bytes)   │ (2B LE)  │ 0xFE │
/// └────────────┴──────────┴───────────────┴──────────┴──────┘
/// ```
pub fn encode_frame(payload: &[u8], dst: &mut BytesMut) -> Result<()> {
    if payload.len() > u16::MAX as usize {
        return Err(FrameError::PayloadTooLarge {
            size: payload.len(),
            max: u16::MAX as usize,
        });
    }
    dst.reserve(HEADER_SIZE + payload.len() + TRAILER_SIZE);
    dst.put_slice(&MAGIC);
    dst.put_u16_le(payload.len() as u16);
    dst.put_slice(payload);
    dst.put_u16_le(crc16(payload));
    dst.put_u8(TERMINATOR);
    Ok(())
}

/// Serialize `message` as JSON and frame it.
pub fn encode_message<T: Serialize + ?Sized>(message: &T, dst: &mut BytesMut) -> Result<()> {
    let payload = serde_json::to_vec(message)?;
    encode_frame(&payload, dst)
}

/// Outcome of one decode step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decoded {
    /// A payload whose terminator and checksum validated.
    Frame(Bytes),
    /// Bytes discarded while searching for the next marker.
    Skipped { dropped: usize },
    /// No terminator at the length-derived offset. One byte was consumed.
    BadTerminator { len: usize },
    /// Checksum mismatch. The whole frame was consumed.
    BadCrc { expected: u16, actual: u16 },
    /// Length field above the configured maximum. One byte was consumed.
    Oversized { len: usize },
}

/// Decode one step from a buffer.
///
/// Returns `None` when more bytes are needed. Every `Some` result consumes
/// at least one byte, so callers can loop until `None`.
pub fn decode_frame(src: &mut BytesMut, max_payload: usize) -> Option<Decoded> {
    if src.is_empty() {
        return None;
    }

    if !src.starts_with(&MAGIC) {
        let dropped = match find_marker(src) {
            Some(pos) => pos,
            // Keep a trailing 0xFF: it may be the first half of a split marker.
            None if src[src.len() - 1] == MAGIC[0] => src.len() - 1,
            None => src.len(),
        };
        if dropped == 0 {
            return None;
        }
        src.advance(dropped);
        return Some(Decoded::Skipped { dropped });
    }

    if src.len() < HEADER_SIZE {
        return None;
    }

    let len = u16::from_le_bytes([src[2], src[3]]) as usize;
    if len > max_payload {
        src.advance(1);
        return Some(Decoded::Oversized { len });
    }

    let total = HEADER_SIZE + len + TRAILER_SIZE;
    if src.len() < total {
        return None;
    }

    if src[total - 1] != TERMINATOR {
        src.advance(1);
        return Some(Decoded::BadTerminator { len });
    }

    let crc_at = HEADER_SIZE + len;
    let expected = u16::from_le_bytes([src[crc_at], src[crc_at + 1]]);
    let actual = crc16(&src[HEADER_SIZE..crc_at]);
    if expected != actual {
        src.advance(total);
        return Some(Decoded::BadCrc { expected, actual });
    }

    src.advance(HEADER_SIZE);
    let payload = src.split_to(len).freeze();
    src.advance(TRAILER_SIZE);
    Some(Decoded::Frame(payload))
}

fn find_marker(buf: &[u8]) -> Option<usize> {
    buf.windows(MAGIC.len()).position(|w| w == MAGIC)
}

/// Configuration for the frame codec.
#[derive(Debug, Clone)]
pub struct FrameConfig {
    /// Maximum payload size in bytes. Default: 16 KiB.
    pub max_payload_size: usize,
}

impl Default for FrameConfig {
    fn default() -> Self {
        Self {
            max_payload_size: DEFAULT_MAX_PAYLOAD,
        }
    }
}

/// Counters for everything the decoder has accepted or thrown away.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DecodeStats {
    pub frames: u64,
    pub resyncs: u64,
    pub dropped_bytes: u64,
    pub bad_terminators: u64,
    pub crc_errors: u64,
    pub json_errors: u64,
    pub oversized: u64,
}

/// Streaming decoder: bytes in, parsed JSON objects out.
///
/// `feed` never blocks and never fails. Garbage is logged and skipped.
#[derive(Debug)]
pub struct FrameDecoder {
    buf: BytesMut,
    config: FrameConfig,
    stats: DecodeStats,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::with_config(FrameConfig::default())
    }

    pub fn with_config(config: FrameConfig) -> Self {
        Self {
            buf: BytesMut::with_capacity(1024),
            config,
            stats: DecodeStats::default(),
        }
    }

    /// Append `bytes` and return every complete, valid object now available.
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<serde_json::Value> {
        self.buf.extend_from_slice(bytes);
        let mut out = Vec::new();

        while let Some(step) = decode_frame(&mut self.buf, self.config.max_payload_size) {
            match step {
                Decoded::Frame(payload) => match serde_json::from_slice(&payload) {
                    Ok(value) => {
                        self.stats.frames += 1;
                        trace!(len = payload.len(), "frame decoded");
                        out.push(value);
                    }
                    Err(err) => {
                        self.stats.json_errors += 1;
                        warn!(%err, len = payload.len(), "dropping frame with malformed JSON");
                    }
                },
                Decoded::Skipped { dropped } => {
                    self.stats.resyncs += 1;
                    self.stats.dropped_bytes += dropped as u64;
                    warn!(dropped, "resync: discarded bytes before frame marker");
                }
                Decoded::BadTerminator { len } => {
                    self.stats.bad_terminators += 1;
                    warn!(len, "invalid frame tail, resyncing");
                }
                Decoded::BadCrc { expected, actual } => {
                    self.stats.crc_errors += 1;
                    warn!(
                        expected = format_args!("{expected:#06x}"),
                        actual = format_args!("{actual:#06x}"),
                        "dropping frame with CRC mismatch"
                    );
                }
                Decoded::Oversized { len } => {
                    self.stats.oversized += 1;
                    warn!(
                        len,
                        max = self.config.max_payload_size,
                        "frame length out of range, resyncing"
                    );
                }
            }
        }

        out
    }

    /// Bytes held back waiting for the rest of a frame.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    pub fn stats(&self) -> &DecodeStats {
        &self.stats
    }

    /// Drop any partial frame, e.g. after a reconnect.
    pub fn clear(&mut self) {
        self.buf.clear();
    }
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}
