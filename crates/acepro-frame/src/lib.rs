//! CRC16-checked JSON framing for the ACE Pro serial protocol.
//!
//! Every message on the wire is framed as:
//! - A 2-byte marker (`0xFF 0xAA`) for stream synchronization
//! - A 2-byte little-endian payload length
//! - The JSON payload
//! - A 2-byte little-endian CRC16 of the payload
//! - A single `0xFE` terminator
//!
//! Corrupt input never surfaces as an error: the decoder logs it, drops it,
//! and resynchronizes on the next marker.

pub mod codec;
pub mod crc;
pub mod error;
pub mod reader;
pub mod writer;

pub use codec::{
    decode_frame, encode_frame, encode_message, DecodeStats, Decoded, FrameConfig, FrameDecoder,
    DEFAULT_MAX_PAYLOAD, HEADER_SIZE, MAGIC, TERMINATOR, TRAILER_SIZE,
};
pub use crc::crc16;
pub use error::{FrameError, Result};
pub use reader::FrameReader;
pub use writer::{FrameWriter, MAX_PENDING_BYTES};
