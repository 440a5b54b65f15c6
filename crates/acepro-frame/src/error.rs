/// Errors that can occur during frame encoding or link I/O.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// The payload exceeds what the length field or configuration allows.
    #[error("payload too large ({size} bytes, max {max})")]
    PayloadTooLarge { size: usize, max: usize },

    /// An I/O error occurred while reading or writing the link.
    #[error("frame I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The message could not be serialized.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// The link accepted zero bytes on write.
    #[error("link closed")]
    ConnectionClosed,
}

pub type Result<T> = std::result::Result<T, FrameError>;
