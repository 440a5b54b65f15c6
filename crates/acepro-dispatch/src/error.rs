use crate::dispatcher::Priority;

/// Errors that can occur while dispatching requests.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    /// The target queue is at capacity; the request was dropped.
    #[error("{priority} queue full ({capacity} pending)")]
    QueueFull { priority: Priority, capacity: usize },

    /// The dispatcher has no link and is not currently connecting.
    #[error("not connected")]
    NotConnected,

    /// The request timed out in flight.
    #[error("no response to {method}")]
    NoResponse { method: String },

    /// The link dropped while the request was queued or in flight.
    #[error("link dropped before {method} completed")]
    Disconnected { method: String },

    /// The dispatcher task has stopped.
    #[error("dispatcher shut down")]
    Shutdown,

    /// Transport-level error.
    #[error("transport error: {0}")]
    Transport(#[from] acepro_transport::TransportError),

    /// Frame-level error.
    #[error("frame error: {0}")]
    Frame(#[from] acepro_frame::FrameError),

    /// JSON serialization/deserialization error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, DispatchError>;
