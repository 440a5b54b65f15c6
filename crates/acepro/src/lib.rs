//! Driver for Anycubic ACE Pro multi-slot filament units.
//!
//! acepro talks to one or more ACE Pro feeders over USB serial and drives
//! tool changes, runout recovery and endless-spool swaps on top of them.
//!
//! # Crate Structure
//!
//! - [`transport`] - Serial links, port discovery and the reconnect seam
//! - [`frame`] - CRC-checked JSON frame codec
//! - [`dispatch`] - Request/response dispatcher with priority queues
//! - [`engine`] - Units, tool changes, runout monitoring and endless spool

/// Re-export transport types.
pub mod transport {
    pub use acepro_transport::*;
}

/// Re-export frame types.
pub mod frame {
    pub use acepro_frame::*;
}

/// Re-export dispatcher types.
pub mod dispatch {
    pub use acepro_dispatch::*;
}

/// Re-export engine types.
pub mod engine {
    pub use acepro_engine::*;
}
