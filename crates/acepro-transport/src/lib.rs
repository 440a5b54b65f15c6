//! Serial link abstraction for ACE Pro filament units.
//!
//! Provides the lowest layer of acepro:
//! - A non-blocking [`SerialStream`] over a raw-mode tty
//! - USB port discovery sorted by physical hub location
//! - The [`Connector`] seam the dispatcher uses to (re)open a link
//!
//! Everything else builds on top of `Read + Write` links handed out here.

pub mod discovery;
pub mod error;
pub mod traits;

#[cfg(unix)]
pub mod tty;

pub use discovery::{find_ports, usb_location_key, PortInfo, ACE_PRODUCT_MARKER};
pub use error::{Result, TransportError};
pub use traits::{Connector, SerialStream};

#[cfg(unix)]
pub use tty::{SerialConnector, SerialPort};
