use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use crate::error::Result;

/// An open serial link to a unit. Implements Read + Write.
///
/// Reads never block: when no bytes are pending the read returns
/// `ErrorKind::WouldBlock` (or `Ok(0)` on drivers that report an empty poll).
pub struct SerialStream {
    inner: SerialStreamInner,
    path: PathBuf,
}

enum SerialStreamInner {
    #[cfg(unix)]
    Tty(std::fs::File),
}

impl Read for SerialStream {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        match &mut self.inner {
            #[cfg(unix)]
            SerialStreamInner::Tty(file) => file.read(buf),
        }
    }
}

impl Write for SerialStream {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        match &mut self.inner {
            #[cfg(unix)]
            SerialStreamInner::Tty(file) => file.write(buf),
        }
    }

    fn flush(&mut self) -> std::io::Result<()> {
        match &mut self.inner {
            #[cfg(unix)]
            SerialStreamInner::Tty(file) => file.flush(),
        }
    }
}

impl SerialStream {
    #[cfg(unix)]
    pub(crate) fn from_tty(file: std::fs::File, path: &Path) -> Self {
        Self {
            inner: SerialStreamInner::Tty(file),
            path: path.to_path_buf(),
        }
    }

    /// Device node this stream was opened from.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl std::fmt::Debug for SerialStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.inner {
            #[cfg(unix)]
            SerialStreamInner::Tty(_) => f
                .debug_struct("SerialStream")
                .field("type", &"tty")
                .field("path", &self.path)
                .finish(),
        }
    }
}

/// Opens links on demand.
///
/// The dispatcher owns a connector and calls [`Connector::connect`] on start
/// and after every I/O failure until a link comes back.
pub trait Connector: Send + 'static {
    /// Link type produced by this connector.
    type Link: Read + Write + Send + 'static;

    /// Try to open a fresh link.
    fn connect(&mut self) -> Result<Self::Link>;

    /// Human-readable target used in log lines.
    fn describe(&self) -> String;
}
