use std::fs::{File, OpenOptions};
use std::os::fd::AsRawFd;
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::discovery::{find_ports, ACE_PRODUCT_MARKER};
use crate::error::{Result, TransportError};
use crate::traits::{Connector, SerialStream};

/// Raw-mode tty serial transport.
pub struct SerialPort;

impl SerialPort {
    /// Line speed spoken by ACE Pro units.
    pub const DEFAULT_BAUD: u32 = 115_200;

    /// Open `path` non-blocking, raw 8N1 at `baud`.
    ///
    /// Pending input from a previous session is discarded.
    pub fn open(path: impl AsRef<Path>, baud: u32) -> Result<SerialStream> {
        let path = path.as_ref();
        let speed = baud_constant(baud)?;

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .custom_flags(libc::O_NOCTTY | libc::O_NONBLOCK)
            .open(path)
            .map_err(|source| TransportError::Open {
                path: path.to_path_buf(),
                source,
            })?;

        configure_raw(&file, speed).map_err(|source| TransportError::Configure {
            path: path.to_path_buf(),
            source,
        })?;

        debug!(?path, baud, "opened serial port");
        Ok(SerialStream::from_tty(file, path))
    }
}

/// Map a numeric baud rate to its termios constant.
pub fn baud_constant(baud: u32) -> Result<libc::speed_t> {
    let speed = match baud {
        9_600 => libc::B9600,
        19_200 => libc::B19200,
        38_400 => libc::B38400,
        57_600 => libc::B57600,
        115_200 => libc::B115200,
        230_400 => libc::B230400,
        #[cfg(target_os = "linux")]
        460_800 => libc::B460800,
        #[cfg(target_os = "linux")]
        921_600 => libc::B921600,
        other => return Err(TransportError::UnsupportedBaud(other)),
    };
    Ok(speed)
}

fn configure_raw(file: &File, speed: libc::speed_t) -> std::io::Result<()> {
    let fd = file.as_raw_fd();
    let mut tio = std::mem::MaybeUninit::<libc::termios>::zeroed();

    // SAFETY: `fd` is an open descriptor owned by `file`, and `tio` points to
    // writable storage sized for a `termios`.
    if unsafe { libc::tcgetattr(fd, tio.as_mut_ptr()) } != 0 {
        return Err(std::io::Error::last_os_error());
    }
    // SAFETY: tcgetattr succeeded and fully initialised the struct.
    let mut tio = unsafe { tio.assume_init() };

    // SAFETY: `tio` is a valid, initialised termios owned by this frame.
    unsafe { libc::cfmakeraw(&mut tio) };
    tio.c_cflag |= libc::CLOCAL | libc::CREAD;
    tio.c_cflag &= !libc::CSTOPB;
    #[cfg(target_os = "linux")]
    {
        tio.c_cflag &= !libc::CRTSCTS;
    }
    tio.c_cc[libc::VMIN] = 0;
    tio.c_cc[libc::VTIME] = 0;

    // SAFETY: `tio` is valid for the duration of each call and `fd` stays open.
    let rc = unsafe {
        let input = libc::cfsetispeed(&mut tio, speed);
        let output = libc::cfsetospeed(&mut tio, speed);
        if input != 0 || output != 0 {
            -1
        } else {
            libc::tcsetattr(fd, libc::TCSANOW, &tio)
        }
    };
    if rc != 0 {
        return Err(std::io::Error::last_os_error());
    }

    // SAFETY: `fd` is an open tty descriptor.
    if unsafe { libc::tcflush(fd, libc::TCIFLUSH) } != 0 {
        return Err(std::io::Error::last_os_error());
    }
    Ok(())
}

/// Connector that opens a fixed path or the Nth discovered ACE port.
#[derive(Debug, Clone)]
pub struct SerialConnector {
    target: PortTarget,
    baud: u32,
}

#[derive(Debug, Clone)]
enum PortTarget {
    Path(PathBuf),
    Discover { unit: usize },
}

impl SerialConnector {
    /// Always open `path`.
    pub fn with_path(path: impl Into<PathBuf>, baud: u32) -> Self {
        Self {
            target: PortTarget::Path(path.into()),
            baud,
        }
    }

    /// Discover ports on every attempt and take the `unit`-th ACE device.
    pub fn discover(unit: usize, baud: u32) -> Self {
        Self {
            target: PortTarget::Discover { unit },
            baud,
        }
    }

    fn resolve(&self) -> Result<PathBuf> {
        match &self.target {
            PortTarget::Path(path) => Ok(path.clone()),
            PortTarget::Discover { unit } => {
                let ports = find_ports(ACE_PRODUCT_MARKER);
                ports
                    .get(*unit)
                    .map(|port| port.path.clone())
                    .ok_or(TransportError::NoDevice {
                        unit: *unit,
                        found: ports.len(),
                    })
            }
        }
    }
}

impl Connector for SerialConnector {
    type Link = SerialStream;

    fn connect(&mut self) -> Result<SerialStream> {
        let path = self.resolve()?;
        let stream = SerialPort::open(&path, self.baud)?;
        info!(?path, baud = self.baud, "serial link open");
        Ok(stream)
    }

    fn describe(&self) -> String {
        match &self.target {
            PortTarget::Path(path) => path.display().to_string(),
            PortTarget::Discover { unit } => format!("discovered ACE unit {unit}"),
        }
    }
}
