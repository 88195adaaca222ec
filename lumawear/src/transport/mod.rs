//! Byte-oriented transport to the badge.
//!
//! Two link implementations sit under one contract:
//!
//! - **Serial** (default): a USB-UART bridge to the badge, via the
//!   `serialport` crate
//! - **Pipe** (`cfg(unix)`): a Unix-domain socket to the badge simulator,
//!   used in tests and during pattern development
//!
//! ```text
//! +-------------------+     +-------------------+
//! |  Session layer    |     |  Session layer    |
//! +---------+---------+     +---------+---------+
//!           |                         |
//!           v                         v
//! +---------+---------+     +---------+---------+
//! | TransportChannel  |     | TransportChannel  |
//! +---------+---------+     +---------+---------+
//!           |                         |
//!           v                         v
//! +---------+---------+     +---------+---------+
//! |    SerialLink     |     |     PipeLink      |
//! |   (serialport)    |     |   (unix socket)   |
//! +-------------------+     +-------------------+
//!        Hardware                 Simulator
//! ```
//!
//! Everything above the link layer (framing, handshake, verbs) is
//! identical across the two transports.

#[cfg(unix)]
pub mod pipe;
pub mod serial;

use std::io::{self, Read, Write};

use crate::error::{Error, Result};
use log::{debug, trace, warn};

/// Transport kind for a badge endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    /// Serial transport (UART/USB CDC).
    Serial,
    /// Local pipe transport (badge simulator).
    Pipe,
}

/// A parsed endpoint address.
///
/// `pipe:<path>` selects the pipe transport; anything else is treated as a
/// serial port path. An `Endpoint` is created on `connect` and dropped on
/// `disconnect`. Deliberately not `Clone`: the handle it describes has
/// exactly one owner.
#[derive(Debug, PartialEq, Eq)]
pub struct Endpoint {
    name: String,
    kind: TransportKind,
}

impl Endpoint {
    /// Parse a user-supplied address string.
    #[must_use]
    pub fn parse(address: &str) -> Self {
        match address.strip_prefix("pipe:") {
            Some(path) => Self {
                name: path.to_string(),
                kind: TransportKind::Pipe,
            },
            None => Self {
                name: address.to_string(),
                kind: TransportKind::Serial,
            },
        }
    }

    /// Endpoint name: a serial port path or a pipe path.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Transport kind.
    #[must_use]
    pub fn kind(&self) -> TransportKind {
        self.kind
    }
}

/// Raw byte link underneath a [`TransportChannel`].
///
/// Implemented by [`serial::SerialLink`] and [`pipe::PipeLink`]; tests and
/// embedders with exotic transports can provide their own.
pub trait Link: Read + Write + Send {
    /// Number of inbound bytes readable right now without blocking.
    fn bytes_available(&mut self) -> Result<usize>;

    /// Endpoint name/path.
    fn name(&self) -> &str;

    /// Release the underlying handle. Further reads and writes fail.
    fn close(&mut self) -> Result<()>;
}

fn is_timeout(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock
    )
}

fn is_disconnect(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::BrokenPipe
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::NotConnected
            | io::ErrorKind::UnexpectedEof
    )
}

fn not_connected() -> Error {
    Error::Io(io::Error::new(
        io::ErrorKind::NotConnected,
        "transport closed",
    ))
}

/// Raw, protocol-agnostic byte channel to the badge.
///
/// Owns the link handle exclusively: the handle exists iff the channel is
/// connected.
#[derive(Default)]
pub struct TransportChannel {
    link: Option<Box<dyn Link>>,
    endpoint: Option<Endpoint>,
}

impl TransportChannel {
    /// Link-layer baud rate required by the badge bootloader.
    pub const BAUD_RATE: u32 = 9600;

    /// Create a disconnected channel.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Wrap an already-open link.
    ///
    /// Useful for custom transports and for tests driving the protocol
    /// against a scripted peer.
    #[must_use]
    pub fn from_link(link: Box<dyn Link>) -> Self {
        Self {
            link: Some(link),
            endpoint: None,
        }
    }

    /// Open the endpoint described by `address`.
    ///
    /// Serial endpoints are configured to 9600 baud, 8-N-1, no flow
    /// control, with DTR asserted so the adapter resets the badge; pipe
    /// endpoints skip the serial configuration entirely. A missing device
    /// is an expected condition and is not logged; any other open failure
    /// is.
    pub fn connect(&mut self, address: &str) -> Result<()> {
        if self.link.is_some() {
            self.disconnect();
        }

        let endpoint = Endpoint::parse(address);
        let link = match Self::open_link(&endpoint) {
            Ok(link) => link,
            Err(Error::DeviceNotFound) => {
                trace!("{} not present", endpoint.name());
                return Err(Error::DeviceNotFound);
            }
            Err(e) => {
                warn!("failed to open {}: {e}", endpoint.name());
                return Err(e);
            }
        };

        debug!("connected to {} ({:?})", endpoint.name(), endpoint.kind());
        self.link = Some(link);
        self.endpoint = Some(endpoint);
        Ok(())
    }

    fn open_link(endpoint: &Endpoint) -> Result<Box<dyn Link>> {
        match endpoint.kind() {
            TransportKind::Serial => Ok(Box::new(serial::SerialLink::open(endpoint.name())?)),
            #[cfg(unix)]
            TransportKind::Pipe => Ok(Box::new(pipe::PipeLink::open(endpoint.name())?)),
            #[cfg(not(unix))]
            TransportKind::Pipe => Err(Error::Unsupported(
                "pipe transport requires a Unix host".to_string(),
            )),
        }
    }

    /// Release the endpoint. Safe to call repeatedly.
    pub fn disconnect(&mut self) {
        if let Some(mut link) = self.link.take() {
            if let Err(e) = link.close() {
                trace!("close failed: {e}");
            }
            debug!("disconnected from {}", link.name());
        }
        self.endpoint = None;
    }

    /// Whether the channel currently owns an open link.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.link.is_some()
    }

    /// The connected endpoint, if any.
    #[must_use]
    pub fn endpoint(&self) -> Option<&Endpoint> {
        self.endpoint.as_ref()
    }

    /// Non-blocking query of currently buffered inbound bytes.
    pub fn bytes_available(&mut self) -> usize {
        match self.link.as_mut() {
            Some(link) => link.bytes_available().unwrap_or_else(|e| {
                trace!("bytes_available failed: {e}");
                0
            }),
            None => 0,
        }
    }

    /// Blocking read of exactly `buf.len()` bytes.
    ///
    /// Does not return until the buffer is full or an I/O error occurs;
    /// returns 0 on error. A closed peer (EOF or broken pipe) disconnects
    /// the channel as a side effect.
    pub fn raw_read(&mut self, buf: &mut [u8]) -> usize {
        let mut filled = 0;
        let mut fatal = false;

        {
            let Some(link) = self.link.as_mut() else {
                return 0;
            };
            while filled < buf.len() {
                match link.read(&mut buf[filled..]) {
                    Ok(0) => {
                        trace!("raw_read: peer closed after {filled} bytes");
                        fatal = true;
                        break;
                    }
                    Ok(n) => filled += n,
                    Err(e) if is_timeout(&e) => {} // keep waiting
                    Err(e) => {
                        trace!("raw_read error after {filled} bytes: {e}");
                        fatal = is_disconnect(&e);
                        filled = 0;
                        break;
                    }
                }
            }
        }

        if fatal {
            self.disconnect();
            return 0;
        }
        filled
    }

    /// Non-blocking read of up to `max` bytes appended to `out`.
    ///
    /// Reads `min(available, max)` bytes; returns 0 if nothing is buffered.
    /// A broken pipe disconnects the channel before returning 0.
    pub fn read_data(&mut self, out: &mut Vec<u8>, max: usize) -> usize {
        let available = self.bytes_available();
        let want = available.min(max);
        if want == 0 {
            return 0;
        }

        let start = out.len();
        out.resize(start + want, 0);
        let mut fatal = false;
        let read = {
            let Some(link) = self.link.as_mut() else {
                out.truncate(start);
                return 0;
            };
            match link.read(&mut out[start..]) {
                Ok(n) => n,
                Err(e) if is_timeout(&e) => 0,
                Err(e) => {
                    trace!("read_data error: {e}");
                    fatal = is_disconnect(&e);
                    0
                }
            }
        };

        out.truncate(start + read);
        if fatal {
            self.disconnect();
        }
        read
    }

    /// Write `data` to the badge.
    ///
    /// Bytes go out one per underlying write call: the badge UART firmware
    /// drops multi-byte writes. Callers still hand over the whole buffer in
    /// a single `write_data` call: it is the wire buffer that must not be
    /// split, not the byte stream. A short write is fatal for the current
    /// operation.
    pub fn write_data(&mut self, data: &[u8]) -> Result<()> {
        let Some(link) = self.link.as_mut() else {
            return Err(not_connected());
        };

        let mut sent = 0;
        for byte in data {
            match link.write(std::slice::from_ref(byte)) {
                Ok(1) => sent += 1,
                Ok(_) => break,
                Err(e) => {
                    trace!("write error after {sent} bytes: {e}");
                    break;
                }
            }
        }
        let _ = link.flush();

        if sent != data.len() {
            return Err(Error::ShortWrite {
                sent,
                expected: data.len(),
            });
        }
        Ok(())
    }
}
