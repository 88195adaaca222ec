//! Local pipe link to the badge simulator.
//!
//! The simulator listens on a Unix-domain socket and speaks the exact wire
//! protocol of real hardware; only the link layer differs. Endpoint
//! addresses use the `pipe:<path>` form.

use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::net::Shutdown;
use std::os::unix::net::UnixStream;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::transport::Link;

/// Matches the serial link's read granularity so blocking reads behave the
/// same on both transports.
const READ_TIMEOUT: Duration = Duration::from_millis(50);

/// Probe size for the non-blocking availability check.
const PROBE_LEN: usize = 4096;

/// Pipe link to a badge simulator.
///
/// Sockets have no readable-byte counter the way serial drivers do, so the
/// availability check drains the socket non-blockingly into an internal
/// buffer; reads serve that buffer before touching the socket again.
pub struct PipeLink {
    stream: Option<UnixStream>,
    buffer: VecDeque<u8>,
    peer_closed: bool,
    name: String,
}

impl PipeLink {
    /// Connect to a simulator socket. No serial configuration applies.
    pub fn open(path: &str) -> Result<Self> {
        let stream = UnixStream::connect(path).map_err(|e| match e.kind() {
            io::ErrorKind::NotFound | io::ErrorKind::ConnectionRefused => Error::DeviceNotFound,
            _ => Error::Io(e),
        })?;
        stream.set_read_timeout(Some(READ_TIMEOUT))?;

        Ok(Self {
            stream: Some(stream),
            buffer: VecDeque::new(),
            peer_closed: false,
            name: path.to_string(),
        })
    }

    /// Pull whatever the socket holds into the internal buffer without
    /// blocking.
    fn fill_buffer(&mut self) -> io::Result<()> {
        let Some(stream) = self.stream.as_mut() else {
            return Ok(());
        };
        if self.peer_closed {
            return Ok(());
        }

        stream.set_nonblocking(true)?;
        let mut probe = [0u8; PROBE_LEN];
        let outcome = loop {
            match stream.read(&mut probe) {
                Ok(0) => {
                    self.peer_closed = true;
                    break Ok(());
                }
                Ok(n) => {
                    self.buffer.extend(&probe[..n]);
                    if n < PROBE_LEN {
                        break Ok(());
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break Ok(()),
                Err(e) => break Err(e),
            }
        };
        stream.set_nonblocking(false)?;
        outcome
    }
}

impl Link for PipeLink {
    fn bytes_available(&mut self) -> Result<usize> {
        self.fill_buffer()?;
        Ok(self.buffer.len())
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn close(&mut self) -> Result<()> {
        // Unlike the serial teardown, sockets want an explicit shutdown so
        // the peer observes EOF promptly.
        if let Some(stream) = self.stream.take() {
            let _ = stream.shutdown(Shutdown::Both);
        }
        self.buffer.clear();
        Ok(())
    }
}

impl Read for PipeLink {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if !self.buffer.is_empty() {
            let n = buf.len().min(self.buffer.len());
            for slot in buf.iter_mut().take(n) {
                *slot = self.buffer.pop_front().unwrap_or_default();
            }
            return Ok(n);
        }
        if self.peer_closed {
            return Ok(0);
        }

        self.stream
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "pipe closed"))
            .and_then(|s| s.read(buf))
    }
}

impl Write for PipeLink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.stream
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "pipe closed"))
            .and_then(|s| s.write(buf))
    }

    fn flush(&mut self) -> io::Result<()> {
        self.stream
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "pipe closed"))
            .and_then(|s| s.flush())
    }
}
