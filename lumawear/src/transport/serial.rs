//! Serial link implementation using the `serialport` crate.
//!
//! The badge enumerates as a USB-UART bridge (CH340 on rev1 boards, CP210x
//! on rev2). The bridge's DTR line is wired to the badge reset pin, so
//! asserting DTR on open drops the badge into its boot banner.

use std::io::{self, Read, Write};
use std::time::Duration;

use log::trace;
use serialport::{ClearBuffer, DataBits, FlowControl, Parity, StopBits};

use crate::error::{Error, Result};
use crate::transport::{Link, TransportChannel};

/// Granularity of blocking reads. `TransportChannel::raw_read` retries
/// timed-out reads, so this only bounds how often a blocked reader wakes.
const READ_TIMEOUT: Duration = Duration::from_millis(50);

/// Serial link to a badge.
pub struct SerialLink {
    port: Option<Box<dyn serialport::SerialPort>>,
    name: String,
}

impl SerialLink {
    /// Open and configure the badge serial line.
    ///
    /// 9600 baud, 8 data bits, 1 stop bit, no parity, no flow control. DTR
    /// is asserted to reset the badge, then any stale buffered bytes are
    /// purged so the boot banner is the first thing read.
    pub fn open(port_name: &str) -> Result<Self> {
        let mut port = serialport::new(port_name, TransportChannel::BAUD_RATE)
            .timeout(READ_TIMEOUT)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .flow_control(FlowControl::None)
            .open()
            .map_err(|e| match e.kind() {
                serialport::ErrorKind::NoDevice
                | serialport::ErrorKind::Io(io::ErrorKind::NotFound) => Error::DeviceNotFound,
                _ => Error::Serial(e),
            })?;

        trace!("asserting DTR to reset badge on {port_name}");
        port.write_data_terminal_ready(true)?;
        port.clear(ClearBuffer::All)?;

        Ok(Self {
            port: Some(port),
            name: port_name.to_string(),
        })
    }
}

impl Link for SerialLink {
    fn bytes_available(&mut self) -> Result<usize> {
        match self.port.as_mut() {
            Some(p) => Ok(p.bytes_to_read()? as usize),
            None => Ok(0),
        }
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn close(&mut self) -> Result<()> {
        // Take ownership of the port and let it drop (close)
        self.port.take();
        Ok(())
    }
}

impl Read for SerialLink {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.port
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "port closed"))
            .and_then(|p| p.read(buf))
    }
}

impl Write for SerialLink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.port
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "port closed"))
            .and_then(|p| p.write(buf))
    }

    fn flush(&mut self) -> io::Result<()> {
        self.port
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "port closed"))
            .and_then(std::io::Write::flush)
    }
}
