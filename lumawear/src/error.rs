//! Error types for lumawear.

use std::io;
use thiserror::Error;

/// Result type for lumawear operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for lumawear operations.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error (transport, file operations).
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Serial port error.
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    /// No badge found on the requested endpoint.
    #[error("Device not found")]
    DeviceNotFound,

    /// Fewer bytes reached the wire than requested.
    ///
    /// The badge bootloader cannot resynchronize mid-token, so a partial
    /// write aborts the current operation.
    #[error("Short write: {sent} of {expected} bytes")]
    ShortWrite {
        /// Bytes actually written.
        sent: usize,
        /// Bytes requested.
        expected: usize,
    },

    /// Framing violation (empty, oversized, or truncated frame).
    #[error("Invalid frame: {0}")]
    Frame(String),

    /// CRC checksum mismatch.
    #[error("CRC mismatch: expected {expected:#06x}, got {actual:#06x}")]
    CrcMismatch {
        /// CRC value declared by the frame.
        expected: u16,
        /// CRC value computed over the payload.
        actual: u16,
    },

    /// Unexpected or missing acknowledgment token.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Communication timeout.
    #[error("Timeout: {0}")]
    Timeout(String),

    /// Operation cancelled by the embedding application.
    #[error("Operation cancelled")]
    Cancelled,

    /// Unsupported transport or operation on this platform.
    #[error("Unsupported: {0}")]
    Unsupported(String),
}
