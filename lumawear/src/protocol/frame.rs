//! Length-bounded, CRC-checked byte container.
//!
//! A frame is the unit of application data exchanged with the badge. The
//! payload stays opaque to this layer; the frame only guarantees integrity
//! and bounded size.
//!
//! ## Raw layout
//!
//! ```text
//! +---------------+--------+
//! |    payload    | CRC16  |
//! +---------------+--------+
//! |  1..=4094 B   |  2 B   |
//! +---------------+--------+
//! ```
//!
//! The CRC is CRC16-XMODEM over the payload, stored little-endian. On the
//! wire a frame is preceded by a 4-byte little-endian length of its raw
//! (CRC-tagged) size; that prefix is added by the session layer, not here.

use byteorder::{LittleEndian, WriteBytesExt};

use crate::error::{Error, Result};
use crate::protocol::crc::crc16_xmodem;

/// Size of the integrity tag appended to the payload.
pub const CRC_LEN: usize = 2;

/// Maximum raw (CRC-tagged) frame size accepted on the wire.
pub const MAX_RAW_LEN: usize = 4096;

/// Maximum payload size.
pub const MAX_PAYLOAD_LEN: usize = MAX_RAW_LEN - CRC_LEN;

/// An integrity-checked byte buffer.
///
/// Constructing a `Frame` validates the size bounds; parsing one from raw
/// bytes additionally validates the CRC. A `Frame` never carries an empty
/// payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    payload: Vec<u8>,
}

impl Frame {
    /// Wrap a payload in a frame.
    pub fn new(payload: impl Into<Vec<u8>>) -> Result<Self> {
        let payload = payload.into();
        if payload.is_empty() {
            return Err(Error::Frame("empty payload".into()));
        }
        if payload.len() > MAX_PAYLOAD_LEN {
            return Err(Error::Frame(format!(
                "payload of {} bytes exceeds {MAX_PAYLOAD_LEN}",
                payload.len()
            )));
        }
        Ok(Self { payload })
    }

    /// Validate raw (CRC-tagged) bytes received from the badge.
    pub fn from_raw(raw: &[u8]) -> Result<Self> {
        if raw.len() < 1 + CRC_LEN {
            return Err(Error::Frame(format!("truncated frame of {} bytes", raw.len())));
        }
        if raw.len() > MAX_RAW_LEN {
            return Err(Error::Frame(format!(
                "frame of {} bytes exceeds {MAX_RAW_LEN}",
                raw.len()
            )));
        }

        let (payload, crc_bytes) = raw.split_at(raw.len() - CRC_LEN);
        let expected = u16::from_le_bytes([crc_bytes[0], crc_bytes[1]]);
        let actual = crc16_xmodem(payload);
        if expected != actual {
            return Err(Error::CrcMismatch { expected, actual });
        }

        Ok(Self {
            payload: payload.to_vec(),
        })
    }

    /// Logical size: the payload length.
    #[must_use]
    pub fn payload_len(&self) -> usize {
        self.payload.len()
    }

    /// Raw size: payload plus integrity tag, as transmitted.
    #[must_use]
    pub fn raw_len(&self) -> usize {
        self.payload.len() + CRC_LEN
    }

    /// Borrow the payload.
    #[must_use]
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Consume the frame, returning the payload.
    #[must_use]
    pub fn into_payload(self) -> Vec<u8> {
        self.payload
    }

    /// Serialize to raw (CRC-tagged) bytes.
    #[must_use]
    #[allow(clippy::unwrap_used)] // Writing to Vec<u8> cannot fail
    pub fn to_raw(&self) -> Vec<u8> {
        let mut raw = Vec::with_capacity(self.raw_len());
        raw.extend_from_slice(&self.payload);
        raw.write_u16::<LittleEndian>(crc16_xmodem(&self.payload))
            .unwrap();
        raw
    }
}
