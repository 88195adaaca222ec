//! Protocol building blocks: CRC, framing, and command verbs.

pub mod crc;
pub mod frame;
pub mod verbs;

// Re-export common types
pub use frame::{Frame, MAX_PAYLOAD_LEN, MAX_RAW_LEN};
