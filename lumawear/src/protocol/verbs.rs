//! Command verbs and acknowledgment tokens.
//!
//! Every verb is a short fixed ASCII byte sequence, compared byte-for-byte
//! on both ends. There is no prefix or fuzzy matching: `read` is not a
//! partial `ready`, it is a protocol violation.

/// Acknowledgment: the badge is ready for the next step of a sequence.
pub const READY: &[u8] = b"ready";

/// Session teardown marker at the end of a handshake payload.
pub const GOODBYE: &[u8] = b"goodbye";

/// Acknowledgment: a mode payload was stored.
pub const DONE: &[u8] = b"done";

/// Acknowledgment: a firmware chunk was written, send the next one.
pub const NEXT: &[u8] = b"next";

/// Command: begin a firmware transfer.
pub const FLASH_FIRMWARE: &[u8] = b"flash";

/// Command: store a mode payload into a slot.
pub const SAVE_MODE: &[u8] = b"save";

/// Command: read a mode payload out of a slot.
pub const LOAD_MODE: &[u8] = b"load";

/// Render a token for log and error messages.
#[must_use]
pub fn display(token: &[u8]) -> String {
    String::from_utf8_lossy(token).into_owned()
}
