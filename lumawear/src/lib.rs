//! # lumawear
//!
//! Host-side driver for LumaWear wearable LED badges.
//!
//! This crate provides the device communication layer for badges connected
//! over a serial line (or a local pipe to the badge simulator), including:
//!
//! - Transport abstraction over serial ports and Unix-socket pipes
//! - Handshake/session state machine with a background listener
//! - Length-prefixed, CRC16-checked framing
//! - Lockstep 128-byte chunked firmware updates
//! - Mode slot pull/push
//!
//! Out of scope by design: LED pattern semantics, color math, and mode
//! payload layout. Mode payloads pass through this layer as opaque,
//! integrity-checked byte buffers.
//!
//! ## Example
//!
//! ```rust,no_run
//! use lumawear::{DeviceSession, FirmwareUpdate, TransportChannel};
//!
//! fn main() -> lumawear::Result<()> {
//!     let mut channel = TransportChannel::new();
//!     channel.connect("/dev/ttyUSB0")?;
//!
//!     let session = DeviceSession::new(channel);
//!     session.listen();
//!
//!     // Once the badge banner lands, push new firmware:
//!     let image = std::fs::read("badge-fw.bin")?;
//!     FirmwareUpdate::new(&session).flash(&image, |sent, total| {
//!         println!("chunk {sent}/{total}");
//!     })?;
//!
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

use std::sync::{Arc, OnceLock};

pub mod error;
pub mod firmware;
pub mod host;
pub mod modes;
pub mod protocol;
pub mod session;
pub mod transport;

#[cfg(test)]
pub(crate) mod testutil;

static INTERRUPT_CHECKER: OnceLock<Arc<dyn Fn() -> bool + Send + Sync>> = OnceLock::new();

/// Register a global interruption checker used by long-running library loops.
///
/// The checker should return `true` when the current operation should stop
/// (for example after receiving Ctrl-C in CLI applications). Transfers
/// check it between protocol steps, never mid-frame.
pub fn set_interrupt_checker<F>(checker: F)
where
    F: Fn() -> bool + Send + Sync + 'static,
{
    let _ = INTERRUPT_CHECKER.set(Arc::new(checker));
}

/// Returns whether interruption was requested by the embedding application.
#[must_use]
pub fn is_interrupt_requested() -> bool {
    INTERRUPT_CHECKER.get().is_some_and(|checker| checker())
}

#[cfg(test)]
pub(crate) fn test_set_interrupted(value: bool) {
    use std::sync::atomic::{AtomicBool, Ordering};

    static TEST_INTERRUPT_FLAG: OnceLock<Arc<AtomicBool>> = OnceLock::new();

    let flag = TEST_INTERRUPT_FLAG
        .get_or_init(|| {
            let shared = Arc::new(AtomicBool::new(false));
            let checker = Arc::clone(&shared);
            set_interrupt_checker(move || checker.load(Ordering::Relaxed));
            shared
        })
        .clone();

    flag.store(value, Ordering::Relaxed);
}

// Re-exports for convenience
pub use {
    error::{Error, Result},
    firmware::{CHUNK_SIZE, FirmwareUpdate, UpdateConfig},
    host::{BridgeKind, DetectedPort, auto_detect_port, discover_ports, find_port_by_pattern},
    modes::{ModeConfig, ModeTransfer},
    protocol::frame::{Frame, MAX_PAYLOAD_LEN, MAX_RAW_LEN},
    session::{DeviceSession, Exchange, NullEvents, SessionEvents},
    transport::{Endpoint, Link, TransportChannel, TransportKind},
};
