//! Badge session lifecycle and framed request-response primitives.
//!
//! A [`DeviceSession`] wraps one [`TransportChannel`] and layers three
//! things on top of it:
//!
//! - **Handshake detection**: after reset the badge prints a free-form text
//!   banner. Any banner makes the session active; a banner ending in the
//!   `goodbye` marker tears it down again.
//! - **A background listener**: one thread per session watches for banners
//!   whenever no directed exchange owns the channel.
//! - **Exchange primitives**: token writes, framed writes, and exact-match
//!   acknowledgment waits used by the firmware and mode protocols.
//!
//! ## State machine
//!
//! ```text
//!              valid handshake
//!   Inactive ------------------> Active
//!      ^                           |
//!      |   goodbye marker          |
//!      +---------------------------+
//!      ^      (re-arms listener)
//!      |
//!      +--- transport disconnect (from either state)
//! ```
//!
//! ## Locking
//!
//! The channel sits behind a mutex. Workers take the lock for a whole
//! directed exchange via [`DeviceSession::exchange`]; the listener only
//! ever `try_lock`s, so it can never steal acknowledgment bytes from a
//! running command. The listener start guard is a mutex-protected
//! check-and-set, so concurrent `listen` calls cannot double-start it.

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, TryLockError};
use std::thread;
use std::time::{Duration, Instant};

use byteorder::{LittleEndian, WriteBytesExt};
use log::{debug, info, trace, warn};

use crate::error::{Error, Result};
use crate::protocol::frame::{self, Frame};
use crate::protocol::verbs;
use crate::transport::TransportChannel;

/// Sleep between polls while a bounded wait has nothing to read.
const POLL_INTERVAL: Duration = Duration::from_millis(5);

/// Sleep between listener wake-ups while the channel is idle or busy.
const LISTEN_INTERVAL: Duration = Duration::from_millis(20);

/// Receiver for session lifecycle notifications.
///
/// Injected into the session so embedders (CLI, GUI) can refresh their view
/// without the session knowing about them. Called from the listener thread
/// or from whichever thread triggered the transition.
pub trait SessionEvents: Send + Sync {
    /// The session turned active (badge handshake observed) or inactive
    /// (goodbye marker or transport disconnect).
    fn session_changed(&self, active: bool) {
        let _ = active;
    }
}

/// Events sink that ignores everything.
#[derive(Debug, Default)]
pub struct NullEvents;

impl SessionEvents for NullEvents {}

struct SessionCore {
    channel: Mutex<TransportChannel>,
    active: AtomicBool,
    stop: AtomicBool,
    listener: Mutex<Option<thread::JoinHandle<()>>>,
    events: Box<dyn SessionEvents>,
}

impl SessionCore {
    fn lock_channel(&self) -> MutexGuard<'_, TransportChannel> {
        self.channel.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_listener(&self) -> MutexGuard<'_, Option<thread::JoinHandle<()>>> {
        self.listener.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_active(&self, active: bool) {
        if self.active.swap(active, Ordering::AcqRel) != active {
            info!("session {}", if active { "active" } else { "inactive" });
            self.events.session_changed(active);
        }
    }

    /// Start the listener thread if none is running. The check-and-set
    /// happens under the listener mutex, so two racing callers cannot both
    /// spawn.
    fn spawn_listener(core: &Arc<Self>) {
        let mut guard = core.lock_listener();
        if guard.as_ref().is_some_and(|handle| !handle.is_finished()) {
            return;
        }
        // Only an uncontended channel can report disconnected here: a held
        // exchange implies the channel is open and in use. try_lock keeps
        // this free of lock-order inversions with stop_listening().
        if let Ok(channel) = core.channel.try_lock() {
            if !channel.is_connected() {
                return;
            }
        }

        core.stop.store(false, Ordering::Release);
        let worker = Arc::clone(core);
        let spawned = thread::Builder::new()
            .name("lumawear-listener".to_string())
            .spawn(move || Self::listen_loop(&worker));
        match spawned {
            Ok(handle) => *guard = Some(handle),
            Err(e) => warn!("failed to spawn listener: {e}"),
        }
    }

    fn listen_loop(core: &Arc<Self>) {
        debug!("listener started");
        loop {
            if core.stop.load(Ordering::Acquire) {
                break;
            }

            let payload = match core.channel.try_lock() {
                Ok(mut channel) => {
                    if !channel.is_connected() {
                        drop(channel);
                        core.set_active(false);
                        break;
                    }
                    if channel.bytes_available() == 0 {
                        None
                    } else {
                        let mut buf = Vec::new();
                        wait_data(&mut channel, &mut buf);
                        Some(buf)
                    }
                }
                // A directed exchange owns the channel; back off.
                Err(TryLockError::WouldBlock) => None,
                Err(TryLockError::Poisoned(_)) => break,
            };

            match payload {
                Some(buf) if !buf.is_empty() => {
                    Self::parse_handshake(core, &buf);
                }
                _ => thread::sleep(LISTEN_INTERVAL),
            }
        }
        debug!("listener stopped");
    }

    /// Inspect a handshake payload as text.
    ///
    /// A trailing goodbye marker is a normal lifecycle transition, not an
    /// error: the session goes inactive and, while the transport survives,
    /// the listener is re-armed to catch the next banner.
    fn parse_handshake(core: &Arc<Self>, payload: &[u8]) -> bool {
        trace!("handshake payload: {:?}", String::from_utf8_lossy(payload));

        if payload.ends_with(verbs::GOODBYE) {
            core.set_active(false);
            let connected = match core.channel.try_lock() {
                Ok(channel) => channel.is_connected(),
                // A held exchange implies a live transport.
                Err(_) => true,
            };
            if connected {
                Self::spawn_listener(core);
            }
            return false;
        }

        core.set_active(true);
        true
    }
}

/// Handshake lifecycle and request-response primitives over one channel.
pub struct DeviceSession {
    core: Arc<SessionCore>,
}

impl DeviceSession {
    /// Create a session over `channel` with no events sink.
    #[must_use]
    pub fn new(channel: TransportChannel) -> Self {
        Self::with_events(channel, Box::new(NullEvents))
    }

    /// Create a session over `channel`, delivering lifecycle notifications
    /// to `events`.
    #[must_use]
    pub fn with_events(channel: TransportChannel, events: Box<dyn SessionEvents>) -> Self {
        Self {
            core: Arc::new(SessionCore {
                channel: Mutex::new(channel),
                active: AtomicBool::new(false),
                stop: AtomicBool::new(false),
                listener: Mutex::new(None),
                events,
            }),
        }
    }

    /// Connect the underlying channel to `address`.
    pub fn connect(&self, address: &str) -> Result<()> {
        self.core.lock_channel().connect(address)
    }

    /// Disconnect the channel, mark the session inactive, and stop the
    /// listener.
    pub fn disconnect(&self) {
        self.core.lock_channel().disconnect();
        self.core.set_active(false);
        self.stop_listening();
    }

    /// Whether the underlying transport is connected.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.core.lock_channel().is_connected()
    }

    /// Whether a badge handshake has been observed and not withdrawn.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.core.active.load(Ordering::Acquire)
    }

    /// Whether the background listener is currently running.
    #[must_use]
    pub fn is_listening(&self) -> bool {
        self.core
            .lock_listener()
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Start the background handshake listener.
    ///
    /// Idempotent: calling this while a listener is already running is a
    /// no-op. Does nothing when the transport is disconnected.
    pub fn listen(&self) {
        SessionCore::spawn_listener(&self.core);
    }

    /// Stop the listener thread and wait for it to exit.
    pub fn stop_listening(&self) {
        self.core.stop.store(true, Ordering::Release);
        let handle = self.core.lock_listener().take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                warn!("listener thread panicked");
            }
        }
    }

    /// Single-shot, non-blocking handshake attempt.
    ///
    /// Returns true iff currently-available bytes form a valid (non-goodbye)
    /// handshake payload. A disconnected transport marks the session
    /// inactive.
    pub fn try_begin(&self) -> bool {
        let payload = {
            let mut channel = self.core.lock_channel();
            if !channel.is_connected() {
                drop(channel);
                self.core.set_active(false);
                return false;
            }
            let mut buf = Vec::new();
            channel.read_data(&mut buf, frame::MAX_RAW_LEN);
            buf
        };

        if payload.is_empty() {
            return false;
        }
        SessionCore::parse_handshake(&self.core, &payload)
    }

    /// Feed a handshake payload through the session state machine.
    ///
    /// Returns true for a session-activating payload, false for a goodbye
    /// (which also re-arms the listener while the transport survives).
    pub fn parse_handshake(&self, payload: &[u8]) -> bool {
        SessionCore::parse_handshake(&self.core, payload)
    }

    /// Borrow the channel for one directed protocol sequence.
    ///
    /// While the returned guard lives, the listener cannot touch the
    /// channel, so acknowledgment bytes always reach the caller.
    #[must_use]
    pub fn exchange(&self) -> Exchange<'_> {
        Exchange {
            channel: self.core.lock_channel(),
        }
    }
}

impl Drop for DeviceSession {
    fn drop(&mut self) {
        self.stop_listening();
    }
}

/// Block for one byte, then opportunistically drain whatever else arrived.
fn wait_data(channel: &mut TransportChannel, out: &mut Vec<u8>) -> usize {
    let mut first = [0u8; 1];
    if channel.raw_read(&mut first) != 1 {
        return 0;
    }
    out.push(first[0]);
    1 + channel.read_data(out, frame::MAX_RAW_LEN)
}

fn transport_closed() -> Error {
    Error::Io(io::Error::new(
        io::ErrorKind::NotConnected,
        "transport closed",
    ))
}

/// Exclusive use of the channel for one request-response sequence.
pub struct Exchange<'a> {
    channel: MutexGuard<'a, TransportChannel>,
}

impl Exchange<'_> {
    /// Whether the underlying transport is still connected.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.channel.is_connected()
    }

    /// Append currently-available bytes to `out`; returns the count.
    pub fn read_data(&mut self, out: &mut Vec<u8>) -> usize {
        self.channel.read_data(out, frame::MAX_RAW_LEN)
    }

    /// Block for one byte, then drain stragglers into `out`.
    pub fn wait_data(&mut self, out: &mut Vec<u8>) -> usize {
        wait_data(&mut self.channel, out)
    }

    /// Write the literal bytes of a command token.
    pub fn write_token(&mut self, token: &[u8]) -> Result<()> {
        trace!("-> {}", verbs::display(token));
        self.channel.write_data(token)
    }

    /// Transmit a frame: 4-byte little-endian raw length, then the raw
    /// frame bytes.
    ///
    /// The whole wire buffer goes out in a single `write_data` call. The
    /// badge aborts mid-frame when the prefix and body arrive as separate
    /// writes, so this buffer must never be split.
    #[allow(clippy::unwrap_used)] // Writing to Vec<u8> cannot fail
    pub fn write_frame(&mut self, frame: &Frame) -> Result<()> {
        let raw = frame.to_raw();
        let mut wire = Vec::with_capacity(4 + raw.len());
        #[allow(clippy::cast_possible_truncation)] // raw_len() <= MAX_RAW_LEN
        wire.write_u32::<LittleEndian>(raw.len() as u32).unwrap();
        wire.extend_from_slice(&raw);

        trace!(
            "-> frame: {} payload bytes, {} on the wire",
            frame.payload_len(),
            wire.len()
        );
        self.channel.write_data(&wire)
    }

    /// Poll until at least one byte lands in `out`, or `timeout` elapses.
    ///
    /// `out` is cleared first; partial accumulations never leak between
    /// calls.
    pub fn read_in_loop(&mut self, out: &mut Vec<u8>, timeout: Duration) -> Result<()> {
        out.clear();
        let start = Instant::now();
        loop {
            if self.channel.read_data(out, frame::MAX_RAW_LEN) > 0 {
                return Ok(());
            }
            if !self.channel.is_connected() {
                return Err(transport_closed());
            }
            if start.elapsed() >= timeout {
                return Err(Error::Timeout(format!(
                    "no data within {}ms",
                    timeout.as_millis()
                )));
            }
            thread::sleep(POLL_INTERVAL);
        }
    }

    /// Wait until the accumulated bytes equal `token` exactly.
    ///
    /// There is no prefix acceptance: a diverging byte fails immediately,
    /// and anything short of the full token by the deadline is a timeout.
    pub fn expect(&mut self, token: &[u8], timeout: Duration) -> Result<()> {
        let start = Instant::now();
        let mut seen: Vec<u8> = Vec::with_capacity(token.len());
        let mut chunk = Vec::new();

        loop {
            let remaining = timeout.saturating_sub(start.elapsed());
            if remaining.is_zero() {
                return Err(Error::Timeout(format!(
                    "no \"{}\" within {}ms",
                    verbs::display(token),
                    timeout.as_millis()
                )));
            }

            match self.read_in_loop(&mut chunk, remaining) {
                Ok(()) => seen.extend_from_slice(&chunk),
                Err(Error::Timeout(_)) => {} // deadline check above decides
                Err(e) => return Err(e),
            }

            if seen == token {
                trace!("<- {}", verbs::display(token));
                return Ok(());
            }
            if !seen.is_empty() && !token.starts_with(&seen) {
                return Err(Error::Protocol(format!(
                    "expected \"{}\", got \"{}\"",
                    verbs::display(token),
                    verbs::display(&seen)
                )));
            }
        }
    }

    /// Read one length-prefixed byte stream into `out`.
    ///
    /// Waits for the 4-byte little-endian size header, validates the
    /// declared length against the frame bounds before reading a single
    /// payload byte, then reads until `out` holds exactly that many bytes.
    pub fn read_byte_stream(&mut self, out: &mut Vec<u8>, timeout: Duration) -> Result<()> {
        let start = Instant::now();
        out.clear();

        while self.channel.bytes_available() < 4 {
            if !self.channel.is_connected() {
                return Err(transport_closed());
            }
            if start.elapsed() >= timeout {
                return Err(Error::Timeout("no length header".to_string()));
            }
            thread::sleep(POLL_INTERVAL);
        }

        let mut header = [0u8; 4];
        if self.channel.raw_read(&mut header) != 4 {
            return Err(transport_closed());
        }
        let declared = u32::from_le_bytes(header) as usize;
        if declared == 0 || declared > frame::MAX_RAW_LEN {
            return Err(Error::Frame(format!(
                "declared length {declared} outside 1..={}",
                frame::MAX_RAW_LEN
            )));
        }

        out.resize(declared, 0);
        let mut filled = 0;
        while filled < declared {
            if !self.channel.is_connected() {
                return Err(transport_closed());
            }
            if start.elapsed() >= timeout {
                return Err(Error::Timeout(format!(
                    "{filled} of {declared} payload bytes"
                )));
            }

            let want = self.channel.bytes_available().min(declared - filled);
            if want == 0 {
                thread::sleep(POLL_INTERVAL);
                continue;
            }
            let read = self.channel.raw_read(&mut out[filled..filled + want]);
            if read == 0 {
                return Err(transport_closed());
            }
            filled += read;
        }

        trace!("<- byte stream of {declared} bytes");
        Ok(())
    }
}
