//! Mode slot pull and push.
//!
//! Badge modes live in numbered slots. Their payloads are opaque to the
//! host; layout and semantics belong to the badge firmware. This layer
//! only moves integrity-checked byte buffers in and out.
//!
//! ## Protocol Overview
//!
//! Push, per slot:
//!
//! ```text
//! host: "save"  ->  badge: "ready"
//! host: "<slot>" -> badge: "ready"
//! host: [frame: payload] -> badge: "done"
//! ```
//!
//! Pull, per slot:
//!
//! ```text
//! host: "load"  ->  badge: "ready"
//! host: "<slot>" -> badge: [4-byte LE length][payload + CRC16]
//! ```
//!
//! The first failure anywhere in a batch aborts the remaining slots.
//! Already-transferred slots are not rolled back.

use std::time::Duration;

use log::{debug, info};

use crate::error::{Error, Result};
use crate::protocol::frame::Frame;
use crate::protocol::verbs;
use crate::session::DeviceSession;

/// Timeouts for mode transfers.
#[derive(Debug, Clone)]
pub struct ModeConfig {
    /// Wait for the `ready` acknowledgments.
    pub ready_timeout: Duration,
    /// Wait for the per-slot `done` acknowledgment.
    pub ack_timeout: Duration,
    /// Wait for a pulled payload to arrive in full.
    pub read_timeout: Duration,
}

impl Default for ModeConfig {
    fn default() -> Self {
        Self {
            ready_timeout: Duration::from_secs(2),
            ack_timeout: Duration::from_secs(2),
            read_timeout: Duration::from_secs(5),
        }
    }
}

/// Mode slot transfer procedure over one session.
pub struct ModeTransfer<'a> {
    session: &'a DeviceSession,
    config: ModeConfig,
}

impl<'a> ModeTransfer<'a> {
    /// Create a transfer procedure with default timeouts.
    #[must_use]
    pub fn new(session: &'a DeviceSession) -> Self {
        Self::with_config(session, ModeConfig::default())
    }

    /// Create a transfer procedure with custom timeouts.
    #[must_use]
    pub fn with_config(session: &'a DeviceSession, config: ModeConfig) -> Self {
        Self { session, config }
    }

    /// Push payloads into badge slots.
    ///
    /// `progress` receives `(slots_done, slots_total)` after each stored
    /// slot.
    pub fn push<F>(&self, slots: &[(u8, Vec<u8>)], mut progress: F) -> Result<()>
    where
        F: FnMut(usize, usize),
    {
        info!("pushing {} mode slot(s)", slots.len());

        let mut exchange = self.session.exchange();
        for (done, (slot, payload)) in slots.iter().enumerate() {
            if crate::is_interrupt_requested() {
                return Err(Error::Cancelled);
            }
            debug!("pushing {} bytes into slot {slot}", payload.len());

            exchange.write_token(verbs::SAVE_MODE)?;
            exchange.expect(verbs::READY, self.config.ready_timeout)?;
            exchange.write_token(slot.to_string().as_bytes())?;
            exchange.expect(verbs::READY, self.config.ready_timeout)?;
            exchange.write_frame(&Frame::new(payload.clone())?)?;
            exchange.expect(verbs::DONE, self.config.ack_timeout)?;

            progress(done + 1, slots.len());
        }

        Ok(())
    }

    /// Pull payloads out of badge slots, in the order given.
    ///
    /// Each payload arrives as a length-prefixed, CRC-tagged frame and is
    /// validated before it is returned.
    pub fn pull<F>(&self, slots: &[u8], mut progress: F) -> Result<Vec<Vec<u8>>>
    where
        F: FnMut(usize, usize),
    {
        info!("pulling {} mode slot(s)", slots.len());

        let mut payloads = Vec::with_capacity(slots.len());
        let mut raw = Vec::new();
        let mut exchange = self.session.exchange();
        for (done, slot) in slots.iter().enumerate() {
            if crate::is_interrupt_requested() {
                return Err(Error::Cancelled);
            }
            debug!("pulling slot {slot}");

            exchange.write_token(verbs::LOAD_MODE)?;
            exchange.expect(verbs::READY, self.config.ready_timeout)?;
            exchange.write_token(slot.to_string().as_bytes())?;
            exchange.read_byte_stream(&mut raw, self.config.read_timeout)?;

            payloads.push(Frame::from_raw(&raw)?.into_payload());
            progress(done + 1, slots.len());
        }

        Ok(payloads)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{Link, TransportChannel};
    use std::collections::VecDeque;
    use std::io::{self, Read, Write};
    use std::sync::{Arc, Mutex};

    /// Scripted badge mode store. Understands the save/load sequences and
    /// records every stored payload.
    #[derive(Default)]
    struct ModeStore {
        pending: Vec<u8>,
        replies: VecDeque<u8>,
        stage: Stage,
        stored: Vec<(u8, Vec<u8>)>,
        /// Pre-loaded slot contents served on "load".
        slots: Vec<(u8, Vec<u8>)>,
        /// After this many completed slots, stop acknowledging.
        fail_after: Option<usize>,
        completed: usize,
    }

    #[derive(Default, Clone, Copy, PartialEq)]
    enum Stage {
        #[default]
        AwaitVerb,
        AwaitSaveSlot,
        AwaitPayload {
            slot: u8,
        },
        AwaitLoadSlot,
    }

    impl ModeStore {
        fn silenced(&self) -> bool {
            self.fail_after.is_some_and(|n| self.completed >= n)
        }

        fn reply(&mut self, bytes: &[u8]) {
            if !self.silenced() {
                self.replies.extend(bytes.iter().copied());
            }
        }

        fn take_frame(&mut self) -> Option<Vec<u8>> {
            if self.pending.len() < 4 {
                return None;
            }
            let declared = u32::from_le_bytes([
                self.pending[0],
                self.pending[1],
                self.pending[2],
                self.pending[3],
            ]) as usize;
            if self.pending.len() < 4 + declared {
                return None;
            }
            let raw: Vec<u8> = self.pending.drain(..4 + declared).skip(4).collect();
            Some(raw)
        }

        fn parse_slot(&mut self) -> Option<u8> {
            // Slot indices are written as ASCII decimals; a verb never
            // starts with a digit, so the first non-digit ends the number.
            if self.pending.is_empty() || !self.pending[0].is_ascii_digit() {
                return None;
            }
            // Single-digit slots only in these tests, so everything
            // buffered is the whole number.
            let text: String = self.pending.iter().map(|&b| b as char).collect();
            self.pending.clear();
            text.parse().ok()
        }

        fn on_bytes(&mut self, bytes: &[u8]) {
            self.pending.extend_from_slice(bytes);

            match self.stage {
                Stage::AwaitVerb => {
                    if self.pending == verbs::SAVE_MODE {
                        self.pending.clear();
                        self.stage = Stage::AwaitSaveSlot;
                        self.reply(verbs::READY);
                    } else if self.pending == verbs::LOAD_MODE {
                        self.pending.clear();
                        self.stage = Stage::AwaitLoadSlot;
                        self.reply(verbs::READY);
                    }
                }
                Stage::AwaitSaveSlot => {
                    if let Some(slot) = self.parse_slot() {
                        self.stage = Stage::AwaitPayload { slot };
                        self.reply(verbs::READY);
                    }
                }
                Stage::AwaitPayload { slot } => {
                    if let Some(raw) = self.take_frame() {
                        let frame = Frame::from_raw(&raw).expect("payload frame CRC");
                        self.stored.push((slot, frame.into_payload()));
                        self.stage = Stage::AwaitVerb;
                        self.completed += 1;
                        self.reply(verbs::DONE);
                    }
                }
                Stage::AwaitLoadSlot => {
                    if let Some(slot) = self.parse_slot() {
                        let payload = self
                            .slots
                            .iter()
                            .find(|(s, _)| *s == slot)
                            .map(|(_, p)| p.clone())
                            .unwrap_or_else(|| vec![0u8; 1]);
                        let raw = Frame::new(payload).unwrap().to_raw();
                        #[allow(clippy::cast_possible_truncation)]
                        let wire_len = raw.len() as u32;
                        self.stage = Stage::AwaitVerb;
                        self.completed += 1;
                        if !self.silenced() {
                            let mut wire = wire_len.to_le_bytes().to_vec();
                            wire.extend_from_slice(&raw);
                            self.replies.extend(wire);
                        }
                    }
                }
            }
        }
    }

    struct ModeStoreLink {
        state: Arc<Mutex<ModeStore>>,
    }

    impl ModeStoreLink {
        fn new() -> (Self, Arc<Mutex<ModeStore>>) {
            let state = Arc::new(Mutex::new(ModeStore::default()));
            (
                Self {
                    state: Arc::clone(&state),
                },
                state,
            )
        }
    }

    impl Read for ModeStoreLink {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            let mut state = self.state.lock().unwrap();
            if state.replies.is_empty() {
                return Err(io::Error::new(io::ErrorKind::TimedOut, "no data"));
            }
            let n = buf.len().min(state.replies.len());
            for slot in buf.iter_mut().take(n) {
                *slot = state.replies.pop_front().unwrap();
            }
            Ok(n)
        }
    }

    impl Write for ModeStoreLink {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.state.lock().unwrap().on_bytes(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl Link for ModeStoreLink {
        fn bytes_available(&mut self) -> crate::Result<usize> {
            Ok(self.state.lock().unwrap().replies.len())
        }

        fn name(&self) -> &str {
            "mode-store"
        }

        fn close(&mut self) -> crate::Result<()> {
            Ok(())
        }
    }

    fn quick_config() -> ModeConfig {
        ModeConfig {
            ready_timeout: Duration::from_millis(100),
            ack_timeout: Duration::from_millis(100),
            read_timeout: Duration::from_millis(200),
        }
    }

    fn session_with_store() -> (DeviceSession, Arc<Mutex<ModeStore>>) {
        let (link, state) = ModeStoreLink::new();
        let session = DeviceSession::new(TransportChannel::from_link(Box::new(link)));
        (session, state)
    }

    #[test]
    fn test_push_stores_each_slot_in_order() {
        let _interrupts = crate::testutil::interrupt_lock();
        crate::test_set_interrupted(false);
        let (session, state) = session_with_store();

        let slots = vec![
            (0u8, b"sparkle".to_vec()),
            (1u8, b"breathe".to_vec()),
            (2u8, b"strobe".to_vec()),
        ];
        let mut reports = Vec::new();
        ModeTransfer::with_config(&session, quick_config())
            .push(&slots, |done, total| reports.push((done, total)))
            .unwrap();

        assert_eq!(state.lock().unwrap().stored, slots);
        assert_eq!(reports, vec![(1, 3), (2, 3), (3, 3)]);
    }

    #[test]
    fn test_push_aborts_batch_on_first_failure() {
        let _interrupts = crate::testutil::interrupt_lock();
        crate::test_set_interrupted(false);
        let (session, state) = session_with_store();
        state.lock().unwrap().fail_after = Some(1);

        let slots = vec![
            (0u8, b"sparkle".to_vec()),
            (1u8, b"breathe".to_vec()),
            (2u8, b"strobe".to_vec()),
        ];
        let result = ModeTransfer::with_config(&session, quick_config()).push(&slots, |_, _| {});

        assert!(matches!(result, Err(Error::Timeout(_))));
        // Slot 0 landed before the badge went silent; nothing after it did.
        assert_eq!(state.lock().unwrap().stored.len(), 1);
    }

    #[test]
    fn test_pull_returns_validated_payloads() {
        let _interrupts = crate::testutil::interrupt_lock();
        crate::test_set_interrupted(false);
        let (session, state) = session_with_store();
        state.lock().unwrap().slots = vec![
            (3u8, b"comet-tail".to_vec()),
            (7u8, b"ember-fade".to_vec()),
        ];

        let payloads = ModeTransfer::with_config(&session, quick_config())
            .pull(&[3, 7], |_, _| {})
            .unwrap();

        assert_eq!(payloads, vec![b"comet-tail".to_vec(), b"ember-fade".to_vec()]);
    }

    #[test]
    fn test_pull_aborts_batch_when_badge_goes_silent() {
        let _interrupts = crate::testutil::interrupt_lock();
        crate::test_set_interrupted(false);
        let (session, state) = session_with_store();
        {
            let mut state = state.lock().unwrap();
            state.slots = vec![(0u8, b"aurora".to_vec())];
            state.fail_after = Some(1);
        }

        let result = ModeTransfer::with_config(&session, quick_config()).pull(&[0, 1], |_, _| {});
        assert!(matches!(result, Err(Error::Timeout(_))));
    }

    #[test]
    fn test_push_interrupt_cancels() {
        let _interrupts = crate::testutil::interrupt_lock();
        crate::test_set_interrupted(true);
        let (session, _state) = session_with_store();

        let result = ModeTransfer::with_config(&session, quick_config())
            .push(&[(0, b"x".to_vec())], |_, _| {});
        assert!(matches!(result, Err(Error::Cancelled)));

        crate::test_set_interrupted(false);
    }
}
