//! Shared in-memory link for protocol tests.

use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};

use crate::error::Result;
use crate::transport::Link;

/// Serializes tests that touch the process-wide interrupt checker.
pub(crate) fn interrupt_lock() -> MutexGuard<'static, ()> {
    static LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    LOCK.get_or_init(|| Mutex::new(()))
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
}

/// Inspectable state behind a [`MockLink`].
#[derive(Default)]
pub(crate) struct MockState {
    /// Bytes the "badge" has queued for the host.
    pub read_buf: VecDeque<u8>,
    /// Every byte the host wrote, in order.
    pub written: Vec<u8>,
    /// Size of each underlying write call.
    pub write_sizes: Vec<usize>,
    /// Number of flush calls.
    pub flushes: usize,
    /// Cap on bytes returned per read call.
    pub max_read: Option<usize>,
    /// Cap on total successful write calls.
    pub write_limit: Option<usize>,
    /// Report this many available bytes regardless of `read_buf`.
    pub force_available: Option<usize>,
    /// Fail every read with this error kind.
    pub fail_reads_with: Option<io::ErrorKind>,
    /// Return EOF instead of a timeout once `read_buf` drains.
    pub eof_after_drain: bool,
    /// Set by `close`.
    pub closed: bool,
}

/// A [`Link`] over shared in-memory buffers.
pub(crate) struct MockLink {
    state: Arc<Mutex<MockState>>,
}

impl MockLink {
    /// Create a link plus a handle to inspect and script it.
    pub fn new() -> (Self, Arc<Mutex<MockState>>) {
        let state = Arc::new(Mutex::new(MockState::default()));
        (
            Self {
                state: Arc::clone(&state),
            },
            state,
        )
    }

    /// Create a link with `data` queued for the host to read.
    pub fn with_data(data: &[u8]) -> (Self, Arc<Mutex<MockState>>) {
        let (link, state) = Self::new();
        state.lock().unwrap().read_buf.extend(data.iter().copied());
        (link, state)
    }
}

impl Read for MockLink {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut state = self.state.lock().unwrap();
        if let Some(kind) = state.fail_reads_with {
            return Err(io::Error::new(kind, "scripted read failure"));
        }
        if state.read_buf.is_empty() {
            if state.eof_after_drain {
                return Ok(0);
            }
            return Err(io::Error::new(io::ErrorKind::TimedOut, "no data"));
        }

        let mut n = buf.len().min(state.read_buf.len());
        if let Some(cap) = state.max_read {
            n = n.min(cap);
        }
        for slot in buf.iter_mut().take(n) {
            *slot = state.read_buf.pop_front().unwrap();
        }
        Ok(n)
    }
}

impl Write for MockLink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut state = self.state.lock().unwrap();
        if let Some(limit) = state.write_limit {
            if state.write_sizes.len() >= limit {
                return Err(io::Error::new(io::ErrorKind::BrokenPipe, "write limit hit"));
            }
        }
        state.written.extend_from_slice(buf);
        state.write_sizes.push(buf.len());
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.state.lock().unwrap().flushes += 1;
        Ok(())
    }
}

impl Link for MockLink {
    fn bytes_available(&mut self) -> Result<usize> {
        let state = self.state.lock().unwrap();
        Ok(state.force_available.unwrap_or(state.read_buf.len()))
    }

    fn name(&self) -> &str {
        "mock"
    }

    fn close(&mut self) -> Result<()> {
        self.state.lock().unwrap().closed = true;
        Ok(())
    }
}
