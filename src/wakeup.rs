//! Cross-thread wakeup channel for reactor integration
//!
//! A pair of connected endpoints: the surrounding event loop registers the
//! readable end as one source in its blocking multi-source wait, and any
//! thread rings the writable end to interrupt that wait. Only edge-triggered
//! "something happened" semantics are carried; byte content and counts mean
//! nothing.

use crate::error::{Error, Result};
use std::io::{ErrorKind, Read, Write};
use std::os::fd::{AsFd, BorrowedFd};
use std::os::unix::io::{AsRawFd, RawFd};
use std::os::unix::net::UnixStream;
use tracing::debug;

/// Non-blocking signal channel usable as a pollable readiness source
pub struct WakeupPipe {
    reader: UnixStream,
    writer: UnixStream,
}

impl WakeupPipe {
    /// Creates the connected endpoint pair.
    ///
    /// The writable end is non-blocking so signaling never stalls the
    /// signaling thread, even with a full buffer; the readable end is
    /// non-blocking so draining never stalls the event loop. Fails with
    /// [`Error::Resource`]; a partially set up pair is closed before the
    /// error returns.
    pub fn new() -> Result<Self> {
        let (reader, writer) = UnixStream::pair()
            .map_err(|e| Error::Resource(format!("failed to create wakeup channel: {}", e)))?;

        writer.set_nonblocking(true).map_err(|e| {
            Error::Resource(format!("failed to set wakeup writer non-blocking: {}", e))
        })?;
        reader.set_nonblocking(true).map_err(|e| {
            Error::Resource(format!("failed to set wakeup reader non-blocking: {}", e))
        })?;

        Ok(Self { reader, writer })
    }

    /// Rings the channel.
    ///
    /// Never blocks. A full buffer is fine: readiness is already pending on
    /// the readable end, which is all the contract promises.
    pub fn notify(&self) {
        match (&self.writer).write(&[0u8]) {
            Ok(_) => {}
            Err(e) if e.kind() == ErrorKind::WouldBlock => {}
            Err(e) => debug!("Wakeup write failed: {}", e),
        }
    }

    /// Consumes every pending wakeup byte.
    ///
    /// Returns whether any signal was pending. After a drain the readable
    /// end reports no readiness until the next [`WakeupPipe::notify`].
    pub fn drain(&self) -> bool {
        let mut buf = [0u8; 64];
        let mut signalled = false;
        loop {
            match (&self.reader).read(&mut buf) {
                Ok(0) => break,
                Ok(_) => signalled = true,
                Err(e) if e.kind() == ErrorKind::WouldBlock => break,
                Err(e) => {
                    debug!("Wakeup drain failed: {}", e);
                    break;
                }
            }
        }
        signalled
    }

    /// Raw descriptor of the readable end, for reactor registration.
    pub fn as_raw_fd(&self) -> RawFd {
        self.reader.as_raw_fd()
    }
}

impl AsFd for WakeupPipe {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.reader.as_fd()
    }
}
