//! Attach, detach, open and close
//!
//! Detach runs in a fixed order: stop keypad listening (no new key work),
//! drain the key worker, close the display gate, then drop the attach
//! reference. The session itself is released whenever the last reference
//! (client handle, in-flight completion) goes away.

use crate::endpoint::{self, EndpointDescriptor};
use crate::error::{DriverError, Result};
use crate::gate::InterruptSignal;
use crate::keypad;
use crate::session::{Session, SessionOptions};
use crate::transfer::Transport;
use protocol::{DISPLAY_COLUMNS, Frame};
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::thread::JoinHandle;
use tracing::{debug, error, info};

/// A device as seen by the lifecycle manager between attach and detach
///
/// Holds the attach reference to the session and owns the key worker.
/// Dropping an attachment detaches it.
pub struct Attachment {
    session: Arc<Session>,
    key_worker: Option<JoinHandle<()>>,
}

/// Bring up a session for a newly present device
///
/// Resolves both endpoints, starts the key worker and arms the keypad
/// transfer. Any failure tears down everything built so far.
pub fn attach(
    minor: u32,
    descriptors: &[EndpointDescriptor],
    transport: Arc<dyn Transport>,
    options: SessionOptions,
) -> Result<Attachment> {
    let channels = endpoint::resolve(descriptors)?;

    let (queue_tx, queue_rx) = keypad::key_queue();
    let session = Arc::new(Session::new(minor, channels, transport, queue_tx, options));

    let key_worker = keypad::spawn_key_worker(minor, queue_rx)
        .map_err(|e| DriverError::ResourceExhausted(format!("key worker thread: {}", e)))?;

    let mut attachment = Attachment {
        session,
        key_worker: Some(key_worker),
    };

    if let Err(e) = attachment.session.start_listening() {
        error!("Minor {}: failed to start keypad listening: {}", minor, e);
        attachment.quiesce();
        return Err(e);
    }

    info!(
        "Attached minor {}: display on {:#04x}, keypad on {:#04x}",
        minor,
        attachment.session.bulk_out().address,
        attachment.session.interrupt_in().address
    );
    Ok(attachment)
}

impl Attachment {
    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    pub fn minor(&self) -> u32 {
        self.session.minor()
    }

    /// Tear the device down and release the attach reference
    pub fn detach(mut self) {
        self.quiesce();
    }

    /// Stop listening, drain key work and close the gate
    ///
    /// Idempotent. An OUT packet already in flight is left to complete.
    pub(crate) fn quiesce(&mut self) {
        if let Some(detaching) = self.begin_detach() {
            detaching.drain();
        }
    }

    /// Stop keypad listening and hand out the key worker for draining
    ///
    /// Never blocks. Returns `None` once detach has already begun.
    pub(crate) fn begin_detach(&mut self) -> Option<Detaching> {
        let worker = self.key_worker.take()?;
        debug!("Minor {}: detaching", self.session.minor());

        self.session.stop_listening();
        Some(Detaching {
            session: Arc::clone(&self.session),
            worker,
        })
    }
}

/// A detach in progress whose key work has not been drained yet
pub(crate) struct Detaching {
    session: Arc<Session>,
    worker: JoinHandle<()>,
}

impl Detaching {
    /// Wait for queued key work to finish, then close the display gate
    pub(crate) fn drain(self) {
        let minor = self.session.minor();

        if self.worker.join().is_err() {
            error!("Minor {}: key worker panicked", minor);
        }

        self.session.gate.close();
        // Not counting this handle and the attachment
        info!(
            "Detached minor {} ({} references outstanding)",
            minor,
            self.session.ref_count().saturating_sub(2)
        );
    }
}

impl Drop for Attachment {
    fn drop(&mut self) {
        self.quiesce();
    }
}

/// One client's claim on a session
///
/// Created by [`Session::open`]; dropping it closes the session.
pub struct ClientHandle {
    session: Option<Arc<Session>>,
}

impl ClientHandle {
    pub(crate) fn new(session: Arc<Session>) -> Self {
        Self {
            session: Some(session),
        }
    }

    fn session(&self) -> Result<&Arc<Session>> {
        self.session.as_ref().ok_or(DriverError::DeviceGone)
    }

    pub fn minor(&self) -> Option<u32> {
        self.session.as_ref().map(|s| s.minor())
    }

    /// Print `bytes` at the cursor
    ///
    /// Only what still fits on the line is sent, at most one line per call;
    /// the rest is silently dropped. Reports the whole input as consumed.
    ///
    /// Columns are reserved before waiting for the display and handed back
    /// if the send fails, so an interrupted or rejected write leaves the
    /// cursor where it was instead of advancing past characters never shown.
    pub fn write(&self, bytes: &[u8], signal: &InterruptSignal) -> Result<usize> {
        let session = self.session()?;

        let wanted = bytes
            .len()
            .min(DISPLAY_COLUMNS as usize)
            .min(session.max_payload());
        let granted = session.cursor().reserve(wanted);
        if granted == 0 {
            debug!(
                "Minor {}: line full, dropping {} bytes",
                session.minor(),
                bytes.len()
            );
            return Ok(bytes.len());
        }

        if let Err(e) = session.send(Frame::Data(&bytes[..granted]), signal) {
            session.cursor().give_back(granted);
            return Err(e);
        }

        Ok(bytes.len())
    }

    /// Keypad reads are not implemented; always returns zero bytes
    pub fn read(&self, _buffer: &mut [u8]) -> Result<usize> {
        self.session()?;
        Ok(0)
    }

    /// Give up the session so another client can open it
    pub fn close(mut self) {
        self.release();
    }

    /// Clears the open flag before dropping the reference. The flag is
    /// cleared even if other references remain, since only one handle can
    /// exist at a time.
    fn release(&mut self) {
        if let Some(session) = self.session.take() {
            session.client_attached.store(false, Ordering::Release);
            debug!("Closed session for minor {}", session.minor());
        }
    }
}

impl Drop for ClientHandle {
    fn drop(&mut self) {
        self.release();
    }
}

impl std::fmt::Debug for ClientHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientHandle")
            .field("minor", &self.minor())
            .finish()
    }
}
