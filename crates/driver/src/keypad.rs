//! Deferred key processing
//!
//! The keypad completion only stores the key code and queues the session on
//! a bounded channel. A dedicated worker thread per session drains that
//! channel and turns each key into display packets. The worker may block on
//! the display gate; completions never do.

use crate::gate::InterruptSignal;
use crate::session::Session;
use async_channel::{Receiver, Sender, TrySendError, bounded};
use protocol::{BLANK, Column, Frame, KeyAction, KeyCode};
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::thread::JoinHandle;
use tracing::{debug, trace, warn};

/// Queued work items per session
///
/// The pending flag allows at most one queued run, so one slot is enough.
const KEY_QUEUE_DEPTH: usize = 1;

/// Create the queue feeding one session's key worker
pub(crate) fn key_queue() -> (Sender<Arc<Session>>, Receiver<Arc<Session>>) {
    bounded(KEY_QUEUE_DEPTH)
}

/// Spawn the worker draining `queue` until it is closed and empty
pub(crate) fn spawn_key_worker(
    minor: u32,
    queue: Receiver<Arc<Session>>,
) -> std::io::Result<JoinHandle<()>> {
    std::thread::Builder::new()
        .name(format!("keypad-{}", minor))
        .spawn(move || {
            debug!("Key worker for minor {} started", minor);
            // Nothing raises this; teardown reaches the worker through the gate
            let signal = InterruptSignal::new();
            while let Ok(session) = queue.recv_blocking() {
                process_key(&session, &signal);
            }
            debug!("Key worker for minor {} stopped", minor);
        })
}

impl Session {
    /// Queue one run of the key processor unless one is already queued
    pub(crate) fn schedule_key_work(self: &Arc<Self>) {
        if self.key_work_pending.swap(true, Ordering::AcqRel) {
            trace!("Minor {}: key work already queued, coalescing", self.minor);
            return;
        }

        match self.key_queue.try_send(Arc::clone(self)) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                self.key_work_pending.store(false, Ordering::Release);
                warn!("Minor {}: key queue full, dropping key", self.minor);
            }
            Err(TrySendError::Closed(_)) => {
                self.key_work_pending.store(false, Ordering::Release);
                debug!("Minor {}: key queue closed, dropping key", self.minor);
            }
        }
    }
}

/// Run the key processor once against the latest stored key code
pub fn process_key(session: &Arc<Session>, signal: &InterruptSignal) {
    session.key_work_pending.store(false, Ordering::Release);
    let key = session.last_key();

    match key.action(session.delete_key()) {
        KeyAction::Delete => delete_previous(session, signal),
        KeyAction::Echo(code) => echo(session, code, signal),
    }
}

/// Print one character at the cursor
fn echo(session: &Arc<Session>, code: u8, signal: &InterruptSignal) {
    if !session.cursor().advance() {
        trace!("Minor {}: line full, ignoring {}", session.minor(), KeyCode(code));
        return;
    }

    if let Err(e) = session.send(Frame::Data(&[code]), signal) {
        warn!(
            "Minor {}: echo of {} abandoned: {}",
            session.minor(),
            KeyCode(code),
            e
        );
    }
}

/// Blank the previous cell: cursor back, print a blank, cursor back again
///
/// Each step takes the gate separately. A step that cannot take it is
/// skipped; column changes made by earlier steps stay applied.
fn delete_previous(session: &Arc<Session>, signal: &InterruptSignal) {
    if session.column() == 0 {
        trace!("Minor {}: delete at column 0 ignored", session.minor());
        return;
    }

    step_back(session, signal, "cursor back");

    match session.gate.acquire(signal) {
        Ok(transfer) => {
            if let Err(e) = session.submit_frame(transfer, &Frame::Data(&[BLANK])) {
                warn!("Minor {}: delete step blank failed: {}", session.minor(), e);
            }
            session.cursor().advance();
        }
        Err(e) => warn!("Minor {}: delete step blank abandoned: {}", session.minor(), e),
    }

    step_back(session, signal, "cursor restore");
}

fn step_back(session: &Arc<Session>, signal: &InterruptSignal, step: &str) {
    let transfer = match session.gate.acquire(signal) {
        Ok(transfer) => transfer,
        Err(e) => {
            warn!("Minor {}: delete step {} abandoned: {}", session.minor(), step, e);
            return;
        }
    };

    let Some(column) = session.cursor().retreat() else {
        session.gate.release(transfer);
        return;
    };

    let frame = match Column::new(column) {
        Ok(column) => Frame::Command(column.command()),
        Err(e) => {
            session.gate.release(transfer);
            warn!("Minor {}: delete step {} failed: {}", session.minor(), step, e);
            return;
        }
    };

    if let Err(e) = session.submit_frame(transfer, &frame) {
        warn!("Minor {}: delete step {} failed: {}", session.minor(), step, e);
    }
}
