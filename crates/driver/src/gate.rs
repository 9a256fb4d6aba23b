//! Single-slot gate around the display transfer descriptor
//!
//! The gate holds the OUT descriptor while no transfer is in flight.
//! Acquiring takes the descriptor out; only the completion path puts it
//! back, so a second sender waits until the device acknowledged the first
//! packet instead of overwriting a buffer still being transmitted.

use crate::error::{DriverError, Result};
use crate::transfer::Transfer;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::Duration;
use tracing::trace;

/// How often a waiter re-checks its interrupt signal
const SIGNAL_POLL_INTERVAL: Duration = Duration::from_millis(20);

/// External request to abandon a blocked wait (Ctrl+C on a write)
#[derive(Debug, Clone, Default)]
pub struct InterruptSignal(Arc<AtomicBool>);

impl InterruptSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn raise(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn clear(&self) {
        self.0.store(false, Ordering::Release);
    }

    pub fn is_raised(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

#[derive(Debug)]
struct Slot {
    transfer: Option<Transfer>,
    closed: bool,
}

/// Mutual exclusion for the single OUT descriptor
#[derive(Debug)]
pub struct OutboundGate {
    slot: Mutex<Slot>,
    ready: Condvar,
}

impl OutboundGate {
    pub fn new(transfer: Transfer) -> Self {
        Self {
            slot: Mutex::new(Slot {
                transfer: Some(transfer),
                closed: false,
            }),
            ready: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Slot> {
        self.slot.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Block until the descriptor is free and take it
    ///
    /// Fails with [`DriverError::Interrupted`] once `signal` is raised and
    /// with [`DriverError::DeviceGone`] once the gate is closed.
    pub fn acquire(&self, signal: &InterruptSignal) -> Result<Transfer> {
        let mut slot = self.lock();
        loop {
            if slot.closed {
                return Err(DriverError::DeviceGone);
            }
            if signal.is_raised() {
                return Err(DriverError::Interrupted);
            }
            if let Some(transfer) = slot.transfer.take() {
                trace!("Acquired display gate");
                return Ok(transfer);
            }
            slot = match self.ready.wait_timeout(slot, SIGNAL_POLL_INTERVAL) {
                Ok((guard, _)) => guard,
                Err(poisoned) => poisoned.into_inner().0,
            };
        }
    }

    /// Hand the descriptor back and wake one waiter
    pub fn release(&self, transfer: Transfer) {
        let mut slot = self.lock();
        slot.transfer = Some(transfer);
        drop(slot);
        self.ready.notify_one();
        trace!("Released display gate");
    }

    /// Fail every current and future acquisition with `DeviceGone`
    pub fn close(&self) {
        self.lock().closed = true;
        self.ready.notify_all();
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// True when no OUT transfer is in flight
    pub fn is_idle(&self) -> bool {
        self.lock().transfer.is_some()
    }
}
