//! Keypad listening
//!
//! One IN transfer stays queued on the interrupt endpoint for the whole
//! life of the session. Every completion re-arms it with the same
//! descriptor, except when the device is gone or detach has started.

use crate::error::{DriverError, Result};
use crate::session::Session;
use crate::transfer::{SubmitError, Transfer, TransferStatus};
use std::sync::Arc;
use std::sync::atomic::Ordering;
use tracing::{debug, error, info, trace, warn};

impl Session {
    /// Arm the keypad transfer for the first time
    pub(crate) fn start_listening(self: &Arc<Self>) -> Result<()> {
        let mut state = self.inbound_state();
        if state.detached {
            return Err(DriverError::DeviceGone);
        }
        let transfer = state.idle.take().ok_or(DriverError::TransferRejected(
            "keypad transfer already in flight".to_string(),
        ))?;

        self.arm_inbound(transfer).map_err(|SubmitError { transfer, reason }| {
            state.idle = Some(transfer);
            DriverError::TransferRejected(reason)
        })?;

        debug!(
            "Minor {}: listening on interrupt endpoint {:#04x}",
            self.minor, self.interrupt_in.address
        );
        Ok(())
    }

    /// Stop re-arming and kill the queued keypad transfer
    ///
    /// After this returns no completion resubmits and no new key work is
    /// scheduled. The cancelled transfer may still complete later.
    pub(crate) fn stop_listening(&self) {
        {
            let mut state = self.inbound_state();
            if state.detached {
                return;
            }
            state.detached = true;
        }
        self.key_queue.close();
        self.transport.cancel(self.interrupt_in.address);
        debug!("Minor {}: keypad listening stopped", self.minor);
    }

    /// Submit `transfer` on the interrupt endpoint
    ///
    /// Callers hold the inbound lock, so this must not block.
    fn arm_inbound(self: &Arc<Self>, mut transfer: Transfer) -> std::result::Result<(), SubmitError> {
        transfer.prepare_read();
        let session = Arc::clone(self);
        self.transport.submit(
            transfer,
            Box::new(move |transfer: Transfer, status: TransferStatus| {
                session.inbound_complete(transfer, status)
            }),
        )
    }

    /// Completion of the keypad transfer (completion context, must not block)
    fn inbound_complete(self: &Arc<Self>, transfer: Transfer, status: TransferStatus) {
        let mut state = self.inbound_state();

        match &status {
            TransferStatus::Completed => match transfer.received().first() {
                Some(&code) if !state.detached => {
                    self.key_code.store(code, Ordering::Release);
                    trace!("Minor {}: key {:#04x} received", self.minor, code);
                    self.schedule_key_work();
                }
                Some(_) => {}
                None => trace!("Minor {}: empty keypad report", self.minor),
            },
            TransferStatus::DeviceGone | TransferStatus::Cancelled => {
                info!(
                    "Minor {}: keypad endpoint shut down ({}), no longer listening",
                    self.minor, status
                );
                state.idle = Some(transfer);
                return;
            }
            TransferStatus::PeerReset | TransferStatus::Failed(_) => {
                warn!("Minor {}: keypad transfer {}", self.minor, status);
            }
        }

        if state.detached {
            state.idle = Some(transfer);
            return;
        }

        if let Err(SubmitError { transfer, reason }) = self.arm_inbound(transfer) {
            error!(
                "Minor {}: failed to resubmit keypad transfer: {}",
                self.minor, reason
            );
            state.idle = Some(transfer);
        }
    }

    /// True while the keypad transfer is queued
    pub fn is_listening(&self) -> bool {
        let state = self.inbound_state();
        !state.detached && state.idle.is_none()
    }
}
