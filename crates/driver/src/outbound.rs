//! Display transfers
//!
//! [`Session::send`] returns as soon as the packet is queued. The gate
//! stays taken until [`Session::outbound_complete`] runs, which is what
//! keeps at most one display packet in flight per device.

use crate::error::{DriverError, Result};
use crate::gate::InterruptSignal;
use crate::session::Session;
use crate::transfer::{SubmitError, Transfer, TransferStatus};
use protocol::{Frame, encode_frame};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

impl Session {
    /// Queue one display packet
    ///
    /// Blocks while another packet is in flight. Never waits for the device
    /// to acknowledge this one; failures after submission only show up in
    /// the logs.
    pub fn send(self: &Arc<Self>, frame: Frame<'_>, signal: &InterruptSignal) -> Result<()> {
        let transfer = self.gate.acquire(signal)?;
        self.submit_frame(transfer, &frame)
    }

    /// Encode `frame` into the acquired descriptor and submit it
    ///
    /// On any error the descriptor goes straight back to the gate.
    pub(crate) fn submit_frame(self: &Arc<Self>, mut transfer: Transfer, frame: &Frame<'_>) -> Result<()> {
        let length = match encode_frame(frame, transfer.buffer_mut()) {
            Ok(length) => length,
            Err(e) => {
                self.gate.release(transfer);
                return Err(e.into());
            }
        };
        transfer.set_length(length);

        debug!(
            "Minor {}: submitting {:?} packet of {} bytes on {:#04x}",
            self.minor,
            frame.marker(),
            length,
            self.bulk_out.address
        );

        let session = Arc::clone(self);
        let completion = Box::new(move |transfer: Transfer, status: TransferStatus| {
            session.outbound_complete(transfer, status)
        });

        match self.transport.submit(transfer, completion) {
            Ok(()) => Ok(()),
            Err(SubmitError { transfer, reason }) => {
                error!("Minor {}: display packet rejected: {}", self.minor, reason);
                self.gate.release(transfer);
                Err(DriverError::TransferRejected(reason))
            }
        }
    }

    /// Completion of a display packet (completion context, must not block)
    pub(crate) fn outbound_complete(&self, transfer: Transfer, status: TransferStatus) {
        match status {
            TransferStatus::Completed => {
                debug!(
                    "Minor {}: display packet acknowledged ({} bytes)",
                    self.minor,
                    transfer.actual()
                );
                self.gate.release(transfer);
            }
            TransferStatus::PeerReset => {
                warn!("Minor {}: display endpoint reset, packet lost", self.minor);
                self.gate.release(transfer);
            }
            TransferStatus::Failed(reason) => {
                warn!("Minor {}: display packet failed: {}", self.minor, reason);
                self.gate.release(transfer);
            }
            TransferStatus::DeviceGone | TransferStatus::Cancelled => {
                info!(
                    "Minor {}: display endpoint shut down ({}), retiring descriptor",
                    self.minor, status
                );
                drop(transfer);
                self.gate.close();
            }
        }
    }
}
