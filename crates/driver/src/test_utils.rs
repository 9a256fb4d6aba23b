//! Test utilities
//!
//! [`MockTransport`] stands in for the USB host: it records every
//! submission and leaves completion to the test, which decides when a
//! transfer finishes and with what status.
//!
//! # Example
//!
//! ```
//! use driver::test_utils::{KEYPAD_ENDPOINT, MockTransport, display_descriptors};
//! use driver::{SessionOptions, lifecycle};
//! use std::sync::Arc;
//!
//! let transport = Arc::new(MockTransport::with_auto_complete());
//! let attachment =
//!     lifecycle::attach(0, &display_descriptors(), transport.clone(), SessionOptions::default())
//!         .unwrap();
//! assert_eq!(transport.in_flight(KEYPAD_ENDPOINT), 1);
//! attachment.detach();
//! ```

use crate::endpoint::EndpointDescriptor;
use crate::transfer::{
    Completion, Direction, SubmitError, Transfer, TransferClass, TransferStatus, Transport,
};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

/// Default test timeout (5 seconds)
pub const DEFAULT_TEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Bulk OUT endpoint used by [`display_descriptors`]
pub const DISPLAY_ENDPOINT: u8 = 0x01;
/// Interrupt IN endpoint used by [`display_descriptors`]
pub const KEYPAD_ENDPOINT: u8 = 0x81;

/// Endpoint table of a typical display: 64-byte bulk OUT, 8-byte interrupt IN
pub fn display_descriptors() -> Vec<EndpointDescriptor> {
    vec![
        EndpointDescriptor::new(DISPLAY_ENDPOINT, TransferClass::Bulk, 64),
        EndpointDescriptor::new(KEYPAD_ENDPOINT, TransferClass::Interrupt, 8),
    ]
}

#[derive(Default)]
struct MockState {
    pending: VecDeque<(Transfer, Completion)>,
    sent: HashMap<u8, Vec<Vec<u8>>>,
    submissions: HashMap<u8, usize>,
    in_flight: HashMap<u8, usize>,
    peak_in_flight: HashMap<u8, usize>,
    cancelled: Vec<u8>,
    reject: Option<String>,
}

impl MockState {
    fn take_pending(&mut self, endpoint: u8) -> Option<(Transfer, Completion)> {
        let index = self
            .pending
            .iter()
            .position(|(transfer, _)| transfer.endpoint() == endpoint)?;
        let entry = self.pending.remove(index)?;
        self.finish(endpoint);
        Some(entry)
    }

    fn finish(&mut self, endpoint: u8) {
        if let Some(count) = self.in_flight.get_mut(&endpoint) {
            *count = count.saturating_sub(1);
        }
    }
}

/// In-memory [`Transport`]
///
/// Completions are invoked on the calling thread without the internal lock
/// held, so they may resubmit. IN transfers are never completed inside
/// `submit`; OUT transfers are when auto-complete is on.
#[derive(Default)]
pub struct MockTransport {
    state: Mutex<MockState>,
    changed: Condvar,
    auto_complete_out: AtomicBool,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// A transport acknowledging every OUT packet as soon as it is submitted
    pub fn with_auto_complete() -> Self {
        let transport = Self::default();
        transport.set_auto_complete(true);
        transport
    }

    pub fn set_auto_complete(&self, enabled: bool) {
        self.auto_complete_out.store(enabled, Ordering::SeqCst);
    }

    /// Refuse further submissions with `reason` (or accept again with `None`)
    pub fn set_reject(&self, reason: Option<&str>) {
        self.lock().reject = reason.map(str::to_string);
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Payloads submitted on an OUT endpoint, oldest first
    pub fn sent(&self, endpoint: u8) -> Vec<Vec<u8>> {
        self.lock().sent.get(&endpoint).cloned().unwrap_or_default()
    }

    /// Number of accepted submissions on `endpoint`
    pub fn submissions(&self, endpoint: u8) -> usize {
        self.lock().submissions.get(&endpoint).copied().unwrap_or(0)
    }

    pub fn in_flight(&self, endpoint: u8) -> usize {
        self.lock().in_flight.get(&endpoint).copied().unwrap_or(0)
    }

    /// Highest number of simultaneously outstanding transfers on `endpoint`
    pub fn peak_in_flight(&self, endpoint: u8) -> usize {
        self.lock().peak_in_flight.get(&endpoint).copied().unwrap_or(0)
    }

    /// Endpoints passed to `cancel`, in call order
    pub fn cancelled(&self) -> Vec<u8> {
        self.lock().cancelled.clone()
    }

    /// Complete the oldest outstanding transfer on `endpoint` with `status`
    ///
    /// Returns false when nothing was outstanding.
    pub fn complete_next(&self, endpoint: u8, status: TransferStatus) -> bool {
        let Some((mut transfer, completion)) = self.lock().take_pending(endpoint) else {
            return false;
        };
        if status == TransferStatus::Completed {
            let length = transfer.length();
            transfer.set_actual(length);
        }
        self.changed.notify_all();
        completion(transfer, status);
        true
    }

    /// Deliver `data` to the outstanding IN transfer on `endpoint`
    pub fn complete_in(&self, endpoint: u8, data: &[u8]) -> bool {
        let Some((mut transfer, completion)) = self.lock().take_pending(endpoint) else {
            return false;
        };
        let region = transfer.read_region();
        let count = data.len().min(region.len());
        region[..count].copy_from_slice(&data[..count]);
        transfer.set_actual(count);
        self.changed.notify_all();
        completion(transfer, TransferStatus::Completed);
        true
    }

    /// Wait until a transfer is outstanding on `endpoint`
    pub fn wait_for_pending(&self, endpoint: u8, timeout: Duration) -> bool {
        self.wait_until(timeout, |state| {
            state.pending.iter().any(|(t, _)| t.endpoint() == endpoint)
        })
    }

    /// Wait until at least `count` packets were submitted on `endpoint`
    pub fn wait_for_sent(&self, endpoint: u8, count: usize, timeout: Duration) -> bool {
        self.wait_until(timeout, |state| {
            state.sent.get(&endpoint).map_or(0, Vec::len) >= count
        })
    }

    fn wait_until(&self, timeout: Duration, ready: impl Fn(&MockState) -> bool) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = self.lock();
        while !ready(&state) {
            let Some(remaining) = deadline.checked_duration_since(Instant::now()) else {
                return false;
            };
            state = match self.changed.wait_timeout(state, remaining) {
                Ok((state, _)) => state,
                Err(e) => e.into_inner().0,
            };
        }
        true
    }
}

impl Transport for MockTransport {
    fn submit(&self, mut transfer: Transfer, completion: Completion) -> Result<(), SubmitError> {
        let endpoint = transfer.endpoint();
        {
            let mut state = self.lock();
            if let Some(reason) = state.reject.clone() {
                return Err(SubmitError { transfer, reason });
            }

            *state.submissions.entry(endpoint).or_default() += 1;
            let in_flight = state.in_flight.entry(endpoint).or_default();
            *in_flight += 1;
            let now = *in_flight;
            let peak = state.peak_in_flight.entry(endpoint).or_default();
            *peak = (*peak).max(now);

            let is_out = transfer.direction() == Direction::Out;
            if is_out {
                state
                    .sent
                    .entry(endpoint)
                    .or_default()
                    .push(transfer.data().to_vec());
            }

            if !is_out || !self.auto_complete_out.load(Ordering::SeqCst) {
                state.pending.push_back((transfer, completion));
                self.changed.notify_all();
                return Ok(());
            }
            state.finish(endpoint);
        }

        self.changed.notify_all();
        let length = transfer.length();
        transfer.set_actual(length);
        completion(transfer, TransferStatus::Completed);
        Ok(())
    }

    fn cancel(&self, endpoint: u8) {
        let killed: Vec<_> = {
            let mut state = self.lock();
            state.cancelled.push(endpoint);
            let mut killed = Vec::new();
            while let Some(entry) = state.take_pending(endpoint) {
                killed.push(entry);
            }
            killed
        };

        self.changed.notify_all();
        for (transfer, completion) in killed {
            completion(transfer, TransferStatus::Cancelled);
        }
    }
}
