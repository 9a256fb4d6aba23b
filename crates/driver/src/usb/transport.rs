//! rusb-backed transport
//!
//! rusb only offers blocking transfers, so each endpoint gets a worker
//! thread that takes submitted descriptors from a queue, runs the blocking
//! call, and invokes the completion on that same thread. IN transfers poll
//! with a short timeout so cancellation and shutdown are noticed quickly.

use crate::transfer::{
    Completion, Direction, SubmitError, Transfer, TransferClass, TransferStatus, Transport,
};
use crate::usb::device::ClaimedDevice;
use async_channel::{Receiver, Sender, TrySendError, bounded};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, error, trace};

/// Submissions that may wait behind the one in flight
const ENDPOINT_QUEUE_DEPTH: usize = 4;

/// Timeouts used by the endpoint workers
#[derive(Debug, Clone, Copy)]
pub struct TransportOptions {
    /// Give up on an OUT packet after this long
    pub write_timeout: Duration,
    /// Interrupt IN polling period
    pub poll_interval: Duration,
}

impl Default for TransportOptions {
    fn default() -> Self {
        Self {
            write_timeout: Duration::from_secs(1),
            poll_interval: Duration::from_millis(250),
        }
    }
}

struct Pending {
    transfer: Transfer,
    completion: Completion,
}

struct EndpointWorker {
    queue: Sender<Pending>,
    cancel: Arc<AtomicBool>,
}

/// Transport over one claimed device
pub struct UsbTransport {
    device: Arc<ClaimedDevice>,
    options: TransportOptions,
    endpoints: Mutex<HashMap<u8, EndpointWorker>>,
    running: Arc<AtomicBool>,
}

impl UsbTransport {
    pub fn new(device: ClaimedDevice, options: TransportOptions) -> Self {
        Self {
            device: Arc::new(device),
            options,
            endpoints: Mutex::new(HashMap::new()),
            running: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Queue for `endpoint`, spawning its worker on first use
    fn queue_for(&self, endpoint: u8) -> Result<Sender<Pending>, String> {
        let mut endpoints = self.endpoints.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(worker) = endpoints.get(&endpoint) {
            return Ok(worker.queue.clone());
        }

        let (queue, rx) = bounded(ENDPOINT_QUEUE_DEPTH);
        let cancel = Arc::new(AtomicBool::new(false));
        let context = EndpointContext {
            endpoint,
            device: Arc::clone(&self.device),
            cancel: Arc::clone(&cancel),
            running: Arc::clone(&self.running),
            options: self.options,
        };

        std::thread::Builder::new()
            .name(format!("usb-ep-{:02x}", endpoint))
            .spawn(move || context.run(rx))
            .map_err(|e| format!("failed to spawn endpoint worker: {}", e))?;

        endpoints.insert(
            endpoint,
            EndpointWorker {
                queue: queue.clone(),
                cancel,
            },
        );
        Ok(queue)
    }
}

impl Transport for UsbTransport {
    fn submit(&self, transfer: Transfer, completion: Completion) -> Result<(), SubmitError> {
        if !self.running.load(Ordering::Acquire) {
            return Err(SubmitError {
                transfer,
                reason: "transport shut down".to_string(),
            });
        }

        let queue = match self.queue_for(transfer.endpoint()) {
            Ok(queue) => queue,
            Err(reason) => return Err(SubmitError { transfer, reason }),
        };

        queue
            .try_send(Pending {
                transfer,
                completion,
            })
            .map_err(|e| {
                let reason = match &e {
                    TrySendError::Full(_) => "endpoint queue full",
                    TrySendError::Closed(_) => "endpoint worker stopped",
                };
                SubmitError {
                    transfer: e.into_inner().transfer,
                    reason: reason.to_string(),
                }
            })
    }

    fn cancel(&self, endpoint: u8) {
        let endpoints = self.endpoints.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(worker) = endpoints.get(&endpoint) {
            worker.cancel.store(true, Ordering::Release);
            debug!("Cancel requested on endpoint {:#04x}", endpoint);
        }
    }
}

impl Drop for UsbTransport {
    fn drop(&mut self) {
        // Workers may be the ones dropping us, so they are told to stop but
        // never joined here
        self.running.store(false, Ordering::Release);
        self.endpoints
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
    }
}

/// Everything an endpoint worker thread needs
struct EndpointContext {
    endpoint: u8,
    device: Arc<ClaimedDevice>,
    cancel: Arc<AtomicBool>,
    running: Arc<AtomicBool>,
    options: TransportOptions,
}

impl EndpointContext {
    fn run(self, queue: Receiver<Pending>) {
        debug!("Endpoint worker {:#04x} started", self.endpoint);

        while let Ok(Pending {
            mut transfer,
            completion,
        }) = queue.recv_blocking()
        {
            let status = match transfer.direction() {
                Direction::Out => self.write(&mut transfer),
                Direction::In => self.read(&mut transfer),
            };
            trace!("Endpoint {:#04x} transfer {}", self.endpoint, status);

            // Keep the worker alive if a completion panics
            let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                completion(transfer, status)
            }));
            if let Err(e) = result {
                error!("Panic in completion for endpoint {:#04x}: {:?}", self.endpoint, e);
            }
        }

        debug!("Endpoint worker {:#04x} stopped", self.endpoint);
    }

    fn write(&self, transfer: &mut Transfer) -> TransferStatus {
        let handle = self.device.handle();
        let timeout = self.options.write_timeout;

        let result = match transfer.class() {
            TransferClass::Bulk => handle.write_bulk(self.endpoint, transfer.data(), timeout),
            TransferClass::Interrupt => {
                handle.write_interrupt(self.endpoint, transfer.data(), timeout)
            }
            other => return TransferStatus::Failed(format!("unsupported class {:?}", other)),
        };

        match result {
            Ok(written) => {
                transfer.set_actual(written);
                TransferStatus::Completed
            }
            Err(e) => map_rusb_error(e),
        }
    }

    fn read(&self, transfer: &mut Transfer) -> TransferStatus {
        let handle = self.device.handle();
        let class = transfer.class();

        loop {
            if self.cancel.swap(false, Ordering::AcqRel) || !self.running.load(Ordering::Acquire) {
                return TransferStatus::Cancelled;
            }

            let result = match class {
                TransferClass::Interrupt => handle.read_interrupt(
                    self.endpoint,
                    transfer.read_region(),
                    self.options.poll_interval,
                ),
                TransferClass::Bulk => handle.read_bulk(
                    self.endpoint,
                    transfer.read_region(),
                    self.options.poll_interval,
                ),
                other => return TransferStatus::Failed(format!("unsupported class {:?}", other)),
            };

            match result {
                Ok(read) => {
                    transfer.set_actual(read);
                    return TransferStatus::Completed;
                }
                // Nothing pressed yet
                Err(rusb::Error::Timeout) => continue,
                Err(e) => return map_rusb_error(e),
            }
        }
    }
}

/// Map rusb::Error to a transfer status
pub fn map_rusb_error(err: rusb::Error) -> TransferStatus {
    match err {
        rusb::Error::NoDevice | rusb::Error::NotFound => TransferStatus::DeviceGone,
        rusb::Error::Interrupted => TransferStatus::Cancelled,
        rusb::Error::Pipe => TransferStatus::PeerReset,
        other => TransferStatus::Failed(other.to_string()),
    }
}
