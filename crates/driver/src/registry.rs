//! Minor number table
//!
//! Maps minor numbers to attached devices so that clients can open a device
//! by number, the way a character device node would be routed.

use crate::endpoint::EndpointDescriptor;
use crate::error::{DriverError, Result};
use crate::lifecycle::{self, Attachment, ClientHandle};
use crate::session::{Session, SessionOptions};
use crate::transfer::Transport;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info, warn};

/// Default number of device minors
pub const DEFAULT_MAX_FILES: u32 = 20;

/// Snapshot of one registered device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionInfo {
    pub minor: u32,
    pub column: u8,
    pub open: bool,
    pub listening: bool,
}

/// Registered devices keyed by minor number
pub struct DeviceRegistry {
    max_files: u32,
    options: SessionOptions,
    devices: Mutex<BTreeMap<u32, Attachment>>,
}

impl DeviceRegistry {
    pub fn new(max_files: u32, options: SessionOptions) -> Self {
        Self {
            max_files,
            options,
            devices: Mutex::new(BTreeMap::new()),
        }
    }

    fn devices(&self) -> MutexGuard<'_, BTreeMap<u32, Attachment>> {
        self.devices.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn max_files(&self) -> u32 {
        self.max_files
    }

    /// Attach a device under the lowest free minor and return that minor
    pub fn attach(
        &self,
        descriptors: &[EndpointDescriptor],
        transport: Arc<dyn Transport>,
    ) -> Result<u32> {
        let mut devices = self.devices();

        let minor = (0..self.max_files)
            .find(|minor| !devices.contains_key(minor))
            .ok_or_else(|| {
                DriverError::ResourceExhausted(format!(
                    "all {} minors in use",
                    self.max_files
                ))
            })?;

        let attachment = lifecycle::attach(minor, descriptors, transport, self.options)?;
        devices.insert(minor, attachment);

        info!("Registered device as minor {}", minor);
        Ok(minor)
    }

    /// Detach the device behind `minor`
    ///
    /// Key work is drained before the minor is deregistered; the attach
    /// reference is dropped last. The table is not locked while draining,
    /// so other minors stay usable and the draining minor answers
    /// `NoDevice` to opens.
    pub fn detach(&self, minor: u32) -> Result<()> {
        let detaching = self
            .devices()
            .get_mut(&minor)
            .and_then(|attachment| attachment.begin_detach())
            .ok_or(DriverError::NoDevice(minor))?;

        detaching.drain();

        let attachment = self.devices().remove(&minor);
        debug!("Deregistered minor {}", minor);

        drop(attachment);
        Ok(())
    }

    /// Detach every registered device
    pub fn detach_all(&self) {
        let minors: Vec<u32> = self.devices().keys().copied().collect();
        for minor in minors {
            if let Err(e) = self.detach(minor) {
                warn!("Failed to detach minor {}: {}", minor, e);
            }
        }
    }

    /// Open the device behind `minor` for exclusive use
    pub fn open(&self, minor: u32) -> Result<ClientHandle> {
        let session = self.session(minor).ok_or(DriverError::NoDevice(minor))?;
        session.open()
    }

    pub fn session(&self, minor: u32) -> Option<Arc<Session>> {
        self.devices()
            .get(&minor)
            .map(|attachment| Arc::clone(attachment.session()))
    }

    pub fn minors(&self) -> Vec<u32> {
        self.devices().keys().copied().collect()
    }

    pub fn sessions(&self) -> Vec<SessionInfo> {
        self.devices()
            .values()
            .map(|attachment| {
                let session = attachment.session();
                SessionInfo {
                    minor: session.minor(),
                    column: session.column(),
                    open: session.is_open(),
                    listening: session.is_listening(),
                }
            })
            .collect()
    }
}

impl Drop for DeviceRegistry {
    fn drop(&mut self) {
        self.detach_all();
    }
}
