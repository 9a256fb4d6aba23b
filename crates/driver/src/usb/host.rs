//! USB host thread
//!
//! Owns the rusb context, finds the peripheral, and turns hot-plug arrivals
//! and removals into registry attach/detach calls. Runs on a dedicated
//! thread and talks to the tokio side through a [`HostBridge`].

use crate::registry::DeviceRegistry;
use crate::usb::device::ClaimedDevice;
use crate::usb::transport::{TransportOptions, UsbTransport};
use async_channel::{Receiver, Sender, bounded};
use rusb::{Context, Device, Hotplug, HotplugBuilder, Registration, UsbContext};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// How long one `handle_events` call may block
const EVENT_TIMEOUT: Duration = Duration::from_millis(100);

/// Which device to drive and how
#[derive(Debug, Clone, Copy)]
pub struct HostSettings {
    pub vendor_id: u16,
    pub product_id: u16,
    pub interface: u8,
    pub transport: TransportOptions,
}

/// A matching device seen on the bus
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceSummary {
    pub bus: u8,
    pub address: u8,
    pub vendor_id: u16,
    pub product_id: u16,
    /// Minor number when attached
    pub minor: Option<u32>,
}

/// Commands from the tokio runtime to the host thread
#[derive(Debug)]
pub enum HostCommand {
    /// List matching devices on the bus
    ListDevices {
        response: tokio::sync::oneshot::Sender<Vec<DeviceSummary>>,
    },

    /// Detach everything and stop the host thread
    Shutdown,
}

/// Handle for the tokio runtime (async)
#[derive(Clone)]
pub struct HostBridge {
    cmd_tx: Sender<HostCommand>,
}

impl HostBridge {
    /// Send a command to the host thread
    pub async fn send_command(&self, cmd: HostCommand) -> common::Result<()> {
        self.cmd_tx
            .send(cmd)
            .await
            .map_err(|e| common::Error::Channel(e.to_string()))
    }
}

/// Handle for the host thread (blocking)
pub struct HostWorker {
    cmd_rx: Receiver<HostCommand>,
}

impl HostWorker {
    /// Try to receive a command without blocking
    pub fn try_recv_command(&self) -> Option<HostCommand> {
        self.cmd_rx.try_recv().ok()
    }
}

/// Create the channel bridge between tokio and the host thread
pub fn create_host_bridge() -> (HostBridge, HostWorker) {
    let (cmd_tx, cmd_rx) = bounded(16);
    (HostBridge { cmd_tx }, HostWorker { cmd_rx })
}

enum HotplugEvent {
    Arrived(Device<Context>),
    Left(Device<Context>),
}

/// Forwards libusb hot-plug callbacks into the host loop
///
/// Callbacks run inside `handle_events`, so they only queue the event.
struct HotplugForwarder {
    events: Sender<HotplugEvent>,
}

impl Hotplug<Context> for HotplugForwarder {
    fn device_arrived(&mut self, device: Device<Context>) {
        debug!(
            "Hot-plug: device arrived (bus={}, addr={})",
            device.bus_number(),
            device.address()
        );
        if let Err(e) = self.events.try_send(HotplugEvent::Arrived(device)) {
            warn!("Dropped hot-plug arrival: {}", e);
        }
    }

    fn device_left(&mut self, device: Device<Context>) {
        debug!(
            "Hot-plug: device left (bus={}, addr={})",
            device.bus_number(),
            device.address()
        );
        if let Err(e) = self.events.try_send(HotplugEvent::Left(device)) {
            warn!("Dropped hot-plug removal: {}", e);
        }
    }
}

/// Device discovery and hot-plug handling
pub struct UsbHost {
    context: Context,
    registry: Arc<DeviceRegistry>,
    settings: HostSettings,
    /// (bus, address) -> minor
    attached: HashMap<(u8, u8), u32>,
    events_tx: Sender<HotplugEvent>,
    events_rx: Receiver<HotplugEvent>,
    _hotplug_registration: Option<Registration<Context>>,
}

impl UsbHost {
    pub fn new(registry: Arc<DeviceRegistry>, settings: HostSettings) -> Result<Self, rusb::Error> {
        let context = Context::new()?;
        let (events_tx, events_rx) = bounded(64);

        Ok(Self {
            context,
            registry,
            settings,
            attached: HashMap::new(),
            events_tx,
            events_rx,
            _hotplug_registration: None,
        })
    }

    /// Attach devices already present and register for hot-plug
    pub fn initialize(&mut self) -> Result<(), rusb::Error> {
        for device in self.context.devices()?.iter() {
            if self.matches(&device) {
                self.probe(device);
            }
        }

        if rusb::has_hotplug() {
            let forwarder = HotplugForwarder {
                events: self.events_tx.clone(),
            };
            let registration = HotplugBuilder::new()
                .vendor_id(self.settings.vendor_id)
                .product_id(self.settings.product_id)
                .enumerate(false)
                .register(&self.context, Box::new(forwarder))?;
            self._hotplug_registration = Some(registration);
            debug!("Hot-plug callbacks registered");
        } else {
            warn!("libusb has no hot-plug support, only devices present at startup are used");
        }

        info!(
            "USB host initialized, {} device(s) attached",
            self.attached.len()
        );
        Ok(())
    }

    fn matches(&self, device: &Device<Context>) -> bool {
        device
            .device_descriptor()
            .map(|d| {
                d.vendor_id() == self.settings.vendor_id
                    && d.product_id() == self.settings.product_id
            })
            .unwrap_or(false)
    }

    /// Claim and attach one matching device
    fn probe(&mut self, device: Device<Context>) {
        let key = (device.bus_number(), device.address());
        if self.attached.contains_key(&key) {
            return;
        }

        let (claimed, endpoints) = match ClaimedDevice::open(&device, self.settings.interface) {
            Ok(opened) => opened,
            Err(e) => {
                warn!("Failed to open device at bus {} address {}: {}", key.0, key.1, e);
                return;
            }
        };

        let transport = Arc::new(UsbTransport::new(claimed, self.settings.transport));
        match self.registry.attach(&endpoints, transport) {
            Ok(minor) => {
                info!(
                    "Device at bus {} address {} is minor {}",
                    key.0, key.1, minor
                );
                self.attached.insert(key, minor);
            }
            Err(e) => error!("Failed to attach device at bus {} address {}: {}", key.0, key.1, e),
        }
    }

    fn remove(&mut self, bus: u8, address: u8) {
        let Some(minor) = self.attached.remove(&(bus, address)) else {
            return;
        };
        if let Err(e) = self.registry.detach(minor) {
            warn!("Failed to detach minor {}: {}", minor, e);
        }
    }

    /// Matching devices currently on the bus
    pub fn list_devices(&self) -> Vec<DeviceSummary> {
        let devices = match self.context.devices() {
            Ok(devices) => devices,
            Err(e) => {
                warn!("Failed to enumerate devices: {}", e);
                return Vec::new();
            }
        };

        devices
            .iter()
            .filter_map(|device| {
                let descriptor = device.device_descriptor().ok()?;
                if !self.matches(&device) {
                    return None;
                }
                let key = (device.bus_number(), device.address());
                Some(DeviceSummary {
                    bus: key.0,
                    address: key.1,
                    vendor_id: descriptor.vendor_id(),
                    product_id: descriptor.product_id(),
                    minor: self.attached.get(&key).copied(),
                })
            })
            .collect()
    }

    /// Host event loop; returns after a Shutdown command
    pub fn run(mut self, worker: HostWorker) -> Result<(), rusb::Error> {
        info!("USB host thread started");

        loop {
            match worker.try_recv_command() {
                Some(HostCommand::Shutdown) => {
                    info!("USB host shutting down");
                    break;
                }
                Some(HostCommand::ListDevices { response }) => {
                    let _ = response.send(self.list_devices());
                }
                None => {}
            }

            match self.context.handle_events(Some(EVENT_TIMEOUT)) {
                Ok(()) => {}
                Err(rusb::Error::Interrupted) => {
                    debug!("USB event handling interrupted");
                }
                Err(e) => {
                    warn!("Error handling USB events: {}", e);
                    std::thread::sleep(EVENT_TIMEOUT);
                }
            }

            while let Ok(event) = self.events_rx.try_recv() {
                match event {
                    HotplugEvent::Arrived(device) => self.probe(device),
                    HotplugEvent::Left(device) => {
                        self.remove(device.bus_number(), device.address())
                    }
                }
            }
        }

        self.registry.detach_all();
        self.attached.clear();
        info!("USB host thread stopped");
        Ok(())
    }
}

/// Spawn the USB host thread
pub fn spawn_usb_host(
    registry: Arc<DeviceRegistry>,
    settings: HostSettings,
    worker: HostWorker,
) -> std::io::Result<std::thread::JoinHandle<Result<(), rusb::Error>>> {
    std::thread::Builder::new()
        .name("usb-host".to_string())
        .spawn(move || {
            let mut host = UsbHost::new(registry, settings)?;
            host.initialize()?;
            host.run(worker)
        })
}
