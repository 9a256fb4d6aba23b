//! USB host side
//!
//! Binds the driver core to real hardware through rusb:
//! - Device discovery, interface claiming and endpoint descriptor reading
//! - Hot-plug driven attach/detach on a dedicated `usb-host` thread
//! - A [`Transport`](crate::transfer::Transport) running each endpoint's
//!   transfers on its own thread, which is where completions execute

pub mod device;
pub mod host;
pub mod transport;

pub use device::ClaimedDevice;
pub use host::{
    DeviceSummary, HostBridge, HostCommand, HostSettings, HostWorker, UsbHost, create_host_bridge,
    spawn_usb_host,
};
pub use transport::{TransportOptions, UsbTransport, map_rusb_error};
