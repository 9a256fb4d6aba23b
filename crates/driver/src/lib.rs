//! Userspace driver for the botodisp display/keypad peripheral
//!
//! Each attached device becomes a [`Session`]. Text written through a
//! [`ClientHandle`] goes to the display over the bulk OUT endpoint, one
//! packet in flight at a time. Key presses arrive on the interrupt IN
//! endpoint and are echoed on the display by a per-device worker, with the
//! configured delete key erasing the previous character instead.
//!
//! The core talks to hardware only through the [`Transport`] trait. The
//! [`usb`] module implements it with rusb; `test_utils::MockTransport`
//! implements it in memory (behind the `test-utils` feature).

pub mod config;
pub mod endpoint;
pub mod error;
pub mod gate;
mod inbound;
pub mod keypad;
pub mod lifecycle;
mod outbound;
pub mod registry;
pub mod session;
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
pub mod transfer;
pub mod usb;

pub use config::DriverConfig;
pub use endpoint::{Channel, ChannelRole, EndpointDescriptor, ResolvedChannels};
pub use error::{DriverError, Result};
pub use gate::{InterruptSignal, OutboundGate};
pub use lifecycle::{Attachment, ClientHandle};
pub use registry::{DEFAULT_MAX_FILES, DeviceRegistry, SessionInfo};
pub use session::{Session, SessionOptions};
pub use transfer::{Completion, SubmitError, Transfer, TransferClass, TransferStatus, Transport};
