//! Per-device session
//!
//! One [`Session`] exists per attached device. It is shared through an
//! `Arc`: the attachment, the open client handle, every in-flight
//! completion and every queued key work item each hold one reference. The
//! last one to go runs [`Drop`], which releases the descriptors, buffers
//! and the transport handle. That may happen on any thread, including a
//! completion callback, so the drop path never blocks.

use crate::endpoint::{Channel, ResolvedChannels};
use crate::error::{DriverError, Result};
use crate::gate::OutboundGate;
use crate::lifecycle::ClientHandle;
use crate::transfer::{Transfer, Transport};
use async_channel::Sender;
use protocol::{DEFAULT_DELETE_KEY, DISPLAY_COLUMNS, KeyCode};
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info};

/// Per-session tunables
#[derive(Debug, Clone, Copy)]
pub struct SessionOptions {
    /// Key that erases the previous character
    pub delete_key: KeyCode,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            delete_key: DEFAULT_DELETE_KEY,
        }
    }
}

/// Display cursor column, kept within `0..=DISPLAY_COLUMNS`
///
/// Reaching `DISPLAY_COLUMNS` means the line is full; no write lands there.
#[derive(Debug, Default)]
pub struct Cursor(AtomicU8);

impl Cursor {
    pub fn get(&self) -> u8 {
        self.0.load(Ordering::Acquire)
    }

    /// Advance by up to `wanted` columns, returning how many were granted
    pub fn reserve(&self, wanted: usize) -> usize {
        let mut granted = 0;
        let _ = self
            .0
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |column| {
                let room = DISPLAY_COLUMNS.saturating_sub(column) as usize;
                granted = wanted.min(room);
                Some(column + granted as u8)
            });
        granted
    }

    /// Return columns taken by [`Cursor::reserve`]
    pub fn give_back(&self, columns: usize) {
        let _ = self
            .0
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |column| {
                Some(column.saturating_sub(columns as u8))
            });
    }

    /// Step one column right; false when the line is already full
    pub fn advance(&self) -> bool {
        self.reserve(1) == 1
    }

    /// Step one column left, returning the new column
    pub fn retreat(&self) -> Option<u8> {
        self.0
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |column| {
                column.checked_sub(1)
            })
            .ok()
            .map(|previous| previous - 1)
    }
}

/// Keypad listening state, guarded so a completion cannot re-arm after
/// detach started
#[derive(Debug)]
pub(crate) struct InboundState {
    pub(crate) detached: bool,
    /// The IN descriptor while it is not in flight
    pub(crate) idle: Option<Transfer>,
}

/// State shared by every path that touches one device
pub struct Session {
    pub(crate) minor: u32,
    pub(crate) bulk_out: Channel,
    pub(crate) interrupt_in: Channel,
    pub(crate) transport: Arc<dyn Transport>,
    pub(crate) gate: OutboundGate,
    pub(crate) inbound: Mutex<InboundState>,
    pub(crate) cursor: Cursor,
    pub(crate) client_attached: AtomicBool,
    /// Last key code written by the keypad completion
    pub(crate) key_code: AtomicU8,
    /// Set while a key work item is queued but not yet started
    pub(crate) key_work_pending: AtomicBool,
    pub(crate) key_queue: Sender<Arc<Session>>,
    pub(crate) delete_key: KeyCode,
}

impl Session {
    pub(crate) fn new(
        minor: u32,
        channels: ResolvedChannels,
        transport: Arc<dyn Transport>,
        key_queue: Sender<Arc<Session>>,
        options: SessionOptions,
    ) -> Self {
        Self {
            minor,
            bulk_out: channels.bulk_out,
            interrupt_in: channels.interrupt_in,
            transport,
            gate: OutboundGate::new(channels.out_transfer),
            inbound: Mutex::new(InboundState {
                detached: false,
                idle: Some(channels.in_transfer),
            }),
            cursor: Cursor::default(),
            client_attached: AtomicBool::new(false),
            key_code: AtomicU8::new(0),
            key_work_pending: AtomicBool::new(false),
            key_queue,
            delete_key: options.delete_key,
        }
    }

    pub fn minor(&self) -> u32 {
        self.minor
    }

    pub fn bulk_out(&self) -> Channel {
        self.bulk_out
    }

    pub fn interrupt_in(&self) -> Channel {
        self.interrupt_in
    }

    /// Current cursor column
    pub fn column(&self) -> u8 {
        self.cursor.get()
    }

    pub(crate) fn cursor(&self) -> &Cursor {
        &self.cursor
    }

    pub fn delete_key(&self) -> KeyCode {
        self.delete_key
    }

    /// Most recently received key code
    pub fn last_key(&self) -> KeyCode {
        KeyCode(self.key_code.load(Ordering::Acquire))
    }

    pub fn is_open(&self) -> bool {
        self.client_attached.load(Ordering::Acquire)
    }

    pub fn is_detached(&self) -> bool {
        self.inbound_state().detached
    }

    /// Largest data payload one OUT packet can carry
    pub fn max_payload(&self) -> usize {
        self.bulk_out.max_packet_size.saturating_sub(1)
    }

    /// True when no display transfer is in flight
    pub fn display_idle(&self) -> bool {
        self.gate.is_idle()
    }

    /// Number of live references to this session
    pub fn ref_count(self: &Arc<Self>) -> usize {
        Arc::strong_count(self)
    }

    pub(crate) fn inbound_state(&self) -> MutexGuard<'_, InboundState> {
        self.inbound.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Claim the session for one client
    ///
    /// Takes a reference that lives as long as the returned handle.
    pub fn open(self: &Arc<Self>) -> Result<ClientHandle> {
        if self.is_detached() {
            return Err(DriverError::NoDevice(self.minor));
        }

        self.client_attached
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| DriverError::AlreadyOpen)?;

        debug!("Opened session for minor {}", self.minor);
        Ok(ClientHandle::new(Arc::clone(self)))
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        info!(
            "Releasing session for minor {} (bulk OUT {:#04x}, interrupt IN {:#04x})",
            self.minor, self.bulk_out.address, self.interrupt_in.address
        );
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("minor", &self.minor)
            .field("bulk_out", &self.bulk_out)
            .field("interrupt_in", &self.interrupt_in)
            .field("column", &self.column())
            .field("open", &self.is_open())
            .finish_non_exhaustive()
    }
}
