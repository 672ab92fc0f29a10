//! Netlink report channel.
//!
//! The channel comes up lazily on the first report: units are tried from
//! [`NETLINK_UNIT_MAX`] down to [`NETLINK_UNIT_MIN`] and the first one that
//! binds is kept for the module's lifetime, then published under
//! `/proc/thawguard/<unit>` for listeners to discover. When no unit binds
//! the report is dropped and the next report retries the whole range.
//!
//! Reports can arrive from softirq context, so nothing on the report path
//! spins: the bound unit is an atomic and bring-up is only attempted by
//! whoever wins `try_lock`. Losers drop their event.

use core::fmt::Write;
use core::sync::atomic::{AtomicI32, AtomicU32, Ordering};

use log::{debug, info, warn};
use shared::constants::{ACK_PREFIX, NETLINK_UNIT_MAX, NETLINK_UNIT_MIN, USER_PORT};
use shared::protocol::Line;
use shared::ReportEvent;
use spin::Mutex;

use crate::error::TransportError;
use crate::host::ReportTransport;

const UNBOUND: i32 = -1;
const CLOSED: i32 = -2;

pub struct Reporter<T: ReportTransport> {
    transport: T,
    /// Bound unit, [`UNBOUND`] or [`CLOSED`].
    unit: AtomicI32,
    /// Held for the duration of a bring-up or shutdown.
    bringup: Mutex<()>,
    received: AtomicU32,
}

impl<T: ReportTransport> Reporter<T> {
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            unit: AtomicI32::new(UNBOUND),
            bringup: Mutex::new(()),
            received: AtomicU32::new(0),
        }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn unit(&self) -> Option<i32> {
        let u = self.unit.load(Ordering::Acquire);
        (u >= 0).then_some(u)
    }

    /// Bind a unit if none is bound yet, returning the bound unit.
    pub fn ensure_channel(&self) -> Result<i32, TransportError> {
        match self.unit.load(Ordering::Acquire) {
            CLOSED => return Err(TransportError::Closed),
            UNBOUND => {}
            u => return Ok(u),
        }

        let Some(_guard) = self.bringup.try_lock() else {
            return Err(TransportError::Busy);
        };
        match self.unit.load(Ordering::Acquire) {
            CLOSED => return Err(TransportError::Closed),
            UNBOUND => {}
            u => return Ok(u),
        }

        for candidate in (NETLINK_UNIT_MIN..=NETLINK_UNIT_MAX).rev() {
            match self.transport.create_channel(candidate) {
                Ok(()) => {
                    info!("report channel bound on netlink unit {}", candidate);
                    if let Err(e) = self.transport.publish_unit(candidate) {
                        warn!("{}", e);
                    }
                    self.unit.store(candidate, Ordering::Release);
                    return Ok(candidate);
                }
                Err(e) => debug!("{}", e),
            }
        }
        warn!("report channel unavailable");
        Err(TransportError::NoUnit)
    }

    /// Unicast `payload` to the listener port, bringing the channel up
    /// first if needed.
    pub fn send(&self, payload: &[u8]) -> Result<(), TransportError> {
        self.ensure_channel()?;
        self.transport.unicast(USER_PORT, payload)
    }

    /// Serialize and send one event. Failures drop the event.
    pub fn report(&self, event: &ReportEvent) {
        let line = event.to_line();
        #[cfg(feature = "debug")]
        debug!("{}", line);
        if let Err(e) = self.send(line.as_bytes()) {
            debug!("report dropped: {}", e);
        }
    }

    /// Inbound listener message: count it and echo the running total.
    pub fn on_inbound(&self, payload: &[u8]) {
        if payload.is_empty() {
            return;
        }
        let n = self.received.fetch_add(1, Ordering::Relaxed) + 1;
        debug!("listener message #{} ({} bytes)", n, payload.len());

        let mut ack = Line::new();
        let _ = write!(ack, "{}{}", ACK_PREFIX, n);
        if let Err(e) = self.send(ack.as_bytes()) {
            debug!("ack dropped: {}", e);
        }
    }

    /// Release the socket and its discovery entry, if bound. The channel
    /// stays closed afterwards. Process context only.
    pub fn shutdown(&self) {
        let _guard = self.bringup.lock();
        if self.unit.swap(CLOSED, Ordering::AcqRel) >= 0 {
            self.transport.release();
        }
    }
}
