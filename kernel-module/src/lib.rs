//! Binder freeze detection core.
//!
//! `thawguard-kmod` watches binder traffic, terminating signals and
//! (optionally) TCP receives aimed at processes parked by the freezer, and
//! reports them over netlink so a user-space manager can thaw the target.
//! Oneway transactions piling up in a frozen process's async queue are
//! thinned out while it stays frozen.
//!
//! The crate is the loadable module's logic only. The loader glue owns the
//! real kernel: it implements [`host::KernelHost`], [`host::SymbolLookup`],
//! [`host::ReportTransport`] and [`hooks::EventSource`], calls
//! [`Thawguard::activate`] from module init, and forwards every hook,
//! tracepoint and netlink callback into the returned instance.
//!
//! Key responsibilities:
//! - Recover struct layouts from kernel text ([`offsets`]).
//! - Decide frozenness ([`freeze`]).
//! - Classify and report events ([`callbacks`], [`communications`]).
//! - Evict outdated oneway messages ([`evictor`]).

#![cfg_attr(not(test), no_std)]

extern crate alloc;

use alloc::vec::Vec;

use log::{info, warn};

pub mod arm64;
pub mod callbacks;
pub mod communications;
pub mod consts;
pub mod error;
pub mod evictor;
pub mod freeze;
pub mod hooks;
pub mod host;
pub mod offsets;
pub mod task_slot;
pub mod views;

#[cfg(test)]
mod mock;

pub use communications::Reporter;
pub use error::{ActivateError, ResolveError, TransportError};
pub use hooks::{EventSource, HookArgs, HookHandle, HookPoint};
pub use host::{Addr, KernelHost, KernelMemory, ReportTransport, SymbolLookup};
pub use offsets::ResolvedLayout;

use shared::constants::CONTROL_REPLY;
use task_slot::TaskSlots;

/// One activated module instance.
pub struct Thawguard<H: KernelHost, T: ReportTransport> {
    host: H,
    layout: ResolvedLayout,
    reporter: Reporter<T>,
    slots: TaskSlots,
    /// Registered `binder_transaction` tracepoint, if any.
    tracepoint: Option<Addr>,
    hooks: Vec<HookHandle>,
}

impl<H: KernelHost, T: ReportTransport> Thawguard<H, T> {
    /// Module init: resolve the layout, attach the tracepoint when the
    /// kernel exports it and install every hook. On failure everything
    /// installed so far is removed again.
    pub fn activate<S, E>(host: H, transport: T, syms: &S, events: &mut E) -> Result<Self, ActivateError>
    where
        S: SymbolLookup + ?Sized,
        E: EventSource + ?Sized,
    {
        let layout = offsets::resolve(&host, syms).inspect_err(|e| warn!("{}", e))?;
        let mut this = Self::from_layout(host, transport, layout);

        if let Some(tp) = layout.globals.tracepoint {
            if events.register_tracepoint(tp) {
                this.tracepoint = Some(tp);
            } else {
                info!("binder_transaction tracepoint unavailable, classifying from hooks");
            }
        }

        for &point in HookPoint::ALL {
            let handle = syms
                .lookup(point.symbol())
                .and_then(|target| events.hook(point, target));
            match handle {
                Some(h) => this.hooks.push(h),
                None => {
                    warn!("hook {} failed", point.symbol());
                    this.disarm(events);
                    return Err(ActivateError::Hook(point));
                }
            }
        }

        info!("thawguard active: {} hooks, tracepoint={}", this.hooks.len(), this.tracepoint.is_some());
        Ok(this)
    }

    /// Instance over an already resolved layout with nothing installed.
    pub fn from_layout(host: H, transport: T, layout: ResolvedLayout) -> Self {
        Self {
            host,
            layout,
            reporter: Reporter::new(transport),
            slots: TaskSlots::new(),
            tracepoint: None,
            hooks: Vec::new(),
        }
    }

    fn disarm<E: EventSource + ?Sized>(&mut self, events: &mut E) {
        if let Some(tp) = self.tracepoint.take() {
            events.unregister_tracepoint(tp);
        }
        for h in self.hooks.drain(..) {
            events.unhook(h);
        }
    }

    /// Module exit: detach the tracepoint, remove every hook, then release
    /// the channel for good.
    pub fn deactivate<E: EventSource + ?Sized>(mut self, events: &mut E) {
        self.disarm(events);
        self.reporter.shutdown();
        info!("thawguard deactivated");
    }

    /// Reply of the module control operation.
    pub fn control0(&self) -> &'static str {
        CONTROL_REPLY
    }

    /// Entry for every installed hook.
    pub fn dispatch(&self, point: HookPoint, args: &HookArgs) {
        match point {
            HookPoint::ProcTransaction => self.on_proc_transaction(args),
            HookPoint::Transaction => self.on_transaction_entry(args),
            HookPoint::SendSignal => self.on_send_signal(args),
            #[cfg(feature = "network")]
            HookPoint::TcpV4Rcv | HookPoint::TcpV6Rcv => self.on_tcp_rcv(args),
        }
    }

    /// `binder_transaction` tracepoint probe.
    pub fn on_tracepoint(&self, reply: bool, t: Addr) {
        self.on_binder_transaction(reply, t);
    }

    /// Netlink input callback.
    pub fn on_netlink_message(&self, payload: &[u8]) {
        self.reporter.on_inbound(payload);
    }

    pub fn host(&self) -> &H {
        &self.host
    }

    pub fn layout(&self) -> &ResolvedLayout {
        &self.layout
    }

    pub fn reporter(&self) -> &Reporter<T> {
        &self.reporter
    }
}
