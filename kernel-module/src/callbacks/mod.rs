//! Hook callbacks.
//!
//! Every hooked entry point lands in one of the submodules through
//! [`crate::Thawguard::dispatch`]. Callbacks run in the hooked caller's
//! context: they classify, hand accepted events to the reporter and
//! return. Nothing here blocks except the user-memory copy of the parcel.
//!
//! Key responsibilities:
//! - Classify binder traffic towards frozen processes.
//! - Trigger eviction of outdated oneway transactions.
//! - Report terminating signals and app network traffic.

pub mod binder;
#[cfg(feature = "network")]
pub mod network;
pub mod parcel;
pub mod signal;

use shared::{BinderKind, BinderReport, ReportEvent};

use crate::consts::{INTERFACE_TOKEN_BUFF_SIZE, INTERFACE_TOKEN_CODES};
use crate::freeze;
use crate::host::{KernelHost, ReportTransport};
use crate::views::{TaskView, TransactionData, Views};
use crate::Thawguard;

/// One side of a binder exchange.
pub(crate) struct Endpoint<'a, H: ?Sized> {
    pub pid: i32,
    pub task: TaskView<'a, H>,
}

impl<H: ?Sized> Clone for Endpoint<'_, H> {
    fn clone(&self) -> Self {
        *self
    }
}
impl<H: ?Sized> Copy for Endpoint<'_, H> {}

impl<H: KernelHost, T: ReportTransport> Thawguard<H, T> {
    /// Destination frozen and sides owned by different uids.
    pub(crate) fn passes_gate(&self, dst: &TaskView<'_, H>, src_uid: u32, dst_uid: u32) -> bool {
        src_uid != dst_uid && freeze::is_frozen(&self.host, dst)
    }

    pub(crate) fn report_binder(
        &self,
        kind: BinderKind,
        oneway: bool,
        src: Endpoint<'_, H>,
        dst: Endpoint<'_, H>,
    ) {
        let from_uid = self.host.task_uid(src.task.addr());
        let target_uid = self.host.task_uid(dst.task.addr());
        if !self.passes_gate(&dst.task, from_uid, target_uid) {
            return;
        }

        let mut report = BinderReport {
            kind,
            oneway,
            from_pid: src.pid,
            from_uid,
            target_pid: dst.pid,
            target_uid,
            rpc_name: None,
            code: None,
        };
        if oneway && kind == BinderKind::Transaction {
            self.enrich(&mut report);
        }
        self.reporter.report(&ReportEvent::Binder(report));
    }

    /// Attach the operation code and, for token-carrying codes, the
    /// interface name of the request parked by the `binder_transaction`
    /// entry hook.
    fn enrich(&self, report: &mut BinderReport) {
        let current = self.host.current_task();
        let Some(tr_ptr) = self.slots.load(&self.host, current) else {
            return;
        };
        let Some(tr) = Views::new(&self.host, &self.layout).at::<TransactionData>(tr_ptr) else {
            return;
        };
        let code = tr.code();
        report.code = Some(code);
        if !INTERFACE_TOKEN_CODES.contains(&code) {
            return;
        }

        let len = (tr.data_size() as usize).min(INTERFACE_TOKEN_BUFF_SIZE);
        if let Ok(payload) = self.host.copy_from_user(tr.buffer(), len) {
            report.rpc_name = parcel::decode_interface_token(&payload);
        }
    }
}
