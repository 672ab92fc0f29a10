//! Outdated oneway transaction eviction.
//!
//! While a destination is frozen its async queue only grows. When a new
//! oneway transaction arrives, an older queued one with identical target,
//! code and flags carries no extra information. The first such duplicate
//! is left queued; the second is unlinked and freed.
//!
//! Lock order: node lock, then inner proc lock. Both are dropped before the
//! buffer goes back to the allocator.

use log::debug;

use crate::consts::{BINDER_WORK_TRANSACTION, MAX_LIST_WALK, TF_ONE_WAY};
use crate::host::{BufferReleaseCall, KernelHost, SpinGuard};
use crate::offsets::{BufferReleaseAbi, ResolvedLayout};
use crate::views::{self, BufferView, NodeView, ProcView, TransactionView, Views};

/// `queued` is a superseded copy of `incoming`.
///
/// Buffer pids are compared only on layouts with binder-level freezing,
/// since older kernels do not record them.
pub fn supersedes<H: KernelHost + ?Sized>(
    queued: &TransactionView<'_, H>,
    incoming: &TransactionView<'_, H>,
    compare_pid: bool,
) -> bool {
    let (f1, f2) = (queued.flags(), incoming.flags());
    if f1 & f2 & TF_ONE_WAY != TF_ONE_WAY {
        return false;
    }
    let (Some(p1), Some(p2)) = (queued.to_proc(), incoming.to_proc()) else {
        return false;
    };
    let (Some(b1), Some(b2)) = (queued.buffer(), incoming.buffer()) else {
        return false;
    };
    let (Some(n1), Some(n2)) = (b1.target_node(), b2.target_node()) else {
        return false;
    };

    p1.task().map(|t| t.addr()) == p2.task().map(|t| t.addr())
        && queued.code() == incoming.code()
        && f1 == f2
        && (!compare_pid || b1.pid() == b2.pid())
        && n1.ptr() == n2.ptr()
        && n1.cookie() == n2.cookie()
}

/// Second queued transaction on `async_todo` that `incoming` supersedes.
/// Caller holds the node and inner proc locks.
fn find_outdated_locked<'a, H: KernelHost + ?Sized>(
    host: &'a H,
    layout: &'a ResolvedLayout,
    incoming: &TransactionView<'a, H>,
    node: &NodeView<'a, H>,
) -> Option<TransactionView<'a, H>> {
    let views = Views::new(host, layout);
    let compare_pid = layout.proc.is_frozen.is_some();
    let mut kept_first = false;

    for (entry, kind) in views::work_entries(host, node.async_todo(), MAX_LIST_WALK) {
        if kind != BINDER_WORK_TRANSACTION {
            continue;
        }
        let queued: TransactionView<'a, H> =
            views.at(entry - crate::consts::binder_transaction::WORK)?;
        if !supersedes(&queued, incoming, compare_pid) {
            continue;
        }
        if kept_first {
            return Some(queued);
        }
        kept_first = true;
    }
    None
}

/// Argument set for the release routine shape in use.
pub fn release_call<H: KernelHost + ?Sized>(
    abi: BufferReleaseAbi,
    proc: &ProcView<'_, H>,
    buffer: &BufferView<'_, H>,
) -> BufferReleaseCall {
    let (proc, buf) = (proc.addr(), buffer.addr());
    match abi {
        BufferReleaseAbi::V6 => BufferReleaseCall::V6 {
            proc,
            thread: 0,
            buffer: buf,
            failed_at: 0,
            is_failure: false,
        },
        BufferReleaseAbi::V5 => BufferReleaseCall::V5 {
            proc,
            thread: 0,
            buffer: buf,
            off_end_offset: buffer.data_size().next_multiple_of(8) + buffer.offsets_size(),
            is_failure: false,
        },
        BufferReleaseAbi::V4 => BufferReleaseCall::V4 {
            proc,
            buffer: buf,
            failed_at: 0,
            is_failure: false,
        },
        BufferReleaseAbi::V3 => BufferReleaseCall::V3 {
            proc,
            buffer: buf,
            failed_at: 0,
        },
    }
}

/// Evict one outdated duplicate of `incoming` from `node`'s async queue.
/// Returns true if a transaction was freed.
pub fn evict_outdated<H: KernelHost + ?Sized>(
    host: &H,
    layout: &ResolvedLayout,
    incoming: &TransactionView<'_, H>,
    proc: &ProcView<'_, H>,
    node: &NodeView<'_, H>,
) -> bool {
    let outdated = {
        let _node = SpinGuard::lock(host, node.lock());
        if !node.has_async_transaction() {
            return false;
        }
        let _inner = SpinGuard::lock(host, proc.inner_lock());
        let found = find_outdated_locked(host, layout, incoming, node);
        if let Some(t) = &found {
            views::list_del_init(host, t.work());
            proc.dec_outstanding();
        }
        found
    };

    let Some(outdated) = outdated else {
        return false;
    };
    let Some(buffer) = outdated.buffer() else {
        return false;
    };

    debug!(
        "free outdated txn pid={} uid={} data_size={}",
        proc.pid(),
        proc.task().map(|t| host.task_uid(t.addr())).unwrap_or(0),
        buffer.data_size()
    );

    outdated.clear_buffer();
    buffer.clear_transaction();
    host.buffer_release(release_call(layout.abi, proc, &buffer));
    host.alloc_free_buf(proc.alloc().addr(), buffer.addr());
    host.kfree(outdated.addr());
    host.atomic_inc(layout.globals.stats_deleted);
    true
}
