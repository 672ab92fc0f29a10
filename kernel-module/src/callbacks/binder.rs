//! Binder transaction classification.
//!
//! Two sources feed [`Thawguard::on_binder_transaction`]: the
//! `binder_transaction` tracepoint when the kernel exports it, otherwise
//! the `binder_proc_transaction` pre-call hook. The same hook also drives
//! eviction.

use log::trace;
use shared::BinderKind;

use super::Endpoint;
use crate::consts::{ASYNC_SPACE_SLACK, MAX_SYSTEM_UID, MIN_USERAPP_UID};
use crate::evictor;
use crate::freeze;
use crate::hooks::HookArgs;
use crate::host::{Addr, KernelHost, ReportTransport};
use crate::views::{Proc, Task, Transaction, Views};
use crate::Thawguard;

impl<H: KernelHost, T: ReportTransport> Thawguard<H, T> {
    /// Classify transaction `t` as a reply, a sync or oneway call, and an
    /// async-space overflow.
    pub fn on_binder_transaction(&self, reply: bool, t: Addr) {
        let views = Views::new(&self.host, &self.layout);
        let Some(t) = views.at::<Transaction>(t) else {
            return;
        };
        let Some(to_proc) = t.to_proc() else {
            return;
        };
        let Some(dst_task) = to_proc.task() else {
            return;
        };
        let dst = Endpoint {
            pid: to_proc.pid(),
            task: dst_task,
        };
        let current = views.at::<Task>(self.host.current_task()).map(|task| Endpoint {
            pid: task.pid(),
            task,
        });

        if reply {
            if let Some(src) = current {
                self.classify_reply(src, dst);
            }
        } else if let Some(from) = t.from_thread() {
            let sender = from
                .proc()
                .and_then(|p| p.task().map(|task| Endpoint { pid: p.pid(), task }));
            if let Some(src) = sender {
                self.classify_transaction(src, dst, false);
            }
        } else if let Some(src) = current {
            self.classify_transaction(src, dst, true);

            let alloc = to_proc.alloc();
            let free = alloc.free_async_space();
            if free < alloc.buffer_size() / 10 + ASYNC_SPACE_SLACK {
                trace!("async space low: pid={} free={:#x}", dst.pid, free);
                self.report_binder(BinderKind::FreeBufferFull, true, src, dst);
            }
        }
    }

    /// Reply towards a system-band uid.
    fn classify_reply(&self, src: Endpoint<'_, H>, dst: Endpoint<'_, H>) {
        if self.host.task_uid(dst.task.addr()) > MAX_SYSTEM_UID || src.pid == dst.pid {
            return;
        }
        self.report_binder(BinderKind::Reply, false, src, dst);
    }

    /// Call into an app-band uid.
    fn classify_transaction(&self, src: Endpoint<'_, H>, dst: Endpoint<'_, H>, oneway: bool) {
        if self.host.task_uid(dst.task.addr()) <= MIN_USERAPP_UID || src.pid == dst.pid {
            return;
        }
        self.report_binder(BinderKind::Transaction, oneway, src, dst);
    }

    /// `binder_proc_transaction(t, proc, thread)` pre-call.
    pub(crate) fn on_proc_transaction(&self, args: &HookArgs) {
        let t_addr = args.arg(0);
        if self.tracepoint.is_none() {
            self.on_binder_transaction(false, t_addr);
        }

        let views = Views::new(&self.host, &self.layout);
        let (Some(t), Some(proc)) = (views.at::<Transaction>(t_addr), views.at::<Proc>(args.arg(1)))
        else {
            return;
        };
        let Some(node) = t.buffer().and_then(|b| b.target_node()) else {
            return;
        };
        if !t.is_oneway() || !freeze::eviction_eligible(&self.host, &proc) {
            return;
        }
        let sender_uid = self.host.task_uid(self.host.current_task());
        if proc.task().is_some_and(|task| self.host.task_uid(task.addr()) == sender_uid) {
            return;
        }
        evictor::evict_outdated(&self.host, &self.layout, &t, &proc, &node);
    }

    /// `binder_transaction(proc, thread, tr, reply, extra_buffers_size)`
    /// pre-call: park `tr` for the classification that follows.
    pub(crate) fn on_transaction_entry(&self, args: &HookArgs) {
        let current = self.host.current_task();
        if !self.slots.store(&self.host, current, args.arg(2)) {
            trace!("no task slot for {:#x}", current);
        }
    }
}
