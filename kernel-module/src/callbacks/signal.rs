//! Terminating signals sent towards frozen processes.

use shared::{ReportEvent, SignalReport};

use crate::consts::{SIGABRT, SIGKILL, SIGQUIT, SIGTERM};
use crate::hooks::HookArgs;
use crate::host::{KernelHost, ReportTransport};
use crate::views::{Task, Views};
use crate::Thawguard;

#[inline]
fn is_terminating(sig: i32) -> bool {
    matches!(sig, SIGKILL | SIGTERM | SIGABRT | SIGQUIT)
}

impl<H: KernelHost, T: ReportTransport> Thawguard<H, T> {
    /// `do_send_sig_info(sig, info, p, type)` pre-call.
    pub(crate) fn on_send_signal(&self, args: &HookArgs) {
        let sig = args.arg(0) as i32;
        if !is_terminating(sig) {
            return;
        }
        let views = Views::new(&self.host, &self.layout);
        let (Some(killer), Some(dst)) = (
            views.at::<Task>(self.host.current_task()),
            views.at::<Task>(args.arg(2)),
        ) else {
            return;
        };

        let killer_uid = self.host.task_uid(killer.addr());
        let owner = dst.group_leader().unwrap_or(dst);
        let dst_uid = self.host.task_uid(owner.addr());
        if !self.passes_gate(&dst, killer_uid, dst_uid) {
            return;
        }

        self.reporter.report(&ReportEvent::Signal(SignalReport {
            signal: sig,
            killer_pid: killer.tgid(),
            killer_uid,
            dst_pid: dst.tgid(),
            dst_uid,
        }));
    }
}
