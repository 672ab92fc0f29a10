//! Freeze oracle.
//!
//! A task counts as frozen when either freezer has claimed it: the cgroup
//! v2 freezer parks it with `JOBCTL_TRAP_FREEZE` in `jobctl`, the v1
//! freezer answers through `cgroup_freezing()`.

use crate::consts::JOBCTL_TRAP_FREEZE;
use crate::host::KernelHost;
use crate::views::{ProcView, TaskView};

#[inline]
pub fn jobctl_frozen<H: KernelHost + ?Sized>(task: &TaskView<'_, H>) -> bool {
    task.jobctl() & JOBCTL_TRAP_FREEZE != 0
}

pub fn is_frozen<H: KernelHost + ?Sized>(host: &H, task: &TaskView<'_, H>) -> bool {
    jobctl_frozen(task) || host.cgroup_freezing(task.addr())
}

/// The evictor may touch this process's queues: its task is frozen and
/// binder has not entered its own freeze mode for it.
pub fn eviction_eligible<H: KernelHost + ?Sized>(host: &H, proc: &ProcView<'_, H>) -> bool {
    let Some(task) = proc.task() else {
        return false;
    };
    is_frozen(host, &task) && !proc.driver_frozen()
}
