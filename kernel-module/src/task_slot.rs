//! Per-task side slot for the `binder_transaction_data` pointer.
//!
//! The request pointer is only visible at `binder_transaction` entry, the
//! freeze decision only later in `binder_proc_transaction`. The pointer is
//! parked in the task's extension region between the two. Other modules
//! share that region, so the slot is the first zero word after the head of
//! the free area, picked once and then fixed for every task.

use core::sync::atomic::{AtomicU64, Ordering};

use crate::host::{Addr, KernelHost};

const SLOT_SIZE: u64 = core::mem::size_of::<u64>() as u64;
/// Slots probed before giving up.
const MAX_PROBE: u64 = 32;

/// Offset of a reserved slot within every task's extension region.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotHandle(u64);

impl SlotHandle {
    pub fn offset(self) -> u64 {
        self.0
    }
}

#[derive(Debug, Default)]
pub struct TaskSlots {
    /// Zero while unreserved.
    offset: AtomicU64,
}

impl TaskSlots {
    pub const fn new() -> Self {
        Self {
            offset: AtomicU64::new(0),
        }
    }

    pub fn handle(&self) -> Option<SlotHandle> {
        match self.offset.load(Ordering::Acquire) {
            0 => None,
            off => Some(SlotHandle(off)),
        }
    }

    /// Reserve the slot, probing `ext` for the first free word. Later
    /// calls return the slot picked by the first.
    pub fn reserve_slot<H: KernelHost + ?Sized>(&self, host: &H, ext: Addr) -> Option<SlotHandle> {
        if let Some(h) = self.handle() {
            return Some(h);
        }
        let free = (1..=MAX_PROBE)
            .map(|n| n * SLOT_SIZE)
            .find(|&off| host.read_u64(ext + off) == 0)?;
        match self
            .offset
            .compare_exchange(0, free, Ordering::AcqRel, Ordering::Acquire)
        {
            Ok(_) => {
                log::debug!("task slot reserved at ext+{:#x}", free);
                Some(SlotHandle(free))
            }
            Err(existing) => Some(SlotHandle(existing)),
        }
    }

    /// Park `value` for `task`. False when the task has no extension or no
    /// slot could be reserved.
    pub fn store<H: KernelHost + ?Sized>(&self, host: &H, task: Addr, value: u64) -> bool {
        let Some(ext) = host.task_ext(task) else {
            return false;
        };
        let Some(slot) = self.reserve_slot(host, ext) else {
            return false;
        };
        host.write_u64(ext + slot.offset(), value);
        true
    }

    /// Pointer parked for `task`, if any.
    pub fn load<H: KernelHost + ?Sized>(&self, host: &H, task: Addr) -> Option<Addr> {
        let slot = self.handle()?;
        let ext = host.task_ext(task)?;
        match host.read_u64(ext + slot.offset()) {
            0 => None,
            ptr => Some(ptr),
        }
    }
}
