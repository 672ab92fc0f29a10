//! Kernel ABI constants and the struct members that do not move between
//! supported kernel revisions.
//!
//! Everything that does move lives in [`crate::offsets::ResolvedLayout`]
//! and is recovered at activation time.

/*────────── uid bands ─────────*/

/// Highest uid that counts as a system service.
pub const MAX_SYSTEM_UID: u32 = 2000;
/// Application uids start above this value.
pub const MIN_USERAPP_UID: u32 = 10000;

/*────────── binder flags & codes ─────────*/

pub const TF_ONE_WAY: u32 = 0x01;
pub const BINDER_WORK_TRANSACTION: u32 = 1;

/// Operation codes that carry an interface token at the start of the parcel.
pub const INTERFACE_TOKEN_CODES: core::ops::RangeInclusive<u32> = 29..=32;
/// Header bytes preceding the UTF-16 interface token.
pub const PARCEL_OFFSET: usize = 16;
/// Upper bound on payload bytes copied from user memory for name decoding.
pub const INTERFACE_TOKEN_BUFF_SIZE: usize = 140;

/// Async headroom slack added to 10% of the buffer size.
pub const ASYNC_SPACE_SLACK: u64 = 0x300;

/*────────── task_struct ─────────*/

pub const JOBCTL_TRAP_FREEZE: u64 = 1 << 23;

pub const SIGQUIT: i32 = 3;
pub const SIGABRT: i32 = 6;
pub const SIGKILL: i32 = 9;
pub const SIGTERM: i32 = 15;

/*────────── fixed member offsets ─────────*/

pub mod binder_buffer {
    pub const TRANSACTION: u64 = 0x30;
    pub const TARGET_NODE: u64 = 0x38;
    pub const DATA_SIZE: u64 = 0x40;
    pub const OFFSETS_SIZE: u64 = 0x48;
    pub const PID: u64 = 0x60;
}

pub mod binder_proc {
    pub const PID: u64 = 0x48;
    pub const TSK: u64 = 0x50;
}

pub mod binder_thread {
    pub const PROC: u64 = 0x0;
}

pub mod binder_work {
    pub const ENTRY: u64 = 0x0;
    pub const TYPE: u64 = 0x10;
}

pub mod binder_transaction {
    /// `struct binder_work work` follows the 32-bit debug id.
    pub const WORK: u64 = 0x8;
}

pub mod binder_transaction_data {
    pub const CODE: u64 = 0x10;
    pub const FLAGS: u64 = 0x14;
    pub const DATA_SIZE: u64 = 0x20;
    pub const BUFFER: u64 = 0x30;
}

/*────────── errno ─────────*/

pub const ENOENT: i32 = 2;
pub const EAGAIN: i32 = 11;
pub const EINVAL: i32 = 22;

/// Loop guard for walks over kernel lists.
pub const MAX_LIST_WALK: usize = 4096;
