//! Seams between the detection core and the running kernel.
//!
//! The core never dereferences a raw pointer itself. Every read, write,
//! lock and free goes through these traits, which the loader glue
//! implements over the real kernel and the test suite implements over a
//! sparse fake.

use alloc::vec::Vec;

use crate::error::{ResolveError, TransportError};

/// A kernel virtual address.
pub type Addr = u64;

/// A user-memory copy faulted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Fault;

/// Raw access to kernel memory by address.
pub trait KernelMemory {
    fn read_u8(&self, addr: Addr) -> u8;
    fn read_u32(&self, addr: Addr) -> u32;
    fn read_u64(&self, addr: Addr) -> u64;
    fn write_u32(&self, addr: Addr, value: u32);
    fn write_u64(&self, addr: Addr, value: u64);

    fn read_i32(&self, addr: Addr) -> i32 {
        self.read_u32(addr) as i32
    }

    /// Read `count` instruction words starting at `addr`.
    fn read_words(&self, addr: Addr, count: usize) -> Vec<u32> {
        (0..count as u64)
            .map(|i| self.read_u32(addr + i * 4))
            .collect()
    }
}

/// One call into `binder_transaction_buffer_release`, shaped for the
/// revision detected at activation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferReleaseCall {
    /// `(proc, thread, buffer, failed_at_size, is_failure)`
    V6 {
        proc: Addr,
        thread: Addr,
        buffer: Addr,
        failed_at: u64,
        is_failure: bool,
    },
    /// `(proc, thread, buffer, off_end_offset, is_failure)`
    V5 {
        proc: Addr,
        thread: Addr,
        buffer: Addr,
        off_end_offset: u64,
        is_failure: bool,
    },
    /// `(proc, buffer, failed_at_size, is_failure)`
    V4 {
        proc: Addr,
        buffer: Addr,
        failed_at: u64,
        is_failure: bool,
    },
    /// `(proc, buffer, failed_at_ptr)`
    V3 {
        proc: Addr,
        buffer: Addr,
        failed_at: Addr,
    },
}

/// Kernel services consumed from hook context.
pub trait KernelHost: KernelMemory {
    fn current_task(&self) -> Addr;
    fn task_uid(&self, task: Addr) -> u32;
    fn cgroup_freezing(&self, task: Addr) -> bool;

    fn spin_lock(&self, lock: Addr);
    fn spin_unlock(&self, lock: Addr);

    /// Copy `len` bytes from user address `src`. This is the only call
    /// that may sleep.
    fn copy_from_user(&self, src: Addr, len: usize) -> Result<Vec<u8>, Fault>;

    fn buffer_release(&self, call: BufferReleaseCall);
    fn alloc_free_buf(&self, alloc: Addr, buffer: Addr);
    fn kfree(&self, obj: Addr);
    fn atomic_inc(&self, counter: Addr);

    /// Start of the free part of the task's extension region, or `None`
    /// when the task has no valid extension.
    fn task_ext(&self, task: Addr) -> Option<Addr>;

    /// Uid owning the socket of `skb`, or `None` for missing or
    /// non-full sockets.
    #[cfg(feature = "network")]
    fn skb_socket_uid(&self, skb: Addr) -> Option<u32>;
}

/// Holds a kernel spinlock until dropped.
#[must_use = "the lock is released as soon as the guard is dropped"]
pub struct SpinGuard<'a, H: KernelHost + ?Sized> {
    host: &'a H,
    lock: Addr,
}

impl<'a, H: KernelHost + ?Sized> SpinGuard<'a, H> {
    pub fn lock(host: &'a H, lock: Addr) -> Self {
        host.spin_lock(lock);
        Self { host, lock }
    }
}

impl<H: KernelHost + ?Sized> Drop for SpinGuard<'_, H> {
    fn drop(&mut self) {
        self.host.spin_unlock(self.lock);
    }
}

/// Name to address lookup (kallsyms).
pub trait SymbolLookup {
    fn lookup(&self, name: &str) -> Option<Addr>;

    fn require(&self, name: &'static str) -> Result<Addr, ResolveError> {
        self.lookup(name).ok_or(ResolveError::MissingSymbol(name))
    }

    /// First of `names` that resolves.
    fn require_any(&self, names: &[&'static str]) -> Result<Addr, ResolveError> {
        names
            .iter()
            .find_map(|n| self.lookup(n))
            .ok_or(ResolveError::MissingSymbol(names.first().copied().unwrap_or("")))
    }
}

/// Kernel-side message channel (netlink) plus its discovery entry.
pub trait ReportTransport {
    /// Bind a kernel socket on `unit`.
    fn create_channel(&self, unit: i32) -> Result<(), TransportError>;
    /// Publish `unit` as a read-only discovery entry.
    fn publish_unit(&self, unit: i32) -> Result<(), TransportError>;
    /// Non-blocking unicast of `payload` to `port`.
    fn unicast(&self, port: u32, payload: &[u8]) -> Result<(), TransportError>;
    /// Tear down the socket and the discovery entry.
    fn release(&self);
}
