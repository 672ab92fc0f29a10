//! Typed read/write views over live binder and task objects.
//!
//! A [`View`] is an address plus the resolved layout; the marker type `K`
//! selects which accessors exist. Null pointers never become views, so
//! every accessor returning another view returns `Option`.

use core::marker::PhantomData;

use crate::consts::{
    binder_buffer, binder_proc, binder_thread, binder_transaction, binder_transaction_data,
    binder_work, TF_ONE_WAY,
};
use crate::host::{Addr, KernelMemory};
use crate::offsets::ResolvedLayout;

/// `struct binder_transaction`
pub enum Transaction {}
/// `struct binder_thread`
pub enum Thread {}
/// `struct binder_proc`
pub enum Proc {}
/// `struct binder_buffer`
pub enum Buffer {}
/// `struct binder_node`
pub enum Node {}
/// `struct binder_alloc` (embedded in `binder_proc`)
pub enum Alloc {}
/// `struct task_struct`
pub enum Task {}
/// `struct binder_transaction_data` as passed to `binder_transaction`
pub enum TransactionData {}

pub struct View<'a, M: ?Sized, K> {
    mem: &'a M,
    layout: &'a ResolvedLayout,
    addr: Addr,
    _kind: PhantomData<K>,
}

pub type TransactionView<'a, M> = View<'a, M, Transaction>;
pub type ThreadView<'a, M> = View<'a, M, Thread>;
pub type ProcView<'a, M> = View<'a, M, Proc>;
pub type BufferView<'a, M> = View<'a, M, Buffer>;
pub type NodeView<'a, M> = View<'a, M, Node>;
pub type AllocView<'a, M> = View<'a, M, Alloc>;
pub type TaskView<'a, M> = View<'a, M, Task>;
pub type TransactionDataView<'a, M> = View<'a, M, TransactionData>;

impl<M: ?Sized, K> Clone for View<'_, M, K> {
    fn clone(&self) -> Self {
        *self
    }
}
impl<M: ?Sized, K> Copy for View<'_, M, K> {}

impl<M: ?Sized, K> core::fmt::Debug for View<'_, M, K> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}@{:#x}", core::any::type_name::<K>(), self.addr)
    }
}

/// Entry point: binds memory and layout once.
pub struct Views<'a, M: ?Sized> {
    mem: &'a M,
    layout: &'a ResolvedLayout,
}

impl<'a, M: KernelMemory + ?Sized> Views<'a, M> {
    pub fn new(mem: &'a M, layout: &'a ResolvedLayout) -> Self {
        Self { mem, layout }
    }

    pub fn at<K>(&self, addr: Addr) -> Option<View<'a, M, K>> {
        (addr != 0).then_some(View {
            mem: self.mem,
            layout: self.layout,
            addr,
            _kind: PhantomData,
        })
    }
}

impl<'a, M: KernelMemory + ?Sized, K> View<'a, M, K> {
    #[inline]
    pub fn addr(&self) -> Addr {
        self.addr
    }

    #[inline]
    fn field(&self, offset: u64) -> Addr {
        self.addr.wrapping_add(offset)
    }

    fn follow<K2>(&self, offset: u64) -> Option<View<'a, M, K2>> {
        Views::new(self.mem, self.layout).at(self.mem.read_u64(self.field(offset)))
    }

    fn embedded<K2>(&self, offset: u64) -> View<'a, M, K2> {
        View {
            mem: self.mem,
            layout: self.layout,
            addr: self.field(offset),
            _kind: PhantomData,
        }
    }
}

impl<'a, M: KernelMemory + ?Sized> View<'a, M, Transaction> {
    /// Sending thread; absent for oneway and kernel-originated calls.
    pub fn from_thread(&self) -> Option<ThreadView<'a, M>> {
        self.follow(self.layout.transaction.from)
    }

    pub fn to_proc(&self) -> Option<ProcView<'a, M>> {
        self.follow(self.layout.transaction.to_proc)
    }

    pub fn buffer(&self) -> Option<BufferView<'a, M>> {
        self.follow(self.layout.transaction.buffer)
    }

    pub fn code(&self) -> u32 {
        self.mem.read_u32(self.field(self.layout.transaction.code))
    }

    pub fn flags(&self) -> u32 {
        self.mem.read_u32(self.field(self.layout.transaction.flags))
    }

    pub fn is_oneway(&self) -> bool {
        self.flags() & TF_ONE_WAY != 0
    }

    /// Address of the embedded `binder_work` list entry.
    pub fn work(&self) -> Addr {
        self.field(binder_transaction::WORK)
    }

    pub fn clear_buffer(&self) {
        self.mem.write_u64(self.field(self.layout.transaction.buffer), 0);
    }
}

impl<'a, M: KernelMemory + ?Sized> View<'a, M, Thread> {
    pub fn proc(&self) -> Option<ProcView<'a, M>> {
        self.follow(binder_thread::PROC)
    }
}

impl<'a, M: KernelMemory + ?Sized> View<'a, M, Proc> {
    pub fn pid(&self) -> i32 {
        self.mem.read_i32(self.field(binder_proc::PID))
    }

    pub fn task(&self) -> Option<TaskView<'a, M>> {
        self.follow(binder_proc::TSK)
    }

    pub fn alloc(&self) -> AllocView<'a, M> {
        self.embedded(self.layout.proc.alloc)
    }

    pub fn inner_lock(&self) -> Addr {
        self.field(self.layout.proc.inner_lock)
    }

    /// Binder-level freeze flag. False on kernels that lack it.
    pub fn driver_frozen(&self) -> bool {
        self.layout
            .proc
            .is_frozen
            .is_some_and(|off| self.mem.read_u8(self.field(off)) != 0)
    }

    /// Drop one from `outstanding_txns`, where the kernel tracks it.
    pub fn dec_outstanding(&self) {
        if let Some(off) = self.layout.proc.outstanding_txns {
            let addr = self.field(off);
            let n = self.mem.read_u32(addr);
            self.mem.write_u32(addr, n.wrapping_sub(1));
        }
    }
}

impl<'a, M: KernelMemory + ?Sized> View<'a, M, Buffer> {
    pub fn target_node(&self) -> Option<NodeView<'a, M>> {
        self.follow(binder_buffer::TARGET_NODE)
    }

    pub fn pid(&self) -> i32 {
        self.mem.read_i32(self.field(binder_buffer::PID))
    }

    pub fn data_size(&self) -> u64 {
        self.mem.read_u64(self.field(binder_buffer::DATA_SIZE))
    }

    pub fn offsets_size(&self) -> u64 {
        self.mem.read_u64(self.field(binder_buffer::OFFSETS_SIZE))
    }

    pub fn clear_transaction(&self) {
        self.mem.write_u64(self.field(binder_buffer::TRANSACTION), 0);
    }
}

impl<M: KernelMemory + ?Sized> View<'_, M, Node> {
    pub fn lock(&self) -> Addr {
        self.field(self.layout.node.lock)
    }

    pub fn ptr(&self) -> u64 {
        self.mem.read_u64(self.field(self.layout.node.ptr))
    }

    pub fn cookie(&self) -> u64 {
        self.mem.read_u64(self.field(self.layout.node.cookie))
    }

    pub fn has_async_transaction(&self) -> bool {
        self.mem.read_u8(self.field(self.layout.node.has_async_transaction)) != 0
    }

    /// Head of the node's pending async work list.
    pub fn async_todo(&self) -> Addr {
        self.field(self.layout.node.async_todo)
    }
}

impl<M: KernelMemory + ?Sized> View<'_, M, Alloc> {
    pub fn free_async_space(&self) -> u64 {
        self.mem.read_u64(self.field(self.layout.alloc.free_async_space))
    }

    pub fn buffer_size(&self) -> u64 {
        self.mem.read_u64(self.field(self.layout.alloc.buffer_size))
    }
}

impl<'a, M: KernelMemory + ?Sized> View<'a, M, Task> {
    pub fn jobctl(&self) -> u64 {
        self.mem.read_u64(self.field(self.layout.task.jobctl))
    }

    pub fn pid(&self) -> i32 {
        self.mem.read_i32(self.field(self.layout.task.pid))
    }

    pub fn tgid(&self) -> i32 {
        self.mem.read_i32(self.field(self.layout.task.tgid))
    }

    pub fn group_leader(&self) -> Option<TaskView<'a, M>> {
        self.follow(self.layout.task.group_leader)
    }
}

impl<M: KernelMemory + ?Sized> View<'_, M, TransactionData> {
    pub fn code(&self) -> u32 {
        self.mem.read_u32(self.field(binder_transaction_data::CODE))
    }

    pub fn flags(&self) -> u32 {
        self.mem.read_u32(self.field(binder_transaction_data::FLAGS))
    }

    pub fn data_size(&self) -> u64 {
        self.mem.read_u64(self.field(binder_transaction_data::DATA_SIZE))
    }

    /// User-space address of the parcel payload.
    pub fn buffer(&self) -> Addr {
        self.mem.read_u64(self.field(binder_transaction_data::BUFFER))
    }
}

/// Walk an intrusive `binder_work` list, yielding entry addresses.
///
/// Stops at the head, at a null link, or after `limit` entries.
pub fn work_entries<M: KernelMemory + ?Sized>(
    mem: &M,
    head: Addr,
    limit: usize,
) -> impl Iterator<Item = (Addr, u32)> + '_ {
    let mut cur = mem.read_u64(head + binder_work::ENTRY);
    let mut seen = 0;
    core::iter::from_fn(move || {
        if cur == head || cur == 0 || seen >= limit {
            return None;
        }
        let entry = cur;
        let kind = mem.read_u32(entry + binder_work::TYPE);
        cur = mem.read_u64(entry + binder_work::ENTRY);
        seen += 1;
        Some((entry, kind))
    })
}

/// `list_del_init` on the entry at `entry`.
pub fn list_del_init<M: KernelMemory + ?Sized>(mem: &M, entry: Addr) {
    let next = mem.read_u64(entry);
    let prev = mem.read_u64(entry + 8);
    mem.write_u64(next + 8, prev);
    mem.write_u64(prev, next);
    mem.write_u64(entry, entry);
    mem.write_u64(entry + 8, entry);
}
