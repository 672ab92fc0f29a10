//! In-process fake kernel for unit tests.
//!
//! Memory is a sparse byte map (absent bytes read as zero), objects are
//! bump-allocated, and every lock, release and free is appended to
//! [`FakeKernel::events`] so ordering can be asserted.

use std::cell::{Cell, RefCell};
use std::collections::{HashMap, HashSet};
use std::string::String;
use std::vec::Vec;

use crate::consts::{binder_buffer, binder_proc, binder_thread, binder_work, BINDER_WORK_TRANSACTION, JOBCTL_TRAP_FREEZE};
use crate::error::TransportError;
use crate::host::{Addr, BufferReleaseCall, Fault, KernelHost, KernelMemory, ReportTransport, SymbolLookup};
use crate::hooks::{EventSource, HookHandle, HookPoint};
use crate::offsets::{
    fixtures, AllocOffsets, BufferReleaseAbi, Globals, NodeOffsets, ProcOffsets, ResolvedLayout,
    TaskOffsets, TransactionOffsets,
};

/// Offsets produced by resolving [`fixtures`] text.
pub fn gki_layout() -> ResolvedLayout {
    ResolvedLayout {
        transaction: TransactionOffsets {
            from: 0x20,
            to_proc: 0x30,
            buffer: 0x50,
            code: 0x58,
            flags: 0x5C,
        },
        node: NodeOffsets {
            lock: 0x4,
            ptr: 0x58,
            cookie: 0x60,
            has_async_transaction: 0x6B,
            async_todo: 0x70,
        },
        proc: ProcOffsets {
            context: 0x240,
            inner_lock: 0x248,
            outer_lock: 0x24C,
            alloc: 0x1A8,
            is_frozen: Some(0x71),
            outstanding_txns: Some(0x6C),
        },
        alloc: AllocOffsets {
            pid: 0x84,
            buffer: 0x40,
            buffers: 0x48,
            free_async_space: 0x68,
            buffer_size: 0x78,
        },
        task: TaskOffsets {
            jobctl: 0x580,
            pid: 0x5D8,
            tgid: 0x5DC,
            group_leader: 0x618,
        },
        globals: Globals {
            stats_deleted: fixtures::STATS + 0xCC,
            tracepoint: None,
        },
        abi: BufferReleaseAbi::V5,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KEvent {
    Lock(Addr),
    Unlock(Addr),
    Release(BufferReleaseCall),
    FreeBuf { alloc: Addr, buffer: Addr },
    Kfree(Addr),
    AtomicInc(Addr),
}

/// Shape of a transaction created by [`FakeKernel::new_txn`].
#[derive(Debug, Clone, Copy, Default)]
pub struct TxnFixture {
    pub to_proc: Addr,
    pub node: Addr,
    pub from_thread: Addr,
    pub code: u32,
    pub flags: u32,
    pub sender_pid: i32,
}

const TEXT_BASE: Addr = 0xFFFF_FFC0_1000_0000;
const HEAP_BASE: Addr = 0xFFFF_FF80_0000_0000;

pub struct FakeKernel {
    mem: RefCell<HashMap<Addr, u8>>,
    next: Cell<Addr>,
    symbols: HashMap<String, Addr>,
    current: Cell<Addr>,
    uids: RefCell<HashMap<Addr, u32>>,
    cgroup_frozen: RefCell<HashSet<Addr>>,
    user: RefCell<HashMap<Addr, Vec<u8>>>,
    task_ext: RefCell<HashMap<Addr, Addr>>,
    #[cfg_attr(not(feature = "network"), allow(dead_code))]
    sockets: RefCell<HashMap<Addr, u32>>,
    pub events: RefCell<Vec<KEvent>>,
}

impl FakeKernel {
    pub fn new() -> Self {
        Self {
            mem: RefCell::new(HashMap::new()),
            next: Cell::new(HEAP_BASE),
            symbols: HashMap::new(),
            current: Cell::new(0),
            uids: RefCell::new(HashMap::new()),
            cgroup_frozen: RefCell::new(HashSet::new()),
            user: RefCell::new(HashMap::new()),
            task_ext: RefCell::new(HashMap::new()),
            sockets: RefCell::new(HashMap::new()),
            events: RefCell::new(Vec::new()),
        }
    }

    /// Kernel whose text resolves to [`gki_layout`].
    pub fn with_binder_text() -> Self {
        let mut k = Self::new();
        let free_txn_at = TEXT_BASE + 0x7000;
        let bodies = [
            ("binder_transaction_buffer_release", fixtures::release_v5()),
            ("binder_proc_transaction", fixtures::proc_transaction()),
            ("task_clear_jobctl_trapping", fixtures::jobctl()),
            ("binder_transaction", fixtures::transaction()),
            ("binder_free_proc", fixtures::free_proc()),
            ("binder_alloc_init", fixtures::alloc_init()),
        ];
        for (n, (name, words)) in bodies.into_iter().enumerate() {
            let at = TEXT_BASE + n as u64 * 0x1000;
            k.write_words(at, &words);
            k.define_symbol(name, at);
        }
        k.write_words(free_txn_at, &fixtures::free_transaction(free_txn_at));
        k.define_symbol("binder_free_transaction", free_txn_at);
        k.define_symbol("binder_stats", fixtures::STATS);
        k.define_symbol("do_send_sig_info", TEXT_BASE + 0x8000);
        k.define_symbol("tcp_v4_rcv", TEXT_BASE + 0x9000);
        k.define_symbol("tcp_v6_rcv", TEXT_BASE + 0xA000);
        k
    }

    /*────────── symbols & raw memory ─────────*/

    pub fn define_symbol(&mut self, name: &str, addr: Addr) {
        self.symbols.insert(name.into(), addr);
    }

    pub fn forget_symbol(&mut self, name: &str) {
        self.symbols.remove(name);
    }

    pub fn rename_symbol(&mut self, from: &str, to: &str) {
        if let Some(addr) = self.symbols.remove(from) {
            self.symbols.insert(to.into(), addr);
        }
    }

    pub fn write_words(&self, addr: Addr, words: &[u32]) {
        for (i, &w) in words.iter().enumerate() {
            self.write_u32(addr + 4 * i as u64, w);
        }
    }

    fn write_bytes(&self, addr: Addr, bytes: &[u8]) {
        let mut mem = self.mem.borrow_mut();
        for (i, &b) in bytes.iter().enumerate() {
            mem.insert(addr.wrapping_add(i as u64), b);
        }
    }

    fn read_bytes<const N: usize>(&self, addr: Addr) -> [u8; N] {
        let mem = self.mem.borrow();
        core::array::from_fn(|i| mem.get(&addr.wrapping_add(i as u64)).copied().unwrap_or(0))
    }

    pub fn write8(&self, addr: Addr, v: u8) {
        self.write_bytes(addr, &[v]);
    }
    pub fn write32(&self, addr: Addr, v: u32) {
        self.write_u32(addr, v);
    }
    pub fn write64(&self, addr: Addr, v: u64) {
        self.write_u64(addr, v);
    }
    pub fn read32(&self, addr: Addr) -> u32 {
        self.read_u32(addr)
    }
    pub fn read64(&self, addr: Addr) -> u64 {
        self.read_u64(addr)
    }

    /// Zeroed object of `size` bytes.
    pub fn alloc(&self, size: u64) -> Addr {
        let at = self.next.get();
        self.next.set(at + ((size + 0x3F) & !0x3F) + 0x40);
        at
    }

    /*────────── tasks ─────────*/

    pub fn new_task(&self, layout: &ResolvedLayout, pid: i32, tgid: i32, uid: u32) -> Addr {
        let t = self.alloc(0x1000);
        self.write32(t + layout.task.pid, pid as u32);
        self.write32(t + layout.task.tgid, tgid as u32);
        self.write64(t + layout.task.group_leader, t);
        self.uids.borrow_mut().insert(t, uid);
        t
    }

    pub fn set_group_leader(&self, layout: &ResolvedLayout, task: Addr, leader: Addr) {
        self.write64(task + layout.task.group_leader, leader);
    }

    pub fn set_jobctl_freeze(&self, layout: &ResolvedLayout, task: Addr) {
        let addr = task + layout.task.jobctl;
        self.write64(addr, self.read64(addr) | JOBCTL_TRAP_FREEZE);
    }

    pub fn set_cgroup_freezing(&self, task: Addr) {
        self.cgroup_frozen.borrow_mut().insert(task);
    }

    pub fn set_current(&self, task: Addr) {
        self.current.set(task);
    }

    pub fn attach_task_ext(&self, task: Addr) -> Addr {
        let ext = self.alloc(0x200);
        self.task_ext.borrow_mut().insert(task, ext);
        ext
    }

    pub fn put_user(&self, addr: Addr, bytes: &[u8]) {
        self.user.borrow_mut().insert(addr, bytes.to_vec());
    }

    #[cfg(feature = "network")]
    pub fn put_socket(&self, skb: Addr, uid: u32) {
        self.sockets.borrow_mut().insert(skb, uid);
    }

    /*────────── binder objects ─────────*/

    pub fn new_proc(&self, layout: &ResolvedLayout, task: Addr, pid: i32) -> Addr {
        let p = self.alloc(0x400);
        self.write32(p + binder_proc::PID, pid as u32);
        self.write64(p + binder_proc::TSK, task);
        self.set_async_space(layout, p, 0x80000, 0x100000);
        p
    }

    pub fn set_async_space(&self, layout: &ResolvedLayout, proc: Addr, free: u64, size: u64) {
        let alloc = proc + layout.proc.alloc;
        self.write64(alloc + layout.alloc.free_async_space, free);
        self.write64(alloc + layout.alloc.buffer_size, size);
    }

    pub fn new_thread(&self, proc: Addr) -> Addr {
        let th = self.alloc(0x40);
        self.write64(th + binder_thread::PROC, proc);
        th
    }

    pub fn new_node(&self, layout: &ResolvedLayout, ptr: u64, cookie: u64) -> Addr {
        let n = self.alloc(0x100);
        self.write64(n + layout.node.ptr, ptr);
        self.write64(n + layout.node.cookie, cookie);
        let head = n + layout.node.async_todo;
        self.write64(head, head);
        self.write64(head + 8, head);
        n
    }

    pub fn new_txn(&self, layout: &ResolvedLayout, fixture: TxnFixture) -> Addr {
        let t = self.alloc(0x100);
        let b = self.alloc(0x80);
        self.write64(b + binder_buffer::TRANSACTION, t);
        self.write64(b + binder_buffer::TARGET_NODE, fixture.node);
        self.write64(b + binder_buffer::DATA_SIZE, 0x64);
        self.write64(b + binder_buffer::OFFSETS_SIZE, 0x8);
        self.write32(b + binder_buffer::PID, fixture.sender_pid as u32);

        let work = t + crate::consts::binder_transaction::WORK;
        self.write64(work, work);
        self.write64(work + 8, work);
        self.write32(work + binder_work::TYPE, BINDER_WORK_TRANSACTION);

        self.write64(t + layout.transaction.from, fixture.from_thread);
        self.write64(t + layout.transaction.to_proc, fixture.to_proc);
        self.write64(t + layout.transaction.buffer, b);
        self.write32(t + layout.transaction.code, fixture.code);
        self.write32(t + layout.transaction.flags, fixture.flags);
        t
    }

    /// `list_add_tail` of the transaction's work onto the node's async list.
    pub fn enqueue_async(&self, layout: &ResolvedLayout, node: Addr, txn: Addr) {
        let head = node + layout.node.async_todo;
        let entry = txn + crate::consts::binder_transaction::WORK;
        self.link_tail(head, entry);
        self.write8(node + layout.node.has_async_transaction, 1);
    }

    /// Queue a non-transaction work item (e.g. a node work) on the list.
    pub fn enqueue_work(&self, layout: &ResolvedLayout, node: Addr, kind: u32) -> Addr {
        let w = self.alloc(0x20);
        self.write32(w + binder_work::TYPE, kind);
        self.link_tail(node + layout.node.async_todo, w);
        w
    }

    fn link_tail(&self, head: Addr, entry: Addr) {
        let prev = self.read64(head + 8);
        self.write64(entry, head);
        self.write64(entry + 8, prev);
        self.write64(prev, entry);
        self.write64(head + 8, entry);
    }

    /// Transactions currently on the node's async list, in order.
    pub fn queued(&self, layout: &ResolvedLayout, node: Addr) -> Vec<Addr> {
        crate::views::work_entries(self, node + layout.node.async_todo, 64)
            .filter(|&(_, kind)| kind == BINDER_WORK_TRANSACTION)
            .map(|(entry, _)| entry - crate::consts::binder_transaction::WORK)
            .collect()
    }

    pub fn take_events(&self) -> Vec<KEvent> {
        std::mem::take(&mut *self.events.borrow_mut())
    }
}

impl KernelMemory for FakeKernel {
    fn read_u8(&self, addr: Addr) -> u8 {
        self.read_bytes::<1>(addr)[0]
    }
    fn read_u32(&self, addr: Addr) -> u32 {
        u32::from_le_bytes(self.read_bytes(addr))
    }
    fn read_u64(&self, addr: Addr) -> u64 {
        u64::from_le_bytes(self.read_bytes(addr))
    }
    fn write_u32(&self, addr: Addr, value: u32) {
        self.write_bytes(addr, &value.to_le_bytes());
    }
    fn write_u64(&self, addr: Addr, value: u64) {
        self.write_bytes(addr, &value.to_le_bytes());
    }
}

impl KernelHost for FakeKernel {
    fn current_task(&self) -> Addr {
        self.current.get()
    }
    fn task_uid(&self, task: Addr) -> u32 {
        self.uids.borrow().get(&task).copied().unwrap_or(0)
    }
    fn cgroup_freezing(&self, task: Addr) -> bool {
        self.cgroup_frozen.borrow().contains(&task)
    }
    fn spin_lock(&self, lock: Addr) {
        self.events.borrow_mut().push(KEvent::Lock(lock));
    }
    fn spin_unlock(&self, lock: Addr) {
        self.events.borrow_mut().push(KEvent::Unlock(lock));
    }
    fn copy_from_user(&self, src: Addr, len: usize) -> Result<Vec<u8>, Fault> {
        let user = self.user.borrow();
        let bytes = user.get(&src).ok_or(Fault)?;
        bytes.get(..len).map(<[u8]>::to_vec).ok_or(Fault)
    }
    fn buffer_release(&self, call: BufferReleaseCall) {
        self.events.borrow_mut().push(KEvent::Release(call));
    }
    fn alloc_free_buf(&self, alloc: Addr, buffer: Addr) {
        self.events.borrow_mut().push(KEvent::FreeBuf { alloc, buffer });
    }
    fn kfree(&self, obj: Addr) {
        self.events.borrow_mut().push(KEvent::Kfree(obj));
    }
    fn atomic_inc(&self, counter: Addr) {
        self.write_u32(counter, self.read_u32(counter).wrapping_add(1));
        self.events.borrow_mut().push(KEvent::AtomicInc(counter));
    }
    fn task_ext(&self, task: Addr) -> Option<Addr> {
        self.task_ext.borrow().get(&task).copied()
    }
    #[cfg(feature = "network")]
    fn skb_socket_uid(&self, skb: Addr) -> Option<u32> {
        self.sockets.borrow().get(&skb).copied()
    }
}

impl SymbolLookup for FakeKernel {
    fn lookup(&self, name: &str) -> Option<Addr> {
        self.symbols.get(name).copied()
    }
}

/*────────── transport ─────────*/

#[derive(Default)]
pub struct FakeTransport {
    available: RefCell<HashSet<i32>>,
    pub attempts: RefCell<Vec<i32>>,
    pub published: RefCell<Vec<i32>>,
    pub sent: RefCell<Vec<(u32, String)>>,
    pub releases: Cell<u32>,
    pub fail_publish: Cell<bool>,
    pub fail_send: Cell<bool>,
}

impl FakeTransport {
    pub fn with_units(units: &[i32]) -> Self {
        let t = Self::default();
        t.available.borrow_mut().extend(units.iter().copied());
        t
    }

    pub fn open_unit(&self, unit: i32) {
        self.available.borrow_mut().insert(unit);
    }

    pub fn lines(&self) -> Vec<String> {
        self.sent.borrow().iter().map(|(_, l)| l.clone()).collect()
    }
}

impl ReportTransport for FakeTransport {
    fn create_channel(&self, unit: i32) -> Result<(), TransportError> {
        self.attempts.borrow_mut().push(unit);
        if self.available.borrow().contains(&unit) {
            Ok(())
        } else {
            Err(TransportError::UnitUnavailable(unit))
        }
    }
    fn publish_unit(&self, unit: i32) -> Result<(), TransportError> {
        if self.fail_publish.get() {
            return Err(TransportError::Publish(unit));
        }
        self.published.borrow_mut().push(unit);
        Ok(())
    }
    fn unicast(&self, port: u32, payload: &[u8]) -> Result<(), TransportError> {
        if self.fail_send.get() {
            return Err(TransportError::Send(-11));
        }
        let line = String::from_utf8_lossy(payload).into_owned();
        self.sent.borrow_mut().push((port, line));
        Ok(())
    }
    fn release(&self) {
        self.releases.set(self.releases.get() + 1);
    }
}

/*────────── hook facility ─────────*/

#[derive(Default)]
pub struct FakeEvents {
    pub hooked: Vec<(HookPoint, Addr, HookHandle)>,
    pub unhooked: Vec<HookHandle>,
    pub tracepoint_available: bool,
    pub tracepoint: Option<Addr>,
    pub refuse: Option<HookPoint>,
    pub(crate) next: u64,
}

impl EventSource for FakeEvents {
    fn hook(&mut self, point: HookPoint, target: Addr) -> Option<HookHandle> {
        if self.refuse == Some(point) {
            return None;
        }
        self.next += 1;
        let h = HookHandle(self.next);
        self.hooked.push((point, target, h));
        Some(h)
    }
    fn unhook(&mut self, handle: HookHandle) {
        self.unhooked.push(handle);
    }
    fn register_tracepoint(&mut self, tracepoint: Addr) -> bool {
        if self.tracepoint_available {
            self.tracepoint = Some(tracepoint);
        }
        self.tracepoint_available
    }
    fn unregister_tracepoint(&mut self, tracepoint: Addr) {
        if self.tracepoint == Some(tracepoint) {
            self.tracepoint = None;
        }
    }
}
