//! Struct layout recovery.
//!
//! The module is built without headers that match the running kernel, so
//! every binder and task member that moves between vendor trees is read
//! out of the machine code of a function known to touch it. Each scan
//! looks for one instruction class inside a bounded prefix, accepts the
//! displacement only inside the range that member can plausibly have, and
//! derives neighbouring members from it by fixed deltas.
//!
//! Resolution runs once, before any hook is armed. A missing required
//! member fails activation.

use core::ops::RangeInclusive;

use log::debug;

use crate::arm64::{self, Pattern};
use crate::error::ResolveError;
use crate::host::{Addr, KernelMemory, SymbolLookup};

pub type Offset = u64;

/*────────── layout ─────────*/

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransactionOffsets {
    pub from: Offset,
    pub to_proc: Offset,
    pub buffer: Offset,
    pub code: Offset,
    pub flags: Offset,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NodeOffsets {
    pub lock: Offset,
    pub ptr: Offset,
    pub cookie: Offset,
    pub has_async_transaction: Offset,
    pub async_todo: Offset,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProcOffsets {
    pub context: Offset,
    pub inner_lock: Offset,
    pub outer_lock: Offset,
    pub alloc: Offset,
    /// Only on kernels with binder-level freezing.
    pub is_frozen: Option<Offset>,
    pub outstanding_txns: Option<Offset>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AllocOffsets {
    pub pid: Offset,
    pub buffer: Offset,
    pub buffers: Offset,
    pub free_async_space: Offset,
    pub buffer_size: Offset,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TaskOffsets {
    pub jobctl: Offset,
    pub pid: Offset,
    pub tgid: Offset,
    pub group_leader: Offset,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Globals {
    /// Absolute address of `binder_stats.obj_deleted[BINDER_STAT_TRANSACTION]`.
    pub stats_deleted: Addr,
    /// `__tracepoint_binder_transaction`, if exported.
    pub tracepoint: Option<Addr>,
}

/// Parameter shape of `binder_transaction_buffer_release`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord)]
pub enum BufferReleaseAbi {
    /// `(proc, buffer, failed_at)`
    #[default]
    V3,
    /// `(proc, buffer, failed_at_size, is_failure)`
    V4,
    /// `(proc, thread, buffer, off_end_offset, is_failure)`
    V5,
    /// `(proc, thread, buffer, failed_at_size, is_failure)`
    V6,
}

/// Member offsets of the running kernel. Immutable once resolved.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResolvedLayout {
    pub transaction: TransactionOffsets,
    pub node: NodeOffsets,
    pub proc: ProcOffsets,
    pub alloc: AllocOffsets,
    pub task: TaskOffsets,
    pub globals: Globals,
    pub abi: BufferReleaseAbi,
}

/*────────── scan windows & ranges ─────────*/

const RELEASE_WORDS: usize = 0x100;
const RELEASE_SHAPE_WORDS: usize = 0x10;
const PROC_TRANSACTION_WORDS: usize = 0x70;
const JOBCTL_WORDS: usize = 0x10;
const TRANSACTION_WORDS: usize = 0x20;
const FREE_PROC_FIRST: usize = 0x10;
const FREE_PROC_WORDS: usize = 0x100;
const ALLOC_INIT_WORDS: usize = 0x20;
const ALLOC_INIT_LOOKBACK: usize = 0x10;
const FREE_TRANSACTION_WORDS: usize = 0x100;
const ADRL_LOOKAHEAD: usize = 0x10;

const HAS_ASYNC_RANGE: RangeInclusive<u64> = 0x6B..=0x7B;
/// Harmony-derived trees place `has_async_transaction` here.
const HAS_ASYNC_ALT: u64 = 0x7B;
const TXN_BUFFER_RANGE: RangeInclusive<u64> = 0x20..=0x100;
const SYNC_RECV_RANGE: RangeInclusive<u64> = 0x40..=0x100;
const TASK_FIELD_RANGE: RangeInclusive<u64> = 0x100..=0x1000;
const CONTEXT_RANGE: RangeInclusive<u64> = 0x200..=0x300;
const ALLOC_PID_RANGE: RangeInclusive<u64> = 0x10..=0x200;
const ALLOC_BUFFERS_RANGE: RangeInclusive<u64> = 0x8..=0x100;
const ALLOC_MIN: u64 = 0x100;

/// Exclusive bounds of `obj_deleted[TRANSACTION]` within `binder_stats`.
const STATS_DELETED_LO: u64 = 0xC0;
const STATS_DELETED_HI: u64 = 0xE0;

fn required(value: Option<Offset>, name: &'static str) -> Result<Offset, ResolveError> {
    value.ok_or(ResolveError::Unresolved(name))
}

#[inline]
fn delta(anchor: Offset, by: i64) -> Offset {
    anchor.wrapping_add_signed(by)
}

/*────────── per-function scans ─────────*/

/// Classify the release routine by which parameter registers its prologue
/// spills, then look for the `failed_at` alignment of the newest shape.
pub fn detect_release_abi(words: &[u32]) -> BufferReleaseAbi {
    let mut five_params = false;
    let mut four_params = false;

    for (i, &word) in words.iter().enumerate() {
        if i < RELEASE_SHAPE_WORDS {
            if [arm64::STR_RT_4, arm64::MOV_RM_4, arm64::UXTB_RN_4]
                .iter()
                .any(|p| p.matches(word))
            {
                five_params = true;
            } else if [arm64::STR_RT_3, arm64::MOV_RM_3, arm64::UXTB_RN_3]
                .iter()
                .any(|p| p.matches(word))
            {
                four_params = true;
            }
        } else if !five_params {
            break;
        } else if arm64::AND_NOT_7.matches(word) {
            if (1..3).any(|j| arm64::matches_at(words, i + j, &[arm64::CBZ, arm64::TBNZ])) {
                return BufferReleaseAbi::V6;
            }
            break;
        }
    }

    if five_params {
        BufferReleaseAbi::V5
    } else if four_params {
        BufferReleaseAbi::V4
    } else {
        BufferReleaseAbi::V3
    }
}

/// Everything `binder_proc_transaction` reveals.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcTransactionScan {
    pub transaction: TransactionOffsets,
    pub node: NodeOffsets,
    pub is_frozen: Option<Offset>,
    pub outstanding_txns: Option<Offset>,
}

pub fn scan_proc_transaction(words: &[u32]) -> Result<ProcTransactionScan, ResolveError> {
    let mut has_async: Option<Offset> = None;
    let mut buffer: Option<Offset> = None;
    let mut sync_recv: Option<Offset> = None;

    for (i, &word) in words.iter().enumerate() {
        if word == arm64::RET {
            break;
        } else if has_async.is_none() && arm64::STRB.matches(word) {
            let imm = arm64::decode_imm(word, arm64::STRB.imm, 0);
            if HAS_ASYNC_RANGE.contains(&imm) {
                has_async = Some(imm);
            }
        } else if buffer.is_none() && arm64::LDR_64_X0.matches(word) {
            let imm = arm64::decode_imm(word, arm64::LDR_64_X0.imm, 0);
            if TXN_BUFFER_RANGE.contains(&imm) {
                buffer = Some(imm);
            }
        } else if arm64::ORR.matches(word) && arm64::matches_at(words, i + 1, &[arm64::STRB]) {
            let imm = arm64::decode_imm(words[i + 1], arm64::STRB.imm, 0);
            if SYNC_RECV_RANGE.contains(&imm) {
                sync_recv = Some(imm);
            }
            break;
        }
    }

    let has_async = required(has_async, "node.has_async_transaction")?;
    let buffer = required(buffer, "transaction.buffer")?;
    let (lock, from) = if has_async == HAS_ASYNC_ALT {
        (0x8, 0x28)
    } else {
        (0x4, 0x20)
    };

    Ok(ProcTransactionScan {
        transaction: TransactionOffsets {
            from,
            to_proc: delta(buffer, -0x20),
            buffer,
            code: delta(buffer, 0x8),
            flags: delta(buffer, 0xC),
        },
        node: NodeOffsets {
            lock,
            ptr: delta(has_async, -0x13),
            cookie: delta(has_async, -0xB),
            has_async_transaction: has_async,
            async_todo: delta(has_async, 0x5),
        },
        is_frozen: sync_recv.map(|s| delta(s, -0x1)),
        outstanding_txns: sync_recv.map(|s| delta(s, -0x6)),
    })
}

/// `task_clear_jobctl_trapping` loads `t->jobctl` first.
pub fn scan_jobctl(words: &[u32]) -> Result<Offset, ResolveError> {
    let hit = arm64::scan(words, &arm64::LDR_64_X0, TASK_FIELD_RANGE);
    required(hit.map(|m| m.imm), "task.jobctl")
}

/// `binder_transaction` loads `proc->context` early. Returns
/// `(context, inner_lock, outer_lock)`.
pub fn scan_context(words: &[u32]) -> Result<(Offset, Offset, Offset), ResolveError> {
    let hit = arm64::scan(words, &arm64::LDR_64, CONTEXT_RANGE);
    let context = required(hit.map(|m| m.imm), "proc.context")?;
    Ok((context, context + 0x8, context + 0xC))
}

/// `binder_free_proc` passes `&proc->alloc` (x19 holds `proc`) to a call.
/// `context` bounds the search from above since `alloc` precedes it.
pub fn scan_proc_alloc(words: &[u32], context: Offset) -> Result<Offset, ResolveError> {
    let mut alloc = None;
    for (i, &word) in words.iter().enumerate().skip(FREE_PROC_FIRST) {
        if word == arm64::MOV_X29_SP {
            break;
        }
        if arm64::ADD_X0_X19.matches(word) && arm64::matches_at(words, i + 1, &[arm64::BL]) {
            let imm = arm64::decode_imm(word, arm64::ADD_X0_X19.imm, 0);
            if (ALLOC_MIN..context).contains(&imm) {
                alloc = Some(imm);
                break;
            }
        }
    }
    required(alloc, "proc.alloc")
}

/// Everything `binder_alloc_init` reveals.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AllocInitScan {
    pub alloc: AllocOffsets,
    pub task_pid: Offset,
    pub task_tgid: Offset,
    pub task_group_leader: Offset,
}

/// `binder_alloc_init` reads `current->group_leader->pid` into
/// `alloc->pid` and ends by initialising the `buffers` list.
pub fn scan_alloc_init(words: &[u32]) -> Result<AllocInitScan, ResolveError> {
    let mut alloc_pid = None;
    let mut task_pid = None;
    let mut group_leader = None;
    let mut buffers = None;

    for (i, &word) in words.iter().enumerate() {
        if word == arm64::RET {
            buffers = (1..ALLOC_INIT_LOOKBACK.min(i + 1)).find_map(|j| {
                let w = words[i - j];
                let imm = arm64::decode_imm(w, arm64::ADD_64.imm, 0);
                (arm64::ADD_64.matches(w) && ALLOC_BUFFERS_RANGE.contains(&imm)).then_some(imm)
            });
            break;
        }
        if alloc_pid.is_some() {
            continue;
        }
        if let Some(imm) = matching_imm(word, &arm64::STR_32_X0, &ALLOC_PID_RANGE) {
            alloc_pid = Some(imm);
        } else if let Some(imm) = matching_imm(word, &arm64::LDR_32, &TASK_FIELD_RANGE) {
            task_pid = Some(imm);
        } else if let Some(imm) = matching_imm(word, &arm64::LDR_64, &TASK_FIELD_RANGE) {
            group_leader = Some(imm);
        }
    }

    let alloc_pid = required(alloc_pid, "alloc.pid")?;
    let task_pid = required(task_pid, "task.pid")?;
    let group_leader = required(group_leader, "task.group_leader")?;
    let buffers = required(buffers, "alloc.buffers")?;

    Ok(AllocInitScan {
        alloc: AllocOffsets {
            pid: alloc_pid,
            buffer: delta(buffers, -0x8),
            buffers,
            free_async_space: delta(buffers, 0x20),
            buffer_size: delta(buffers, 0x30),
        },
        task_pid,
        task_tgid: task_pid + 0x4,
        task_group_leader: group_leader,
    })
}

fn matching_imm(word: u32, pattern: &Pattern, range: &RangeInclusive<u64>) -> Option<u64> {
    if !pattern.matches(word) {
        return None;
    }
    let imm = arm64::decode_imm(word, pattern.imm, 0);
    range.contains(&imm).then_some(imm)
}

/// Locate the deleted-transaction counter through the `adrp`/`add` pair
/// that `binder_stats_deleted()` expands to. `base` is the address of
/// `words[0]`; `stats` is the address of `binder_stats`.
pub fn scan_stats_deleted(words: &[u32], base: Addr, stats: Addr) -> Result<Addr, ResolveError> {
    let in_counter = |off: u64| off > STATS_DELETED_LO && off < STATS_DELETED_HI;
    let stats_page = stats & !0xFFF;
    let stats_low = stats & 0xFFF;

    let adrp = words.iter().enumerate().find_map(|(i, &w)| {
        if !arm64::ADRP.matches(w) {
            return None;
        }
        let page = arm64::decode_imm(w, arm64::ADRP.imm, base + 4 * i as u64);
        (page.wrapping_sub(stats_page) <= 0x1000).then_some((i, page))
    });

    let found = adrp.and_then(|(i, page)| {
        let end = (i + ADRL_LOOKAHEAD).min(words.len());
        for j in i..end {
            let w = words[j];
            if !arm64::ADD_64.matches(w) {
                continue;
            }
            let low = arm64::decode_imm(w, arm64::ADD_64.imm, 0);
            let diff = low.wrapping_sub(stats_low) & 0xFFF;
            if diff == 0 {
                // `add` lands on binder_stats itself; the member offset follows.
                let end = (j + 1 + ADRL_LOOKAHEAD).min(words.len());
                return (j + 1..end).find_map(|k| {
                    let off = matching_imm(words[k], &arm64::ADD_64, &(0..=u64::MAX))?;
                    in_counter(off).then(|| page + low + off)
                });
            } else if in_counter(diff) {
                return Some(page + low);
            }
        }
        None
    });

    found.ok_or(ResolveError::Unresolved("binder_stats.deleted"))
}

/*────────── driver ─────────*/

/// Recover the full layout from kernel text.
pub fn resolve<M, S>(mem: &M, syms: &S) -> Result<ResolvedLayout, ResolveError>
where
    M: KernelMemory + ?Sized,
    S: SymbolLookup + ?Sized,
{
    let release = syms.require("binder_transaction_buffer_release")?;
    let abi = detect_release_abi(&mem.read_words(release, RELEASE_WORDS));
    debug!("binder_transaction_buffer_release shape: {:?}", abi);

    let proc_txn = syms.require("binder_proc_transaction")?;
    let pt = scan_proc_transaction(&mem.read_words(proc_txn, PROC_TRANSACTION_WORDS))?;
    debug!(
        "transaction.buffer={:#x} node.has_async_transaction={:#x} proc.is_frozen={:?}",
        pt.transaction.buffer, pt.node.has_async_transaction, pt.is_frozen
    );

    let jobctl_fn = syms.require("task_clear_jobctl_trapping")?;
    let jobctl = scan_jobctl(&mem.read_words(jobctl_fn, JOBCTL_WORDS))?;

    let txn = syms.require("binder_transaction")?;
    let (context, inner_lock, outer_lock) =
        scan_context(&mem.read_words(txn, TRANSACTION_WORDS))?;

    let free_proc = syms.require_any(&["binder_free_proc", "binder_proc_dec_tmpref"])?;
    let alloc = scan_proc_alloc(&mem.read_words(free_proc, FREE_PROC_WORDS), context)?;

    let alloc_init = syms.require("binder_alloc_init")?;
    let ai = scan_alloc_init(&mem.read_words(alloc_init, ALLOC_INIT_WORDS))?;

    let stats = syms.require("binder_stats")?;
    let free_txn = syms.require_any(&["binder_free_transaction", "binder_send_failed_reply"])?;
    let stats_deleted = scan_stats_deleted(
        &mem.read_words(free_txn, FREE_TRANSACTION_WORDS),
        free_txn,
        stats,
    )?;

    let layout = ResolvedLayout {
        transaction: pt.transaction,
        node: pt.node,
        proc: ProcOffsets {
            context,
            inner_lock,
            outer_lock,
            alloc,
            is_frozen: pt.is_frozen,
            outstanding_txns: pt.outstanding_txns,
        },
        alloc: ai.alloc,
        task: TaskOffsets {
            jobctl,
            pid: ai.task_pid,
            tgid: ai.task_tgid,
            group_leader: ai.task_group_leader,
        },
        globals: Globals {
            stats_deleted,
            tracepoint: syms.lookup("__tracepoint_binder_transaction"),
        },
        abi,
    };

    #[cfg(feature = "debug")]
    debug!("resolved layout: {:#x?}", layout);

    Ok(layout)
}
