//! Hookable kernel entry points and the facility that arms them.
//!
//! The patching technique belongs to the host. The core only names the
//! points it wants, receives their arguments through
//! [`crate::Thawguard::dispatch`], and hands the returned handles back on
//! teardown.
//!
//! Key responsibilities:
//! - Enumerate every pre-call hook together with its symbol and arity.
//! - Carry raw call arguments into the callbacks.
//! - Abstract hook and tracepoint registration behind [`EventSource`].

use crate::host::Addr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HookPoint {
    /// `binder_proc_transaction(t, proc, thread)`
    ProcTransaction,
    /// `binder_transaction(proc, thread, tr, reply, extra_buffers_size)`
    Transaction,
    /// `do_send_sig_info(sig, info, p, type)`
    SendSignal,
    #[cfg(feature = "network")]
    TcpV4Rcv,
    #[cfg(feature = "network")]
    TcpV6Rcv,
}

impl HookPoint {
    pub const ALL: &'static [HookPoint] = &[
        HookPoint::ProcTransaction,
        HookPoint::Transaction,
        HookPoint::SendSignal,
        #[cfg(feature = "network")]
        HookPoint::TcpV4Rcv,
        #[cfg(feature = "network")]
        HookPoint::TcpV6Rcv,
    ];

    pub const fn symbol(self) -> &'static str {
        match self {
            HookPoint::ProcTransaction => "binder_proc_transaction",
            HookPoint::Transaction => "binder_transaction",
            HookPoint::SendSignal => "do_send_sig_info",
            #[cfg(feature = "network")]
            HookPoint::TcpV4Rcv => "tcp_v4_rcv",
            #[cfg(feature = "network")]
            HookPoint::TcpV6Rcv => "tcp_v6_rcv",
        }
    }

    /// Number of arguments the host must capture.
    pub const fn arity(self) -> usize {
        match self {
            HookPoint::ProcTransaction => 3,
            HookPoint::Transaction => 5,
            HookPoint::SendSignal => 4,
            #[cfg(feature = "network")]
            HookPoint::TcpV4Rcv | HookPoint::TcpV6Rcv => 1,
        }
    }
}

/// Raw register arguments of a hooked call. Unused slots are zero.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HookArgs(pub [u64; 5]);

impl HookArgs {
    #[inline]
    pub fn arg(&self, n: usize) -> u64 {
        self.0.get(n).copied().unwrap_or(0)
    }
}

/// Opaque token returned by [`EventSource::hook`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HookHandle(pub u64);

/// The host's function-hook and tracepoint facility.
pub trait EventSource {
    /// Install a pre-call hook for `point` at `target`. `None` on failure.
    fn hook(&mut self, point: HookPoint, target: Addr) -> Option<HookHandle>;
    fn unhook(&mut self, handle: HookHandle);

    /// Attach the `binder_transaction` tracepoint probe. Returns false
    /// when the tracepoint is unavailable; hook-based classification is
    /// used instead.
    fn register_tracepoint(&mut self, tracepoint: Addr) -> bool;
    fn unregister_tracepoint(&mut self, tracepoint: Addr);
}
