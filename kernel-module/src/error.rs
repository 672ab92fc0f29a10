//! Error types of the detection core.

use thiserror::Error;

use crate::consts::{EAGAIN, EINVAL, ENOENT};
use crate::hooks::HookPoint;

/// Why the layout could not be recovered.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum ResolveError {
    #[error("kernel symbol '{0}' not found")]
    MissingSymbol(&'static str),

    #[error("offset '{0}' not found in scanned window")]
    Unresolved(&'static str),
}

/// Channel bring-up or delivery failed. Always soft.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum TransportError {
    #[error("netlink unit {0} unavailable")]
    UnitUnavailable(i32),

    #[error("no netlink unit could be bound")]
    NoUnit,

    #[error("channel bring-up in progress elsewhere")]
    Busy,

    #[error("channel closed")]
    Closed,

    #[error("discovery entry for unit {0} not created")]
    Publish(i32),

    #[error("message allocation failed")]
    Alloc,

    #[error("message header does not fit")]
    MessageSize,

    #[error("unicast failed with status {0}")]
    Send(i32),
}

/// Activation aborted; nothing stays installed.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum ActivateError {
    #[error("layout resolution failed: {0}")]
    Resolve(#[from] ResolveError),

    #[error("hook on {0:?} could not be installed")]
    Hook(HookPoint),
}

impl ResolveError {
    pub const fn errno(&self) -> i32 {
        match self {
            ResolveError::MissingSymbol(_) => -ENOENT,
            ResolveError::Unresolved(_) => -EAGAIN,
        }
    }
}

impl ActivateError {
    /// Negative status handed back to the module loader.
    pub const fn errno(&self) -> i32 {
        match self {
            ActivateError::Resolve(e) => e.errno(),
            ActivateError::Hook(_) => -EINVAL,
        }
    }
}
