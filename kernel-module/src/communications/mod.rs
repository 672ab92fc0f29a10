//! Kernel to user-space reporting.
//!
//! Key responsibilities:
//! - Bring up the netlink channel on demand and publish its unit.
//! - Deliver serialized reports to the listener port.
//! - Acknowledge listener liveness messages.

pub mod report_channel;

pub use report_channel::Reporter;
