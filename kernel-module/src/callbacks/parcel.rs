//! Interface-token extraction from a transaction's parcel payload.

use shared::protocol::sanitize_byte;
use shared::RpcName;

use crate::consts::{INTERFACE_TOKEN_BUFF_SIZE, PARCEL_OFFSET};

/// Longest name the copied window can hold.
pub const MAX_NAME_CHARS: usize = (INTERFACE_TOKEN_BUFF_SIZE - PARCEL_OFFSET) / 2;

/// Decode the UTF-16LE interface token that follows the parcel header,
/// keeping the low byte of each unit.
///
/// Stops at the first NUL low byte or at the end of `payload`. Bytes that
/// are unsafe inside a report line are replaced. `None` when nothing was
/// decoded.
pub fn decode_interface_token(payload: &[u8]) -> Option<RpcName> {
    let window = &payload[..payload.len().min(INTERFACE_TOKEN_BUFF_SIZE)];
    let mut name = RpcName::new();

    let mut p = PARCEL_OFFSET;
    while p + 1 < window.len() && window[p] != 0 {
        if name.push(sanitize_byte(window[p])).is_err() {
            break;
        }
        p += 2;
    }

    (!name.is_empty()).then_some(name)
}
