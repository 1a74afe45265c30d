// SPDX-License-Identifier: BSD-3-Clause

//! Wire codec: frame header layout, request/response kind codes, and the
//! write-then-patch header discipline (spec.md §4.2, §6.1).

use crate::buffer::Range;
use crate::error::{Result, TerabError};

/// Maximum frame size in bytes, header included.
pub const MAX_FRAME: usize = 16384;

/// Default TCP port for a Terab server.
pub const DEFAULT_PORT: u16 = 8338;

/// Size in bytes of the fixed frame header.
pub const HEADER_LEN: usize = 16;

/// Request kind codes (spec.md §4.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum RequestKind {
    Authenticate = 2,
    Close = 4,
    OpenBlock = 16,
    CommitBlock = 18,
    GetBlockHandle = 20,
    GetBlockInfo = 22,
    GetCoin = 64,
    ProduceCoin = 66,
    ConsumeCoin = 68,
    RemoveCoin = 70,
}

/// Response kind codes: each is the corresponding request kind + 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum ResponseKind {
    AuthenticateResponse = 3,
    CloseResponse = 5,
    OpenBlockResponse = 17,
    CommitBlockResponse = 19,
    GetBlockHandleResponse = 21,
    GetBlockInfoResponse = 23,
    GetCoinResponse = 65,
    ProduceCoinResponse = 67,
    ConsumeCoinResponse = 69,
    RemoveCoinResponse = 71,
}

impl ResponseKind {
    pub fn from_u32(v: u32) -> Option<Self> {
        Some(match v {
            3 => Self::AuthenticateResponse,
            5 => Self::CloseResponse,
            17 => Self::OpenBlockResponse,
            19 => Self::CommitBlockResponse,
            21 => Self::GetBlockHandleResponse,
            23 => Self::GetBlockInfoResponse,
            65 => Self::GetCoinResponse,
            67 => Self::ProduceCoinResponse,
            69 => Self::ConsumeCoinResponse,
            71 => Self::RemoveCoinResponse,
            _ => return None,
        })
    }
}

/// A decoded frame header (spec.md §6.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub size: u32,
    pub request_id: u32,
    pub client_id: u32,
    pub kind: u32,
}

/// Writes a zero-filled 16-byte header with `kind` already set in its slot.
/// `size` and `request_id` are left at zero, to be patched in place once the
/// body length and assigned sequence number are known (spec.md §4.2).
pub fn write_header(range: &mut Range<'_>, kind: RequestKind) -> Result<()> {
    range.clear_bytes(4)?; // size: patched later
    range.clear_bytes(4)?; // request_id: patched later
    range.clear_bytes(4)?; // client_id: always 0 from the client
    range.write_u32(kind as u32)?;
    Ok(())
}

/// Parses a 16-byte response header.
pub fn read_response_header(range: &mut Range<'_>) -> Result<FrameHeader> {
    let size = range.read_u32()?;
    let request_id = range.read_u32()?;
    let client_id = range.read_u32()?;
    let kind = range.read_u32()?;
    Ok(FrameHeader {
        size,
        request_id,
        client_id,
        kind,
    })
}

/// Verifies that a decoded header carries the expected response kind,
/// mapping a mismatch onto `TerabError::InternalError` (spec.md §4.4.1).
///
/// A mismatch is a protocol violation (spec.md §4.5, §7): callers must
/// poison the connection before propagating the returned error, since this
/// function has no access to the `Connection` itself.
pub fn expect_kind(header: &FrameHeader, expected: ResponseKind) -> Result<()> {
    if header.kind != expected as u32 {
        return Err(TerabError::InternalError(format!(
            "expected response kind {}, got {}",
            expected as u32, header.kind
        )));
    }
    Ok(())
}
