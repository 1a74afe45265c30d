// SPDX-License-Identifier: BSD-3-Clause

//! Error taxonomy for the Terab client.
//!
//! The original C client threads a thread-local `status_detail` slot through
//! every failure (`status.h` in the prototype sources), `errno`-style. This
//! rewrite drops the global mutable state in favor of the alternative spec.md
//! §9 names explicitly: a rich error variant that carries its own detail
//! classification. See DESIGN.md for the rationale.

use std::fmt;

use crate::buffer::RangeError;

/// Coarse-grained diagnostic classification, mirroring the four buckets the
/// original thread-local slot distinguished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusDetail {
    /// Caller passed technically invalid input (e.g. a malformed connection string).
    User,
    /// Something is wrong with the network; the caller should disconnect and
    /// build a fresh connection.
    Connectivity,
    /// The runtime misbehaved in a way that should not be retried.
    Runtime,
    Unspecified,
}

/// Stable error taxonomy surfaced to callers (spec.md §7).
#[derive(Debug)]
pub enum TerabError {
    /// Peer unreachable, DNS/address-parse failure, or the TCP handshake failed.
    ConnectionFailed(String),
    /// Server refused the connection because it has too many clients.
    TooManyClients,
    /// Credentials were rejected (not exercised by the current protocol,
    /// which has no auth — kept for taxonomy stability across versions).
    AuthenticationFailed,
    /// Server asked the caller to retry later.
    ServiceUnavailable,
    /// Caller exceeded the server's concurrent-request cap.
    TooManyRequests,
    /// A protocol violation: kind mismatch, malformed frame, unexpected
    /// short read, or any other server behavior that isn't spec-compliant.
    InternalError(String),
    /// Server-side persistence is full.
    StorageFull,
    /// Server-side persistence is corrupted.
    StorageCorrupted,
    /// The targeted open block was lost server-side; the caller must reopen it.
    BlockCorrupted,
    /// The block's parent is too far from the tip to accept writes.
    BlockFrozen,
    /// A write or re-open was attempted on an already-committed block.
    BlockCommitted,
    /// The block handle or id is not recognized by the server.
    BlockUnknown,
    /// An idempotence guarantee was violated.
    InconsistentRequest,
    /// Locally detected malformed input (e.g. a negative script offset).
    InvalidRequest(String),
}

impl TerabError {
    /// The coarse diagnostic bucket for this error, in place of the
    /// thread-local `status_detail` slot of the original client.
    pub fn detail(&self) -> StatusDetail {
        match self {
            Self::ConnectionFailed(_) => StatusDetail::Connectivity,
            Self::TooManyClients
            | Self::AuthenticationFailed
            | Self::ServiceUnavailable
            | Self::TooManyRequests
            | Self::StorageFull
            | Self::StorageCorrupted
            | Self::BlockCorrupted
            | Self::BlockFrozen
            | Self::BlockCommitted
            | Self::BlockUnknown
            | Self::InconsistentRequest => StatusDetail::Runtime,
            Self::InternalError(_) => StatusDetail::Runtime,
            Self::InvalidRequest(_) => StatusDetail::User,
        }
    }

    /// True for the operations spec.md §7 documents as idempotent on the
    /// server side (open_block, commit_block, set_coins): a caller may retry
    /// these after reconnecting without risking a duplicated effect.
    pub fn is_retry_safe_after_reconnect(&self) -> bool {
        matches!(self.detail(), StatusDetail::Connectivity)
    }
}

impl fmt::Display for TerabError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ConnectionFailed(msg) => write!(f, "connection failed: {msg}"),
            Self::TooManyClients => write!(f, "server refused connection: too many clients"),
            Self::AuthenticationFailed => write!(f, "authentication failed"),
            Self::ServiceUnavailable => write!(f, "service unavailable, retry later"),
            Self::TooManyRequests => write!(f, "too many concurrent requests"),
            Self::InternalError(msg) => write!(f, "internal protocol error: {msg}"),
            Self::StorageFull => write!(f, "server storage is full"),
            Self::StorageCorrupted => write!(f, "server storage is corrupted"),
            Self::BlockCorrupted => write!(f, "targeted block is corrupted; caller must reopen"),
            Self::BlockFrozen => write!(f, "block's parent is too far from tip"),
            Self::BlockCommitted => write!(f, "block is already committed"),
            Self::BlockUnknown => write!(f, "block handle or id not recognized"),
            Self::InconsistentRequest => write!(f, "idempotence violated"),
            Self::InvalidRequest(msg) => write!(f, "invalid request: {msg}"),
        }
    }
}

impl std::error::Error for TerabError {}

impl From<std::io::Error> for TerabError {
    fn from(e: std::io::Error) -> Self {
        Self::ConnectionFailed(e.to_string())
    }
}

impl From<RangeError> for TerabError {
    fn from(e: RangeError) -> Self {
        Self::InternalError(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, TerabError>;
