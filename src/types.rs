// SPDX-License-Identifier: BSD-3-Clause

//! The Terab data model: block handles, outpoints, coins, block metadata
//! (spec.md §3).

/// Connection-scoped opaque identifier for a block. Zero means "none"; not
/// portable across connections.
pub type BlockHandle = u32;

/// Content hash identifying a committed block. All-zero means "uncommitted".
pub type CommittedBlockId = [u8; 32];

/// Server-assigned persistent identifier for an open (uncommitted) block,
/// used to re-attach to it after a reconnect.
pub type UncommittedBlockId = [u8; 16];

/// `(txid, index)` pair uniquely identifying a transaction output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Outpoint {
    pub txid: [u8; 32],
    pub index: i32,
}

/// Bit flags for [`BlockInfo::flags`] (spec.md §3).
pub const BLOCK_FLAG_FROZEN: u32 = 0x01;
pub const BLOCK_FLAG_COMMITTED: u32 = 0x02;

/// Block metadata as returned by `get_block_info`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockInfo {
    pub parent: BlockHandle,
    pub flags: u32,
    pub blockheight: i32,
    pub blockid: CommittedBlockId,
}

impl BlockInfo {
    pub fn is_frozen(&self) -> bool {
        self.flags & BLOCK_FLAG_FROZEN != 0
    }

    pub fn is_committed(&self) -> bool {
        self.flags & BLOCK_FLAG_COMMITTED != 0
    }
}

/// Per-coin status bits returned by `get_coins`/`set_coins`. `SUCCESS` is
/// mutually exclusive with the failure bits; `STORAGE_TOO_SHORT` can be
/// OR-ed onto a successful `get_coins` result when the script didn't fit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CoinStatus(pub u8);

impl CoinStatus {
    pub const NONE: CoinStatus = CoinStatus(0);
    pub const SUCCESS: CoinStatus = CoinStatus(1);
    pub const OUTPOINT_NOT_FOUND: CoinStatus = CoinStatus(2);
    pub const INVALID_CONTEXT: CoinStatus = CoinStatus(4);
    pub const INVALID_BLOCK_HANDLE: CoinStatus = CoinStatus(8);
    pub const STORAGE_TOO_SHORT: CoinStatus = CoinStatus(16);

    pub fn contains(self, flag: CoinStatus) -> bool {
        self.0 & flag.0 == flag.0
    }
}

impl std::ops::BitOr for CoinStatus {
    type Output = CoinStatus;
    fn bitor(self, rhs: CoinStatus) -> CoinStatus {
        CoinStatus(self.0 | rhs.0)
    }
}

impl std::ops::BitOrAssign for CoinStatus {
    fn bitor_assign(&mut self, rhs: CoinStatus) {
        self.0 |= rhs.0;
    }
}

/// A coin known to the caller: an outpoint plus lifecycle and data fields.
/// The script itself lives out-of-band in a caller-owned storage buffer;
/// `script_offset`/`script_length` index into it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Coin {
    pub outpoint: Outpoint,
    pub production: BlockHandle,
    pub consumption: BlockHandle,
    pub satoshis: u64,
    pub n_lock_time: u32,
    pub script_offset: i32,
    pub script_length: i32,
    pub flags: u8,
    pub status: CoinStatus,
}

impl Coin {
    /// Convenience constructor for a coin the caller intends to produce
    /// (`production != 0`, `consumption == 0`, non-empty script).
    pub fn produced(
        outpoint: Outpoint,
        production: BlockHandle,
        satoshis: u64,
        n_lock_time: u32,
        flags: u8,
        script_offset: i32,
        script_length: i32,
    ) -> Self {
        Coin {
            outpoint,
            production,
            consumption: 0,
            satoshis,
            n_lock_time,
            script_offset,
            script_length,
            flags,
            status: CoinStatus::NONE,
        }
    }

    /// Convenience constructor for a coin the caller intends to consume
    /// (`production == 0`, `consumption != 0`).
    pub fn consumed(outpoint: Outpoint, consumption: BlockHandle) -> Self {
        Coin {
            outpoint,
            production: 0,
            consumption,
            satoshis: 0,
            n_lock_time: 0,
            script_offset: 0,
            script_length: 0,
            flags: 0,
            status: CoinStatus::NONE,
        }
    }

    /// Convenience constructor for a coin the caller intends to remove
    /// entirely (`production == 0`, `consumption == 0`).
    pub fn removed(outpoint: Outpoint) -> Self {
        Coin {
            outpoint,
            production: 0,
            consumption: 0,
            satoshis: 0,
            n_lock_time: 0,
            script_offset: 0,
            script_length: 0,
            flags: 0,
            status: CoinStatus::NONE,
        }
    }
}
