// SPDX-License-Identifier: BSD-3-Clause

//! Typed request/response operations and the coin-batch orchestration
//! (spec.md §4.4).

use log::debug;

use crate::buffer::Range;
use crate::codec::{expect_kind, read_response_header, RequestKind, ResponseKind};
use crate::connection::Connection;
use crate::error::{Result, TerabError};
use crate::types::{
    BlockHandle, BlockInfo, Coin, CommittedBlockId, CoinStatus, Outpoint, UncommittedBlockId,
};

/// Opens a new block whose parent is `parent_id` (the zero id means "no
/// parent" / genesis). Returns the connection-scoped handle and the
/// server-assigned uncommitted-block id for the new block.
///
/// Idempotent on the server side (spec.md §7): safe to retry after a
/// reconnect.
pub fn open_block(
    conn: &mut Connection,
    parent_id: &CommittedBlockId,
) -> Result<(BlockHandle, UncommittedBlockId)> {
    let mut range = conn.get_send_buffer();
    crate::codec::write_header(&mut range, RequestKind::OpenBlock)?;
    range.write_bytes(parent_id)?;
    let to_send = range.position();

    conn.send_request(to_send)?;
    let mut reply = conn.wait_response()?;
    let header = read_response_header(&mut reply)?;
    if let Err(e) = expect_kind(&header, ResponseKind::OpenBlockResponse) {
        conn.poison();
        return Err(e);
    }

    let status = reply.read_u8()?;
    let handle = reply.read_u32()?;
    let mut ucid = [0u8; 16];
    reply.read_bytes(&mut ucid)?;

    match status {
        0 => {
            debug!("open_block succeeded, handle={handle}");
            Ok((handle, ucid))
        }
        1 => Err(TerabError::BlockUnknown),
        other => {
            conn.poison();
            Err(TerabError::InternalError(format!(
                "unexpected open_block status {other}"
            )))
        }
    }
}

/// Commits `block` under the content hash `block_id`. Idempotent on the
/// server side.
pub fn commit_block(
    conn: &mut Connection,
    block: BlockHandle,
    block_id: &CommittedBlockId,
) -> Result<()> {
    let mut range = conn.get_send_buffer();
    crate::codec::write_header(&mut range, RequestKind::CommitBlock)?;
    range.write_u32(block)?;
    range.write_bytes(block_id)?;
    let to_send = range.position();

    conn.send_request(to_send)?;
    let mut reply = conn.wait_response()?;
    let header = read_response_header(&mut reply)?;
    if let Err(e) = expect_kind(&header, ResponseKind::CommitBlockResponse) {
        conn.poison();
        return Err(e);
    }

    let status = reply.read_u8()?;
    match status {
        0 => {
            debug!("commit_block succeeded, handle={block}");
            Ok(())
        }
        1 => Err(TerabError::BlockUnknown),
        2 => Err(TerabError::BlockCommitted),
        other => {
            conn.poison();
            Err(TerabError::InternalError(format!(
                "unexpected commit_block status {other}"
            )))
        }
    }
}

fn get_block_handle(
    conn: &mut Connection,
    committed_id: &CommittedBlockId,
    uncommitted_id: &UncommittedBlockId,
    is_committed: bool,
) -> Result<BlockHandle> {
    let mut range = conn.get_send_buffer();
    crate::codec::write_header(&mut range, RequestKind::GetBlockHandle)?;
    range.write_bytes(committed_id)?;
    range.write_bytes(uncommitted_id)?;
    range.write_u8(is_committed as u8)?;
    let to_send = range.position();

    conn.send_request(to_send)?;
    let mut reply = conn.wait_response()?;
    let header = read_response_header(&mut reply)?;
    if let Err(e) = expect_kind(&header, ResponseKind::GetBlockHandleResponse) {
        conn.poison();
        return Err(e);
    }

    let status = reply.read_u8()?;
    let handle = reply.read_u32()?;

    match status {
        0 => Ok(handle),
        1 => Err(TerabError::BlockUnknown),
        other => {
            conn.poison();
            Err(TerabError::InternalError(format!(
                "unexpected get_block_handle status {other}"
            )))
        }
    }
}

/// Looks up the handle of a committed block by its content hash.
pub fn get_committed_block(
    conn: &mut Connection,
    block_id: &CommittedBlockId,
) -> Result<BlockHandle> {
    get_block_handle(conn, block_id, &[0u8; 16], true)
}

/// Looks up the handle of an open (uncommitted) block by its server-assigned ucid.
pub fn get_uncommitted_block(
    conn: &mut Connection,
    ucid: &UncommittedBlockId,
) -> Result<BlockHandle> {
    get_block_handle(conn, &[0u8; 32], ucid, false)
}

/// Fetches full metadata for `block`.
pub fn get_block_info(conn: &mut Connection, block: BlockHandle) -> Result<BlockInfo> {
    let mut range = conn.get_send_buffer();
    crate::codec::write_header(&mut range, RequestKind::GetBlockInfo)?;
    range.write_u32(block)?;
    let to_send = range.position();

    conn.send_request(to_send)?;
    let mut reply = conn.wait_response()?;
    let header = read_response_header(&mut reply)?;
    if let Err(e) = expect_kind(&header, ResponseKind::GetBlockInfoResponse) {
        conn.poison();
        return Err(e);
    }

    let mut blockid = [0u8; 32];
    reply.read_bytes(&mut blockid)?;
    let mut _ucid = [0u8; 16];
    reply.read_bytes(&mut _ucid)?;
    let _handle = reply.read_u32()?;
    let parent = reply.read_u32()?;
    let blockheight = reply.read_i32()?;
    let is_committed = reply.read_u8()?;

    let flags = if is_committed == 1 {
        crate::types::BLOCK_FLAG_COMMITTED
    } else {
        0
    };

    Ok(BlockInfo {
        parent,
        flags,
        blockheight,
        blockid,
    })
}

/// Classification of a [`Coin`] used to pick which wire request `set_coins`
/// emits for it (spec.md §4.4.2).
enum ChangeKind {
    Produce,
    Consume,
    Remove,
}

fn classify(coin: &Coin) -> Result<ChangeKind> {
    if coin.script_offset < 0 {
        return Err(TerabError::InvalidRequest(
            "script_offset must not be negative".into(),
        ));
    }

    match (coin.production, coin.consumption) {
        (p, 0) if p != 0 => {
            if coin.script_length <= 0 {
                return Err(TerabError::InvalidRequest(
                    "a produced coin must have a positive script_length".into(),
                ));
            }
            Ok(ChangeKind::Produce)
        }
        (0, c) if c != 0 => Ok(ChangeKind::Consume),
        (0, 0) => Ok(ChangeKind::Remove),
        _ => Err(TerabError::InvalidRequest(
            "a coin must be exactly one of produced, consumed, or removed".into(),
        )),
    }
}

/// Sends a batch of coin mutations (produce/consume/remove) for `coins`,
/// pipelining all N requests in a single batch and demultiplexing the N
/// (possibly out-of-order) responses back onto their originating slots by
/// request-id arithmetic (spec.md §4.4.2).
///
/// `storage` holds the out-of-band script bytes for coins being produced,
/// indexed by each coin's `script_offset`/`script_length`. On return, each
/// coin's `status` field is populated; the function itself only returns an
/// error for locally-detected malformed input or a connection-level failure.
pub fn set_coins(conn: &mut Connection, context: BlockHandle, coins: &mut [Coin], storage: &[u8]) -> Result<()> {
    if coins.is_empty() {
        return Ok(());
    }

    // Classify every coin up front so an invalid entry aborts before any
    // bytes are written to the wire (spec.md §4.4.2 step 2).
    let kinds: Vec<ChangeKind> = coins.iter().map(classify).collect::<Result<_>>()?;

    conn.batch_begin();
    let mut first_id: u32 = 0;
    for (i, (coin, kind)) in coins.iter().zip(kinds.iter()).enumerate() {
        let mut range = conn.get_send_buffer();
        match kind {
            ChangeKind::Produce => {
                crate::codec::write_header(&mut range, RequestKind::ProduceCoin)?;
                range.write_bytes(&coin.outpoint.txid)?;
                range.write_i32(coin.outpoint.index)?;
                range.write_u32(context)?;
                range.write_u8(coin.flags)?;
                range.write_u64(coin.satoshis)?;
                range.write_u32(coin.n_lock_time)?;
                let start = coin.script_offset as usize;
                let len = coin.script_length as usize;
                let script = storage.get(start..start + len).ok_or_else(|| {
                    TerabError::InvalidRequest("script_offset/script_length out of bounds".into())
                })?;
                range.write_bytes(script)?;
            }
            ChangeKind::Consume => {
                crate::codec::write_header(&mut range, RequestKind::ConsumeCoin)?;
                range.write_bytes(&coin.outpoint.txid)?;
                range.write_i32(coin.outpoint.index)?;
                range.write_u32(context)?;
            }
            ChangeKind::Remove => {
                crate::codec::write_header(&mut range, RequestKind::RemoveCoin)?;
                range.write_bytes(&coin.outpoint.txid)?;
                range.write_i32(coin.outpoint.index)?;
                range.write_u32(context)?;
                range.write_u8(1)?; // remove production
                range.write_u8(1)?; // remove consumption
            }
        }
        let to_send = range.position();
        let request_id = conn.send_request(to_send)?;
        if i == 0 {
            first_id = request_id;
        }
    }
    conn.batch_end()?;

    for _ in 0..coins.len() {
        let mut reply = conn.wait_response()?;
        let header = read_response_header(&mut reply)?;
        match header.kind {
            k if k == ResponseKind::ProduceCoinResponse as u32 => {}
            k if k == ResponseKind::ConsumeCoinResponse as u32 => {}
            k if k == ResponseKind::RemoveCoinResponse as u32 => {}
            other => {
                conn.poison();
                return Err(TerabError::InternalError(format!(
                    "unexpected response kind {other} for a coin-change request"
                )));
            }
        }

        let status = reply.read_u8()?;
        let slot = (header.request_id.wrapping_sub(first_id)) as usize;
        let coin = match coins.get_mut(slot) {
            Some(coin) => coin,
            None => {
                conn.poison();
                return Err(TerabError::InternalError(format!(
                    "response request-id {} maps to out-of-range slot {slot}",
                    header.request_id
                )));
            }
        };

        coin.status = match status {
            0 => CoinStatus::SUCCESS,
            1 => CoinStatus::OUTPOINT_NOT_FOUND,
            2 => CoinStatus::INVALID_CONTEXT,
            3 => CoinStatus::INVALID_BLOCK_HANDLE,
            other => {
                conn.poison();
                return Err(TerabError::InternalError(format!(
                    "unexpected change_coin status {other}"
                )));
            }
        };
    }

    Ok(())
}

/// Fetches the current state of each coin named by `coins[i].outpoint`,
/// pipelining all N requests and demultiplexing the N responses by
/// request-id (spec.md §4.4.2). Populates every field of each `Coin` from
/// the server's reply, copying the script payload into `storage`
/// sequentially.
///
/// `script_offset` is advanced for every coin regardless of whether its
/// script bytes actually fit in `storage` (see spec.md §9 and DESIGN.md):
/// this matches the original client, so offsets stay stable across a batch
/// independent of which scripts fit.
pub fn get_coins(
    conn: &mut Connection,
    context: BlockHandle,
    coins: &mut [Coin],
    storage: &mut [u8],
) -> Result<()> {
    if coins.is_empty() {
        return Ok(());
    }

    conn.batch_begin();
    let mut first_id: u32 = 0;
    for (i, coin) in coins.iter().enumerate() {
        let mut range = conn.get_send_buffer();
        crate::codec::write_header(&mut range, RequestKind::GetCoin)?;
        range.write_bytes(&coin.outpoint.txid)?;
        range.write_i32(coin.outpoint.index)?;
        range.write_u32(context)?;
        let to_send = range.position();
        let request_id = conn.send_request(to_send)?;
        if i == 0 {
            first_id = request_id;
        }
    }
    conn.batch_end()?;

    let mut running_offset: i32 = 0;
    for _ in 0..coins.len() {
        let mut reply = conn.wait_response()?;
        let header = read_response_header(&mut reply)?;
        if let Err(e) = expect_kind(&header, ResponseKind::GetCoinResponse) {
            conn.poison();
            return Err(e);
        }

        let status = reply.read_u8()?;
        let mut txid = [0u8; 32];
        reply.read_bytes(&mut txid)?;
        let index = reply.read_i32()?;
        let flags = reply.read_u8()?;
        let _context = reply.read_u32()?;
        let production = reply.read_u32()?;
        let consumption = reply.read_u32()?;
        let satoshis = reply.read_u64()?;
        let n_lock_time = reply.read_u32()?;

        // `reply` was constructed over the whole frame including the header
        // (spec.md §4.3.5), and its position is now right after the fixed
        // response fields we just decoded — the rest is the script payload.
        let consumed_so_far = reply.position();
        let script_length = match (header.size as usize).checked_sub(consumed_so_far) {
            Some(n) => n as i32,
            None => {
                conn.poison();
                return Err(TerabError::InternalError(
                    "frame shorter than its fixed body".into(),
                ));
            }
        };

        let slot = (header.request_id.wrapping_sub(first_id)) as usize;
        let coin = match coins.get_mut(slot) {
            Some(coin) => coin,
            None => {
                conn.poison();
                return Err(TerabError::InternalError(format!(
                    "response request-id {} maps to out-of-range slot {slot}",
                    header.request_id
                )));
            }
        };

        coin.outpoint = Outpoint { txid, index };
        coin.production = production;
        coin.consumption = consumption;
        coin.satoshis = satoshis;
        coin.n_lock_time = n_lock_time;
        coin.flags = flags;
        coin.script_offset = running_offset;
        coin.script_length = script_length;

        coin.status = match status {
            0 => CoinStatus::SUCCESS,
            1 => CoinStatus::OUTPOINT_NOT_FOUND,
            other => {
                conn.poison();
                return Err(TerabError::InternalError(format!(
                    "unexpected get_coin status {other}"
                )));
            }
        };

        let len = script_length as usize;
        let start = running_offset as usize;
        if storage.len() >= start && storage.len() - start >= len {
            let mut dst = Range::new(&mut storage[start..start + len]);
            reply.copy_range(&mut dst, len)?;
        } else {
            coin.status |= CoinStatus::STORAGE_TOO_SHORT;
        }

        running_offset += script_length;
    }

    Ok(())
}
