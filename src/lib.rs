// SPDX-License-Identifier: BSD-3-Clause

//! Client library for Terab, a UTXO storage service used by blockchain
//! infrastructure.
//!
//! This crate translates a typed request/response API into Terab's
//! length-prefixed binary wire protocol, spoken over a single TCP
//! connection. It owns the connection state machine, the framed
//! request/response engine, the wire codec, and the coin-batch
//! orchestration that pipelines N requests and demultiplexes N
//! (possibly out-of-order) responses back onto their input slots.
//!
//! A connection is exclusively owned by one caller at a time; nothing in
//! this crate is internally synchronized (see the module docs on
//! [`Connection`] for the state machine this enforces).
//!
//! ```no_run
//! use terab_client::{Connection, protocol};
//!
//! # fn main() -> terab_client::Result<()> {
//! let mut conn = Connection::new("[::1]:8338")?;
//! conn.open()?;
//!
//! let parent = [0u8; 32];
//! let (handle, _ucid) = protocol::open_block(&mut conn, &parent)?;
//!
//! let blockid = [0xabu8; 32];
//! protocol::commit_block(&mut conn, handle, &blockid)?;
//! # Ok(())
//! # }
//! ```

pub mod buffer;
pub mod codec;
pub mod connection;
pub mod error;
pub mod protocol;
pub mod types;

pub use connection::{parse_endpoint, Connection};
pub use error::{Result, StatusDetail, TerabError};
pub use types::{
    BlockHandle, BlockInfo, Coin, CoinStatus, CommittedBlockId, Outpoint, UncommittedBlockId,
};
