// SPDX-License-Identifier: BSD-3-Clause

//! The connection state machine and framed request/response engine
//! (spec.md §4.3, §4.5).

use std::io::{Read, Write};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, TcpStream};

use log::{debug, trace, warn};

use crate::buffer::Range;
use crate::codec::MAX_FRAME;
use crate::error::{Result, TerabError};

/// Longest address literal this parser accepts, matching the original
/// client's 100-byte stack buffer (spec.md §4.3.1).
const MAX_ADDR_LITERAL_LEN: usize = 99;

/// Parses a Terab connection string into a socket address, per the grammar
/// in spec.md §4.3.1:
///
/// - `[X]:N` — `X` an IPv6 literal, `N` an optional decimal port.
/// - `A:B` with exactly one `:` — `A` an IPv4 literal, `B` a non-empty,
///   non-zero decimal port.
/// - `X` alone — an IPv4 or IPv6 literal; port defaults to [`crate::codec::DEFAULT_PORT`].
pub fn parse_endpoint(connection_string: &str) -> Result<SocketAddr> {
    let (addr_str, port_str) = tokenize(connection_string)?;

    if addr_str.is_empty() || addr_str.len() > MAX_ADDR_LITERAL_LEN {
        return Err(TerabError::InvalidRequest(format!(
            "address literal must be 1..={MAX_ADDR_LITERAL_LEN} bytes, got {}",
            addr_str.len()
        )));
    }

    let ip: IpAddr = if let Ok(v4) = addr_str.parse::<Ipv4Addr>() {
        IpAddr::V4(v4)
    } else if let Ok(v6) = addr_str.parse::<Ipv6Addr>() {
        IpAddr::V6(v6)
    } else {
        return Err(TerabError::InvalidRequest(format!(
            "not a valid IPv4 or IPv6 literal: {addr_str:?}"
        )));
    };

    let port = match port_str {
        None => crate::codec::DEFAULT_PORT,
        Some(p) => {
            if p.is_empty() {
                return Err(TerabError::InvalidRequest(
                    "dangling ':' with no port number".into(),
                ));
            }
            let port: u16 = p
                .parse()
                .map_err(|_| TerabError::InvalidRequest(format!("invalid port number {p:?}")))?;
            if port == 0 {
                return Err(TerabError::InvalidRequest("port 0 is not allowed".into()));
            }
            port
        }
    };

    Ok(SocketAddr::new(ip, port))
}

/// Splits a connection string into its address and (optional) port
/// substrings, without validating either.
fn tokenize(s: &str) -> Result<(&str, Option<&str>)> {
    if let Some(rest) = s.strip_prefix('[') {
        // `[X]:N` or `[X]`
        let close = rest
            .find(']')
            .ok_or_else(|| TerabError::InvalidRequest("missing closing ']'".into()))?;
        let addr = &rest[..close];
        let after = &rest[close + 1..];
        if after.is_empty() {
            return Ok((addr, None));
        }
        let port = after
            .strip_prefix(':')
            .ok_or_else(|| TerabError::InvalidRequest(format!("unexpected trailer {after:?}")))?;
        return Ok((addr, Some(port)));
    }

    // `A:B` with exactly one ':' is IPv4:port; anything else (zero or 2+
    // colons) is a bare literal, with IPv6 containing multiple colons.
    let colon_count = s.matches(':').count();
    if colon_count == 1 {
        let idx = s.find(':').unwrap();
        return Ok((&s[..idx], Some(&s[idx + 1..])));
    }

    Ok((s, None))
}

/// Lifecycle state of a [`Connection`] (spec.md §4.5).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Unopened,
    Open,
    Closed,
    Poisoned,
}

/// Owns a TCP socket to a Terab server, the send/receive buffers, and the
/// request-sequence counter. Exclusively owned by one caller at a time
/// (spec.md §5) — nothing here is internally synchronized.
pub struct Connection {
    state: State,
    stream: Option<TcpStream>,
    addr: SocketAddr,
    conn_string: String,

    sendbuf: Vec<u8>,
    sendptr: usize,
    recvbuf: Vec<u8>,

    seq: u32,
    in_batch: bool,
}

impl Connection {
    /// Parses `connection_string` and prepares a connection, without
    /// touching the network. Mirrors `connection_new` in the original
    /// client, which performs parsing and buffer allocation but not the
    /// `connect(2)` call itself.
    ///
    /// Unlike the original (see spec.md §9), this allocates the owned
    /// buffers up front and populates a single, already-heap-placed struct —
    /// it never copies a fully-populated draft value over one whose nested
    /// allocations would otherwise be silently dropped.
    pub fn new(connection_string: &str) -> Result<Self> {
        let addr = parse_endpoint(connection_string)?;
        Ok(Connection {
            state: State::Unopened,
            stream: None,
            addr,
            conn_string: connection_string.to_string(),
            sendbuf: vec![0u8; 2 * MAX_FRAME],
            sendptr: 0,
            recvbuf: vec![0u8; MAX_FRAME],
            seq: 0,
            in_batch: false,
        })
    }

    /// The connection string this connection was constructed from.
    pub fn connection_string(&self) -> &str {
        &self.conn_string
    }

    pub fn is_connected(&self) -> bool {
        self.state == State::Open
    }

    /// Opens the TCP socket, sets `TCP_NODELAY`, and connects synchronously
    /// (spec.md §4.3.2). On any failure the connection is left `Closed` and
    /// cannot be reopened (§4.5).
    pub fn open(&mut self) -> Result<()> {
        if self.state != State::Unopened {
            return Err(TerabError::InvalidRequest(
                "connection was already opened".into(),
            ));
        }

        let result = (|| -> Result<TcpStream> {
            let stream = TcpStream::connect(self.addr)?;
            stream.set_nodelay(true)?;
            Ok(stream)
        })();

        match result {
            Ok(stream) => {
                debug!("connected to {}", self.addr);
                self.stream = Some(stream);
                self.state = State::Open;
                Ok(())
            }
            Err(e) => {
                warn!("failed to connect to {}: {e}", self.addr);
                self.state = State::Closed;
                Err(e)
            }
        }
    }

    /// Closes the socket exactly once. Repeated close is an error
    /// (spec.md §4.3.2): both "already closed" and "OS error on close" are
    /// treated as terminal and unrecoverable (§9).
    pub fn close(&mut self) -> Result<()> {
        match self.state {
            State::Open => {
                if let Some(stream) = self.stream.take() {
                    // `TcpStream::shutdown` is the Rust equivalent of
                    // `closesocket`; failures here are still terminal.
                    stream.shutdown(std::net::Shutdown::Both)?;
                }
                self.state = State::Closed;
                Ok(())
            }
            _ => Err(TerabError::InvalidRequest(
                "connection is not open; close is not repeatable".into(),
            )),
        }
    }

    /// Validates that the connection is in the `Open` state, without
    /// borrowing any particular field — callers then access `self.stream`
    /// directly so the borrow checker can see it as disjoint from other
    /// fields (e.g. `self.recvbuf`) accessed in the same scope.
    fn check_open(&self) -> Result<()> {
        match self.state {
            State::Open => Ok(()),
            State::Unopened => Err(TerabError::ConnectionFailed(
                "connection has not been opened".into(),
            )),
            State::Closed => Err(TerabError::ConnectionFailed(
                "connection is closed".into(),
            )),
            State::Poisoned => Err(TerabError::InternalError(
                "connection is poisoned by a prior protocol or I/O error".into(),
            )),
        }
    }

    fn require_open(&mut self) -> Result<&mut TcpStream> {
        self.check_open()?;
        self.stream
            .as_mut()
            .ok_or_else(|| TerabError::InternalError("open state without a socket".into()))
    }

    /// Marks the connection `Poisoned` (spec.md §4.5): called on any I/O
    /// failure and, by the protocol layer, on any locally-detected protocol
    /// violation (response-kind mismatch, out-of-range status byte,
    /// malformed frame) so that no further operation can re-enter `Open`
    /// (spec.md §7).
    pub(crate) fn poison(&mut self) {
        self.state = State::Poisoned;
    }

    /// Returns a fresh view of the send buffer, starting at the current
    /// send cursor, exactly [`crate::codec::MAX_FRAME`] bytes long
    /// (spec.md §4.3.3). The caller writes one message into it and passes
    /// the number of bytes written to [`Connection::send_request`].
    pub fn get_send_buffer(&mut self) -> Range<'_> {
        let end = self.sendptr + MAX_FRAME;
        Range::new(&mut self.sendbuf[self.sendptr..end])
    }

    /// Accepts a message written into the range returned by
    /// [`Connection::get_send_buffer`]: patches its header in place with the
    /// frame length and the next request-id, then flushes or defers the
    /// bytes per the batching policy (spec.md §4.3.3).
    ///
    /// `to_send` is the number of bytes written into that range (its cursor
    /// position when done).
    pub fn send_request(&mut self, to_send: usize) -> Result<u32> {
        self.require_open()?;

        if to_send > MAX_FRAME {
            return Err(TerabError::InvalidRequest(format!(
                "message of {to_send} bytes exceeds MAX_FRAME ({MAX_FRAME})"
            )));
        }

        let header_at = self.sendptr;
        self.sendbuf[header_at..header_at + 4].copy_from_slice(&(to_send as u32).to_le_bytes());
        let request_id = self.seq;
        self.sendbuf[header_at + 4..header_at + 8].copy_from_slice(&request_id.to_le_bytes());

        self.sendptr += to_send;
        self.seq = self.seq.wrapping_add(1);

        if !self.in_batch || self.sendptr >= MAX_FRAME {
            self.flush_send_buffer()?;
        }

        Ok(request_id)
    }

    fn flush_send_buffer(&mut self) -> Result<()> {
        let len = self.sendptr;
        if len == 0 {
            return Ok(());
        }
        self.check_open()?;
        trace!("flushing {len} pending bytes");
        let stream = self
            .stream
            .as_mut()
            .ok_or_else(|| TerabError::InternalError("open state without a socket".into()))?;
        if let Err(e) = stream.write_all(&self.sendbuf[..len]) {
            self.poison();
            return Err(e.into());
        }
        self.sendptr = 0;
        Ok(())
    }

    /// Starts deferring writes: subsequent `send_request` calls accumulate
    /// in the send buffer instead of flushing immediately, until
    /// [`Connection::batch_end`] or the backpressure threshold is hit
    /// (spec.md §4.3.4).
    pub fn batch_begin(&mut self) {
        self.in_batch = true;
    }

    /// Stops deferring writes and flushes any residual bytes
    /// unconditionally (spec.md §4.3.4, §9).
    pub fn batch_end(&mut self) -> Result<()> {
        self.in_batch = false;
        self.flush_send_buffer()
    }

    /// Reads one length-prefixed frame into the receive buffer and returns
    /// a range over it (spec.md §4.3.5). At most one outstanding response
    /// view is alive at a time: the returned range borrows `self`, so a
    /// caller cannot call `wait_response` again until it's dropped.
    pub fn wait_response(&mut self) -> Result<Range<'_>> {
        self.check_open()?;

        let size = {
            let stream = self
                .stream
                .as_mut()
                .ok_or_else(|| TerabError::InternalError("open state without a socket".into()))?;
            let mut header = [0u8; 4];
            if let Err(e) = stream.read_exact(&mut header) {
                self.poison();
                return Err(e.into());
            }
            u32::from_le_bytes(header)
        };

        if !(16..=MAX_FRAME as u32).contains(&size) {
            self.poison();
            return Err(TerabError::InternalError(format!(
                "server sent malformed frame size {size}; must be in [16, {MAX_FRAME}]"
            )));
        }

        let size = size as usize;
        self.recvbuf[..4].copy_from_slice(&(size as u32).to_le_bytes());
        let stream = self
            .stream
            .as_mut()
            .ok_or_else(|| TerabError::InternalError("open state without a socket".into()))?;
        if let Err(e) = stream.read_exact(&mut self.recvbuf[4..size]) {
            self.poison();
            return Err(e.into());
        }

        trace!("received frame of {size} bytes");
        Ok(Range::new(&mut self.recvbuf[..size]))
    }
}
