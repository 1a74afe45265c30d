// SPDX-License-Identifier: BSD-3-Clause

//! A minimal, scriptable Terab server used only by this crate's
//! integration tests. Real servers are out of scope for this library
//! (spec.md §1); this is the same "spawn a thread, accept a loopback
//! connection, retry-connect from the test" pattern the teacher crate uses
//! in `rpc_protocol/tests/rpcbind.rs`, adapted to speak Terab frames
//! instead of RPC/XDR.

use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};

/// One decoded request frame: its header fields and raw body bytes
/// (body excludes the 16-byte header).
pub struct RecvFrame {
    pub request_id: u32,
    pub kind: u32,
    pub body: Vec<u8>,
}

/// A loopback Terab server for a single incoming connection, driven
/// synchronously by the test from the main thread (no background thread
/// needed: the test interleaves `recv_request`/`send_response` calls with
/// client calls that happen to run first since the client flushes before
/// blocking on a reply).
pub struct MockServer {
    listener: TcpListener,
}

impl MockServer {
    /// Binds a loopback listener on an OS-assigned port.
    pub fn bind() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind loopback listener");
        MockServer { listener }
    }

    pub fn connection_string(&self) -> String {
        format!("127.0.0.1:{}", self.listener.local_addr().unwrap().port())
    }

    /// Spawns a background thread running `handler` against the first
    /// accepted connection.
    pub fn serve<F>(self, handler: F) -> std::thread::JoinHandle<()>
    where
        F: FnOnce(TcpStream) + Send + 'static,
    {
        std::thread::spawn(move || {
            let (stream, _) = self.listener.accept().expect("accept loopback connection");
            handler(stream);
        })
    }
}

/// Reads one length-prefixed Terab frame from `stream` (spec.md §6.1).
pub fn recv_request(stream: &mut TcpStream) -> RecvFrame {
    let mut header = [0u8; 16];
    stream.read_exact(&mut header).expect("read frame header");

    let size = u32::from_le_bytes(header[0..4].try_into().unwrap());
    let request_id = u32::from_le_bytes(header[4..8].try_into().unwrap());
    let kind = u32::from_le_bytes(header[12..16].try_into().unwrap());

    let mut body = vec![0u8; size as usize - 16];
    stream.read_exact(&mut body).expect("read frame body");

    RecvFrame {
        request_id,
        kind,
        body,
    }
}

/// Writes one length-prefixed Terab frame to `stream`.
pub fn send_response(stream: &mut TcpStream, request_id: u32, kind: u32, body: &[u8]) {
    let size = 16 + body.len() as u32;
    let mut frame = Vec::with_capacity(size as usize);
    frame.extend_from_slice(&size.to_le_bytes());
    frame.extend_from_slice(&request_id.to_le_bytes());
    frame.extend_from_slice(&0u32.to_le_bytes()); // client_id
    frame.extend_from_slice(&kind.to_le_bytes());
    frame.extend_from_slice(body);
    stream.write_all(&frame).expect("write frame");
}
