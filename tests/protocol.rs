// SPDX-License-Identifier: BSD-3-Clause

//! End-to-end scenarios from spec.md §8 (S1-S5), driven against the
//! loopback mock server in `tests/common`.

mod common;

use std::io::{Read, Write};

use common::{recv_request, send_response, MockServer};
use terab_client::types::{BlockInfo, Coin, CoinStatus, Outpoint};
use terab_client::{protocol, Connection};

const OPEN_BLOCK: u32 = 16;
const OPEN_BLOCK_RESPONSE: u32 = 17;
const COMMIT_BLOCK: u32 = 18;
const COMMIT_BLOCK_RESPONSE: u32 = 19;
const GET_BLOCK_HANDLE: u32 = 20;
const GET_BLOCK_HANDLE_RESPONSE: u32 = 21;
const GET_BLOCK_INFO: u32 = 22;
const GET_BLOCK_INFO_RESPONSE: u32 = 23;
const GET_COIN_RESPONSE: u32 = 65;
const PRODUCE_COIN: u32 = 66;
const PRODUCE_COIN_RESPONSE: u32 = 67;

#[test]
fn s1_open_commit_happy_path() {
    let server = MockServer::bind();
    let conn_str = server.connection_string();

    let blockid = [0xabu8; 32];

    let handle_thread = server.serve(move |mut stream| {
        // open_block
        let req = recv_request(&mut stream);
        assert_eq!(req.kind, OPEN_BLOCK);
        assert_eq!(req.body, vec![0u8; 32]);
        let mut body = vec![0u8]; // status = success
        body.extend_from_slice(&1u32.to_le_bytes()); // handle
        body.extend_from_slice(&[0u8; 16]); // ucid
        send_response(&mut stream, req.request_id, OPEN_BLOCK_RESPONSE, &body);

        // commit_block
        let req = recv_request(&mut stream);
        assert_eq!(req.kind, COMMIT_BLOCK);
        send_response(&mut stream, req.request_id, COMMIT_BLOCK_RESPONSE, &[0u8]);

        // get_committed_block
        let req = recv_request(&mut stream);
        assert_eq!(req.kind, GET_BLOCK_HANDLE);
        assert_eq!(req.body.len(), 32 + 16 + 1);
        assert_eq!(req.body[32 + 16], 1); // is_committed flag
        let mut body = vec![0u8];
        body.extend_from_slice(&1u32.to_le_bytes());
        send_response(&mut stream, req.request_id, GET_BLOCK_HANDLE_RESPONSE, &body);

        // get_block_info
        let req = recv_request(&mut stream);
        assert_eq!(req.kind, GET_BLOCK_INFO);
        let mut body = Vec::new();
        body.extend_from_slice(&[0xabu8; 32]); // blockid
        body.extend_from_slice(&[0u8; 16]); // ucid
        body.extend_from_slice(&1u32.to_le_bytes()); // handle
        body.extend_from_slice(&0u32.to_le_bytes()); // parent
        body.extend_from_slice(&7i32.to_le_bytes()); // blockheight
        body.push(1); // is_committed
        send_response(&mut stream, req.request_id, GET_BLOCK_INFO_RESPONSE, &body);
    });

    let mut conn = Connection::new(&conn_str).unwrap();
    conn.open().unwrap();

    let (handle, _ucid) = protocol::open_block(&mut conn, &[0u8; 32]).unwrap();
    assert_eq!(handle, 1);

    protocol::commit_block(&mut conn, handle, &blockid).unwrap();

    let looked_up = protocol::get_committed_block(&mut conn, &blockid).unwrap();
    assert_eq!(looked_up, handle);

    let info: BlockInfo = protocol::get_block_info(&mut conn, handle).unwrap();
    assert!(info.is_committed());
    assert_eq!(info.blockheight, 7);

    handle_thread.join().unwrap();
}

#[test]
fn s2_produce_and_read_back_coin() {
    let server = MockServer::bind();
    let conn_str = server.connection_string();

    let handle_thread = server.serve(move |mut stream| {
        // set_coins: one produce request
        let req = recv_request(&mut stream);
        assert_eq!(req.kind, PRODUCE_COIN);
        let script = &req.body[36 + 4 + 1 + 8 + 4..];
        assert_eq!(script, b"OP_1\x51\x51\x51");
        send_response(&mut stream, req.request_id, PRODUCE_COIN_RESPONSE, &[0u8]);

        // get_coins: one get_coin request
        let req = recv_request(&mut stream);
        let mut body = vec![0u8]; // status success
        body.extend_from_slice(&req.body[..36]); // echo outpoint
        body.push(0); // flags
        body.extend_from_slice(&1u32.to_le_bytes()); // context
        body.extend_from_slice(&1u32.to_le_bytes()); // production
        body.extend_from_slice(&0u32.to_le_bytes()); // consumption
        body.extend_from_slice(&5_000_000_000u64.to_le_bytes()); // satoshis
        body.extend_from_slice(&0u32.to_le_bytes()); // n_lock_time
        body.extend_from_slice(b"OP_1\x51\x51\x51");
        send_response(&mut stream, req.request_id, GET_COIN_RESPONSE, &body);
    });

    let mut conn = Connection::new(&conn_str).unwrap();
    conn.open().unwrap();

    let outpoint = Outpoint {
        txid: [0x11u8; 32],
        index: 0,
    };

    let storage = b"OP_1\x51\x51\x51".to_vec();
    let mut coins = [Coin::produced(outpoint, 1, 5_000_000_000, 0, 0, 0, 4)];
    protocol::set_coins(&mut conn, 1, &mut coins, &storage).unwrap();
    assert_eq!(coins[0].status, CoinStatus::SUCCESS);

    let mut get_storage = vec![0u8; 16];
    let mut get_coins = [Coin::removed(outpoint)];
    protocol::get_coins(&mut conn, 1, &mut get_coins, &mut get_storage).unwrap();

    assert_eq!(get_coins[0].status, CoinStatus::SUCCESS);
    assert_eq!(get_coins[0].script_length, 4);
    assert_eq!(&get_storage[0..4], b"OP_1");

    handle_thread.join().unwrap();
}

#[test]
fn s3_out_of_order_response_demux() {
    let server = MockServer::bind();
    let conn_str = server.connection_string();

    let handle_thread = server.serve(move |mut stream| {
        let req_a = recv_request(&mut stream);
        let req_b = recv_request(&mut stream);
        assert_eq!(req_b.request_id, req_a.request_id + 1);

        // Reply to B first, then A: the client must still attribute each
        // status to the right input slot.
        send_response(&mut stream, req_b.request_id, PRODUCE_COIN_RESPONSE, &[1u8]);
        send_response(&mut stream, req_a.request_id, PRODUCE_COIN_RESPONSE, &[0u8]);
    });

    let mut conn = Connection::new(&conn_str).unwrap();
    conn.open().unwrap();

    let outpoint_a = Outpoint {
        txid: [0xAAu8; 32],
        index: 0,
    };
    let outpoint_b = Outpoint {
        txid: [0xBBu8; 32],
        index: 1,
    };
    let storage = b"\x51\x51\x51\x51".to_vec();

    let mut coins = [
        Coin::produced(outpoint_a, 1, 1, 0, 0, 0, 4),
        Coin::produced(outpoint_b, 1, 1, 0, 0, 0, 4),
    ];
    protocol::set_coins(&mut conn, 1, &mut coins, &storage).unwrap();

    assert_eq!(coins[0].status, CoinStatus::SUCCESS);
    assert_eq!(coins[1].status, CoinStatus::OUTPOINT_NOT_FOUND);

    handle_thread.join().unwrap();
}

#[test]
fn s4_storage_too_short() {
    let server = MockServer::bind();
    let conn_str = server.connection_string();

    let handle_thread = server.serve(move |mut stream| {
        let req = recv_request(&mut stream);
        let mut body = vec![0u8];
        body.extend_from_slice(&req.body[..36]);
        body.push(0);
        body.extend_from_slice(&1u32.to_le_bytes());
        body.extend_from_slice(&1u32.to_le_bytes());
        body.extend_from_slice(&0u32.to_le_bytes());
        body.extend_from_slice(&1u64.to_le_bytes());
        body.extend_from_slice(&0u32.to_le_bytes());
        body.extend_from_slice(b"\x51\x51\x51\x51"); // 4-byte script
        send_response(&mut stream, req.request_id, GET_COIN_RESPONSE, &body);
    });

    let mut conn = Connection::new(&conn_str).unwrap();
    conn.open().unwrap();

    let outpoint = Outpoint {
        txid: [0x22u8; 32],
        index: 0,
    };
    let mut storage = vec![0xFFu8; 2];
    let mut coins = [Coin::removed(outpoint)];
    protocol::get_coins(&mut conn, 1, &mut coins, &mut storage).unwrap();

    assert_eq!(coins[0].script_length, 4);
    assert!(coins[0].status.contains(CoinStatus::STORAGE_TOO_SHORT));
    assert_eq!(storage, vec![0xFFu8; 2]); // untouched

    handle_thread.join().unwrap();
}

#[test]
fn s5_protocol_violation_is_fatal() {
    let server = MockServer::bind();
    let conn_str = server.connection_string();

    // The mock stays alive and would happily answer a second, well-formed
    // request — so the test only passes if the client itself refuses to
    // re-enter Open and send that request, not merely because the socket
    // got closed out from under it.
    let handle_thread = server.serve(move |mut stream| {
        let req = recv_request(&mut stream);
        assert_eq!(req.kind, OPEN_BLOCK);
        // Reply with the wrong response kind (commit_block_response instead
        // of open_block_response).
        send_response(&mut stream, req.request_id, COMMIT_BLOCK_RESPONSE, &[0u8]);

        stream
            .set_read_timeout(Some(std::time::Duration::from_millis(500)))
            .unwrap();
        let mut probe = [0u8; 1];
        let read = stream.read(&mut probe);
        assert!(
            matches!(read, Ok(0) | Err(_)),
            "a poisoned connection must never send a second request"
        );
    });

    let mut conn = Connection::new(&conn_str).unwrap();
    conn.open().unwrap();

    let err = protocol::open_block(&mut conn, &[0u8; 32]).unwrap_err();
    assert!(matches!(err, terab_client::TerabError::InternalError(_)));

    // The connection is now poisoned; subsequent operations must also fail,
    // and fail locally without ever writing to the socket (see above).
    let err2 = protocol::commit_block(&mut conn, 1, &[0u8; 32]).unwrap_err();
    assert!(matches!(err2, terab_client::TerabError::InternalError(_)));

    handle_thread.join().unwrap();
}

/// spec.md §8 property 10: a received frame with a declared size outside
/// `[16, MAX_FRAME]` is fatal.
#[test]
fn malformed_frame_size_is_fatal() {
    let server = MockServer::bind();
    let conn_str = server.connection_string();

    let handle_thread = server.serve(move |mut stream| {
        let req = recv_request(&mut stream);
        assert_eq!(req.kind, OPEN_BLOCK);
        // Declare a frame of 15 bytes — below the 16-byte header floor.
        stream.write_all(&15u32.to_le_bytes()).unwrap();
    });

    let mut conn = Connection::new(&conn_str).unwrap();
    conn.open().unwrap();

    let err = protocol::open_block(&mut conn, &[0u8; 32]).unwrap_err();
    assert!(matches!(err, terab_client::TerabError::InternalError(_)));

    handle_thread.join().unwrap();
}
