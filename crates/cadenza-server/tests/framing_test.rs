//! Framing violations close the connection; semantic errors never do.

mod common;

use std::time::Duration;

use cadenza_client::Client;
use common::{ALICE, start_server, test_config};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::TcpStream,
};

/// Read until EOF or time out; EOF means the server closed us.
async fn assert_closed(mut socket: TcpStream) {
    let result = tokio::time::timeout(Duration::from_secs(5), async {
        let mut sink = [0u8; 256];
        loop {
            match socket.read(&mut sink).await {
                Ok(0) => return,
                Ok(_) => {},
                Err(_) => return,
            }
        }
    })
    .await;
    assert!(result.is_ok(), "server did not close the connection");
}

#[tokio::test]
async fn oversized_frame_declaration_closes_the_connection() {
    let server = start_server(test_config()).await;

    let mut socket = TcpStream::connect(server.addr).await.expect("connects");
    socket.write_all(&[1]).await.expect("version byte");

    // ULEB128 for 10 MiB, far beyond the 2 MiB cap.
    let declared: u32 = 10 * 1024 * 1024;
    let mut prefix = Vec::new();
    let mut v = declared;
    loop {
        let mut byte = (v & 0x7f) as u8;
        v >>= 7;
        if v != 0 {
            byte |= 0x80;
        }
        prefix.push(byte);
        if v == 0 {
            break;
        }
    }
    socket.write_all(&prefix).await.expect("length prefix");

    assert_closed(socket).await;
    server.stop().await;
}

#[tokio::test]
async fn truncated_command_body_closes_the_connection() {
    let server = start_server(test_config()).await;

    let mut socket = TcpStream::connect(server.addr).await.expect("connects");
    socket.write_all(&[1]).await.expect("version byte");

    // A complete frame whose payload is a Played command cut short: tag 14
    // plus only two of its four score bytes.
    socket.write_all(&[3, 14, 1, 0]).await.expect("truncated frame");

    assert_closed(socket).await;
    server.stop().await;
}

#[tokio::test]
async fn unknown_tag_closes_the_connection() {
    let server = start_server(test_config()).await;

    let mut socket = TcpStream::connect(server.addr).await.expect("connects");
    socket.write_all(&[1]).await.expect("version byte");
    socket.write_all(&[1, 99]).await.expect("unknown tag frame");

    assert_closed(socket).await;
    server.stop().await;
}

#[tokio::test]
async fn unsupported_version_closes_the_connection() {
    let server = start_server(test_config()).await;

    let mut socket = TcpStream::connect(server.addr).await.expect("connects");
    socket.write_all(&[9]).await.expect("bad version byte");

    assert_closed(socket).await;
    server.stop().await;
}

#[tokio::test]
async fn semantic_errors_keep_the_connection_open() {
    let server = start_server(test_config()).await;

    let alice = Client::connect(server.addr).await.expect("connects");
    alice.authenticate(ALICE).await.expect("authenticates");

    // A pile of protocol violations, none of which may kill the session.
    assert!(alice.leave_room().await.is_err());
    assert!(alice.ready().await.is_err());
    assert!(alice.played(1).await.is_err());
    assert!(alice.abort().await.is_err());

    alice.ping().await.expect("still alive");
    assert!(!alice.is_closed());

    server.stop().await;
}
