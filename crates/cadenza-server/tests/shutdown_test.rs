//! Graceful shutdown drains sessions, rooms, and persisted state.

mod common;

use cadenza_client::Client;
use cadenza_proto::RoomId;
use common::{ALICE, CAROL, eventually, start_server, test_config};

fn rid(s: &str) -> RoomId {
    s.try_into().expect("valid room id")
}

#[tokio::test]
async fn shutdown_closes_sessions_and_removes_rooms() {
    let server = start_server(test_config()).await;

    let alice = Client::connect(server.addr).await.expect("alice connects");
    alice.authenticate(ALICE).await.expect("authenticates");
    alice.create_room(rid("doomed")).await.expect("creates");

    let carol = Client::connect(server.addr).await.expect("carol connects");
    carol.authenticate(CAROL).await.expect("authenticates");
    carol.join_room(rid("doomed"), false).await.expect("joins");

    let state = server.state.clone();
    assert_eq!(state.session_count().await, 2);
    assert_eq!(state.room_count().await, 1);

    server.stop().await;

    assert_eq!(state.session_count().await, 0);
    assert_eq!(state.room_count().await, 0);

    eventually("both clients see the close", || async {
        alice.is_closed() && carol.is_closed()
    })
    .await;

    // No further connections are accepted.
    // (The listener is gone; connect may fail immediately or be refused.)
}
