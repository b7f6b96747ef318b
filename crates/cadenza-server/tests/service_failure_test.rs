//! Chart-service failure modes: an unresolvable chart rejects the
//! selection, an unresolvable record degrades to zeroes without blocking
//! settlement.

mod common;

use std::sync::Arc;

use cadenza_client::{Client, ClientError};
use cadenza_proto::{Message, RoomId, RoomState};
use common::{
    ALICE, CAROL, FailingRecords, eventually, start_server, start_server_with_charts, test_config,
};

fn rid(s: &str) -> RoomId {
    s.try_into().expect("valid room id")
}

#[tokio::test]
async fn unresolvable_chart_rejects_the_selection() {
    let server = start_server(test_config()).await;

    let alice = Client::connect(server.addr).await.expect("alice connects");
    alice.authenticate(ALICE).await.expect("authenticates");
    alice.create_room(rid("pickless")).await.expect("creates");

    // The service 404s negative ids; the room must stay chartless.
    let err = alice.select_chart(-1).await.expect_err("lookup fails");
    assert!(
        matches!(err, ClientError::Rejected(ref r) if r == "chart-not-found"),
        "got {err:?}"
    );
    let err = alice.request_start().await.expect_err("nothing selected");
    assert!(matches!(err, ClientError::Rejected(ref r) if r == "start-no-chart"));

    // The connection survives and a good id still works.
    alice.select_chart(1).await.expect("valid chart selects");
    eventually("selection broadcast arrives", || async {
        alice.take_messages().await.iter().any(|m| {
            matches!(m, Message::SelectChart { user: 100, id: 1, name } if name == "chart-1")
        })
    })
    .await;

    server.stop().await;
}

#[tokio::test]
async fn unresolvable_record_degrades_to_zeroes() {
    let server = start_server_with_charts(test_config(), Arc::new(FailingRecords)).await;

    let alice = Client::connect(server.addr).await.expect("alice connects");
    alice.authenticate(ALICE).await.expect("authenticates");
    alice.create_room(rid("degraded")).await.expect("creates");

    let carol = Client::connect(server.addr).await.expect("carol connects");
    carol.authenticate(CAROL).await.expect("authenticates");
    carol.join_room(rid("degraded"), false).await.expect("joins");

    alice.select_chart(3).await.expect("chart resolves fine");
    alice.request_start().await.expect("starts");
    carol.ready().await.expect("ready");

    eventually("both playing", || async {
        alice.state_changes().await.contains(&RoomState::Playing)
            && carol.state_changes().await.contains(&RoomState::Playing)
    })
    .await;

    // The record lookup fails server-side, but the report still succeeds
    // and the broadcast carries a zeroed summary.
    alice.played(5).await.expect("played is not blocked");
    eventually("carol sees the zeroed play", || async {
        carol.take_messages().await.iter().any(|m| {
            matches!(
                m,
                Message::Played { user: 100, score: 0, accuracy, full_combo: false }
                    if *accuracy == 0.0
            )
        })
    })
    .await;

    // Settlement is not blocked either: the round ends once carol reports.
    carol.played(6).await.expect("carol reports");
    eventually("round settles back to selection", || async {
        alice.state_changes().await.contains(&RoomState::SelectChart(None))
            && carol.state_changes().await.contains(&RoomState::SelectChart(None))
    })
    .await;

    server.stop().await;
}
