//! End-to-end happy path: create, join as monitor, select, start, play
//! traffic fan-out, settle, replay file on disk.

mod common;

use cadenza_client::Client;
use cadenza_proto::{
    CompactPos, JudgeEvent, Judgement, Message, RoomId, RoomState, TouchFrame,
};
use common::{ALICE, BOB, eventually, start_server, test_config};

fn rid(s: &str) -> RoomId {
    s.try_into().expect("valid room id")
}

#[tokio::test]
async fn create_join_play_settle() {
    let replay_dir = tempfile::tempdir().expect("tempdir");
    let mut config = test_config();
    config.replay_enabled = true;
    config.replay_dir = replay_dir.path().to_path_buf();
    let server = start_server(config).await;

    let alice = Client::connect(server.addr).await.expect("alice connects");
    alice.authenticate(ALICE).await.expect("alice authenticates");
    assert_eq!(alice.me().await.expect("identity").id, 100);

    alice.create_room(rid("room1")).await.expect("room created");

    let bob = Client::connect(server.addr).await.expect("bob connects");
    bob.authenticate(BOB).await.expect("bob authenticates");
    bob.join_room(rid("room1"), true).await.expect("bob joins as monitor");
    assert!(bob.room().await.expect("room").live);

    // Alice sees the monitor arrive.
    eventually("alice sees bob", || async {
        alice.room().await.is_some_and(|r| r.users.contains_key(&101))
    })
    .await;

    alice.select_chart(1).await.expect("chart selected");
    eventually("bob sees chart selection", || async {
        bob.take_messages().await.iter().any(|m| {
            matches!(m, Message::SelectChart { user: 100, id: 1, name } if name == "chart-1")
        })
    })
    .await;

    // The host is the only player, so the countdown resolves immediately.
    alice.request_start().await.expect("start requested");
    eventually("both observe playing", || async {
        alice.state_changes().await.contains(&RoomState::Playing)
            && bob.state_changes().await.contains(&RoomState::Playing)
    })
    .await;

    // Bob, a monitor, cannot take part in play.
    assert!(bob.ready().await.is_err());

    alice
        .send_touches(vec![TouchFrame { time: 1.0, points: vec![(0, CompactPos::new(0.0, 1.0))] }])
        .await
        .expect("touches sent");
    alice
        .send_judges(vec![JudgeEvent {
            time: 1.0,
            line_id: 1,
            note_id: 2,
            judgement: Judgement::Perfect,
        }])
        .await
        .expect("judges sent");

    eventually("bob observes forwarded traffic", || async {
        let traffic = bob.traffic_from(100).await;
        traffic.touches.len() == 1 && traffic.judges.len() == 1
    })
    .await;
    let traffic = bob.traffic_from(100).await;
    assert!((traffic.touches[0].time - 1.0).abs() < f32::EPSILON);
    assert!((traffic.touches[0].points[0].1.y() - 1.0).abs() < 1e-3);
    assert_eq!(traffic.judges[0].line_id, 1);
    assert_eq!(traffic.judges[0].note_id, 2);
    assert_eq!(traffic.judges[0].judgement, Judgement::Perfect);

    // Alice never sees her own traffic back.
    assert!(alice.traffic_from(100).await.touches.is_empty());

    alice.played(1).await.expect("played reported");
    eventually("both return to chart selection", || async {
        alice.state_changes().await.contains(&RoomState::SelectChart(None))
            && bob.state_changes().await.contains(&RoomState::SelectChart(None))
    })
    .await;

    eventually("bob sees the settle messages", || async {
        let messages = bob.take_messages().await;
        messages.iter().any(|m| matches!(m, Message::Played { user: 100, .. }))
            || messages.iter().any(|m| matches!(m, Message::GameEnd))
    })
    .await;

    // Replay file: record/<user>/<chart>/<ts>.phirarec with the PM header.
    eventually("replay file exists", || async {
        std::fs::read_dir(replay_dir.path().join("100").join("1"))
            .map(|dir| dir.count() == 1)
            .unwrap_or(false)
    })
    .await;
    let entry = std::fs::read_dir(replay_dir.path().join("100").join("1"))
        .expect("replay dir")
        .next()
        .expect("one file")
        .expect("entry");
    assert_eq!(entry.path().extension().expect("extension"), "phirarec");

    let bytes = std::fs::read(entry.path()).expect("replay bytes");
    assert_eq!(&bytes[..2], &[0x4d, 0x50]);
    assert_eq!(u32::from_le_bytes([bytes[2], bytes[3], bytes[4], bytes[5]]), 1);
    assert_eq!(u32::from_le_bytes([bytes[6], bytes[7], bytes[8], bytes[9]]), 100);
    assert_eq!(u32::from_le_bytes([bytes[10], bytes[11], bytes[12], bytes[13]]), 1);

    server.stop().await;
}

#[tokio::test]
async fn cycle_keeps_the_chart_across_rounds() {
    let server = start_server(test_config()).await;

    let alice = Client::connect(server.addr).await.expect("alice connects");
    alice.authenticate(ALICE).await.expect("authenticates");
    alice.create_room(rid("cycling")).await.expect("creates");
    alice.cycle_room(true).await.expect("cycle on");
    alice.select_chart(7).await.expect("selects");
    alice.request_start().await.expect("starts");

    eventually("playing", || async {
        alice.state_changes().await.contains(&RoomState::Playing)
    })
    .await;

    alice.played(3).await.expect("plays");
    eventually("back to selection with the chart kept", || async {
        alice.state_changes().await.contains(&RoomState::SelectChart(Some(7)))
    })
    .await;

    server.stop().await;
}

#[tokio::test]
async fn abort_by_everyone_cancels_the_round() {
    let server = start_server(test_config()).await;

    let alice = Client::connect(server.addr).await.expect("alice connects");
    alice.authenticate(ALICE).await.expect("authenticates");
    alice.create_room(rid("aborting")).await.expect("creates");
    alice.select_chart(2).await.expect("selects");
    alice.request_start().await.expect("starts");

    eventually("playing", || async {
        alice.state_changes().await.contains(&RoomState::Playing)
    })
    .await;

    alice.abort().await.expect("aborts");
    eventually("cancelled back to selection", || async {
        alice.take_messages().await.iter().any(|m| {
            matches!(m, Message::CancelGame { user: 100 })
        }) || alice.state_changes().await.contains(&RoomState::SelectChart(Some(2)))
    })
    .await;

    server.stop().await;
}

#[tokio::test]
async fn chat_reaches_the_whole_room() {
    let server = start_server(test_config()).await;

    let alice = Client::connect(server.addr).await.expect("alice connects");
    alice.authenticate(ALICE).await.expect("authenticates");
    alice.create_room(rid("chatty")).await.expect("creates");

    let carol = Client::connect(server.addr).await.expect("carol connects");
    carol.authenticate(common::CAROL).await.expect("authenticates");
    carol.join_room(rid("chatty"), false).await.expect("joins");

    alice.chat("hello there").await.expect("chats");

    for (who, client) in [("alice", &alice), ("carol", &carol)] {
        eventually(&format!("{who} sees the chat line"), || async {
            client.take_messages().await.iter().any(|m| {
                matches!(m, Message::Chat { user: 100, content } if content == "hello there")
            })
        })
        .await;
    }

    // Chat requires a room.
    let dave = Client::connect(server.addr).await.expect("dave connects");
    dave.authenticate(common::DAVE).await.expect("authenticates");
    let err = dave.chat("into the void").await.expect_err("no room");
    assert!(matches!(err, cadenza_client::ClientError::Rejected(r) if r == "not-in-room"));

    server.stop().await;
}
