//! Federation ticket flow over the signed HTTP surface.

mod common;

use std::time::Duration;

use cadenza_client::{Client, ClientError};
use cadenza_proto::RoomId;
use cadenza_server::federation::{PrepareRequest, http};
use common::{ALICE, start_server, test_config};

const SECRET: &str = "shared-federation-secret";

fn rid(s: &str) -> RoomId {
    s.try_into().expect("valid room id")
}

fn fed_config() -> cadenza_server::ServerConfig {
    let mut config = test_config();
    config.fed_secret = Some(SECRET.to_owned());
    config.http_port = Some(0);
    config
}

fn prepare_request(room: &str) -> PrepareRequest {
    PrepareRequest {
        player_id: 777,
        player_name: "remote-player".to_owned(),
        target_room_id: room.to_owned(),
        source_server: "server-a".to_owned(),
        monitor: false,
    }
}

#[tokio::test]
async fn prepared_ticket_is_single_use() {
    let server = start_server(fed_config()).await;
    let base = format!("http://{}", server.fed_http_addr.expect("federation http"));

    // The target room exists on this server.
    let alice = Client::connect(server.addr).await.expect("alice connects");
    alice.authenticate(ALICE).await.expect("authenticates");
    alice.create_room(rid("room1")).await.expect("creates");

    let http_client = reqwest::Client::new();
    let ticket = http::prepare_on_peer(&http_client, &base, SECRET, &prepare_request("room1"))
        .await
        .expect("prepare succeeds");
    assert_eq!(ticket.len(), 24);

    // First use: authenticates and may join the target room.
    let hopper = Client::connect(server.addr).await.expect("hopper connects");
    hopper.authenticate(&format!("@{ticket}")).await.expect("ticket authenticates");
    assert_eq!(hopper.me().await.expect("identity").id, 777);
    hopper.join_room(rid("room1"), false).await.expect("joins target room");

    // Second use: rejected.
    let replayer = Client::connect(server.addr).await.expect("replayer connects");
    let err = replayer.authenticate(&format!("@{ticket}")).await.expect_err("single use");
    assert!(
        matches!(err, ClientError::Rejected(ref r) if r == "federation-ticket-invalid"),
        "got {err:?}"
    );

    server.stop().await;
}

#[tokio::test]
async fn expired_ticket_is_rejected() {
    let mut config = fed_config();
    config.timing.ticket_ttl = Duration::from_millis(200);
    let server = start_server(config).await;
    let base = format!("http://{}", server.fed_http_addr.expect("federation http"));

    let http_client = reqwest::Client::new();
    let ticket = http::prepare_on_peer(&http_client, &base, SECRET, &prepare_request("room1"))
        .await
        .expect("prepare succeeds");

    tokio::time::sleep(Duration::from_millis(350)).await;

    let late = Client::connect(server.addr).await.expect("late connects");
    let err = late.authenticate(&format!("@{ticket}")).await.expect_err("expired");
    assert!(matches!(err, ClientError::Rejected(ref r) if r == "federation-ticket-invalid"));

    server.stop().await;
}

#[tokio::test]
async fn bad_hmac_is_rejected() {
    let server = start_server(fed_config()).await;
    let base = format!("http://{}", server.fed_http_addr.expect("federation http"));

    let http_client = reqwest::Client::new();
    let err = http::prepare_on_peer(&http_client, &base, "wrong-secret", &prepare_request("r"))
        .await
        .expect_err("must be unauthorized");
    assert!(err.contains("401"), "got {err}");

    server.stop().await;
}

#[tokio::test]
async fn monitor_grant_travels_with_the_ticket() {
    let server = start_server(fed_config()).await;
    let base = format!("http://{}", server.fed_http_addr.expect("federation http"));

    let alice = Client::connect(server.addr).await.expect("alice connects");
    alice.authenticate(ALICE).await.expect("authenticates");
    alice.create_room(rid("watched")).await.expect("creates");

    let mut request = prepare_request("watched");
    request.monitor = true;
    let http_client = reqwest::Client::new();
    let ticket = http::prepare_on_peer(&http_client, &base, SECRET, &request)
        .await
        .expect("prepare succeeds");

    // 777 is in nobody's monitor list, but the ticket grants it.
    let watcher = Client::connect(server.addr).await.expect("watcher connects");
    watcher.authenticate(&format!("@{ticket}")).await.expect("authenticates");
    watcher.join_room(rid("watched"), true).await.expect("joins as monitor");
    assert!(watcher.room().await.expect("room").live);

    server.stop().await;
}

#[tokio::test]
async fn gossip_populates_the_remote_room_cache() {
    // Two servers sharing a secret; B learns A's rooms via sync.
    let server_b = start_server(fed_config()).await;
    let base_b = format!("http://{}", server_b.fed_http_addr.expect("federation http"));

    let sync = cadenza_server::federation::SyncRequest {
        server_name: "server-a".to_owned(),
        base_url: "http://a.example".to_owned(),
        rooms: vec![cadenza_server::federation::RoomAdvert {
            room_id: "over-there".to_owned(),
            host_name: "alice".to_owned(),
            player_count: 3,
            max_users: 8,
            state: "select".to_owned(),
        }],
    };
    let http_client = reqwest::Client::new();
    http::push_sync(&http_client, &base_b, SECRET, &sync).await.expect("sync accepted");

    // A join for the remote id reports the federation redirect reason.
    let carol = Client::connect(server_b.addr).await.expect("carol connects");
    carol.authenticate(common::CAROL).await.expect("authenticates");
    let err = carol.join_room(rid("over-there"), false).await.expect_err("remote");
    assert!(matches!(err, ClientError::Rejected(ref r) if r == "join-room-remote"));

    server_b.stop().await;
}
