//! Federation HTTP surface: the signed `prepare` endpoint and room gossip.
//!
//! Peers authenticate with HMAC-SHA256 of the raw request body, truncated
//! to 96 bits and hex-encoded in the `x-fed-hmac` header (24 hex chars).
//! The `prepare` endpoint alternatively accepts the compact binary packet,
//! which carries its own MAC trailer.

use std::sync::Arc;

use axum::{
    Router,
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode, header::CONTENT_TYPE},
    response::Json,
    routing::post,
};
use cadenza_proto::{CompactPacket, RoomId};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use super::{
    remote::{PeerServer, RemoteRoomCache, RemoteRoomEntry},
    ticket::TicketStore,
};

type HmacSha256 = Hmac<Sha256>;

/// Truncated MAC length carried in `x-fed-hmac`, in bytes.
const MAC_LEN: usize = 12;

/// Header carrying the request MAC.
pub const HMAC_HEADER: &str = "x-fed-hmac";

/// Body of a `prepare` call.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrepareRequest {
    /// Joining player's account id.
    pub player_id: i32,
    /// Joining player's display name.
    pub player_name: String,
    /// Room to join on the receiving server.
    pub target_room_id: String,
    /// Name of the preparing server.
    pub source_server: String,
    /// Whether the player joins as a monitor.
    #[serde(default)]
    pub monitor: bool,
}

/// Body of a `prepare` response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrepareResponse {
    /// Single-use ticket to present as `@<ticket>` at authentication.
    pub ticket: String,
}

/// One advertised room within a gossip sync.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomAdvert {
    /// Room id.
    pub room_id: String,
    /// Host display name.
    pub host_name: String,
    /// Current member count.
    pub player_count: usize,
    /// Member cap.
    pub max_users: usize,
    /// Coarse state label.
    pub state: String,
}

/// Body of a gossip sync.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncRequest {
    /// Advertising server's name.
    pub server_name: String,
    /// Advertising server's federation base URL.
    pub base_url: String,
    /// Its active rooms.
    pub rooms: Vec<RoomAdvert>,
}

/// Shared state behind the federation routes.
#[derive(Clone)]
pub struct FederationHttp {
    /// Shared federation secret.
    pub secret: Arc<str>,
    /// Ticket store of this server.
    pub tickets: Arc<TicketStore>,
    /// Remote room cache of this server.
    pub remote_rooms: Arc<RemoteRoomCache>,
}

/// Compute the 24-hex MAC of a body.
pub fn sign_body(secret: &str, body: &[u8]) -> String {
    let mut mac = mac_for(secret);
    mac.update(body);
    hex::encode(&mac.finalize().into_bytes()[..MAC_LEN])
}

fn mac_for(secret: &str) -> HmacSha256 {
    #[allow(clippy::expect_used)]
    HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC accepts keys of any length")
}

fn verify_body(secret: &str, body: &[u8], header_hex: &str) -> bool {
    let Ok(tag) = hex::decode(header_hex) else {
        return false;
    };
    if tag.len() != MAC_LEN {
        return false;
    }
    let mut mac = mac_for(secret);
    mac.update(body);
    mac.verify_truncated_left(&tag).is_ok()
}

/// Build the federation router.
pub fn router(state: FederationHttp) -> Router {
    Router::new()
        .route("/fed/prepare", post(prepare))
        .route("/fed/sync", post(sync))
        .with_state(state)
}

async fn prepare(
    State(state): State<FederationHttp>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<PrepareResponse>, StatusCode> {
    let now = std::time::Instant::now();

    let compact = headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ct| ct.starts_with("application/octet-stream"));

    let (player_id, player_name, room, source_server, monitor) = if compact {
        // The compact packet authenticates itself.
        let packet = CompactPacket::decode(&body, state.secret.as_bytes())
            .map_err(|_| StatusCode::UNAUTHORIZED)?;
        let name = format!("player-{}", packet.player_id);
        (packet.player_id as i32, name, packet.room_id, "peer".to_owned(), packet.monitor)
    } else {
        let tag =
            headers.get(HMAC_HEADER).and_then(|v| v.to_str().ok()).unwrap_or_default();
        if !verify_body(&state.secret, &body, tag) {
            return Err(StatusCode::UNAUTHORIZED);
        }
        let req: PrepareRequest =
            serde_json::from_slice(&body).map_err(|_| StatusCode::BAD_REQUEST)?;
        let room: RoomId =
            req.target_room_id.as_str().try_into().map_err(|_| StatusCode::BAD_REQUEST)?;
        (req.player_id, req.player_name, room, req.source_server, req.monitor)
    };

    let ticket =
        state.tickets.issue(player_id, player_name, room, source_server, monitor, now);
    tracing::info!(ticket = %ticket.ticket, player = player_id, "federation join prepared");
    Ok(Json(PrepareResponse { ticket: ticket.ticket }))
}

async fn sync(
    State(state): State<FederationHttp>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<StatusCode, StatusCode> {
    let tag = headers.get(HMAC_HEADER).and_then(|v| v.to_str().ok()).unwrap_or_default();
    if !verify_body(&state.secret, &body, tag) {
        return Err(StatusCode::UNAUTHORIZED);
    }
    let req: SyncRequest = serde_json::from_slice(&body).map_err(|_| StatusCode::BAD_REQUEST)?;

    let now = std::time::Instant::now();
    let peer = PeerServer { name: req.server_name, base_url: req.base_url };
    for advert in req.rooms {
        state.remote_rooms.upsert(RemoteRoomEntry {
            room_id: advert.room_id,
            peer: peer.clone(),
            host_name: advert.host_name,
            player_count: advert.player_count,
            max_users: advert.max_users,
            state_label: advert.state,
            last_seen: now,
        });
    }
    Ok(StatusCode::NO_CONTENT)
}

/// Call a peer's `prepare` endpoint, returning the issued ticket.
pub async fn prepare_on_peer(
    client: &reqwest::Client,
    peer_base: &str,
    secret: &str,
    request: &PrepareRequest,
) -> Result<String, String> {
    let body = serde_json::to_vec(request).map_err(|e| e.to_string())?;
    let tag = sign_body(secret, &body);

    let resp = client
        .post(format!("{peer_base}/fed/prepare"))
        .header(CONTENT_TYPE, "application/json")
        .header(HMAC_HEADER, tag)
        .body(body)
        .send()
        .await
        .map_err(|e| e.to_string())?;

    if !resp.status().is_success() {
        return Err(format!("peer returned {}", resp.status()));
    }
    let parsed: PrepareResponse = resp.json().await.map_err(|e| e.to_string())?;
    Ok(parsed.ticket)
}

/// Push our room adverts to a peer's `sync` endpoint.
pub async fn push_sync(
    client: &reqwest::Client,
    peer_base: &str,
    secret: &str,
    request: &SyncRequest,
) -> Result<(), String> {
    let body = serde_json::to_vec(request).map_err(|e| e.to_string())?;
    let tag = sign_body(secret, &body);

    let resp = client
        .post(format!("{peer_base}/fed/sync"))
        .header(CONTENT_TYPE, "application/json")
        .header(HMAC_HEADER, tag)
        .body(body)
        .send()
        .await
        .map_err(|e| e.to_string())?;

    if !resp.status().is_success() {
        return Err(format!("peer returned {}", resp.status()));
    }
    Ok(())
}
