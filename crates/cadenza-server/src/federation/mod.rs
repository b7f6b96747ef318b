//! Cross-server federation: tickets, peers, remote rooms, and the signed
//! HTTP channel.
//!
//! A player on server A joins a room hosted on server B without learning
//! B's address: A calls B's signed `prepare` endpoint, B issues a one-shot
//! ticket, and A's proxy authenticates to B with `@<ticket>`. Peers learn
//! about each other's rooms through periodic signed gossip.

pub mod http;
pub mod remote;
pub mod ticket;

use std::{sync::Arc, time::Instant};

pub use http::{FederationHttp, PrepareRequest, RoomAdvert, SyncRequest};
pub use remote::{PeerServer, RemoteRoomCache, RemoteRoomEntry};
pub use ticket::{FederationTicket, TicketStore};

use crate::config::ServerConfig;

/// Federation subsystem owned by the server state.
pub struct Federation {
    secret: Option<Arc<str>>,
    server_name: String,
    /// Outstanding one-shot tickets.
    pub tickets: Arc<TicketStore>,
    /// Rooms gossiped by peers.
    pub remote_rooms: Arc<RemoteRoomCache>,
    /// Configured peers.
    pub peers: Vec<PeerServer>,
    client: reqwest::Client,
}

impl Federation {
    /// Build from config; without a shared secret the subsystem is inert.
    pub fn new(config: &ServerConfig) -> Self {
        let peers = config
            .fed_peers
            .iter()
            .map(|base| PeerServer { name: base.clone(), base_url: base.clone() })
            .collect();
        Self {
            secret: config.fed_secret.as_deref().map(Arc::from),
            server_name: config.server_name.clone(),
            tickets: Arc::new(TicketStore::new(config.timing.ticket_ttl)),
            remote_rooms: Arc::new(RemoteRoomCache::new(config.timing.remote_room_ttl)),
            peers,
            client: reqwest::Client::new(),
        }
    }

    /// Whether cross-server joins are configured.
    pub fn enabled(&self) -> bool {
        self.secret.is_some()
    }

    /// Name this instance advertises.
    pub fn server_name(&self) -> &str {
        &self.server_name
    }

    /// Router for the HTTP surface, if federation is configured.
    pub fn router(&self) -> Option<axum::Router> {
        let secret = self.secret.clone()?;
        Some(http::router(FederationHttp {
            secret,
            tickets: Arc::clone(&self.tickets),
            remote_rooms: Arc::clone(&self.remote_rooms),
        }))
    }

    /// Ask `peer` to prepare a join, returning the ticket it issued.
    pub async fn prepare_on_peer(
        &self,
        peer: &PeerServer,
        request: &PrepareRequest,
    ) -> Result<String, String> {
        let secret = self.secret.as_deref().ok_or("federation disabled")?;
        http::prepare_on_peer(&self.client, &peer.base_url, secret, request).await
    }

    /// Push our room adverts to every configured peer.
    pub async fn gossip(&self, rooms: Vec<RoomAdvert>, own_base_url: String) {
        let Some(secret) = self.secret.as_deref() else {
            return;
        };
        let request = SyncRequest {
            server_name: self.server_name.clone(),
            base_url: own_base_url,
            rooms,
        };
        for peer in &self.peers {
            if let Err(err) = http::push_sync(&self.client, &peer.base_url, secret, &request).await
            {
                tracing::debug!(peer = %peer.base_url, "gossip push failed: {err}");
            }
        }
    }

    /// Periodic maintenance.
    pub fn sweep(&self, now: Instant) {
        self.tickets.sweep(now);
        self.remote_rooms.sweep(now);
    }

    /// Drop all transient federation state (shutdown).
    pub fn clear(&self) {
        self.tickets.clear();
        self.remote_rooms.clear();
    }
}

impl std::fmt::Debug for Federation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Federation")
            .field("enabled", &self.enabled())
            .field("peers", &self.peers.len())
            .field("tickets", &self.tickets.len())
            .finish()
    }
}
