//! One-shot federation tickets.
//!
//! A ticket proves a cross-server join that the source server prepared over
//! the signed HTTP channel. Tickets are consumable exactly once within
//! their TTL; expiry is enforced lazily at lookup and by a periodic sweep.

use std::{
    collections::HashMap,
    sync::Mutex,
    time::{Duration, Instant},
};

use cadenza_proto::RoomId;

/// A prepared cross-server join.
#[derive(Debug, Clone)]
pub struct FederationTicket {
    /// Opaque 24-hex ticket string.
    pub ticket: String,
    /// Joining player's account id.
    pub player_id: i32,
    /// Joining player's display name.
    pub player_name: String,
    /// Room the player intends to join here.
    pub room: RoomId,
    /// Name of the server that prepared the join.
    pub source_server: String,
    /// Whether the player joins as a monitor.
    pub monitor: bool,
    /// Issue time.
    pub created_at: Instant,
    /// Hard expiry.
    pub expires_at: Instant,
}

/// Store of outstanding tickets.
#[derive(Debug)]
pub struct TicketStore {
    ttl: Duration,
    inner: Mutex<HashMap<String, FederationTicket>>,
}

impl TicketStore {
    /// Store issuing tickets valid for `ttl`.
    pub fn new(ttl: Duration) -> Self {
        Self { ttl, inner: Mutex::new(HashMap::new()) }
    }

    fn fresh_ticket_id() -> String {
        let mut raw = [0u8; 12];
        #[allow(clippy::expect_used)]
        getrandom::fill(&mut raw).expect("invariant: OS RNG failure is unrecoverable");
        hex::encode(raw)
    }

    /// Issue a ticket for a prepared join.
    pub fn issue(
        &self,
        player_id: i32,
        player_name: String,
        room: RoomId,
        source_server: String,
        monitor: bool,
        now: Instant,
    ) -> FederationTicket {
        let ticket = FederationTicket {
            ticket: Self::fresh_ticket_id(),
            player_id,
            player_name,
            room,
            source_server,
            monitor,
            created_at: now,
            expires_at: now + self.ttl,
        };
        #[allow(clippy::expect_used)]
        self.inner
            .lock()
            .expect("invariant: ticket store mutex is never poisoned")
            .insert(ticket.ticket.clone(), ticket.clone());
        ticket
    }

    /// Consume a ticket: removed on first use, `None` if absent or
    /// expired.
    pub fn consume(&self, ticket: &str, now: Instant) -> Option<FederationTicket> {
        #[allow(clippy::expect_used)]
        let mut inner =
            self.inner.lock().expect("invariant: ticket store mutex is never poisoned");
        let entry = inner.remove(ticket)?;
        (now < entry.expires_at).then_some(entry)
    }

    /// Drop expired tickets.
    pub fn sweep(&self, now: Instant) {
        #[allow(clippy::expect_used)]
        self.inner
            .lock()
            .expect("invariant: ticket store mutex is never poisoned")
            .retain(|_, t| now < t.expires_at);
    }

    /// Outstanding ticket count.
    pub fn len(&self) -> usize {
        #[allow(clippy::expect_used)]
        self.inner.lock().expect("invariant: ticket store mutex is never poisoned").len()
    }

    /// Whether no tickets are outstanding.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop everything (shutdown).
    pub fn clear(&self) {
        #[allow(clippy::expect_used)]
        self.inner.lock().expect("invariant: ticket store mutex is never poisoned").clear();
    }
}
