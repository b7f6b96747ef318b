//! Peer registry and remote room cache.
//!
//! Peers gossip their active rooms; entries live for a bounded window after
//! the last refresh. A join for a room id unknown locally is matched
//! against this cache to produce a federation redirect.

use std::{
    collections::HashMap,
    sync::Mutex,
    time::{Duration, Instant},
};

/// A known peer server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerServer {
    /// Peer's advertised name.
    pub name: String,
    /// Base URL of the peer's federation HTTP surface.
    pub base_url: String,
}

/// A room advertised by a peer.
#[derive(Debug, Clone)]
pub struct RemoteRoomEntry {
    /// Room id on the peer.
    pub room_id: String,
    /// Hosting peer.
    pub peer: PeerServer,
    /// Display name of the room's host.
    pub host_name: String,
    /// Current member count.
    pub player_count: usize,
    /// Member cap.
    pub max_users: usize,
    /// Coarse state label ("select", "ready", "playing").
    pub state_label: String,
    /// Last gossip refresh.
    pub last_seen: Instant,
}

/// Cache of rooms hosted on peers, keyed by room id.
#[derive(Debug)]
pub struct RemoteRoomCache {
    ttl: Duration,
    inner: Mutex<HashMap<String, RemoteRoomEntry>>,
}

impl RemoteRoomCache {
    /// Cache evicting entries `ttl` after their last refresh.
    pub fn new(ttl: Duration) -> Self {
        Self { ttl, inner: Mutex::new(HashMap::new()) }
    }

    /// Insert or refresh an entry.
    pub fn upsert(&self, entry: RemoteRoomEntry) {
        #[allow(clippy::expect_used)]
        self.inner
            .lock()
            .expect("invariant: remote room cache mutex is never poisoned")
            .insert(entry.room_id.clone(), entry);
    }

    /// Look up a room, evicting it if stale.
    pub fn lookup(&self, room_id: &str, now: Instant) -> Option<RemoteRoomEntry> {
        #[allow(clippy::expect_used)]
        let mut inner =
            self.inner.lock().expect("invariant: remote room cache mutex is never poisoned");
        match inner.get(room_id) {
            Some(entry) if now.saturating_duration_since(entry.last_seen) <= self.ttl => {
                Some(entry.clone())
            },
            Some(_) => {
                inner.remove(room_id);
                None
            },
            None => None,
        }
    }

    /// Drop all stale entries.
    pub fn sweep(&self, now: Instant) {
        #[allow(clippy::expect_used)]
        self.inner
            .lock()
            .expect("invariant: remote room cache mutex is never poisoned")
            .retain(|_, e| now.saturating_duration_since(e.last_seen) <= self.ttl);
    }

    /// Drop everything (shutdown).
    pub fn clear(&self) {
        #[allow(clippy::expect_used)]
        self.inner
            .lock()
            .expect("invariant: remote room cache mutex is never poisoned")
            .clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(room: &str, now: Instant) -> RemoteRoomEntry {
        RemoteRoomEntry {
            room_id: room.to_owned(),
            peer: PeerServer { name: "peer".into(), base_url: "http://peer".into() },
            host_name: "host".into(),
            player_count: 2,
            max_users: 8,
            state_label: "select".into(),
            last_seen: now,
        }
    }

    #[test]
    fn lookup_within_ttl() {
        let cache = RemoteRoomCache::new(Duration::from_secs(60));
        let now = Instant::now();
        cache.upsert(entry("r1", now));

        assert!(cache.lookup("r1", now + Duration::from_secs(59)).is_some());
    }

    #[test]
    fn stale_entry_is_evicted_on_lookup() {
        let cache = RemoteRoomCache::new(Duration::from_secs(60));
        let now = Instant::now();
        cache.upsert(entry("r1", now));

        assert!(cache.lookup("r1", now + Duration::from_secs(61)).is_none());
        // Entry is gone, not merely hidden.
        assert!(cache.lookup("r1", now).is_none());
    }

    #[test]
    fn refresh_extends_lifetime() {
        let cache = RemoteRoomCache::new(Duration::from_secs(60));
        let now = Instant::now();
        cache.upsert(entry("r1", now));
        cache.upsert(entry("r1", now + Duration::from_secs(50)));

        assert!(cache.lookup("r1", now + Duration::from_secs(100)).is_some());
    }

    #[test]
    fn sweep_drops_stale() {
        let cache = RemoteRoomCache::new(Duration::from_secs(60));
        let now = Instant::now();
        cache.upsert(entry("old", now));
        cache.upsert(entry("new", now + Duration::from_secs(50)));

        cache.sweep(now + Duration::from_secs(70));
        assert!(cache.lookup("old", now + Duration::from_secs(70)).is_none());
        assert!(cache.lookup("new", now + Duration::from_secs(70)).is_some());
    }
}
