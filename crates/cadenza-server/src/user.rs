//! Authenticated player identity.

use std::time::Instant;

use cadenza_proto::{RoomId, UserInfo};
use uuid::Uuid;

/// A player known to this server.
///
/// Lives while a session is bound or a dangle grace period is pending.
/// Session and room references are ids into the server registries; the
/// registries own the actual objects.
#[derive(Debug, Clone)]
pub struct User {
    /// External account id.
    pub id: i32,
    /// Display name.
    pub name: String,
    /// Preferred language for localized reasons.
    pub language: String,
    /// Whether the user is currently spectating their room as a monitor.
    pub monitor: bool,
    /// Monitor privilege granted by a federation ticket.
    pub monitor_grant: bool,
    /// Currently bound session, if any.
    pub session: Option<Uuid>,
    /// Current room, if any.
    pub room: Option<RoomId>,
    /// Token of the latest disconnect; a reconnect invalidates it.
    pub dangle_token: Option<u64>,
    /// When the session disappeared.
    pub dangle_since: Option<Instant>,
    /// Upper bound of timestamps this user reported in the current round.
    pub last_game_time: f32,
}

impl User {
    /// Fresh identity bound to `session`.
    pub fn new(id: i32, name: String, language: String, session: Uuid) -> Self {
        Self {
            id,
            name,
            language,
            monitor: false,
            monitor_grant: false,
            session: Some(session),
            room: None,
            dangle_token: None,
            dangle_since: None,
            last_game_time: 0.0,
        }
    }

    /// Wire identity.
    pub fn info(&self) -> UserInfo {
        UserInfo { id: self.id, name: self.name.clone(), monitor: self.monitor }
    }

    /// Whether the user currently has no session and waits for a rebind.
    pub fn is_dangling(&self) -> bool {
        self.session.is_none()
    }
}
