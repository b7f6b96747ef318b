//! Localization collaborator seam.
//!
//! Command failures are answered with reason keys; the catalog turns a key
//! into user-facing text for a given language. The catalog itself lives
//! outside this crate. The default implementation returns the key
//! unchanged, which is also what the protocol tests assert against.

/// Reason keys used in command responses.
///
/// Keys are stable identifiers, not prose; clients and the catalog both
/// match on them.
pub mod reason {
    /// Authenticate called on an already-authenticated session.
    pub const ALREADY_AUTHENTICATED: &str = "already-authenticated";
    /// Identity service rejected the token.
    pub const AUTHENTICATE_FAILED: &str = "authenticate-failed";
    /// The account is banned server-wide.
    pub const BANNED: &str = "banned";
    /// Federation ticket missing, already used, or expired.
    pub const FED_TICKET_INVALID: &str = "federation-ticket-invalid";
    /// Command requires authentication.
    pub const NOT_AUTHENTICATED: &str = "not-authenticated";
    /// Command requires room membership.
    pub const NOT_IN_ROOM: &str = "not-in-room";
    /// User is already in a room.
    pub const ALREADY_IN_ROOM: &str = "already-in-room";
    /// Requested room id is already registered.
    pub const ROOM_ID_TAKEN: &str = "create-id-occupied";
    /// No room with the requested id.
    pub const ROOM_NOT_FOUND: &str = "join-room-not-found";
    /// Room exists on a peer server; a federation hop is required.
    pub const ROOM_REMOTE: &str = "join-room-remote";
    /// Contest room and the user is not whitelisted.
    pub const NOT_WHITELISTED: &str = "join-contest-only";
    /// The room is locked.
    pub const ROOM_LOCKED: &str = "join-room-locked";
    /// The room is mid-game.
    pub const GAME_ONGOING: &str = "join-game-ongoing";
    /// Monitor join without monitor privilege.
    pub const CANT_MONITOR: &str = "join-cant-monitor";
    /// The room is full.
    pub const ROOM_FULL: &str = "join-room-full";
    /// The user is banned from this room.
    pub const ROOM_BANNED: &str = "join-banned";
    /// Host-only command from a non-host.
    pub const ONLY_HOST: &str = "only-host";
    /// Command not valid in the room's current state.
    pub const INVALID_STATE: &str = "invalid-state";
    /// Chart service could not resolve the chart.
    pub const CHART_NOT_FOUND: &str = "chart-not-found";
    /// Monitors cannot take part in play.
    pub const MONITOR_CANT_PLAY: &str = "monitor-cant-play";
    /// Start requires a selected chart.
    pub const NO_CHART_SELECTED: &str = "start-no-chart";
    /// Command class exceeded its rate budget.
    pub const RATE_LIMITED: &str = "rate-limited";
    /// Unexpected server fault.
    pub const INTERNAL_ERROR: &str = "internal-error";
}

/// Turns reason keys into user-facing text.
pub trait Catalog: Send + Sync + 'static {
    /// Localize `key` for `language`.
    fn localize(&self, language: &str, key: &str) -> String;
}

/// Pass-through catalog: the key is the message.
#[derive(Debug, Default, Clone, Copy)]
pub struct KeyCatalog;

impl Catalog for KeyCatalog {
    fn localize(&self, _language: &str, key: &str) -> String {
        key.to_owned()
    }
}
