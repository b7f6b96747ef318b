//! Process-wide registry and the global serialization point.
//!
//! `ServerState` owns the session/user/room maps and the ban sets. Every
//! room-mutating operation runs under one process-wide fair mutex (tokio's
//! `Mutex` queues waiters FIFO), so concurrent commands observe a total
//! order and broadcast that same order to every recipient. Outbound
//! commands are *enqueued* to each recipient's send queue while the lock is
//! held; enqueueing never touches the network (the per-session writer
//! tasks do), which is what makes the broadcast order identical on all
//! recipients.
//!
//! Nothing outside this module inserts into or removes from the registries.

use std::{
    collections::{HashMap, HashSet},
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Instant,
};

use cadenza_proto::{
    ClientCommand, ClientRoomState, JoinRoomResponse, JudgeEvent, Message, RoomId, ServerCommand,
    TouchFrame, UserInfo, Varchar,
};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::{
    config::ServerConfig,
    federation::{Federation, RoomAdvert},
    l10n::{Catalog, reason},
    persist::AdminData,
    replay::{GameEndRecord, PlayRecord, ReplayRecorder},
    room::{Chart, Room, RoomEvent},
    services::{ChartService, IdentityService, ServiceError},
    session::Session,
    user::User,
};

/// Join/leave observer.
pub type MembershipHook = Box<dyn Fn(&RoomId, i32) + Send + Sync>;
/// Settled-round observer.
pub type GameEndHook = Box<dyn Fn(&GameEndRecord) + Send + Sync>;
/// Pre-dispatch observer for room-mutating commands.
pub type CommandHook = Box<dyn Fn(i32, &ClientCommand) + Send + Sync>;

/// Closed plugin surface, invoked synchronously under the mutex.
///
/// Hooks observe; they cannot veto, and they must not block on I/O.
#[derive(Default)]
pub struct Hooks {
    /// After a user joins a room.
    pub on_join: Vec<MembershipHook>,
    /// After a user leaves a room.
    pub on_leave: Vec<MembershipHook>,
    /// After a round settles with at least one play.
    pub on_game_end: Vec<GameEndHook>,
    /// Before a room-mutating command executes.
    pub before_command: Vec<CommandHook>,
}

impl std::fmt::Debug for Hooks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Hooks")
            .field("on_join", &self.on_join.len())
            .field("on_leave", &self.on_leave.len())
            .field("on_game_end", &self.on_game_end.len())
            .field("before_command", &self.before_command.len())
            .finish()
    }
}

/// Everything guarded by the global mutex.
#[derive(Debug, Default)]
struct StateInner {
    sessions: HashMap<Uuid, Arc<Session>>,
    users: HashMap<i32, User>,
    rooms: HashMap<RoomId, Room>,
    banned_users: HashSet<i32>,
    banned_room_users: HashMap<String, HashSet<i32>>,
    contest_whitelists: HashMap<String, HashSet<i32>>,
    temp_admin_tokens: HashSet<String>,
}

/// Process-wide server state.
pub struct ServerState {
    config: ServerConfig,
    identity: Arc<dyn IdentityService>,
    charts: Arc<dyn ChartService>,
    catalog: Arc<dyn Catalog>,
    replay: Arc<dyn ReplayRecorder>,
    hooks: Hooks,
    federation: Federation,
    dangle_counter: AtomicU64,
    inner: Mutex<StateInner>,
}

impl std::fmt::Debug for ServerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerState").field("config", &self.config).finish()
    }
}

fn deliver(
    users: &HashMap<i32, User>,
    sessions: &HashMap<Uuid, Arc<Session>>,
    uid: i32,
    cmd: &ServerCommand,
) {
    let Some(user) = users.get(&uid) else {
        return;
    };
    let Some(sid) = user.session else {
        return;
    };
    if let Some(session) = sessions.get(&sid) {
        session.enqueue(cmd);
    }
}

impl ServerState {
    /// Build the state, loading persisted admin data.
    pub fn new(
        config: ServerConfig,
        identity: Arc<dyn IdentityService>,
        charts: Arc<dyn ChartService>,
        catalog: Arc<dyn Catalog>,
        replay: Arc<dyn ReplayRecorder>,
        hooks: Hooks,
    ) -> Result<Self, crate::error::ServerError> {
        let admin = AdminData::load(&config.admin_data_path)?;
        let inner = StateInner {
            banned_users: admin.banned_users.into_iter().collect(),
            banned_room_users: admin
                .banned_room_users
                .into_iter()
                .map(|(room, ids)| (room, ids.into_iter().collect()))
                .collect(),
            ..StateInner::default()
        };
        let federation = Federation::new(&config);
        Ok(Self {
            config,
            identity,
            charts,
            catalog,
            replay,
            hooks,
            federation,
            dangle_counter: AtomicU64::new(1),
            inner: Mutex::new(inner),
        })
    }

    /// Server configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Federation subsystem.
    pub fn federation(&self) -> &Federation {
        &self.federation
    }

    pub(crate) fn localize(&self, session: &Session, key: &str) -> String {
        self.catalog.localize(&session.language(), key)
    }

    fn run_before_command(&self, uid: i32, cmd: &ClientCommand) {
        for hook in &self.hooks.before_command {
            hook(uid, cmd);
        }
    }

    /// Fan room events out to `members`, run game-end hooks, and collect
    /// settled records for the replay recorder.
    fn fan_out(
        &self,
        users: &HashMap<i32, User>,
        sessions: &HashMap<Uuid, Arc<Session>>,
        members: &[i32],
        events: Vec<RoomEvent>,
    ) -> Vec<GameEndRecord> {
        let mut settled = Vec::new();
        for event in events {
            match event {
                RoomEvent::Broadcast(msg) => {
                    let cmd = ServerCommand::Message(msg);
                    for &m in members {
                        deliver(users, sessions, m, &cmd);
                    }
                },
                RoomEvent::State(state) => {
                    let cmd = ServerCommand::ChangeState(state);
                    for &m in members {
                        deliver(users, sessions, m, &cmd);
                    }
                },
                RoomEvent::HostChanged(uid) => {
                    deliver(users, sessions, uid, &ServerCommand::ChangeHost(true));
                },
                RoomEvent::Settled(record) => {
                    for hook in &self.hooks.on_game_end {
                        hook(&record);
                    }
                    settled.push(record);
                },
            }
        }
        settled
    }

    fn emit_replays(&self, settled: Vec<GameEndRecord>) {
        for record in settled {
            let recorder = Arc::clone(&self.replay);
            tokio::task::spawn_blocking(move || recorder.on_game_end(&record));
        }
    }

    /// Remove `uid` from its room (if any), fanning out leave events and
    /// deleting the room when it empties.
    fn detach_from_room(
        &self,
        inner: &mut StateInner,
        uid: i32,
        now: Instant,
    ) -> Vec<GameEndRecord> {
        let Some(user) = inner.users.get_mut(&uid) else {
            return Vec::new();
        };
        let Some(room_id) = user.room.take() else {
            return Vec::new();
        };
        user.monitor = false;
        let name = user.name.clone();

        let Some(room) = inner.rooms.get_mut(&room_id) else {
            return Vec::new();
        };
        let events = room.leave(uid, &name, now);
        let members: Vec<i32> = room.members().collect();
        let delete = room.is_empty() && !room.is_remote();

        for hook in &self.hooks.on_leave {
            hook(&room_id, uid);
        }
        let settled = self.fan_out(&inner.users, &inner.sessions, &members, events);

        if delete {
            inner.rooms.remove(&room_id);
            tracing::info!(room = %room_id, "room deleted");
        }
        settled
    }

    // ---- session lifecycle ----------------------------------------------

    /// Track a freshly accepted, stream-bound session.
    pub async fn register_session(&self, session: Arc<Session>) {
        let mut inner = self.inner.lock().await;
        inner.sessions.insert(session.id(), session);
    }

    /// Sessions currently tracked.
    pub async fn session_count(&self) -> usize {
        self.inner.lock().await.sessions.len()
    }

    /// Rooms currently registered.
    pub async fn room_count(&self) -> usize {
        self.inner.lock().await.rooms.len()
    }

    /// Tear a session down and mark its user dangling.
    ///
    /// Idempotent: both the peer-close path and the inactivity sweeper land
    /// here.
    pub async fn close_session(&self, session: &Session, why: &str) {
        if !session.begin_close() {
            return;
        }
        tracing::info!(session = %session.id(), user = ?session.user_id(), "session closed: {why}");

        {
            let mut inner = self.inner.lock().await;
            inner.sessions.remove(&session.id());
            if let Some(uid) = session.user_id() {
                if let Some(user) = inner.users.get_mut(&uid) {
                    if user.session == Some(session.id()) {
                        user.session = None;
                        user.dangle_token =
                            Some(self.dangle_counter.fetch_add(1, Ordering::Relaxed));
                        user.dangle_since = Some(Instant::now());
                        tracing::debug!(user = uid, "user dangling");
                    }
                }
            }
        }

        // Last: this may run on the session's own read task, and aborting
        // it cancels the task at its next await point. Everything past
        // here is synchronous.
        session.close_stream();
    }

    /// Periodic maintenance: close idle sessions, sweep expired dangles,
    /// expire federation state.
    pub async fn sweep(&self, now: Instant) {
        let idle: Vec<Arc<Session>> = {
            let inner = self.inner.lock().await;
            inner
                .sessions
                .values()
                .filter(|s| {
                    now.saturating_duration_since(s.last_activity())
                        > self.config.timing.disconnect_timeout
                })
                .cloned()
                .collect()
        };
        for session in idle {
            self.close_session(&session, "inactivity timeout").await;
        }

        let settled = {
            let mut inner = self.inner.lock().await;
            let expired: Vec<i32> = inner
                .users
                .values()
                .filter(|u| {
                    u.is_dangling()
                        && u.dangle_since.is_some_and(|since| {
                            now.saturating_duration_since(since) > self.config.timing.dangle_grace
                        })
                })
                .map(|u| u.id)
                .collect();

            let mut settled = Vec::new();
            for uid in expired {
                tracing::info!(user = uid, "dangling user swept");
                settled.extend(self.detach_from_room(&mut inner, uid, now));
                inner.users.remove(&uid);
            }
            settled
        };
        self.emit_replays(settled);

        self.federation.sweep(now);
    }

    /// Graceful shutdown: drain rooms, close every session, clear
    /// federation state, persist admin data.
    pub async fn shutdown(&self) {
        let (sessions, snapshot) = {
            let mut inner = self.inner.lock().await;
            inner.rooms.clear();
            inner.users.clear();
            let sessions: Vec<Arc<Session>> = inner.sessions.drain().map(|(_, s)| s).collect();
            let snapshot = AdminData::snapshot(&inner.banned_users, &inner.banned_room_users);
            (sessions, snapshot)
        };
        for session in sessions {
            session.begin_close();
            session.close_stream();
        }
        self.federation.clear();
        self.persist_admin(snapshot).await;
        tracing::info!("server state drained");
    }

    async fn persist_admin(&self, snapshot: AdminData) {
        let path = self.config.admin_data_path.clone();
        let result = tokio::task::spawn_blocking(move || snapshot.save(&path)).await;
        match result {
            Ok(Ok(())) => {},
            Ok(Err(err)) => tracing::error!("admin data write failed: {err}"),
            Err(err) => tracing::error!("admin data writer panicked: {err}"),
        }
    }

    // ---- authentication --------------------------------------------------

    /// Resolve a token (identity service, or ticket store for `@`-prefixed
    /// federation tokens) and bind or rebind the user.
    pub async fn authenticate(&self, session: &Session, token: &Varchar<32>) {
        if session.user_id().is_some() {
            let err = self.localize(session, reason::ALREADY_AUTHENTICATED);
            session.enqueue(&ServerCommand::Authenticate(Err(err)));
            return;
        }

        let resolved = if let Some(ticket) = token.as_str().strip_prefix('@') {
            match self.federation.tickets.consume(ticket, Instant::now()) {
                Some(ticket) => Ok((ticket.player_id, ticket.player_name, "en".to_owned(), true)),
                None => Err(reason::FED_TICKET_INVALID),
            }
        } else {
            match self.identity.me(token.as_str()).await {
                Ok(profile) => Ok((profile.id, profile.name, profile.language, false)),
                Err(ServiceError::Unauthorized) => Err(reason::AUTHENTICATE_FAILED),
                Err(err) => {
                    tracing::error!("identity service failure: {err}");
                    Err(reason::INTERNAL_ERROR)
                },
            }
        };

        let (uid, name, language, federated) = match resolved {
            Ok(parts) => parts,
            Err(key) => {
                let err = self.localize(session, key);
                session.enqueue(&ServerCommand::Authenticate(Err(err)));
                return;
            },
        };

        let mut inner = self.inner.lock().await;
        // Reborrow so users/sessions can be borrowed disjointly below.
        let inner = &mut *inner;
        if inner.banned_users.contains(&uid) {
            let err = self.localize(session, reason::BANNED);
            session.enqueue(&ServerCommand::Authenticate(Err(err)));
            return;
        }

        match inner.users.get_mut(&uid) {
            Some(user) => {
                // Rebind, taking over from a live session if one remains.
                if let Some(old_sid) = user.session.replace(session.id()) {
                    if old_sid != session.id() {
                        if let Some(old) = inner.sessions.remove(&old_sid) {
                            old.begin_close();
                            old.close_stream();
                            tracing::info!(user = uid, "session taken over");
                        }
                    }
                }
                user.dangle_token = None;
                user.dangle_since = None;
                user.name = name;
                user.language = language;
                user.monitor_grant |= federated;
            },
            None => {
                let mut user = User::new(uid, name, language, session.id());
                user.monitor_grant = federated;
                inner.users.insert(uid, user);
            },
        }

        // Borrow immutably for the snapshot.
        let user = &inner.users[&uid];
        session.bind_user(uid, user.language.clone());
        let info = user.info();
        let snapshot = user
            .room
            .as_ref()
            .and_then(|rid| inner.rooms.get(rid))
            .map(|room| room_snapshot(&inner.users, user, room));

        tracing::info!(user = uid, session = %session.id(), federated, "authenticated");
        session.enqueue(&ServerCommand::Authenticate(Ok((info, snapshot))));
    }

    // ---- traffic ---------------------------------------------------------

    /// Chat to the current room (sender included).
    pub async fn chat(&self, session: &Session, message: Varchar<200>) {
        let inner = self.inner.lock().await;
        let Some(uid) = session.user_id() else {
            let err = self.localize(session, reason::NOT_AUTHENTICATED);
            session.enqueue(&ServerCommand::Chat(Err(err)));
            return;
        };
        let Some(members) = inner
            .users
            .get(&uid)
            .and_then(|u| u.room.as_ref())
            .and_then(|rid| inner.rooms.get(rid))
            .map(|room| room.members().collect::<Vec<_>>())
        else {
            let err = self.localize(session, reason::NOT_IN_ROOM);
            session.enqueue(&ServerCommand::Chat(Err(err)));
            return;
        };

        session.enqueue(&ServerCommand::Chat(Ok(())));
        let cmd = ServerCommand::Message(Message::Chat {
            user: uid,
            content: message.into_inner(),
        });
        for m in members {
            deliver(&inner.users, &inner.sessions, m, &cmd);
        }
    }

    /// Forward a touch batch to everyone else in the room.
    ///
    /// Snapshot under the mutex, sends outside it. Violations (not playing,
    /// monitor, no room) are dropped silently; traffic has no paired
    /// response.
    pub async fn forward_touches(&self, session: &Session, frames: Arc<Vec<TouchFrame>>) {
        let recipients = {
            let mut inner = self.inner.lock().await;
            let max_time = frames.iter().map(|f| f.time).fold(f32::MIN, f32::max);
            self.traffic_recipients(&mut inner, session, max_time)
        };
        let Some((player, recipients)) = recipients else {
            return;
        };
        let cmd = ServerCommand::Touches { player, frames };
        for session in recipients {
            session.enqueue(&cmd);
        }
    }

    /// Forward a judgement batch to everyone else in the room.
    pub async fn forward_judges(&self, session: &Session, judges: Arc<Vec<JudgeEvent>>) {
        let recipients = {
            let mut inner = self.inner.lock().await;
            let max_time = judges.iter().map(|j| j.time).fold(f32::MIN, f32::max);
            self.traffic_recipients(&mut inner, session, max_time)
        };
        let Some((player, recipients)) = recipients else {
            return;
        };
        let cmd = ServerCommand::Judges { player, judges };
        for session in recipients {
            session.enqueue(&cmd);
        }
    }

    fn traffic_recipients(
        &self,
        inner: &mut StateInner,
        session: &Session,
        max_time: f32,
    ) -> Option<(i32, Vec<Arc<Session>>)> {
        let uid = session.user_id()?;
        let room_id = inner.users.get(&uid)?.room.clone()?;
        let room = inner.rooms.get_mut(&room_id)?;
        if !room.may_send_traffic(uid) {
            tracing::debug!(user = uid, "traffic outside play dropped");
            return None;
        }
        if max_time.is_finite() {
            room.note_game_time(max_time);
            if let Some(user) = inner.users.get_mut(&uid) {
                if max_time > user.last_game_time {
                    user.last_game_time = max_time;
                }
            }
        }

        let room = inner.rooms.get(&room_id)?;
        let recipients = room
            .members()
            .filter(|&m| m != uid)
            .filter_map(|m| inner.users.get(&m))
            .filter_map(|u| u.session)
            .filter_map(|sid| inner.sessions.get(&sid))
            .cloned()
            .collect();
        Some((uid, recipients))
    }

    // ---- room operations -------------------------------------------------

    /// Create a room and become its host.
    pub async fn create_room(&self, session: &Session, id: RoomId) {
        let respond = |key: &str| {
            let err = self.localize(session, key);
            session.enqueue(&ServerCommand::CreateRoom(Err(err)));
        };

        let mut inner = self.inner.lock().await;
        let Some(uid) = session.user_id() else {
            respond(reason::NOT_AUTHENTICATED);
            return;
        };
        self.run_before_command(uid, &ClientCommand::CreateRoom { id: id.clone() });
        match inner.users.get(&uid) {
            None => {
                respond(reason::NOT_AUTHENTICATED);
                return;
            },
            Some(user) if user.room.is_some() => {
                respond(reason::ALREADY_IN_ROOM);
                return;
            },
            Some(_) => {},
        }
        if inner.rooms.contains_key(&id) {
            respond(reason::ROOM_ID_TAKEN);
            return;
        }

        if let Some(user) = inner.users.get_mut(&uid) {
            user.room = Some(id.clone());
        }
        let mut room =
            Room::new(id.clone(), uid, self.config.room_max_users, self.config.replay_enabled);
        if let Some(whitelist) = inner.contest_whitelists.get(id.as_str()) {
            room.set_whitelist(Some(whitelist.clone()));
        }
        inner.rooms.insert(id.clone(), room);
        for hook in &self.hooks.on_join {
            hook(&id, uid);
        }

        tracing::info!(room = %id, host = uid, "room created");
        session.enqueue(&ServerCommand::CreateRoom(Ok(())));
        session.enqueue(&ServerCommand::Message(Message::CreateRoom { user: uid }));
    }

    /// Join an existing room, as player or monitor.
    pub async fn join_room(&self, session: &Session, id: RoomId, monitor: bool) {
        let respond = |key: &str| {
            let err = self.localize(session, key);
            session.enqueue(&ServerCommand::JoinRoom(Err(err)));
        };

        let mut inner = self.inner.lock().await;
        let Some(uid) = session.user_id() else {
            respond(reason::NOT_AUTHENTICATED);
            return;
        };
        self.run_before_command(uid, &ClientCommand::JoinRoom { id: id.clone(), monitor });
        let Some(user) = inner.users.get(&uid) else {
            respond(reason::NOT_AUTHENTICATED);
            return;
        };
        if user.room.is_some() {
            respond(reason::ALREADY_IN_ROOM);
            return;
        }
        let may_monitor = self.config.monitors.contains(&uid) || user.monitor_grant;

        let Some(room) = inner.rooms.get(&id) else {
            // Unknown locally: a peer may host it.
            let key = if self.federation.remote_rooms.lookup(id.as_str(), Instant::now()).is_some()
            {
                reason::ROOM_REMOTE
            } else {
                reason::ROOM_NOT_FOUND
            };
            respond(key);
            return;
        };
        if inner.banned_room_users.get(id.as_str()).is_some_and(|b| b.contains(&uid)) {
            respond(reason::ROOM_BANNED);
            return;
        }
        if let Err(key) = room.validate_join(uid, monitor, may_monitor) {
            respond(key);
            return;
        }

        // Commit.
        let name = inner.users[&uid].name.clone();
        let joiner_info = UserInfo { id: uid, name: name.clone(), monitor };
        let others: Vec<i32> = inner.rooms[&id].members().collect();

        if let Some(room) = inner.rooms.get_mut(&id) {
            room.add_member(uid, monitor);
        }
        if let Some(user) = inner.users.get_mut(&uid) {
            user.room = Some(id.clone());
            user.monitor = monitor;
        }
        for hook in &self.hooks.on_join {
            hook(&id, uid);
        }

        let room = &inner.rooms[&id];
        let response = JoinRoomResponse {
            state: room.wire_state(),
            users: room
                .members()
                .filter_map(|m| inner.users.get(&m))
                .map(User::info)
                .collect(),
            live: room.live(),
        };

        tracing::info!(room = %id, user = uid, monitor, "user joined");
        session.enqueue(&ServerCommand::JoinRoom(Ok(response)));
        let join_msg = ServerCommand::Message(Message::JoinRoom { user: uid, name });
        let on_join = ServerCommand::OnJoinRoom(joiner_info);
        for m in others {
            deliver(&inner.users, &inner.sessions, m, &join_msg);
            deliver(&inner.users, &inner.sessions, m, &on_join);
        }
    }

    /// Leave the current room.
    pub async fn leave_room(&self, session: &Session) {
        let settled = {
            let mut inner = self.inner.lock().await;
            let Some(uid) = session.user_id() else {
                let err = self.localize(session, reason::NOT_AUTHENTICATED);
                session.enqueue(&ServerCommand::LeaveRoom(Err(err)));
                return;
            };
            self.run_before_command(uid, &ClientCommand::LeaveRoom);
            if inner.users.get(&uid).is_none_or(|u| u.room.is_none()) {
                let err = self.localize(session, reason::NOT_IN_ROOM);
                session.enqueue(&ServerCommand::LeaveRoom(Err(err)));
                return;
            }

            session.enqueue(&ServerCommand::LeaveRoom(Ok(())));
            self.detach_from_room(&mut inner, uid, Instant::now())
        };
        self.emit_replays(settled);
    }

    /// Shared frame for the simple host/phase-gated room commands: resolve
    /// the caller's room, run `op`, fan out its events, answer with
    /// `respond`.
    async fn room_command<F, G>(&self, session: &Session, cmd: ClientCommand, op: F, respond: G)
    where
        F: FnOnce(&mut Room, i32) -> Result<Vec<RoomEvent>, &'static str>,
        G: Fn(Result<(), String>) -> ServerCommand,
    {
        let settled = {
            let mut inner = self.inner.lock().await;
            let Some(uid) = session.user_id() else {
                session
                    .enqueue(&respond(Err(self.localize(session, reason::NOT_AUTHENTICATED))));
                return;
            };
            self.run_before_command(uid, &cmd);
            let Some(room_id) = inner.users.get(&uid).and_then(|u| u.room.clone()) else {
                session.enqueue(&respond(Err(self.localize(session, reason::NOT_IN_ROOM))));
                return;
            };
            let Some(room) = inner.rooms.get_mut(&room_id) else {
                session.enqueue(&respond(Err(self.localize(session, reason::NOT_IN_ROOM))));
                return;
            };

            match op(&mut *room, uid) {
                Ok(events) => {
                    let members: Vec<i32> = room.members().collect();
                    session.enqueue(&respond(Ok(())));
                    self.fan_out(&inner.users, &inner.sessions, &members, events)
                },
                Err(key) => {
                    session.enqueue(&respond(Err(self.localize(session, key))));
                    return;
                },
            }
        };
        self.emit_replays(settled);
    }

    /// Host-only: lock or unlock the room.
    pub async fn lock_room(&self, session: &Session, lock: bool) {
        self.room_command(
            session,
            ClientCommand::LockRoom { lock },
            move |room, uid| room.set_locked(uid, lock),
            ServerCommand::LockRoom,
        )
        .await;
    }

    /// Host-only: set the cycle flag.
    pub async fn cycle_room(&self, session: &Session, cycle: bool) {
        self.room_command(
            session,
            ClientCommand::CycleRoom { cycle },
            move |room, uid| room.set_cycle(uid, cycle),
            ServerCommand::CycleRoom,
        )
        .await;
    }

    /// Host-only: start the ready countdown.
    pub async fn request_start(&self, session: &Session) {
        let now = Instant::now();
        self.room_command(
            session,
            ClientCommand::RequestStart,
            move |room, uid| room.request_start(uid, now),
            ServerCommand::RequestStart,
        )
        .await;
    }

    /// Declare ready.
    pub async fn ready(&self, session: &Session) {
        let now = Instant::now();
        self.room_command(
            session,
            ClientCommand::Ready,
            move |room, uid| room.ready(uid, now),
            ServerCommand::Ready,
        )
        .await;
    }

    /// Withdraw readiness.
    pub async fn cancel_ready(&self, session: &Session) {
        self.room_command(
            session,
            ClientCommand::CancelReady,
            Room::cancel_ready,
            ServerCommand::CancelReady,
        )
        .await;
    }

    /// Abort the current run.
    pub async fn abort(&self, session: &Session) {
        self.room_command(session, ClientCommand::Abort, Room::abort, ServerCommand::Abort)
            .await;
    }

    /// Host-only: resolve a chart through the chart service and select it.
    ///
    /// The service call happens outside the mutex; the host/phase checks
    /// run before it and are repeated when committing.
    pub async fn select_chart(&self, session: &Session, chart_id: i32) {
        let respond = |key: &str| {
            let err = self.localize(session, key);
            session.enqueue(&ServerCommand::SelectChart(Err(err)));
        };

        // Pre-validate so obviously bad requests skip the service call.
        {
            let inner = self.inner.lock().await;
            let Some(uid) = session.user_id() else {
                respond(reason::NOT_AUTHENTICATED);
                return;
            };
            self.run_before_command(uid, &ClientCommand::SelectChart { id: chart_id });
            let room = inner.users.get(&uid).and_then(|u| u.room.as_ref()).and_then(|rid| {
                inner.rooms.get(rid)
            });
            let Some(room) = room else {
                respond(reason::NOT_IN_ROOM);
                return;
            };
            if let Err(key) = room.can_select_chart(uid) {
                respond(key);
                return;
            }
        }

        let chart = match self.charts.chart(chart_id).await {
            Ok(info) => Chart { id: info.id, name: info.name },
            Err(err) => {
                tracing::debug!(chart = chart_id, "chart lookup failed: {err}");
                respond(reason::CHART_NOT_FOUND);
                return;
            },
        };

        let mut inner = self.inner.lock().await;
        let Some(uid) = session.user_id() else {
            respond(reason::NOT_AUTHENTICATED);
            return;
        };
        let Some(room_id) = inner.users.get(&uid).and_then(|u| u.room.clone()) else {
            respond(reason::NOT_IN_ROOM);
            return;
        };
        let Some(room) = inner.rooms.get_mut(&room_id) else {
            respond(reason::NOT_IN_ROOM);
            return;
        };
        match room.commit_chart(uid, chart) {
            Ok(events) => {
                let members: Vec<i32> = room.members().collect();
                session.enqueue(&ServerCommand::SelectChart(Ok(())));
                self.fan_out(&inner.users, &inner.sessions, &members, events);
            },
            Err(key) => respond(key),
        }
    }

    /// Report a finished run.
    ///
    /// The uploaded record is resolved through the chart service outside
    /// the mutex; an unresolvable record degrades to a zeroed summary
    /// rather than blocking settlement.
    pub async fn played(&self, session: &Session, record_id: i32) {
        let respond = |key: &str| {
            let err = self.localize(session, key);
            session.enqueue(&ServerCommand::Played(Err(err)));
        };

        {
            let inner = self.inner.lock().await;
            let Some(uid) = session.user_id() else {
                respond(reason::NOT_AUTHENTICATED);
                return;
            };
            self.run_before_command(uid, &ClientCommand::Played { id: record_id });
            let room = inner.users.get(&uid).and_then(|u| u.room.as_ref()).and_then(|rid| {
                inner.rooms.get(rid)
            });
            let Some(room) = room else {
                respond(reason::NOT_IN_ROOM);
                return;
            };
            if let Err(key) = room.can_play_record(uid) {
                respond(key);
                return;
            }
        }

        let summary = match self.charts.record(record_id).await {
            Ok(info) => PlayRecord {
                record_id,
                score: info.score,
                accuracy: info.accuracy,
                full_combo: info.full_combo,
            },
            Err(err) => {
                tracing::warn!(record = record_id, "record lookup failed, zeroing: {err}");
                PlayRecord { record_id, score: 0, accuracy: 0.0, full_combo: false }
            },
        };

        // Commit, revalidating: the room may have moved on during the
        // service call.
        let settled = {
            let mut inner = self.inner.lock().await;
            let Some(uid) = session.user_id() else {
                respond(reason::NOT_AUTHENTICATED);
                return;
            };
            let Some(room_id) = inner.users.get(&uid).and_then(|u| u.room.clone()) else {
                respond(reason::NOT_IN_ROOM);
                return;
            };
            let Some(room) = inner.rooms.get_mut(&room_id) else {
                respond(reason::NOT_IN_ROOM);
                return;
            };
            match room.played(uid, summary) {
                Ok(events) => {
                    let members: Vec<i32> = room.members().collect();
                    session.enqueue(&ServerCommand::Played(Ok(())));
                    self.fan_out(&inner.users, &inner.sessions, &members, events)
                },
                Err(key) => {
                    respond(key);
                    return;
                },
            }
        };
        self.emit_replays(settled);
    }

    // ---- admin / federation surface -------------------------------------

    /// Ban an account server-wide and persist the change.
    pub async fn ban_user(&self, uid: i32) {
        let snapshot = {
            let mut inner = self.inner.lock().await;
            inner.banned_users.insert(uid);
            AdminData::snapshot(&inner.banned_users, &inner.banned_room_users)
        };
        self.persist_admin(snapshot).await;
    }

    /// Lift a server-wide ban and persist the change.
    pub async fn unban_user(&self, uid: i32) {
        let snapshot = {
            let mut inner = self.inner.lock().await;
            inner.banned_users.remove(&uid);
            AdminData::snapshot(&inner.banned_users, &inner.banned_room_users)
        };
        self.persist_admin(snapshot).await;
    }

    /// Ban an account from one room and persist the change.
    pub async fn ban_room_user(&self, room: &RoomId, uid: i32) {
        let snapshot = {
            let mut inner = self.inner.lock().await;
            inner.banned_room_users.entry(room.as_str().to_owned()).or_default().insert(uid);
            AdminData::snapshot(&inner.banned_users, &inner.banned_room_users)
        };
        self.persist_admin(snapshot).await;
    }

    /// Designate a contest room: only whitelisted accounts may join.
    /// Applies to the live room too, if it exists.
    pub async fn set_contest_room(&self, room: &RoomId, whitelist: HashSet<i32>) {
        let mut inner = self.inner.lock().await;
        inner.contest_whitelists.insert(room.as_str().to_owned(), whitelist.clone());
        if let Some(live) = inner.rooms.get_mut(room) {
            live.set_whitelist(Some(whitelist));
        }
    }

    /// Mint a temporary admin token for the admin collaborator surface.
    pub async fn add_temp_admin_token(&self, token: String) {
        self.inner.lock().await.temp_admin_tokens.insert(token);
    }

    /// Consume a temporary admin token; `true` if it was valid.
    pub async fn take_temp_admin_token(&self, token: &str) -> bool {
        self.inner.lock().await.temp_admin_tokens.remove(token)
    }

    /// Advertise our rooms for peer gossip.
    pub async fn room_adverts(&self) -> Vec<RoomAdvert> {
        let inner = self.inner.lock().await;
        inner
            .rooms
            .values()
            .filter(|room| !room.is_remote())
            .map(|room| RoomAdvert {
                room_id: room.id().as_str().to_owned(),
                host_name: inner
                    .users
                    .get(&room.host())
                    .map(|u| u.name.clone())
                    .unwrap_or_default(),
                player_count: room.members().count(),
                max_users: room.max_users(),
                state: match room.wire_state() {
                    cadenza_proto::RoomState::SelectChart(_) => "select".to_owned(),
                    cadenza_proto::RoomState::WaitingForReady => "ready".to_owned(),
                    cadenza_proto::RoomState::Playing => "playing".to_owned(),
                },
            })
            .collect()
    }
}

/// Build the snapshot a (re)connecting member receives.
fn room_snapshot(users: &HashMap<i32, User>, user: &User, room: &Room) -> ClientRoomState {
    ClientRoomState {
        id: room.id().clone(),
        state: room.wire_state(),
        live: room.live(),
        locked: room.locked(),
        cycle: room.cycle(),
        is_host: room.host() == user.id,
        is_ready: room.is_ready(user.id),
        users: room
            .members()
            .filter_map(|m| users.get(&m).map(|u| (m, u.info())))
            .collect(),
    }
}
