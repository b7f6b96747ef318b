//! Per-connection protocol driver.
//!
//! A `Session` is the packet handler behind one [`Stream`]: it tracks
//! activity for the heartbeat policy, rate-limits command classes, routes
//! commands into [`ServerState`], and marks its user dangling when the
//! connection dies. Command processing is strictly sequential per
//! connection: the stream awaits each dispatch before decoding the next
//! frame.
//!
//! Heartbeats are client-driven: `Ping` is answered `Pong` on the stream's
//! fast path without entering the dispatch queue; any inbound frame counts
//! as activity.

use std::{
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
    time::Instant,
};

use async_trait::async_trait;
use cadenza_core::{PacketHandler, Stream, TokenBucket};
use cadenza_proto::{ClientCommand, ServerCommand};
use tokio::sync::watch;
use uuid::Uuid;

use crate::{l10n::reason, state::ServerState};

/// The concrete stream type a session drives.
pub type SessionStream = Stream<ServerCommand, ClientCommand>;

/// Stream fast path: answer pings directly from the read loop.
pub fn ping_fast_path(cmd: &ClientCommand) -> Option<ServerCommand> {
    matches!(cmd, ClientCommand::Ping).then_some(ServerCommand::Pong)
}

/// Rate-limited command classes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CommandClass {
    /// Chat lines.
    Chat,
    /// Room-mutating operations (including authentication).
    Room,
    /// Play traffic: touches and judgements.
    Game,
}

#[derive(Debug)]
struct Limiters {
    chat: TokenBucket,
    room: TokenBucket,
    game: TokenBucket,
}

impl Limiters {
    fn new(now: Instant) -> Self {
        Self {
            chat: TokenBucket::new(5.0, 1.0, now),
            room: TokenBucket::new(10.0, 2.0, now),
            game: TokenBucket::new(240.0, 120.0, now),
        }
    }
}

/// One connected client.
pub struct Session {
    id: Uuid,
    state: Arc<ServerState>,
    stream_slot: watch::Sender<Option<Arc<SessionStream>>>,
    user: Mutex<Option<(i32, String)>>,
    last_activity: Mutex<Instant>,
    limiters: Mutex<Limiters>,
    closed: AtomicBool,
    seq: AtomicU64,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("user", &self.user_id())
            .field("closed", &self.closed.load(Ordering::Relaxed))
            .finish()
    }
}

impl Session {
    /// Fresh session; bind a stream before registering it.
    pub fn new(state: Arc<ServerState>) -> Arc<Self> {
        let now = Instant::now();
        let (stream_slot, _) = watch::channel(None);
        Arc::new(Self {
            id: Uuid::new_v4(),
            state,
            stream_slot,
            user: Mutex::new(None),
            last_activity: Mutex::new(now),
            limiters: Mutex::new(Limiters::new(now)),
            closed: AtomicBool::new(false),
            seq: AtomicU64::new(0),
        })
    }

    /// Connection id.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Bound user id, if authenticated.
    pub fn user_id(&self) -> Option<i32> {
        #[allow(clippy::expect_used)]
        self.user
            .lock()
            .expect("invariant: session mutex is never poisoned")
            .as_ref()
            .map(|(id, _)| *id)
    }

    /// Language used for localized reasons ("en" before authentication).
    pub fn language(&self) -> String {
        #[allow(clippy::expect_used)]
        self.user
            .lock()
            .expect("invariant: session mutex is never poisoned")
            .as_ref()
            .map_or_else(|| "en".to_owned(), |(_, lang)| lang.clone())
    }

    /// Record a successful authentication.
    pub fn bind_user(&self, uid: i32, language: String) {
        #[allow(clippy::expect_used)]
        let mut user = self.user.lock().expect("invariant: session mutex is never poisoned");
        *user = Some((uid, language));
    }

    /// Attach the transport after construction.
    pub fn bind_stream(&self, stream: Arc<SessionStream>) {
        self.stream_slot.send_replace(Some(stream));
    }

    /// Instant of the most recent inbound frame.
    pub fn last_activity(&self) -> Instant {
        #[allow(clippy::expect_used)]
        *self.last_activity.lock().expect("invariant: session mutex is never poisoned")
    }

    /// Enqueue one outbound command, swallowing failures; a session with a
    /// broken pipe is already on its way out.
    pub fn enqueue(&self, cmd: &ServerCommand) {
        let stream = self.stream_slot.borrow().clone();
        let Some(stream) = stream else {
            tracing::trace!(session = %self.id, "enqueue before stream bind dropped");
            return;
        };
        if let Err(err) = stream.try_send(cmd) {
            tracing::trace!(session = %self.id, "enqueue failed: {err}");
        }
    }

    /// First closer wins; later calls are no-ops.
    pub fn begin_close(&self) -> bool {
        !self.closed.swap(true, Ordering::AcqRel)
    }

    /// Tear down the transport.
    pub fn close_stream(&self) {
        if let Some(stream) = self.stream_slot.borrow().clone() {
            stream.close();
        }
    }

    fn acquire(&self, class: CommandClass) -> bool {
        let now = Instant::now();
        #[allow(clippy::expect_used)]
        let mut limiters =
            self.limiters.lock().expect("invariant: session mutex is never poisoned");
        match class {
            CommandClass::Chat => limiters.chat.try_acquire(now),
            CommandClass::Room => limiters.room.try_acquire(now),
            CommandClass::Game => limiters.game.try_acquire(now),
        }
    }

    fn rate_limited(&self) -> String {
        self.state.localize(self, reason::RATE_LIMITED)
    }

    async fn dispatch(&self, cmd: ClientCommand) {
        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(session = %self.id, seq, ?cmd, "dispatch");

        match cmd {
            // Normally answered on the stream fast path; kept for
            // completeness.
            ClientCommand::Ping => self.enqueue(&ServerCommand::Pong),

            ClientCommand::Authenticate { token } => {
                if self.acquire(CommandClass::Room) {
                    self.state.authenticate(self, &token).await;
                } else {
                    self.enqueue(&ServerCommand::Authenticate(Err(self.rate_limited())));
                }
            },
            ClientCommand::Chat { message } => {
                if self.acquire(CommandClass::Chat) {
                    self.state.chat(self, message).await;
                } else {
                    self.enqueue(&ServerCommand::Chat(Err(self.rate_limited())));
                }
            },

            // Traffic has no paired response; over-budget batches drop.
            ClientCommand::Touches { frames } => {
                if self.acquire(CommandClass::Game) {
                    self.state.forward_touches(self, frames).await;
                }
            },
            ClientCommand::Judges { judges } => {
                if self.acquire(CommandClass::Game) {
                    self.state.forward_judges(self, judges).await;
                }
            },

            ClientCommand::CreateRoom { id } => {
                if self.acquire(CommandClass::Room) {
                    self.state.create_room(self, id).await;
                } else {
                    self.enqueue(&ServerCommand::CreateRoom(Err(self.rate_limited())));
                }
            },
            ClientCommand::JoinRoom { id, monitor } => {
                if self.acquire(CommandClass::Room) {
                    self.state.join_room(self, id, monitor).await;
                } else {
                    self.enqueue(&ServerCommand::JoinRoom(Err(self.rate_limited())));
                }
            },
            ClientCommand::LeaveRoom => {
                if self.acquire(CommandClass::Room) {
                    self.state.leave_room(self).await;
                } else {
                    self.enqueue(&ServerCommand::LeaveRoom(Err(self.rate_limited())));
                }
            },
            ClientCommand::LockRoom { lock } => {
                if self.acquire(CommandClass::Room) {
                    self.state.lock_room(self, lock).await;
                } else {
                    self.enqueue(&ServerCommand::LockRoom(Err(self.rate_limited())));
                }
            },
            ClientCommand::CycleRoom { cycle } => {
                if self.acquire(CommandClass::Room) {
                    self.state.cycle_room(self, cycle).await;
                } else {
                    self.enqueue(&ServerCommand::CycleRoom(Err(self.rate_limited())));
                }
            },
            ClientCommand::SelectChart { id } => {
                if self.acquire(CommandClass::Room) {
                    self.state.select_chart(self, id).await;
                } else {
                    self.enqueue(&ServerCommand::SelectChart(Err(self.rate_limited())));
                }
            },
            ClientCommand::RequestStart => {
                if self.acquire(CommandClass::Room) {
                    self.state.request_start(self).await;
                } else {
                    self.enqueue(&ServerCommand::RequestStart(Err(self.rate_limited())));
                }
            },
            ClientCommand::Ready => {
                if self.acquire(CommandClass::Room) {
                    self.state.ready(self).await;
                } else {
                    self.enqueue(&ServerCommand::Ready(Err(self.rate_limited())));
                }
            },
            ClientCommand::CancelReady => {
                if self.acquire(CommandClass::Room) {
                    self.state.cancel_ready(self).await;
                } else {
                    self.enqueue(&ServerCommand::CancelReady(Err(self.rate_limited())));
                }
            },
            ClientCommand::Played { id } => {
                if self.acquire(CommandClass::Room) {
                    self.state.played(self, id).await;
                } else {
                    self.enqueue(&ServerCommand::Played(Err(self.rate_limited())));
                }
            },
            ClientCommand::Abort => {
                if self.acquire(CommandClass::Room) {
                    self.state.abort(self).await;
                } else {
                    self.enqueue(&ServerCommand::Abort(Err(self.rate_limited())));
                }
            },
        }
    }
}

/// Glue between the transport read loop and the session.
pub struct SessionHandler(Arc<Session>);

impl SessionHandler {
    /// Wrap a session for transport dispatch.
    pub fn new(session: Arc<Session>) -> Self {
        Self(session)
    }
}

#[async_trait]
impl PacketHandler<ClientCommand> for SessionHandler {
    fn on_frame(&self) {
        #[allow(clippy::expect_used)]
        let mut last = self
            .0
            .last_activity
            .lock()
            .expect("invariant: session mutex is never poisoned");
        *last = Instant::now();
    }

    async fn handle(&self, packet: ClientCommand) {
        self.0.dispatch(packet).await;
    }

    async fn on_close(&self) {
        self.0.state.close_session(&self.0, "connection closed").await;
    }
}
