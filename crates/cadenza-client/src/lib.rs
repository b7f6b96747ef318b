//! Protocol client for the Cadenza multiplayer server.
//!
//! Drives one framed TCP session: request commands resolve through
//! one-shot callbacks keyed by their paired response, broadcasts accumulate
//! in observable buffers (messages, state changes, live traffic). Used by
//! the integration tests and by the federation proxy path.

use std::{collections::HashMap, net::SocketAddr, sync::Arc, time::Duration};

use async_trait::async_trait;
use cadenza_core::{
    HEARTBEAT_INTERVAL, HEARTBEAT_TIMEOUT, PacketHandler, Stream, StreamError,
    stream::StreamConfig,
};
use cadenza_proto::{
    ClientCommand, ClientRoomState, JoinRoomResponse, JudgeEvent, Message, PROTOCOL_VERSION,
    RoomId, RoomState, ServerCommand, TouchFrame, UserInfo,
};
use tokio::{
    net::TcpStream,
    sync::{Mutex, Notify, oneshot},
    task::JoinHandle,
    time,
};

/// How long a request waits for its paired response.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(7);

/// Client-side failures.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// Socket failure while connecting.
    #[error("connect failed: {0}")]
    Connect(#[from] std::io::Error),

    /// Transport failure.
    #[error(transparent)]
    Stream(#[from] StreamError),

    /// The server answered with a reason string.
    #[error("server rejected: {0}")]
    Rejected(String),

    /// No response arrived in time.
    #[error("request timed out")]
    Timeout,

    /// The connection went away mid-request.
    #[error("connection closed")]
    Closed,
}

type Slot<T> = Mutex<Option<oneshot::Sender<Result<T, String>>>>;

#[derive(Default)]
struct Callbacks {
    authenticate: Slot<(UserInfo, Option<ClientRoomState>)>,
    chat: Slot<()>,
    create_room: Slot<()>,
    join_room: Slot<JoinRoomResponse>,
    leave_room: Slot<()>,
    lock_room: Slot<()>,
    cycle_room: Slot<()>,
    select_chart: Slot<()>,
    request_start: Slot<()>,
    ready: Slot<()>,
    cancel_ready: Slot<()>,
    played: Slot<()>,
    abort: Slot<()>,
}

/// Traffic observed from one remote player.
#[derive(Debug, Default, Clone)]
pub struct LiveTraffic {
    /// Forwarded touch frames.
    pub touches: Vec<TouchFrame>,
    /// Forwarded judgement events.
    pub judges: Vec<JudgeEvent>,
}

#[derive(Default)]
struct ClientState {
    me: Mutex<Option<UserInfo>>,
    room: Mutex<Option<ClientRoomState>>,
    messages: Mutex<Vec<Message>>,
    state_changes: Mutex<Vec<RoomState>>,
    host_changes: Mutex<Vec<bool>>,
    traffic: Mutex<HashMap<i32, LiveTraffic>>,
    pong: Notify,
    cb: Callbacks,
}

struct ClientHandler(Arc<ClientState>);

#[async_trait]
impl PacketHandler<ServerCommand> for ClientHandler {
    async fn handle(&self, packet: ServerCommand) {
        process(&self.0, packet).await;
    }
}

async fn resolve<T>(slot: &Slot<T>, result: Result<T, String>) {
    if let Some(tx) = slot.lock().await.take() {
        let _ = tx.send(result);
    } else {
        tracing::debug!("unsolicited response dropped");
    }
}

async fn process(state: &Arc<ClientState>, cmd: ServerCommand) {
    match cmd {
        ServerCommand::Pong => state.pong.notify_one(),
        ServerCommand::Authenticate(res) => resolve(&state.cb.authenticate, res).await,
        ServerCommand::Chat(res) => resolve(&state.cb.chat, res).await,

        ServerCommand::Touches { player, frames } => {
            state
                .traffic
                .lock()
                .await
                .entry(player)
                .or_default()
                .touches
                .extend(frames.iter().cloned());
        },
        ServerCommand::Judges { player, judges } => {
            state
                .traffic
                .lock()
                .await
                .entry(player)
                .or_default()
                .judges
                .extend(judges.iter().cloned());
        },

        ServerCommand::Message(msg) => {
            {
                let mut room = state.room.lock().await;
                if let Some(room) = room.as_mut() {
                    match &msg {
                        Message::LockRoom { lock } => room.locked = *lock,
                        Message::CycleRoom { cycle } => room.cycle = *cycle,
                        Message::LeaveRoom { user, .. } => {
                            room.users.remove(user);
                        },
                        _ => {},
                    }
                }
            }
            state.messages.lock().await.push(msg);
        },
        ServerCommand::ChangeState(new_state) => {
            state.traffic.lock().await.clear();
            state.state_changes.lock().await.push(new_state);
            let mut room = state.room.lock().await;
            if let Some(room) = room.as_mut() {
                room.state = new_state;
                room.is_ready = room.is_host;
            }
        },
        ServerCommand::ChangeHost(is_host) => {
            state.host_changes.lock().await.push(is_host);
            if let Some(room) = state.room.lock().await.as_mut() {
                room.is_host = is_host;
            }
        },

        ServerCommand::CreateRoom(res) => resolve(&state.cb.create_room, res).await,
        ServerCommand::JoinRoom(res) => resolve(&state.cb.join_room, res).await,
        ServerCommand::OnJoinRoom(user) => {
            if let Some(room) = state.room.lock().await.as_mut() {
                room.live |= user.monitor;
                room.users.insert(user.id, user);
            }
        },
        ServerCommand::LeaveRoom(res) => resolve(&state.cb.leave_room, res).await,
        ServerCommand::LockRoom(res) => resolve(&state.cb.lock_room, res).await,
        ServerCommand::CycleRoom(res) => resolve(&state.cb.cycle_room, res).await,
        ServerCommand::SelectChart(res) => resolve(&state.cb.select_chart, res).await,
        ServerCommand::RequestStart(res) => resolve(&state.cb.request_start, res).await,
        ServerCommand::Ready(res) => resolve(&state.cb.ready, res).await,
        ServerCommand::CancelReady(res) => resolve(&state.cb.cancel_ready, res).await,
        ServerCommand::Played(res) => resolve(&state.cb.played, res).await,
        ServerCommand::Abort(res) => resolve(&state.cb.abort, res).await,
    }
}

/// A connected client.
pub struct Client {
    state: Arc<ClientState>,
    stream: Arc<Stream<ClientCommand, ServerCommand>>,
    ping_task: Mutex<Option<JoinHandle<()>>>,
}

impl Client {
    /// Connect and start the heartbeat loop at the protocol interval.
    pub async fn connect(addr: SocketAddr) -> Result<Self, ClientError> {
        Self::connect_with_heartbeat(addr, HEARTBEAT_INTERVAL).await
    }

    /// Connect with a custom heartbeat interval (tests shrink it along
    /// with the server's inactivity window).
    pub async fn connect_with_heartbeat(
        addr: SocketAddr,
        interval: Duration,
    ) -> Result<Self, ClientError> {
        let client = Self::connect_silent(addr).await?;
        client.start_heartbeat(interval).await;
        Ok(client)
    }

    /// Connect without a heartbeat loop.
    ///
    /// Without pings the server's inactivity policy applies; used by tests
    /// that exercise the timeout path.
    pub async fn connect_silent(addr: SocketAddr) -> Result<Self, ClientError> {
        let socket = TcpStream::connect(addr).await?;
        socket.set_nodelay(true)?;

        let state = Arc::new(ClientState::default());
        let handler: Arc<dyn PacketHandler<ServerCommand>> =
            Arc::new(ClientHandler(Arc::clone(&state)));
        let stream =
            Stream::connect(socket, PROTOCOL_VERSION, handler, StreamConfig::default()).await?;

        Ok(Self { state, stream: Arc::new(stream), ping_task: Mutex::new(None) })
    }

    /// Spawn the heartbeat loop if not yet running.
    pub async fn start_heartbeat(&self, interval: Duration) {
        let mut slot = self.ping_task.lock().await;
        if slot.is_some() {
            return;
        }
        let stream = Arc::clone(&self.stream);
        let state = Arc::clone(&self.state);
        *slot = Some(tokio::spawn(async move {
            loop {
                time::sleep(interval).await;
                if stream.send(&ClientCommand::Ping).await.is_err() {
                    break;
                }
                if time::timeout(HEARTBEAT_TIMEOUT, state.pong.notified()).await.is_err() {
                    tracing::warn!("heartbeat timeout");
                }
            }
        }));
    }

    /// Round-trip a ping, returning once the pong arrives.
    pub async fn ping(&self) -> Result<(), ClientError> {
        self.stream.send(&ClientCommand::Ping).await?;
        time::timeout(HEARTBEAT_TIMEOUT, self.state.pong.notified())
            .await
            .map_err(|_| ClientError::Timeout)
    }

    async fn rcall<T>(&self, cmd: ClientCommand, slot: &Slot<T>) -> Result<T, ClientError> {
        let (tx, rx) = oneshot::channel();
        *slot.lock().await = Some(tx);
        self.stream.send(&cmd).await?;
        match time::timeout(REQUEST_TIMEOUT, rx).await {
            Err(_) => Err(ClientError::Timeout),
            Ok(Err(_)) => Err(ClientError::Closed),
            Ok(Ok(Err(reason))) => Err(ClientError::Rejected(reason)),
            Ok(Ok(Ok(value))) => Ok(value),
        }
    }

    /// Authenticate with an identity token (or `@<ticket>`).
    pub async fn authenticate(&self, token: &str) -> Result<(), ClientError> {
        let token = token
            .to_owned()
            .try_into()
            .map_err(|_| ClientError::Rejected("token too long".to_owned()))?;
        let (me, room) = self
            .rcall(ClientCommand::Authenticate { token }, &self.state.cb.authenticate)
            .await?;
        *self.state.me.lock().await = Some(me);
        *self.state.room.lock().await = room;
        Ok(())
    }

    /// Send a chat line to the current room.
    pub async fn chat(&self, message: &str) -> Result<(), ClientError> {
        let message = message
            .to_owned()
            .try_into()
            .map_err(|_| ClientError::Rejected("message too long".to_owned()))?;
        self.rcall(ClientCommand::Chat { message }, &self.state.cb.chat).await
    }

    /// Create a room and become its host.
    pub async fn create_room(&self, id: RoomId) -> Result<(), ClientError> {
        self.rcall(ClientCommand::CreateRoom { id: id.clone() }, &self.state.cb.create_room)
            .await?;
        let me = self.state.me.lock().await.clone();
        if let Some(me) = me {
            *self.state.room.lock().await = Some(ClientRoomState {
                id,
                state: RoomState::default(),
                live: false,
                locked: false,
                cycle: false,
                is_host: true,
                is_ready: false,
                users: std::iter::once((me.id, me)).collect(),
            });
        }
        Ok(())
    }

    /// Join an existing room.
    pub async fn join_room(&self, id: RoomId, monitor: bool) -> Result<(), ClientError> {
        let resp = self
            .rcall(ClientCommand::JoinRoom { id: id.clone(), monitor }, &self.state.cb.join_room)
            .await?;
        *self.state.room.lock().await = Some(ClientRoomState {
            id,
            state: resp.state,
            live: resp.live,
            locked: false,
            cycle: false,
            is_host: false,
            is_ready: false,
            users: resp.users.into_iter().map(|u| (u.id, u)).collect(),
        });
        Ok(())
    }

    /// Leave the current room.
    pub async fn leave_room(&self) -> Result<(), ClientError> {
        self.rcall(ClientCommand::LeaveRoom, &self.state.cb.leave_room).await?;
        *self.state.room.lock().await = None;
        Ok(())
    }

    /// Host-only: lock or unlock the room.
    pub async fn lock_room(&self, lock: bool) -> Result<(), ClientError> {
        self.rcall(ClientCommand::LockRoom { lock }, &self.state.cb.lock_room).await
    }

    /// Host-only: set the cycle flag.
    pub async fn cycle_room(&self, cycle: bool) -> Result<(), ClientError> {
        self.rcall(ClientCommand::CycleRoom { cycle }, &self.state.cb.cycle_room).await
    }

    /// Host-only: select a chart.
    pub async fn select_chart(&self, id: i32) -> Result<(), ClientError> {
        self.rcall(ClientCommand::SelectChart { id }, &self.state.cb.select_chart).await
    }

    /// Host-only: start the ready countdown.
    pub async fn request_start(&self) -> Result<(), ClientError> {
        self.rcall(ClientCommand::RequestStart, &self.state.cb.request_start).await?;
        if let Some(room) = self.state.room.lock().await.as_mut() {
            room.is_ready = true;
        }
        Ok(())
    }

    /// Declare ready.
    pub async fn ready(&self) -> Result<(), ClientError> {
        self.rcall(ClientCommand::Ready, &self.state.cb.ready).await?;
        if let Some(room) = self.state.room.lock().await.as_mut() {
            room.is_ready = true;
        }
        Ok(())
    }

    /// Withdraw readiness.
    pub async fn cancel_ready(&self) -> Result<(), ClientError> {
        self.rcall(ClientCommand::CancelReady, &self.state.cb.cancel_ready).await?;
        if let Some(room) = self.state.room.lock().await.as_mut() {
            room.is_ready = false;
        }
        Ok(())
    }

    /// Report a finished run by record id.
    pub async fn played(&self, id: i32) -> Result<(), ClientError> {
        self.rcall(ClientCommand::Played { id }, &self.state.cb.played).await
    }

    /// Abort the current run.
    pub async fn abort(&self) -> Result<(), ClientError> {
        self.rcall(ClientCommand::Abort, &self.state.cb.abort).await
    }

    /// Send a touch batch.
    pub async fn send_touches(&self, frames: Vec<TouchFrame>) -> Result<(), ClientError> {
        Ok(self.stream.send(&ClientCommand::Touches { frames: Arc::new(frames) }).await?)
    }

    /// Send a judgement batch.
    pub async fn send_judges(&self, judges: Vec<JudgeEvent>) -> Result<(), ClientError> {
        Ok(self.stream.send(&ClientCommand::Judges { judges: Arc::new(judges) }).await?)
    }

    /// Send a raw command without waiting for anything.
    pub async fn send_raw(&self, cmd: ClientCommand) -> Result<(), ClientError> {
        Ok(self.stream.send(&cmd).await?)
    }

    // ---- observation -----------------------------------------------------

    /// Our identity, after authentication.
    pub async fn me(&self) -> Option<UserInfo> {
        self.state.me.lock().await.clone()
    }

    /// Current room snapshot.
    pub async fn room(&self) -> Option<ClientRoomState> {
        self.state.room.lock().await.clone()
    }

    /// Drain accumulated broadcast messages.
    pub async fn take_messages(&self) -> Vec<Message> {
        self.state.messages.lock().await.drain(..).collect()
    }

    /// All `ChangeState` notifications seen, in order.
    pub async fn state_changes(&self) -> Vec<RoomState> {
        self.state.state_changes.lock().await.clone()
    }

    /// All `ChangeHost` notifications seen, in order.
    pub async fn host_changes(&self) -> Vec<bool> {
        self.state.host_changes.lock().await.clone()
    }

    /// Traffic observed from `player` this round.
    pub async fn traffic_from(&self, player: i32) -> LiveTraffic {
        self.state.traffic.lock().await.get(&player).cloned().unwrap_or_default()
    }

    /// Whether the transport is gone.
    pub fn is_closed(&self) -> bool {
        self.stream.is_closed()
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        if let Ok(slot) = self.ping_task.try_lock() {
            if let Some(task) = slot.as_ref() {
                task.abort();
            }
        }
    }
}
