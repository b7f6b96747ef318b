//! Command, message, and room-state unions.
//!
//! Tags are u8 in declaration order and are part of the protocol; the match
//! arms below are the normative tag table. Unknown tags are decode errors.
//!
//! Traffic payloads (`Touches`/`Judges`) hold their frame vectors behind an
//! `Arc` so a received batch can be re-broadcast to a whole room without
//! cloning the data.

use std::{collections::HashMap, fmt, sync::Arc};

use half::f16;

use crate::{
    error::CodecError,
    wire::{Wire, WireReader, WireWriter},
};

/// Result alias for the error-string encoding used by response commands.
pub type SResult<T> = Result<T, String>;

/// A touch position packed as two IEEE-754 half-precision floats.
///
/// Play-area coordinates fit comfortably in half precision; packing halves
/// the size of the hottest payload on the wire.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CompactPos {
    x: f16,
    y: f16,
}

impl CompactPos {
    /// Pack a position, rounding each coordinate to the nearest half value.
    pub fn new(x: f32, y: f32) -> Self {
        Self { x: f16::from_f32(x), y: f16::from_f32(y) }
    }

    /// X coordinate widened back to f32.
    pub fn x(&self) -> f32 {
        self.x.to_f32()
    }

    /// Y coordinate widened back to f32.
    pub fn y(&self) -> f32 {
        self.y.to_f32()
    }
}

impl Wire for CompactPos {
    fn decode(r: &mut WireReader<'_>) -> Result<Self, CodecError> {
        Ok(Self { x: f16::from_bits(r.u16()?), y: f16::from_bits(r.u16()?) })
    }

    fn encode(&self, w: &mut WireWriter) {
        w.u16(self.x.to_bits());
        w.u16(self.y.to_bits());
    }
}

/// A UTF-8 string bounded to `N` bytes, enforced at construction and at
/// decode time.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Varchar<const N: usize>(String);

impl<const N: usize> Varchar<N> {
    /// Unwrap the inner string.
    pub fn into_inner(self) -> String {
        self.0
    }

    /// Borrow the inner string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl<const N: usize> fmt::Display for Varchar<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl<const N: usize> TryFrom<String> for Varchar<N> {
    type Error = CodecError;

    fn try_from(value: String) -> Result<Self, CodecError> {
        if value.len() > N {
            return Err(CodecError::StringTooLong { len: value.len(), limit: N });
        }
        Ok(Self(value))
    }
}

impl<const N: usize> TryFrom<&str> for Varchar<N> {
    type Error = CodecError;

    fn try_from(value: &str) -> Result<Self, CodecError> {
        value.to_owned().try_into()
    }
}

impl<const N: usize> Wire for Varchar<N> {
    fn decode(r: &mut WireReader<'_>) -> Result<Self, CodecError> {
        let len = r.uleb()? as usize;
        if len > N {
            return Err(CodecError::StringTooLong { len, limit: N });
        }
        let bytes = r.take(len)?;
        let s = std::str::from_utf8(bytes).map_err(|_| CodecError::InvalidUtf8)?;
        Ok(Self(s.to_owned()))
    }

    fn encode(&self, w: &mut WireWriter) {
        w.string(&self.0);
    }
}

/// Room identifier: 1..=20 characters from `A–Za–z0–9-_`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RoomId(Varchar<20>);

impl RoomId {
    fn validate(self) -> Result<Self, CodecError> {
        let s = self.0.as_str();
        if s.is_empty()
            || !s.chars().all(|c| c == '-' || c == '_' || c.is_ascii_alphanumeric())
        {
            return Err(CodecError::InvalidRoomId);
        }
        Ok(self)
    }

    /// Borrow the identifier text.
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<RoomId> for String {
    fn from(value: RoomId) -> Self {
        value.0.into_inner()
    }
}

impl TryFrom<String> for RoomId {
    type Error = CodecError;

    fn try_from(value: String) -> Result<Self, CodecError> {
        Self(value.try_into().map_err(|_| CodecError::InvalidRoomId)?).validate()
    }
}

impl TryFrom<&str> for RoomId {
    type Error = CodecError;

    fn try_from(value: &str) -> Result<Self, CodecError> {
        value.to_owned().try_into()
    }
}

impl Wire for RoomId {
    fn decode(r: &mut WireReader<'_>) -> Result<Self, CodecError> {
        Self(Varchar::decode(r)?).validate()
    }

    fn encode(&self, w: &mut WireWriter) {
        self.0.encode(w);
    }
}

/// One frame of touch input: a client-side timestamp plus the active
/// pointers and their packed positions.
#[derive(Debug, Clone, PartialEq)]
pub struct TouchFrame {
    /// Client-side time of the frame, seconds into the chart.
    pub time: f32,
    /// `(pointer id, position)` pairs active in this frame.
    pub points: Vec<(i8, CompactPos)>,
}

impl Wire for TouchFrame {
    fn decode(r: &mut WireReader<'_>) -> Result<Self, CodecError> {
        Ok(Self { time: r.f32()?, points: Vec::decode(r)? })
    }

    fn encode(&self, w: &mut WireWriter) {
        w.f32(self.time);
        self.points.encode(w);
    }
}

/// Judgement grades, tagged 0..=5.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Judgement {
    /// Exact hit.
    Perfect,
    /// Slightly off hit.
    Good,
    /// Barely counted hit.
    Bad,
    /// Missed note.
    Miss,
    /// Hold note kept perfectly.
    HoldPerfect,
    /// Hold note kept with wobble.
    HoldGood,
}

impl Wire for Judgement {
    fn decode(r: &mut WireReader<'_>) -> Result<Self, CodecError> {
        Ok(match r.u8()? {
            0 => Self::Perfect,
            1 => Self::Good,
            2 => Self::Bad,
            3 => Self::Miss,
            4 => Self::HoldPerfect,
            5 => Self::HoldGood,
            tag => return Err(CodecError::UnknownTag { kind: "Judgement", tag }),
        })
    }

    fn encode(&self, w: &mut WireWriter) {
        w.u8(match self {
            Self::Perfect => 0,
            Self::Good => 1,
            Self::Bad => 2,
            Self::Miss => 3,
            Self::HoldPerfect => 4,
            Self::HoldGood => 5,
        });
    }
}

/// One judgement event produced during play.
#[derive(Debug, Clone, PartialEq)]
pub struct JudgeEvent {
    /// Client-side time of the judgement, seconds into the chart.
    pub time: f32,
    /// Judged line.
    pub line_id: u32,
    /// Judged note on that line.
    pub note_id: u32,
    /// Grade assigned.
    pub judgement: Judgement,
}

impl Wire for JudgeEvent {
    fn decode(r: &mut WireReader<'_>) -> Result<Self, CodecError> {
        Ok(Self {
            time: r.f32()?,
            line_id: r.u32()?,
            note_id: r.u32()?,
            judgement: Judgement::decode(r)?,
        })
    }

    fn encode(&self, w: &mut WireWriter) {
        w.f32(self.time);
        w.u32(self.line_id);
        w.u32(self.note_id);
        self.judgement.encode(w);
    }
}

/// Commands sent from client to server, tagged 0..=15.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientCommand {
    /// Heartbeat probe; answered synchronously with [`ServerCommand::Pong`].
    Ping,
    /// Present an identity token (or `@`-prefixed federation ticket).
    Authenticate {
        /// Opaque bearer token, at most 32 bytes.
        token: Varchar<32>,
    },
    /// Send a chat line to the current room.
    Chat {
        /// Chat text, at most 200 bytes.
        message: Varchar<200>,
    },
    /// Forward touch input to the other players.
    Touches {
        /// Batched touch frames.
        frames: Arc<Vec<TouchFrame>>,
    },
    /// Forward judgement events to the other players.
    Judges {
        /// Batched judgement events.
        judges: Arc<Vec<JudgeEvent>>,
    },
    /// Create a room and become its host.
    CreateRoom {
        /// Requested room id.
        id: RoomId,
    },
    /// Join an existing room.
    JoinRoom {
        /// Target room id.
        id: RoomId,
        /// Join as a spectating monitor instead of a player.
        monitor: bool,
    },
    /// Leave the current room.
    LeaveRoom,
    /// Host only: toggle the room lock.
    LockRoom {
        /// New lock flag.
        lock: bool,
    },
    /// Host only: toggle chart cycling.
    CycleRoom {
        /// New cycle flag.
        cycle: bool,
    },
    /// Host only: select the chart to play.
    SelectChart {
        /// Chart id to resolve and select.
        id: i32,
    },
    /// Host only: move the room to the ready phase.
    RequestStart,
    /// Declare readiness for the selected chart.
    Ready,
    /// Withdraw readiness.
    CancelReady,
    /// Report a finished run with its score.
    Played {
        /// Record id of the uploaded play.
        id: i32,
    },
    /// Abandon the current run.
    Abort,
}

impl Wire for ClientCommand {
    fn decode(r: &mut WireReader<'_>) -> Result<Self, CodecError> {
        Ok(match r.u8()? {
            0 => Self::Ping,
            1 => Self::Authenticate { token: Varchar::decode(r)? },
            2 => Self::Chat { message: Varchar::decode(r)? },
            3 => Self::Touches { frames: Arc::decode(r)? },
            4 => Self::Judges { judges: Arc::decode(r)? },
            5 => Self::CreateRoom { id: RoomId::decode(r)? },
            6 => Self::JoinRoom { id: RoomId::decode(r)?, monitor: r.bool()? },
            7 => Self::LeaveRoom,
            8 => Self::LockRoom { lock: r.bool()? },
            9 => Self::CycleRoom { cycle: r.bool()? },
            10 => Self::SelectChart { id: r.i32()? },
            11 => Self::RequestStart,
            12 => Self::Ready,
            13 => Self::CancelReady,
            14 => Self::Played { id: r.i32()? },
            15 => Self::Abort,
            tag => return Err(CodecError::UnknownTag { kind: "ClientCommand", tag }),
        })
    }

    fn encode(&self, w: &mut WireWriter) {
        match self {
            Self::Ping => w.u8(0),
            Self::Authenticate { token } => {
                w.u8(1);
                token.encode(w);
            },
            Self::Chat { message } => {
                w.u8(2);
                message.encode(w);
            },
            Self::Touches { frames } => {
                w.u8(3);
                frames.encode(w);
            },
            Self::Judges { judges } => {
                w.u8(4);
                judges.encode(w);
            },
            Self::CreateRoom { id } => {
                w.u8(5);
                id.encode(w);
            },
            Self::JoinRoom { id, monitor } => {
                w.u8(6);
                id.encode(w);
                w.bool(*monitor);
            },
            Self::LeaveRoom => w.u8(7),
            Self::LockRoom { lock } => {
                w.u8(8);
                w.bool(*lock);
            },
            Self::CycleRoom { cycle } => {
                w.u8(9);
                w.bool(*cycle);
            },
            Self::SelectChart { id } => {
                w.u8(10);
                w.i32(*id);
            },
            Self::RequestStart => w.u8(11),
            Self::Ready => w.u8(12),
            Self::CancelReady => w.u8(13),
            Self::Played { id } => {
                w.u8(14);
                w.i32(*id);
            },
            Self::Abort => w.u8(15),
        }
    }
}

/// Room events broadcast to members, tagged 0..=15.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    /// A chat line.
    Chat {
        /// Sender user id.
        user: i32,
        /// Chat text.
        content: String,
    },
    /// The room was created by this user.
    CreateRoom {
        /// Creator user id.
        user: i32,
    },
    /// A user joined.
    JoinRoom {
        /// Joining user id.
        user: i32,
        /// Joining user name.
        name: String,
    },
    /// A user left.
    LeaveRoom {
        /// Leaving user id.
        user: i32,
        /// Leaving user name.
        name: String,
    },
    /// Host handed over.
    NewHost {
        /// New host user id.
        user: i32,
    },
    /// The host selected a chart.
    SelectChart {
        /// Selecting user id.
        user: i32,
        /// Resolved chart name.
        name: String,
        /// Chart id.
        id: i32,
    },
    /// The host started the ready phase.
    GameStart {
        /// Host user id.
        user: i32,
    },
    /// A player declared ready.
    Ready {
        /// Ready user id.
        user: i32,
    },
    /// A player withdrew readiness.
    CancelReady {
        /// User id.
        user: i32,
    },
    /// Everyone aborted; the round was cancelled.
    CancelGame {
        /// Host user id at cancellation.
        user: i32,
    },
    /// All players ready; play begins.
    StartPlaying,
    /// A player finished their run.
    Played {
        /// Finishing user id.
        user: i32,
        /// Reported score.
        score: i32,
        /// Reported accuracy in `[0, 1]`.
        accuracy: f32,
        /// Whether the run was a full combo.
        full_combo: bool,
    },
    /// All players finished; the round is settled.
    GameEnd,
    /// A player aborted mid-run.
    Abort {
        /// Aborting user id.
        user: i32,
    },
    /// The room lock flag changed.
    LockRoom {
        /// New lock flag.
        lock: bool,
    },
    /// The chart cycle flag changed.
    CycleRoom {
        /// New cycle flag.
        cycle: bool,
    },
}

impl Wire for Message {
    fn decode(r: &mut WireReader<'_>) -> Result<Self, CodecError> {
        Ok(match r.u8()? {
            0 => Self::Chat { user: r.i32()?, content: r.string()? },
            1 => Self::CreateRoom { user: r.i32()? },
            2 => Self::JoinRoom { user: r.i32()?, name: r.string()? },
            3 => Self::LeaveRoom { user: r.i32()?, name: r.string()? },
            4 => Self::NewHost { user: r.i32()? },
            5 => Self::SelectChart { user: r.i32()?, name: r.string()?, id: r.i32()? },
            6 => Self::GameStart { user: r.i32()? },
            7 => Self::Ready { user: r.i32()? },
            8 => Self::CancelReady { user: r.i32()? },
            9 => Self::CancelGame { user: r.i32()? },
            10 => Self::StartPlaying,
            11 => Self::Played {
                user: r.i32()?,
                score: r.i32()?,
                accuracy: r.f32()?,
                full_combo: r.bool()?,
            },
            12 => Self::GameEnd,
            13 => Self::Abort { user: r.i32()? },
            14 => Self::LockRoom { lock: r.bool()? },
            15 => Self::CycleRoom { cycle: r.bool()? },
            tag => return Err(CodecError::UnknownTag { kind: "Message", tag }),
        })
    }

    fn encode(&self, w: &mut WireWriter) {
        match self {
            Self::Chat { user, content } => {
                w.u8(0);
                w.i32(*user);
                w.string(content);
            },
            Self::CreateRoom { user } => {
                w.u8(1);
                w.i32(*user);
            },
            Self::JoinRoom { user, name } => {
                w.u8(2);
                w.i32(*user);
                w.string(name);
            },
            Self::LeaveRoom { user, name } => {
                w.u8(3);
                w.i32(*user);
                w.string(name);
            },
            Self::NewHost { user } => {
                w.u8(4);
                w.i32(*user);
            },
            Self::SelectChart { user, name, id } => {
                w.u8(5);
                w.i32(*user);
                w.string(name);
                w.i32(*id);
            },
            Self::GameStart { user } => {
                w.u8(6);
                w.i32(*user);
            },
            Self::Ready { user } => {
                w.u8(7);
                w.i32(*user);
            },
            Self::CancelReady { user } => {
                w.u8(8);
                w.i32(*user);
            },
            Self::CancelGame { user } => {
                w.u8(9);
                w.i32(*user);
            },
            Self::StartPlaying => w.u8(10),
            Self::Played { user, score, accuracy, full_combo } => {
                w.u8(11);
                w.i32(*user);
                w.i32(*score);
                w.f32(*accuracy);
                w.bool(*full_combo);
            },
            Self::GameEnd => w.u8(12),
            Self::Abort { user } => {
                w.u8(13);
                w.i32(*user);
            },
            Self::LockRoom { lock } => {
                w.u8(14);
                w.bool(*lock);
            },
            Self::CycleRoom { cycle } => {
                w.u8(15);
                w.bool(*cycle);
            },
        }
    }
}

/// Room lifecycle state as seen by clients, tagged 0..=2.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoomState {
    /// Host is choosing a chart; `Some` once one is selected.
    SelectChart(Option<i32>),
    /// Waiting for every player to declare ready.
    WaitingForReady,
    /// A round is in progress.
    Playing,
}

impl Default for RoomState {
    fn default() -> Self {
        Self::SelectChart(None)
    }
}

impl Wire for RoomState {
    fn decode(r: &mut WireReader<'_>) -> Result<Self, CodecError> {
        Ok(match r.u8()? {
            0 => Self::SelectChart(Option::decode(r)?),
            1 => Self::WaitingForReady,
            2 => Self::Playing,
            tag => return Err(CodecError::UnknownTag { kind: "RoomState", tag }),
        })
    }

    fn encode(&self, w: &mut WireWriter) {
        match self {
            Self::SelectChart(chart) => {
                w.u8(0);
                chart.encode(w);
            },
            Self::WaitingForReady => w.u8(1),
            Self::Playing => w.u8(2),
        }
    }
}

/// Public identity of a participant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserInfo {
    /// External account id.
    pub id: i32,
    /// Display name, at most 32 bytes on the wire.
    pub name: String,
    /// Whether this participant spectates as a monitor.
    pub monitor: bool,
}

impl Wire for UserInfo {
    fn decode(r: &mut WireReader<'_>) -> Result<Self, CodecError> {
        Ok(Self { id: r.i32()?, name: r.string()?, monitor: r.bool()? })
    }

    fn encode(&self, w: &mut WireWriter) {
        w.i32(self.id);
        w.string(&self.name);
        w.bool(self.monitor);
    }
}

/// Snapshot of a room sent to a (re)connecting member.
#[derive(Debug, Clone, PartialEq)]
pub struct ClientRoomState {
    /// Room id.
    pub id: RoomId,
    /// Current lifecycle state.
    pub state: RoomState,
    /// Whether a monitor is present (the room is being observed live).
    pub live: bool,
    /// Whether the room is locked against joins.
    pub locked: bool,
    /// Whether the selected chart is kept after a round.
    pub cycle: bool,
    /// Whether the receiver is the host.
    pub is_host: bool,
    /// Whether the receiver is currently marked ready.
    pub is_ready: bool,
    /// All members keyed by user id.
    pub users: HashMap<i32, UserInfo>,
}

impl Wire for ClientRoomState {
    fn decode(r: &mut WireReader<'_>) -> Result<Self, CodecError> {
        Ok(Self {
            id: RoomId::decode(r)?,
            state: RoomState::decode(r)?,
            live: r.bool()?,
            locked: r.bool()?,
            cycle: r.bool()?,
            is_host: r.bool()?,
            is_ready: r.bool()?,
            users: HashMap::decode(r)?,
        })
    }

    fn encode(&self, w: &mut WireWriter) {
        self.id.encode(w);
        self.state.encode(w);
        w.bool(self.live);
        w.bool(self.locked);
        w.bool(self.cycle);
        w.bool(self.is_host);
        w.bool(self.is_ready);
        self.users.encode(w);
    }
}

/// Payload of a successful join.
#[derive(Debug, Clone, PartialEq)]
pub struct JoinRoomResponse {
    /// Room state at join time.
    pub state: RoomState,
    /// Members at join time.
    pub users: Vec<UserInfo>,
    /// Whether a monitor is present.
    pub live: bool,
}

impl Wire for JoinRoomResponse {
    fn decode(r: &mut WireReader<'_>) -> Result<Self, CodecError> {
        Ok(Self { state: RoomState::decode(r)?, users: Vec::decode(r)?, live: r.bool()? })
    }

    fn encode(&self, w: &mut WireWriter) {
        self.state.encode(w);
        self.users.encode(w);
        w.bool(self.live);
    }
}

/// Commands sent from server to client, tagged 0..=19.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerCommand {
    /// Heartbeat reply.
    Pong,
    /// Authentication outcome; on success carries the identity and, after a
    /// reconnect, the current room snapshot.
    Authenticate(SResult<(UserInfo, Option<ClientRoomState>)>),
    /// Chat outcome.
    Chat(SResult<()>),
    /// Touch input forwarded from another player.
    Touches {
        /// Originating player id.
        player: i32,
        /// Batched touch frames.
        frames: Arc<Vec<TouchFrame>>,
    },
    /// Judgements forwarded from another player.
    Judges {
        /// Originating player id.
        player: i32,
        /// Batched judgement events.
        judges: Arc<Vec<JudgeEvent>>,
    },
    /// A broadcast room event.
    Message(Message),
    /// The room moved to a new lifecycle state.
    ChangeState(RoomState),
    /// The receiver's host status changed.
    ChangeHost(bool),
    /// Room creation outcome.
    CreateRoom(SResult<()>),
    /// Join outcome.
    JoinRoom(SResult<JoinRoomResponse>),
    /// Another user joined the receiver's room.
    OnJoinRoom(UserInfo),
    /// Leave outcome.
    LeaveRoom(SResult<()>),
    /// Lock outcome.
    LockRoom(SResult<()>),
    /// Cycle outcome.
    CycleRoom(SResult<()>),
    /// Chart selection outcome.
    SelectChart(SResult<()>),
    /// Start request outcome.
    RequestStart(SResult<()>),
    /// Ready outcome.
    Ready(SResult<()>),
    /// Ready withdrawal outcome.
    CancelReady(SResult<()>),
    /// Played report outcome.
    Played(SResult<()>),
    /// Abort outcome.
    Abort(SResult<()>),
}

impl Wire for ServerCommand {
    fn decode(r: &mut WireReader<'_>) -> Result<Self, CodecError> {
        Ok(match r.u8()? {
            0 => Self::Pong,
            1 => Self::Authenticate(Result::decode(r)?),
            2 => Self::Chat(Result::decode(r)?),
            3 => Self::Touches { player: r.i32()?, frames: Arc::decode(r)? },
            4 => Self::Judges { player: r.i32()?, judges: Arc::decode(r)? },
            5 => Self::Message(Message::decode(r)?),
            6 => Self::ChangeState(RoomState::decode(r)?),
            7 => Self::ChangeHost(r.bool()?),
            8 => Self::CreateRoom(Result::decode(r)?),
            9 => Self::JoinRoom(Result::decode(r)?),
            10 => Self::OnJoinRoom(UserInfo::decode(r)?),
            11 => Self::LeaveRoom(Result::decode(r)?),
            12 => Self::LockRoom(Result::decode(r)?),
            13 => Self::CycleRoom(Result::decode(r)?),
            14 => Self::SelectChart(Result::decode(r)?),
            15 => Self::RequestStart(Result::decode(r)?),
            16 => Self::Ready(Result::decode(r)?),
            17 => Self::CancelReady(Result::decode(r)?),
            18 => Self::Played(Result::decode(r)?),
            19 => Self::Abort(Result::decode(r)?),
            tag => return Err(CodecError::UnknownTag { kind: "ServerCommand", tag }),
        })
    }

    fn encode(&self, w: &mut WireWriter) {
        match self {
            Self::Pong => w.u8(0),
            Self::Authenticate(res) => {
                w.u8(1);
                res.encode(w);
            },
            Self::Chat(res) => {
                w.u8(2);
                res.encode(w);
            },
            Self::Touches { player, frames } => {
                w.u8(3);
                w.i32(*player);
                frames.encode(w);
            },
            Self::Judges { player, judges } => {
                w.u8(4);
                w.i32(*player);
                judges.encode(w);
            },
            Self::Message(msg) => {
                w.u8(5);
                msg.encode(w);
            },
            Self::ChangeState(state) => {
                w.u8(6);
                state.encode(w);
            },
            Self::ChangeHost(is_host) => {
                w.u8(7);
                w.bool(*is_host);
            },
            Self::CreateRoom(res) => {
                w.u8(8);
                res.encode(w);
            },
            Self::JoinRoom(res) => {
                w.u8(9);
                res.encode(w);
            },
            Self::OnJoinRoom(user) => {
                w.u8(10);
                user.encode(w);
            },
            Self::LeaveRoom(res) => {
                w.u8(11);
                res.encode(w);
            },
            Self::LockRoom(res) => {
                w.u8(12);
                res.encode(w);
            },
            Self::CycleRoom(res) => {
                w.u8(13);
                res.encode(w);
            },
            Self::SelectChart(res) => {
                w.u8(14);
                res.encode(w);
            },
            Self::RequestStart(res) => {
                w.u8(15);
                res.encode(w);
            },
            Self::Ready(res) => {
                w.u8(16);
                res.encode(w);
            },
            Self::CancelReady(res) => {
                w.u8(17);
                res.encode(w);
            },
            Self::Played(res) => {
                w.u8(18);
                res.encode(w);
            },
            Self::Abort(res) => {
                w.u8(19);
                res.encode(w);
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn room_id_validation() {
        assert!(RoomId::try_from("room-1_A").is_ok());
        assert!(RoomId::try_from("").is_err());
        assert!(RoomId::try_from("has space").is_err());
        assert!(RoomId::try_from("exactly-twenty-chars").is_ok());
        assert!(RoomId::try_from("twenty-one-characters").is_err());
    }

    #[test]
    fn varchar_enforces_limit_on_decode() {
        let mut w = WireWriter::new();
        w.string(&"x".repeat(33));
        let bytes = w.into_bytes();
        assert!(matches!(
            Varchar::<32>::from_wire_bytes(&bytes),
            Err(CodecError::StringTooLong { len: 33, limit: 32 })
        ));
    }

    #[test]
    fn client_command_tags_are_stable() {
        assert_eq!(ClientCommand::Ping.to_wire_bytes(), vec![0]);
        assert_eq!(ClientCommand::LeaveRoom.to_wire_bytes(), vec![7]);
        assert_eq!(ClientCommand::RequestStart.to_wire_bytes(), vec![11]);
        assert_eq!(ClientCommand::Abort.to_wire_bytes(), vec![15]);
        assert_eq!(ClientCommand::Played { id: 1 }.to_wire_bytes(), vec![14, 1, 0, 0, 0]);
    }

    #[test]
    fn server_command_tags_are_stable() {
        assert_eq!(ServerCommand::Pong.to_wire_bytes(), vec![0]);
        assert_eq!(ServerCommand::ChangeHost(true).to_wire_bytes(), vec![7, 1]);
        assert_eq!(ServerCommand::Abort(Ok(())).to_wire_bytes(), vec![19, 1]);
    }

    #[test]
    fn unknown_tags_are_rejected() {
        assert!(matches!(
            ClientCommand::from_wire_bytes(&[16]),
            Err(CodecError::UnknownTag { kind: "ClientCommand", tag: 16 })
        ));
        assert!(matches!(
            ServerCommand::from_wire_bytes(&[20]),
            Err(CodecError::UnknownTag { kind: "ServerCommand", tag: 20 })
        ));
        assert!(matches!(
            Message::from_wire_bytes(&[16]),
            Err(CodecError::UnknownTag { kind: "Message", tag: 16 })
        ));
        assert!(matches!(
            RoomState::from_wire_bytes(&[3]),
            Err(CodecError::UnknownTag { kind: "RoomState", tag: 3 })
        ));
    }

    #[test]
    fn truncated_command_body_is_eof() {
        // Played with only two of four score bytes.
        assert_eq!(ClientCommand::from_wire_bytes(&[14, 1, 0]), Err(CodecError::UnexpectedEof));
    }

    #[test]
    fn compact_pos_roundtrips_through_half() {
        let pos = CompactPos::new(0.5, -0.25);
        let back = CompactPos::from_wire_bytes(&pos.to_wire_bytes()).unwrap();
        assert_eq!(pos, back);
        assert!((back.x() - 0.5).abs() < 1e-3);
        assert!((back.y() + 0.25).abs() < 1e-3);
    }

    #[test]
    fn room_state_default_is_unselected() {
        assert_eq!(RoomState::default(), RoomState::SelectChart(None));
    }

    #[test]
    fn half_precision_edge_cases() {
        // Zeroes keep their sign bit.
        assert_eq!(f16::from_f32(0.0).to_bits(), 0x0000);
        assert_eq!(f16::from_f32(-0.0).to_bits(), 0x8000);

        // Infinities survive, NaN stays NaN.
        assert_eq!(f16::from_f32(f32::INFINITY).to_f32(), f32::INFINITY);
        assert_eq!(f16::from_f32(f32::NEG_INFINITY).to_f32(), f32::NEG_INFINITY);
        assert!(f16::from_f32(f32::NAN).to_f32().is_nan());

        // A subnormal half value roundtrips exactly.
        let subnormal = f16::from_bits(0x0001).to_f32();
        assert!(subnormal > 0.0);
        assert_eq!(f16::from_f32(subnormal).to_bits(), 0x0001);

        // Normal values round to the nearest representable half.
        let pos = CompactPos::new(0.1, -65504.0);
        let back = CompactPos::from_wire_bytes(&pos.to_wire_bytes()).unwrap();
        assert!((back.x() - 0.1).abs() < 1e-3);
        assert_eq!(back.y(), -65504.0);
    }
}
