//! Wire codec for the Cadenza multiplayer protocol.
//!
//! Everything in this crate is pure: byte buffers in, typed values out, no
//! I/O. The layers, bottom up:
//!
//! - [`wire`] - typed little-endian reader/writer plus the [`Wire`] trait
//!   implemented by every value that crosses the socket.
//! - [`frame`] - ULEB128 length-prefixed framing with a hard payload cap.
//! - [`command`] - the tagged command/message unions exchanged between
//!   client and server, and the room/user aggregates they carry.
//! - [`federation`] - the compact peer-to-peer packet with a 6-bit-packed
//!   room id and a truncated HMAC trailer.
//!
//! Tag assignments are stable: appending variants is allowed, reordering is
//! a protocol break. Unknown tags are decode errors and the connection that
//! produced them is expected to be closed by the transport layer.

pub mod command;
mod error;
pub mod federation;
pub mod frame;
pub mod wire;

pub use command::{
    ClientCommand, ClientRoomState, CompactPos, JoinRoomResponse, JudgeEvent, Judgement, Message,
    RoomId, RoomState, ServerCommand, TouchFrame, UserInfo, Varchar,
};
pub use error::CodecError;
pub use federation::CompactPacket;
pub use frame::{FrameCodec, MAX_FRAME_LEN};
pub use wire::{Wire, WireReader, WireWriter};

/// Protocol version carried in the first byte of every connection.
pub const PROTOCOL_VERSION: u8 = 1;
