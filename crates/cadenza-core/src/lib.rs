//! Framed transport and per-connection plumbing shared by the Cadenza
//! server and client.
//!
//! [`stream::Stream`] owns one socket: it performs the one-byte version
//! handshake, peels length-prefixed frames off the receive buffer, and
//! dispatches decoded packets to a handler strictly in arrival order.
//! [`rate_limit::TokenBucket`] is the pure limiter the server attaches to
//! each command class.

pub mod rate_limit;
pub mod stream;

use std::time::Duration;

pub use rate_limit::TokenBucket;
pub use stream::{PacketHandler, Stream, StreamError};

/// Interval at which a client sends heartbeat pings.
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(3);

/// How long a client waits for a pong before counting a miss.
pub const HEARTBEAT_TIMEOUT: Duration = Duration::from_secs(2);

/// Hard disconnect threshold: a connection with no inbound frame for this
/// long is closed and its user marked dangling.
pub const DISCONNECT_TIMEOUT: Duration = Duration::from_secs(10);
