//! Cadenza multiplayer coordination server.
//!
//! Clients hold framed TCP sessions, authenticate against an external
//! identity service, and play lock-step rounds in small host-driven rooms:
//! select chart, wait for ready, play, settle. During play the server fans
//! touch and judgement traffic out between participants and watches every
//! connection's liveness so disconnects resolve deterministically.
//!
//! Layering, bottom up: [`room`] is the pure per-room state machine;
//! [`state`] owns the registries and the global serialization mutex;
//! [`session`] drives one connection; [`server`] composes the listener,
//! sweepers, and graceful shutdown. [`federation`] adds cross-server joins
//! via one-shot tickets. [`services`], [`replay`], and [`l10n`] are seams
//! for external collaborators.

pub mod config;
pub mod error;
pub mod federation;
pub mod l10n;
pub mod persist;
pub mod replay;
pub mod room;
pub mod services;
pub mod session;
pub mod state;
pub mod user;

mod server;

pub use config::{ServerConfig, Timing};
pub use error::ServerError;
pub use persist::AdminData;
pub use server::{Server, ServerBuilder, ShutdownHandle};
pub use state::{Hooks, ServerState};
