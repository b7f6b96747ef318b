//! Server error types.

/// Fatal server-level errors.
///
/// These abort startup or tear down the whole process. Per-connection and
/// per-command failures never surface here; they are answered on the wire
/// as localized reason strings and the connection stays open.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// Invalid configuration (bad port, unparsable env var, bad paths).
    #[error("configuration error: {0}")]
    Config(String),

    /// Listener/socket failure at startup or accept time.
    #[error("transport error: {0}")]
    Transport(#[from] std::io::Error),

    /// Admin data could not be loaded or persisted.
    #[error("admin data error: {0}")]
    AdminData(String),
}
