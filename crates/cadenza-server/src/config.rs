//! Server configuration.
//!
//! Values come from three layers, strongest first: CLI arguments,
//! environment variables, built-in defaults. Invalid values are fatal
//! startup errors so a misconfigured server never limps along.

use std::{collections::HashSet, env, path::PathBuf, time::Duration};

use crate::error::ServerError;

/// Hard ceiling on room size.
pub const MAX_ROOM_USERS: usize = 64;

/// Default room size when `ROOM_MAX_USERS` is unset.
pub const DEFAULT_ROOM_USERS: usize = 8;

/// Timing knobs, defaulted to the protocol constants.
///
/// Tests shrink these to keep timer-driven paths fast; production uses the
/// defaults.
#[derive(Debug, Clone)]
pub struct Timing {
    /// Close a connection with no inbound frame for this long.
    pub disconnect_timeout: Duration,
    /// How long a dangling user is kept for rebinding after its session
    /// died.
    pub dangle_grace: Duration,
    /// Federation ticket lifetime.
    pub ticket_ttl: Duration,
    /// Interval of the ticket sweep task.
    pub ticket_sweep: Duration,
    /// Remote room cache entry lifetime.
    pub remote_room_ttl: Duration,
    /// Interval of the inactivity/dangle sweep task.
    pub sweep_interval: Duration,
}

impl Default for Timing {
    fn default() -> Self {
        Self {
            disconnect_timeout: cadenza_core::DISCONNECT_TIMEOUT,
            dangle_grace: Duration::from_secs(30),
            ticket_ttl: Duration::from_secs(30),
            ticket_sweep: Duration::from_secs(10),
            remote_room_ttl: Duration::from_secs(60),
            sweep_interval: Duration::from_secs(1),
        }
    }
}

/// Complete server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind host.
    pub host: String,
    /// Bind port. 0 binds an ephemeral port (tests).
    pub port: u16,
    /// Per-room member cap, clamped to `[1, 64]`.
    pub room_max_users: usize,
    /// Accounts allowed to join rooms as monitors.
    pub monitors: HashSet<i32>,
    /// Name this instance advertises to peers.
    pub server_name: String,
    /// Free-form tip line surfaced by the room list collaborator.
    pub room_list_tip: String,
    /// Whether finished rounds are handed to the replay recorder.
    pub replay_enabled: bool,
    /// Replay storage root.
    pub replay_dir: PathBuf,
    /// Static admin token for the admin collaborator surface.
    pub admin_token: Option<String>,
    /// Where the AdminData JSON lives.
    pub admin_data_path: PathBuf,
    /// Base URL of the identity/chart HTTP service.
    pub http_service: String,
    /// Port for the federation HTTP surface; `None` disables it.
    pub http_port: Option<u16>,
    /// Shared federation secret; `None` disables cross-server joins.
    pub fed_secret: Option<String>,
    /// Peer base URLs for room gossip.
    pub fed_peers: Vec<String>,
    /// Accounts whose activity the logger collaborator keeps out of files
    /// below DEBUG.
    pub test_account_ids: Vec<i32>,
    /// Server-side locale for the localization catalog.
    pub language: String,
    /// Timing knobs.
    pub timing: Timing,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_owned(),
            port: 12346,
            room_max_users: DEFAULT_ROOM_USERS,
            monitors: HashSet::new(),
            server_name: "cadenza".to_owned(),
            room_list_tip: String::new(),
            replay_enabled: false,
            replay_dir: PathBuf::from("record"),
            admin_token: None,
            admin_data_path: PathBuf::from("admin-data.json"),
            http_service: "http://127.0.0.1:8080".to_owned(),
            http_port: None,
            fed_secret: None,
            fed_peers: Vec::new(),
            test_account_ids: vec![1_739_989],
            language: "en".to_owned(),
            timing: Timing::default(),
        }
    }
}

fn parse_env<T: std::str::FromStr>(key: &str) -> Result<Option<T>, ServerError> {
    match env::var(key) {
        Ok(raw) => raw
            .parse()
            .map(Some)
            .map_err(|_| ServerError::Config(format!("invalid {key}: '{raw}'"))),
        Err(_) => Ok(None),
    }
}

impl ServerConfig {
    /// Build configuration from the process environment.
    pub fn from_env() -> Result<Self, ServerError> {
        let mut config = Self::default();

        if let Some(host) = parse_env::<String>("HOST")? {
            config.host = host;
        }
        if let Some(port) = parse_env::<u16>("PORT")? {
            config.port = port;
        }
        if let Some(max) = parse_env::<usize>("ROOM_MAX_USERS")? {
            config.room_max_users = max.clamp(1, MAX_ROOM_USERS);
        }
        if let Ok(raw) = env::var("MONITORS") {
            config.monitors = raw
                .split(',')
                .filter(|s| !s.trim().is_empty())
                .map(|s| {
                    s.trim()
                        .parse()
                        .map_err(|_| ServerError::Config(format!("invalid MONITORS entry: '{s}'")))
                })
                .collect::<Result<_, _>>()?;
        }
        if let Some(name) = parse_env::<String>("SERVER_NAME")? {
            config.server_name = name;
        }
        if let Some(tip) = parse_env::<String>("ROOM_LIST_TIP")? {
            config.room_list_tip = tip;
        }
        if let Some(enabled) = parse_env::<bool>("REPLAY_ENABLED")? {
            config.replay_enabled = enabled;
        }
        if let Some(dir) = parse_env::<String>("REPLAY_DIR")? {
            config.replay_dir = PathBuf::from(dir);
        }
        if let Ok(token) = env::var("ADMIN_TOKEN") {
            if !token.is_empty() {
                config.admin_token = Some(token);
            }
        }
        if let Some(path) = parse_env::<String>("ADMIN_DATA_PATH")? {
            config.admin_data_path = PathBuf::from(path);
        }
        if let Some(service) = parse_env::<String>("HTTP_SERVICE")? {
            config.http_service = service;
        }
        if let Some(port) = parse_env::<u16>("HTTP_PORT")? {
            config.http_port = Some(port);
        }
        if let Ok(secret) = env::var("FED_SECRET") {
            if !secret.is_empty() {
                config.fed_secret = Some(secret);
            }
        }
        if let Ok(peers) = env::var("FED_PEERS") {
            config.fed_peers =
                peers.split(',').filter(|s| !s.trim().is_empty()).map(str::to_owned).collect();
        }
        if let Some(lang) = parse_env::<String>("CADENZA_LANG")? {
            config.language = lang;
        } else if let Some(lang) = parse_env::<String>("LANG")? {
            // "en_US.UTF-8" style values: keep the language part.
            config.language = lang.split(['_', '.']).next().unwrap_or("en").to_owned();
        }

        Ok(config)
    }

    /// Socket address string to bind.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
