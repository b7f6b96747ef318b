//! Server entry: listener, accept loop, background sweepers, graceful
//! shutdown.

use std::{net::SocketAddr, sync::Arc, time::Instant};

use cadenza_core::stream::{Stream, StreamConfig};
use cadenza_proto::{FrameCodec, PROTOCOL_VERSION};
use tokio::{
    net::{TcpListener, TcpStream},
    sync::watch,
    task::JoinHandle,
};

use crate::{
    config::ServerConfig,
    error::ServerError,
    l10n::{Catalog, KeyCatalog},
    replay::{FileRecorder, NullRecorder, ReplayRecorder},
    services::{ChartService, HttpServices, IdentityService},
    session::{Session, SessionHandler, ping_fast_path},
    state::{Hooks, ServerState},
};

/// Builder wiring collaborators into a server.
///
/// Defaults talk to the configured HTTP service and write replays to disk
/// when enabled; tests swap in deterministic implementations.
pub struct ServerBuilder {
    config: ServerConfig,
    identity: Option<Arc<dyn IdentityService>>,
    charts: Option<Arc<dyn ChartService>>,
    catalog: Arc<dyn Catalog>,
    replay: Option<Arc<dyn ReplayRecorder>>,
    hooks: Hooks,
}

impl ServerBuilder {
    /// Start from a configuration.
    pub fn new(config: ServerConfig) -> Self {
        Self {
            config,
            identity: None,
            charts: None,
            catalog: Arc::new(KeyCatalog),
            replay: None,
            hooks: Hooks::default(),
        }
    }

    /// Replace the identity resolver.
    pub fn identity(mut self, identity: Arc<dyn IdentityService>) -> Self {
        self.identity = Some(identity);
        self
    }

    /// Replace the chart/record resolver.
    pub fn charts(mut self, charts: Arc<dyn ChartService>) -> Self {
        self.charts = Some(charts);
        self
    }

    /// Replace the localization catalog.
    pub fn catalog(mut self, catalog: Arc<dyn Catalog>) -> Self {
        self.catalog = catalog;
        self
    }

    /// Replace the replay recorder.
    pub fn replay(mut self, replay: Arc<dyn ReplayRecorder>) -> Self {
        self.replay = Some(replay);
        self
    }

    /// Install plugin hooks.
    pub fn hooks(mut self, hooks: Hooks) -> Self {
        self.hooks = hooks;
        self
    }

    /// Bind the TCP listener (and the federation HTTP listener, when
    /// configured) and start the background tasks.
    pub async fn bind(self) -> Result<Server, ServerError> {
        let config = self.config;

        let http = Arc::new(HttpServices::new(config.http_service.clone()));
        let identity =
            self.identity.unwrap_or_else(|| http.clone() as Arc<dyn IdentityService>);
        let charts = self.charts.unwrap_or_else(|| http.clone() as Arc<dyn ChartService>);
        let replay: Arc<dyn ReplayRecorder> = match self.replay {
            Some(replay) => replay,
            None if config.replay_enabled => Arc::new(FileRecorder::new(&config.replay_dir)),
            None => Arc::new(NullRecorder),
        };

        let listener = TcpListener::bind(config.bind_addr()).await?;
        tracing::info!("listening on {}", listener.local_addr()?);

        let state = Arc::new(ServerState::new(
            config,
            identity,
            charts,
            self.catalog,
            replay,
            self.hooks,
        )?);

        let (shutdown, _) = watch::channel(false);
        let mut tasks = Vec::new();

        tasks.push(tokio::spawn(sweeper(Arc::clone(&state))));

        let fed_http_addr = if let Some(router) = state.federation().router() {
            if let Some(port) = state.config().http_port {
                let addr = format!("{}:{port}", state.config().host);
                let http_listener = TcpListener::bind(&addr).await?;
                let local = http_listener.local_addr()?;
                tracing::info!("federation http on {local}");
                tasks.push(tokio::spawn(async move {
                    if let Err(err) = axum::serve(http_listener, router).await {
                        tracing::error!("federation http failed: {err}");
                    }
                }));
                tasks.push(tokio::spawn(gossip(Arc::clone(&state), local)));
                Some(local)
            } else {
                None
            }
        } else {
            None
        };

        Ok(Server { state, listener, shutdown, tasks, fed_http_addr })
    }
}

/// A bound, running server.
pub struct Server {
    state: Arc<ServerState>,
    listener: TcpListener,
    shutdown: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
    fed_http_addr: Option<SocketAddr>,
}

impl Server {
    /// Bind with default collaborators.
    pub async fn bind(config: ServerConfig) -> Result<Self, ServerError> {
        ServerBuilder::new(config).bind().await
    }

    /// Builder for swapping collaborators.
    pub fn builder(config: ServerConfig) -> ServerBuilder {
        ServerBuilder::new(config)
    }

    /// Address the TCP listener is bound to.
    pub fn local_addr(&self) -> Result<SocketAddr, ServerError> {
        Ok(self.listener.local_addr()?)
    }

    /// Address of the federation HTTP surface, if enabled.
    pub fn fed_http_addr(&self) -> Option<SocketAddr> {
        self.fed_http_addr
    }

    /// Shared state, for the admin collaborator surface and tests.
    pub fn state(&self) -> Arc<ServerState> {
        Arc::clone(&self.state)
    }

    /// Handle that stops [`Server::run`] from another task.
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle(self.shutdown.clone())
    }

    /// Accept connections until shut down, then drain gracefully: stop
    /// accepting, close every session, drop rooms and federation state,
    /// flush admin data.
    pub async fn run(self) -> Result<(), ServerError> {
        let mut shutdown_rx = self.shutdown.subscribe();
        loop {
            tokio::select! {
                accepted = self.listener.accept() => {
                    match accepted {
                        Ok((socket, peer)) => {
                            tokio::spawn(handle_connection(
                                Arc::clone(&self.state),
                                socket,
                                peer,
                            ));
                        },
                        Err(err) => {
                            tracing::warn!("accept failed: {err}");
                        },
                    }
                },
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        break;
                    }
                },
            }
        }

        tracing::info!("shutting down");
        drop(self.listener);
        self.state.shutdown().await;
        for task in self.tasks {
            task.abort();
        }
        tracing::info!("shutdown complete");
        Ok(())
    }
}

/// Clonable stop signal for a running server.
#[derive(Clone)]
pub struct ShutdownHandle(watch::Sender<bool>);

impl ShutdownHandle {
    /// Request a graceful stop.
    pub fn shutdown(&self) {
        let _ = self.0.send(true);
    }
}

async fn handle_connection(state: Arc<ServerState>, socket: TcpStream, peer: SocketAddr) {
    if let Err(err) = socket.set_nodelay(true) {
        tracing::debug!(%peer, "set_nodelay failed: {err}");
    }

    let session = Session::new(Arc::clone(&state));
    let config = StreamConfig { codec: FrameCodec::new(), fast_path: Some(ping_fast_path) };
    let handler = Arc::new(SessionHandler::new(Arc::clone(&session)));

    match Stream::accept(socket, &[PROTOCOL_VERSION], handler, config).await {
        Ok(stream) => {
            session.bind_stream(Arc::new(stream));
            state.register_session(Arc::clone(&session)).await;
            tracing::debug!(session = %session.id(), %peer, "connection accepted");
        },
        Err(err) => {
            tracing::warn!(%peer, "handshake failed: {err}");
        },
    }
}

/// Inactivity/dangle sweeping plus federation expiry, on their own
/// cadences.
async fn sweeper(state: Arc<ServerState>) {
    let session_every = state.config().timing.sweep_interval;
    let tickets_every = state.config().timing.ticket_sweep;
    let mut sessions = tokio::time::interval(session_every);
    let mut tickets = tokio::time::interval(tickets_every);

    loop {
        tokio::select! {
            _ = sessions.tick() => state.sweep(Instant::now()).await,
            _ = tickets.tick() => state.federation().sweep(Instant::now()),
        }
    }
}

/// Advertise our rooms to peers on a fraction of the cache TTL.
async fn gossip(state: Arc<ServerState>, own_addr: SocketAddr) {
    let every = state.config().timing.remote_room_ttl / 3;
    let base_url = format!("http://{own_addr}");
    let mut interval = tokio::time::interval(every);

    loop {
        interval.tick().await;
        let adverts = state.room_adverts().await;
        state.federation().gossip(adverts, base_url.clone()).await;
    }
}
