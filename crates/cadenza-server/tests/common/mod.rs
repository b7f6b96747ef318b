//! Shared harness for the end-to-end tests: deterministic identity/chart
//! services and a server bound to an ephemeral port.

#![allow(dead_code)]

use std::{collections::HashSet, future::Future, net::SocketAddr, sync::Arc, time::Duration};

use async_trait::async_trait;
use cadenza_server::{
    Server, ServerConfig, ServerState, ShutdownHandle,
    services::{ChartInfo, ChartService, IdentityProfile, IdentityService, RecordInfo, ServiceError},
};
use tokio::task::JoinHandle;

/// Token for alice (id 100): 32 a's.
pub const ALICE: &str = "aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa";
/// Token for bob (id 101): 32 b's.
pub const BOB: &str = "bbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb";
/// Token for carol (id 102): 32 c's.
pub const CAROL: &str = "cccccccccccccccccccccccccccccccc";
/// Token for dave (id 103): 32 d's.
pub const DAVE: &str = "dddddddddddddddddddddddddddddddd";

/// Identity service recognizing the fixed test tokens.
pub struct TestIdentity;

#[async_trait]
impl IdentityService for TestIdentity {
    async fn me(&self, token: &str) -> Result<IdentityProfile, ServiceError> {
        let (id, name) = match token {
            ALICE => (100, "alice"),
            BOB => (101, "bob"),
            CAROL => (102, "carol"),
            DAVE => (103, "dave"),
            _ => return Err(ServiceError::Unauthorized),
        };
        Ok(IdentityProfile { id, name: name.to_owned(), language: "en".to_owned() })
    }
}

/// Chart/record service with deterministic answers. Negative chart ids
/// resolve to nothing, mirroring an upstream 404.
pub struct TestCharts;

#[async_trait]
impl ChartService for TestCharts {
    async fn chart(&self, id: i32) -> Result<ChartInfo, ServiceError> {
        if id < 0 {
            return Err(ServiceError::NotFound);
        }
        Ok(ChartInfo { id, name: format!("chart-{id}") })
    }

    async fn record(&self, id: i32) -> Result<RecordInfo, ServiceError> {
        Ok(RecordInfo { score: 900_000 + id, accuracy: 0.97, full_combo: true })
    }
}

/// Chart service whose record lookups always fail: charts resolve
/// normally, records never do.
pub struct FailingRecords;

#[async_trait]
impl ChartService for FailingRecords {
    async fn chart(&self, id: i32) -> Result<ChartInfo, ServiceError> {
        TestCharts.chart(id).await
    }

    async fn record(&self, _id: i32) -> Result<RecordInfo, ServiceError> {
        Err(ServiceError::Other("record service down".to_owned()))
    }
}

/// A running server plus the handles tests need.
pub struct TestServer {
    pub addr: SocketAddr,
    pub fed_http_addr: Option<SocketAddr>,
    pub state: Arc<ServerState>,
    pub shutdown: ShutdownHandle,
    pub task: JoinHandle<Result<(), cadenza_server::ServerError>>,
    _admin_dir: tempfile::TempDir,
}

impl TestServer {
    /// Stop the server and wait for the graceful drain.
    pub async fn stop(self) {
        self.shutdown.shutdown();
        let _ = tokio::time::timeout(Duration::from_secs(5), self.task).await;
    }
}

/// Base config for tests: loopback, ephemeral port, bob is a monitor.
pub fn test_config() -> ServerConfig {
    ServerConfig {
        host: "127.0.0.1".to_owned(),
        port: 0,
        monitors: HashSet::from([101]),
        ..ServerConfig::default()
    }
}

/// Boot a server with the deterministic collaborators.
pub async fn start_server(config: ServerConfig) -> TestServer {
    start_server_with_charts(config, Arc::new(TestCharts)).await
}

/// Boot a server with a custom chart/record service.
pub async fn start_server_with_charts(
    mut config: ServerConfig,
    charts: Arc<dyn ChartService>,
) -> TestServer {
    let admin_dir = tempfile::tempdir().expect("tempdir");
    config.admin_data_path = admin_dir.path().join("admin-data.json");

    let server = Server::builder(config)
        .identity(Arc::new(TestIdentity))
        .charts(charts)
        .bind()
        .await
        .expect("bind test server");

    let addr = server.local_addr().expect("local addr");
    let fed_http_addr = server.fed_http_addr();
    let state = server.state();
    let shutdown = server.shutdown_handle();
    let task = tokio::spawn(server.run());

    TestServer { addr, fed_http_addr, state, shutdown, task, _admin_dir: admin_dir }
}

/// Poll `check` until it yields true or the deadline passes.
pub async fn eventually<F, Fut>(what: &str, check: F)
where
    F: Fn() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = Duration::from_secs(5);
    let poll = async {
        loop {
            if check().await {
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    };
    if tokio::time::timeout(deadline, poll).await.is_err() {
        panic!("timed out waiting for: {what}");
    }
}
