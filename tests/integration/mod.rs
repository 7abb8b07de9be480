#![allow(clippy::unwrap_used, clippy::expect_used)]

//! Integration tests for GameBridge
//!
//! These tests exercise the bridge end-to-end: real sockets, real codec,
//! real timers. Most run over TCP with shortened budgets; `tls_test`
//! covers the mutual-TLS path.

mod action_test;
mod handshake_test;
mod telemetry_test;
mod tls_test;

use gamebridge_common::config::TimeoutsConfig;
use gamebridge_core::metrics::BridgeMetrics;
use gamebridge_core::transport::TransportConfig;
use gamebridge_core::{BridgeClient, BridgeServer, SessionRegistry};
use gamebridge_protocol::{Capability, Role};
use std::collections::BTreeSet;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;

static NEXT_PORT: std::sync::atomic::AtomicU16 = std::sync::atomic::AtomicU16::new(30500);

pub fn get_free_port() -> u16 {
    use std::sync::atomic::Ordering;
    loop {
        let port = NEXT_PORT.fetch_add(1, Ordering::Relaxed);
        if std::net::TcpListener::bind(("127.0.0.1", port)).is_ok() {
            return port;
        }
    }
}

/// Wait for a server to start listening
pub async fn wait_for_server(addr: SocketAddr, timeout: Duration) -> bool {
    let start = std::time::Instant::now();
    while start.elapsed() < timeout {
        if tokio::net::TcpStream::connect(addr).await.is_ok() {
            return true;
        }
        sleep(Duration::from_millis(20)).await;
    }
    false
}

/// Budgets small enough to keep timeout scenarios under a second.
pub fn fast_timeouts() -> TimeoutsConfig {
    TimeoutsConfig {
        hello_ms: 300,
        send_telemetry_ms: 100,
        send_action_ms: 200,
        transport_send_ms: 1000,
        action_default_ttl_ms: 5000,
    }
}

pub struct TestBridge {
    pub addr: SocketAddr,
    pub metrics: Arc<BridgeMetrics>,
    pub registry: SessionRegistry,
}

impl TestBridge {
    pub fn addr_string(&self) -> String {
        self.addr.to_string()
    }
}

/// Start a TCP bridge with fast budgets on a free port.
pub async fn start_bridge() -> TestBridge {
    start_bridge_with(|server| server).await
}

/// Opt-in logging for debugging test runs: `RUST_LOG=debug cargo test`.
fn init_test_logging() {
    use tracing_subscriber::EnvFilter;
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Start a TCP bridge, letting the caller adjust the builder first.
pub async fn start_bridge_with(
    customize: impl FnOnce(BridgeServer) -> BridgeServer,
) -> TestBridge {
    init_test_logging();
    let addr: SocketAddr = format!("127.0.0.1:{}", get_free_port()).parse().unwrap();
    let server = customize(
        BridgeServer::new(addr)
            .with_transport(TransportConfig::Tcp)
            .with_timeouts(fast_timeouts()),
    );
    let metrics = server.metrics();
    let registry = server.registry();
    tokio::spawn(async move {
        let _ = server.run().await;
    });
    assert!(
        wait_for_server(addr, Duration::from_secs(5)).await,
        "bridge did not come up on {addr}"
    );
    TestBridge {
        addr,
        metrics,
        registry,
    }
}

pub fn all_caps() -> BTreeSet<Capability> {
    Capability::ALL.into_iter().collect()
}

pub fn caps(list: &[Capability]) -> BTreeSet<Capability> {
    list.iter().copied().collect()
}

/// Receive the next payload, with a test-friendly deadline.
pub async fn recv_payload(client: &mut BridgeClient) -> gamebridge_protocol::Payload {
    tokio::time::timeout(Duration::from_secs(3), client.recv_envelope())
        .await
        .expect("payload within deadline")
        .expect("connection open")
        .payload
}

/// Connect and complete the handshake as a game client.
pub async fn connect_game_client(bridge: &TestBridge, agent_id: &str) -> BridgeClient {
    let mut client = BridgeClient::connect(&bridge.addr_string(), &TransportConfig::Tcp)
        .await
        .expect("connect");
    client
        .hello(agent_id, Role::GameClient, all_caps(), "fabric-mod/0.4")
        .await
        .expect("game client handshake");
    client
}

/// Connect and complete the handshake as an orchestrator.
pub async fn connect_orchestrator(bridge: &TestBridge, agent_id: &str) -> BridgeClient {
    let mut client = BridgeClient::connect(&bridge.addr_string(), &TransportConfig::Tcp)
        .await
        .expect("connect");
    client
        .hello(agent_id, Role::Orchestrator, all_caps(), "orchestrator/0.4")
        .await
        .expect("orchestrator handshake");
    client
}
