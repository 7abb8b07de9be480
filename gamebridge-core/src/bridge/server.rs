//! The bridge session server
//!
//! Accept loop, per-connection handshake, and the Established session loop.
//! Each connection runs two tasks: this one decoding inbound envelopes and a
//! spawned outbound writer. Teardown always runs the Closing sequence:
//! deregister, notify the correlator, drop the queues.

use crate::bridge::registry::SessionRegistry;
use crate::bridge::session::{
    run_outbound, Outbound, SessionHandle, SessionShared, SessionState, Stamper,
};
use crate::channel::latest_slot;
use crate::correlator::{self, CorrelatorHandle};
use crate::metrics::BridgeMetrics;
use crate::router::{RouteOutcome, SessionRouter};
use crate::transport::{Acceptor, BoxedStream, TransportConfig};
use futures::{SinkExt, StreamExt};
use gamebridge_common::config::{BridgeConfig, LimitsConfig, QueuesConfig, TimeoutsConfig};
use gamebridge_common::{mono_ms, BridgeError, Result};
use gamebridge_protocol::constants::PROTOCOL_VERSION;
use gamebridge_protocol::validation::{validate_envelope, ValidationLimits};
use gamebridge_protocol::{
    Capability, Envelope, EnvelopeCodec, ErrorCode, ErrorFrame, Hello, HelloAck, Inbound, Payload,
};
use std::collections::BTreeSet;
use std::net::SocketAddr;
use std::sync::atomic::AtomicU64;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::time::timeout;
use tokio_util::codec::{Framed, FramedRead, FramedWrite};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Agent id the bridge uses when speaking for itself (legacy hello reply).
const BRIDGE_AGENT_ID: &str = "bridge";

pub struct BridgeServer {
    addr: SocketAddr,
    transport: TransportConfig,
    limits: LimitsConfig,
    timeouts: TimeoutsConfig,
    queues: QueuesConfig,
    capabilities: BTreeSet<Capability>,
    registry: SessionRegistry,
    metrics: Arc<BridgeMetrics>,
}

impl BridgeServer {
    /// A server with default budgets, every capability, and TCP transport.
    /// Production deployments go through [`BridgeServer::from_config`].
    pub fn new(addr: SocketAddr) -> Self {
        Self {
            addr,
            transport: TransportConfig::default(),
            limits: LimitsConfig::default(),
            timeouts: TimeoutsConfig::default(),
            queues: QueuesConfig::default(),
            capabilities: Capability::ALL.into_iter().collect(),
            registry: SessionRegistry::new(),
            metrics: Arc::new(BridgeMetrics::default()),
        }
    }

    /// Build a server from a [`BridgeConfig`]. Fails on unknown capability
    /// names or partially specified TLS material.
    pub fn from_config(config: &BridgeConfig) -> Result<Self> {
        let capabilities = parse_capabilities(&config.server.capabilities)?;
        let transport = match (
            &config.tls.ca_path,
            &config.tls.cert_path,
            &config.tls.key_path,
        ) {
            (Some(ca), Some(cert), Some(key)) => {
                TransportConfig::Tls(crate::transport::tls::TlsTransportConfig {
                    ca_path: ca.clone(),
                    cert_path: cert.clone(),
                    key_path: key.clone(),
                    server_name: config.tls.server_name.clone(),
                })
            }
            (None, None, None) => TransportConfig::Tcp,
            _ => {
                return Err(BridgeError::Config(
                    "tls.ca_path, tls.cert_path and tls.key_path must all be set".to_string(),
                ))
            }
        };

        Ok(Self {
            addr: config.bind_addr,
            transport,
            limits: config.limits.clone(),
            timeouts: config.timeouts.clone(),
            queues: config.queues.clone(),
            capabilities,
            registry: SessionRegistry::new(),
            metrics: Arc::new(BridgeMetrics::default()),
        })
    }

    #[must_use]
    pub fn with_transport(mut self, transport: TransportConfig) -> Self {
        self.transport = transport;
        self
    }

    #[must_use]
    pub fn with_timeouts(mut self, timeouts: TimeoutsConfig) -> Self {
        self.timeouts = timeouts;
        self
    }

    #[must_use]
    pub fn with_limits(mut self, limits: LimitsConfig) -> Self {
        self.limits = limits;
        self
    }

    #[must_use]
    pub fn with_queues(mut self, queues: QueuesConfig) -> Self {
        self.queues = queues;
        self
    }

    #[must_use]
    pub fn with_capabilities(mut self, capabilities: BTreeSet<Capability>) -> Self {
        self.capabilities = capabilities;
        self
    }

    pub fn registry(&self) -> SessionRegistry {
        self.registry.clone()
    }

    pub fn metrics(&self) -> Arc<BridgeMetrics> {
        self.metrics.clone()
    }

    /// Bind and serve until the task is dropped.
    ///
    /// Certificate material is loaded before the bind so TLS problems and
    /// bind failures stay distinguishable to the caller.
    pub async fn run(self) -> Result<()> {
        let acceptor = Arc::new(
            Acceptor::from_config(&self.transport).map_err(|e| BridgeError::Tls(e.to_string()))?,
        );
        let listener = TcpListener::bind(self.addr)
            .await
            .map_err(BridgeError::Bind)?;
        info!(addr = %self.addr, "bridge listening");

        let correlator = correlator::spawn(
            self.registry.clone(),
            self.metrics.clone(),
            self.timeouts.clone(),
        );
        let ctx = Arc::new(ConnCtx {
            registry: self.registry.clone(),
            correlator,
            metrics: self.metrics.clone(),
            timeouts: self.timeouts,
            queues: self.queues,
            limits: self.limits,
            capabilities: self.capabilities,
            validation: ValidationLimits::default(),
        });

        loop {
            match listener.accept().await {
                Ok((tcp_stream, peer_addr)) => {
                    let acceptor = acceptor.clone();
                    let ctx = ctx.clone();
                    tokio::spawn(async move {
                        // TLS failures are dropped at the transport; there
                        // is no application-level reply to an unauthenticated
                        // peer.
                        let stream = match acceptor.upgrade(tcp_stream).await {
                            Ok(stream) => stream,
                            Err(e) => {
                                debug!(peer = %peer_addr, error = %e, "transport handshake failed");
                                return;
                            }
                        };
                        if let Err(e) = handle_connection(stream, peer_addr, ctx).await {
                            debug!(peer = %peer_addr, error = %e, "session ended with error");
                        }
                    });
                }
                Err(e) => error!(error = %e, "accept error"),
            }
        }
    }
}

fn parse_capabilities(names: &[String]) -> Result<BTreeSet<Capability>> {
    names
        .iter()
        .map(|name| {
            name.parse::<Capability>()
                .map_err(|e| BridgeError::Config(e.to_string()))
        })
        .collect()
}

/// Everything a connection task needs, shared across sessions.
struct ConnCtx {
    registry: SessionRegistry,
    correlator: CorrelatorHandle,
    metrics: Arc<BridgeMetrics>,
    timeouts: TimeoutsConfig,
    queues: QueuesConfig,
    limits: LimitsConfig,
    capabilities: BTreeSet<Capability>,
    validation: ValidationLimits,
}

#[allow(clippy::too_many_lines)]
async fn handle_connection(
    stream: BoxedStream,
    peer_addr: SocketAddr,
    ctx: Arc<ConnCtx>,
) -> Result<()> {
    let session_id = Uuid::new_v4();
    let codec = EnvelopeCodec::with_max_frame_size(ctx.limits.max_frame_bytes as usize);
    let mut framed = Framed::new(stream, codec);
    let mut stamper = Stamper::new(session_id.to_string());

    // --- AwaitingHello ---
    let hello_budget = Duration::from_millis(ctx.timeouts.hello_ms);
    let first = match timeout(hello_budget, framed.next()).await {
        Err(_) => {
            debug!(peer = %peer_addr, state = ?SessionState::AwaitingHello, "hello timeout");
            let envelope = stamper.stamp(
                0,
                Payload::Error(ErrorFrame::new(
                    ErrorCode::HelloTimeout,
                    "no hello within budget",
                )),
            );
            let _ = framed.send(envelope).await;
            return Ok(());
        }
        Ok(None) => return Ok(()),
        Ok(Some(Err(e))) => return Err(e.into()),
        Ok(Some(Ok(inbound))) => inbound,
    };

    let envelope = match first {
        Inbound::Envelope(envelope) => envelope,
        Inbound::Unsupported { head, .. } => {
            let envelope = stamper.stamp(
                head.seq,
                Payload::Error(ErrorFrame::new(
                    ErrorCode::HandshakeRequired,
                    "hello must be the first envelope",
                )),
            );
            let _ = framed.send(envelope).await;
            return Ok(());
        }
        Inbound::Malformed { reason } => {
            let envelope = stamper.stamp(
                0,
                Payload::Error(ErrorFrame::new(ErrorCode::CodecError, reason)),
            );
            let _ = framed.send(envelope).await;
            return Ok(());
        }
    };

    if envelope.head.protocol_version != PROTOCOL_VERSION {
        let reply = stamper.stamp(
            envelope.head.seq,
            Payload::Error(ErrorFrame::new(
                ErrorCode::VersionMismatch,
                format!(
                    "protocol version {} not supported",
                    envelope.head.protocol_version
                ),
            )),
        );
        let _ = framed.send(reply).await;
        return Ok(());
    }
    if let Err(e) = validate_envelope(&envelope, &ctx.validation) {
        let reply = stamper.stamp(
            envelope.head.seq,
            Payload::Error(ErrorFrame::new(ErrorCode::CodecError, e.to_string())),
        );
        let _ = framed.send(reply).await;
        return Ok(());
    }

    let (hello, hello_head) = match envelope {
        Envelope {
            head,
            payload: Payload::Hello(hello),
        } => (*hello, head),
        Envelope { head, .. } => {
            let reply = stamper.stamp(
                head.seq,
                Payload::Error(ErrorFrame::new(
                    ErrorCode::HandshakeRequired,
                    "hello must be the first envelope",
                )),
            );
            let _ = framed.send(reply).await;
            return Ok(());
        }
    };

    // The handshake id is always server-assigned; a client-proposed one is
    // recorded but never echoed as-is.
    if let Some(proposed) = &hello.handshake_id {
        debug!(peer = %peer_addr, proposed = %proposed, "ignoring client-proposed handshake id");
    }
    let handshake_id = Uuid::new_v4().to_string();
    let capabilities: BTreeSet<Capability> = hello
        .capabilities
        .intersection(&ctx.capabilities)
        .copied()
        .collect();
    let wants_hello_ack = hello.capabilities.contains(&Capability::HelloAckV1);

    let shared = Arc::new(SessionShared {
        session_id,
        role: hello.role,
        agent_id: hello.agent_id.clone(),
        capabilities: capabilities.clone(),
        handshake_id: handshake_id.clone(),
        client_version: hello.client_version.clone(),
        peer_addr,
        peer_seq_last: AtomicU64::new(hello_head.seq),
        last_rx_mono_ms: AtomicU64::new(mono_ms()),
    });
    let (actions_tx, actions_rx) = kanal::bounded_async(ctx.queues.action_depth);
    let (slot_tx, slot_rx) = latest_slot();
    let handle = SessionHandle::new(shared.clone(), actions_tx, slot_tx);

    if let Err(e) = ctx.registry.add(handle.clone()) {
        warn!(peer = %peer_addr, error = %e, "rejecting hello");
        let reply = stamper.stamp(
            hello_head.seq,
            Payload::HelloAck(Box::new(HelloAck {
                accepted: false,
                reason: e.to_string(),
                handshake_id,
                capabilities,
            })),
        );
        let _ = framed.send(reply).await;
        return Ok(());
    }

    BridgeMetrics::incr(&ctx.metrics.sessions_opened);
    info!(
        session_id = %session_id,
        role = %hello.role,
        agent_id = %hello.agent_id,
        client_version = %hello.client_version,
        capabilities = ?capabilities,
        state = ?SessionState::Established,
        "session established"
    );

    let reply = if wants_hello_ack {
        Payload::HelloAck(Box::new(HelloAck {
            accepted: true,
            reason: String::new(),
            handshake_id: handshake_id.clone(),
            capabilities: capabilities.clone(),
        }))
    } else {
        // Legacy peers never advertised HELLO_ACK_V1; they expect a mirrored
        // hello carrying the server's version string.
        Payload::Hello(Box::new(Hello {
            agent_id: BRIDGE_AGENT_ID.to_string(),
            role: hello.role,
            capabilities: capabilities.clone(),
            client_version: env!("CARGO_PKG_VERSION").to_string(),
            handshake_id: Some(handshake_id.clone()),
        }))
    };
    let reply = stamper.stamp(hello_head.seq, reply);
    if let Err(e) = framed.send(reply).await {
        ctx.registry.remove(&session_id);
        BridgeMetrics::incr(&ctx.metrics.sessions_closed);
        return Err(e.into());
    }

    // --- Established ---
    // Split the framed transport, preserving any bytes already buffered by
    // the handshake reads. Dropping them desyncs the decoder.
    let parts = framed.into_parts();
    let (read_half, write_half) = tokio::io::split(parts.io);
    let mut inbound_stream = FramedRead::new(read_half, parts.codec.clone());
    if !parts.read_buf.is_empty() {
        inbound_stream
            .read_buffer_mut()
            .extend_from_slice(&parts.read_buf);
    }
    let sink = FramedWrite::new(write_half, parts.codec);

    let mut writer = tokio::spawn(run_outbound(Outbound {
        shared: shared.clone(),
        stamper,
        sink,
        actions_rx,
        telemetry_rx: slot_rx,
        telemetry_send: Duration::from_millis(ctx.timeouts.send_telemetry_ms),
        transport_send: Duration::from_millis(ctx.timeouts.transport_send_ms),
        metrics: ctx.metrics.clone(),
    }));

    let mut router = SessionRouter::new(
        handle.clone(),
        ctx.registry.clone(),
        ctx.correlator.clone(),
        ctx.metrics.clone(),
        ctx.validation.clone(),
    );

    let mut writer_done = false;
    let mut close_error: Option<BridgeError> = None;
    loop {
        tokio::select! {
            item = inbound_stream.next() => match item {
                None => {
                    debug!(session_id = %session_id, "peer closed connection");
                    break;
                }
                Some(Err(e)) => {
                    close_error = Some(e.into());
                    break;
                }
                Some(Ok(inbound)) => {
                    if router.route(inbound).await == RouteOutcome::Fatal {
                        break;
                    }
                }
            },
            _ = &mut writer => {
                // Outbound writer ended on its own: write failure or stall.
                writer_done = true;
                break;
            }
        }
    }

    // --- Closing ---
    // Deregister before dropping the queue so the router and correlator see
    // an unroutable target instead of a hung enqueue.
    debug!(session_id = %session_id, state = ?SessionState::Closing, "session closing");
    ctx.registry.remove(&session_id);
    ctx.correlator.session_closed(session_id).await;
    drop(router);
    drop(handle);
    if !writer_done {
        let _ = timeout(Duration::from_secs(5), writer).await;
    }
    BridgeMetrics::incr(&ctx.metrics.sessions_closed);
    info!(session_id = %session_id, "session closed");

    match close_error {
        Some(e) => Err(e),
        None => Ok(()),
    }
}
