//! A sequential bridge client
//!
//! The real peers (the game-client mod and the orchestrator) live outside
//! this repository; this client exists for integration tests and for
//! embedders that want a minimal connection: dial, hello, then send and
//! receive envelopes in turn.

use crate::transport::{self, TransportConfig};
use futures::{SinkExt, StreamExt};
use gamebridge_common::{mono_ms, wall_unix_ms, BridgeError, Result};
use gamebridge_protocol::constants::PROTOCOL_VERSION;
use gamebridge_protocol::{
    Capability, Envelope, EnvelopeCodec, EnvelopeHead, Hello, HelloAck, Inbound, Payload, Role,
};
use std::collections::BTreeSet;
use tokio_util::codec::Framed;
use tracing::info;
use uuid::Uuid;

/// The server's handshake reply: a [`HelloAck`] for capable clients, a
/// mirrored [`Hello`] for legacy ones.
#[derive(Debug, Clone)]
pub enum HelloReply {
    Ack(HelloAck),
    Legacy(Hello),
}

impl HelloReply {
    /// Negotiated capability set, whichever shape the reply took.
    pub fn capabilities(&self) -> &BTreeSet<Capability> {
        match self {
            HelloReply::Ack(ack) => &ack.capabilities,
            HelloReply::Legacy(hello) => &hello.capabilities,
        }
    }
}

pub struct BridgeClient {
    framed: Framed<transport::BoxedStream, EnvelopeCodec>,
    session_id: String,
    next_seq: u64,
    peer_seq_last: u64,
}

impl BridgeClient {
    pub async fn connect(addr: &str, config: &TransportConfig) -> Result<Self> {
        let stream = transport::connect(config, addr).await?;
        Ok(Self {
            framed: Framed::new(stream, EnvelopeCodec::new()),
            session_id: Uuid::new_v4().to_string(),
            next_seq: 1,
            peer_seq_last: 0,
        })
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Run the handshake. Fails on a rejected or malformed reply.
    pub async fn hello(
        &mut self,
        agent_id: impl Into<String>,
        role: Role,
        capabilities: BTreeSet<Capability>,
        client_version: impl Into<String>,
    ) -> Result<HelloReply> {
        self.send(Payload::Hello(Box::new(Hello {
            agent_id: agent_id.into(),
            role,
            capabilities,
            client_version: client_version.into(),
            handshake_id: None,
        })))
        .await?;

        match self.recv().await? {
            Inbound::Envelope(envelope) => match envelope.payload {
                Payload::HelloAck(ack) => {
                    if !ack.accepted {
                        return Err(BridgeError::Handshake(ack.reason));
                    }
                    info!(handshake_id = %ack.handshake_id, "handshake accepted");
                    Ok(HelloReply::Ack(*ack))
                }
                Payload::Hello(hello) => Ok(HelloReply::Legacy(*hello)),
                Payload::Error(frame) => Err(BridgeError::Handshake(format!(
                    "{:?}: {}",
                    frame.code, frame.message
                ))),
                other => Err(BridgeError::Protocol(format!(
                    "unexpected handshake reply: {}",
                    other.name()
                ))),
            },
            _ => Err(BridgeError::Protocol("undecodable handshake reply".into())),
        }
    }

    /// Send one payload with the next sequence number.
    pub async fn send(&mut self, payload: Payload) -> Result<()> {
        let seq = self.next_seq;
        self.next_seq += 1;
        let envelope = Envelope {
            head: EnvelopeHead {
                protocol_version: PROTOCOL_VERSION,
                session_id: self.session_id.clone(),
                seq,
                ack: self.peer_seq_last,
                mono_ms: mono_ms(),
                wall_unix_ms: wall_unix_ms(),
            },
            payload,
        };
        self.framed.send(envelope).await?;
        Ok(())
    }

    /// Send a hand-built envelope verbatim, for protocol tests.
    pub async fn send_raw(&mut self, envelope: Envelope) -> Result<()> {
        self.framed.send(envelope).await?;
        Ok(())
    }

    /// Receive the next decoded item.
    pub async fn recv(&mut self) -> Result<Inbound> {
        match self.framed.next().await {
            Some(Ok(inbound)) => {
                if let Inbound::Envelope(envelope) = &inbound {
                    self.peer_seq_last = self.peer_seq_last.max(envelope.head.seq);
                }
                Ok(inbound)
            }
            Some(Err(e)) => Err(e.into()),
            None => Err(BridgeError::Connection("connection closed".into())),
        }
    }

    /// Receive the next full envelope, skipping undecodable items.
    pub async fn recv_envelope(&mut self) -> Result<Envelope> {
        loop {
            if let Inbound::Envelope(envelope) = self.recv().await? {
                return Ok(envelope);
            }
        }
    }
}
