//! Handshake scenarios: capability intersection, legacy reply, timeouts,
//! and handshake-gate enforcement.

use super::{
    all_caps, caps, connect_game_client, recv_payload, start_bridge, start_bridge_with,
};
use super::connect_orchestrator;
use gamebridge_common::BridgeError;
use gamebridge_core::transport::TransportConfig;
use gamebridge_core::{BridgeClient, HelloReply};
use gamebridge_protocol::{
    Capability, Dimension, ErrorCode, Hello, MovementFlags, Payload, Pose, Role, TelemetryFrame,
    TimeSyncRequest, Vitals,
};
use uuid::Uuid;

#[tokio::test]
async fn test_happy_handshake_intersects_capabilities() {
    let bridge = start_bridge().await;
    let mut client = BridgeClient::connect(&bridge.addr_string(), &TransportConfig::Tcp)
        .await
        .unwrap();

    let reply = client
        .hello(
            "gamepc",
            Role::GameClient,
            caps(&[Capability::TelemetryV1, Capability::HelloAckV1]),
            "x/0.2",
        )
        .await
        .unwrap();

    match reply {
        HelloReply::Ack(ack) => {
            assert!(ack.accepted);
            assert!(Uuid::parse_str(&ack.handshake_id).is_ok());
            assert_eq!(
                ack.capabilities,
                caps(&[Capability::TelemetryV1, Capability::HelloAckV1])
            );
        }
        HelloReply::Legacy(_) => panic!("expected a hello ack"),
    }
    assert_eq!(bridge.registry.count(), 1);
}

#[tokio::test]
async fn test_capabilities_limited_by_server_side() {
    let bridge = start_bridge_with(|server| {
        server.with_capabilities(caps(&[Capability::TelemetryV1, Capability::HelloAckV1]))
    })
    .await;
    let mut client = BridgeClient::connect(&bridge.addr_string(), &TransportConfig::Tcp)
        .await
        .unwrap();

    let reply = client
        .hello("gamepc", Role::GameClient, all_caps(), "x/0.2")
        .await
        .unwrap();

    // The ack is a subset of both advertised sets.
    let negotiated = reply.capabilities().clone();
    assert_eq!(
        negotiated,
        caps(&[Capability::TelemetryV1, Capability::HelloAckV1])
    );
    assert!(!negotiated.contains(&Capability::ActionV1));
}

#[tokio::test]
async fn test_server_assigns_its_own_handshake_id() {
    let bridge = start_bridge().await;
    let mut client = BridgeClient::connect(&bridge.addr_string(), &TransportConfig::Tcp)
        .await
        .unwrap();

    client
        .send(Payload::Hello(Box::new(Hello {
            agent_id: "gamepc".to_string(),
            role: Role::GameClient,
            capabilities: all_caps(),
            client_version: "x/0.2".to_string(),
            handshake_id: Some("client-proposed-nonce".to_string()),
        })))
        .await
        .unwrap();

    match recv_payload(&mut client).await {
        Payload::HelloAck(ack) => {
            assert!(ack.accepted);
            assert_ne!(ack.handshake_id, "client-proposed-nonce");
            assert!(Uuid::parse_str(&ack.handshake_id).is_ok());
        }
        other => panic!("expected hello ack, got {other:?}"),
    }
}

#[tokio::test]
async fn test_legacy_handshake_gets_mirrored_hello() {
    let bridge = start_bridge().await;
    let mut client = BridgeClient::connect(&bridge.addr_string(), &TransportConfig::Tcp)
        .await
        .unwrap();

    let reply = client
        .hello(
            "gamepc",
            Role::GameClient,
            caps(&[Capability::TelemetryV1]),
            "x/0.1",
        )
        .await
        .unwrap();

    match reply {
        HelloReply::Legacy(hello) => {
            assert_eq!(hello.capabilities, caps(&[Capability::TelemetryV1]));
            assert!(hello.handshake_id.is_some());
            assert!(!hello.client_version.is_empty());
        }
        HelloReply::Ack(_) => panic!("legacy client must not receive a hello ack"),
    }

    // The legacy session is Established: telemetry flows.
    let mut orch = connect_orchestrator(&bridge, "brain").await;
    client
        .send(Payload::Telemetry(Box::new(TelemetryFrame {
            state_version: 1,
            pose: Pose {
                x: 0.0,
                y: 70.0,
                z: 0.0,
                yaw: 0.0,
                pitch: 0.0,
            },
            vitals: Vitals {
                hp: 20.0,
                hunger: 20.0,
                air: 300.0,
            },
            flags: MovementFlags::default(),
            dimension: Dimension::Overworld,
            world_tick: 1,
        })))
        .await
        .unwrap();
    match recv_payload(&mut orch).await {
        Payload::Telemetry(frame) => assert_eq!(frame.state_version, 1),
        other => panic!("expected telemetry, got {other:?}"),
    }
}

#[tokio::test]
async fn test_hello_timeout_closes_session() {
    let bridge = start_bridge().await; // hello budget 300 ms
    let mut client = BridgeClient::connect(&bridge.addr_string(), &TransportConfig::Tcp)
        .await
        .unwrap();

    // Say nothing and wait for the server to give up.
    match recv_payload(&mut client).await {
        Payload::Error(frame) => assert_eq!(frame.code, ErrorCode::HelloTimeout),
        other => panic!("expected hello timeout, got {other:?}"),
    }
    assert!(client.recv().await.is_err(), "session must be closed");
}

#[tokio::test]
async fn test_non_hello_first_envelope_rejected() {
    let bridge = start_bridge().await;
    let mut client = BridgeClient::connect(&bridge.addr_string(), &TransportConfig::Tcp)
        .await
        .unwrap();

    client
        .send(Payload::TimeSyncRequest(TimeSyncRequest::default()))
        .await
        .unwrap();

    match recv_payload(&mut client).await {
        Payload::Error(frame) => assert_eq!(frame.code, ErrorCode::HandshakeRequired),
        other => panic!("expected handshake-required, got {other:?}"),
    }
    assert!(client.recv().await.is_err(), "session must be closed");
}

#[tokio::test]
async fn test_duplicate_agent_rejected() {
    let bridge = start_bridge().await;
    let _first = connect_game_client(&bridge, "gamepc").await;

    let mut second = BridgeClient::connect(&bridge.addr_string(), &TransportConfig::Tcp)
        .await
        .unwrap();
    let result = second
        .hello("gamepc", Role::GameClient, all_caps(), "x/0.2")
        .await;

    match result {
        Err(BridgeError::Handshake(reason)) => assert!(reason.contains("already connected")),
        other => panic!("expected a rejected handshake, got {other:?}"),
    }
    assert_eq!(bridge.registry.count(), 1);
}

#[tokio::test]
async fn test_post_handshake_hello_is_unexpected_not_fatal() {
    let bridge = start_bridge().await;
    let mut client = connect_game_client(&bridge, "gamepc").await;

    client
        .send(Payload::Hello(Box::new(Hello {
            agent_id: "gamepc".to_string(),
            role: Role::GameClient,
            capabilities: all_caps(),
            client_version: "x/0.2".to_string(),
            handshake_id: None,
        })))
        .await
        .unwrap();

    match recv_payload(&mut client).await {
        Payload::Error(frame) => assert_eq!(frame.code, ErrorCode::UnexpectedPayload),
        other => panic!("expected unexpected-payload, got {other:?}"),
    }

    // The session survives: a timesync round-trip still works.
    client
        .send(Payload::TimeSyncRequest(TimeSyncRequest {
            t_client_mono_ms: 9,
            t_client_wall_unix_ms: 99,
        }))
        .await
        .unwrap();
    match recv_payload(&mut client).await {
        Payload::TimeSyncResponse(response) => assert_eq!(response.echo.t_client_mono_ms, 9),
        other => panic!("expected timesync response, got {other:?}"),
    }
}
