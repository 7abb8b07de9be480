//! Telemetry fan-out, role discipline, and timesync.

use super::{connect_game_client, connect_orchestrator, recv_payload, start_bridge};
use gamebridge_common::wall_unix_ms;
use gamebridge_protocol::{
    Dimension, ErrorCode, MovementFlags, Payload, Pose, TelemetryFrame, TimeSyncRequest, Vitals,
};

fn sample(state_version: u64) -> Payload {
    Payload::Telemetry(Box::new(TelemetryFrame {
        state_version,
        pose: Pose {
            x: 120.5,
            y: 64.0,
            z: -33.25,
            yaw: 180.0,
            pitch: -12.5,
        },
        vitals: Vitals {
            hp: 19.0,
            hunger: 17.0,
            air: 300.0,
        },
        flags: MovementFlags {
            sprinting: true,
            sneaking: false,
            on_ground: true,
        },
        dimension: Dimension::Overworld,
        world_tick: 81_234,
    }))
}

#[tokio::test]
async fn test_telemetry_reaches_every_orchestrator() {
    let bridge = start_bridge().await;
    let mut game = connect_game_client(&bridge, "gamepc").await;
    let mut first = connect_orchestrator(&bridge, "brain-a").await;
    let mut second = connect_orchestrator(&bridge, "brain-b").await;

    game.send(sample(1)).await.unwrap();

    for orch in [&mut first, &mut second] {
        match recv_payload(orch).await {
            Payload::Telemetry(frame) => {
                assert_eq!(frame.state_version, 1);
                assert_eq!(frame.dimension, Dimension::Overworld);
            }
            other => panic!("expected telemetry, got {other:?}"),
        }
    }
}

#[tokio::test]
async fn test_orchestrator_telemetry_is_role_violation() {
    let bridge = start_bridge().await;
    let mut orch = connect_orchestrator(&bridge, "brain").await;

    orch.send(sample(1)).await.unwrap();

    match recv_payload(&mut orch).await {
        Payload::Error(frame) => assert_eq!(frame.code, ErrorCode::RoleViolation),
        other => panic!("expected role violation, got {other:?}"),
    }

    // Not fatal: the session still answers timesync.
    orch.send(Payload::TimeSyncRequest(TimeSyncRequest::default()))
        .await
        .unwrap();
    match recv_payload(&mut orch).await {
        Payload::TimeSyncResponse(_) => {}
        other => panic!("expected timesync response, got {other:?}"),
    }
}

#[tokio::test]
async fn test_timesync_echoes_request_and_stamps_server_clocks() {
    let bridge = start_bridge().await;
    let mut game = connect_game_client(&bridge, "gamepc").await;

    let request = TimeSyncRequest {
        t_client_mono_ms: 7,
        t_client_wall_unix_ms: 1_700_000_000_123,
    };
    let sent_at = wall_unix_ms();
    game.send(Payload::TimeSyncRequest(request)).await.unwrap();

    match recv_payload(&mut game).await {
        Payload::TimeSyncResponse(response) => {
            assert_eq!(response.echo, request);
            assert!(response.t_server_wall_unix_ms >= sent_at);
        }
        other => panic!("expected timesync response, got {other:?}"),
    }
}

#[tokio::test]
async fn test_outbound_sequence_is_strictly_increasing() {
    let bridge = start_bridge().await;
    let mut game = connect_game_client(&bridge, "gamepc").await;

    let mut last_seq = 0;
    for i in 0..5 {
        game.send(Payload::TimeSyncRequest(TimeSyncRequest {
            t_client_mono_ms: i,
            t_client_wall_unix_ms: i,
        }))
        .await
        .unwrap();
        let envelope = tokio::time::timeout(std::time::Duration::from_secs(3), game.recv_envelope())
            .await
            .unwrap()
            .unwrap();
        assert!(envelope.head.seq > last_seq, "seq must strictly increase");
        last_seq = envelope.head.seq;
    }
}
