//! Action relay scenarios: the request/ack/result triple, duplicate
//! suppression, TTL expiry with emergency stop, and target resolution.

use super::{connect_game_client, connect_orchestrator, recv_payload, start_bridge};
use gamebridge_common::wall_unix_ms;
use gamebridge_protocol::{
    ActionAck, ActionBody, ActionRequest, ActionResult, ActionStatus, BaritoneGoto, Payload,
};
use uuid::Uuid;

fn goto(request_id: &str, target: &str, expires_at_unix_ms: u64) -> Payload {
    Payload::ActionRequest(Box::new(ActionRequest {
        request_id: request_id.to_string(),
        target_agent_id: target.to_string(),
        expires_at_unix_ms,
        body: ActionBody::BaritoneGoto(BaritoneGoto {
            x: 10,
            y: 64,
            z: -20,
            max_distance: 100,
            timeout_ms: 4000,
            stuck_timeout_ms: 2000,
        }),
    }))
}

#[tokio::test]
async fn test_action_round_trip_ack_before_result() {
    let bridge = start_bridge().await;
    let mut game = connect_game_client(&bridge, "gamepc").await;
    let mut orch = connect_orchestrator(&bridge, "brain").await;

    let rid = Uuid::new_v4().to_string();
    orch.send(goto(&rid, "gamepc", wall_unix_ms() + 5000))
        .await
        .unwrap();

    // The executor side sees the request...
    match recv_payload(&mut game).await {
        Payload::ActionRequest(request) => {
            assert_eq!(request.request_id, rid);
            assert!(matches!(request.body, ActionBody::BaritoneGoto(_)));
        }
        other => panic!("expected action request, got {other:?}"),
    }

    // ...answers with an ack, then a terminal result.
    game.send(Payload::ActionAck(ActionAck {
        request_id: rid.clone(),
        accepted: true,
        reason: "accepted".to_string(),
    }))
    .await
    .unwrap();
    game.send(Payload::ActionResult(ActionResult {
        request_id: rid.clone(),
        status: ActionStatus::Ok,
        detail: "goto complete".to_string(),
    }))
    .await
    .unwrap();

    // The originator observes both, ack first.
    match recv_payload(&mut orch).await {
        Payload::ActionAck(ack) => {
            assert_eq!(ack.request_id, rid);
            assert!(ack.accepted);
        }
        other => panic!("expected ack before result, got {other:?}"),
    }
    match recv_payload(&mut orch).await {
        Payload::ActionResult(result) => {
            assert_eq!(result.request_id, rid);
            assert_eq!(result.status, ActionStatus::Ok);
            assert_eq!(result.detail, "goto complete");
        }
        other => panic!("expected result, got {other:?}"),
    }
    assert_eq!(bridge.metrics.snapshot().actions_completed, 1);
}

#[tokio::test]
async fn test_duplicate_request_id_rejected() {
    let bridge = start_bridge().await;
    let mut game = connect_game_client(&bridge, "gamepc").await;
    let mut orch = connect_orchestrator(&bridge, "brain").await;

    let rid = Uuid::new_v4().to_string();
    orch.send(goto(&rid, "gamepc", wall_unix_ms() + 5000))
        .await
        .unwrap();

    // First copy reaches the game client, which stays silent.
    match recv_payload(&mut game).await {
        Payload::ActionRequest(request) => assert_eq!(request.request_id, rid),
        other => panic!("expected action request, got {other:?}"),
    }

    // The retry is rejected without a second relay.
    orch.send(goto(&rid, "gamepc", wall_unix_ms() + 5000))
        .await
        .unwrap();
    match recv_payload(&mut orch).await {
        Payload::ActionAck(ack) => {
            assert_eq!(ack.request_id, rid);
            assert!(!ack.accepted);
            assert_eq!(ack.reason, "duplicate");
        }
        other => panic!("expected duplicate ack, got {other:?}"),
    }
    match recv_payload(&mut orch).await {
        Payload::ActionResult(result) => {
            assert_eq!(result.request_id, rid);
            assert_eq!(result.status, ActionStatus::Rejected);
        }
        other => panic!("expected rejection result, got {other:?}"),
    }
    assert_eq!(bridge.metrics.snapshot().actions_relayed, 1);
}

#[tokio::test]
async fn test_ttl_expiry_times_out_and_issues_stop_all() {
    let bridge = start_bridge().await;
    let mut game = connect_game_client(&bridge, "gamepc").await;
    let mut orch = connect_orchestrator(&bridge, "brain").await;

    let rid = Uuid::new_v4().to_string();
    orch.send(goto(&rid, "gamepc", wall_unix_ms() + 400))
        .await
        .unwrap();

    // Delivered but never acked.
    match recv_payload(&mut game).await {
        Payload::ActionRequest(request) => assert_eq!(request.request_id, rid),
        other => panic!("expected action request, got {other:?}"),
    }

    // At the deadline the originator gets the synthesized timeout...
    match recv_payload(&mut orch).await {
        Payload::ActionResult(result) => {
            assert_eq!(result.request_id, rid);
            assert_eq!(result.status, ActionStatus::Timeout);
        }
        other => panic!("expected timeout result, got {other:?}"),
    }

    // ...and the game client gets an emergency stop under a fresh id.
    match recv_payload(&mut game).await {
        Payload::ActionRequest(request) => {
            assert!(request.body.is_stop_all());
            assert_ne!(request.request_id, rid);
            assert_eq!(request.target_agent_id, "gamepc");
        }
        other => panic!("expected stop-all, got {other:?}"),
    }

    let snap = bridge.metrics.snapshot();
    assert_eq!(snap.actions_timed_out, 1);
    assert_eq!(snap.emergency_stops, 1);
}

#[tokio::test]
async fn test_no_unique_target_rejected() {
    let bridge = start_bridge().await;
    let mut orch = connect_orchestrator(&bridge, "brain").await;

    let rid = Uuid::new_v4().to_string();
    orch.send(goto(&rid, "", wall_unix_ms() + 5000))
        .await
        .unwrap();

    match recv_payload(&mut orch).await {
        Payload::ActionAck(ack) => {
            assert!(!ack.accepted);
            assert_eq!(ack.reason, "no unique target");
        }
        other => panic!("expected rejection ack, got {other:?}"),
    }
    match recv_payload(&mut orch).await {
        Payload::ActionResult(result) => assert_eq!(result.status, ActionStatus::Rejected),
        other => panic!("expected rejection result, got {other:?}"),
    }
}

#[tokio::test]
async fn test_empty_target_routes_to_unique_game_client() {
    let bridge = start_bridge().await;
    let mut game = connect_game_client(&bridge, "solo").await;
    let mut orch = connect_orchestrator(&bridge, "brain").await;

    let rid = Uuid::new_v4().to_string();
    orch.send(goto(&rid, "", wall_unix_ms() + 5000))
        .await
        .unwrap();

    match recv_payload(&mut game).await {
        Payload::ActionRequest(request) => assert_eq!(request.request_id, rid),
        other => panic!("expected action request, got {other:?}"),
    }
}
