//! Engine flows over in-memory port bindings: join/leave, the action
//! pipeline, live-state handoff, and cross-node fan-out.

mod support;

use std::time::Duration;

use lockstep_core::EngineConfig;
use lockstep_model::{RoomId, ServerFrame, SyncAction};
use support::{MemoryBus, MemoryStore, TestNode, drain, recv_frame};
use uuid::Uuid;

fn room() -> RoomId {
    RoomId(Uuid::new_v4())
}

async fn node() -> TestNode {
    TestNode::start(MemoryStore::new(), MemoryBus::new(), EngineConfig::default()).await
}

fn provide_state(requester: lockstep_model::UserId, current_time: f64) -> String {
    format!(
        r#"{{"type":"provide_state","requester_id":"{requester}","state":{{"is_playing":true,"current_time":{current_time},"duration":3600.0,"playback_rate":1.0}}}}"#
    )
}

#[tokio::test]
async fn join_on_empty_node_sends_stored_state_then_roster() {
    let node = node().await;
    let room = room();

    let (_handle, mut rx, identity) = node.connect(room, "ana").await;

    // Exactly one `state` frame (the stored fallback), then the roster.
    match recv_frame(&mut rx).await {
        ServerFrame::State(state) => {
            assert_eq!(state.room_id, room);
            assert!(!state.is_playing);
            assert_eq!(state.current_time, 0.0);
        }
        other => panic!("expected state frame, got {other:?}"),
    }
    match recv_frame(&mut rx).await {
        ServerFrame::Participants(roster) => {
            assert_eq!(roster.len(), 1);
            assert_eq!(roster[0].user_id, identity.user_id);
            assert!(roster[0].is_host);
        }
        other => panic!("expected participants frame, got {other:?}"),
    }
    assert!(drain(&mut rx).await.is_empty());
}

#[tokio::test]
async fn actions_mutate_state_without_echoing_to_the_sender() {
    let node = node().await;
    let room = room();

    let (ana, mut ana_rx, ana_id) = node.connect(room, "ana").await;
    drain(&mut ana_rx).await;

    node.engine
        .handle_frame(room, &ana, r#"{"action":"play","data":{"current_time":10.0}}"#)
        .await;

    let state = node.store.state(room).expect("state stored");
    assert!(state.is_playing);
    assert_eq!(state.current_time, 10.0);
    assert_eq!(state.updated_by, ana_id.user_id);

    // The originator never sees its own event come back off the bus.
    assert!(drain(&mut ana_rx).await.is_empty());

    let (_bo, mut bo_rx, _) = node.connect(room, "bo").await;
    drain(&mut ana_rx).await; // request_state for bo's handoff
    drain(&mut bo_rx).await;

    node.engine
        .handle_frame(
            room,
            &ana,
            r#"{"action":"pause","data":{"current_time":15.0}}"#,
        )
        .await;

    let frames = drain(&mut bo_rx).await;
    let sync = frames
        .iter()
        .find_map(|frame| match frame {
            ServerFrame::Sync(payload) => Some(payload),
            _ => None,
        })
        .expect("bo receives the pause");
    assert_eq!(sync.action, SyncAction::Pause);
    assert_eq!(sync.current_time, 15.0);
    assert_eq!(sync.user_id, ana_id.user_id);
    assert!(drain(&mut ana_rx).await.is_empty());
}

#[tokio::test]
async fn live_state_handoff_prefers_peer_over_snapshot() {
    let node = node().await;
    let room = room();

    let (ana, mut ana_rx, _) = node.connect(room, "ana").await;
    drain(&mut ana_rx).await;

    // Stored snapshot lags the peer's media clock.
    node.engine
        .handle_frame(room, &ana, r#"{"action":"play","data":{"current_time":10.0}}"#)
        .await;

    let (_cleo, mut cleo_rx, cleo_id) = node.connect(room, "cleo").await;

    // The incumbent is asked for live state on behalf of the joiner.
    let frames = drain(&mut ana_rx).await;
    let requester = frames
        .iter()
        .find_map(|frame| match frame {
            ServerFrame::RequestState { requester_id } => Some(*requester_id),
            _ => None,
        })
        .expect("ana receives request_state");
    assert_eq!(requester, cleo_id.user_id);

    // No state frame for the joiner until the peer answers.
    let early: Vec<_> = drain(&mut cleo_rx)
        .await
        .into_iter()
        .filter(|frame| matches!(frame, ServerFrame::State(_)))
        .collect();
    assert!(early.is_empty());

    node.engine
        .handle_frame(room, &ana, &provide_state(cleo_id.user_id, 42.0))
        .await;

    let frames = drain(&mut cleo_rx).await;
    let state = frames
        .iter()
        .find_map(|frame| match frame {
            ServerFrame::State(state) => Some(state),
            _ => None,
        })
        .expect("cleo receives live state");
    assert_eq!(state.current_time, 42.0);
    assert!(state.is_playing);
}

#[tokio::test]
async fn handoff_timeout_falls_back_to_stored_state() {
    let config = EngineConfig {
        handoff_timeout: Duration::from_millis(100),
        ..EngineConfig::default()
    };
    let node = TestNode::start(MemoryStore::new(), MemoryBus::new(), config).await;
    let room = room();

    let (ana, mut ana_rx, _) = node.connect(room, "ana").await;
    drain(&mut ana_rx).await;
    node.engine
        .handle_frame(room, &ana, r#"{"action":"pause","data":{"current_time":10.0}}"#)
        .await;

    // Ana never answers the handoff.
    let (_cleo, mut cleo_rx, _) = node.connect(room, "cleo").await;
    drain(&mut cleo_rx).await;

    tokio::time::sleep(Duration::from_millis(250)).await;
    let frames = drain(&mut cleo_rx).await;
    let state = frames
        .iter()
        .find_map(|frame| match frame {
            ServerFrame::State(state) => Some(state),
            _ => None,
        })
        .expect("fallback state after timeout");
    assert_eq!(state.current_time, 10.0);
}

#[tokio::test]
async fn late_provide_state_after_timeout_is_dropped() {
    let config = EngineConfig {
        handoff_timeout: Duration::from_millis(50),
        ..EngineConfig::default()
    };
    let node = TestNode::start(MemoryStore::new(), MemoryBus::new(), config).await;
    let room = room();

    let (ana, mut ana_rx, _) = node.connect(room, "ana").await;
    drain(&mut ana_rx).await;
    let (_cleo, mut cleo_rx, cleo_id) = node.connect(room, "cleo").await;

    tokio::time::sleep(Duration::from_millis(150)).await;
    drain(&mut cleo_rx).await; // fallback state landed

    node.engine
        .handle_frame(room, &ana, &provide_state(cleo_id.user_id, 99.0))
        .await;

    let late: Vec<_> = drain(&mut cleo_rx)
        .await
        .into_iter()
        .filter(|frame| matches!(frame, ServerFrame::State(_)))
        .collect();
    assert!(late.is_empty(), "late answer must not produce a second state");
}

#[tokio::test]
async fn request_state_frame_reruns_the_handoff() {
    let node = node().await;
    let room = room();

    let (ana, mut ana_rx, _) = node.connect(room, "ana").await;
    drain(&mut ana_rx).await;
    let (bo, mut bo_rx, bo_id) = node.connect(room, "bo").await;
    drain(&mut ana_rx).await;
    drain(&mut bo_rx).await;

    // The joiner-side safety valve: bo asks again after a lost handoff.
    node.engine
        .handle_frame(room, &bo, r#"{"type":"request_state"}"#)
        .await;

    let frames = drain(&mut ana_rx).await;
    assert!(
        frames
            .iter()
            .any(|frame| matches!(frame, ServerFrame::RequestState { requester_id } if *requester_id == bo_id.user_id)),
        "incumbent is asked again"
    );

    node.engine
        .handle_frame(room, &ana, &provide_state(bo_id.user_id, 21.0))
        .await;
    let frames = drain(&mut bo_rx).await;
    assert!(frames.iter().any(
        |frame| matches!(frame, ServerFrame::State(state) if state.current_time == 21.0)
    ));
}

#[tokio::test]
async fn locked_room_rejects_the_second_writer() {
    let node = node().await;
    let room = room();

    let (ana, mut ana_rx, _) = node.connect(room, "ana").await;
    drain(&mut ana_rx).await;

    // Another node's user holds the lease.
    node.store.seize_lock(
        room,
        lockstep_model::UserId::generate(),
        Duration::from_secs(5),
    );

    node.engine
        .handle_frame(room, &ana, r#"{"action":"seek","data":{"current_time":30.0}}"#)
        .await;

    let frames = drain(&mut ana_rx).await;
    match frames.as_slice() {
        [ServerFrame::Error { code, message }] => {
            assert_eq!(code, "CONFLICT");
            assert!(message.contains("locked"));
        }
        other => panic!("expected a single conflict error, got {other:?}"),
    }
    // No mutation happened.
    assert!(node.store.state(room).is_none_or(|state| state.current_time == 0.0));
}

#[tokio::test]
async fn transient_store_failure_is_retried_once() {
    let node = node().await;
    let room = room();

    let (ana, mut ana_rx, _) = node.connect(room, "ana").await;
    drain(&mut ana_rx).await;

    node.store
        .fail_set_state
        .store(1, std::sync::atomic::Ordering::SeqCst);
    node.engine
        .handle_frame(room, &ana, r#"{"action":"play","data":{"current_time":5.0}}"#)
        .await;
    assert!(drain(&mut ana_rx).await.is_empty(), "retry absorbed the failure");
    assert_eq!(node.store.state(room).expect("stored").current_time, 5.0);

    node.store
        .fail_set_state
        .store(2, std::sync::atomic::Ordering::SeqCst);
    node.engine
        .handle_frame(room, &ana, r#"{"action":"seek","data":{"current_time":50.0}}"#)
        .await;
    let frames = drain(&mut ana_rx).await;
    assert!(
        frames.iter().any(
            |frame| matches!(frame, ServerFrame::Error { code, .. } if code == "STORE_UNAVAILABLE")
        ),
        "double failure surfaces to the sender"
    );
    assert_eq!(node.store.state(room).expect("stored").current_time, 5.0);
}

#[tokio::test]
async fn bad_frames_answer_with_error_and_keep_the_connection() {
    let node = node().await;
    let room = room();

    let (ana, mut ana_rx, _) = node.connect(room, "ana").await;
    drain(&mut ana_rx).await;

    node.engine.handle_frame(room, &ana, "not json").await;
    node.engine
        .handle_frame(room, &ana, r#"{"payload":"no discriminator"}"#)
        .await;

    let frames = drain(&mut ana_rx).await;
    assert_eq!(frames.len(), 2);
    for frame in frames {
        match frame {
            ServerFrame::Error { code, .. } => assert_eq!(code, "BAD_FRAME"),
            other => panic!("expected error frame, got {other:?}"),
        }
    }

    // Still connected and functional.
    node.engine
        .handle_frame(room, &ana, r#"{"action":"play","data":{"current_time":1.0}}"#)
        .await;
    assert!(node.store.state(room).expect("stored").is_playing);
}

#[tokio::test]
async fn pause_reapply_only_moves_the_write_stamp() {
    let node = node().await;
    let room = room();

    let (ana, mut ana_rx, _) = node.connect(room, "ana").await;
    drain(&mut ana_rx).await;

    let frame = r#"{"action":"pause","data":{"current_time":15.0}}"#;
    node.engine.handle_frame(room, &ana, frame).await;
    let first = node.store.state(room).expect("stored");

    tokio::time::sleep(Duration::from_millis(10)).await;
    node.engine.handle_frame(room, &ana, frame).await;
    let second = node.store.state(room).expect("stored");

    assert_eq!(first.is_playing, second.is_playing);
    assert_eq!(first.current_time, second.current_time);
    assert_eq!(first.duration, second.duration);
    assert_eq!(first.playback_rate, second.playback_rate);
    assert!(second.last_updated >= first.last_updated);
}

#[tokio::test]
async fn buffering_flags_the_participant_but_not_the_playhead() {
    let node = node().await;
    let room = room();

    let (ana, mut ana_rx, ana_id) = node.connect(room, "ana").await;
    drain(&mut ana_rx).await;
    let (_bo, mut bo_rx, _) = node.connect(room, "bo").await;
    drain(&mut ana_rx).await;
    drain(&mut bo_rx).await;

    node.engine
        .handle_frame(
            room,
            &ana,
            r#"{"action":"buffering","data":{"is_buffering":true}}"#,
        )
        .await;

    let participant = node
        .store
        .participant(room, ana_id.user_id)
        .expect("participant");
    assert!(participant.is_buffering);
    assert!(!node.store.state(room).expect("stored").is_playing);

    let frames = drain(&mut bo_rx).await;
    let sync = frames
        .iter()
        .find_map(|frame| match frame {
            ServerFrame::Sync(payload) => Some(payload),
            _ => None,
        })
        .expect("buffering is broadcast");
    assert_eq!(sync.action, SyncAction::Buffering);
    assert_eq!(
        sync.data.as_ref().and_then(|data| data.is_buffering),
        Some(true)
    );
}

#[tokio::test]
async fn leave_cleans_up_and_announces() {
    let node = node().await;
    let room = room();

    let (ana, mut ana_rx, _) = node.connect(room, "ana").await;
    drain(&mut ana_rx).await;
    let (bo, mut bo_rx, bo_id) = node.connect(room, "bo").await;
    drain(&mut ana_rx).await;
    drain(&mut bo_rx).await;

    node.engine.leave(room, &bo).await;

    let frames = drain(&mut ana_rx).await;
    let sync = frames
        .iter()
        .find_map(|frame| match frame {
            ServerFrame::Sync(payload) => Some(payload),
            _ => None,
        })
        .expect("leave is announced");
    assert_eq!(sync.action, SyncAction::Leave);
    assert_eq!(sync.user_id, bo_id.user_id);

    assert!(node.store.participant(room, bo_id.user_id).is_none());
    assert!(node.store.presence(bo_id.user_id).is_none());
    assert_eq!(node.registry.count(room), 1);
}

#[tokio::test]
async fn rejoin_gets_a_fresh_participant_record() {
    let node = node().await;
    let room = room();

    let (ana, mut ana_rx, ana_id) = node.connect(room, "ana").await;
    drain(&mut ana_rx).await;
    node.engine.leave(room, &ana).await;
    assert!(node.store.participant(room, ana_id.user_id).is_none());

    let (_again, mut again_rx, again_id) = node.connect(room, "ana").await;
    drain(&mut again_rx).await;

    let participant = node
        .store
        .participant(room, again_id.user_id)
        .expect("fresh record");
    assert!(participant.is_host, "empty room makes the rejoiner host");
    assert!(!participant.is_buffering);
}

#[tokio::test]
async fn duplicate_connection_replaces_and_closes_the_older() {
    let node = node().await;
    let room = room();

    let (first, mut first_rx, identity) = node.connect(room, "ana").await;
    drain(&mut first_rx).await;

    // Same identity connects again (e.g. a second tab).
    let (tx, mut second_rx) = tokio::sync::mpsc::channel(100);
    let second = node
        .engine
        .join(room, &identity, tx)
        .await
        .expect("rejoin succeeds");
    drain(&mut second_rx).await;

    assert!(first.cancel_token().is_cancelled(), "older connection is closed");
    assert_eq!(node.registry.count(room), 1);

    // The displaced connection's teardown must not destroy the new one.
    node.engine.leave(room, &first).await;
    assert_eq!(node.registry.count(room), 1);
    assert!(node.store.participant(room, identity.user_id).is_some());

    node.engine.leave(room, &second).await;
    assert_eq!(node.registry.count(room), 0);
}

#[tokio::test]
async fn cross_node_seek_reaches_the_other_node_without_echo() {
    let store = MemoryStore::new();
    let bus = MemoryBus::new();
    let n1 = TestNode::start(store.clone(), bus.clone(), EngineConfig::default()).await;
    let n2 = TestNode::start(store, bus, EngineConfig::default()).await;
    let room = room();

    let (ana, mut ana_rx, ana_id) = n1.connect(room, "ana").await;
    drain(&mut ana_rx).await;
    let (_bo, mut bo_rx, _) = n2.connect(room, "bo").await;
    drain(&mut ana_rx).await;
    drain(&mut bo_rx).await;

    n1.engine
        .handle_frame(room, &ana, r#"{"action":"seek","data":{"current_time":77.0}}"#)
        .await;

    let frames = drain(&mut bo_rx).await;
    let sync = frames
        .iter()
        .find_map(|frame| match frame {
            ServerFrame::Sync(payload) => Some(payload),
            _ => None,
        })
        .expect("seek crosses nodes");
    assert_eq!(sync.action, SyncAction::Seek);
    assert_eq!(sync.current_time, 77.0);
    assert_eq!(sync.user_id, ana_id.user_id);

    assert!(drain(&mut ana_rx).await.is_empty(), "no echo to the originator");
}
