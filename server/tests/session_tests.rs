//! Read loop liveness and teardown

mod common;

use axum::extract::ws::Message;
use common::*;
use futures::channel::mpsc as frames;
use futures::stream;
use futures::StreamExt;
use parlor_server::websocket::{run_session, teardown, DisconnectReason};
use std::time::Duration;

fn short_heartbeat() -> parlor_server::config::ServerConfig {
    let mut config = test_config();
    config.heartbeat_timeout_secs = 1;
    config
}

#[tokio::test]
async fn test_silent_session_times_out_and_is_removed_once() {
    let (state, pool) = setup(short_heartbeat()).await;
    let alice = create_user(&pool, "alice", "pw").await;
    let (session, _rx) = connect(&state, alice, 8).await;

    tokio::time::pause();
    let mut silent = stream::pending::<Result<Message, axum::Error>>();
    let reason = run_session(&state, &session, &mut silent).await;
    assert_eq!(reason, DisconnectReason::HeartbeatTimeout);

    assert!(teardown(&state, &session));
    assert!(!state.registry.is_online(alice));
    assert!(session.is_closed());
    assert!(!teardown(&state, &session));
}

#[tokio::test]
async fn test_any_frame_keeps_session_alive() {
    let (state, pool) = setup(short_heartbeat()).await;
    let alice = create_user(&pool, "alice", "pw").await;
    let (session, _rx) = connect(&state, alice, 8).await;

    tokio::time::pause();
    let (inbound, mut incoming) = frames::unbounded::<Result<Message, axum::Error>>();
    let reader = {
        let state = state.clone();
        let session = session.clone();
        tokio::spawn(async move { run_session(&state, &session, &mut incoming).await })
    };

    // Three pings, each inside the timeout, carry the session well past one
    // timeout from the start
    for _ in 0..3 {
        tokio::time::sleep(Duration::from_millis(700)).await;
        inbound.unbounded_send(Ok(Message::Ping(vec![]))).unwrap();
    }
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert!(!reader.is_finished());

    let reason = reader.await.unwrap();
    assert_eq!(reason, DisconnectReason::HeartbeatTimeout);
    drop(inbound);
}

#[tokio::test]
async fn test_eviction_ends_old_read_loop_without_touching_new_session() {
    let (state, pool) = setup(short_heartbeat()).await;
    let alice = create_user(&pool, "alice", "pw").await;
    let (first, _rx1) = connect(&state, alice, 8).await;

    let reader = {
        let state = state.clone();
        let first = first.clone();
        tokio::spawn(async move {
            let mut silent = stream::pending::<Result<Message, axum::Error>>();
            run_session(&state, &first, &mut silent).await
        })
    };

    let (second, _rx2) = connect(&state, alice, 8).await;
    assert_eq!(reader.await.unwrap(), DisconnectReason::Closed);

    assert!(!teardown(&state, &first));
    assert_eq!(
        state.registry.lookup(alice).unwrap().connection_id(),
        second.connection_id()
    );
}

#[tokio::test]
async fn test_peer_close_ends_session() {
    let (state, pool) = setup(short_heartbeat()).await;
    let alice = create_user(&pool, "alice", "pw").await;
    let (session, _rx) = connect(&state, alice, 8).await;

    let mut input = stream::iter(vec![Ok(Message::Close(None))]);
    assert_eq!(run_session(&state, &session, &mut input).await, DisconnectReason::PeerClosed);

    let mut ended = stream::iter(Vec::<Result<Message, axum::Error>>::new());
    assert_eq!(run_session(&state, &session, &mut ended).await, DisconnectReason::PeerClosed);
}

#[tokio::test]
async fn test_logout_frame_ends_read_loop() {
    let (state, pool) = setup(short_heartbeat()).await;
    let alice = create_user(&pool, "alice", "pw").await;
    let (session, mut rx) = connect(&state, alice, 8).await;

    let logout = Message::Text(r#"{"command":"logout","content":{}}"#.into());
    let mut input = stream::iter(vec![Ok(logout)]).chain(stream::pending::<Result<Message, axum::Error>>());
    let reason = run_session(&state, &session, &mut input).await;
    assert_eq!(reason, DisconnectReason::Closed);
    assert_eq!(next_envelope(&mut rx).await.command, "logout");
    assert!(teardown(&state, &session));
}
