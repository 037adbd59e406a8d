//! Helpers shared by the server integration tests
#![allow(dead_code)]

use parlor_server::config::ServerConfig;
use parlor_server::database;
use parlor_server::db::sqlite::SqliteStore;
use parlor_server::db::ChatStore;
use parlor_server::session::{ConnectionHandle, Outbound, Session};
use parlor_server::websocket::ServerState;
use parlor_shared::{generate_salt, hash_password, Codec, Envelope, Frame, UserId, SALT_LENGTH};
use serde::Serialize;
use sqlx::SqlitePool;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

pub fn test_config() -> ServerConfig {
    ServerConfig {
        write_timeout_ms: 50,
        ..ServerConfig::default()
    }
}

/// Fresh in-memory database and server state around it.
pub async fn setup(config: ServerConfig) -> (Arc<ServerState>, SqlitePool) {
    let pool = database::init_memory().await.expect("Failed to create test database");
    let store: Arc<dyn ChatStore> = Arc::new(SqliteStore::new(pool.clone()));
    (Arc::new(ServerState::new(store, config)), pool)
}

pub async fn create_user(pool: &SqlitePool, name: &str, password: &str) -> UserId {
    let salt = generate_salt(SALT_LENGTH);
    let hash = hash_password(password, &salt);
    database::create_user(pool, name, &hash, &salt).await.unwrap()
}

/// Stand-in for a connection's socket writer. Frames queued on the handle are
/// moved to the returned receiver and confirmed as written; once the receiver
/// is dropped, writes fail and nothing more is confirmed.
pub fn wire(capacity: usize) -> (ConnectionHandle, mpsc::Receiver<Frame>) {
    let (tx, mut queue) = mpsc::channel::<Outbound>(capacity);
    let (socket, rx) = mpsc::channel(capacity);
    tokio::spawn(async move {
        while let Some(Outbound { frame, written }) = queue.recv().await {
            if socket.send(frame).await.is_err() {
                break;
            }
            Outbound::confirm(written);
        }
    });
    (ConnectionHandle::new(tx), rx)
}

async fn register(state: &ServerState, user_id: UserId, handle: ConnectionHandle) -> Arc<Session> {
    let profile = state.store.fetch_profile(user_id).await.unwrap().expect("user exists");
    let session = Arc::new(Session::new(profile, Codec::Json, handle, state.config.write_timeout()));
    state.registry.register(session.clone());
    session
}

/// Register a JSON session for `user_id` whose written frames land in the
/// returned receiver.
pub async fn connect(
    state: &ServerState,
    user_id: UserId,
    capacity: usize,
) -> (Arc<Session>, mpsc::Receiver<Frame>) {
    let (handle, rx) = wire(capacity);
    (register(state, user_id, handle).await, rx)
}

/// Register a session whose writer never runs: frames pile up in the
/// returned queue and no write is ever confirmed.
pub async fn connect_stalled(
    state: &ServerState,
    user_id: UserId,
    capacity: usize,
) -> (Arc<Session>, mpsc::Receiver<Outbound>) {
    let (tx, queue) = mpsc::channel(capacity);
    (register(state, user_id, ConnectionHandle::new(tx)).await, queue)
}

pub fn request<T: Serialize>(command: &str, content: &T) -> Frame {
    Codec::Json.encode(&Envelope::new(command, content).unwrap()).unwrap()
}

pub async fn next_envelope(rx: &mut mpsc::Receiver<Frame>) -> Envelope {
    let frame = tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("timed out waiting for a frame")
        .expect("outbound queue closed");
    let (envelope, _) = Codec::decode::<Envelope>(&frame).unwrap();
    envelope
}

pub fn assert_idle(rx: &mut mpsc::Receiver<Frame>) {
    assert!(rx.try_recv().is_err(), "unexpected frame in queue");
}
