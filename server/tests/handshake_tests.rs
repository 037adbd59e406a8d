//! Login handshake over an in-memory frame stream

mod common;

use anyhow::Result;
use async_trait::async_trait;
use axum::extract::ws::Message;
use common::*;
use futures::stream;
use parlor_server::database;
use parlor_server::db::sqlite::SqliteStore;
use parlor_server::db::{ChatStore, Persisted};
use parlor_server::websocket::ServerState;
use parlor_shared::payloads::StoredMessage;
use parlor_shared::{GroupId, MessageId, MessageKind, Profile, UserId};
use std::sync::Arc;
use parlor_server::handshake::{authenticate, HandshakeError};
use parlor_shared::payloads::{LoginRequest, LoginResponse};
use parlor_shared::{Codec, Envelope, Frame, Permission};
use serde_json::json;
use tokio::sync::mpsc;

fn frames(messages: Vec<Message>) -> impl futures::Stream<Item = Result<Message, axum::Error>> + Unpin {
    stream::iter(messages.into_iter().map(Ok))
}

fn raw_login(user_id: i64, password: &str) -> Message {
    Message::Text(json!({"userId": user_id, "password": password}).to_string())
}

async fn login_reply(rx: &mut mpsc::Receiver<Frame>) -> LoginResponse {
    let envelope = next_envelope(rx).await;
    assert_eq!(envelope.command, "login");
    envelope.payload().unwrap()
}

#[tokio::test]
async fn test_raw_credentials_admit_session() {
    let (state, pool) = setup(test_config()).await;
    let alice = create_user(&pool, "alice", "secret").await;
    let (handle, mut rx) = wire(8);

    let mut input = frames(vec![raw_login(alice, "secret")]);
    let session = authenticate(&mut input, &handle, &state).await.unwrap();

    assert_eq!(session.user_id(), alice);
    assert_eq!(session.codec(), Codec::Json);
    assert!(state.registry.is_online(alice));

    let reply = login_reply(&mut rx).await;
    assert!(reply.state);
    assert_eq!(reply.profile.unwrap().user_name, "alice");
}

#[tokio::test]
async fn test_messagepack_envelope_selects_binary_codec() {
    let (state, pool) = setup(test_config()).await;
    let alice = create_user(&pool, "alice", "secret").await;
    let (handle, mut rx) = wire(8);

    let envelope = Envelope::new("login", &LoginRequest { user_id: alice, password: "secret".into() }).unwrap();
    let Frame::Binary(bytes) = Codec::MessagePack.encode(&envelope).unwrap() else {
        panic!("MessagePack must encode to a binary frame");
    };
    let mut input = frames(vec![Message::Binary(bytes)]);
    let session = authenticate(&mut input, &handle, &state).await.unwrap();
    assert_eq!(session.codec(), Codec::MessagePack);

    let frame = rx.recv().await.unwrap();
    assert!(matches!(frame, Frame::Binary(_)));
}

#[tokio::test]
async fn test_wrong_password_then_retry() {
    let (state, pool) = setup(test_config()).await;
    let alice = create_user(&pool, "alice", "secret").await;
    let (handle, mut rx) = wire(8);

    let mut input = frames(vec![
        raw_login(alice, "guess"),
        Message::Ping(vec![]),
        raw_login(alice, "secret"),
    ]);
    let session = authenticate(&mut input, &handle, &state).await.unwrap();
    assert_eq!(session.user_id(), alice);

    assert!(!login_reply(&mut rx).await.state);
    assert!(login_reply(&mut rx).await.state);
}

#[tokio::test]
async fn test_attempts_are_bounded() {
    let mut config = test_config();
    config.max_auth_attempts = 2;
    let (state, pool) = setup(config).await;
    let alice = create_user(&pool, "alice", "secret").await;
    let (handle, _rx) = wire(8);

    let mut input = frames(vec![
        raw_login(alice, "one"),
        Message::Text("garbage".into()),
        raw_login(alice, "secret"),
    ]);
    let err = authenticate(&mut input, &handle, &state).await.unwrap_err();
    assert!(matches!(err, HandshakeError::TooManyAttempts));
    assert!(!state.registry.is_online(alice));
}

#[tokio::test]
async fn test_unknown_user_and_banned_user_are_rejected() {
    let (state, pool) = setup(test_config()).await;
    let alice = create_user(&pool, "alice", "secret").await;
    database::set_permission(&pool, alice, Permission::Banned).await.unwrap();
    let (handle, mut rx) = wire(8);

    let mut input = frames(vec![raw_login(4242, "secret"), raw_login(alice, "secret")]);
    let err = authenticate(&mut input, &handle, &state).await.unwrap_err();
    assert!(matches!(err, HandshakeError::Closed));

    assert!(!login_reply(&mut rx).await.state);
    let banned = login_reply(&mut rx).await;
    assert!(!banned.state);
    assert_eq!(banned.message, "banned");
    assert!(state.registry.is_empty());
}

#[tokio::test]
async fn test_non_login_command_is_not_a_login() {
    let (state, pool) = setup(test_config()).await;
    let alice = create_user(&pool, "alice", "secret").await;
    let (handle, mut rx) = wire(8);

    let sneaky = json!({"command": "sendUserMessage", "content": {"userId": alice, "password": "secret"}});
    let mut input = frames(vec![Message::Text(sneaky.to_string())]);
    assert!(authenticate(&mut input, &handle, &state).await.is_err());
    assert!(!login_reply(&mut rx).await.state);
}

#[tokio::test]
async fn test_silent_connection_times_out() {
    let mut config = test_config();
    config.auth_timeout_seconds = 5;
    let (state, _pool) = setup(config).await;
    let (handle, _rx) = wire(8);

    tokio::time::pause();
    let mut input = stream::pending::<Result<Message, axum::Error>>();
    let err = authenticate(&mut input, &handle, &state).await.unwrap_err();
    assert!(matches!(err, HandshakeError::TimedOut));
}

#[tokio::test]
async fn test_second_login_evicts_first_session() {
    let (state, pool) = setup(test_config()).await;
    let alice = create_user(&pool, "alice", "secret").await;

    let (handle1, mut rx1) = wire(8);
    let first = authenticate(&mut frames(vec![raw_login(alice, "secret")]), &handle1, &state)
        .await
        .unwrap();
    let _ = login_reply(&mut rx1).await;

    let (handle2, _rx2) = wire(8);
    let second = authenticate(&mut frames(vec![raw_login(alice, "secret")]), &handle2, &state)
        .await
        .unwrap();

    assert!(first.is_closed());
    assert!(!second.is_closed());
    assert_eq!(
        state.registry.lookup(alice).unwrap().connection_id(),
        second.connection_id()
    );

    // The old connection was told why
    let notice = next_envelope(&mut rx1).await;
    assert_eq!(notice.command, "systemMessage");
}

/// SQLite store whose credential lookups never complete.
struct HungCredentials(SqliteStore);

#[async_trait]
impl ChatStore for HungCredentials {
    async fn fetch_password_hash(&self, _: UserId) -> Result<Option<(String, Vec<u8>)>> {
        futures::future::pending().await
    }
    async fn fetch_profile(&self, user_id: UserId) -> Result<Option<Profile>> {
        self.0.fetch_profile(user_id).await
    }
    async fn update_friend_list(&self, user_id: UserId, friends: &[UserId]) -> Result<()> {
        self.0.update_friend_list(user_id, friends).await
    }
    async fn update_avatar(&self, user_id: UserId, avatar: &str) -> Result<()> {
        self.0.update_avatar(user_id, avatar).await
    }
    async fn save_direct_message(&self, s: UserId, r: UserId, body: &str, kind: MessageKind) -> Result<Persisted> {
        self.0.save_direct_message(s, r, body, kind).await
    }
    async fn mark_delivered(&self, message_id: MessageId) -> Result<()> {
        self.0.mark_delivered(message_id).await
    }
    async fn fetch_undelivered_queue(&self, user_id: UserId, limit: i64) -> Result<Vec<StoredMessage>> {
        self.0.fetch_undelivered_queue(user_id, limit).await
    }
    async fn purge_undelivered_queue(&self, user_id: UserId, up_to: MessageId) -> Result<u64> {
        self.0.purge_undelivered_queue(user_id, up_to).await
    }
    async fn fetch_history(&self, u: UserId, o: UserId, s: i64, e: i64, l: i64) -> Result<Vec<StoredMessage>> {
        self.0.fetch_history(u, o, s, e, l).await
    }
    async fn save_group_message(&self, s: UserId, g: GroupId, body: &str, kind: MessageKind) -> Result<Persisted> {
        self.0.save_group_message(s, g, body, kind).await
    }
    async fn fetch_group_members(&self, group_id: GroupId) -> Result<Vec<UserId>> {
        self.0.fetch_group_members(group_id).await
    }
    async fn fetch_group_owner(&self, group_id: GroupId) -> Result<Option<UserId>> {
        self.0.fetch_group_owner(group_id).await
    }
    async fn create_group(&self, name: &str, description: &str, owner_id: UserId) -> Result<GroupId> {
        self.0.create_group(name, description, owner_id).await
    }
    async fn dissolve_group(&self, group_id: GroupId, owner_id: UserId) -> Result<bool> {
        self.0.dissolve_group(group_id, owner_id).await
    }
    async fn add_group_member(&self, group_id: GroupId, user_id: UserId) -> Result<()> {
        self.0.add_group_member(group_id, user_id).await
    }
    async fn remove_group_member(&self, group_id: GroupId, user_id: UserId) -> Result<()> {
        self.0.remove_group_member(group_id, user_id).await
    }
}

#[tokio::test]
async fn test_hung_credential_lookup_counts_against_auth_timeout() {
    let pool = database::init_memory().await.unwrap();
    let alice = create_user(&pool, "alice", "secret").await;
    let mut config = test_config();
    config.auth_timeout_seconds = 5;
    let store: Arc<dyn ChatStore> = Arc::new(HungCredentials(SqliteStore::new(pool)));
    let state = ServerState::new(store, config);
    let (handle, _rx) = wire(8);

    tokio::time::pause();
    let mut input = frames(vec![raw_login(alice, "secret")]);
    let err = authenticate(&mut input, &handle, &state).await.unwrap_err();
    assert!(matches!(err, HandshakeError::TimedOut));
    assert!(state.registry.is_empty());
}
