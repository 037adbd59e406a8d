//! Friend, group, profile, and presence commands

mod common;

use common::*;
use parlor_server::database;
use parlor_server::dispatcher::dispatch;
use parlor_shared::payloads::*;
use parlor_shared::{Permission, Profile};
use serde_json::json;

#[tokio::test]
async fn test_add_friend_persists_and_updates_session() {
    let (state, pool) = setup(test_config()).await;
    let alice = create_user(&pool, "alice", "pw").await;
    let bob = create_user(&pool, "bob", "pw").await;
    let (alice_s, mut rx) = connect(&state, alice, 8).await;

    dispatch(&state, &alice_s, &request("addFriend", &FriendRequest { friend_id: bob })).await;
    let reply: FriendResponse = next_envelope(&mut rx).await.payload().unwrap();
    assert!(reply.success);
    assert_eq!(reply.friend_list, vec![bob]);

    assert_eq!(alice_s.friend_list(), vec![bob]);
    let stored = state.store.fetch_profile(alice).await.unwrap().unwrap();
    assert_eq!(stored.user_friend_list, vec![bob]);

    // Adding twice does not duplicate
    dispatch(&state, &alice_s, &request("addFriend", &FriendRequest { friend_id: bob })).await;
    let reply: FriendResponse = next_envelope(&mut rx).await.payload().unwrap();
    assert_eq!(reply.friend_list, vec![bob]);
}

#[tokio::test]
async fn test_friend_requests_are_validated() {
    let (state, pool) = setup(test_config()).await;
    let alice = create_user(&pool, "alice", "pw").await;
    let (alice_s, mut rx) = connect(&state, alice, 8).await;

    dispatch(&state, &alice_s, &request("addFriend", &FriendRequest { friend_id: alice })).await;
    let err: ErrorReply = next_envelope(&mut rx).await.payload().unwrap();
    assert_eq!(err.error, "decode");

    dispatch(&state, &alice_s, &request("addFriend", &FriendRequest { friend_id: 999 })).await;
    let err: ErrorReply = next_envelope(&mut rx).await.payload().unwrap();
    assert_eq!(err.error, "not_found");
    assert!(alice_s.friend_list().is_empty());
}

#[tokio::test]
async fn test_delete_friend() {
    let (state, pool) = setup(test_config()).await;
    let alice = create_user(&pool, "alice", "pw").await;
    let bob = create_user(&pool, "bob", "pw").await;
    let carol = create_user(&pool, "carol", "pw").await;
    database::update_friend_list(&pool, alice, &[bob, carol]).await.unwrap();
    let (alice_s, mut rx) = connect(&state, alice, 8).await;

    dispatch(&state, &alice_s, &request("deleteFriend", &FriendRequest { friend_id: bob })).await;
    let reply: FriendResponse = next_envelope(&mut rx).await.payload().unwrap();
    assert!(reply.success);
    assert_eq!(reply.friend_list, vec![carol]);
    assert_eq!(alice_s.friend_list(), vec![carol]);

    dispatch(&state, &alice_s, &request("deleteFriend", &FriendRequest { friend_id: bob })).await;
    let reply: FriendResponse = next_envelope(&mut rx).await.payload().unwrap();
    assert!(!reply.success);
}

#[tokio::test]
async fn test_group_lifecycle() {
    let (state, pool) = setup(test_config()).await;
    let alice = create_user(&pool, "alice", "pw").await;
    let bob = create_user(&pool, "bob", "pw").await;
    let (alice_s, mut alice_rx) = connect(&state, alice, 8).await;
    let (bob_s, mut bob_rx) = connect(&state, bob, 8).await;

    dispatch(
        &state,
        &alice_s,
        &request("createGroup", &CreateGroupRequest { group_name: "climbers".into(), group_description: "".into() }),
    )
    .await;
    let created: GroupResponse = next_envelope(&mut alice_rx).await.payload().unwrap();
    assert!(created.success);
    let group = created.group_id;

    dispatch(&state, &bob_s, &request("joinGroup", &GroupRequest { group_id: group })).await;
    let joined: GroupResponse = next_envelope(&mut bob_rx).await.payload().unwrap();
    assert!(joined.success);
    assert_eq!(state.store.fetch_group_members(group).await.unwrap(), vec![alice, bob]);

    // Only the owner may dissolve, and the owner may not leave
    dispatch(&state, &bob_s, &request("breakGroup", &GroupRequest { group_id: group })).await;
    let err: ErrorReply = next_envelope(&mut bob_rx).await.payload().unwrap();
    assert_eq!(err.error, "forbidden");

    dispatch(&state, &alice_s, &request("leaveGroup", &GroupRequest { group_id: group })).await;
    let err: ErrorReply = next_envelope(&mut alice_rx).await.payload().unwrap();
    assert_eq!(err.error, "forbidden");

    dispatch(&state, &bob_s, &request("leaveGroup", &GroupRequest { group_id: group })).await;
    let left: GroupResponse = next_envelope(&mut bob_rx).await.payload().unwrap();
    assert!(left.success);

    dispatch(&state, &alice_s, &request("breakGroup", &GroupRequest { group_id: group })).await;
    let broken: GroupResponse = next_envelope(&mut alice_rx).await.payload().unwrap();
    assert!(broken.success);
    assert!(state.store.fetch_group_owner(group).await.unwrap().is_none());

    dispatch(&state, &bob_s, &request("joinGroup", &GroupRequest { group_id: group })).await;
    let err: ErrorReply = next_envelope(&mut bob_rx).await.payload().unwrap();
    assert_eq!(err.error, "not_found");
}

#[tokio::test]
async fn test_get_user_data_hides_other_friend_lists() {
    let (state, pool) = setup(test_config()).await;
    let alice = create_user(&pool, "alice", "pw").await;
    let bob = create_user(&pool, "bob", "pw").await;
    database::update_friend_list(&pool, bob, &[alice]).await.unwrap();
    database::update_friend_list(&pool, alice, &[bob]).await.unwrap();
    let (alice_s, mut rx) = connect(&state, alice, 8).await;

    dispatch(&state, &alice_s, &request("getUserData", &json!({}))).await;
    let me: Profile = next_envelope(&mut rx).await.payload().unwrap();
    assert_eq!(me.user_id, alice);
    assert_eq!(me.user_friend_list, vec![bob]);

    dispatch(&state, &alice_s, &request("getUserData", &GetUserDataRequest { user_id: Some(bob) })).await;
    let other: Profile = next_envelope(&mut rx).await.payload().unwrap();
    assert_eq!(other.user_name, "bob");
    assert_eq!(other.user_permission, Permission::Ordinary);
    assert!(other.user_friend_list.is_empty());
}

#[tokio::test]
async fn test_change_avatar() {
    let (state, pool) = setup(test_config()).await;
    let alice = create_user(&pool, "alice", "pw").await;
    let (alice_s, mut rx) = connect(&state, alice, 8).await;

    dispatch(
        &state,
        &alice_s,
        &request("changeAvatar", &ChangeAvatarRequest { new_avatar: "cat.png".into() }),
    )
    .await;
    let reply: ChangeAvatarResponse = next_envelope(&mut rx).await.payload().unwrap();
    assert!(reply.success);
    let stored = state.store.fetch_profile(alice).await.unwrap().unwrap();
    assert_eq!(stored.user_avatar, "cat.png");

    dispatch(&state, &alice_s, &request("changeAvatar", &json!({}))).await;
    let err: ErrorReply = next_envelope(&mut rx).await.payload().unwrap();
    assert_eq!(err.error, "decode");
}

#[tokio::test]
async fn test_check_online_state_reads_registry() {
    let (state, pool) = setup(test_config()).await;
    let alice = create_user(&pool, "alice", "pw").await;
    let bob = create_user(&pool, "bob", "pw").await;
    let carol = create_user(&pool, "carol", "pw").await;
    let (alice_s, mut rx) = connect(&state, alice, 8).await;
    let (_bob_s, _bob_rx) = connect(&state, bob, 8).await;

    dispatch(
        &state,
        &alice_s,
        &request("checkOnlineState", &CheckOnlineRequest { user_ids: vec![bob, carol] }),
    )
    .await;
    let reply: CheckOnlineResponse = next_envelope(&mut rx).await.payload().unwrap();
    assert_eq!(
        reply.states,
        vec![
            OnlineState { user_id: bob, online: true },
            OnlineState { user_id: carol, online: false },
        ]
    );
}

#[tokio::test]
async fn test_logout_replies_then_closes() {
    let (state, pool) = setup(test_config()).await;
    let alice = create_user(&pool, "alice", "pw").await;
    let (alice_s, mut rx) = connect(&state, alice, 8).await;

    dispatch(&state, &alice_s, &request("logout", &json!({}))).await;
    let reply: LogoutResponse = next_envelope(&mut rx).await.payload().unwrap();
    assert!(reply.success);
    assert!(alice_s.is_closed());
}
