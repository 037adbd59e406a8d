//! Friend list, group membership, profile, and presence commands

use parlor_shared::payloads::{
    ChangeAvatarRequest, ChangeAvatarResponse, CheckOnlineRequest, CheckOnlineResponse,
    CreateGroupRequest, FriendRequest, FriendResponse, GetUserDataRequest, GroupRequest,
    GroupResponse, HeartbeatResponse, LogoutResponse, OnlineState,
};
use parlor_shared::{unix_millis, GroupId, UserId};
use tracing::{debug, info};

use crate::dispatcher::CommandContext;
use crate::error::{ChatError, ChatResult};

const MAX_AVATAR_LEN: usize = 2048;
const MAX_GROUP_NAME_LEN: usize = 64;
const MAX_ONLINE_QUERY: usize = 512;

// ---------------------------------------------------------------------------
// Friends
// ---------------------------------------------------------------------------

fn check_friend_id(ctx: &CommandContext<'_>, friend_id: UserId) -> ChatResult<()> {
    if friend_id <= 0 {
        return Err(ChatError::Decode("Missing friendId".into()));
    }
    if friend_id == ctx.session.user_id() {
        return Err(ChatError::Decode("Cannot befriend yourself".into()));
    }
    Ok(())
}

/// The new list is written to the store first and mirrored into the session
/// only once that succeeds.
pub async fn add_friend(ctx: &CommandContext<'_>, req: FriendRequest) -> ChatResult<()> {
    check_friend_id(ctx, req.friend_id)?;
    let user = ctx.session.user_id();

    let mut friends = ctx.session.friend_list();
    if !friends.contains(&req.friend_id) {
        if ctx.state.store.fetch_profile(req.friend_id).await?.is_none() {
            return Err(ChatError::NotFound(format!("User {}", req.friend_id)));
        }
        friends.push(req.friend_id);
        ctx.state.store.update_friend_list(user, &friends).await?;
        ctx.session.set_friend_list(friends.clone());
        debug!("User {} added friend {}", user, req.friend_id);
    }

    ctx.reply(&FriendResponse {
        user_id: user,
        friend_id: req.friend_id,
        success: true,
        friend_list: friends,
    })
    .await
}

pub async fn delete_friend(ctx: &CommandContext<'_>, req: FriendRequest) -> ChatResult<()> {
    check_friend_id(ctx, req.friend_id)?;
    let user = ctx.session.user_id();

    let mut friends = ctx.session.friend_list();
    let before = friends.len();
    friends.retain(|&id| id != req.friend_id);
    let removed = friends.len() != before;
    if removed {
        ctx.state.store.update_friend_list(user, &friends).await?;
        ctx.session.set_friend_list(friends.clone());
        debug!("User {} removed friend {}", user, req.friend_id);
    }

    ctx.reply(&FriendResponse {
        user_id: user,
        friend_id: req.friend_id,
        success: removed,
        friend_list: friends,
    })
    .await
}

// ---------------------------------------------------------------------------
// Groups
// ---------------------------------------------------------------------------

pub async fn create_group(ctx: &CommandContext<'_>, req: CreateGroupRequest) -> ChatResult<()> {
    let name = req.group_name.trim();
    if name.is_empty() {
        return Err(ChatError::Decode("Missing groupName".into()));
    }
    if name.len() > MAX_GROUP_NAME_LEN {
        return Err(ChatError::Decode("groupName too long".into()));
    }

    let owner = ctx.session.user_id();
    let group_id = ctx
        .state
        .store
        .create_group(name, &req.group_description, owner)
        .await?;
    info!("User {} created group {}", owner, group_id);

    ctx.reply(&GroupResponse { group_id, success: true }).await
}

async fn owner_of(ctx: &CommandContext<'_>, group_id: GroupId) -> ChatResult<UserId> {
    if group_id <= 0 {
        return Err(ChatError::Decode("Missing groupId".into()));
    }
    ctx.state
        .store
        .fetch_group_owner(group_id)
        .await?
        .ok_or_else(|| ChatError::NotFound(format!("Group {}", group_id)))
}

pub async fn break_group(ctx: &CommandContext<'_>, req: GroupRequest) -> ChatResult<()> {
    let owner = owner_of(ctx, req.group_id).await?;
    let user = ctx.session.user_id();
    if owner != user {
        return Err(ChatError::Forbidden("Only the group owner can dissolve it".into()));
    }

    let success = ctx.state.store.dissolve_group(req.group_id, user).await?;
    if success {
        info!("User {} dissolved group {}", user, req.group_id);
    }
    ctx.reply(&GroupResponse { group_id: req.group_id, success }).await
}

pub async fn join_group(ctx: &CommandContext<'_>, req: GroupRequest) -> ChatResult<()> {
    owner_of(ctx, req.group_id).await?;
    ctx.state
        .store
        .add_group_member(req.group_id, ctx.session.user_id())
        .await?;
    ctx.reply(&GroupResponse { group_id: req.group_id, success: true }).await
}

pub async fn leave_group(ctx: &CommandContext<'_>, req: GroupRequest) -> ChatResult<()> {
    let owner = owner_of(ctx, req.group_id).await?;
    let user = ctx.session.user_id();
    if owner == user {
        return Err(ChatError::Forbidden("The owner cannot leave; dissolve the group instead".into()));
    }
    ctx.state.store.remove_group_member(req.group_id, user).await?;
    ctx.reply(&GroupResponse { group_id: req.group_id, success: true }).await
}

// ---------------------------------------------------------------------------
// Profile
// ---------------------------------------------------------------------------

/// Own profile in full; anyone else's without their friend list.
pub async fn get_user_data(ctx: &CommandContext<'_>, req: GetUserDataRequest) -> ChatResult<()> {
    let me = ctx.session.user_id();
    let target = req.user_id.filter(|&id| id > 0).unwrap_or(me);

    let mut profile = ctx
        .state
        .store
        .fetch_profile(target)
        .await?
        .ok_or_else(|| ChatError::NotFound(format!("User {}", target)))?;
    if target != me {
        profile.user_friend_list.clear();
    }

    ctx.reply(&profile).await
}

pub async fn change_avatar(ctx: &CommandContext<'_>, req: ChangeAvatarRequest) -> ChatResult<()> {
    if req.new_avatar.is_empty() {
        return Err(ChatError::Decode("Missing newAvatar".into()));
    }
    if req.new_avatar.len() > MAX_AVATAR_LEN {
        return Err(ChatError::Decode("newAvatar too long".into()));
    }

    let user = ctx.session.user_id();
    ctx.state.store.update_avatar(user, &req.new_avatar).await?;
    ctx.session.set_avatar(req.new_avatar.clone());

    ctx.reply(&ChangeAvatarResponse {
        user_id: user,
        new_avatar: req.new_avatar,
        success: true,
    })
    .await
}

// ---------------------------------------------------------------------------
// Presence and connection control
// ---------------------------------------------------------------------------

pub async fn check_online_state(ctx: &CommandContext<'_>, req: CheckOnlineRequest) -> ChatResult<()> {
    if req.user_ids.len() > MAX_ONLINE_QUERY {
        return Err(ChatError::Decode("Too many userIds".into()));
    }
    let online = ctx.state.registry.online_states(&req.user_ids);
    let states = req
        .user_ids
        .into_iter()
        .zip(online)
        .map(|(user_id, online)| OnlineState { user_id, online })
        .collect();
    ctx.reply(&CheckOnlineResponse { states }).await
}

/// Liveness is refreshed by the read loop for every frame; this only answers.
pub async fn heartbeat(ctx: &CommandContext<'_>) -> ChatResult<()> {
    ctx.reply(&HeartbeatResponse { time: unix_millis() }).await
}

/// Confirm, then close the connection. Teardown follows on the read loop.
pub async fn logout(ctx: &CommandContext<'_>) -> ChatResult<()> {
    let result = ctx.reply(&LogoutResponse { success: true }).await;
    info!("User {} logged out", ctx.session.user_id());
    ctx.session.close();
    result
}
