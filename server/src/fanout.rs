//! Group messages: persist once, push to every online member

use futures::future::join_all;
use parlor_shared::payloads::{GroupMessagePush, SendGroupMessageRequest, PUSH_GROUP_MESSAGE};
use parlor_shared::{DeliveryState, Envelope, MessageAck, MessageKind};
use tracing::debug;

use crate::delivery::{check_body, push_to};
use crate::dispatcher::CommandContext;
use crate::error::{ChatError, ChatResult};

/// Deliver a group message to its members, the sender included.
///
/// Only members may post. Pushes run concurrently and each is bounded by the
/// write timeout, so one stalled member delays nobody else. The sender's ACK
/// reflects persistence only.
pub async fn send_group(ctx: &CommandContext<'_>, req: SendGroupMessageRequest) -> ChatResult<()> {
    if req.group_id <= 0 {
        return Err(ChatError::Decode("Missing groupId".into()));
    }
    check_body(ctx.state, &req.message_body)?;

    let sender = ctx.session.user_id();
    let members = ctx.state.store.fetch_group_members(req.group_id).await?;
    if members.is_empty() {
        return Err(ChatError::NotFound(format!("Group {}", req.group_id)));
    }
    if !members.contains(&sender) {
        return Err(ChatError::Forbidden("Not a member of this group".into()));
    }

    let persisted = ctx
        .state
        .store
        .save_group_message(sender, req.group_id, &req.message_body, MessageKind::User)
        .await?;

    let push = GroupMessagePush {
        sender_id: sender,
        group_id: req.group_id,
        message_id: persisted.message_id,
        message_body: req.message_body,
        time: persisted.timestamp,
        message_type: MessageKind::User,
    };
    let envelope = Envelope::new(PUSH_GROUP_MESSAGE, &push)
        .map_err(|e| ChatError::Protocol(e.to_string()))?;

    let outcomes = join_all(members.iter().map(|&member| push_to(ctx.state, member, &envelope))).await;
    let delivered = outcomes.iter().filter(|&&o| o == DeliveryState::Delivered).count();
    debug!(
        "Group message {} in {}: {}/{} members reached",
        persisted.message_id,
        req.group_id,
        delivered,
        members.len()
    );

    ctx.reply(&MessageAck {
        request_id: req.request_id,
        message_id: persisted.message_id,
        time: persisted.timestamp,
        state: DeliveryState::Delivered,
    })
    .await
}
