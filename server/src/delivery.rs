//! Direct messages: persist, push to the recipient if online, acknowledge

use parlor_shared::payloads::{
    HistoryRequest, HistoryResponse, OfflineMessagesResponse, SendMessageRequest, UserMessagePush,
    PUSH_USER_MESSAGE,
};
use parlor_shared::{unix_millis, DeliveryState, Envelope, MessageAck, MessageKind, UserId};
use tracing::{debug, warn};

use crate::dispatcher::CommandContext;
use crate::error::{ChatError, ChatResult};
use crate::websocket::ServerState;

/// Write `envelope` to `recipient`'s live session, if there is one.
///
/// `Delivered` means the frame reached the recipient's socket; a frame that
/// was only queued when the connection died counts as a transport error. The
/// registry is consulted at call time, so a session evicted by a newer login
/// is never written to.
pub async fn push_to(state: &ServerState, recipient: UserId, envelope: &Envelope) -> DeliveryState {
    let Some(session) = state.registry.lookup(recipient) else {
        return DeliveryState::RecipientOffline;
    };
    match session.deliver(envelope).await {
        Ok(()) => DeliveryState::Delivered,
        Err(e) => {
            debug!("Push to user {} failed: {:?}", recipient, e);
            DeliveryState::TransportError
        }
    }
}

pub(crate) fn check_body(state: &ServerState, body: &str) -> ChatResult<()> {
    if body.is_empty() {
        return Err(ChatError::Decode("Missing messageBody".into()));
    }
    if body.len() > state.config.max_message_size {
        return Err(ChatError::Decode("Message too large".into()));
    }
    Ok(())
}

/// Persist-then-deliver for one direct message.
///
/// Nothing is pushed or acknowledged unless the store accepted the message.
/// The ACK reports what happened on the recipient side; a message whose
/// recipient was offline or unreachable stays in their offline queue.
pub async fn send_direct(ctx: &CommandContext<'_>, req: SendMessageRequest) -> ChatResult<()> {
    if req.target_id <= 0 {
        return Err(ChatError::Decode("Missing targetId".into()));
    }
    check_body(ctx.state, &req.message_body)?;

    let sender = ctx.session.user_id();
    let persisted = ctx
        .state
        .store
        .save_direct_message(sender, req.target_id, &req.message_body, MessageKind::User)
        .await?;

    let push = UserMessagePush {
        sender_id: sender,
        message_id: persisted.message_id,
        message_body: req.message_body,
        time: persisted.timestamp,
        message_type: MessageKind::User,
    };
    let envelope = Envelope::new(PUSH_USER_MESSAGE, &push)
        .map_err(|e| ChatError::Protocol(e.to_string()))?;

    let outcome = push_to(ctx.state, req.target_id, &envelope).await;
    if outcome == DeliveryState::Delivered {
        if let Err(e) = ctx.state.store.mark_delivered(persisted.message_id).await {
            // The message will be offered again on the next offline fetch
            warn!("Failed to mark message {} delivered: {:#}", persisted.message_id, e);
        }
    }
    debug!(
        "Message {} from {} to {}: {:?}",
        persisted.message_id, sender, req.target_id, outcome
    );

    ctx.reply(&MessageAck {
        request_id: req.request_id,
        message_id: persisted.message_id,
        time: persisted.timestamp,
        state: outcome,
    })
    .await
}

/// Return the caller's undelivered direct messages, then drop them from the
/// queue. Messages that arrive while the reply is in flight stay queued.
pub async fn fetch_offline(ctx: &CommandContext<'_>) -> ChatResult<()> {
    let user = ctx.session.user_id();
    let messages = ctx
        .state
        .store
        .fetch_undelivered_queue(user, ctx.state.config.history_limit)
        .await?;
    let up_to = messages.iter().map(|m| m.message_id).max();
    let count = messages.len();

    ctx.reply(&OfflineMessagesResponse { messages }).await?;

    if let Some(up_to) = up_to {
        let purged = ctx.state.store.purge_undelivered_queue(user, up_to).await?;
        debug!("Handed {} offline messages to user {} ({} purged)", count, user, purged);
    }
    Ok(())
}

/// Conversation between the caller and another user inside a time window.
pub async fn fetch_history(ctx: &CommandContext<'_>, req: HistoryRequest) -> ChatResult<()> {
    if req.other_user_id <= 0 {
        return Err(ChatError::Decode("Missing otherUserId".into()));
    }
    let end_time = if req.end_time == 0 { unix_millis() } else { req.end_time };
    if req.start_time > end_time {
        return Err(ChatError::Decode("startTime is after endTime".into()));
    }

    let user = ctx.session.user_id();
    let messages = ctx
        .state
        .store
        .fetch_history(user, req.other_user_id, req.start_time, end_time, ctx.state.config.history_limit)
        .await?;

    ctx.reply(&HistoryResponse {
        user_id: user,
        other_user_id: req.other_user_id,
        messages,
    })
    .await
}
