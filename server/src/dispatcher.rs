//! Routes decoded envelopes of an authenticated session to their handlers

use parlor_shared::payloads::ErrorReply;
use parlor_shared::{Codec, Envelope, Frame};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, error, warn};

use crate::config::CommandTokens;
use crate::error::{ChatError, ChatResult};
use crate::session::{SendError, Session};
use crate::websocket::ServerState;
use crate::{delivery, fanout, handlers};

/// Every command an authenticated session may issue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    SendUserMessage,
    SendGroupMessage,
    AddFriend,
    DeleteFriend,
    CreateGroup,
    BreakGroup,
    JoinGroup,
    LeaveGroup,
    GetUserData,
    GetMessagesWithUser,
    GetOfflineMessage,
    ChangeAvatar,
    Heartbeat,
    CheckOnlineState,
    Logout,
}

/// Two-way mapping between configured token strings and commands.
///
/// The login token is not part of the table; a repeated login after
/// admission is treated like any other unknown token.
#[derive(Debug, Clone)]
pub struct CommandTable {
    by_token: HashMap<String, Command>,
    by_command: HashMap<Command, String>,
}

impl CommandTable {
    pub fn new(tokens: &CommandTokens) -> Self {
        let pairs = [
            (&tokens.send_user_message, Command::SendUserMessage),
            (&tokens.send_group_message, Command::SendGroupMessage),
            (&tokens.add_friend, Command::AddFriend),
            (&tokens.delete_friend, Command::DeleteFriend),
            (&tokens.create_group, Command::CreateGroup),
            (&tokens.break_group, Command::BreakGroup),
            (&tokens.join_group, Command::JoinGroup),
            (&tokens.leave_group, Command::LeaveGroup),
            (&tokens.get_user_data, Command::GetUserData),
            (&tokens.get_messages_with_user, Command::GetMessagesWithUser),
            (&tokens.get_offline_message, Command::GetOfflineMessage),
            (&tokens.change_avatar, Command::ChangeAvatar),
            (&tokens.heartbeat, Command::Heartbeat),
            (&tokens.check_online_state, Command::CheckOnlineState),
            (&tokens.logout, Command::Logout),
        ];

        let mut by_token = HashMap::with_capacity(pairs.len());
        let mut by_command = HashMap::with_capacity(pairs.len());
        for (token, command) in pairs {
            by_token.insert(token.clone(), command);
            by_command.insert(command, token.clone());
        }
        Self { by_token, by_command }
    }

    pub fn resolve(&self, token: &str) -> Option<Command> {
        self.by_token.get(token).copied()
    }

    /// Token replies to `command` are sent under.
    pub fn token(&self, command: Command) -> &str {
        self.by_command.get(&command).map(String::as_str).unwrap_or_default()
    }
}

/// What a handler sees of the request it is serving.
pub struct CommandContext<'a> {
    pub state: &'a ServerState,
    pub session: &'a Arc<Session>,
    pub command: Command,
}

impl CommandContext<'_> {
    /// Send `payload` back to the caller under the request's token.
    pub async fn reply<T: Serialize>(&self, payload: &T) -> ChatResult<()> {
        let token = self.state.commands.token(self.command);
        let envelope =
            Envelope::new(token, payload).map_err(|e| ChatError::Protocol(e.to_string()))?;
        self.session.send(&envelope).await.map_err(|e| match e {
            SendError::Closed => ChatError::Transport("connection closed".into()),
            SendError::Timeout => ChatError::Transport("write timed out".into()),
            SendError::Encoding => ChatError::Protocol("reply could not be encoded".into()),
        })
    }
}

/// Decode a command payload, falling back to its zero value when the
/// content does not match. Handlers reject the zero value where it is not a
/// legal request.
fn decode_or_default<T: DeserializeOwned + Default>(envelope: &Envelope) -> T {
    envelope.payload().unwrap_or_else(|e| {
        warn!("Payload for '{}' did not decode, using defaults: {}", envelope.command, e);
        T::default()
    })
}

/// Handle one inbound frame of an authenticated session.
///
/// Never fails: unknown tokens are dropped, and handler errors become a
/// failure reply to the caller. The connection stays open either way.
pub async fn dispatch(state: &ServerState, session: &Arc<Session>, frame: &Frame) {
    let envelope = match Codec::decode::<Envelope>(frame) {
        Ok((envelope, _)) => envelope,
        Err(e) => {
            debug!("User {} sent an undecodable frame: {}", session.user_id(), e);
            return;
        }
    };

    let Some(command) = state.commands.resolve(&envelope.command) else {
        debug!("User {} sent unknown command '{}'", session.user_id(), envelope.command);
        return;
    };

    let ctx = CommandContext { state, session, command };
    if let Err(err) = run(&ctx, &envelope).await {
        match &err {
            ChatError::Store(e) => error!("{:?} for user {} failed: {:#}", command, session.user_id(), e),
            other => debug!("{:?} for user {} rejected: {}", command, session.user_id(), other),
        }
        let reply = ErrorReply {
            success: false,
            error: err.kind().to_string(),
            message: err.public_message(),
            request_id: correlation_id(command, &envelope),
        };
        if let Err(e) = ctx.reply(&reply).await {
            debug!("Could not deliver error reply to user {}: {}", session.user_id(), e);
        }
    }
}

/// Client correlation id of a send, read straight from the raw content so it
/// survives a payload that failed to decode.
fn correlation_id(command: Command, envelope: &Envelope) -> Option<i64> {
    match command {
        Command::SendUserMessage | Command::SendGroupMessage => {
            envelope.content.get("requestId").and_then(serde_json::Value::as_i64)
        }
        _ => None,
    }
}

async fn run(ctx: &CommandContext<'_>, envelope: &Envelope) -> ChatResult<()> {
    match ctx.command {
        Command::SendUserMessage => delivery::send_direct(ctx, decode_or_default(envelope)).await,
        Command::SendGroupMessage => fanout::send_group(ctx, decode_or_default(envelope)).await,
        Command::GetMessagesWithUser => delivery::fetch_history(ctx, decode_or_default(envelope)).await,
        Command::GetOfflineMessage => delivery::fetch_offline(ctx).await,
        Command::AddFriend => handlers::add_friend(ctx, decode_or_default(envelope)).await,
        Command::DeleteFriend => handlers::delete_friend(ctx, decode_or_default(envelope)).await,
        Command::CreateGroup => handlers::create_group(ctx, decode_or_default(envelope)).await,
        Command::BreakGroup => handlers::break_group(ctx, decode_or_default(envelope)).await,
        Command::JoinGroup => handlers::join_group(ctx, decode_or_default(envelope)).await,
        Command::LeaveGroup => handlers::leave_group(ctx, decode_or_default(envelope)).await,
        Command::GetUserData => handlers::get_user_data(ctx, decode_or_default(envelope)).await,
        Command::ChangeAvatar => handlers::change_avatar(ctx, decode_or_default(envelope)).await,
        Command::CheckOnlineState => handlers::check_online_state(ctx, decode_or_default(envelope)).await,
        Command::Heartbeat => handlers::heartbeat(ctx).await,
        Command::Logout => handlers::logout(ctx).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_tokens_resolve() {
        let table = CommandTable::new(&CommandTokens::default());
        assert_eq!(table.resolve("sendUserMessage"), Some(Command::SendUserMessage));
        assert_eq!(table.resolve("breakGroup"), Some(Command::BreakGroup));
        assert_eq!(table.token(Command::GetOfflineMessage), "getOfflineMessage");
        assert_eq!(table.resolve("login"), None);
        assert_eq!(table.resolve("nope"), None);
    }

    #[test]
    fn test_custom_tokens_replace_defaults() {
        let tokens = CommandTokens::from_json(r#"{"sendUserMessage": "dm"}"#).unwrap();
        let table = CommandTable::new(&tokens);
        assert_eq!(table.resolve("dm"), Some(Command::SendUserMessage));
        assert_eq!(table.resolve("sendUserMessage"), None);
        assert_eq!(table.token(Command::SendUserMessage), "dm");
    }

    #[test]
    fn test_mismatched_payload_falls_back_to_default() {
        let (envelope, _): (Envelope, _) = Codec::decode(&Frame::Text(
            r#"{"command":"addFriend","content":{"friendId":"seven"}}"#.into(),
        ))
        .unwrap();
        let req: parlor_shared::payloads::FriendRequest = decode_or_default(&envelope);
        assert_eq!(req.friend_id, 0);
    }

    #[test]
    fn test_correlation_id_only_for_sends() {
        let (envelope, _): (Envelope, _) = Codec::decode(&Frame::Text(
            r#"{"command":"sendUserMessage","content":{"requestId":12,"targetId":"bob"}}"#.into(),
        ))
        .unwrap();
        assert_eq!(correlation_id(Command::SendUserMessage, &envelope), Some(12));
        assert_eq!(correlation_id(Command::SendGroupMessage, &envelope), Some(12));
        assert_eq!(correlation_id(Command::AddFriend, &envelope), None);
    }
}
