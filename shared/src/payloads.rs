//! Command payload schemas
//!
//! Field names are camelCase on the wire. Every request payload implements
//! `Default` and defaults each field, so a frame with missing fields still
//! decodes; handlers treat the zero values as a data error.

use serde::{Deserialize, Serialize};

use crate::error::ProtocolError;

/// Stable integer key of a user account
pub type UserId = i64;
/// Stable integer key of a group
pub type GroupId = i64;
/// Server-assigned message identifier
pub type MessageId = i64;

/// Outbound push of a direct message to its recipient
pub const PUSH_USER_MESSAGE: &str = "userMessage";
/// Outbound push of a group message to each member
pub const PUSH_GROUP_MESSAGE: &str = "groupMessage";
/// Outbound system notice (admin broadcast, eviction notice)
pub const PUSH_SYSTEM_MESSAGE: &str = "systemMessage";

// ---------------------------------------------------------------------------
// Enumerations
// ---------------------------------------------------------------------------

/// Account permission level, ordered from least to most privileged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(from = "u32", into = "u32")]
pub enum Permission {
    /// Account may not log in
    Banned,
    /// Regular user
    #[default]
    Ordinary,
    /// Another server acting on behalf of its users
    ServerPeer,
}

impl From<u32> for Permission {
    fn from(value: u32) -> Self {
        match value {
            0 => Permission::Banned,
            2 => Permission::ServerPeer,
            _ => Permission::Ordinary,
        }
    }
}

impl From<Permission> for u32 {
    fn from(value: Permission) -> Self {
        match value {
            Permission::Banned => 0,
            Permission::Ordinary => 1,
            Permission::ServerPeer => 2,
        }
    }
}

/// Whether a message was written by a user or generated by the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "u8", into = "u8")]
pub enum MessageKind {
    /// Written by a user
    #[default]
    User,
    /// Generated by the server
    System,
}

impl From<u8> for MessageKind {
    fn from(value: u8) -> Self {
        if value == 1 {
            MessageKind::System
        } else {
            MessageKind::User
        }
    }
}

impl From<MessageKind> for u8 {
    fn from(value: MessageKind) -> Self {
        match value {
            MessageKind::User => 0,
            MessageKind::System => 1,
        }
    }
}

/// Outcome of a live delivery attempt, reported in every ACK.
///
/// Encoded as a small integer: `1` transport error, `2` recipient offline,
/// `3` delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum DeliveryState {
    /// Recipient session was found but the write failed or timed out
    TransportError,
    /// No session for the recipient; the message waits in the offline queue
    RecipientOffline,
    /// Frame was handed to the recipient's transport
    Delivered,
}

impl TryFrom<u8> for DeliveryState {
    type Error = ProtocolError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(DeliveryState::TransportError),
            2 => Ok(DeliveryState::RecipientOffline),
            3 => Ok(DeliveryState::Delivered),
            other => Err(ProtocolError::UnknownDeliveryState(other)),
        }
    }
}

impl From<DeliveryState> for u8 {
    fn from(value: DeliveryState) -> Self {
        match value {
            DeliveryState::TransportError => 1,
            DeliveryState::RecipientOffline => 2,
            DeliveryState::Delivered => 3,
        }
    }
}

// ---------------------------------------------------------------------------
// Handshake
// ---------------------------------------------------------------------------

/// First frame after upgrade
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoginRequest {
    pub user_id: UserId,
    pub password: String,
}

/// Reply to a credential frame
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoginResponse {
    pub state: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub profile: Option<Profile>,
}

/// User profile as mirrored from the store
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Profile {
    pub user_id: UserId,
    pub user_name: String,
    pub user_avatar: String,
    pub user_note: String,
    pub user_permission: Permission,
    pub user_friend_list: Vec<UserId>,
}

// ---------------------------------------------------------------------------
// Messaging
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SendMessageRequest {
    pub target_id: UserId,
    /// Client correlation id, echoed in the ACK and never persisted
    pub request_id: i64,
    pub message_body: String,
    /// Client-side send time, informational only
    pub time: i64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SendGroupMessageRequest {
    pub group_id: GroupId,
    pub request_id: i64,
    pub message_body: String,
    pub time: i64,
}

/// Acknowledgment returned to the sender of a direct or group message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageAck {
    pub request_id: i64,
    pub message_id: MessageId,
    pub time: i64,
    pub state: DeliveryState,
}

/// Direct message pushed to its recipient
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserMessagePush {
    pub sender_id: UserId,
    pub message_id: MessageId,
    pub message_body: String,
    pub time: i64,
    pub message_type: MessageKind,
}

/// Group message pushed to each member
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupMessagePush {
    pub sender_id: UserId,
    pub group_id: GroupId,
    pub message_id: MessageId,
    pub message_body: String,
    pub time: i64,
    pub message_type: MessageKind,
}

/// Server notice pushed outside any conversation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemMessagePush {
    pub message_body: String,
    pub time: i64,
}

/// A persisted direct message as returned by history and offline-queue fetches
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredMessage {
    pub message_id: MessageId,
    pub sender_id: UserId,
    pub receiver_id: UserId,
    pub time: i64,
    pub message_body: String,
    pub message_type: MessageKind,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HistoryRequest {
    pub other_user_id: UserId,
    /// Inclusive lower bound, Unix milliseconds
    pub start_time: i64,
    /// Inclusive upper bound, Unix milliseconds; `0` means now
    pub end_time: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryResponse {
    pub user_id: UserId,
    pub other_user_id: UserId,
    pub messages: Vec<StoredMessage>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OfflineMessagesResponse {
    pub messages: Vec<StoredMessage>,
}

// ---------------------------------------------------------------------------
// Relationships and profile
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FriendRequest {
    pub friend_id: UserId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FriendResponse {
    pub user_id: UserId,
    pub friend_id: UserId,
    pub success: bool,
    pub friend_list: Vec<UserId>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GetUserDataRequest {
    /// Absent means the caller's own profile
    pub user_id: Option<UserId>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ChangeAvatarRequest {
    pub new_avatar: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeAvatarResponse {
    pub user_id: UserId,
    pub new_avatar: String,
    pub success: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CheckOnlineRequest {
    pub user_ids: Vec<UserId>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OnlineState {
    pub user_id: UserId,
    pub online: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckOnlineResponse {
    pub states: Vec<OnlineState>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HeartbeatResponse {
    pub time: i64,
}

// ---------------------------------------------------------------------------
// Groups
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CreateGroupRequest {
    pub group_name: String,
    pub group_description: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GroupRequest {
    pub group_id: GroupId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupResponse {
    pub group_id: GroupId,
    pub success: bool,
}

// ---------------------------------------------------------------------------
// Generic replies
// ---------------------------------------------------------------------------

/// Reply sent when a command fails
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorReply {
    pub success: bool,
    /// Short machine-readable failure kind
    pub error: String,
    pub message: String,
    /// Correlation id of the failed send, echoed so the client can match it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogoutResponse {
    pub success: bool,
}
