//! Persistence contract
//!
//! The real-time core only talks to storage through `ChatStore`. The SQLite
//! implementation lives in `sqlite`; tests wrap it to inject failures.

pub mod sqlite;

use anyhow::Result;
use async_trait::async_trait;
use parlor_shared::payloads::StoredMessage;
use parlor_shared::{GroupId, MessageId, MessageKind, Profile, UserId};

/// Identifier and timestamp assigned to a message when it is persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Persisted {
    pub message_id: MessageId,
    /// Unix milliseconds
    pub timestamp: i64,
}

/// Storage operations the session and delivery subsystem depends on.
///
/// Implementations must be safe for concurrent use by every connection
/// worker; callers add no locking of their own.
#[async_trait]
pub trait ChatStore: Send + Sync + 'static {
    // ── Credentials and profile ──────────────────────────────────────────
    /// `(hash, salt)` for a user, `None` if the user does not exist.
    async fn fetch_password_hash(&self, user_id: UserId) -> Result<Option<(String, Vec<u8>)>>;
    async fn fetch_profile(&self, user_id: UserId) -> Result<Option<Profile>>;
    async fn update_friend_list(&self, user_id: UserId, friends: &[UserId]) -> Result<()>;
    async fn update_avatar(&self, user_id: UserId, avatar: &str) -> Result<()>;

    // ── Direct messages ──────────────────────────────────────────────────
    async fn save_direct_message(
        &self, sender_id: UserId, recipient_id: UserId, body: &str, kind: MessageKind,
    ) -> Result<Persisted>;
    async fn mark_delivered(&self, message_id: MessageId) -> Result<()>;
    async fn fetch_undelivered_queue(&self, user_id: UserId, limit: i64) -> Result<Vec<StoredMessage>>;
    /// Purge the queue up to and including `up_to`; later arrivals stay queued.
    async fn purge_undelivered_queue(&self, user_id: UserId, up_to: MessageId) -> Result<u64>;
    async fn fetch_history(
        &self, user_id: UserId, other_id: UserId, start_time: i64, end_time: i64, limit: i64,
    ) -> Result<Vec<StoredMessage>>;

    // ── Groups ───────────────────────────────────────────────────────────
    async fn save_group_message(
        &self, sender_id: UserId, group_id: GroupId, body: &str, kind: MessageKind,
    ) -> Result<Persisted>;
    async fn fetch_group_members(&self, group_id: GroupId) -> Result<Vec<UserId>>;
    async fn fetch_group_owner(&self, group_id: GroupId) -> Result<Option<UserId>>;
    async fn create_group(&self, name: &str, description: &str, owner_id: UserId) -> Result<GroupId>;
    /// `false` when the group does not exist or is not owned by `owner_id`.
    async fn dissolve_group(&self, group_id: GroupId, owner_id: UserId) -> Result<bool>;
    async fn add_group_member(&self, group_id: GroupId, user_id: UserId) -> Result<()>;
    async fn remove_group_member(&self, group_id: GroupId, user_id: UserId) -> Result<()>;
}
