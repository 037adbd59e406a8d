//! SQLite implementation of ChatStore
//!
//! Thin wrapper over the free functions in `database.rs`.

use super::{ChatStore, Persisted};
use crate::database;
use anyhow::Result;
use async_trait::async_trait;
use parlor_shared::payloads::StoredMessage;
use parlor_shared::{GroupId, MessageId, MessageKind, Profile, UserId};
use sqlx::{Pool, Sqlite};

pub struct SqliteStore {
    pool: Pool<Sqlite>,
}

impl SqliteStore {
    pub fn new(pool: Pool<Sqlite>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ChatStore for SqliteStore {
    async fn fetch_password_hash(&self, user_id: UserId) -> Result<Option<(String, Vec<u8>)>> {
        database::get_password_hash(&self.pool, user_id).await
    }

    async fn fetch_profile(&self, user_id: UserId) -> Result<Option<Profile>> {
        database::get_profile(&self.pool, user_id).await
    }

    async fn update_friend_list(&self, user_id: UserId, friends: &[UserId]) -> Result<()> {
        database::update_friend_list(&self.pool, user_id, friends).await
    }

    async fn update_avatar(&self, user_id: UserId, avatar: &str) -> Result<()> {
        database::update_avatar(&self.pool, user_id, avatar).await
    }

    async fn save_direct_message(
        &self, sender_id: UserId, recipient_id: UserId, body: &str, kind: MessageKind,
    ) -> Result<Persisted> {
        let (message_id, timestamp) =
            database::store_direct_message(&self.pool, sender_id, recipient_id, body, kind).await?;
        Ok(Persisted { message_id, timestamp })
    }

    async fn mark_delivered(&self, message_id: MessageId) -> Result<()> {
        database::mark_delivered(&self.pool, message_id).await
    }

    async fn fetch_undelivered_queue(&self, user_id: UserId, limit: i64) -> Result<Vec<StoredMessage>> {
        database::get_undelivered(&self.pool, user_id, limit).await
    }

    async fn purge_undelivered_queue(&self, user_id: UserId, up_to: MessageId) -> Result<u64> {
        database::purge_undelivered(&self.pool, user_id, up_to).await
    }

    async fn fetch_history(
        &self, user_id: UserId, other_id: UserId, start_time: i64, end_time: i64, limit: i64,
    ) -> Result<Vec<StoredMessage>> {
        database::get_conversation(&self.pool, user_id, other_id, start_time, end_time, limit).await
    }

    async fn save_group_message(
        &self, sender_id: UserId, group_id: GroupId, body: &str, kind: MessageKind,
    ) -> Result<Persisted> {
        let (message_id, timestamp) =
            database::store_group_message(&self.pool, sender_id, group_id, body, kind).await?;
        Ok(Persisted { message_id, timestamp })
    }

    async fn fetch_group_members(&self, group_id: GroupId) -> Result<Vec<UserId>> {
        database::get_group_members(&self.pool, group_id).await
    }

    async fn fetch_group_owner(&self, group_id: GroupId) -> Result<Option<UserId>> {
        database::get_group_owner(&self.pool, group_id).await
    }

    async fn create_group(&self, name: &str, description: &str, owner_id: UserId) -> Result<GroupId> {
        database::create_group(&self.pool, name, description, owner_id).await
    }

    async fn dissolve_group(&self, group_id: GroupId, owner_id: UserId) -> Result<bool> {
        database::dissolve_group(&self.pool, group_id, owner_id).await
    }

    async fn add_group_member(&self, group_id: GroupId, user_id: UserId) -> Result<()> {
        database::add_group_member(&self.pool, group_id, user_id).await
    }

    async fn remove_group_member(&self, group_id: GroupId, user_id: UserId) -> Result<()> {
        database::remove_group_member(&self.pool, group_id, user_id).await
    }
}
