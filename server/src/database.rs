//! Database operations

use anyhow::{Context, Result};
use parlor_shared::payloads::StoredMessage;
use parlor_shared::{unix_millis, GroupId, MessageId, MessageKind, Permission, Profile, UserId};
use sqlx::{migrate::MigrateDatabase, sqlite::SqlitePoolOptions, Pool, Sqlite};
use tracing::{info, warn};

/// Initialize the database connection pool
pub async fn init(database_url: &str) -> Result<Pool<Sqlite>> {
    // Create database file if it doesn't exist
    if !Sqlite::database_exists(database_url).await.unwrap_or(false) {
        info!("Creating database at {}", database_url);
        Sqlite::create_database(database_url).await?;
    }

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect(database_url)
        .await?;

    run_migrations(&pool).await?;

    Ok(pool)
}

/// Open a private in-memory database with the schema applied.
///
/// Limited to one connection: every SQLite `:memory:` connection is its own
/// database.
pub async fn init_memory() -> Result<Pool<Sqlite>> {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await?;
    run_migrations(&pool).await?;
    Ok(pool)
}

/// Run database migrations
pub async fn run_migrations(pool: &Pool<Sqlite>) -> Result<()> {
    info!("Running database migrations");

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS users (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL,
            avatar TEXT NOT NULL DEFAULT '',
            note TEXT NOT NULL DEFAULT '',
            permission INTEGER NOT NULL DEFAULT 1,
            friend_list TEXT NOT NULL DEFAULT '[]',
            password_hash TEXT NOT NULL,
            password_salt BLOB NOT NULL
        );
        "#
    )
    .execute(pool)
    .await?;

    // Direct messages. `delivered` is cleared until the recipient has the
    // message, either by live push or by pulling the offline queue.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS messages (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            sender_id INTEGER NOT NULL,
            recipient_id INTEGER NOT NULL,
            body TEXT NOT NULL,
            kind INTEGER NOT NULL DEFAULT 0,
            created_at INTEGER NOT NULL,
            delivered INTEGER NOT NULL DEFAULT 0
        );
        "#
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE INDEX IF NOT EXISTS idx_messages_undelivered
        ON messages(recipient_id, delivered, id);
        "#
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE INDEX IF NOT EXISTS idx_messages_conversation
        ON messages(sender_id, recipient_id, created_at);
        "#
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS chat_groups (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL,
            description TEXT NOT NULL DEFAULT '',
            owner_id INTEGER NOT NULL,
            created_at INTEGER NOT NULL
        );
        "#
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS group_members (
            group_id INTEGER NOT NULL,
            user_id INTEGER NOT NULL,
            joined_at INTEGER NOT NULL,
            PRIMARY KEY (group_id, user_id),
            FOREIGN KEY (group_id) REFERENCES chat_groups(id) ON DELETE CASCADE
        );
        "#
    )
    .execute(pool)
    .await?;

    // One row per group send, not per member
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS group_messages (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            sender_id INTEGER NOT NULL,
            group_id INTEGER NOT NULL,
            body TEXT NOT NULL,
            kind INTEGER NOT NULL DEFAULT 0,
            created_at INTEGER NOT NULL
        );
        "#
    )
    .execute(pool)
    .await?;

    info!("Migrations completed successfully");
    Ok(())
}

// ---------------------------------------------------------------------------
// Users
// ---------------------------------------------------------------------------

/// Insert a user account. Returns the new user id.
pub async fn create_user(
    pool: &Pool<Sqlite>,
    name: &str,
    password_hash: &str,
    password_salt: &[u8],
) -> Result<UserId> {
    let result = sqlx::query(
        "INSERT INTO users (name, password_hash, password_salt) VALUES (?1, ?2, ?3)"
    )
    .bind(name)
    .bind(password_hash)
    .bind(password_salt)
    .execute(pool)
    .await?;

    Ok(result.last_insert_rowid())
}

/// Stored password hash and salt, or `None` for an unknown user.
pub async fn get_password_hash(
    pool: &Pool<Sqlite>,
    user_id: UserId,
) -> Result<Option<(String, Vec<u8>)>> {
    let row: Option<(String, Vec<u8>)> = sqlx::query_as(
        "SELECT password_hash, password_salt FROM users WHERE id = ?1"
    )
    .bind(user_id)
    .fetch_optional(pool)
    .await?;
    Ok(row)
}

fn parse_friend_list(user_id: UserId, raw: &str) -> Vec<UserId> {
    match serde_json::from_str(raw) {
        Ok(list) => list,
        Err(e) => {
            warn!("Unreadable friend list for user {}: {}", user_id, e);
            Vec::new()
        }
    }
}

/// Values that do not fit the column's ordinal range read as `Ordinary`.
fn permission_from_column(value: i64) -> Permission {
    u32::try_from(value).map(Permission::from).unwrap_or(Permission::Ordinary)
}

pub async fn get_profile(pool: &Pool<Sqlite>, user_id: UserId) -> Result<Option<Profile>> {
    let row: Option<(String, String, String, i64, String)> = sqlx::query_as(
        "SELECT name, avatar, note, permission, friend_list FROM users WHERE id = ?1"
    )
    .bind(user_id)
    .fetch_optional(pool)
    .await?;

    Ok(row.map(|(name, avatar, note, permission, friends)| Profile {
        user_id,
        user_name: name,
        user_avatar: avatar,
        user_note: note,
        user_permission: permission_from_column(permission),
        user_friend_list: parse_friend_list(user_id, &friends),
    }))
}

pub async fn update_friend_list(
    pool: &Pool<Sqlite>,
    user_id: UserId,
    friends: &[UserId],
) -> Result<()> {
    let encoded = serde_json::to_string(friends)?;
    let result = sqlx::query("UPDATE users SET friend_list = ?1 WHERE id = ?2")
        .bind(encoded)
        .bind(user_id)
        .execute(pool)
        .await?;
    if result.rows_affected() == 0 {
        anyhow::bail!("User {} does not exist", user_id);
    }
    Ok(())
}

pub async fn update_avatar(pool: &Pool<Sqlite>, user_id: UserId, avatar: &str) -> Result<()> {
    sqlx::query("UPDATE users SET avatar = ?1 WHERE id = ?2")
        .bind(avatar)
        .bind(user_id)
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn set_permission(
    pool: &Pool<Sqlite>,
    user_id: UserId,
    permission: Permission,
) -> Result<()> {
    sqlx::query("UPDATE users SET permission = ?1 WHERE id = ?2")
        .bind(i64::from(u32::from(permission)))
        .bind(user_id)
        .execute(pool)
        .await?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Direct messages
// ---------------------------------------------------------------------------

type MessageRow = (i64, i64, i64, i64, String, i64);

fn kind_from_column(value: i64) -> MessageKind {
    u8::try_from(value).map(MessageKind::from).unwrap_or(MessageKind::User)
}

fn into_stored(row: MessageRow) -> StoredMessage {
    let (id, sender, recipient, created_at, body, kind) = row;
    StoredMessage {
        message_id: id,
        sender_id: sender,
        receiver_id: recipient,
        time: created_at,
        message_body: body,
        message_type: kind_from_column(kind),
    }
}

/// Persist a direct message. Returns the assigned id and timestamp.
pub async fn store_direct_message(
    pool: &Pool<Sqlite>,
    sender_id: UserId,
    recipient_id: UserId,
    body: &str,
    kind: MessageKind,
) -> Result<(MessageId, i64)> {
    let created_at = unix_millis();
    let result = sqlx::query(
        r#"
        INSERT INTO messages (sender_id, recipient_id, body, kind, created_at)
        VALUES (?1, ?2, ?3, ?4, ?5)
        "#
    )
    .bind(sender_id)
    .bind(recipient_id)
    .bind(body)
    .bind(i64::from(u8::from(kind)))
    .bind(created_at)
    .execute(pool)
    .await?;

    Ok((result.last_insert_rowid(), created_at))
}

/// Flag one message as received by its recipient.
pub async fn mark_delivered(pool: &Pool<Sqlite>, message_id: MessageId) -> Result<()> {
    sqlx::query("UPDATE messages SET delivered = 1 WHERE id = ?1")
        .bind(message_id)
        .execute(pool)
        .await?;
    Ok(())
}

/// Undelivered messages for a recipient, oldest first.
pub async fn get_undelivered(
    pool: &Pool<Sqlite>,
    recipient_id: UserId,
    limit: i64,
) -> Result<Vec<StoredMessage>> {
    let rows = sqlx::query_as::<_, MessageRow>(
        r#"
        SELECT id, sender_id, recipient_id, created_at, body, kind
        FROM messages
        WHERE recipient_id = ?1 AND delivered = 0
        ORDER BY id ASC
        LIMIT ?2
        "#
    )
    .bind(recipient_id)
    .bind(limit)
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(into_stored).collect())
}

/// Mark every undelivered message up to and including `up_to` as delivered.
///
/// Returns the number of rows purged from the queue.
pub async fn purge_undelivered(
    pool: &Pool<Sqlite>,
    recipient_id: UserId,
    up_to: MessageId,
) -> Result<u64> {
    let result = sqlx::query(
        r#"
        UPDATE messages SET delivered = 1
        WHERE recipient_id = ?1 AND delivered = 0 AND id <= ?2
        "#
    )
    .bind(recipient_id)
    .bind(up_to)
    .execute(pool)
    .await?;

    Ok(result.rows_affected())
}

/// Both directions of a conversation within a time window, oldest first.
pub async fn get_conversation(
    pool: &Pool<Sqlite>,
    user_id: UserId,
    other_id: UserId,
    start_time: i64,
    end_time: i64,
    limit: i64,
) -> Result<Vec<StoredMessage>> {
    let rows = sqlx::query_as::<_, MessageRow>(
        r#"
        SELECT id, sender_id, recipient_id, created_at, body, kind
        FROM messages
        WHERE ((sender_id = ?1 AND recipient_id = ?2) OR (sender_id = ?2 AND recipient_id = ?1))
          AND created_at BETWEEN ?3 AND ?4
        ORDER BY id ASC
        LIMIT ?5
        "#
    )
    .bind(user_id)
    .bind(other_id)
    .bind(start_time)
    .bind(end_time)
    .bind(limit)
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(into_stored).collect())
}

// ---------------------------------------------------------------------------
// Groups
// ---------------------------------------------------------------------------

/// Create a group with its owner as the first member.
pub async fn create_group(
    pool: &Pool<Sqlite>,
    name: &str,
    description: &str,
    owner_id: UserId,
) -> Result<GroupId> {
    let now = unix_millis();
    let mut tx = pool.begin().await?;

    let result = sqlx::query(
        "INSERT INTO chat_groups (name, description, owner_id, created_at) VALUES (?1, ?2, ?3, ?4)"
    )
    .bind(name)
    .bind(description)
    .bind(owner_id)
    .bind(now)
    .execute(&mut *tx)
    .await?;
    let group_id = result.last_insert_rowid();

    sqlx::query("INSERT INTO group_members (group_id, user_id, joined_at) VALUES (?1, ?2, ?3)")
        .bind(group_id)
        .bind(owner_id)
        .bind(now)
        .execute(&mut *tx)
        .await?;

    tx.commit().await.context("Failed to commit group creation")?;
    Ok(group_id)
}

pub async fn get_group_owner(pool: &Pool<Sqlite>, group_id: GroupId) -> Result<Option<UserId>> {
    let owner: Option<i64> = sqlx::query_scalar("SELECT owner_id FROM chat_groups WHERE id = ?1")
        .bind(group_id)
        .fetch_optional(pool)
        .await?;
    Ok(owner)
}

/// Delete a group owned by `owner_id`. Returns false when no such group is
/// owned by that user.
pub async fn dissolve_group(
    pool: &Pool<Sqlite>,
    group_id: GroupId,
    owner_id: UserId,
) -> Result<bool> {
    let mut tx = pool.begin().await?;

    let result = sqlx::query("DELETE FROM chat_groups WHERE id = ?1 AND owner_id = ?2")
        .bind(group_id)
        .bind(owner_id)
        .execute(&mut *tx)
        .await?;
    if result.rows_affected() == 0 {
        return Ok(false);
    }

    sqlx::query("DELETE FROM group_members WHERE group_id = ?1")
        .bind(group_id)
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;
    Ok(true)
}

pub async fn get_group_members(pool: &Pool<Sqlite>, group_id: GroupId) -> Result<Vec<UserId>> {
    let rows: Vec<(i64,)> = sqlx::query_as(
        "SELECT user_id FROM group_members WHERE group_id = ?1 ORDER BY joined_at, user_id"
    )
    .bind(group_id)
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(|r| r.0).collect())
}

pub async fn add_group_member(
    pool: &Pool<Sqlite>,
    group_id: GroupId,
    user_id: UserId,
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO group_members (group_id, user_id, joined_at)
        VALUES (?1, ?2, ?3)
        ON CONFLICT(group_id, user_id) DO NOTHING
        "#
    )
    .bind(group_id)
    .bind(user_id)
    .bind(unix_millis())
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn remove_group_member(
    pool: &Pool<Sqlite>,
    group_id: GroupId,
    user_id: UserId,
) -> Result<()> {
    sqlx::query("DELETE FROM group_members WHERE group_id = ?1 AND user_id = ?2")
        .bind(group_id)
        .bind(user_id)
        .execute(pool)
        .await?;
    Ok(())
}

/// Persist one group send. Returns the assigned id and timestamp.
pub async fn store_group_message(
    pool: &Pool<Sqlite>,
    sender_id: UserId,
    group_id: GroupId,
    body: &str,
    kind: MessageKind,
) -> Result<(MessageId, i64)> {
    let created_at = unix_millis();
    let result = sqlx::query(
        r#"
        INSERT INTO group_messages (sender_id, group_id, body, kind, created_at)
        VALUES (?1, ?2, ?3, ?4, ?5)
        "#
    )
    .bind(sender_id)
    .bind(group_id)
    .bind(body)
    .bind(i64::from(u8::from(kind)))
    .bind(created_at)
    .execute(pool)
    .await?;

    Ok((result.last_insert_rowid(), created_at))
}
