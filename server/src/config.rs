//! Server configuration

use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::HashSet;
use std::env;
use std::str::FromStr;
use std::time::Duration;

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Host to bind to
    pub host: String,
    /// Port to listen on
    pub port: u16,
    /// Database URL
    pub database_url: String,
    /// Route the websocket upgrade is mounted at
    pub ws_route: String,
    /// Seconds without any inbound frame before a session is considered dead
    pub heartbeat_timeout_secs: u64,
    /// WebSocket ping interval in seconds (0 = no server pings)
    pub ws_ping_interval: u64,
    /// Read/write buffer size in bytes, also the maximum frame size
    pub ws_buffer_size: usize,
    /// Capacity of each session's outbound frame queue
    pub outbound_queue: usize,
    /// Upper bound on a single write to a peer's transport, in milliseconds
    pub write_timeout_ms: u64,
    /// Seconds to wait for a successful login before dropping the connection
    pub auth_timeout_seconds: u64,
    /// Failed credential frames allowed before the connection is dropped
    pub max_auth_attempts: u32,
    /// Maximum message body size in bytes
    pub max_message_size: usize,
    /// Maximum total WebSocket connections (0 = unlimited)
    pub max_connections: usize,
    /// Maximum WebSocket connections per IP address (0 = unlimited)
    pub max_connections_per_ip: usize,
    /// Comma-separated list of allowed CORS origins (empty = permissive)
    pub cors_origins: Option<String>,
    /// Bearer token for /admin/* endpoints (None = endpoints hidden)
    pub admin_token: Option<String>,
    /// Maximum rows returned by one history fetch
    pub history_limit: i64,
    /// Command token strings
    pub commands: CommandTokens,
}

/// Token string of every inbound command.
///
/// Loaded from the JSON file named by `PARLOR_COMMAND_MAP`; any command not
/// listed keeps its default token.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CommandTokens {
    pub login: String,
    pub send_user_message: String,
    pub send_group_message: String,
    pub add_friend: String,
    pub delete_friend: String,
    pub create_group: String,
    pub break_group: String,
    pub join_group: String,
    pub leave_group: String,
    pub get_user_data: String,
    pub get_messages_with_user: String,
    pub get_offline_message: String,
    pub change_avatar: String,
    pub heartbeat: String,
    pub check_online_state: String,
    pub logout: String,
}

impl Default for CommandTokens {
    fn default() -> Self {
        Self {
            login: "login".into(),
            send_user_message: "sendUserMessage".into(),
            send_group_message: "sendGroupMessage".into(),
            add_friend: "addFriend".into(),
            delete_friend: "deleteFriend".into(),
            create_group: "createGroup".into(),
            break_group: "breakGroup".into(),
            join_group: "joinGroup".into(),
            leave_group: "leaveGroup".into(),
            get_user_data: "getUserData".into(),
            get_messages_with_user: "getMessagesWithUser".into(),
            get_offline_message: "getOfflineMessage".into(),
            change_avatar: "changeAvatar".into(),
            heartbeat: "heartbeat".into(),
            check_online_state: "checkOnlineState".into(),
            logout: "logout".into(),
        }
    }
}

impl CommandTokens {
    /// Parse a command map from JSON text.
    pub fn from_json(text: &str) -> Result<Self> {
        let tokens: CommandTokens =
            serde_json::from_str(text).context("Invalid command map JSON")?;
        tokens.validate()?;
        Ok(tokens)
    }

    /// All tokens in declaration order.
    pub fn all(&self) -> [&str; 16] {
        [
            &self.login,
            &self.send_user_message,
            &self.send_group_message,
            &self.add_friend,
            &self.delete_friend,
            &self.create_group,
            &self.break_group,
            &self.join_group,
            &self.leave_group,
            &self.get_user_data,
            &self.get_messages_with_user,
            &self.get_offline_message,
            &self.change_avatar,
            &self.heartbeat,
            &self.check_online_state,
            &self.logout,
        ]
    }

    /// Reject empty or duplicated tokens.
    pub fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for token in self.all() {
            if token.is_empty() {
                anyhow::bail!("Command tokens must not be empty");
            }
            if !seen.insert(token) {
                anyhow::bail!("Command token '{}' is mapped to more than one command", token);
            }
        }
        Ok(())
    }
}

fn var_or<T>(name: &str, default: &str) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    env::var(name)
        .unwrap_or_else(|_| default.to_string())
        .parse()
        .with_context(|| format!("Invalid {}", name))
}

impl ServerConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let commands = match env::var("PARLOR_COMMAND_MAP") {
            Ok(path) => {
                let text = std::fs::read_to_string(&path)
                    .with_context(|| format!("Failed to read command map {}", path))?;
                CommandTokens::from_json(&text)?
            }
            Err(_) => CommandTokens::default(),
        };

        let config = ServerConfig {
            host: env::var("PARLOR_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: var_or("PARLOR_PORT", "8080")?,
            database_url: env::var("PARLOR_DATABASE_URL")
                .unwrap_or_else(|_| "sqlite://./data/parlor.db".to_string()),
            ws_route: env::var("PARLOR_WS_ROUTE").unwrap_or_else(|_| "/ws".to_string()),
            heartbeat_timeout_secs: var_or("PARLOR_HEARTBEAT_TIMEOUT", "90")?,
            ws_ping_interval: var_or("PARLOR_WS_PING_INTERVAL", "30")?,
            ws_buffer_size: var_or("PARLOR_WS_BUFFER_SIZE", "65536")?,
            outbound_queue: var_or("PARLOR_OUTBOUND_QUEUE", "64")?,
            write_timeout_ms: var_or("PARLOR_WRITE_TIMEOUT_MS", "2000")?,
            auth_timeout_seconds: var_or("PARLOR_AUTH_TIMEOUT", "30")?,
            max_auth_attempts: var_or("PARLOR_MAX_AUTH_ATTEMPTS", "5")?,
            max_message_size: var_or("PARLOR_MAX_MESSAGE_SIZE", "65536")?,
            max_connections: var_or("PARLOR_MAX_CONNECTIONS", "2000")?,
            max_connections_per_ip: var_or("PARLOR_MAX_CONNECTIONS_PER_IP", "20")?,
            cors_origins: env::var("PARLOR_CORS_ORIGINS").ok(),
            admin_token: env::var("PARLOR_ADMIN_TOKEN").ok(),
            history_limit: var_or("PARLOR_HISTORY_LIMIT", "500")?,
            commands,
        };

        if !config.ws_route.starts_with('/') {
            anyhow::bail!("PARLOR_WS_ROUTE must start with '/'");
        }
        if config.heartbeat_timeout_secs == 0 {
            anyhow::bail!("PARLOR_HEARTBEAT_TIMEOUT must be greater than zero");
        }
        if config.outbound_queue == 0 {
            anyhow::bail!("PARLOR_OUTBOUND_QUEUE must be greater than zero");
        }

        Ok(config)
    }

    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_secs(self.heartbeat_timeout_secs)
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }

    pub fn auth_timeout(&self) -> Duration {
        Duration::from_secs(self.auth_timeout_seconds)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
            database_url: "sqlite::memory:".to_string(),
            ws_route: "/ws".to_string(),
            heartbeat_timeout_secs: 90,
            ws_ping_interval: 30,
            ws_buffer_size: 65536,
            outbound_queue: 64,
            write_timeout_ms: 2000,
            auth_timeout_seconds: 30,
            max_auth_attempts: 5,
            max_message_size: 65536,
            max_connections: 2000,
            max_connections_per_ip: 20,
            cors_origins: None,
            admin_token: None,
            history_limit: 500,
            commands: CommandTokens::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_command_map_keeps_defaults() {
        let tokens = CommandTokens::from_json(r#"{"sendUserMessage": "dm", "logout": "bye"}"#)
            .unwrap();
        assert_eq!(tokens.send_user_message, "dm");
        assert_eq!(tokens.logout, "bye");
        assert_eq!(tokens.heartbeat, "heartbeat");
    }

    #[test]
    fn test_duplicate_tokens_rejected() {
        let err = CommandTokens::from_json(r#"{"addFriend": "x", "deleteFriend": "x"}"#)
            .unwrap_err();
        assert!(err.to_string().contains("more than one command"));
    }

    #[test]
    fn test_empty_token_rejected() {
        assert!(CommandTokens::from_json(r#"{"heartbeat": ""}"#).is_err());
    }

    #[test]
    fn test_defaults_are_valid() {
        CommandTokens::default().validate().unwrap();
    }
}
