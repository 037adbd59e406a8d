//! Parlor chat server
//!
//! Authenticates websocket connections, keeps one live session per user, and
//! routes direct and group messages between them with persist-then-deliver
//! semantics.

pub mod config;
pub mod database;
pub mod db;
pub mod delivery;
pub mod dispatcher;
pub mod error;
pub mod fanout;
pub mod handlers;
pub mod handshake;
pub mod heartbeat;
pub mod registry;
pub mod routing;
pub mod session;
pub mod websocket;
