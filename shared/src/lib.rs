//! Parlor wire protocol
//!
//! Types shared by the Parlor server and its clients: the `{command, content}`
//! envelope, per-command payloads, the frame codecs, and the salted password
//! hash used to verify credentials.

#![warn(unsafe_code)]

pub mod envelope;
pub mod error;
pub mod password;
pub mod payloads;

pub use envelope::{Codec, Envelope, Frame};
pub use error::ProtocolError;
pub use password::{generate_salt, hash_password, verify_password, SALT_LENGTH};
pub use payloads::{
    DeliveryState, GroupId, MessageAck, MessageId, MessageKind, Permission, Profile, UserId,
};

/// Version of the wire protocol
pub const PROTOCOL_VERSION: u8 = 1;

/// Current time as Unix milliseconds.
pub fn unix_millis() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}
