//! The `{command, content}` wrapper carried by every frame, and the two
//! frame codecs a connection can speak.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{ProtocolError, Result};

/// Wire envelope around every inbound and outbound frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Command token
    pub command: String,
    /// Command-specific payload
    #[serde(default)]
    pub content: serde_json::Value,
}

impl Envelope {
    /// Wrap a serializable payload under a command token.
    pub fn new<T: Serialize>(command: impl Into<String>, content: &T) -> Result<Self> {
        let content = serde_json::to_value(content)
            .map_err(|e| ProtocolError::EncodingError(e.to_string()))?;
        Ok(Self {
            command: command.into(),
            content,
        })
    }

    /// Decode the content into a typed payload.
    pub fn payload<T: DeserializeOwned>(&self) -> Result<T> {
        // A missing content field is treated as an empty object so that
        // payloads whose fields are all defaulted still decode.
        let value = if self.content.is_null() {
            serde_json::Value::Object(serde_json::Map::new())
        } else {
            self.content.clone()
        };
        serde_json::from_value(value).map_err(|e| ProtocolError::InvalidPayload {
            command: self.command.clone(),
            reason: e.to_string(),
        })
    }
}

/// Frame encoding used on a connection.
///
/// JSON travels in text frames, MessagePack in binary frames. A connection's
/// codec is fixed by its first credential frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Codec {
    /// UTF-8 JSON in text frames
    #[default]
    Json,
    /// Named-field MessagePack in binary frames
    MessagePack,
}

/// An encoded frame ready to hand to the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// Text frame
    Text(String),
    /// Binary frame
    Binary(Vec<u8>),
}

impl Codec {
    /// Encode any serializable value.
    pub fn encode<T: Serialize>(self, value: &T) -> Result<Frame> {
        match self {
            Codec::Json => serde_json::to_string(value)
                .map(Frame::Text)
                .map_err(|e| ProtocolError::EncodingError(e.to_string())),
            Codec::MessagePack => rmp_serde::to_vec_named(value)
                .map(Frame::Binary)
                .map_err(|e| ProtocolError::EncodingError(e.to_string())),
        }
    }

    /// Decode a value from a text frame.
    pub fn decode_text<T: DeserializeOwned>(text: &str) -> Result<T> {
        serde_json::from_str(text).map_err(|e| ProtocolError::MalformedFrame(e.to_string()))
    }

    /// Decode a value from a binary frame.
    pub fn decode_binary<T: DeserializeOwned>(data: &[u8]) -> Result<T> {
        rmp_serde::from_slice(data).map_err(|e| ProtocolError::MalformedFrame(e.to_string()))
    }

    /// Decode a frame, reporting which codec it was written in.
    pub fn decode<T: DeserializeOwned>(frame: &Frame) -> Result<(T, Codec)> {
        match frame {
            Frame::Text(text) => Self::decode_text(text).map(|v| (v, Codec::Json)),
            Frame::Binary(data) => Self::decode_binary(data).map(|v| (v, Codec::MessagePack)),
        }
    }
}
