//! The session control message and its wire codec.

use super::session_state::SessionId;
use crate::Message;
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error as ThisError;

/// An enumeration of the control messages the session layer exchanges.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionMessageKind {
    Connect = 0,
    ConnectAck = 1,
    Data = 2,
    Disconnect = 3,
    DisconnectAck = 4,
    Keepalive = 5,
}

impl TryFrom<u8> for SessionMessageKind {
    type Error = ParseError;

    fn try_from(kind: u8) -> Result<Self, ParseError> {
        Ok(match kind {
            0 => SessionMessageKind::Connect,
            1 => SessionMessageKind::ConnectAck,
            2 => SessionMessageKind::Data,
            3 => SessionMessageKind::Disconnect,
            4 => SessionMessageKind::DisconnectAck,
            5 => SessionMessageKind::Keepalive,
            kind => return Err(ParseError::InvalidKind(kind)),
        })
    }
}

/// The wire form of a [`SessionMessage`]: a structured-text record with the
/// timestamp and payload carried as hex strings.
#[derive(Serialize, Deserialize)]
struct SessionRecord {
    kind: u8,
    session_id: String,
    timestamp: String,
    payload: String,
}

/// A session layer message.
///
/// Carries session control information and, for [`Data`] messages, the upper
/// layer's payload. Once serialized, a message is self-describing: kind,
/// session id, payload, and timestamp are all recoverable from the bytes
/// without external context.
///
/// [`Data`]: SessionMessageKind::Data
#[derive(Debug, Clone, PartialEq)]
pub struct SessionMessage {
    /// The control-plane tag determining how the message is dispatched.
    pub kind: SessionMessageKind,
    /// The session the message belongs to.
    pub session_id: SessionId,
    /// The payload, empty for control-only message kinds.
    pub payload: Message,
    /// Creation time as milliseconds of wall clock, carried through
    /// serialization and restored on decode.
    pub timestamp: u64,
}

impl SessionMessage {
    /// Creates a control message with no payload, stamped with the current
    /// time.
    pub fn new(kind: SessionMessageKind, session_id: SessionId) -> Self {
        Self::with_payload(kind, session_id, Message::default())
    }

    /// Creates a message carrying a payload, stamped with the current time.
    pub fn with_payload(kind: SessionMessageKind, session_id: SessionId, payload: Message) -> Self {
        Self {
            kind,
            session_id,
            payload,
            timestamp: now_millis(),
        }
    }

    /// Serializes the message into its wire form.
    pub fn to_message(&self) -> Result<Message, ParseError> {
        let record = SessionRecord {
            kind: self.kind as u8,
            session_id: self.session_id.to_string(),
            timestamp: format!("{:x}", self.timestamp),
            payload: hex::encode(self.payload.as_slice()),
        };
        Ok(Message::from(serde_json::to_vec(&record)?))
    }

    /// Deserializes a message from its wire form, restoring the original
    /// timestamp rather than assigning a new one.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ParseError> {
        let record: SessionRecord = serde_json::from_slice(bytes)?;
        let kind = SessionMessageKind::try_from(record.kind)?;
        let timestamp = u64::from_str_radix(&record.timestamp, 16)
            .map_err(|_| ParseError::InvalidTimestamp(record.timestamp.clone()))?;
        Ok(Self {
            kind,
            session_id: record.session_id.into(),
            payload: Message::from(hex::decode(&record.payload)?),
            timestamp,
        })
    }

    /// Whether this is a CONNECT message.
    pub fn is_connect(&self) -> bool {
        self.kind == SessionMessageKind::Connect
    }

    /// Whether this is a CONNECT_ACK message.
    pub fn is_connect_ack(&self) -> bool {
        self.kind == SessionMessageKind::ConnectAck
    }

    /// Whether this is a DATA message.
    pub fn is_data(&self) -> bool {
        self.kind == SessionMessageKind::Data
    }

    /// Whether this is a DISCONNECT message.
    pub fn is_disconnect(&self) -> bool {
        self.kind == SessionMessageKind::Disconnect
    }

    /// Whether this is a DISCONNECT_ACK message.
    pub fn is_disconnect_ack(&self) -> bool {
        self.kind == SessionMessageKind::DisconnectAck
    }

    /// Whether this is a KEEPALIVE message.
    pub fn is_keepalive(&self) -> bool {
        self.kind == SessionMessageKind::Keepalive
    }
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as u64)
        .unwrap_or_default()
}

#[derive(Debug, ThisError)]
pub enum ParseError {
    #[error("The bytes are not a valid session record: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("Invalid session message kind: {0}")]
    InvalidKind(u8),
    #[error("The timestamp field is not a hex number: {0}")]
    InvalidTimestamp(String),
    #[error("The payload field is not valid hex: {0}")]
    InvalidPayload(#[from] hex::FromHexError),
}
