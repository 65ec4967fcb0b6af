//! The presentation layer: data format tagging, demonstration-grade
//! encryption, and demonstration-grade compression.
//!
//! Neither transform offers real protection or real savings; both exist so
//! the layer has something visible to do to a payload in transit.

use crate::layer::{Layer, Neighbors, SharedLayer};
use crate::{Control, Message};
use serde::{Deserialize, Serialize};
use std::sync::RwLock;
use thiserror::Error as ThisError;

/// How the payload bytes should be interpreted by the application layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataFormat {
    Text = 1,
    Binary = 2,
    Json = 3,
}

impl TryFrom<u8> for DataFormat {
    type Error = PresentationError;

    fn try_from(format: u8) -> Result<Self, PresentationError> {
        Ok(match format {
            1 => DataFormat::Text,
            2 => DataFormat::Binary,
            3 => DataFormat::Json,
            format => return Err(PresentationError::InvalidDataFormat(format)),
        })
    }
}

/// The transform applied to payload bytes before transmission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum EncryptionKind {
    #[default]
    None = 0,
    /// A single-byte XOR, trivially reversible. For demonstration only.
    Xor = 1,
}

impl TryFrom<u8> for EncryptionKind {
    type Error = PresentationError;

    fn try_from(kind: u8) -> Result<Self, PresentationError> {
        Ok(match kind {
            0 => EncryptionKind::None,
            1 => EncryptionKind::Xor,
            kind => return Err(PresentationError::InvalidEncryption(kind)),
        })
    }
}

/// The size transform applied after encryption.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum CompressionKind {
    #[default]
    None = 0,
    /// Prefixes a tag and saves nothing. For demonstration only.
    Tagged = 1,
}

impl TryFrom<u8> for CompressionKind {
    type Error = PresentationError;

    fn try_from(kind: u8) -> Result<Self, PresentationError> {
        Ok(match kind {
            0 => CompressionKind::None,
            1 => CompressionKind::Tagged,
            kind => return Err(PresentationError::InvalidCompression(kind)),
        })
    }
}

const DEFAULT_ENCRYPTION_KEY: u8 = 42;
const COMPRESSION_TAG: &[u8] = b"COMPRESSED:";

/// Applies the single-byte XOR transform. Running it twice with the same key
/// restores the input.
fn xor_cipher(data: &[u8], key: u8) -> Vec<u8> {
    data.iter().map(|byte| byte ^ key).collect()
}

fn tag_compress(data: &[u8]) -> Vec<u8> {
    let mut compressed = COMPRESSION_TAG.to_vec();
    compressed.extend_from_slice(data);
    compressed
}

fn tag_decompress(data: &[u8]) -> Vec<u8> {
    match data.strip_prefix(COMPRESSION_TAG) {
        Some(stripped) => stripped.to_vec(),
        None => data.to_vec(),
    }
}

/// The wire form of a [`PresentationMessage`] with the payload carried as a
/// hex string. The key travels with the message only when a transform is in
/// effect.
#[derive(Serialize, Deserialize)]
struct PresentationRecord {
    data_format: u8,
    encryption: u8,
    compression: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    encryption_key: Option<u8>,
    payload: String,
}

/// A presentation layer message: the transformed payload plus everything the
/// receiver needs to undo the transforms.
#[derive(Debug, Clone, PartialEq)]
pub struct PresentationMessage {
    pub data_format: DataFormat,
    pub encryption: EncryptionKind,
    pub compression: CompressionKind,
    pub encryption_key: Option<u8>,
    pub payload: Message,
}

impl PresentationMessage {
    /// Serializes the message into its wire form.
    pub fn to_message(&self) -> Result<Message, PresentationError> {
        let record = PresentationRecord {
            data_format: self.data_format as u8,
            encryption: self.encryption as u8,
            compression: self.compression as u8,
            encryption_key: self.encryption_key,
            payload: hex::encode(self.payload.as_slice()),
        };
        Ok(Message::from(serde_json::to_vec(&record)?))
    }

    /// Deserializes a message from its wire form.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, PresentationError> {
        let record: PresentationRecord = serde_json::from_slice(bytes)?;
        Ok(Self {
            data_format: record.data_format.try_into()?,
            encryption: record.encryption.try_into()?,
            compression: record.compression.try_into()?,
            encryption_key: record.encryption_key,
            payload: Message::from(hex::decode(&record.payload)?),
        })
    }
}

#[derive(Debug, ThisError)]
pub enum PresentationError {
    #[error("The bytes are not a valid presentation record: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("Invalid data format: {0}")]
    InvalidDataFormat(u8),
    #[error("Invalid encryption kind: {0}")]
    InvalidEncryption(u8),
    #[error("Invalid compression kind: {0}")]
    InvalidCompression(u8),
    #[error("The payload field is not valid hex: {0}")]
    Payload(#[from] hex::FromHexError),
}

/// The presentation layer controller.
///
/// Transforms payloads on the way down (encrypt, then compress) and undoes
/// the transforms on the way up, using whatever parameters the sender
/// recorded in the message.
pub struct PresentationLayer {
    default_encryption: RwLock<EncryptionKind>,
    default_compression: RwLock<CompressionKind>,
    encryption_key: RwLock<u8>,
    neighbors: Neighbors,
}

impl PresentationLayer {
    /// Creates a presentation layer with both transforms disabled.
    pub fn new() -> Self {
        Self {
            default_encryption: RwLock::new(EncryptionKind::None),
            default_compression: RwLock::new(CompressionKind::None),
            encryption_key: RwLock::new(DEFAULT_ENCRYPTION_KEY),
            neighbors: Neighbors::new(),
        }
    }

    /// Sets the default encryption transform, and optionally the key.
    pub fn set_encryption(&self, encryption: EncryptionKind, key: Option<u8>) {
        *self.default_encryption.write().unwrap() = encryption;
        if let Some(key) = key {
            *self.encryption_key.write().unwrap() = key;
        }
    }

    /// Sets the default compression transform.
    pub fn set_compression(&self, compression: CompressionKind) {
        *self.default_compression.write().unwrap() = compression;
    }

    /// Sets the layer above this one.
    pub fn set_upper(&self, layer: SharedLayer) {
        self.neighbors.set_upper(layer);
    }

    /// Sets the layer below this one.
    pub fn set_lower(&self, layer: SharedLayer) {
        self.neighbors.set_lower(layer);
    }
}

impl Default for PresentationLayer {
    fn default() -> Self {
        Self::new()
    }
}

impl Layer for PresentationLayer {
    fn name(&self) -> &'static str {
        "Presentation"
    }

    fn send_down(&self, message: Message, control: Control) {
        let data_format = control.data_format.unwrap_or(DataFormat::Text);
        let encryption = *self.default_encryption.read().unwrap();
        let compression = *self.default_compression.read().unwrap();
        let key = *self.encryption_key.read().unwrap();

        tracing::debug!("processing {} bytes for transmission", message.len());

        let encrypted = match encryption {
            EncryptionKind::None => message.to_vec(),
            EncryptionKind::Xor => xor_cipher(message.as_slice(), key),
        };
        let compressed = match compression {
            CompressionKind::None => encrypted,
            CompressionKind::Tagged => tag_compress(&encrypted),
        };

        let presentation = PresentationMessage {
            data_format,
            encryption,
            compression,
            encryption_key: (encryption != EncryptionKind::None).then_some(key),
            payload: Message::from(compressed),
        };

        match presentation.to_message() {
            Ok(bytes) => self.neighbors.down(bytes, control),
            Err(err) => tracing::error!("failed to encode presentation message: {err}"),
        }
    }

    fn send_up(&self, message: Message, control: Control) {
        tracing::debug!("processing {} bytes of received data", message.len());

        let presentation = match PresentationMessage::from_bytes(message.as_slice()) {
            Ok(presentation) => presentation,
            Err(err) => {
                tracing::error!("error processing presentation message: {err}");
                return;
            }
        };

        let decompressed = match presentation.compression {
            CompressionKind::None => presentation.payload.to_vec(),
            CompressionKind::Tagged => tag_decompress(presentation.payload.as_slice()),
        };
        let decrypted = match presentation.encryption {
            EncryptionKind::None => decompressed,
            EncryptionKind::Xor => {
                let key = presentation
                    .encryption_key
                    .unwrap_or(*self.encryption_key.read().unwrap());
                xor_cipher(&decompressed, key)
            }
        };

        let control = control.with_data_format(presentation.data_format);
        self.neighbors.up(Message::from(decrypted), control);
    }
}
