//! The transport layer segment and its wire codec.

use crate::Message;
use serde::{Deserialize, Serialize};
use thiserror::Error as ThisError;

/// The wire form of a [`Segment`] with the payload carried as a hex string.
#[derive(Serialize, Deserialize)]
struct SegmentRecord {
    src_port: u16,
    dst_port: u16,
    seq_num: u32,
    ack_num: u32,
    flags: u8,
    window: u16,
    payload: String,
}

/// A transport layer segment.
///
/// Carries port addressing, sequencing information, control flags, and
/// payload data for one hop of a connection.
#[derive(Debug, Clone, PartialEq)]
pub struct Segment {
    pub src_port: u16,
    pub dst_port: u16,
    pub seq_num: u32,
    pub ack_num: u32,
    pub flags: u8,
    pub window: u16,
    pub payload: Message,
}

impl Segment {
    /// The flag bit requesting connection setup.
    pub const SYN: u8 = 0x02;
    /// The flag bit acknowledging received data.
    pub const ACK: u8 = 0x10;
    /// The flag bit requesting connection teardown.
    pub const FIN: u8 = 0x01;

    pub fn new(
        src_port: u16,
        dst_port: u16,
        seq_num: u32,
        ack_num: u32,
        flags: u8,
        window: u16,
        payload: Message,
    ) -> Self {
        Self {
            src_port,
            dst_port,
            seq_num,
            ack_num,
            flags,
            window,
            payload,
        }
    }

    /// Serializes the segment into its wire form.
    pub fn to_message(&self) -> Result<Message, SegmentError> {
        let record = SegmentRecord {
            src_port: self.src_port,
            dst_port: self.dst_port,
            seq_num: self.seq_num,
            ack_num: self.ack_num,
            flags: self.flags,
            window: self.window,
            payload: hex::encode(self.payload.as_slice()),
        };
        Ok(Message::from(serde_json::to_vec(&record)?))
    }

    /// Deserializes a segment from its wire form.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, SegmentError> {
        let record: SegmentRecord = serde_json::from_slice(bytes)?;
        Ok(Self {
            src_port: record.src_port,
            dst_port: record.dst_port,
            seq_num: record.seq_num,
            ack_num: record.ack_num,
            flags: record.flags,
            window: record.window,
            payload: Message::from(hex::decode(&record.payload)?),
        })
    }

    /// Whether the SYN flag is set.
    pub fn is_syn(&self) -> bool {
        self.flags & Self::SYN != 0
    }

    /// Whether the ACK flag is set.
    pub fn is_ack(&self) -> bool {
        self.flags & Self::ACK != 0
    }

    /// Whether the FIN flag is set.
    pub fn is_fin(&self) -> bool {
        self.flags & Self::FIN != 0
    }
}

#[derive(Debug, ThisError)]
pub enum SegmentError {
    #[error("The bytes are not a valid segment record: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("The payload field is not valid hex: {0}")]
    Payload(#[from] hex::FromHexError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips() -> anyhow::Result<()> {
        let segment = Segment::new(
            49152,
            12345,
            1000,
            2000,
            Segment::SYN | Segment::ACK,
            65535,
            Message::new(b"hello"),
        );
        let decoded = Segment::from_bytes(segment.to_message()?.as_slice())?;
        assert_eq!(decoded, segment);
        Ok(())
    }

    #[test]
    fn flag_predicates() {
        let syn = Segment::new(1, 2, 0, 0, Segment::SYN, 0, Message::default());
        assert!(syn.is_syn());
        assert!(!syn.is_ack());
        assert!(!syn.is_fin());

        let fin_ack = Segment::new(1, 2, 0, 0, Segment::FIN | Segment::ACK, 0, Message::default());
        assert!(fin_ack.is_fin());
        assert!(fin_ack.is_ack());
        assert!(!fin_ack.is_syn());
    }

    #[test]
    fn rejects_garbage_bytes() {
        assert!(Segment::from_bytes(b"{}").is_err());
        assert!(Segment::from_bytes(b"not a record").is_err());
    }
}
