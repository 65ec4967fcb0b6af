//! The data link layer: framing, hardware addressing, and error detection.

use crate::layer::{Layer, Neighbors, SharedLayer};
use crate::utility::Checksum;
use crate::{Control, Message};
use serde::{Deserialize, Serialize};
use std::sync::RwLock;
use thiserror::Error as ThisError;

pub mod mac_address;
pub use mac_address::{MacAddress, MacAddressError};

/// The wire form of a [`Frame`] with addresses in colon-separated hex and the
/// payload carried as a hex string.
#[derive(Serialize, Deserialize)]
struct FrameRecord {
    src_mac: String,
    dst_mac: String,
    checksum: u16,
    payload: String,
}

/// A data link layer frame.
///
/// Carries source and destination hardware addresses, the payload, and a
/// checksum over the payload for error detection.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub src_mac: MacAddress,
    pub dst_mac: MacAddress,
    pub checksum: u16,
    pub payload: Message,
}

impl Frame {
    /// Creates a frame, computing the payload checksum.
    pub fn new(src_mac: MacAddress, dst_mac: MacAddress, payload: Message) -> Self {
        let checksum = payload_checksum(&payload);
        Self {
            src_mac,
            dst_mac,
            checksum,
            payload,
        }
    }

    /// Serializes the frame into its wire form.
    pub fn to_message(&self) -> Result<Message, FrameError> {
        let record = FrameRecord {
            src_mac: self.src_mac.to_string(),
            dst_mac: self.dst_mac.to_string(),
            checksum: self.checksum,
            payload: hex::encode(self.payload.as_slice()),
        };
        Ok(Message::from(serde_json::to_vec(&record)?))
    }

    /// Deserializes a frame from its wire form, keeping the checksum the
    /// sender computed.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, FrameError> {
        let record: FrameRecord = serde_json::from_slice(bytes)?;
        Ok(Self {
            src_mac: record.src_mac.parse()?,
            dst_mac: record.dst_mac.parse()?,
            checksum: record.checksum,
            payload: Message::from(hex::decode(&record.payload)?),
        })
    }

    /// Whether the frame's checksum matches its payload.
    pub fn is_valid(&self) -> bool {
        payload_checksum(&self.payload) == self.checksum
    }
}

fn payload_checksum(payload: &Message) -> u16 {
    let mut checksum = Checksum::new();
    checksum.accumulate_remainder(payload.iter());
    checksum.as_u16()
}

#[derive(Debug, ThisError)]
pub enum FrameError {
    #[error("The bytes are not a valid frame record: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("{0}")]
    Address(#[from] MacAddressError),
    #[error("The payload field is not valid hex: {0}")]
    Payload(#[from] hex::FromHexError),
}

/// The data link layer controller.
///
/// Frames packets with hardware addresses on the way down and verifies frame
/// integrity on the way up. There is no address resolution in the
/// simulation: a node that does not yet know its peer generates a
/// destination address and learns the real one from the first frame it
/// receives.
pub struct DataLinkLayer {
    mac_address: MacAddress,
    destination_mac: RwLock<Option<MacAddress>>,
    neighbors: Neighbors,
}

impl DataLinkLayer {
    /// Creates a data link layer with a randomly generated hardware address.
    pub fn new() -> Self {
        Self::with_address(MacAddress::random())
    }

    /// Creates a data link layer with the given hardware address.
    pub fn with_address(mac_address: MacAddress) -> Self {
        Self {
            mac_address,
            destination_mac: RwLock::new(None),
            neighbors: Neighbors::new(),
        }
    }

    /// The local hardware address.
    pub fn mac_address(&self) -> MacAddress {
        self.mac_address
    }

    /// Sets the destination hardware address.
    pub fn set_destination_mac(&self, mac_address: MacAddress) {
        *self.destination_mac.write().unwrap() = Some(mac_address);
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

impl Default for DataLinkLayer {
    fn default() -> Self {
        Self::new()
    }
}

impl Layer for DataLinkLayer {
    fn name(&self) -> &'static str {
        "Data Link"
    }

    fn send_down(&self, message: Message, control: Control) {
        let known = *self.destination_mac.read().unwrap();
        let dst_mac = match known {
            Some(dst_mac) => dst_mac,
            None => {
                // No address resolution here; make one up and learn the real
                // peer address from its first frame
                let generated = MacAddress::random();
                tracing::info!("no destination MAC known, using generated: {generated}");
                *self.destination_mac.write().unwrap() = Some(generated);
                generated
            }
        };

        tracing::info!("creating frame: {} -> {dst_mac}", self.mac_address);
        let frame = Frame::new(self.mac_address, dst_mac, message);
        match frame.to_message() {
            Ok(bytes) => {
                tracing::debug!("frame created, size: {} bytes", bytes.len());
                self.neighbors.down(bytes, control);
            }
            Err(err) => tracing::error!("failed to encode frame: {err}"),
        }
    }

    fn send_up(&self, message: Message, control: Control) {
        tracing::debug!("received frame, size: {} bytes", message.len());

        let frame = match Frame::from_bytes(message.as_slice()) {
            Ok(frame) => frame,
            Err(err) => {
                tracing::error!("error processing frame: {err}");
                return;
            }
        };
        tracing::debug!("frame: {} -> {}", frame.src_mac, frame.dst_mac);

        if !frame.is_valid() {
            tracing::error!("invalid frame checksum, discarding");
            return;
        }

        // Generated destination addresses rarely match the real peer, so
        // frames are accepted regardless of addressing to keep the
        // simulation flowing
        if frame.dst_mac != self.mac_address && frame.dst_mac != MacAddress::BROADCAST {
            tracing::info!(
                "frame not addressed to us ({}), accepting for simulation",
                self.mac_address
            );
        }

        // Remember the peer for future responses
        {
            let mut destination_mac = self.destination_mac.write().unwrap();
            if destination_mac.is_none() {
                *destination_mac = Some(frame.src_mac);
                tracing::info!("setting destination MAC to {}", frame.src_mac);
            }
        }

        let control = control.with_src_mac(frame.src_mac);
        self.neighbors.up(frame.payload, control);
    }
}
