//! The network layer: logical addressing, packets, and routing.

use crate::layer::{Layer, Neighbors, SharedLayer};
use crate::{Control, Message};
use serde::{Deserialize, Serialize};
use std::sync::RwLock;
use thiserror::Error as ThisError;

pub mod ipv4_address;
pub use ipv4_address::{AddressError, Ipv4Address};

/// Protocol numbers carried in the packet header.
pub struct ProtocolNumber;

impl ProtocolNumber {
    pub const TCP: u8 = 6;
    pub const UDP: u8 = 17;
}

/// The starting time-to-live for outgoing packets.
const DEFAULT_TTL: u8 = 64;

/// The wire form of a [`Packet`] with addresses as dotted quads and the
/// payload carried as a hex string.
#[derive(Serialize, Deserialize)]
struct PacketRecord {
    src_ip: String,
    dst_ip: String,
    ttl: u8,
    protocol: u8,
    payload: String,
}

/// A network layer packet.
#[derive(Debug, Clone, PartialEq)]
pub struct Packet {
    pub src_ip: Ipv4Address,
    pub dst_ip: Ipv4Address,
    pub ttl: u8,
    pub protocol: u8,
    pub payload: Message,
}

impl Packet {
    pub fn new(src_ip: Ipv4Address, dst_ip: Ipv4Address, protocol: u8, payload: Message) -> Self {
        Self {
            src_ip,
            dst_ip,
            ttl: DEFAULT_TTL,
            protocol,
            payload,
        }
    }

    /// Serializes the packet into its wire form.
    pub fn to_message(&self) -> Result<Message, PacketError> {
        let record = PacketRecord {
            src_ip: self.src_ip.to_string(),
            dst_ip: self.dst_ip.to_string(),
            ttl: self.ttl,
            protocol: self.protocol,
            payload: hex::encode(self.payload.as_slice()),
        };
        Ok(Message::from(serde_json::to_vec(&record)?))
    }

    /// Deserializes a packet from its wire form.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, PacketError> {
        let record: PacketRecord = serde_json::from_slice(bytes)?;
        Ok(Self {
            src_ip: record.src_ip.parse()?,
            dst_ip: record.dst_ip.parse()?,
            ttl: record.ttl,
            protocol: record.protocol,
            payload: Message::from(hex::decode(&record.payload)?),
        })
    }
}

#[derive(Debug, ThisError)]
pub enum PacketError {
    #[error("The bytes are not a valid packet record: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("{0}")]
    Address(#[from] AddressError),
    #[error("The payload field is not valid hex: {0}")]
    Payload(#[from] hex::FromHexError),
}

/// One entry in a [`RoutingTable`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    pub network: Ipv4Address,
    pub netmask: Ipv4Address,
    pub gateway: Ipv4Address,
    pub interface: String,
}

/// A simple routing table for the network layer.
#[derive(Debug, Clone, Default)]
pub struct RoutingTable {
    routes: Vec<Route>,
}

impl RoutingTable {
    pub fn new() -> Self {
        Default::default()
    }

    /// Adds a route to the table.
    pub fn add_route(&mut self, route: Route) {
        self.routes.push(route);
    }

    /// Gets the route for a destination address.
    ///
    /// The simulation keeps a single default entry, so the lookup returns the
    /// first route rather than matching against network and netmask.
    pub fn route_for(&self, _dst_ip: Ipv4Address) -> Option<&Route> {
        self.routes.first()
    }
}

/// The network layer controller.
///
/// Wraps transport segments in addressed packets, consults the routing table
/// on the way down, and filters inbound packets on the way up.
pub struct NetworkLayer {
    ip_address: Ipv4Address,
    routing_table: RwLock<RoutingTable>,
    destination_ip: RwLock<Option<Ipv4Address>>,
    neighbors: Neighbors,
}

impl NetworkLayer {
    /// Creates a network layer with a randomly generated local address and a
    /// default route.
    pub fn new() -> Self {
        Self::with_address(Ipv4Address::random())
    }

    /// Creates a network layer with the given local address.
    pub fn with_address(ip_address: Ipv4Address) -> Self {
        let mut routing_table = RoutingTable::new();
        routing_table.add_route(Route {
            network: Ipv4Address::CURRENT_NETWORK,
            netmask: Ipv4Address::CURRENT_NETWORK,
            gateway: Ipv4Address::new([192, 168, 1, 1]),
            interface: "eth0".to_string(),
        });
        Self {
            ip_address,
            routing_table: RwLock::new(routing_table),
            destination_ip: RwLock::new(None),
            neighbors: Neighbors::new(),
        }
    }

    /// The local logical address.
    pub fn ip_address(&self) -> Ipv4Address {
        self.ip_address
    }

    /// Sets the default destination address.
    pub fn set_destination_ip(&self, ip_address: Ipv4Address) {
        *self.destination_ip.write().unwrap() = Some(ip_address);
    }

    /// Adds a route to the routing table.
    pub fn add_route(&self, route: Route) {
        self.routing_table.write().unwrap().add_route(route);
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

impl Default for NetworkLayer {
    fn default() -> Self {
        Self::new()
    }
}

impl Layer for NetworkLayer {
    fn name(&self) -> &'static str {
        "Network"
    }

    fn send_down(&self, message: Message, control: Control) {
        let dst_ip = control
            .remote_ip
            .or(*self.destination_ip.read().unwrap())
            .unwrap_or_else(|| {
                let generated = Ipv4Address::random();
                tracing::info!("no destination address provided, using generated: {generated}");
                generated
            });
        let protocol = control.protocol.unwrap_or(ProtocolNumber::TCP);

        tracing::info!("creating packet: {} -> {dst_ip}", self.ip_address);
        let packet = Packet::new(self.ip_address, dst_ip, protocol, message);

        if self.routing_table.read().unwrap().route_for(dst_ip).is_none() {
            tracing::error!("no route to {dst_ip}, discarding");
            return;
        }

        match packet.to_message() {
            Ok(bytes) => self.neighbors.down(bytes, control),
            Err(err) => tracing::error!("failed to encode packet: {err}"),
        }
    }

    fn send_up(&self, message: Message, control: Control) {
        tracing::debug!("received packet, size: {} bytes", message.len());

        let packet = match Packet::from_bytes(message.as_slice()) {
            Ok(packet) => packet,
            Err(err) => {
                tracing::error!("error processing packet: {err}");
                return;
            }
        };
        tracing::debug!(
            "packet: {} -> {} (TTL: {}, protocol: {})",
            packet.src_ip,
            packet.dst_ip,
            packet.ttl,
            packet.protocol
        );

        // Nodes draw generated addresses their peers cannot know ahead of
        // time, so packets addressed elsewhere are still accepted to keep the
        // simulation flowing. A router would forward these instead.
        if packet.dst_ip != self.ip_address {
            tracing::info!(
                "packet not addressed to us ({}), accepting for simulation",
                self.ip_address
            );
        }

        // Remember the peer for future responses
        {
            let mut destination_ip = self.destination_ip.write().unwrap();
            if destination_ip.is_none() {
                *destination_ip = Some(packet.src_ip);
                tracing::info!("setting destination address to {}", packet.src_ip);
            }
        }

        let control = control
            .with_src_ip(packet.src_ip)
            .with_protocol(packet.protocol);
        self.neighbors.up(packet.payload, control);
    }
}
