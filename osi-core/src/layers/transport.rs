//! The transport layer: end-to-end connections, segmentation, and
//! acknowledgment over the network layer.

use crate::layer::{Layer, Neighbors, SharedLayer};
use crate::layers::network::ProtocolNumber;
use crate::utility::Endpoint;
use crate::{Control, FxDashMap, Message};
use std::sync::atomic::{AtomicU16, Ordering};

pub mod connection;
pub use connection::{Connection, ConnectionState};

pub mod transport_parsing;
pub use transport_parsing::{Segment, SegmentError};

/// The most payload bytes a single segment will carry.
const MAX_SEGMENT_SIZE: usize = 1024;

/// The first port handed out to locally opened connections.
const EPHEMERAL_PORT_START: u16 = 49152;

/// The transport layer controller.
///
/// Owns the table of connections for one process role, keyed by local port,
/// and handles the SYN/FIN handshakes and data acknowledgment of its
/// TCP-like protocol. Like the session layer above it, connection setup is
/// optimistic: the initiator marks a connection established right after
/// emitting SYN rather than waiting out the full handshake.
pub struct TransportLayer {
    connections: FxDashMap<u16, Connection>,
    next_port: AtomicU16,
    neighbors: Neighbors,
}

impl TransportLayer {
    /// Creates a new transport layer with an empty connection table.
    pub fn new() -> Self {
        Self {
            connections: FxDashMap::default(),
            next_port: AtomicU16::new(EPHEMERAL_PORT_START),
            neighbors: Neighbors::new(),
        }
    }

    /// Sets the layer above this one.
    pub fn set_upper(&self, layer: SharedLayer) {
        self.neighbors.set_upper(layer);
    }

    /// Sets the layer below this one.
    pub fn set_lower(&self, layer: SharedLayer) {
        self.neighbors.set_lower(layer);
    }

    /// Looks up a connection by local port, returning a snapshot of its
    /// state.
    pub fn connection(&self, local_port: u16) -> Option<Connection> {
        self.connections
            .get(&local_port)
            .map(|connection| connection.value().clone())
    }

    /// Opens a connection to a remote endpoint from a fresh ephemeral port.
    ///
    /// Emits a SYN and immediately considers the connection established; the
    /// peer's SYN-ACK completes the sequencing state when it arrives.
    pub fn connect(&self, remote: Endpoint) -> u16 {
        let local_port = self.next_port.fetch_add(1, Ordering::Relaxed);
        let mut connection = Connection::new(local_port, Some(remote));
        connection.state = ConnectionState::SynSent;

        tracing::info!("initiating connection to {remote}");
        let syn = Segment::new(
            local_port,
            remote.port,
            connection.seq_num,
            0,
            Segment::SYN,
            connection.window,
            Message::default(),
        );
        connection.seq_num = connection.seq_num.wrapping_add(1);
        connection.state = ConnectionState::Established;
        self.connections.insert(local_port, connection);

        self.transmit(&syn, remote);
        local_port
    }

    /// Binds a listening connection to a local port, ready to answer an
    /// inbound SYN.
    pub fn accept(&self, local_port: u16) {
        let mut connection = Connection::new(local_port, None);
        connection.state = ConnectionState::Listen;
        self.connections.insert(local_port, connection);
        tracing::info!("listening on port {local_port}");
    }

    /// Sends data over an established connection.
    pub fn send(&self, local_port: u16, data: Message) {
        let (segment, remote) = match self.connections.get_mut(&local_port) {
            Some(mut connection) => {
                if !connection.is_established() {
                    tracing::error!("cannot send data, connection not established");
                    return;
                }
                let Some(remote) = connection.remote else {
                    tracing::error!("connection {local_port} has no remote endpoint");
                    return;
                };
                tracing::info!(
                    "sending {} bytes over connection {local_port} -> {remote}",
                    data.len()
                );
                connection.buffer_outgoing(data.as_slice());
                let chunk = connection.take_outgoing(MAX_SEGMENT_SIZE);
                let segment = Segment::new(
                    local_port,
                    remote.port,
                    connection.seq_num,
                    connection.ack_num,
                    Segment::ACK,
                    connection.window,
                    Message::from(chunk),
                );
                connection.seq_num = connection.seq_num.wrapping_add(segment.payload.len() as u32);
                (segment, remote)
            }
            None => {
                tracing::error!("no connection for port {local_port}");
                return;
            }
        };
        self.transmit(&segment, remote);
    }

    /// Closes a connection and removes it from the table. Closing a
    /// connection that is already gone is a no-op.
    pub fn close(&self, local_port: u16) {
        let (segment, remote) = match self.connections.get_mut(&local_port) {
            Some(mut connection) => {
                if connection.state == ConnectionState::Closed {
                    tracing::debug!("connection {local_port} already closed");
                    return;
                }
                let Some(remote) = connection.remote else {
                    tracing::error!("connection {local_port} has no remote endpoint");
                    return;
                };
                tracing::info!("closing connection {local_port} -> {remote}");
                let fin = Segment::new(
                    local_port,
                    remote.port,
                    connection.seq_num,
                    connection.ack_num,
                    Segment::FIN | Segment::ACK,
                    connection.window,
                    Message::default(),
                );
                connection.seq_num = connection.seq_num.wrapping_add(1);
                connection.state = ConnectionState::FinWait1;
                (fin, remote)
            }
            None => {
                tracing::debug!("connection {local_port} already closed");
                return;
            }
        };
        self.transmit(&segment, remote);
        self.connections.remove(&local_port);
    }

    fn find_by_remote(&self, remote: Endpoint) -> Option<u16> {
        self.connections
            .iter()
            .find(|entry| entry.value().remote == Some(remote))
            .map(|entry| *entry.key())
    }

    /// Encodes a segment and forwards it to the network layer.
    fn transmit(&self, segment: &Segment, remote: Endpoint) {
        match segment.to_message() {
            Ok(bytes) => {
                let control = Control::new()
                    .with_remote_ip(remote.address)
                    .with_protocol(ProtocolNumber::TCP);
                self.neighbors.down(bytes, control);
            }
            Err(err) => tracing::error!("failed to encode segment: {err}"),
        }
    }

    fn handle_syn(&self, segment: &Segment, control: &Control) {
        if segment.is_ack() {
            // The second leg of the handshake: the peer answered our SYN
            match self.connections.get_mut(&segment.dst_port) {
                Some(mut connection) => {
                    connection.ack_num = segment.seq_num.wrapping_add(1);
                    connection.expected_seq = segment.seq_num.wrapping_add(1);
                    connection.state = ConnectionState::Established;
                }
                None => tracing::error!(
                    "no connection for port {}, discarding SYN-ACK",
                    segment.dst_port
                ),
            }
            return;
        }

        let Some(src_ip) = control.src_ip else {
            tracing::error!("SYN without a source address, discarding");
            return;
        };
        let remote = Endpoint::new(src_ip, segment.src_port);

        let syn_ack = {
            // A listening connection adopts the peer; otherwise one is created
            let mut entry = self
                .connections
                .entry(segment.dst_port)
                .or_insert_with(|| Connection::new(segment.dst_port, Some(remote)));
            let connection = entry.value_mut();
            connection.remote = Some(remote);
            connection.state = ConnectionState::SynReceived;
            connection.ack_num = segment.seq_num.wrapping_add(1);
            connection.expected_seq = segment.seq_num.wrapping_add(1);
            let syn_ack = Segment::new(
                connection.local_port,
                remote.port,
                connection.seq_num,
                connection.ack_num,
                Segment::SYN | Segment::ACK,
                connection.window,
                Message::default(),
            );
            connection.seq_num = connection.seq_num.wrapping_add(1);
            connection.state = ConnectionState::Established;
            syn_ack
        };

        tracing::info!("connection established: {} <- {}", segment.dst_port, remote);
        self.transmit(&syn_ack, remote);
    }

    fn handle_fin(&self, segment: &Segment) {
        let (fin_ack, remote) = match self.connections.get_mut(&segment.dst_port) {
            Some(mut connection) => {
                let Some(remote) = connection.remote else {
                    tracing::error!("connection {} has no remote endpoint", segment.dst_port);
                    return;
                };
                tracing::info!("received FIN, closing connection {}", segment.dst_port);
                let fin_ack = Segment::new(
                    connection.local_port,
                    remote.port,
                    connection.seq_num,
                    segment.seq_num.wrapping_add(1),
                    Segment::FIN | Segment::ACK,
                    connection.window,
                    Message::default(),
                );
                connection.seq_num = connection.seq_num.wrapping_add(1);
                connection.state = ConnectionState::Closed;
                (fin_ack, remote)
            }
            None => {
                tracing::debug!("no connection for port {}, discarding FIN", segment.dst_port);
                return;
            }
        };
        self.transmit(&fin_ack, remote);
        self.connections.remove(&segment.dst_port);
    }

    fn handle_payload(&self, segment: Segment) {
        struct Delivery {
            ack: Segment,
            remote: Endpoint,
            local_port: u16,
            data: Option<Vec<u8>>,
        }

        let delivery = match self.connections.get_mut(&segment.dst_port) {
            Some(mut connection) => {
                let Some(remote) = connection.remote else {
                    tracing::error!("connection {} has no remote endpoint", segment.dst_port);
                    return;
                };
                if segment.seq_num == connection.expected_seq {
                    connection.buffer_incoming(segment.payload.as_slice());
                    connection.expected_seq =
                        segment.seq_num.wrapping_add(segment.payload.len() as u32);
                    let ack = Segment::new(
                        connection.local_port,
                        remote.port,
                        connection.seq_num,
                        connection.expected_seq,
                        Segment::ACK,
                        connection.window,
                        Message::default(),
                    );
                    Delivery {
                        ack,
                        remote,
                        local_port: connection.local_port,
                        data: Some(connection.take_incoming()),
                    }
                } else {
                    tracing::error!(
                        "out-of-order segment, expected SEQ {}, got {}",
                        connection.expected_seq,
                        segment.seq_num
                    );
                    // A duplicate acknowledgment restates what we expect
                    let ack = Segment::new(
                        connection.local_port,
                        remote.port,
                        connection.seq_num,
                        connection.expected_seq,
                        Segment::ACK,
                        connection.window,
                        Message::default(),
                    );
                    Delivery {
                        ack,
                        remote,
                        local_port: connection.local_port,
                        data: None,
                    }
                }
            }
            None => {
                tracing::error!("no connection for port {}, discarding", segment.dst_port);
                return;
            }
        };

        self.transmit(&delivery.ack, delivery.remote);
        if let Some(data) = delivery.data {
            let control = Control::new()
                .with_local_port(delivery.local_port)
                .with_remote_ip(delivery.remote.address)
                .with_remote_port(delivery.remote.port);
            self.neighbors.up(Message::from(data), control);
        }
    }
}

impl Default for TransportLayer {
    fn default() -> Self {
        Self::new()
    }
}

impl Layer for TransportLayer {
    fn name(&self) -> &'static str {
        "Transport"
    }

    fn send_down(&self, message: Message, control: Control) {
        let local_port = control
            .local_port
            .filter(|port| self.connections.contains_key(port));

        let local_port = match local_port {
            Some(port) => Some(port),
            None => match (control.remote_ip, control.remote_port) {
                (Some(address), Some(port)) => {
                    let remote = Endpoint::new(address, port);
                    Some(
                        self.find_by_remote(remote)
                            .unwrap_or_else(|| self.connect(remote)),
                    )
                }
                _ => None,
            },
        };

        let Some(local_port) = local_port else {
            tracing::error!("no connection available, cannot send data");
            return;
        };
        self.send(local_port, message);
    }

    fn send_up(&self, message: Message, control: Control) {
        if control.protocol != Some(ProtocolNumber::TCP) {
            tracing::error!(
                "not a TCP segment (protocol: {:?}), discarding",
                control.protocol
            );
            return;
        }

        let segment = match Segment::from_bytes(message.as_slice()) {
            Ok(segment) => segment,
            Err(err) => {
                tracing::error!("error processing segment: {err}");
                return;
            }
        };
        tracing::debug!(
            "segment: {} -> {} (SEQ: {}, ACK: {}, flags: {:02x})",
            segment.src_port,
            segment.dst_port,
            segment.seq_num,
            segment.ack_num,
            segment.flags
        );

        if segment.is_syn() {
            self.handle_syn(&segment, &control);
        } else if segment.is_fin() {
            self.handle_fin(&segment);
        } else if !segment.payload.is_empty() {
            self.handle_payload(segment);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layers::network::Ipv4Address;
    use std::sync::{Arc, Mutex};

    #[derive(Default)]
    struct CaptureLayer {
        down: Mutex<Vec<(Message, Control)>>,
        up: Mutex<Vec<(Message, Control)>>,
    }

    impl Layer for CaptureLayer {
        fn name(&self) -> &'static str {
            "capture"
        }

        fn send_down(&self, message: Message, control: Control) {
            self.down.lock().unwrap().push((message, control));
        }

        fn send_up(&self, message: Message, control: Control) {
            self.up.lock().unwrap().push((message, control));
        }
    }

    impl CaptureLayer {
        fn sent(&self) -> Vec<(Segment, Control)> {
            self.down
                .lock()
                .unwrap()
                .iter()
                .map(|(message, control)| {
                    (
                        Segment::from_bytes(message.as_slice()).unwrap(),
                        control.clone(),
                    )
                })
                .collect()
        }

        fn delivered(&self) -> Vec<(Message, Control)> {
            self.up.lock().unwrap().clone()
        }

        fn clear(&self) {
            self.down.lock().unwrap().clear();
            self.up.lock().unwrap().clear();
        }
    }

    fn setup() -> (TransportLayer, Arc<CaptureLayer>, Arc<CaptureLayer>) {
        let layer = TransportLayer::new();
        let lower = Arc::new(CaptureLayer::default());
        let upper = Arc::new(CaptureLayer::default());
        layer.set_lower(lower.clone());
        layer.set_upper(upper.clone());
        (layer, lower, upper)
    }

    fn remote() -> Endpoint {
        Endpoint::new(Ipv4Address::new([10, 0, 0, 2]), 12345)
    }

    fn tcp_control(src_ip: Ipv4Address) -> Control {
        Control::new()
            .with_protocol(ProtocolNumber::TCP)
            .with_src_ip(src_ip)
    }

    #[test]
    fn connect_sends_syn_and_establishes() {
        let (layer, lower, _upper) = setup();
        let local_port = layer.connect(remote());

        let connection = layer.connection(local_port).unwrap();
        assert!(connection.is_established());
        assert_eq!(connection.remote, Some(remote()));

        let sent = lower.sent();
        assert_eq!(sent.len(), 1);
        let (segment, control) = &sent[0];
        assert!(segment.is_syn());
        assert!(!segment.is_ack());
        assert_eq!(segment.dst_port, 12345);
        assert_eq!(control.protocol, Some(ProtocolNumber::TCP));
        assert_eq!(control.remote_ip, Some(remote().address));
    }

    #[test]
    fn send_is_gated_on_establishment() {
        let (layer, lower, _upper) = setup();
        layer.accept(5000);
        layer.send(5000, Message::new(b"hello"));
        assert!(lower.sent().is_empty());

        layer.send(6000, Message::new(b"hello"));
        assert!(lower.sent().is_empty());
    }

    #[test]
    fn send_segments_payload_and_advances_sequence() {
        let (layer, lower, _upper) = setup();
        let local_port = layer.connect(remote());
        lower.clear();

        layer.send(local_port, Message::new(b"hello"));
        layer.send(local_port, Message::new(b"again"));

        let sent = lower.sent();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0].0.payload, Message::new(b"hello"));
        assert_eq!(sent[1].0.payload, Message::new(b"again"));
        assert_eq!(sent[1].0.seq_num, sent[0].0.seq_num.wrapping_add(5));
    }

    #[test]
    fn inbound_syn_creates_connection_and_syn_acks() {
        let (layer, lower, _upper) = setup();
        let syn = Segment::new(49200, 12345, 100, 0, Segment::SYN, 65535, Message::default());
        layer.send_up(
            syn.to_message().unwrap(),
            tcp_control(Ipv4Address::new([10, 0, 0, 9])),
        );

        let connection = layer.connection(12345).unwrap();
        assert!(connection.is_established());
        assert_eq!(
            connection.remote,
            Some(Endpoint::new(Ipv4Address::new([10, 0, 0, 9]), 49200))
        );
        assert_eq!(connection.expected_seq, 101);

        let sent = lower.sent();
        assert_eq!(sent.len(), 1);
        assert!(sent[0].0.is_syn());
        assert!(sent[0].0.is_ack());
        assert_eq!(sent[0].0.ack_num, 101);
    }

    #[test]
    fn syn_ack_completes_the_initiator_handshake() {
        let (layer, lower, _upper) = setup();
        let local_port = layer.connect(remote());
        lower.clear();

        let syn_ack = Segment::new(
            12345,
            local_port,
            500,
            0,
            Segment::SYN | Segment::ACK,
            65535,
            Message::default(),
        );
        layer.send_up(syn_ack.to_message().unwrap(), tcp_control(remote().address));

        let connection = layer.connection(local_port).unwrap();
        assert_eq!(connection.expected_seq, 501);
        assert!(connection.is_established());
        // No reply to a SYN-ACK
        assert!(lower.sent().is_empty());
    }

    #[test]
    fn in_order_payload_is_delivered_and_acked() {
        let (layer, lower, upper) = setup();
        let peer = Ipv4Address::new([10, 0, 0, 9]);
        let syn = Segment::new(49200, 12345, 100, 0, Segment::SYN, 65535, Message::default());
        layer.send_up(syn.to_message().unwrap(), tcp_control(peer));
        lower.clear();

        let data = Segment::new(49200, 12345, 101, 0, Segment::ACK, 65535, Message::new(b"hello"));
        layer.send_up(data.to_message().unwrap(), tcp_control(peer));

        let delivered = upper.delivered();
        assert_eq!(delivered.len(), 1);
        assert_eq!(delivered[0].0, Message::new(b"hello"));
        assert_eq!(delivered[0].1.local_port, Some(12345));
        assert_eq!(delivered[0].1.remote_port, Some(49200));
        assert_eq!(delivered[0].1.remote_ip, Some(peer));

        let sent = lower.sent();
        assert_eq!(sent.len(), 1);
        assert!(sent[0].0.is_ack());
        assert_eq!(sent[0].0.ack_num, 106);
    }

    #[test]
    fn out_of_order_payload_is_held_back_with_a_duplicate_ack() {
        let (layer, lower, upper) = setup();
        let peer = Ipv4Address::new([10, 0, 0, 9]);
        let syn = Segment::new(49200, 12345, 100, 0, Segment::SYN, 65535, Message::default());
        layer.send_up(syn.to_message().unwrap(), tcp_control(peer));
        lower.clear();

        let data = Segment::new(49200, 12345, 999, 0, Segment::ACK, 65535, Message::new(b"late"));
        layer.send_up(data.to_message().unwrap(), tcp_control(peer));

        assert!(upper.delivered().is_empty());
        let sent = lower.sent();
        assert_eq!(sent.len(), 1);
        assert!(sent[0].0.is_ack());
        assert_eq!(sent[0].0.ack_num, 101);
    }

    #[test]
    fn fin_acks_and_removes_the_connection() {
        let (layer, lower, _upper) = setup();
        let peer = Ipv4Address::new([10, 0, 0, 9]);
        let syn = Segment::new(49200, 12345, 100, 0, Segment::SYN, 65535, Message::default());
        layer.send_up(syn.to_message().unwrap(), tcp_control(peer));
        lower.clear();

        let fin = Segment::new(
            49200,
            12345,
            101,
            0,
            Segment::FIN | Segment::ACK,
            65535,
            Message::default(),
        );
        layer.send_up(fin.to_message().unwrap(), tcp_control(peer));

        assert!(layer.connection(12345).is_none());
        let sent = lower.sent();
        assert_eq!(sent.len(), 1);
        assert!(sent[0].0.is_fin());
    }

    #[test]
    fn non_tcp_traffic_is_discarded() {
        let (layer, lower, upper) = setup();
        let syn = Segment::new(49200, 12345, 100, 0, Segment::SYN, 65535, Message::default());
        layer.send_up(
            syn.to_message().unwrap(),
            Control::new()
                .with_protocol(ProtocolNumber::UDP)
                .with_src_ip(Ipv4Address::new([10, 0, 0, 9])),
        );
        assert!(lower.sent().is_empty());
        assert!(upper.delivered().is_empty());
        assert!(layer.connection(12345).is_none());
    }

    #[test]
    fn malformed_segments_are_discarded() {
        let (layer, lower, upper) = setup();
        layer.send_up(
            Message::new(b"junk"),
            tcp_control(Ipv4Address::new([10, 0, 0, 9])),
        );
        assert!(lower.sent().is_empty());
        assert!(upper.delivered().is_empty());
    }

    #[test]
    fn send_down_connects_when_no_connection_exists() {
        let (layer, lower, _upper) = setup();
        layer.send_down(
            Message::new(b"hello"),
            Control::new()
                .with_remote_ip(remote().address)
                .with_remote_port(remote().port)
                .with_local_port(80),
        );

        let sent = lower.sent();
        assert_eq!(sent.len(), 2);
        assert!(sent[0].0.is_syn());
        assert_eq!(sent[1].0.payload, Message::new(b"hello"));
    }

    #[test]
    fn send_down_without_routing_information_is_dropped() {
        let (layer, lower, _upper) = setup();
        layer.send_down(Message::new(b"hello"), Control::new());
        assert!(lower.sent().is_empty());
    }
}
