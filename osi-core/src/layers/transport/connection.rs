//! Per-connection state tracked by the
//! [`TransportLayer`](super::TransportLayer).

use crate::utility::Endpoint;

/// The lifecycle state of a [`Connection`], following the classic TCP state
/// names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ConnectionState {
    #[default]
    Closed,
    Listen,
    SynSent,
    SynReceived,
    Established,
    FinWait1,
    FinWait2,
    CloseWait,
    Closing,
    LastAck,
    TimeWait,
}

/// A transport layer connection.
///
/// Holds the sequencing state and the send and receive buffers for one
/// TCP-like conversation between a local port and a remote endpoint.
#[derive(Debug, Clone)]
pub struct Connection {
    pub local_port: u16,
    /// The remote endpoint, once known.
    pub remote: Option<Endpoint>,
    pub state: ConnectionState,
    /// The next sequence number this side will send.
    pub seq_num: u32,
    /// The next sequence number expected from the peer, as advertised in
    /// acknowledgments.
    pub ack_num: u32,
    pub window: u16,
    /// The sequence number the next in-order payload must carry.
    pub expected_seq: u32,
    send_buffer: Vec<u8>,
    recv_buffer: Vec<u8>,
}

impl Connection {
    /// Creates a connection with a random initial sequence number.
    pub fn new(local_port: u16, remote: Option<Endpoint>) -> Self {
        Self {
            local_port,
            remote,
            state: ConnectionState::Closed,
            seq_num: rand::random(),
            ack_num: 0,
            window: 65535,
            expected_seq: 0,
            send_buffer: Vec::new(),
            recv_buffer: Vec::new(),
        }
    }

    /// Whether the connection is established and eligible to carry data.
    pub fn is_established(&self) -> bool {
        self.state == ConnectionState::Established
    }

    /// Queues outgoing data behind whatever is already waiting.
    pub fn buffer_outgoing(&mut self, data: &[u8]) {
        self.send_buffer.extend_from_slice(data);
    }

    /// Takes up to `max` bytes of queued outgoing data.
    pub fn take_outgoing(&mut self, max: usize) -> Vec<u8> {
        let len = max.min(self.send_buffer.len());
        self.send_buffer.drain(..len).collect()
    }

    /// Queues received data for delivery to the upper layer.
    pub fn buffer_incoming(&mut self, data: &[u8]) {
        self.recv_buffer.extend_from_slice(data);
    }

    /// Takes all queued received data.
    pub fn take_incoming(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.recv_buffer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_closed_with_empty_buffers() {
        let connection = Connection::new(49152, None);
        assert_eq!(connection.state, ConnectionState::Closed);
        assert!(!connection.is_established());
        assert_eq!(connection.window, 65535);
    }

    #[test]
    fn outgoing_buffer_respects_max() {
        let mut connection = Connection::new(49152, None);
        connection.buffer_outgoing(b"hello world");
        assert_eq!(connection.take_outgoing(5), b"hello");
        assert_eq!(connection.take_outgoing(100), b" world");
        assert!(connection.take_outgoing(100).is_empty());
    }

    #[test]
    fn incoming_buffer_drains_completely() {
        let mut connection = Connection::new(49152, None);
        connection.buffer_incoming(b"one");
        connection.buffer_incoming(b"two");
        assert_eq!(connection.take_incoming(), b"onetwo");
        assert!(connection.take_incoming().is_empty());
    }
}
