//! Types for exchanging context between layers.

use crate::layers::datalink::MacAddress;
use crate::layers::network::Ipv4Address;
use crate::layers::presentation::DataFormat;
use crate::layers::session::SessionId;

/// Context passed alongside a [`Message`](crate::Message) between layers.
///
/// Layers often need to pass information to one another beyond the payload
/// itself: the remote endpoint a payload should reach, the session it belongs
/// to, or details extracted from a header on the way up. A control carries
/// that information as a closed set of optional fields. Senders populate the
/// fields they know about with the builder methods; receivers read whichever
/// fields apply to them and ignore the rest.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Control {
    /// The session the payload belongs to.
    pub session_id: Option<SessionId>,
    /// The logical address of the remote endpoint.
    pub remote_ip: Option<Ipv4Address>,
    /// The port of the remote endpoint.
    pub remote_port: Option<u16>,
    /// The local port traffic is associated with.
    pub local_port: Option<u16>,
    /// The logical address a received packet originated from.
    pub src_ip: Option<Ipv4Address>,
    /// The hardware address a received frame originated from.
    pub src_mac: Option<MacAddress>,
    /// The protocol number carried in a packet header.
    pub protocol: Option<u8>,
    /// How the payload bytes should be interpreted by the application.
    pub data_format: Option<DataFormat>,
}

impl Control {
    /// Creates a new control with no fields set.
    pub fn new() -> Self {
        Default::default()
    }

    /// A builder method that sets the session identifier.
    pub fn with_session_id(mut self, session_id: SessionId) -> Self {
        self.session_id = Some(session_id);
        self
    }

    /// A builder method that sets the remote address.
    pub fn with_remote_ip(mut self, remote_ip: Ipv4Address) -> Self {
        self.remote_ip = Some(remote_ip);
        self
    }

    /// A builder method that sets the remote port.
    pub fn with_remote_port(mut self, remote_port: u16) -> Self {
        self.remote_port = Some(remote_port);
        self
    }

    /// A builder method that sets the local port.
    pub fn with_local_port(mut self, local_port: u16) -> Self {
        self.local_port = Some(local_port);
        self
    }

    /// A builder method that sets the source address.
    pub fn with_src_ip(mut self, src_ip: Ipv4Address) -> Self {
        self.src_ip = Some(src_ip);
        self
    }

    /// A builder method that sets the source hardware address.
    pub fn with_src_mac(mut self, src_mac: MacAddress) -> Self {
        self.src_mac = Some(src_mac);
        self
    }

    /// A builder method that sets the protocol number.
    pub fn with_protocol(mut self, protocol: u8) -> Self {
        self.protocol = Some(protocol);
        self
    }

    /// A builder method that sets the payload data format.
    pub fn with_data_format(mut self, data_format: DataFormat) -> Self {
        self.data_format = Some(data_format);
        self
    }
}
