//! The physical layer: a TCP socket standing in for the physical medium.

use crate::layer::{Layer, Neighbors, SharedLayer};
use crate::stack::Role;
use crate::{Control, Message};
use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream};
use std::sync::Mutex;
use std::thread;
use std::time::Duration;

/// How many times a client retries a refused connection.
const CONNECT_ATTEMPTS: u32 = 5;

/// How long a client waits between connection attempts.
const CONNECT_RETRY_DELAY: Duration = Duration::from_secs(2);

/// The physical layer controller.
///
/// Simulates the physical medium with one TCP connection between the two
/// stacks. Outbound frames are written with a four-byte big-endian length
/// prefix; [`receive`](Self::receive) reads one framed unit and hands it to
/// the upper layer. A server accepts a single peer; a client dials out with
/// bounded retries.
pub struct PhysicalLayer {
    role: Role,
    host: String,
    port: u16,
    listener: Mutex<Option<TcpListener>>,
    stream: Mutex<Option<TcpStream>>,
    neighbors: Neighbors,
}

impl PhysicalLayer {
    /// Creates a physical layer for the given role and address. No sockets
    /// are opened until [`bind`](Self::bind) or
    /// [`initialize`](Self::initialize).
    pub fn new(role: Role, host: impl Into<String>, port: u16) -> Self {
        Self {
            role,
            host: host.into(),
            port,
            listener: Mutex::new(None),
            stream: Mutex::new(None),
            neighbors: Neighbors::new(),
        }
    }

    /// Sets the layer above this one.
    pub fn set_upper(&self, layer: SharedLayer) {
        self.neighbors.set_upper(layer);
    }

    /// Binds the server listener and reports the bound address, which is
    /// useful when the configured port is 0.
    pub fn bind(&self) -> io::Result<SocketAddr> {
        if self.role != Role::Server {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "only a server binds a listener",
            ));
        }
        let listener = TcpListener::bind((self.host.as_str(), self.port))?;
        let address = listener.local_addr()?;
        tracing::info!("server listening on {address}");
        *self.listener.lock().unwrap() = Some(listener);
        Ok(address)
    }

    /// Establishes the medium: a server accepts one peer, a client connects
    /// with bounded retries.
    pub fn initialize(&self) -> io::Result<()> {
        match self.role {
            Role::Server => {
                if self.listener.lock().unwrap().is_none() {
                    self.bind()?;
                }
                let listener = self.listener.lock().unwrap();
                let listener = listener
                    .as_ref()
                    .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "not bound"))?;
                let (stream, peer) = listener.accept()?;
                tracing::info!("connection established with {peer}");
                *self.stream.lock().unwrap() = Some(stream);
                Ok(())
            }
            Role::Client => {
                tracing::info!("connecting to {}:{}", self.host, self.port);
                let mut attempt = 1;
                loop {
                    match TcpStream::connect((self.host.as_str(), self.port)) {
                        Ok(stream) => {
                            tracing::info!("connected to {}:{}", self.host, self.port);
                            *self.stream.lock().unwrap() = Some(stream);
                            return Ok(());
                        }
                        Err(err)
                            if err.kind() == io::ErrorKind::ConnectionRefused
                                && attempt < CONNECT_ATTEMPTS =>
                        {
                            tracing::info!(
                                "connection failed, retrying in {} seconds",
                                CONNECT_RETRY_DELAY.as_secs()
                            );
                            thread::sleep(CONNECT_RETRY_DELAY);
                            attempt += 1;
                        }
                        Err(err) => return Err(err),
                    }
                }
            }
        }
    }

    /// Sets the read timeout on the established medium.
    pub fn set_read_timeout(&self, timeout: Option<Duration>) -> io::Result<()> {
        match self.stream.lock().unwrap().as_ref() {
            Some(stream) => stream.set_read_timeout(timeout),
            None => Err(io::Error::new(io::ErrorKind::NotConnected, "no peer")),
        }
    }

    /// Receives one framed unit from the medium and hands it upward.
    ///
    /// Blocks until a frame arrives. Returns `Ok(false)` when the peer has
    /// closed the connection.
    pub fn receive(&self) -> io::Result<bool> {
        let data = {
            let mut guard = self.stream.lock().unwrap();
            let stream = guard
                .as_mut()
                .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "no peer"))?;

            let mut length = [0u8; 4];
            if let Err(err) = stream.read_exact(&mut length) {
                if err.kind() == io::ErrorKind::UnexpectedEof {
                    tracing::info!("connection closed");
                    return Ok(false);
                }
                return Err(err);
            }
            let mut data = vec![0u8; u32::from_be_bytes(length) as usize];
            stream.read_exact(&mut data)?;
            data
            // The lock drops here; delivering upward may send replies back
            // through this layer
        };

        tracing::info!("received {} bytes", data.len());
        tracing::debug!(
            "bit representation (first 64 bits): {}...",
            leading_bits(&data)
        );
        self.neighbors.up(Message::from(data), Control::new());
        Ok(true)
    }

    /// Closes the medium.
    pub fn close(&self) {
        if let Some(stream) = self.stream.lock().unwrap().take() {
            let _ = stream.shutdown(Shutdown::Both);
        }
        self.listener.lock().unwrap().take();
        tracing::info!("connection closed");
    }

    fn transmit(&self, data: &[u8]) -> io::Result<()> {
        let mut guard = self.stream.lock().unwrap();
        let stream = guard
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "no peer"))?;
        stream.write_all(&(data.len() as u32).to_be_bytes())?;
        stream.write_all(data)
    }
}

/// Formats up to the first eight bytes as a bit string, for the traces.
fn leading_bits(data: &[u8]) -> String {
    data.iter()
        .take(8)
        .map(|byte| format!("{byte:08b}"))
        .collect()
}

impl Layer for PhysicalLayer {
    fn name(&self) -> &'static str {
        "Physical"
    }

    fn send_down(&self, message: Message, _control: Control) {
        tracing::info!("sending {} bytes", message.len());
        tracing::debug!(
            "bit representation (first 64 bits): {}...",
            leading_bits(message.as_slice())
        );
        if let Err(err) = self.transmit(message.as_slice()) {
            tracing::error!("failed to transmit: {err}");
        }
    }

    fn send_up(&self, message: Message, control: Control) {
        // Bytes handed to us from below (for example by a test medium) go
        // straight to the upper layer
        self.neighbors.up(message, control);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[derive(Default)]
    struct CaptureLayer {
        up: Mutex<Vec<Message>>,
    }

    impl Layer for CaptureLayer {
        fn name(&self) -> &'static str {
            "capture"
        }

        fn send_down(&self, _message: Message, _control: Control) {}

        fn send_up(&self, message: Message, _control: Control) {
            self.up.lock().unwrap().push(message);
        }
    }

    #[test]
    fn leading_bits_formats_bytes() {
        assert_eq!(leading_bits(&[0b1010_0001]), "10100001");
        assert_eq!(leading_bits(&[0xff, 0x00]), "1111111100000000");
    }

    #[test]
    fn frames_cross_a_socket_pair() -> anyhow::Result<()> {
        let server = PhysicalLayer::new(Role::Server, "127.0.0.1", 0);
        let address = server.bind()?;
        let client = PhysicalLayer::new(Role::Client, "127.0.0.1", address.port());

        let received = Arc::new(CaptureLayer::default());
        server.set_upper(received.clone());

        let server = Arc::new(server);
        let accepting = {
            let server = server.clone();
            thread::spawn(move || server.initialize())
        };
        client.initialize()?;
        accepting.join().expect("accept thread panicked")?;

        client.send_down(Message::new(b"across the wire"), Control::new());
        client.send_down(Message::new(b"and again"), Control::new());
        assert!(server.receive()?);
        assert!(server.receive()?);

        let frames = received.up.lock().unwrap().clone();
        assert_eq!(frames[0], Message::new(b"across the wire"));
        assert_eq!(frames[1], Message::new(b"and again"));

        client.close();
        assert!(!server.receive()?);
        Ok(())
    }

    #[test]
    fn sending_without_a_peer_is_reported_not_fatal() {
        let layer = PhysicalLayer::new(Role::Client, "127.0.0.1", 1);
        layer.send_down(Message::new(b"nowhere to go"), Control::new());
    }

    #[test]
    fn clients_cannot_bind() {
        let layer = PhysicalLayer::new(Role::Client, "127.0.0.1", 0);
        assert!(layer.bind().is_err());
    }
}
