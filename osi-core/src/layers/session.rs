//! The session layer: establishes, tracks, and tears down logical sessions
//! between two endpoints, and frames application data into session control
//! messages.

use crate::layer::{Layer, Neighbors, SharedLayer};
use crate::utility::Endpoint;
use crate::{Control, FxDashMap, Message};
use std::sync::RwLock;

pub mod session_parsing;
pub use session_parsing::{ParseError, SessionMessage, SessionMessageKind};

pub mod session_state;
pub use session_state::{DataValue, Session, SessionId, SessionState};

/// The session layer controller.
///
/// Owns the table of live sessions for one process role, drives the session
/// state machine as protocol messages are processed, and bridges between the
/// message codec and the adjacent layers. The table is scoped to this
/// instance and cleared when the controller is dropped.
///
/// The layer itself is synchronous: every operation runs to completion before
/// returning and there are no timers, so idle sessions persist until an
/// explicit disconnect. The design assumes one logical thread of control per
/// process role; driving one controller from several threads at once requires
/// external synchronization of the callers.
pub struct SessionLayer {
    sessions: FxDashMap<SessionId, Session>,
    // Sessions answer on the default HTTP port in this simulation
    local_port: u16,
    remote: RwLock<Option<Endpoint>>,
    neighbors: Neighbors,
}

impl SessionLayer {
    /// Creates a new session layer with an empty session table.
    pub fn new() -> Self {
        Self {
            sessions: FxDashMap::default(),
            local_port: 80,
            remote: RwLock::new(None),
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

    /// Creates a new session and registers it in the table.
    pub fn create_session(&self) -> SessionId {
        let session = Session::new();
        let id = session.id().clone();
        self.sessions.insert(id.clone(), session);
        id
    }

    /// Looks up a session by id, returning a snapshot of its state.
    pub fn session(&self, session_id: &SessionId) -> Option<Session> {
        self.sessions
            .get(session_id)
            .map(|session| session.value().clone())
    }

    /// The number of sessions currently registered.
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Establishes a session with a remote endpoint, as the initiator.
    ///
    /// Emits a CONNECT message downward and returns the new session's id.
    /// There is no handshake round trip in the simulation: the initiator
    /// optimistically marks the session established right after emitting
    /// CONNECT instead of waiting for CONNECT_ACK. The receive path still
    /// honors a CONNECT_ACK for sessions left in the connecting state.
    pub fn establish_session(&self, remote: Endpoint) -> SessionId {
        let mut session = Session::new();
        session.state = SessionState::Connecting;
        session.remote = Some(remote);
        let session_id = session.id().clone();
        self.sessions.insert(session_id.clone(), session);
        *self.remote.write().unwrap() = Some(remote);

        tracing::info!("establishing session {session_id} with {remote}");
        let connect = SessionMessage::new(SessionMessageKind::Connect, session_id.clone());
        self.send_message(&connect, Some(remote));

        if let Some(mut session) = self.sessions.get_mut(&session_id) {
            session.state = SessionState::Established;
        }
        session_id
    }

    /// Accepts a session opened by a remote endpoint, as the responder.
    ///
    /// Registers the session under the peer-supplied id, marks it
    /// established, and answers with a CONNECT_ACK.
    pub fn accept_session(&self, session_id: SessionId, remote: Endpoint) -> SessionId {
        let mut session = Session::with_id(session_id.clone());
        session.state = SessionState::Established;
        session.remote = Some(remote);
        self.sessions.insert(session_id.clone(), session);
        *self.remote.write().unwrap() = Some(remote);

        tracing::info!("accepted session {session_id} from {remote}");
        let ack = SessionMessage::new(SessionMessageKind::ConnectAck, session_id.clone());
        self.send_message(&ack, Some(remote));
        session_id
    }

    /// Sends application data over an established session.
    ///
    /// Data on a missing or non-established session is reported and dropped,
    /// not buffered.
    pub fn send_data(&self, session_id: &SessionId, payload: Message) {
        let remote = match self.sessions.get_mut(session_id) {
            Some(mut session) => {
                if !session.is_established() {
                    tracing::error!("cannot send data, session {session_id} is not established");
                    return;
                }
                session.update_activity();
                session.remote
            }
            None => {
                tracing::error!("no session found for id {session_id}");
                return;
            }
        };

        tracing::info!("sending {} bytes over session {session_id}", payload.len());
        let message =
            SessionMessage::with_payload(SessionMessageKind::Data, session_id.clone(), payload);
        self.send_message(&message, remote.or(*self.remote.read().unwrap()));
    }

    /// Closes a session and removes it from the table.
    ///
    /// Emits a DISCONNECT downward. Closing a session that is already gone is
    /// a no-op.
    pub fn close_session(&self, session_id: &SessionId) {
        let remote = match self.sessions.get_mut(session_id) {
            Some(mut session) => {
                session.state = SessionState::Disconnecting;
                session.remote
            }
            None => {
                tracing::debug!("session {session_id} already closed");
                return;
            }
        };

        tracing::info!("closing session {session_id}");
        let disconnect = SessionMessage::new(SessionMessageKind::Disconnect, session_id.clone());
        self.send_message(&disconnect, remote.or(*self.remote.read().unwrap()));

        // Teardown completes immediately; the session leaves the table
        // rather than lingering in a closed state.
        self.sessions.remove(session_id);
    }

    /// Encodes a protocol message and forwards it to the lower layer with
    /// routing context attached.
    fn send_message(&self, message: &SessionMessage, remote: Option<Endpoint>) {
        let Some(remote) = remote else {
            tracing::error!(
                "no remote information available for session {}",
                message.session_id
            );
            return;
        };
        match message.to_message() {
            Ok(bytes) => {
                let control = Control::new()
                    .with_remote_ip(remote.address)
                    .with_remote_port(remote.port)
                    .with_local_port(self.local_port);
                self.neighbors.down(bytes, control);
            }
            Err(err) => tracing::error!("failed to encode session message: {err}"),
        }
    }

    fn handle_connect(&self, message: SessionMessage, control: &Control) {
        tracing::info!("received CONNECT request");
        let remote = control_endpoint(control).or(*self.remote.read().unwrap());
        let Some(remote) = remote else {
            tracing::error!(
                "no remote information for session {}, cannot accept",
                message.session_id
            );
            return;
        };
        self.accept_session(message.session_id, remote);
    }

    fn handle_connect_ack(&self, message: &SessionMessage) {
        tracing::info!("received CONNECT_ACK");
        match self.sessions.get_mut(&message.session_id) {
            Some(mut session) => session.state = SessionState::Established,
            None => tracing::error!("no session found for id {}", message.session_id),
        }
    }

    fn handle_data(&self, message: SessionMessage) {
        match self.sessions.get_mut(&message.session_id) {
            Some(mut session) => {
                if !session.is_established() {
                    tracing::error!("session not established, discarding data");
                    return;
                }
                session.update_activity();
            }
            None => {
                tracing::error!("no session found for id {}", message.session_id);
                return;
            }
        }

        tracing::info!("received {} bytes of data", message.payload.len());
        let control = Control::new().with_session_id(message.session_id);
        self.neighbors.up(message.payload, control);
    }

    fn handle_disconnect(&self, message: &SessionMessage, control: &Control) {
        tracing::info!("received DISCONNECT request");
        let remote = match self.sessions.get(&message.session_id) {
            Some(session) => session.remote,
            None => {
                tracing::error!("no session found for id {}", message.session_id);
                return;
            }
        };

        let ack = SessionMessage::new(SessionMessageKind::DisconnectAck, message.session_id.clone());
        self.send_message(
            &ack,
            control_endpoint(control)
                .or(remote)
                .or(*self.remote.read().unwrap()),
        );
        self.sessions.remove(&message.session_id);
    }

    fn handle_disconnect_ack(&self, message: &SessionMessage) {
        tracing::info!("received DISCONNECT_ACK");
        if self.sessions.remove(&message.session_id).is_none() {
            tracing::debug!("no session found for id {}", message.session_id);
        }
    }

    fn handle_keepalive(&self, message: &SessionMessage) {
        tracing::info!("received KEEPALIVE");
        match self.sessions.get_mut(&message.session_id) {
            Some(mut session) => session.update_activity(),
            None => tracing::error!("no session found for id {}", message.session_id),
        }
    }
}

impl Default for SessionLayer {
    fn default() -> Self {
        Self::new()
    }
}

impl Layer for SessionLayer {
    fn name(&self) -> &'static str {
        "Session"
    }

    fn send_down(&self, message: Message, control: Control) {
        let session_id = control
            .session_id
            .as_ref()
            .filter(|id| self.sessions.contains_key(*id))
            .cloned();

        let session_id = match session_id {
            Some(session_id) => session_id,
            None => match (control.remote_ip, control.remote_port) {
                (Some(address), Some(port)) => {
                    self.establish_session(Endpoint::new(address, port))
                }
                _ => {
                    tracing::error!("no remote information provided, cannot establish session");
                    return;
                }
            },
        };

        self.send_data(&session_id, message);
    }

    fn send_up(&self, message: Message, control: Control) {
        tracing::info!("received message, size: {} bytes", message.len());

        let message = match SessionMessage::from_bytes(message.as_slice()) {
            Ok(message) => message,
            Err(err) => {
                tracing::error!("error processing session message: {err}");
                return;
            }
        };
        tracing::debug!(
            "message: kind {:?}, session {}",
            message.kind,
            message.session_id
        );

        // Remember the peer the first time we see traffic from it
        {
            let mut remote = self.remote.write().unwrap();
            if remote.is_none() {
                *remote = control_endpoint(&control);
            }
        }

        match message.kind {
            SessionMessageKind::Connect => self.handle_connect(message, &control),
            SessionMessageKind::ConnectAck => self.handle_connect_ack(&message),
            SessionMessageKind::Data => self.handle_data(message),
            SessionMessageKind::Disconnect => self.handle_disconnect(&message, &control),
            SessionMessageKind::DisconnectAck => self.handle_disconnect_ack(&message),
            SessionMessageKind::Keepalive => self.handle_keepalive(&message),
        }
    }
}

fn control_endpoint(control: &Control) -> Option<Endpoint> {
    Some(Endpoint::new(control.remote_ip?, control.remote_port?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layers::network::Ipv4Address;
    use std::sync::{Arc, Mutex};
    use std::thread;
    use std::time::Duration;

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
        /// The protocol messages forwarded downward, decoded.
        fn sent(&self) -> Vec<(SessionMessage, Control)> {
            self.down
                .lock()
                .unwrap()
                .iter()
                .map(|(message, control)| {
                    (
                        SessionMessage::from_bytes(message.as_slice()).unwrap(),
                        control.clone(),
                    )
                })
                .collect()
        }

        /// The payloads delivered upward.
        fn delivered(&self) -> Vec<(Message, Control)> {
            self.up.lock().unwrap().clone()
        }

        fn clear(&self) {
            self.down.lock().unwrap().clear();
            self.up.lock().unwrap().clear();
        }
    }

    fn setup() -> (SessionLayer, Arc<CaptureLayer>, Arc<CaptureLayer>) {
        let layer = SessionLayer::new();
        let lower = Arc::new(CaptureLayer::default());
        let upper = Arc::new(CaptureLayer::default());
        layer.set_lower(lower.clone());
        layer.set_upper(upper.clone());
        (layer, lower, upper)
    }

    fn remote() -> Endpoint {
        Endpoint::new(Ipv4Address::new([10, 0, 0, 2]), 9000)
    }

    fn encoded(kind: SessionMessageKind, session_id: &str) -> Message {
        SessionMessage::new(kind, session_id.into())
            .to_message()
            .unwrap()
    }

    fn inbound_control() -> Control {
        Control::new()
            .with_remote_ip(Ipv4Address::new([10, 0, 0, 2]))
            .with_remote_port(9000)
            .with_local_port(80)
    }

    #[test]
    fn establish_marks_established_and_sends_connect() {
        let (layer, lower, _upper) = setup();
        let session_id = layer.establish_session(remote());

        let session = layer.session(&session_id).unwrap();
        assert_eq!(session.state, SessionState::Established);
        assert_eq!(session.remote, Some(remote()));

        let sent = lower.sent();
        assert_eq!(sent.len(), 1);
        let (message, control) = &sent[0];
        assert!(message.is_connect());
        assert_eq!(message.session_id, session_id);
        assert!(message.payload.is_empty());
        assert_eq!(control.remote_ip, Some(Ipv4Address::new([10, 0, 0, 2])));
        assert_eq!(control.remote_port, Some(9000));
    }

    #[test]
    fn connect_registers_session_and_acks() {
        let (layer, lower, _upper) = setup();
        layer.send_up(
            encoded(SessionMessageKind::Connect, "abc"),
            inbound_control(),
        );

        let session = layer.session(&"abc".into()).unwrap();
        assert_eq!(session.state, SessionState::Established);
        assert_eq!(session.remote, Some(remote()));

        let sent = lower.sent();
        assert_eq!(sent.len(), 1);
        assert!(sent[0].0.is_connect_ack());
        assert_eq!(sent[0].0.session_id.as_str(), "abc");
    }

    #[test]
    fn connect_ack_establishes_connecting_session() {
        let (layer, _lower, _upper) = setup();
        let session_id = layer.create_session();
        layer.sessions.get_mut(&session_id).unwrap().state = SessionState::Connecting;

        layer.send_up(
            encoded(SessionMessageKind::ConnectAck, session_id.as_str()),
            inbound_control(),
        );
        assert!(layer.session(&session_id).unwrap().is_established());
    }

    #[test]
    fn send_data_wraps_payload_and_refreshes_activity() {
        let (layer, lower, _upper) = setup();
        let session_id = layer.establish_session(remote());
        lower.clear();

        thread::sleep(Duration::from_millis(30));
        layer.send_data(&session_id, Message::new(b"hello"));

        let sent = lower.sent();
        assert_eq!(sent.len(), 1);
        assert!(sent[0].0.is_data());
        assert_eq!(sent[0].0.payload, Message::new(b"hello"));

        let session = layer.session(&session_id).unwrap();
        assert!(session.idle_time() < Duration::from_millis(30));
        assert!(session.duration() >= Duration::from_millis(30));
    }

    #[test]
    fn send_data_is_gated_on_establishment() {
        let (layer, lower, _upper) = setup();
        let session_id = layer.create_session();

        layer.send_data(&session_id, Message::new(b"hello"));
        assert!(lower.sent().is_empty());

        layer.send_data(&"missing".into(), Message::new(b"hello"));
        assert!(lower.sent().is_empty());
    }

    #[test]
    fn inbound_data_is_forwarded_upward() {
        let (layer, _lower, upper) = setup();
        layer.send_up(
            encoded(SessionMessageKind::Connect, "abc"),
            inbound_control(),
        );

        let message = SessionMessage::with_payload(
            SessionMessageKind::Data,
            "abc".into(),
            Message::new(b"hello"),
        );
        layer.send_up(message.to_message().unwrap(), inbound_control());

        let delivered = upper.delivered();
        assert_eq!(delivered.len(), 1);
        assert_eq!(delivered[0].0, Message::new(b"hello"));
        assert_eq!(delivered[0].1.session_id, Some("abc".into()));
    }

    #[test]
    fn data_for_unknown_session_is_discarded() {
        let (layer, _lower, upper) = setup();
        let message = SessionMessage::with_payload(
            SessionMessageKind::Data,
            "nobody".into(),
            Message::new(b"hello"),
        );
        layer.send_up(message.to_message().unwrap(), inbound_control());
        assert!(upper.delivered().is_empty());
    }

    #[test]
    fn data_on_unestablished_session_is_discarded() {
        let (layer, _lower, upper) = setup();
        let session_id = layer.create_session();
        let message = SessionMessage::with_payload(
            SessionMessageKind::Data,
            session_id.clone(),
            Message::new(b"hello"),
        );
        layer.send_up(message.to_message().unwrap(), inbound_control());
        assert!(upper.delivered().is_empty());
        // The payload was dropped, not buffered for later
        layer.sessions.get_mut(&session_id).unwrap().state = SessionState::Established;
        assert!(upper.delivered().is_empty());
    }

    #[test]
    fn close_session_sends_disconnect_and_is_idempotent() {
        let (layer, lower, _upper) = setup();
        let session_id = layer.establish_session(remote());
        lower.clear();

        layer.close_session(&session_id);
        let sent = lower.sent();
        assert_eq!(sent.len(), 1);
        assert!(sent[0].0.is_disconnect());
        assert!(layer.session(&session_id).is_none());

        // Closing again is a no-op on the now stale id
        layer.close_session(&session_id);
        assert_eq!(lower.sent().len(), 1);
    }

    #[test]
    fn disconnect_acks_and_removes_session() {
        let (layer, lower, _upper) = setup();
        layer.send_up(
            encoded(SessionMessageKind::Connect, "abc"),
            inbound_control(),
        );
        lower.clear();

        layer.send_up(
            encoded(SessionMessageKind::Disconnect, "abc"),
            inbound_control(),
        );
        let sent = lower.sent();
        assert_eq!(sent.len(), 1);
        assert!(sent[0].0.is_disconnect_ack());
        assert_eq!(sent[0].0.session_id.as_str(), "abc");
        assert!(layer.session(&"abc".into()).is_none());
    }

    #[test]
    fn disconnect_ack_removes_session() {
        let (layer, _lower, _upper) = setup();
        let session_id = layer.establish_session(remote());
        layer.send_up(
            encoded(SessionMessageKind::DisconnectAck, session_id.as_str()),
            inbound_control(),
        );
        assert!(layer.session(&session_id).is_none());

        // An ack for an unknown session changes nothing
        layer.send_up(
            encoded(SessionMessageKind::DisconnectAck, "missing"),
            inbound_control(),
        );
        assert_eq!(layer.session_count(), 0);
    }

    #[test]
    fn keepalive_refreshes_activity_without_replying() {
        let (layer, lower, _upper) = setup();
        let session_id = layer.establish_session(remote());
        lower.clear();

        thread::sleep(Duration::from_millis(30));
        layer.send_up(
            encoded(SessionMessageKind::Keepalive, session_id.as_str()),
            inbound_control(),
        );

        assert!(lower.sent().is_empty());
        let session = layer.session(&session_id).unwrap();
        assert!(session.idle_time() < Duration::from_millis(30));
        assert!(session.is_established());
    }

    #[test]
    fn malformed_bytes_are_discarded() {
        let (layer, lower, upper) = setup();
        layer.send_up(Message::new(b"definitely not a session record"), inbound_control());
        assert!(lower.sent().is_empty());
        assert!(upper.delivered().is_empty());
    }

    #[test]
    fn established_sessions_never_revert_to_connecting() {
        let (layer, _lower, _upper) = setup();
        let session_id = layer.establish_session(remote());

        // A late CONNECT_ACK leaves the session established
        layer.send_up(
            encoded(SessionMessageKind::ConnectAck, session_id.as_str()),
            inbound_control(),
        );
        assert_eq!(
            layer.session(&session_id).unwrap().state,
            SessionState::Established
        );
    }

    #[test]
    fn send_down_establishes_when_given_remote_information() {
        let (layer, lower, _upper) = setup();
        layer.send_down(Message::new(b"hello"), inbound_control());

        let sent = lower.sent();
        assert_eq!(sent.len(), 2);
        assert!(sent[0].0.is_connect());
        assert!(sent[1].0.is_data());
        assert_eq!(sent[1].0.payload, Message::new(b"hello"));
        assert_eq!(layer.session_count(), 1);
    }

    #[test]
    fn send_down_without_routing_information_is_dropped() {
        let (layer, lower, _upper) = setup();
        layer.send_down(Message::new(b"hello"), Control::new());
        assert!(lower.sent().is_empty());
        assert_eq!(layer.session_count(), 0);
    }

    #[test]
    fn send_down_reuses_an_existing_session() {
        let (layer, lower, _upper) = setup();
        let session_id = layer.establish_session(remote());
        lower.clear();

        layer.send_down(
            Message::new(b"hello"),
            Control::new().with_session_id(session_id.clone()),
        );
        let sent = lower.sent();
        assert_eq!(sent.len(), 1);
        assert!(sent[0].0.is_data());
        assert_eq!(sent[0].0.session_id, session_id);
        assert_eq!(layer.session_count(), 1);
    }

    #[test]
    fn table_only_holds_live_sessions() {
        let (layer, _lower, _upper) = setup();
        let first = layer.establish_session(remote());
        layer.send_up(
            encoded(SessionMessageKind::Connect, "abc"),
            inbound_control(),
        );
        layer.close_session(&first);
        layer.send_up(
            encoded(SessionMessageKind::Disconnect, "abc"),
            inbound_control(),
        );

        let third = layer.establish_session(remote());
        assert_eq!(layer.session_count(), 1);
        for entry in layer.sessions.iter() {
            assert_ne!(entry.value().state, SessionState::Closed);
        }
        assert!(layer.session(&third).is_some());
    }
}
