//! Per-session state tracked by the [`SessionLayer`](super::SessionLayer).

use crate::utility::Endpoint;
use rustc_hash::FxHashMap;
use std::fmt::{self, Display};
use std::time::{Duration, Instant};
use uuid::Uuid;

/// A unique identifier correlating a [`Session`] with the protocol messages
/// that belong to it.
///
/// Identifiers are generated randomly for sessions opened locally and adopted
/// verbatim for sessions accepted from a peer.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SessionId(String);

impl SessionId {
    /// Generates a fresh random identifier.
    pub fn random() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// The identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for SessionId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<&str> for SessionId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

/// The lifecycle state of a [`Session`].
///
/// The variants are ordered by how far along the lifecycle a session is, but
/// transitions are driven individually by the controller rather than by
/// stepping through the sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum SessionState {
    #[default]
    Closed,
    Connecting,
    Established,
    Disconnecting,
}

/// A value stored in a session's data bag.
///
/// Outer layers stash session-scoped context here, such as negotiated
/// parameters. The closed set of variants keeps the bag inspectable without
/// downcasting.
#[derive(Debug, Clone, PartialEq)]
pub enum DataValue {
    Bool(bool),
    Integer(i64),
    Text(String),
    Bytes(Vec<u8>),
}

impl From<bool> for DataValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i64> for DataValue {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

impl From<&str> for DataValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for DataValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<Vec<u8>> for DataValue {
    fn from(value: Vec<u8>) -> Self {
        Self::Bytes(value)
    }
}

/// A communication session between two endpoints.
///
/// A session is a logical, stateful channel identified by a unique id,
/// independent of the lifecycle of the underlying transport connection. The
/// controller creates sessions, drives their state as protocol messages are
/// processed, and removes them when teardown completes.
#[derive(Debug, Clone)]
pub struct Session {
    id: SessionId,
    /// The current lifecycle state.
    pub state: SessionState,
    /// The remote endpoint this session is bound to, once known.
    pub remote: Option<Endpoint>,
    created_at: Instant,
    last_activity: Instant,
    data: FxHashMap<String, DataValue>,
}

impl Session {
    /// Creates a session with a freshly generated identifier.
    pub fn new() -> Self {
        Self::with_id(SessionId::random())
    }

    /// Creates a session adopting the identifier supplied by a peer.
    pub fn with_id(id: SessionId) -> Self {
        let now = Instant::now();
        Self {
            id,
            state: SessionState::Closed,
            remote: None,
            created_at: now,
            last_activity: now,
            data: FxHashMap::default(),
        }
    }

    /// The session's identifier.
    pub fn id(&self) -> &SessionId {
        &self.id
    }

    /// Whether the session is established and eligible to carry data.
    pub fn is_established(&self) -> bool {
        self.state == SessionState::Established
    }

    /// Refreshes the last-activity clock. Called on every send or receive
    /// touching this session.
    pub fn update_activity(&mut self) {
        self.last_activity = Instant::now();
    }

    /// How long the session has existed.
    pub fn duration(&self) -> Duration {
        self.created_at.elapsed()
    }

    /// How long since the session last carried traffic.
    pub fn idle_time(&self) -> Duration {
        self.last_activity.elapsed()
    }

    /// Stores a value in the session's data bag. Last write wins.
    pub fn set_data(&mut self, key: impl Into<String>, value: impl Into<DataValue>) {
        self.data.insert(key.into(), value.into());
    }

    /// Reads a value from the session's data bag.
    pub fn get_data(&self, key: &str) -> Option<&DataValue> {
        self.data.get(key)
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}
