//! A simulation of the OSI seven-layer reference model, for exploring how
//! application data is encapsulated, transmitted, and decapsulated as it
//! travels down one protocol stack and up another.
//!
//! # Uses
//!
//! - Educators can use the simulation as a pedagogical tool. Students can
//!   watch a request get framed, addressed, segmented, and wrapped in session
//!   control messages, then unwound step by step on the receiving side.
//! - Each layer is small enough to read in one sitting and swap out for an
//!   experimental replacement.
//!
//! # Organization
//!
//! - [`Message`] and [`Control`] provide basic utilities common to all layers
//! - [`Layer`] is the seam every layer implements
//! - [`layers`] contains the seven layer implementations, with the session
//!   layer ([`layers::session`]) carrying the richest state machine
//! - [`Stack`] assembles one complete stack for a client or server role
//!
//! # Layer structure
//!
//! A layer receives payloads from its upper neighbor through
//! [`send_down`](Layer::send_down), wraps them in its own header record, and
//! forwards the result to its lower neighbor. Inbound traffic arrives through
//! [`send_up`](Layer::send_up), is unwrapped, and continues upward. Both
//! neighbors are optional; a layer with a missing neighbor quietly drops
//! traffic at that edge, which makes single layers easy to exercise in
//! isolation.

pub mod control;
pub use control::Control;

pub mod message;
pub use message::Message;

pub mod layer;
pub use layer::{Layer, SharedLayer};

pub mod layers;

pub mod stack;
pub use stack::{Role, Stack};

pub mod utility;

/// A [`DashMap`](dashmap::DashMap) with the fast, non-cryptographic FxHasher.
pub type FxDashMap<K, V> =
    dashmap::DashMap<K, V, std::hash::BuildHasherDefault<rustc_hash::FxHasher>>;
