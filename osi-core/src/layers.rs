//! The seven layers of the simulated stack.
//!
//! Layers are listed bottom to top. Each module contains one layer plus the
//! wire records and supporting types it owns. The session layer carries the
//! largest state machine and is the heart of the simulation.

pub mod physical;
pub use physical::PhysicalLayer;

pub mod datalink;
pub use datalink::DataLinkLayer;

pub mod network;
pub use network::NetworkLayer;

pub mod transport;
pub use transport::TransportLayer;

pub mod session;
pub use session::SessionLayer;

pub mod presentation;
pub use presentation::PresentationLayer;

pub mod application;
pub use application::ApplicationLayer;
