//! The [`Layer`] trait and supporting types.

use crate::{Control, Message};
use std::sync::{Arc, RwLock};

/// A shared handle to a [`Layer`].
pub type SharedLayer = Arc<dyn Layer + Send + Sync + 'static>;

/// A member of the layered protocol stack.
///
/// A layer accepts payloads from its upper neighbor, applies its own
/// processing, and forwards the result downward, and performs the inverse on
/// the way up. Both entry points are fire-and-forget: a layer that cannot
/// process a unit of traffic reports the problem through its own logging and
/// discards the unit rather than surfacing an error to its neighbor.
pub trait Layer: Send + Sync + 'static {
    /// The display name of the layer.
    fn name(&self) -> &'static str;

    /// Takes a payload from the upper neighbor, applies this layer's
    /// processing, and forwards the result to the lower neighbor.
    fn send_down(&self, message: Message, control: Control);

    /// Takes inbound bytes from the lower neighbor, unwraps this layer's
    /// processing, and forwards the result to the upper neighbor.
    fn send_up(&self, message: Message, control: Control);
}

/// The optional upper and lower neighbors of a layer.
///
/// Neighbors are set once during stack assembly. Forwarding to an absent
/// neighbor is a quiet no-op so that a single layer can be exercised on its
/// own.
#[derive(Default)]
pub struct Neighbors {
    upper: RwLock<Option<SharedLayer>>,
    lower: RwLock<Option<SharedLayer>>,
}

impl Neighbors {
    /// Creates an empty pair of neighbor slots.
    pub fn new() -> Self {
        Default::default()
    }

    /// Sets the upper neighbor.
    pub fn set_upper(&self, layer: SharedLayer) {
        *self.upper.write().unwrap() = Some(layer);
    }

    /// Sets the lower neighbor.
    pub fn set_lower(&self, layer: SharedLayer) {
        *self.lower.write().unwrap() = Some(layer);
    }

    /// Forwards a payload to the lower neighbor, if one is attached.
    pub fn down(&self, message: Message, control: Control) {
        let lower = self.lower.read().unwrap().clone();
        match lower {
            Some(lower) => lower.send_down(message, control),
            None => tracing::debug!("no lower layer attached, dropping {} bytes", message.len()),
        }
    }

    /// Forwards a payload to the upper neighbor, if one is attached.
    pub fn up(&self, message: Message, control: Control) {
        let upper = self.upper.read().unwrap().clone();
        match upper {
            Some(upper) => upper.send_up(message, control),
            None => tracing::debug!("no upper layer attached, dropping {} bytes", message.len()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct Recorder {
        seen: Mutex<Vec<Message>>,
    }

    impl Layer for Recorder {
        fn name(&self) -> &'static str {
            "recorder"
        }

        fn send_down(&self, message: Message, _control: Control) {
            self.seen.lock().unwrap().push(message);
        }

        fn send_up(&self, message: Message, _control: Control) {
            self.seen.lock().unwrap().push(message);
        }
    }

    #[test]
    fn forwards_to_attached_neighbor() {
        let recorder = Arc::new(Recorder {
            seen: Mutex::new(Vec::new()),
        });
        let neighbors = Neighbors::new();
        neighbors.set_lower(recorder.clone());
        neighbors.down(Message::new(b"abc"), Control::new());
        assert_eq!(recorder.seen.lock().unwrap().len(), 1);
    }

    #[test]
    fn missing_neighbor_is_a_no_op() {
        let neighbors = Neighbors::new();
        neighbors.down(Message::new(b"abc"), Control::new());
        neighbors.up(Message::new(b"abc"), Control::new());
    }
}
