//! Change notifications for whoever displays or exports an image.
//!
//! Events are derived from the command history each time an [`crate::image::Image`] syncs, and
//! delivered synchronously, in order, to every subscriber.

use crate::state::graph::{NodeID, Position};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum GraphEvent {
    /// A node appeared, either created or brought back by undo.
    NodeAdded { node: NodeID, parent: NodeID },
    NodeRemoved { node: NodeID, parent: NodeID },
    NodeMoved {
        node: NodeID,
        from: Position,
        to: Position,
    },
    /// Blend, properties, filter, style, metadata, or content of a node changed.
    NodeChanged(NodeID),
    /// Bounds or color space of the image changed. Every projection is stale.
    DocumentChanged,
    /// The cached projection of this node was dropped and should be redrawn.
    ProjectionInvalidated(NodeID),
}

pub trait GraphListener: Send {
    fn on_event(&mut self, event: &GraphEvent);
}
impl<F> GraphListener for F
where
    F: FnMut(&GraphEvent) + Send,
{
    fn on_event(&mut self, event: &GraphEvent) {
        self(event);
    }
}

pub struct SubscriptionMarker;
pub type SubscriptionID = crate::UniqueID<SubscriptionMarker>;

#[derive(Default)]
pub struct EventHub {
    listeners: Vec<(SubscriptionID, Box<dyn GraphListener>)>,
}
impl EventHub {
    pub fn subscribe(&mut self, listener: impl GraphListener + 'static) -> SubscriptionID {
        let id = SubscriptionID::default();
        self.listeners.push((id, Box::new(listener)));
        id
    }
    /// Returns `false` if there was no such subscription.
    pub fn unsubscribe(&mut self, id: SubscriptionID) -> bool {
        let before = self.listeners.len();
        self.listeners.retain(|(this, _)| *this != id);
        self.listeners.len() != before
    }
    pub fn emit(&mut self, event: &GraphEvent) {
        log::trace!("Emitting {event:?} to {} listener(s)", self.listeners.len());
        for (_, listener) in &mut self.listeners {
            listener.on_event(event);
        }
    }
    #[must_use]
    pub fn len(&self) -> usize {
        self.listeners.len()
    }
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }
}
