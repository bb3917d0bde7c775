use super::{NodeID, NodeKind, Position, Properties};
use crate::blend::Blend;
use crate::filter::FilterConfig;
use crate::metadata::MetadataStore;
use crate::style::LayerStyle;

#[derive(Clone, Debug)]
pub enum Command {
    /// The node was inserted at `position`. Undo tombstones it in place.
    NodeCreated {
        target: NodeID,
        position: Position,
    },
    /// The node was removed from `position`. It stays in place as a tombstone.
    NodeDeleted {
        target: NodeID,
        position: Position,
    },
    Reparent {
        target: NodeID,
        from: Position,
        to: Position,
    },
    BlendChanged {
        target: NodeID,
        from: Blend,
        to: Blend,
    },
    PropertiesChanged {
        target: NodeID,
        from: Properties,
        to: Properties,
    },
    FilterChanged {
        target: NodeID,
        from: Option<FilterConfig>,
        to: Option<FilterConfig>,
    },
    StyleChanged {
        target: NodeID,
        from: Option<LayerStyle>,
        to: Option<LayerStyle>,
    },
    MetadataChanged {
        target: NodeID,
        from: MetadataStore,
        to: MetadataStore,
    },
    /// Content replaced wholesale, e.g. by a crop or rotation.
    ContentChanged {
        target: NodeID,
        from: Box<NodeKind>,
        to: Box<NodeKind>,
    },
}
impl Command {
    #[must_use]
    pub fn target(&self) -> NodeID {
        match self {
            Self::NodeCreated { target, .. }
            | Self::NodeDeleted { target, .. }
            | Self::Reparent { target, .. }
            | Self::BlendChanged { target, .. }
            | Self::PropertiesChanged { target, .. }
            | Self::FilterChanged { target, .. }
            | Self::StyleChanged { target, .. }
            | Self::MetadataChanged { target, .. }
            | Self::ContentChanged { target, .. } => *target,
        }
    }
}
