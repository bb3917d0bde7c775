//! # Graph
//!
//! The layers of an image form a tree. Groups (and the root) hold layers and masks, layers hold
//! only masks, masks hold nothing. Children are ordered by stacking: index 0 is the bottom.
//!
//! Removed nodes are not dropped from the tree. They are marked deleted and stay exactly where
//! they were, so that undo can bring them back to the same spot. Every public accessor hides
//! them.

pub mod commands;
mod node;
mod stable_id;
pub mod writer;

pub use node::{FileLayer, FileScaling, NodeData, NodeFlags, NodeKind, Properties, Shape};
pub use stable_id::NodeID;

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum TargetError {
    #[error("ID not found")]
    TargetNotFound,
    #[error("target ID is deleted")]
    TargetDeleted,
    #[error("parent does not accept this node as a child")]
    Rejected,
    #[error("operation does not apply to this kind of node")]
    WrongKind,
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ReparentError {
    #[error("target not found: {}", .0)]
    TargetError(TargetError),
    #[error("destination not found: {}", .0)]
    DestinationError(TargetError),
    #[error("can't reparent to the node's own [grand]children")]
    WouldCycle,
}

/// Exact placement among the children of `parent`, deleted siblings included.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct Position {
    pub parent: NodeID,
    /// The sibling directly beneath, or `None` for the bottom of the stack.
    pub above: Option<NodeID>,
}

/// A place to put a node, relative to what's in the graph now.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Location {
    /// Directly above this sibling, within its parent.
    Above(NodeID),
    /// Directly beneath this sibling, within its parent.
    Below(NodeID),
    /// Bottom of this parent's stack.
    Bottom(NodeID),
    /// Top of this parent's stack.
    Top(NodeID),
    Exactly(Position),
}

/// One row of [`LayerGraph::outline`].
#[derive(Clone, Debug, PartialEq)]
pub struct OutlineEntry {
    pub depth: usize,
    pub id: NodeID,
    pub data: NodeData,
}

pub struct LayerGraph {
    tree: id_tree::Tree<NodeData>,
    ids: stable_id::StableIDMap,
    root: NodeID,
}
impl Default for LayerGraph {
    fn default() -> Self {
        let mut tree = id_tree::TreeBuilder::new().build();
        let mut ids = stable_id::StableIDMap::default();
        // Unwrap ok - inserting a root into an empty tree can't fail.
        let root_tree_id = tree
            .insert(
                id_tree::Node::new(NodeData::new("root", NodeKind::group())),
                id_tree::InsertBehavior::AsRoot,
            )
            .unwrap();
        let root = ids.insert(root_tree_id);
        Self { tree, ids, root }
    }
}
impl LayerGraph {
    /// The root group. Never deleted, never moved.
    #[must_use]
    pub fn root(&self) -> NodeID {
        self.root
    }
    fn raw(&self, id: NodeID) -> Option<&NodeData> {
        let tree_id = self.ids.tree_id(id)?;
        self.tree.get(tree_id).ok().map(id_tree::Node::data)
    }
    fn raw_mut(&mut self, id: NodeID) -> Option<&mut NodeData> {
        let tree_id = self.ids.tree_id(id)?;
        self.tree.get_mut(tree_id).ok().map(id_tree::Node::data_mut)
    }
    /// Whether the node is in the graph, and neither it nor any ancestor is deleted.
    #[must_use]
    pub fn is_live(&self, id: NodeID) -> bool {
        std::iter::once(id)
            .chain(self.ancestors(id))
            .all(|id| self.raw(id).is_some_and(|data| !data.deleted))
    }
    /// Data of a live node.
    #[must_use]
    pub fn get(&self, id: NodeID) -> Option<&NodeData> {
        if self.is_live(id) {
            self.raw(id)
        } else {
            None
        }
    }
    /// Parent of the node, or `None` for the root. Also answers for deleted nodes.
    #[must_use]
    pub fn parent(&self, id: NodeID) -> Option<NodeID> {
        let tree_id = self.ids.tree_id(id)?;
        let parent = self.tree.get(tree_id).ok()?.parent()?;
        self.ids.node_id(parent)
    }
    /// Parent, grandparent, and so on up to the root.
    pub fn ancestors(&self, id: NodeID) -> impl Iterator<Item = NodeID> + '_ {
        std::iter::successors(self.parent(id), move |&id| self.parent(id))
    }
    #[must_use]
    pub fn is_ancestor(&self, ancestor: NodeID, of: NodeID) -> bool {
        self.ancestors(of).any(|id| id == ancestor)
    }
    /// Children bottom to top, deleted ones included.
    pub(crate) fn raw_children(&self, id: NodeID) -> impl Iterator<Item = NodeID> + '_ {
        self.ids
            .tree_id(id)
            .and_then(|tree_id| self.tree.children_ids(tree_id).ok())
            .into_iter()
            .flatten()
            .filter_map(|tree_id| self.ids.node_id(tree_id))
    }
    /// Live children, bottom to top.
    pub fn children(&self, id: NodeID) -> impl Iterator<Item = NodeID> + '_ {
        self.raw_children(id)
            .filter(|&child| self.raw(child).is_some_and(|data| !data.deleted))
    }
    /// The live sibling directly beneath.
    #[must_use]
    pub fn below(&self, id: NodeID) -> Option<NodeID> {
        let parent = self.parent(id)?;
        self.children(parent)
            .take_while(|&child| child != id)
            .last()
    }
    /// The live sibling directly above.
    #[must_use]
    pub fn above(&self, id: NodeID) -> Option<NodeID> {
        let parent = self.parent(id)?;
        self.children(parent)
            .skip_while(|&child| child != id)
            .nth(1)
    }
    /// Every live node beneath `id`, depth first, each parent before its children.
    #[must_use]
    pub fn descendants(&self, id: NodeID) -> Vec<NodeID> {
        let mut out = Vec::new();
        let mut stack: Vec<NodeID> = self.children(id).collect();
        stack.reverse();
        while let Some(next) = stack.pop() {
            out.push(next);
            let first = stack.len();
            stack.extend(self.children(next));
            stack[first..].reverse();
        }
        out
    }
    /// Every live node except the root, depth first, bottom to top.
    pub fn iter(&self) -> impl Iterator<Item = (NodeID, &NodeData)> + '_ {
        self.descendants(self.root)
            .into_iter()
            .filter_map(|id| Some((id, self.raw(id)?)))
    }
    /// Number of live nodes, root excluded.
    #[must_use]
    pub fn len(&self) -> usize {
        self.descendants(self.root).len()
    }
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.children(self.root).next().is_none()
    }
    /// Structural dump of the live tree, for comparing states.
    #[must_use]
    pub fn outline(&self) -> Vec<OutlineEntry> {
        self.iter()
            .map(|(id, data)| OutlineEntry {
                depth: self.ancestors(id).count(),
                id,
                data: data.clone(),
            })
            .collect()
    }
    /// Current placement of a node, deleted or not.
    #[must_use]
    pub fn position_of(&self, id: NodeID) -> Option<Position> {
        let parent = self.parent(id)?;
        let above = self
            .raw_children(parent)
            .take_while(|&child| child != id)
            .last();
        Some(Position { parent, above })
    }
    /// Whether `parent` is live and would accept a child of this kind.
    #[must_use]
    pub fn allow_as_child(&self, parent: NodeID, kind: &NodeKind) -> bool {
        self.get(parent)
            .is_some_and(|data| data.kind().allows_as_child(kind))
    }
    /// Live clones whose source is `source`.
    #[must_use]
    pub fn clones_of(&self, source: NodeID) -> Vec<NodeID> {
        self.iter()
            .filter(|(_, data)| matches!(data.kind(), NodeKind::Clone { source: s } if *s == source))
            .map(|(id, _)| id)
            .collect()
    }
    fn check_live(&self, id: NodeID) -> Result<(), TargetError> {
        match self.raw(id) {
            None => Err(TargetError::TargetNotFound),
            Some(_) if !self.is_live(id) => Err(TargetError::TargetDeleted),
            Some(_) => Ok(()),
        }
    }
    /// Convert a location into an exact position. The parent is always live.
    pub fn resolve(&self, location: Location) -> Result<Position, TargetError> {
        let position = match location {
            Location::Above(sibling) => {
                self.check_live(sibling)?;
                Position {
                    parent: self.parent(sibling).ok_or(TargetError::WrongKind)?,
                    above: Some(sibling),
                }
            }
            Location::Below(sibling) => {
                self.check_live(sibling)?;
                self.position_of(sibling).ok_or(TargetError::WrongKind)?
            }
            Location::Bottom(parent) => Position {
                parent,
                above: None,
            },
            Location::Top(parent) => Position {
                parent,
                above: self.raw_children(parent).last(),
            },
            Location::Exactly(position) => position,
        };
        self.check_live(position.parent)?;
        Ok(position)
    }
    /// Tree id of the parent, and the child index a node inserted at `position` should take.
    /// The node itself must not be among the parent's children before `above`.
    fn slot_of(&self, position: Position) -> Result<(id_tree::NodeId, usize), TargetError> {
        let parent = self
            .ids
            .tree_id(position.parent)
            .ok_or(TargetError::TargetNotFound)?
            .clone();
        let idx = match position.above {
            None => 0,
            Some(above) => {
                self.raw_children(position.parent)
                    .position(|child| child == above)
                    .ok_or(TargetError::TargetNotFound)?
                    + 1
            }
        };
        Ok((parent, idx))
    }
    /// Insert a new node. Fails if the parent does not accept it.
    pub fn insert(&mut self, location: Location, mut data: NodeData) -> Result<NodeID, TargetError> {
        let position = self.resolve(location)?;
        if !self.allow_as_child(position.parent, data.kind()) {
            return Err(TargetError::Rejected);
        }
        let (parent, idx) = self.slot_of(position)?;
        data.deleted = false;
        let new = self
            .tree
            .insert(
                id_tree::Node::new(data),
                id_tree::InsertBehavior::UnderNode(&parent),
            )
            .map_err(|_| TargetError::TargetNotFound)?;
        // Unwrap ok - just inserted, and idx is at most the old child count.
        self.tree.make_nth_sibling(&new, idx).unwrap();
        Ok(self.ids.insert(new))
    }
    /// Move a live node, bringing its children along.
    pub fn reparent(&mut self, target: NodeID, location: Location) -> Result<(), ReparentError> {
        if target == self.root {
            return Err(ReparentError::TargetError(TargetError::WrongKind));
        }
        self.check_live(target)
            .map_err(ReparentError::TargetError)?;
        let position = self
            .resolve(location)
            .map_err(ReparentError::DestinationError)?;
        if position.above == Some(target) {
            // Already right there.
            return Ok(());
        }
        if position.parent == target || self.is_ancestor(target, position.parent) {
            return Err(ReparentError::WouldCycle);
        }
        let kind_ok = self
            .raw(target)
            .is_some_and(|data| self.allow_as_child(position.parent, data.kind()));
        if !kind_ok {
            return Err(ReparentError::DestinationError(TargetError::Rejected));
        }
        // Ok - checked above.
        let target_tree_id = self
            .ids
            .tree_id(target)
            .ok_or(ReparentError::TargetError(TargetError::TargetNotFound))?
            .clone();
        let parent_tree_id = self
            .ids
            .tree_id(position.parent)
            .ok_or(ReparentError::DestinationError(TargetError::TargetNotFound))?
            .clone();
        // Check the sibling before touching anything.
        if let Some(above) = position.above {
            if self.parent(above) != Some(position.parent) {
                return Err(ReparentError::DestinationError(TargetError::TargetNotFound));
            }
        }
        self.tree
            .move_node(
                &target_tree_id,
                id_tree::MoveBehavior::ToParent(&parent_tree_id),
            )
            .map_err(|_| ReparentError::DestinationError(TargetError::TargetNotFound))?;
        // The target is now the last child, so it doesn't shift the index of `above`.
        let (_, idx) = self
            .slot_of(position)
            .map_err(ReparentError::DestinationError)?;
        // Unwrap ok - target was just moved under this parent.
        self.tree.make_nth_sibling(&target_tree_id, idx).unwrap();
        Ok(())
    }
    /// Drop a node and everything beneath it from the arena for good. Only for nodes no
    /// remaining command refers to.
    pub(crate) fn purge(&mut self, id: NodeID) {
        if id == self.root {
            return;
        }
        let Some(tree_id) = self.ids.tree_id(id).cloned() else {
            return;
        };
        let doomed: Vec<NodeID> = self
            .tree
            .traverse_pre_order_ids(&tree_id)
            .into_iter()
            .flatten()
            .filter_map(|tree_id| self.ids.node_id(&tree_id))
            .collect();
        if self
            .tree
            .remove_node(tree_id, id_tree::RemoveBehavior::DropChildren)
            .is_ok()
        {
            for id in doomed {
                self.ids.erase(id);
            }
        }
    }
    /// Number of nodes in the arena, deleted ones and the root included.
    #[must_use]
    pub fn arena_len(&self) -> usize {
        self.ids.len()
    }
}

impl crate::commands::CommandConsumer<commands::Command> for LayerGraph {
    fn apply(
        &mut self,
        command: crate::commands::DoUndo<'_, commands::Command>,
    ) -> Result<(), crate::commands::CommandError> {
        use crate::commands::{CommandError, DoUndo};
        use commands::Command;

        // Fetch a node that is not itself marked deleted.
        fn present(graph: &mut LayerGraph, id: NodeID) -> Result<&mut NodeData, CommandError> {
            let node = graph.raw_mut(id).ok_or(CommandError::UnknownResource)?;
            if node.deleted {
                Err(CommandError::MismatchedState)
            } else {
                Ok(node)
            }
        }

        match command {
            DoUndo::Do(Command::NodeCreated { target, position })
            | DoUndo::Undo(Command::NodeDeleted { target, position }) => {
                // Only reachable by redo, or undo of a removal. Lift the tombstone.
                if self.position_of(*target) != Some(*position) {
                    return Err(CommandError::MismatchedState);
                }
                let node = self.raw_mut(*target).ok_or(CommandError::UnknownResource)?;
                if !node.deleted {
                    return Err(CommandError::MismatchedState);
                }
                node.deleted = false;
                Ok(())
            }
            DoUndo::Undo(Command::NodeCreated { target, position })
            | DoUndo::Do(Command::NodeDeleted { target, position }) => {
                if self.position_of(*target) != Some(*position) {
                    return Err(CommandError::MismatchedState);
                }
                present(self, *target)?.deleted = true;
                Ok(())
            }
            DoUndo::Do(Command::Reparent { target, from, to })
            | DoUndo::Undo(Command::Reparent {
                target,
                from: to,
                to: from,
            }) => {
                present(self, *target)?;
                if self.position_of(*target) != Some(*from) {
                    return Err(CommandError::MismatchedState);
                }
                match self.reparent(*target, Location::Exactly(*to)) {
                    Ok(()) => Ok(()),
                    Err(
                        ReparentError::TargetError(TargetError::TargetNotFound)
                        | ReparentError::DestinationError(TargetError::TargetNotFound),
                    ) => Err(CommandError::UnknownResource),
                    Err(_) => Err(CommandError::MismatchedState),
                }
            }
            DoUndo::Do(Command::BlendChanged { target, from, to })
            | DoUndo::Undo(Command::BlendChanged {
                target,
                from: to,
                to: from,
            }) => {
                let blend = present(self, *target)?.blend_mut();
                if blend != from {
                    return Err(CommandError::MismatchedState);
                }
                *blend = *to;
                Ok(())
            }
            DoUndo::Do(Command::PropertiesChanged { target, from, to })
            | DoUndo::Undo(Command::PropertiesChanged {
                target,
                from: to,
                to: from,
            }) => {
                let node = present(self, *target)?;
                if node.properties() != *from {
                    return Err(CommandError::MismatchedState);
                }
                node.set_properties(to.clone());
                Ok(())
            }
            DoUndo::Do(Command::FilterChanged { target, from, to })
            | DoUndo::Undo(Command::FilterChanged {
                target,
                from: to,
                to: from,
            }) => {
                let Some(filter) = present(self, *target)?.kind_mut().filter_mut() else {
                    return Err(CommandError::MismatchedState);
                };
                if filter != from {
                    return Err(CommandError::MismatchedState);
                }
                filter.clone_from(to);
                Ok(())
            }
            DoUndo::Do(Command::StyleChanged { target, from, to })
            | DoUndo::Undo(Command::StyleChanged {
                target,
                from: to,
                to: from,
            }) => {
                let style = present(self, *target)?.style_mut();
                if style != from {
                    return Err(CommandError::MismatchedState);
                }
                style.clone_from(to);
                Ok(())
            }
            DoUndo::Do(Command::MetadataChanged { target, from, to })
            | DoUndo::Undo(Command::MetadataChanged {
                target,
                from: to,
                to: from,
            }) => {
                let metadata = present(self, *target)?.metadata_mut();
                if metadata != from {
                    return Err(CommandError::MismatchedState);
                }
                metadata.clone_from(to);
                Ok(())
            }
            DoUndo::Do(Command::ContentChanged { target, from, to })
            | DoUndo::Undo(Command::ContentChanged {
                target,
                from: to,
                to: from,
            }) => {
                // The new kind must still fit where the node sits and what it holds.
                let parent_ok = self
                    .parent(*target)
                    .and_then(|parent| self.raw(parent))
                    .is_some_and(|parent| parent.kind().allows_as_child(to));
                let children_ok = self
                    .children(*target)
                    .filter_map(|child| self.raw(child))
                    .all(|child| to.allows_as_child(child.kind()));
                let kind = present(self, *target)?.kind_mut();
                if *kind != **from || !parent_ok || !children_ok {
                    return Err(CommandError::MismatchedState);
                }
                *kind = (**to).clone();
                Ok(())
            }
        }
    }
}
