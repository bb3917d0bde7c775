//! Glue between [`NodeID`]s and `id_tree::NodeId`s. Tree ids are an arena detail, node ids are
//! what commands, the cache, and callers hold on to.

pub(super) type RawNodeID = crate::UniqueID<id_tree::NodeId>;

/// Identity of one layer or mask. Stays valid while the node is tombstoned, for as long as the
/// history refers to it.
#[derive(Copy, Clone, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct NodeID(pub(super) RawNodeID);
impl std::fmt::Debug for NodeID {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Node#{}", self.0.id())
    }
}
impl std::fmt::Display for NodeID {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Debug::fmt(self, f)
    }
}

#[derive(Default)]
pub(super) struct StableIDMap {
    node_to_tree: hashbrown::HashMap<NodeID, id_tree::NodeId>,
    tree_to_node: hashbrown::HashMap<id_tree::NodeId, NodeID>,
}
impl StableIDMap {
    pub fn tree_id(&self, node: NodeID) -> Option<&id_tree::NodeId> {
        self.node_to_tree.get(&node)
    }
    pub fn node_id(&self, tree: &id_tree::NodeId) -> Option<NodeID> {
        self.tree_to_node.get(tree).copied()
    }
    /// Allocate a fresh [`NodeID`] for a tree id.
    pub fn insert(&mut self, tree: id_tree::NodeId) -> NodeID {
        let id = NodeID(RawNodeID::default());
        self.node_to_tree.insert(id, tree.clone());
        self.tree_to_node.insert(tree, id);
        id
    }
    pub fn erase(&mut self, node: NodeID) {
        if let Some(tree) = self.node_to_tree.remove(&node) {
            let _ = self.tree_to_node.remove(&tree);
        }
    }
    pub fn len(&self) -> usize {
        self.node_to_tree.len()
    }
}
