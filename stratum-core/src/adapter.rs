//! Undoable node edits.
//!
//! [`NodeCommandsAdapter`] is the narrow surface compound operations are built from. Every call is
//! recorded in the image's history, and may be grouped into a macro.

use crate::blend::Blend;
use crate::filter::FilterConfig;
use crate::image::Image;
use crate::metadata::MetadataStore;
use crate::state::graph::{
    Location, NodeData, NodeID, NodeKind, Position, Properties, ReparentError, TargetError,
};
use crate::style::LayerStyle;

pub struct NodeCommandsAdapter<'a> {
    image: &'a mut Image,
}
impl<'a> NodeCommandsAdapter<'a> {
    pub fn new(image: &'a mut Image) -> Self {
        Self { image }
    }
    #[must_use]
    pub fn image(&self) -> &Image {
        self.image
    }
    pub fn begin_macro(&mut self, label: impl Into<String>) {
        self.image.begin_macro(label);
    }
    pub fn end_macro(&mut self) -> bool {
        self.image.end_macro()
    }
    /// Insert `data` into `parent`, directly above the sibling `above`, or at the bottom if
    /// `None`. With `update_projection` unset, the change is not announced to subscribers.
    pub fn add_node(
        &mut self,
        data: NodeData,
        parent: NodeID,
        above: Option<NodeID>,
        update_projection: bool,
    ) -> Result<NodeID, TargetError> {
        let result = self.image.write_with_notify(update_projection, |writer| {
            writer
                .graph()
                .insert(Location::Exactly(Position { parent, above }), data)
        });
        if let Err(err) = &result {
            log::warn!("can't add node to {parent}: {err}");
        }
        result
    }
    /// Detach a node, with everything beneath it.
    pub fn remove_node(&mut self, id: NodeID) -> Result<(), TargetError> {
        self.image.write_with(|writer| writer.graph().delete(id))
    }
    pub fn move_node(
        &mut self,
        id: NodeID,
        parent: NodeID,
        above: Option<NodeID>,
    ) -> Result<(), ReparentError> {
        self.image.write_with(|writer| {
            writer
                .graph()
                .reparent(id, Location::Exactly(Position { parent, above }))
        })
    }
    pub fn set_filter(&mut self, id: NodeID, filter: Option<FilterConfig>) -> Result<(), TargetError> {
        self.image
            .write_with(|writer| writer.graph().set_filter(id, filter))
    }
    pub fn set_style(&mut self, id: NodeID, style: Option<LayerStyle>) -> Result<(), TargetError> {
        self.image
            .write_with(|writer| writer.graph().set_style(id, style))
    }
    pub fn set_blend(&mut self, id: NodeID, blend: Blend) -> Result<(), TargetError> {
        self.image
            .write_with(|writer| writer.graph().set_blend(id, blend))
    }
    pub fn set_properties(&mut self, id: NodeID, properties: Properties) -> Result<(), TargetError> {
        self.image
            .write_with(|writer| writer.graph().set_properties(id, properties))
    }
    pub fn set_name(&mut self, id: NodeID, name: impl Into<String>) -> Result<(), TargetError> {
        let name = name.into();
        self.image
            .write_with(|writer| writer.graph().set_name(id, name))
    }
    pub fn set_metadata(&mut self, id: NodeID, metadata: MetadataStore) -> Result<(), TargetError> {
        self.image
            .write_with(|writer| writer.graph().set_metadata(id, metadata))
    }
    pub fn set_content(&mut self, id: NodeID, kind: NodeKind) -> Result<(), TargetError> {
        self.image
            .write_with(|writer| writer.graph().set_content(id, kind))
    }
    /// Revert the most recent command or macro, leaving no trace of it in the history.
    pub fn undo_last_command(&mut self) -> bool {
        self.image.retract_last()
    }
    /// Take back a node the most recent command added. Inside someone else's macro that command
    /// can't be retracted by itself, so the node is removed instead.
    pub fn retract_node(&mut self, node: NodeID) -> bool {
        if self.undo_last_command() {
            return true;
        }
        log::debug!("can't retract the command that added {node}, removing it");
        match self.remove_node(node) {
            Ok(()) => true,
            Err(err) => {
                log::error!("can't discard {node}: {err}");
                false
            }
        }
    }
    /// Close the macro opened for an operation. If the operation failed, whatever it wrote is
    /// taken back, unless an enclosing macro already owns those commands.
    pub fn end_macro_or_rollback<T, E: std::fmt::Display>(
        &mut self,
        result: Result<T, E>,
    ) -> Result<T, E> {
        let written = self.end_macro();
        if let Err(err) = &result {
            if written {
                log::warn!("rolling back: {err}");
                self.undo_last_command();
            } else if self.image.in_macro() {
                log::warn!("{err}, leaving partial edits to the enclosing macro");
            }
        }
        result
    }
    pub fn undo(&mut self) -> bool {
        self.image.undo()
    }
    pub fn redo(&mut self) -> bool {
        self.image.redo()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::raster::{Raster, Rect};

    fn paint(name: &str) -> NodeData {
        NodeData::new(name, NodeKind::paint(Raster::transparent(Rect::EMPTY)))
    }

    #[test]
    fn rejected_add_writes_nothing() {
        let mut image = Image::default();
        let root = image.root();
        let mut adapter = NodeCommandsAdapter::new(&mut image);
        let layer = adapter.add_node(paint("a"), root, None, true).unwrap();
        assert_eq!(
            adapter.add_node(paint("b"), layer, None, true),
            Err(TargetError::Rejected)
        );
        assert_eq!(adapter.image().history_depth(), 1);
    }
    #[test]
    fn move_undo_restores_exact_spot() {
        let mut image = Image::default();
        let root = image.root();
        let mut adapter = NodeCommandsAdapter::new(&mut image);
        let a = adapter.add_node(paint("a"), root, None, true).unwrap();
        let b = adapter.add_node(paint("b"), root, Some(a), true).unwrap();
        let c = adapter.add_node(paint("c"), root, Some(b), true).unwrap();
        adapter.remove_node(b).unwrap();
        adapter.move_node(a, root, Some(c)).unwrap();
        let order = |adapter: &NodeCommandsAdapter<'_>| {
            adapter.image().read().graph.children(root).collect::<Vec<_>>()
        };
        assert_eq!(order(&adapter), [c, a]);
        assert!(adapter.undo());
        assert!(adapter.undo());
        assert_eq!(order(&adapter), [a, b, c]);
        assert!(adapter.redo());
        assert!(adapter.redo());
        assert_eq!(order(&adapter), [c, a]);
    }
    #[test]
    fn macro_undoes_as_one() {
        let mut image = Image::default();
        let root = image.root();
        let mut adapter = NodeCommandsAdapter::new(&mut image);
        adapter.begin_macro("outer");
        let a = adapter.add_node(paint("a"), root, None, true).unwrap();
        adapter.begin_macro("inner");
        adapter.set_name(a, "renamed").unwrap();
        assert!(!adapter.end_macro());
        assert!(adapter.end_macro());
        assert_eq!(adapter.image().history_depth(), 1);
        assert!(adapter.undo());
        assert!(adapter.image().read().graph.is_empty());
        // Empty macros leave nothing behind.
        adapter.begin_macro("nothing");
        assert!(!adapter.end_macro());
        assert_eq!(adapter.image().history_depth(), 0);
    }
    #[test]
    fn failed_operation_rolls_back_its_macro() {
        let mut image = Image::default();
        let root = image.root();
        let mut adapter = NodeCommandsAdapter::new(&mut image);
        let kept = adapter.add_node(paint("kept"), root, None, true).unwrap();
        adapter.begin_macro("half done");
        let added = adapter.add_node(paint("added"), root, Some(kept), true).unwrap();
        let result = adapter.remove_node(root);
        assert_eq!(
            adapter.end_macro_or_rollback(result),
            Err(TargetError::WrongKind)
        );
        assert_eq!(adapter.image().history_depth(), 1);
        let state = adapter.image().read();
        assert!(state.graph.get(added).is_none());
        assert!(state.graph.get(kept).is_some());
    }
    #[test]
    fn nested_node_is_removed_when_it_cant_be_retracted() {
        let mut image = Image::default();
        let root = image.root();
        let mut adapter = NodeCommandsAdapter::new(&mut image);
        adapter.begin_macro("outer");
        let node = adapter.add_node(paint("a"), root, None, true).unwrap();
        assert!(adapter.retract_node(node));
        assert!(adapter.image().read().graph.get(node).is_none());
        assert!(adapter.end_macro());
        assert!(adapter.undo());
        assert!(adapter.image().read().graph.is_empty());
    }
}
