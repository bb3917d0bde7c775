use super::commands::Command;
use super::{
    LayerGraph, Location, NodeData, NodeID, NodeKind, Properties, ReparentError, TargetError,
};
use crate::blend::Blend;
use crate::commands::{CommandConsumer, CommandError, DoUndo};
use crate::filter::FilterConfig;
use crate::metadata::MetadataStore;
use crate::queue::writer::CommandWrite;
use crate::style::LayerStyle;

/// Mutates a graph, recording a command for every change made.
pub struct GraphWriter<'a, Write: CommandWrite<Command>> {
    writer: Write,
    graph: &'a mut LayerGraph,
}
impl<'a, Write: CommandWrite<Command>> std::ops::Deref for GraphWriter<'a, Write> {
    type Target = LayerGraph;
    fn deref(&self) -> &Self::Target {
        self.graph
    }
}
impl<'a, Write: CommandWrite<Command>> GraphWriter<'a, Write> {
    pub fn new(writer: Write, graph: &'a mut LayerGraph) -> Self {
        Self { writer, graph }
    }
    /// Apply and record. Nothing is recorded if it fails.
    fn commit(&mut self, command: Command) -> Result<(), CommandError> {
        self.graph.apply(DoUndo::Do(&command))?;
        self.writer.write(command);
        Ok(())
    }
    fn live(&self, id: NodeID) -> Result<&NodeData, TargetError> {
        self.graph.get(id).ok_or(if self.graph.position_of(id).is_some() {
            TargetError::TargetDeleted
        } else {
            TargetError::TargetNotFound
        })
    }
    pub fn insert(&mut self, location: Location, data: NodeData) -> Result<NodeID, TargetError> {
        let target = self.graph.insert(location, data)?;
        // Unwrap ok - just inserted under a live parent.
        let position = self.graph.position_of(target).unwrap();
        self.writer.write(Command::NodeCreated { target, position });
        Ok(target)
    }
    pub fn delete(&mut self, target: NodeID) -> Result<(), TargetError> {
        if target == self.graph.root() {
            return Err(TargetError::WrongKind);
        }
        self.live(target)?;
        let position = self
            .graph
            .position_of(target)
            .ok_or(TargetError::TargetNotFound)?;
        self.commit(Command::NodeDeleted { target, position })
            .map_err(|_| TargetError::TargetDeleted)
    }
    pub fn reparent(&mut self, target: NodeID, location: Location) -> Result<(), ReparentError> {
        let from = self
            .graph
            .position_of(target)
            .ok_or(ReparentError::TargetError(TargetError::TargetNotFound))?;
        self.graph.reparent(target, location)?;
        // Unwrap ok - just moved, so it has a place.
        let to = self.graph.position_of(target).unwrap();
        if from != to {
            self.writer.write(Command::Reparent { target, from, to });
        }
        Ok(())
    }
    pub fn set_blend(&mut self, target: NodeID, blend: Blend) -> Result<(), TargetError> {
        let from = self.live(target)?.blend();
        if from == blend {
            return Ok(());
        }
        self.commit(Command::BlendChanged {
            target,
            from,
            to: blend,
        })
        .map_err(|_| TargetError::WrongKind)
    }
    pub fn set_properties(
        &mut self,
        target: NodeID,
        properties: Properties,
    ) -> Result<(), TargetError> {
        let from = self.live(target)?.properties();
        if from == properties {
            return Ok(());
        }
        self.commit(Command::PropertiesChanged {
            target,
            from,
            to: properties,
        })
        .map_err(|_| TargetError::WrongKind)
    }
    pub fn set_name(&mut self, target: NodeID, name: impl Into<String>) -> Result<(), TargetError> {
        let mut properties = self.live(target)?.properties();
        properties.name = name.into();
        self.set_properties(target, properties)
    }
    pub fn set_flags(&mut self, target: NodeID, flags: super::NodeFlags) -> Result<(), TargetError> {
        let mut properties = self.live(target)?.properties();
        properties.flags = flags;
        self.set_properties(target, properties)
    }
    /// Change the config of an adjustment or generator.
    pub fn set_filter(
        &mut self,
        target: NodeID,
        filter: Option<FilterConfig>,
    ) -> Result<(), TargetError> {
        let from = self
            .live(target)?
            .kind()
            .filter()
            .ok_or(TargetError::WrongKind)?
            .cloned();
        if from == filter {
            return Ok(());
        }
        self.commit(Command::FilterChanged {
            target,
            from,
            to: filter,
        })
        .map_err(|_| TargetError::WrongKind)
    }
    pub fn set_style(
        &mut self,
        target: NodeID,
        style: Option<LayerStyle>,
    ) -> Result<(), TargetError> {
        let from = self.live(target)?.style().cloned();
        if from == style {
            return Ok(());
        }
        self.commit(Command::StyleChanged {
            target,
            from,
            to: style,
        })
        .map_err(|_| TargetError::WrongKind)
    }
    pub fn set_metadata(
        &mut self,
        target: NodeID,
        metadata: MetadataStore,
    ) -> Result<(), TargetError> {
        let from = self.live(target)?.metadata().clone();
        if from == metadata {
            return Ok(());
        }
        self.commit(Command::MetadataChanged {
            target,
            from,
            to: metadata,
        })
        .map_err(|_| TargetError::WrongKind)
    }
    /// Replace the content of a node. The new kind must fit its parent and children.
    pub fn set_content(&mut self, target: NodeID, kind: NodeKind) -> Result<(), TargetError> {
        let from = self.live(target)?.kind().clone();
        if from == kind {
            return Ok(());
        }
        self.commit(Command::ContentChanged {
            target,
            from: Box::new(from),
            to: Box::new(kind),
        })
        .map_err(|_| TargetError::Rejected)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::raster::{Raster, Rect};

    #[test]
    fn writes_only_changes() {
        let mut graph = LayerGraph::default();
        let mut commands = crate::queue::writer::Pending::default();
        let mut writer = GraphWriter::new(&mut commands, &mut graph);
        let root = writer.root();
        let layer = writer
            .insert(
                Location::Top(root),
                NodeData::new("layer", NodeKind::paint(Raster::transparent(Rect::EMPTY))),
            )
            .unwrap();
        writer.set_blend(layer, Blend::default()).unwrap();
        writer.set_name(layer, "layer").unwrap();
        writer.reparent(layer, Location::Top(root)).unwrap();
        assert_eq!(
            writer.set_filter(layer, Some(FilterConfig::new("invert"))),
            Err(TargetError::WrongKind)
        );
        writer.set_name(layer, "renamed").unwrap();
        drop(writer);
        assert_eq!(commands.len(), 2);
        assert_eq!(graph.get(layer).map(NodeData::name), Some("renamed"));
    }
}
