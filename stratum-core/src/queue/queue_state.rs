use crate::commands::{self, CommandConsumer, CommandError, DoUndo, MetaCommand};
use crate::state;

/// The state of an image at one point of its history.
pub struct State {
    pub document: state::Document,
    pub graph: state::graph::LayerGraph,
    /// Where in the command tree this state sits.
    pub(super) present: slab_tree::NodeId,
}
impl State {
    pub(super) fn new(document: state::Document, present: slab_tree::NodeId) -> Self {
        Self {
            document,
            graph: state::graph::LayerGraph::default(),
            present,
        }
    }
    /// Apply every command in order. On failure, the ones already applied are reverted.
    pub(super) fn apply_all<'c>(
        &mut self,
        commands: impl IntoIterator<Item = DoUndo<'c, commands::Command>>,
    ) -> Result<(), CommandError> {
        let mut applied = Vec::new();
        for command in commands {
            if let Err(err) = self.apply(command) {
                for done in applied.into_iter().rev() {
                    // Reverting what just succeeded can't mismatch.
                    let _ = self.apply(DoUndo::reversed(&done));
                }
                return Err(err);
            }
            applied.push(command);
        }
        Ok(())
    }
}
impl CommandConsumer<commands::Command> for State {
    fn apply(&mut self, command: DoUndo<'_, commands::Command>) -> Result<(), CommandError> {
        match command {
            DoUndo::Do(commands::Command::Meta(MetaCommand::Scope(_, commands))) => {
                self.apply_all(commands.iter().map(DoUndo::Do))
            }
            DoUndo::Undo(commands::Command::Meta(MetaCommand::Scope(_, commands))) => {
                self.apply_all(commands.iter().rev().map(DoUndo::Undo))
            }
            DoUndo::Do(commands::Command::Graph(command)) => {
                self.graph.apply(DoUndo::Do(command))
            }
            DoUndo::Undo(commands::Command::Graph(command)) => {
                self.graph.apply(DoUndo::Undo(command))
            }
            DoUndo::Do(commands::Command::Document(command)) => {
                self.document.apply(DoUndo::Do(command))
            }
            DoUndo::Undo(commands::Command::Document(command)) => {
                self.document.apply(DoUndo::Undo(command))
            }
            DoUndo::Do(commands::Command::Dummy) | DoUndo::Undo(commands::Command::Dummy) => {
                Err(CommandError::NoOp)
            }
        }
    }
}
