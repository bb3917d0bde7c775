//! # Commands
//!
//! Commands are the only way the state of an image is modified. Every change is recorded as a
//! command by a [`crate::queue::writer`], carrying enough of the state before and after to be
//! applied in either direction.

pub use crate::state::document::commands::Command as DocumentCommand;
pub use crate::state::graph::commands::Command as GraphCommand;

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum CommandError {
    #[error("command constructed for a state that does not match the current state")]
    MismatchedState,
    #[error("resource referenced by the command is not found")]
    UnknownResource,
    #[error("command makes no changes")]
    NoOp,
}
pub trait CommandConsumer<C> {
    /// Apply a single command. If this generates an error,
    /// the state of `self` should *not* be observably changed.
    fn apply(&mut self, command: DoUndo<'_, C>) -> Result<(), CommandError>;
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ScopeType {
    /// A named user-level operation (a macro), undone and redone as one.
    Macro(String),
    /// Commands are grouped because they were individual parts of a single, larger write.
    Atoms,
    /// A command writer panicked mid write. The commands contained may be part of an incomplete
    /// operation, but are still tracked to ensure integrity of the tree as a whole.
    WritePanic,
}
/// Commands about commands!
#[derive(Clone, Debug)]
pub enum MetaCommand {
    /// Bundle many commands into one big group.
    /// Grouped commands are treated as a single command, as far as the user can tell.
    Scope(ScopeType, Box<[Command]>),
}

#[derive(Clone, Debug)]
pub enum Command {
    Meta(MetaCommand),
    Graph(GraphCommand),
    Document(DocumentCommand),
    // We need a dummy command to serve as the root of the command tree.
    // Invalid anywhere else.
    Dummy,
}
impl From<MetaCommand> for Command {
    fn from(value: MetaCommand) -> Self {
        Self::Meta(value)
    }
}
impl From<GraphCommand> for Command {
    fn from(value: GraphCommand) -> Self {
        Self::Graph(value)
    }
}
impl From<DocumentCommand> for Command {
    fn from(value: DocumentCommand) -> Self {
        Self::Document(value)
    }
}
impl Command {
    #[must_use]
    pub fn meta(&self) -> Option<&MetaCommand> {
        match self {
            Self::Meta(m) => Some(m),
            _ => None,
        }
    }
    #[must_use]
    pub fn graph(&self) -> Option<&GraphCommand> {
        match self {
            Self::Graph(m) => Some(m),
            _ => None,
        }
    }
    #[must_use]
    pub fn document(&self) -> Option<&DocumentCommand> {
        match self {
            Self::Document(m) => Some(m),
            _ => None,
        }
    }
    /// The user-facing label, for macros.
    #[must_use]
    pub fn label(&self) -> Option<&str> {
        match self {
            Self::Meta(MetaCommand::Scope(ScopeType::Macro(label), _)) => Some(label),
            _ => None,
        }
    }
    /// Visit every non-meta command in order of application, descending into scopes.
    pub fn for_each_leaf(&self, f: &mut impl FnMut(&Self)) {
        match self {
            Self::Meta(MetaCommand::Scope(_, commands)) => {
                for command in commands.iter() {
                    command.for_each_leaf(f);
                }
            }
            Self::Dummy => (),
            leaf => f(leaf),
        }
    }
}

#[derive(PartialEq, Eq, Debug)]
pub enum DoUndo<'c, T> {
    Do(&'c T),
    Undo(&'c T),
}
impl<'c, T> DoUndo<'c, T> {
    /// Apply a closure to the inner type T, maintaining the
    /// Do or Undo status. Returns None if the closure returns None.
    pub fn filter_map<Func, Return>(&self, f: Func) -> Option<DoUndo<'c, Return>>
    where
        Func: FnOnce(&'c T) -> Option<&'c Return>,
        Return: 'c,
    {
        match self {
            Self::Do(c) => Some(DoUndo::Do(f(c)?)),
            Self::Undo(c) => Some(DoUndo::Undo(f(c)?)),
        }
    }
    /// The same command, applied in the other direction.
    #[must_use]
    pub fn reversed(&self) -> Self {
        match *self {
            Self::Do(c) => Self::Undo(c),
            Self::Undo(c) => Self::Do(c),
        }
    }
}
impl<'c> DoUndo<'c, Command> {
    /// Flatten scopes into the leaf commands, in the order they are applied. Undoing a scope
    /// undoes its contents last-to-first.
    #[must_use]
    pub fn leaves(self) -> Vec<DoUndo<'c, Command>> {
        fn visit<'c>(command: DoUndo<'c, Command>, out: &mut Vec<DoUndo<'c, Command>>) {
            match command {
                DoUndo::Do(Command::Meta(MetaCommand::Scope(_, commands))) => {
                    for command in commands.iter() {
                        visit(DoUndo::Do(command), out);
                    }
                }
                DoUndo::Undo(Command::Meta(MetaCommand::Scope(_, commands))) => {
                    for command in commands.iter().rev() {
                        visit(DoUndo::Undo(command), out);
                    }
                }
                DoUndo::Do(Command::Dummy) | DoUndo::Undo(Command::Dummy) => (),
                leaf => out.push(leaf),
            }
        }
        let mut out = Vec::new();
        visit(self, &mut out);
        out
    }
}
// Derive would needlessly require `T: Clone`.
impl<T> Clone for DoUndo<'_, T> {
    fn clone(&self) -> Self {
        *self
    }
}
impl<T> Copy for DoUndo<'_, T> {}

/// A [`DoUndo`] that owns its command, for handing history to listeners.
#[derive(Clone, Debug)]
pub enum OwnedDoUndo<T> {
    Do(T),
    Undo(T),
}
impl<T> OwnedDoUndo<T> {
    #[must_use]
    pub fn as_ref(&self) -> DoUndo<'_, T> {
        match self {
            Self::Do(c) => DoUndo::Do(c),
            Self::Undo(c) => DoUndo::Undo(c),
        }
    }
}
impl<T: Clone> From<DoUndo<'_, T>> for OwnedDoUndo<T> {
    fn from(value: DoUndo<'_, T>) -> Self {
        match value {
            DoUndo::Do(c) => Self::Do(c.clone()),
            DoUndo::Undo(c) => Self::Undo(c.clone()),
        }
    }
}
