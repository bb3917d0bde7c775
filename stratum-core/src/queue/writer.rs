//! Recording changes as they are made.
//!
//! State writers ([`GraphWriter`], [`DocumentWriter`]) apply each change immediately and hand the
//! matching command to a [`CommandWrite`] sink. A [`CommandQueueWriter`] gathers them while it holds
//! the queue lock, and files them into the history once it's dropped.

use crate::commands::{Command, MetaCommand, ScopeType};
use crate::state::document::DocumentWriter;
use crate::state::graph::writer::GraphWriter;

/// Sink for the commands a state writer records.
pub trait CommandWrite<C> {
    fn write(&mut self, command: C);
}

/// Commands recorded but not yet filed into the history.
#[derive(Default)]
pub struct Pending {
    // Almost every write is a single command.
    commands: smallvec::SmallVec<[Command; 1]>,
}
impl Pending {
    #[must_use]
    pub fn len(&self) -> usize {
        self.commands.len()
    }
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }
    pub(super) fn into_vec(self) -> Vec<Command> {
        self.commands.into_vec()
    }
    /// The one history entry these commands become. More than one, or any written during a
    /// panic, are bundled into a scope.
    pub(super) fn into_entry(mut self, panicked: bool) -> Option<Command> {
        let ty = match (self.commands.len(), panicked) {
            (0, _) => return None,
            (1, false) => return self.commands.pop(),
            (_, false) => ScopeType::Atoms,
            (_, true) => ScopeType::WritePanic,
        };
        Some(Command::Meta(MetaCommand::Scope(
            ty,
            self.commands.into_boxed_slice(),
        )))
    }
}
impl<C: Into<Command>> CommandWrite<C> for &mut Pending {
    fn write(&mut self, command: C) {
        self.commands.push(command.into());
    }
}

/// Exclusive access to a queue's state. Everything changed through it is recorded as one entry.
pub struct CommandQueueWriter<'a> {
    lock: parking_lot::RwLockWriteGuard<'a, super::DocumentCommandQueueInner>,
    pending: Pending,
}
impl<'a> CommandQueueWriter<'a> {
    pub(super) fn new(
        lock: parking_lot::RwLockWriteGuard<'a, super::DocumentCommandQueueInner>,
    ) -> Self {
        Self {
            lock,
            pending: Pending::default(),
        }
    }
    /// Whether anything has been recorded yet.
    #[must_use]
    pub fn changed(&self) -> bool {
        !self.pending.is_empty()
    }
    pub fn graph(&mut self) -> GraphWriter<'_, &mut Pending> {
        GraphWriter::new(&mut self.pending, &mut self.lock.state.graph)
    }
    pub fn document(&mut self) -> DocumentWriter<'_, &mut Pending> {
        DocumentWriter::new(&mut self.pending, &mut self.lock.state.document)
    }
    /// Read the state, as modified so far.
    #[must_use]
    pub fn state(&self) -> &super::State {
        &self.lock.state
    }
}
// Runs on unwind too, so the history never falls behind the state it describes. A leaked writer
// keeps the lock forever, and nobody sees the mismatch.
impl Drop for CommandQueueWriter<'_> {
    fn drop(&mut self) {
        let pending = std::mem::take(&mut self.pending);
        self.lock.file(pending, std::thread::panicking());
    }
}
