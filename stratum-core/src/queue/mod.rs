//! Command Queue
//!
//! The queue manages every change made to one image, keeping track of commands, undo/redo state, and
//! macros. The queue is the ground truth for the current state of its image. Listeners to the queue
//! can be various stages of out-of-date, at any point they can view all new commands and bring
//! themselves back to the present.
//!
//! If a listener is greatly out-of-date, the order of commands it sees may not match the exact order
//! of events, but the outcome will be the same. (For example, an unobserved undo followed by a redo
//! will result in neither being reported).

use std::sync::Arc;

use crate::{
    commands::{self, DoUndo, OwnedDoUndo},
    state,
};

mod queue_state;
pub mod writer;

pub use queue_state::State;

/// A macro being written. See [`DocumentCommandQueue::begin_scope`].
struct OpenScope {
    label: String,
    /// How many `begin_scope` calls are still unmatched. Inner macros fold into this one.
    depth: usize,
    commands: Vec<commands::Command>,
    panicked: bool,
}

struct DocumentCommandQueueInner {
    /// Tree structure of commands, where undos create branches.
    /// "First child" represents earlier series of commands that were undone, "last" is the most recent.
    /// More than two branches are allowed, of course!
    command_tree: slab_tree::Tree<commands::Command>,
    state: queue_state::State,
    root: slab_tree::NodeId,
    /// The macro being written, if any.
    scope: Option<OpenScope>,
}
impl DocumentCommandQueueInner {
    /// Write a command as the newest child of the present, and step onto it.
    fn append(&mut self, command: commands::Command) {
        log::trace!("Writing new command: {:#?}", command);
        let present = self.state.present;
        // It's a logic error for "present" node to not exist. Neglecting to write the command would be
        // just as bad, as then the state and the history would be mismatched.
        let Some(mut node) = self.command_tree.get_mut(present) else {
            log::error!("present {present:?} missing from the command tree, dropping command");
            return;
        };
        self.state.present = node.append(command).node_id();
    }
    /// File what a writer recorded: into the open macro if there is one, otherwise as the newest
    /// entry of the history.
    fn file(&mut self, pending: writer::Pending, panicked: bool) {
        if pending.is_empty() {
            return;
        }
        if let Some(scope) = self.scope.as_mut() {
            log::trace!("Writing {} command(s) into {:?}", pending.len(), scope.label);
            scope.commands.extend(pending.into_vec());
            scope.panicked |= panicked;
        } else if let Some(entry) = pending.into_entry(panicked) {
            self.append(entry);
        }
    }
}

pub struct DocumentCommandQueue {
    /// Mutable inner bits.
    inner: Arc<parking_lot::RwLock<DocumentCommandQueueInner>>,
    document: state::DocumentID,
}
impl Default for DocumentCommandQueue {
    fn default() -> Self {
        Self::from_document(state::Document::default())
    }
}
impl DocumentCommandQueue {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
    /// Create a queue with an empty graph and no history.
    #[must_use]
    pub fn from_document(document: state::Document) -> Self {
        let mut command_tree = slab_tree::TreeBuilder::new().build();
        let root = command_tree.set_root(commands::Command::Dummy);
        Self {
            inner: Arc::new(
                DocumentCommandQueueInner {
                    state: queue_state::State::new(document, root),
                    command_tree,
                    root,
                    scope: None,
                }
                .into(),
            ),
            document: crate::UniqueID::default(),
        }
    }
    #[must_use]
    pub fn id(&self) -> state::DocumentID {
        self.document
    }
    /// Locks the queue for writing commands during the span of the closure, where each modification of
    /// the state is tracked by the command queue. If multiple commands are written, they will be
    /// written in order as a single Atoms scope.
    pub fn write_with<F, T>(&self, write: F) -> T
    where
        F: FnOnce(&mut writer::CommandQueueWriter<'_>) -> T,
    {
        let mut writer = writer::CommandQueueWriter::new(self.inner.write());
        // Whatever was written is filed when the writer drops, unwinding included.
        write(&mut writer)
    }
    /// Read the present state.
    #[must_use]
    pub fn read(&self) -> parking_lot::MappedRwLockReadGuard<'_, State> {
        parking_lot::RwLockReadGuard::map(self.inner.read(), |inner| &inner.state)
    }
    /// Open a macro. Everything written until the matching [`Self::end_scope`] is undone and redone
    /// as one command. Macros opened inside a macro are flattened into it.
    ///
    /// Commands written while a macro is open are applied to the state right away, but only join
    /// the history once the outermost macro ends. See [`Self::pending_since`].
    pub fn begin_scope(&self, label: impl Into<String>) {
        let mut lock = self.inner.write();
        if let Some(scope) = lock.scope.as_mut() {
            scope.depth += 1;
            return;
        }
        let label = label.into();
        log::trace!("Opening scope {label:?}");
        lock.scope = Some(OpenScope {
            label,
            depth: 1,
            commands: Vec::new(),
            panicked: false,
        });
    }
    /// Close the innermost macro. Returns `true` if this closed the outermost one and it was
    /// written to the history. Empty macros are discarded.
    pub fn end_scope(&self) -> bool {
        let mut lock = self.inner.write();
        let Some(scope) = lock.scope.as_mut() else {
            log::warn!("end_scope called with no open scope");
            return false;
        };
        scope.depth -= 1;
        if scope.depth > 0 {
            return false;
        }
        // Some - checked above.
        let Some(scope) = lock.scope.take() else {
            return false;
        };
        if scope.commands.is_empty() {
            log::trace!("Discarding empty scope {:?}", scope.label);
            return false;
        }
        let ty = if scope.panicked {
            commands::ScopeType::WritePanic
        } else {
            commands::ScopeType::Macro(scope.label)
        };
        lock.append(commands::Command::Meta(commands::MetaCommand::Scope(
            ty,
            scope.commands.into_boxed_slice(),
        )));
        true
    }
    #[must_use]
    pub fn in_scope(&self) -> bool {
        self.inner.read().scope.is_some()
    }
    /// Commands written into the open macro, skipping the first `start`. Empty if no macro is open.
    #[must_use]
    pub fn pending_since(&self, start: usize) -> Vec<commands::Command> {
        self.inner
            .read()
            .scope
            .as_ref()
            .and_then(|scope| scope.commands.get(start..))
            .map(<[_]>::to_vec)
            .unwrap_or_default()
    }
    /// Step back up to `num` commands. Returns how many were undone.
    pub fn undo_n(&self, num: usize) -> usize {
        // Linearly walk up the tree num steps.
        let mut lock = self.inner.write();
        if lock.scope.is_some() {
            log::warn!("refusing to undo while a macro is open");
            return 0;
        }
        let DocumentCommandQueueInner {
            command_tree,
            state,
            ..
        } = &mut *lock;
        let start = state.present;
        let Some(ancestors) = command_tree.get(start).map(|this| {
            this.ancestors()
                .take(num)
                .map(|node| node.node_id())
                .collect::<Vec<_>>()
        }) else {
            log::error!("present {start:?} missing from the command tree");
            return 0;
        };
        let steps = ancestors.len();
        let end = ancestors.last().copied().unwrap_or(start);
        Self::travel(command_tree, state, start, end).map_or(0, |()| steps)
    }
    /// Step forward along the most recent branch up to `num` commands. Returns how many were redone.
    pub fn redo_n(&self, num: usize) -> usize {
        // Step down the tree, taking the last (most recent) child every time.
        let mut lock = self.inner.write();
        if lock.scope.is_some() {
            log::warn!("refusing to redo while a macro is open");
            return 0;
        }
        let DocumentCommandQueueInner {
            command_tree,
            state,
            ..
        } = &mut *lock;
        let start = state.present;
        let mut end = start;
        let mut steps = 0;
        while steps < num {
            let Some(last_child) = command_tree
                .get(end)
                .and_then(|this| this.last_child().map(|child| child.node_id()))
            else {
                // We've gone as deep as we can go!
                break;
            };
            end = last_child;
            steps += 1;
        }
        Self::travel(command_tree, state, start, end).map_or(0, |()| steps)
    }
    /// Apply every command between `start` and `end`, then move the present to `end`. If anything
    /// fails, the state is left at `start`.
    fn travel(
        command_tree: &slab_tree::Tree<commands::Command>,
        state: &mut State,
        start: slab_tree::NodeId,
        end: slab_tree::NodeId,
    ) -> Result<(), ()> {
        let path = match traverse(command_tree, start, end) {
            Ok(path) => path,
            Err(err) => {
                log::error!("can't travel history: {err}");
                return Err(());
            }
        };
        match state.apply_all(path) {
            Ok(()) => {
                state.present = end;
                Ok(())
            }
            Err(err) => {
                log::error!("history does not match the state, staying put: {err}");
                Err(())
            }
        }
    }
    /// Forget the most recently undone command and all of its redo branches, destroying the nodes
    /// they created. Used to make a rolled-back operation leave no trace.
    ///
    /// Returns the destroyed nodes, or `None` if there was nothing undone to forget.
    pub fn discard_undone(&self) -> Option<Vec<state::graph::NodeID>> {
        let mut lock = self.inner.write();
        let DocumentCommandQueueInner {
            command_tree,
            state,
            ..
        } = &mut *lock;
        let undone = command_tree
            .get(state.present)?
            .last_child()
            .map(|child| child.node_id())?;
        // Every command in this branch is in the undone state, so its created nodes are
        // tombstones nothing else refers to.
        let mut created = Vec::new();
        if let Some(branch) = command_tree.get(undone) {
            for node in branch.traverse_pre_order() {
                node.data().for_each_leaf(&mut |command| {
                    if let Some(commands::GraphCommand::NodeCreated { target, .. }) =
                        command.graph()
                    {
                        created.push(*target);
                    }
                });
            }
        }
        if command_tree
            .remove(undone, slab_tree::RemoveBehavior::DropChildren)
            .is_none()
        {
            log::warn!("undone branch {undone:?} was already gone from the command tree");
        }
        for &target in &created {
            state.graph.purge(target);
        }
        log::trace!("Discarded undone branch, destroying {} node(s)", created.len());
        Some(created)
    }
    #[must_use]
    pub fn can_undo(&self) -> bool {
        let lock = self.inner.read();
        lock.state.present != lock.root
    }
    #[must_use]
    pub fn can_redo(&self) -> bool {
        let lock = self.inner.read();
        lock.command_tree
            .get(lock.state.present)
            .is_some_and(|this| this.last_child().is_some())
    }
    /// Number of commands between the start of history and the present.
    #[must_use]
    pub fn depth(&self) -> usize {
        let lock = self.inner.read();
        lock.command_tree
            .get(lock.state.present)
            .map_or(0, |this| this.ancestors().count())
    }
    /// The most recent command, if any.
    #[must_use]
    pub fn peek_present(&self) -> Option<commands::Command> {
        let lock = self.inner.read();
        if lock.state.present == lock.root {
            return None;
        }
        lock.command_tree
            .get(lock.state.present)
            .map(|this| this.data().clone())
    }
    /// Create a listener that starts at the beginning of history.
    #[must_use]
    pub fn listen_from_start(&self) -> DocumentCommandListener {
        let start = self.inner.read().root;
        DocumentCommandListener {
            _document: self.document,
            cursor: start,
            inner: Arc::downgrade(&self.inner),
        }
    }
    /// Create a listener that will only see new activity
    #[must_use]
    pub fn listen_from_now(&self) -> DocumentCommandListener {
        let start = self.inner.read().state.present;
        DocumentCommandListener {
            _document: self.document,
            cursor: start,
            inner: Arc::downgrade(&self.inner),
        }
    }
}
#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum ListenerError {
    #[error("document not available")]
    DocumentClosed,
    // Hints that something has gone horribly wrong internally!
    #[error("tree malformed: {}", .0)]
    TreeMalformed(TraverseError),
}
pub struct DocumentCommandListener {
    _document: state::DocumentID,
    // Cursor into the tree that this listener has last seen,
    // When more events are requested, the path to the "true" cursor is found and traversed.
    cursor: slab_tree::NodeId,
    inner: std::sync::Weak<parking_lot::RwLock<DocumentCommandQueueInner>>,
}
impl DocumentCommandListener {
    /// Every command between this listener's point in time and the present, in the direction they
    /// were applied. Brings the listener up-to-date.
    pub fn forward_commands(&mut self) -> Result<Vec<OwnedDoUndo<commands::Command>>, ListenerError> {
        let inner = self.inner.upgrade().ok_or(ListenerError::DocumentClosed)?;
        let lock = inner.read();
        let commands = traverse(&lock.command_tree, self.cursor, lock.state.present)
            .map_err(ListenerError::TreeMalformed)?
            .into_iter()
            .map(Into::into)
            .collect();
        self.cursor = lock.state.present;
        Ok(commands)
    }
    /// Moves the cursor forward up-to-date with the document, not reporting the changes.
    /// Returns `true` if any change occured.
    pub fn forward(&mut self) -> Result<bool, ListenerError> {
        let inner = self.inner.upgrade().ok_or(ListenerError::DocumentClosed)?;
        let lock = inner.read();

        if lock.state.present == self.cursor {
            Ok(false)
        } else {
            self.cursor = lock.state.present;
            Ok(true)
        }
    }
}

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum TraverseError {
    #[error("can't traverse disconnected subtrees")]
    Disconnected,
    #[error("ID not present in tree")]
    NotFound,
}

/// `id` followed by each of its ancestors, up to the root.
fn lineage<T>(
    tree: &slab_tree::Tree<T>,
    id: slab_tree::NodeId,
) -> Result<Vec<slab_tree::NodeId>, TraverseError> {
    let node = tree.get(id).ok_or(TraverseError::NotFound)?;
    Ok(std::iter::once(id)
        .chain(node.ancestors().map(|ancestor| ancestor.node_id()))
        .collect())
}

/// The commands between `start` and `end`: undoing up to their nearest shared ancestor, then
/// doing down to `end`. Either end may be that ancestor itself.
fn traverse<T>(
    tree: &slab_tree::Tree<T>,
    start: slab_tree::NodeId,
    end: slab_tree::NodeId,
) -> Result<Vec<DoUndo<'_, T>>, TraverseError> {
    let up = lineage(tree, start)?;
    let down = lineage(tree, end)?;
    let shared = up
        .iter()
        .position(|id| down.contains(id))
        .ok_or(TraverseError::Disconnected)?;
    // Always found, `down` contains it.
    let meet = down
        .iter()
        .position(|id| *id == up[shared])
        .ok_or(TraverseError::Disconnected)?;
    let data = |id: &slab_tree::NodeId| {
        tree.get(*id)
            .map(|node| node.data())
            .ok_or(TraverseError::NotFound)
    };
    let undos = up[..shared].iter().map(|id| data(id).map(DoUndo::Undo));
    let dos = down[..meet].iter().rev().map(|id| data(id).map(DoUndo::Do));
    undos.chain(dos).collect()
}

#[cfg(test)]
mod traversal_test {
    use super::{traverse, TraverseError};
    use crate::commands::DoUndo;

    /// A history where `'a'` was undone and replaced by the `'b'` branch, which itself branched
    /// at `'d'`. `'x'` is cut off from the rest.
    ///
    ///```ignore
    ///   root
    ///   /  \
    ///  a    b
    ///  |   / \
    ///  c  d   e        x
    ///     |
    ///     f
    struct History {
        tree: slab_tree::Tree<char>,
        ids: hashbrown::HashMap<char, slab_tree::NodeId>,
    }
    impl History {
        fn new() -> Self {
            let mut tree = slab_tree::TreeBuilder::new().with_root('r').build();
            let mut ids = hashbrown::HashMap::new();
            let mut root = tree.root_mut().unwrap();
            ids.insert('r', root.node_id());
            let mut a = root.append('a');
            ids.insert('a', a.node_id());
            ids.insert('c', a.append('c').node_id());
            let mut b = root.append('b');
            ids.insert('b', b.node_id());
            let mut d = b.append('d');
            ids.insert('d', d.node_id());
            ids.insert('f', d.append('f').node_id());
            ids.insert('e', b.append('e').node_id());
            // A detached fragment, as left behind by removing its parent.
            let mut cut = b.append('-');
            ids.insert('x', cut.append('x').node_id());
            b.remove_last(slab_tree::RemoveBehavior::OrphanChildren);
            Self { tree, ids }
        }
        fn walk(&self, from: char, to: char) -> Result<Vec<DoUndo<'_, char>>, TraverseError> {
            traverse(&self.tree, self.ids[&from], self.ids[&to])
        }
    }

    #[test]
    fn across_branches() {
        let history = History::new();
        assert_eq!(
            history.walk('c', 'f').unwrap(),
            [
                DoUndo::Undo(&'c'),
                DoUndo::Undo(&'a'),
                DoUndo::Do(&'b'),
                DoUndo::Do(&'d'),
                DoUndo::Do(&'f'),
            ]
        );
        assert_eq!(
            history.walk('f', 'e').unwrap(),
            [DoUndo::Undo(&'f'), DoUndo::Undo(&'d'), DoUndo::Do(&'e')]
        );
    }
    #[test]
    fn straight_up_or_down() {
        let history = History::new();
        assert_eq!(
            history.walk('f', 'r').unwrap(),
            [DoUndo::Undo(&'f'), DoUndo::Undo(&'d'), DoUndo::Undo(&'b')]
        );
        assert_eq!(
            history.walk('r', 'c').unwrap(),
            [DoUndo::Do(&'a'), DoUndo::Do(&'c')]
        );
        assert!(history.walk('d', 'd').unwrap().is_empty());
    }
    #[test]
    fn detached_nodes_are_unreachable() {
        let history = History::new();
        assert_eq!(history.walk('e', 'x'), Err(TraverseError::Disconnected));
        assert!(history.walk('x', 'x').unwrap().is_empty());
    }
}
