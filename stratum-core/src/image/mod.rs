//! # Image
//!
//! One open image: its command queue, the projection cache kept coherent with it, change
//! notifications, and outstanding pixel jobs. Everything that mutates the layer graph goes
//! through [`Image::write_with`] (usually by way of [`crate::adapter::NodeCommandsAdapter`]), after
//! which the image catches up with the history and invalidates what changed.

use std::collections::BTreeSet;
use std::sync::Arc;

use crate::commands::{Command, DoUndo, GraphCommand, OwnedDoUndo};
use crate::events::{EventHub, GraphEvent, GraphListener, SubscriptionID};
use crate::filter::FilterConfig;
use crate::jobs::JobPool;
use crate::projection::{ProjectionCache, RenderContext};
use crate::queue::{self, writer::CommandQueueWriter, DocumentCommandListener, DocumentCommandQueue};
use crate::raster::{Raster, Rect};
use crate::state::graph::{NodeID, NodeKind};
use crate::state::{ColorSpace, Document};

mod operations;

pub use operations::MergeError;

pub struct Image {
    queue: DocumentCommandQueue,
    /// Where in the history the cache and subscribers have been brought up to.
    listener: DocumentCommandListener,
    /// How many commands of the open macro have been seen.
    pending_seen: usize,
    cache: parking_lot::Mutex<ProjectionCache>,
    events: EventHub,
    jobs: JobPool,
    previews: hashbrown::HashMap<NodeID, FilterConfig>,
    // Neither of these are part of the history.
    time: u32,
    layer_counter: u32,
    active: Option<NodeID>,
    selected: Vec<NodeID>,
}
impl Default for Image {
    fn default() -> Self {
        Self::new(Document::default())
    }
}
impl Image {
    #[must_use]
    pub fn new(document: Document) -> Self {
        let queue = DocumentCommandQueue::from_document(document);
        let listener = queue.listen_from_now();
        Self {
            queue,
            listener,
            pending_seen: 0,
            cache: ProjectionCache::new().into(),
            events: EventHub::default(),
            jobs: JobPool::default(),
            previews: hashbrown::HashMap::new(),
            time: 0,
            layer_counter: 0,
            active: None,
            selected: Vec::new(),
        }
    }
    #[must_use]
    pub fn id(&self) -> crate::state::DocumentID {
        self.queue.id()
    }
    /// The present state. Hold it briefly, writes wait on it.
    #[must_use]
    pub fn read(&self) -> parking_lot::MappedRwLockReadGuard<'_, queue::State> {
        self.queue.read()
    }
    #[must_use]
    pub fn root(&self) -> NodeID {
        self.read().graph.root()
    }
    #[must_use]
    pub fn bounds(&self) -> Rect {
        self.read().document.bounds
    }
    #[must_use]
    pub fn width(&self) -> u32 {
        self.bounds().width
    }
    #[must_use]
    pub fn height(&self) -> u32 {
        self.bounds().height
    }
    #[must_use]
    pub fn resolution(&self) -> f32 {
        self.read().document.resolution
    }
    #[must_use]
    pub fn color_space(&self) -> ColorSpace {
        self.read().document.color_space
    }
    #[must_use]
    pub fn time(&self) -> u32 {
        self.time
    }
    /// Move the animation playhead. Animated layers with more than one frame are redrawn.
    pub fn set_time(&mut self, time: u32) {
        if time == self.time {
            return;
        }
        self.time = time;
        let animated: Vec<NodeID> = self
            .read()
            .graph
            .iter()
            .filter(|(_, data)| {
                data.is_animated() && matches!(data.kind(), NodeKind::Paint { frames } if frames.len() > 1)
            })
            .map(|(id, _)| id)
            .collect();
        self.invalidate_nodes(animated);
    }
    /// A fresh default layer name, "Layer 1", "Layer 2"...
    pub fn next_layer_name(&mut self) -> String {
        self.layer_counter += 1;
        format!("Layer {}", self.layer_counter)
    }
    /// The active layer, if it is still live.
    #[must_use]
    pub fn active_layer(&self) -> Option<NodeID> {
        self.active.filter(|&id| self.read().graph.get(id).is_some())
    }
    /// Make `id` the active layer. Returns `false` (and changes nothing) if it isn't live.
    pub fn activate(&mut self, id: NodeID) -> bool {
        let ok = {
            let state = self.read();
            id != state.graph.root() && state.graph.get(id).is_some()
        };
        if ok {
            self.active = Some(id);
        }
        ok
    }
    pub fn deactivate(&mut self) {
        self.active = None;
    }
    /// Selected nodes that are still live, in selection order.
    #[must_use]
    pub fn selected_nodes(&self) -> Vec<NodeID> {
        let state = self.read();
        self.selected
            .iter()
            .copied()
            .filter(|&id| state.graph.get(id).is_some())
            .collect()
    }
    pub fn set_selected_nodes(&mut self, nodes: Vec<NodeID>) {
        self.selected = nodes;
    }
    /// Layers (not masks) in the image, hidden ones included.
    #[must_use]
    pub fn layer_count(&self) -> usize {
        self.read()
            .graph
            .iter()
            .filter(|(_, data)| !data.kind().is_mask())
            .count()
    }
    #[must_use]
    pub fn hidden_layer_count(&self) -> usize {
        self.read()
            .graph
            .iter()
            .filter(|(_, data)| !data.kind().is_mask() && !data.is_visible())
            .count()
    }

    pub fn subscribe(&mut self, listener: impl GraphListener + 'static) -> SubscriptionID {
        self.events.subscribe(listener)
    }
    pub fn unsubscribe(&mut self, id: SubscriptionID) -> bool {
        self.events.unsubscribe(id)
    }

    /// Write commands, then bring the cache and subscribers up to date.
    pub fn write_with<F, T>(&mut self, write: F) -> T
    where
        F: FnOnce(&mut CommandQueueWriter<'_>) -> T,
    {
        self.write_with_notify(true, write)
    }
    /// As [`Self::write_with`], optionally without announcing the invalidated projections. The
    /// cache is invalidated either way.
    pub fn write_with_notify<F, T>(&mut self, notify_projection: bool, write: F) -> T
    where
        F: FnOnce(&mut CommandQueueWriter<'_>) -> T,
    {
        let result = self.queue.write_with(write);
        self.sync(notify_projection);
        result
    }
    pub fn begin_macro(&mut self, label: impl Into<String>) {
        self.queue.begin_scope(label);
    }
    /// Returns `true` if this closed the outermost macro and it held anything.
    pub fn end_macro(&mut self) -> bool {
        // Everything written so far is already reflected, so skip over the macro as a whole.
        self.sync(true);
        let written = self.queue.end_scope();
        if !self.queue.in_scope() {
            self.pending_seen = 0;
        }
        if written {
            if let Err(err) = self.listener.forward() {
                log::error!("lost track of the history: {err}");
            }
        }
        written
    }
    #[must_use]
    pub fn in_macro(&self) -> bool {
        self.queue.in_scope()
    }
    pub fn undo(&mut self) -> bool {
        let undone = self.queue.undo_n(1) == 1;
        self.sync(true);
        undone
    }
    pub fn redo(&mut self) -> bool {
        let redone = self.queue.redo_n(1) == 1;
        self.sync(true);
        redone
    }
    /// Undo the most recent command and forget it ever happened: it can't be redone, and the
    /// nodes it created are destroyed.
    pub fn retract_last(&mut self) -> bool {
        if self.queue.undo_n(1) == 0 {
            return false;
        }
        self.sync(true);
        if let Some(destroyed) = self.queue.discard_undone() {
            let mut cache = self.cache.lock();
            for id in destroyed {
                cache.forget(id);
                let _ = self.previews.remove(&id);
            }
        }
        true
    }
    #[must_use]
    pub fn can_undo(&self) -> bool {
        self.queue.can_undo()
    }
    #[must_use]
    pub fn can_redo(&self) -> bool {
        self.queue.can_redo()
    }
    /// Number of commands between the start of history and the present.
    #[must_use]
    pub fn history_depth(&self) -> usize {
        self.queue.depth()
    }
    /// Label of the most recent macro, if that's what the most recent command is.
    #[must_use]
    pub fn last_label(&self) -> Option<String> {
        self.queue
            .peek_present()
            .and_then(|command| command.label().map(str::to_owned))
    }

    /// Show `config` in place of the recorded filter of `id`, or stop doing so. Not recorded in
    /// the history.
    pub fn set_preview(&mut self, id: NodeID, config: Option<FilterConfig>) {
        let changed = match config {
            Some(config) => self.previews.insert(id, config.clone()) != Some(config),
            None => self.previews.remove(&id).is_some(),
        };
        if changed {
            self.invalidate_nodes([id]);
        }
    }
    #[must_use]
    pub fn preview(&self, id: NodeID) -> Option<&FilterConfig> {
        self.previews.get(&id)
    }

    /// The projection of `id`, recomputed only if something it depends on changed.
    #[must_use]
    pub fn projection(&self, id: NodeID) -> Arc<Raster> {
        let state = self.read();
        let ctx = self.context(&state);
        self.cache.lock().projection(&ctx, id)
    }
    #[must_use]
    pub fn root_projection(&self) -> Arc<Raster> {
        self.projection(self.root())
    }
    /// Render from scratch, ignoring the cache.
    #[must_use]
    pub fn render_uncached(&self, id: NodeID) -> Raster {
        let state = self.read();
        crate::projection::render_uncached(&self.context(&state), id)
    }
    #[must_use]
    pub fn projection_is_valid(&self, id: NodeID) -> bool {
        self.cache.lock().is_valid(id)
    }
    /// Projections computed so far.
    #[must_use]
    pub fn recomputations(&self) -> usize {
        self.cache.lock().recomputations()
    }
    fn context<'s>(&'s self, state: &'s queue::State) -> RenderContext<'s> {
        RenderContext {
            graph: &state.graph,
            bounds: state.document.bounds,
            resolution: state.document.resolution,
            time: self.time,
            previews: &self.previews,
        }
    }

    /// Pixel jobs not yet joined.
    #[must_use]
    pub fn outstanding_operations(&self) -> usize {
        self.jobs.outstanding()
    }
    /// Wait for every pixel job, applying each one's result as its own macro.
    pub fn block_until_operations_finished(&mut self) {
        for outcome in self.jobs.join() {
            let updates = match outcome.result {
                Ok(updates) => updates,
                Err(err) => {
                    log::error!("{} failed: {err}", outcome.label);
                    continue;
                }
            };
            self.begin_macro(outcome.label.clone());
            self.write_with(|writer| {
                let mut graph = writer.graph();
                for update in updates {
                    if graph.get(update.target).map(|data| data.kind()) != Some(&update.from) {
                        log::warn!("{} changed while {} ran, skipping", update.target, outcome.label);
                        continue;
                    }
                    if let Err(err) = graph.set_content(update.target, update.to) {
                        log::error!("can't apply {} to {}: {err}", outcome.label, update.target);
                    }
                }
            });
            self.end_macro();
        }
    }

    /// Drop the projections of `ids` and whatever reads them, and announce it.
    fn invalidate_nodes(&mut self, ids: impl IntoIterator<Item = NodeID>) {
        let marked: BTreeSet<NodeID> = {
            let state = self.queue.read();
            let mut cache = self.cache.lock();
            ids.into_iter()
                .flat_map(|id| cache.invalidate(&state.graph, id))
                .collect()
        };
        for id in marked {
            self.events.emit(&GraphEvent::ProjectionInvalidated(id));
        }
    }
    /// Catch up with everything that happened to the history since last time.
    fn sync(&mut self, notify_projection: bool) {
        let mut changes: Vec<OwnedDoUndo<Command>> = match self.listener.forward_commands() {
            Ok(changes) => changes,
            Err(err) => {
                log::error!("lost track of the history: {err}");
                Vec::new()
            }
        };
        let pending = self.queue.pending_since(self.pending_seen);
        self.pending_seen += pending.len();
        changes.extend(pending.into_iter().map(OwnedDoUndo::Do));
        if changes.is_empty() {
            return;
        }

        let mut events = Vec::new();
        let invalidated: BTreeSet<NodeID> = {
            let state = self.queue.read();
            let graph = &state.graph;
            let mut cache = self.cache.lock();
            let mut invalidated = BTreeSet::new();
            let mut everything = false;
            for change in &changes {
                for leaf in change.as_ref().leaves() {
                    match leaf {
                        DoUndo::Do(Command::Graph(GraphCommand::NodeCreated { target, position }))
                        | DoUndo::Undo(Command::Graph(GraphCommand::NodeDeleted {
                            target,
                            position,
                        })) => {
                            events.push(GraphEvent::NodeAdded {
                                node: *target,
                                parent: position.parent,
                            });
                            invalidated.extend(cache.invalidate_subtree(graph, *target));
                        }
                        DoUndo::Undo(Command::Graph(GraphCommand::NodeCreated { target, position }))
                        | DoUndo::Do(Command::Graph(GraphCommand::NodeDeleted {
                            target,
                            position,
                        })) => {
                            events.push(GraphEvent::NodeRemoved {
                                node: *target,
                                parent: position.parent,
                            });
                            invalidated.extend(cache.invalidate_subtree(graph, *target));
                        }
                        DoUndo::Do(Command::Graph(GraphCommand::Reparent { target, from, to }))
                        | DoUndo::Undo(Command::Graph(GraphCommand::Reparent {
                            target,
                            from: to,
                            to: from,
                        })) => {
                            events.push(GraphEvent::NodeMoved {
                                node: *target,
                                from: *from,
                                to: *to,
                            });
                            invalidated.extend(cache.invalidate_move(graph, *target, *from));
                        }
                        DoUndo::Do(Command::Graph(command))
                        | DoUndo::Undo(Command::Graph(command)) => {
                            events.push(GraphEvent::NodeChanged(command.target()));
                            invalidated.extend(cache.invalidate(graph, command.target()));
                        }
                        DoUndo::Do(Command::Document(_)) | DoUndo::Undo(Command::Document(_)) => {
                            events.push(GraphEvent::DocumentChanged);
                            everything = true;
                        }
                        // Flattened away by `leaves`.
                        DoUndo::Do(Command::Meta(_) | Command::Dummy)
                        | DoUndo::Undo(Command::Meta(_) | Command::Dummy) => (),
                    }
                }
            }
            if everything {
                cache.invalidate_all();
                invalidated.insert(graph.root());
                invalidated.extend(graph.iter().map(|(id, _)| id));
            }
            invalidated
        };
        for event in &events {
            self.events.emit(event);
        }
        if notify_projection {
            for id in invalidated {
                self.events.emit(&GraphEvent::ProjectionInvalidated(id));
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::state::graph::{Location, NodeData};

    fn recorder(image: &mut Image) -> Arc<parking_lot::Mutex<Vec<GraphEvent>>> {
        let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let sink = seen.clone();
        image.subscribe(move |event: &GraphEvent| sink.lock().push(event.clone()));
        seen
    }

    #[test]
    fn events_follow_history() {
        let mut image = Image::default();
        let seen = recorder(&mut image);
        let root = image.root();
        let group = image
            .write_with(|writer| {
                writer
                    .graph()
                    .insert(Location::Top(root), NodeData::new("g", NodeKind::group()))
            })
            .unwrap();
        assert!(seen.lock().contains(&GraphEvent::NodeAdded {
            node: group,
            parent: root
        }));
        assert!(seen
            .lock()
            .contains(&GraphEvent::ProjectionInvalidated(root)));
        seen.lock().clear();
        assert!(image.undo());
        assert_eq!(
            seen.lock().first(),
            Some(&GraphEvent::NodeRemoved {
                node: group,
                parent: root
            })
        );
    }
    #[test]
    fn macro_contents_are_seen_before_it_closes() {
        let mut image = Image::default();
        let root = image.root();
        let _ = image.root_projection();
        image.begin_macro("two layers");
        image
            .write_with(|writer| {
                writer
                    .graph()
                    .insert(Location::Top(root), NodeData::new("g", NodeKind::group()))
            })
            .unwrap();
        assert!(!image.projection_is_valid(root));
        let _ = image.root_projection();
        assert!(image.end_macro());
        // Closing the macro changed nothing that was drawn.
        assert!(image.projection_is_valid(root));
        assert_eq!(image.history_depth(), 1);
        assert_eq!(image.last_label().as_deref(), Some("two layers"));
    }
    #[test]
    fn retract_destroys_created_nodes() {
        let mut image = Image::default();
        let root = image.root();
        let group = image
            .write_with(|writer| {
                writer
                    .graph()
                    .insert(Location::Top(root), NodeData::new("g", NodeKind::group()))
            })
            .unwrap();
        assert!(image.retract_last());
        assert!(!image.can_redo());
        assert!(!image.can_undo());
        assert_eq!(image.read().graph.arena_len(), 1);
        assert!(image.read().graph.get(group).is_none());
        assert!(!image.retract_last());
    }
}
