//! # Layer manager
//!
//! User-level compound operations over the open image. With no image open every operation is a
//! silent no-op, callers are expected to consult [`LayerManager::action_states`] first.
//!
//! Layers that need configuring after creation (adjustment, generator, file) are inserted right
//! away inside an open macro, and either committed or retracted without a trace once the caller
//! has decided. Only one such session may be in progress at a time.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::adapter::NodeCommandsAdapter;
use crate::blend::{Blend, CompositeOp};
use crate::filter::{Filter, FilterConfig, FilterError, Generator};
use crate::image::{Image, MergeError};
use crate::metadata::{MergeStrategy, StrategyError};
use crate::raster::{Raster, Selection};
use crate::state::graph::{
    FileLayer, FileScaling, NodeData, NodeFlags, NodeID, NodeKind, Position, Shape,
};
use crate::style::LayerStyle;

/// Decoded content of an external image file.
pub struct DecodedFile {
    pub raster: Raster,
    /// Dots per inch, if the file says.
    pub resolution: Option<f32>,
}

#[derive(thiserror::Error, Debug)]
pub enum FileError {
    #[error("no file source to load {0:?} with")]
    NoSource(PathBuf),
    #[error("can't load {path:?}: {reason}")]
    Unreadable { path: PathBuf, reason: String },
}

/// Loads the content of file layers. Codecs live with whoever implements this.
pub trait FileSource {
    fn decode(&self, path: &Path) -> Result<DecodedFile, FileError>;
}

#[derive(thiserror::Error, Debug)]
pub enum ConfigurationError {
    #[error("no configuration in progress for this node")]
    NoSession,
    #[error("configuration does not fit this kind of layer")]
    WrongKind,
    #[error("no file name specified")]
    NoFileName,
    #[error(transparent)]
    Filter(#[from] FilterError),
    #[error(transparent)]
    File(#[from] FileError),
}

/// What a provisional layer is being configured with.
#[derive(Clone, Debug, PartialEq)]
pub enum LayerConfig {
    /// For adjustment and generator layers. `None` leaves it unconfigured.
    Filter(Option<FilterConfig>),
    File { path: PathBuf, scaling: FileScaling },
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum Role {
    Adjustment,
    Generator,
    File,
}

/// A layer inserted ahead of its configuration.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct ProvisionalHandle {
    node: NodeID,
    role: Role,
}
impl ProvisionalHandle {
    #[must_use]
    pub fn node(&self) -> NodeID {
        self.node
    }
}

struct Provisional {
    handle: ProvisionalHandle,
    default_name: String,
    /// Active layer to go back to if the layer is discarded.
    previous_active: Option<NodeID>,
}

/// An open properties edit of an adjustment or generator layer.
struct PropertiesSession {
    node: NodeID,
    before: Option<FilterConfig>,
}

/// Which image-wide actions make sense right now.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct ActionStates {
    pub flatten_image: bool,
    pub merge_layer: bool,
    pub flatten_layer: bool,
}

#[derive(Default)]
pub struct LayerManager {
    image: Option<Image>,
    files: Option<Box<dyn FileSource>>,
    /// The user's current selection, given to new adjustment and generator layers.
    selection: Option<Selection>,
    configuring: Option<Provisional>,
    properties: Option<PropertiesSession>,
}
impl LayerManager {
    #[must_use]
    pub fn new(image: Image) -> Self {
        Self {
            image: Some(image),
            ..Default::default()
        }
    }
    #[must_use]
    pub fn image(&self) -> Option<&Image> {
        self.image.as_ref()
    }
    pub fn image_mut(&mut self) -> Option<&mut Image> {
        self.image.as_mut()
    }
    /// Swap the open image. Any configuration in progress on the old one is abandoned with it.
    pub fn set_image(&mut self, image: Option<Image>) -> Option<Image> {
        self.configuring = None;
        self.properties = None;
        std::mem::replace(&mut self.image, image)
    }
    pub fn set_file_source(&mut self, files: impl FileSource + 'static) {
        self.files = Some(Box::new(files));
    }
    pub fn set_selection(&mut self, selection: Option<Selection>) {
        self.selection = selection;
    }
    /// Undoable edits on the open image.
    pub fn commands(&mut self) -> Option<NodeCommandsAdapter<'_>> {
        if self.busy() {
            return None;
        }
        self.image.as_mut().map(NodeCommandsAdapter::new)
    }

    /// Whether a layer is being configured. Its macro is still open, so any other edit would be
    /// retracted along with it.
    fn busy(&self) -> bool {
        let busy = self.configuring.is_some();
        if busy {
            log::warn!("a layer is being configured, commit or cancel it first");
        }
        busy
    }

    #[must_use]
    pub fn active_layer(&self) -> Option<NodeID> {
        self.image.as_ref()?.active_layer()
    }
    pub fn activate_layer(&mut self, layer: NodeID) -> bool {
        self.image
            .as_mut()
            .is_some_and(|image| image.activate(layer))
    }
    #[must_use]
    pub fn action_states(&self) -> ActionStates {
        let Some(image) = &self.image else {
            return ActionStates::default();
        };
        let layers = image.layer_count();
        let active = image.active_layer();
        let state = image.read();
        let graph = &state.graph;
        ActionStates {
            flatten_image: layers > 1,
            merge_layer: layers > 1 && active.and_then(|id| graph.below(id)).is_some(),
            flatten_layer: layers > 1 && active.and_then(|id| graph.children(id).next()).is_some(),
        }
    }

    /// Where a new node of `kind` goes: into the active node if it takes it, otherwise above the
    /// nearest ancestor whose parent accepts it and isn't locked. If nothing does, the top of the
    /// root.
    #[must_use]
    pub fn adjust_layer_position(&self, kind: &NodeKind) -> Option<Position> {
        let image = self.image.as_ref()?;
        let active = image.active_layer();
        let state = image.read();
        let graph = &state.graph;
        let start = active.unwrap_or_else(|| graph.root());

        let mut parent = Some(start);
        let mut above = graph.children(start).last();
        while let Some(candidate) = parent {
            let locked = graph.get(candidate).is_some_and(NodeData::is_locked);
            if !locked && graph.allow_as_child(candidate, kind) {
                break;
            }
            above = Some(candidate);
            parent = graph.parent(candidate);
        }
        Some(match parent {
            Some(parent) => Position { parent, above },
            None => {
                log::warn!("no node accepted the new {} layer, adding to root", <&str>::from(kind));
                let root = graph.root();
                Position {
                    parent: root,
                    above: graph.children(root).last(),
                }
            }
        })
    }
    fn add_layer_common(&mut self, data: NodeData, update_projection: bool) -> Option<NodeID> {
        self.image.as_mut()?.block_until_operations_finished();
        let position = self.adjust_layer_position(data.kind())?;
        let image = self.image.as_mut()?;
        // An out of date parent group must be redrawn regardless.
        let update_projection = update_projection
            || (position.parent != image.root() && !image.projection_is_valid(position.parent));
        let id = NodeCommandsAdapter::new(image)
            .add_node(data, position.parent, position.above, update_projection)
            .ok()?;
        image.activate(id);
        Some(id)
    }
    /// A new empty paint layer, sized to the image.
    pub fn add_layer(&mut self) -> Option<NodeID> {
        if self.busy() {
            return None;
        }
        let image = self.image.as_mut()?;
        let name = image.next_layer_name();
        let raster = Raster::transparent(image.bounds());
        self.add_layer_common(NodeData::new(name, NodeKind::paint(raster)), false)
    }
    pub fn add_group_layer(&mut self) -> Option<NodeID> {
        if self.busy() {
            return None;
        }
        let name = self.image.as_mut()?.next_layer_name();
        self.add_layer_common(NodeData::new(name, NodeKind::group()), false)
    }
    /// A clone of the active layer.
    pub fn add_clone_layer(&mut self) -> Option<NodeID> {
        if self.busy() {
            return None;
        }
        let source = self.active_layer()?;
        let name = self.image.as_mut()?.next_layer_name();
        self.add_layer_common(NodeData::new(name, NodeKind::Clone { source }), true)
    }
    pub fn add_shape_layer(&mut self, shapes: Vec<Shape>) -> Option<NodeID> {
        if self.busy() {
            return None;
        }
        let name = self.image.as_mut()?.next_layer_name();
        self.add_layer_common(NodeData::new(name, NodeKind::Shape { shapes }), false)
    }

    fn begin_configuration(&mut self, role: Role, kind: NodeKind, label: &str) -> Option<ProvisionalHandle> {
        if self.busy() {
            return None;
        }
        let image = self.image.as_mut()?;
        // Before the macro opens, so finished jobs don't become part of it.
        image.block_until_operations_finished();
        let previous_active = image.active_layer();
        let default_name = image.next_layer_name();
        image.begin_macro(label);
        let Some(node) = self.add_layer_common(NodeData::new("", kind), true) else {
            if let Some(image) = self.image.as_mut() {
                image.end_macro();
            }
            return None;
        };
        let handle = ProvisionalHandle { node, role };
        self.configuring = Some(Provisional {
            handle,
            default_name,
            previous_active,
        });
        Some(handle)
    }
    /// Insert an unconfigured adjustment layer, to be finished with
    /// [`Self::commit_configuration`] or [`Self::cancel_configuration`].
    pub fn add_adjustment_layer(&mut self) -> Option<ProvisionalHandle> {
        let kind = NodeKind::Adjustment {
            filter: None,
            selection: self.selection.clone(),
        };
        self.begin_configuration(Role::Adjustment, kind, "New Filter Layer")
    }
    pub fn add_generator_layer(&mut self) -> Option<ProvisionalHandle> {
        let kind = NodeKind::Generator {
            config: None,
            selection: self.selection.clone(),
        };
        self.begin_configuration(Role::Generator, kind, "New Fill Layer")
    }
    pub fn add_file_layer(&mut self) -> Option<ProvisionalHandle> {
        self.begin_configuration(Role::File, NodeKind::File { file: None }, "New File Layer")
    }
    /// The name a provisional layer gets if committed without one.
    #[must_use]
    pub fn default_name(&self, handle: ProvisionalHandle) -> Option<&str> {
        self.configuring
            .as_ref()
            .filter(|provisional| provisional.handle == handle)
            .map(|provisional| provisional.default_name.as_str())
    }
    /// Show a provisional layer with `config`, without recording anything.
    pub fn preview_configuration(&mut self, handle: ProvisionalHandle, config: Option<FilterConfig>) {
        if self.default_name(handle).is_none() {
            return;
        }
        if let Some(image) = self.image.as_mut() {
            image.set_preview(handle.node, config);
        }
    }
    /// Finish configuring. Unconfigured results and configuration errors retract the layer, as if
    /// it was never added.
    pub fn commit_configuration(
        &mut self,
        handle: ProvisionalHandle,
        config: LayerConfig,
        name: Option<String>,
    ) -> Result<Option<NodeID>, ConfigurationError> {
        let provisional = match self.configuring.take() {
            Some(provisional) if provisional.handle == handle => provisional,
            other => {
                self.configuring = other;
                return Err(ConfigurationError::NoSession);
            }
        };
        let content = match self.configured_content(handle.role, config) {
            Ok(Some(content)) => content,
            Ok(None) => {
                self.retract(&provisional);
                return Ok(None);
            }
            Err(err) => {
                log::warn!("discarding new layer: {err}");
                self.retract(&provisional);
                return Err(err);
            }
        };
        let Some(image) = self.image.as_mut() else {
            return Err(ConfigurationError::NoSession);
        };
        image.set_preview(handle.node, None);
        let name = name.unwrap_or_else(|| provisional.default_name.clone());
        let mut adapter = NodeCommandsAdapter::new(image);
        let written = match content {
            Content::Filter(config) => adapter.set_filter(handle.node, Some(config)),
            Content::Kind(kind) => adapter.set_content(handle.node, kind),
        }
        .and_then(|()| adapter.set_name(handle.node, name));
        adapter.end_macro();
        match written {
            Ok(()) => Ok(Some(handle.node)),
            Err(err) => {
                log::error!("can't configure {}: {err}", handle.node);
                adapter.retract_node(handle.node);
                if let Some(previous) = provisional.previous_active {
                    image.activate(previous);
                }
                Ok(None)
            }
        }
    }
    /// Discard a provisional layer. Nothing of it is left in the history.
    pub fn cancel_configuration(&mut self, handle: ProvisionalHandle) -> bool {
        match self.configuring.take() {
            Some(provisional) if provisional.handle == handle => self.retract(&provisional),
            other => {
                self.configuring = other;
                false
            }
        }
    }
    fn retract(&mut self, provisional: &Provisional) -> bool {
        let Some(image) = self.image.as_mut() else {
            return false;
        };
        image.set_preview(provisional.handle.node, None);
        image.end_macro();
        let retracted = NodeCommandsAdapter::new(image).retract_node(provisional.handle.node);
        match provisional.previous_active {
            Some(previous) => {
                image.activate(previous);
            }
            None => image.deactivate(),
        }
        retracted
    }
    /// Check a committed config, and turn it into what the node will hold.
    fn configured_content(
        &self,
        role: Role,
        config: LayerConfig,
    ) -> Result<Option<Content>, ConfigurationError> {
        match (role, config) {
            (Role::Adjustment, LayerConfig::Filter(config)) => {
                let Some(config) = config else {
                    return Ok(None);
                };
                Filter::lookup(&config)?;
                Ok(Some(Content::Filter(config)))
            }
            (Role::Generator, LayerConfig::Filter(config)) => {
                let Some(config) = config else {
                    return Ok(None);
                };
                Generator::lookup(&config)?;
                Ok(Some(Content::Filter(config)))
            }
            (Role::File, LayerConfig::File { path, scaling }) => {
                if path.as_os_str().is_empty() {
                    return Err(ConfigurationError::NoFileName);
                }
                let files = self
                    .files
                    .as_ref()
                    .ok_or_else(|| FileError::NoSource(path.clone()))?;
                let decoded = files.decode(&path)?;
                Ok(Some(Content::Kind(NodeKind::File {
                    file: Some(FileLayer {
                        path,
                        scaling,
                        decoded: Some(Arc::new(decoded.raster)),
                        resolution: decoded.resolution,
                    }),
                })))
            }
            _ => Err(ConfigurationError::WrongKind),
        }
    }

    /// Start editing the filter of the active adjustment or generator layer. Returns the current
    /// config, or `None` if there's nothing to edit.
    pub fn begin_properties(&mut self) -> Option<Option<FilterConfig>> {
        if self.busy() {
            return None;
        }
        let image = self.image.as_ref()?;
        if image.selected_nodes().len() > 1 {
            return None;
        }
        let node = image.active_layer()?;
        let before = image.read().graph.get(node)?.kind().filter()?.cloned();
        self.properties = Some(PropertiesSession {
            node,
            before: before.clone(),
        });
        Some(before)
    }
    pub fn preview_properties(&mut self, config: Option<FilterConfig>) {
        let (Some(session), Some(image)) = (&self.properties, self.image.as_mut()) else {
            return;
        };
        image.set_preview(session.node, config);
    }
    /// Keep the edit. The filter change is only recorded if it serializes differently.
    pub fn commit_properties(&mut self, name: impl Into<String>, config: Option<FilterConfig>) -> bool {
        if self.busy() {
            return false;
        }
        let (Some(session), Some(image)) = (self.properties.take(), self.image.as_mut()) else {
            return false;
        };
        image.set_preview(session.node, None);
        let xml = |config: &Option<FilterConfig>| config.as_ref().map(FilterConfig::to_xml).transpose();
        // Text that can't be written compares as changed.
        let changed = match (xml(&session.before), xml(&config)) {
            (Ok(before), Ok(after)) => before != after,
            _ => true,
        };
        let mut adapter = NodeCommandsAdapter::new(image);
        adapter.begin_macro("Change Layer Properties");
        let result = adapter.set_name(session.node, name).and_then(|()| {
            if changed {
                adapter.set_filter(session.node, config)
            } else {
                Ok(())
            }
        });
        adapter.end_macro_or_rollback(result).is_ok()
    }
    /// Drop the edit, the layer shows its old filter again.
    pub fn cancel_properties(&mut self) {
        if let (Some(session), Some(image)) = (self.properties.take(), self.image.as_mut()) {
            image.set_preview(session.node, None);
        }
    }

    /// Replace `source` with a paint layer of what it shows. Groups and layers with children or a
    /// style are flattened instead.
    pub fn convert_node_to_paint_layer(&mut self, source: NodeID) -> Option<NodeID> {
        if self.busy() {
            return None;
        }
        let image = self.image.as_mut()?;
        image.block_until_operations_finished();
        let (data, parent, flatten) = {
            let state = image.read();
            let graph = &state.graph;
            let data = graph.get(source)?.clone();
            let flatten = !data.kind().is_mask()
                && (data.kind().is_group()
                    || data.style().is_some()
                    || graph.children(source).next().is_some());
            (data, graph.parent(source)?, flatten)
        };
        if flatten {
            return image.flatten_layer(source);
        }
        let put_behind = data.blend().op == CompositeOp::Behind;
        let op = if put_behind {
            CompositeOp::Normal
        } else {
            data.blend().op
        };
        let kind = NodeKind::paint((*image.projection(source)).clone());

        let position = {
            let state = image.read();
            let graph = &state.graph;
            let mut parent = Some(parent);
            let mut above = Some(source);
            while let Some(candidate) = parent {
                if graph.allow_as_child(candidate, &kind) {
                    break;
                }
                above = Some(candidate);
                parent = graph.parent(candidate);
            }
            let parent = parent?;
            // A mask drawn behind its layer ends up beneath that layer.
            if put_behind && above == graph.parent(source) {
                above = above.and_then(|above| graph.below(above));
            }
            Position { parent, above }
        };

        let layer = NodeData::new(data.name(), kind)
            .with_blend(Blend::new(op, data.blend().opacity))
            .with_metadata(data.metadata().clone());
        let mut adapter = NodeCommandsAdapter::new(image);
        adapter.begin_macro("Convert to a Paint Layer");
        let result = adapter
            .add_node(layer, position.parent, position.above, true)
            .and_then(|id| adapter.remove_node(source).map(|()| id));
        adapter.end_macro_or_rollback(result).ok()
    }
    /// Turn the active group into an animated paint layer, one frame per child from the bottom.
    pub fn convert_group_to_animated(&mut self) -> Option<NodeID> {
        if self.busy() {
            return None;
        }
        let image = self.image.as_mut()?;
        let group = image.active_layer()?;
        image.block_until_operations_finished();
        let (name, parent, children) = {
            let state = image.read();
            let graph = &state.graph;
            let data = graph.get(group).filter(|data| data.kind().is_group())?;
            (
                data.name().to_owned(),
                graph.parent(group)?,
                graph.children(group).collect::<Vec<_>>(),
            )
        };
        let mut frames: Vec<Arc<Raster>> = children.into_iter().map(|child| image.projection(child)).collect();
        if frames.is_empty() {
            frames.push(Arc::new(Raster::transparent(image.bounds())));
        }
        let layer = NodeData::new(name, NodeKind::Paint { frames })
            .with_flags(NodeFlags::VISIBLE | NodeFlags::ANIMATED);
        let mut adapter = NodeCommandsAdapter::new(image);
        adapter.begin_macro("Convert to an animated layer");
        let result = adapter
            .add_node(layer, parent, Some(group), true)
            .and_then(|id| adapter.remove_node(group).map(|()| id));
        let id = adapter.end_macro_or_rollback(result).ok()?;
        image.activate(id);
        Some(id)
    }
    /// Replace the active layer with a paint layer of its projection. Its masks move over.
    pub fn rasterize_layer(&mut self) -> Option<NodeID> {
        if self.busy() {
            return None;
        }
        let image = self.image.as_mut()?;
        let layer = image.active_layer()?;
        image.block_until_operations_finished();
        let (data, parent, children) = {
            let state = image.read();
            let graph = &state.graph;
            (
                graph.get(layer)?.clone(),
                graph.parent(layer)?,
                graph.children(layer).collect::<Vec<_>>(),
            )
        };
        let projection = image.projection(layer);
        let content = projection.cropped(projection.exact_bounds());
        let paint = NodeData::new(data.name(), NodeKind::paint(content))
            .with_blend(Blend::new(CompositeOp::Normal, data.blend().opacity));

        let mut adapter = NodeCommandsAdapter::new(image);
        adapter.begin_macro("Rasterize Layer");
        let result = adapter.add_node(paint, parent, Some(layer), true).and_then(|paint| {
            let mut top = None;
            for child in children {
                match adapter.move_node(child, paint, top) {
                    Ok(()) => top = Some(child),
                    Err(err) => log::warn!("can't move {child} onto the rasterized layer: {err}"),
                }
            }
            adapter.remove_node(layer)?;
            Ok(paint)
        });
        let id = adapter.end_macro_or_rollback(result).ok()?;
        image.activate(id);
        Some(id)
    }
    /// Set or clear the style of the active layer.
    pub fn layer_style(&mut self, style: Option<LayerStyle>) -> bool {
        if self.busy() {
            return false;
        }
        let Some(image) = self.image.as_mut() else {
            return false;
        };
        let Some(layer) = image.active_layer() else {
            return false;
        };
        image.block_until_operations_finished();
        let style = style.filter(|style| !style.is_empty());
        NodeCommandsAdapter::new(image).set_style(layer, style).is_ok()
    }
    /// Rotate the active layer in the background.
    pub fn rotate_layer(&mut self, radians: f64) -> bool {
        if self.busy() {
            return false;
        }
        let Some(image) = self.image.as_mut() else {
            return false;
        };
        let Some(layer) = image.active_layer() else {
            return false;
        };
        image.block_until_operations_finished();
        image.rotate_node(layer, radians)
    }
    /// Flatten the image. If there are hidden layers, which flattening loses, `confirm_hidden` is
    /// asked first and may refuse.
    pub fn flatten_image(&mut self, confirm_hidden: impl FnOnce(usize) -> bool) -> Option<NodeID> {
        if self.busy() {
            return None;
        }
        let image = self.image.as_mut()?;
        image.block_until_operations_finished();
        let hidden = image.hidden_layer_count();
        if hidden > 0 && !confirm_hidden(hidden) {
            log::debug!("flatten declined with {hidden} hidden layers");
            return None;
        }
        image.flatten()
    }
    /// Merge the selected nodes, two neighboring selection masks, or the active layer down.
    ///
    /// Merging down layers that carry metadata asks `choose_strategy` for a strategy name, and
    /// merges nothing if it gives none.
    pub fn merge_layer(
        &mut self,
        choose_strategy: impl FnOnce() -> Option<String>,
    ) -> Result<Option<NodeID>, MergeLayerError> {
        if self.busy() {
            return Ok(None);
        }
        let Some(image) = self.image.as_mut() else {
            return Ok(None);
        };
        let Some(layer) = image.active_layer() else {
            return Ok(None);
        };
        image.block_until_operations_finished();

        let selected = image.selected_nodes();
        if selected.len() > 1 {
            return Ok(Some(image.merge_multiple_layers(&selected, layer)?));
        }
        let (below, masks, plain) = {
            let state = image.read();
            let graph = &state.graph;
            let below = graph.below(layer);
            let is_selection_mask =
                |id: NodeID| matches!(graph.get(id).map(NodeData::kind), Some(NodeKind::SelectionMask { .. }));
            let masks = below.is_some_and(|below| is_selection_mask(layer) && is_selection_mask(below));
            let plain = below.is_some_and(|below| {
                graph.get(layer).is_some_and(|data| data.metadata().is_empty())
                    && graph.get(below).is_some_and(|data| data.metadata().is_empty())
            });
            (below, masks, plain)
        };
        let Some(below) = below else {
            return Ok(None);
        };
        if masks {
            return Ok(Some(image.merge_multiple_layers(&[layer, below], layer)?));
        }
        let strategy = if plain {
            MergeStrategy::Drop
        } else {
            let Some(name) = choose_strategy() else {
                return Ok(None);
            };
            MergeStrategy::by_name(&name)?
        };
        Ok(Some(image.merge_down(layer, strategy)?))
    }
    pub fn flatten_layer(&mut self) -> Option<NodeID> {
        if self.busy() {
            return None;
        }
        let image = self.image.as_mut()?;
        let layer = image.active_layer()?;
        image.block_until_operations_finished();
        image.flatten_layer(layer)
    }
    /// Crop the image to what the active layer shows.
    pub fn image_resize_to_active_layer(&mut self) -> bool {
        if self.busy() {
            return false;
        }
        let Some(image) = self.image.as_mut() else {
            return false;
        };
        let Some(layer) = image.active_layer() else {
            return false;
        };
        image.block_until_operations_finished();
        let rect = image.projection(layer).exact_bounds();
        if rect.is_empty() {
            log::info!("Layer is empty");
            return false;
        }
        image.crop(rect)
    }
    /// Crop to the current bounds, dropping content outside them.
    pub fn trim_to_image(&mut self) -> bool {
        if self.busy() {
            return false;
        }
        let Some(image) = self.image.as_mut() else {
            return false;
        };
        image.block_until_operations_finished();
        let bounds = image.bounds();
        image.crop(bounds)
    }
    pub fn remove_layer(&mut self, layer: NodeID) -> bool {
        if self.busy() {
            return false;
        }
        let Some(image) = self.image.as_mut() else {
            return false;
        };
        image.block_until_operations_finished();
        NodeCommandsAdapter::new(image).remove_node(layer).is_ok()
    }
    /// Projections of groups, for exporting each on its own. Hidden groups are skipped unless
    /// `include_invisible`, and groups inside groups unless not `top_level_only`.
    #[must_use]
    pub fn save_group_layers(&self, include_invisible: bool, top_level_only: bool) -> Vec<(String, Arc<Raster>)> {
        let Some(image) = &self.image else {
            return Vec::new();
        };
        let groups: Vec<(NodeID, String)> = {
            let state = image.read();
            let graph = &state.graph;
            let root = graph.root();
            let mut out = Vec::new();
            let mut stack: Vec<NodeID> = graph.children(root).collect();
            stack.reverse();
            while let Some(id) = stack.pop() {
                let Some(data) = graph.get(id) else {
                    continue;
                };
                if !data.kind().is_group() || (!include_invisible && !data.is_visible()) {
                    continue;
                }
                out.push((id, data.name().to_owned()));
                if !top_level_only {
                    let first = stack.len();
                    stack.extend(graph.children(id));
                    stack[first..].reverse();
                }
            }
            out
        };
        groups
            .into_iter()
            .map(|(id, name)| (name, image.projection(id)))
            .collect()
    }
}

enum Content {
    Filter(FilterConfig),
    Kind(NodeKind),
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum MergeLayerError {
    #[error(transparent)]
    Strategy(#[from] StrategyError),
    #[error(transparent)]
    Merge(#[from] MergeError),
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::raster::Rect;

    fn manager() -> LayerManager {
        LayerManager::new(Image::default())
    }

    #[test]
    fn no_image_is_a_no_op() {
        let mut manager = LayerManager::default();
        assert_eq!(manager.add_layer(), None);
        assert_eq!(manager.add_adjustment_layer(), None);
        assert!(!manager.trim_to_image());
        assert_eq!(manager.merge_layer(|| None), Ok(None));
        assert_eq!(manager.action_states(), ActionStates::default());
    }
    #[test]
    fn new_layers_go_above_the_active_one() {
        let mut manager = manager();
        let a = manager.add_layer().unwrap();
        let b = manager.add_layer().unwrap();
        assert!(manager.activate_layer(a));
        let c = manager.add_layer().unwrap();
        let image = manager.image().unwrap();
        let root = image.root();
        let order: Vec<_> = image.read().graph.children(root).collect();
        assert_eq!(order, [a, c, b]);
        assert_eq!(image.read().graph.get(c).unwrap().name(), "Layer 3");
    }
    #[test]
    fn locked_groups_are_skipped() {
        let mut manager = manager();
        let group = manager.add_group_layer().unwrap();
        manager
            .commands()
            .unwrap()
            .set_properties(
                group,
                crate::state::graph::Properties {
                    name: "locked".into(),
                    flags: NodeFlags::VISIBLE | NodeFlags::LOCKED,
                },
            )
            .unwrap();
        let position = manager.adjust_layer_position(&NodeKind::group()).unwrap();
        let root = manager.image().unwrap().root();
        assert_eq!(position, Position { parent: root, above: Some(group) });
    }
    #[test]
    fn files_need_a_source() {
        let mut manager = manager();
        let handle = manager.add_file_layer().unwrap();
        let result = manager.commit_configuration(
            handle,
            LayerConfig::File {
                path: "missing.png".into(),
                scaling: FileScaling::None,
            },
            None,
        );
        assert!(matches!(result, Err(ConfigurationError::File(FileError::NoSource(_)))));
        let image = manager.image().unwrap();
        assert!(image.read().graph.is_empty());
        assert_eq!(image.history_depth(), 0);
        assert!(!image.in_macro());
    }
    #[test]
    fn properties_record_only_real_changes() {
        let mut manager = manager();
        let handle = manager.add_adjustment_layer().unwrap();
        let invert = FilterConfig::new("invert");
        let layer = manager
            .commit_configuration(handle, LayerConfig::Filter(Some(invert.clone())), None)
            .unwrap()
            .unwrap();
        assert_eq!(manager.image().unwrap().history_depth(), 1);

        assert_eq!(manager.begin_properties(), Some(Some(invert.clone())));
        manager.preview_properties(Some(FilterConfig::new("threshold")));
        manager.cancel_properties();
        let image = manager.image().unwrap();
        assert_eq!(image.history_depth(), 1);
        assert_eq!(image.preview(layer), None);

        manager.begin_properties();
        assert!(manager.commit_properties("Layer 1", Some(invert)));
        assert_eq!(manager.image().unwrap().history_depth(), 1);
    }
    #[test]
    fn edits_wait_for_the_configured_layer() {
        let mut manager = manager();
        let layer = manager.add_layer().unwrap();
        let handle = manager.add_adjustment_layer().unwrap();
        assert_eq!(manager.add_layer(), None);
        assert!(manager.commands().is_none());
        assert!(!manager.remove_layer(layer));
        assert!(manager.cancel_configuration(handle));
        let image = manager.image().unwrap();
        assert_eq!(image.layer_count(), 1);
        assert!(image.read().graph.get(layer).is_some());
        assert_eq!(image.history_depth(), 1);
        assert!(manager.add_layer().is_some());
    }
    #[test]
    fn cancel_inside_an_outer_macro_removes_the_layer() {
        let mut manager = manager();
        manager.image_mut().unwrap().begin_macro("script");
        let handle = manager.add_adjustment_layer().unwrap();
        assert!(manager.cancel_configuration(handle));
        let image = manager.image_mut().unwrap();
        assert!(image.read().graph.get(handle.node()).is_none());
        assert!(image.end_macro());
        assert!(image.undo());
        assert!(image.read().graph.is_empty());
        assert_eq!(image.history_depth(), 0);
    }
    #[test]
    fn merge_masks_by_union() {
        let mut manager = manager();
        let layer = manager.add_layer().unwrap();
        let root = manager.image().unwrap().root();
        let mut adapter = manager.commands().unwrap();
        let mask = |rect| NodeData::new("mask", NodeKind::SelectionMask {
            selection: Selection::from_rect(rect),
        });
        let lower = adapter.add_node(mask(Rect::new(0, 0, 2, 2)), layer, None, true).unwrap();
        let upper = adapter
            .add_node(mask(Rect::new(2, 0, 2, 2)), layer, Some(lower), true)
            .unwrap();
        assert!(manager.activate_layer(upper));
        let merged = manager.merge_layer(|| None).unwrap().unwrap();
        let image = manager.image().unwrap();
        let state = image.read();
        let graph = &state.graph;
        assert_eq!(graph.children(layer).collect::<Vec<_>>(), [merged]);
        let Some(NodeKind::SelectionMask { selection }) = graph.get(merged).map(NodeData::kind) else {
            panic!("merged masks should be a selection mask");
        };
        assert_eq!(selection.get(0, 0), u8::MAX);
        assert_eq!(selection.get(3, 1), u8::MAX);
        assert_eq!(graph.children(root).count(), 1);
    }
}
