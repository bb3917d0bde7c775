//! Graph-wide operations: merging, flattening, cropping, rotating, color conversion.
//!
//! Each is recorded as a single macro, so it undoes in one step.

use std::sync::Arc;

use super::Image;
use crate::adapter::NodeCommandsAdapter;
use crate::blend::{Blend, CompositeOp};
use crate::filter::{Filter, FilterConfig};
use crate::jobs::{self, ContentUpdate};
use crate::metadata::{MergeStrategy, MetadataStore};
use crate::projection::composite_stack;
use crate::raster::{Raster, Rect};
use crate::state::graph::{NodeData, NodeID, NodeKind};
use crate::state::ColorSpace;

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum MergeError {
    #[error("node is not a live layer")]
    NotALayer,
    #[error("nothing beneath to merge into")]
    NothingBeneath,
    #[error("nothing to merge")]
    Empty,
    #[error(transparent)]
    Target(#[from] crate::state::graph::TargetError),
}

impl Image {
    /// Merge `layer` into the layer directly beneath it. The result is a single paint layer with
    /// the lower layer's name, and metadata combined by `strategy`.
    pub fn merge_down(&mut self, layer: NodeID, strategy: MergeStrategy) -> Result<NodeID, MergeError> {
        let (lower, parent, upper_data, lower_data) = {
            let state = self.read();
            let graph = &state.graph;
            let upper_data = graph
                .get(layer)
                .filter(|data| !data.kind().is_mask() && layer != graph.root())
                .ok_or(MergeError::NotALayer)?
                .clone();
            let lower = graph.below(layer).ok_or(MergeError::NothingBeneath)?;
            let lower_data = graph
                .get(lower)
                .filter(|data| !data.kind().is_mask())
                .ok_or(MergeError::NothingBeneath)?
                .clone();
            let parent = graph.parent(layer).ok_or(MergeError::NotALayer)?;
            (lower, parent, upper_data, lower_data)
        };

        let lower_projection = self.projection(lower);
        let upper_projection = self.projection(layer);
        let mut stack = Vec::with_capacity(2);
        if lower_data.is_visible() {
            stack.push((
                lower_projection.as_ref(),
                Blend::new(CompositeOp::Normal, lower_data.blend().opacity),
            ));
        }
        if upper_data.is_visible() {
            stack.push((upper_projection.as_ref(), upper_data.blend()));
        }
        let rect = stack
            .iter()
            .fold(Rect::EMPTY, |acc, (raster, _)| acc.union(&raster.rect()));
        let merged = composite_stack(rect, &stack);
        let metadata = strategy.merge(&[lower_data.metadata(), upper_data.metadata()]);
        log::debug!("Merging {layer} down into {lower} with {strategy}");

        let mut adapter = NodeCommandsAdapter::new(self);
        adapter.begin_macro("Merge Down");
        let result = adapter
            .add_node(
                NodeData::new(lower_data.name(), NodeKind::paint(merged)).with_metadata(metadata),
                parent,
                Some(layer),
                true,
            )
            .and_then(|merged| {
                adapter.remove_node(layer)?;
                adapter.remove_node(lower)?;
                Ok(merged)
            });
        let merged = adapter.end_macro_or_rollback(result)?;
        self.activate(merged);
        Ok(merged)
    }
    /// Merge several nodes into one, placed where `anchor` is. Two adjacent selection masks are
    /// combined into one mask covering both.
    pub fn merge_multiple_layers(
        &mut self,
        nodes: &[NodeID],
        anchor: NodeID,
    ) -> Result<NodeID, MergeError> {
        if let Some(merged) = self.try_merge_selection_masks(nodes)? {
            return Ok(merged);
        }
        // Everything to merge, in paint order. Nodes inside other merged nodes are covered by
        // their ancestor already.
        let (layers, anchor_data, parent) = {
            let state = self.read();
            let graph = &state.graph;
            let layers: Vec<(NodeID, &NodeData)> = graph
                .iter()
                .filter(|(id, data)| {
                    nodes.contains(id)
                        && !data.kind().is_mask()
                        && !graph.ancestors(*id).any(|ancestor| nodes.contains(&ancestor))
                })
                .collect();
            if layers.is_empty() {
                return Err(MergeError::Empty);
            }
            let anchor_data = graph.get(anchor).ok_or(MergeError::NotALayer)?.clone();
            let parent = graph.parent(anchor).ok_or(MergeError::NotALayer)?;
            let layers: Vec<(NodeID, Option<Blend>)> = layers
                .into_iter()
                .map(|(id, data)| (id, data.is_visible().then(|| data.blend())))
                .collect();
            (layers, anchor_data, parent)
        };
        let projections: Vec<(Arc<Raster>, Blend)> = layers
            .iter()
            .filter_map(|&(id, blend)| Some((self.projection(id), blend?)))
            .collect();
        let rect = projections
            .iter()
            .fold(Rect::EMPTY, |acc, (raster, _)| acc.union(&raster.rect()));
        let stack: Vec<(&Raster, Blend)> = projections
            .iter()
            .map(|(raster, blend)| (raster.as_ref(), *blend))
            .collect();
        let merged = composite_stack(rect, &stack);

        let mut adapter = NodeCommandsAdapter::new(self);
        adapter.begin_macro("Merge Selected Nodes");
        let result = adapter
            .add_node(
                NodeData::new(anchor_data.name(), NodeKind::paint(merged)),
                parent,
                Some(anchor),
                true,
            )
            .and_then(|merged| {
                for &(id, _) in &layers {
                    adapter.remove_node(id)?;
                }
                Ok(merged)
            });
        let merged = adapter.end_macro_or_rollback(result)?;
        self.activate(merged);
        Ok(merged)
    }
    /// Two selection masks that are adjacent siblings merge by union.
    fn try_merge_selection_masks(&mut self, nodes: &[NodeID]) -> Result<Option<NodeID>, MergeError> {
        let [a, b] = nodes else {
            return Ok(None);
        };
        let (lower, upper, selection, name, parent) = {
            let state = self.read();
            let graph = &state.graph;
            let (lower, upper) = if graph.below(*a) == Some(*b) {
                (*b, *a)
            } else if graph.below(*b) == Some(*a) {
                (*a, *b)
            } else {
                return Ok(None);
            };
            let (Some(lower_data), Some(upper_data)) = (graph.get(lower), graph.get(upper)) else {
                return Ok(None);
            };
            let (
                NodeKind::SelectionMask { selection: lower_sel },
                NodeKind::SelectionMask { selection: upper_sel },
            ) = (lower_data.kind(), upper_data.kind())
            else {
                return Ok(None);
            };
            let Some(parent) = graph.parent(upper) else {
                return Ok(None);
            };
            (
                lower,
                upper,
                lower_sel.union(upper_sel),
                upper_data.name().to_owned(),
                parent,
            )
        };
        let mut adapter = NodeCommandsAdapter::new(self);
        adapter.begin_macro("Merge Selection Masks");
        let result = adapter
            .add_node(
                NodeData::new(name, NodeKind::SelectionMask { selection }),
                parent,
                Some(upper),
                true,
            )
            .and_then(|merged| {
                adapter.remove_node(upper)?;
                adapter.remove_node(lower)?;
                Ok(merged)
            });
        Ok(Some(adapter.end_macro_or_rollback(result)?))
    }
    /// Collapse the whole image into one paint layer showing what the image shows now. Hidden
    /// layers are lost.
    pub fn flatten(&mut self) -> Option<NodeID> {
        let (root, top_level) = {
            let state = self.read();
            let root = state.graph.root();
            (root, state.graph.children(root).collect::<Vec<_>>())
        };
        if top_level.is_empty() {
            return None;
        }
        let projection = self.projection(root);
        let name = self.next_layer_name();
        let mut adapter = NodeCommandsAdapter::new(self);
        adapter.begin_macro("Flatten Image");
        let result = adapter
            .add_node(
                NodeData::new(name, NodeKind::paint((*projection).clone())),
                root,
                top_level.last().copied(),
                true,
            )
            .and_then(|flat| {
                for &id in &top_level {
                    adapter.remove_node(id)?;
                }
                Ok(flat)
            });
        let flat = adapter.end_macro_or_rollback(result).ok()?;
        self.activate(flat);
        Some(flat)
    }
    /// Replace a layer that has children or a style with a paint layer of its projection.
    /// Layers with neither are left alone.
    pub fn flatten_layer(&mut self, layer: NodeID) -> Option<NodeID> {
        let (data, parent) = {
            let state = self.read();
            let graph = &state.graph;
            let data = graph.get(layer)?.clone();
            let has_children = graph.children(layer).next().is_some();
            if data.kind().is_mask() || (!has_children && data.style().is_none()) {
                return None;
            }
            (data, graph.parent(layer)?)
        };
        let projection = self.projection(layer);
        let mut adapter = NodeCommandsAdapter::new(self);
        adapter.begin_macro("Flatten Layer");
        let result = adapter
            .add_node(
                NodeData::new(data.name(), NodeKind::paint((*projection).clone()))
                    .with_blend(data.blend())
                    .with_flags(data.flags())
                    .with_metadata(data.metadata().clone()),
                parent,
                Some(layer),
                true,
            )
            .and_then(|flat| {
                adapter.remove_node(layer)?;
                Ok(flat)
            });
        let flat = adapter.end_macro_or_rollback(result).ok()?;
        self.activate(flat);
        Some(flat)
    }
    /// Make `rect` the new canvas. Content is shifted so that the corner of `rect` becomes the
    /// origin, and clipped to the new bounds. An empty rect does nothing.
    pub fn crop(&mut self, rect: Rect) -> bool {
        if rect.is_empty() {
            log::debug!("ignoring crop to empty {rect:?}");
            return false;
        }
        let new_bounds = Rect::new(0, 0, rect.width, rect.height);
        let (dx, dy) = (rect.x.saturating_neg(), rect.y.saturating_neg());
        let updates: Vec<(NodeID, NodeKind)> = self
            .read()
            .graph
            .iter()
            .filter_map(|(id, data)| {
                let cropped = crop_kind(data.kind(), dx, dy, new_bounds)?;
                (cropped != *data.kind()).then_some((id, cropped))
            })
            .collect();
        self.begin_macro("Crop Image");
        self.write_with(|writer| {
            writer.document().set_bounds(new_bounds);
            let mut graph = writer.graph();
            for (id, kind) in updates {
                if let Err(err) = graph.set_content(id, kind) {
                    log::error!("can't crop {id}: {err}");
                }
            }
        });
        self.end_macro();
        true
    }
    /// Rotate the content of `node` and everything beneath it by `radians` about the center of
    /// the image. Runs in the background, see [`Image::block_until_operations_finished`].
    pub fn rotate_node(&mut self, node: NodeID, radians: f64) -> bool {
        let snapshot: Vec<(NodeID, NodeKind)> = {
            let state = self.read();
            let graph = &state.graph;
            let Some(data) = graph.get(node) else {
                return false;
            };
            std::iter::once((node, data.kind().clone()))
                .chain(
                    graph
                        .descendants(node)
                        .into_iter()
                        .filter_map(|id| Some((id, graph.get(id)?.kind().clone()))),
                )
                .collect()
        };
        let bounds = self.bounds();
        let pivot = (
            f64::from(bounds.x) + f64::from(bounds.width) / 2.0,
            f64::from(bounds.y) + f64::from(bounds.height) / 2.0,
        );
        self.jobs.spawn("Rotate Layer", move || {
            snapshot
                .into_iter()
                .filter_map(|(target, from)| {
                    let to = jobs::rotate_kind(&from, radians, pivot)?;
                    Some(ContentUpdate { target, from, to })
                })
                .collect()
        });
        true
    }
    /// Change the color space. Converting to grayscale desaturates every paint layer.
    pub fn convert_color_space(&mut self, space: ColorSpace) -> bool {
        if self.color_space() == space {
            return false;
        }
        let desaturate = FilterConfig::new("desaturate");
        let updates: Vec<(NodeID, NodeKind)> = if space == ColorSpace::Graya {
            self.read()
                .graph
                .iter()
                .filter_map(|(id, data)| {
                    let NodeKind::Paint { frames } = data.kind() else {
                        return None;
                    };
                    let frames = frames
                        .iter()
                        .map(|frame| Filter::apply(&desaturate, frame).map(Arc::new))
                        .collect::<Result<Vec<_>, _>>();
                    match frames {
                        Ok(frames) => Some((id, NodeKind::Paint { frames })),
                        Err(err) => {
                            log::error!("can't desaturate {id}: {err}");
                            None
                        }
                    }
                })
                .collect()
        } else {
            Vec::new()
        };
        self.begin_macro("Convert Image Color Space");
        self.write_with(|writer| {
            writer.document().set_color_space(space);
            let mut graph = writer.graph();
            for (id, kind) in updates {
                if let Err(err) = graph.set_content(id, kind) {
                    log::error!("can't convert {id}: {err}");
                }
            }
        });
        self.end_macro()
    }
    /// Combined metadata of several layers, bottom-most first.
    #[must_use]
    pub fn merged_metadata(&self, layers: &[NodeID], strategy: MergeStrategy) -> MetadataStore {
        let state = self.read();
        let stores: Vec<&MetadataStore> = layers
            .iter()
            .filter_map(|&id| state.graph.get(id).map(NodeData::metadata))
            .collect();
        strategy.merge(&stores)
    }
}

/// Content of a node after moving by `(dx, dy)` and clipping to `bounds`, for the kinds whose
/// content is placed in image space.
fn crop_kind(kind: &NodeKind, dx: i32, dy: i32, bounds: Rect) -> Option<NodeKind> {
    let crop_raster = |raster: &Raster| raster.translated(dx, dy).cropped(bounds);
    Some(match kind {
        NodeKind::Paint { frames } => NodeKind::Paint {
            frames: frames
                .iter()
                .map(|frame| Arc::new(crop_raster(frame)))
                .collect(),
        },
        NodeKind::Adjustment { filter, selection } => NodeKind::Adjustment {
            filter: filter.clone(),
            selection: selection
                .as_ref()
                .map(|selection| selection.translated(dx, dy).cropped(bounds)),
        },
        NodeKind::Generator { config, selection } => NodeKind::Generator {
            config: config.clone(),
            selection: selection
                .as_ref()
                .map(|selection| selection.translated(dx, dy).cropped(bounds)),
        },
        NodeKind::SelectionMask { selection } => NodeKind::SelectionMask {
            selection: selection.translated(dx, dy).cropped(bounds),
        },
        NodeKind::TransparencyMask { selection } => NodeKind::TransparencyMask {
            selection: selection.translated(dx, dy).cropped(bounds),
        },
        // Vector and external content moves along, but keeps what lies outside.
        NodeKind::Shape { shapes } => NodeKind::Shape {
            shapes: shapes.iter().map(|shape| shape.translated(dx, dy)).collect(),
        },
        NodeKind::File { file: Some(file) } => {
            let mut file = file.clone();
            file.decoded = file
                .decoded
                .map(|decoded| Arc::new(decoded.translated(dx, dy)));
            NodeKind::File { file: Some(file) }
        }
        NodeKind::File { file: None } | NodeKind::Group { .. } | NodeKind::Clone { .. } => {
            return None
        }
    })
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::color::Color;
    use crate::state::graph::Location;

    fn add(image: &mut Image, parent: NodeID, data: NodeData) -> NodeID {
        image
            .write_with(|writer| writer.graph().insert(Location::Top(parent), data))
            .unwrap()
    }

    #[test]
    fn crop_shifts_content() {
        let mut image = Image::default();
        let root = image.root();
        let mut raster = Raster::transparent(Rect::new(0, 0, 8, 8));
        raster.set(5, 6, Color::WHITE);
        let layer = add(&mut image, root, NodeData::new("a", NodeKind::paint(raster)));
        assert!(image.crop(Rect::new(4, 4, 2, 4)));
        assert_eq!(image.bounds(), Rect::new(0, 0, 2, 4));
        let projection = image.projection(layer);
        assert_eq!(projection.rect(), Rect::new(0, 0, 2, 4));
        assert_eq!(projection.get(1, 2), Color::WHITE);
        assert!(image.undo());
        assert_eq!(image.bounds(), Rect::new(0, 0, 512, 512));
        assert_eq!(image.projection(layer).get(5, 6), Color::WHITE);
    }
    #[test]
    fn rotation_applies_on_join() {
        let mut image = Image::new(crate::state::Document {
            bounds: Rect::new(0, 0, 4, 4),
            ..Default::default()
        });
        let root = image.root();
        let mut raster = Raster::transparent(Rect::new(0, 0, 4, 4));
        raster.set(0, 0, Color::WHITE);
        let layer = add(&mut image, root, NodeData::new("a", NodeKind::paint(raster)));
        assert!(image.rotate_node(layer, std::f64::consts::PI));
        assert_eq!(image.outstanding_operations(), 1);
        image.block_until_operations_finished();
        assert_eq!(image.outstanding_operations(), 0);
        assert_eq!(image.projection(layer).get(3, 3), Color::WHITE);
        assert_eq!(image.last_label().as_deref(), Some("Rotate Layer"));
    }
    #[test]
    fn grayscale_desaturates() {
        let mut image = Image::default();
        let root = image.root();
        let red = Color::from_straight(1.0, 0.0, 0.0, 1.0);
        let layer = add(
            &mut image,
            root,
            NodeData::new("a", NodeKind::paint(Raster::filled(Rect::new(0, 0, 1, 1), red))),
        );
        assert!(image.convert_color_space(ColorSpace::Graya));
        let [r, g, b, _] = image.projection(layer).get(0, 0).premultiplied();
        assert_eq!((r, g), (g, b));
        assert!(!image.convert_color_space(ColorSpace::Graya));
    }
}
