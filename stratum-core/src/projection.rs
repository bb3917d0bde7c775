//! # Projections
//!
//! The projection of a node is its fully rendered output: its own content, or its children
//! composited bottom to top, followed by its transparency masks and style. Projections are cached
//! per node and dropped when anything they were built from changes. Invalidation only ever
//! travels up the tree (and sideways to the adjustments and clones that read a node), never down.

use std::collections::BTreeSet;
use std::sync::Arc;

use crate::blend::{Blend, CompositeOp};
use crate::filter::{Filter, FilterConfig, Generator};
use crate::raster::{Raster, Rect, Selection};
use crate::state::graph::{FileScaling, LayerGraph, NodeData, NodeID, NodeKind, Position, Shape};

/// Everything a projection is a function of, besides the graph itself.
#[derive(Clone, Copy)]
pub struct RenderContext<'a> {
    pub graph: &'a LayerGraph,
    /// Image bounds. Groups are clipped to these, generators fill them.
    pub bounds: Rect,
    /// Image resolution in DPI.
    pub resolution: f32,
    /// Animation time, picks the frame of animated paint layers.
    pub time: u32,
    /// Filter configs shown in place of the recorded ones, while being edited.
    pub previews: &'a hashbrown::HashMap<NodeID, FilterConfig>,
}

#[derive(Default)]
pub struct ProjectionCache {
    cached: hashbrown::HashMap<NodeID, Arc<Raster>>,
    recomputations: usize,
}
impl ProjectionCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
    /// The projection of `id`, computing it and anything it depends on if needed.
    pub fn projection(&mut self, ctx: &RenderContext<'_>, id: NodeID) -> Arc<Raster> {
        Compositor {
            ctx,
            cache: Some(self),
            visiting: Vec::new(),
        }
        .projection(id)
    }
    /// Whether a read of `id` would be served without recomputing.
    #[must_use]
    pub fn is_valid(&self, id: NodeID) -> bool {
        self.cached.contains_key(&id)
    }
    /// How many projections have been computed since creation.
    #[must_use]
    pub fn recomputations(&self) -> usize {
        self.recomputations
    }
    /// Drop everything.
    pub fn invalidate_all(&mut self) {
        self.cached.clear();
    }
    /// Forget a node that no longer exists.
    pub fn forget(&mut self, id: NodeID) {
        let _ = self.cached.remove(&id);
    }
    /// Invalidate a node that changed in place, and everything reading it. Returns every node
    /// affected, sorted.
    pub fn invalidate(&mut self, graph: &LayerGraph, id: NodeID) -> Vec<NodeID> {
        let mut marked = BTreeSet::new();
        mark_chain(graph, id, &mut marked);
        self.finish(graph, marked)
    }
    /// Invalidate a node that appeared or disappeared. Everything beneath it changed liveness
    /// with it, and so did whatever clones them.
    pub fn invalidate_subtree(&mut self, graph: &LayerGraph, id: NodeID) -> Vec<NodeID> {
        let mut marked = BTreeSet::new();
        mark_chain(graph, id, &mut marked);
        marked.extend(graph.descendants(id));
        self.finish(graph, marked)
    }
    /// Invalidate a node that moved away from `from`, as well as its new surroundings.
    pub fn invalidate_move(&mut self, graph: &LayerGraph, id: NodeID, from: Position) -> Vec<NodeID> {
        let mut marked = BTreeSet::new();
        mark_chain(graph, id, &mut marked);
        // Adjustments that used to sit above it saw it beneath them.
        mark_adjustments(
            graph,
            graph
                .raw_children(from.parent)
                .skip_while(|&child| from.above.is_some_and(|above| above != child))
                .skip(usize::from(from.above.is_some())),
            &mut marked,
        );
        mark_chain(graph, from.parent, &mut marked);
        self.finish(graph, marked)
    }
    /// Follow clones of everything marked, then drop the lot.
    fn finish(&mut self, graph: &LayerGraph, mut marked: BTreeSet<NodeID>) -> Vec<NodeID> {
        let mut clones = hashbrown::HashMap::<NodeID, Vec<NodeID>>::new();
        for (id, data) in graph.iter() {
            if let NodeKind::Clone { source } = data.kind() {
                clones.entry(*source).or_default().push(id);
            }
        }
        let mut work: Vec<NodeID> = marked.iter().copied().collect();
        while let Some(next) = work.pop() {
            for &clone in clones.get(&next).into_iter().flatten() {
                if marked.contains(&clone) {
                    continue;
                }
                let before: BTreeSet<NodeID> = marked.clone();
                mark_chain(graph, clone, &mut marked);
                work.extend(marked.difference(&before).copied());
            }
        }
        for id in &marked {
            let _ = self.cached.remove(id);
        }
        marked.into_iter().collect()
    }
}

/// Mark `id`, its ancestors, and at every level the adjustments stacked above.
fn mark_chain(graph: &LayerGraph, id: NodeID, marked: &mut BTreeSet<NodeID>) {
    let _ = marked.insert(id);
    let mut current = id;
    while let Some(parent) = graph.parent(current) {
        mark_adjustments(
            graph,
            graph
                .raw_children(parent)
                .skip_while(|&child| child != current)
                .skip(1),
            marked,
        );
        let _ = marked.insert(parent);
        current = parent;
    }
}
fn mark_adjustments(
    graph: &LayerGraph,
    siblings: impl Iterator<Item = NodeID>,
    marked: &mut BTreeSet<NodeID>,
) {
    for sibling in siblings {
        if graph
            .get(sibling)
            .is_some_and(|data| matches!(data.kind(), NodeKind::Adjustment { .. }))
        {
            let _ = marked.insert(sibling);
        }
    }
}

/// Render a node without reading or filling any cache.
#[must_use]
pub fn render_uncached(ctx: &RenderContext<'_>, id: NodeID) -> Raster {
    let projection = Compositor {
        ctx,
        cache: None,
        visiting: Vec::new(),
    }
    .projection(id);
    Arc::try_unwrap(projection).unwrap_or_else(|shared| (*shared).clone())
}

struct Compositor<'c, 'a> {
    ctx: &'c RenderContext<'a>,
    cache: Option<&'c mut ProjectionCache>,
    /// Nodes whose projection is being built, for catching clone cycles.
    visiting: Vec<NodeID>,
}
impl Compositor<'_, '_> {
    fn empty() -> Arc<Raster> {
        Arc::new(Raster::transparent(Rect::EMPTY))
    }
    fn projection(&mut self, id: NodeID) -> Arc<Raster> {
        if let Some(hit) = self.cache.as_ref().and_then(|cache| cache.cached.get(&id)) {
            return hit.clone();
        }
        if self.visiting.contains(&id) {
            log::warn!("{id} reads its own projection, rendering as empty");
            return Self::empty();
        }
        let graph = self.ctx.graph;
        let Some(data) = graph.get(id) else {
            return Self::empty();
        };
        self.visiting.push(id);
        let projection = self.compute(id, data);
        let _ = self.visiting.pop();
        if let Some(cache) = self.cache.as_mut() {
            cache.recomputations += 1;
            log::debug!(
                "Recomputed projection of {id} ({})",
                human_bytes::human_bytes(projection.byte_size() as f64)
            );
            let _ = cache.cached.insert(id, projection.clone());
        }
        projection
    }
    fn compute(&mut self, id: NodeID, data: &NodeData) -> Arc<Raster> {
        let ctx = self.ctx;
        let own: Arc<Raster> = match data.kind() {
            NodeKind::Paint { .. } => data
                .kind()
                .frame_at(ctx.time, data.is_animated())
                .cloned()
                .unwrap_or_else(Self::empty),
            NodeKind::Group { .. } => {
                let mut acc = Raster::transparent(ctx.bounds);
                self.composite_children(id, &mut acc, None);
                Arc::new(acc)
            }
            NodeKind::Adjustment { selection, .. } => {
                // Reads what lies beneath it, as if its parent were isolated.
                let mut beneath = Raster::transparent(ctx.bounds);
                if let Some(parent) = ctx.graph.parent(id) {
                    self.composite_children(parent, &mut beneath, Some(id));
                }
                let filtered = self.filtered(id, &beneath);
                Arc::new(match selection {
                    Some(selection) => filtered.masked(selection),
                    None => filtered,
                })
            }
            NodeKind::Generator { config, selection } => {
                let config = ctx.previews.get(&id).or(config.as_ref());
                let generated = match config.map(|config| Generator::generate(config, ctx.bounds)) {
                    None => Raster::transparent(Rect::EMPTY),
                    Some(Ok(raster)) => raster,
                    Some(Err(err)) => {
                        log::warn!("generator of {id} failed: {err}");
                        Raster::transparent(Rect::EMPTY)
                    }
                };
                Arc::new(match selection {
                    Some(selection) => generated.masked(selection),
                    None => generated,
                })
            }
            NodeKind::Clone { source } => {
                if ctx.graph.get(*source).is_some() {
                    self.projection(*source)
                } else {
                    Self::empty()
                }
            }
            NodeKind::File { file } => match file {
                Some(file) => match &file.decoded {
                    Some(decoded) => match file.scaling {
                        FileScaling::None => decoded.clone(),
                        FileScaling::ToImageSize => Arc::new(decoded.scaled_to(ctx.bounds)),
                        FileScaling::ToImageResolution => {
                            let factor = ctx.resolution / file.resolution.unwrap_or(ctx.resolution);
                            let rect = decoded.rect();
                            let scale = |v: u32| (v as f32 * factor).round().max(0.0) as u32;
                            Arc::new(decoded.scaled_to(Rect::new(
                                rect.x,
                                rect.y,
                                scale(rect.width),
                                scale(rect.height),
                            )))
                        }
                    },
                    None => Self::empty(),
                },
                None => Self::empty(),
            },
            NodeKind::Shape { shapes } => Arc::new(Shape::render_all(shapes)),
            NodeKind::SelectionMask { selection } | NodeKind::TransparencyMask { selection } => {
                Arc::new(Raster::from_fn(selection.rect(), |x, y| {
                    crate::color::Color::WHITE.scaled(selection.coverage(x, y))
                }))
            }
        };
        self.post_process(id, data, own)
    }
    /// Transparency masks, then style.
    fn post_process(&mut self, id: NodeID, data: &NodeData, own: Arc<Raster>) -> Arc<Raster> {
        if data.kind().is_mask() {
            return own;
        }
        let graph = self.ctx.graph;
        let masks: Vec<&Selection> = graph
            .children(id)
            .filter_map(|child| graph.get(child))
            .filter(|child| child.is_visible())
            .filter_map(|child| match child.kind() {
                NodeKind::TransparencyMask { selection } => Some(selection),
                _ => None,
            })
            .collect();
        let style = data.style().filter(|style| !style.is_empty());
        if masks.is_empty() && style.is_none() {
            return own;
        }
        let mut out = (*own).clone();
        for mask in masks {
            out = out.masked(mask);
        }
        if let Some(style) = style {
            out = style.apply(&out);
        }
        Arc::new(out)
    }
    fn filtered(&self, id: NodeID, input: &Raster) -> Raster {
        let Some(NodeKind::Adjustment { filter, .. }) = self.ctx.graph.get(id).map(NodeData::kind)
        else {
            return input.clone();
        };
        let Some(config) = self.ctx.previews.get(&id).or(filter.as_ref()) else {
            return input.clone();
        };
        Filter::apply(config, input).unwrap_or_else(|err| {
            log::warn!("filter of {id} failed: {err}");
            input.clone()
        })
    }
    /// Blend the visible children of `parent` onto `acc`, bottom to top, stopping short of
    /// `until` if given.
    fn composite_children(&mut self, parent: NodeID, acc: &mut Raster, until: Option<NodeID>) {
        let graph = self.ctx.graph;
        let children: Vec<NodeID> = graph
            .children(parent)
            .take_while(|&child| Some(child) != until)
            .collect();
        for child in children {
            let Some(data) = graph.get(child) else {
                continue;
            };
            if !data.is_visible() || data.kind().is_mask() {
                continue;
            }
            match data.kind() {
                // Children blend straight into what's beneath, without the group's own blend.
                NodeKind::Group { passthrough: true } => {
                    self.composite_children(child, acc, None);
                }
                NodeKind::Adjustment { selection, .. } => {
                    let filtered = self.filtered(child, acc);
                    let blend = data.blend();
                    if blend.op == CompositeOp::Normal {
                        // Normal adjustments replace what lies beneath.
                        acc.mix_masked(&filtered, blend.opacity_f32(), selection.as_ref());
                    } else {
                        acc.composite_masked(&filtered, blend, selection.as_ref());
                    }
                }
                _ => {
                    let projection = self.projection(child);
                    acc.composite(&projection, data.blend());
                }
            }
        }
    }
}

/// Blend `layers` bottom to top onto a transparent canvas, each with its given blend.
#[must_use]
pub fn composite_stack(bounds: Rect, layers: &[(&Raster, Blend)]) -> Raster {
    let mut acc = Raster::transparent(bounds);
    for (raster, blend) in layers {
        acc.composite(raster, *blend);
    }
    acc
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::color::Color;
    use crate::state::graph::Location;

    fn paint(name: &str, rect: Rect, color: Color) -> NodeData {
        NodeData::new(name, NodeKind::paint(Raster::filled(rect, color)))
    }
    fn context<'a>(
        graph: &'a LayerGraph,
        previews: &'a hashbrown::HashMap<NodeID, FilterConfig>,
    ) -> RenderContext<'a> {
        RenderContext {
            graph,
            bounds: Rect::new(0, 0, 4, 4),
            resolution: 72.0,
            time: 0,
            previews,
        }
    }

    #[test]
    fn reads_are_coalesced() {
        let mut graph = LayerGraph::default();
        let root = graph.root();
        let layer = graph
            .insert(Location::Top(root), paint("a", Rect::new(0, 0, 2, 2), Color::WHITE))
            .unwrap();
        let previews = hashbrown::HashMap::new();
        let mut cache = ProjectionCache::new();
        let ctx = context(&graph, &previews);

        let first = cache.projection(&ctx, root);
        let count = cache.recomputations();
        let again = cache.projection(&ctx, root);
        assert!(Arc::ptr_eq(&first, &again));
        assert_eq!(cache.recomputations(), count);

        let marked = cache.invalidate(&graph, layer);
        assert_eq!(marked.len(), 2);
        cache.invalidate(&graph, layer);
        let _ = cache.projection(&ctx, root);
        assert_eq!(cache.recomputations(), count + 2);
    }
    #[test]
    fn adjustments_above_are_invalidated() {
        let mut graph = LayerGraph::default();
        let root = graph.root();
        let below = graph
            .insert(Location::Top(root), paint("below", Rect::new(0, 0, 4, 4), Color::WHITE))
            .unwrap();
        let adjustment = graph
            .insert(
                Location::Top(root),
                NodeData::new(
                    "invert",
                    NodeKind::Adjustment {
                        filter: Some(FilterConfig::new("invert")),
                        selection: None,
                    },
                ),
            )
            .unwrap();
        let clone = graph
            .insert(
                Location::Bottom(root),
                NodeData::new("clone", NodeKind::Clone { source: adjustment }),
            )
            .unwrap();
        let previews = hashbrown::HashMap::new();
        let mut cache = ProjectionCache::new();
        let ctx = context(&graph, &previews);

        let out = cache.projection(&ctx, adjustment);
        assert_eq!(out.get(0, 0), Color::BLACK);
        let marked = cache.invalidate(&graph, below);
        assert!(marked.contains(&adjustment));
        assert!(marked.contains(&clone));
        assert!(marked.contains(&root));
    }
    #[test]
    fn passthrough_ignores_group_blend() {
        let mut graph = LayerGraph::default();
        let root = graph.root();
        graph
            .insert(Location::Top(root), paint("base", Rect::new(0, 0, 4, 4), Color::WHITE))
            .unwrap();
        let group = graph
            .insert(
                Location::Top(root),
                NodeData::new("g", NodeKind::Group { passthrough: true })
                    .with_blend(Blend::new(CompositeOp::Normal, 0)),
            )
            .unwrap();
        graph
            .insert(
                Location::Top(group),
                NodeData::new(
                    "invert",
                    NodeKind::Adjustment {
                        filter: Some(FilterConfig::new("invert")),
                        selection: None,
                    },
                ),
            )
            .unwrap();
        let previews = hashbrown::HashMap::new();
        let ctx = context(&graph, &previews);
        // The adjustment inside sees the base layer through the pass-through group.
        assert_eq!(render_uncached(&ctx, root).get(1, 1), Color::BLACK);
    }
    #[test]
    fn clone_cycle_renders_empty() {
        let mut graph = LayerGraph::default();
        let root = graph.root();
        let group = graph
            .insert(Location::Top(root), NodeData::new("g", NodeKind::group()))
            .unwrap();
        graph
            .insert(
                Location::Top(group),
                NodeData::new("loop", NodeKind::Clone { source: group }),
            )
            .unwrap();
        let previews = hashbrown::HashMap::new();
        let ctx = context(&graph, &previews);
        let out = render_uncached(&ctx, root);
        assert!(out.exact_bounds().is_empty());
    }
}
