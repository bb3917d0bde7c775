//! End to end behavior of the layer tree: caching, history, and the compound operations.

use stratum_core::blend::{Blend, CompositeOp};
use stratum_core::color::Color;
use stratum_core::filter::FilterConfig;
use stratum_core::image::Image;
use stratum_core::manager::{LayerConfig, LayerManager, MergeLayerError};
use stratum_core::metadata::{MergeStrategy, MetadataStore, StrategyError};
use stratum_core::raster::{Raster, Rect, Selection};
use stratum_core::state::graph::{Location, NodeData, NodeFlags, NodeID, NodeKind, OutlineEntry, Properties};
use stratum_core::style::{DropShadow, LayerStyle};

fn small_image() -> Image {
    Image::new(stratum_core::state::Document {
        bounds: Rect::new(0, 0, 16, 16),
        ..Default::default()
    })
}
fn insert(image: &mut Image, location: Location, data: NodeData) -> NodeID {
    image
        .write_with(|writer| writer.graph().insert(location, data))
        .unwrap()
}
fn paint(name: &str, rect: Rect, color: Color) -> NodeData {
    NodeData::new(name, NodeKind::paint(Raster::filled(rect, color)))
}
fn red() -> Color {
    Color::from_straight(1.0, 0.0, 0.0, 1.0)
}
fn blue() -> Color {
    Color::from_straight(0.0, 0.0, 1.0, 1.0)
}
/// Structure and pixels of an image, for comparing states.
fn snapshot(image: &Image) -> (Vec<OutlineEntry>, blake3::Hash) {
    let outline = image.read().graph.outline();
    (outline, image.root_projection().digest())
}
fn assert_cache_fresh(image: &Image) {
    let ids: Vec<NodeID> = image.read().graph.iter().map(|(id, _)| id).collect();
    for id in ids.into_iter().chain([image.root()]) {
        assert_eq!(
            image.projection(id).digest(),
            image.render_uncached(id).digest(),
            "stale projection of {id}"
        );
    }
}

#[test]
fn cached_projections_match_from_scratch() {
    let mut image = small_image();
    let root = image.root();
    let group = insert(&mut image, Location::Top(root), NodeData::new("group", NodeKind::group()));
    let a = insert(&mut image, Location::Top(group), paint("a", Rect::new(0, 0, 8, 8), red()));
    let b = insert(&mut image, Location::Top(group), paint("b", Rect::new(4, 4, 8, 8), blue()));
    let adjustment = insert(
        &mut image,
        Location::Top(group),
        NodeData::new(
            "invert",
            NodeKind::Adjustment {
                filter: Some(FilterConfig::new("invert")),
                selection: Some(Selection::from_rect(Rect::new(0, 0, 6, 6))),
            },
        ),
    );
    let clone = insert(&mut image, Location::Top(root), NodeData::new("clone", NodeKind::Clone { source: b }));
    let _mask = insert(
        &mut image,
        Location::Top(a),
        NodeData::new(
            "mask",
            NodeKind::TransparencyMask {
                selection: Selection::from_rect(Rect::new(0, 0, 3, 8)),
            },
        ),
    );
    assert_cache_fresh(&image);

    image
        .write_with(|writer| writer.graph().set_blend(b, Blend::new(CompositeOp::Multiply, 100)))
        .unwrap();
    assert_cache_fresh(&image);
    image
        .write_with(|writer| {
            writer.graph().set_style(
                clone,
                Some(LayerStyle {
                    drop_shadow: Some(DropShadow::default()),
                }),
            )
        })
        .unwrap();
    assert_cache_fresh(&image);
    image
        .write_with(|writer| writer.graph().reparent(a, Location::Above(adjustment)))
        .unwrap();
    assert_cache_fresh(&image);
    image
        .write_with(|writer| {
            writer
                .graph()
                .set_content(b, NodeKind::paint(Raster::filled(Rect::new(1, 1, 2, 2), Color::WHITE)))
        })
        .unwrap();
    assert_cache_fresh(&image);
    assert!(image.undo());
    assert!(image.undo());
    assert_cache_fresh(&image);
    image.set_preview(adjustment, Some(FilterConfig::new("desaturate")));
    assert_cache_fresh(&image);
    assert!(image.redo());
    assert_cache_fresh(&image);
}

#[test]
fn clones_follow_their_source_out_of_a_deleted_group() {
    let mut image = small_image();
    let root = image.root();
    let group = insert(&mut image, Location::Top(root), NodeData::new("group", NodeKind::group()));
    let source = insert(&mut image, Location::Top(group), paint("source", Rect::new(0, 0, 8, 8), red()));
    let clone = insert(&mut image, Location::Top(root), NodeData::new("clone", NodeKind::Clone { source }));
    assert_cache_fresh(&image);

    image.write_with(|writer| writer.graph().delete(group)).unwrap();
    assert!(!image.projection_is_valid(clone));
    assert!(image.projection(clone).exact_bounds().is_empty());
    assert_cache_fresh(&image);
    assert!(image.undo());
    assert_eq!(image.projection(clone).get(1, 1), red());
    assert_cache_fresh(&image);
    assert!(image.redo());
    assert_cache_fresh(&image);
    assert_eq!(image.projection(source).digest(), image.render_uncached(source).digest());
}

#[test]
fn undo_redo_reproduces_exact_states() {
    let mut image = small_image();
    let root = image.root();
    let group = insert(&mut image, Location::Top(root), NodeData::new("group", NodeKind::group()));
    let _a = insert(&mut image, Location::Top(group), paint("a", Rect::new(0, 0, 8, 8), red()));
    let b = insert(&mut image, Location::Top(group), paint("b", Rect::new(2, 2, 8, 8), blue()));
    let before = snapshot(&image);

    image.merge_down(b, MergeStrategy::Drop).unwrap();
    let after = snapshot(&image);
    assert_ne!(before, after);
    assert_eq!(image.last_label().as_deref(), Some("Merge Down"));

    assert!(image.undo());
    assert_eq!(snapshot(&image), before);
    assert!(image.redo());
    assert_eq!(snapshot(&image), after);
    assert_cache_fresh(&image);
}

#[test]
fn filter_config_text_round_trips() {
    let config = FilterConfig::new("threshold")
        .with("level", 0.25)
        .with("label", "a <quoted> & \"escaped\" value");
    let text = config.to_xml().unwrap();
    let parsed = FilterConfig::from_xml(&text).unwrap();
    assert_eq!(parsed, config);
    assert_eq!(parsed.to_xml().unwrap(), text);
}

#[test]
fn rejected_everywhere_falls_back_to_root() {
    let mut image = small_image();
    let root = image.root();
    image
        .write_with(|writer| {
            writer.graph().set_properties(
                root,
                Properties {
                    name: "root".into(),
                    flags: NodeFlags::VISIBLE | NodeFlags::LOCKED,
                },
            )
        })
        .unwrap();
    let mut manager = LayerManager::new(image);
    let first = manager.add_layer().unwrap();
    let second = manager.add_layer().unwrap();
    let image = manager.image().unwrap();
    let children: Vec<_> = image.read().graph.children(root).collect();
    assert_eq!(children, [first, second]);
}

#[test]
fn merge_down_composites_with_upper_blend() {
    let mut image = small_image();
    let root = image.root();
    let group = insert(&mut image, Location::Top(root), NodeData::new("G", NodeKind::group()));
    let a = insert(&mut image, Location::Top(group), paint("A", Rect::new(0, 0, 4, 4), red()));
    let upper_blend = Blend::new(CompositeOp::Multiply, 128);
    let b = insert(
        &mut image,
        Location::Top(group),
        paint("B", Rect::new(2, 2, 4, 4), blue()).with_blend(upper_blend),
    );

    let merged = image.merge_down(b, MergeStrategy::Drop).unwrap();
    let state = image.read();
    assert_eq!(state.graph.children(group).collect::<Vec<_>>(), [merged]);
    assert!(state.graph.get(a).is_none());
    assert!(state.graph.get(b).is_none());
    assert_eq!(state.graph.get(merged).unwrap().name(), "A");
    drop(state);

    let projection = image.projection(merged);
    assert_eq!(projection.rect(), Rect::new(0, 0, 6, 6));
    let lower = Blend::default().apply(Color::TRANSPARENT, red(), 1.0);
    assert_eq!(projection.get(0, 0), lower);
    assert_eq!(projection.get(3, 3), upper_blend.apply(lower, blue(), 1.0));
    assert_eq!(projection.get(5, 5), upper_blend.apply(Color::TRANSPARENT, blue(), 1.0));
    assert_eq!(image.active_layer(), Some(merged));
}

#[test]
fn cancelled_adjustment_leaves_no_residue() {
    let mut manager = LayerManager::new(small_image());
    let layer = manager.add_layer().unwrap();
    let image = manager.image().unwrap();
    let before = image.read().graph.outline();
    let depth = image.history_depth();

    let handle = manager.add_adjustment_layer().unwrap();
    manager.preview_configuration(handle, Some(FilterConfig::new("invert")));
    assert!(manager.image().unwrap().read().graph.get(handle.node()).is_some());
    assert!(manager.cancel_configuration(handle));

    let image = manager.image().unwrap();
    assert_eq!(image.read().graph.outline(), before);
    assert_eq!(image.history_depth(), depth);
    assert!(!image.can_redo());
    assert!(image.read().graph.get(handle.node()).is_none());
    assert_eq!(image.active_layer(), Some(layer));
}

#[test]
fn committed_adjustment_is_one_step() {
    let mut manager = LayerManager::new(small_image());
    let _layer = manager.add_layer().unwrap();
    let handle = manager.add_adjustment_layer().unwrap();
    let default_name = manager.default_name(handle).unwrap().to_owned();
    let node = manager
        .commit_configuration(handle, LayerConfig::Filter(Some(FilterConfig::new("invert"))), None)
        .unwrap()
        .unwrap();
    let image = manager.image_mut().unwrap();
    assert_eq!(image.read().graph.get(node).unwrap().name(), default_name);
    assert_eq!(image.last_label().as_deref(), Some("New Filter Layer"));
    assert!(image.undo());
    assert!(image.read().graph.get(node).is_none());
    assert!(image.redo());
    assert!(image.read().graph.get(node).is_some());
}

#[test]
fn unconfigured_generator_is_retracted() {
    let mut manager = LayerManager::new(small_image());
    let handle = manager.add_generator_layer().unwrap();
    assert_eq!(
        manager
            .commit_configuration(handle, LayerConfig::Filter(None), Some("fill".into()))
            .unwrap(),
        None
    );
    let image = manager.image().unwrap();
    assert!(image.read().graph.is_empty());
    assert_eq!(image.history_depth(), 0);
}

#[test]
fn adjacent_selection_masks_merge_into_one() {
    let mut image = small_image();
    let root = image.root();
    let layer = insert(&mut image, Location::Top(root), paint("layer", Rect::new(0, 0, 4, 4), red()));
    let mask = |rect| {
        NodeData::new(
            "selection",
            NodeKind::SelectionMask {
                selection: Selection::from_rect(rect),
            },
        )
    };
    let lower = insert(&mut image, Location::Top(layer), mask(Rect::new(0, 0, 2, 2)));
    let upper = insert(&mut image, Location::Top(layer), mask(Rect::new(1, 1, 2, 2)));
    image.activate(upper);
    let mut manager = LayerManager::new(image);
    let merged = manager.merge_layer(|| None).unwrap().unwrap();

    let image = manager.image().unwrap();
    let state = image.read();
    assert_eq!(state.graph.children(layer).collect::<Vec<_>>(), [merged]);
    assert!(state.graph.get(lower).is_none());
    let Some(NodeKind::SelectionMask { selection }) = state.graph.get(merged).map(NodeData::kind) else {
        panic!("expected a selection mask");
    };
    assert_eq!(selection.get(0, 0), u8::MAX);
    assert_eq!(selection.get(2, 2), u8::MAX);
    assert_eq!(selection.get(2, 0), 0);
}

#[test]
fn empty_crop_changes_nothing() {
    let mut image = small_image();
    let root = image.root();
    let _ = insert(&mut image, Location::Top(root), paint("a", Rect::new(0, 0, 8, 8), red()));
    let before = snapshot(&image);
    let depth = image.history_depth();
    assert!(!image.crop(Rect::new(3, 3, 0, 5)));
    assert_eq!(image.bounds(), Rect::new(0, 0, 16, 16));
    assert_eq!(snapshot(&image), before);
    assert_eq!(image.history_depth(), depth);
}

#[test]
fn put_behind_conversion_drops_one_slot() {
    let mut image = small_image();
    let root = image.root();
    let bottom = insert(&mut image, Location::Top(root), paint("bottom", Rect::new(0, 0, 4, 4), blue()));
    let layer = insert(&mut image, Location::Top(root), paint("layer", Rect::new(0, 0, 4, 4), red()));
    let mask = insert(
        &mut image,
        Location::Top(layer),
        NodeData::new(
            "behind",
            NodeKind::TransparencyMask {
                selection: Selection::from_rect(Rect::new(0, 0, 2, 2)),
            },
        )
        .with_blend(Blend::new(CompositeOp::Behind, 200)),
    );
    let mut manager = LayerManager::new(image);
    let converted = manager.convert_node_to_paint_layer(mask).unwrap();

    let image = manager.image().unwrap();
    let state = image.read();
    assert_eq!(
        state.graph.children(root).collect::<Vec<_>>(),
        [bottom, converted, layer]
    );
    assert_eq!(state.graph.children(layer).count(), 0);
    let data = state.graph.get(converted).unwrap();
    assert_eq!(data.blend(), Blend::new(CompositeOp::Normal, 200));
    assert_eq!(data.name(), "behind");
    drop(state);
    assert_eq!(image.last_label().as_deref(), Some("Convert to a Paint Layer"));
}

#[test]
fn unknown_strategy_aborts_merge() {
    let mut image = small_image();
    let root = image.root();
    let tagged: MetadataStore = [("author", "someone")].into_iter().collect();
    let _lower = insert(
        &mut image,
        Location::Top(root),
        paint("lower", Rect::new(0, 0, 4, 4), red()).with_metadata(tagged),
    );
    let upper = insert(&mut image, Location::Top(root), paint("upper", Rect::new(0, 0, 4, 4), blue()));
    image.activate(upper);
    let before = snapshot(&image);
    let depth = image.history_depth();

    let mut manager = LayerManager::new(image);
    assert_eq!(
        manager.merge_layer(|| Some("Bogus".into())),
        Err(MergeLayerError::Strategy(StrategyError::Unknown("Bogus".into())))
    );
    // Declining to choose is not an error either.
    assert_eq!(manager.merge_layer(|| None), Ok(None));
    let image = manager.image().unwrap();
    assert_eq!(snapshot(image), before);
    assert_eq!(image.history_depth(), depth);
}

#[test]
fn metadata_merges_by_strategy() {
    let mut image = small_image();
    let root = image.root();
    let lower_meta: MetadataStore = [("author", "a"), ("title", "t")].into_iter().collect();
    let upper_meta: MetadataStore = [("author", "b")].into_iter().collect();
    let _lower = insert(
        &mut image,
        Location::Top(root),
        paint("lower", Rect::new(0, 0, 4, 4), red()).with_metadata(lower_meta),
    );
    let upper = insert(
        &mut image,
        Location::Top(root),
        paint("upper", Rect::new(0, 0, 4, 4), blue()).with_metadata(upper_meta),
    );
    image.activate(upper);
    let mut manager = LayerManager::new(image);
    let merged = manager
        .merge_layer(|| Some("PriorityToFirst".into()))
        .unwrap()
        .unwrap();
    let image = manager.image().unwrap();
    let state = image.read();
    let metadata = state.graph.get(merged).unwrap().metadata();
    assert_eq!(metadata.get("author"), Some("a"));
    assert_eq!(metadata.get("title"), Some("t"));
}

#[test]
fn flatten_asks_about_hidden_layers() {
    let mut image = small_image();
    let root = image.root();
    let _ = insert(&mut image, Location::Top(root), paint("shown", Rect::new(0, 0, 4, 4), red()));
    let _ = insert(
        &mut image,
        Location::Top(root),
        paint("hidden", Rect::new(0, 0, 4, 4), blue()).with_flags(NodeFlags::empty()),
    );
    let expected = image.root_projection().digest();
    let mut manager = LayerManager::new(image);
    assert!(manager.action_states().flatten_image);

    let mut asked = 0;
    assert_eq!(
        manager.flatten_image(|hidden| {
            asked = hidden;
            false
        }),
        None
    );
    assert_eq!(asked, 1);
    assert_eq!(manager.image().unwrap().read().graph.len(), 2);

    let flat = manager.flatten_image(|_| true).unwrap();
    let image = manager.image().unwrap();
    assert_eq!(image.read().graph.children(root).collect::<Vec<_>>(), [flat]);
    assert_eq!(image.root_projection().digest(), expected);
    assert_eq!(image.last_label().as_deref(), Some("Flatten Image"));
}

#[test]
fn rasterize_keeps_masks() {
    let mut image = small_image();
    let root = image.root();
    let generator = insert(
        &mut image,
        Location::Top(root),
        NodeData::new(
            "fill",
            NodeKind::Generator {
                config: Some(FilterConfig::new("color").with("color", "#00ff00ff")),
                selection: Some(Selection::from_rect(Rect::new(2, 2, 4, 4))),
            },
        ),
    );
    let mask = insert(
        &mut image,
        Location::Top(generator),
        NodeData::new(
            "mask",
            NodeKind::TransparencyMask {
                selection: Selection::from_rect(Rect::new(0, 0, 4, 4)),
            },
        ),
    );
    image.activate(generator);
    let expected = image.root_projection().digest();
    let mut manager = LayerManager::new(image);
    let raster = manager.rasterize_layer().unwrap();

    let image = manager.image().unwrap();
    let state = image.read();
    assert!(matches!(state.graph.get(raster).unwrap().kind(), NodeKind::Paint { .. }));
    assert_eq!(state.graph.children(raster).collect::<Vec<_>>(), [mask]);
    assert!(state.graph.get(generator).is_none());
    drop(state);
    // The content was already masked, masking it again changes nothing.
    assert_eq!(image.root_projection().digest(), expected);
}

#[test]
fn group_exports_respect_visibility_and_depth() {
    let mut manager = LayerManager::new(small_image());
    let outer = manager.add_group_layer().unwrap();
    let inner = manager.add_group_layer().unwrap();
    let image = manager.image_mut().unwrap();
    let root = image.root();
    let hidden = insert(
        image,
        Location::Top(root),
        NodeData::new("hidden", NodeKind::group()).with_flags(NodeFlags::empty()),
    );
    let name = |id: NodeID| manager.image().unwrap().read().graph.get(id).unwrap().name().to_owned();
    let (outer, inner, hidden) = (name(outer), name(inner), name(hidden));

    let names = |groups: Vec<(String, std::sync::Arc<Raster>)>| {
        groups.into_iter().map(|(name, _)| name).collect::<Vec<_>>()
    };
    assert_eq!(names(manager.save_group_layers(false, true)), [outer.clone()]);
    assert_eq!(
        names(manager.save_group_layers(true, false)),
        [outer, inner, hidden]
    );
}
