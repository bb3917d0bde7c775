//! Operations a scene applies after its layers are built, in order.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::Context;
use stratum_core::manager::LayerManager;
use stratum_core::script::ScriptImage;
use stratum_core::state::graph::NodeID;

use crate::scene::{filter_config, rect, Names};

fn one() -> usize {
    1
}

#[derive(serde::Deserialize, Debug)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Operation {
    Activate {
        layer: String,
    },
    /// Select several layers, activating the last.
    Select {
        layers: Vec<String>,
    },
    /// Merge the selection, two selection masks, or `layer` down.
    MergeLayer {
        layer: Option<String>,
        /// Metadata strategy, asked for only when either layer carries metadata.
        strategy: Option<String>,
    },
    FlattenImage {
        /// Go ahead even though hidden layers will be lost.
        #[serde(default)]
        discard_hidden: bool,
    },
    FlattenLayer {
        layer: String,
    },
    Rasterize {
        layer: String,
    },
    ConvertToPaint {
        layer: String,
    },
    ConvertGroupToAnimated {
        layer: String,
    },
    Rotate {
        layer: String,
        degrees: f64,
    },
    Crop {
        rect: [i64; 4],
    },
    ResizeToActive {
        layer: String,
    },
    Trim,
    ColorSpace {
        name: String,
    },
    Undo {
        #[serde(default = "one")]
        count: usize,
    },
    Redo {
        #[serde(default = "one")]
        count: usize,
    },
    Remove {
        layer: String,
    },
    SetTime {
        time: u32,
    },
    /// Preview an adjustment on top of the active layer, then back out of it.
    PreviewAdjustment {
        filter: String,
        #[serde(default)]
        params: BTreeMap<String, String>,
    },
    /// Write each group's projection to `<dir>/<name>.png`.
    ExportGroups {
        dir: PathBuf,
        #[serde(default)]
        include_invisible: bool,
        #[serde(default)]
        top_level_only: bool,
    },
}

fn lookup(names: &Names, layer: &str) -> anyhow::Result<NodeID> {
    names
        .get(layer)
        .copied()
        .with_context(|| format!("no layer named {layer:?}"))
}

fn activate(manager: &mut LayerManager, names: &Names, layer: &str) -> anyhow::Result<NodeID> {
    let id = lookup(names, layer)?;
    anyhow::ensure!(manager.activate_layer(id), "layer {layer:?} no longer exists");
    Ok(id)
}

/// Track a layer an operation produced under its current name.
fn remember(manager: &LayerManager, names: &mut Names, id: Option<NodeID>) {
    let Some(id) = id else { return };
    let Some(image) = manager.image() else { return };
    if let Some(data) = image.read().graph.get(id) {
        names.insert(data.name().to_owned(), id);
    }
}

/// Run one operation. Operations that don't apply are logged and skipped.
pub fn run(manager: &mut LayerManager, names: &mut Names, base: &Path, op: &Operation) -> anyhow::Result<()> {
    log::debug!("running {op:?}");
    let produced = match op {
        Operation::Activate { layer } => {
            activate(manager, names, layer)?;
            None
        }
        Operation::Select { layers } => {
            let ids = layers
                .iter()
                .map(|layer| lookup(names, layer))
                .collect::<anyhow::Result<Vec<_>>>()?;
            let image = manager.image_mut().context("no image open")?;
            if let Some(last) = ids.last() {
                image.activate(*last);
            }
            image.set_selected_nodes(ids);
            None
        }
        Operation::MergeLayer { layer, strategy } => {
            if let Some(layer) = layer {
                activate(manager, names, layer)?;
            }
            let merged = manager.merge_layer(|| strategy.clone())?;
            if merged.is_none() {
                log::warn!("nothing merged");
            }
            if let Some(image) = manager.image_mut() {
                image.set_selected_nodes(Vec::new());
            }
            merged
        }
        Operation::FlattenImage { discard_hidden } => manager.flatten_image(|hidden| {
            if !discard_hidden {
                log::warn!("not flattening, {hidden} hidden layers would be lost");
            }
            *discard_hidden
        }),
        Operation::FlattenLayer { layer } => {
            activate(manager, names, layer)?;
            manager.flatten_layer()
        }
        Operation::Rasterize { layer } => {
            activate(manager, names, layer)?;
            manager.rasterize_layer()
        }
        Operation::ConvertToPaint { layer } => {
            let id = lookup(names, layer)?;
            manager.convert_node_to_paint_layer(id)
        }
        Operation::ConvertGroupToAnimated { layer } => {
            activate(manager, names, layer)?;
            manager.convert_group_to_animated()
        }
        Operation::Rotate { layer, degrees } => {
            activate(manager, names, layer)?;
            if !manager.rotate_layer(degrees.to_radians()) {
                log::warn!("can't rotate {layer:?}");
            }
            None
        }
        Operation::Crop { rect: area } => {
            let area = rect(*area)?;
            let image = manager.image_mut().context("no image open")?;
            image.block_until_operations_finished();
            if !image.crop(area) {
                log::warn!("crop to {area:?} changed nothing");
            }
            None
        }
        Operation::ResizeToActive { layer } => {
            activate(manager, names, layer)?;
            manager.image_resize_to_active_layer();
            None
        }
        Operation::Trim => {
            manager.trim_to_image();
            None
        }
        Operation::ColorSpace { name } => {
            let image = manager.image_mut().context("no image open")?;
            image.block_until_operations_finished();
            ScriptImage::new(image).convert_to_color_space(name)?;
            None
        }
        Operation::Undo { count } => {
            let image = manager.image_mut().context("no image open")?;
            image.block_until_operations_finished();
            let undone = (0..*count).take_while(|_| image.undo()).count();
            log::debug!("undid {undone} of {count}");
            None
        }
        Operation::Redo { count } => {
            let image = manager.image_mut().context("no image open")?;
            let redone = (0..*count).take_while(|_| image.redo()).count();
            log::debug!("redid {redone} of {count}");
            None
        }
        Operation::Remove { layer } => {
            let id = lookup(names, layer)?;
            if !manager.remove_layer(id) {
                log::warn!("can't remove {layer:?}");
            }
            None
        }
        Operation::SetTime { time } => {
            manager.image_mut().context("no image open")?.set_time(*time);
            None
        }
        Operation::PreviewAdjustment { filter, params } => {
            let config = filter_config(filter, params);
            let handle = manager.add_adjustment_layer().context("can't add adjustment layer")?;
            manager.preview_configuration(handle, Some(config));
            if let Some(image) = manager.image() {
                log::info!("previewed {filter}, {} layers", image.layer_count());
            }
            manager.cancel_configuration(handle);
            None
        }
        Operation::ExportGroups {
            dir,
            include_invisible,
            top_level_only,
        } => {
            let dir = base.join(dir);
            std::fs::create_dir_all(&dir).with_context(|| format!("creating {}", dir.display()))?;
            let image = manager.image().context("no image open")?;
            let (bounds, space) = (image.bounds(), image.color_space());
            for (name, projection) in manager.save_group_layers(*include_invisible, *top_level_only) {
                crate::files::write_png(&dir.join(format!("{name}.png")), &projection, bounds, space)?;
            }
            None
        }
    };
    remember(manager, names, produced);
    Ok(())
}
