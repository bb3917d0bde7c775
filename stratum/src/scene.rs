//! Scene descriptions: an image, the layers in it, and what to do to them.
//!
//! ```toml
//! [image]
//! width = 64
//! height = 64
//!
//! [[layers]]
//! kind = "paint"
//! name = "background"
//! color = "#ffffff"
//!
//! [[layers]]
//! kind = "group"
//! name = "sprites"
//! children = [{ kind = "shape", shapes = [{ ellipse = [8, 8, 16, 16], fill = "#ff0000" }] }]
//!
//! [[operations]]
//! op = "merge_layer"
//! layer = "sprites"
//! ```

use std::collections::BTreeMap;
use std::path::PathBuf;

use anyhow::Context;
use stratum_core::blend::{Blend, CompositeOp};
use stratum_core::color::Color;
use stratum_core::filter::FilterConfig;
use stratum_core::manager::{LayerConfig, LayerManager};
use stratum_core::metadata::MetadataStore;
use stratum_core::raster::{Raster, Rect, Selection};
use stratum_core::state::graph::{FileScaling, NodeData, NodeFlags, NodeID, NodeKind, Properties, Shape};
use stratum_core::state::{ColorSpace, Document};
use stratum_core::style::{DropShadow, LayerStyle};

#[derive(serde::Deserialize, Debug)]
pub struct Scene {
    #[serde(default)]
    pub image: ImageSpec,
    #[serde(default)]
    pub layers: Vec<LayerSpec>,
    #[serde(default)]
    pub operations: Vec<crate::operations::Operation>,
    /// Where to write the result, relative to the scene file.
    pub output: Option<PathBuf>,
}
impl Scene {
    pub fn load(path: &std::path::Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading scene {}", path.display()))?;
        toml::from_str(&text).with_context(|| format!("parsing scene {}", path.display()))
    }
}

#[derive(serde::Deserialize, Debug)]
#[serde(default)]
pub struct ImageSpec {
    pub name: String,
    pub width: u32,
    pub height: u32,
    pub resolution: f32,
    pub color_space: String,
}
impl Default for ImageSpec {
    fn default() -> Self {
        let document = Document::default();
        Self {
            name: document.name,
            width: document.bounds.width,
            height: document.bounds.height,
            resolution: document.resolution,
            color_space: document.color_space.to_string(),
        }
    }
}
impl ImageSpec {
    pub fn document(&self) -> anyhow::Result<Document> {
        let color_space: ColorSpace = self
            .color_space
            .parse()
            .with_context(|| format!("unknown color space {:?}", self.color_space))?;
        Ok(Document {
            name: self.name.clone(),
            bounds: Rect::new(0, 0, self.width, self.height),
            resolution: self.resolution,
            color_space,
        })
    }
}

fn default_opacity() -> u8 {
    u8::MAX
}
fn default_true() -> bool {
    true
}

#[derive(serde::Deserialize, Debug)]
pub struct LayerSpec {
    /// Defaults to "Layer N".
    pub name: Option<String>,
    #[serde(default = "default_opacity")]
    pub opacity: u8,
    /// Composite op, e.g. `"multiply"`.
    #[serde(default)]
    pub blend: Option<String>,
    #[serde(default = "default_true")]
    pub visible: bool,
    #[serde(default)]
    pub locked: bool,
    pub shadow: Option<ShadowSpec>,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
    /// Layers within a group, masks within anything else.
    #[serde(default)]
    pub children: Vec<LayerSpec>,
    #[serde(flatten)]
    pub content: ContentSpec,
}

#[derive(serde::Deserialize, Debug)]
pub struct ShadowSpec {
    #[serde(default)]
    pub offset: (i32, i32),
    pub color: Option<String>,
    #[serde(default = "default_opacity")]
    pub opacity: u8,
}

#[derive(serde::Deserialize, Debug)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ContentSpec {
    /// A solid `color` over `rect`, or over the whole image.
    Paint {
        color: Option<String>,
        rect: Option<[i64; 4]>,
        /// Extra frames, for animated layers. Each is a color filling the same rect.
        #[serde(default)]
        frames: Vec<String>,
    },
    Group {
        #[serde(default)]
        passthrough: bool,
    },
    Adjustment {
        filter: String,
        #[serde(default)]
        params: BTreeMap<String, String>,
        selection: Option<[i64; 4]>,
    },
    Generator {
        generator: String,
        #[serde(default)]
        params: BTreeMap<String, String>,
        selection: Option<[i64; 4]>,
    },
    Clone {
        source: String,
    },
    File {
        path: PathBuf,
        #[serde(default)]
        scaling: Option<String>,
    },
    Shape {
        shapes: Vec<ShapeSpec>,
    },
    SelectionMask {
        rect: [i64; 4],
    },
    TransparencyMask {
        rect: [i64; 4],
    },
}

#[derive(serde::Deserialize, Debug)]
pub struct ShapeSpec {
    pub rectangle: Option<[i64; 4]>,
    pub ellipse: Option<[i64; 4]>,
    pub fill: String,
}

pub fn rect(spec: [i64; 4]) -> anyhow::Result<Rect> {
    let [x, y, width, height] = spec;
    Ok(Rect::new(
        i32::try_from(x).context("rect x out of range")?,
        i32::try_from(y).context("rect y out of range")?,
        u32::try_from(width).context("rect width out of range")?,
        u32::try_from(height).context("rect height out of range")?,
    ))
}
pub fn color(hex: &str) -> anyhow::Result<Color> {
    Color::from_hex(hex).with_context(|| format!("{hex:?} is not a #rrggbb[aa] color"))
}
pub fn filter_config(name: &str, params: &BTreeMap<String, String>) -> FilterConfig {
    params
        .iter()
        .fold(FilterConfig::new(name), |config, (key, value)| config.with(key, value))
}

/// Layers built so far, by name.
pub type Names = std::collections::HashMap<String, NodeID>;

/// Add every layer of the scene, bottom to top.
pub fn build(manager: &mut LayerManager, layers: &[LayerSpec]) -> anyhow::Result<Names> {
    let mut names = Names::new();
    for spec in layers {
        build_layer(manager, spec, None, &mut names)?;
    }
    Ok(names)
}

fn build_layer(
    manager: &mut LayerManager,
    spec: &LayerSpec,
    parent: Option<NodeID>,
    names: &mut Names,
) -> anyhow::Result<NodeID> {
    let image = manager.image_mut().context("no image open")?;
    // New layers land on top of the active node, if it takes them.
    match parent {
        Some(parent) => {
            image.activate(parent);
        }
        None => image.deactivate(),
    }
    let bounds = image.bounds();
    let root = image.root();

    let id = match &spec.content {
        ContentSpec::Adjustment { filter, params, selection } => {
            manager.set_selection(selection.map(rect).transpose()?.map(Selection::from_rect));
            let handle = manager.add_adjustment_layer().context("can't add adjustment layer")?;
            manager
                .commit_configuration(
                    handle,
                    LayerConfig::Filter(Some(filter_config(filter, params))),
                    spec.name.clone(),
                )?
                .context("adjustment layer discarded")?
        }
        ContentSpec::Generator { generator, params, selection } => {
            manager.set_selection(selection.map(rect).transpose()?.map(Selection::from_rect));
            let handle = manager.add_generator_layer().context("can't add generator layer")?;
            manager
                .commit_configuration(
                    handle,
                    LayerConfig::Filter(Some(filter_config(generator, params))),
                    spec.name.clone(),
                )?
                .context("generator layer discarded")?
        }
        ContentSpec::File { path, scaling } => {
            let scaling: FileScaling = match scaling {
                Some(scaling) => scaling
                    .parse()
                    .with_context(|| format!("unknown file scaling {scaling:?}"))?,
                None => FileScaling::None,
            };
            let handle = manager.add_file_layer().context("can't add file layer")?;
            manager
                .commit_configuration(
                    handle,
                    LayerConfig::File {
                        path: path.clone(),
                        scaling,
                    },
                    spec.name.clone(),
                )?
                .context("file layer discarded")?
        }
        content => {
            let kind = match content {
                ContentSpec::Paint { color: fill, rect: area, frames } => {
                    let area = area.map(rect).transpose()?.unwrap_or(bounds);
                    let first = fill.as_deref().map(color).transpose()?.unwrap_or(Color::TRANSPARENT);
                    let mut rasters = vec![std::sync::Arc::new(Raster::filled(area, first))];
                    for frame in frames {
                        rasters.push(std::sync::Arc::new(Raster::filled(area, color(frame)?)));
                    }
                    NodeKind::Paint { frames: rasters }
                }
                ContentSpec::Group { passthrough } => NodeKind::Group {
                    passthrough: *passthrough,
                },
                ContentSpec::Clone { source } => NodeKind::Clone {
                    source: *names
                        .get(source)
                        .with_context(|| format!("clone source {source:?} not defined before it"))?,
                },
                ContentSpec::Shape { shapes } => NodeKind::Shape {
                    shapes: shapes.iter().map(shape).collect::<anyhow::Result<_>>()?,
                },
                ContentSpec::SelectionMask { rect: area } => NodeKind::SelectionMask {
                    selection: Selection::from_rect(rect(*area)?),
                },
                ContentSpec::TransparencyMask { rect: area } => NodeKind::TransparencyMask {
                    selection: Selection::from_rect(rect(*area)?),
                },
                ContentSpec::Adjustment { .. } | ContentSpec::Generator { .. } | ContentSpec::File { .. } => {
                    unreachable!("configured above")
                }
            };
            let parent = parent.unwrap_or(root);
            let image = manager.image_mut().context("no image open")?;
            let above = image.read().graph.children(parent).last();
            let name = match &spec.name {
                Some(name) => name.clone(),
                None => image.next_layer_name(),
            };
            manager
                .commands()
                .context("no image open")?
                .add_node(NodeData::new(name, kind), parent, above, true)?
        }
    };

    for child in &spec.children {
        build_layer(manager, child, Some(id), names)?;
    }
    apply_common(manager, id, spec)?;
    if let Some(name) = &spec.name {
        names.insert(name.clone(), id);
    }
    Ok(id)
}

fn shape(spec: &ShapeSpec) -> anyhow::Result<Shape> {
    let fill = color(&spec.fill)?;
    match (spec.rectangle, spec.ellipse) {
        (Some(area), None) => Ok(Shape::Rectangle { rect: rect(area)?, fill }),
        (None, Some(area)) => Ok(Shape::Ellipse { rect: rect(area)?, fill }),
        _ => anyhow::bail!("a shape is exactly one of `rectangle` or `ellipse`"),
    }
}

/// Blend, flags, style and metadata. Locks go on last, after children are in.
fn apply_common(manager: &mut LayerManager, id: NodeID, spec: &LayerSpec) -> anyhow::Result<()> {
    let op: CompositeOp = match &spec.blend {
        Some(op) => op.parse().with_context(|| format!("unknown blend {op:?}"))?,
        None => CompositeOp::default(),
    };
    let style = spec
        .shadow
        .as_ref()
        .map(|shadow| -> anyhow::Result<LayerStyle> {
            let defaults = DropShadow::default();
            Ok(LayerStyle {
                drop_shadow: Some(DropShadow {
                    offset: shadow.offset,
                    color: shadow.color.as_deref().map(color).transpose()?.unwrap_or(defaults.color),
                    opacity: shadow.opacity,
                }),
            })
        })
        .transpose()?;
    let metadata: MetadataStore = spec.metadata.iter().map(|(k, v)| (k.as_str(), v.as_str())).collect();
    let animated = matches!(&spec.content, ContentSpec::Paint { frames, .. } if !frames.is_empty());

    let mut commands = manager.commands().context("no image open")?;
    let name = commands
        .image()
        .read()
        .graph
        .get(id)
        .map(|data| data.name().to_owned())
        .context("layer vanished while building")?;
    let mut flags = NodeFlags::empty();
    flags.set(NodeFlags::VISIBLE, spec.visible);
    flags.set(NodeFlags::LOCKED, spec.locked);
    flags.set(NodeFlags::ANIMATED, animated);

    commands.set_blend(id, Blend::new(op, spec.opacity))?;
    commands.set_style(id, style)?;
    commands.set_metadata(id, metadata)?;
    commands.set_properties(id, Properties { name, flags })?;
    Ok(())
}

#[cfg(test)]
pub(crate) mod test {
    use super::*;
    use stratum_core::image::Image;

    pub(crate) const SCENE: &str = r##"
[image]
name = "sprites"
width = 8
height = 8

[[layers]]
kind = "paint"
name = "background"
color = "#ffffff"

[[layers]]
kind = "group"
name = "sprites"
children = [
    { kind = "shape", name = "dot", shapes = [{ rectangle = [0, 0, 2, 2], fill = "#ff0000" }] },
]

[[layers]]
kind = "adjustment"
name = "inverted"
filter = "invert"
locked = true

[[operations]]
op = "merge_layer"
layer = "sprites"
"##;

    pub(crate) fn built() -> (Scene, LayerManager, Names) {
        let scene: Scene = toml::from_str(SCENE).unwrap();
        let mut manager = LayerManager::new(Image::new(scene.image.document().unwrap()));
        let names = build(&mut manager, &scene.layers).unwrap();
        (scene, manager, names)
    }

    #[test]
    fn scene_builds_in_stacking_order() {
        let (scene, manager, names) = built();
        assert_eq!(scene.operations.len(), 1);
        let image = manager.image().unwrap();
        assert_eq!(image.bounds(), Rect::new(0, 0, 8, 8));

        let state = image.read();
        let graph = &state.graph;
        let top: Vec<_> = graph.children(graph.root()).collect();
        assert_eq!(top, vec![names["background"], names["sprites"], names["inverted"]]);
        assert_eq!(graph.parent(names["dot"]), Some(names["sprites"]));
        let inverted = graph.get(names["inverted"]).unwrap();
        assert!(inverted.is_locked());
        assert_eq!(inverted.name(), "inverted");
        drop(state);

        let merged = image.root_projection();
        assert_eq!(merged.get(0, 0).to_rgba8(), [0, 255, 255, 255]);
        assert_eq!(merged.get(5, 5).to_rgba8(), [0, 0, 0, 255]);
    }

    #[test]
    fn bad_shapes_are_rejected() {
        let spec = ShapeSpec {
            rectangle: Some([0, 0, 1, 1]),
            ellipse: Some([0, 0, 1, 1]),
            fill: "#000000".into(),
        };
        assert!(shape(&spec).is_err());
        assert!(color("red").is_err());
        assert!(rect([0, 0, -1, 1]).is_err());
    }
}
