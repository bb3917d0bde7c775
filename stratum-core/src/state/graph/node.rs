use std::sync::Arc;

use crate::blend::Blend;
use crate::color::Color;
use crate::filter::FilterConfig;
use crate::metadata::MetadataStore;
use crate::raster::{Raster, Rect, Selection};
use crate::style::LayerStyle;

bitflags::bitflags! {
    #[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
    pub struct NodeFlags: u8 {
        const VISIBLE = 1;
        /// Locked nodes accept no new children and no content edits from the user.
        const LOCKED = 1 << 1;
        /// Paint layers pick their frame from the image's current time.
        const ANIMATED = 1 << 2;
    }
}
impl Default for NodeFlags {
    fn default() -> Self {
        Self::VISIBLE
    }
}

/// The user-editable bits of a node that don't affect its kind.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Properties {
    pub name: String,
    pub flags: NodeFlags,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Default, strum::EnumString, strum::AsRefStr)]
#[strum(serialize_all = "snake_case")]
pub enum FileScaling {
    /// Pixels are placed 1:1 at the image origin.
    #[default]
    None,
    /// Stretched to cover the image bounds.
    ToImageSize,
    /// Scaled by the ratio of image resolution to file resolution.
    ToImageResolution,
}

/// An external image referenced by a file layer.
#[derive(Clone, Debug, PartialEq)]
pub struct FileLayer {
    pub path: std::path::PathBuf,
    pub scaling: FileScaling,
    /// Decoded pixels, `None` if the file could not be read.
    pub decoded: Option<Arc<Raster>>,
    /// Resolution of the file in DPI, if it declares one.
    pub resolution: Option<f32>,
}

#[derive(Copy, Clone, Debug, PartialEq)]
pub enum Shape {
    Rectangle { rect: Rect, fill: Color },
    Ellipse { rect: Rect, fill: Color },
}
impl Shape {
    #[must_use]
    pub fn bounds(&self) -> Rect {
        match self {
            Self::Rectangle { rect, .. } | Self::Ellipse { rect, .. } => *rect,
        }
    }
    #[must_use]
    pub fn fill(&self) -> Color {
        match self {
            Self::Rectangle { fill, .. } | Self::Ellipse { fill, .. } => *fill,
        }
    }
    #[must_use]
    pub fn translated(&self, dx: i32, dy: i32) -> Self {
        match *self {
            Self::Rectangle { rect, fill } => Self::Rectangle {
                rect: rect.translated(dx, dy),
                fill,
            },
            Self::Ellipse { rect, fill } => Self::Ellipse {
                rect: rect.translated(dx, dy),
                fill,
            },
        }
    }
    /// Whether the pixel center at `(x, y)` is inside.
    fn covers(&self, x: i32, y: i32) -> bool {
        match self {
            Self::Rectangle { rect, .. } => rect.contains(x, y),
            Self::Ellipse { rect, .. } => {
                if !rect.contains(x, y) {
                    return false;
                }
                let rx = f64::from(rect.width) / 2.0;
                let ry = f64::from(rect.height) / 2.0;
                let dx = (f64::from(x) + 0.5 - f64::from(rect.x) - rx) / rx;
                let dy = (f64::from(y) + 0.5 - f64::from(rect.y) - ry) / ry;
                dx * dx + dy * dy <= 1.0
            }
        }
    }
    /// Draw shapes in order, later shapes on top.
    #[must_use]
    pub fn render_all(shapes: &[Self]) -> Raster {
        let bounds = shapes
            .iter()
            .fold(Rect::EMPTY, |acc, shape| acc.union(&shape.bounds()));
        let mut out = Raster::transparent(bounds);
        for shape in shapes {
            let rect = shape.bounds();
            let pixels = Raster::from_fn(rect, |x, y| {
                if shape.covers(x, y) {
                    shape.fill()
                } else {
                    Color::TRANSPARENT
                }
            });
            out.composite(&pixels, Blend::default());
        }
        out
    }
}

/// What a node is, and the content it renders from.
#[derive(Clone, Debug, PartialEq, strum::IntoStaticStr)]
#[strum(serialize_all = "snake_case")]
pub enum NodeKind {
    Paint {
        /// Always at least one. Extra frames are only shown when animated.
        frames: Vec<Arc<Raster>>,
    },
    Group {
        /// Children blend directly into whatever lies beneath the group.
        passthrough: bool,
    },
    Adjustment {
        filter: Option<FilterConfig>,
        selection: Option<Selection>,
    },
    Generator {
        config: Option<FilterConfig>,
        selection: Option<Selection>,
    },
    Clone {
        source: super::NodeID,
    },
    File {
        file: Option<FileLayer>,
    },
    Shape {
        shapes: Vec<Shape>,
    },
    SelectionMask {
        selection: Selection,
    },
    /// Multiplies the alpha of its parent layer.
    TransparencyMask {
        selection: Selection,
    },
}
impl NodeKind {
    #[must_use]
    pub fn paint(raster: Raster) -> Self {
        Self::Paint {
            frames: vec![Arc::new(raster)],
        }
    }
    #[must_use]
    pub fn group() -> Self {
        Self::Group { passthrough: false }
    }
    #[must_use]
    pub fn is_mask(&self) -> bool {
        matches!(self, Self::SelectionMask { .. } | Self::TransparencyMask { .. })
    }
    #[must_use]
    pub fn is_group(&self) -> bool {
        matches!(self, Self::Group { .. })
    }
    /// Whether a node of this kind may hold a child of kind `child`.
    #[must_use]
    pub fn allows_as_child(&self, child: &Self) -> bool {
        match self {
            Self::Group { .. } => true,
            Self::Paint { .. }
            | Self::Adjustment { .. }
            | Self::Generator { .. }
            | Self::Clone { .. }
            | Self::File { .. }
            | Self::Shape { .. } => child.is_mask(),
            Self::SelectionMask { .. } | Self::TransparencyMask { .. } => false,
        }
    }
    /// The filter or generator config, for the kinds that carry one.
    #[must_use]
    pub fn filter(&self) -> Option<Option<&FilterConfig>> {
        match self {
            Self::Adjustment { filter, .. } => Some(filter.as_ref()),
            Self::Generator { config, .. } => Some(config.as_ref()),
            _ => None,
        }
    }
    pub(super) fn filter_mut(&mut self) -> Option<&mut Option<FilterConfig>> {
        match self {
            Self::Adjustment { filter, .. } => Some(filter),
            Self::Generator { config, .. } => Some(config),
            _ => None,
        }
    }
    /// The raster shown at `time`, for paint layers.
    #[must_use]
    pub fn frame_at(&self, time: u32, animated: bool) -> Option<&Arc<Raster>> {
        let Self::Paint { frames } = self else {
            return None;
        };
        let idx = if animated {
            (time as usize).min(frames.len().saturating_sub(1))
        } else {
            0
        };
        frames.get(idx)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct NodeData {
    kind: NodeKind,
    // Not public, the history relies on this matching its commands.
    /// Whether the node was removed, or the command that created it was undone.
    pub(super) deleted: bool,
    name: String,
    blend: Blend,
    flags: NodeFlags,
    style: Option<LayerStyle>,
    metadata: MetadataStore,
}
impl NodeData {
    #[must_use]
    pub fn new(name: impl Into<String>, kind: NodeKind) -> Self {
        Self {
            kind,
            deleted: false,
            name: name.into(),
            blend: Blend::default(),
            flags: NodeFlags::default(),
            style: None,
            metadata: MetadataStore::default(),
        }
    }
    #[must_use]
    pub fn with_blend(mut self, blend: Blend) -> Self {
        self.blend = blend;
        self
    }
    #[must_use]
    pub fn with_flags(mut self, flags: NodeFlags) -> Self {
        self.flags = flags;
        self
    }
    #[must_use]
    pub fn with_style(mut self, style: Option<LayerStyle>) -> Self {
        self.style = style;
        self
    }
    #[must_use]
    pub fn with_metadata(mut self, metadata: MetadataStore) -> Self {
        self.metadata = metadata;
        self
    }
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }
    #[must_use]
    pub fn kind(&self) -> &NodeKind {
        &self.kind
    }
    #[must_use]
    pub fn blend(&self) -> Blend {
        self.blend
    }
    #[must_use]
    pub fn flags(&self) -> NodeFlags {
        self.flags
    }
    #[must_use]
    pub fn is_visible(&self) -> bool {
        self.flags.contains(NodeFlags::VISIBLE)
    }
    #[must_use]
    pub fn is_locked(&self) -> bool {
        self.flags.contains(NodeFlags::LOCKED)
    }
    #[must_use]
    pub fn is_animated(&self) -> bool {
        self.flags.contains(NodeFlags::ANIMATED)
    }
    #[must_use]
    pub fn style(&self) -> Option<&LayerStyle> {
        self.style.as_ref()
    }
    #[must_use]
    pub fn metadata(&self) -> &MetadataStore {
        &self.metadata
    }
    #[must_use]
    pub fn properties(&self) -> Properties {
        Properties {
            name: self.name.clone(),
            flags: self.flags,
        }
    }
    pub(super) fn set_properties(&mut self, properties: Properties) {
        self.name = properties.name;
        self.flags = properties.flags;
    }
    pub(super) fn kind_mut(&mut self) -> &mut NodeKind {
        &mut self.kind
    }
    pub(super) fn blend_mut(&mut self) -> &mut Blend {
        &mut self.blend
    }
    pub(super) fn style_mut(&mut self) -> &mut Option<LayerStyle> {
        &mut self.style
    }
    pub(super) fn metadata_mut(&mut self) -> &mut MetadataStore {
        &mut self.metadata
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn child_rules() {
        let mask = NodeKind::TransparencyMask {
            selection: Selection::empty(),
        };
        let paint = NodeKind::paint(Raster::transparent(Rect::EMPTY));
        assert!(NodeKind::group().allows_as_child(&paint));
        assert!(NodeKind::group().allows_as_child(&mask));
        assert!(paint.allows_as_child(&mask));
        assert!(!paint.allows_as_child(&paint));
        assert!(!mask.allows_as_child(&mask));
    }
    #[test]
    fn ellipse_is_inscribed() {
        let shape = Shape::Ellipse {
            rect: Rect::new(0, 0, 10, 10),
            fill: Color::BLACK,
        };
        let out = Shape::render_all(&[shape]);
        assert_eq!(out.get(5, 5), Color::BLACK);
        assert!(out.get(0, 0).is_transparent());
        assert!(out.get(9, 9).is_transparent());
    }
    #[test]
    fn animated_frame_clamps() {
        let frames = (0..3)
            .map(|i| Arc::new(Raster::filled(Rect::new(i, 0, 1, 1), Color::WHITE)))
            .collect();
        let kind = NodeKind::Paint { frames };
        assert_eq!(kind.frame_at(1, true).map(|f| f.rect().x), Some(1));
        assert_eq!(kind.frame_at(10, true).map(|f| f.rect().x), Some(2));
        assert_eq!(kind.frame_at(10, false).map(|f| f.rect().x), Some(0));
    }
}
