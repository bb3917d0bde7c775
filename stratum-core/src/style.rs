//! Layer styles: effects rendered from a layer's own pixels after its masks.

use crate::blend::{Blend, CompositeOp};
use crate::color::Color;
use crate::raster::Raster;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DropShadow {
    /// Shadow displacement in pixels, right and down.
    pub offset: (i32, i32),
    pub color: Color,
    pub opacity: u8,
}
impl Default for DropShadow {
    fn default() -> Self {
        Self {
            offset: (4, 4),
            color: Color::BLACK,
            opacity: 192,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct LayerStyle {
    pub drop_shadow: Option<DropShadow>,
}
impl LayerStyle {
    /// Whether rendering with this style is the same as rendering without one.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.drop_shadow.is_none()
    }
    /// Render the effects around `content`. The result covers both the content and the effects.
    #[must_use]
    pub fn apply(&self, content: &Raster) -> Raster {
        let Some(shadow) = self.drop_shadow else {
            return content.clone();
        };
        let (dx, dy) = shadow.offset;
        let coverage = content.alpha_selection().translated(dx, dy);
        let rect = content.rect().union(&coverage.rect());
        let mut out = Raster::transparent(rect);
        let shadow_pixels = Raster::filled(coverage.rect(), shadow.color);
        out.composite_masked(
            &shadow_pixels,
            Blend::new(CompositeOp::Normal, shadow.opacity),
            Some(&coverage),
        );
        out.composite(content, Blend::default());
        out
    }
}
