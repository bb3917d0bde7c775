//! # Blending
//!
//! Composite ops combine a layer (source) with everything beneath it (backdrop). All math is
//! done on premultiplied colors, in a fixed order, so the same inputs always produce the same bits.

use crate::color::Color;

#[derive(
    strum::AsRefStr,
    strum::EnumString,
    strum::EnumIter,
    strum::Display,
    PartialEq,
    Eq,
    Copy,
    Clone,
    Hash,
    Debug,
    Default,
)]
#[strum(serialize_all = "snake_case")]
#[repr(u8)]
pub enum CompositeOp {
    #[default]
    Normal,
    /// Source is painted underneath the backdrop.
    Behind,
    Multiply,
    Screen,
    Add,
    Overlay,
    Darken,
    Lighten,
    Difference,
    /// Source alpha removes backdrop coverage. Source color is ignored.
    Erase,
}
impl CompositeOp {
    /// Separable blend function on straight color channels, `None` for the ops that are not
    /// expressed as one.
    fn separable(self) -> Option<fn(f32, f32) -> f32> {
        fn hard_light(backdrop: f32, source: f32) -> f32 {
            if source <= 0.5 {
                backdrop * 2.0 * source
            } else {
                let s = 2.0 * source - 1.0;
                backdrop + s - backdrop * s
            }
        }
        match self {
            Self::Normal => Some(|_, s| s),
            Self::Multiply => Some(|b, s| b * s),
            Self::Screen => Some(|b, s| b + s - b * s),
            Self::Add => Some(|b, s| (b + s).min(1.0)),
            Self::Overlay => Some(|b, s| hard_light(s, b)),
            Self::Darken => Some(|b, s| b.min(s)),
            Self::Lighten => Some(|b, s| b.max(s)),
            Self::Difference => Some(|b, s| (b - s).abs()),
            Self::Behind | Self::Erase => None,
        }
    }
    /// Combine one source pixel onto one backdrop pixel. `source` must already be modulated by
    /// opacity and masks.
    #[must_use]
    pub fn apply(self, backdrop: Color, source: Color) -> Color {
        if source.is_transparent() && self != Self::Behind {
            return backdrop;
        }
        let [br, bg, bb, ba] = backdrop.premultiplied();
        let [sr, sg, sb, sa] = source.premultiplied();
        match self {
            Self::Behind => {
                let k = 1.0 - ba;
                Color::from_premultiplied(br + sr * k, bg + sg * k, bb + sb * k, ba + sa * k)
            }
            Self::Erase => backdrop.scaled(1.0 - sa),
            Self::Normal => {
                let k = 1.0 - sa;
                Color::from_premultiplied(sr + br * k, sg + bg * k, sb + bb * k, sa + ba * k)
            }
            separable => {
                // Checked by the arms above.
                let f = separable.separable().unwrap_or(|_, s| s);
                let [sr_s, sg_s, sb_s, _] = source.straight();
                let [br_s, bg_s, bb_s, _] = backdrop.straight();
                let both = sa * ba;
                let channel = |s_pre: f32, b_pre: f32, s: f32, b: f32| {
                    s_pre * (1.0 - ba) + b_pre * (1.0 - sa) + both * f(b, s)
                };
                Color::from_premultiplied(
                    channel(sr, br, sr_s, br_s),
                    channel(sg, bg, sg_s, bg_s),
                    channel(sb, bb, sb_s, bb_s),
                    sa + ba * (1.0 - sa),
                )
            }
        }
    }
}

/// How a node is combined with what lies beneath it.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct Blend {
    pub op: CompositeOp,
    /// 0 is fully transparent, 255 is fully opaque.
    pub opacity: u8,
}
impl Default for Blend {
    fn default() -> Self {
        Self {
            op: CompositeOp::default(),
            opacity: u8::MAX,
        }
    }
}
impl Blend {
    #[must_use]
    pub fn new(op: CompositeOp, opacity: u8) -> Self {
        Self { op, opacity }
    }
    /// Opacity scaled to `[0, 1]`.
    #[must_use]
    pub fn opacity_f32(&self) -> f32 {
        f32::from(self.opacity) / 255.0
    }
    /// Blend a source pixel, with an additional coverage factor in `[0, 1]` from masks.
    #[must_use]
    pub fn apply(&self, backdrop: Color, source: Color, coverage: f32) -> Color {
        let factor = self.opacity_f32() * coverage;
        let source = if factor >= 1.0 {
            source
        } else {
            source.scaled(factor)
        };
        self.op.apply(backdrop, source)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use strum::IntoEnumIterator;

    #[test]
    fn transparent_source_is_identity() {
        let backdrop = Color::from_straight(0.2, 0.4, 0.6, 0.8);
        for op in CompositeOp::iter() {
            if op == CompositeOp::Behind {
                continue;
            }
            assert_eq!(op.apply(backdrop, Color::TRANSPARENT), backdrop, "{op}");
        }
    }
    #[test]
    fn normal_onto_transparent_is_exact() {
        let source = Color::from_straight(0.3, 0.6, 0.9, 0.5);
        assert_eq!(Blend::default().apply(Color::TRANSPARENT, source, 1.0), source);
    }
    #[test]
    fn behind_keeps_opaque_backdrop() {
        let backdrop = Color::WHITE;
        let source = Color::from_straight(1.0, 0.0, 0.0, 1.0);
        assert_eq!(CompositeOp::Behind.apply(backdrop, source), backdrop);
        assert_eq!(CompositeOp::Behind.apply(Color::TRANSPARENT, source), source);
    }
    #[test]
    fn multiply_white_is_identity_on_opaque() {
        let backdrop = Color::from_straight(0.25, 0.5, 0.75, 1.0);
        let out = CompositeOp::Multiply.apply(backdrop, Color::WHITE);
        assert_eq!(out, backdrop);
    }
    #[test]
    fn erase_removes_coverage() {
        let out = CompositeOp::Erase.apply(Color::WHITE, Color::BLACK);
        assert!(out.is_transparent());
    }
    #[test]
    fn op_names_round_trip() {
        for op in CompositeOp::iter() {
            assert_eq!(op.as_ref().parse::<CompositeOp>().ok(), Some(op));
        }
        assert_eq!("behind".parse::<CompositeOp>().ok(), Some(CompositeOp::Behind));
    }
}
