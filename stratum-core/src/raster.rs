//! # Rasters
//!
//! CPU pixel buffers with an integer placement in image space. Every layer's pixel content,
//! and every cached projection, is one of these.

use crate::blend::Blend;
use crate::color::Color;

/// Integer rectangle in image space. `x`/`y` is the top-left, extending right and down.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Default)]
pub struct Rect {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}
impl Rect {
    pub const EMPTY: Self = Self {
        x: 0,
        y: 0,
        width: 0,
        height: 0,
    };
    #[must_use]
    pub const fn new(x: i32, y: i32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
    /// One past the rightmost column.
    #[must_use]
    pub fn right(&self) -> i64 {
        i64::from(self.x) + i64::from(self.width)
    }
    /// One past the bottom row.
    #[must_use]
    pub fn bottom(&self) -> i64 {
        i64::from(self.y) + i64::from(self.height)
    }
    #[must_use]
    pub fn area(&self) -> usize {
        self.width as usize * self.height as usize
    }
    #[must_use]
    pub fn contains(&self, x: i32, y: i32) -> bool {
        x >= self.x && y >= self.y && i64::from(x) < self.right() && i64::from(y) < self.bottom()
    }
    fn from_edges(left: i64, top: i64, right: i64, bottom: i64) -> Self {
        if right <= left || bottom <= top {
            return Self::EMPTY;
        }
        // Edges always originate from i32 + u32 sums, so they fit back after the emptiness check.
        Self {
            x: i32::try_from(left).unwrap_or(i32::MAX),
            y: i32::try_from(top).unwrap_or(i32::MAX),
            width: u32::try_from(right - left).unwrap_or(u32::MAX),
            height: u32::try_from(bottom - top).unwrap_or(u32::MAX),
        }
    }
    /// Overlapping area, or [`Rect::EMPTY`].
    #[must_use]
    pub fn intersect(&self, other: &Self) -> Self {
        Self::from_edges(
            i64::from(self.x.max(other.x)),
            i64::from(self.y.max(other.y)),
            self.right().min(other.right()),
            self.bottom().min(other.bottom()),
        )
    }
    /// Smallest rect containing both. Empty rects are ignored.
    #[must_use]
    pub fn union(&self, other: &Self) -> Self {
        if self.is_empty() {
            return *other;
        }
        if other.is_empty() {
            return *self;
        }
        Self::from_edges(
            i64::from(self.x.min(other.x)),
            i64::from(self.y.min(other.y)),
            self.right().max(other.right()),
            self.bottom().max(other.bottom()),
        )
    }
    #[must_use]
    pub fn translated(&self, dx: i32, dy: i32) -> Self {
        Self {
            x: self.x.saturating_add(dx),
            y: self.y.saturating_add(dy),
            ..*self
        }
    }
    /// Row-major index of `(x, y)`, if inside.
    fn index_of(&self, x: i32, y: i32) -> Option<usize> {
        if !self.contains(x, y) {
            return None;
        }
        let col = (i64::from(x) - i64::from(self.x)) as usize;
        let row = (i64::from(y) - i64::from(self.y)) as usize;
        Some(row * self.width as usize + col)
    }
    /// Iterate every `(x, y)` inside, row by row.
    pub fn points(&self) -> impl Iterator<Item = (i32, i32)> {
        let Self {
            x,
            y,
            width,
            height,
        } = *self;
        // Anything past i32::MAX can't be addressed, and is skipped.
        let columns = move || {
            (0..i64::from(width)).map_while(move |col| i32::try_from(i64::from(x) + col).ok())
        };
        (0..i64::from(height))
            .map_while(move |row| i32::try_from(i64::from(y) + row).ok())
            .flat_map(move |py| columns().map(move |px| (px, py)))
    }
}

/// A rect of premultiplied pixels. Anything outside the rect is transparent.
#[derive(Clone, PartialEq)]
pub struct Raster {
    rect: Rect,
    pixels: Vec<Color>,
}
impl std::fmt::Debug for Raster {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Raster")
            .field("rect", &self.rect)
            .field("digest", &self.digest().to_hex())
            .finish()
    }
}
impl Raster {
    #[must_use]
    pub fn transparent(rect: Rect) -> Self {
        Self::filled(rect, Color::TRANSPARENT)
    }
    #[must_use]
    pub fn filled(rect: Rect, color: Color) -> Self {
        Self {
            rect,
            pixels: vec![color; rect.area()],
        }
    }
    /// Wrap existing pixels. `None` if the length does not match the rect.
    #[must_use]
    pub fn from_pixels(rect: Rect, pixels: Vec<Color>) -> Option<Self> {
        (pixels.len() == rect.area()).then_some(Self { rect, pixels })
    }
    /// Evaluate `f` at every point of `rect`.
    pub fn from_fn(rect: Rect, mut f: impl FnMut(i32, i32) -> Color) -> Self {
        Self {
            rect,
            pixels: rect.points().map(|(x, y)| f(x, y)).collect(),
        }
    }
    #[must_use]
    pub fn rect(&self) -> Rect {
        self.rect
    }
    #[must_use]
    pub fn pixels(&self) -> &[Color] {
        &self.pixels
    }
    /// Pixel at `(x, y)`, transparent when outside.
    #[must_use]
    pub fn get(&self, x: i32, y: i32) -> Color {
        self.rect
            .index_of(x, y)
            .map_or(Color::TRANSPARENT, |idx| self.pixels[idx])
    }
    /// Set a pixel. Writes outside the rect are dropped.
    pub fn set(&mut self, x: i32, y: i32, color: Color) {
        if let Some(idx) = self.rect.index_of(x, y) {
            self.pixels[idx] = color;
        }
    }
    /// Size of the pixel storage in bytes.
    #[must_use]
    pub fn byte_size(&self) -> usize {
        std::mem::size_of_val(self.pixels.as_slice())
    }
    /// Hash of placement and pixel bits, for cheap equality checks and logs.
    #[must_use]
    pub fn digest(&self) -> blake3::Hash {
        let mut hasher = blake3::Hasher::new();
        hasher.update(&self.rect.x.to_le_bytes());
        hasher.update(&self.rect.y.to_le_bytes());
        hasher.update(&self.rect.width.to_le_bytes());
        hasher.update(&self.rect.height.to_le_bytes());
        hasher.update(bytemuck::cast_slice(&self.pixels));
        hasher.finalize()
    }
    /// Blend `source` onto self over the overlapping area.
    pub fn composite(&mut self, source: &Raster, blend: Blend) {
        self.composite_masked(source, blend, None);
    }
    /// Blend `source` onto self, with per-pixel coverage from `mask`. Pixels outside the mask are
    /// left untouched.
    pub fn composite_masked(&mut self, source: &Raster, blend: Blend, mask: Option<&Selection>) {
        let area = self.rect.intersect(&source.rect);
        for (x, y) in area.points() {
            let coverage = mask.map_or(1.0, |mask| mask.coverage(x, y));
            if coverage == 0.0 {
                continue;
            }
            // Both unwraps ok - the point is within the intersection of both rects.
            let dst = self.rect.index_of(x, y).unwrap();
            let src = source.rect.index_of(x, y).unwrap();
            self.pixels[dst] = blend.apply(self.pixels[dst], source.pixels[src], coverage);
        }
    }
    /// Move each pixel toward `source` by `factor`, further scaled by the mask's coverage.
    /// A factor of one with full coverage replaces the pixel outright.
    pub fn mix_masked(&mut self, source: &Raster, factor: f32, mask: Option<&Selection>) {
        let area = self.rect.intersect(&source.rect);
        for (x, y) in area.points() {
            let t = factor * mask.map_or(1.0, |mask| mask.coverage(x, y));
            if t <= 0.0 {
                continue;
            }
            // Both unwraps ok - the point is within the intersection of both rects.
            let dst = self.rect.index_of(x, y).unwrap();
            let src = source.rect.index_of(x, y).unwrap();
            if t >= 1.0 {
                self.pixels[dst] = source.pixels[src];
                continue;
            }
            let [br, bg, bb, ba] = self.pixels[dst].premultiplied();
            let [sr, sg, sb, sa] = source.pixels[src].premultiplied();
            let lerp = |b: f32, s: f32| b + (s - b) * t;
            self.pixels[dst] =
                Color::from_premultiplied(lerp(br, sr), lerp(bg, sg), lerp(bb, sb), lerp(ba, sa));
        }
    }
    /// Apply `f` to every pixel.
    #[must_use]
    pub fn map(&self, mut f: impl FnMut(i32, i32, Color) -> Color) -> Self {
        Self {
            rect: self.rect,
            pixels: self
                .rect
                .points()
                .zip(&self.pixels)
                .map(|((x, y), &color)| f(x, y, color))
                .collect(),
        }
    }
    /// Copy of the area within `rect`. The result's rect is the intersection.
    #[must_use]
    pub fn cropped(&self, rect: Rect) -> Self {
        let area = self.rect.intersect(&rect);
        Self::from_fn(area, |x, y| self.get(x, y))
    }
    /// Same pixels, placed elsewhere.
    #[must_use]
    pub fn translated(&self, dx: i32, dy: i32) -> Self {
        Self {
            rect: self.rect.translated(dx, dy),
            pixels: self.pixels.clone(),
        }
    }
    /// Resample into `rect` with nearest-neighbor sampling.
    #[must_use]
    pub fn scaled_to(&self, rect: Rect) -> Self {
        if self.rect.is_empty() {
            return Self::transparent(rect);
        }
        let sx = self.rect.width as f32 / rect.width.max(1) as f32;
        let sy = self.rect.height as f32 / rect.height.max(1) as f32;
        Self::from_fn(rect, |x, y| {
            let u = ((x - rect.x) as f32 + 0.5) * sx;
            let v = ((y - rect.y) as f32 + 0.5) * sy;
            self.get(self.rect.x + u.floor() as i32, self.rect.y + v.floor() as i32)
        })
    }
    /// Rotate clockwise by `radians` about `pivot`, with nearest-neighbor sampling. The result is
    /// sized to hold all rotated pixels.
    #[must_use]
    pub fn rotated(&self, radians: f64, pivot: (f64, f64)) -> Self {
        if self.rect.is_empty() {
            return self.clone();
        }
        let (sin, cos) = radians.sin_cos();
        let (px, py) = pivot;
        let forward = |x: f64, y: f64| {
            let (dx, dy) = (x - px, y - py);
            (px + dx * cos - dy * sin, py + dx * sin + dy * cos)
        };
        let corners = [
            (f64::from(self.rect.x), f64::from(self.rect.y)),
            (self.rect.right() as f64, f64::from(self.rect.y)),
            (f64::from(self.rect.x), self.rect.bottom() as f64),
            (self.rect.right() as f64, self.rect.bottom() as f64),
        ]
        .map(|(x, y)| forward(x, y))
        // Right angle turns land exactly on the grid, up to trig error.
        .map(|(x, y)| {
            let snap = |v: f64| if (v - v.round()).abs() < 1e-9 { v.round() } else { v };
            (snap(x), snap(y))
        });
        let (mut left, mut top, mut right, mut bottom) = (f64::MAX, f64::MAX, f64::MIN, f64::MIN);
        for (x, y) in corners {
            left = left.min(x);
            top = top.min(y);
            right = right.max(x);
            bottom = bottom.max(y);
        }
        let bounds = Rect::from_edges(
            left.floor() as i64,
            top.floor() as i64,
            right.ceil() as i64,
            bottom.ceil() as i64,
        );
        Self::from_fn(bounds, |x, y| {
            // Inverse mapping of the destination pixel center.
            let (dx, dy) = (f64::from(x) + 0.5 - px, f64::from(y) + 0.5 - py);
            let sx = px + dx * cos + dy * sin;
            let sy = py - dx * sin + dy * cos;
            self.get(sx.floor() as i32, sy.floor() as i32)
        })
    }
    /// Tightest rect holding every non-transparent pixel, or [`Rect::EMPTY`].
    #[must_use]
    pub fn exact_bounds(&self) -> Rect {
        self.rect
            .points()
            .zip(&self.pixels)
            .filter(|(_, color)| !color.is_transparent())
            .fold(Rect::EMPTY, |acc, ((x, y), _)| acc.union(&Rect::new(x, y, 1, 1)))
    }
    /// Multiply every pixel by the mask's coverage. Pixels outside the mask become transparent.
    #[must_use]
    pub fn masked(&self, mask: &Selection) -> Self {
        self.map(|x, y, color| {
            let coverage = mask.coverage(x, y);
            if coverage >= 1.0 {
                color
            } else {
                color.scaled(coverage)
            }
        })
    }
    /// Alpha channel as a selection.
    #[must_use]
    pub fn alpha_selection(&self) -> Selection {
        use az::SaturatingAs;
        Selection::from_fn(self.rect, |x, y| {
            (self.get(x, y).alpha() * 255.0).round().saturating_as::<u8>()
        })
    }
}

/// Per-pixel coverage in `0..=255`, zero outside the rect.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Selection {
    rect: Rect,
    coverage: Vec<u8>,
}
impl Selection {
    #[must_use]
    pub fn empty() -> Self {
        Self {
            rect: Rect::EMPTY,
            coverage: Vec::new(),
        }
    }
    /// Fully selected rect.
    #[must_use]
    pub fn from_rect(rect: Rect) -> Self {
        Self {
            rect,
            coverage: vec![u8::MAX; rect.area()],
        }
    }
    pub fn from_fn(rect: Rect, mut f: impl FnMut(i32, i32) -> u8) -> Self {
        Self {
            rect,
            coverage: rect.points().map(|(x, y)| f(x, y)).collect(),
        }
    }
    #[must_use]
    pub fn rect(&self) -> Rect {
        self.rect
    }
    #[must_use]
    pub fn get(&self, x: i32, y: i32) -> u8 {
        self.rect.index_of(x, y).map_or(0, |idx| self.coverage[idx])
    }
    /// Coverage scaled to `[0, 1]`.
    #[must_use]
    pub fn coverage(&self, x: i32, y: i32) -> f32 {
        f32::from(self.get(x, y)) / 255.0
    }
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.coverage.iter().all(|&c| c == 0)
    }
    /// Boolean union: a pixel is covered as much as the stronger of the two.
    #[must_use]
    pub fn union(&self, other: &Self) -> Self {
        let rect = self.rect.union(&other.rect);
        Self::from_fn(rect, |x, y| self.get(x, y).max(other.get(x, y)))
    }
    /// Boolean intersection: a pixel is covered as much as the weaker of the two.
    #[must_use]
    pub fn intersect(&self, other: &Self) -> Self {
        let rect = self.rect.intersect(&other.rect);
        Self::from_fn(rect, |x, y| self.get(x, y).min(other.get(x, y)))
    }
    #[must_use]
    pub fn translated(&self, dx: i32, dy: i32) -> Self {
        Self {
            rect: self.rect.translated(dx, dy),
            coverage: self.coverage.clone(),
        }
    }
    #[must_use]
    pub fn cropped(&self, rect: Rect) -> Self {
        let area = self.rect.intersect(&rect);
        Self::from_fn(area, |x, y| self.get(x, y))
    }
    /// Rotate like [`Raster::rotated`].
    #[must_use]
    pub fn rotated(&self, radians: f64, pivot: (f64, f64)) -> Self {
        let as_alpha = Raster::from_fn(self.rect, |x, y| Color::WHITE.scaled(self.coverage(x, y)));
        as_alpha.rotated(radians, pivot).alpha_selection()
    }
}
impl std::fmt::Debug for Selection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let covered = self.coverage.iter().filter(|&&c| c != 0).count();
        f.debug_struct("Selection")
            .field("rect", &self.rect)
            .field("covered", &covered)
            .finish()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn rect_set_ops() {
        let a = Rect::new(0, 0, 10, 10);
        let b = Rect::new(5, -5, 10, 10);
        assert_eq!(a.intersect(&b), Rect::new(5, 0, 5, 5));
        assert_eq!(a.union(&b), Rect::new(0, -5, 15, 15));
        assert!(a.intersect(&Rect::new(20, 20, 1, 1)).is_empty());
        assert_eq!(Rect::EMPTY.union(&a), a);
    }
    #[test]
    fn points_stop_at_the_edge_of_i32() {
        let edge = Rect::new(0, 0, 4, 1).translated(i32::MAX - 1, 0);
        let points: Vec<_> = edge.points().collect();
        assert_eq!(points, [(i32::MAX - 1, 0), (i32::MAX, 0)]);
        assert_eq!(Rect::new(-1, -1, 2, 2).points().count(), 4);
    }
    #[test]
    fn composite_only_touches_overlap() {
        let mut base = Raster::filled(Rect::new(0, 0, 4, 4), Color::WHITE);
        let top = Raster::filled(Rect::new(2, 2, 4, 4), Color::BLACK);
        base.composite(&top, Blend::default());
        assert_eq!(base.get(0, 0), Color::WHITE);
        assert_eq!(base.get(3, 3), Color::BLACK);
        assert_eq!(base.rect(), Rect::new(0, 0, 4, 4));
    }
    #[test]
    fn exact_bounds_skips_transparent() {
        let mut raster = Raster::transparent(Rect::new(0, 0, 8, 8));
        raster.set(2, 3, Color::BLACK);
        raster.set(5, 4, Color::BLACK);
        assert_eq!(raster.exact_bounds(), Rect::new(2, 3, 4, 2));
        assert!(Raster::transparent(Rect::new(0, 0, 2, 2)).exact_bounds().is_empty());
    }
    #[test]
    fn half_turn_rotation() {
        let mut raster = Raster::transparent(Rect::new(0, 0, 4, 2));
        raster.set(0, 0, Color::BLACK);
        let rotated = raster.rotated(std::f64::consts::PI, (2.0, 1.0));
        assert_eq!(rotated.rect(), Rect::new(0, 0, 4, 2));
        assert_eq!(rotated.get(3, 1), Color::BLACK);
        assert!(rotated.get(0, 0).is_transparent());
    }
    #[test]
    fn selection_union() {
        let a = Selection::from_rect(Rect::new(0, 0, 2, 2));
        let b = Selection::from_rect(Rect::new(4, 0, 2, 2));
        let both = a.union(&b);
        assert_eq!(both.rect(), Rect::new(0, 0, 6, 2));
        assert_eq!(both.get(1, 1), 255);
        assert_eq!(both.get(3, 1), 0);
        assert_eq!(both.get(5, 1), 255);
    }
}
