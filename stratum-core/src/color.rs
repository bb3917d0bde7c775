/// A premultiplied, linear RGBA color.
///
/// Fully transparent colors are always normalized to all zeros, so two transparent
/// colors compare equal regardless of how they were produced.
#[repr(C)]
#[derive(Copy, Clone, PartialEq, bytemuck::Pod, bytemuck::Zeroable, Debug, Default)]
pub struct Color {
    r: f32,
    g: f32,
    b: f32,
    a: f32,
}
impl Color {
    pub const TRANSPARENT: Self = Self {
        r: 0.0,
        g: 0.0,
        b: 0.0,
        a: 0.0,
    };
    pub const BLACK: Self = Self {
        r: 0.0,
        g: 0.0,
        b: 0.0,
        a: 1.0,
    };
    pub const WHITE: Self = Self {
        r: 1.0,
        g: 1.0,
        b: 1.0,
        a: 1.0,
    };
    /// Build from premultiplied components. Components are clamped to `[0, 1]`, color channels
    /// are further clamped to not exceed alpha. Non-finite values become zero.
    #[must_use]
    pub fn from_premultiplied(r: f32, g: f32, b: f32, a: f32) -> Self {
        let sanitize = |v: f32| if v.is_finite() { v.clamp(0.0, 1.0) } else { 0.0 };
        let a = sanitize(a);
        if a == 0.0 {
            return Self::TRANSPARENT;
        }
        Self {
            r: sanitize(r).min(a),
            g: sanitize(g).min(a),
            b: sanitize(b).min(a),
            a,
        }
    }
    /// Build from straight (non-premultiplied) components.
    #[must_use]
    pub fn from_straight(r: f32, g: f32, b: f32, a: f32) -> Self {
        Self::from_premultiplied(r * a, g * a, b * a, a)
    }
    /// Build from straight 8-bit components, as found in most image files.
    #[must_use]
    pub fn from_rgba8([r, g, b, a]: [u8; 4]) -> Self {
        let unit = |v: u8| f32::from(v) / 255.0;
        Self::from_straight(unit(r), unit(g), unit(b), unit(a))
    }
    /// Quantize to straight 8-bit components.
    #[must_use]
    pub fn to_rgba8(self) -> [u8; 4] {
        use az::SaturatingAs;
        let quantize = |v: f32| (v * 255.0).round().saturating_as::<u8>();
        let [r, g, b, a] = self.straight();
        [quantize(r), quantize(g), quantize(b), quantize(a)]
    }
    #[must_use]
    pub fn premultiplied(self) -> [f32; 4] {
        [self.r, self.g, self.b, self.a]
    }
    /// Unpremultiplied components. Transparent yields all zeros.
    #[must_use]
    pub fn straight(self) -> [f32; 4] {
        if self.a == 0.0 {
            [0.0; 4]
        } else {
            [self.r / self.a, self.g / self.a, self.b / self.a, self.a]
        }
    }
    #[must_use]
    pub fn alpha(self) -> f32 {
        self.a
    }
    #[must_use]
    pub fn is_transparent(self) -> bool {
        self.a == 0.0
    }
    /// Scale all components, i.e. modulate the opacity of a premultiplied color.
    #[must_use]
    pub fn scaled(self, factor: f32) -> Self {
        Self::from_premultiplied(
            self.r * factor,
            self.g * factor,
            self.b * factor,
            self.a * factor,
        )
    }
    /// Parse `#rrggbb` or `#rrggbbaa` (straight alpha).
    #[must_use]
    pub fn from_hex(hex: &str) -> Option<Self> {
        let digits = hex.strip_prefix('#')?;
        if !digits.is_ascii() {
            return None;
        }
        let byte = |idx: usize| u8::from_str_radix(digits.get(idx * 2..idx * 2 + 2)?, 16).ok();
        match digits.len() {
            6 => Some(Self::from_rgba8([byte(0)?, byte(1)?, byte(2)?, 255])),
            8 => Some(Self::from_rgba8([byte(0)?, byte(1)?, byte(2)?, byte(3)?])),
            _ => None,
        }
    }
    /// Format as `#rrggbbaa`, the inverse of [`Self::from_hex`] up to 8-bit quantization.
    #[must_use]
    pub fn to_hex(self) -> String {
        let [r, g, b, a] = self.to_rgba8();
        format!("#{r:02x}{g:02x}{b:02x}{a:02x}")
    }
}

#[cfg(test)]
mod test {
    use super::Color;
    #[test]
    fn transparent_normalizes() {
        assert_eq!(Color::from_straight(0.3, 0.9, 0.1, 0.0), Color::TRANSPARENT);
        assert_eq!(Color::from_premultiplied(f32::NAN, 0.0, 0.0, 1.0).premultiplied()[0], 0.0);
    }
    #[test]
    fn hex() {
        assert_eq!(Color::from_hex("#ffffff"), Some(Color::WHITE));
        assert_eq!(Color::from_hex("#000000ff"), Some(Color::BLACK));
        assert_eq!(Color::from_hex("#12345"), None);
        assert_eq!(Color::from_hex("ffffff"), None);
        assert_eq!(Color::from_hex("#ff8000c0").map(Color::to_hex).as_deref(), Some("#ff8000c0"));
    }
}
