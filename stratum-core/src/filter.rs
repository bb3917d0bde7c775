//! # Filters and generators
//!
//! Adjustment layers run a [`Filter`] over what lies beneath them, generator layers run a
//! [`Generator`] to produce pixels from nothing. Both are driven by a [`FilterConfig`], a named
//! bag of string parameters with a stable text form. Two configs with the same text form always
//! produce the same pixels, which is how no-op edits are detected.

use std::collections::BTreeMap;

use crate::color::Color;
use crate::raster::{Rect, Raster};

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum FilterError {
    #[error("no filter or generator named {0:?}")]
    Unknown(String),
    #[error("parameter {name:?} has invalid value {value:?}")]
    InvalidParam { name: String, value: String },
    #[error("malformed configuration text: {0}")]
    Malformed(String),
    #[error("can't write configuration text: {0}")]
    Unwritable(String),
}

/// Named parameter set for a filter or generator.
///
/// Parameters are kept sorted by key, making [`FilterConfig::to_xml`] canonical.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct FilterConfig {
    name: String,
    version: u32,
    params: BTreeMap<String, String>,
}
impl FilterConfig {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: 1,
            params: BTreeMap::new(),
        }
    }
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.set(key, value);
        self
    }
    pub fn set(&mut self, key: impl Into<String>, value: impl ToString) {
        self.params.insert(key.into(), value.to_string());
    }
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }
    #[must_use]
    pub fn version(&self) -> u32 {
        self.version
    }
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.params.get(key).map(String::as_str)
    }
    pub fn params(&self) -> impl Iterator<Item = (&str, &str)> {
        self.params.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
    fn parse_or<T: std::str::FromStr>(&self, key: &str, default: T) -> Result<T, FilterError> {
        match self.get(key) {
            None => Ok(default),
            Some(value) => value.parse().map_err(|_| FilterError::InvalidParam {
                name: key.to_owned(),
                value: value.to_owned(),
            }),
        }
    }
    fn color_or(&self, key: &str, default: Color) -> Result<Color, FilterError> {
        match self.get(key) {
            None => Ok(default),
            Some(value) => Color::from_hex(value).ok_or_else(|| FilterError::InvalidParam {
                name: key.to_owned(),
                value: value.to_owned(),
            }),
        }
    }
    /// Canonical text form.
    pub fn to_xml(&self) -> Result<String, FilterError> {
        quick_xml::se::to_string(&ParamsXml::from(self))
            .map_err(|err| FilterError::Unwritable(err.to_string()))
    }
    /// Parse the text form produced by [`Self::to_xml`].
    pub fn from_xml(text: &str) -> Result<Self, FilterError> {
        let parsed: ParamsXml =
            quick_xml::de::from_str(text).map_err(|err| FilterError::Malformed(err.to_string()))?;
        Ok(parsed.into())
    }
}

/// `<params version=".." name=".."><param name="..">value</param>..</params>`
#[derive(serde::Serialize, serde::Deserialize)]
#[serde(rename = "params")]
struct ParamsXml {
    #[serde(rename = "@version")]
    version: u32,
    #[serde(rename = "@name")]
    name: String,
    #[serde(rename = "param", default)]
    params: Vec<ParamXml>,
}
#[derive(serde::Serialize, serde::Deserialize)]
struct ParamXml {
    #[serde(rename = "@name")]
    name: String,
    #[serde(rename = "$text", default)]
    value: String,
}
impl From<&FilterConfig> for ParamsXml {
    fn from(config: &FilterConfig) -> Self {
        Self {
            version: config.version,
            name: config.name.clone(),
            params: config
                .params
                .iter()
                .map(|(name, value)| ParamXml {
                    name: name.clone(),
                    value: value.clone(),
                })
                .collect(),
        }
    }
}
impl From<ParamsXml> for FilterConfig {
    fn from(xml: ParamsXml) -> Self {
        Self {
            name: xml.name,
            version: xml.version,
            params: xml
                .params
                .into_iter()
                .map(|param| (param.name, param.value))
                .collect(),
        }
    }
}

/// Filters usable by adjustment layers.
#[derive(strum::EnumString, strum::AsRefStr, strum::EnumIter, Copy, Clone, Debug, PartialEq, Eq)]
#[strum(serialize_all = "snake_case")]
pub enum Filter {
    Invert,
    Desaturate,
    /// `brightness` and `contrast`, both in `[-1, 1]`.
    BrightnessContrast,
    /// Black or white by luminance against `level`.
    Threshold,
}
impl Filter {
    pub fn lookup(config: &FilterConfig) -> Result<Self, FilterError> {
        config
            .name()
            .parse()
            .map_err(|_| FilterError::Unknown(config.name().to_owned()))
    }
    /// Run the filter named by `config` over `input`. Alpha is preserved.
    pub fn apply(config: &FilterConfig, input: &Raster) -> Result<Raster, FilterError> {
        let per_channel: Box<dyn Fn([f32; 3]) -> [f32; 3]> = match Self::lookup(config)? {
            Self::Invert => Box::new(|[r, g, b]| [1.0 - r, 1.0 - g, 1.0 - b]),
            Self::Desaturate => Box::new(|rgb| [luminance(rgb); 3]),
            Self::BrightnessContrast => {
                let brightness: f32 = config.parse_or("brightness", 0.0)?;
                let contrast: f32 = config.parse_or("contrast", 0.0)?;
                let slope = (1.0 + contrast.clamp(-1.0, 1.0)).max(0.0);
                Box::new(move |rgb| rgb.map(|c| (c - 0.5) * slope + 0.5 + brightness))
            }
            Self::Threshold => {
                let level: f32 = config.parse_or("level", 0.5)?;
                Box::new(move |rgb| [if luminance(rgb) >= level { 1.0 } else { 0.0 }; 3])
            }
        };
        Ok(input.map(|_, _, color| {
            if color.is_transparent() {
                return color;
            }
            let [r, g, b, a] = color.straight();
            let [r, g, b] = per_channel([r, g, b]);
            Color::from_straight(r.clamp(0.0, 1.0), g.clamp(0.0, 1.0), b.clamp(0.0, 1.0), a)
        }))
    }
}

/// Generators usable by generator (fill) layers.
#[derive(strum::EnumString, strum::AsRefStr, strum::EnumIter, Copy, Clone, Debug, PartialEq, Eq)]
#[strum(serialize_all = "snake_case")]
pub enum Generator {
    /// Solid `color`.
    Color,
    /// Alternating `color_a`/`color_b` squares of `size` pixels.
    Checkerboard,
    /// Horizontal ramp from `from` at the left edge to `to` at the right edge.
    Gradient,
}
impl Generator {
    pub fn lookup(config: &FilterConfig) -> Result<Self, FilterError> {
        config
            .name()
            .parse()
            .map_err(|_| FilterError::Unknown(config.name().to_owned()))
    }
    /// Produce pixels covering `rect`. Depends only on the config and `rect`.
    pub fn generate(config: &FilterConfig, rect: Rect) -> Result<Raster, FilterError> {
        Ok(match Self::lookup(config)? {
            Self::Color => Raster::filled(rect, config.color_or("color", Color::BLACK)?),
            Self::Checkerboard => {
                let size: u32 = config.parse_or("size", 8)?;
                let size = i64::from(size.max(1));
                let a = config.color_or("color_a", Color::WHITE)?;
                let b = config.color_or("color_b", Color::from_straight(0.8, 0.8, 0.8, 1.0))?;
                Raster::from_fn(rect, |x, y| {
                    let cell = (i64::from(x).div_euclid(size) + i64::from(y).div_euclid(size)) % 2;
                    if cell == 0 {
                        a
                    } else {
                        b
                    }
                })
            }
            Self::Gradient => {
                let from = config.color_or("from", Color::BLACK)?;
                let to = config.color_or("to", Color::WHITE)?;
                let span = rect.width.saturating_sub(1).max(1) as f32;
                let [fr, fg, fb, fa] = from.premultiplied();
                let [tr, tg, tb, ta] = to.premultiplied();
                let lerp = |a: f32, b: f32, t: f32| a + (b - a) * t;
                Raster::from_fn(rect, |x, _| {
                    let t = (x - rect.x) as f32 / span;
                    Color::from_premultiplied(
                        lerp(fr, tr, t),
                        lerp(fg, tg, t),
                        lerp(fb, tb, t),
                        lerp(fa, ta, t),
                    )
                })
            }
        })
    }
}

fn luminance([r, g, b]: [f32; 3]) -> f32 {
    0.2126 * r + 0.7152 * g + 0.0722 * b
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn xml_round_trip_is_byte_identical() {
        let config = FilterConfig::new("brightness_contrast")
            .with("contrast", "0.25")
            .with("brightness", -0.5)
            .with("note", "a<b & \"c\">");
        let text = config.to_xml().unwrap();
        let parsed = FilterConfig::from_xml(&text).unwrap();
        assert_eq!(parsed, config);
        assert_eq!(parsed.to_xml().unwrap(), text);
    }
    #[test]
    fn parameter_order_does_not_matter() {
        let a = FilterConfig::new("x").with("a", 1).with("b", 2);
        let b = FilterConfig::new("x").with("b", 2).with("a", 1);
        assert_eq!(a.to_xml().unwrap(), b.to_xml().unwrap());
    }
    #[test]
    fn malformed_text_is_rejected() {
        assert!(FilterConfig::from_xml("<params>").is_err());
        assert!(FilterConfig::from_xml("<params version=\"1\" name=\"x\"><param name=\"a\">1").is_err());
        assert!(FilterConfig::from_xml("<params version=\"one\" name=\"x\"/>").is_err());
    }
    #[test]
    fn invert_keeps_alpha() {
        let input = Raster::filled(Rect::new(0, 0, 2, 2), Color::from_straight(1.0, 0.0, 0.0, 0.5));
        let out = Filter::apply(&FilterConfig::new("invert"), &input).unwrap();
        assert_eq!(out.get(0, 0), Color::from_straight(0.0, 1.0, 1.0, 0.5));
    }
    #[test]
    fn unknown_names() {
        let bogus = FilterConfig::new("sharpen_everything");
        let input = Raster::transparent(Rect::new(0, 0, 1, 1));
        assert_eq!(
            Filter::apply(&bogus, &input),
            Err(FilterError::Unknown("sharpen_everything".into()))
        );
        assert!(Generator::generate(&bogus, Rect::new(0, 0, 1, 1)).is_err());
    }
    #[test]
    fn checkerboard_alternates() {
        let config = FilterConfig::new("checkerboard")
            .with("size", 2)
            .with("color_a", "#ffffff")
            .with("color_b", "#000000");
        let out = Generator::generate(&config, Rect::new(0, 0, 4, 4)).unwrap();
        assert_eq!(out.get(0, 0), Color::WHITE);
        assert_eq!(out.get(2, 0), Color::BLACK);
        assert_eq!(out.get(2, 2), Color::WHITE);
    }
}
