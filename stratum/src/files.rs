//! Reading file layers and writing results, through real codecs.

use std::path::{Path, PathBuf};

use anyhow::Context;
use stratum_core::color::Color;
use stratum_core::manager::{DecodedFile, FileError, FileSource};
use stratum_core::raster::{Raster, Rect};
use stratum_core::state::ColorSpace;

/// Decodes anything the `image` crate can, relative to a base directory.
pub struct ImageFiles {
    pub base: PathBuf,
}
impl FileSource for ImageFiles {
    fn decode(&self, path: &Path) -> Result<DecodedFile, FileError> {
        let full = self.base.join(path);
        let unreadable = |reason: String| FileError::Unreadable {
            path: full.clone(),
            reason,
        };
        let decoded = image::open(&full)
            .map_err(|err| unreadable(err.to_string()))?
            .into_rgba8();
        let (width, height) = decoded.dimensions();
        let pixels = decoded.pixels().map(|pixel| Color::from_rgba8(pixel.0)).collect();
        let raster = Raster::from_pixels(Rect::new(0, 0, width, height), pixels)
            .ok_or_else(|| unreadable("pixel count mismatch".to_owned()))?;
        log::debug!("decoded {} ({width}x{height})", full.display());
        Ok(DecodedFile {
            raster,
            // The image crate does not surface pHYs/JFIF density.
            resolution: None,
        })
    }
}

/// Write the part of `raster` inside `bounds` as an 8-bit PNG, gray or color to match `space`.
pub fn write_png(path: &Path, raster: &Raster, bounds: Rect, space: ColorSpace) -> anyhow::Result<()> {
    let file = std::fs::File::create(path).with_context(|| format!("creating {}", path.display()))?;
    let mut encoder = png::Encoder::new(std::io::BufWriter::new(file), bounds.width, bounds.height);
    let color_type = match space {
        ColorSpace::Rgba => png::ColorType::Rgba,
        ColorSpace::Graya => png::ColorType::GrayscaleAlpha,
    };
    encoder.set_color(color_type);
    encoder.set_depth(png::BitDepth::Eight);

    let mut data = Vec::with_capacity(bounds.area() * color_type.samples());
    for (x, y) in bounds.points() {
        let [r, g, b, a] = raster.get(x, y).to_rgba8();
        match space {
            ColorSpace::Rgba => data.extend_from_slice(&[r, g, b, a]),
            // Already desaturated, any channel will do.
            ColorSpace::Graya => data.extend_from_slice(&[r, a]),
        }
    }
    let mut writer = encoder.write_header()?;
    writer.write_image_data(&data)?;
    writer.finish()?;
    log::info!("wrote {} ({}x{})", path.display(), bounds.width, bounds.height);
    Ok(())
}
