//! A narrow surface for automation hosts to bind to.

use crate::image::Image;
use crate::state::graph::NodeID;
use crate::state::ColorSpace;

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ColorSpaceError {
    #[error("color space {0:?} is not available")]
    NotAvailable(String),
}

pub struct ScriptImage<'a> {
    image: &'a mut Image,
}
impl<'a> ScriptImage<'a> {
    pub fn new(image: &'a mut Image) -> Self {
        Self { image }
    }
    #[must_use]
    pub fn active_layer(&self) -> Option<NodeID> {
        self.image.active_layer()
    }
    #[must_use]
    pub fn width(&self) -> u32 {
        self.image.width()
    }
    #[must_use]
    pub fn height(&self) -> u32 {
        self.image.height()
    }
    /// Convert the image to the color space registered as `name`, such as `"GRAYA"`.
    pub fn convert_to_color_space(&mut self, name: &str) -> Result<(), ColorSpaceError> {
        let Ok(space) = name.parse::<ColorSpace>() else {
            log::warn!("{name} colorspace is not available, please check your installation.");
            return Err(ColorSpaceError::NotAvailable(name.to_owned()));
        };
        self.image.convert_color_space(space);
        Ok(())
    }
}
