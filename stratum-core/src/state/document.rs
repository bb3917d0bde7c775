use crate::raster::Rect;

pub type ID = crate::UniqueID<Document>;

#[derive(
    strum::EnumString, strum::AsRefStr, strum::Display, strum::EnumIter, Copy, Clone, Debug, PartialEq, Eq, Default,
)]
pub enum ColorSpace {
    #[default]
    #[strum(serialize = "RGBA")]
    Rgba,
    #[strum(serialize = "GRAYA")]
    Graya,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Document {
    /// Name of the image, shown to the user.
    pub name: String,
    /// The canvas area. Content outside is kept, but never shown.
    pub bounds: Rect,
    /// Dots per inch.
    pub resolution: f32,
    pub color_space: ColorSpace,
}
impl Default for Document {
    fn default() -> Self {
        Self {
            name: "New Image".into(),
            bounds: Rect::new(0, 0, 512, 512),
            resolution: 72.0,
            color_space: ColorSpace::default(),
        }
    }
}

pub mod commands {
    #[derive(Clone, Debug)]
    pub enum Command {
        BoundsChanged {
            from: crate::raster::Rect,
            to: crate::raster::Rect,
        },
        ColorSpaceChanged {
            from: super::ColorSpace,
            to: super::ColorSpace,
        },
    }
}

impl crate::commands::CommandConsumer<commands::Command> for Document {
    fn apply(
        &mut self,
        command: crate::commands::DoUndo<'_, commands::Command>,
    ) -> Result<(), crate::commands::CommandError> {
        use crate::commands::{CommandError, DoUndo};
        use commands::Command;
        match command {
            DoUndo::Do(Command::BoundsChanged { from, to })
            | DoUndo::Undo(Command::BoundsChanged { from: to, to: from }) => {
                if self.bounds != *from {
                    return Err(CommandError::MismatchedState);
                }
                self.bounds = *to;
                Ok(())
            }
            DoUndo::Do(Command::ColorSpaceChanged { from, to })
            | DoUndo::Undo(Command::ColorSpaceChanged { from: to, to: from }) => {
                if self.color_space != *from {
                    return Err(CommandError::MismatchedState);
                }
                self.color_space = *to;
                Ok(())
            }
        }
    }
}

/// Mutates a document, recording a command for every change made.
pub struct DocumentWriter<'a, Write: crate::queue::writer::CommandWrite<commands::Command>> {
    writer: Write,
    document: &'a mut Document,
}
impl<'a, Write: crate::queue::writer::CommandWrite<commands::Command>> std::ops::Deref
    for DocumentWriter<'a, Write>
{
    type Target = Document;
    fn deref(&self) -> &Self::Target {
        self.document
    }
}
impl<'a, Write: crate::queue::writer::CommandWrite<commands::Command>> DocumentWriter<'a, Write> {
    pub fn new(writer: Write, document: &'a mut Document) -> Self {
        Self { writer, document }
    }
    pub fn set_bounds(&mut self, bounds: Rect) {
        let from = self.document.bounds;
        if from != bounds {
            self.document.bounds = bounds;
            self.writer
                .write(commands::Command::BoundsChanged { from, to: bounds });
        }
    }
    pub fn set_color_space(&mut self, color_space: ColorSpace) {
        let from = self.document.color_space;
        if from != color_space {
            self.document.color_space = color_space;
            self.writer.write(commands::Command::ColorSpaceChanged {
                from,
                to: color_space,
            });
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    #[test]
    fn color_space_names() {
        assert_eq!("GRAYA".parse::<ColorSpace>().ok(), Some(ColorSpace::Graya));
        assert_eq!(ColorSpace::Rgba.as_ref(), "RGBA");
        assert!("CMYKA".parse::<ColorSpace>().is_err());
    }
}
