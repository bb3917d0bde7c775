pub mod adapter;
pub mod blend;
pub mod color;
pub mod commands;
pub mod events;
pub mod filter;
pub mod id;
pub mod image;
pub mod jobs;
pub mod manager;
pub mod metadata;
pub mod projection;
pub mod queue;
pub mod raster;
pub mod script;
pub mod state;
pub mod style;

pub use id::UniqueID;
